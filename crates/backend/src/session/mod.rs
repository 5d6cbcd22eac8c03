//! Session management module.
//!
//! This module provides PTY spawning, the session registry, and the I/O
//! pumps that move bytes between sessions and the event stream.

pub mod broker;
pub mod pty;
pub mod registry;

pub use broker::OutputRing;
pub use pty::{default_shell, Session, SessionError, SessionId};
pub use registry::SessionRegistry;
