//! # Termdock Backend Library
//!
//! This crate implements the session backend for termdock, a tabbed desktop
//! terminal emulator. The UI shell owns windows and tabs; this crate owns
//! everything behind them: spawning shell processes on pseudo-terminals,
//! pumping their I/O, and reporting their lifecycles.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     ControlChannel                       │
//! │   create / write / resize / destroy    data+exit events  │
//! ├──────────────────────────────────────────────────────────┤
//! │                    SessionRegistry                       │
//! │        id → Session mapping, lifecycle, teardown         │
//! ├──────────────────────────────────────────────────────────┤
//! │                       IoBroker                           │
//! │   per-session reader / writer / forwarder pump tasks     │
//! ├──────────────────────────────────────────────────────────┤
//! │              Session (PTY + child process)               │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use backend::channel::ControlChannel;
//! use backend::config::Config;
//! use control::{TerminalOptions, TerminalEvent};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!     let (channel, mut events) = ControlChannel::new(config.session);
//!
//!     let id = channel.create_terminal(TerminalOptions::default()).await?;
//!     channel.write_to_terminal(&id, b"ls\n".to_vec())?;
//!
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             TerminalEvent::Data { data, .. } => print!("{}", String::from_utf8_lossy(&data)),
//!             TerminalEvent::Exit { .. } => break,
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`session`]: PTY spawning, registry, and I/O pumps
//! - [`channel`]: The control surface exposed to the UI layer

pub mod channel;
pub mod config;
pub mod session;

// Re-export the shared control-surface types for convenience
pub use control;

// Re-export config types for convenience
pub use config::{Config, ConfigError, GeneralConfig, SessionConfig};

// Re-export session types for convenience
pub use session::{default_shell, OutputRing, Session, SessionError, SessionId, SessionRegistry};

// Re-export channel types for convenience
pub use channel::ControlChannel;
