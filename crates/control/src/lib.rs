//! # Termdock Control Library
//!
//! This crate defines the control surface between the termdock backend and
//! any UI front-end (the tabbed window shell, tests, or a scripted driver).
//!
//! ## Overview
//!
//! The backend manages pseudo-terminal sessions; the UI only ever holds
//! opaque session ids. Everything that crosses the boundary is defined here:
//!
//! - **Requests**: create / write / resize / destroy, addressed by session id
//! - **Responses**: acknowledgements, created-session details, typed errors
//! - **Events**: asynchronous `Data` and `Exit` notifications per session
//!
//! ## Contract
//!
//! For every session the event stream carries zero or more `Data` events
//! followed by exactly one `Exit` event. There is no implicit "current"
//! session at this layer; the UI owns the notion of an active tab and maps
//! it to a session id.
//!
//! ## Modules
//!
//! - [`messages`]: Request, response, and event definitions

pub mod messages;

pub use messages::{
    ControlRequest, ControlResponse, ErrorCode, SessionState, TerminalEvent, TerminalInfo,
    TerminalOptions, DEFAULT_COLS, DEFAULT_ROWS,
};
