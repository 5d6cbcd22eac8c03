//! Control channel: the request/response and event boundary exposed to the
//! UI layer.
//!
//! The channel wraps the [`SessionRegistry`] behind the operations the UI
//! shell needs (create, write, resize, destroy, list) plus the merged event
//! stream of `Data` and `Exit` notifications. A serialized front-end can
//! drive the same surface through [`ControlChannel::handle_request`].

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use control::{ControlRequest, ControlResponse, TerminalEvent, TerminalInfo, TerminalOptions};

use crate::config::SessionConfig;
use crate::session::{SessionError, SessionId, SessionRegistry};

/// Capacity of the shared event stream. Bounded so a stalled consumer shows
/// up as per-session backpressure in the broker instead of unbounded memory.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// The backend's boundary with the UI layer.
pub struct ControlChannel {
    registry: Arc<SessionRegistry>,
}

impl ControlChannel {
    /// Creates the channel and its event stream.
    ///
    /// The receiver carries zero or more `Data` events per session followed
    /// by exactly one `Exit` event; the consumer is expected to copy or
    /// queue quickly rather than block on it.
    pub fn new(config: SessionConfig) -> (Self, mpsc::Receiver<TerminalEvent>) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let registry = Arc::new(SessionRegistry::new(config, event_tx));
        (Self { registry }, event_rx)
    }

    /// Returns the underlying registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Creates a terminal session and returns its id.
    pub async fn create_terminal(
        &self,
        options: TerminalOptions,
    ) -> Result<SessionId, SessionError> {
        self.registry.create(options).await
    }

    /// Writes input bytes to a session.
    pub fn write_to_terminal(&self, id: &str, data: Vec<u8>) -> Result<(), SessionError> {
        self.registry.write(id, data)
    }

    /// Resizes a session's terminal.
    pub fn resize_terminal(&self, id: &str, cols: u16, rows: u16) -> Result<(), SessionError> {
        self.registry.resize(id, cols, rows)
    }

    /// Tears down a session.
    pub async fn destroy_terminal(&self, id: &str) -> Result<(), SessionError> {
        self.registry.destroy(id).await
    }

    /// Returns a snapshot of all sessions.
    pub fn list_terminals(&self) -> Vec<TerminalInfo> {
        self.registry.list()
    }

    /// Dispatches one serialized request to the matching operation.
    pub async fn handle_request(&self, request: ControlRequest) -> ControlResponse {
        debug!(?request, "handling control request");
        match request {
            ControlRequest::CreateTerminal { options } => {
                match self.create_terminal(options).await {
                    Ok(session_id) => {
                        let pid = self
                            .registry
                            .info(&session_id)
                            .ok()
                            .and_then(|info| info.pid);
                        ControlResponse::Created { session_id, pid }
                    }
                    Err(e) => error_response(e),
                }
            }
            ControlRequest::WriteTerminal { session_id, data } => {
                match self.write_to_terminal(&session_id, data) {
                    Ok(()) => ControlResponse::Ack,
                    Err(e) => error_response(e),
                }
            }
            ControlRequest::ResizeTerminal {
                session_id,
                cols,
                rows,
            } => match self.resize_terminal(&session_id, cols, rows) {
                Ok(()) => ControlResponse::Ack,
                Err(e) => error_response(e),
            },
            ControlRequest::DestroyTerminal { session_id } => {
                match self.destroy_terminal(&session_id).await {
                    Ok(()) => ControlResponse::Ack,
                    Err(e) => error_response(e),
                }
            }
            ControlRequest::ListTerminals => ControlResponse::Terminals {
                terminals: self.list_terminals(),
            },
        }
    }
}

/// Converts a session error into its control-surface response.
fn error_response(error: SessionError) -> ControlResponse {
    ControlResponse::Error {
        code: error.code(),
        message: error.to_string(),
    }
}
