//! Control-surface message definitions.
//!
//! These types form the request/response and notification contract between
//! the backend session manager and its UI consumer. They are plain serde
//! types so a front-end can drive the backend over any in-process or IPC
//! transport that carries JSON.

use serde::{Deserialize, Serialize};

/// Default terminal width in columns.
pub const DEFAULT_COLS: u16 = 80;

/// Default terminal height in rows.
pub const DEFAULT_ROWS: u16 = 24;

/// Options for creating a new terminal session.
///
/// Every field has a sensible default: the platform shell, the user's home
/// directory, an unmodified environment, and an 80x24 terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalOptions {
    /// Shell or command to run (default: the user's shell).
    pub shell: Option<String>,
    /// Working directory for the session (default: user home).
    pub cwd: Option<String>,
    /// Environment overrides, merged over the inherited environment.
    pub env: Vec<(String, String)>,
    /// Requested terminal columns.
    pub cols: u16,
    /// Requested terminal rows.
    pub rows: u16,
}

impl Default for TerminalOptions {
    fn default() -> Self {
        Self {
            shell: None,
            cwd: None,
            env: Vec::new(),
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
        }
    }
}

/// Lifecycle state of a session.
///
/// A session moves strictly forward: `Starting` while the process is being
/// spawned, `Running` once the spawn succeeded, `Exited` exactly once when
/// the backing process terminates, and `Closed` when the backend has
/// released every resource for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// The backing process is being spawned.
    Starting,
    /// The backing process is alive.
    Running,
    /// The backing process terminated with the given exit code.
    Exited(i32),
    /// All resources for the session have been released.
    Closed,
}

/// Requests the UI layer can issue against the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlRequest {
    /// Create a new terminal session.
    CreateTerminal {
        /// Creation options; immutable for the session's lifetime.
        options: TerminalOptions,
    },
    /// Write input bytes to a session.
    WriteTerminal {
        /// Target session.
        session_id: String,
        /// Raw input bytes (keystrokes, pasted text).
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
    },
    /// Resize a session's terminal.
    ResizeTerminal {
        /// Target session.
        session_id: String,
        /// New terminal columns; must be positive.
        cols: u16,
        /// New terminal rows; must be positive.
        rows: u16,
    },
    /// Tear down a session. Idempotent once the session has closed.
    DestroyTerminal {
        /// Target session.
        session_id: String,
    },
    /// List all known sessions.
    ListTerminals,
}

/// Responses sent from the backend to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlResponse {
    /// A session was created.
    Created {
        /// The freshly allocated session id.
        session_id: String,
        /// Process id of the spawned shell, if known.
        pid: Option<u32>,
    },
    /// The request succeeded with nothing further to report.
    Ack,
    /// Snapshot of all known sessions.
    Terminals {
        /// One entry per live session.
        terminals: Vec<TerminalInfo>,
    },
    /// The request failed.
    Error {
        /// Machine-readable error category.
        code: ErrorCode,
        /// Human-readable error message.
        message: String,
    },
}

/// Machine-readable error categories for control-surface failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// The executable could not be launched.
    SpawnFailed,
    /// No pseudo-terminal slot (or session slot) is available.
    ResourceExhausted,
    /// The session id was never issued or the session is fully closed.
    UnknownSession,
    /// Rows or columns were non-positive.
    InvalidSize,
    /// A transient I/O error on the pseudo-terminal.
    Io,
}

/// Snapshot of one session for the UI's tab bar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalInfo {
    /// Unique session identifier.
    pub session_id: String,
    /// Process id of the shell, if known.
    pub pid: Option<u32>,
    /// Current terminal columns.
    pub cols: u16,
    /// Current terminal rows.
    pub rows: u16,
    /// Current lifecycle state.
    pub state: SessionState,
}

/// Asynchronous notifications from the backend to the UI.
///
/// Events are tagged with the session id they belong to; the backend never
/// emits an event for an id it has not issued or has already fully closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminalEvent {
    /// Output bytes produced by a session.
    Data {
        /// Session the output belongs to.
        session_id: String,
        /// Raw output bytes.
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
    },
    /// A session's backing process terminated. Emitted exactly once.
    Exit {
        /// Session that exited.
        session_id: String,
        /// Exit code of the backing process (-1 if it could not be reaped).
        exit_code: i32,
    },
}

impl TerminalEvent {
    /// Returns the session id this event is addressed to.
    pub fn session_id(&self) -> &str {
        match self {
            TerminalEvent::Data { session_id, .. } => session_id,
            TerminalEvent::Exit { session_id, .. } => session_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_default() {
        let options = TerminalOptions::default();
        assert_eq!(options.cols, 80);
        assert_eq!(options.rows, 24);
        assert!(options.shell.is_none());
        assert!(options.cwd.is_none());
        assert!(options.env.is_empty());
    }

    #[test]
    fn test_options_partial_deserialization_fills_defaults() {
        // A UI that only cares about the shell should not have to spell out
        // the rest of the options.
        let options: TerminalOptions = serde_json::from_str(r#"{"shell": "/bin/zsh"}"#).unwrap();
        assert_eq!(options.shell.as_deref(), Some("/bin/zsh"));
        assert_eq!(options.cols, DEFAULT_COLS);
        assert_eq!(options.rows, DEFAULT_ROWS);
    }

    #[test]
    fn test_create_request_roundtrip() {
        let request = ControlRequest::CreateTerminal {
            options: TerminalOptions {
                shell: Some("/bin/bash".to_string()),
                cwd: Some("/tmp".to_string()),
                env: vec![("TERM".to_string(), "xterm-256color".to_string())],
                cols: 120,
                rows: 40,
            },
        };
        let json = serde_json::to_string(&request).unwrap();
        let deserialized: ControlRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, request);
    }

    #[test]
    fn test_write_request_roundtrip() {
        let request = ControlRequest::WriteTerminal {
            session_id: "sess-abc123".to_string(),
            data: b"ls -la\n".to_vec(),
        };
        let json = serde_json::to_string(&request).unwrap();
        let deserialized: ControlRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, request);
    }

    #[test]
    fn test_error_response_roundtrip() {
        let response = ControlResponse::Error {
            code: ErrorCode::UnknownSession,
            message: "unknown session: sess-gone".to_string(),
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("UnknownSession"));

        let deserialized: ControlResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, response);
    }

    #[test]
    fn test_data_event_roundtrip() {
        let event = TerminalEvent::Data {
            session_id: "sess-abc123".to_string(),
            data: vec![0x1b, b'[', b'2', b'J'],
        };
        let json = serde_json::to_string(&event).unwrap();
        let deserialized: TerminalEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, event);
        assert_eq!(event.session_id(), "sess-abc123");
    }

    #[test]
    fn test_exit_event_roundtrip() {
        let event = TerminalEvent::Exit {
            session_id: "sess-abc123".to_string(),
            exit_code: 130,
        };
        let json = serde_json::to_string(&event).unwrap();
        let deserialized: TerminalEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, event);
        assert_eq!(event.session_id(), "sess-abc123");
    }

    #[test]
    fn test_session_state_ordering_is_explicit() {
        // Exited carries the code; two different codes are distinct states.
        assert_ne!(SessionState::Exited(0), SessionState::Exited(1));
        assert_ne!(SessionState::Running, SessionState::Closed);
    }
}
