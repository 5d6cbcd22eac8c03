//! PTY-backed sessions.
//!
//! A session is one spawned process attached to a pseudo-terminal, plus its
//! identity, size, and lifecycle state. Sessions are created and owned by the
//! [`SessionRegistry`](super::registry::SessionRegistry); everything outside
//! the registry addresses them by id only.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use control::{ErrorCode, SessionState, TerminalInfo, TerminalOptions};

/// Unique identifier for a session. UUIDv4, never reused.
pub type SessionId = String;

/// Errors that can occur during session operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The executable could not be launched.
    #[error("failed to spawn session process: {0}")]
    SpawnFailed(String),

    /// No pseudo-terminal device (or session slot) is available.
    #[error("no pseudo-terminal available: {0}")]
    ResourceExhausted(String),

    /// The id was never issued, or the session is closed or being torn down.
    #[error("unknown session: {0}")]
    UnknownSession(SessionId),

    /// Rows or columns were non-positive.
    #[error("invalid terminal size {cols}x{rows}: rows and cols must be positive")]
    InvalidSize {
        /// Requested columns.
        cols: u16,
        /// Requested rows.
        rows: u16,
    },

    /// Transient I/O error on the pseudo-terminal.
    #[error("pty I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Maps the error to its control-surface category.
    pub fn code(&self) -> ErrorCode {
        match self {
            SessionError::SpawnFailed(_) => ErrorCode::SpawnFailed,
            SessionError::ResourceExhausted(_) => ErrorCode::ResourceExhausted,
            SessionError::UnknownSession(_) => ErrorCode::UnknownSession,
            SessionError::InvalidSize { .. } => ErrorCode::InvalidSize,
            SessionError::Io(_) => ErrorCode::Io,
        }
    }
}

/// The I/O endpoints of a freshly spawned session, handed to the broker.
pub(crate) struct SessionIo {
    /// Read side of the PTY master (process output).
    pub(crate) reader: Box<dyn Read + Send>,
    /// Write side of the PTY master (process input).
    pub(crate) writer: Box<dyn Write + Send>,
    /// FIFO queue of input submitted via [`Session::write`].
    pub(crate) input_rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

/// A single pseudo-terminal-backed process.
///
/// Lifecycle: `Starting → Running → Exited(code) → Closed`. `Exited` is
/// entered exactly once, by the output pump after it reaps the child;
/// `Closed` is entered by the registry once every resource is released.
pub struct Session {
    id: SessionId,
    pid: Option<u32>,
    options: TerminalOptions,
    master: Mutex<Box<dyn MasterPty + Send>>,
    child: Arc<Mutex<Box<dyn Child + Send + Sync>>>,
    /// Current terminal size as (cols, rows).
    dims: Mutex<(u16, u16)>,
    state: Mutex<SessionState>,
    /// Set once a destroy request has begun; operations fail from then on.
    teardown: AtomicBool,
    /// Guards the at-most-one exit notification.
    exit_notified: AtomicBool,
    input_tx: mpsc::UnboundedSender<Vec<u8>>,
    cancel: CancellationToken,
}

impl Session {
    /// Spawns a process attached to a fresh pseudo-terminal.
    ///
    /// `options` must carry positive dimensions; shell and cwd fall back to
    /// platform defaults when unset. The returned [`SessionIo`] must be wired
    /// into the I/O broker before the session is exposed to callers.
    pub(crate) fn spawn(options: TerminalOptions) -> Result<(Arc<Self>, SessionIo), SessionError> {
        let id = Uuid::new_v4().to_string();
        let shell = resolve_shell(options.shell.clone());

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: options.rows,
                cols: options.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::ResourceExhausted(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&shell);
        if let Some(cwd) = &options.cwd {
            cmd.cwd(cwd);
        }
        // Announce ourselves as a terminal; caller overrides still win.
        cmd.env("TERM", "xterm-256color");
        for (key, value) in &options.env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;
        drop(pair.slave);

        let pid = child.process_id();

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        let (input_tx, input_rx) = mpsc::unbounded_channel();

        tracing::debug!(
            session_id = %id,
            pid = ?pid,
            shell = %shell,
            cols = options.cols,
            rows = options.rows,
            "spawned pty session"
        );

        let session = Arc::new(Session {
            id,
            pid,
            dims: Mutex::new((options.cols, options.rows)),
            options,
            master: Mutex::new(pair.master),
            child: Arc::new(Mutex::new(child)),
            state: Mutex::new(SessionState::Starting),
            teardown: AtomicBool::new(false),
            exit_notified: AtomicBool::new(false),
            input_tx,
            cancel: CancellationToken::new(),
        });

        Ok((
            session,
            SessionIo {
                reader,
                writer,
                input_rx,
            },
        ))
    }

    /// Returns the session id.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Returns the process id of the child, if known.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Returns the creation options. Immutable after creation.
    pub fn options(&self) -> &TerminalOptions {
        &self.options
    }

    /// Returns the current terminal size as (cols, rows).
    pub fn size(&self) -> (u16, u16) {
        *self.dims.lock().unwrap()
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    /// Returns whether the backing process is alive and usable.
    pub fn is_running(&self) -> bool {
        !self.teardown.load(Ordering::SeqCst) && matches!(self.state(), SessionState::Running)
    }

    /// Returns a UI-facing snapshot of the session.
    pub fn info(&self) -> TerminalInfo {
        let (cols, rows) = self.size();
        TerminalInfo {
            session_id: self.id.clone(),
            pid: self.pid,
            cols,
            rows,
            state: self.state(),
        }
    }

    /// Enqueues input bytes for delivery to the process, FIFO per session.
    ///
    /// Fails with `UnknownSession` once the session has exited or teardown
    /// has begun; a racing write is never silently dropped.
    pub fn write(&self, data: Vec<u8>) -> Result<(), SessionError> {
        if !self.is_running() {
            return Err(SessionError::UnknownSession(self.id.clone()));
        }
        self.input_tx
            .send(data)
            .map_err(|_| SessionError::UnknownSession(self.id.clone()))
    }

    /// Resizes the pseudo-terminal.
    ///
    /// The running process observes the change through its next size query
    /// or SIGWINCH. Dimensions are left untouched when validation fails.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), SessionError> {
        if cols == 0 || rows == 0 {
            return Err(SessionError::InvalidSize { cols, rows });
        }
        if !self.is_running() {
            return Err(SessionError::UnknownSession(self.id.clone()));
        }

        let master = self.master.lock().unwrap();
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::Io(std::io::Error::other(e.to_string())))?;
        drop(master);

        *self.dims.lock().unwrap() = (cols, rows);

        tracing::debug!(session_id = %self.id, cols, rows, "resized pty");
        Ok(())
    }

    /// Marks the session `Running` after a successful spawn.
    pub(crate) fn mark_running(&self) {
        let mut state = self.state.lock().unwrap();
        if matches!(*state, SessionState::Starting) {
            *state = SessionState::Running;
        }
    }

    /// Records the child's exit. Only the output pump calls this, so the
    /// `Exited` state is entered at most once.
    pub(crate) fn mark_exited(&self, exit_code: i32) {
        {
            let mut state = self.state.lock().unwrap();
            if matches!(*state, SessionState::Starting | SessionState::Running) {
                *state = SessionState::Exited(exit_code);
            }
        }
        self.cancel.cancel();
    }

    /// Marks the session fully closed once all resources are released.
    pub(crate) fn mark_closed(&self) {
        *self.state.lock().unwrap() = SessionState::Closed;
        self.cancel.cancel();
    }

    /// Flags the start of teardown. Returns true for the caller that
    /// actually initiated it.
    pub(crate) fn begin_teardown(&self) -> bool {
        !self.teardown.swap(true, Ordering::SeqCst)
    }

    /// Returns whether teardown has begun.
    pub(crate) fn is_tearing_down(&self) -> bool {
        self.teardown.load(Ordering::SeqCst)
    }

    /// Claims the right to emit the session's single exit notification.
    pub(crate) fn take_exit_notification(&self) -> bool {
        !self.exit_notified.swap(true, Ordering::SeqCst)
    }

    /// Sends a graceful termination signal to the child.
    #[cfg(unix)]
    pub(crate) fn signal_terminate(&self) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = self.pid {
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                tracing::debug!(session_id = %self.id, error = %e, "SIGTERM failed (process may have exited)");
            }
        } else {
            self.force_kill();
        }
    }

    /// Without Unix signals there is no graceful option.
    #[cfg(not(unix))]
    pub(crate) fn signal_terminate(&self) {
        self.force_kill();
    }

    /// Forcefully terminates the child.
    pub(crate) fn force_kill(&self) {
        let mut child = self.child.lock().unwrap();
        if let Err(e) = child.kill() {
            tracing::debug!(session_id = %self.id, error = %e, "kill failed (process may have exited)");
        }
    }

    /// Returns whether the child has terminated, without blocking.
    pub(crate) fn has_exited(&self) -> bool {
        let mut child = self.child.lock().unwrap();
        match child.try_wait() {
            Ok(Some(_)) => true,
            Ok(None) => false,
            Err(_) => true,
        }
    }

    /// Shared handle to the child process, used to reap its exit status.
    pub(crate) fn child_handle(&self) -> Arc<Mutex<Box<dyn Child + Send + Sync>>> {
        Arc::clone(&self.child)
    }

    /// Token cancelled once the session exits or closes.
    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// Returns the platform default shell.
pub fn default_shell() -> String {
    if cfg!(windows) {
        "cmd.exe".to_string()
    } else {
        std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
    }
}

/// Resolves the shell to spawn.
///
/// Bare names are resolved through PATH; explicit paths pass through; None
/// falls back to the platform default.
fn resolve_shell(shell: Option<String>) -> String {
    match shell {
        Some(s) if !s.contains('/') => which::which(&s)
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or(s),
        Some(s) => s,
        None => default_shell(),
    }
}
