//! Session registry: creation, lookup, and teardown.
//!
//! The registry is the sole owner of sessions. Callers hold only ids; every
//! operation is addressed by id and fails with `UnknownSession` once a
//! session is gone. A small tombstone set of fully closed ids keeps
//! `destroy` idempotent after teardown completes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use control::{SessionState, TerminalEvent, TerminalInfo, TerminalOptions};

use super::broker::IoBroker;
use super::pty::{Session, SessionError, SessionId};
use crate::config::SessionConfig;

/// How often teardown polls for the child's exit during the grace period.
const TEARDOWN_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Upper bound on waiting for a session's pumps to finish draining.
const CLOSE_WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Owns the id-to-session mapping and drives session lifecycles.
pub struct SessionRegistry {
    sessions: Arc<DashMap<SessionId, Arc<Session>>>,
    /// Ids of sessions that have been fully torn down.
    closed: Arc<DashMap<SessionId, ()>>,
    /// Session slots in use. Reserved before spawning so concurrent creates
    /// can never overshoot the limit, released on spawn failure or once the
    /// reaper removes the session.
    slots: Arc<AtomicUsize>,
    broker: IoBroker,
    config: SessionConfig,
}

impl SessionRegistry {
    /// Creates a registry emitting data and exit events on `event_tx`.
    ///
    /// Must be called within a tokio runtime; the registry spawns a reaper
    /// task that finalizes sessions once their output has drained.
    pub fn new(config: SessionConfig, event_tx: mpsc::Sender<TerminalEvent>) -> Self {
        let sessions: Arc<DashMap<SessionId, Arc<Session>>> = Arc::new(DashMap::new());
        let closed: Arc<DashMap<SessionId, ()>> = Arc::new(DashMap::new());
        let slots = Arc::new(AtomicUsize::new(0));

        let (retired_tx, retired_rx) = mpsc::unbounded_channel();
        let broker = IoBroker::new(event_tx, retired_tx, config.output_ring_chunks);

        Self::start_reaper(
            Arc::clone(&sessions),
            Arc::clone(&closed),
            Arc::clone(&slots),
            retired_rx,
        );

        Self {
            sessions,
            closed,
            slots,
            broker,
            config,
        }
    }

    /// Finalizes sessions reported by the broker: the exit event has been
    /// emitted and all buffered output flushed or discarded, so the entry
    /// can be removed and the id tombstoned.
    fn start_reaper(
        sessions: Arc<DashMap<SessionId, Arc<Session>>>,
        closed: Arc<DashMap<SessionId, ()>>,
        slots: Arc<AtomicUsize>,
        mut retired_rx: mpsc::UnboundedReceiver<SessionId>,
    ) {
        tokio::spawn(async move {
            while let Some(id) = retired_rx.recv().await {
                if let Some((_, session)) = sessions.remove(&id) {
                    session.mark_closed();
                    slots.fetch_sub(1, Ordering::SeqCst);
                }
                closed.insert(id.clone(), ());
                debug!(session_id = %id, "session closed and removed from registry");
            }
        });
    }

    /// Creates a new session and returns its id.
    ///
    /// The session is `Running` and registered before any of its events can
    /// be observed. Fails with `ResourceExhausted` when the session limit or
    /// PTY allocation is hit, `SpawnFailed` when the executable cannot be
    /// launched; in either case nothing is registered.
    pub async fn create(&self, options: TerminalOptions) -> Result<SessionId, SessionError> {
        // Reserve a slot up front so concurrent creates cannot overshoot.
        let max_sessions = self.config.max_sessions;
        if self
            .slots
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < max_sessions).then_some(n + 1)
            })
            .is_err()
        {
            return Err(SessionError::ResourceExhausted(format!(
                "session limit of {max_sessions} reached"
            )));
        }

        let resolved = self.resolve_options(options);
        let (cols, rows) = (resolved.cols, resolved.rows);

        // Spawning touches the OS; keep it off the async responsiveness path.
        let spawn_result = tokio::task::spawn_blocking(move || Session::spawn(resolved))
            .await
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))
            .and_then(|inner| inner);
        let (session, io) = match spawn_result {
            Ok(spawned) => spawned,
            Err(e) => {
                self.slots.fetch_sub(1, Ordering::SeqCst);
                return Err(e);
            }
        };

        session.mark_running();
        let id = session.id().clone();

        // Register before pumping so no event can precede the id's existence.
        self.sessions.insert(id.clone(), Arc::clone(&session));
        self.broker.start_pumps(session, io);

        info!(session_id = %id, cols, rows, "created session");
        Ok(id)
    }

    /// Fills unset options from the configuration and platform defaults.
    fn resolve_options(&self, mut options: TerminalOptions) -> TerminalOptions {
        if options.shell.is_none() {
            options.shell = self.config.default_shell.clone();
        }
        if options.cwd.is_none() {
            options.cwd = dirs::home_dir().map(|p| p.to_string_lossy().into_owned());
        }
        if options.cols == 0 {
            options.cols = self.config.default_cols;
        }
        if options.rows == 0 {
            options.rows = self.config.default_rows;
        }
        options
    }

    /// Looks up a live session.
    pub fn get(&self, id: &str) -> Result<Arc<Session>, SessionError> {
        self.sessions
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .filter(|session| !session.is_tearing_down())
            .ok_or_else(|| SessionError::UnknownSession(id.to_string()))
    }

    /// Enqueues input bytes for a session, FIFO per session.
    pub fn write(&self, id: &str, data: Vec<u8>) -> Result<(), SessionError> {
        self.get(id)?.write(data)
    }

    /// Resizes a session's terminal.
    pub fn resize(&self, id: &str, cols: u16, rows: u16) -> Result<(), SessionError> {
        self.get(id)?.resize(cols, rows)
    }

    /// Returns a snapshot of one session.
    pub fn info(&self, id: &str) -> Result<TerminalInfo, SessionError> {
        Ok(self.get(id)?.info())
    }

    /// Returns snapshots of all registered sessions.
    pub fn list(&self) -> Vec<TerminalInfo> {
        self.sessions
            .iter()
            .map(|entry| entry.value().info())
            .collect()
    }

    /// Returns whether the id maps to a registered session.
    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    /// Number of registered sessions.
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Tears down a session: graceful signal, bounded grace period, then a
    /// forceful kill. Exactly one exit event is emitted per session whether
    /// it dies here or on its own. Idempotent once the session has closed;
    /// ids that were never issued fail with `UnknownSession`.
    pub async fn destroy(&self, id: &str) -> Result<(), SessionError> {
        if self.closed.contains_key(id) {
            return Ok(());
        }

        let session = self
            .sessions
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| SessionError::UnknownSession(id.to_string()))?;

        if !session.begin_teardown() {
            // Another destroy is already in flight; just wait it out.
            self.wait_for_close(id).await;
            return Ok(());
        }

        debug!(session_id = %id, "requesting graceful termination");
        session.signal_terminate();

        let grace = Duration::from_millis(self.config.grace_period_ms);
        let start = Instant::now();
        let mut exited = false;
        while start.elapsed() < grace {
            if matches!(
                session.state(),
                SessionState::Exited(_) | SessionState::Closed
            ) {
                exited = true;
                break;
            }
            tokio::time::sleep(TEARDOWN_POLL_INTERVAL).await;
        }

        if !exited {
            warn!(
                session_id = %id,
                grace_ms = self.config.grace_period_ms,
                "grace period expired, killing process"
            );
            session.force_kill();
        }

        self.wait_for_close(id).await;
        Ok(())
    }

    /// Waits until the reaper has tombstoned the id, bounded by
    /// [`CLOSE_WAIT_TIMEOUT`].
    async fn wait_for_close(&self, id: &str) {
        let deadline = Instant::now() + CLOSE_WAIT_TIMEOUT;
        while !self.closed.contains_key(id) && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    fn sh_options() -> TerminalOptions {
        TerminalOptions {
            shell: Some("/bin/sh".to_string()),
            cwd: Some("/tmp".to_string()),
            ..Default::default()
        }
    }

    fn test_registry() -> (SessionRegistry, mpsc::Receiver<TerminalEvent>) {
        test_registry_with(SessionConfig::default())
    }

    fn test_registry_with(
        config: SessionConfig,
    ) -> (SessionRegistry, mpsc::Receiver<TerminalEvent>) {
        let (event_tx, event_rx) = mpsc::channel(1024);
        (SessionRegistry::new(config, event_tx), event_rx)
    }

    #[tokio::test]
    async fn test_create_registers_running_session() {
        let (registry, _rx) = test_registry();

        let id = registry.create(sh_options()).await.unwrap();
        assert!(registry.contains(&id));
        assert_eq!(registry.count(), 1);

        let info = registry.info(&id).unwrap();
        assert_eq!(info.state, SessionState::Running);
        assert_eq!((info.cols, info.rows), (80, 24));
        assert!(info.pid.is_some());

        registry.destroy(&id).await.unwrap();
    }

    #[tokio::test]
    async fn test_create_fills_zero_dimensions_from_defaults() {
        let (registry, _rx) = test_registry();

        let id = registry
            .create(TerminalOptions {
                shell: Some("/bin/sh".to_string()),
                cols: 0,
                rows: 0,
                ..Default::default()
            })
            .await
            .unwrap();

        let info = registry.info(&id).unwrap();
        assert_eq!((info.cols, info.rows), (80, 24));

        registry.destroy(&id).await.unwrap();
    }

    #[tokio::test]
    async fn test_create_nonexistent_shell_registers_nothing() {
        let (registry, _rx) = test_registry();

        let result = registry
            .create(TerminalOptions {
                shell: Some("/nonexistent/path/to/shell".to_string()),
                ..Default::default()
            })
            .await;

        assert!(matches!(result, Err(SessionError::SpawnFailed(_))));
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn test_session_limit_is_enforced() {
        let config = SessionConfig {
            max_sessions: 2,
            ..Default::default()
        };
        let (registry, _rx) = test_registry_with(config);

        let a = registry.create(sh_options()).await.unwrap();
        let b = registry.create(sh_options()).await.unwrap();

        let result = registry.create(sh_options()).await;
        assert!(matches!(result, Err(SessionError::ResourceExhausted(_))));

        registry.destroy(&a).await.unwrap();
        registry.destroy(&b).await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_creates_never_overshoot_limit() {
        let config = SessionConfig {
            max_sessions: 2,
            ..Default::default()
        };
        let (registry, _rx) = test_registry_with(config);
        let registry = Arc::new(registry);

        let mut handles = Vec::new();
        for _ in 0..6 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(
                async move { registry.create(sh_options()).await },
            ));
        }

        let mut ids = Vec::new();
        let mut exhausted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(id) => ids.push(id),
                Err(SessionError::ResourceExhausted(_)) => exhausted += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!(ids.len(), 2);
        assert_eq!(exhausted, 4);
        assert_eq!(registry.count(), 2);

        for id in &ids {
            registry.destroy(id).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_failed_spawn_releases_slot() {
        let config = SessionConfig {
            max_sessions: 1,
            ..Default::default()
        };
        let (registry, _rx) = test_registry_with(config);

        let result = registry
            .create(TerminalOptions {
                shell: Some("/nonexistent/path/to/shell".to_string()),
                ..Default::default()
            })
            .await;
        assert!(matches!(result, Err(SessionError::SpawnFailed(_))));

        // The failed spawn must not leak its reserved slot.
        let id = registry.create(sh_options()).await.unwrap();
        registry.destroy(&id).await.unwrap();
    }

    #[tokio::test]
    async fn test_operations_on_unknown_id() {
        let (registry, _rx) = test_registry();

        assert!(matches!(
            registry.write("nonexistent", b"x".to_vec()),
            Err(SessionError::UnknownSession(_))
        ));
        assert!(matches!(
            registry.resize("nonexistent", 80, 24),
            Err(SessionError::UnknownSession(_))
        ));
        assert!(matches!(
            registry.destroy("nonexistent").await,
            Err(SessionError::UnknownSession(_))
        ));
        assert!(registry.get("nonexistent").is_err());
    }

    #[tokio::test]
    async fn test_resize_roundtrip_and_validation() {
        let (registry, _rx) = test_registry();
        let id = registry.create(sh_options()).await.unwrap();

        registry.resize(&id, 120, 40).unwrap();
        let info = registry.info(&id).unwrap();
        assert_eq!((info.cols, info.rows), (120, 40));

        let result = registry.resize(&id, 0, 40);
        assert!(matches!(result, Err(SessionError::InvalidSize { .. })));
        let info = registry.info(&id).unwrap();
        assert_eq!((info.cols, info.rows), (120, 40));

        registry.destroy(&id).await.unwrap();
    }

    #[tokio::test]
    async fn test_destroy_emits_exactly_one_exit() {
        let (registry, mut rx) = test_registry();
        let id = registry.create(sh_options()).await.unwrap();

        registry.destroy(&id).await.unwrap();

        let mut exits = 0;
        loop {
            match timeout(Duration::from_millis(300), rx.recv()).await {
                Ok(Some(TerminalEvent::Exit { session_id, .. })) => {
                    assert_eq!(session_id, id);
                    exits += 1;
                }
                Ok(Some(TerminalEvent::Data { .. })) => {}
                _ => break,
            }
        }
        assert_eq!(exits, 1);
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent_after_close() {
        let (registry, _rx) = test_registry();
        let id = registry.create(sh_options()).await.unwrap();

        registry.destroy(&id).await.unwrap();
        assert!(!registry.contains(&id));

        // Fully closed id: destroy is a no-op, other operations are errors.
        registry.destroy(&id).await.unwrap();
        assert!(matches!(
            registry.write(&id, b"x".to_vec()),
            Err(SessionError::UnknownSession(_))
        ));
        assert!(matches!(
            registry.resize(&id, 100, 30),
            Err(SessionError::UnknownSession(_))
        ));
    }

    #[tokio::test]
    async fn test_natural_exit_emits_exit_and_retires() {
        let (registry, mut rx) = test_registry();
        let id = registry.create(sh_options()).await.unwrap();

        registry.write(&id, b"exit 42\n".to_vec()).unwrap();

        let mut exit_code = None;
        for _ in 0..100 {
            match timeout(Duration::from_millis(100), rx.recv()).await {
                Ok(Some(TerminalEvent::Exit {
                    session_id,
                    exit_code: code,
                })) => {
                    assert_eq!(session_id, id);
                    exit_code = Some(code);
                    break;
                }
                Ok(Some(TerminalEvent::Data { .. })) => {}
                Ok(None) => break,
                Err(_) => {}
            }
        }
        assert_eq!(exit_code, Some(42));

        // The registry drops the entry once the pumps finish.
        for _ in 0..100 {
            if !registry.contains(&id) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!registry.contains(&id));
        registry.destroy(&id).await.unwrap();
    }

    #[tokio::test]
    async fn test_write_roundtrip_produces_output() {
        let (registry, mut rx) = test_registry();
        let id = registry.create(sh_options()).await.unwrap();

        registry
            .write(&id, b"echo registry_marker\n".to_vec())
            .unwrap();

        let mut found = false;
        for _ in 0..50 {
            match timeout(Duration::from_millis(100), rx.recv()).await {
                Ok(Some(TerminalEvent::Data { session_id, data })) => {
                    assert_eq!(session_id, id);
                    if String::from_utf8_lossy(&data).contains("registry_marker") {
                        found = true;
                        break;
                    }
                }
                Ok(Some(TerminalEvent::Exit { .. })) => break,
                _ => {}
            }
        }
        assert!(found, "did not receive expected output");

        registry.destroy(&id).await.unwrap();
    }

    #[tokio::test]
    async fn test_list_reports_all_sessions() {
        let (registry, _rx) = test_registry();

        let a = registry.create(sh_options()).await.unwrap();
        let b = registry.create(sh_options()).await.unwrap();

        let infos = registry.list();
        assert_eq!(infos.len(), 2);
        let ids: Vec<_> = infos.iter().map(|i| i.session_id.clone()).collect();
        assert!(ids.contains(&a));
        assert!(ids.contains(&b));

        registry.destroy(&a).await.unwrap();
        registry.destroy(&b).await.unwrap();
    }
}
