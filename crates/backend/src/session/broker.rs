//! I/O pumps between PTY sessions and the event stream.
//!
//! For every running session the broker drives three tasks: a reader that
//! pulls output bytes off the PTY master, a writer that delivers queued input
//! to it, and a forwarder that turns buffered output into `Data` events and,
//! at end of life, the session's single `Exit` event.
//!
//! Output is buffered per session in a bounded ring; when the consumer falls
//! behind, the oldest chunk is dropped and the backpressure is logged. A slow
//! consumer stalls only its own session's forwarder, never another session's
//! reader.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, warn};

use control::{SessionState, TerminalEvent};

use super::pty::{Session, SessionId, SessionIo};

/// Buffer size for reading from the PTY.
const READ_BUFFER_SIZE: usize = 4096;

/// Consecutive PTY I/O failures tolerated before the session is force-closed.
const MAX_CONSECUTIVE_IO_FAILURES: u32 = 3;

/// Bounded buffer of output chunks with oldest-drop overflow.
///
/// The reader pushes, the forwarder pops. Once closed, pushes are ignored
/// and the remaining chunks drain in order.
pub struct OutputRing {
    chunks: Mutex<VecDeque<Vec<u8>>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
    dropped_chunks: AtomicU64,
    backpressured: AtomicBool,
}

impl OutputRing {
    /// Creates a ring holding at most `capacity` chunks.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be positive");
        Self {
            chunks: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped_chunks: AtomicU64::new(0),
            backpressured: AtomicBool::new(false),
        }
    }

    /// Appends a chunk, evicting the oldest one when full.
    pub fn push(&self, chunk: Vec<u8>) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        {
            let mut chunks = self.chunks.lock().unwrap();
            if chunks.len() == self.capacity {
                chunks.pop_front();
                let dropped = self.dropped_chunks.fetch_add(1, Ordering::Relaxed) + 1;
                if !self.backpressured.swap(true, Ordering::Relaxed) {
                    warn!(dropped, "output consumer backpressured, dropping oldest chunk");
                }
            }
            chunks.push_back(chunk);
        }
        self.notify.notify_one();
    }

    /// Removes and returns the oldest chunk, if any.
    pub fn pop(&self) -> Option<Vec<u8>> {
        let mut chunks = self.chunks.lock().unwrap();
        let chunk = chunks.pop_front();
        if self.backpressured.load(Ordering::Relaxed) && chunks.len() * 2 <= self.capacity {
            self.backpressured.store(false, Ordering::Relaxed);
            debug!("output consumer recovered from backpressure");
        }
        chunk
    }

    /// Waits for the next chunk. Returns None once the ring is closed and
    /// fully drained.
    pub async fn next_chunk(&self) -> Option<Vec<u8>> {
        loop {
            let notified = self.notify.notified();
            if let Some(chunk) = self.pop() {
                return Some(chunk);
            }
            if self.closed.load(Ordering::SeqCst) {
                return self.pop();
            }
            notified.await;
        }
    }

    /// Closes the ring; pending chunks remain poppable.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Returns whether the ring has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of chunks currently buffered.
    pub fn len(&self) -> usize {
        self.chunks.lock().unwrap().len()
    }

    /// Returns whether the ring is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total chunks dropped to overflow so far.
    pub fn dropped_chunks(&self) -> u64 {
        self.dropped_chunks.load(Ordering::Relaxed)
    }

    /// Returns whether the consumer is currently behind.
    pub fn is_backpressured(&self) -> bool {
        self.backpressured.load(Ordering::Relaxed)
    }
}

/// Pumps bytes between sessions and the shared event stream.
pub(crate) struct IoBroker {
    event_tx: mpsc::Sender<TerminalEvent>,
    retired_tx: mpsc::UnboundedSender<SessionId>,
    ring_capacity: usize,
}

impl IoBroker {
    /// Creates a broker emitting events on `event_tx` and reporting fully
    /// drained sessions on `retired_tx`.
    pub(crate) fn new(
        event_tx: mpsc::Sender<TerminalEvent>,
        retired_tx: mpsc::UnboundedSender<SessionId>,
        ring_capacity: usize,
    ) -> Self {
        Self {
            event_tx,
            retired_tx,
            ring_capacity,
        }
    }

    /// Wires the reader, writer, and forwarder tasks for a fresh session.
    pub(crate) fn start_pumps(&self, session: Arc<Session>, io: SessionIo) {
        let ring = Arc::new(OutputRing::new(self.ring_capacity));
        spawn_reader(Arc::clone(&session), io.reader, Arc::clone(&ring));
        spawn_writer(Arc::clone(&session), io.writer, io.input_rx);
        spawn_forwarder(
            session,
            ring,
            self.event_tx.clone(),
            self.retired_tx.clone(),
        );
    }
}

/// Reads PTY output into the ring until end of stream, then reaps the child
/// and records its exit code.
fn spawn_reader(session: Arc<Session>, reader: Box<dyn Read + Send>, ring: Arc<OutputRing>) {
    tokio::spawn(async move {
        let reader = Arc::new(Mutex::new(reader));
        let mut consecutive_failures = 0u32;

        loop {
            let reader_clone = Arc::clone(&reader);
            let result = tokio::task::spawn_blocking(move || {
                let mut buffer = vec![0u8; READ_BUFFER_SIZE];
                let mut reader = reader_clone.lock().unwrap();
                match reader.read(&mut buffer) {
                    Ok(0) => Ok(None),
                    Ok(n) => {
                        buffer.truncate(n);
                        Ok(Some(buffer))
                    }
                    Err(e) => Err(e),
                }
            })
            .await;

            match result {
                Ok(Ok(Some(chunk))) => {
                    consecutive_failures = 0;
                    ring.push(chunk);
                }
                Ok(Ok(None)) => {
                    debug!(session_id = %session.id(), "pty reached end of stream");
                    break;
                }
                Ok(Err(e)) => {
                    // Linux reports EIO on the master once the child is gone;
                    // that is an end of stream, not a fault.
                    if session.has_exited() {
                        debug!(session_id = %session.id(), "pty read failed after child exit");
                        break;
                    }
                    consecutive_failures += 1;
                    warn!(
                        session_id = %session.id(),
                        error = %e,
                        failures = consecutive_failures,
                        "pty read error"
                    );
                    if consecutive_failures >= MAX_CONSECUTIVE_IO_FAILURES {
                        error!(
                            session_id = %session.id(),
                            "too many consecutive pty read failures, force-closing session"
                        );
                        session.force_kill();
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                Err(e) => {
                    error!(session_id = %session.id(), error = %e, "pty read task panicked");
                    break;
                }
            }
        }

        // Reap the child so the exit event carries its real code.
        let child = session.child_handle();
        let exit_code = tokio::task::spawn_blocking(move || {
            let mut child = child.lock().unwrap();
            child.wait().map(|status| status.exit_code() as i32)
        })
        .await
        .ok()
        .and_then(|r| r.ok())
        .unwrap_or(-1);

        session.mark_exited(exit_code);
        ring.close();
    });
}

/// Delivers queued input to the PTY in submission order.
fn spawn_writer(
    session: Arc<Session>,
    writer: Box<dyn Write + Send>,
    mut input_rx: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    tokio::spawn(async move {
        let writer = Arc::new(Mutex::new(writer));
        let cancel = session.cancel_token();
        let mut consecutive_failures = 0u32;

        loop {
            let data = tokio::select! {
                _ = cancel.cancelled() => break,
                data = input_rx.recv() => match data {
                    Some(data) => data,
                    None => break,
                },
            };

            let writer_clone = Arc::clone(&writer);
            let result = tokio::task::spawn_blocking(move || {
                let mut writer = writer_clone.lock().unwrap();
                writer.write_all(&data)?;
                writer.flush()
            })
            .await;

            match result {
                Ok(Ok(())) => consecutive_failures = 0,
                Ok(Err(e)) => {
                    consecutive_failures += 1;
                    warn!(
                        session_id = %session.id(),
                        error = %e,
                        failures = consecutive_failures,
                        "pty write error"
                    );
                    if consecutive_failures >= MAX_CONSECUTIVE_IO_FAILURES {
                        error!(
                            session_id = %session.id(),
                            "too many consecutive pty write failures, force-closing session"
                        );
                        session.force_kill();
                        break;
                    }
                }
                Err(e) => {
                    error!(session_id = %session.id(), error = %e, "pty write task panicked");
                    break;
                }
            }
        }
    });
}

/// Drains the ring into `Data` events, emits the single `Exit` event once
/// the ring closes, then reports the session as retired.
fn spawn_forwarder(
    session: Arc<Session>,
    ring: Arc<OutputRing>,
    event_tx: mpsc::Sender<TerminalEvent>,
    retired_tx: mpsc::UnboundedSender<SessionId>,
) {
    tokio::spawn(async move {
        let mut consumer_gone = false;

        while let Some(chunk) = ring.next_chunk().await {
            if consumer_gone {
                continue;
            }
            let event = TerminalEvent::Data {
                session_id: session.id().clone(),
                data: chunk,
            };
            if event_tx.send(event).await.is_err() {
                debug!(session_id = %session.id(), "event consumer gone, discarding output");
                consumer_gone = true;
            }
        }

        let exit_code = match session.state() {
            SessionState::Exited(code) => code,
            _ => -1,
        };
        if session.take_exit_notification() {
            info!(session_id = %session.id(), exit_code, "session exited");
            let _ = event_tx
                .send(TerminalEvent::Exit {
                    session_id: session.id().clone(),
                    exit_code,
                })
                .await;
        }

        let _ = retired_tx.send(session.id().clone());
    });
}
