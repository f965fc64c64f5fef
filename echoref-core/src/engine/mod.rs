//! `PlayoutSession`: top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! PlayoutSession::open()
//!     ├─► sink worker      → make_sink() on its own thread, open result sent back
//!     ├─► ingestion worker → source → buffer, status = Playing
//!     └─► scheduler        → first tick at now + start_delay
//!             ├─► source ends   → status = SourceEnded (playback keeps ticking)
//!             ├─► source fails  → status = SourceFailed (playback keeps ticking)
//!             └─► close() / drop → shutdown fired, workers joined, status = Closed
//! ```
//!
//! `close()` is idempotent; calling it again is a no-op that returns `Ok`.
//!
//! ## Threading
//!
//! Device handles such as `cpal::Stream` are `!Send` on several platforms, so
//! the sink is created *inside* its worker thread by the factory passed to
//! `open()`. A sync oneshot channel propagates any open error back to the
//! caller before the other workers start.

pub mod diagnostics;
pub mod dispatch;
pub mod ingest;
pub mod reference;
pub mod scheduler;

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    mpsc, Arc,
};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{info, info_span, warn, Span};

use crate::{
    audio::{Frame, FRAME_DURATION},
    buffering::{CursorSnapshot, PlayoutBuffer},
    config::SessionConfig,
    error::{EchoRefError, Result},
    ipc::events::{SessionStatus, SessionStatusEvent},
    shutdown::{shutdown_pair, ShutdownTrigger},
    sink::PlaybackSink,
    source::AudioSource,
};

pub use diagnostics::{DiagnosticsSnapshot, SessionDiagnostics};
pub use ingest::IngestExit;
pub use reference::EchoReferenceReader;

/// Broadcast channel capacity for status events.
const BROADCAST_CAP: usize = 64;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Canonical status plus its broadcast channel.
struct StatusReporter {
    status: Mutex<SessionStatus>,
    tx: broadcast::Sender<SessionStatusEvent>,
}

impl StatusReporter {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAP);
        Self {
            status: Mutex::new(SessionStatus::Playing),
            tx,
        }
    }

    fn get(&self) -> SessionStatus {
        *self.status.lock()
    }

    fn set(&self, status: SessionStatus, detail: Option<String>) {
        *self.status.lock() = status;
        let _ = self.tx.send(SessionStatusEvent { status, detail });
    }

    /// Move out of `Playing`. Returns `false` if the session had already
    /// left it.
    fn leave_playing(&self, status: SessionStatus, detail: Option<String>) -> bool {
        let mut current = self.status.lock();
        if current.ingestion_stopped() {
            return false;
        }
        *current = status;
        drop(current);
        let _ = self.tx.send(SessionStatusEvent { status, detail });
        true
    }
}

struct Workers {
    scheduler: JoinHandle<()>,
    sink: JoinHandle<()>,
    ingest: JoinHandle<()>,
    /// Receives one message when the ingestion thread exits.
    ingest_done: Receiver<()>,
}

/// A running playout session.
///
/// Owns the buffer, the three workers and the echo-reference reader. Dropping
/// the session closes it.
pub struct PlayoutSession {
    id: u64,
    config: SessionConfig,
    buffer: Arc<PlayoutBuffer>,
    diagnostics: Arc<SessionDiagnostics>,
    reference: EchoReferenceReader,
    reporter: Arc<StatusReporter>,
    source_error: Arc<Mutex<Option<EchoRefError>>>,
    trigger: ShutdownTrigger,
    closed: Arc<AtomicBool>,
    workers: Option<Workers>,
    span: Span,
}

impl PlayoutSession {
    /// Start a session that plays `source` into the sink built by
    /// `make_sink`.
    ///
    /// Blocks until the sink is confirmed open (or fails), then returns with
    /// all workers running.
    ///
    /// # Errors
    /// - `EchoRefError::InvalidConfig` if the normalized config is unusable.
    /// - Whatever `make_sink` returns, e.g. `EchoRefError::NoDefaultOutputDevice`.
    /// - `EchoRefError::Io` if a worker thread cannot be spawned.
    pub fn open<S, F, K>(mut config: SessionConfig, source: S, make_sink: F) -> Result<Self>
    where
        S: AudioSource,
        F: FnOnce() -> Result<K> + Send + 'static,
        K: PlaybackSink,
    {
        config.normalize();
        config.validate()?;

        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        let span = info_span!("playout_session", id);
        let _enter = span.enter();

        let buffer = Arc::new(PlayoutBuffer::new(config.capacity_frames)?);
        let diagnostics = Arc::new(SessionDiagnostics::default());
        let reporter = Arc::new(StatusReporter::new());
        let source_error = Arc::new(Mutex::new(None));
        let closed = Arc::new(AtomicBool::new(false));
        let (trigger, shutdown) = shutdown_pair();
        let (dispatch_tx, dispatch_rx) = dispatch::sink_queue(config.sink_queue_frames);

        // ── Sink worker (the sink is built on this thread) ────────────────────
        let (open_tx, open_rx) = mpsc::channel::<Result<()>>();
        let sink = {
            let span = span.clone();
            let shutdown = shutdown.clone();
            let diagnostics = Arc::clone(&diagnostics);
            thread::Builder::new()
                .name("echoref-sink".into())
                .spawn(move || {
                    let _enter = span.enter();
                    let sink = match make_sink() {
                        Ok(sink) => {
                            let _ = open_tx.send(Ok(()));
                            sink
                        }
                        Err(e) => {
                            let _ = open_tx.send(Err(e));
                            return;
                        }
                    };
                    dispatch::run(sink, dispatch_rx, shutdown, diagnostics);
                })?
        };

        match open_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = sink.join();
                return Err(e);
            }
            Err(_) => {
                let _ = sink.join();
                return Err(EchoRefError::SinkOpen(
                    "sink worker died before opening the sink".into(),
                ));
            }
        }

        // ── Ingestion worker ──────────────────────────────────────────────────
        let (done_tx, ingest_done) = bounded::<()>(1);
        let ingest = {
            let span = span.clone();
            let ctx = ingest::IngestContext {
                source,
                buffer: Arc::clone(&buffer),
                diagnostics: Arc::clone(&diagnostics),
                shutdown: shutdown.clone(),
                max_lead_frames: config.max_lead_frames,
            };
            let reporter = Arc::clone(&reporter);
            let source_error = Arc::clone(&source_error);
            let shutdown = shutdown.clone();
            thread::Builder::new()
                .name("echoref-ingest".into())
                .spawn(move || {
                    let _enter = span.enter();
                    let exit = ingest::run(ctx);
                    if !shutdown.is_triggered() {
                        match exit {
                            IngestExit::EndOfStream => {
                                reporter.leave_playing(SessionStatus::SourceEnded, None);
                            }
                            IngestExit::Failed(e) => {
                                let detail = e.to_string();
                                *source_error.lock() = Some(e);
                                reporter.leave_playing(SessionStatus::SourceFailed, Some(detail));
                            }
                            IngestExit::Interrupted => {}
                        }
                    }
                    let _ = done_tx.send(());
                })?
        };

        // ── Scheduler ─────────────────────────────────────────────────────────
        let scheduler = {
            let span = span.clone();
            let ctx = scheduler::SchedulerContext {
                buffer: Arc::clone(&buffer),
                diagnostics: Arc::clone(&diagnostics),
                dispatch: dispatch_tx,
                shutdown,
                start: Instant::now() + config.start_delay(),
                period: FRAME_DURATION,
            };
            thread::Builder::new()
                .name("echoref-scheduler".into())
                .spawn(move || {
                    let _enter = span.enter();
                    scheduler::run(ctx);
                })?
        };

        info!(
            capacity_frames = config.capacity_frames,
            max_lead_frames = config.max_lead_frames,
            start_delay_ms = config.start_delay_ms,
            "playout session started"
        );
        drop(_enter);

        let reference = EchoReferenceReader::new(
            Arc::clone(&buffer),
            Arc::clone(&diagnostics),
            Arc::clone(&closed),
        );

        Ok(Self {
            id,
            config,
            buffer,
            diagnostics,
            reference,
            reporter,
            source_error,
            trigger,
            closed,
            workers: Some(Workers {
                scheduler,
                sink,
                ingest,
                ingest_done,
            }),
            span,
        })
    }

    /// Stop every worker and release the source and sink.
    ///
    /// A source blocked in an uninterruptible read gets `close_timeout` to
    /// return; after that its thread is detached. A detached source (for
    /// example a `ReaderSource` over a socket) outlives the session: it stays
    /// alive on its thread after `close` returns and is dropped only once its
    /// pending read returns. Nothing it reads after that point is stored.
    ///
    /// # Errors
    /// `EchoRefError::Other` if a worker thread panicked. The session is
    /// closed regardless.
    pub fn close(&mut self) -> Result<()> {
        let Some(workers) = self.workers.take() else {
            return Ok(());
        };
        let _enter = self.span.enter();
        info!("closing playout session");

        self.closed.store(true, Ordering::Release);
        self.trigger.trigger();

        let mut panicked = Vec::new();
        if workers.scheduler.join().is_err() {
            panicked.push("scheduler");
        }
        if workers.sink.join().is_err() {
            panicked.push("sink");
        }
        match workers.ingest_done.recv_timeout(self.config.close_timeout()) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if workers.ingest.join().is_err() {
                    panicked.push("ingestion");
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    timeout_ms = self.config.close_timeout_ms,
                    "audio source did not return in time, detaching ingestion thread"
                );
            }
        }

        self.reporter.set(SessionStatus::Closed, None);
        let snap = self.diagnostics.snapshot();
        info!(
            ticks = snap.ticks,
            underruns = snap.playback_underruns,
            frames_silenced = snap.frames_silenced,
            "playout session closed"
        );

        if panicked.is_empty() {
            Ok(())
        } else {
            Err(EchoRefError::Other(anyhow::anyhow!(
                "session worker panicked: {}",
                panicked.join(", ")
            )))
        }
    }

    pub fn is_closed(&self) -> bool {
        self.workers.is_none()
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Read already-played bytes for echo cancellation. See
    /// [`EchoReferenceReader::read`].
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.reference.read(buf)
    }

    pub fn read_frame(&mut self, frame: &mut Frame) -> Result<bool> {
        self.reference.read_frame(frame)
    }

    pub fn read_frame_timeout(&mut self, frame: &mut Frame, timeout: Duration) -> Result<bool> {
        self.reference.read_frame_timeout(frame, timeout)
    }

    /// The echo-reference reader, e.g. to hand to a [`crate::aec::DuplexLoop`].
    pub fn reference_mut(&mut self) -> &mut EchoReferenceReader {
        &mut self.reference
    }

    /// Current session status (snapshot).
    pub fn status(&self) -> SessionStatus {
        self.reporter.get()
    }

    /// Subscribe to status change events.
    pub fn subscribe_status(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.reporter.tx.subscribe()
    }

    /// The source error that stopped ingestion, if any. Returned once.
    pub fn take_source_error(&self) -> Option<EchoRefError> {
        self.source_error.lock().take()
    }

    /// Snapshot of session counters.
    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    /// Live counters, shareable with monitoring tasks.
    pub fn diagnostics_handle(&self) -> Arc<SessionDiagnostics> {
        Arc::clone(&self.diagnostics)
    }

    pub fn cursors(&self) -> CursorSnapshot {
        self.buffer.cursors().snapshot()
    }

    /// The normalized configuration the session runs with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}

impl Drop for PlayoutSession {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("playout session close on drop failed: {e}");
        }
    }
}

impl std::fmt::Debug for PlayoutSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayoutSession")
            .field("id", &self.id)
            .field("status", &self.status())
            .field("cursors", &self.cursors())
            .finish_non_exhaustive()
    }
}
