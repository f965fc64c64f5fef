//! Sink worker: performs the actual device writes off the timer thread.

use std::sync::Arc;

use crossbeam_channel::{select, unbounded, Receiver, Sender};
use tracing::{debug, info, warn};

use crate::{
    audio::Frame, engine::diagnostics::SessionDiagnostics, shutdown::ShutdownSignal,
    sink::PlaybackSink,
};

/// Log the first sink error of a streak, then every this many.
const SINK_ERROR_LOG_EVERY: u64 = 100;

/// Scheduler end of the queue feeding the sink worker.
///
/// The queue is unbounded: a frame handed to [`submit`](Self::submit) is
/// always delivered, so the echo reference and the device never disagree.
/// A slow sink only grows the backlog, which is reported once it passes
/// `backlog_limit`.
#[derive(Debug, Clone)]
pub struct SinkQueue {
    tx: Sender<Frame>,
    backlog_limit: usize,
}

/// Create the queue between the scheduler and the sink worker.
pub fn sink_queue(backlog_limit: usize) -> (SinkQueue, Receiver<Frame>) {
    let (tx, rx) = unbounded();
    let queue = SinkQueue {
        tx,
        backlog_limit: backlog_limit.max(1),
    };
    (queue, rx)
}

impl SinkQueue {
    /// Queue `frame` for the sink worker. Never blocks.
    pub fn submit(&self, frame: Frame, diagnostics: &SessionDiagnostics) {
        if self.tx.send(frame).is_err() {
            SessionDiagnostics::bump(&diagnostics.sink_dropped);
            debug!("sink worker gone, frame not delivered to device");
            return;
        }
        SessionDiagnostics::bump(&diagnostics.sink_dispatched);

        let backlog = self.tx.len();
        if backlog > self.backlog_limit {
            SessionDiagnostics::bump(&diagnostics.sink_backlogged);
            if backlog == self.backlog_limit + 1 {
                warn!(
                    backlog,
                    limit = self.backlog_limit,
                    "sink is falling behind playback"
                );
            }
        }
    }

    /// Frames waiting for the sink worker.
    pub fn backlog(&self) -> usize {
        self.tx.len()
    }
}

/// Drain `frames` into `sink` until the scheduler hangs up or shutdown fires.
/// Frames still queued at shutdown are discarded.
pub fn run<K: PlaybackSink>(
    mut sink: K,
    frames: Receiver<Frame>,
    shutdown: ShutdownSignal,
    diagnostics: Arc<SessionDiagnostics>,
) {
    info!("sink worker started");
    let mut error_streak = 0u64;

    loop {
        select! {
            recv(frames) -> msg => match msg {
                Ok(frame) => match sink.write(&frame) {
                    Ok(()) => {
                        if error_streak > 0 {
                            debug!(failed = error_streak, "sink recovered");
                            error_streak = 0;
                        }
                    }
                    Err(e) => {
                        SessionDiagnostics::bump(&diagnostics.sink_errors);
                        if error_streak % SINK_ERROR_LOG_EVERY == 0 {
                            warn!(streak = error_streak + 1, "sink write failed: {e}");
                        }
                        error_streak += 1;
                    }
                },
                Err(_) => break,
            },
            recv(shutdown.receiver()) -> _ => break,
        }
    }

    if let Err(e) = sink.flush() {
        warn!("sink flush failed: {e}");
    }
    info!("sink worker stopped");
}
