//! Fixed-rate playback scheduler.
//!
//! Tick `n` fires at `start + n·period`. Deadlines are absolute, so handler
//! time and wake-up jitter never accumulate into drift. A tick that finishes
//! after the next deadline has passed does not trigger a catch-up burst: the
//! missed instants are counted and the next tick fires at the first instant
//! still in the future.
//!
//! The tick itself never blocks. The frame is copied out of the buffer and
//! queued for the sink worker on an unbounded queue; device latency only
//! ever delays that worker. Every played frame reaches the sink, so the echo
//! reference never exposes audio the device did not get.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::{
    audio::{silent_frame, BLOCK_SIZE},
    buffering::{PlayOutcome, PlayoutBuffer},
    engine::{diagnostics::SessionDiagnostics, dispatch::SinkQueue},
    shutdown::ShutdownSignal,
};

const BLOCK: u64 = BLOCK_SIZE as u64;

/// Everything the timer thread needs.
pub struct SchedulerContext {
    pub buffer: Arc<PlayoutBuffer>,
    pub diagnostics: Arc<SessionDiagnostics>,
    pub dispatch: SinkQueue,
    pub shutdown: ShutdownSignal,
    /// Instant of tick 0.
    pub start: Instant,
    pub period: Duration,
}

/// Play the frame at the playback cursor and advance it by one frame.
pub fn tick(
    buffer: &PlayoutBuffer,
    dispatch: &SinkQueue,
    diagnostics: &SessionDiagnostics,
) -> PlayOutcome {
    let cursors = buffer.cursors();
    let position = cursors.playback();

    let mut frame = silent_frame();
    let outcome = buffer.storage().play(position, &mut frame);
    if outcome == PlayOutcome::Starved {
        SessionDiagnostics::bump(&diagnostics.playback_underruns);
    }

    dispatch.submit(frame, diagnostics);

    cursors.advance_playback(BLOCK);
    SessionDiagnostics::bump(&diagnostics.ticks);
    outcome
}

/// Instant of tick `index`.
pub fn deadline_of(start: Instant, period: Duration, index: u64) -> Instant {
    let nanos = (period.as_nanos() as u64).saturating_mul(index);
    start + Duration::from_nanos(nanos)
}

/// Choose the next tick after finishing tick `current` at `elapsed` past
/// `start`. Returns `(next_index, skipped_instants)`.
pub fn next_tick_index(current: u64, elapsed: Duration, period: Duration) -> (u64, u64) {
    let period_nanos = period.as_nanos().max(1);
    let due = (elapsed.as_nanos() / period_nanos) as u64;
    if due > current {
        (due + 1, due - current)
    } else {
        (current + 1, 0)
    }
}

/// Run the timer loop until shutdown fires.
pub fn run(ctx: SchedulerContext) {
    info!(period_ms = ctx.period.as_millis() as u64, "playback scheduler started");

    let mut index = 0u64;
    let mut starved_run = 0u64;

    loop {
        if ctx.shutdown.wait_until(deadline_of(ctx.start, ctx.period, index)) {
            break;
        }

        match tick(&ctx.buffer, &ctx.dispatch, &ctx.diagnostics) {
            PlayOutcome::Starved => starved_run += 1,
            PlayOutcome::Filled => {
                if starved_run > 0 {
                    warn!(frames = starved_run, "playback underrun: played silence until audio arrived");
                    starved_run = 0;
                }
            }
        }

        let elapsed = Instant::now().saturating_duration_since(ctx.start);
        let (next, skipped) = next_tick_index(index, elapsed, ctx.period);
        if skipped > 0 {
            ctx.diagnostics
                .missed_ticks
                .fetch_add(skipped, std::sync::atomic::Ordering::Relaxed);
            warn!(
                tick = index,
                skipped,
                "scheduler overran its period, resuming at the next scheduled instant"
            );
        }
        index = next;
    }

    info!(ticks = index, "playback scheduler stopped");
}
