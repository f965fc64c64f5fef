//! Lock-free session counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct SessionDiagnostics {
    /// Frames stored with real audio.
    pub frames_ingested: AtomicU64,
    /// Frames that arrived after their slot was played and were stored as silence.
    pub frames_silenced: AtomicU64,
    /// Frames that arrived after their slot was reused by a later lap.
    pub frames_expired: AtomicU64,
    /// Times ingestion waited because it was `max_lead_frames` ahead.
    pub lead_waits: AtomicU64,
    /// Scheduler ticks executed.
    pub ticks: AtomicU64,
    /// Ticks that found no real audio and played silence.
    pub playback_underruns: AtomicU64,
    /// Scheduled instants skipped because a tick ran late.
    pub missed_ticks: AtomicU64,
    /// Frames queued to the sink worker.
    pub sink_dispatched: AtomicU64,
    /// Ticks that queued a frame while the sink backlog was above its limit.
    pub sink_backlogged: AtomicU64,
    /// Frames lost because the sink worker had already exited.
    pub sink_dropped: AtomicU64,
    /// Sink write failures.
    pub sink_errors: AtomicU64,
    /// Bytes returned by the echo-reference reader.
    pub reference_bytes: AtomicU64,
    /// Times the reader fell out of the buffer and was resynchronised.
    pub reference_overflows: AtomicU64,
}

impl SessionDiagnostics {
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            frames_ingested: self.frames_ingested.load(Ordering::Relaxed),
            frames_silenced: self.frames_silenced.load(Ordering::Relaxed),
            frames_expired: self.frames_expired.load(Ordering::Relaxed),
            lead_waits: self.lead_waits.load(Ordering::Relaxed),
            ticks: self.ticks.load(Ordering::Relaxed),
            playback_underruns: self.playback_underruns.load(Ordering::Relaxed),
            missed_ticks: self.missed_ticks.load(Ordering::Relaxed),
            sink_dispatched: self.sink_dispatched.load(Ordering::Relaxed),
            sink_backlogged: self.sink_backlogged.load(Ordering::Relaxed),
            sink_dropped: self.sink_dropped.load(Ordering::Relaxed),
            sink_errors: self.sink_errors.load(Ordering::Relaxed),
            reference_bytes: self.reference_bytes.load(Ordering::Relaxed),
            reference_overflows: self.reference_overflows.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub frames_ingested: u64,
    pub frames_silenced: u64,
    pub frames_expired: u64,
    pub lead_waits: u64,
    pub ticks: u64,
    pub playback_underruns: u64,
    pub missed_ticks: u64,
    pub sink_dispatched: u64,
    pub sink_backlogged: u64,
    pub sink_dropped: u64,
    pub sink_errors: u64,
    pub reference_bytes: u64,
    pub reference_overflows: u64,
}
