//! Ingestion worker: source → playout buffer.
//!
//! ## Per iteration
//!
//! ```text
//! 1. Block on AudioSource::read_frame (interruptible by shutdown)
//! 2. Wait while the write cursor is max_lead_frames ahead of playback
//! 3. Under the slot lock:
//!      slot not played yet  → store the real frame
//!      slot already played  → store silence
//!      slot reused (lapped) → store nothing
//! 4. Advance the write cursor by one frame, whatever was stored
//! ```
//!
//! A stalled source is never compensated by dropping later data or by
//! ingesting faster: every frame read produces exactly one cursor step.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::{
    audio::{silent_frame, Frame, BLOCK_SIZE, FRAME_DURATION},
    buffering::{FillOutcome, PlayoutBuffer},
    engine::diagnostics::SessionDiagnostics,
    error::EchoRefError,
    shutdown::ShutdownSignal,
    source::{AudioSource, SourceRead},
};

const BLOCK: u64 = BLOCK_SIZE as u64;

/// Everything the ingestion worker needs, moved into its thread.
pub struct IngestContext<S> {
    pub source: S,
    pub buffer: Arc<PlayoutBuffer>,
    pub diagnostics: Arc<SessionDiagnostics>,
    pub shutdown: ShutdownSignal,
    pub max_lead_frames: usize,
}

/// Why the worker stopped.
#[derive(Debug)]
pub enum IngestExit {
    EndOfStream,
    Interrupted,
    Failed(EchoRefError),
}

/// Store one frame at the write cursor and advance it.
pub fn ingest_frame(
    buffer: &PlayoutBuffer,
    frame: &Frame,
    diagnostics: &SessionDiagnostics,
) -> FillOutcome {
    let cursors = buffer.cursors();
    let position = cursors.write();
    let outcome = buffer
        .storage()
        .fill(position, frame, || cursors.playback());
    match outcome {
        FillOutcome::Real => SessionDiagnostics::bump(&diagnostics.frames_ingested),
        FillOutcome::Silenced => SessionDiagnostics::bump(&diagnostics.frames_silenced),
        FillOutcome::Expired => SessionDiagnostics::bump(&diagnostics.frames_expired),
    }
    cursors.advance_write(BLOCK);
    outcome
}

/// Run until the source ends, fails, or shutdown fires.
pub fn run<S: AudioSource>(mut ctx: IngestContext<S>) -> IngestExit {
    info!(max_lead_frames = ctx.max_lead_frames, "ingestion started");

    let mut frame = silent_frame();
    // Consecutive late frames, reported once the source catches up.
    let mut late_run = 0u64;

    loop {
        if ctx.shutdown.is_triggered() {
            return IngestExit::Interrupted;
        }

        match ctx.source.read_frame(&mut frame, &ctx.shutdown) {
            // A read that outlived close is discarded.
            Ok(SourceRead::Frame) if ctx.shutdown.is_triggered() => {
                return IngestExit::Interrupted;
            }
            Ok(SourceRead::Frame) => {}
            Ok(SourceRead::EndOfStream) => {
                info!(
                    write_cursor = ctx.buffer.cursors().write(),
                    "audio source exhausted, ingestion stopped"
                );
                return IngestExit::EndOfStream;
            }
            Ok(SourceRead::Interrupted) => return IngestExit::Interrupted,
            Err(e) => {
                error!("audio source failed, ingestion stopped: {e}");
                return IngestExit::Failed(e);
            }
        }

        if !wait_for_headroom(&ctx) {
            return IngestExit::Interrupted;
        }

        match ingest_frame(&ctx.buffer, &frame, &ctx.diagnostics) {
            FillOutcome::Real => {
                if late_run > 0 {
                    warn!(frames = late_run, "source caught up; late frames were stored as silence");
                    late_run = 0;
                }
            }
            FillOutcome::Silenced => {
                if late_run == 0 {
                    debug!(
                        write_cursor = ctx.buffer.cursors().write(),
                        playback_cursor = ctx.buffer.cursors().playback(),
                        "frame arrived after its slot was played"
                    );
                }
                late_run += 1;
            }
            FillOutcome::Expired => {
                late_run += 1;
            }
        }
    }
}

/// Block while ingestion is `max_lead_frames` ahead of playback.
/// Returns `false` if shutdown fired while waiting.
fn wait_for_headroom<S>(ctx: &IngestContext<S>) -> bool {
    let limit = ctx.max_lead_frames as u64 * BLOCK;
    let cursors = ctx.buffer.cursors();
    let mut waited = false;
    loop {
        if cursors.write() < cursors.playback() + limit {
            return true;
        }
        if !waited {
            SessionDiagnostics::bump(&ctx.diagnostics.lead_waits);
            debug!(limit_frames = ctx.max_lead_frames, "ingestion at lead limit, waiting for playback");
            waited = true;
        }
        if ctx.shutdown.wait_until(Instant::now() + FRAME_DURATION) {
            return false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::is_silent,
        buffering::PlayOutcome,
        engine::{
            dispatch::{sink_queue, SinkQueue},
            scheduler::tick,
        },
        shutdown::shutdown_pair,
        source::channel_source,
    };
    use crossbeam_channel::Receiver;
    use std::sync::atomic::Ordering;
    use std::thread;
    use std::time::Duration;

    struct Rig {
        buffer: Arc<PlayoutBuffer>,
        diagnostics: Arc<SessionDiagnostics>,
        tx: SinkQueue,
        rx: Receiver<Frame>,
    }

    impl Rig {
        fn new(capacity_frames: usize) -> Self {
            let (tx, rx) = sink_queue(capacity_frames);
            Self {
                buffer: Arc::new(PlayoutBuffer::new(capacity_frames).expect("buffer")),
                diagnostics: Arc::new(SessionDiagnostics::default()),
                tx,
                rx,
            }
        }

        fn ingest(&self, byte: u8) -> FillOutcome {
            ingest_frame(&self.buffer, &[byte; BLOCK_SIZE], &self.diagnostics)
        }

        fn tick(&self) -> PlayOutcome {
            tick(&self.buffer, &self.tx, &self.diagnostics)
        }

        fn played(&self) -> Vec<Frame> {
            self.rx.try_iter().collect()
        }
    }

    #[test]
    fn played_bytes_match_ingested_bytes_without_stalls() {
        let rig = Rig::new(16);
        // Longer than the capacity so slots wrap several times.
        for k in 0..50u8 {
            assert_eq!(rig.ingest(k + 1), FillOutcome::Real);
            assert_eq!(rig.tick(), PlayOutcome::Filled);
        }

        let played = rig.played();
        assert_eq!(played.len(), 50);
        for (k, frame) in played.iter().enumerate() {
            assert_eq!(*frame, [k as u8 + 1; BLOCK_SIZE], "frame {k}");
        }
    }

    #[test]
    fn stalled_window_is_silenced_and_later_data_plays() {
        let rig = Rig::new(200);

        for _ in 0..50 {
            rig.ingest(0x01);
            rig.tick();
        }
        // Source stalls for five frame periods.
        for _ in 0..5 {
            assert_eq!(rig.tick(), PlayOutcome::Starved);
        }
        // The backlog arrives in one burst.
        let outcomes: Vec<_> = (0..50).map(|_| rig.ingest(0x02)).collect();
        assert!(outcomes[..5].iter().all(|o| *o == FillOutcome::Silenced));
        assert!(outcomes[5..].iter().all(|o| *o == FillOutcome::Real));
        for _ in 0..45 {
            assert_eq!(rig.tick(), PlayOutcome::Filled);
        }

        let played = rig.played();
        assert_eq!(played.len(), 100);
        assert!(played[..50].iter().all(|f| *f == [0x01; BLOCK_SIZE]));
        assert!(played[50..55].iter().all(|f| is_silent(f)));
        assert!(played[55..].iter().all(|f| *f == [0x02; BLOCK_SIZE]));

        // What was eventually stored for the stalled slots is silence too.
        let mut stored = vec![0xFFu8; 5 * BLOCK_SIZE];
        rig.buffer.storage().read(50 * BLOCK, &mut stored);
        assert!(is_silent(&stored));

        let snap = rig.diagnostics.snapshot();
        assert_eq!(snap.frames_ingested, 95);
        assert_eq!(snap.frames_silenced, 5);
        assert_eq!(snap.playback_underruns, 5);
    }

    #[test]
    fn write_cursor_advances_one_frame_per_step_regardless_of_outcome() {
        let rig = Rig::new(8);
        rig.tick();
        rig.tick();
        rig.ingest(0x07); // late
        rig.ingest(0x07); // late
        rig.ingest(0x07); // on time
        assert_eq!(rig.buffer.cursors().write(), 3 * BLOCK);
    }

    #[test]
    fn frames_for_lapped_slots_expire() {
        let rig = Rig::new(4);
        for _ in 0..10 {
            rig.tick();
        }
        // Slots now hold positions 8, 9, 6, 7 (in frames), all played.
        let outcomes: Vec<_> = (0..11).map(|_| rig.ingest(0x03)).collect();
        assert!(outcomes[..6].iter().all(|o| *o == FillOutcome::Expired));
        assert!(outcomes[6..10].iter().all(|o| *o == FillOutcome::Silenced));
        assert_eq!(outcomes[10], FillOutcome::Real);
        assert_eq!(rig.diagnostics.frames_expired.load(Ordering::Relaxed), 6);
    }

    fn context(
        rig: &Rig,
        source: crate::source::ChannelSource,
        shutdown: ShutdownSignal,
        max_lead_frames: usize,
    ) -> IngestContext<crate::source::ChannelSource> {
        IngestContext {
            source,
            buffer: Arc::clone(&rig.buffer),
            diagnostics: Arc::clone(&rig.diagnostics),
            shutdown,
            max_lead_frames,
        }
    }

    #[test]
    fn run_stops_quietly_at_end_of_stream() {
        let rig = Rig::new(16);
        let (feed, source) = channel_source();
        let (_trigger, signal) = shutdown_pair();
        feed.push(vec![0x01u8; 3 * BLOCK_SIZE]).expect("push");
        drop(feed);

        let exit = run(context(&rig, source, signal, 8));
        assert!(matches!(exit, IngestExit::EndOfStream));
        assert_eq!(rig.buffer.cursors().write(), 3 * BLOCK);
    }

    #[test]
    fn run_surfaces_source_failure() {
        let rig = Rig::new(16);
        let (feed, source) = channel_source();
        let (_trigger, signal) = shutdown_pair();
        feed.push(vec![0x01u8; BLOCK_SIZE]).expect("push");
        feed.fail(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"));

        let exit = run(context(&rig, source, signal, 8));
        assert!(matches!(exit, IngestExit::Failed(EchoRefError::SourceIo(_))));
        assert_eq!(rig.buffer.cursors().write(), BLOCK);
    }

    #[test]
    fn run_waits_at_lead_limit_until_shutdown() {
        let rig = Rig::new(16);
        let (feed, source) = channel_source();
        let (trigger, signal) = shutdown_pair();
        feed.push(vec![0x01u8; 10 * BLOCK_SIZE]).expect("push");

        let ctx = context(&rig, source, signal, 3);
        let handle = thread::spawn(move || run(ctx));

        let deadline = Instant::now() + Duration::from_secs(2);
        while rig.buffer.cursors().write() < 3 * BLOCK && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        thread::sleep(Duration::from_millis(50));
        assert_eq!(rig.buffer.cursors().write(), 3 * BLOCK, "no write past the lead limit");
        assert!(rig.diagnostics.lead_waits.load(Ordering::Relaxed) >= 1);

        trigger.trigger();
        let exit = handle.join().expect("ingest thread panicked");
        assert!(matches!(exit, IngestExit::Interrupted));
    }

    #[test]
    fn run_resumes_when_playback_frees_headroom() {
        let rig = Rig::new(16);
        let (feed, source) = channel_source();
        let (trigger, signal) = shutdown_pair();
        feed.push(vec![0x01u8; 4 * BLOCK_SIZE]).expect("push");
        drop(feed);

        let ctx = context(&rig, source, signal, 2);
        let handle = thread::spawn(move || run(ctx));

        let deadline = Instant::now() + Duration::from_secs(2);
        while rig.buffer.cursors().write() < 2 * BLOCK && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        rig.tick();
        rig.tick();

        let exit = handle.join().expect("ingest thread panicked");
        assert!(matches!(exit, IngestExit::EndOfStream));
        assert_eq!(rig.buffer.cursors().write(), 4 * BLOCK);
        drop(trigger);
    }

    /// Fires shutdown while its read is in flight, like a socket read that
    /// returns after the session was closed.
    struct LateReader(crate::shutdown::ShutdownTrigger);

    impl AudioSource for LateReader {
        fn read_frame(&mut self, frame: &mut Frame, _: &ShutdownSignal) -> crate::Result<SourceRead> {
            self.0.trigger();
            frame.fill(0x3C);
            Ok(SourceRead::Frame)
        }
    }

    #[test]
    fn frame_read_after_shutdown_is_discarded() {
        let rig = Rig::new(16);
        let (trigger, signal) = shutdown_pair();
        let ctx = IngestContext {
            source: LateReader(trigger),
            buffer: Arc::clone(&rig.buffer),
            diagnostics: Arc::clone(&rig.diagnostics),
            shutdown: signal,
            max_lead_frames: 8,
        };

        assert!(matches!(run(ctx), IngestExit::Interrupted));
        assert_eq!(rig.buffer.cursors().write(), 0);
        assert_eq!(rig.diagnostics.frames_ingested.load(Ordering::Relaxed), 0);
    }
}
