//! Echo-reference reader: hands out only audio the scheduler has already
//! sent to the sink, in playback order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::{
    audio::{Frame, BLOCK_SIZE},
    buffering::PlayoutBuffer,
    engine::diagnostics::SessionDiagnostics,
    error::{EchoRefError, Result},
};

const BLOCK: u64 = BLOCK_SIZE as u64;
const POLL_INTERVAL: Duration = Duration::from_millis(2);

pub struct EchoReferenceReader {
    buffer: Arc<PlayoutBuffer>,
    diagnostics: Arc<SessionDiagnostics>,
    closed: Arc<AtomicBool>,
}

impl EchoReferenceReader {
    pub(crate) fn new(
        buffer: Arc<PlayoutBuffer>,
        diagnostics: Arc<SessionDiagnostics>,
        closed: Arc<AtomicBool>,
    ) -> Self {
        Self {
            buffer,
            diagnostics,
            closed,
        }
    }

    /// Copy `buf.len()` played bytes into `buf`.
    ///
    /// Returns `Ok(0)` without side effects when fewer than `buf.len()`
    /// played bytes are available. A single-byte read is rejected because it
    /// would split a sample.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EchoRefError::Closed);
        }
        match buf.len() {
            0 => return Ok(0),
            1 => {
                return Err(EchoRefError::UnsupportedOperation(
                    "single-byte echo reference read",
                ))
            }
            _ => {}
        }
        let len = buf.len() as u64;
        let storage = self.buffer.storage();
        if len > storage.capacity_bytes() {
            return Err(EchoRefError::UnsupportedOperation(
                "echo reference read larger than the buffer",
            ));
        }

        let cursors = self.buffer.cursors();
        let position = cursors.reference();
        if position + len > cursors.playback() {
            return Ok(0);
        }

        if !storage.read_played(position, buf) {
            self.resync();
            return Ok(0);
        }

        cursors.advance_reference(len);
        self.diagnostics
            .reference_bytes
            .fetch_add(len, Ordering::Relaxed);
        Ok(buf.len())
    }

    /// Read exactly one frame. Returns `false` when it is not ready yet.
    pub fn read_frame(&mut self, frame: &mut Frame) -> Result<bool> {
        Ok(self.read(frame)? == BLOCK_SIZE)
    }

    /// Poll [`read_frame`](Self::read_frame) until a frame is ready or
    /// `timeout` passes.
    pub fn read_frame_timeout(&mut self, frame: &mut Frame, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.read_frame(frame)? {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }

    /// Played bytes not yet read.
    pub fn available(&self) -> u64 {
        let cursors = self.buffer.cursors();
        cursors.playback().saturating_sub(cursors.reference())
    }

    /// Bytes read so far.
    pub fn position(&self) -> u64 {
        self.buffer.cursors().reference()
    }

    /// The reader's region was reused by a later lap. Jump to the oldest
    /// frame that is still intact.
    fn resync(&self) {
        let cursors = self.buffer.cursors();
        let capacity = self.buffer.storage().capacity_bytes();
        let playback = cursors.playback();
        let newest = cursors.write().max(playback);
        // One frame of slack for a lap write that may be in flight.
        let oldest_intact = newest.saturating_sub(capacity) + BLOCK;
        let target = oldest_intact.min(playback);
        let from = cursors.reference();
        cursors.resync_reference(target);

        SessionDiagnostics::bump(&self.diagnostics.reference_overflows);
        warn!(
            from,
            to = target,
            "echo reference fell behind the buffer, skipped {} bytes",
            target.saturating_sub(from)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::silent_frame;

    fn reader_over(buffer: &Arc<PlayoutBuffer>) -> (EchoReferenceReader, Arc<AtomicBool>) {
        let closed = Arc::new(AtomicBool::new(false));
        let reader = EchoReferenceReader::new(
            Arc::clone(buffer),
            Arc::new(SessionDiagnostics::default()),
            Arc::clone(&closed),
        );
        (reader, closed)
    }

    /// Write and play one frame directly, bypassing the workers.
    fn play_frame(buffer: &PlayoutBuffer, byte: u8) {
        let cursors = buffer.cursors();
        let position = cursors.playback();
        buffer.storage().write(position, &[byte; BLOCK_SIZE]);
        cursors.advance_write(BLOCK);
        let mut out = silent_frame();
        buffer.storage().play(position, &mut out);
        cursors.advance_playback(BLOCK);
    }

    #[test]
    fn empty_read_is_a_no_op() {
        let buffer = Arc::new(PlayoutBuffer::new(4).expect("buffer"));
        let (mut reader, _) = reader_over(&buffer);
        assert_eq!(reader.read(&mut []).expect("read"), 0);
    }

    #[test]
    fn single_byte_read_is_rejected() {
        let buffer = Arc::new(PlayoutBuffer::new(4).expect("buffer"));
        play_frame(&buffer, 1);
        let (mut reader, _) = reader_over(&buffer);
        let mut one = [0u8; 1];
        assert!(matches!(
            reader.read(&mut one),
            Err(EchoRefError::UnsupportedOperation(_))
        ));
        assert_eq!(reader.position(), 0);
    }

    #[test]
    fn unplayed_audio_is_not_ready() {
        let buffer = Arc::new(PlayoutBuffer::new(4).expect("buffer"));
        buffer.storage().write(0, &[7; BLOCK_SIZE]);
        buffer.cursors().advance_write(BLOCK);
        let (mut reader, _) = reader_over(&buffer);

        let mut frame = silent_frame();
        assert!(!reader.read_frame(&mut frame).expect("read"));
        assert_eq!(reader.position(), 0);
    }

    #[test]
    fn reads_played_audio_in_order_with_partial_lengths() {
        let buffer = Arc::new(PlayoutBuffer::new(4).expect("buffer"));
        play_frame(&buffer, 1);
        play_frame(&buffer, 2);
        let (mut reader, _) = reader_over(&buffer);

        let mut head = [0u8; 480];
        assert_eq!(reader.read(&mut head).expect("read"), 480);
        assert!(head[..320].iter().all(|b| *b == 1));
        assert!(head[320..].iter().all(|b| *b == 2));

        let mut rest = [0u8; 320];
        assert_eq!(reader.read(&mut rest).expect("read"), 0, "only 160 bytes left");
        assert_eq!(reader.available(), 160);
        let mut tail = [0u8; 160];
        assert_eq!(reader.read(&mut tail).expect("read"), 160);
        assert!(tail.iter().all(|b| *b == 2));
        assert_eq!(reader.position(), buffer.cursors().playback());
    }

    #[test]
    fn oversized_read_is_rejected() {
        let buffer = Arc::new(PlayoutBuffer::new(2).expect("buffer"));
        let (mut reader, _) = reader_over(&buffer);
        let mut big = vec![0u8; 3 * BLOCK_SIZE];
        assert!(matches!(
            reader.read(&mut big),
            Err(EchoRefError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn lapped_reader_resyncs_to_oldest_intact_frame() {
        let buffer = Arc::new(PlayoutBuffer::new(4).expect("buffer"));
        for i in 0..10u8 {
            play_frame(&buffer, i);
        }
        let diagnostics = Arc::new(SessionDiagnostics::default());
        let mut reader = EchoReferenceReader::new(
            Arc::clone(&buffer),
            Arc::clone(&diagnostics),
            Arc::new(AtomicBool::new(false)),
        );

        let mut frame = silent_frame();
        assert!(!reader.read_frame(&mut frame).expect("read"));
        assert_eq!(diagnostics.snapshot().reference_overflows, 1);
        // W = P = 10 frames, capacity 4: frames 7.. are intact.
        assert_eq!(reader.position(), 7 * BLOCK);

        assert!(reader.read_frame(&mut frame).expect("read"));
        assert_eq!(frame, [7u8; BLOCK_SIZE]);
    }

    #[test]
    fn closed_reader_errors() {
        let buffer = Arc::new(PlayoutBuffer::new(4).expect("buffer"));
        let (mut reader, closed) = reader_over(&buffer);
        closed.store(true, Ordering::Release);
        let mut frame = silent_frame();
        assert!(matches!(reader.read(&mut frame), Err(EchoRefError::Closed)));
    }

    #[test]
    fn read_frame_timeout_gives_up_after_deadline() {
        let buffer = Arc::new(PlayoutBuffer::new(4).expect("buffer"));
        let (mut reader, _) = reader_over(&buffer);
        let mut frame = silent_frame();
        let start = Instant::now();
        assert!(!reader
            .read_frame_timeout(&mut frame, Duration::from_millis(20))
            .expect("read"));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
