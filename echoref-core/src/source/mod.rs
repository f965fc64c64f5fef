//! Far-end audio sources.
//!
//! The `AudioSource` trait is the input seam of a session: anything that can
//! hand over one 10 ms frame at a time, blocking until it has one. Transport
//! concerns (reordering, loss concealment) are expected to be resolved
//! upstream; a source only ever yields contiguous audio.
//!
//! Implementations:
//! - [`ChannelSource`]: fed from a network task through a [`RemoteFeed`]
//! - [`ReaderSource`]: any `std::io::Read`
//! - [`crate::audio::wav::WavSource`]: a 16 kHz mono WAV file

use std::io::Read;

use crossbeam_channel::{select, unbounded, Receiver, Sender};
use tracing::{debug, warn};

use crate::{
    audio::{Frame, BLOCK_SIZE},
    error::{EchoRefError, Result},
    shutdown::ShutdownSignal,
};

/// Outcome of one blocking frame read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceRead {
    /// `frame` now holds one full frame.
    Frame,
    /// The source is exhausted. Not an error.
    EndOfStream,
    /// Shutdown fired while waiting.
    Interrupted,
}

/// Contract for far-end audio sources.
pub trait AudioSource: Send + 'static {
    /// Block until a whole frame is available, the stream ends, or
    /// `shutdown` fires.
    ///
    /// Implementations that block on something selectable should select on
    /// `shutdown.receiver()` as well; others should at least check
    /// `shutdown.is_triggered()` between partial reads.
    ///
    /// # Errors
    /// Hard I/O failures, reported as `EchoRefError::SourceIo`.
    fn read_frame(&mut self, frame: &mut Frame, shutdown: &ShutdownSignal) -> Result<SourceRead>;
}

impl<S: AudioSource + ?Sized> AudioSource for Box<S> {
    fn read_frame(&mut self, frame: &mut Frame, shutdown: &ShutdownSignal) -> Result<SourceRead> {
        (**self).read_frame(frame, shutdown)
    }
}

// ---------------------------------------------------------------------------
// Channel-fed source
// ---------------------------------------------------------------------------

enum FeedItem {
    Data(Vec<u8>),
    Failed(std::io::Error),
}

/// Sending half of a [`ChannelSource`], held by the network side.
///
/// Byte chunks may have any length; the source reassembles whole frames.
/// Dropping every clone of the feed ends the stream.
#[derive(Clone)]
pub struct RemoteFeed {
    tx: Sender<FeedItem>,
}

/// Receiving half, handed to a session.
pub struct ChannelSource {
    rx: Receiver<FeedItem>,
    pending: Vec<u8>,
    offset: usize,
}

/// Create a connected feed/source pair.
pub fn channel_source() -> (RemoteFeed, ChannelSource) {
    let (tx, rx) = unbounded();
    (
        RemoteFeed { tx },
        ChannelSource {
            rx,
            pending: Vec::new(),
            offset: 0,
        },
    )
}

impl RemoteFeed {
    /// Queue received audio bytes.
    ///
    /// # Errors
    /// `EchoRefError::Closed` once the source side is gone.
    pub fn push(&self, bytes: impl Into<Vec<u8>>) -> Result<()> {
        self.tx
            .send(FeedItem::Data(bytes.into()))
            .map_err(|_| EchoRefError::Closed)
    }

    /// Queue `frames` frames of silence, e.g. to stand in for lost packets.
    pub fn push_silence(&self, frames: usize) -> Result<()> {
        self.push(vec![0u8; frames * BLOCK_SIZE])
    }

    /// Report a transport failure. The source surfaces it as a hard error
    /// after delivering everything queued before it.
    pub fn fail(self, err: std::io::Error) {
        let _ = self.tx.send(FeedItem::Failed(err));
    }
}

impl std::fmt::Debug for RemoteFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteFeed").finish_non_exhaustive()
    }
}

impl AudioSource for ChannelSource {
    fn read_frame(&mut self, frame: &mut Frame, shutdown: &ShutdownSignal) -> Result<SourceRead> {
        let mut filled = 0usize;
        while filled < BLOCK_SIZE {
            if self.offset < self.pending.len() {
                let take = (BLOCK_SIZE - filled).min(self.pending.len() - self.offset);
                frame[filled..filled + take]
                    .copy_from_slice(&self.pending[self.offset..self.offset + take]);
                filled += take;
                self.offset += take;
                continue;
            }

            select! {
                recv(self.rx) -> msg => match msg {
                    Ok(FeedItem::Data(bytes)) => {
                        self.pending = bytes;
                        self.offset = 0;
                    }
                    Ok(FeedItem::Failed(err)) => return Err(EchoRefError::SourceIo(err)),
                    Err(_) => {
                        if filled > 0 {
                            warn!(bytes = filled, "feed closed mid-frame, dropping partial frame");
                        }
                        return Ok(SourceRead::EndOfStream);
                    }
                },
                recv(shutdown.receiver()) -> _ => return Ok(SourceRead::Interrupted),
            }
        }
        Ok(SourceRead::Frame)
    }
}

// ---------------------------------------------------------------------------
// std::io::Read adapter
// ---------------------------------------------------------------------------

/// Reads frames from any byte reader (socket, pipe, file).
///
/// A plain `Read` cannot be woken from a blocking call, so shutdown is only
/// observed between reads; a session gives such a source a bounded grace
/// period on close and then detaches it.
pub struct ReaderSource<R> {
    inner: R,
}

impl<R: Read + Send + 'static> ReaderSource<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

impl<R: Read + Send + 'static> AudioSource for ReaderSource<R> {
    fn read_frame(&mut self, frame: &mut Frame, shutdown: &ShutdownSignal) -> Result<SourceRead> {
        let mut filled = 0usize;
        while filled < BLOCK_SIZE {
            if shutdown.is_triggered() {
                return Ok(SourceRead::Interrupted);
            }
            match self.inner.read(&mut frame[filled..]) {
                Ok(0) => {
                    if filled > 0 {
                        debug!(bytes = filled, "reader ended mid-frame, dropping partial frame");
                    }
                    return Ok(SourceRead::EndOfStream);
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(EchoRefError::SourceIo(e)),
            }
        }
        Ok(SourceRead::Frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{audio::silent_frame, shutdown::shutdown_pair};
    use std::io::{self, Cursor};
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn channel_source_reassembles_odd_sized_chunks() {
        let (feed, mut source) = channel_source();
        let (_trigger, signal) = shutdown_pair();
        feed.push(vec![1u8; 100]).expect("push");
        feed.push(vec![2u8; 300]).expect("push");
        feed.push(vec![3u8; 240]).expect("push");
        drop(feed);

        let mut frame = silent_frame();
        assert_eq!(source.read_frame(&mut frame, &signal).expect("read"), SourceRead::Frame);
        assert!(frame[..100].iter().all(|b| *b == 1));
        assert!(frame[100..].iter().all(|b| *b == 2));

        assert_eq!(source.read_frame(&mut frame, &signal).expect("read"), SourceRead::Frame);
        assert!(frame[..80].iter().all(|b| *b == 2));
        assert!(frame[80..].iter().all(|b| *b == 3));

        assert_eq!(
            source.read_frame(&mut frame, &signal).expect("read"),
            SourceRead::EndOfStream
        );
    }

    #[test]
    fn pushed_silence_stands_in_for_lost_frames() {
        let (feed, mut source) = channel_source();
        let (_trigger, signal) = shutdown_pair();
        feed.push(vec![4u8; BLOCK_SIZE]).expect("push");
        feed.push_silence(2).expect("push silence");
        feed.push(vec![6u8; BLOCK_SIZE]).expect("push");
        drop(feed);

        let mut frame = silent_frame();
        let mut frames = Vec::new();
        while source.read_frame(&mut frame, &signal).expect("read") == SourceRead::Frame {
            frames.push(frame);
        }
        assert_eq!(
            frames,
            vec![[4u8; BLOCK_SIZE], silent_frame(), silent_frame(), [6u8; BLOCK_SIZE]]
        );
    }

    #[test]
    fn channel_source_surfaces_feed_failure_after_queued_data() {
        let (feed, mut source) = channel_source();
        let (_trigger, signal) = shutdown_pair();
        feed.push(vec![5u8; BLOCK_SIZE]).expect("push");
        feed.fail(io::Error::new(io::ErrorKind::ConnectionReset, "peer reset"));

        let mut frame = silent_frame();
        assert_eq!(source.read_frame(&mut frame, &signal).expect("read"), SourceRead::Frame);
        let err = source.read_frame(&mut frame, &signal).unwrap_err();
        assert!(matches!(err, EchoRefError::SourceIo(_)), "got {err:?}");
    }

    #[test]
    fn channel_source_read_is_interrupted_by_shutdown() {
        let (_feed, mut source) = channel_source();
        let (trigger, signal) = shutdown_pair();

        let handle = thread::spawn(move || {
            let mut frame = silent_frame();
            let start = Instant::now();
            let outcome = source.read_frame(&mut frame, &signal).expect("read");
            (outcome, start.elapsed())
        });
        thread::sleep(Duration::from_millis(20));
        trigger.trigger();

        let (outcome, waited) = handle.join().expect("reader panicked");
        assert_eq!(outcome, SourceRead::Interrupted);
        assert!(waited < Duration::from_secs(2));
    }

    #[test]
    fn push_after_source_dropped_reports_closed() {
        let (feed, source) = channel_source();
        drop(source);
        assert!(matches!(feed.push(vec![0u8; 4]), Err(EchoRefError::Closed)));
    }

    #[test]
    fn reader_source_drops_trailing_partial_frame() {
        let bytes = vec![9u8; BLOCK_SIZE * 2 + 17];
        let mut source = ReaderSource::new(Cursor::new(bytes));
        let (_trigger, signal) = shutdown_pair();
        let mut frame = silent_frame();

        assert_eq!(source.read_frame(&mut frame, &signal).expect("read"), SourceRead::Frame);
        assert_eq!(source.read_frame(&mut frame, &signal).expect("read"), SourceRead::Frame);
        assert_eq!(
            source.read_frame(&mut frame, &signal).expect("read"),
            SourceRead::EndOfStream
        );
    }

    struct BrokenReader;

    impl Read for BrokenReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"))
        }
    }

    #[test]
    fn reader_source_maps_hard_errors_to_source_io() {
        let mut source = ReaderSource::new(BrokenReader);
        let (_trigger, signal) = shutdown_pair();
        let mut frame = silent_frame();
        let err = source.read_frame(&mut frame, &signal).unwrap_err();
        assert!(matches!(err, EchoRefError::SourceIo(_)));
    }
}
