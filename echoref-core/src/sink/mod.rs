//! Playback sinks.
//!
//! A sink receives exactly one frame per scheduler tick, always on the
//! session's dedicated sink worker thread, never on the timer thread. Sinks
//! do not have to be `Send`: the session builds them on the worker through a
//! factory closure, because device handles (`cpal::Stream` among them) are
//! often bound to the thread that created them.

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::{
    audio::{Frame, BLOCK_SIZE},
    error::{EchoRefError, Result},
};

#[cfg(feature = "audio-cpal")]
pub use crate::audio::output::CpalSink;
pub use crate::audio::wav::WavSink;

/// Contract for playback sinks.
pub trait PlaybackSink: 'static {
    /// Write one frame (`frame.len() == BLOCK_SIZE`). May block; it only
    /// delays the sink worker.
    fn write(&mut self, frame: &[u8]) -> Result<()>;

    /// Flush buffered output. Called once when the session closes.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<S: PlaybackSink + ?Sized> PlaybackSink for Box<S> {
    fn write(&mut self, frame: &[u8]) -> Result<()> {
        (**self).write(frame)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl PlaybackSink for NullSink {
    fn write(&mut self, _frame: &[u8]) -> Result<()> {
        Ok(())
    }
}

/// Forwards every played frame over a channel, e.g. to a test or a
/// monitoring task.
#[derive(Debug)]
pub struct ChannelSink {
    tx: Sender<Frame>,
}

/// Create a channel sink and the receiver for the frames it plays.
pub fn channel_sink() -> (ChannelSink, Receiver<Frame>) {
    let (tx, rx) = unbounded();
    (ChannelSink { tx }, rx)
}

impl PlaybackSink for ChannelSink {
    fn write(&mut self, frame: &[u8]) -> Result<()> {
        let frame: Frame = frame.try_into().map_err(|_| EchoRefError::FrameLength {
            expected: BLOCK_SIZE,
            actual: frame.len(),
        })?;
        self.tx
            .send(frame)
            .map_err(|_| EchoRefError::SinkWrite("frame receiver dropped".into()))
    }
}
