//! Echo-cancellation stage.
//!
//! The `EchoCanceller` trait decouples the duplex loop from any specific
//! algorithm (passthrough, NLMS, a vendor DSP block). The crate only
//! guarantees the pairing: each microphone frame is processed together with
//! the far-end frame that was handed to the speaker at the same tick.
//!
//! `&mut self` on `process` expresses that cancellers are stateful (adaptive
//! filter taps, delay estimates). Shared use goes through
//! `CancellerHandle`'s `parking_lot::Mutex`.

pub mod stub;

pub use stub::PassthroughCanceller;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::{
    audio::{silent_frame, Frame},
    engine::EchoReferenceReader,
    error::Result,
    shutdown::ShutdownSignal,
    source::{AudioSource, SourceRead},
};

/// Contract for echo-cancellation backends.
pub trait EchoCanceller: Send + 'static {
    /// Remove the echo of `reference` from `mic` and return the cleaned
    /// frame.
    fn process(&mut self, mic: &Frame, reference: &Frame) -> Result<Frame>;

    /// Drop adaptive state, e.g. after the far end changed.
    fn reset(&mut self);
}

/// Thread-safe reference-counted handle to any `EchoCanceller`.
#[derive(Clone)]
pub struct CancellerHandle(pub Arc<Mutex<dyn EchoCanceller>>);

impl CancellerHandle {
    pub fn new<C: EchoCanceller>(canceller: C) -> Self {
        Self(Arc::new(Mutex::new(canceller)))
    }
}

impl EchoCanceller for CancellerHandle {
    fn process(&mut self, mic: &Frame, reference: &Frame) -> Result<Frame> {
        self.0.lock().process(mic, reference)
    }

    fn reset(&mut self) {
        self.0.lock().reset();
    }
}

impl std::fmt::Debug for CancellerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellerHandle").finish_non_exhaustive()
    }
}

/// Outcome of one duplex step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplexStep {
    /// A cleaned microphone frame.
    Frame(Frame),
    EndOfStream,
    Interrupted,
}

/// Pairs near-end microphone frames with echo-reference frames and runs
/// them through a canceller.
pub struct DuplexLoop<M, C> {
    mic: M,
    canceller: C,
    reference_timeout: Duration,
    mic_frame: Frame,
    reference_frame: Frame,
    reference_misses: u64,
}

impl<M: AudioSource, C: EchoCanceller> DuplexLoop<M, C> {
    /// `reference_timeout` bounds how long a step waits for the matching
    /// played frame before substituting silence.
    pub fn new(mic: M, canceller: C, reference_timeout: Duration) -> Self {
        Self {
            mic,
            canceller,
            reference_timeout,
            mic_frame: silent_frame(),
            reference_frame: silent_frame(),
            reference_misses: 0,
        }
    }

    /// Read one microphone frame, pair it with the next echo-reference frame
    /// and return the canceller's output.
    ///
    /// # Errors
    /// Microphone source errors, reference reader errors (e.g. a closed
    /// session) and canceller errors.
    pub fn step(
        &mut self,
        reference: &mut EchoReferenceReader,
        shutdown: &ShutdownSignal,
    ) -> Result<DuplexStep> {
        match self.mic.read_frame(&mut self.mic_frame, shutdown)? {
            SourceRead::Frame => {}
            SourceRead::EndOfStream => return Ok(DuplexStep::EndOfStream),
            SourceRead::Interrupted => return Ok(DuplexStep::Interrupted),
        }

        if !reference.read_frame_timeout(&mut self.reference_frame, self.reference_timeout)? {
            if self.reference_misses == 0 {
                warn!(
                    timeout_ms = self.reference_timeout.as_millis() as u64,
                    "no echo reference frame in time, cancelling against silence"
                );
            } else {
                debug!(misses = self.reference_misses + 1, "echo reference frame missing");
            }
            self.reference_misses += 1;
            self.reference_frame = silent_frame();
        }

        let cleaned = self
            .canceller
            .process(&self.mic_frame, &self.reference_frame)?;
        Ok(DuplexStep::Frame(cleaned))
    }

    /// Steps that had no reference frame and used silence instead.
    pub fn reference_misses(&self) -> u64 {
        self.reference_misses
    }

    pub fn canceller_mut(&mut self) -> &mut C {
        &mut self.canceller
    }

    pub fn into_parts(self) -> (M, C) {
        (self.mic, self.canceller)
    }
}
