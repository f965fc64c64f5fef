//! `PassthroughCanceller`: placeholder backend that returns the microphone
//! frame untouched.
//!
//! Lets a host wire the full duplex path before a real canceller is
//! integrated.

use crate::aec::EchoCanceller;
use crate::audio::Frame;
use crate::error::Result;

#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughCanceller;

impl EchoCanceller for PassthroughCanceller {
    fn process(&mut self, mic: &Frame, _reference: &Frame) -> Result<Frame> {
        Ok(*mic)
    }

    fn reset(&mut self) {}
}
