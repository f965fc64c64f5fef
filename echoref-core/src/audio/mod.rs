//! Fixed audio format and frame helpers.
//!
//! Everything in this crate runs at one format: 16 kHz, 16-bit little-endian
//! PCM, mono. The atomic unit of work is a [`Frame`] of 10 ms (320 bytes).
//!
//! Device and file backends live in the submodules:
//! - [`device`]: output device enumeration (cpal)
//! - [`output`]: `CpalSink`, the real playback device
//! - [`wav`]: `WavSource` / `WavSink` via hound

pub mod device;
pub mod output;
pub mod wav;

use std::time::Duration;

/// Sample rate in Hz.
pub const SAMPLE_RATE: u32 = 16_000;

/// Bytes per 16-bit sample.
pub const BYTES_PER_SAMPLE: usize = 2;

/// Mono only.
pub const CHANNELS: u16 = 1;

/// Bytes of audio per millisecond at the fixed format (32).
pub const BYTES_PER_MS: usize = SAMPLE_RATE as usize / 1000 * BYTES_PER_SAMPLE * CHANNELS as usize;

/// Frame size in bytes: 10 ms at the fixed format.
pub const BLOCK_SIZE: usize = 320;

/// Samples per frame.
pub const SAMPLES_PER_FRAME: usize = BLOCK_SIZE / BYTES_PER_SAMPLE;

/// Wall-clock duration of one frame, which is also the scheduler period.
pub const FRAME_DURATION: Duration = Duration::from_millis((BLOCK_SIZE / BYTES_PER_MS) as u64);

/// One 10 ms block of raw PCM bytes.
pub type Frame = [u8; BLOCK_SIZE];

/// A zero-filled frame.
pub const fn silent_frame() -> Frame {
    [0u8; BLOCK_SIZE]
}

/// Returns true if every byte of the frame is zero.
pub fn is_silent(frame: &[u8]) -> bool {
    frame.iter().all(|b| *b == 0)
}

/// Decode little-endian 16-bit PCM bytes into samples.
///
/// A trailing odd byte is ignored.
pub fn bytes_to_samples(bytes: &[u8], out: &mut Vec<i16>) {
    out.clear();
    out.extend(
        bytes
            .chunks_exact(BYTES_PER_SAMPLE)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]])),
    );
}

/// Encode samples into a frame. Missing samples are left as silence.
pub fn samples_to_frame(samples: &[i16], frame: &mut Frame) {
    frame.fill(0);
    for (dst, sample) in frame
        .chunks_exact_mut(BYTES_PER_SAMPLE)
        .zip(samples.iter().take(SAMPLES_PER_FRAME))
    {
        dst.copy_from_slice(&sample.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_constants_agree() {
        assert_eq!(BYTES_PER_MS, 32);
        assert_eq!(FRAME_DURATION, Duration::from_millis(10));
        assert_eq!(SAMPLES_PER_FRAME, 160);
    }

    #[test]
    fn samples_survive_frame_encoding() {
        let samples: Vec<i16> = (0..SAMPLES_PER_FRAME as i16).map(|i| i * 100 - 8000).collect();
        let mut frame = silent_frame();
        samples_to_frame(&samples, &mut frame);

        let mut decoded = Vec::new();
        bytes_to_samples(&frame, &mut decoded);
        assert_eq!(decoded, samples);
    }

    #[test]
    fn short_sample_slice_pads_with_silence() {
        let mut frame = [0xAAu8; BLOCK_SIZE];
        samples_to_frame(&[1, 2], &mut frame);
        assert_eq!(&frame[..4], &[1, 0, 2, 0]);
        assert!(is_silent(&frame[4..]));
    }
}
