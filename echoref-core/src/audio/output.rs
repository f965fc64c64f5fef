//! Playback through the system output device via cpal.
//!
//! # Design constraints
//!
//! The cpal output callback runs on an OS audio thread at elevated priority
//! and must not allocate, block, or perform I/O. `CpalSink::write` therefore
//! only converts a frame to f32 and pushes it into an SPSC `ringbuf`; the
//! callback pops from that ring and pads any shortfall with silence.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms, so `CpalSink` must be created
//! and dropped on the same thread. Sessions do this by building the sink
//! inside the sink worker through the factory passed to `PlayoutSession::open`.

#![cfg(feature = "audio-cpal")]

use cpal::{
    traits::{DeviceTrait, StreamTrait},
    SampleRate, Stream, StreamConfig,
};
use ringbuf::{
    traits::{Consumer, Producer, Split},
    HeapProd, HeapRb,
};
use tracing::{error, info, warn};

use super::{bytes_to_samples, device::select_output_device, CHANNELS, SAMPLES_PER_FRAME, SAMPLE_RATE};
use crate::{
    error::{EchoRefError, Result},
    sink::PlaybackSink,
};

/// Device-side ring: 20 frames (200 ms) of f32 samples.
const DEVICE_RING_SAMPLES: usize = SAMPLES_PER_FRAME * 20;

/// Handle to an active output stream.
///
/// **Not `Send`**: create and drop it on the same OS thread.
pub struct CpalSink {
    /// Kept alive so the stream is not dropped prematurely.
    _stream: Stream,
    producer: HeapProd<f32>,
    pcm: Vec<i16>,
    scaled: Vec<f32>,
    /// Name of the device the stream was opened on.
    pub device_name: String,
}

impl CpalSink {
    /// Open the system default output device.
    pub fn open_default() -> Result<Self> {
        Self::open_with_preference(None)
    }

    /// Open an output device by preferred name, otherwise fall back to the
    /// default output device and then the first available device.
    ///
    /// # Errors
    /// `EchoRefError::NoDefaultOutputDevice` when no device exists, or
    /// `EchoRefError::AudioDevice` if the device rejects 16 kHz mono.
    pub fn open_with_preference(preferred_device_name: Option<&str>) -> Result<Self> {
        let host = cpal::default_host();
        let device = select_output_device(&host, preferred_device_name)?;
        let device_name = device.name().unwrap_or_default();

        info!(device = device_name.as_str(), "opening output device");

        let config = StreamConfig {
            channels: CHANNELS,
            sample_rate: SampleRate(SAMPLE_RATE),
            buffer_size: cpal::BufferSize::Default,
        };

        let (producer, mut consumer) = HeapRb::<f32>::new(DEVICE_RING_SAMPLES).split();

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _info| {
                    let read = consumer.pop_slice(data);
                    data[read..].fill(0.0);
                },
                |err| error!("audio output stream error: {err}"),
                None,
            )
            .map_err(|e| EchoRefError::AudioDevice(e.to_string()))?;

        stream
            .play()
            .map_err(|e| EchoRefError::AudioDevice(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            producer,
            pcm: Vec::with_capacity(SAMPLES_PER_FRAME),
            scaled: Vec::with_capacity(SAMPLES_PER_FRAME),
            device_name,
        })
    }
}

impl PlaybackSink for CpalSink {
    fn write(&mut self, frame: &[u8]) -> Result<()> {
        bytes_to_samples(frame, &mut self.pcm);
        self.scaled.clear();
        self.scaled
            .extend(self.pcm.iter().map(|s| *s as f32 / 32768.0));

        let written = self.producer.push_slice(&self.scaled);
        if written < self.scaled.len() {
            warn!(
                "device ring full: dropped {} samples",
                self.scaled.len() - written
            );
        }
        Ok(())
    }
}
