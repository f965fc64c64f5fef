//! WAV file source and sink (hound).
//!
//! Only the session format is accepted: 16 kHz, mono, 16-bit integer PCM.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use super::{bytes_to_samples, samples_to_frame, Frame, SAMPLES_PER_FRAME, SAMPLE_RATE};
use crate::{
    error::{EchoRefError, Result},
    shutdown::ShutdownSignal,
    sink::PlaybackSink,
    source::{AudioSource, SourceRead},
};

/// The only WAV layout this crate reads or writes.
pub fn session_wav_spec() -> WavSpec {
    WavSpec {
        channels: super::CHANNELS,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

/// Streams a WAV file frame by frame. The final partial frame, if any, is
/// padded with silence.
pub struct WavSource {
    reader: WavReader<BufReader<File>>,
    scratch: Vec<i16>,
}

impl WavSource {
    /// # Errors
    /// `EchoRefError::UnsupportedFormat` when the file is not 16 kHz mono
    /// 16-bit PCM.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let reader = WavReader::open(path.as_ref())?;
        let spec = reader.spec();
        if spec != session_wav_spec() {
            return Err(EchoRefError::UnsupportedFormat(format!(
                "{}: {} Hz, {} ch, {} bit {:?} (need 16000 Hz mono 16-bit int)",
                path.as_ref().display(),
                spec.sample_rate,
                spec.channels,
                spec.bits_per_sample,
                spec.sample_format
            )));
        }
        Ok(Self {
            reader,
            scratch: Vec::with_capacity(SAMPLES_PER_FRAME),
        })
    }
}

impl AudioSource for WavSource {
    fn read_frame(&mut self, frame: &mut Frame, shutdown: &ShutdownSignal) -> Result<SourceRead> {
        if shutdown.is_triggered() {
            return Ok(SourceRead::Interrupted);
        }
        self.scratch.clear();
        let mut samples = self.reader.samples::<i16>();
        while self.scratch.len() < SAMPLES_PER_FRAME {
            match samples.next() {
                Some(sample) => self.scratch.push(sample?),
                None => break,
            }
        }
        if self.scratch.is_empty() {
            return Ok(SourceRead::EndOfStream);
        }
        samples_to_frame(&self.scratch, frame);
        Ok(SourceRead::Frame)
    }
}

/// Records every played frame into a WAV file.
pub struct WavSink {
    writer: WavWriter<BufWriter<File>>,
    scratch: Vec<i16>,
}

impl WavSink {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let writer = WavWriter::create(path.as_ref(), session_wav_spec())?;
        Ok(Self {
            writer,
            scratch: Vec::with_capacity(SAMPLES_PER_FRAME),
        })
    }

    /// Write the header and close the file.
    pub fn finalize(self) -> Result<()> {
        self.writer.finalize()?;
        Ok(())
    }

    /// Append raw frame bytes. Shared by the sink impl and callers that
    /// record the echo reference.
    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        bytes_to_samples(bytes, &mut self.scratch);
        for sample in &self.scratch {
            self.writer.write_sample(*sample)?;
        }
        Ok(())
    }
}

impl PlaybackSink for WavSink {
    fn write(&mut self, frame: &[u8]) -> Result<()> {
        self.append(frame)
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
