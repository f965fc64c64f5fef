use thiserror::Error;

/// All errors produced by echoref-core.
#[derive(Debug, Error)]
pub enum EchoRefError {
    #[error("audio source I/O error: {0}")]
    SourceIo(#[source] std::io::Error),

    #[error("playback sink failed to open: {0}")]
    SinkOpen(String),

    #[error("playback sink write failed: {0}")]
    SinkWrite(String),

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("no default output device found")]
    NoDefaultOutputDevice,

    #[error("invalid session config: {0}")]
    InvalidConfig(String),

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(&'static str),

    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("frame length mismatch: expected {expected} bytes, got {actual}")]
    FrameLength { expected: usize, actual: usize },

    #[error("session is closed")]
    Closed,

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, EchoRefError>;
