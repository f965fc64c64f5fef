//! # echoref-core
//!
//! Real-time playout buffer for a far-end audio stream, with an
//! echo-cancellation reference tap.
//!
//! ## Architecture
//!
//! ```text
//! AudioSource → Ingestion worker → PlayoutBuffer → Scheduler (10 ms ticks)
//!                                        │                   │
//!                                  played region        sink queue
//!                                        │                   │
//!                              EchoReferenceReader     Sink worker → PlaybackSink
//!                                        │
//!                                  EchoCanceller
//! ```
//!
//! The scheduler never waits on the source or the sink. Late audio becomes
//! silence in its slot, so the echo reference always matches what was
//! actually played.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod aec;
pub mod audio;
pub mod buffering;
pub mod config;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod shutdown;
pub mod sink;
pub mod source;

// Convenience re-exports for downstream crates
pub use aec::{CancellerHandle, DuplexLoop, DuplexStep, EchoCanceller, PassthroughCanceller};
pub use audio::{Frame, BLOCK_SIZE, FRAME_DURATION, SAMPLE_RATE};
pub use buffering::CursorSnapshot;
pub use config::{load_config, SessionConfig};
pub use engine::{DiagnosticsSnapshot, EchoReferenceReader, PlayoutSession, SessionDiagnostics};
pub use error::{EchoRefError, Result};
pub use ipc::events::{SessionStatus, SessionStatusEvent};
pub use shutdown::{shutdown_pair, ShutdownSignal, ShutdownTrigger};
pub use sink::{channel_sink, ChannelSink, NullSink, PlaybackSink, WavSink};
pub use source::{channel_source, AudioSource, ChannelSource, ReaderSource, RemoteFeed, SourceRead};

#[cfg(feature = "audio-cpal")]
pub use sink::CpalSink;
