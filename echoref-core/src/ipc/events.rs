//! Session status events.
//!
//! Broadcast on `PlayoutSession::subscribe_status()` whenever the session's
//! lifecycle changes. Serialisable so hosts can forward them as-is.

use serde::{Deserialize, Serialize};

/// Emitted when the session state changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusEvent {
    pub status: SessionStatus,
    /// Optional human-readable detail (e.g. the source error).
    pub detail: Option<String>,
}

/// Current state of a playout session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Source is being ingested and the scheduler is ticking.
    Playing,
    /// Source reached end-of-stream; playback continues with silence.
    SourceEnded,
    /// Source failed; playback continues with silence.
    SourceFailed,
    /// Session closed; no further side effects.
    Closed,
}

impl SessionStatus {
    /// The ingestion side has stopped for good.
    pub fn ingestion_stopped(self) -> bool {
        !matches!(self, SessionStatus::Playing)
    }
}
