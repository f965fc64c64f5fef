//! The three byte cursors that address the playout buffer.
//!
//! Each cursor has exactly one writer:
//!
//! | Cursor | Writer |
//! |--------|--------|
//! | `write` | ingestion worker |
//! | `playback` | scheduler tick |
//! | `reference` | echo-reference reader |
//!
//! Stores use `Release` and loads `Acquire`, so a reader that observes a
//! cursor value also observes every slot update made before it was stored.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
pub struct Cursors {
    write: AtomicU64,
    playback: AtomicU64,
    reference: AtomicU64,
}

/// Point-in-time copy of all three cursors, in bytes since session start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorSnapshot {
    pub write: u64,
    pub playback: u64,
    pub reference: u64,
}

impl CursorSnapshot {
    /// Bytes ingested but not yet played. Negative when ingestion lags.
    pub fn lead(&self) -> i64 {
        self.write as i64 - self.playback as i64
    }
}

impl Cursors {
    pub fn write(&self) -> u64 {
        self.write.load(Ordering::Acquire)
    }

    pub fn playback(&self) -> u64 {
        self.playback.load(Ordering::Acquire)
    }

    pub fn reference(&self) -> u64 {
        self.reference.load(Ordering::Acquire)
    }

    pub(crate) fn advance_write(&self, bytes: u64) -> u64 {
        self.write.fetch_add(bytes, Ordering::AcqRel) + bytes
    }

    pub(crate) fn advance_playback(&self, bytes: u64) -> u64 {
        self.playback.fetch_add(bytes, Ordering::AcqRel) + bytes
    }

    pub(crate) fn advance_reference(&self, bytes: u64) -> u64 {
        self.reference.fetch_add(bytes, Ordering::AcqRel) + bytes
    }

    /// Move the reference cursor forward to `position` (never backwards).
    pub(crate) fn resync_reference(&self, position: u64) {
        self.reference.fetch_max(position, Ordering::AcqRel);
    }

    pub fn snapshot(&self) -> CursorSnapshot {
        CursorSnapshot {
            write: self.write(),
            playback: self.playback(),
            reference: self.reference(),
        }
    }
}
