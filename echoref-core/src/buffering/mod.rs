//! Fixed-capacity circular playout buffer.
//!
//! Storage is a boxed slice of frame-sized slots, each behind its own
//! `parking_lot::Mutex`. The ingestion write and the scheduler read of the
//! same frame index therefore exclude each other without a buffer-wide lock,
//! and slots for different frames never contend.
//!
//! Every slot remembers which logical byte position its content belongs to,
//! whether real audio was written for that position, and whether the
//! scheduler has already played it. The underrun policy is decided from that
//! state while the slot lock is held, which closes the window between "the
//! scheduler played slot k" and "the playback cursor moved past k".

pub mod cursor;

use parking_lot::Mutex;

use crate::{
    audio::{silent_frame, Frame, BLOCK_SIZE},
    error::{EchoRefError, Result},
};

pub use cursor::{CursorSnapshot, Cursors};

/// Default capacity: 1500 frames = 15 s.
pub const DEFAULT_CAPACITY_FRAMES: usize = 1_500;

const BLOCK: u64 = BLOCK_SIZE as u64;

#[derive(Debug)]
struct Slot {
    data: Frame,
    /// Frame-aligned byte position the content belongs to.
    position: u64,
    /// Real audio was written for `position`.
    filled: bool,
    /// The scheduler has handed `position` to the sink.
    played: bool,
}

/// Result of an underrun-aware ingestion write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOutcome {
    /// Real audio stored ahead of playback.
    Real,
    /// Playback already passed this position; silence stored instead.
    Silenced,
    /// The slot already holds a later lap; nothing written.
    Expired,
}

/// Result of a scheduler read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOutcome {
    /// Real audio was present.
    Filled,
    /// Nothing arrived in time; silence was played and stored.
    Starved,
}

/// Slot-locked byte ring. Callers address it with monotonically increasing
/// positions; the modulo is internal.
#[derive(Debug)]
pub struct RingStorage {
    slots: Box<[Mutex<Slot>]>,
}

impl RingStorage {
    /// Allocate `capacity_frames` pre-zeroed slots.
    ///
    /// # Errors
    /// `EchoRefError::InvalidConfig` for a zero capacity.
    pub fn new(capacity_frames: usize) -> Result<Self> {
        if capacity_frames == 0 {
            return Err(EchoRefError::InvalidConfig(
                "buffer capacity must be at least one frame".into(),
            ));
        }
        let slots = (0..capacity_frames)
            .map(|i| {
                Mutex::new(Slot {
                    data: silent_frame(),
                    position: i as u64 * BLOCK,
                    filled: false,
                    played: false,
                })
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Ok(Self { slots })
    }

    pub fn capacity_frames(&self) -> usize {
        self.slots.len()
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.slots.len() as u64 * BLOCK
    }

    fn slot(&self, position: u64) -> &Mutex<Slot> {
        let idx = (position / BLOCK) % self.slots.len() as u64;
        &self.slots[idx as usize]
    }

    /// Raw write of one frame at `position mod capacity`.
    ///
    /// `position` must be frame-aligned.
    pub fn write(&self, position: u64, frame: &Frame) {
        debug_assert_eq!(position % BLOCK, 0, "unaligned frame write");
        let mut slot = self.slot(position).lock();
        slot.data.copy_from_slice(frame);
        slot.position = position;
        slot.filled = true;
        slot.played = false;
    }

    /// Raw read of `dst.len()` bytes starting at `position mod capacity`.
    /// May span slots and wrap.
    pub fn read(&self, position: u64, dst: &mut [u8]) {
        self.copy_out(position, dst, |_, _| true);
    }

    /// Underrun-aware ingestion write.
    ///
    /// `playback` loads the playback cursor; it is called with the slot lock
    /// held. The slot's own `played` flag covers a tick that has played the
    /// slot but not yet advanced the cursor.
    pub(crate) fn fill(
        &self,
        position: u64,
        frame: &Frame,
        playback: impl Fn() -> u64,
    ) -> FillOutcome {
        debug_assert_eq!(position % BLOCK, 0, "unaligned frame write");
        let mut slot = self.slot(position).lock();
        if slot.position > position {
            return FillOutcome::Expired;
        }
        let already_played = (slot.position == position && slot.played) || position < playback();
        if already_played {
            slot.data.fill(0);
            slot.position = position;
            slot.filled = false;
            slot.played = true;
            FillOutcome::Silenced
        } else {
            slot.data.copy_from_slice(frame);
            slot.position = position;
            slot.filled = true;
            slot.played = false;
            FillOutcome::Real
        }
    }

    /// Scheduler read of the frame at `position` into `out`, marking it played.
    ///
    /// A slot without real audio for `position` is cleared to silence first,
    /// so the stored content always matches what was played.
    pub(crate) fn play(&self, position: u64, out: &mut Frame) -> PlayOutcome {
        debug_assert_eq!(position % BLOCK, 0, "unaligned frame read");
        let mut slot = self.slot(position).lock();
        let starved = slot.position != position || !slot.filled;
        if starved {
            slot.data.fill(0);
            slot.position = position;
            slot.filled = false;
        }
        slot.played = true;
        out.copy_from_slice(&slot.data);
        if starved {
            PlayOutcome::Starved
        } else {
            PlayOutcome::Filled
        }
    }

    /// Copy already-played bytes. Returns `false` (with `dst` partially
    /// written) if any covered slot has been reused for a later lap.
    pub(crate) fn read_played(&self, position: u64, dst: &mut [u8]) -> bool {
        self.copy_out(position, dst, |slot, frame_start| {
            slot.position == frame_start && slot.played
        })
    }

    fn copy_out(&self, position: u64, dst: &mut [u8], accept: impl Fn(&Slot, u64) -> bool) -> bool {
        let mut pos = position;
        let mut copied = 0usize;
        while copied < dst.len() {
            let frame_start = pos - pos % BLOCK;
            let offset = (pos - frame_start) as usize;
            let take = (BLOCK_SIZE - offset).min(dst.len() - copied);
            let slot = self.slot(pos).lock();
            if !accept(&*slot, frame_start) {
                return false;
            }
            dst[copied..copied + take].copy_from_slice(&slot.data[offset..offset + take]);
            drop(slot);
            copied += take;
            pos += take as u64;
        }
        true
    }
}

/// The buffer plus its cursors, shared by every session worker.
#[derive(Debug)]
pub struct PlayoutBuffer {
    storage: RingStorage,
    cursors: Cursors,
}

impl PlayoutBuffer {
    pub fn new(capacity_frames: usize) -> Result<Self> {
        Ok(Self {
            storage: RingStorage::new(capacity_frames)?,
            cursors: Cursors::default(),
        })
    }

    pub fn storage(&self) -> &RingStorage {
        &self.storage
    }

    pub fn cursors(&self) -> &Cursors {
        &self.cursors
    }
}
