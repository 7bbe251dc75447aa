//! Frames in flight.
//!
//! With N frames in flight there are N slots. Each slot remembers the final
//! [`SyncPoint`] of the frame that used it last. Starting a frame waits for
//! the slot's previous frame, so the CPU never runs more than N frames ahead
//! of the device.
//!
//! ```text
//! frames_in_flight = 2
//!
//! Slot 0: [Frame 0] ──► [Frame 2] ──► [Frame 4] ──►
//! Slot 1: [Frame 1] ──► [Frame 3] ──► [Frame 5] ──►
//! ```
//!
//! Not thread-safe; owned by the scheduler facade.

use std::time::{Duration, Instant};

use crate::error::FrameResult;
use crate::scheduler::SyncPoint;

#[derive(Debug, Clone)]
struct SlotFrame {
    frame: u64,
    point: SyncPoint,
}

/// Tracks the final sync point of each frame slot.
#[derive(Debug)]
pub struct FramesInFlight {
    slots: Vec<Option<SlotFrame>>,
    current_slot: usize,
    frames_in_flight: usize,
    /// Highest frame index known to have completed on the device.
    completed: Option<u64>,
}

impl FramesInFlight {
    /// # Panics
    ///
    /// Panics if `frames_in_flight` is 0.
    pub fn new(frames_in_flight: usize) -> Self {
        assert!(frames_in_flight > 0, "frames_in_flight must be at least 1");
        Self {
            slots: vec![None; frames_in_flight],
            current_slot: 0,
            frames_in_flight,
            completed: None,
        }
    }

    /// Wait until the current slot is free.
    ///
    /// Returns the highest frame index now known to be complete.
    pub fn begin_frame(&mut self, timeout: Duration) -> FrameResult<Option<u64>> {
        if let Some(previous) = &self.slots[self.current_slot] {
            log::trace!(
                "Waiting for frame {} to free slot {}",
                previous.frame,
                self.current_slot
            );
            previous.point.wait(timeout)?;
            let frame = previous.frame;
            self.mark_completed(frame);
            self.slots[self.current_slot] = None;
        }
        Ok(self.poll_completed())
    }

    /// Record the final point of `frame` and advance to the next slot.
    pub fn end_frame(&mut self, frame: u64, point: SyncPoint) {
        log::trace!("End frame {frame} (slot {})", self.current_slot);
        self.slots[self.current_slot] = Some(SlotFrame { frame, point });
        self.current_slot = (self.current_slot + 1) % self.frames_in_flight;
    }

    /// Advance the completed frame index over every reached slot (non-blocking).
    pub fn poll_completed(&mut self) -> Option<u64> {
        let reached: Vec<u64> = self
            .slots
            .iter()
            .flatten()
            .filter(|slot| slot.point.is_reached())
            .map(|slot| slot.frame)
            .collect();
        for frame in reached {
            self.mark_completed(frame);
        }
        self.completed
    }

    /// Wait for every slot.
    pub fn wait_idle(&mut self, timeout: Duration) -> FrameResult<()> {
        let start = Instant::now();
        for slot in self.slots.iter().flatten() {
            let remaining = timeout.saturating_sub(start.elapsed());
            slot.point.wait(remaining)?;
        }
        let frames: Vec<u64> = self.slots.iter().flatten().map(|slot| slot.frame).collect();
        for frame in frames {
            self.mark_completed(frame);
        }
        self.slots.iter_mut().for_each(|slot| *slot = None);
        Ok(())
    }

    /// Forget every slot without waiting.
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.current_slot = 0;
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    pub fn current_slot(&self) -> usize {
        self.current_slot
    }

    pub fn completed_frame(&self) -> Option<u64> {
        self.completed
    }

    /// Whether no slot holds an unreached frame.
    pub fn is_idle(&self) -> bool {
        self.slots
            .iter()
            .all(|slot| slot.as_ref().is_none_or(|slot| slot.point.is_reached()))
    }

    fn mark_completed(&mut self, frame: u64) {
        if self.completed.is_none_or(|completed| frame > completed) {
            self.completed = Some(frame);
        }
    }
}

impl Default for FramesInFlight {
    fn default() -> Self {
        Self::new(2)
    }
}
