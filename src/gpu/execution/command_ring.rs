use smallvec::SmallVec;

use crate::gpu::cmd::CommandStream;
use crate::gpu::{GPUError, Result};
use crate::utils::{Handle, PerFrame};

/// Work owned by one frame-in-flight slot.
#[derive(Debug, Default, Clone)]
pub struct FrameSlot {
    /// Per-queue timeline values that must be reached before the slot is reused.
    pub queue_values: SmallVec<[u64; 4]>,
    /// Streams submitted while this slot was current.
    pub streams: Vec<Handle<CommandStream>>,
}

/// Ring of frame slots cycling through `frames_in_flight` entries.
///
/// Starting a frame hands back what the slot held from its previous use so
/// the caller can wait on it and recycle its streams.
pub struct FrameRing {
    slots: PerFrame<FrameSlot>,
    frame_number: u64,
    in_frame: bool,
}

impl FrameRing {
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            slots: PerFrame::new(frames_in_flight),
            frame_number: 0,
            in_frame: false,
        }
    }

    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Index of the slot being recorded.
    pub fn current_index(&self) -> usize {
        self.slots.curr_idx()
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn in_frame(&self) -> bool {
        self.in_frame
    }

    /// Opens the current slot and returns its previous contents.
    pub fn begin(&mut self) -> Result<FrameSlot> {
        if self.in_frame {
            return Err(GPUError::FrameState("start_frame called twice without end_frame"));
        }
        self.in_frame = true;
        Ok(std::mem::take(self.slots.curr_mut()))
    }

    /// Puts back a slot handed out by [`FrameRing::begin`] that could not be
    /// retired.
    pub fn restore(&mut self, slot: FrameSlot) {
        self.in_frame = false;
        *self.slots.curr_mut() = slot;
    }

    /// Moves `stream` into the current slot. A stream lives in at most one
    /// slot: the one holding its latest submission.
    pub fn track(&mut self, stream: Handle<CommandStream>) {
        if self.in_frame {
            self.forget(stream);
            self.slots.curr_mut().streams.push(stream);
        }
    }

    /// Records the values the slot must wait for and moves to the next slot.
    pub fn end(&mut self, queue_values: &[u64]) -> Result<()> {
        if !self.in_frame {
            return Err(GPUError::FrameState("end_frame called without start_frame"));
        }
        let slot = self.slots.curr_mut();
        slot.queue_values = queue_values.iter().copied().collect();
        self.slots.advance_next_frame();
        self.frame_number += 1;
        self.in_frame = false;
        Ok(())
    }

    /// Removes `stream` from every slot, e.g. when it is destroyed.
    pub fn forget(&mut self, stream: Handle<CommandStream>) {
        self.slots.for_each_mut(|slot| slot.streams.retain(|s| *s != stream));
    }

    /// Drains every slot's stream list; used when all queues are idle.
    pub fn drain_streams(&mut self) -> Vec<Handle<CommandStream>> {
        let mut out = Vec::new();
        self.slots.for_each_mut(|slot| {
            out.append(&mut slot.streams);
            slot.queue_values.clear();
        });
        out
    }
}
