use std::fmt;

use crate::gpu::backend::Backend;
use crate::gpu::{QueueType, Result};

/// Logical queue: one native queue plus the timeline semaphore every
/// submission to it signals.
pub struct LogicalQueue<B: Backend> {
    queue_type: QueueType,
    /// Position among queues of the same type.
    index: usize,
    pub(crate) native: B::Queue,
    pub(crate) timeline: B::Semaphore,
    submitted: u64,
}

impl<B: Backend> LogicalQueue<B> {
    pub(crate) fn new(device: &mut B, queue_type: QueueType, index: usize) -> Result<Self> {
        let native = device.create_queue(queue_type, index)?;
        let timeline = device.create_semaphore(0)?;
        Ok(Self {
            queue_type,
            index,
            native,
            timeline,
            submitted: 0,
        })
    }

    pub fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Timeline value of the most recent submission.
    pub fn submitted(&self) -> u64 {
        self.submitted
    }

    pub(crate) fn next_value(&self) -> u64 {
        self.submitted + 1
    }

    pub(crate) fn advance(&mut self, value: u64) {
        debug_assert!(value > self.submitted);
        self.submitted = value;
    }

    pub(crate) fn completed(&self, device: &B) -> Result<u64> {
        device.semaphore_value(&self.timeline)
    }

    /// Blocks until every submission up to `value` has retired.
    pub(crate) fn wait_for(&self, device: &B, value: u64) -> Result<()> {
        if value == 0 {
            return Ok(());
        }
        device.wait_semaphore(&self.timeline, value, None)?;
        Ok(())
    }

    pub(crate) fn wait_idle(&self, device: &B) -> Result<()> {
        self.wait_for(device, self.submitted)
    }
}

impl<B: Backend> fmt::Debug for LogicalQueue<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogicalQueue")
            .field("queue_type", &self.queue_type)
            .field("index", &self.index)
            .field("submitted", &self.submitted)
            .finish()
    }
}
