//! Simulated device memory and queues.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use smallvec::SmallVec;

use super::encoder::{SoftOp, TextureTarget};
use crate::gpu::{GPUError, QueueType, Result};

/// When submitted work runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Work runs during `submit` as soon as its waits are satisfied.
    #[default]
    Immediate,
    /// Work runs only when driven through [`SoftwareGpu::complete_next`] or
    /// [`SoftwareGpu::complete_all`].
    Manual,
}

/// An executed operation, in execution order.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceEvent {
    pub queue: QueueType,
    pub queue_id: usize,
    pub op: SoftOp,
}

pub(crate) struct TextureMemory {
    pub mips: Vec<Vec<u8>>,
}

struct Submission {
    ops: Arc<[SoftOp]>,
    waits: SmallVec<[(u64, u64); 4]>,
    signals: SmallVec<[(u64, u64); 4]>,
}

struct QueueState {
    queue_type: QueueType,
    pending: VecDeque<Submission>,
}

#[derive(Default)]
pub(crate) struct GpuState {
    pub buffers: HashMap<u64, Vec<u8>>,
    pub textures: HashMap<u64, TextureMemory>,
    semaphores: HashMap<u64, u64>,
    queues: Vec<QueueState>,
    trace: Vec<TraceEvent>,
}

/// Shared simulation state. Tests keep an `Arc` to drive completion while a
/// [`Context`](crate::gpu::Context) owns the device.
pub struct SoftwareGpu {
    state: Mutex<GpuState>,
    signal: Condvar,
    mode: ExecutionMode,
}

impl SoftwareGpu {
    pub(crate) fn new(mode: ExecutionMode) -> Self {
        Self {
            state: Mutex::new(GpuState::default()),
            signal: Condvar::new(),
            mode,
        }
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, GpuState>> {
        self.state
            .lock()
            .map_err(|_| GPUError::Backend("software gpu state poisoned".into()))
    }

    pub(crate) fn add_queue(&self, queue_type: QueueType) -> Result<usize> {
        let mut state = self.lock()?;
        state.queues.push(QueueState {
            queue_type,
            pending: VecDeque::new(),
        });
        Ok(state.queues.len() - 1)
    }

    pub(crate) fn add_semaphore(&self, id: u64, value: u64) -> Result<()> {
        self.lock()?.semaphores.insert(id, value);
        Ok(())
    }

    pub(crate) fn remove_semaphore(&self, id: u64) -> Result<()> {
        self.lock()?.semaphores.remove(&id);
        Ok(())
    }

    pub fn semaphore_value(&self, id: u64) -> Result<u64> {
        self.lock()?
            .semaphores
            .get(&id)
            .copied()
            .ok_or(GPUError::InvalidHandle("semaphore"))
    }

    pub(crate) fn enqueue(
        &self,
        queue: usize,
        ops: Arc<[SoftOp]>,
        waits: SmallVec<[(u64, u64); 4]>,
        signals: SmallVec<[(u64, u64); 4]>,
    ) -> Result<()> {
        let mut state = self.lock()?;
        let q = state
            .queues
            .get_mut(queue)
            .ok_or(GPUError::InvalidHandle("queue"))?;
        q.pending.push_back(Submission {
            ops,
            waits,
            signals,
        });

        if self.mode == ExecutionMode::Immediate {
            let ran = Self::pump(&mut state)?;
            drop(state);
            if ran > 0 {
                self.signal.notify_all();
            }
        }
        Ok(())
    }

    /// Runs the oldest ready submission of the lowest-numbered queue that has
    /// one. Returns `false` if nothing could run.
    pub fn complete_next(&self) -> Result<bool> {
        let mut state = self.lock()?;
        let ran = Self::run_one(&mut state)?;
        drop(state);
        if ran {
            self.signal.notify_all();
        }
        Ok(ran)
    }

    /// Runs submissions until none is ready. Returns how many ran.
    pub fn complete_all(&self) -> Result<usize> {
        let mut state = self.lock()?;
        let ran = Self::pump(&mut state)?;
        drop(state);
        if ran > 0 {
            self.signal.notify_all();
        }
        Ok(ran)
    }

    pub fn pending_submissions(&self) -> Result<usize> {
        Ok(self.lock()?.queues.iter().map(|q| q.pending.len()).sum())
    }

    pub fn trace(&self) -> Result<Vec<TraceEvent>> {
        Ok(self.lock()?.trace.clone())
    }

    pub fn clear_trace(&self) -> Result<()> {
        self.lock()?.trace.clear();
        Ok(())
    }

    pub fn buffer_contents(&self, id: u64) -> Result<Vec<u8>> {
        self.lock()?
            .buffers
            .get(&id)
            .cloned()
            .ok_or(GPUError::InvalidHandle("buffer"))
    }

    pub fn texture_mip(&self, id: u64, mip: u32) -> Result<Vec<u8>> {
        self.lock()?
            .textures
            .get(&id)
            .and_then(|t| t.mips.get(mip as usize))
            .cloned()
            .ok_or(GPUError::InvalidHandle("texture"))
    }

    pub(crate) fn wait(&self, id: u64, value: u64, timeout: Option<Duration>) -> Result<bool> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.lock()?;
        loop {
            let current = state
                .semaphores
                .get(&id)
                .copied()
                .ok_or(GPUError::InvalidHandle("semaphore"))?;
            if current >= value {
                return Ok(true);
            }

            state = match deadline {
                None => self
                    .signal
                    .wait(state)
                    .map_err(|_| GPUError::Backend("software gpu state poisoned".into()))?,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(false);
                    }
                    self.signal
                        .wait_timeout(state, deadline - now)
                        .map_err(|_| GPUError::Backend("software gpu state poisoned".into()))?
                        .0
                }
            };
        }
    }

    /// Blocks until every queue is empty. In manual mode another thread has
    /// to drive completion.
    pub(crate) fn wait_idle(&self) -> Result<()> {
        let mut state = self.lock()?;
        while state.queues.iter().any(|q| !q.pending.is_empty()) {
            if self.mode == ExecutionMode::Immediate {
                // Whatever is left is blocked on a wait nothing will signal.
                return Err(GPUError::Backend("queues stalled on unsignaled waits".into()));
            }
            state = self
                .signal
                .wait(state)
                .map_err(|_| GPUError::Backend("software gpu state poisoned".into()))?;
        }
        Ok(())
    }

    fn pump(state: &mut GpuState) -> Result<usize> {
        let mut ran = 0;
        while Self::run_one(state)? {
            ran += 1;
        }
        Ok(ran)
    }

    fn run_one(state: &mut GpuState) -> Result<bool> {
        let ready = state.queues.iter().position(|q| {
            q.pending.front().map_or(false, |sub| {
                sub.waits
                    .iter()
                    .all(|(sem, v)| state.semaphores.get(sem).map_or(false, |cur| cur >= v))
            })
        });

        let Some(queue_id) = ready else {
            return Ok(false);
        };

        let queue_type = state.queues[queue_id].queue_type;
        let Some(sub) = state.queues[queue_id].pending.pop_front() else {
            return Ok(false);
        };

        for op in sub.ops.iter() {
            Self::execute(state, op)?;
            state.trace.push(TraceEvent {
                queue: queue_type,
                queue_id,
                op: op.clone(),
            });
        }

        for (sem, value) in sub.signals {
            let entry = state.semaphores.entry(sem).or_insert(0);
            *entry = (*entry).max(value);
        }

        log::trace!(target: "kombu::software", "retired submission on queue {}", queue_id);
        Ok(true)
    }

    fn execute(state: &mut GpuState, op: &SoftOp) -> Result<()> {
        match op {
            SoftOp::CopyBuffer {
                src,
                dst,
                src_offset,
                dst_offset,
                size,
            } => {
                let bytes = {
                    let src = state
                        .buffers
                        .get(src)
                        .ok_or(GPUError::InvalidHandle("buffer"))?;
                    let start = *src_offset as usize;
                    src.get(start..start + *size as usize)
                        .ok_or(GPUError::OutOfBounds {
                            offset: *src_offset,
                            size: *size,
                            capacity: src.len() as u64,
                        })?
                        .to_vec()
                };
                let dst_mem = state
                    .buffers
                    .get_mut(dst)
                    .ok_or(GPUError::InvalidHandle("buffer"))?;
                let capacity = dst_mem.len() as u64;
                let start = *dst_offset as usize;
                dst_mem
                    .get_mut(start..start + bytes.len())
                    .ok_or(GPUError::OutOfBounds {
                        offset: *dst_offset,
                        size: *size,
                        capacity,
                    })?
                    .copy_from_slice(&bytes);
            }
            SoftOp::CopyBufferToTexture {
                src,
                dst: TextureTarget::Texture(dst),
                regions,
            } => {
                for region in regions {
                    let bytes = {
                        let src = state
                            .buffers
                            .get(src)
                            .ok_or(GPUError::InvalidHandle("buffer"))?;
                        let start = region.buffer_offset as usize;
                        let len = region.byte_size() as usize;
                        src.get(start..start + len)
                            .ok_or(GPUError::OutOfBounds {
                                offset: region.buffer_offset,
                                size: len as u64,
                                capacity: src.len() as u64,
                            })?
                            .to_vec()
                    };
                    let tex = state
                        .textures
                        .get_mut(dst)
                        .ok_or(GPUError::InvalidHandle("texture"))?;
                    let mip = tex
                        .mips
                        .get_mut(region.mip_level as usize)
                        .ok_or(GPUError::InvalidHandle("texture mip"))?;
                    if mip.len() != bytes.len() {
                        return Err(GPUError::OutOfBounds {
                            offset: 0,
                            size: bytes.len() as u64,
                            capacity: mip.len() as u64,
                        });
                    }
                    mip.copy_from_slice(&bytes);
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn copy(src: u64, dst: u64, size: u64) -> SoftOp {
        SoftOp::CopyBuffer {
            src,
            dst,
            src_offset: 0,
            dst_offset: 0,
            size,
        }
    }

    #[test]
    fn manual_mode_holds_work_until_driven() {
        let gpu = SoftwareGpu::new(ExecutionMode::Manual);
        let q = gpu.add_queue(QueueType::Transfer).unwrap();
        gpu.add_semaphore(1, 0).unwrap();
        {
            let mut state = gpu.lock().unwrap();
            state.buffers.insert(10, vec![1, 2, 3, 4]);
            state.buffers.insert(11, vec![0; 4]);
        }

        gpu.enqueue(q, Arc::from(vec![copy(10, 11, 4)]), smallvec![], smallvec![(1, 1)])
            .unwrap();
        assert_eq!(gpu.semaphore_value(1).unwrap(), 0);
        assert_eq!(gpu.buffer_contents(11).unwrap(), vec![0; 4]);

        assert!(gpu.complete_next().unwrap());
        assert_eq!(gpu.semaphore_value(1).unwrap(), 1);
        assert_eq!(gpu.buffer_contents(11).unwrap(), vec![1, 2, 3, 4]);
        assert!(!gpu.complete_next().unwrap());
    }

    #[test]
    fn cross_queue_wait_orders_execution() {
        let gpu = SoftwareGpu::new(ExecutionMode::Manual);
        let a = gpu.add_queue(QueueType::Graphics).unwrap();
        let b = gpu.add_queue(QueueType::Compute).unwrap();
        gpu.add_semaphore(7, 0).unwrap();

        // Queue a waits on work queue b has not run yet.
        gpu.enqueue(a, Arc::from(vec![SoftOp::EndDebugMarker]), smallvec![(7, 1)], smallvec![])
            .unwrap();
        gpu.enqueue(
            b,
            Arc::from(vec![SoftOp::Dispatch { x: 1, y: 1, z: 1 }]),
            smallvec![],
            smallvec![(7, 1)],
        )
        .unwrap();

        assert_eq!(gpu.complete_all().unwrap(), 2);
        let trace = gpu.trace().unwrap();
        assert_eq!(trace[0].queue, QueueType::Compute);
        assert_eq!(trace[1].queue, QueueType::Graphics);
    }

    #[test]
    fn wait_times_out_without_signal() {
        let gpu = SoftwareGpu::new(ExecutionMode::Manual);
        gpu.add_semaphore(3, 0).unwrap();
        assert!(!gpu.wait(3, 1, Some(Duration::from_millis(10))).unwrap());
    }
}
