use std::time::{Duration, Instant};

use rayon::prelude::*;
use smallvec::SmallVec;

use super::backend::{Backend, NativeDescriptor, NativeDescriptorWrite};
use super::cmd::{AuxSlice, CommandStream, CommandStreamInfo, StreamState};
use super::config::{ContextInfo, Reporter};
use super::driver::*;
use super::execution::{
    DeletionQueue, DispatchContext, DispatchTable, FrameRing, LogicalQueue, Retired,
};
use super::resources::*;
use super::*;
use crate::utils::{Handle, ResourceList};

struct StreamEntry<B: Backend> {
    stream: CommandStream,
    native: Option<B::CommandBuffer>,
    /// Queue index and timeline value of the last submission.
    submission: Option<(usize, u64)>,
}

/// Owns a backend device and everything recorded or created through it.
///
/// Resources are addressed through generational handles. Destroying one
/// releases the handle at once while the native object lives until every
/// queue has retired the work submitted before the destroy call.
pub struct Context<B: Backend> {
    device: B,
    info: ContextInfo,
    reporter: Reporter,
    table: DispatchTable<B::Encoder>,
    resources: Resources<B>,
    streams: ResourceList<StreamEntry<B>, CommandStream>,
    queues: Vec<LogicalQueue<B>>,
    frames: FrameRing,
    deletion: DeletionQueue<B>,
}

impl<B: Backend> Context<B> {
    pub fn new(mut device: B, info: &ContextInfo) -> Result<Self> {
        let reporter = Reporter::new(info.log_callback.clone());
        info.validate().map_err(|e| reporter.error("kombu::frame", e))?;

        let mut table = DispatchTable::empty();
        B::register_commands(&mut table);

        let mut queues = Vec::with_capacity(info.queues.len());
        for (i, qt) in info.queues.iter().enumerate() {
            let index = info.queues[..i].iter().filter(|t| *t == qt).count();
            let queue = LogicalQueue::new(&mut device, *qt, index)
                .map_err(|e| reporter.error("kombu::frame", e))?;
            queues.push(queue);
        }

        reporter.info(
            "kombu::frame",
            format_args!(
                "'{}' initialised on the {} backend: {} queues, {} frames in flight",
                info.application_name,
                device.name(),
                queues.len(),
                info.frames_in_flight
            ),
        );

        Ok(Self {
            device,
            info: info.clone(),
            reporter,
            table,
            resources: Resources::default(),
            streams: ResourceList::default(),
            queues,
            frames: FrameRing::new(info.frames_in_flight),
            deletion: DeletionQueue::default(),
        })
    }

    pub fn info(&self) -> &ContextInfo {
        &self.info
    }

    pub fn device(&self) -> &B {
        &self.device
    }

    pub fn resources(&self) -> &Resources<B> {
        &self.resources
    }

    /// Table used to translate streams at close time.
    pub fn dispatch_table(&self) -> &DispatchTable<B::Encoder> {
        &self.table
    }

    pub fn dispatch_table_mut(&mut self) -> &mut DispatchTable<B::Encoder> {
        &mut self.table
    }

    //===------------------------------------------------------------------===//
    // Queues
    //===------------------------------------------------------------------===//

    /// First queue of `queue_type`.
    pub fn queue(&self, queue_type: QueueType) -> Result<Handle<Queue>> {
        self.queues
            .iter()
            .position(|q| q.queue_type() == queue_type)
            .map(|idx| Handle::new(idx as u16, 1))
            .ok_or(GPUError::Unsupported("no queue of the requested type"))
    }

    pub fn queues_of(&self, queue_type: QueueType) -> Vec<Handle<Queue>> {
        self.queues
            .iter()
            .enumerate()
            .filter(|(_, q)| q.queue_type() == queue_type)
            .map(|(idx, _)| Handle::new(idx as u16, 1))
            .collect()
    }

    pub fn logical_queue(&self, queue: Handle<Queue>) -> Result<&LogicalQueue<B>> {
        Ok(&self.queues[self.queue_index(queue)?])
    }

    fn queue_index(&self, queue: Handle<Queue>) -> Result<usize> {
        let idx = queue.slot as usize;
        if queue.generation != 1 || idx >= self.queues.len() {
            return Err(GPUError::InvalidHandle("queue"));
        }
        Ok(idx)
    }

    /// Queue used for uploads: a transfer queue if there is one.
    fn upload_queue(&self) -> usize {
        self.queues
            .iter()
            .position(|q| q.queue_type() == QueueType::Transfer)
            .unwrap_or(0)
    }

    fn timeline_tokens(&self) -> SmallVec<[u64; 4]> {
        self.queues.iter().map(|q| q.submitted()).collect()
    }

    fn completed_values(&self) -> Result<SmallVec<[u64; 4]>> {
        self.queues
            .iter()
            .map(|q| q.completed(&self.device))
            .collect()
    }

    //===------------------------------------------------------------------===//
    // Command streams
    //===------------------------------------------------------------------===//

    pub fn create_command_stream(
        &mut self,
        info: &CommandStreamInfo,
    ) -> Result<Handle<CommandStream>> {
        let handle = insert(
            &mut self.streams,
            StreamEntry {
                stream: CommandStream::new(info),
                native: None,
                submission: None,
            },
        )?;
        log::debug!(
            target: "kombu::stream",
            "created {:?} stream {:?} ({} commands, {} aux bytes)",
            info.queue_type,
            handle,
            info.command_capacity,
            info.aux_bytes
        );
        Ok(handle)
    }

    /// Creates a stream sized by [`ContextInfo::default_stream`].
    pub fn create_default_command_stream(
        &mut self,
        queue_type: QueueType,
    ) -> Result<Handle<CommandStream>> {
        let info = CommandStreamInfo {
            queue_type,
            ..self.info.default_stream
        };
        self.create_command_stream(&info)
    }

    pub fn stream(&self, stream: Handle<CommandStream>) -> Result<&CommandStream> {
        self.streams
            .get_ref(stream)
            .map(|e| &e.stream)
            .ok_or(GPUError::InvalidHandle("command stream"))
    }

    pub fn stream_mut(&mut self, stream: Handle<CommandStream>) -> Result<&mut CommandStream> {
        self.streams
            .get_ref_mut(stream)
            .map(|e| &mut e.stream)
            .ok_or(GPUError::InvalidHandle("command stream"))
    }

    /// Appends a default-initialised `T` to `stream` for the caller to fill.
    pub fn add_command<T: Command>(&mut self, stream: Handle<CommandStream>) -> Result<&mut T> {
        self.stream_mut(stream)?.add_command::<T>()
    }

    pub fn record<T: Command>(&mut self, stream: Handle<CommandStream>, cmd: T) -> Result<()> {
        self.stream_mut(stream)?.record(cmd)
    }

    pub fn emplace_aux<T: Copy + Send + Sync + 'static>(
        &mut self,
        stream: Handle<CommandStream>,
        values: &[T],
    ) -> Result<AuxSlice<T>> {
        self.stream_mut(stream)?.emplace_aux(values)
    }

    pub fn emplace_aux_value<T: Copy + Send + Sync + 'static>(
        &mut self,
        stream: Handle<CommandStream>,
        value: T,
    ) -> Result<AuxSlice<T>> {
        self.stream_mut(stream)?.emplace_aux_value(value)
    }

    pub fn emplace_aux_size_only(
        &mut self,
        stream: Handle<CommandStream>,
        bytes: usize,
    ) -> Result<AuxSlice<u8>> {
        self.stream_mut(stream)?.emplace_aux_size_only(bytes)
    }

    pub fn aux_bytes_mut(
        &mut self,
        stream: Handle<CommandStream>,
        slice: AuxSlice<u8>,
    ) -> Result<&mut [u8]> {
        self.stream_mut(stream)?.aux_bytes_mut(slice)
    }

    /// Records several streams at once on the rayon pool. `f` receives the
    /// position of the stream in `streams` and exclusive access to it.
    pub fn record_parallel<F>(&mut self, streams: &[Handle<CommandStream>], f: F) -> Result<()>
    where
        F: Fn(usize, &mut CommandStream) -> Result<()> + Send + Sync,
    {
        let entries = self
            .streams
            .get_many_mut(streams)
            .ok_or(GPUError::InvalidHandle("command stream"))?;
        entries
            .into_par_iter()
            .enumerate()
            .try_for_each(|(i, entry)| f(i, &mut entry.stream))
    }

    /// Translates each stream into a native command buffer in recorded
    /// order. Streams before a failing one stay closed.
    pub fn close_command_streams(&mut self, streams: &[Handle<CommandStream>]) -> Result<()> {
        for handle in streams {
            let entry = self
                .streams
                .get_ref_mut(*handle)
                .ok_or(GPUError::InvalidHandle("command stream"))?;
            entry.stream.begin_close()?;

            let queue_type = entry.stream.queue_type();
            let mut encoder = self.device.begin_encoding(queue_type)?;
            let ctx = DispatchContext::new(&self.resources, entry.stream.aux(), queue_type);
            let count = match self.table.execute(&mut encoder, &entry.stream, &ctx) {
                Ok(count) => count,
                Err(err) => {
                    self.device.discard_encoding(encoder);
                    return Err(self.reporter.error("kombu::stream", err));
                }
            };

            let native = self
                .device
                .finish_encoding(encoder)
                .map_err(|e| self.reporter.error("kombu::stream", e))?;
            if let Some(old) = entry.native.replace(native) {
                self.device.recycle_command_buffer(old);
            }
            entry.stream.mark_closed();

            log::trace!(
                target: "kombu::stream",
                "closed stream {:?}: {} commands",
                handle,
                count
            );
        }
        Ok(())
    }

    /// Submits closed streams to `queue` in array order and returns the
    /// queue timeline value that marks their completion.
    pub fn submit_command_streams(
        &mut self,
        queue: Handle<Queue>,
        streams: &[Handle<CommandStream>],
        info: &SubmitInfo,
    ) -> Result<u64> {
        let qidx = self.queue_index(queue)?;
        let queue_type = self.queues[qidx].queue_type();

        for (i, handle) in streams.iter().enumerate() {
            let entry = self
                .streams
                .get_ref(*handle)
                .ok_or(GPUError::InvalidHandle("command stream"))?;
            let state = entry.stream.state();
            if state != StreamState::Closed || streams[..i].contains(handle) {
                return Err(GPUError::InvalidStreamState {
                    operation: "submit",
                    state,
                });
            }
            if !queue_type.accepts(entry.stream.queue_type()) {
                return Err(GPUError::IncompatibleQueue {
                    stream: entry.stream.queue_type(),
                    queue: queue_type,
                });
            }
        }

        for wait in info.wait {
            let sem = self.resources.semaphore(wait.semaphore)?;
            if wait.value > sem.pending_value {
                return Err(GPUError::SemaphoreNeverSignaled {
                    requested: wait.value,
                    pending: sem.pending_value,
                });
            }
        }

        let mut accepted: SmallVec<[SemaphoreValue; 4]> = SmallVec::new();
        for signal in info.signal {
            let sem = self.resources.semaphore(signal.semaphore)?;
            let current = accepted
                .iter()
                .filter(|s| s.semaphore == signal.semaphore)
                .map(|s| s.value)
                .max()
                .unwrap_or(sem.pending_value);
            if signal.value <= current {
                return Err(GPUError::NonMonotonicSignal {
                    current,
                    requested: signal.value,
                });
            }
            accepted.push(*signal);
        }

        let value = self.queues[qidx].next_value();
        {
            let q = &self.queues[qidx];
            let mut buffers = Vec::with_capacity(streams.len());
            for handle in streams {
                let native = self
                    .streams
                    .get_ref(*handle)
                    .and_then(|e| e.native.as_ref())
                    .ok_or(GPUError::InvalidHandle("command stream"))?;
                buffers.push(native);
            }

            let mut waits = Vec::with_capacity(info.wait.len());
            for wait in info.wait {
                waits.push((&self.resources.semaphore(wait.semaphore)?.native, wait.value));
            }
            let mut signals = Vec::with_capacity(info.signal.len() + 1);
            for signal in info.signal {
                signals.push((
                    &self.resources.semaphore(signal.semaphore)?.native,
                    signal.value,
                ));
            }
            signals.push((&q.timeline, value));

            if let Err(err) = self.device.submit(&q.native, &buffers, &waits, &signals) {
                return Err(self.reporter.error("kombu::submit", err));
            }
        }

        self.queues[qidx].advance(value);
        for signal in &accepted {
            self.resources.semaphore_mut(signal.semaphore)?.pending_value = signal.value;
        }
        for handle in streams {
            if let Some(entry) = self.streams.get_ref_mut(*handle) {
                entry.stream.mark_submitted()?;
                entry.submission = Some((qidx, value));
            }
            self.frames.track(*handle);
        }

        log::debug!(
            target: "kombu::submit",
            "{:?} queue {}: {} streams, timeline value {}, {} waits, {} signals",
            queue_type,
            self.queues[qidx].index(),
            streams.len(),
            value,
            info.wait.len(),
            info.signal.len()
        );
        Ok(value)
    }

    /// Rewinds a stream for re-recording. A submitted stream is retired
    /// first if its queue has completed it.
    pub fn reset_command_stream(&mut self, stream: Handle<CommandStream>) -> Result<()> {
        let entry = self
            .streams
            .get_ref_mut(stream)
            .ok_or(GPUError::InvalidHandle("command stream"))?;
        if entry.stream.state() == StreamState::Submitted {
            if let Some((qidx, value)) = entry.submission {
                if self.queues[qidx].completed(&self.device)? >= value {
                    entry.stream.mark_retired();
                }
            }
        }
        entry.stream.reset()
    }

    pub fn destroy_command_stream(&mut self, stream: Handle<CommandStream>) -> Result<()> {
        let entry = self
            .streams
            .release(stream)
            .ok_or(GPUError::InvalidHandle("command stream"))?;
        self.frames.forget(stream);

        if let Some(native) = entry.native {
            let busy = match entry.submission {
                Some((qidx, value)) => self.queues[qidx].completed(&self.device)? < value,
                None => false,
            };
            if busy {
                let tokens = self.timeline_tokens();
                self.deletion.push(&tokens, Retired::CommandBuffer(native));
            } else {
                self.device.recycle_command_buffer(native);
            }
        }
        Ok(())
    }

    //===------------------------------------------------------------------===//
    // Frames
    //===------------------------------------------------------------------===//

    /// Opens the next frame slot.
    ///
    /// Blocks until the GPU has retired the work submitted the last time this
    /// slot was used, then resets the streams submitted in it, releases
    /// deferred objects and acquires an image on every swapchain.
    pub fn start_frame(&mut self) -> Result<usize> {
        let slot = self.frames.begin()?;

        let started = Instant::now();
        let values = slot.queue_values.clone();
        for (qidx, value) in values.iter().enumerate() {
            if let Some(queue) = self.queues.get(qidx) {
                if let Err(err) = queue.wait_for(&self.device, *value) {
                    self.frames.restore(slot);
                    return Err(self.reporter.error("kombu::frame", err));
                }
            }
        }
        let waited = started.elapsed();
        if waited > Duration::from_millis(1) {
            log::trace!(
                target: "kombu::frame",
                "waited {:?} for frame slot {}",
                waited,
                self.frames.current_index()
            );
        }

        // Only streams whose latest submission has retired are rewound. A
        // stream reset and resubmitted since then belongs to a newer slot.
        for handle in slot.streams {
            let Some(entry) = self.streams.get_ref_mut(handle) else {
                continue;
            };
            let Some((qidx, value)) = entry.submission else {
                continue;
            };
            if entry.stream.state() != StreamState::Submitted
                || self.queues[qidx].completed(&self.device)? < value
            {
                continue;
            }
            entry.stream.mark_retired();
            entry.stream.reset()?;
        }

        self.collect_retired()?;

        for (handle, entry) in self.resources.swapchains.iter_mut() {
            match self.device.acquire_next_image(&mut entry.native) {
                Ok(image) => entry.current_image = Some(image),
                Err(GPUError::SwapchainOutOfDate) => {
                    entry.current_image = None;
                    self.reporter.warn(
                        "kombu::frame",
                        format_args!("swapchain {:?} is out of date", handle),
                    );
                }
                Err(err) => return Err(self.reporter.error("kombu::frame", err)),
            }
        }

        Ok(self.frames.current_index())
    }

    /// Closes the current frame slot, remembering how far every queue has
    /// been submitted.
    pub fn end_frame(&mut self) -> Result<()> {
        let values = self.timeline_tokens();
        self.frames.end(&values)
    }

    /// Presents the image acquired by the last [`Context::start_frame`] once
    /// every graphics submission so far has completed.
    pub fn present(&mut self, swapchain: Handle<Swapchain>) -> Result<()> {
        let qidx = self
            .queues
            .iter()
            .position(|q| q.queue_type() == QueueType::Graphics)
            .ok_or(GPUError::Unsupported("presenting requires a graphics queue"))?;
        let queue = &self.queues[qidx];

        let entry = self.resources.swapchain_mut(swapchain)?;
        let image = entry.current_image()?;
        let mut waits = SmallVec::<[(&B::Semaphore, u64); 1]>::new();
        if queue.submitted() > 0 {
            waits.push((&queue.timeline, queue.submitted()));
        }

        let result = self
            .device
            .present(&queue.native, &mut entry.native, image, &waits);
        entry.current_image = None;
        match result {
            Err(GPUError::SwapchainOutOfDate) => {
                self.reporter.warn(
                    "kombu::frame",
                    format_args!("swapchain {:?} is out of date", swapchain),
                );
                Err(GPUError::SwapchainOutOfDate)
            }
            other => other,
        }
    }

    /// Index of the current frame-in-flight slot.
    pub fn frame_index(&self) -> usize {
        self.frames.current_index()
    }

    /// Number of frames ended so far.
    pub fn frame_number(&self) -> u64 {
        self.frames.frame_number()
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames.frames_in_flight()
    }

    //===------------------------------------------------------------------===//
    // Semaphores
    //===------------------------------------------------------------------===//

    pub fn create_semaphore(&mut self, initial_value: u64) -> Result<Handle<Semaphore>> {
        let native = self.device.create_semaphore(initial_value)?;
        insert(
            &mut self.resources.semaphores,
            SemaphoreEntry {
                native,
                pending_value: initial_value,
            },
        )
    }

    pub fn destroy_semaphore(&mut self, semaphore: Handle<Semaphore>) -> Result<()> {
        let entry = self
            .resources
            .semaphores
            .release(semaphore)
            .ok_or(GPUError::InvalidHandle("semaphore"))?;
        let tokens = self.timeline_tokens();
        self.deletion.push(&tokens, Retired::Semaphore(entry.native));
        Ok(())
    }

    /// Current counter value, without blocking.
    pub fn semaphore_value(&self, semaphore: Handle<Semaphore>) -> Result<u64> {
        let entry = self.resources.semaphore(semaphore)?;
        self.device.semaphore_value(&entry.native)
    }

    /// Blocks until `semaphore` reaches `value`.
    ///
    /// Fails instead of blocking forever when no submission so far signals
    /// the semaphore that high.
    pub fn wait_for_semaphore(&self, semaphore: Handle<Semaphore>, value: u64) -> Result<()> {
        let entry = self.resources.semaphore(semaphore)?;
        if value > entry.pending_value {
            return Err(GPUError::SemaphoreNeverSignaled {
                requested: value,
                pending: entry.pending_value,
            });
        }
        self.device.wait_semaphore(&entry.native, value, None)?;
        Ok(())
    }

    /// Like [`Context::wait_for_semaphore`] but gives up after `timeout`.
    /// Returns whether the value was reached.
    pub fn wait_for_semaphore_timeout(
        &self,
        semaphore: Handle<Semaphore>,
        value: u64,
        timeout: Duration,
    ) -> Result<bool> {
        let entry = self.resources.semaphore(semaphore)?;
        if value > entry.pending_value {
            return Err(GPUError::SemaphoreNeverSignaled {
                requested: value,
                pending: entry.pending_value,
            });
        }
        self.device.wait_semaphore(&entry.native, value, Some(timeout))
    }

    //===------------------------------------------------------------------===//
    // Buffers
    //===------------------------------------------------------------------===//

    /// Creates a buffer. Initial data is written directly into host-visible
    /// heaps and staged through the upload queue otherwise.
    pub fn create_buffer(&mut self, info: &BufferInfo) -> Result<Handle<Buffer>> {
        if let Some(data) = info.initial_data {
            if data.len() as u64 > info.byte_size {
                return Err(GPUError::OutOfBounds {
                    offset: 0,
                    size: data.len() as u64,
                    capacity: info.byte_size,
                });
            }
        }

        let native = self
            .device
            .create_buffer(info)
            .map_err(|e| self.reporter.error("kombu::stream", e))?;
        let entry = BufferEntry {
            native,
            size: info.byte_size,
            heap: info.heap,
            usage: info.usage,
            debug_name: info.debug_name.to_string(),
        };
        let handle = match self.resources.buffers.push(entry) {
            Some(h) => h,
            None => return Err(GPUError::SlotError()),
        };

        if let Some(data) = info.initial_data.filter(|d| !d.is_empty()) {
            let uploaded = if info.heap.host_visible() {
                self.write_buffer(handle, 0, data)
            } else {
                self.upload(&[data], |stream, staging| {
                    stream.record(CmdCopyBuffer {
                        src: staging,
                        dst: handle,
                        size: data.len() as u64,
                        ..Default::default()
                    })
                })
            };
            if let Err(err) = uploaded {
                self.destroy_buffer(handle)?;
                return Err(err);
            }
        }

        Ok(handle)
    }

    pub fn destroy_buffer(&mut self, buffer: Handle<Buffer>) -> Result<()> {
        let entry = self
            .resources
            .buffers
            .release(buffer)
            .ok_or(GPUError::InvalidHandle("buffer"))?;
        let tokens = self.timeline_tokens();
        self.deletion.push(&tokens, Retired::Buffer(entry.native));
        Ok(())
    }

    /// Writes into a host-visible buffer. The caller must ensure the GPU is
    /// not reading the range.
    pub fn write_buffer(&mut self, buffer: Handle<Buffer>, offset: u64, data: &[u8]) -> Result<()> {
        let entry = self.resources.buffer(buffer)?;
        if !entry.heap.host_visible() {
            return Err(GPUError::HostAccessDenied(entry.heap));
        }
        entry.check_range(offset, data.len() as u64)?;
        self.device.write_buffer(&entry.native, offset, data)
    }

    pub fn read_buffer(&self, buffer: Handle<Buffer>, offset: u64, out: &mut [u8]) -> Result<()> {
        let entry = self.resources.buffer(buffer)?;
        if !entry.heap.host_visible() {
            return Err(GPUError::HostAccessDenied(entry.heap));
        }
        entry.check_range(offset, out.len() as u64)?;
        self.device.read_buffer(&entry.native, offset, out)
    }

    //===------------------------------------------------------------------===//
    // Textures and samplers
    //===------------------------------------------------------------------===//

    /// Creates a texture and uploads any initial mips through a transfer
    /// stream, waiting for the copy to finish.
    pub fn create_texture(&mut self, info: &TextureInfo) -> Result<Handle<Texture>> {
        let bpp = info.format.bytes_per_pixel();
        if info.initial_data.len() > info.mip_levels as usize {
            return Err(GPUError::Configuration(format!(
                "texture '{}' has {} mip levels but {} initial mips",
                info.debug_name,
                info.mip_levels,
                info.initial_data.len()
            )));
        }
        for (mip, data) in info.initial_data.iter().enumerate() {
            let width = (info.width >> mip).max(1);
            let height = (info.height >> mip).max(1);
            if data.width != width
                || data.height != height
                || data.bytes_per_pixel != bpp
                || data.data.len() as u64 != data.byte_size()
            {
                return Err(GPUError::Configuration(format!(
                    "mip {} of texture '{}' does not match a {}x{} {:?} level",
                    mip, info.debug_name, width, height, info.format
                )));
            }
        }

        let native = self
            .device
            .create_texture(info)
            .map_err(|e| self.reporter.error("kombu::stream", e))?;
        let entry = TextureEntry {
            native,
            width: info.width,
            height: info.height,
            mip_levels: info.mip_levels,
            format: info.format,
            usage: info.usage,
            debug_name: info.debug_name.to_string(),
        };
        let handle = match self.resources.textures.push(entry) {
            Some(h) => h,
            None => return Err(GPUError::SlotError()),
        };

        if !info.initial_data.is_empty() {
            let mips: Vec<&[u8]> = info.initial_data.iter().map(|m| m.data).collect();
            let mut regions = Vec::with_capacity(mips.len());
            let mut offset = 0u64;
            for (mip, data) in info.initial_data.iter().enumerate() {
                regions.push(TextureBufferRegion {
                    buffer_offset: offset,
                    width: data.width,
                    height: data.height,
                    bytes_per_pixel: data.bytes_per_pixel,
                    mip_level: mip as u32,
                });
                offset += data.byte_size();
            }
            let range = SubresourceRange::mips(0, regions.len() as u32);

            let uploaded = self.upload(&mips, |stream, staging| {
                let to_copy = stream.emplace_aux_value(TextureBarrier {
                    texture: handle,
                    current: ResourceState::Undefined,
                    new: ResourceState::CopyDst,
                    range,
                    ..Default::default()
                })?;
                stream.record(CmdBarrier {
                    texture_barriers: to_copy,
                    ..Default::default()
                })?;

                let mips = stream.emplace_aux(&regions)?;
                stream.record(CmdCopyBufferToTexture2D {
                    source: staging,
                    destination: handle,
                    mips,
                })?;

                let to_read = stream.emplace_aux_value(TextureBarrier {
                    texture: handle,
                    current: ResourceState::CopyDst,
                    new: ResourceState::ShaderRead,
                    range,
                    ..Default::default()
                })?;
                stream.record(CmdBarrier {
                    texture_barriers: to_read,
                    ..Default::default()
                })
            });
            if let Err(err) = uploaded {
                self.destroy_texture(handle)?;
                return Err(err);
            }
        }

        Ok(handle)
    }

    pub fn destroy_texture(&mut self, texture: Handle<Texture>) -> Result<()> {
        let entry = self
            .resources
            .textures
            .release(texture)
            .ok_or(GPUError::InvalidHandle("texture"))?;
        let tokens = self.timeline_tokens();
        self.deletion.push(&tokens, Retired::Texture(entry.native));
        Ok(())
    }

    pub fn create_sampler(&mut self, info: &SamplerInfo) -> Result<Handle<Sampler>> {
        let native = self.device.create_sampler(info)?;
        insert(
            &mut self.resources.samplers,
            SamplerEntry {
                native,
                info: *info,
            },
        )
    }

    pub fn destroy_sampler(&mut self, sampler: Handle<Sampler>) -> Result<()> {
        let entry = self
            .resources
            .samplers
            .release(sampler)
            .ok_or(GPUError::InvalidHandle("sampler"))?;
        let tokens = self.timeline_tokens();
        self.deletion.push(&tokens, Retired::Sampler(entry.native));
        Ok(())
    }

    /// Copies `data` into a staging buffer, lets `record` fill a transfer
    /// stream reading from it, and waits for the copy to retire.
    fn upload<F>(&mut self, data: &[&[u8]], record: F) -> Result<()>
    where
        F: FnOnce(&mut CommandStream, Handle<Buffer>) -> Result<()>,
    {
        let size: u64 = data.iter().map(|d| d.len() as u64).sum();
        let staging = self.create_buffer(&BufferInfo {
            debug_name: "staging",
            byte_size: size,
            heap: HeapType::Upload,
            usage: BufferUsage::COPY_SRC,
            initial_data: None,
        })?;
        let stream = match self.create_command_stream(&CommandStreamInfo {
            queue_type: QueueType::Transfer,
            command_capacity: 16,
            per_type_bytes: 512,
            aux_bytes: 1024,
            growable: true,
        }) {
            Ok(stream) => stream,
            Err(err) => {
                self.destroy_buffer(staging)?;
                return Err(err);
            }
        };

        let result = self.run_upload(data, staging, stream, record);

        self.destroy_command_stream(stream)?;
        self.destroy_buffer(staging)?;
        self.collect_retired()?;
        result
    }

    fn run_upload<F>(
        &mut self,
        data: &[&[u8]],
        staging: Handle<Buffer>,
        stream: Handle<CommandStream>,
        record: F,
    ) -> Result<()>
    where
        F: FnOnce(&mut CommandStream, Handle<Buffer>) -> Result<()>,
    {
        let mut offset = 0;
        for chunk in data {
            self.write_buffer(staging, offset, chunk)?;
            offset += chunk.len() as u64;
        }

        record(self.stream_mut(stream)?, staging)?;
        self.close_command_streams(&[stream])?;

        let qidx = self.upload_queue();
        let queue = Handle::new(qidx as u16, 1);
        let value = self.submit_command_streams(queue, &[stream], &SubmitInfo::default())?;
        self.queues[qidx].wait_for(&self.device, value)
    }

    //===------------------------------------------------------------------===//
    // Pipelines and descriptors
    //===------------------------------------------------------------------===//

    pub fn create_pipeline_layout(
        &mut self,
        info: &PipelineLayoutInfo,
    ) -> Result<Handle<PipelineLayout>> {
        let native = self
            .device
            .create_pipeline_layout(info)
            .map_err(|e| self.reporter.error("kombu::stream", e))?;
        insert(
            &mut self.resources.pipeline_layouts,
            PipelineLayoutEntry {
                native,
                bindings: info.bindings.to_vec(),
                push_constant_size: info.push_constant_size,
                debug_name: info.debug_name.to_string(),
            },
        )
    }

    pub fn destroy_pipeline_layout(&mut self, layout: Handle<PipelineLayout>) -> Result<()> {
        let entry = self
            .resources
            .pipeline_layouts
            .release(layout)
            .ok_or(GPUError::InvalidHandle("pipeline layout"))?;
        let tokens = self.timeline_tokens();
        self.deletion
            .push(&tokens, Retired::PipelineLayout(entry.native));
        Ok(())
    }

    /// Builds the pipeline for `info`. Without an explicit pipeline layout
    /// one is generated from the reflected [`ShaderLayout`] and destroyed
    /// together with the shader.
    pub fn create_shader(&mut self, info: &ShaderInfo) -> Result<Handle<Shader>> {
        let (layout, owns_layout) = match info.pipeline_layout {
            Some(layout) => {
                self.resources.pipeline_layout(layout)?;
                (layout, false)
            }
            None => {
                let layout = self.create_pipeline_layout(&PipelineLayoutInfo {
                    debug_name: info.debug_name,
                    bindings: &info.layout.bindings,
                    push_constant_size: info.layout.push_constant_size,
                })?;
                (layout, true)
            }
        };

        let created = {
            let layout_entry = self.resources.pipeline_layout(layout)?;
            self.device.create_shader(info, &layout_entry.native)
        };
        let native = match created {
            Ok(native) => native,
            Err(err) => {
                if owns_layout {
                    self.destroy_pipeline_layout(layout)?;
                }
                return Err(self.reporter.error("kombu::stream", err));
            }
        };

        insert(
            &mut self.resources.shaders,
            ShaderEntry {
                native,
                layout,
                owns_layout,
                stages: info.stages.iter().map(|s| s.stage).collect(),
                debug_name: info.debug_name.to_string(),
            },
        )
    }

    /// Pipeline layout a shader was built against; descriptor sets bound
    /// with the shader must come from it.
    pub fn shader_pipeline_layout(&self, shader: Handle<Shader>) -> Result<Handle<PipelineLayout>> {
        Ok(self.resources.shader(shader)?.layout)
    }

    pub fn destroy_shader(&mut self, shader: Handle<Shader>) -> Result<()> {
        let entry = self
            .resources
            .shaders
            .release(shader)
            .ok_or(GPUError::InvalidHandle("shader"))?;
        let tokens = self.timeline_tokens();
        self.deletion.push(&tokens, Retired::Shader(entry.native));
        if entry.owns_layout {
            self.destroy_pipeline_layout(entry.layout)?;
        }
        Ok(())
    }

    pub fn create_descriptor_set(&mut self, info: &DescriptorSetInfo) -> Result<Handle<DescriptorSet>> {
        let layout = self.resources.pipeline_layout(info.layout)?;
        let native = self
            .device
            .create_descriptor_set(&layout.native, info.set)
            .map_err(|e| self.reporter.error("kombu::stream", e))?;
        insert(
            &mut self.resources.descriptor_sets,
            DescriptorSetEntry {
                native,
                layout: info.layout,
                set: info.set,
                debug_name: info.debug_name.to_string(),
            },
        )
    }

    /// Points bindings of `set` at resources. Every write is checked against
    /// the set's layout before anything reaches the backend.
    pub fn update_descriptor_set(
        &mut self,
        set: Handle<DescriptorSet>,
        writes: &[DescriptorWrite],
    ) -> Result<()> {
        let (layout, set_index) = {
            let entry = self.resources.descriptor_set(set)?;
            (entry.layout, entry.set)
        };
        let bindings = &self
            .resources
            .pipeline_layouts
            .get_ref(layout)
            .ok_or(GPUError::InvalidHandle("pipeline layout"))?
            .bindings;

        let mut native = Vec::with_capacity(writes.len());
        for write in writes {
            let binding = bindings
                .iter()
                .find(|b| b.set == set_index && b.binding == write.binding)
                .ok_or_else(|| {
                    GPUError::Configuration(format!(
                        "set {} has no binding {}",
                        set_index, write.binding
                    ))
                })?;
            if write.array_element >= binding.count.max(1) {
                return Err(GPUError::OutOfBounds {
                    offset: write.array_element as u64,
                    size: 1,
                    capacity: binding.count.max(1) as u64,
                });
            }

            let resource = match write.resource {
                DescriptorResource::Buffer {
                    buffer,
                    offset,
                    size,
                } if matches!(
                    binding.kind,
                    BindingKind::UniformBuffer | BindingKind::StorageBuffer
                ) =>
                {
                    let entry = self
                        .resources
                        .buffers
                        .get_ref(buffer)
                        .ok_or(GPUError::InvalidHandle("buffer"))?;
                    let size = if size == 0 {
                        entry.size.saturating_sub(offset)
                    } else {
                        size
                    };
                    entry.check_range(offset, size)?;
                    NativeDescriptor::Buffer {
                        buffer: &entry.native,
                        offset,
                        size,
                    }
                }
                DescriptorResource::Texture(texture)
                    if matches!(
                        binding.kind,
                        BindingKind::SampledTexture | BindingKind::StorageTexture
                    ) =>
                {
                    NativeDescriptor::Texture(
                        &self
                            .resources
                            .textures
                            .get_ref(texture)
                            .ok_or(GPUError::InvalidHandle("texture"))?
                            .native,
                    )
                }
                DescriptorResource::Sampler(sampler) if binding.kind == BindingKind::Sampler => {
                    NativeDescriptor::Sampler(
                        &self
                            .resources
                            .samplers
                            .get_ref(sampler)
                            .ok_or(GPUError::InvalidHandle("sampler"))?
                            .native,
                    )
                }
                DescriptorResource::TextureSampler(texture, sampler)
                    if binding.kind == BindingKind::CombinedTextureSampler =>
                {
                    NativeDescriptor::TextureSampler(
                        &self
                            .resources
                            .textures
                            .get_ref(texture)
                            .ok_or(GPUError::InvalidHandle("texture"))?
                            .native,
                        &self
                            .resources
                            .samplers
                            .get_ref(sampler)
                            .ok_or(GPUError::InvalidHandle("sampler"))?
                            .native,
                    )
                }
                _ => {
                    return Err(GPUError::Configuration(format!(
                        "binding {} of set {} is {:?}",
                        write.binding, set_index, binding.kind
                    )))
                }
            };
            native.push(NativeDescriptorWrite {
                binding: write.binding,
                array_element: write.array_element,
                resource,
            });
        }

        let entry = self
            .resources
            .descriptor_sets
            .get_ref_mut(set)
            .ok_or(GPUError::InvalidHandle("descriptor set"))?;
        self.device.update_descriptor_set(&mut entry.native, &native)
    }

    pub fn destroy_descriptor_set(&mut self, set: Handle<DescriptorSet>) -> Result<()> {
        let entry = self
            .resources
            .descriptor_sets
            .release(set)
            .ok_or(GPUError::InvalidHandle("descriptor set"))?;
        let tokens = self.timeline_tokens();
        self.deletion
            .push(&tokens, Retired::DescriptorSet(entry.native));
        Ok(())
    }

    //===------------------------------------------------------------------===//
    // Swapchains
    //===------------------------------------------------------------------===//

    pub fn create_swapchain(&mut self, info: &SwapchainInfo) -> Result<Handle<Swapchain>> {
        let native = self
            .device
            .create_swapchain(info)
            .map_err(|e| self.reporter.error("kombu::frame", e))?;
        let image_count = self.device.swapchain_image_count(&native);
        insert(
            &mut self.resources.swapchains,
            SwapchainEntry {
                native,
                extent: info.extent,
                format: info.format,
                image_count,
                current_image: None,
            },
        )
    }

    /// Rebuilds a swapchain, e.g. after a resize. Waits for every queue to
    /// go idle first.
    pub fn recreate_swapchain(
        &mut self,
        swapchain: Handle<Swapchain>,
        info: &SwapchainInfo,
    ) -> Result<()> {
        for queue in &self.queues {
            queue.wait_idle(&self.device)?;
        }

        let entry = self.resources.swapchain_mut(swapchain)?;
        self.device
            .recreate_swapchain(&mut entry.native, info)
            .map_err(|e| self.reporter.error("kombu::frame", e))?;
        entry.extent = info.extent;
        entry.format = info.format;
        entry.image_count = self.device.swapchain_image_count(&entry.native);
        entry.current_image = None;

        self.reporter.info(
            "kombu::frame",
            format_args!(
                "swapchain {:?} recreated at {}x{}",
                swapchain, info.extent.width, info.extent.height
            ),
        );
        Ok(())
    }

    pub fn destroy_swapchain(&mut self, swapchain: Handle<Swapchain>) -> Result<()> {
        let entry = self
            .resources
            .swapchains
            .release(swapchain)
            .ok_or(GPUError::InvalidHandle("swapchain"))?;
        let tokens = self.timeline_tokens();
        self.deletion.push(&tokens, Retired::Swapchain(entry.native));
        Ok(())
    }

    //===------------------------------------------------------------------===//
    // Teardown
    //===------------------------------------------------------------------===//

    /// Objects whose destruction is still waiting on the GPU.
    pub fn pending_destructions(&self) -> usize {
        self.deletion.len()
    }

    fn collect_retired(&mut self) -> Result<()> {
        if self.deletion.is_empty() {
            return Ok(());
        }
        let completed = self.completed_values()?;
        let ready = self.deletion.collect(&completed);
        if !ready.is_empty() {
            log::trace!(target: "kombu::frame", "releasing {} retired objects", ready.len());
        }
        for object in ready {
            object.release(&mut self.device);
        }
        Ok(())
    }

    /// Waits for every queue to drain, retires every submitted stream and
    /// releases everything pending destruction.
    pub fn join(&mut self) -> Result<()> {
        for queue in &self.queues {
            queue
                .wait_idle(&self.device)
                .map_err(|e| self.reporter.error("kombu::frame", e))?;
        }
        self.device.wait_idle()?;

        for handle in self.frames.drain_streams() {
            if let Some(entry) = self.streams.get_ref_mut(handle) {
                entry.stream.mark_retired();
                entry.stream.reset()?;
            }
        }
        for (_, entry) in self.streams.iter_mut() {
            entry.stream.mark_retired();
        }

        for object in self.deletion.drain() {
            object.release(&mut self.device);
        }
        Ok(())
    }

    /// Joins, destroys every live object and tears down the device.
    pub fn destroy(mut self) {
        if let Err(err) = self.join() {
            self.reporter
                .warn("kombu::frame", format_args!("teardown after failed join: {}", err));
        }

        for entry in self.streams.drain() {
            if let Some(native) = entry.native {
                self.device.recycle_command_buffer(native);
            }
        }
        for entry in self.resources.descriptor_sets.drain() {
            self.device.destroy_descriptor_set(entry.native);
        }
        for entry in self.resources.shaders.drain() {
            self.device.destroy_shader(entry.native);
        }
        for entry in self.resources.pipeline_layouts.drain() {
            self.device.destroy_pipeline_layout(entry.native);
        }
        for entry in self.resources.samplers.drain() {
            self.device.destroy_sampler(entry.native);
        }
        for entry in self.resources.textures.drain() {
            self.device.destroy_texture(entry.native);
        }
        for entry in self.resources.buffers.drain() {
            self.device.destroy_buffer(entry.native);
        }
        for entry in self.resources.swapchains.drain() {
            self.device.destroy_swapchain(entry.native);
        }
        for entry in self.resources.semaphores.drain() {
            self.device.destroy_semaphore(entry.native);
        }
        for queue in self.queues.drain(..) {
            self.device.destroy_semaphore(queue.timeline);
        }

        log::debug!(target: "kombu::frame", "context destroyed");
        self.device.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::software::{ExecutionMode, SoftOp, SoftwareDevice};

    fn context() -> Context<SoftwareDevice> {
        Context::new(SoftwareDevice::default(), &ContextInfo::default()).unwrap()
    }

    #[test]
    fn queues_are_looked_up_by_type() {
        let ctx = context();
        let graphics = ctx.queue(QueueType::Graphics).unwrap();
        assert_eq!(
            ctx.logical_queue(graphics).unwrap().queue_type(),
            QueueType::Graphics
        );
        assert_eq!(ctx.queues_of(QueueType::Transfer).len(), 1);
        assert!(ctx.logical_queue(Handle::new(9, 1)).is_err());
        ctx.destroy();
    }

    #[test]
    fn missing_queue_type_is_unsupported() {
        let info = ContextInfo {
            queues: vec![QueueType::Graphics],
            ..Default::default()
        };
        let ctx = Context::new(SoftwareDevice::default(), &info).unwrap();
        assert!(matches!(
            ctx.queue(QueueType::Compute),
            Err(GPUError::Unsupported(_))
        ));
        ctx.destroy();
    }

    #[test]
    fn host_visible_buffer_round_trips_bytes() {
        let mut ctx = context();
        let buffer = ctx
            .create_buffer(&BufferInfo {
                debug_name: "upload",
                byte_size: 8,
                heap: HeapType::Upload,
                initial_data: Some(&[1, 2, 3, 4]),
                ..Default::default()
            })
            .unwrap();

        ctx.write_buffer(buffer, 4, &[5, 6, 7, 8]).unwrap();
        let mut out = [0u8; 8];
        ctx.read_buffer(buffer, 0, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4, 5, 6, 7, 8]);

        assert!(matches!(
            ctx.write_buffer(buffer, 6, &[0; 4]),
            Err(GPUError::OutOfBounds { .. })
        ));
        ctx.destroy();
    }

    #[test]
    fn gpu_only_buffer_is_staged_and_unmappable() {
        let device = SoftwareDevice::default();
        let gpu = device.gpu();
        let mut ctx = Context::new(device, &ContextInfo::default()).unwrap();

        let buffer = ctx
            .create_buffer(&BufferInfo {
                debug_name: "vertices",
                byte_size: 4,
                initial_data: Some(&[9, 8, 7, 6]),
                ..Default::default()
            })
            .unwrap();

        let native = ctx.resources().buffer(buffer).unwrap().native.id;
        assert_eq!(gpu.buffer_contents(native).unwrap(), vec![9, 8, 7, 6]);
        assert!(matches!(
            ctx.read_buffer(buffer, 0, &mut [0u8; 4]),
            Err(GPUError::HostAccessDenied(HeapType::GpuOnly))
        ));

        let trace = gpu.trace().unwrap();
        assert!(matches!(trace[0].op, SoftOp::CopyBuffer { size: 4, .. }));
        assert_eq!(trace[0].queue, QueueType::Transfer);
        ctx.destroy();
    }

    #[test]
    fn stale_handles_are_rejected() {
        let mut ctx = context();
        let stream = ctx
            .create_default_command_stream(QueueType::Compute)
            .unwrap();
        ctx.destroy_command_stream(stream).unwrap();
        assert!(matches!(
            ctx.add_command::<CmdDispatch>(stream),
            Err(GPUError::InvalidHandle(_))
        ));
        ctx.destroy();
    }

    #[test]
    fn unclosed_stream_cannot_be_submitted() {
        let mut ctx = context();
        let queue = ctx.queue(QueueType::Graphics).unwrap();
        let stream = ctx
            .create_default_command_stream(QueueType::Graphics)
            .unwrap();
        ctx.add_command::<CmdDispatch>(stream).unwrap();
        assert!(matches!(
            ctx.submit_command_streams(queue, &[stream], &SubmitInfo::default()),
            Err(GPUError::InvalidStreamState {
                state: StreamState::Recording,
                ..
            })
        ));
        ctx.destroy();
    }

    #[test]
    fn reset_retires_a_completed_submission() {
        let mut ctx = context();
        let queue = ctx.queue(QueueType::Compute).unwrap();
        let stream = ctx
            .create_default_command_stream(QueueType::Compute)
            .unwrap();
        ctx.add_command::<CmdDispatch>(stream).unwrap();
        ctx.close_command_streams(&[stream]).unwrap();
        ctx.submit_command_streams(queue, &[stream], &SubmitInfo::default())
            .unwrap();

        ctx.reset_command_stream(stream).unwrap();
        assert_eq!(ctx.stream(stream).unwrap().state(), StreamState::Recording);
        assert!(ctx.stream(stream).unwrap().is_empty());
        ctx.destroy();
    }

    #[test]
    fn reset_of_in_flight_stream_fails() {
        let device = SoftwareDevice::new(ExecutionMode::Manual);
        let gpu = device.gpu();
        let mut ctx = Context::new(device, &ContextInfo::default()).unwrap();
        let queue = ctx.queue(QueueType::Compute).unwrap();
        let stream = ctx
            .create_default_command_stream(QueueType::Compute)
            .unwrap();
        ctx.add_command::<CmdDispatch>(stream).unwrap();
        ctx.close_command_streams(&[stream]).unwrap();
        ctx.submit_command_streams(queue, &[stream], &SubmitInfo::default())
            .unwrap();

        assert!(matches!(
            ctx.reset_command_stream(stream),
            Err(GPUError::StreamInFlight)
        ));
        gpu.complete_all().unwrap();
        ctx.reset_command_stream(stream).unwrap();
        ctx.destroy();
    }

    #[test]
    fn non_monotonic_signal_is_rejected() {
        let mut ctx = context();
        let queue = ctx.queue(QueueType::Graphics).unwrap();
        let sem = ctx.create_semaphore(3).unwrap();
        let stream = ctx
            .create_default_command_stream(QueueType::Graphics)
            .unwrap();
        ctx.close_command_streams(&[stream]).unwrap();

        let signal = [SemaphoreValue {
            semaphore: sem,
            value: 3,
        }];
        assert!(matches!(
            ctx.submit_command_streams(
                queue,
                &[stream],
                &SubmitInfo {
                    signal: &signal,
                    ..Default::default()
                }
            ),
            Err(GPUError::NonMonotonicSignal {
                current: 3,
                requested: 3
            })
        ));
        assert_eq!(ctx.stream(stream).unwrap().state(), StreamState::Closed);
        ctx.destroy();
    }

    #[test]
    fn shader_without_layout_generates_one() {
        let mut ctx = context();
        let layout = ShaderLayout {
            bindings: vec![ShaderBinding {
                set: 0,
                binding: 0,
                kind: BindingKind::StorageBuffer,
                count: 1,
                stages: ShaderStages::COMPUTE,
            }],
            push_constant_size: 16,
            ..Default::default()
        };
        let stages = [ShaderStageInfo {
            stage: ShaderStage::Compute,
            blob: DataBlob { data: &[0x03, 0x02, 0x23, 0x07] },
            entry_point: "main",
        }];
        let shader = ctx
            .create_shader(&ShaderInfo {
                debug_name: "cull",
                stages: &stages,
                layout: &layout,
                pipeline_layout: None,
                color_formats: &[],
                depth_format: None,
                topology: Topology::TriangleList,
                cull_mode: CullMode::None,
                depth_test: false,
            })
            .unwrap();

        let pipeline_layout = ctx.shader_pipeline_layout(shader).unwrap();
        let set = ctx
            .create_descriptor_set(&DescriptorSetInfo {
                debug_name: "cull set",
                layout: pipeline_layout,
                set: 0,
            })
            .unwrap();
        let buffer = ctx
            .create_buffer(&BufferInfo {
                byte_size: 64,
                ..Default::default()
            })
            .unwrap();

        ctx.update_descriptor_set(
            set,
            &[DescriptorWrite {
                binding: 0,
                array_element: 0,
                resource: DescriptorResource::Buffer {
                    buffer,
                    offset: 0,
                    size: 0,
                },
            }],
        )
        .unwrap();
        assert!(ctx
            .update_descriptor_set(
                set,
                &[DescriptorWrite {
                    binding: 1,
                    array_element: 0,
                    resource: DescriptorResource::Buffer {
                        buffer,
                        offset: 0,
                        size: 0,
                    },
                }],
            )
            .is_err());

        ctx.destroy_shader(shader).unwrap();
        assert!(ctx.resources().pipeline_layout(pipeline_layout).is_err());
        ctx.destroy();
    }
}
