use std::time::Duration;

use super::driver::CommandSink;
use super::execution::DispatchTable;
use super::{
    BufferInfo, PipelineLayoutInfo, QueueType, Result, SamplerInfo,
    ShaderInfo, SwapchainInfo, TextureInfo,
};

/// A descriptor write with every handle resolved to its native object.
pub enum NativeDescriptor<'a, B: Backend> {
    Buffer {
        buffer: &'a B::Buffer,
        offset: u64,
        size: u64,
    },
    Texture(&'a B::Texture),
    Sampler(&'a B::Sampler),
    TextureSampler(&'a B::Texture, &'a B::Sampler),
}

pub struct NativeDescriptorWrite<'a, B: Backend> {
    pub binding: u32,
    pub array_element: u32,
    pub resource: NativeDescriptor<'a, B>,
}

/// Native device behind a [`Context`](super::Context).
///
/// A backend owns native objects and translates commands through its
/// [`Encoder`](Backend::Encoder). Everything above it (streams, frames,
/// handle registries, semaphore bookkeeping) is shared.
pub trait Backend: Sized + Send + 'static {
    type Buffer: Send + Sync;
    type Texture: Send + Sync;
    type Sampler: Send + Sync;
    type Shader: Send + Sync;
    type PipelineLayout: Send + Sync;
    type DescriptorSet: Send + Sync;
    /// Timeline semaphore.
    type Semaphore: Send + Sync;
    type Swapchain: Send + Sync;
    type Queue: Send + Sync;
    type CommandBuffer: Send + Sync;
    type Encoder: CommandSink<Backend = Self>;

    fn name(&self) -> &'static str;

    /// Registers command handlers. The default registers every built-in command.
    fn register_commands(table: &mut DispatchTable<Self::Encoder>) {
        table.register_builtin();
    }

    /// Opens the `index`-th native queue of `queue_type`.
    fn create_queue(&mut self, queue_type: QueueType, index: usize) -> Result<Self::Queue>;

    fn create_buffer(&mut self, info: &BufferInfo) -> Result<Self::Buffer>;
    fn destroy_buffer(&mut self, buffer: Self::Buffer);
    /// Only called for host-visible buffers, with a bounds-checked range.
    fn write_buffer(&mut self, buffer: &Self::Buffer, offset: u64, data: &[u8]) -> Result<()>;
    fn read_buffer(&self, buffer: &Self::Buffer, offset: u64, out: &mut [u8]) -> Result<()>;

    /// Creates the texture without contents; initial data is uploaded by the
    /// context through a transfer stream.
    fn create_texture(&mut self, info: &TextureInfo) -> Result<Self::Texture>;
    fn destroy_texture(&mut self, texture: Self::Texture);

    fn create_sampler(&mut self, info: &SamplerInfo) -> Result<Self::Sampler>;
    fn destroy_sampler(&mut self, sampler: Self::Sampler);

    fn create_pipeline_layout(&mut self, info: &PipelineLayoutInfo) -> Result<Self::PipelineLayout>;
    fn destroy_pipeline_layout(&mut self, layout: Self::PipelineLayout);

    fn create_shader(
        &mut self,
        info: &ShaderInfo,
        layout: &Self::PipelineLayout,
    ) -> Result<Self::Shader>;
    fn destroy_shader(&mut self, shader: Self::Shader);

    fn create_descriptor_set(
        &mut self,
        layout: &Self::PipelineLayout,
        set: u32,
    ) -> Result<Self::DescriptorSet>;
    fn update_descriptor_set(
        &mut self,
        set: &mut Self::DescriptorSet,
        writes: &[NativeDescriptorWrite<'_, Self>],
    ) -> Result<()>;
    fn destroy_descriptor_set(&mut self, set: Self::DescriptorSet);

    fn create_semaphore(&mut self, initial_value: u64) -> Result<Self::Semaphore>;
    fn destroy_semaphore(&mut self, semaphore: Self::Semaphore);
    fn semaphore_value(&self, semaphore: &Self::Semaphore) -> Result<u64>;
    /// Blocks until `semaphore` reaches `value`. Returns `false` on timeout.
    fn wait_semaphore(
        &self,
        semaphore: &Self::Semaphore,
        value: u64,
        timeout: Option<Duration>,
    ) -> Result<bool>;

    fn begin_encoding(&mut self, queue_type: QueueType) -> Result<Self::Encoder>;
    fn finish_encoding(&mut self, encoder: Self::Encoder) -> Result<Self::CommandBuffer>;
    /// Drops an encoder whose translation failed part way.
    fn discard_encoding(&mut self, encoder: Self::Encoder) {
        drop(encoder);
    }
    /// Returns a retired command buffer to the backend for reuse.
    fn recycle_command_buffer(&mut self, buffer: Self::CommandBuffer) {
        drop(buffer);
    }

    /// Submits `buffers` in order. Waits are honoured before execution and
    /// signals are raised after all buffers complete.
    fn submit(
        &mut self,
        queue: &Self::Queue,
        buffers: &[&Self::CommandBuffer],
        waits: &[(&Self::Semaphore, u64)],
        signals: &[(&Self::Semaphore, u64)],
    ) -> Result<()>;

    fn create_swapchain(&mut self, info: &SwapchainInfo) -> Result<Self::Swapchain>;
    fn recreate_swapchain(
        &mut self,
        swapchain: &mut Self::Swapchain,
        info: &SwapchainInfo,
    ) -> Result<()>;
    fn destroy_swapchain(&mut self, swapchain: Self::Swapchain);
    fn swapchain_image_count(&self, swapchain: &Self::Swapchain) -> u32;
    fn acquire_next_image(&mut self, swapchain: &mut Self::Swapchain) -> Result<u32>;
    fn present(
        &mut self,
        queue: &Self::Queue,
        swapchain: &mut Self::Swapchain,
        image: u32,
        waits: &[(&Self::Semaphore, u64)],
    ) -> Result<()>;

    fn wait_idle(&mut self) -> Result<()>;
    /// Final teardown. Every object has already been destroyed.
    fn destroy(self);
}
