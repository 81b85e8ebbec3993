//! Tag-indexed dispatch from recorded commands to a backend's sink.

use std::fmt;

use crate::gpu::backend::Backend;
use crate::gpu::cmd::{AuxMemory, AuxSlice, CommandRecord, CommandStream};
use crate::gpu::driver::*;
use crate::gpu::resources::{
    BufferEntry, DescriptorSetEntry, PipelineLayoutEntry, Resources, SamplerEntry, ShaderEntry,
    SwapchainEntry, TextureEntry,
};
use crate::gpu::{
    Buffer, DescriptorSet, PipelineLayout, QueueType, Result, Sampler, Shader, Swapchain,
    Texture,
};
use crate::utils::Handle;

/// Read-only view handed to every command handler.
pub struct DispatchContext<'a, B: Backend> {
    resources: &'a Resources<B>,
    aux: &'a AuxMemory,
    queue_type: QueueType,
}

impl<'a, B: Backend> DispatchContext<'a, B> {
    pub fn new(resources: &'a Resources<B>, aux: &'a AuxMemory, queue_type: QueueType) -> Self {
        Self {
            resources,
            aux,
            queue_type,
        }
    }

    pub fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    pub fn resources(&self) -> &'a Resources<B> {
        self.resources
    }

    /// Resolves aux data referenced by the command being dispatched.
    pub fn aux<T: Copy + 'static>(&self, slice: AuxSlice<T>) -> Result<&'a [T]> {
        self.aux.get(slice)
    }

    pub fn buffer(&self, h: Handle<Buffer>) -> Result<&'a BufferEntry<B>> {
        self.resources.buffer(h)
    }

    pub fn texture(&self, h: Handle<Texture>) -> Result<&'a TextureEntry<B>> {
        self.resources.texture(h)
    }

    pub fn sampler(&self, h: Handle<Sampler>) -> Result<&'a SamplerEntry<B>> {
        self.resources.sampler(h)
    }

    pub fn shader(&self, h: Handle<Shader>) -> Result<&'a ShaderEntry<B>> {
        self.resources.shader(h)
    }

    pub fn pipeline_layout(&self, h: Handle<PipelineLayout>) -> Result<&'a PipelineLayoutEntry<B>> {
        self.resources.pipeline_layout(h)
    }

    pub fn descriptor_set(&self, h: Handle<DescriptorSet>) -> Result<&'a DescriptorSetEntry<B>> {
        self.resources.descriptor_set(h)
    }

    pub fn swapchain(&self, h: Handle<Swapchain>) -> Result<&'a SwapchainEntry<B>> {
        self.resources.swapchain(h)
    }
}

pub type CommandHandler<S> = fn(
    &mut S,
    &CommandStream,
    CommandRecord,
    &DispatchContext<'_, <S as CommandSink>::Backend>,
) -> Result<()>;

fn handle<S: CommandSink, T: Command>(
    sink: &mut S,
    stream: &CommandStream,
    record: CommandRecord,
    ctx: &DispatchContext<'_, S::Backend>,
) -> Result<()> {
    stream.command::<T>(record)?.dispatch(sink, ctx)
}

/// One handler per [`CommandKind`], built once per backend.
pub struct DispatchTable<S: CommandSink> {
    handlers: [Option<CommandHandler<S>>; CommandKind::COUNT],
}

impl<S: CommandSink> DispatchTable<S> {
    pub fn empty() -> Self {
        Self {
            handlers: [None; CommandKind::COUNT],
        }
    }

    pub fn with_builtin() -> Self {
        let mut table = Self::empty();
        table.register_builtin();
        table
    }

    pub fn register<T: Command>(&mut self) {
        self.handlers[T::KIND.index()] = Some(handle::<S, T>);
    }

    pub fn unregister(&mut self, kind: CommandKind) {
        self.handlers[kind.index()] = None;
    }

    pub fn register_builtin(&mut self) {
        self.register::<CmdBeginRenderPass>();
        self.register::<CmdEndRenderPass>();
        self.register::<CmdSetViewport>();
        self.register::<CmdSetScissor>();
        self.register::<CmdBindPipeline>();
        self.register::<CmdBindVertexBuffer>();
        self.register::<CmdBindIndexBuffer>();
        self.register::<CmdBindDescriptorSets>();
        self.register::<CmdPushConstants>();
        self.register::<CmdDrawInstanced>();
        self.register::<CmdDrawIndexedInstanced>();
        self.register::<CmdDispatch>();
        self.register::<CmdCopyResource>();
        self.register::<CmdCopyBuffer>();
        self.register::<CmdCopyBufferToTexture2D>();
        self.register::<CmdBarrier>();
        self.register::<CmdBeginDebugMarker>();
        self.register::<CmdEndDebugMarker>();
    }

    pub fn is_registered(&self, kind: CommandKind) -> bool {
        self.handlers[kind.index()].is_some()
    }

    /// Walks `stream` front to back, calling the handler for each record.
    /// Returns the number of commands dispatched.
    pub fn execute(
        &self,
        sink: &mut S,
        stream: &CommandStream,
        ctx: &DispatchContext<'_, S::Backend>,
    ) -> Result<usize> {
        for record in stream.records() {
            let handler = self.handlers[record.kind.index()]
                .ok_or(crate::gpu::GPUError::UnregisteredCommand(record.kind))?;
            handler(sink, stream, *record, ctx)?;
        }
        Ok(stream.len())
    }
}

impl<S: CommandSink> Default for DispatchTable<S> {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl<S: CommandSink> fmt::Debug for DispatchTable<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registered: Vec<_> = CommandKind::ALL
            .iter()
            .filter(|k| self.is_registered(**k))
            .collect();
        f.debug_struct("DispatchTable")
            .field("registered", &registered)
            .finish()
    }
}
