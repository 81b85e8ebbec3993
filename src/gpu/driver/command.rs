use std::fmt::Debug;

use super::registry::CommandKind;
use super::types::{
    BufferBarrier, ColorAttachment, DepthAttachment, TextureBarrier, TextureBufferRegion,
};
use crate::gpu::cmd::AuxSlice;
use crate::gpu::execution::DispatchContext;
use crate::gpu::{
    Backend, Buffer, DescriptorSet, IndexType, QueueMask, Rect2D, Result, Shader, Texture,
    Viewport,
};
use crate::utils::Handle;

//===----------------------------------------------------------------------===//
// Command trait
//===----------------------------------------------------------------------===//

/// A plain command struct that can be recorded into a
/// [`CommandStream`](crate::gpu::cmd::CommandStream).
///
/// Commands hold values and [`AuxSlice`] references only. They are
/// default-initialised in their arena and filled in place by the caller.
pub trait Command: Copy + Default + Debug + Send + Sync + 'static {
    /// Tag used to route the command through arenas and dispatch tables.
    const KIND: CommandKind;
    /// Queue types whose streams may record this command.
    const QUEUES: QueueMask;

    /// Forwards this command to the matching [`CommandSink`] method.
    fn dispatch<S: CommandSink>(
        &self,
        sink: &mut S,
        ctx: &DispatchContext<'_, S::Backend>,
    ) -> Result<()>;
}

macro_rules! command {
    ($ty:ty, $kind:ident, $queues:expr, $method:ident) => {
        impl Command for $ty {
            const KIND: CommandKind = CommandKind::$kind;
            const QUEUES: QueueMask = $queues;

            #[inline]
            fn dispatch<S: CommandSink>(
                &self,
                sink: &mut S,
                ctx: &DispatchContext<'_, S::Backend>,
            ) -> Result<()> {
                sink.$method(self, ctx)
            }
        }
    };
}

//===----------------------------------------------------------------------===//
// Command definitions
//===----------------------------------------------------------------------===//

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CmdBeginRenderPass {
    pub color_attachments: AuxSlice<ColorAttachment>,
    pub depth_attachment: Option<DepthAttachment>,
    pub render_area: Rect2D,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CmdEndRenderPass;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CmdSetViewport {
    pub viewport: Viewport,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CmdSetScissor {
    pub scissor: Rect2D,
}

/// Binds the pipeline built for `shader`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CmdBindPipeline {
    pub shader: Handle<Shader>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CmdBindVertexBuffer {
    pub buffer: Handle<Buffer>,
    pub binding: u32,
    pub offset: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CmdBindIndexBuffer {
    pub buffer: Handle<Buffer>,
    pub offset: u64,
    pub index_type: IndexType,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CmdBindDescriptorSets {
    /// Shader whose pipeline layout the sets are bound against.
    pub shader: Handle<Shader>,
    pub first_set: u32,
    pub sets: AuxSlice<Handle<DescriptorSet>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CmdPushConstants {
    pub shader: Handle<Shader>,
    pub offset: u32,
    pub data: AuxSlice<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CmdDrawInstanced {
    pub vertex_count_per_instance: u32,
    pub instance_count: u32,
    pub start_vertex: u32,
    pub start_instance: u32,
}

impl Default for CmdDrawInstanced {
    fn default() -> Self {
        Self {
            vertex_count_per_instance: 0,
            instance_count: 1,
            start_vertex: 0,
            start_instance: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CmdDrawIndexedInstanced {
    pub index_count_per_instance: u32,
    pub instance_count: u32,
    pub start_index: u32,
    pub base_vertex: i32,
    pub start_instance: u32,
}

impl Default for CmdDrawIndexedInstanced {
    fn default() -> Self {
        Self {
            index_count_per_instance: 0,
            instance_count: 1,
            start_index: 0,
            base_vertex: 0,
            start_instance: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CmdDispatch {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Default for CmdDispatch {
    fn default() -> Self {
        Self { x: 1, y: 1, z: 1 }
    }
}

/// Copies the whole of `source` into `destination`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CmdCopyResource {
    pub source: Handle<Buffer>,
    pub destination: Handle<Buffer>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CmdCopyBuffer {
    pub src: Handle<Buffer>,
    pub dst: Handle<Buffer>,
    pub src_offset: u64,
    pub dst_offset: u64,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CmdCopyBufferToTexture2D {
    pub source: Handle<Buffer>,
    pub destination: Handle<Texture>,
    pub mips: AuxSlice<TextureBufferRegion>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CmdBarrier {
    pub buffer_barriers: AuxSlice<BufferBarrier>,
    pub texture_barriers: AuxSlice<TextureBarrier>,
}

impl CmdBarrier {
    pub fn buffer_barrier_count(&self) -> usize {
        self.buffer_barriers.len()
    }

    pub fn texture_barrier_count(&self) -> usize {
        self.texture_barriers.len()
    }
}

/// Opens a labelled region. `name` holds UTF-8 bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CmdBeginDebugMarker {
    pub name: AuxSlice<u8>,
    pub color: [u8; 4],
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CmdEndDebugMarker;

command!(CmdBeginRenderPass, BeginRenderPass, QueueMask::GRAPHICS, begin_render_pass);
command!(CmdEndRenderPass, EndRenderPass, QueueMask::GRAPHICS, end_render_pass);
command!(CmdSetViewport, SetViewport, QueueMask::GRAPHICS, set_viewport);
command!(CmdSetScissor, SetScissor, QueueMask::GRAPHICS, set_scissor);
command!(CmdBindPipeline, BindPipeline, QueueMask::GRAPHICS_COMPUTE, bind_pipeline);
command!(CmdBindVertexBuffer, BindVertexBuffer, QueueMask::GRAPHICS, bind_vertex_buffer);
command!(CmdBindIndexBuffer, BindIndexBuffer, QueueMask::GRAPHICS, bind_index_buffer);
command!(
    CmdBindDescriptorSets,
    BindDescriptorSets,
    QueueMask::GRAPHICS_COMPUTE,
    bind_descriptor_sets
);
command!(CmdPushConstants, PushConstants, QueueMask::GRAPHICS_COMPUTE, push_constants);
command!(CmdDrawInstanced, DrawInstanced, QueueMask::GRAPHICS, draw_instanced);
command!(
    CmdDrawIndexedInstanced,
    DrawIndexedInstanced,
    QueueMask::GRAPHICS,
    draw_indexed_instanced
);
command!(CmdDispatch, Dispatch, QueueMask::GRAPHICS_COMPUTE, dispatch);
command!(CmdCopyResource, CopyResource, QueueMask::ALL, copy_resource);
command!(CmdCopyBuffer, CopyBuffer, QueueMask::ALL, copy_buffer);
command!(
    CmdCopyBufferToTexture2D,
    CopyBufferToTexture2D,
    QueueMask::ALL,
    copy_buffer_to_texture_2d
);
command!(CmdBarrier, Barrier, QueueMask::ALL, barrier);
command!(CmdBeginDebugMarker, BeginDebugMarker, QueueMask::ALL, begin_debug_marker);
command!(CmdEndDebugMarker, EndDebugMarker, QueueMask::ALL, end_debug_marker);

//===----------------------------------------------------------------------===//
// Sink
//===----------------------------------------------------------------------===//

/// Receiver of dispatched commands; one method per command type.
///
/// Backends implement this on their encoder to translate commands into
/// native calls. Handlers read their own command plus whatever aux data it
/// references through `ctx`.
pub trait CommandSink {
    type Backend: Backend;

    fn begin_render_pass(
        &mut self,
        cmd: &CmdBeginRenderPass,
        ctx: &DispatchContext<'_, Self::Backend>,
    ) -> Result<()>;
    fn end_render_pass(
        &mut self,
        cmd: &CmdEndRenderPass,
        ctx: &DispatchContext<'_, Self::Backend>,
    ) -> Result<()>;
    fn set_viewport(
        &mut self,
        cmd: &CmdSetViewport,
        ctx: &DispatchContext<'_, Self::Backend>,
    ) -> Result<()>;
    fn set_scissor(
        &mut self,
        cmd: &CmdSetScissor,
        ctx: &DispatchContext<'_, Self::Backend>,
    ) -> Result<()>;
    fn bind_pipeline(
        &mut self,
        cmd: &CmdBindPipeline,
        ctx: &DispatchContext<'_, Self::Backend>,
    ) -> Result<()>;
    fn bind_vertex_buffer(
        &mut self,
        cmd: &CmdBindVertexBuffer,
        ctx: &DispatchContext<'_, Self::Backend>,
    ) -> Result<()>;
    fn bind_index_buffer(
        &mut self,
        cmd: &CmdBindIndexBuffer,
        ctx: &DispatchContext<'_, Self::Backend>,
    ) -> Result<()>;
    fn bind_descriptor_sets(
        &mut self,
        cmd: &CmdBindDescriptorSets,
        ctx: &DispatchContext<'_, Self::Backend>,
    ) -> Result<()>;
    fn push_constants(
        &mut self,
        cmd: &CmdPushConstants,
        ctx: &DispatchContext<'_, Self::Backend>,
    ) -> Result<()>;
    fn draw_instanced(
        &mut self,
        cmd: &CmdDrawInstanced,
        ctx: &DispatchContext<'_, Self::Backend>,
    ) -> Result<()>;
    fn draw_indexed_instanced(
        &mut self,
        cmd: &CmdDrawIndexedInstanced,
        ctx: &DispatchContext<'_, Self::Backend>,
    ) -> Result<()>;
    fn dispatch(
        &mut self,
        cmd: &CmdDispatch,
        ctx: &DispatchContext<'_, Self::Backend>,
    ) -> Result<()>;
    fn copy_resource(
        &mut self,
        cmd: &CmdCopyResource,
        ctx: &DispatchContext<'_, Self::Backend>,
    ) -> Result<()>;
    fn copy_buffer(
        &mut self,
        cmd: &CmdCopyBuffer,
        ctx: &DispatchContext<'_, Self::Backend>,
    ) -> Result<()>;
    fn copy_buffer_to_texture_2d(
        &mut self,
        cmd: &CmdCopyBufferToTexture2D,
        ctx: &DispatchContext<'_, Self::Backend>,
    ) -> Result<()>;
    fn barrier(
        &mut self,
        cmd: &CmdBarrier,
        ctx: &DispatchContext<'_, Self::Backend>,
    ) -> Result<()>;
    fn begin_debug_marker(
        &mut self,
        cmd: &CmdBeginDebugMarker,
        ctx: &DispatchContext<'_, Self::Backend>,
    ) -> Result<()>;
    fn end_debug_marker(
        &mut self,
        cmd: &CmdEndDebugMarker,
        ctx: &DispatchContext<'_, Self::Backend>,
    ) -> Result<()>;
}
