use std::sync::Arc;

use super::SoftwareDevice;
use crate::gpu::driver::*;
use crate::gpu::execution::DispatchContext;
use crate::gpu::{
    GPUError, IndexType, QueueType, Rect2D, Result, Swapchain, Texture, Viewport,
};
use crate::utils::Handle;

/// Image a texture operation refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureTarget {
    Texture(u64),
    /// Swapchain id and image index.
    Swapchain(u64, u32),
}

/// A translated command with every handle resolved to a native id.
#[derive(Debug, Clone, PartialEq)]
pub enum SoftOp {
    BeginRenderPass {
        colors: Vec<TextureTarget>,
        depth: Option<u64>,
        area: Rect2D,
    },
    EndRenderPass,
    SetViewport(Viewport),
    SetScissor(Rect2D),
    BindPipeline {
        shader: u64,
    },
    BindVertexBuffer {
        buffer: u64,
        binding: u32,
        offset: u64,
    },
    BindIndexBuffer {
        buffer: u64,
        offset: u64,
        index_type: IndexType,
    },
    BindDescriptorSets {
        first_set: u32,
        sets: Vec<u64>,
    },
    PushConstants {
        offset: u32,
        data: Vec<u8>,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    CopyBuffer {
        src: u64,
        dst: u64,
        src_offset: u64,
        dst_offset: u64,
        size: u64,
    },
    CopyBufferToTexture {
        src: u64,
        dst: TextureTarget,
        regions: Vec<TextureBufferRegion>,
    },
    Barrier {
        buffers: Vec<(u64, ResourceState, ResourceState)>,
        textures: Vec<(TextureTarget, ResourceState, ResourceState)>,
    },
    BeginDebugMarker {
        name: String,
        color: [u8; 4],
    },
    EndDebugMarker,
    /// Queued by `present`, never produced by the encoder.
    Present {
        swapchain: u64,
        image: u32,
    },
}

/// Recorded work ready for submission.
#[derive(Debug, Clone)]
pub struct SoftCommandList {
    pub queue_type: QueueType,
    pub ops: Arc<[SoftOp]>,
}

#[derive(Debug, Clone, Copy)]
struct BoundPipeline {
    compute: bool,
}

/// Translates dispatched commands into [`SoftOp`]s, checking the ordering
/// rules a native command buffer would reject.
pub struct SoftwareEncoder {
    queue_type: QueueType,
    ops: Vec<SoftOp>,
    in_pass: bool,
    pipeline: Option<BoundPipeline>,
    markers: u32,
}

impl SoftwareEncoder {
    pub(crate) fn new(queue_type: QueueType) -> Self {
        Self {
            queue_type,
            ops: Vec::new(),
            in_pass: false,
            pipeline: None,
            markers: 0,
        }
    }

    pub fn ops(&self) -> &[SoftOp] {
        &self.ops
    }

    pub(crate) fn finish(self) -> Result<SoftCommandList> {
        if self.in_pass {
            return Err(GPUError::InvalidCommand {
                kind: CommandKind::EndRenderPass,
                reason: "render pass left open",
            });
        }
        if self.markers != 0 {
            return Err(GPUError::InvalidCommand {
                kind: CommandKind::EndDebugMarker,
                reason: "debug marker left open",
            });
        }
        Ok(SoftCommandList {
            queue_type: self.queue_type,
            ops: Arc::from(self.ops),
        })
    }

    fn require_pass(&self, kind: CommandKind, inside: bool) -> Result<()> {
        match (self.in_pass, inside) {
            (true, true) | (false, false) => Ok(()),
            (false, true) => Err(GPUError::InvalidCommand {
                kind,
                reason: "must be recorded inside a render pass",
            }),
            (true, false) => Err(GPUError::InvalidCommand {
                kind,
                reason: "cannot be recorded inside a render pass",
            }),
        }
    }

    fn require_pipeline(&self, kind: CommandKind, compute: bool) -> Result<()> {
        match self.pipeline {
            Some(p) if p.compute == compute => Ok(()),
            Some(_) => Err(GPUError::InvalidCommand {
                kind,
                reason: "bound pipeline has the wrong bind point",
            }),
            None => Err(GPUError::InvalidCommand {
                kind,
                reason: "no pipeline bound",
            }),
        }
    }
}

fn texture_target(
    ctx: &DispatchContext<'_, SoftwareDevice>,
    texture: Handle<Texture>,
    swapchain: Handle<Swapchain>,
    is_swapchain: bool,
) -> Result<TextureTarget> {
    if is_swapchain {
        let entry = ctx.swapchain(swapchain)?;
        Ok(TextureTarget::Swapchain(entry.native.id, entry.current_image()?))
    } else {
        Ok(TextureTarget::Texture(ctx.texture(texture)?.native.id))
    }
}

impl CommandSink for SoftwareEncoder {
    type Backend = SoftwareDevice;

    fn begin_render_pass(
        &mut self,
        cmd: &CmdBeginRenderPass,
        ctx: &DispatchContext<'_, SoftwareDevice>,
    ) -> Result<()> {
        self.require_pass(CommandKind::BeginRenderPass, false)?;
        let colors = ctx
            .aux(cmd.color_attachments)?
            .iter()
            .map(|a| texture_target(ctx, a.texture, a.swapchain, a.is_swapchain))
            .collect::<Result<Vec<_>>>()?;
        let depth = match &cmd.depth_attachment {
            Some(d) => Some(ctx.texture(d.texture)?.native.id),
            None => None,
        };
        if colors.is_empty() && depth.is_none() {
            return Err(GPUError::InvalidCommand {
                kind: CommandKind::BeginRenderPass,
                reason: "render pass has no attachments",
            });
        }

        self.in_pass = true;
        self.ops.push(SoftOp::BeginRenderPass {
            colors,
            depth,
            area: cmd.render_area,
        });
        Ok(())
    }

    fn end_render_pass(
        &mut self,
        _cmd: &CmdEndRenderPass,
        _ctx: &DispatchContext<'_, SoftwareDevice>,
    ) -> Result<()> {
        self.require_pass(CommandKind::EndRenderPass, true)?;
        self.in_pass = false;
        self.ops.push(SoftOp::EndRenderPass);
        Ok(())
    }

    fn set_viewport(
        &mut self,
        cmd: &CmdSetViewport,
        _ctx: &DispatchContext<'_, SoftwareDevice>,
    ) -> Result<()> {
        self.ops.push(SoftOp::SetViewport(cmd.viewport));
        Ok(())
    }

    fn set_scissor(
        &mut self,
        cmd: &CmdSetScissor,
        _ctx: &DispatchContext<'_, SoftwareDevice>,
    ) -> Result<()> {
        self.ops.push(SoftOp::SetScissor(cmd.scissor));
        Ok(())
    }

    fn bind_pipeline(
        &mut self,
        cmd: &CmdBindPipeline,
        ctx: &DispatchContext<'_, SoftwareDevice>,
    ) -> Result<()> {
        let shader = ctx.shader(cmd.shader)?;
        if shader.is_compute() && self.queue_type == QueueType::Transfer {
            return Err(GPUError::IncompatibleCommand {
                kind: CommandKind::BindPipeline,
                queue: self.queue_type,
            });
        }
        if !shader.is_compute() && self.queue_type != QueueType::Graphics {
            return Err(GPUError::InvalidCommand {
                kind: CommandKind::BindPipeline,
                reason: "graphics pipeline on a non-graphics stream",
            });
        }

        self.pipeline = Some(BoundPipeline {
            compute: shader.is_compute(),
        });
        self.ops.push(SoftOp::BindPipeline {
            shader: shader.native.id,
        });
        Ok(())
    }

    fn bind_vertex_buffer(
        &mut self,
        cmd: &CmdBindVertexBuffer,
        ctx: &DispatchContext<'_, SoftwareDevice>,
    ) -> Result<()> {
        let buffer = ctx.buffer(cmd.buffer)?;
        buffer.check_range(cmd.offset, 0)?;
        self.ops.push(SoftOp::BindVertexBuffer {
            buffer: buffer.native.id,
            binding: cmd.binding,
            offset: cmd.offset,
        });
        Ok(())
    }

    fn bind_index_buffer(
        &mut self,
        cmd: &CmdBindIndexBuffer,
        ctx: &DispatchContext<'_, SoftwareDevice>,
    ) -> Result<()> {
        let buffer = ctx.buffer(cmd.buffer)?;
        buffer.check_range(cmd.offset, 0)?;
        self.ops.push(SoftOp::BindIndexBuffer {
            buffer: buffer.native.id,
            offset: cmd.offset,
            index_type: cmd.index_type,
        });
        Ok(())
    }

    fn bind_descriptor_sets(
        &mut self,
        cmd: &CmdBindDescriptorSets,
        ctx: &DispatchContext<'_, SoftwareDevice>,
    ) -> Result<()> {
        let shader = ctx.shader(cmd.shader)?;
        let sets = ctx
            .aux(cmd.sets)?
            .iter()
            .enumerate()
            .map(|(i, h)| {
                let set = ctx.descriptor_set(*h)?;
                if set.set != cmd.first_set + i as u32 {
                    return Err(GPUError::InvalidCommand {
                        kind: CommandKind::BindDescriptorSets,
                        reason: "descriptor set bound at the wrong index",
                    });
                }
                if set.layout != shader.layout {
                    return Err(GPUError::InvalidCommand {
                        kind: CommandKind::BindDescriptorSets,
                        reason: "descriptor set layout does not match the shader",
                    });
                }
                Ok(set.native.id)
            })
            .collect::<Result<Vec<_>>>()?;

        self.ops.push(SoftOp::BindDescriptorSets {
            first_set: cmd.first_set,
            sets,
        });
        Ok(())
    }

    fn push_constants(
        &mut self,
        cmd: &CmdPushConstants,
        ctx: &DispatchContext<'_, SoftwareDevice>,
    ) -> Result<()> {
        let shader = ctx.shader(cmd.shader)?;
        let data = ctx.aux(cmd.data)?;
        let end = cmd.offset as usize + data.len();
        if end > shader.native.push_constant_size as usize {
            return Err(GPUError::OutOfBounds {
                offset: cmd.offset as u64,
                size: data.len() as u64,
                capacity: shader.native.push_constant_size as u64,
            });
        }
        self.ops.push(SoftOp::PushConstants {
            offset: cmd.offset,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn draw_instanced(
        &mut self,
        cmd: &CmdDrawInstanced,
        _ctx: &DispatchContext<'_, SoftwareDevice>,
    ) -> Result<()> {
        self.require_pass(CommandKind::DrawInstanced, true)?;
        self.require_pipeline(CommandKind::DrawInstanced, false)?;
        self.ops.push(SoftOp::Draw {
            vertex_count: cmd.vertex_count_per_instance,
            instance_count: cmd.instance_count,
            first_vertex: cmd.start_vertex,
            first_instance: cmd.start_instance,
        });
        Ok(())
    }

    fn draw_indexed_instanced(
        &mut self,
        cmd: &CmdDrawIndexedInstanced,
        _ctx: &DispatchContext<'_, SoftwareDevice>,
    ) -> Result<()> {
        self.require_pass(CommandKind::DrawIndexedInstanced, true)?;
        self.require_pipeline(CommandKind::DrawIndexedInstanced, false)?;
        self.ops.push(SoftOp::DrawIndexed {
            index_count: cmd.index_count_per_instance,
            instance_count: cmd.instance_count,
            first_index: cmd.start_index,
            vertex_offset: cmd.base_vertex,
            first_instance: cmd.start_instance,
        });
        Ok(())
    }

    fn dispatch(
        &mut self,
        cmd: &CmdDispatch,
        _ctx: &DispatchContext<'_, SoftwareDevice>,
    ) -> Result<()> {
        self.require_pass(CommandKind::Dispatch, false)?;
        // No pipeline is tolerated; a graphics one is not.
        if self.pipeline.map_or(false, |p| !p.compute) {
            return Err(GPUError::InvalidCommand {
                kind: CommandKind::Dispatch,
                reason: "bound pipeline has the wrong bind point",
            });
        }
        self.ops.push(SoftOp::Dispatch {
            x: cmd.x,
            y: cmd.y,
            z: cmd.z,
        });
        Ok(())
    }

    fn copy_resource(
        &mut self,
        cmd: &CmdCopyResource,
        ctx: &DispatchContext<'_, SoftwareDevice>,
    ) -> Result<()> {
        self.require_pass(CommandKind::CopyResource, false)?;
        let src = ctx.buffer(cmd.source)?;
        let dst = ctx.buffer(cmd.destination)?;
        if src.size != dst.size {
            return Err(GPUError::InvalidCommand {
                kind: CommandKind::CopyResource,
                reason: "source and destination sizes differ",
            });
        }
        self.ops.push(SoftOp::CopyBuffer {
            src: src.native.id,
            dst: dst.native.id,
            src_offset: 0,
            dst_offset: 0,
            size: src.size,
        });
        Ok(())
    }

    fn copy_buffer(
        &mut self,
        cmd: &CmdCopyBuffer,
        ctx: &DispatchContext<'_, SoftwareDevice>,
    ) -> Result<()> {
        self.require_pass(CommandKind::CopyBuffer, false)?;
        let src = ctx.buffer(cmd.src)?;
        let dst = ctx.buffer(cmd.dst)?;
        src.check_range(cmd.src_offset, cmd.size)?;
        dst.check_range(cmd.dst_offset, cmd.size)?;
        self.ops.push(SoftOp::CopyBuffer {
            src: src.native.id,
            dst: dst.native.id,
            src_offset: cmd.src_offset,
            dst_offset: cmd.dst_offset,
            size: cmd.size,
        });
        Ok(())
    }

    fn copy_buffer_to_texture_2d(
        &mut self,
        cmd: &CmdCopyBufferToTexture2D,
        ctx: &DispatchContext<'_, SoftwareDevice>,
    ) -> Result<()> {
        self.require_pass(CommandKind::CopyBufferToTexture2D, false)?;
        let src = ctx.buffer(cmd.source)?;
        let dst = ctx.texture(cmd.destination)?;
        let regions = ctx.aux(cmd.mips)?;
        for region in regions {
            src.check_range(region.buffer_offset, region.byte_size())?;
            if region.mip_level >= dst.mip_levels {
                return Err(GPUError::InvalidCommand {
                    kind: CommandKind::CopyBufferToTexture2D,
                    reason: "mip level out of range",
                });
            }
        }
        self.ops.push(SoftOp::CopyBufferToTexture {
            src: src.native.id,
            dst: TextureTarget::Texture(dst.native.id),
            regions: regions.to_vec(),
        });
        Ok(())
    }

    fn barrier(
        &mut self,
        cmd: &CmdBarrier,
        ctx: &DispatchContext<'_, SoftwareDevice>,
    ) -> Result<()> {
        let buffers = ctx
            .aux(cmd.buffer_barriers)?
            .iter()
            .map(|b| Ok((ctx.buffer(b.buffer)?.native.id, b.current, b.new)))
            .collect::<Result<Vec<_>>>()?;
        let textures = ctx
            .aux(cmd.texture_barriers)?
            .iter()
            .map(|t| {
                let target = texture_target(ctx, t.texture, t.swapchain, t.is_swapchain)?;
                Ok((target, t.current, t.new))
            })
            .collect::<Result<Vec<_>>>()?;
        self.ops.push(SoftOp::Barrier { buffers, textures });
        Ok(())
    }

    fn begin_debug_marker(
        &mut self,
        cmd: &CmdBeginDebugMarker,
        ctx: &DispatchContext<'_, SoftwareDevice>,
    ) -> Result<()> {
        let name = String::from_utf8_lossy(ctx.aux(cmd.name)?).into_owned();
        self.markers += 1;
        self.ops.push(SoftOp::BeginDebugMarker {
            name,
            color: cmd.color,
        });
        Ok(())
    }

    fn end_debug_marker(
        &mut self,
        _cmd: &CmdEndDebugMarker,
        _ctx: &DispatchContext<'_, SoftwareDevice>,
    ) -> Result<()> {
        if self.markers == 0 {
            return Err(GPUError::InvalidCommand {
                kind: CommandKind::EndDebugMarker,
                reason: "no open debug marker",
            });
        }
        self.markers -= 1;
        self.ops.push(SoftOp::EndDebugMarker);
        Ok(())
    }
}
