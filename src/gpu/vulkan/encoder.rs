use std::ffi::CString;

use ash::extensions::ext::DebugUtils;
use ash::vk;
use smallvec::SmallVec;

use super::conversions::StateScope;
use super::structs::{QueueFamilies, VkCommandBuffer};
use super::VulkanDevice;
use crate::gpu::driver::*;
use crate::gpu::execution::DispatchContext;
use crate::gpu::{GPUError, QueueType, Result, Swapchain, Texture};
use crate::utils::Handle;

/// Records dispatched commands straight into a primary command buffer.
pub struct VulkanEncoder {
    device: ash::Device,
    debug_utils: Option<DebugUtils>,
    cmd: vk::CommandBuffer,
    families: QueueFamilies,
    queue_type: QueueType,
    in_pass: bool,
    markers: u32,
}

impl VulkanEncoder {
    pub(super) fn new(
        device: ash::Device,
        debug_utils: Option<DebugUtils>,
        cmd: vk::CommandBuffer,
        families: QueueFamilies,
        queue_type: QueueType,
    ) -> Self {
        Self {
            device,
            debug_utils,
            cmd,
            families,
            queue_type,
            in_pass: false,
            markers: 0,
        }
    }

    pub fn raw(&self) -> vk::CommandBuffer {
        self.cmd
    }

    pub(super) fn family(&self) -> u32 {
        self.families.of(self.queue_type)
    }

    pub(super) fn finish(self) -> Result<VkCommandBuffer> {
        let family = self.family();
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
        unsafe { self.device.end_command_buffer(self.cmd)? };
        Ok(VkCommandBuffer {
            raw: self.cmd,
            family,
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

    fn ownership(&self, src: Option<QueueType>, dst: Option<QueueType>) -> (u32, u32) {
        match (src, dst) {
            (Some(s), Some(d)) if self.families.of(s) != self.families.of(d) => {
                (self.families.of(s), self.families.of(d))
            }
            _ => (vk::QUEUE_FAMILY_IGNORED, vk::QUEUE_FAMILY_IGNORED),
        }
    }
}

struct ImageTarget {
    image: vk::Image,
    view: vk::ImageView,
    aspect: vk::ImageAspectFlags,
}

fn image_target(
    ctx: &DispatchContext<'_, VulkanDevice>,
    texture: Handle<Texture>,
    swapchain: Handle<Swapchain>,
    is_swapchain: bool,
) -> Result<ImageTarget> {
    if is_swapchain {
        let entry = ctx.swapchain(swapchain)?;
        let image = entry.current_image()? as usize;
        let sc = &entry.native;
        match (sc.images.get(image), sc.views.get(image)) {
            (Some(&image), Some(&view)) => Ok(ImageTarget {
                image,
                view,
                aspect: vk::ImageAspectFlags::COLOR,
            }),
            _ => Err(GPUError::InvalidHandle("swapchain image")),
        }
    } else {
        let tex = &ctx.texture(texture)?.native;
        Ok(ImageTarget {
            image: tex.raw,
            view: tex.view,
            aspect: tex.aspect,
        })
    }
}

impl CommandSink for VulkanEncoder {
    type Backend = VulkanDevice;

    fn begin_render_pass(
        &mut self,
        cmd: &CmdBeginRenderPass,
        ctx: &DispatchContext<'_, VulkanDevice>,
    ) -> Result<()> {
        self.require_pass(CommandKind::BeginRenderPass, false)?;

        let mut colors: SmallVec<[vk::RenderingAttachmentInfo; 4]> = SmallVec::new();
        for a in ctx.aux(cmd.color_attachments)? {
            let target = image_target(ctx, a.texture, a.swapchain, a.is_swapchain)?;
            colors.push(
                vk::RenderingAttachmentInfo::builder()
                    .image_view(target.view)
                    .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .load_op(a.load_op.into())
                    .store_op(a.store_op.into())
                    .clear_value(a.clear.into())
                    .build(),
            );
        }

        let depth = match &cmd.depth_attachment {
            Some(d) => Some(
                vk::RenderingAttachmentInfo::builder()
                    .image_view(ctx.texture(d.texture)?.native.view)
                    .image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                    .load_op(d.load_op.into())
                    .store_op(d.store_op.into())
                    .clear_value(vk::ClearValue {
                        depth_stencil: vk::ClearDepthStencilValue {
                            depth: d.clear_depth,
                            stencil: d.clear_stencil,
                        },
                    })
                    .build(),
            ),
            None => None,
        };
        if colors.is_empty() && depth.is_none() {
            return Err(GPUError::InvalidCommand {
                kind: CommandKind::BeginRenderPass,
                reason: "render pass has no attachments",
            });
        }

        let mut info = vk::RenderingInfo::builder()
            .render_area(cmd.render_area.into())
            .layer_count(1)
            .color_attachments(&colors);
        if let Some(depth) = depth.as_ref() {
            info = info.depth_attachment(depth);
        }

        unsafe { self.device.cmd_begin_rendering(self.cmd, &info) };
        self.in_pass = true;
        Ok(())
    }

    fn end_render_pass(
        &mut self,
        _cmd: &CmdEndRenderPass,
        _ctx: &DispatchContext<'_, VulkanDevice>,
    ) -> Result<()> {
        self.require_pass(CommandKind::EndRenderPass, true)?;
        unsafe { self.device.cmd_end_rendering(self.cmd) };
        self.in_pass = false;
        Ok(())
    }

    fn set_viewport(
        &mut self,
        cmd: &CmdSetViewport,
        _ctx: &DispatchContext<'_, VulkanDevice>,
    ) -> Result<()> {
        unsafe {
            self.device
                .cmd_set_viewport(self.cmd, 0, &[cmd.viewport.into()])
        };
        Ok(())
    }

    fn set_scissor(
        &mut self,
        cmd: &CmdSetScissor,
        _ctx: &DispatchContext<'_, VulkanDevice>,
    ) -> Result<()> {
        unsafe { self.device.cmd_set_scissor(self.cmd, 0, &[cmd.scissor.into()]) };
        Ok(())
    }

    fn bind_pipeline(
        &mut self,
        cmd: &CmdBindPipeline,
        ctx: &DispatchContext<'_, VulkanDevice>,
    ) -> Result<()> {
        let shader = &ctx.shader(cmd.shader)?.native;
        if shader.bind_point == vk::PipelineBindPoint::GRAPHICS
            && self.queue_type != QueueType::Graphics
        {
            return Err(GPUError::InvalidCommand {
                kind: CommandKind::BindPipeline,
                reason: "graphics pipeline on a non-graphics stream",
            });
        }
        unsafe {
            self.device
                .cmd_bind_pipeline(self.cmd, shader.bind_point, shader.pipeline)
        };
        Ok(())
    }

    fn bind_vertex_buffer(
        &mut self,
        cmd: &CmdBindVertexBuffer,
        ctx: &DispatchContext<'_, VulkanDevice>,
    ) -> Result<()> {
        let buffer = ctx.buffer(cmd.buffer)?;
        buffer.check_range(cmd.offset, 0)?;
        unsafe {
            self.device.cmd_bind_vertex_buffers(
                self.cmd,
                cmd.binding,
                &[buffer.native.raw],
                &[cmd.offset],
            )
        };
        Ok(())
    }

    fn bind_index_buffer(
        &mut self,
        cmd: &CmdBindIndexBuffer,
        ctx: &DispatchContext<'_, VulkanDevice>,
    ) -> Result<()> {
        let buffer = ctx.buffer(cmd.buffer)?;
        buffer.check_range(cmd.offset, 0)?;
        unsafe {
            self.device.cmd_bind_index_buffer(
                self.cmd,
                buffer.native.raw,
                cmd.offset,
                cmd.index_type.into(),
            )
        };
        Ok(())
    }

    fn bind_descriptor_sets(
        &mut self,
        cmd: &CmdBindDescriptorSets,
        ctx: &DispatchContext<'_, VulkanDevice>,
    ) -> Result<()> {
        let shader = &ctx.shader(cmd.shader)?.native;
        let sets = ctx
            .aux(cmd.sets)?
            .iter()
            .map(|h| ctx.descriptor_set(*h).map(|s| s.native.raw))
            .collect::<Result<SmallVec<[vk::DescriptorSet; 4]>>>()?;
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                self.cmd,
                shader.bind_point,
                shader.layout,
                cmd.first_set,
                &sets,
                &[],
            )
        };
        Ok(())
    }

    fn push_constants(
        &mut self,
        cmd: &CmdPushConstants,
        ctx: &DispatchContext<'_, VulkanDevice>,
    ) -> Result<()> {
        let shader = &ctx.shader(cmd.shader)?.native;
        let data = ctx.aux(cmd.data)?;
        unsafe {
            self.device.cmd_push_constants(
                self.cmd,
                shader.layout,
                shader.push_stages,
                cmd.offset,
                data,
            )
        };
        Ok(())
    }

    fn draw_instanced(
        &mut self,
        cmd: &CmdDrawInstanced,
        _ctx: &DispatchContext<'_, VulkanDevice>,
    ) -> Result<()> {
        self.require_pass(CommandKind::DrawInstanced, true)?;
        unsafe {
            self.device.cmd_draw(
                self.cmd,
                cmd.vertex_count_per_instance,
                cmd.instance_count,
                cmd.start_vertex,
                cmd.start_instance,
            )
        };
        Ok(())
    }

    fn draw_indexed_instanced(
        &mut self,
        cmd: &CmdDrawIndexedInstanced,
        _ctx: &DispatchContext<'_, VulkanDevice>,
    ) -> Result<()> {
        self.require_pass(CommandKind::DrawIndexedInstanced, true)?;
        unsafe {
            self.device.cmd_draw_indexed(
                self.cmd,
                cmd.index_count_per_instance,
                cmd.instance_count,
                cmd.start_index,
                cmd.base_vertex,
                cmd.start_instance,
            )
        };
        Ok(())
    }

    fn dispatch(
        &mut self,
        cmd: &CmdDispatch,
        _ctx: &DispatchContext<'_, VulkanDevice>,
    ) -> Result<()> {
        self.require_pass(CommandKind::Dispatch, false)?;
        unsafe { self.device.cmd_dispatch(self.cmd, cmd.x, cmd.y, cmd.z) };
        Ok(())
    }

    fn copy_resource(
        &mut self,
        cmd: &CmdCopyResource,
        ctx: &DispatchContext<'_, VulkanDevice>,
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
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size: src.size,
        };
        unsafe {
            self.device
                .cmd_copy_buffer(self.cmd, src.native.raw, dst.native.raw, &[region])
        };
        Ok(())
    }

    fn copy_buffer(
        &mut self,
        cmd: &CmdCopyBuffer,
        ctx: &DispatchContext<'_, VulkanDevice>,
    ) -> Result<()> {
        self.require_pass(CommandKind::CopyBuffer, false)?;
        let src = ctx.buffer(cmd.src)?;
        let dst = ctx.buffer(cmd.dst)?;
        src.check_range(cmd.src_offset, cmd.size)?;
        dst.check_range(cmd.dst_offset, cmd.size)?;
        let region = vk::BufferCopy {
            src_offset: cmd.src_offset,
            dst_offset: cmd.dst_offset,
            size: cmd.size,
        };
        unsafe {
            self.device
                .cmd_copy_buffer(self.cmd, src.native.raw, dst.native.raw, &[region])
        };
        Ok(())
    }

    fn copy_buffer_to_texture_2d(
        &mut self,
        cmd: &CmdCopyBufferToTexture2D,
        ctx: &DispatchContext<'_, VulkanDevice>,
    ) -> Result<()> {
        self.require_pass(CommandKind::CopyBufferToTexture2D, false)?;
        let src = ctx.buffer(cmd.source)?;
        let dst = &ctx.texture(cmd.destination)?.native;

        let mut regions: SmallVec<[vk::BufferImageCopy; 8]> = SmallVec::new();
        for r in ctx.aux(cmd.mips)? {
            src.check_range(r.buffer_offset, r.byte_size())?;
            if r.mip_level >= dst.mip_levels {
                return Err(GPUError::InvalidCommand {
                    kind: CommandKind::CopyBufferToTexture2D,
                    reason: "mip level out of range",
                });
            }
            regions.push(vk::BufferImageCopy {
                buffer_offset: r.buffer_offset,
                buffer_row_length: 0,
                buffer_image_height: 0,
                image_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: dst.aspect,
                    mip_level: r.mip_level,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                image_offset: vk::Offset3D::default(),
                image_extent: vk::Extent3D {
                    width: r.width,
                    height: r.height,
                    depth: 1,
                },
            });
        }

        unsafe {
            self.device.cmd_copy_buffer_to_image(
                self.cmd,
                src.native.raw,
                dst.raw,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &regions,
            )
        };
        Ok(())
    }

    fn barrier(&mut self, cmd: &CmdBarrier, ctx: &DispatchContext<'_, VulkanDevice>) -> Result<()> {
        self.require_pass(CommandKind::Barrier, false)?;

        let mut buffers: SmallVec<[vk::BufferMemoryBarrier2; 4]> = SmallVec::new();
        for b in ctx.aux(cmd.buffer_barriers)? {
            let buffer = ctx.buffer(b.buffer)?;
            let size = if b.size == 0 { vk::WHOLE_SIZE } else { b.size };
            if b.size != 0 {
                buffer.check_range(b.offset, b.size)?;
            }
            let from = StateScope::from(b.current);
            let to = StateScope::from(b.new);
            let (src_family, dst_family) = self.ownership(b.src_queue, b.dst_queue);
            buffers.push(
                vk::BufferMemoryBarrier2::builder()
                    .src_stage_mask(from.stages)
                    .src_access_mask(from.access)
                    .dst_stage_mask(to.stages)
                    .dst_access_mask(to.access)
                    .src_queue_family_index(src_family)
                    .dst_queue_family_index(dst_family)
                    .buffer(buffer.native.raw)
                    .offset(b.offset)
                    .size(size)
                    .build(),
            );
        }

        let mut images: SmallVec<[vk::ImageMemoryBarrier2; 4]> = SmallVec::new();
        for t in ctx.aux(cmd.texture_barriers)? {
            let target = image_target(ctx, t.texture, t.swapchain, t.is_swapchain)?;
            let from = StateScope::from(t.current);
            let to = StateScope::from(t.new);
            let (src_family, dst_family) = self.ownership(t.src_queue, t.dst_queue);
            images.push(
                vk::ImageMemoryBarrier2::builder()
                    .src_stage_mask(from.stages)
                    .src_access_mask(from.access)
                    .dst_stage_mask(to.stages)
                    .dst_access_mask(to.access)
                    .old_layout(from.layout)
                    .new_layout(to.layout)
                    .src_queue_family_index(src_family)
                    .dst_queue_family_index(dst_family)
                    .image(target.image)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: target.aspect,
                        base_mip_level: t.range.base_mip,
                        level_count: t.range.mip_count,
                        base_array_layer: t.range.base_layer,
                        layer_count: t.range.layer_count,
                    })
                    .build(),
            );
        }

        let dependency = vk::DependencyInfo::builder()
            .buffer_memory_barriers(&buffers)
            .image_memory_barriers(&images);
        unsafe { self.device.cmd_pipeline_barrier2(self.cmd, &dependency) };
        Ok(())
    }

    fn begin_debug_marker(
        &mut self,
        cmd: &CmdBeginDebugMarker,
        ctx: &DispatchContext<'_, VulkanDevice>,
    ) -> Result<()> {
        self.markers += 1;
        let Some(utils) = &self.debug_utils else {
            return Ok(());
        };
        let bytes: Vec<u8> = ctx
            .aux(cmd.name)?
            .iter()
            .copied()
            .filter(|b| *b != 0)
            .collect();
        let name = CString::new(bytes).unwrap_or_default();
        let color = cmd.color.map(|c| c as f32 / 255.0);
        let label = vk::DebugUtilsLabelEXT::builder()
            .label_name(&name)
            .color(color);
        unsafe { utils.cmd_begin_debug_utils_label(self.cmd, &label) };
        Ok(())
    }

    fn end_debug_marker(
        &mut self,
        _cmd: &CmdEndDebugMarker,
        _ctx: &DispatchContext<'_, VulkanDevice>,
    ) -> Result<()> {
        if self.markers == 0 {
            return Err(GPUError::InvalidCommand {
                kind: CommandKind::EndDebugMarker,
                reason: "no debug marker open",
            });
        }
        self.markers -= 1;
        if let Some(utils) = &self.debug_utils {
            unsafe { utils.cmd_end_debug_utils_label(self.cmd) };
        }
        Ok(())
    }
}
