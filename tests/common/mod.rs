#![allow(dead_code)]

use std::sync::Arc;

use kombu::gpu::software::{ExecutionMode, SoftwareDevice, SoftwareGpu};
use kombu::gpu::*;
use kombu::Handle;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn software_context(mode: ExecutionMode) -> (Context<SoftwareDevice>, Arc<SoftwareGpu>) {
    software_context_with(mode, ContextInfo::default())
}

pub fn software_context_with(
    mode: ExecutionMode,
    info: ContextInfo,
) -> (Context<SoftwareDevice>, Arc<SoftwareGpu>) {
    init_logging();
    let device = SoftwareDevice::new(mode);
    let gpu = device.gpu();
    let ctx = Context::new(device, &info).expect("software context");
    (ctx, gpu)
}

pub fn small_stream(queue_type: QueueType, command_capacity: usize) -> CommandStreamInfo {
    CommandStreamInfo {
        queue_type,
        command_capacity,
        per_type_bytes: 512,
        aux_bytes: 1024,
        growable: false,
    }
}

pub fn buffer(ctx: &mut Context<SoftwareDevice>, name: &str, size: u64) -> Handle<Buffer> {
    ctx.create_buffer(&BufferInfo {
        debug_name: name,
        byte_size: size,
        heap: HeapType::Upload,
        usage: BufferUsage::STORAGE | BufferUsage::COPY_SRC | BufferUsage::COPY_DST,
        initial_data: None,
    })
    .expect("buffer")
}

const BLOB: &[u8] = &[0x03, 0x02, 0x23, 0x07];

pub fn compute_shader(ctx: &mut Context<SoftwareDevice>) -> Handle<Shader> {
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
    ctx.create_shader(&ShaderInfo {
        debug_name: "compute",
        stages: &[ShaderStageInfo {
            stage: ShaderStage::Compute,
            blob: DataBlob { data: BLOB },
            entry_point: "main",
        }],
        layout: &layout,
        pipeline_layout: None,
        color_formats: &[],
        depth_format: None,
        topology: Topology::TriangleList,
        cull_mode: CullMode::None,
        depth_test: false,
    })
    .expect("compute shader")
}

pub fn graphics_shader(ctx: &mut Context<SoftwareDevice>) -> Handle<Shader> {
    let layout = ShaderLayout {
        vertex_inputs: vec![VertexInput {
            location: 0,
            format: VertexFormat::Float32x2,
            offset: 0,
        }],
        vertex_stride: 8,
        bindings: vec![ShaderBinding {
            set: 0,
            binding: 0,
            kind: BindingKind::UniformBuffer,
            count: 1,
            stages: ShaderStages::ALL_GRAPHICS,
        }],
        push_constant_size: 0,
    };
    ctx.create_shader(&ShaderInfo {
        debug_name: "triangle",
        stages: &[
            ShaderStageInfo {
                stage: ShaderStage::Vertex,
                blob: DataBlob { data: BLOB },
                entry_point: "main",
            },
            ShaderStageInfo {
                stage: ShaderStage::Fragment,
                blob: DataBlob { data: BLOB },
                entry_point: "main",
            },
        ],
        layout: &layout,
        pipeline_layout: None,
        color_formats: &[Format::RGBA8Unorm],
        depth_format: None,
        topology: Topology::TriangleList,
        cull_mode: CullMode::Back,
        depth_test: false,
    })
    .expect("graphics shader")
}

/// Sink that remembers what it was handed, in order.
#[derive(Default)]
pub struct RecordingSink {
    pub kinds: Vec<CommandKind>,
    pub pipelines: Vec<Handle<Shader>>,
    pub draws: Vec<CmdDrawInstanced>,
    pub dispatches: Vec<(u32, u32, u32)>,
    pub texture_barriers: Vec<Vec<TextureBarrier>>,
}

macro_rules! remember {
    ($($method:ident($cmd:ty) => $kind:ident;)*) => {
        $(
            fn $method(
                &mut self,
                _cmd: &$cmd,
                _ctx: &DispatchContext<'_, SoftwareDevice>,
            ) -> Result<()> {
                self.kinds.push(CommandKind::$kind);
                Ok(())
            }
        )*
    };
}

impl CommandSink for RecordingSink {
    type Backend = SoftwareDevice;

    remember! {
        begin_render_pass(CmdBeginRenderPass) => BeginRenderPass;
        end_render_pass(CmdEndRenderPass) => EndRenderPass;
        set_viewport(CmdSetViewport) => SetViewport;
        set_scissor(CmdSetScissor) => SetScissor;
        bind_vertex_buffer(CmdBindVertexBuffer) => BindVertexBuffer;
        bind_index_buffer(CmdBindIndexBuffer) => BindIndexBuffer;
        bind_descriptor_sets(CmdBindDescriptorSets) => BindDescriptorSets;
        push_constants(CmdPushConstants) => PushConstants;
        draw_indexed_instanced(CmdDrawIndexedInstanced) => DrawIndexedInstanced;
        copy_resource(CmdCopyResource) => CopyResource;
        copy_buffer(CmdCopyBuffer) => CopyBuffer;
        copy_buffer_to_texture_2d(CmdCopyBufferToTexture2D) => CopyBufferToTexture2D;
        begin_debug_marker(CmdBeginDebugMarker) => BeginDebugMarker;
        end_debug_marker(CmdEndDebugMarker) => EndDebugMarker;
    }

    fn bind_pipeline(
        &mut self,
        cmd: &CmdBindPipeline,
        _ctx: &DispatchContext<'_, SoftwareDevice>,
    ) -> Result<()> {
        self.kinds.push(CommandKind::BindPipeline);
        self.pipelines.push(cmd.shader);
        Ok(())
    }

    fn draw_instanced(
        &mut self,
        cmd: &CmdDrawInstanced,
        _ctx: &DispatchContext<'_, SoftwareDevice>,
    ) -> Result<()> {
        self.kinds.push(CommandKind::DrawInstanced);
        self.draws.push(*cmd);
        Ok(())
    }

    fn dispatch(
        &mut self,
        cmd: &CmdDispatch,
        _ctx: &DispatchContext<'_, SoftwareDevice>,
    ) -> Result<()> {
        self.kinds.push(CommandKind::Dispatch);
        self.dispatches.push((cmd.x, cmd.y, cmd.z));
        Ok(())
    }

    fn barrier(
        &mut self,
        cmd: &CmdBarrier,
        ctx: &DispatchContext<'_, SoftwareDevice>,
    ) -> Result<()> {
        self.kinds.push(CommandKind::Barrier);
        self.texture_barriers
            .push(ctx.aux(cmd.texture_barriers)?.to_vec());
        Ok(())
    }
}

/// Replays a stream through a [`RecordingSink`] with the builtin table.
pub fn replay(ctx: &Context<SoftwareDevice>, stream: Handle<CommandStream>) -> RecordingSink {
    let stream = ctx.stream(stream).expect("stream");
    let dispatch = DispatchContext::new(ctx.resources(), stream.aux(), stream.queue_type());
    let mut sink = RecordingSink::default();
    DispatchTable::<RecordingSink>::with_builtin()
        .execute(&mut sink, stream, &dispatch)
        .expect("replay");
    sink
}
