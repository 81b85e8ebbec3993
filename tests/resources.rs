mod common;

use common::*;
use kombu::gpu::software::{ExecutionMode, SoftOp};
use kombu::gpu::*;
use serial_test::serial;

#[test]
#[serial]
fn destruction_waits_for_in_flight_work() {
    let (mut ctx, gpu) = software_context(ExecutionMode::Manual);
    let src = buffer(&mut ctx, "src", 32);
    let dst = buffer(&mut ctx, "dst", 32);
    ctx.write_buffer(src, 0, &[3; 32]).unwrap();
    let src_id = ctx.resources().buffer(src).unwrap().native.id;

    let stream = ctx
        .create_command_stream(&small_stream(QueueType::Transfer, 4))
        .unwrap();
    ctx.record(
        stream,
        CmdCopyResource {
            source: src,
            destination: dst,
        },
    )
    .unwrap();
    ctx.close_command_streams(&[stream]).unwrap();
    let queue = ctx.queue(QueueType::Transfer).unwrap();
    ctx.submit_command_streams(queue, &[stream], &SubmitInfo::default())
        .unwrap();

    ctx.destroy_buffer(src).unwrap();
    ctx.destroy_command_stream(stream).unwrap();
    assert_eq!(ctx.pending_destructions(), 2);

    // The handle dies at once, the memory does not.
    assert!(matches!(
        ctx.write_buffer(src, 0, &[0; 4]),
        Err(GPUError::InvalidHandle("buffer"))
    ));
    assert!(matches!(
        ctx.destroy_buffer(src),
        Err(GPUError::InvalidHandle("buffer"))
    ));
    assert!(ctx.stream(stream).is_err());
    assert_eq!(gpu.buffer_contents(src_id).unwrap(), vec![3; 32]);

    assert_eq!(gpu.complete_all().unwrap(), 1);
    ctx.start_frame().unwrap();
    assert_eq!(ctx.pending_destructions(), 0);
    assert!(gpu.buffer_contents(src_id).is_err());
    ctx.end_frame().unwrap();

    let mut out = [0u8; 32];
    ctx.read_buffer(dst, 0, &mut out).unwrap();
    assert_eq!(out, [3; 32]);
    ctx.destroy();
}

#[test]
#[serial]
fn idle_objects_are_released_on_join() {
    let (mut ctx, _gpu) = software_context(ExecutionMode::Immediate);
    let sampler = ctx.create_sampler(&SamplerInfo::default()).unwrap();
    let sem = ctx.create_semaphore(5).unwrap();
    ctx.destroy_sampler(sampler).unwrap();
    ctx.destroy_semaphore(sem).unwrap();
    assert_eq!(ctx.pending_destructions(), 2);
    ctx.join().unwrap();
    assert_eq!(ctx.pending_destructions(), 0);
    assert!(ctx.semaphore_value(sem).is_err());
    ctx.destroy();
}

#[test]
#[serial]
fn gpu_only_buffer_is_filled_through_staging() {
    let (mut ctx, gpu) = software_context(ExecutionMode::Immediate);
    let data: Vec<u8> = (0..64).collect();
    let device_local = ctx
        .create_buffer(&BufferInfo {
            debug_name: "vertices",
            byte_size: 64,
            heap: HeapType::GpuOnly,
            usage: BufferUsage::VERTEX | BufferUsage::COPY_SRC,
            initial_data: Some(&data),
        })
        .unwrap();
    assert!(matches!(
        ctx.read_buffer(device_local, 0, &mut [0; 4]),
        Err(GPUError::HostAccessDenied(HeapType::GpuOnly))
    ));

    // The staging copy ran on the transfer queue.
    let trace = gpu.trace().unwrap();
    assert!(trace
        .iter()
        .any(|e| e.queue == QueueType::Transfer && matches!(e.op, SoftOp::CopyBuffer { size: 64, .. })));
    assert_eq!(ctx.pending_destructions(), 0);

    let readback = ctx
        .create_buffer(&BufferInfo {
            debug_name: "readback",
            byte_size: 64,
            heap: HeapType::Readback,
            usage: BufferUsage::COPY_DST,
            initial_data: None,
        })
        .unwrap();
    let stream = ctx
        .create_default_command_stream(QueueType::Transfer)
        .unwrap();
    ctx.record(
        stream,
        CmdCopyBuffer {
            src: device_local,
            dst: readback,
            src_offset: 16,
            dst_offset: 0,
            size: 16,
        },
    )
    .unwrap();
    ctx.close_command_streams(&[stream]).unwrap();
    let queue = ctx.queue(QueueType::Transfer).unwrap();
    let value = ctx
        .submit_command_streams(queue, &[stream], &SubmitInfo::default())
        .unwrap();
    assert!(value >= 2);

    let mut out = [0u8; 16];
    ctx.read_buffer(readback, 0, &mut out).unwrap();
    assert_eq!(out.as_slice(), &data[16..32]);
    ctx.destroy();
}

#[test]
#[serial]
fn texture_mips_are_uploaded_at_creation() {
    let (mut ctx, gpu) = software_context(ExecutionMode::Immediate);
    let mip0 = vec![0xAB; 4 * 4 * 4];
    let mip1 = vec![0xCD; 2 * 2 * 4];
    let texture = ctx
        .create_texture(&TextureInfo {
            debug_name: "albedo",
            width: 4,
            height: 4,
            mip_levels: 2,
            format: Format::RGBA8Unorm,
            usage: TextureUsage::SAMPLED | TextureUsage::COPY_DST,
            initial_data: &[
                TextureBuffer {
                    data: &mip0,
                    width: 4,
                    height: 4,
                    bytes_per_pixel: 4,
                },
                TextureBuffer {
                    data: &mip1,
                    width: 2,
                    height: 2,
                    bytes_per_pixel: 4,
                },
            ],
        })
        .unwrap();

    let id = ctx.resources().texture(texture).unwrap().native.id;
    assert_eq!(gpu.texture_mip(id, 0).unwrap(), mip0);
    assert_eq!(gpu.texture_mip(id, 1).unwrap(), mip1);

    let ops: Vec<SoftOp> = gpu.trace().unwrap().into_iter().map(|e| e.op).collect();
    assert_eq!(ops.len(), 3);
    assert!(matches!(&ops[0], SoftOp::Barrier { textures, .. }
        if textures[0].1 == ResourceState::Undefined && textures[0].2 == ResourceState::CopyDst));
    assert!(matches!(&ops[1], SoftOp::CopyBufferToTexture { regions, .. } if regions.len() == 2));
    assert!(matches!(&ops[2], SoftOp::Barrier { textures, .. }
        if textures[0].2 == ResourceState::ShaderRead));

    let wrong = vec![0u8; 3 * 3 * 4];
    assert!(matches!(
        ctx.create_texture(&TextureInfo {
            debug_name: "bad",
            width: 4,
            height: 4,
            initial_data: &[TextureBuffer {
                data: &wrong,
                width: 3,
                height: 3,
                bytes_per_pixel: 4,
            }],
            ..Default::default()
        }),
        Err(GPUError::Configuration(_))
    ));
    assert_eq!(ctx.resources().texture_count(), 1);
    ctx.destroy();
}

#[test]
#[serial]
fn descriptor_sets_bind_against_their_shader() {
    let (mut ctx, gpu) = software_context(ExecutionMode::Immediate);
    let shader = compute_shader(&mut ctx);
    let layout = ctx.shader_pipeline_layout(shader).unwrap();
    let storage = buffer(&mut ctx, "storage", 256);
    let sampler = ctx.create_sampler(&SamplerInfo::default()).unwrap();

    let set = ctx
        .create_descriptor_set(&DescriptorSetInfo {
            debug_name: "set0",
            layout,
            set: 0,
        })
        .unwrap();
    assert!(matches!(
        ctx.create_descriptor_set(&DescriptorSetInfo {
            debug_name: "set1",
            layout,
            set: 1,
        }),
        Err(GPUError::Configuration(_))
    ));

    ctx.update_descriptor_set(
        set,
        &[DescriptorWrite {
            binding: 0,
            array_element: 0,
            resource: DescriptorResource::Buffer {
                buffer: storage,
                offset: 0,
                size: 0,
            },
        }],
    )
    .unwrap();
    assert!(matches!(
        ctx.update_descriptor_set(
            set,
            &[DescriptorWrite {
                binding: 0,
                array_element: 0,
                resource: DescriptorResource::Sampler(sampler),
            }]
        ),
        Err(GPUError::Configuration(_))
    ));
    assert!(matches!(
        ctx.update_descriptor_set(
            set,
            &[DescriptorWrite {
                binding: 0,
                array_element: 0,
                resource: DescriptorResource::Buffer {
                    buffer: storage,
                    offset: 200,
                    size: 100,
                },
            }]
        ),
        Err(GPUError::OutOfBounds { .. })
    ));

    let stream = ctx
        .create_command_stream(&CommandStreamInfo::for_queue(QueueType::Compute))
        .unwrap();
    ctx.record(stream, CmdBindPipeline { shader }).unwrap();
    let sets = ctx.emplace_aux_value(stream, set).unwrap();
    ctx.record(
        stream,
        CmdBindDescriptorSets {
            shader,
            first_set: 0,
            sets,
        },
    )
    .unwrap();
    let data = ctx.emplace_aux(stream, &[1u8; 16]).unwrap();
    ctx.record(
        stream,
        CmdPushConstants {
            shader,
            offset: 0,
            data,
        },
    )
    .unwrap();
    ctx.add_command::<CmdDispatch>(stream).unwrap().x = 64;
    ctx.close_command_streams(&[stream]).unwrap();

    gpu.clear_trace().unwrap();
    let queue = ctx.queue(QueueType::Compute).unwrap();
    ctx.submit_command_streams(queue, &[stream], &SubmitInfo::default())
        .unwrap();
    let ops: Vec<SoftOp> = gpu.trace().unwrap().into_iter().map(|e| e.op).collect();
    assert!(matches!(ops[0], SoftOp::BindPipeline { .. }));
    assert!(matches!(&ops[1], SoftOp::BindDescriptorSets { first_set: 0, sets } if sets.len() == 1));
    assert!(matches!(&ops[2], SoftOp::PushConstants { offset: 0, data } if data.len() == 16));
    assert_eq!(ops[3], SoftOp::Dispatch { x: 64, y: 1, z: 1 });

    // Push constants past the layout's range fail when the stream is closed.
    let overflow = ctx
        .create_command_stream(&CommandStreamInfo::for_queue(QueueType::Compute))
        .unwrap();
    let data = ctx.emplace_aux(overflow, &[0u8; 8]).unwrap();
    ctx.record(
        overflow,
        CmdPushConstants {
            shader,
            offset: 12,
            data,
        },
    )
    .unwrap();
    assert!(matches!(
        ctx.close_command_streams(&[overflow]),
        Err(GPUError::OutOfBounds {
            offset: 12,
            size: 8,
            capacity: 16
        })
    ));

    ctx.destroy_shader(shader).unwrap();
    assert!(ctx.resources().pipeline_layout(layout).is_err());
    ctx.destroy();
}

#[test]
#[serial]
fn stale_handles_do_not_resolve_to_new_objects() {
    let (mut ctx, _gpu) = software_context(ExecutionMode::Immediate);
    let first = buffer(&mut ctx, "first", 16);
    ctx.destroy_buffer(first).unwrap();
    let second = buffer(&mut ctx, "second", 16);

    assert_eq!(first.slot, second.slot);
    assert_ne!(first.generation, second.generation);
    assert!(ctx.resources().buffer(first).is_err());
    assert_eq!(ctx.resources().buffer(second).unwrap().debug_name, "second");

    // Recording does not validate handles; closing does.
    let stream = ctx
        .create_command_stream(&CommandStreamInfo::for_queue(QueueType::Transfer))
        .unwrap();
    ctx.record(
        stream,
        CmdCopyBuffer {
            src: first,
            dst: second,
            size: 4,
            ..Default::default()
        },
    )
    .unwrap();
    assert!(matches!(
        ctx.close_command_streams(&[stream]),
        Err(GPUError::InvalidHandle("buffer"))
    ));
    ctx.destroy();
}
