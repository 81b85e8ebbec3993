mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use common::*;
use kombu::gpu::software::{ExecutionMode, SoftOp, SoftwareDevice, TextureTarget};
use kombu::gpu::*;
use kombu::Handle;
use serial_test::serial;

fn dispatch_stream(ctx: &mut Context<SoftwareDevice>) -> Handle<CommandStream> {
    let stream = ctx
        .create_command_stream(&small_stream(QueueType::Compute, 8))
        .unwrap();
    ctx.record(stream, CmdDispatch::default()).unwrap();
    ctx.close_command_streams(&[stream]).unwrap();
    stream
}

#[test]
#[serial]
fn start_frame_blocks_until_the_slot_retires() {
    let (mut ctx, gpu) = software_context(ExecutionMode::Manual);
    assert_eq!(ctx.frames_in_flight(), 2);
    let queue = ctx.queue(QueueType::Graphics).unwrap();
    let streams: Vec<Handle<CommandStream>> = (0..2)
        .map(|_| {
            ctx.create_command_stream(&small_stream(QueueType::Graphics, 8))
                .unwrap()
        })
        .collect();

    for frame in 0..2 {
        assert_eq!(ctx.start_frame().unwrap(), frame);
        let stream = streams[frame];
        ctx.record(stream, CmdDispatch::default()).unwrap();
        ctx.close_command_streams(&[stream]).unwrap();
        ctx.submit_command_streams(queue, &[stream], &SubmitInfo::default())
            .unwrap();
        ctx.end_frame().unwrap();
    }
    assert_eq!(gpu.pending_submissions().unwrap(), 2);
    assert_eq!(ctx.stream(streams[0]).unwrap().state(), StreamState::Submitted);

    let released = Arc::new(AtomicBool::new(false));
    let (tx, rx) = mpsc::channel();
    let driver = {
        let gpu = Arc::clone(&gpu);
        let released = Arc::clone(&released);
        thread::spawn(move || {
            // Give the main thread time to block.
            thread::sleep(Duration::from_millis(50));
            released.store(true, Ordering::SeqCst);
            gpu.complete_all().unwrap();
            rx.recv_timeout(Duration::from_secs(5))
                .expect("start_frame never returned");
        })
    };

    assert_eq!(ctx.start_frame().unwrap(), 0);
    assert!(released.load(Ordering::SeqCst));
    tx.send(()).unwrap();
    driver.join().unwrap();

    // The slot's stream was retired and rewound for reuse.
    let reused = ctx.stream(streams[0]).unwrap();
    assert_eq!(reused.state(), StreamState::Recording);
    assert!(reused.is_empty());
    ctx.end_frame().unwrap();
    assert_eq!(ctx.frame_number(), 3);

    ctx.destroy();
}

#[test]
#[serial]
fn recycling_a_slot_spares_streams_resubmitted_later() {
    let (mut ctx, gpu) = software_context(ExecutionMode::Manual);
    let queue = ctx.queue(QueueType::Graphics).unwrap();
    let stream = ctx
        .create_command_stream(&small_stream(QueueType::Graphics, 8))
        .unwrap();

    assert_eq!(ctx.start_frame().unwrap(), 0);
    ctx.record(stream, CmdDispatch::default()).unwrap();
    ctx.close_command_streams(&[stream]).unwrap();
    ctx.submit_command_streams(queue, &[stream], &SubmitInfo::default())
        .unwrap();
    ctx.end_frame().unwrap();
    assert_eq!(gpu.complete_all().unwrap(), 1);

    // Reused in the next frame before slot 0 comes around again.
    assert_eq!(ctx.start_frame().unwrap(), 1);
    ctx.reset_command_stream(stream).unwrap();
    ctx.record(stream, CmdDispatch { x: 2, y: 1, z: 1 }).unwrap();
    ctx.close_command_streams(&[stream]).unwrap();
    let value = ctx
        .submit_command_streams(queue, &[stream], &SubmitInfo::default())
        .unwrap();
    assert_eq!(value, 2);
    ctx.end_frame().unwrap();

    // Slot 0 has retired, but the stream's frame 1 work is still pending.
    assert_eq!(ctx.start_frame().unwrap(), 0);
    assert_eq!(gpu.pending_submissions().unwrap(), 1);
    let in_flight = ctx.stream(stream).unwrap();
    assert_eq!(in_flight.state(), StreamState::Submitted);
    assert_eq!(in_flight.len(), 1);
    assert!(matches!(
        ctx.reset_command_stream(stream),
        Err(GPUError::StreamInFlight)
    ));
    ctx.end_frame().unwrap();

    assert_eq!(gpu.complete_all().unwrap(), 1);
    assert_eq!(ctx.start_frame().unwrap(), 1);
    assert_eq!(ctx.stream(stream).unwrap().state(), StreamState::Recording);
    assert!(ctx.stream(stream).unwrap().is_empty());
    ctx.end_frame().unwrap();
    ctx.destroy();
}

#[test]
#[serial]
fn frame_calls_must_alternate() {
    let (mut ctx, _gpu) = software_context(ExecutionMode::Immediate);
    assert!(matches!(ctx.end_frame(), Err(GPUError::FrameState(_))));
    ctx.start_frame().unwrap();
    assert!(matches!(ctx.start_frame(), Err(GPUError::FrameState(_))));
    ctx.end_frame().unwrap();
    assert_eq!(ctx.frame_index(), 1);
    ctx.destroy();
}

#[test]
#[serial]
fn waiting_on_a_semaphore_returns_once_signaled() {
    let (mut ctx, gpu) = software_context(ExecutionMode::Manual);
    let sem = ctx.create_semaphore(0).unwrap();
    let stream = dispatch_stream(&mut ctx);
    let queue = ctx.queue(QueueType::Compute).unwrap();
    ctx.submit_command_streams(
        queue,
        &[stream],
        &SubmitInfo {
            signal: &[SemaphoreValue {
                semaphore: sem,
                value: 1,
            }],
            ..Default::default()
        },
    )
    .unwrap();

    assert!(!ctx
        .wait_for_semaphore_timeout(sem, 1, Duration::from_millis(10))
        .unwrap());
    assert_eq!(ctx.semaphore_value(sem).unwrap(), 0);

    let driver = {
        let gpu = Arc::clone(&gpu);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            gpu.complete_all().unwrap()
        })
    };
    ctx.wait_for_semaphore(sem, 1).unwrap();
    assert_eq!(driver.join().unwrap(), 1);
    assert_eq!(ctx.semaphore_value(sem).unwrap(), 1);

    assert!(matches!(
        ctx.wait_for_semaphore(sem, 2),
        Err(GPUError::SemaphoreNeverSignaled {
            requested: 2,
            pending: 1
        })
    ));
    ctx.destroy();
}

#[test]
#[serial]
fn semaphore_wait_returns_after_the_copy_lands() {
    let (mut ctx, gpu) = software_context(ExecutionMode::Manual);
    let src = buffer(&mut ctx, "src", 128);
    let dst = buffer(&mut ctx, "dst", 128);
    let data: Vec<u8> = (0..128).collect();
    ctx.write_buffer(src, 0, &data).unwrap();

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

    let copied = ctx.create_semaphore(0).unwrap();
    let queue = ctx.queue(QueueType::Transfer).unwrap();
    ctx.submit_command_streams(
        queue,
        &[stream],
        &SubmitInfo {
            signal: &[SemaphoreValue {
                semaphore: copied,
                value: 1,
            }],
            ..Default::default()
        },
    )
    .unwrap();

    assert!(!ctx
        .wait_for_semaphore_timeout(copied, 1, Duration::from_millis(10))
        .unwrap());
    let mut out = vec![0xEEu8; 128];
    ctx.read_buffer(dst, 0, &mut out).unwrap();
    assert_eq!(out, vec![0; 128]);

    let driver = {
        let gpu = Arc::clone(&gpu);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            gpu.complete_all().unwrap()
        })
    };
    ctx.wait_for_semaphore(copied, 1).unwrap();
    assert_eq!(ctx.semaphore_value(copied).unwrap(), 1);
    ctx.read_buffer(dst, 0, &mut out).unwrap();
    assert_eq!(out, data);
    assert_eq!(driver.join().unwrap(), 1);

    let trace = gpu.trace().unwrap();
    assert!(trace
        .iter()
        .any(|e| e.queue == QueueType::Transfer && matches!(e.op, SoftOp::CopyBuffer { size: 128, .. })));
    ctx.destroy();
}

#[test]
#[serial]
fn cross_queue_wait_orders_execution() {
    let (mut ctx, gpu) = software_context(ExecutionMode::Manual);
    let a = buffer(&mut ctx, "a", 8);
    let b = buffer(&mut ctx, "b", 8);
    let c = buffer(&mut ctx, "c", 8);
    ctx.write_buffer(a, 0, &[9; 8]).unwrap();
    let sem = ctx.create_semaphore(0).unwrap();

    let first = ctx
        .create_command_stream(&small_stream(QueueType::Compute, 4))
        .unwrap();
    ctx.record(
        first,
        CmdCopyResource {
            source: a,
            destination: b,
        },
    )
    .unwrap();
    let second = ctx
        .create_command_stream(&small_stream(QueueType::Graphics, 4))
        .unwrap();
    ctx.record(
        second,
        CmdCopyResource {
            source: b,
            destination: c,
        },
    )
    .unwrap();
    ctx.close_command_streams(&[first, second]).unwrap();

    let handoff = [SemaphoreValue {
        semaphore: sem,
        value: 1,
    }];
    // Waiting on a value nothing has been asked to signal is refused.
    assert!(matches!(
        ctx.submit_command_streams(
            ctx.queue(QueueType::Graphics).unwrap(),
            &[second],
            &SubmitInfo {
                wait: &handoff,
                ..Default::default()
            },
        ),
        Err(GPUError::SemaphoreNeverSignaled { .. })
    ));

    ctx.submit_command_streams(
        ctx.queue(QueueType::Compute).unwrap(),
        &[first],
        &SubmitInfo {
            signal: &handoff,
            ..Default::default()
        },
    )
    .unwrap();
    ctx.submit_command_streams(
        ctx.queue(QueueType::Graphics).unwrap(),
        &[second],
        &SubmitInfo {
            wait: &handoff,
            ..Default::default()
        },
    )
    .unwrap();

    assert_eq!(gpu.complete_all().unwrap(), 2);
    let trace = gpu.trace().unwrap();
    assert_eq!(trace.len(), 2);
    assert_eq!(trace[0].queue, QueueType::Compute);
    assert_eq!(trace[1].queue, QueueType::Graphics);

    let mut out = [0u8; 8];
    ctx.read_buffer(c, 0, &mut out).unwrap();
    assert_eq!(out, [9; 8]);
    ctx.destroy();
}

#[test]
#[serial]
fn a_stream_is_submitted_once_per_recording() {
    let (mut ctx, gpu) = software_context(ExecutionMode::Immediate);
    let stream = dispatch_stream(&mut ctx);
    let queue = ctx.queue(QueueType::Compute).unwrap();

    assert!(matches!(
        ctx.submit_command_streams(queue, &[stream, stream], &SubmitInfo::default()),
        Err(GPUError::InvalidStreamState { .. })
    ));
    assert_eq!(gpu.pending_submissions().unwrap(), 0);
    assert!(gpu.trace().unwrap().is_empty());

    let first = ctx
        .submit_command_streams(queue, &[stream], &SubmitInfo::default())
        .unwrap();
    assert!(matches!(
        ctx.submit_command_streams(queue, &[stream], &SubmitInfo::default()),
        Err(GPUError::InvalidStreamState {
            operation: "submit",
            state: StreamState::Submitted
        })
    ));

    ctx.reset_command_stream(stream).unwrap();
    ctx.record(stream, CmdDispatch::default()).unwrap();
    ctx.close_command_streams(&[stream]).unwrap();
    let second = ctx
        .submit_command_streams(queue, &[stream], &SubmitInfo::default())
        .unwrap();
    assert!(second > first);
    assert_eq!(ctx.logical_queue(queue).unwrap().submitted(), second);
    ctx.destroy();
}

#[test]
#[serial]
fn frames_present_acquired_swapchain_images() {
    let (mut ctx, gpu) = software_context(ExecutionMode::Immediate);
    let swapchain = ctx
        .create_swapchain(&SwapchainInfo {
            image_count: 2,
            ..Default::default()
        })
        .unwrap();
    let swapchain_id = ctx.resources().swapchain(swapchain).unwrap().native.id;
    let queue = ctx.queue(QueueType::Graphics).unwrap();
    let stream = ctx
        .create_default_command_stream(QueueType::Graphics)
        .unwrap();

    assert!(matches!(
        ctx.present(swapchain),
        Err(GPUError::NoImageAcquired)
    ));

    for expected_image in [0u32, 1, 0] {
        ctx.start_frame().unwrap();
        ctx.reset_command_stream(stream).unwrap();
        let color_attachments = ctx
            .emplace_aux_value(stream, ColorAttachment::swapchain(swapchain))
            .unwrap();
        ctx.record(
            stream,
            CmdBeginRenderPass {
                color_attachments,
                depth_attachment: None,
                render_area: Rect2D {
                    x: 0,
                    y: 0,
                    width: 1280,
                    height: 1024,
                },
            },
        )
        .unwrap();
        ctx.record(stream, CmdEndRenderPass).unwrap();
        let to_present = ctx
            .emplace_aux_value(
                stream,
                TextureBarrier {
                    swapchain,
                    is_swapchain: true,
                    current: ResourceState::ColorAttachment,
                    new: ResourceState::Present,
                    ..Default::default()
                },
            )
            .unwrap();
        ctx.record(
            stream,
            CmdBarrier {
                texture_barriers: to_present,
                ..Default::default()
            },
        )
        .unwrap();
        ctx.close_command_streams(&[stream]).unwrap();
        ctx.submit_command_streams(queue, &[stream], &SubmitInfo::default())
            .unwrap();
        ctx.present(swapchain).unwrap();
        ctx.end_frame().unwrap();

        let trace = gpu.trace().unwrap();
        let presented = trace.last().map(|e| e.op.clone());
        assert_eq!(
            presented,
            Some(SoftOp::Present {
                swapchain: swapchain_id,
                image: expected_image
            })
        );
        assert!(trace.iter().any(|e| matches!(
            &e.op,
            SoftOp::BeginRenderPass { colors, .. }
                if colors == &vec![TextureTarget::Swapchain(swapchain_id, expected_image)]
        )));
        gpu.clear_trace().unwrap();
    }

    assert!(matches!(
        ctx.recreate_swapchain(
            swapchain,
            &SwapchainInfo {
                extent: Extent {
                    width: 0,
                    height: 0
                },
                ..Default::default()
            }
        ),
        Err(GPUError::SwapchainOutOfDate)
    ));
    ctx.recreate_swapchain(
        swapchain,
        &SwapchainInfo {
            extent: Extent {
                width: 640,
                height: 480,
            },
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(
        ctx.resources().swapchain(swapchain).unwrap().extent,
        Extent {
            width: 640,
            height: 480
        }
    );
    ctx.destroy();
}

#[test]
#[serial]
fn log_callback_sees_context_errors() {
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let info = {
        let seen = Arc::clone(&seen);
        ContextInfo::default().with_log_callback(move |level, msg| {
            seen.lock().unwrap().push((level, msg.to_string()));
        })
    };
    let (mut ctx, _gpu) = software_context_with(ExecutionMode::Immediate, info);

    let stream = ctx
        .create_command_stream(&CommandStreamInfo::for_queue(QueueType::Graphics))
        .unwrap();
    ctx.record(stream, CmdEndRenderPass).unwrap();
    assert!(ctx.close_command_streams(&[stream]).is_err());

    let seen = seen.lock().unwrap();
    assert!(seen.iter().any(|(level, _)| *level == log::Level::Info));
    assert!(seen
        .iter()
        .any(|(level, msg)| *level == log::Level::Error && msg.contains("render pass")));
    drop(seen);
    ctx.destroy();
}
