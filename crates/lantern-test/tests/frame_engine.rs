//! Frame cycle behavior against the mock device.

use ash::vk::{self, Handle};
use lantern_gpu::{
    DrawSurface, FrameEngine, FrameEngineConfig, FrameState, GpuError, PipelineBinding,
    PresentOutcome, RecreateOutcome, SurfaceWindow,
};
use lantern_test::{engine_fixture, run_empty_frame, MockCall, MockDevice, MockWindow};
use std::sync::Arc;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("lantern_gpu=debug")
        .try_init();
}

fn extent(width: u32, height: u32) -> vk::Extent2D {
    vk::Extent2D { width, height }
}

#[test]
fn slots_rotate_round_robin() {
    init_tracing();
    for frames_in_flight in [2usize, 3] {
        let config = FrameEngineConfig::default().with_frames_in_flight(frames_in_flight);
        let (_device, mut window, mut engine) = engine_fixture(800, 600, config).unwrap();

        let mut slots = Vec::new();
        for _ in 0..frames_in_flight * 3 {
            let frame = engine.begin_frame(&mut window).unwrap().expect("frame");
            slots.push(frame.slot_index());
            frame.end(&mut window).unwrap();
        }

        let expected: Vec<usize> = (0..frames_in_flight * 3)
            .map(|i| i % frames_in_flight)
            .collect();
        assert_eq!(slots, expected);
        assert_eq!(engine.frame_count(), (frames_in_flight * 3) as u64);
        assert_eq!(engine.state(), FrameState::Idle);
    }
}

#[test]
fn frame_walks_through_every_operation_in_order() {
    init_tracing();
    let (device, mut window, mut engine) =
        engine_fixture(800, 600, FrameEngineConfig::default()).unwrap();
    device.clear_calls();

    let frame = engine.begin_frame(&mut window).unwrap().unwrap();
    frame.end(&mut window).unwrap();

    let kinds: Vec<&'static str> = device
        .calls()
        .iter()
        .map(|call| match call {
            MockCall::WaitForFence { .. } => "wait",
            MockCall::AcquireNextImage { .. } => "acquire",
            MockCall::ResetFence(_) => "reset_fence",
            MockCall::ResetCommandBuffer(_) => "reset_cmd",
            MockCall::BeginCommandBuffer(_) => "begin_cmd",
            MockCall::BeginRenderPass { .. } => "begin_pass",
            MockCall::SetViewport { .. } => "viewport",
            MockCall::SetScissor(_) => "scissor",
            MockCall::EndRenderPass => "end_pass",
            MockCall::EndCommandBuffer(_) => "end_cmd",
            MockCall::Submit { .. } => "submit",
            MockCall::Present { .. } => "present",
            _ => "other",
        })
        .collect();

    assert_eq!(
        kinds,
        [
            "wait",
            "acquire",
            "wait",
            "reset_fence",
            "reset_cmd",
            "begin_cmd",
            "begin_pass",
            "viewport",
            "scissor",
            "end_pass",
            "end_cmd",
            "submit",
            "present",
        ]
    );
}

#[test]
fn submit_and_present_use_the_slot_semaphores() {
    let (device, mut window, mut engine) =
        engine_fixture(800, 600, FrameEngineConfig::default()).unwrap();
    let slot = *engine.ring().slot(0).unwrap();

    let frame = engine.begin_frame(&mut window).unwrap().unwrap();
    assert_eq!(frame.command_buffer(), slot.command_buffer);
    let image_index = frame.image_index();
    frame.end(&mut window).unwrap();

    let calls = device.calls();
    assert!(calls.contains(&MockCall::AcquireNextImage {
        semaphore: slot.image_available
    }));
    assert!(calls.contains(&MockCall::Submit {
        cmd: slot.command_buffer,
        wait: slot.image_available,
        signal: slot.render_finished,
        fence: slot.in_flight,
    }));
    assert!(calls.contains(&MockCall::Present {
        image_index,
        wait: slot.render_finished,
    }));
}

#[test]
fn render_pass_clears_color_and_depth_at_swapchain_extent() {
    let (device, mut window, mut engine) =
        engine_fixture(800, 600, FrameEngineConfig::default()).unwrap();
    run_empty_frame(&mut engine, &mut window).unwrap();

    let begin = device
        .calls()
        .into_iter()
        .find(|c| matches!(c, MockCall::BeginRenderPass { .. }))
        .unwrap();
    match begin {
        MockCall::BeginRenderPass {
            extent: e,
            clear_values,
            ..
        } => {
            assert_eq!(e, extent(800, 600));
            assert_eq!(clear_values, 2);
        }
        _ => unreachable!(),
    }
    assert!(device
        .calls()
        .contains(&MockCall::SetViewport {
            width: 800,
            height: 600
        }));
}

#[test]
fn without_depth_only_color_is_cleared() {
    let config = FrameEngineConfig::default().with_depth(false);
    let (device, mut window, mut engine) = engine_fixture(800, 600, config).unwrap();
    run_empty_frame(&mut engine, &mut window).unwrap();

    assert_eq!(
        device.count(|c| matches!(c, MockCall::BeginRenderPass { clear_values: 1, .. })),
        1
    );
    assert_eq!(
        device.count(|c| matches!(c, MockCall::CreateDepthImage(_))),
        0
    );
}

#[test]
fn reused_slot_blocks_only_while_gpu_is_busy() {
    init_tracing();
    let (device, mut window, mut engine) =
        engine_fixture(800, 600, FrameEngineConfig::default()).unwrap();
    device.set_auto_complete(false);

    // Frames 1 and 2 use fresh slots and never wait on pending work.
    run_empty_frame(&mut engine, &mut window).unwrap();
    run_empty_frame(&mut engine, &mut window).unwrap();
    assert_eq!(
        device.count(|c| matches!(c, MockCall::WaitForFence { blocked: true, .. })),
        0
    );

    // Frame 3 reuses slot 0 while frame 1 is still on the GPU.
    run_empty_frame(&mut engine, &mut window).unwrap();
    assert_eq!(
        device.count(|c| matches!(c, MockCall::WaitForFence { blocked: true, .. })),
        1
    );

    // Once the GPU catches up, reusing slot 1 does not block.
    device.complete_all();
    device.clear_calls();
    run_empty_frame(&mut engine, &mut window).unwrap();
    assert_eq!(
        device.count(|c| matches!(c, MockCall::WaitForFence { blocked: true, .. })),
        0
    );
}

#[test]
fn engine_starts_with_every_slot_free() {
    let (device, _window, engine) =
        engine_fixture(800, 600, FrameEngineConfig::default().with_frames_in_flight(3)).unwrap();
    for i in 0..engine.frames_in_flight() {
        let fence = engine.ring().slot(i).unwrap().in_flight;
        assert!(device.is_fence_signaled(fence));
    }
}

#[test]
fn resize_flag_rebuilds_swapchain_after_present() {
    init_tracing();
    let (device, mut window, mut engine) =
        engine_fixture(800, 600, FrameEngineConfig::default()).unwrap();
    assert_eq!(device.swapchains_created(), 1);

    let frame = engine.begin_frame(&mut window).unwrap().unwrap();
    device.resize_surface(1024, 768);
    window.resize(1024, 768);
    frame.end(&mut window).unwrap();

    assert_eq!(device.swapchains_created(), 2);
    assert_eq!(engine.extent(), extent(1024, 768));
    assert!(!window.take_resized());

    let frame = engine.begin_frame(&mut window).unwrap().unwrap();
    assert_eq!(frame.extent(), extent(1024, 768));
    frame.end(&mut window).unwrap();
}

#[test]
fn out_of_date_acquire_rebuilds_and_skips_the_frame() {
    init_tracing();
    let (device, mut window, mut engine) =
        engine_fixture(800, 600, FrameEngineConfig::default()).unwrap();
    device.resize_surface(1024, 768);
    device.script_acquire(lantern_test::ScriptedAcquire::OutOfDate);

    assert!(engine.begin_frame(&mut window).unwrap().is_none());
    assert_eq!(engine.state(), FrameState::Idle);
    assert_eq!(engine.current_slot(), 0);
    assert_eq!(engine.extent(), extent(1024, 768));
    assert_eq!(device.count(|c| matches!(c, MockCall::Submit { .. })), 0);

    // The skipped frame left its fence signaled, so the retry does not hang.
    assert!(run_empty_frame(&mut engine, &mut window).unwrap());
    assert_eq!(engine.frame_count(), 1);
}

#[test]
fn out_of_date_present_rebuilds_after_advancing() {
    let (device, mut window, mut engine) =
        engine_fixture(800, 600, FrameEngineConfig::default()).unwrap();
    device.script_present(PresentOutcome::OutOfDate);

    let frame = engine.begin_frame(&mut window).unwrap().unwrap();
    let outcome = frame.end(&mut window).unwrap();

    assert_eq!(outcome, PresentOutcome::OutOfDate);
    assert_eq!(engine.current_slot(), 1);
    assert_eq!(engine.frame_count(), 1);
    assert_eq!(device.swapchains_created(), 2);
}

#[test]
fn suboptimal_present_is_shown_then_rebuilt() {
    init_tracing();
    let (device, mut window, mut engine) =
        engine_fixture(800, 600, FrameEngineConfig::default()).unwrap();
    device.script_present(PresentOutcome::Suboptimal);

    let frame = engine.begin_frame(&mut window).unwrap().unwrap();
    let outcome = frame.end(&mut window).unwrap();

    assert_eq!(outcome, PresentOutcome::Suboptimal);
    assert_eq!(engine.last_present(), Some(PresentOutcome::Suboptimal));
    assert_eq!(device.count(|c| matches!(c, MockCall::Present { .. })), 1);
    assert_eq!(device.swapchains_created(), 2);
}

#[test]
fn suboptimal_acquire_still_renders_then_rebuilds() {
    let (device, mut window, mut engine) =
        engine_fixture(800, 600, FrameEngineConfig::default()).unwrap();
    device.script_acquire(lantern_test::ScriptedAcquire::Suboptimal);

    let frame = engine.begin_frame(&mut window).unwrap().expect("suboptimal image is usable");
    let outcome = frame.end(&mut window).unwrap();

    assert_eq!(outcome, PresentOutcome::Optimal);
    assert_eq!(device.swapchains_created(), 2);

    // The flag does not stick to later frames.
    run_empty_frame(&mut engine, &mut window).unwrap();
    assert_eq!(device.swapchains_created(), 2);
}

#[test]
fn minimized_window_defers_recreation_until_restored() {
    init_tracing();
    let (device, mut window, mut engine) =
        engine_fixture(800, 600, FrameEngineConfig::default()).unwrap();

    let frame = engine.begin_frame(&mut window).unwrap().unwrap();
    window.minimize();
    frame.end(&mut window).unwrap();

    assert!(engine.recreate_pending());
    assert_eq!(device.swapchains_created(), 1);

    // No swapchain work and no frames while minimized.
    for _ in 0..3 {
        assert!(engine.begin_frame(&mut window).unwrap().is_none());
    }
    assert_eq!(device.swapchains_created(), 1);
    assert_eq!(device.count(|c| matches!(c, MockCall::DestroySwapchain(_))), 0);

    device.resize_surface(640, 480);
    window.resize(640, 480);
    assert!(run_empty_frame(&mut engine, &mut window).unwrap());
    assert!(!engine.recreate_pending());
    // The rebuild at begin consumed the restore event, so present does not rebuild again.
    assert_eq!(device.swapchains_created(), 2);
    assert!(!window.is_resize_pending());
    assert_eq!(engine.extent(), extent(640, 480));

    assert!(run_empty_frame(&mut engine, &mut window).unwrap());
    assert_eq!(device.swapchains_created(), 2);
}

#[test]
fn engine_created_while_minimized_waits_for_a_size() {
    init_tracing();
    let device = Arc::new(MockDevice::new(800, 600));
    let mut window = MockWindow::new(0, 0);
    let mut engine =
        FrameEngine::new(device.clone(), &window, FrameEngineConfig::default()).unwrap();

    assert!(engine.recreate_pending());
    assert!(engine.swapchain().state().is_none());
    assert_eq!(device.swapchains_created(), 0);
    assert!(engine.begin_frame(&mut window).unwrap().is_none());

    window.resize(800, 600);
    let frame = engine.begin_frame(&mut window).unwrap().expect("swapchain created");
    assert_eq!(device.swapchains_created(), 1);
    assert_eq!(frame.extent(), extent(800, 600));
    frame.end(&mut window).unwrap();
    assert_eq!(device.swapchains_created(), 1);
}

#[test]
fn surface_change_without_resize_event_rebuilds_at_acquire() {
    init_tracing();
    let (device, mut window, mut engine) =
        engine_fixture(800, 600, FrameEngineConfig::default()).unwrap();
    assert!(run_empty_frame(&mut engine, &mut window).unwrap());

    // The window system changed the surface but no resize event arrived.
    device.resize_surface(1024, 768);
    assert!(engine.begin_frame(&mut window).unwrap().is_none());
    assert_eq!(engine.state(), FrameState::Idle);
    assert_eq!(device.swapchains_created(), 2);
    assert_eq!(engine.extent(), extent(1024, 768));
    assert_eq!(engine.frame_count(), 1);

    device.clear_calls();
    let frame = engine.begin_frame(&mut window).unwrap().expect("rebuilt swapchain");
    assert_eq!(frame.extent(), extent(1024, 768));
    frame.end(&mut window).unwrap();

    let calls = device.calls();
    assert!(calls.iter().any(|c| matches!(
        c,
        MockCall::BeginRenderPass { extent: e, .. } if *e == extent(1024, 768)
    )));
    assert!(calls.contains(&MockCall::SetScissor(extent(1024, 768))));
    assert!(calls.contains(&MockCall::SetViewport {
        width: 1024,
        height: 768
    }));
    assert_eq!(device.swapchains_created(), 2);
}

#[test]
fn surface_change_mid_frame_presents_suboptimal_then_rebuilds() {
    let (device, mut window, mut engine) =
        engine_fixture(800, 600, FrameEngineConfig::default()).unwrap();

    let frame = engine.begin_frame(&mut window).unwrap().unwrap();
    device.resize_surface(640, 480);
    let outcome = frame.end(&mut window).unwrap();

    assert_eq!(outcome, PresentOutcome::Suboptimal);
    assert_eq!(device.swapchains_created(), 2);
    assert_eq!(engine.extent(), extent(640, 480));
    assert!(run_empty_frame(&mut engine, &mut window).unwrap());
}

#[test]
fn back_to_back_recreation_is_stable() {
    init_tracing();
    let (device, mut window, mut engine) =
        engine_fixture(800, 600, FrameEngineConfig::default()).unwrap();
    run_empty_frame(&mut engine, &mut window).unwrap();

    assert_eq!(
        engine.recreate_swapchain(&window).unwrap(),
        RecreateOutcome::Recreated
    );
    let first = engine.swapchain().state().unwrap();
    assert!(first.is_consistent());
    let (first_extent, first_images) = (first.extent, first.image_count());
    let live_after_first = device.live_handles();

    assert_eq!(
        engine.recreate_swapchain(&window).unwrap(),
        RecreateOutcome::Recreated
    );
    let second = engine.swapchain().state().unwrap();
    assert!(second.is_consistent());
    assert_eq!(second.extent, first_extent);
    assert_eq!(second.image_count(), first_images);
    assert_eq!(device.live_handles(), live_after_first);
    assert_eq!(device.swapchains_created(), 3);
    assert_eq!(engine.state(), FrameState::Idle);
    assert!(!engine.recreate_pending());

    assert!(run_empty_frame(&mut engine, &mut window).unwrap());
    assert_eq!(device.swapchains_created(), 3);
}

#[test]
fn fence_timeout_is_fatal() {
    init_tracing();
    let config = FrameEngineConfig::default().with_fence_timeout_ns(1_000_000);
    let (device, mut window, mut engine) = engine_fixture(800, 600, config).unwrap();

    run_empty_frame(&mut engine, &mut window).unwrap();
    run_empty_frame(&mut engine, &mut window).unwrap();
    device.hang_gpu();
    // The previous submissions completed; only new ones hang.
    run_empty_frame(&mut engine, &mut window).unwrap();
    run_empty_frame(&mut engine, &mut window).unwrap();

    let err = engine.begin_frame(&mut window).err().expect("timeout");
    assert!(matches!(err, GpuError::FenceTimeout { slot: 0 }));
    assert_eq!(engine.state(), FrameState::Idle);
}

#[test]
fn begin_while_recording_is_rejected() {
    let (_device, mut window, mut engine) =
        engine_fixture(800, 600, FrameEngineConfig::default()).unwrap();

    let frame = engine.begin_frame(&mut window).unwrap().unwrap();
    drop(frame);
    assert_eq!(engine.state(), FrameState::Recording);

    let err = engine.begin_frame(&mut window).err().expect("invalid state");
    assert!(matches!(err, GpuError::InvalidState(_)));

    let err = engine.recreate_swapchain(&window).unwrap_err();
    assert!(matches!(err, GpuError::InvalidState(_)));
}

#[test]
fn failed_command_buffer_end_is_a_recording_error() {
    let (device, mut window, mut engine) =
        engine_fixture(800, 600, FrameEngineConfig::default()).unwrap();
    device.fail_end_command_buffer();

    let frame = engine.begin_frame(&mut window).unwrap().unwrap();
    let err = frame.end(&mut window).unwrap_err();
    assert!(matches!(err, GpuError::CommandRecording(_)));
    assert_eq!(device.count(|c| matches!(c, MockCall::Submit { .. })), 0);
}

#[test]
fn pipeline_is_bound_and_draw_surface_forwards_calls() {
    let (device, mut window, mut engine) =
        engine_fixture(800, 600, FrameEngineConfig::default()).unwrap();

    // Without a pipeline, layout-dependent calls fail.
    let mut frame = engine.begin_frame(&mut window).unwrap().unwrap();
    assert!(frame.pipeline_layout().is_none());
    assert!(matches!(
        frame.push_constants(vk::ShaderStageFlags::VERTEX, 0, &[0; 4]),
        Err(GpuError::InvalidState(_))
    ));
    frame.end(&mut window).unwrap();

    let binding = PipelineBinding {
        pipeline: vk::Pipeline::from_raw(0xbeef),
        layout: vk::PipelineLayout::from_raw(0xcafe),
    };
    engine.set_pipeline(binding);
    device.clear_calls();

    let vertex_buffer = vk::Buffer::from_raw(0x10);
    let index_buffer = vk::Buffer::from_raw(0x11);
    let mut frame = engine.begin_frame(&mut window).unwrap().unwrap();
    frame.bind_vertex_buffers(0, &[vertex_buffer], &[0]);
    frame.bind_index_buffer(index_buffer, 0, vk::IndexType::UINT16);
    frame
        .bind_descriptor_sets(0, &[vk::DescriptorSet::from_raw(0x20)])
        .unwrap();
    frame
        .push_constants(vk::ShaderStageFlags::VERTEX, 0, &[0; 64])
        .unwrap();
    frame.draw_indexed(6, 1, 0, 0, 0);
    frame.draw(3, 1, 0, 0);
    frame.end(&mut window).unwrap();

    let calls = device.calls();
    assert!(calls.contains(&MockCall::BindPipeline(binding.pipeline)));
    assert!(calls.contains(&MockCall::BindVertexBuffers(vec![vertex_buffer])));
    assert!(calls.contains(&MockCall::BindIndexBuffer(index_buffer)));
    assert!(calls.contains(&MockCall::BindDescriptorSets {
        first_set: 0,
        count: 1
    }));
    assert!(calls.contains(&MockCall::PushConstants { size: 64 }));
    assert!(calls.contains(&MockCall::DrawIndexed { index_count: 6 }));
    assert!(calls.contains(&MockCall::Draw { vertex_count: 3 }));

    let bind_at = calls
        .iter()
        .position(|c| matches!(c, MockCall::BindPipeline(_)))
        .unwrap();
    let draw_at = calls
        .iter()
        .position(|c| matches!(c, MockCall::DrawIndexed { .. }))
        .unwrap();
    assert!(bind_at < draw_at);
}

#[test]
fn dropping_the_engine_releases_everything() {
    let device = Arc::new(MockDevice::new(800, 600));
    let mut window = MockWindow::new(800, 600);
    {
        let mut engine =
            FrameEngine::new(device.clone(), &window, FrameEngineConfig::default()).unwrap();
        for _ in 0..4 {
            run_empty_frame(&mut engine, &mut window).unwrap();
        }
        device.resize_surface(1024, 768);
        window.resize(1024, 768);
        run_empty_frame(&mut engine, &mut window).unwrap();
    }

    assert_eq!(device.live_handles(), 0);
    let calls = device.calls();
    assert_eq!(calls.last(), Some(&MockCall::DestroyRenderPass));
}
