//! Swapchain manager lifecycle against the mock device.

use ash::vk;
use lantern_gpu::{SwapchainConfig, SwapchainManager, DEPTH_FORMAT};
use lantern_test::{MockCall, MockDevice};

fn extent(width: u32, height: u32) -> vk::Extent2D {
    vk::Extent2D { width, height }
}

#[test]
fn per_image_resources_match_image_count() {
    let device = MockDevice::new(800, 600);
    let mut manager =
        SwapchainManager::new(&device, extent(800, 600), SwapchainConfig::default()).unwrap();

    let state = manager.state().unwrap();
    assert!(state.is_consistent());
    assert_eq!(state.images.len(), 3);
    assert_eq!(state.image_views.len(), state.images.len());
    assert_eq!(state.framebuffers.len(), state.images.len());
    assert_eq!(state.depth.as_ref().unwrap().image.format, DEPTH_FORMAT);

    assert!(manager.recreate(&device, extent(800, 600)).unwrap());
    let state = manager.state().unwrap();
    assert!(state.is_consistent());
    assert_eq!(state.framebuffers.len(), state.images.len());

    unsafe { manager.destroy_all(&device) }.unwrap();
    assert_eq!(device.live_handles(), 0);
}

#[test]
fn framebuffers_carry_depth_attachment() {
    let device = MockDevice::new(800, 600);
    let mut manager =
        SwapchainManager::new(&device, extent(800, 600), SwapchainConfig::default()).unwrap();
    assert_eq!(
        device.count(|c| matches!(c, MockCall::CreateFramebuffer { attachments: 2, .. })),
        3
    );
    unsafe { manager.destroy_all(&device) }.unwrap();

    let device = MockDevice::new(800, 600);
    let config = SwapchainConfig {
        depth: false,
        ..SwapchainConfig::default()
    };
    let mut manager = SwapchainManager::new(&device, extent(800, 600), config).unwrap();
    assert!(manager.state().unwrap().depth.is_none());
    assert_eq!(
        device.count(|c| matches!(c, MockCall::CreateFramebuffer { attachments: 1, .. })),
        3
    );
    assert!(device
        .calls()
        .contains(&MockCall::CreateRenderPass { depth: false }));
    unsafe { manager.destroy_all(&device) }.unwrap();
}

#[test]
fn recreate_follows_the_surface_extent() {
    let device = MockDevice::new(800, 600);
    let mut manager =
        SwapchainManager::new(&device, extent(800, 600), SwapchainConfig::default()).unwrap();
    assert_eq!(manager.extent(), extent(800, 600));

    device.resize_surface(1024, 768);
    assert!(manager.recreate(&device, extent(1024, 768)).unwrap());
    assert_eq!(manager.extent(), extent(1024, 768));
    assert!(device.calls().contains(&MockCall::CreateDepthImage(extent(1024, 768))));

    // Recreating again without a size change gives the same result.
    let before = manager.state().unwrap().image_count();
    assert!(manager.recreate(&device, extent(1024, 768)).unwrap());
    assert_eq!(manager.extent(), extent(1024, 768));
    assert_eq!(manager.state().unwrap().image_count(), before);
    assert_eq!(device.swapchains_created(), 3);

    unsafe { manager.destroy_all(&device) }.unwrap();
}

#[test]
fn flexible_surface_uses_clamped_window_size() {
    let device = MockDevice::new(800, 600);
    device.set_flexible_extent();
    let mut manager =
        SwapchainManager::new(&device, extent(9000, 300), SwapchainConfig::default()).unwrap();
    assert_eq!(manager.extent(), extent(4096, 300));
    unsafe { manager.destroy_all(&device) }.unwrap();
}

#[test]
fn zero_area_recreate_keeps_existing_swapchain() {
    let device = MockDevice::new(800, 600);
    let mut manager =
        SwapchainManager::new(&device, extent(800, 600), SwapchainConfig::default()).unwrap();
    device.clear_calls();

    assert!(!manager.recreate(&device, extent(0, 0)).unwrap());
    assert!(!manager.recreate(&device, extent(800, 0)).unwrap());

    assert!(device.calls().is_empty());
    assert_eq!(manager.extent(), extent(800, 600));
    unsafe { manager.destroy_all(&device) }.unwrap();
}

#[test]
fn recreate_idles_before_destroying() {
    let device = MockDevice::new(800, 600);
    let mut manager =
        SwapchainManager::new(&device, extent(800, 600), SwapchainConfig::default()).unwrap();
    device.clear_calls();

    manager.recreate(&device, extent(800, 600)).unwrap();
    let calls = device.calls();
    let idle = calls.iter().position(|c| *c == MockCall::WaitIdle).unwrap();
    let destroy = calls
        .iter()
        .position(|c| matches!(c, MockCall::DestroyFramebuffer(_)))
        .unwrap();
    assert!(idle < destroy);
    unsafe { manager.destroy_all(&device) }.unwrap();
}

#[test]
fn teardown_releases_dependents_first() {
    let device = MockDevice::new(800, 600);
    let mut manager =
        SwapchainManager::new(&device, extent(800, 600), SwapchainConfig::default()).unwrap();
    device.clear_calls();

    unsafe { manager.destroy(&device) }.unwrap();
    assert!(manager.state().is_none());

    let calls = device.calls();
    let last_framebuffer = calls
        .iter()
        .rposition(|c| matches!(c, MockCall::DestroyFramebuffer(_)))
        .unwrap();
    let depth = calls
        .iter()
        .position(|c| *c == MockCall::DestroyDepthImage)
        .unwrap();
    let first_view = calls
        .iter()
        .position(|c| matches!(c, MockCall::DestroyImageView(_)))
        .unwrap();
    let swapchain = calls
        .iter()
        .position(|c| matches!(c, MockCall::DestroySwapchain(_)))
        .unwrap();

    assert!(last_framebuffer < depth);
    assert!(last_framebuffer < first_view);
    assert_eq!(swapchain, calls.len() - 1);

    // The render pass survives until the manager is torn down.
    assert_ne!(manager.render_pass(), vk::RenderPass::null());
    unsafe { manager.destroy_all(&device) }.unwrap();
    assert_eq!(manager.render_pass(), vk::RenderPass::null());
    assert_eq!(device.live_handles(), 0);
}

#[test]
fn create_requires_prior_destroy() {
    let device = MockDevice::new(800, 600);
    let mut manager =
        SwapchainManager::new(&device, extent(800, 600), SwapchainConfig::default()).unwrap();
    assert!(manager.create(&device, extent(800, 600)).is_err());

    unsafe { manager.destroy(&device) }.unwrap();
    assert!(manager.create(&device, extent(800, 600)).unwrap());
    unsafe { manager.destroy_all(&device) }.unwrap();
}

#[test]
fn vsync_selects_fifo_and_otherwise_mailbox() {
    let device = MockDevice::new(800, 600);
    let mut manager =
        SwapchainManager::new(&device, extent(800, 600), SwapchainConfig::default()).unwrap();
    assert_eq!(
        manager.state().unwrap().present_mode,
        vk::PresentModeKHR::FIFO
    );
    unsafe { manager.destroy_all(&device) }.unwrap();

    let config = SwapchainConfig {
        vsync: false,
        ..SwapchainConfig::default()
    };
    let mut manager = SwapchainManager::new(&device, extent(800, 600), config).unwrap();
    assert_eq!(
        manager.state().unwrap().present_mode,
        vk::PresentModeKHR::MAILBOX
    );
    assert_eq!(manager.format(), vk::Format::B8G8R8A8_SRGB);
    unsafe { manager.destroy_all(&device) }.unwrap();
}
