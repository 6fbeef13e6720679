//! Application context.

use crate::window::WindowState;
use ash::vk;
use lantern_gpu::{DeviceContext, FrameEngine};
use std::sync::Arc;
use std::time::Instant;

/// Everything an application can reach outside of frame recording.
///
/// Fields drop in declaration order: the engine releases its swapchain
/// before the device, and the device its surface before the window.
pub struct AppContext {
    pub(crate) engine: FrameEngine<DeviceContext>,
    pub(crate) device: Arc<DeviceContext>,
    pub(crate) window: WindowState,
    pub(crate) last_frame_time: Instant,
    start_time: Instant,
}

impl AppContext {
    pub(crate) fn new(
        engine: FrameEngine<DeviceContext>,
        device: Arc<DeviceContext>,
        window: WindowState,
    ) -> Self {
        let now = Instant::now();
        Self {
            engine,
            device,
            window,
            last_frame_time: now,
            start_time: now,
        }
    }

    pub fn device(&self) -> &DeviceContext {
        &self.device
    }

    pub fn engine(&self) -> &FrameEngine<DeviceContext> {
        &self.engine
    }

    /// Mutable engine access, e.g. to set the pipeline bound each frame.
    pub fn engine_mut(&mut self) -> &mut FrameEngine<DeviceContext> {
        &mut self.engine
    }

    pub fn window(&self) -> &winit::window::Window {
        self.window.window()
    }

    /// Current swapchain extent. Zero while no swapchain exists.
    pub fn extent(&self) -> vk::Extent2D {
        self.engine.extent()
    }

    /// Width over height, 1.0 while the window has no area.
    pub fn aspect_ratio(&self) -> f32 {
        let extent = self.extent();
        if extent.height == 0 {
            1.0
        } else {
            extent.width as f32 / extent.height as f32
        }
    }

    pub fn frames_in_flight(&self) -> usize {
        self.engine.frames_in_flight()
    }

    pub fn frame_count(&self) -> u64 {
        self.engine.frame_count()
    }

    /// Seconds since the application started.
    pub fn elapsed(&self) -> f32 {
        self.start_time.elapsed().as_secs_f32()
    }
}
