//! The winit window as seen by the frame engine.

use ash::vk;
use lantern_gpu::SurfaceWindow;
use std::sync::Arc;
use winit::window::Window;

/// Window plus the resize flag raised by `WindowEvent::Resized`.
pub struct WindowState {
    window: Arc<Window>,
    resized: bool,
}

impl WindowState {
    pub fn new(window: Arc<Window>) -> Self {
        Self {
            window,
            resized: false,
        }
    }

    pub fn window(&self) -> &Arc<Window> {
        &self.window
    }

    /// Record that the window changed size; the swapchain is rebuilt after the next present.
    pub fn mark_resized(&mut self) {
        self.resized = true;
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }
}

impl SurfaceWindow for WindowState {
    fn drawable_extent(&self) -> vk::Extent2D {
        if self.window.is_minimized() == Some(true) {
            return vk::Extent2D::default();
        }
        let size = self.window.inner_size();
        vk::Extent2D {
            width: size.width,
            height: size.height,
        }
    }

    fn take_resized(&mut self) -> bool {
        std::mem::take(&mut self.resized)
    }
}
