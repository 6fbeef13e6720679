//! Window stand-in with a settable drawable size.

use ash::vk;
use lantern_gpu::SurfaceWindow;

/// Window whose size and resize flag are driven by the test.
#[derive(Debug, Clone, Copy)]
pub struct MockWindow {
    extent: vk::Extent2D,
    resized: bool,
}

impl MockWindow {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            extent: vk::Extent2D { width, height },
            resized: false,
        }
    }

    /// Change the drawable size and raise the resize flag.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.extent = vk::Extent2D { width, height };
        self.resized = true;
    }

    pub fn minimize(&mut self) {
        self.resize(0, 0);
    }

    pub fn is_resize_pending(&self) -> bool {
        self.resized
    }
}

impl SurfaceWindow for MockWindow {
    fn drawable_extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn take_resized(&mut self) -> bool {
        std::mem::take(&mut self.resized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_flag_is_cleared_once_taken() {
        let mut window = MockWindow::new(800, 600);
        assert!(!window.take_resized());

        window.resize(1024, 768);
        assert!(window.is_resize_pending());
        assert!(window.take_resized());
        assert!(!window.take_resized());
        assert_eq!(window.drawable_extent().width, 1024);
    }

    #[test]
    fn minimize_reports_zero_area() {
        let mut window = MockWindow::new(800, 600);
        window.minimize();
        let extent = window.drawable_extent();
        assert_eq!((extent.width, extent.height), (0, 0));
        assert!(window.take_resized());
    }
}
