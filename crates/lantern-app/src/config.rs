//! Application configuration.

use lantern_gpu::FrameEngineConfig;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Window title.
    pub title: String,
    /// Initial window width.
    pub width: u32,
    /// Initial window height.
    pub height: u32,
    /// Target frames per second (None for unlimited).
    pub target_fps: Option<u32>,
    pub vsync: bool,
    /// Enable Vulkan validation layers (default: debug builds only).
    pub validation: bool,
    pub frames_in_flight: usize,
    /// Give the swapchain framebuffers a depth attachment.
    pub depth: bool,
    pub clear_color: [f32; 4],
}

impl Default for AppConfig {
    fn default() -> Self {
        let engine = FrameEngineConfig::default();
        Self {
            title: "Lantern".to_string(),
            width: 800,
            height: 600,
            target_fps: None,
            vsync: engine.vsync,
            validation: cfg!(debug_assertions),
            frames_in_flight: engine.frames_in_flight,
            depth: engine.depth,
            clear_color: engine.clear_color,
        }
    }
}

impl AppConfig {
    /// Create a new config with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Set the window dimensions.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_target_fps(mut self, fps: u32) -> Self {
        self.target_fps = Some(fps);
        self
    }

    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }

    pub fn with_depth(mut self, depth: bool) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    /// Frame engine settings derived from this config.
    pub fn frame_engine_config(&self) -> FrameEngineConfig {
        FrameEngineConfig::default()
            .with_frames_in_flight(self.frames_in_flight)
            .with_vsync(self.vsync)
            .with_depth(self.depth)
            .with_clear_color(self.clear_color)
    }

    /// Minimum time between frames when a target FPS is set.
    pub fn target_frame_time(&self) -> Option<std::time::Duration> {
        self.target_fps
            .filter(|&fps| fps > 0)
            .map(|fps| std::time::Duration::from_nanos(1_000_000_000 / u64::from(fps)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn defaults_open_an_800x600_window() {
        let config = AppConfig::default();
        assert_eq!(config.title, "Lantern");
        assert_eq!((config.width, config.height), (800, 600));
        assert_eq!(config.frames_in_flight, 2);
        assert!(config.vsync);
        assert!(config.depth);
        assert_eq!(config.validation, cfg!(debug_assertions));
        assert_eq!(config.target_frame_time(), None);
    }

    #[test]
    fn builders_flow_into_engine_config() {
        let config = AppConfig::new("viewer")
            .with_size(1024, 768)
            .with_vsync(false)
            .with_frames_in_flight(3)
            .with_depth(false)
            .with_clear_color([0.0, 0.0, 0.0, 1.0]);
        assert_eq!(config.title, "viewer");

        let engine = config.frame_engine_config();
        assert_eq!(engine.frames_in_flight, 3);
        assert!(!engine.vsync);
        assert!(!engine.depth);
        assert_eq!(engine.clear_color, [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(engine.fence_timeout_ns, u64::MAX);
    }

    #[test]
    fn target_fps_sets_frame_budget() {
        let config = AppConfig::default().with_target_fps(50);
        assert_eq!(config.target_frame_time(), Some(Duration::from_millis(20)));
        assert_eq!(AppConfig::default().with_target_fps(0).target_frame_time(), None);
    }
}
