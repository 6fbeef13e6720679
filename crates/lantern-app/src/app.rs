//! `LanternApp` trait definition.

use crate::context::AppContext;
use lantern_gpu::DrawSurface;
use winit::event::WindowEvent;

/// Per-frame timing handed to [`LanternApp::render`].
///
/// The slot being recorded and the target extent come from the surface.
#[derive(Debug, Clone, Copy)]
pub struct FrameInfo {
    /// Seconds since the previous frame.
    pub dt: f32,
    /// Seconds since startup.
    pub time: f32,
    pub frame_number: u64,
}

/// Trait for Lantern applications.
///
/// The framework owns the window, the device, the swapchain and the frame
/// cycle. Applications create their pipelines and resources in `init`,
/// record draws in `render` and destroy everything in `cleanup`.
pub trait LanternApp: Sized {
    /// Initialize the application.
    ///
    /// Called once after the window, device and frame engine exist. Set the
    /// pipeline to bind each frame with `ctx.engine_mut().set_pipeline(..)`.
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self>;

    /// Update application state. Called every frame before rendering.
    fn update(&mut self, ctx: &AppContext, dt: f32);

    /// Record draw calls for one frame.
    ///
    /// The render pass is already begun with the pipeline, viewport and
    /// scissor set. Submission and presentation happen after this returns.
    fn render(&mut self, frame: &FrameInfo, surface: &mut dyn DrawSurface) -> anyhow::Result<()>;

    /// Called after the window reports a new size.
    #[allow(unused_variables)]
    fn on_resize(&mut self, ctx: &mut AppContext, width: u32, height: u32) -> anyhow::Result<()> {
        Ok(())
    }

    /// Handle window events. Return `true` to stop further processing.
    #[allow(unused_variables)]
    fn on_event(&mut self, event: &WindowEvent) -> bool {
        false
    }

    /// Destroy GPU resources. The device is idle when this is called.
    #[allow(unused_variables)]
    fn cleanup(&mut self, ctx: &mut AppContext) {}
}
