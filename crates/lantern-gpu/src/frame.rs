//! Frame engine.
//!
//! Drives one frame at a time through
//! `Idle -> ImageAcquired -> Recording -> Submitted -> Presented -> Idle`.
//!
//! ```text
//! begin_frame:  wait slot fence -> acquire image -> reset fence + cmd
//!               -> begin cmd + render pass -> bind pipeline -> viewport/scissor
//! Frame::end:   end render pass + cmd -> submit -> present
//!               -> advance slot -> recreate swapchain if stale or resized
//! ```
//!
//! A stale swapchain is never an error. `begin_frame` returns `Ok(None)` and
//! the caller simply tries again on the next iteration.

use crate::backend::{AcquireOutcome, FrameDevice, PresentOutcome};
use crate::draw::DrawSurface;
use crate::error::{GpuError, Result};
use crate::swapchain::{SwapchainConfig, SwapchainManager};
use crate::sync::{FrameRing, FrameSlot};
use ash::vk;
use std::sync::Arc;

/// The window as seen by the frame engine.
pub trait SurfaceWindow {
    /// Current drawable size in pixels. Zero while minimized.
    fn drawable_extent(&self) -> vk::Extent2D;

    /// Return whether a resize happened since the last call, clearing the flag.
    fn take_resized(&mut self) -> bool;
}

/// Where the engine is in the frame cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    ImageAcquired,
    Recording,
    Submitted,
    Presented,
}

/// Result of a swapchain recreation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecreateOutcome {
    Recreated,
    /// The drawable has zero area; retried at the next `begin_frame`.
    Deferred,
}

/// Pipeline bound at the start of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineBinding {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

/// Frame engine configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameEngineConfig {
    /// Number of frames the CPU may record ahead of the GPU.
    pub frames_in_flight: usize,
    /// Longest wait on a slot fence before the device is considered lost.
    pub fence_timeout_ns: u64,
    pub vsync: bool,
    pub depth: bool,
    pub clear_color: [f32; 4],
}

impl Default for FrameEngineConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            fence_timeout_ns: u64::MAX,
            vsync: true,
            depth: true,
            clear_color: [0.5, 0.3, 0.5, 1.0],
        }
    }
}

impl FrameEngineConfig {
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }

    pub fn with_fence_timeout_ns(mut self, timeout_ns: u64) -> Self {
        self.fence_timeout_ns = timeout_ns;
        self
    }

    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
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
}

/// Owner of the swapchain, the frame ring and the frame cycle.
pub struct FrameEngine<D: FrameDevice> {
    device: Arc<D>,
    config: FrameEngineConfig,
    swapchain: SwapchainManager,
    ring: FrameRing,
    state: FrameState,
    current_slot: usize,
    image_index: Option<u32>,
    frame_count: u64,
    last_present: Option<PresentOutcome>,
    pipeline: Option<PipelineBinding>,
    recreate_pending: bool,
    acquired_suboptimal: bool,
}

impl<D: FrameDevice> FrameEngine<D> {
    /// Create the swapchain and frame ring for `window`.
    pub fn new<W>(device: Arc<D>, window: &W, config: FrameEngineConfig) -> Result<Self>
    where
        W: SurfaceWindow + ?Sized,
    {
        let mut swapchain = SwapchainManager::new(
            &*device,
            window.drawable_extent(),
            SwapchainConfig {
                vsync: config.vsync,
                depth: config.depth,
            },
        )?;

        let ring = match FrameRing::with_fence_timeout(
            &*device,
            config.frames_in_flight,
            config.fence_timeout_ns,
        ) {
            Ok(ring) => ring,
            Err(e) => {
                if let Err(cleanup) = unsafe { swapchain.destroy_all(&*device) } {
                    tracing::warn!("Failed to release swapchain: {cleanup}");
                }
                return Err(e);
            }
        };

        let recreate_pending = swapchain.state().is_none();
        if recreate_pending {
            tracing::debug!("Window starts with zero area, swapchain creation pending");
        }

        tracing::info!(
            frames_in_flight = config.frames_in_flight,
            "Frame engine created"
        );

        Ok(Self {
            device,
            config,
            swapchain,
            ring,
            state: FrameState::Idle,
            current_slot: 0,
            image_index: None,
            frame_count: 0,
            last_present: None,
            pipeline: None,
            recreate_pending,
            acquired_suboptimal: false,
        })
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    pub fn config(&self) -> &FrameEngineConfig {
        &self.config
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Slot the next (or current) frame records into.
    pub fn current_slot(&self) -> usize {
        self.current_slot
    }

    /// Swapchain image acquired for the frame being recorded.
    pub fn image_index(&self) -> Option<u32> {
        self.image_index
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    /// Number of frames that went through `end`.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn last_present(&self) -> Option<PresentOutcome> {
        self.last_present
    }

    pub fn frames_in_flight(&self) -> usize {
        self.ring.len()
    }

    /// Render pass every pipeline drawing through this engine must be compatible with.
    pub fn render_pass(&self) -> vk::RenderPass {
        self.swapchain.render_pass()
    }

    pub fn swapchain(&self) -> &SwapchainManager {
        &self.swapchain
    }

    pub fn ring(&self) -> &FrameRing {
        &self.ring
    }

    /// Whether a deferred recreation is waiting for a non-zero drawable.
    pub fn recreate_pending(&self) -> bool {
        self.recreate_pending
    }

    pub fn pipeline(&self) -> Option<PipelineBinding> {
        self.pipeline
    }

    pub fn set_pipeline(&mut self, binding: PipelineBinding) {
        self.pipeline = Some(binding);
    }

    pub fn clear_pipeline(&mut self) {
        self.pipeline = None;
    }

    pub fn set_clear_color(&mut self, color: [f32; 4]) {
        self.config.clear_color = color;
    }

    /// Idle the device and rebuild the swapchain for the window's current size.
    pub fn recreate_swapchain<W>(&mut self, window: &W) -> Result<RecreateOutcome>
    where
        W: SurfaceWindow + ?Sized,
    {
        if self.state != FrameState::Idle {
            return Err(GpuError::InvalidState(format!(
                "swapchain recreation requested in state {:?}",
                self.state
            )));
        }

        if self.swapchain.recreate(&*self.device, window.drawable_extent())? {
            self.recreate_pending = false;
            Ok(RecreateOutcome::Recreated)
        } else {
            self.recreate_pending = true;
            Ok(RecreateOutcome::Deferred)
        }
    }

    /// Start a frame.
    ///
    /// Returns `Ok(None)` when no frame can be recorded right now: the
    /// swapchain was stale and has been rebuilt, or the window has zero area.
    ///
    /// A rebuild done here consumes the window's resize flag.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn begin_frame<W>(&mut self, window: &mut W) -> Result<Option<Frame<'_, D>>>
    where
        W: SurfaceWindow + ?Sized,
    {
        if self.state != FrameState::Idle {
            return Err(GpuError::InvalidState(format!(
                "begin_frame called in state {:?}",
                self.state
            )));
        }

        if self.recreate_pending
            && self.rebuild_before_acquire(window)? == RecreateOutcome::Deferred
        {
            return Ok(None);
        }

        let slot_index = self.current_slot;
        self.ring.wait(&*self.device, slot_index)?;
        let slot = *self.ring.slot(slot_index)?;

        let Some(swapchain) = self.swapchain.state().map(|s| s.swapchain) else {
            return Err(GpuError::InvalidState("no swapchain".to_string()));
        };

        let acquired = unsafe {
            self.device
                .acquire_next_image(swapchain, slot.image_available, u64::MAX)
        }?;

        let image_index = match acquired {
            AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            } => {
                if suboptimal {
                    tracing::debug!(image_index, "Acquired image from suboptimal swapchain");
                }
                self.acquired_suboptimal = suboptimal;
                image_index
            }
            AcquireOutcome::OutOfDate => {
                tracing::debug!(slot = slot_index, "Swapchain out of date at acquire");
                self.rebuild_before_acquire(window)?;
                return Ok(None);
            }
        };

        self.state = FrameState::ImageAcquired;
        self.image_index = Some(image_index);

        let cmd = self.ring.acquire(&*self.device, slot_index)?;
        self.begin_recording(cmd, image_index)?;
        self.state = FrameState::Recording;

        tracing::trace!(slot = slot_index, image_index, "Frame recording");

        Ok(Some(Frame {
            engine: self,
            cmd,
            slot,
            slot_index,
        }))
    }

    /// Recreate for the current drawable size. On success the swapchain already
    /// matches any pending resize, so the flag is cleared.
    fn rebuild_before_acquire<W>(&mut self, window: &mut W) -> Result<RecreateOutcome>
    where
        W: SurfaceWindow + ?Sized,
    {
        let outcome = self.recreate_swapchain(&*window)?;
        if outcome == RecreateOutcome::Recreated && window.take_resized() {
            tracing::trace!("Resize already handled by rebuild");
        }
        Ok(outcome)
    }

    fn begin_recording(&self, cmd: vk::CommandBuffer, image_index: u32) -> Result<()> {
        let state = self
            .swapchain
            .state()
            .ok_or_else(|| GpuError::InvalidState("no swapchain".to_string()))?;
        let framebuffer = *state.framebuffers.get(image_index as usize).ok_or_else(|| {
            GpuError::InvalidState(format!("no framebuffer for image {image_index}"))
        })?;
        let extent = state.extent;

        let mut clear_values = vec![vk::ClearValue {
            color: vk::ClearColorValue {
                float32: self.config.clear_color,
            },
        }];
        if state.depth.is_some() {
            clear_values.push(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            });
        }

        unsafe {
            self.device.begin_command_buffer(cmd)?;
            self.device.cmd_begin_render_pass(
                cmd,
                self.swapchain.render_pass(),
                framebuffer,
                extent,
                &clear_values,
            );

            if let Some(binding) = self.pipeline {
                self.device.cmd_bind_pipeline(cmd, binding.pipeline);
            }

            self.device.cmd_set_viewport(cmd, full_viewport(extent));
            self.device.cmd_set_scissor(
                cmd,
                vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent,
                },
            );
        }

        Ok(())
    }

    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    fn end_frame<W>(
        &mut self,
        cmd: vk::CommandBuffer,
        slot: FrameSlot,
        window: &mut W,
    ) -> Result<PresentOutcome>
    where
        W: SurfaceWindow + ?Sized,
    {
        if self.state != FrameState::Recording {
            return Err(GpuError::InvalidState(format!(
                "end called in state {:?}",
                self.state
            )));
        }
        let image_index = self
            .image_index
            .ok_or_else(|| GpuError::InvalidState("no acquired image".to_string()))?;
        let swapchain = self
            .swapchain
            .state()
            .map(|s| s.swapchain)
            .ok_or_else(|| GpuError::InvalidState("no swapchain".to_string()))?;

        unsafe {
            self.device.cmd_end_render_pass(cmd);
            self.device.end_command_buffer(cmd)?;

            self.device.submit_frame(
                cmd,
                slot.image_available,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                slot.render_finished,
                slot.in_flight,
            )?;
        }
        self.state = FrameState::Submitted;

        let outcome = unsafe {
            self.device
                .present(swapchain, image_index, slot.render_finished)
        }?;
        self.state = FrameState::Presented;
        self.last_present = Some(outcome);

        self.current_slot = (self.current_slot + 1) % self.ring.len();
        self.frame_count += 1;
        self.image_index = None;
        self.state = FrameState::Idle;

        let resized = window.take_resized();
        let acquired_suboptimal = std::mem::take(&mut self.acquired_suboptimal);
        if outcome.needs_recreate() || resized || acquired_suboptimal {
            match outcome {
                PresentOutcome::Suboptimal => tracing::warn!("Presented to suboptimal swapchain"),
                PresentOutcome::OutOfDate => tracing::debug!("Swapchain out of date at present"),
                PresentOutcome::Optimal => tracing::debug!(resized, "Rebuilding swapchain"),
            }
            self.recreate_swapchain(&*window)?;
        }

        Ok(outcome)
    }
}

impl<D: FrameDevice> Drop for FrameEngine<D> {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            tracing::error!("Failed to idle device before teardown: {e}");
        }
        unsafe {
            self.ring.destroy(&*self.device);
            if let Err(e) = self.swapchain.destroy_all(&*self.device) {
                tracing::error!("Failed to destroy swapchain: {e}");
            }
        }
    }
}

fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

/// A frame being recorded.
///
/// Finish it with [`end`](Self::end). Dropping it instead leaves the engine
/// in `Recording` and the next `begin_frame` fails.
pub struct Frame<'a, D: FrameDevice> {
    engine: &'a mut FrameEngine<D>,
    cmd: vk::CommandBuffer,
    slot: FrameSlot,
    slot_index: usize,
}

impl<D: FrameDevice> Frame<'_, D> {
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.cmd
    }

    pub fn image_index(&self) -> u32 {
        self.engine.image_index.unwrap_or_default()
    }

    pub fn device(&self) -> &D {
        &self.engine.device
    }

    /// Submit and present the frame.
    pub fn end<W>(self, window: &mut W) -> Result<PresentOutcome>
    where
        W: SurfaceWindow + ?Sized,
    {
        let Self {
            engine, cmd, slot, ..
        } = self;
        engine.end_frame(cmd, slot, window)
    }

    fn layout(&self) -> Result<vk::PipelineLayout> {
        self.engine
            .pipeline
            .map(|p| p.layout)
            .ok_or_else(|| GpuError::InvalidState("no pipeline bound".to_string()))
    }
}

impl<D: FrameDevice> DrawSurface for Frame<'_, D> {
    fn bind_vertex_buffers(
        &mut self,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    ) {
        unsafe {
            self.engine
                .device
                .cmd_bind_vertex_buffers(self.cmd, first_binding, buffers, offsets);
        }
    }

    fn bind_index_buffer(
        &mut self,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        unsafe {
            self.engine
                .device
                .cmd_bind_index_buffer(self.cmd, buffer, offset, index_type);
        }
    }

    fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        unsafe {
            self.engine.device.cmd_draw(
                self.cmd,
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            );
        }
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.engine.device.cmd_draw_indexed(
                self.cmd,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
    }

    fn bind_descriptor_sets(&mut self, first_set: u32, sets: &[vk::DescriptorSet]) -> Result<()> {
        let layout = self.layout()?;
        unsafe {
            self.engine
                .device
                .cmd_bind_descriptor_sets(self.cmd, layout, first_set, sets);
        }
        Ok(())
    }

    fn push_constants(
        &mut self,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) -> Result<()> {
        let layout = self.layout()?;
        unsafe {
            self.engine
                .device
                .cmd_push_constants(self.cmd, layout, stages, offset, data);
        }
        Ok(())
    }

    fn slot_index(&self) -> usize {
        self.slot_index
    }

    fn extent(&self) -> vk::Extent2D {
        self.engine.swapchain.extent()
    }

    fn pipeline_layout(&self) -> Option<vk::PipelineLayout> {
        self.engine.pipeline.map(|p| p.layout)
    }
}
