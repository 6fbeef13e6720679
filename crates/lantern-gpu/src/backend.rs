//! Device operations the frame engine is built on.
//!
//! The swapchain manager, frame ring and frame engine only talk to the GPU
//! through these traits. [`DeviceContext`](crate::DeviceContext) implements
//! them with `ash`; tests implement them with a mock device.
//!
//! Every method taking a handle is `unsafe`: the handle must have been created
//! by the same device and must not have been destroyed.

use crate::error::Result;
use crate::memory::GpuImage;
use ash::vk;

/// Surface properties queried before (re)creating a swapchain.
#[derive(Debug, Clone)]
pub struct SurfaceSupport {
    /// Raw surface capabilities.
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats.
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes.
    pub present_modes: Vec<vk::PresentModeKHR>,
}

/// Everything needed to create a swapchain object.
#[derive(Debug, Clone, Copy)]
pub struct SwapchainDesc {
    pub min_image_count: u32,
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

/// Result of asking the presentation engine for the next image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image was acquired and can be rendered to.
    Acquired { image_index: u32, suboptimal: bool },
    /// The swapchain no longer matches the surface; no image was acquired.
    OutOfDate,
}

/// Result of queueing an image for presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Optimal,
    /// Presented, but the swapchain no longer matches the surface exactly.
    Suboptimal,
    /// The swapchain is stale and must be recreated.
    OutOfDate,
}

impl PresentOutcome {
    /// Whether the swapchain should be rebuilt after this presentation.
    pub fn needs_recreate(self) -> bool {
        !matches!(self, Self::Optimal)
    }
}

/// Swapchain and size-dependent resource creation.
pub trait SurfaceDevice {
    /// Query formats, present modes and capabilities of the surface.
    fn surface_support(&self) -> Result<SurfaceSupport>;

    /// Create a swapchain for the device's surface.
    unsafe fn create_swapchain(&self, desc: &SwapchainDesc) -> Result<vk::SwapchainKHR>;

    /// Retrieve the presentable images of a swapchain, in index order.
    unsafe fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> Result<Vec<vk::Image>>;

    unsafe fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);

    /// Create a 2D view covering the first mip level and layer of `image`.
    unsafe fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> Result<vk::ImageView>;

    unsafe fn destroy_image_view(&self, view: vk::ImageView);

    /// Create the single-subpass render pass used for presentation.
    unsafe fn create_render_pass(
        &self,
        color_format: vk::Format,
        depth_format: Option<vk::Format>,
    ) -> Result<vk::RenderPass>;

    unsafe fn destroy_render_pass(&self, render_pass: vk::RenderPass);

    unsafe fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer>;

    unsafe fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);

    /// Allocate a device-local depth image.
    fn create_depth_image(&self, extent: vk::Extent2D, format: vk::Format) -> Result<GpuImage>;

    unsafe fn destroy_depth_image(&self, image: &mut GpuImage) -> Result<()>;

    /// Block until all submitted work on every queue has finished.
    fn wait_idle(&self) -> Result<()>;
}

/// Synchronization primitives and command buffer allocation.
pub trait SyncDevice {
    fn create_semaphore(&self) -> Result<vk::Semaphore>;

    unsafe fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence>;

    unsafe fn destroy_fence(&self, fence: vk::Fence);

    /// Block until `fence` is signaled or `timeout_ns` elapses.
    ///
    /// A timeout is reported as `vk::Result::TIMEOUT`.
    unsafe fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> Result<()>;

    unsafe fn reset_fence(&self, fence: vk::Fence) -> Result<()>;

    /// Create a graphics-queue command pool whose buffers can be reset individually.
    fn create_command_pool(&self) -> Result<vk::CommandPool>;

    unsafe fn destroy_command_pool(&self, pool: vk::CommandPool);

    unsafe fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>>;

    unsafe fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()>;
}

/// Command recording.
pub trait CommandDevice {
    unsafe fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()>;

    unsafe fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()>;

    unsafe fn cmd_begin_render_pass(
        &self,
        cmd: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[vk::ClearValue],
    );

    unsafe fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer);

    unsafe fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, pipeline: vk::Pipeline);

    unsafe fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, viewport: vk::Viewport);

    unsafe fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, scissor: vk::Rect2D);

    unsafe fn cmd_bind_vertex_buffers(
        &self,
        cmd: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    );

    unsafe fn cmd_bind_index_buffer(
        &self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    );

    unsafe fn cmd_draw(
        &self,
        cmd: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    );

    unsafe fn cmd_draw_indexed(
        &self,
        cmd: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );

    unsafe fn cmd_bind_descriptor_sets(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    );

    unsafe fn cmd_push_constants(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    );
}

/// Image acquisition, queue submission and presentation.
pub trait PresentDevice {
    unsafe fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        image_available: vk::Semaphore,
        timeout_ns: u64,
    ) -> Result<AcquireOutcome>;

    /// Submit one command buffer to the graphics queue.
    unsafe fn submit_frame(
        &self,
        cmd: vk::CommandBuffer,
        wait: vk::Semaphore,
        wait_stage: vk::PipelineStageFlags,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> Result<()>;

    /// Queue `image_index` for presentation once `wait` is signaled.
    unsafe fn present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> Result<PresentOutcome>;
}

/// Everything the frame engine needs from a device.
pub trait FrameDevice: SurfaceDevice + SyncDevice + CommandDevice + PresentDevice {}

impl<T> FrameDevice for T where T: SurfaceDevice + SyncDevice + CommandDevice + PresentDevice {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_optimal_presentation_keeps_swapchain() {
        assert!(!PresentOutcome::Optimal.needs_recreate());
        assert!(PresentOutcome::Suboptimal.needs_recreate());
        assert!(PresentOutcome::OutOfDate.needs_recreate());
    }
}
