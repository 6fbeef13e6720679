//! Draw-call recording interface for external drawables.

use crate::error::Result;
use ash::vk;

/// Records geometry bindings and draw commands into the active command buffer.
///
/// Only valid between `begin_frame` and `end`. Handles passed in must stay
/// alive until the frame's submission has completed; implementations never
/// retain them past the current recording window.
pub trait DrawSurface {
    fn bind_vertex_buffers(
        &mut self,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    );

    fn bind_index_buffer(
        &mut self,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    );

    fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    );

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );

    /// Bind descriptor sets against the active pipeline layout.
    ///
    /// Fails with `InvalidState` when no pipeline is bound.
    fn bind_descriptor_sets(&mut self, first_set: u32, sets: &[vk::DescriptorSet]) -> Result<()>;

    /// Update push constants of the active pipeline layout.
    ///
    /// Fails with `InvalidState` when no pipeline is bound.
    fn push_constants(
        &mut self,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) -> Result<()>;

    /// Index of the frame slot being recorded.
    fn slot_index(&self) -> usize;

    /// Extent of the swapchain image being rendered to.
    fn extent(&self) -> vk::Extent2D;

    fn pipeline_layout(&self) -> Option<vk::PipelineLayout>;
}

/// Push a plain-data value as push constants at offset 0.
pub fn push_pod<T: bytemuck::Pod>(
    surface: &mut dyn DrawSurface,
    stages: vk::ShaderStageFlags,
    value: &T,
) -> Result<()> {
    surface.push_constants(stages, 0, bytemuck::bytes_of(value))
}

/// Something that records its own draw calls.
pub trait Drawable {
    fn record(&self, surface: &mut dyn DrawSurface) -> Result<()>;
}

impl<T: Drawable + ?Sized> Drawable for &T {
    fn record(&self, surface: &mut dyn DrawSurface) -> Result<()> {
        (**self).record(surface)
    }
}
