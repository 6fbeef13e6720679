//! A [`DrawSurface`] that records commands instead of issuing them.

use ash::vk;
use lantern_gpu::{DrawSurface, GpuError, Result};

/// One recorded draw-surface command.
#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
    BindVertexBuffers(Vec<vk::Buffer>),
    BindIndexBuffer(vk::Buffer, vk::IndexType),
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
    },
    BindDescriptorSets {
        first_set: u32,
        sets: Vec<vk::DescriptorSet>,
    },
    PushConstants {
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: Vec<u8>,
    },
}

/// Collects commands recorded by a [`Drawable`](lantern_gpu::Drawable).
#[derive(Debug, Clone)]
pub struct RecordingSurface {
    pub commands: Vec<DrawCommand>,
    slot_index: usize,
    extent: vk::Extent2D,
    layout: Option<vk::PipelineLayout>,
}

impl RecordingSurface {
    /// A surface with a pipeline layout bound, on slot 0.
    pub fn new(width: u32, height: u32) -> Self {
        use ash::vk::Handle;
        Self {
            commands: Vec::new(),
            slot_index: 0,
            extent: vk::Extent2D { width, height },
            layout: Some(vk::PipelineLayout::from_raw(1)),
        }
    }

    pub fn without_pipeline(mut self) -> Self {
        self.layout = None;
        self
    }

    pub fn with_slot(mut self, slot_index: usize) -> Self {
        self.slot_index = slot_index;
        self
    }

    /// Recorded push constant payloads, in order.
    pub fn push_constants(&self) -> Vec<&[u8]> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                DrawCommand::PushConstants { data, .. } => Some(data.as_slice()),
                _ => None,
            })
            .collect()
    }

    pub fn draw_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, DrawCommand::Draw { .. } | DrawCommand::DrawIndexed { .. }))
            .count()
    }

    fn require_layout(&self) -> Result<()> {
        self.layout
            .map(|_| ())
            .ok_or_else(|| GpuError::InvalidState("no pipeline bound".to_string()))
    }
}

impl DrawSurface for RecordingSurface {
    fn bind_vertex_buffers(
        &mut self,
        _first_binding: u32,
        buffers: &[vk::Buffer],
        _offsets: &[vk::DeviceSize],
    ) {
        self.commands
            .push(DrawCommand::BindVertexBuffers(buffers.to_vec()));
    }

    fn bind_index_buffer(
        &mut self,
        buffer: vk::Buffer,
        _offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        self.commands
            .push(DrawCommand::BindIndexBuffer(buffer, index_type));
    }

    fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        _first_vertex: u32,
        _first_instance: u32,
    ) {
        self.commands.push(DrawCommand::Draw {
            vertex_count,
            instance_count,
        });
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        _first_index: u32,
        _vertex_offset: i32,
        _first_instance: u32,
    ) {
        self.commands.push(DrawCommand::DrawIndexed {
            index_count,
            instance_count,
        });
    }

    fn bind_descriptor_sets(&mut self, first_set: u32, sets: &[vk::DescriptorSet]) -> Result<()> {
        self.require_layout()?;
        self.commands.push(DrawCommand::BindDescriptorSets {
            first_set,
            sets: sets.to_vec(),
        });
        Ok(())
    }

    fn push_constants(
        &mut self,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) -> Result<()> {
        self.require_layout()?;
        self.commands.push(DrawCommand::PushConstants {
            stages,
            offset,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn slot_index(&self) -> usize {
        self.slot_index
    }

    fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn pipeline_layout(&self) -> Option<vk::PipelineLayout> {
        self.layout
    }
}
