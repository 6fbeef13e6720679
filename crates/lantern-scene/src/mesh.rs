//! Indexed meshes in device-local memory.

use crate::error::{Result, SceneError};
use crate::vertex::Vertex;
use ash::vk;
use lantern_gpu::{DeviceContext, DrawSurface, Drawable, GpuBuffer};

/// CPU-side geometry of one primitive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    /// Check that every index refers to a vertex and that the mesh is made of triangles.
    pub fn validate(&self) -> Result<()> {
        if self.vertices.is_empty() || self.indices.is_empty() {
            return Err(SceneError::InvalidData("mesh has no geometry".to_string()));
        }
        if self.indices.len() % 3 != 0 {
            return Err(SceneError::InvalidData(format!(
                "index count {} is not a multiple of 3",
                self.indices.len()
            )));
        }
        if let Some(&index) = self
            .indices
            .iter()
            .find(|&&i| i as usize >= self.vertices.len())
        {
            return Err(SceneError::InvalidData(format!(
                "index {index} out of range for {} vertices",
                self.vertices.len()
            )));
        }
        Ok(())
    }
}

/// Vertex and `u32` index buffer drawn with one indexed draw.
pub struct Mesh {
    vertex_buffer: GpuBuffer,
    index_buffer: GpuBuffer,
    index_count: u32,
}

impl Mesh {
    /// Upload `data` into device-local vertex and index buffers.
    pub fn upload(ctx: &DeviceContext, data: &MeshData, name: &str) -> Result<Self> {
        data.validate()?;

        let mut vertex_buffer = ctx.create_device_local_buffer(
            bytemuck::cast_slice(&data.vertices),
            vk::BufferUsageFlags::VERTEX_BUFFER,
            &format!("{name} vertices"),
        )?;
        let index_buffer = match ctx.create_device_local_buffer(
            bytemuck::cast_slice(&data.indices),
            vk::BufferUsageFlags::INDEX_BUFFER,
            &format!("{name} indices"),
        ) {
            Ok(buffer) => buffer,
            Err(e) => {
                ctx.free_buffer(&mut vertex_buffer)?;
                return Err(e.into());
            }
        };

        Ok(Self {
            vertex_buffer,
            index_buffer,
            index_count: data.indices.len() as u32,
        })
    }

    #[cfg(test)]
    pub(crate) fn from_parts(
        vertex_buffer: GpuBuffer,
        index_buffer: GpuBuffer,
        index_count: u32,
    ) -> Self {
        Self {
            vertex_buffer,
            index_buffer,
            index_count,
        }
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn vertex_buffer(&self) -> vk::Buffer {
        self.vertex_buffer.buffer
    }

    pub fn index_buffer(&self) -> vk::Buffer {
        self.index_buffer.buffer
    }

    /// Free both buffers. The mesh must not be referenced by work still in flight.
    pub fn destroy(&mut self, ctx: &DeviceContext) -> Result<()> {
        ctx.free_buffer(&mut self.vertex_buffer)?;
        ctx.free_buffer(&mut self.index_buffer)?;
        self.index_count = 0;
        Ok(())
    }
}

impl Drawable for Mesh {
    fn record(&self, surface: &mut dyn DrawSurface) -> lantern_gpu::Result<()> {
        surface.bind_vertex_buffers(0, &[self.vertex_buffer.buffer], &[0]);
        surface.bind_index_buffer(self.index_buffer.buffer, 0, vk::IndexType::UINT32);
        surface.draw_indexed(self.index_count, 1, 0, 0, 0);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ash::vk::Handle;
    use lantern_test::{DrawCommand, RecordingSurface};

    pub(crate) fn fake_buffer(raw: u64) -> GpuBuffer {
        GpuBuffer {
            buffer: vk::Buffer::from_raw(raw),
            allocation: None,
            size: 0,
        }
    }

    #[test]
    fn records_one_indexed_draw() {
        let mesh = Mesh::from_parts(fake_buffer(1), fake_buffer(2), 6);
        let mut surface = RecordingSurface::new(800, 600);
        mesh.record(&mut surface).unwrap();

        assert_eq!(
            surface.commands,
            [
                DrawCommand::BindVertexBuffers(vec![vk::Buffer::from_raw(1)]),
                DrawCommand::BindIndexBuffer(vk::Buffer::from_raw(2), vk::IndexType::UINT32),
                DrawCommand::DrawIndexed {
                    index_count: 6,
                    instance_count: 1
                },
            ]
        );
    }

    #[test]
    fn validation_rejects_bad_indices() {
        let vertices = vec![Vertex::default(); 3];
        let ok = MeshData {
            vertices: vertices.clone(),
            indices: vec![0, 1, 2],
        };
        assert!(ok.validate().is_ok());

        let out_of_range = MeshData {
            vertices: vertices.clone(),
            indices: vec![0, 1, 3],
        };
        assert!(matches!(
            out_of_range.validate(),
            Err(SceneError::InvalidData(_))
        ));

        let partial = MeshData {
            vertices,
            indices: vec![0, 1],
        };
        assert!(partial.validate().is_err());
        assert!(MeshData::default().validate().is_err());
    }
}
