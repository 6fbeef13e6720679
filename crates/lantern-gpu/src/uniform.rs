//! Per-slot uniform buffers.
//!
//! A frame still in flight may be reading the uniforms of its own slot, so
//! each slot gets a separate buffer and descriptor set. Writes only ever
//! target the slot of the frame currently being recorded.

use crate::context::DeviceContext;
use crate::descriptors::{write_uniform_buffer, DescriptorPool};
use crate::error::{GpuError, Result};
use crate::memory::GpuBuffer;
use ash::vk;
use std::marker::PhantomData;

/// One host-visible uniform buffer and descriptor set per frame slot.
pub struct PerFrameUniforms<T: bytemuck::Pod> {
    buffers: Vec<GpuBuffer>,
    sets: Vec<vk::DescriptorSet>,
    _marker: PhantomData<T>,
}

impl<T: bytemuck::Pod> PerFrameUniforms<T> {
    /// Allocate `slots` buffers and sets, binding each buffer at `binding`.
    pub fn new(
        ctx: &DeviceContext,
        pool: &DescriptorPool,
        layout: vk::DescriptorSetLayout,
        binding: u32,
        slots: usize,
    ) -> Result<Self> {
        let size = std::mem::size_of::<T>() as u64;
        let layouts = vec![layout; slots];
        let sets = unsafe { pool.allocate(ctx.device(), &layouts) }?;

        let mut uniforms = Self {
            buffers: Vec::with_capacity(slots),
            sets: sets.clone(),
            _marker: PhantomData,
        };

        for (slot, set) in sets.into_iter().enumerate() {
            let buffer = match ctx.create_uniform_buffer(size, &format!("uniforms slot {slot}")) {
                Ok(buffer) => buffer,
                Err(e) => {
                    if let Err(cleanup) = uniforms.destroy(ctx, pool) {
                        tracing::warn!("Failed to release uniform buffers: {cleanup}");
                    }
                    return Err(e);
                }
            };
            unsafe { write_uniform_buffer(ctx.device(), set, binding, buffer.buffer, size) };
            uniforms.buffers.push(buffer);
        }

        Ok(uniforms)
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Overwrite the uniforms of `slot`.
    pub fn write(&self, slot: usize, value: &T) -> Result<()> {
        self.buffers
            .get(slot)
            .ok_or_else(|| self.out_of_range(slot))?
            .write(std::slice::from_ref(value))
    }

    pub fn descriptor_set(&self, slot: usize) -> Result<vk::DescriptorSet> {
        self.sets
            .get(slot)
            .copied()
            .ok_or_else(|| self.out_of_range(slot))
    }

    fn out_of_range(&self, slot: usize) -> GpuError {
        GpuError::InvalidState(format!(
            "uniform slot {slot} out of range ({} slots)",
            self.sets.len()
        ))
    }

    /// Free buffers and descriptor sets.
    pub fn destroy(&mut self, ctx: &DeviceContext, pool: &DescriptorPool) -> Result<()> {
        for mut buffer in self.buffers.drain(..) {
            ctx.free_buffer(&mut buffer)?;
        }
        if !self.sets.is_empty() {
            unsafe { pool.free(ctx.device(), &self.sets) }?;
            self.sets.clear();
        }
        Ok(())
    }
}
