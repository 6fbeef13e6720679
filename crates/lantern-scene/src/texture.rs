//! Sampled RGBA8 textures with their own descriptor set.

use crate::error::{keep_first, Result, SceneError};
use ash::vk;
use lantern_gpu::image::{create_image_view_2d, create_sampler};
use lantern_gpu::{write_combined_image_sampler, DescriptorPool, DeviceContext, GpuImage};
use std::path::Path;

/// Binding of the combined image sampler inside the texture set layout.
pub const TEXTURE_BINDING: u32 = 0;

pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// A sampled image, its view and sampler, and a descriptor set pointing at them.
pub struct Texture {
    pub(crate) image: GpuImage,
    pub(crate) view: vk::ImageView,
    pub(crate) sampler: vk::Sampler,
    pub(crate) descriptor_set: vk::DescriptorSet,
}

impl Texture {
    /// Decode an image file and upload it.
    pub fn from_file(
        ctx: &DeviceContext,
        pool: &DescriptorPool,
        layout: vk::DescriptorSetLayout,
        path: impl AsRef<Path>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let rgba = image::open(path)?.to_rgba8();
        let (width, height) = rgba.dimensions();
        tracing::debug!(path = %path.display(), width, height, "Decoded texture");
        Self::from_rgba8(
            ctx,
            pool,
            layout,
            width,
            height,
            rgba.as_raw(),
            &path.display().to_string(),
        )
    }

    /// A 1x1 opaque white texture, bound for primitives without a base colour texture.
    pub fn white(
        ctx: &DeviceContext,
        pool: &DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> Result<Self> {
        Self::from_rgba8(ctx, pool, layout, 1, 1, &[255; 4], "white")
    }

    /// Upload tightly packed RGBA8 pixels.
    pub fn from_rgba8(
        ctx: &DeviceContext,
        pool: &DescriptorPool,
        layout: vk::DescriptorSetLayout,
        width: u32,
        height: u32,
        pixels: &[u8],
        name: &str,
    ) -> Result<Self> {
        check_rgba8_len(width, height, pixels.len())?;

        let image = ctx.create_sampled_image(
            pixels,
            vk::Extent2D { width, height },
            TEXTURE_FORMAT,
            name,
        )?;
        let mut texture = Self {
            image,
            view: vk::ImageView::null(),
            sampler: vk::Sampler::null(),
            descriptor_set: vk::DescriptorSet::null(),
        };

        if let Err(e) = texture.finish(ctx, pool, layout) {
            if let Err(cleanup) = texture.destroy(ctx, pool) {
                tracing::warn!("Failed to release texture {name}: {cleanup}");
            }
            return Err(e);
        }
        Ok(texture)
    }

    fn finish(
        &mut self,
        ctx: &DeviceContext,
        pool: &DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> Result<()> {
        let device = ctx.device();
        unsafe {
            self.view = create_image_view_2d(
                device,
                self.image.image,
                TEXTURE_FORMAT,
                vk::ImageAspectFlags::COLOR,
            )?;
            self.sampler = create_sampler(device, ctx.capabilities().anisotropy())?;
            self.descriptor_set = pool
                .allocate(device, &[layout])?
                .first()
                .copied()
                .ok_or_else(|| SceneError::InvalidData("no descriptor set allocated".to_string()))?;
            write_combined_image_sampler(
                device,
                self.descriptor_set,
                TEXTURE_BINDING,
                self.view,
                self.sampler,
            );
        }
        Ok(())
    }

    pub fn descriptor_set(&self) -> vk::DescriptorSet {
        self.descriptor_set
    }

    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.image.extent.width,
            height: self.image.extent.height,
        }
    }

    /// Release the descriptor set, sampler, view and image.
    pub fn destroy(&mut self, ctx: &DeviceContext, pool: &DescriptorPool) -> Result<()> {
        let device = ctx.device();
        let mut result = Ok(());
        unsafe {
            if self.descriptor_set != vk::DescriptorSet::null() {
                keep_first(
                    &mut result,
                    pool.free(device, &[self.descriptor_set]).map_err(Into::into),
                );
                self.descriptor_set = vk::DescriptorSet::null();
            }
            if self.sampler != vk::Sampler::null() {
                device.destroy_sampler(self.sampler, None);
                self.sampler = vk::Sampler::null();
            }
            if self.view != vk::ImageView::null() {
                device.destroy_image_view(self.view, None);
                self.view = vk::ImageView::null();
            }
        }
        keep_first(&mut result, ctx.free_image(&mut self.image).map_err(Into::into));
        result
    }
}

pub(crate) fn check_rgba8_len(width: u32, height: u32, len: usize) -> Result<()> {
    let expected = width as usize * height as usize * 4;
    if width == 0 || height == 0 || len != expected {
        return Err(SceneError::InvalidData(format!(
            "{width}x{height} RGBA8 texture needs {expected} bytes, got {len}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_buffer_must_match_extent() {
        assert!(check_rgba8_len(2, 2, 16).is_ok());
        assert!(check_rgba8_len(2, 2, 12).is_err());
        assert!(check_rgba8_len(0, 4, 0).is_err());
    }
}
