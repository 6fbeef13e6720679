//! Staged uploads into device-local memory.

use crate::context::DeviceContext;
use crate::error::{GpuError, Result};
use crate::image::{cmd_copy_buffer_to_image, cmd_transition_image_layout};
use crate::memory::{BufferPurpose, GpuBuffer, GpuImage, ImagePurpose};
use ash::vk;

impl DeviceContext {
    /// Allocate a host-visible uniform buffer for one frame slot.
    pub fn create_uniform_buffer(&self, size: u64, name: &str) -> Result<GpuBuffer> {
        self.allocator
            .lock()
            .allocate_buffer(size, BufferPurpose::Uniform, name)
    }

    /// Copy `data` into a new device-local buffer through a staging buffer.
    ///
    /// `TRANSFER_DST` is added to `usage`. Blocks until the copy completes.
    pub fn create_device_local_buffer(
        &self,
        data: &[u8],
        usage: vk::BufferUsageFlags,
        name: &str,
    ) -> Result<GpuBuffer> {
        if data.is_empty() {
            return Err(GpuError::InvalidState(format!(
                "cannot upload empty buffer '{name}'"
            )));
        }
        let size = data.len() as u64;

        let mut staging = self.create_staging(data, name)?;
        let purpose = BufferPurpose::DeviceLocal(usage);
        let created = self.allocator.lock().allocate_buffer(size, purpose, name);
        let mut buffer = match created {
            Ok(buffer) => buffer,
            Err(e) => {
                self.free_buffer(&mut staging)?;
                return Err(e);
            }
        };

        let copied = unsafe {
            self.submit_one_time(|device, cmd| {
                let region = vk::BufferCopy::default().size(size);
                device.cmd_copy_buffer(cmd, staging.buffer, buffer.buffer, &[region]);
                Ok(())
            })
        };

        self.free_buffer(&mut staging)?;
        if let Err(e) = copied {
            self.free_buffer(&mut buffer)?;
            return Err(e);
        }

        tracing::debug!(name, size, "Uploaded device-local buffer");
        Ok(buffer)
    }

    /// Upload tightly packed pixels into a new sampled image.
    ///
    /// The image is left in `SHADER_READ_ONLY_OPTIMAL`.
    pub fn create_sampled_image(
        &self,
        pixels: &[u8],
        extent: vk::Extent2D,
        format: vk::Format,
        name: &str,
    ) -> Result<GpuImage> {
        let mut staging = self.create_staging(pixels, name)?;

        let purpose = ImagePurpose::Sampled(format);
        let created = self.allocator.lock().allocate_image(extent, purpose, name);
        let mut image = match created {
            Ok(image) => image,
            Err(e) => {
                self.free_buffer(&mut staging)?;
                return Err(e);
            }
        };

        let copied = unsafe {
            self.submit_one_time(|device, cmd| {
                cmd_transition_image_layout(
                    device,
                    cmd,
                    image.image,
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                )?;
                cmd_copy_buffer_to_image(device, cmd, staging.buffer, image.image, extent);
                cmd_transition_image_layout(
                    device,
                    cmd,
                    image.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                )
            })
        };

        self.free_buffer(&mut staging)?;
        if let Err(e) = copied {
            self.free_image(&mut image)?;
            return Err(e);
        }

        tracing::debug!(
            name,
            width = extent.width,
            height = extent.height,
            "Uploaded sampled image"
        );
        Ok(image)
    }

    pub fn free_buffer(&self, buffer: &mut GpuBuffer) -> Result<()> {
        self.allocator.lock().free_buffer(buffer)
    }

    pub fn free_image(&self, image: &mut GpuImage) -> Result<()> {
        self.allocator.lock().free_image(image)
    }

    fn create_staging(&self, data: &[u8], name: &str) -> Result<GpuBuffer> {
        let mut staging = self.allocator.lock().allocate_buffer(
            data.len() as u64,
            BufferPurpose::Staging,
            &format!("{name} staging"),
        )?;
        if let Err(e) = staging.write_bytes(0, data) {
            self.free_buffer(&mut staging)?;
            return Err(e);
        }
        Ok(staging)
    }
}
