//! GPU memory for the renderer's resources.
//!
//! Every allocation names what it is for. The purpose picks the memory
//! location, the usage flags and, for images, the whole create info, so the
//! swapchain depth buffer, staging copies, per-slot uniforms and uploaded
//! geometry each get a single code path.

use crate::error::{GpuError, Result};
use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

/// What a buffer holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferPurpose {
    /// Host-written source of a transfer, freed once the copy completes.
    Staging,
    /// Host-written uniforms of one frame slot.
    Uniform,
    /// Transfer destination read only by the GPU, e.g. vertex or index data.
    DeviceLocal(vk::BufferUsageFlags),
}

impl BufferPurpose {
    pub fn location(self) -> MemoryLocation {
        match self {
            Self::Staging | Self::Uniform => MemoryLocation::CpuToGpu,
            Self::DeviceLocal(_) => MemoryLocation::GpuOnly,
        }
    }

    pub fn usage(self) -> vk::BufferUsageFlags {
        match self {
            Self::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
            Self::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
            Self::DeviceLocal(usage) => usage | vk::BufferUsageFlags::TRANSFER_DST,
        }
    }

    pub fn is_host_visible(self) -> bool {
        self.location() == MemoryLocation::CpuToGpu
    }
}

/// What an image is used as. All images are 2D, single mip and single sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImagePurpose {
    /// Depth attachment of the swapchain framebuffers.
    Depth(vk::Format),
    /// Texture filled by a staged copy and sampled by shaders.
    Sampled(vk::Format),
}

impl ImagePurpose {
    pub fn format(self) -> vk::Format {
        match self {
            Self::Depth(format) | Self::Sampled(format) => format,
        }
    }

    pub fn usage(self) -> vk::ImageUsageFlags {
        match self {
            Self::Depth(_) => vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            Self::Sampled(_) => vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
        }
    }

    pub fn create_info(self, extent: vk::Extent2D) -> vk::ImageCreateInfo<'static> {
        vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(self.format())
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(self.usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
    }
}

/// gpu-allocator instance owned by the device context.
///
/// Released explicitly by [`shutdown`](Self::shutdown) before the device is
/// destroyed; allocations left at that point are reported as leaks.
pub struct GpuAllocator {
    allocator: Option<Allocator>,
    device: Arc<ash::Device>,
}

impl GpuAllocator {
    /// # Safety
    /// The instance, device and physical device must be valid.
    pub unsafe fn new(
        instance: &ash::Instance,
        device: Arc<ash::Device>,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: (*device).clone(),
            physical_device,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: cfg!(debug_assertions),
                log_leaks_on_shutdown: true,
                ..Default::default()
            },
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(allocation_error)?;

        Ok(Self {
            allocator: Some(allocator),
            device,
        })
    }

    fn allocate(
        &mut self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
    ) -> Result<Allocation> {
        self.allocator
            .as_mut()
            .ok_or_else(|| GpuError::InvalidState("allocator already shut down".to_string()))?
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(allocation_error)
    }

    fn release(&mut self, allocation: Option<Allocation>) -> Result<()> {
        match (allocation, self.allocator.as_mut()) {
            (Some(allocation), Some(allocator)) => {
                allocator.free(allocation).map_err(allocation_error)
            }
            // After shutdown the memory is already gone with the allocator.
            _ => Ok(()),
        }
    }

    /// Create a buffer of `size` bytes bound to memory suited to `purpose`.
    pub fn allocate_buffer(
        &mut self,
        size: u64,
        purpose: BufferPurpose,
        name: &str,
    ) -> Result<GpuBuffer> {
        let info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(purpose.usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { self.device.create_buffer(&info, None) }?;
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let allocation = match self.allocate(name, requirements, purpose.location(), true) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };
        let bound = unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        };
        let mut created = GpuBuffer {
            buffer,
            allocation: Some(allocation),
            size,
        };
        if let Err(e) = bound {
            self.free_buffer(&mut created)?;
            return Err(e.into());
        }

        tracing::trace!(name, size, ?purpose, "Allocated buffer");
        Ok(created)
    }

    /// Create a GPU-only image of `extent` for `purpose`.
    pub fn allocate_image(
        &mut self,
        extent: vk::Extent2D,
        purpose: ImagePurpose,
        name: &str,
    ) -> Result<GpuImage> {
        let info = purpose.create_info(extent);
        let image = unsafe { self.device.create_image(&info, None) }?;
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };

        let allocation = match self.allocate(name, requirements, MemoryLocation::GpuOnly, false) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(e);
            }
        };
        let bound = unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        };
        let mut created = GpuImage {
            image,
            allocation: Some(allocation),
            format: info.format,
            extent: info.extent,
        };
        if let Err(e) = bound {
            self.free_image(&mut created)?;
            return Err(e.into());
        }

        tracing::trace!(
            name,
            width = extent.width,
            height = extent.height,
            ?purpose,
            "Allocated image"
        );
        Ok(created)
    }

    /// Destroy the buffer and return its memory. Null handles are skipped.
    pub fn free_buffer(&mut self, buffer: &mut GpuBuffer) -> Result<()> {
        let released = self.release(buffer.allocation.take());
        if buffer.buffer != vk::Buffer::null() {
            unsafe { self.device.destroy_buffer(buffer.buffer, None) };
            buffer.buffer = vk::Buffer::null();
        }
        released
    }

    /// Destroy the image and return its memory. Null handles are skipped.
    pub fn free_image(&mut self, image: &mut GpuImage) -> Result<()> {
        let released = self.release(image.allocation.take());
        if image.image != vk::Image::null() {
            unsafe { self.device.destroy_image(image.image, None) };
            image.image = vk::Image::null();
        }
        released
    }

    /// Drop the allocator. Must run before the device is destroyed.
    pub fn shutdown(&mut self) {
        self.allocator = None;
    }
}

impl Drop for GpuAllocator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn allocation_error(e: gpu_allocator::AllocationError) -> GpuError {
    GpuError::AllocationFailed(e.to_string())
}

/// Check that `len` bytes at `offset` fit in a buffer of `size` bytes.
fn check_write_range(size: u64, offset: u64, len: usize) -> Result<()> {
    let end = offset.checked_add(len as u64);
    match end {
        Some(end) if end <= size => Ok(()),
        _ => Err(GpuError::InvalidState(format!(
            "write of {len} bytes at offset {offset} exceeds buffer of {size} bytes"
        ))),
    }
}

/// A buffer and the memory bound to it.
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub allocation: Option<Allocation>,
    pub size: u64,
}

impl GpuBuffer {
    /// Host pointer of a staging or uniform buffer.
    pub fn mapped_ptr(&self) -> Option<*mut u8> {
        self.allocation
            .as_ref()
            .and_then(Allocation::mapped_ptr)
            .map(|p| p.as_ptr().cast::<u8>())
    }

    pub fn write<T: bytemuck::Pod>(&self, data: &[T]) -> Result<()> {
        self.write_bytes(0, bytemuck::cast_slice(data))
    }

    pub fn write_bytes(&self, offset: u64, data: &[u8]) -> Result<()> {
        check_write_range(self.size, offset, data.len())?;
        let ptr = self
            .mapped_ptr()
            .ok_or_else(|| GpuError::InvalidState("buffer is not host visible".to_string()))?;

        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.add(offset as usize), data.len());
        }
        Ok(())
    }
}

/// An image and the memory bound to it.
pub struct GpuImage {
    pub image: vk::Image,
    pub allocation: Option<Allocation>,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_written_buffers_live_in_mappable_memory() {
        assert!(BufferPurpose::Staging.is_host_visible());
        assert!(BufferPurpose::Uniform.is_host_visible());
        assert!(!BufferPurpose::DeviceLocal(vk::BufferUsageFlags::VERTEX_BUFFER).is_host_visible());
    }

    #[test]
    fn device_local_buffers_accept_transfers() {
        let usage = BufferPurpose::DeviceLocal(vk::BufferUsageFlags::INDEX_BUFFER).usage();
        assert!(usage.contains(vk::BufferUsageFlags::INDEX_BUFFER));
        assert!(usage.contains(vk::BufferUsageFlags::TRANSFER_DST));
        assert_eq!(BufferPurpose::Staging.usage(), vk::BufferUsageFlags::TRANSFER_SRC);
        assert_eq!(BufferPurpose::Uniform.usage(), vk::BufferUsageFlags::UNIFORM_BUFFER);
    }

    #[test]
    fn depth_image_is_an_attachment_at_the_requested_extent() {
        let info = ImagePurpose::Depth(vk::Format::D32_SFLOAT).create_info(vk::Extent2D {
            width: 640,
            height: 480,
        });
        assert_eq!(info.format, vk::Format::D32_SFLOAT);
        assert_eq!(info.usage, vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT);
        assert_eq!((info.extent.width, info.extent.height, info.extent.depth), (640, 480, 1));
        assert_eq!(info.initial_layout, vk::ImageLayout::UNDEFINED);
    }

    #[test]
    fn sampled_image_is_a_copy_target() {
        let usage = ImagePurpose::Sampled(vk::Format::R8G8B8A8_SRGB).usage();
        assert!(usage.contains(vk::ImageUsageFlags::SAMPLED));
        assert!(usage.contains(vk::ImageUsageFlags::TRANSFER_DST));
    }

    #[test]
    fn writes_must_fit_the_buffer() {
        assert!(check_write_range(64, 0, 64).is_ok());
        assert!(check_write_range(64, 32, 32).is_ok());
        assert!(check_write_range(64, 33, 32).is_err());
        assert!(check_write_range(64, u64::MAX, 1).is_err());
    }

    #[test]
    fn unmapped_buffer_rejects_writes() {
        let buffer = GpuBuffer {
            buffer: vk::Buffer::null(),
            allocation: None,
            size: 16,
        };
        assert!(matches!(
            buffer.write(&[1.0_f32; 4]),
            Err(GpuError::InvalidState(_))
        ));
        assert!(buffer.write(&[1.0_f32; 5]).is_err());
    }
}
