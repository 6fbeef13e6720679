//! Frame synchronization ring.
//!
//! One [`FrameSlot`] per frame in flight. A slot is only handed out for
//! recording after its fence reports that the GPU finished the previous
//! submission that used it.

use crate::backend::SyncDevice;
use crate::error::{GpuError, Result};
use ash::vk;

/// Synchronization objects and command buffer of one frame in flight.
#[derive(Debug, Clone, Copy)]
pub struct FrameSlot {
    pub command_buffer: vk::CommandBuffer,
    /// Signaled when the acquired swapchain image can be rendered to.
    pub image_available: vk::Semaphore,
    /// Signaled when the slot's submission has finished rendering.
    pub render_finished: vk::Semaphore,
    /// Signaled when the GPU is done with the slot. Created signaled.
    pub in_flight: vk::Fence,
}

impl FrameSlot {
    fn create<D: SyncDevice>(device: &D, command_buffer: vk::CommandBuffer) -> Result<Self> {
        let image_available = device.create_semaphore()?;
        let render_finished = match device.create_semaphore() {
            Ok(s) => s,
            Err(e) => {
                unsafe { device.destroy_semaphore(image_available) };
                return Err(e);
            }
        };
        let in_flight = match device.create_fence(true) {
            Ok(f) => f,
            Err(e) => {
                unsafe {
                    device.destroy_semaphore(image_available);
                    device.destroy_semaphore(render_finished);
                }
                return Err(e);
            }
        };

        Ok(Self {
            command_buffer,
            image_available,
            render_finished,
            in_flight,
        })
    }

    unsafe fn destroy<D: SyncDevice>(&self, device: &D) {
        device.destroy_semaphore(self.image_available);
        device.destroy_semaphore(self.render_finished);
        device.destroy_fence(self.in_flight);
    }
}

/// Fixed set of frame slots and the pool their command buffers come from.
pub struct FrameRing {
    pool: vk::CommandPool,
    slots: Vec<FrameSlot>,
    fence_timeout_ns: u64,
}

impl FrameRing {
    /// Create `count` slots with an unbounded fence wait.
    pub fn new<D: SyncDevice>(device: &D, count: usize) -> Result<Self> {
        Self::with_fence_timeout(device, count, u64::MAX)
    }

    /// Create `count` slots; a fence wait longer than `fence_timeout_ns` is fatal.
    pub fn with_fence_timeout<D: SyncDevice>(
        device: &D,
        count: usize,
        fence_timeout_ns: u64,
    ) -> Result<Self> {
        if count == 0 {
            return Err(GpuError::InvalidState(
                "frame ring needs at least one slot".to_string(),
            ));
        }

        let pool = device.create_command_pool()?;
        let mut ring = Self {
            pool,
            slots: Vec::with_capacity(count),
            fence_timeout_ns,
        };

        if let Err(e) = ring.populate(device, count) {
            unsafe { ring.destroy(device) };
            return Err(e);
        }

        tracing::debug!(slots = count, "Frame ring created");
        Ok(ring)
    }

    fn populate<D: SyncDevice>(&mut self, device: &D, count: usize) -> Result<()> {
        let command_buffers = unsafe { device.allocate_command_buffers(self.pool, count as u32) }?;
        for cmd in command_buffers {
            self.slots.push(FrameSlot::create(device, cmd)?);
        }
        Ok(())
    }

    /// Number of slots. Never changes after construction.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn fence_timeout_ns(&self) -> u64 {
        self.fence_timeout_ns
    }

    pub fn slot(&self, index: usize) -> Result<&FrameSlot> {
        self.slots.get(index).ok_or_else(|| {
            GpuError::InvalidState(format!(
                "frame slot {index} out of range ({} slots)",
                self.slots.len()
            ))
        })
    }

    /// Block until the GPU has finished the last submission that used `index`.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn wait<D: SyncDevice>(&self, device: &D, index: usize) -> Result<()> {
        let slot = self.slot(index)?;
        match unsafe { device.wait_for_fence(slot.in_flight, self.fence_timeout_ns) } {
            Ok(()) => Ok(()),
            Err(GpuError::Vulkan(vk::Result::TIMEOUT)) => {
                tracing::error!(slot = index, "Frame fence never signaled");
                Err(GpuError::FenceTimeout { slot: index })
            }
            Err(GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST)) => Err(GpuError::DeviceLost),
            Err(e) => Err(e),
        }
    }

    /// Wait for slot `index`, then reset its fence and command buffer for recording.
    pub fn acquire<D: SyncDevice>(&self, device: &D, index: usize) -> Result<vk::CommandBuffer> {
        self.wait(device, index)?;
        let slot = self.slot(index)?;
        unsafe {
            device.reset_fence(slot.in_flight)?;
            device.reset_command_buffer(slot.command_buffer)?;
        }
        Ok(slot.command_buffer)
    }

    /// Destroy every slot and the command pool.
    ///
    /// # Safety
    /// No submission from this ring may still be executing.
    pub unsafe fn destroy<D: SyncDevice>(&mut self, device: &D) {
        for slot in self.slots.drain(..) {
            slot.destroy(device);
        }
        if self.pool != vk::CommandPool::null() {
            device.destroy_command_pool(self.pool);
            self.pool = vk::CommandPool::null();
        }
    }
}
