//! One-time command submission for uploads and layout transitions.

use crate::error::{GpuError, Result};
use ash::vk;

/// Command pool paired with the queue its work is submitted to.
///
/// Used for short-lived transfer work outside the frame loop; each submission
/// blocks until the queue is idle.
pub struct TransientCommandPool {
    pool: vk::CommandPool,
    queue: vk::Queue,
    queue_family: u32,
}

impl TransientCommandPool {
    /// Create a transient pool on `queue_family`.
    ///
    /// # Safety
    /// The device must be valid and `queue` must belong to `queue_family`.
    pub unsafe fn new(device: &ash::Device, queue_family: u32, queue: vk::Queue) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);

        let pool = device.create_command_pool(&create_info, None)?;

        Ok(Self {
            pool,
            queue,
            queue_family,
        })
    }

    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Record commands with `record`, submit them and wait for completion.
    ///
    /// # Safety
    /// Every handle referenced by the recorded commands must stay valid until this returns.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub unsafe fn submit<F>(&self, device: &ash::Device, record: F) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer) -> Result<()>,
    {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let cmd = device
            .allocate_command_buffers(&alloc_info)?
            .into_iter()
            .next()
            .ok_or_else(|| GpuError::CommandRecording("no command buffer allocated".into()))?;

        let result = self.record_and_wait(device, cmd, record);
        device.free_command_buffers(self.pool, &[cmd]);
        result
    }

    unsafe fn record_and_wait<F>(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        record: F,
    ) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer) -> Result<()>,
    {
        let begin_info =
            vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        device
            .begin_command_buffer(cmd, &begin_info)
            .map_err(|e| GpuError::CommandRecording(e.to_string()))?;

        record(cmd)?;

        device
            .end_command_buffer(cmd)
            .map_err(|e| GpuError::CommandRecording(e.to_string()))?;

        let cmd_buffers = [cmd];
        let submit_info = vk::SubmitInfo::default().command_buffers(&cmd_buffers);
        device.queue_submit(self.queue, &[submit_info], vk::Fence::null())?;
        device.queue_wait_idle(self.queue)?;

        Ok(())
    }

    /// Destroy the pool.
    ///
    /// # Safety
    /// No submission from this pool may be pending.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_command_pool(self.pool, None);
    }
}
