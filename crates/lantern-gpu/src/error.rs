//! GPU error types.
//!
//! Everything in [`GpuError`] is fatal for the frame loop. A stale or
//! suboptimal swapchain is not an error; it is reported through
//! [`AcquireOutcome`](crate::backend::AcquireOutcome) and
//! [`PresentOutcome`](crate::backend::PresentOutcome).

use ash::vk;
use thiserror::Error;

/// GPU-related errors.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// No suitable GPU found.
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// Required extension not supported.
    #[error("Required extension not supported: {0}")]
    ExtensionNotSupported(String),

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Surface creation failed.
    #[error("Surface creation failed: {0}")]
    SurfaceCreation(String),

    /// Swapchain creation failed.
    #[error("Swapchain creation failed: {0}")]
    SwapchainCreation(String),

    /// Shader module creation failed.
    #[error("Shader compilation failed: {0}")]
    ShaderCompilation(String),

    /// Pipeline creation failed.
    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(String),

    /// A frame slot's fence did not signal within the configured timeout.
    #[error("Fence for frame slot {slot} timed out")]
    FenceTimeout { slot: usize },

    /// The logical device was lost.
    #[error("Device lost")]
    DeviceLost,

    /// A command buffer could not be opened or closed.
    #[error("Command buffer recording failed: {0}")]
    CommandRecording(String),

    /// An image layout transition with no known barrier masks.
    #[error("Unsupported layout transition: {old:?} -> {new:?}")]
    UnsupportedLayoutTransition {
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },

    /// Resource not found.
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl GpuError {
    /// Whether this error means the device can no longer be used.
    pub fn is_device_lost(&self) -> bool {
        matches!(
            self,
            Self::DeviceLost
                | Self::FenceTimeout { .. }
                | Self::Vulkan(vk::Result::ERROR_DEVICE_LOST)
        )
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_lost_classification() {
        assert!(GpuError::DeviceLost.is_device_lost());
        assert!(GpuError::FenceTimeout { slot: 1 }.is_device_lost());
        assert!(GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST).is_device_lost());
        assert!(!GpuError::Vulkan(vk::Result::ERROR_OUT_OF_HOST_MEMORY).is_device_lost());
        assert!(!GpuError::InvalidState("x".into()).is_device_lost());
    }

    #[test]
    fn layout_transition_message_names_layouts() {
        let err = GpuError::UnsupportedLayoutTransition {
            old: vk::ImageLayout::GENERAL,
            new: vk::ImageLayout::PRESENT_SRC_KHR,
        };
        let msg = err.to_string();
        assert!(msg.contains("GENERAL"));
        assert!(msg.contains("PRESENT_SRC_KHR"));
    }
}
