//! Vulkan frame engine for the Lantern renderer.
//!
//! This crate provides:
//! - Device context: instance, surface, device selection and queues
//! - Swapchain management with deferred recreation on zero-area windows
//! - A fence-gated ring of frames in flight
//! - The frame engine driving begin/record/submit/present
//! - A draw-call surface for external drawables
//! - Memory allocation via gpu-allocator, staged uploads, pipelines and descriptors
//!
//! The swapchain manager, frame ring and frame engine are generic over the
//! device traits in [`backend`], so they can be driven by a mock device.

pub mod backend;
pub mod capabilities;
pub mod command;
pub mod context;
pub mod debug;
pub mod descriptors;
pub mod draw;
pub mod error;
pub mod frame;
pub mod image;
pub mod instance;
pub mod memory;
pub mod pipeline;
pub mod swapchain;
pub mod sync;
pub mod uniform;
mod upload;
mod vulkan;

pub use backend::{
    AcquireOutcome, CommandDevice, FrameDevice, PresentDevice, PresentOutcome, SurfaceDevice,
    SurfaceSupport, SwapchainDesc, SyncDevice,
};
pub use capabilities::{GpuCapabilities, GpuVendor};
pub use context::{DeviceContext, DeviceContextBuilder};
pub use descriptors::{
    write_combined_image_sampler, write_uniform_buffer, DescriptorPool, DescriptorSetLayoutBuilder,
};
pub use draw::{push_pod, DrawSurface, Drawable};
pub use error::{GpuError, Result};
pub use frame::{
    Frame, FrameEngine, FrameEngineConfig, FrameState, PipelineBinding, RecreateOutcome,
    SurfaceWindow,
};
pub use memory::{BufferPurpose, GpuAllocator, GpuBuffer, GpuImage, ImagePurpose};
pub use pipeline::{GraphicsPipeline, GraphicsPipelineConfig};
pub use swapchain::{SwapchainConfig, SwapchainManager, SwapchainState, DEPTH_FORMAT};
pub use sync::{FrameRing, FrameSlot};
pub use uniform::PerFrameUniforms;

pub use ash::vk;
