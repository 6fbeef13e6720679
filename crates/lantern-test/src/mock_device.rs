//! In-memory device implementing the frame engine's device traits.
//!
//! Handles are fake integers. Submissions complete either immediately or when
//! a fence wait "blocks" on them, depending on [`MockDevice::set_auto_complete`].
//! Every call is logged as a [`MockCall`] for ordering assertions.
//!
//! Like a real surface, a swapchain whose extent no longer matches the
//! surface's current extent is reported out of date at acquire and
//! suboptimal at present, unless an outcome was scripted.

use ash::vk::{self, Handle};
use lantern_gpu::{
    AcquireOutcome, CommandDevice, GpuError, GpuImage, PresentDevice, PresentOutcome, Result,
    SurfaceDevice, SurfaceSupport, SwapchainDesc, SyncDevice,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};

/// One recorded device call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    WaitIdle,
    CreateSwapchain {
        extent: vk::Extent2D,
        min_image_count: u32,
        present_mode: vk::PresentModeKHR,
    },
    DestroySwapchain(vk::SwapchainKHR),
    CreateImageView(vk::ImageView),
    DestroyImageView(vk::ImageView),
    CreateRenderPass {
        depth: bool,
    },
    DestroyRenderPass,
    CreateFramebuffer {
        framebuffer: vk::Framebuffer,
        attachments: usize,
        extent: vk::Extent2D,
    },
    DestroyFramebuffer(vk::Framebuffer),
    CreateDepthImage(vk::Extent2D),
    DestroyDepthImage,
    CreateFence(vk::Fence),
    DestroyFence(vk::Fence),
    /// `blocked` is true when the GPU work behind the fence had not finished yet.
    WaitForFence {
        fence: vk::Fence,
        blocked: bool,
    },
    ResetFence(vk::Fence),
    ResetCommandBuffer(vk::CommandBuffer),
    BeginCommandBuffer(vk::CommandBuffer),
    EndCommandBuffer(vk::CommandBuffer),
    BeginRenderPass {
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: usize,
    },
    EndRenderPass,
    BindPipeline(vk::Pipeline),
    SetViewport {
        width: u32,
        height: u32,
    },
    SetScissor(vk::Extent2D),
    BindVertexBuffers(Vec<vk::Buffer>),
    BindIndexBuffer(vk::Buffer),
    Draw {
        vertex_count: u32,
    },
    DrawIndexed {
        index_count: u32,
    },
    BindDescriptorSets {
        first_set: u32,
        count: usize,
    },
    PushConstants {
        size: usize,
    },
    AcquireNextImage {
        semaphore: vk::Semaphore,
    },
    Submit {
        cmd: vk::CommandBuffer,
        wait: vk::Semaphore,
        signal: vk::Semaphore,
        fence: vk::Fence,
    },
    Present {
        image_index: u32,
        wait: vk::Semaphore,
    },
}

/// Scripted result for the next `acquire_next_image`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedAcquire {
    OutOfDate,
    Suboptimal,
}

#[derive(Debug, Default, Clone, Copy)]
struct FenceState {
    signaled: bool,
    /// Submitted work the GPU has not finished.
    pending: bool,
}

#[derive(Debug)]
struct SwapchainRecord {
    images: Vec<vk::Image>,
    next_image: u32,
    extent: vk::Extent2D,
}

struct MockState {
    next_handle: u64,
    capabilities: vk::SurfaceCapabilitiesKHR,
    formats: Vec<vk::SurfaceFormatKHR>,
    present_modes: Vec<vk::PresentModeKHR>,
    swapchains: HashMap<u64, SwapchainRecord>,
    fences: HashMap<u64, FenceState>,
    live: HashSet<u64>,
    calls: Vec<MockCall>,
    acquire_script: VecDeque<ScriptedAcquire>,
    present_script: VecDeque<PresentOutcome>,
    auto_complete: bool,
    hang: bool,
    fail_end_command_buffer: bool,
    swapchains_created: usize,
}

impl MockState {
    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.live.insert(self.next_handle);
        self.next_handle
    }

    fn release(&mut self, raw: u64) {
        self.live.remove(&raw);
    }

    /// Whether the surface changed size since `swapchain` was created.
    fn is_stale(&self, swapchain: vk::SwapchainKHR) -> bool {
        let current = self.capabilities.current_extent;
        if current.width == u32::MAX {
            return false;
        }
        self.swapchains
            .get(&swapchain.as_raw())
            .is_some_and(|record| record.extent != current)
    }
}

/// Fake device with a window-sized surface.
pub struct MockDevice {
    state: Mutex<MockState>,
}

impl MockDevice {
    /// A device whose surface reports a fixed `width` x `height` extent.
    pub fn new(width: u32, height: u32) -> Self {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            current_extent: vk::Extent2D { width, height },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            max_image_array_layers: 1,
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            ..Default::default()
        };

        Self {
            state: Mutex::new(MockState {
                next_handle: 0,
                capabilities,
                formats: vec![
                    vk::SurfaceFormatKHR {
                        format: vk::Format::B8G8R8A8_UNORM,
                        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                    },
                    vk::SurfaceFormatKHR {
                        format: vk::Format::B8G8R8A8_SRGB,
                        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                    },
                ],
                present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
                swapchains: HashMap::new(),
                fences: HashMap::new(),
                live: HashSet::new(),
                calls: Vec::new(),
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                auto_complete: true,
                hang: false,
                fail_end_command_buffer: false,
                swapchains_created: 0,
            }),
        }
    }

    /// Change the extent the surface reports, as the window system does on resize.
    pub fn resize_surface(&self, width: u32, height: u32) {
        tracing::debug!(width, height, "Mock surface resized");
        self.state.lock().capabilities.current_extent = vk::Extent2D { width, height };
    }

    /// Report `u32::MAX` as the current extent so the window size is used.
    pub fn set_flexible_extent(&self) {
        self.state.lock().capabilities.current_extent = vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        };
    }

    pub fn set_image_count_limits(&self, min: u32, max: u32) {
        let mut state = self.state.lock();
        state.capabilities.min_image_count = min;
        state.capabilities.max_image_count = max;
    }

    /// When true, submitted work finishes immediately. When false, it stays
    /// pending until a fence wait or [`complete_all`](Self::complete_all).
    pub fn set_auto_complete(&self, auto_complete: bool) {
        self.state.lock().auto_complete = auto_complete;
    }

    /// Finish all pending GPU work.
    pub fn complete_all(&self) {
        for fence in self.state.lock().fences.values_mut() {
            if fence.pending {
                fence.pending = false;
                fence.signaled = true;
            }
        }
    }

    /// Pending work never finishes; fence waits on it time out.
    pub fn hang_gpu(&self) {
        let mut state = self.state.lock();
        state.hang = true;
        state.auto_complete = false;
        tracing::debug!("Mock GPU hung");
    }

    pub fn script_acquire(&self, outcome: ScriptedAcquire) {
        self.state.lock().acquire_script.push_back(outcome);
    }

    pub fn script_present(&self, outcome: PresentOutcome) {
        self.state.lock().present_script.push_back(outcome);
    }

    pub fn fail_end_command_buffer(&self) {
        self.state.lock().fail_end_command_buffer = true;
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Number of logged calls matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&MockCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| predicate(c)).count()
    }

    /// Number of swapchains created so far.
    pub fn swapchains_created(&self) -> usize {
        self.state.lock().swapchains_created
    }

    /// Number of handles created and not yet destroyed.
    pub fn live_handles(&self) -> usize {
        self.state.lock().live.len()
    }

    pub fn is_fence_signaled(&self, fence: vk::Fence) -> bool {
        self.state
            .lock()
            .fences
            .get(&fence.as_raw())
            .is_some_and(|f| f.signaled)
    }

    fn log(&self, call: MockCall) {
        self.state.lock().calls.push(call);
    }
}

impl SurfaceDevice for MockDevice {
    fn surface_support(&self) -> Result<SurfaceSupport> {
        let state = self.state.lock();
        Ok(SurfaceSupport {
            capabilities: state.capabilities,
            formats: state.formats.clone(),
            present_modes: state.present_modes.clone(),
        })
    }

    unsafe fn create_swapchain(&self, desc: &SwapchainDesc) -> Result<vk::SwapchainKHR> {
        let mut state = self.state.lock();
        if desc.extent.width == 0 || desc.extent.height == 0 {
            return Err(GpuError::SwapchainCreation(
                "zero-area swapchain requested".to_string(),
            ));
        }

        let raw = state.handle();
        // Images belong to the swapchain and are not tracked as live handles.
        let images = (0..desc.min_image_count)
            .map(|i| vk::Image::from_raw(0x1000_0000 + raw * 16 + u64::from(i)))
            .collect();
        state.swapchains.insert(
            raw,
            SwapchainRecord {
                images,
                next_image: 0,
                extent: desc.extent,
            },
        );
        state.swapchains_created += 1;
        state.calls.push(MockCall::CreateSwapchain {
            extent: desc.extent,
            min_image_count: desc.min_image_count,
            present_mode: desc.present_mode,
        });
        Ok(vk::SwapchainKHR::from_raw(raw))
    }

    unsafe fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> Result<Vec<vk::Image>> {
        self.state
            .lock()
            .swapchains
            .get(&swapchain.as_raw())
            .map(|s| s.images.clone())
            .ok_or(GpuError::Vulkan(vk::Result::ERROR_SURFACE_LOST_KHR))
    }

    unsafe fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut state = self.state.lock();
        state.swapchains.remove(&swapchain.as_raw());
        state.release(swapchain.as_raw());
        state.calls.push(MockCall::DestroySwapchain(swapchain));
    }

    unsafe fn create_image_view(
        &self,
        _image: vk::Image,
        _format: vk::Format,
        _aspect: vk::ImageAspectFlags,
    ) -> Result<vk::ImageView> {
        let mut state = self.state.lock();
        let view = vk::ImageView::from_raw(state.handle());
        state.calls.push(MockCall::CreateImageView(view));
        Ok(view)
    }

    unsafe fn destroy_image_view(&self, view: vk::ImageView) {
        let mut state = self.state.lock();
        state.release(view.as_raw());
        state.calls.push(MockCall::DestroyImageView(view));
    }

    unsafe fn create_render_pass(
        &self,
        _color_format: vk::Format,
        depth_format: Option<vk::Format>,
    ) -> Result<vk::RenderPass> {
        let mut state = self.state.lock();
        let render_pass = vk::RenderPass::from_raw(state.handle());
        state.calls.push(MockCall::CreateRenderPass {
            depth: depth_format.is_some(),
        });
        Ok(render_pass)
    }

    unsafe fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        let mut state = self.state.lock();
        state.release(render_pass.as_raw());
        state.calls.push(MockCall::DestroyRenderPass);
    }

    unsafe fn create_framebuffer(
        &self,
        _render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer> {
        let mut state = self.state.lock();
        let framebuffer = vk::Framebuffer::from_raw(state.handle());
        state.calls.push(MockCall::CreateFramebuffer {
            framebuffer,
            attachments: attachments.len(),
            extent,
        });
        Ok(framebuffer)
    }

    unsafe fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        let mut state = self.state.lock();
        state.release(framebuffer.as_raw());
        state.calls.push(MockCall::DestroyFramebuffer(framebuffer));
    }

    fn create_depth_image(&self, extent: vk::Extent2D, format: vk::Format) -> Result<GpuImage> {
        let mut state = self.state.lock();
        let image = vk::Image::from_raw(state.handle());
        state.calls.push(MockCall::CreateDepthImage(extent));
        Ok(GpuImage {
            image,
            allocation: None,
            format,
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
        })
    }

    unsafe fn destroy_depth_image(&self, image: &mut GpuImage) -> Result<()> {
        let mut state = self.state.lock();
        state.release(image.image.as_raw());
        image.image = vk::Image::null();
        state.calls.push(MockCall::DestroyDepthImage);
        Ok(())
    }

    fn wait_idle(&self) -> Result<()> {
        let hang = self.state.lock().hang;
        if hang {
            return Err(GpuError::DeviceLost);
        }
        self.complete_all();
        self.log(MockCall::WaitIdle);
        Ok(())
    }
}

impl SyncDevice for MockDevice {
    fn create_semaphore(&self) -> Result<vk::Semaphore> {
        Ok(vk::Semaphore::from_raw(self.state.lock().handle()))
    }

    unsafe fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.state.lock().release(semaphore.as_raw());
    }

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence> {
        let mut state = self.state.lock();
        let raw = state.handle();
        state.fences.insert(
            raw,
            FenceState {
                signaled,
                pending: false,
            },
        );
        let fence = vk::Fence::from_raw(raw);
        state.calls.push(MockCall::CreateFence(fence));
        Ok(fence)
    }

    unsafe fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state.lock();
        state.fences.remove(&fence.as_raw());
        state.release(fence.as_raw());
        state.calls.push(MockCall::DestroyFence(fence));
    }

    unsafe fn wait_for_fence(&self, fence: vk::Fence, _timeout_ns: u64) -> Result<()> {
        let mut state = self.state.lock();
        let hang = state.hang;
        let entry = state
            .fences
            .get_mut(&fence.as_raw())
            .ok_or(GpuError::Vulkan(vk::Result::ERROR_UNKNOWN))?;

        let blocked = if entry.signaled {
            false
        } else if entry.pending && !hang {
            entry.pending = false;
            entry.signaled = true;
            true
        } else {
            // Nothing will ever signal this fence.
            return Err(GpuError::Vulkan(vk::Result::TIMEOUT));
        };

        state.calls.push(MockCall::WaitForFence { fence, blocked });
        Ok(())
    }

    unsafe fn reset_fence(&self, fence: vk::Fence) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(entry) = state.fences.get_mut(&fence.as_raw()) {
            entry.signaled = false;
        }
        state.calls.push(MockCall::ResetFence(fence));
        Ok(())
    }

    fn create_command_pool(&self) -> Result<vk::CommandPool> {
        Ok(vk::CommandPool::from_raw(self.state.lock().handle()))
    }

    unsafe fn destroy_command_pool(&self, pool: vk::CommandPool) {
        self.state.lock().release(pool.as_raw());
    }

    unsafe fn allocate_command_buffers(
        &self,
        _pool: vk::CommandPool,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>> {
        // Command buffers are freed with their pool and are not tracked.
        let mut state = self.state.lock();
        Ok((0..count)
            .map(|_| {
                state.next_handle += 1;
                vk::CommandBuffer::from_raw(state.next_handle)
            })
            .collect())
    }

    unsafe fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()> {
        self.log(MockCall::ResetCommandBuffer(cmd));
        Ok(())
    }
}

impl CommandDevice for MockDevice {
    unsafe fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()> {
        self.log(MockCall::BeginCommandBuffer(cmd));
        Ok(())
    }

    unsafe fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()> {
        let fail = self.state.lock().fail_end_command_buffer;
        if fail {
            return Err(GpuError::CommandRecording("end: mock failure".to_string()));
        }
        self.log(MockCall::EndCommandBuffer(cmd));
        Ok(())
    }

    unsafe fn cmd_begin_render_pass(
        &self,
        _cmd: vk::CommandBuffer,
        _render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[vk::ClearValue],
    ) {
        self.log(MockCall::BeginRenderPass {
            framebuffer,
            extent,
            clear_values: clear_values.len(),
        });
    }

    unsafe fn cmd_end_render_pass(&self, _cmd: vk::CommandBuffer) {
        self.log(MockCall::EndRenderPass);
    }

    unsafe fn cmd_bind_pipeline(&self, _cmd: vk::CommandBuffer, pipeline: vk::Pipeline) {
        self.log(MockCall::BindPipeline(pipeline));
    }

    unsafe fn cmd_set_viewport(&self, _cmd: vk::CommandBuffer, viewport: vk::Viewport) {
        self.log(MockCall::SetViewport {
            width: viewport.width as u32,
            height: viewport.height as u32,
        });
    }

    unsafe fn cmd_set_scissor(&self, _cmd: vk::CommandBuffer, scissor: vk::Rect2D) {
        self.log(MockCall::SetScissor(scissor.extent));
    }

    unsafe fn cmd_bind_vertex_buffers(
        &self,
        _cmd: vk::CommandBuffer,
        _first_binding: u32,
        buffers: &[vk::Buffer],
        _offsets: &[vk::DeviceSize],
    ) {
        self.log(MockCall::BindVertexBuffers(buffers.to_vec()));
    }

    unsafe fn cmd_bind_index_buffer(
        &self,
        _cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        _offset: vk::DeviceSize,
        _index_type: vk::IndexType,
    ) {
        self.log(MockCall::BindIndexBuffer(buffer));
    }

    unsafe fn cmd_draw(
        &self,
        _cmd: vk::CommandBuffer,
        vertex_count: u32,
        _instance_count: u32,
        _first_vertex: u32,
        _first_instance: u32,
    ) {
        self.log(MockCall::Draw { vertex_count });
    }

    unsafe fn cmd_draw_indexed(
        &self,
        _cmd: vk::CommandBuffer,
        index_count: u32,
        _instance_count: u32,
        _first_index: u32,
        _vertex_offset: i32,
        _first_instance: u32,
    ) {
        self.log(MockCall::DrawIndexed { index_count });
    }

    unsafe fn cmd_bind_descriptor_sets(
        &self,
        _cmd: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        self.log(MockCall::BindDescriptorSets {
            first_set,
            count: sets.len(),
        });
    }

    unsafe fn cmd_push_constants(
        &self,
        _cmd: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        _stages: vk::ShaderStageFlags,
        _offset: u32,
        data: &[u8],
    ) {
        self.log(MockCall::PushConstants { size: data.len() });
    }
}

impl PresentDevice for MockDevice {
    unsafe fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        image_available: vk::Semaphore,
        _timeout_ns: u64,
    ) -> Result<AcquireOutcome> {
        let mut state = self.state.lock();
        state.calls.push(MockCall::AcquireNextImage {
            semaphore: image_available,
        });

        let scripted = state.acquire_script.pop_front();
        if scripted == Some(ScriptedAcquire::OutOfDate)
            || (scripted.is_none() && state.is_stale(swapchain))
        {
            return Ok(AcquireOutcome::OutOfDate);
        }

        let record = state
            .swapchains
            .get_mut(&swapchain.as_raw())
            .ok_or(GpuError::Vulkan(vk::Result::ERROR_SURFACE_LOST_KHR))?;
        let image_index = record.next_image;
        record.next_image = (record.next_image + 1) % record.images.len() as u32;

        Ok(AcquireOutcome::Acquired {
            image_index,
            suboptimal: scripted == Some(ScriptedAcquire::Suboptimal),
        })
    }

    unsafe fn submit_frame(
        &self,
        cmd: vk::CommandBuffer,
        wait: vk::Semaphore,
        _wait_stage: vk::PipelineStageFlags,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let auto_complete = state.auto_complete;
        let entry = state
            .fences
            .get_mut(&fence.as_raw())
            .ok_or(GpuError::Vulkan(vk::Result::ERROR_UNKNOWN))?;
        if entry.signaled {
            return Err(GpuError::InvalidState(
                "submitted with a fence that is still signaled".to_string(),
            ));
        }
        if auto_complete {
            entry.signaled = true;
        } else {
            entry.pending = true;
        }

        state.calls.push(MockCall::Submit {
            cmd,
            wait,
            signal,
            fence,
        });
        Ok(())
    }

    unsafe fn present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> Result<PresentOutcome> {
        let mut state = self.state.lock();
        state.calls.push(MockCall::Present { image_index, wait });
        let outcome = match state.present_script.pop_front() {
            Some(outcome) => outcome,
            None if state.is_stale(swapchain) => PresentOutcome::Suboptimal,
            None => PresentOutcome::Optimal,
        };
        Ok(outcome)
    }
}
