//! Swapchain management.
//!
//! [`SwapchainManager`] owns every size-dependent presentation resource: the
//! swapchain, its image views and framebuffers, and the optional depth
//! image. They are always created and destroyed together. The render pass is
//! created once and outlives every swapchain generation.

use crate::backend::{SurfaceDevice, SurfaceSupport, SwapchainDesc};
use crate::error::{GpuError, Result};
use crate::memory::GpuImage;
use ash::vk;

/// Format of the optional depth attachment.
pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// Swapchain creation options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainConfig {
    pub vsync: bool,
    pub depth: bool,
}

impl Default for SwapchainConfig {
    fn default() -> Self {
        Self {
            vsync: true,
            depth: true,
        }
    }
}

/// Depth image shared by every framebuffer of one swapchain generation.
pub struct DepthResources {
    pub image: GpuImage,
    pub view: vk::ImageView,
}

/// One generation of swapchain resources.
pub struct SwapchainState {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    pub depth: Option<DepthResources>,
}

impl SwapchainState {
    /// Whether there is exactly one view and one framebuffer per image.
    pub fn is_consistent(&self) -> bool {
        self.images.len() == self.image_views.len()
            && self.image_views.len() == self.framebuffers.len()
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    fn empty(desc: &SwapchainDesc, swapchain: vk::SwapchainKHR) -> Self {
        Self {
            swapchain,
            images: Vec::new(),
            image_views: Vec::new(),
            framebuffers: Vec::new(),
            format: desc.surface_format.format,
            extent: desc.extent,
            present_mode: desc.present_mode,
            depth: None,
        }
    }

    /// Release framebuffers, depth resources, views and the swapchain, in that order.
    ///
    /// # Safety
    /// No submitted work may still reference these resources.
    unsafe fn destroy<D: SurfaceDevice>(mut self, device: &D) -> Result<()> {
        for framebuffer in self.framebuffers.drain(..) {
            device.destroy_framebuffer(framebuffer);
        }

        let depth_result = match self.depth.take() {
            Some(mut depth) => {
                device.destroy_image_view(depth.view);
                device.destroy_depth_image(&mut depth.image)
            }
            None => Ok(()),
        };

        for view in self.image_views.drain(..) {
            device.destroy_image_view(view);
        }
        device.destroy_swapchain(self.swapchain);

        depth_result
    }
}

/// Owner of the swapchain and its render pass.
pub struct SwapchainManager {
    config: SwapchainConfig,
    surface_format: vk::SurfaceFormatKHR,
    render_pass: vk::RenderPass,
    state: Option<SwapchainState>,
}

impl SwapchainManager {
    /// Create the render pass and, if the drawable has a non-zero area, the first swapchain.
    ///
    /// When the window starts minimized no swapchain exists until
    /// [`recreate`](Self::recreate) succeeds.
    pub fn new<D: SurfaceDevice>(
        device: &D,
        drawable: vk::Extent2D,
        config: SwapchainConfig,
    ) -> Result<Self> {
        let support = device.surface_support()?;
        let surface_format = select_surface_format(&support.formats)?;
        let depth_format = config.depth.then_some(DEPTH_FORMAT);

        let render_pass = unsafe { device.create_render_pass(surface_format.format, depth_format) }?;

        let mut manager = Self {
            config,
            surface_format,
            render_pass,
            state: None,
        };

        if let Err(e) = manager.create_from(device, &support, drawable) {
            unsafe { device.destroy_render_pass(render_pass) };
            return Err(e);
        }

        Ok(manager)
    }

    pub fn state(&self) -> Option<&SwapchainState> {
        self.state.as_ref()
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn format(&self) -> vk::Format {
        self.surface_format.format
    }

    pub fn config(&self) -> SwapchainConfig {
        self.config
    }

    /// Extent of the live swapchain, zero if none exists.
    pub fn extent(&self) -> vk::Extent2D {
        self.state
            .as_ref()
            .map_or_else(vk::Extent2D::default, |s| s.extent)
    }

    /// Create a swapchain when none exists. Returns `false` for a zero-area drawable.
    pub fn create<D: SurfaceDevice>(&mut self, device: &D, drawable: vk::Extent2D) -> Result<bool> {
        if self.state.is_some() {
            return Err(GpuError::InvalidState(
                "swapchain must be destroyed before it is created again".to_string(),
            ));
        }
        let support = device.surface_support()?;
        self.create_from(device, &support, drawable)
    }

    /// Destroy the live swapchain resources, keeping the render pass.
    ///
    /// # Safety
    /// No submitted work may still reference the swapchain images.
    pub unsafe fn destroy<D: SurfaceDevice>(&mut self, device: &D) -> Result<()> {
        match self.state.take() {
            Some(state) => state.destroy(device),
            None => Ok(()),
        }
    }

    /// Idle the device, then destroy and rebuild every size-dependent resource.
    ///
    /// The surface is queried first: when the drawable has zero area nothing
    /// is destroyed and `Ok(false)` is returned.
    pub fn recreate<D: SurfaceDevice>(&mut self, device: &D, drawable: vk::Extent2D) -> Result<bool> {
        let support = device.surface_support()?;
        if is_zero_area(calculate_extent(&support.capabilities, drawable)) || is_zero_area(drawable)
        {
            tracing::debug!(
                width = drawable.width,
                height = drawable.height,
                "Drawable has zero area, deferring swapchain recreation"
            );
            return Ok(false);
        }

        device.wait_idle()?;
        unsafe { self.destroy(device) }?;
        self.create_from(device, &support, drawable)
    }

    /// Destroy the swapchain resources and the render pass.
    ///
    /// # Safety
    /// No submitted work may still reference any of them.
    pub unsafe fn destroy_all<D: SurfaceDevice>(&mut self, device: &D) -> Result<()> {
        let result = self.destroy(device);
        if self.render_pass != vk::RenderPass::null() {
            device.destroy_render_pass(self.render_pass);
            self.render_pass = vk::RenderPass::null();
        }
        result
    }

    fn create_from<D: SurfaceDevice>(
        &mut self,
        device: &D,
        support: &SurfaceSupport,
        drawable: vk::Extent2D,
    ) -> Result<bool> {
        let extent = calculate_extent(&support.capabilities, drawable);
        if is_zero_area(extent) || is_zero_area(drawable) {
            tracing::debug!("Drawable has zero area, swapchain creation deferred");
            return Ok(false);
        }

        let desc = SwapchainDesc {
            min_image_count: choose_image_count(&support.capabilities),
            surface_format: self.surface_format,
            present_mode: select_present_mode(&support.present_modes, self.config.vsync),
            extent,
            pre_transform: support.capabilities.current_transform,
        };

        let state = unsafe { self.build_state(device, &desc) }?;
        if !state.is_consistent() {
            unsafe { state.destroy(device) }?;
            return Err(GpuError::SwapchainCreation(
                "image, view and framebuffer counts differ".to_string(),
            ));
        }

        tracing::info!(
            width = extent.width,
            height = extent.height,
            images = state.image_count(),
            present_mode = ?desc.present_mode,
            depth = state.depth.is_some(),
            "Swapchain created"
        );

        self.state = Some(state);
        Ok(true)
    }

    unsafe fn build_state<D: SurfaceDevice>(
        &self,
        device: &D,
        desc: &SwapchainDesc,
    ) -> Result<SwapchainState> {
        let swapchain = device.create_swapchain(desc)?;
        let mut state = SwapchainState::empty(desc, swapchain);

        match self.populate(device, &mut state) {
            Ok(()) => Ok(state),
            Err(e) => {
                // Release whatever was built before the failure.
                if let Err(cleanup) = state.destroy(device) {
                    tracing::warn!("Failed to release partial swapchain: {cleanup}");
                }
                Err(e)
            }
        }
    }

    unsafe fn populate<D: SurfaceDevice>(
        &self,
        device: &D,
        state: &mut SwapchainState,
    ) -> Result<()> {
        state.images = device.swapchain_images(state.swapchain)?;

        for &image in &state.images {
            let view = device.create_image_view(image, state.format, vk::ImageAspectFlags::COLOR)?;
            state.image_views.push(view);
        }

        if self.config.depth {
            let mut image = device.create_depth_image(state.extent, DEPTH_FORMAT)?;
            match device.create_image_view(image.image, DEPTH_FORMAT, vk::ImageAspectFlags::DEPTH)
            {
                Ok(view) => state.depth = Some(DepthResources { image, view }),
                Err(e) => {
                    if let Err(cleanup) = device.destroy_depth_image(&mut image) {
                        tracing::warn!("Failed to release depth image: {cleanup}");
                    }
                    return Err(e);
                }
            }
        }

        let depth_view = state.depth.as_ref().map(|d| d.view);
        for &view in &state.image_views {
            let attachments: Vec<vk::ImageView> = std::iter::once(view).chain(depth_view).collect();
            let framebuffer =
                device.create_framebuffer(self.render_pass, &attachments, state.extent)?;
            state.framebuffers.push(framebuffer);
        }

        Ok(())
    }
}

/// Whether either dimension is zero.
pub fn is_zero_area(extent: vk::Extent2D) -> bool {
    extent.width == 0 || extent.height == 0
}

/// Select the best surface format.
pub fn select_surface_format(available: &[vk::SurfaceFormatKHR]) -> Result<vk::SurfaceFormatKHR> {
    available
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| available.first())
        .copied()
        .ok_or_else(|| GpuError::SwapchainCreation("surface reports no formats".to_string()))
}

/// Select the present mode. FIFO is always available.
pub fn select_present_mode(available: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| available.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Calculate swapchain extent.
pub fn calculate_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    drawable: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: drawable.width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: drawable.height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

/// One more image than the minimum, clamped to the maximum when there is one.
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 2048,
            },
            ..Default::default()
        }
    }

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    #[test]
    fn prefers_srgb_bgra() {
        let available = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let chosen = select_surface_format(&available).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn falls_back_to_first_format() {
        let available = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let chosen = select_surface_format(&available).unwrap();
        assert_eq!(chosen.format, vk::Format::R8G8B8A8_UNORM);
        assert!(select_surface_format(&[]).is_err());
    }

    #[test]
    fn present_mode_selection() {
        let all = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
        ];
        assert_eq!(select_present_mode(&all, true), vk::PresentModeKHR::FIFO);
        assert_eq!(select_present_mode(&all, false), vk::PresentModeKHR::MAILBOX);
        assert_eq!(
            select_present_mode(&all[..2], false),
            vk::PresentModeKHR::IMMEDIATE
        );
        assert_eq!(
            select_present_mode(&[vk::PresentModeKHR::FIFO], false),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn extent_follows_current_extent_when_fixed() {
        let mut c = caps(2, 3);
        c.current_extent = vk::Extent2D {
            width: 1024,
            height: 768,
        };
        let extent = calculate_extent(
            &c,
            vk::Extent2D {
                width: 10,
                height: 10,
            },
        );
        assert_eq!((extent.width, extent.height), (1024, 768));
    }

    #[test]
    fn extent_clamps_drawable_when_surface_is_flexible() {
        let extent = calculate_extent(
            &caps(2, 3),
            vk::Extent2D {
                width: 8000,
                height: 600,
            },
        );
        assert_eq!((extent.width, extent.height), (4096, 600));
    }

    #[test]
    fn image_count_is_min_plus_one_clamped() {
        assert_eq!(choose_image_count(&caps(2, 8)), 3);
        assert_eq!(choose_image_count(&caps(3, 3)), 3);
        // Zero maximum means unbounded.
        assert_eq!(choose_image_count(&caps(2, 0)), 3);
    }

    #[test]
    fn zero_area_detection() {
        assert!(is_zero_area(vk::Extent2D {
            width: 0,
            height: 600
        }));
        assert!(is_zero_area(vk::Extent2D {
            width: 800,
            height: 0
        }));
        assert!(!is_zero_area(vk::Extent2D {
            width: 1,
            height: 1
        }));
    }
}
