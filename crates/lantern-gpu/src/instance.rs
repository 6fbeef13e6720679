//! Vulkan instance creation and physical device selection.

use crate::error::{GpuError, Result};
use ash::vk;
use raw_window_handle::RawDisplayHandle;
use std::ffi::{CStr, CString};

/// Validation layers requested when validation is enabled.
pub fn validation_layers() -> Vec<&'static CStr> {
    vec![c"VK_LAYER_KHRONOS_validation"]
}

/// Required device extensions.
pub fn required_device_extensions() -> Vec<&'static CStr> {
    vec![ash::khr::swapchain::NAME]
}

/// A freshly created instance.
pub struct CreatedInstance {
    pub instance: ash::Instance,
    /// Whether the validation layer was found and enabled.
    pub validation_enabled: bool,
}

/// Create a Vulkan instance with the extensions needed to present to `display`.
///
/// Missing validation layers are logged and skipped.
///
/// # Safety
/// The entry must be a valid Vulkan entry point.
pub unsafe fn create_instance(
    entry: &ash::Entry,
    app_name: &str,
    display: RawDisplayHandle,
    enable_validation: bool,
) -> Result<CreatedInstance> {
    let app_name = CString::new(app_name)
        .map_err(|e| GpuError::Other(format!("Invalid application name: {e}")))?;

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(c"Lantern")
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(vk::API_VERSION_1_2);

    let mut extension_names = ash_window::enumerate_required_extensions(display)
        .map_err(|e| GpuError::ExtensionNotSupported(e.to_string()))?
        .to_vec();

    #[cfg(target_os = "macos")]
    extension_names.push(ash::khr::portability_enumeration::NAME.as_ptr());

    let available_layers = entry.enumerate_instance_layer_properties()?;
    let layers: Vec<&CStr> = if enable_validation {
        validation_layers()
            .into_iter()
            .filter(|layer| {
                let found = available_layers
                    .iter()
                    .any(|props| props.layer_name_as_c_str().ok() == Some(*layer));
                if !found {
                    tracing::warn!("Validation layer {:?} not available", layer);
                }
                found
            })
            .collect()
    } else {
        Vec::new()
    };
    let validation_enabled = !layers.is_empty();

    if validation_enabled {
        extension_names.push(ash::ext::debug_utils::NAME.as_ptr());
    }

    let layer_names: Vec<*const std::ffi::c_char> = layers.iter().map(|l| l.as_ptr()).collect();

    #[cfg(target_os = "macos")]
    let create_flags = vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    #[cfg(not(target_os = "macos"))]
    let create_flags = vk::InstanceCreateFlags::empty();

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extension_names)
        .enabled_layer_names(&layer_names)
        .flags(create_flags);

    let instance = entry.create_instance(&create_info, None)?;

    Ok(CreatedInstance {
        instance,
        validation_enabled,
    })
}

/// Queue families used for rendering and presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilyIndices {
    /// Find a graphics family and a family that can present.
    ///
    /// A family that does both is preferred so the swapchain can use exclusive sharing.
    pub fn find(
        families: &[vk::QueueFamilyProperties],
        mut can_present: impl FnMut(u32) -> bool,
    ) -> Option<Self> {
        let mut graphics = None;
        let mut present = None;

        for (i, family) in families.iter().enumerate() {
            let i = i as u32;
            let is_graphics =
                family.queue_count > 0 && family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
            let presents = can_present(i);

            if is_graphics && presents {
                return Some(Self {
                    graphics: i,
                    present: i,
                });
            }
            if is_graphics && graphics.is_none() {
                graphics = Some(i);
            }
            if presents && present.is_none() {
                present = Some(i);
            }
        }

        Some(Self {
            graphics: graphics?,
            present: present?,
        })
    }

    /// Whether graphics and presentation run on different families.
    pub fn is_split(&self) -> bool {
        self.graphics != self.present
    }
}

/// The chosen GPU.
#[derive(Debug, Clone, Copy)]
pub struct PhysicalDeviceSelection {
    pub physical_device: vk::PhysicalDevice,
    pub queue_families: QueueFamilyIndices,
}

/// Select the best physical device able to present to `surface`.
///
/// # Safety
/// The instance and surface must be valid.
pub unsafe fn select_physical_device(
    instance: &ash::Instance,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<PhysicalDeviceSelection> {
    let devices = instance.enumerate_physical_devices()?;

    let mut best: Option<(u64, PhysicalDeviceSelection)> = None;

    for device in devices {
        let Some(queue_families) = check_suitability(instance, surface_loader, surface, device)
        else {
            continue;
        };

        let score = score_physical_device(instance, device);
        if best.as_ref().map_or(true, |(s, _)| score > *s) {
            best = Some((
                score,
                PhysicalDeviceSelection {
                    physical_device: device,
                    queue_families,
                },
            ));
        }
    }

    best.map(|(_, selection)| selection)
        .ok_or(GpuError::NoSuitableDevice)
}

/// Queue families, extension support and surface support of a device.
unsafe fn check_suitability(
    instance: &ash::Instance,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    device: vk::PhysicalDevice,
) -> Option<QueueFamilyIndices> {
    let families = instance.get_physical_device_queue_family_properties(device);
    let indices = QueueFamilyIndices::find(&families, |i| {
        surface_loader
            .get_physical_device_surface_support(device, i, surface)
            .unwrap_or(false)
    })?;

    let extensions = instance
        .enumerate_device_extension_properties(device)
        .ok()?;
    if !supports_extensions(&extensions, &required_device_extensions()) {
        return None;
    }

    let formats = surface_loader
        .get_physical_device_surface_formats(device, surface)
        .ok()?;
    let present_modes = surface_loader
        .get_physical_device_surface_present_modes(device, surface)
        .ok()?;
    if formats.is_empty() || present_modes.is_empty() {
        return None;
    }

    Some(indices)
}

/// Whether every name in `required` appears in `available`.
pub fn supports_extensions(available: &[vk::ExtensionProperties], required: &[&CStr]) -> bool {
    required.iter().all(|name| {
        available
            .iter()
            .any(|ext| ext.extension_name_as_c_str().ok() == Some(*name))
    })
}

/// Ranking for a device type; discrete GPUs first.
pub fn device_type_score(device_type: vk::PhysicalDeviceType) -> u64 {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 50,
        _ => 0,
    }
}

unsafe fn score_physical_device(instance: &ash::Instance, device: vk::PhysicalDevice) -> u64 {
    let properties = instance.get_physical_device_properties(device);
    let memory = instance.get_physical_device_memory_properties(device);

    let vram_gb: u64 = memory
        .memory_heaps
        .iter()
        .take(memory.memory_heap_count as usize)
        .filter(|h| h.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
        .map(|h| h.size / (1024 * 1024 * 1024))
        .sum();

    device_type_score(properties.device_type) + vram_gb
}
