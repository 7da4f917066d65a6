//! Vulkan context: instance, surface, physical device, logical device, queues.

use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::{vk, Device, Entry, Instance};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::CStr;
use std::os::raw::c_char;

use super::{APP_NAME, ENGINE_NAME, ENGINE_VERSION, REQUIRED_VK_VERSION};

/// Queue family indices.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    /// Whether graphics and present come from different families, which
    /// forces CONCURRENT sharing on the swapchain.
    pub fn split(&self) -> bool {
        self.graphics != self.present
    }
}

/// Main Vulkan context holding all core Vulkan objects.
///
/// The surface is created before physical-device selection so present
/// support is checked against the real surface, not assumed.
pub struct VulkanContext {
    pub entry: Entry,
    pub instance: Instance,
    pub surface_loader: surface::Instance,
    pub swapchain_loader: swapchain::Device,
    pub surface: vk::SurfaceKHR,
    pub physical_device: vk::PhysicalDevice,
    pub device: Device,
    pub queue_families: QueueFamilyIndices,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,

    debug: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanContext {
    /// Create the full context from raw window handles.
    ///
    /// # Safety
    /// The window handles must be valid and outlive the context.
    pub unsafe fn new(
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
        enable_validation: bool,
    ) -> Result<Self, String> {
        let entry = Entry::linked();

        let api_version = match entry
            .try_enumerate_instance_version()
            .map_err(|e| format!("Failed to enumerate instance version: {:?}", e))?
        {
            Some(version) => version,
            None => vk::API_VERSION_1_0,
        };

        if api_version < REQUIRED_VK_VERSION {
            return Err(format!(
                "Vulkan 1.3 required, but only {}.{}.{} available",
                vk::api_version_major(api_version),
                vk::api_version_minor(api_version),
                vk::api_version_patch(api_version)
            ));
        }

        let validation = enable_validation && Self::validation_available(&entry);
        if enable_validation && !validation {
            log::warn!("validation layers requested but not available");
        }

        let instance = Self::create_instance(&entry, display_handle, validation)?;

        let debug = if validation {
            Some(Self::create_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        let surface_loader = surface::Instance::new(&entry, &instance);
        let surface = ash_window::create_surface(&entry, &instance, display_handle, window_handle, None)
            .map_err(|e| format!("Failed to create Vulkan surface: {:?}", e))?;

        let (physical_device, queue_families) =
            Self::pick_physical_device(&instance, &surface_loader, surface)?;

        let (device, graphics_queue, present_queue) =
            Self::create_logical_device(&instance, physical_device, &queue_families)?;

        let swapchain_loader = swapchain::Device::new(&instance, &device);

        Ok(Self {
            entry,
            instance,
            surface_loader,
            swapchain_loader,
            surface,
            physical_device,
            device,
            queue_families,
            graphics_queue,
            present_queue,
            debug,
        })
    }

    fn validation_available(entry: &Entry) -> bool {
        const VALIDATION: &CStr = c"VK_LAYER_KHRONOS_validation";
        unsafe {
            entry
                .enumerate_instance_layer_properties()
                .map(|layers| {
                    layers.iter().any(|l| {
                        CStr::from_ptr(l.layer_name.as_ptr()) == VALIDATION
                    })
                })
                .unwrap_or(false)
        }
    }

    /// Create Vulkan instance with required extensions.
    unsafe fn create_instance(
        entry: &Entry,
        display_handle: RawDisplayHandle,
        enable_validation: bool,
    ) -> Result<Instance, String> {
        let app_info = vk::ApplicationInfo::default()
            .application_name(APP_NAME)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(ENGINE_NAME)
            .engine_version(ENGINE_VERSION)
            .api_version(REQUIRED_VK_VERSION);

        let mut extensions = ash_window::enumerate_required_extensions(display_handle)
            .map_err(|e| format!("Failed to get required extensions: {:?}", e))?
            .to_vec();

        if enable_validation {
            extensions.push(debug_utils::NAME.as_ptr());
        }

        let mut flags = vk::InstanceCreateFlags::empty();
        #[cfg(target_os = "macos")]
        {
            extensions.push(ash::khr::portability_enumeration::NAME.as_ptr());
            flags |= vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
        }

        let layer_name_ptrs: Vec<*const c_char> = if enable_validation {
            vec![c"VK_LAYER_KHRONOS_validation".as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .flags(flags)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_name_ptrs);

        entry
            .create_instance(&create_info, None)
            .map_err(|e| format!("Failed to create Vulkan instance: {:?}", e))
    }

    unsafe fn create_debug_messenger(
        entry: &Entry,
        instance: &Instance,
    ) -> Result<(debug_utils::Instance, vk::DebugUtilsMessengerEXT), String> {
        let loader = debug_utils::Instance::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = loader
            .create_debug_utils_messenger(&create_info, None)
            .map_err(|e| format!("Failed to create debug messenger: {:?}", e))?;

        Ok((loader, messenger))
    }

    /// Select the best physical device that can render to the surface.
    unsafe fn pick_physical_device(
        instance: &Instance,
        surface_loader: &surface::Instance,
        surface: vk::SurfaceKHR,
    ) -> Result<(vk::PhysicalDevice, QueueFamilyIndices), String> {
        let devices = instance
            .enumerate_physical_devices()
            .map_err(|e| format!("Failed to enumerate physical devices: {:?}", e))?;

        if devices.is_empty() {
            return Err("No Vulkan-capable GPU found".to_string());
        }

        let mut best: Option<(vk::PhysicalDevice, QueueFamilyIndices, u32)> = None;
        for &device in &devices {
            let families = Self::find_queue_families(instance, device, surface_loader, surface);
            if !families.is_complete() {
                continue;
            }

            let props = instance.get_physical_device_properties(device);
            let score = match props.device_type {
                vk::PhysicalDeviceType::DISCRETE_GPU => 100,
                vk::PhysicalDeviceType::INTEGRATED_GPU => 10,
                _ => 1,
            };

            if best.map_or(true, |(_, _, s)| score > s) {
                best = Some((device, families, score));
            }
        }

        let (physical_device, queue_families, _) =
            best.ok_or_else(|| "No suitable GPU found".to_string())?;

        let props = instance.get_physical_device_properties(physical_device);
        let name = CStr::from_ptr(props.device_name.as_ptr()).to_string_lossy();
        log::info!("selected GPU: {}", name);

        Ok((physical_device, queue_families))
    }

    /// Find queue family indices: first GRAPHICS family, first family with
    /// present support for the surface.
    unsafe fn find_queue_families(
        instance: &Instance,
        device: vk::PhysicalDevice,
        surface_loader: &surface::Instance,
        surface: vk::SurfaceKHR,
    ) -> QueueFamilyIndices {
        let queue_families = instance.get_physical_device_queue_family_properties(device);

        let mut indices = QueueFamilyIndices::default();

        for (i, family) in queue_families.iter().enumerate() {
            let i = i as u32;

            if indices.graphics.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                indices.graphics = Some(i);
            }

            if indices.present.is_none()
                && surface_loader
                    .get_physical_device_surface_support(device, i, surface)
                    .unwrap_or(false)
            {
                indices.present = Some(i);
            }

            if indices.is_complete() {
                break;
            }
        }

        indices
    }

    /// Create logical device with dynamic rendering and synchronization2.
    unsafe fn create_logical_device(
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        queue_families: &QueueFamilyIndices,
    ) -> Result<(Device, vk::Queue, vk::Queue), String> {
        let graphics_family = queue_families.graphics.ok_or("No graphics queue family")?;
        let present_family = queue_families.present.ok_or("No present queue family")?;

        let mut unique_families = vec![graphics_family];
        if !unique_families.contains(&present_family) {
            unique_families.push(present_family);
        }

        let queue_priorities = [1.0f32];
        let queue_create_infos: Vec<_> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        let mut extensions: Vec<*const c_char> = vec![swapchain::NAME.as_ptr()];

        // Portability subset must be enabled if the implementation
        // advertises it (MoltenVK).
        let available = instance
            .enumerate_device_extension_properties(physical_device)
            .unwrap_or_default();
        let has_ext = |name: &CStr| {
            available
                .iter()
                .any(|e| CStr::from_ptr(e.extension_name.as_ptr()) == name)
        };
        if has_ext(ash::khr::portability_subset::NAME) {
            extensions.push(ash::khr::portability_subset::NAME.as_ptr());
        }

        let mut vulkan_13_features = vk::PhysicalDeviceVulkan13Features::default()
            .synchronization2(true)
            .dynamic_rendering(true);

        let device_features = vk::PhysicalDeviceFeatures::default();

        let mut features2 = vk::PhysicalDeviceFeatures2::default()
            .features(device_features)
            .push_next(&mut vulkan_13_features);

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .push_next(&mut features2);

        let device = instance
            .create_device(physical_device, &create_info, None)
            .map_err(|e| format!("Failed to create logical device: {:?}", e))?;

        let graphics_queue = device.get_device_queue(graphics_family, 0);
        let present_queue = device.get_device_queue(present_family, 0);

        Ok((device, graphics_queue, present_queue))
    }

    /// Wait for all device operations to complete.
    pub fn wait_idle(&self) {
        unsafe {
            let _ = self.device.device_wait_idle();
        }
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        unsafe {
            self.wait_idle();

            self.device.destroy_device(None);

            if self.surface != vk::SurfaceKHR::null() {
                self.surface_loader.destroy_surface(self.surface, None);
            }

            if let Some((loader, messenger)) = self.debug.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

/// Debug callback for validation layers, forwarded to the log sink.
unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _ty: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*data).p_message).to_string_lossy();

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::error!(target: "vulkan", "{}", message);
    } else {
        log::warn!(target: "vulkan", "{}", message);
    }

    vk::FALSE
}
