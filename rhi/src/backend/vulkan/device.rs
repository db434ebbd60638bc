//! Vulkan physical and logical device management.

use std::collections::HashMap;
use std::ffi::{CStr, c_char};
use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;

use crate::error::GraphicsError;
use crate::instance::{AdapterInfo, AdapterType, FeatureLevel};

use super::instance::{InstanceShared, feature_level_of, feature_level_version, version_string};
use super::{VulkanShared, allocator};

/// Device extensions every feature level needs.
const REQUIRED_EXTENSIONS: [&CStr; 2] =
    [ash::khr::swapchain::NAME, ash::khr::dynamic_rendering::NAME];

/// Describe every physical device as an adapter, in enumeration order.
///
/// Devices below API 1.2 are reported as software adapters so selection
/// skips them.
pub(crate) fn enumerate_adapters(
    instance: &InstanceShared,
) -> Result<Vec<AdapterInfo>, GraphicsError> {
    let devices = unsafe { instance.instance.enumerate_physical_devices() }.map_err(|e| {
        GraphicsError::InitializationFailed(format!("failed to enumerate physical devices: {e:?}"))
    })?;

    Ok(devices
        .iter()
        .enumerate()
        .map(|(index, &physical_device)| describe(instance, index, physical_device))
        .collect())
}

fn describe(
    instance: &InstanceShared,
    index: usize,
    physical_device: vk::PhysicalDevice,
) -> AdapterInfo {
    let properties = unsafe {
        instance
            .instance
            .get_physical_device_properties(physical_device)
    };
    let memory = unsafe {
        instance
            .instance
            .get_physical_device_memory_properties(physical_device)
    };

    let device_local: u64 = memory
        .memory_heaps_as_slice()
        .iter()
        .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
        .map(|heap| heap.size)
        .sum();

    let max_feature_level = feature_level_of(properties.api_version.min(instance.api_version));
    let mut device_type = match properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => AdapterType::Discrete,
        vk::PhysicalDeviceType::INTEGRATED_GPU => AdapterType::Integrated,
        vk::PhysicalDeviceType::VIRTUAL_GPU => AdapterType::Virtual,
        vk::PhysicalDeviceType::CPU => AdapterType::Software,
        _ => AdapterType::Unknown,
    };
    if max_feature_level.is_none() || !supports_extensions(instance, physical_device) {
        device_type = AdapterType::Software;
    }

    let name = properties
        .device_name_as_c_str()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| String::from("(unnamed)"));

    log::debug!(
        "Vulkan adapter {index}: '{name}' ({:?}, API {})",
        properties.device_type,
        version_string(properties.api_version)
    );

    AdapterInfo {
        index,
        name,
        vendor_id: properties.vendor_id,
        device_id: properties.device_id,
        device_type,
        dedicated_memory: device_local,
        max_feature_level: max_feature_level.unwrap_or(FeatureLevel::V1_2),
    }
}

fn supports_extensions(instance: &InstanceShared, physical_device: vk::PhysicalDevice) -> bool {
    let Ok(available) = (unsafe {
        instance
            .instance
            .enumerate_device_extension_properties(physical_device)
    }) else {
        return false;
    };
    REQUIRED_EXTENSIONS.iter().all(|required| {
        available
            .iter()
            .any(|ext| ext.extension_name_as_c_str() == Ok(*required))
    })
}

/// Find a queue family that supports graphics operations.
fn find_graphics_queue_family(
    instance: &InstanceShared,
    physical_device: vk::PhysicalDevice,
) -> Result<u32, GraphicsError> {
    let families = unsafe {
        instance
            .instance
            .get_physical_device_queue_family_properties(physical_device)
    };

    families
        .iter()
        .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .map(|index| index as u32)
        .ok_or_else(|| {
            GraphicsError::DeviceCreationFailed("no graphics queue family".to_string())
        })
}

/// Create a logical device on `adapter` at exactly `level`.
pub(crate) fn create_device(
    instance: &Arc<InstanceShared>,
    adapter: &AdapterInfo,
    level: FeatureLevel,
) -> Result<Arc<VulkanShared>, GraphicsError> {
    if !adapter.supports(level) {
        return Err(GraphicsError::DeviceCreationFailed(format!(
            "'{}' supports API {} at most",
            adapter.name, adapter.max_feature_level
        )));
    }

    let devices = unsafe { instance.instance.enumerate_physical_devices() }.map_err(|e| {
        GraphicsError::DeviceCreationFailed(format!("failed to enumerate physical devices: {e:?}"))
    })?;
    let physical_device = *devices.get(adapter.index).ok_or_else(|| {
        GraphicsError::DeviceCreationFailed(format!("adapter {} disappeared", adapter.index))
    })?;

    let queue_family = find_graphics_queue_family(instance, physical_device)?;
    let queue_priorities = [1.0f32];
    let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
        .queue_family_index(queue_family)
        .queue_priorities(&queue_priorities)];

    let extensions: Vec<*const c_char> =
        REQUIRED_EXTENSIONS.iter().map(|ext| ext.as_ptr()).collect();
    let features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(true);

    let mut vulkan_12_features =
        vk::PhysicalDeviceVulkan12Features::default().timeline_semaphore(true);
    let mut vulkan_13_features = vk::PhysicalDeviceVulkan13Features::default()
        .dynamic_rendering(true)
        .synchronization2(true);
    let mut dynamic_rendering_features =
        vk::PhysicalDeviceDynamicRenderingFeatures::default().dynamic_rendering(true);

    let mut create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extensions)
        .enabled_features(&features)
        .push_next(&mut vulkan_12_features);
    create_info = match level {
        FeatureLevel::V1_3 => create_info.push_next(&mut vulkan_13_features),
        FeatureLevel::V1_2 => create_info.push_next(&mut dynamic_rendering_features),
    };

    let device = unsafe {
        instance
            .instance
            .create_device(physical_device, &create_info, None)
    }
    .map_err(|e| {
        GraphicsError::DeviceCreationFailed(format!(
            "vkCreateDevice at API {} failed: {e:?}",
            version_string(feature_level_version(level))
        ))
    })?;

    let allocator = match allocator::create_allocator(&instance.instance, physical_device, &device)
    {
        Ok(allocator) => allocator,
        Err(e) => {
            unsafe { device.destroy_device(None) };
            return Err(e);
        }
    };

    let queue = unsafe { device.get_device_queue(queue_family, 0) };
    let swapchain_loader = ash::khr::swapchain::Device::new(&instance.instance, &device);
    let dynamic_rendering = ash::khr::dynamic_rendering::Device::new(&instance.instance, &device);

    log::debug!(
        "Created Vulkan device on '{}' (queue family {queue_family})",
        adapter.name
    );

    Ok(Arc::new(VulkanShared {
        instance: instance.clone(),
        physical_device,
        device,
        queue_family,
        queue: Mutex::new(queue),
        allocator: Mutex::new(Some(allocator)),
        swapchain_loader,
        dynamic_rendering,
        feature_level: level,
        views: Mutex::new(HashMap::new()),
        format_overrides: Mutex::new(HashMap::new()),
        pending_waits: Mutex::new(Vec::new()),
        next_heap_id: Mutex::new(0),
    }))
}
