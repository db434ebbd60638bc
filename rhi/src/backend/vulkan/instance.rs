//! Vulkan instance creation and adapter enumeration.

use std::ffi::{CStr, c_char};
use std::sync::Arc;

use ash::vk;

use crate::backend::{GpuDevice, GpuInstance};
use crate::config::ValidationConfig;
use crate::error::GraphicsError;
use crate::instance::{AdapterInfo, FeatureLevel, InstanceParameters};

use super::debug::DebugMessenger;
use super::{VulkanDevice, device};

/// Newest API version the backend asks for.
const MAX_API_VERSION: u32 = vk::API_VERSION_1_3;

/// Validation layer name.
const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Instance-level state. Outlives every device created from it.
pub(crate) struct InstanceShared {
    pub(crate) entry: ash::Entry,
    pub(crate) instance: ash::Instance,
    pub(crate) surface_loader: ash::khr::surface::Instance,
    pub(crate) api_version: u32,
    pub(crate) surface_support: bool,
    debug: Option<DebugMessenger>,
}

impl Drop for InstanceShared {
    fn drop(&mut self) {
        // The messenger must be gone before the instance it was created on.
        self.debug.take();
        unsafe { self.instance.destroy_instance(None) };
        log::debug!("Vulkan instance destroyed");
    }
}

/// Vulkan API instance.
pub struct VulkanInstance {
    shared: Arc<InstanceShared>,
    validation: ValidationConfig,
}

impl std::fmt::Debug for VulkanInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanInstance")
            .field("api_version", &version_string(self.shared.api_version))
            .field("validation", &self.shared.debug.is_some())
            .finish()
    }
}

impl VulkanInstance {
    /// Load the Vulkan loader and create an instance.
    ///
    /// Surface extensions are enabled only when `params.display` is set.
    pub fn new(params: &InstanceParameters) -> Result<Self, GraphicsError> {
        let entry = unsafe { ash::Entry::load() }.map_err(|e| {
            GraphicsError::InitializationFailed(format!("failed to load Vulkan: {e}"))
        })?;

        let loader_version = unsafe { entry.try_enumerate_instance_version() }
            .ok()
            .flatten()
            .unwrap_or(vk::API_VERSION_1_0);
        let api_version = loader_version.min(MAX_API_VERSION);
        if api_version < vk::API_VERSION_1_2 {
            return Err(GraphicsError::InitializationFailed(format!(
                "Vulkan loader only supports {}",
                version_string(loader_version)
            )));
        }

        let validation = &params.validation;
        let validation_available = validation.enabled && has_validation_layer(&entry);
        if validation.enabled && !validation_available {
            log::warn!("Validation layer requested but not installed");
        }

        let app_info = vk::ApplicationInfo::default()
            .application_name(c"RedLilium")
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"RedLilium Engine")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(api_version);

        let mut extensions: Vec<*const c_char> = Vec::new();
        if let Some(display) = params.display {
            let required = ash_window::enumerate_required_extensions(display).map_err(|e| {
                GraphicsError::InitializationFailed(format!(
                    "no surface extensions for this display: {e:?}"
                ))
            })?;
            extensions.extend_from_slice(required);
        }
        if validation_available {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        #[allow(unused_mut)]
        let mut create_flags = vk::InstanceCreateFlags::empty();
        #[cfg(target_os = "macos")]
        {
            extensions.push(ash::khr::portability_enumeration::NAME.as_ptr());
            create_flags |= vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
        }

        let layer_names: Vec<*const c_char> = if validation_available {
            vec![VALIDATION_LAYER_NAME.as_ptr()]
        } else {
            Vec::new()
        };

        let create_info = vk::InstanceCreateInfo::default()
            .flags(create_flags)
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let instance = unsafe { entry.create_instance(&create_info, None) }.map_err(|e| {
            GraphicsError::InitializationFailed(format!("failed to create Vulkan instance: {e:?}"))
        })?;

        let debug = if validation_available {
            match DebugMessenger::new(&entry, &instance, validation.clone()) {
                Ok(messenger) => Some(messenger),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);

        log::info!(
            "Created Vulkan {} instance (validation: {})",
            version_string(api_version),
            debug.is_some()
        );

        Ok(Self {
            shared: Arc::new(InstanceShared {
                entry,
                instance,
                surface_loader,
                api_version,
                surface_support: params.display.is_some(),
                debug,
            }),
            validation: params.validation.clone(),
        })
    }

    /// Validation settings the instance was created with.
    pub fn validation(&self) -> &ValidationConfig {
        &self.validation
    }
}

impl GpuInstance for VulkanInstance {
    fn name(&self) -> &'static str {
        "Vulkan"
    }

    fn enumerate_adapters(&self) -> Result<Vec<AdapterInfo>, GraphicsError> {
        device::enumerate_adapters(&self.shared)
    }

    fn create_device(
        &self,
        adapter: &AdapterInfo,
        level: FeatureLevel,
    ) -> Result<Arc<dyn GpuDevice>, GraphicsError> {
        let shared = device::create_device(&self.shared, adapter, level)?;
        Ok(Arc::new(VulkanDevice { shared }))
    }
}

/// API version a feature level corresponds to.
pub(crate) fn feature_level_version(level: FeatureLevel) -> u32 {
    match level {
        FeatureLevel::V1_2 => vk::API_VERSION_1_2,
        FeatureLevel::V1_3 => vk::API_VERSION_1_3,
    }
}

/// Highest feature level an API version satisfies.
pub(crate) fn feature_level_of(api_version: u32) -> Option<FeatureLevel> {
    let version = vk::make_api_version(
        0,
        vk::api_version_major(api_version),
        vk::api_version_minor(api_version),
        0,
    );
    if version >= vk::API_VERSION_1_3 {
        Some(FeatureLevel::V1_3)
    } else if version >= vk::API_VERSION_1_2 {
        Some(FeatureLevel::V1_2)
    } else {
        None
    }
}

pub(crate) fn version_string(version: u32) -> String {
    format!(
        "{}.{}.{}",
        vk::api_version_major(version),
        vk::api_version_minor(version),
        vk::api_version_patch(version)
    )
}

fn has_validation_layer(entry: &ash::Entry) -> bool {
    let Ok(layers) = (unsafe { entry.enumerate_instance_layer_properties() }) else {
        return false;
    };
    layers
        .iter()
        .any(|layer| layer.layer_name_as_c_str() == Ok(VALIDATION_LAYER_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_level_mapping() {
        assert_eq!(feature_level_of(vk::API_VERSION_1_3), Some(FeatureLevel::V1_3));
        assert_eq!(
            feature_level_of(vk::make_api_version(0, 1, 3, 280)),
            Some(FeatureLevel::V1_3)
        );
        assert_eq!(feature_level_of(vk::API_VERSION_1_2), Some(FeatureLevel::V1_2));
        assert_eq!(feature_level_of(vk::API_VERSION_1_1), None);
        assert_eq!(
            feature_level_version(FeatureLevel::V1_2),
            vk::API_VERSION_1_2
        );
    }

    #[test]
    fn test_version_string() {
        assert_eq!(version_string(vk::make_api_version(0, 1, 3, 12)), "1.3.12");
    }
}
