//! Backend instance creation and adapter description.
//!
//! An instance is the entry point into a GPU API. It enumerates adapters and
//! creates logical devices on them; adapter choice itself lives in
//! [`GraphicsDevice::initialize`](crate::device::GraphicsDevice::initialize).

use std::fmt;
use std::sync::Arc;

use raw_window_handle::RawDisplayHandle;

use crate::backend::GpuInstance;
use crate::config::ValidationConfig;
use crate::error::GraphicsError;

/// Type of graphics adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterType {
    /// Discrete GPU (dedicated graphics card).
    Discrete,
    /// Integrated GPU (shared with CPU).
    Integrated,
    /// Virtualized GPU exposed by a hypervisor.
    Virtual,
    /// Software renderer running on the CPU.
    Software,
    /// Unknown adapter type.
    Unknown,
}

impl AdapterType {
    /// Preference rank; lower is better.
    pub fn preference_rank(self) -> u8 {
        match self {
            Self::Discrete => 0,
            Self::Integrated => 1,
            Self::Virtual => 2,
            Self::Unknown => 3,
            Self::Software => 4,
        }
    }
}

/// Device feature level, ordered oldest to newest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FeatureLevel {
    /// Core 1.2 plus dynamic rendering.
    V1_2,
    /// Core 1.3.
    V1_3,
}

impl fmt::Display for FeatureLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V1_2 => write!(f, "1.2"),
            Self::V1_3 => write!(f, "1.3"),
        }
    }
}

/// Information about a graphics adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterInfo {
    /// Backend-specific adapter index.
    pub index: usize,
    /// Adapter name.
    pub name: String,
    /// PCI vendor ID.
    pub vendor_id: u32,
    /// PCI device ID.
    pub device_id: u32,
    /// Device type (discrete, integrated, etc.).
    pub device_type: AdapterType,
    /// Bytes of device-local memory.
    pub dedicated_memory: u64,
    /// Highest feature level the adapter reports.
    pub max_feature_level: FeatureLevel,
}

impl AdapterInfo {
    /// Returns true for software or emulated adapters.
    pub fn is_software(&self) -> bool {
        self.device_type == AdapterType::Software
    }

    /// Whether the adapter can create a device at `level`.
    pub fn supports(&self, level: FeatureLevel) -> bool {
        self.max_feature_level >= level
    }
}

/// Which GPU API to create an instance for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BackendType {
    /// Native Vulkan via ash.
    #[cfg_attr(feature = "vulkan-backend", default)]
    Vulkan,
    /// In-process simulated GPU for tests and headless runs.
    #[cfg_attr(not(feature = "vulkan-backend"), default)]
    Dummy,
}

/// Parameters for creating an instance.
#[derive(Debug, Clone, Default)]
pub struct InstanceParameters {
    /// Backend to use.
    pub backend: BackendType,
    /// Validation layer settings.
    pub validation: ValidationConfig,
    /// Display the surfaces will be created on, used to pick surface extensions.
    pub display: Option<RawDisplayHandle>,
}

impl InstanceParameters {
    /// Create parameters for the given backend.
    pub fn new(backend: BackendType) -> Self {
        Self {
            backend,
            ..Default::default()
        }
    }

    /// Set validation settings.
    pub fn with_validation(mut self, validation: ValidationConfig) -> Self {
        self.validation = validation;
        self
    }

    /// Set the display handle.
    pub fn with_display(mut self, display: RawDisplayHandle) -> Self {
        self.display = Some(display);
        self
    }
}

/// Create an instance of the requested backend.
///
/// There is no implicit fallback: asking for Vulkan on a machine without a
/// loader is an error, never a silent switch to the dummy backend.
pub fn create_instance(
    params: &InstanceParameters,
) -> Result<Arc<dyn GpuInstance>, GraphicsError> {
    log::info!("Creating {:?} instance", params.backend);
    match params.backend {
        #[cfg(feature = "vulkan-backend")]
        BackendType::Vulkan => Ok(Arc::new(crate::backend::vulkan::VulkanInstance::new(
            params,
        )?)),
        #[cfg(not(feature = "vulkan-backend"))]
        BackendType::Vulkan => Err(GraphicsError::FeatureNotSupported(
            "built without the vulkan-backend feature".to_string(),
        )),
        BackendType::Dummy => Ok(Arc::new(crate::backend::dummy::DummyInstance::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_level_ordering() {
        assert!(FeatureLevel::V1_3 > FeatureLevel::V1_2);
        assert_eq!(FeatureLevel::V1_3.to_string(), "1.3");
    }

    #[test]
    fn test_adapter_preference() {
        assert!(
            AdapterType::Discrete.preference_rank() < AdapterType::Integrated.preference_rank()
        );
        assert!(
            AdapterType::Integrated.preference_rank() < AdapterType::Software.preference_rank()
        );
    }

    #[test]
    fn test_create_dummy_instance() {
        let instance = create_instance(&InstanceParameters::new(BackendType::Dummy)).unwrap();
        assert_eq!(instance.name(), "Dummy");
        assert!(!instance.enumerate_adapters().unwrap().is_empty());
    }
}
