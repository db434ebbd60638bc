//! Graphics device.
//!
//! The [`GraphicsDevice`] owns the logical device every other component
//! creates objects through. It is created once by
//! [`GraphicsDevice::initialize`], which picks the best hardware adapter and
//! the newest feature level it supports.
//!
//! # Adapter Selection
//!
//! ```text
//! enumerate adapters
//!         │
//!         ▼
//! drop software adapters
//!         │
//!         ▼
//! sort: discrete > integrated > virtual > unknown,
//!       then most dedicated memory first
//!         │
//!         ▼
//! for each adapter, for each level in SUPPORTED_FEATURE_LEVELS (newest first):
//!     try create_device ──► success: done
//!         │
//!         ▼
//! nothing left ──► fatal
//! ```
//!
//! There is no fallback to a software adapter: a machine without a usable GPU
//! fails at startup rather than rendering at a crawl.

use std::fmt;
use std::sync::Arc;

use crate::backend::{GpuDevice, GpuInstance};
use crate::config::{RendererConfig, SUPPORTED_FEATURE_LEVELS};
use crate::error::{GraphicsError, OrFatal};
use crate::instance::{AdapterInfo, FeatureLevel};

/// The logical GPU device.
///
/// Cheap to clone; clones share the same backend device.
///
/// # Thread Safety
///
/// `GraphicsDevice` is `Send + Sync`. Object creation may happen from any
/// thread; command submission is owned by a single
/// [`CommandExecutor`](crate::command::CommandExecutor).
#[derive(Clone)]
pub struct GraphicsDevice {
    raw: Arc<dyn GpuDevice>,
    adapter: AdapterInfo,
    feature_level: FeatureLevel,
}

impl fmt::Debug for GraphicsDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphicsDevice")
            .field("backend", &self.raw.name())
            .field("adapter", &self.adapter.name)
            .field("feature_level", &self.feature_level)
            .finish()
    }
}

impl GraphicsDevice {
    /// Select an adapter and create the device on it.
    ///
    /// # Panics
    ///
    /// Panics (after logging) if the configuration is inconsistent or no
    /// hardware adapter can create a device at any supported feature level.
    pub fn initialize(instance: &dyn GpuInstance, config: &RendererConfig) -> Self {
        config.validate().or_fatal("renderer configuration");
        Self::try_initialize(instance).or_fatal("device initialization")
    }

    /// Fallible form of [`GraphicsDevice::initialize`].
    pub fn try_initialize(instance: &dyn GpuInstance) -> Result<Self, GraphicsError> {
        let adapters = instance.enumerate_adapters()?;
        for adapter in &adapters {
            log::debug!(
                "Found adapter '{}' ({:?}, {} MiB, up to {})",
                adapter.name,
                adapter.device_type,
                adapter.dedicated_memory >> 20,
                adapter.max_feature_level
            );
        }

        let candidates = Self::select_adapters(&adapters);
        if candidates.is_empty() {
            return Err(GraphicsError::NoSuitableAdapter(format!(
                "{} adapter(s) found, none of them hardware",
                adapters.len()
            )));
        }

        for adapter in &candidates {
            for level in SUPPORTED_FEATURE_LEVELS {
                if !adapter.supports(level) {
                    continue;
                }
                match instance.create_device(adapter, level) {
                    Ok(raw) => {
                        log::info!(
                            "Using adapter '{}' ({:?}) at feature level {level} on {}",
                            adapter.name,
                            adapter.device_type,
                            raw.name()
                        );
                        return Ok(Self {
                            raw,
                            adapter: adapter.clone(),
                            feature_level: level,
                        });
                    }
                    Err(e) => {
                        log::warn!(
                            "Adapter '{}' failed at feature level {level}: {e}",
                            adapter.name
                        );
                    }
                }
            }
        }

        Err(GraphicsError::NoSuitableAdapter(format!(
            "no adapter could create a device at any of {SUPPORTED_FEATURE_LEVELS:?}"
        )))
    }

    /// Filter and order adapters by preference.
    ///
    /// Software adapters are removed. The rest are ordered by adapter type,
    /// then by dedicated memory (largest first), then by enumeration order.
    pub fn select_adapters(adapters: &[AdapterInfo]) -> Vec<AdapterInfo> {
        let mut candidates: Vec<AdapterInfo> = adapters
            .iter()
            .filter(|adapter| !adapter.is_software())
            .cloned()
            .collect();
        candidates.sort_by(|a, b| {
            a.device_type
                .preference_rank()
                .cmp(&b.device_type.preference_rank())
                .then(b.dedicated_memory.cmp(&a.dedicated_memory))
                .then(a.index.cmp(&b.index))
        });
        candidates
    }

    /// Adapter the device was created on.
    pub fn adapter(&self) -> &AdapterInfo {
        &self.adapter
    }

    /// Feature level the device was created at.
    pub fn feature_level(&self) -> FeatureLevel {
        self.feature_level
    }

    /// Backend name.
    pub fn backend_name(&self) -> &'static str {
        self.raw.name()
    }

    /// Backend device.
    pub fn raw(&self) -> &Arc<dyn GpuDevice> {
        &self.raw
    }

    /// Block until the GPU has finished all submitted work.
    pub fn wait_idle(&self) -> Result<(), GraphicsError> {
        self.raw.wait_idle()
    }
}

static_assertions::assert_impl_all!(GraphicsDevice: Send, Sync, Clone);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyInstance;
    use crate::instance::AdapterType;

    fn adapter(name: &str, device_type: AdapterType, memory_mib: u64) -> AdapterInfo {
        let mut adapter = DummyInstance::adapter(name, device_type, FeatureLevel::V1_3);
        adapter.dedicated_memory = memory_mib << 20;
        adapter
    }

    #[test]
    fn test_select_orders_by_type_then_memory() {
        let mut adapters = vec![
            adapter("igpu", AdapterType::Integrated, 512),
            adapter("small", AdapterType::Discrete, 4096),
            adapter("cpu", AdapterType::Software, 0),
            adapter("big", AdapterType::Discrete, 16384),
        ];
        for (i, a) in adapters.iter_mut().enumerate() {
            a.index = i;
        }

        let names: Vec<_> = GraphicsDevice::select_adapters(&adapters)
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(names, ["big", "small", "igpu"]);
    }

    #[test]
    fn test_initialize_prefers_newest_level() {
        let instance = DummyInstance::new();
        let device = GraphicsDevice::initialize(&instance, &RendererConfig::default());
        assert_eq!(device.feature_level(), FeatureLevel::V1_3);
        assert_eq!(device.backend_name(), "Dummy");
    }

    #[test]
    fn test_initialize_falls_back_to_older_level() {
        let instance = DummyInstance::with_adapters(vec![DummyInstance::adapter(
            "old",
            AdapterType::Discrete,
            FeatureLevel::V1_2,
        )]);
        let device = GraphicsDevice::try_initialize(&instance).unwrap();
        assert_eq!(device.feature_level(), FeatureLevel::V1_2);
    }

    #[test]
    fn test_software_only_is_an_error() {
        let instance = DummyInstance::with_adapters(vec![DummyInstance::adapter(
            "swiftshader",
            AdapterType::Software,
            FeatureLevel::V1_3,
        )]);
        let err = GraphicsDevice::try_initialize(&instance).unwrap_err();
        assert!(matches!(err, GraphicsError::NoSuitableAdapter(_)));
        assert!(instance.controller().device_attempts().is_empty());
    }
}
