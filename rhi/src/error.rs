//! Rendering backend error types.
//!
//! Failures come in two tiers:
//!
//! - **Recoverable**: returned as [`GraphicsError`] from data-driven paths
//!   (descriptor allocation, binding-layout serialization, pipeline creation).
//!   The caller decides whether to skip the asset or use a fallback.
//! - **Fatal**: reported through [`fatal`], which logs and panics. Used where a
//!   failure means a broken host environment or a synchronization bug upstream
//!   (device, queue, allocator, recorder and fence creation, close/submit/reset,
//!   shader toolchain errors, present).

use std::fmt;

use crate::types::DescriptorHeapType;

/// Errors that can occur in the rendering backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphicsError {
    /// Failed to initialize the graphics system.
    InitializationFailed(String),
    /// No adapter satisfied the selection rules.
    NoSuitableAdapter(String),
    /// Creating a logical device at a given feature level failed.
    DeviceCreationFailed(String),
    /// Failed to create a resource.
    ResourceCreationFailed(String),
    /// A requested feature is not supported.
    FeatureNotSupported(String),
    /// A descriptor heap has no free slots left.
    DescriptorHeapExhausted {
        /// Heap that ran out of slots.
        heap_type: DescriptorHeapType,
        /// Declared capacity of that heap.
        capacity: u32,
    },
    /// An invalid parameter was provided.
    InvalidParameter(String),
    /// Shader source could not be loaded or compiled.
    ShaderCompilationFailed(String),
    /// Binding layout serialization or creation failed.
    RootSignature(String),
    /// The device rejected a pipeline description.
    PipelineCreationFailed(String),
    /// Command allocator or recorder operation failed.
    CommandFailed(String),
    /// Out of GPU memory.
    OutOfMemory,
    /// The GPU device was lost.
    DeviceLost,
    /// The surface is outdated and needs to be reconfigured.
    SurfaceOutdated,
    /// An internal error occurred.
    Internal(String),
}

impl fmt::Display for GraphicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InitializationFailed(msg) => write!(f, "initialization failed: {msg}"),
            Self::NoSuitableAdapter(msg) => write!(f, "no suitable adapter: {msg}"),
            Self::DeviceCreationFailed(msg) => write!(f, "device creation failed: {msg}"),
            Self::ResourceCreationFailed(msg) => write!(f, "resource creation failed: {msg}"),
            Self::FeatureNotSupported(msg) => write!(f, "feature not supported: {msg}"),
            Self::DescriptorHeapExhausted {
                heap_type,
                capacity,
            } => write!(
                f,
                "descriptor heap {heap_type:?} exhausted (capacity {capacity})"
            ),
            Self::InvalidParameter(msg) => write!(f, "invalid parameter: {msg}"),
            Self::ShaderCompilationFailed(msg) => write!(f, "shader compilation failed: {msg}"),
            Self::RootSignature(msg) => write!(f, "binding layout creation failed: {msg}"),
            Self::PipelineCreationFailed(msg) => write!(f, "pipeline creation failed: {msg}"),
            Self::CommandFailed(msg) => write!(f, "command operation failed: {msg}"),
            Self::OutOfMemory => write!(f, "out of GPU memory"),
            Self::DeviceLost => write!(f, "GPU device lost"),
            Self::SurfaceOutdated => write!(f, "surface outdated, needs reconfiguration"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for GraphicsError {}

/// Report an unrecoverable failure and halt.
///
/// Logs `context` and the error at error level, then panics with the same text.
/// Nothing downstream can run correctly after one of these conditions, so there
/// is no return path.
#[track_caller]
pub fn fatal(context: &str, error: impl fmt::Display) -> ! {
    log::error!("fatal: {context}: {error}");
    panic!("fatal graphics error: {context}: {error}");
}

/// Extension for turning a `Result` into a value-or-[`fatal`].
pub trait OrFatal<T> {
    /// Unwrap the value, or report the error through [`fatal`].
    fn or_fatal(self, context: &str) -> T;
}

impl<T, E: fmt::Display> OrFatal<T> for Result<T, E> {
    #[track_caller]
    fn or_fatal(self, context: &str) -> T {
        match self {
            Ok(value) => value,
            Err(e) => fatal(context, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GraphicsError::OutOfMemory;
        assert_eq!(err.to_string(), "out of GPU memory");

        let err = GraphicsError::InitializationFailed("no GPU found".to_string());
        assert_eq!(err.to_string(), "initialization failed: no GPU found");
    }

    #[test]
    fn test_exhaustion_names_heap() {
        let err = GraphicsError::DescriptorHeapExhausted {
            heap_type: DescriptorHeapType::RenderTarget,
            capacity: 4,
        };
        let text = err.to_string();
        assert!(text.contains("RenderTarget"));
        assert!(text.contains("capacity 4"));
    }

    #[test]
    fn test_or_fatal_passes_values_through() {
        let value: Result<u32, GraphicsError> = Ok(7);
        assert_eq!(value.or_fatal("unused"), 7);
    }

    #[test]
    #[should_panic(expected = "fatal graphics error: submit")]
    fn test_or_fatal_panics_on_error() {
        let value: Result<u32, GraphicsError> = Err(GraphicsError::DeviceLost);
        value.or_fatal("submit");
    }
}
