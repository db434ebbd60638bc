//! # RedLilium RHI
//!
//! Real-time rendering backend for RedLilium: GPU device bring-up, descriptor
//! heaps, command submission, swapchain presentation, shader compilation and
//! pipeline state construction, driven by a fence-paced frame loop.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`GraphicsDevice`] - adapter selection and logical device creation
//! - [`DescriptorHeapManager`] - fixed-capacity descriptor slot allocation
//! - [`CommandExecutor`] - the single command recorder and its queue
//! - [`SwapchainPresenter`] - back buffers, their views and the depth target
//! - [`ShaderCompiler`] - WGSL to SPIR-V compilation
//! - [`RootSignatureBuilder`] - binding layout declaration and validation
//! - [`PsoDescriptor`] and [`PipelineStateFactory`] - pipeline construction
//! - [`FrameScheduler`] - the begin/pre-draw/post-draw/end frame cycle
//! - [`RenderBackend`] - all of the above, created together
//!
//! Two backends implement the [`backend::GpuDevice`] seam: Vulkan (through
//! ash, feature `vulkan-backend`) and an in-process dummy used for tests.
//!
//! ## Example
//!
//! ```ignore
//! use redlilium_rhi::{
//!     BackendType, InstanceParameters, RenderBackend, RendererConfig, SurfaceHandle,
//!     create_instance,
//! };
//!
//! let instance = create_instance(&InstanceParameters::new(BackendType::Vulkan))?;
//! let surface = SurfaceHandle::from_window(&window)?;
//! let mut backend = RenderBackend::new(instance.as_ref(), &surface, RendererConfig::default());
//!
//! backend.begin_frame();
//! backend.pre_draw();
//! backend.post_draw();
//! backend.end_frame();
//! ```

pub mod backend;
pub mod command;
pub mod config;
pub mod context;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod instance;
pub mod pipeline;
pub mod profiling;
pub mod renderer;
pub mod root_signature;
pub mod scheduler;
pub mod shader;
pub mod swapchain;
pub mod types;

// Re-export main types for convenience
pub use command::{CommandExecutor, CommandRecorder};
pub use config::{RendererConfig, ShaderCompileOptions, ValidationConfig, ValidationSeverity};
pub use context::DeviceContext;
pub use descriptor::{DescriptorHeapManager, DescriptorSlot};
pub use device::GraphicsDevice;
pub use error::{GraphicsError, OrFatal, fatal};
pub use instance::{
    AdapterInfo, AdapterType, BackendType, FeatureLevel, InstanceParameters, create_instance,
};
pub use pipeline::{
    BlendMode, InputElement, PipelineBinding, PipelineStateFactory, PsoDescriptor, ShaderRef,
    presets,
};
pub use renderer::RenderBackend;
pub use root_signature::{
    BindingLayout, DescriptorRange, DescriptorRangeType, RootSignatureBuilder, StaticSampler,
};
pub use scheduler::{Fence, FramePhase, FrameScheduler, FrameState};
pub use shader::{ShaderBinary, ShaderCompiler, ShaderStage, TargetProfile};
pub use swapchain::{SurfaceHandle, SwapchainDescriptor, SwapchainPresenter};
pub use types::{
    DescriptorHeapType, Extent2d, ResourceState, ScissorRect, ShaderVisibility, TextureFormat,
    Viewport,
};

/// RHI library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_public_types_are_thread_safe() {
        static_assertions::assert_impl_all!(GraphicsDevice: Send, Sync);
        static_assertions::assert_impl_all!(PipelineBinding: Send, Sync);
        static_assertions::assert_impl_all!(BindingLayout: Send, Sync);
    }
}
