//! Graphics pipeline construction.
//!
//! A pipeline is built in two halves that live and die together:
//!
//! ```text
//! RootSignatureBuilder ──build──► Arc<BindingLayout> ─┐
//!                                                     ├──► PipelineBinding
//! PsoDescriptor ──compile shaders, convert layout──► GpuPipeline ─┘
//! ```
//!
//! [`PsoDescriptor`] is a plain value describing shaders, fixed-function state
//! and the vertex input layout. The [`presets`] module returns pre-filled
//! descriptors for common cases, which callers adjust with `with_*` methods
//! before building. [`PipelineStateFactory::create_pso`] turns a descriptor
//! plus a [`RootSignatureBuilder`](crate::root_signature::RootSignatureBuilder)
//! into a [`PipelineBinding`].
//!
//! # Example
//!
//! ```ignore
//! use redlilium_rhi::pipeline::{presets, PipelineStateFactory, ShaderRef};
//!
//! let factory = PipelineStateFactory::new(&device, ShaderCompiler::new(config.shader));
//! let desc = presets::screen_space_sprite(
//!     ShaderRef::vertex("shaders/sprite.wgsl", "vs_main"),
//!     ShaderRef::pixel("shaders/sprite.wgsl", "ps_main"),
//! )
//! .with_blend_mode(BlendMode::Additive);
//!
//! match factory.create_pso(&desc, &root_signature) {
//!     Ok(binding) => materials.push(Arc::new(binding)),
//!     Err(e) => log::warn!("skipping sprite material: {e}"),
//! }
//! ```

mod descriptor;
mod factory;
pub mod presets;
mod state;

pub use descriptor::{APPEND_ALIGNED, InputElement, PsoDescriptor, ShaderRef};
pub use factory::{InputLayoutStorage, PipelineBinding, PipelineStateFactory};
pub use state::{
    BlendComponent, BlendFactor, BlendMode, BlendOperation, BlendState, ColorWrites, CullMode,
    DepthStencilState, FillMode, FrontFace, PrimitiveTopology, RasterizerState,
};
