//! Common value types shared across the rendering backend.
//!
//! This module contains formats, resource states, sampler modes and the
//! viewport/scissor rectangles used by both the frontend components and the
//! backend implementations.

mod common;
mod sampler;
mod state;
mod texture;
mod vertex;

pub use common::{Extent2d, ScissorRect, Viewport};
pub use sampler::{AddressMode, CompareFunction, FilterMode};
pub use state::{DescriptorHeapType, ResourceState, ShaderVisibility};
pub use texture::{TextureDescriptor, TextureFormat};
pub use vertex::{InputClassification, VertexFormat};
