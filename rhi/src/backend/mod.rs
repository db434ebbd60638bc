//! GPU backend abstraction layer.
//!
//! The frontend components talk to the GPU exclusively through the
//! [`GpuInstance`] and [`GpuDevice`] traits. Objects created through them are
//! returned as handle enums with one variant per compiled-in backend.
//!
//! # Available Backends
//!
//! - `dummy`: deterministic in-process GPU used by tests and headless runs
//! - `vulkan-backend`: native Vulkan using ash
//!
//! # Handle Ownership
//!
//! Vulkan variants own their native objects and destroy them on drop. Each
//! one keeps the logical device alive through a shared reference, so the
//! device itself is always destroyed last.

pub mod dummy;

#[cfg(feature = "vulkan-backend")]
pub mod vulkan;

use std::ffi::CStr;
use std::sync::Arc;

use crate::error::GraphicsError;
use crate::instance::{AdapterInfo, FeatureLevel};
use crate::pipeline::{BlendState, DepthStencilState, PrimitiveTopology, RasterizerState};
use crate::root_signature::RootSignatureDesc;
use crate::swapchain::{SurfaceHandle, SwapchainDescriptor};
use crate::types::{
    DescriptorHeapType, Extent2d, InputClassification, ResourceState, ScissorRect,
    TextureDescriptor, TextureFormat, VertexFormat, Viewport,
};

// ============================================================================
// Descriptor handles
// ============================================================================

/// CPU-side address of one descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CpuDescriptorHandle(pub u64);

impl CpuDescriptorHandle {
    /// Handle `index` strides past `self`.
    pub fn offset(self, index: u32, increment: u64) -> Self {
        Self(self.0 + index as u64 * increment)
    }
}

/// GPU-side address of one shader-visible descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GpuDescriptorHandle(pub u64);

impl GpuDescriptorHandle {
    /// Handle `index` strides past `self`.
    pub fn offset(self, index: u32, increment: u64) -> Self {
        Self(self.0 + index as u64 * increment)
    }
}

// ============================================================================
// Handles
// ============================================================================

/// Handle to a command submission queue.
pub enum GpuQueue {
    /// Dummy backend queue.
    Dummy,
    /// Vulkan backend queue.
    #[cfg(feature = "vulkan-backend")]
    Vulkan(vulkan::VulkanQueue),
}

/// Handle to a command allocator (the memory commands are recorded into).
pub enum GpuCommandAllocator {
    /// Dummy backend allocator.
    Dummy {
        /// Allocator identity.
        id: u64,
    },
    /// Vulkan backend command pool.
    #[cfg(feature = "vulkan-backend")]
    Vulkan(vulkan::VulkanCommandPool),
}

/// Handle to a command recorder (list).
#[allow(clippy::large_enum_variant)]
pub enum GpuCommandList {
    /// Dummy backend recorder.
    Dummy(dummy::DummyCommandList),
    /// Vulkan backend command buffer.
    #[cfg(feature = "vulkan-backend")]
    Vulkan(vulkan::VulkanCommandList),
}

/// Handle to a monotonic GPU fence.
pub enum GpuFence {
    /// Dummy backend fence.
    Dummy(Arc<dummy::DummyFence>),
    /// Vulkan timeline semaphore.
    #[cfg(feature = "vulkan-backend")]
    Vulkan(vulkan::VulkanTimeline),
}

/// Handle to a texture resource (back buffer or depth target).
#[derive(Clone)]
pub enum GpuResource {
    /// Dummy backend texture.
    Dummy {
        /// Resource identity.
        id: u64,
        /// Storage format.
        format: TextureFormat,
        /// Size in pixels.
        extent: Extent2d,
    },
    /// Vulkan image.
    #[cfg(feature = "vulkan-backend")]
    Vulkan(Arc<vulkan::VulkanImage>),
}

impl GpuResource {
    /// Storage format of the resource.
    pub fn format(&self) -> TextureFormat {
        match self {
            Self::Dummy { format, .. } => *format,
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan(image) => image.format(),
        }
    }

    /// Size of the resource in pixels.
    pub fn extent(&self) -> Extent2d {
        match self {
            Self::Dummy { extent, .. } => *extent,
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan(image) => image.extent(),
        }
    }
}

/// Handle to a descriptor heap.
pub struct GpuDescriptorHeap {
    /// Kind of descriptors stored in the heap.
    pub heap_type: DescriptorHeapType,
    /// Number of descriptors.
    pub capacity: u32,
    /// Distance between consecutive descriptors.
    pub increment: u64,
    /// Address of descriptor 0.
    pub cpu_start: CpuDescriptorHandle,
    /// GPU address of descriptor 0 (shader-visible heaps only).
    pub gpu_start: Option<GpuDescriptorHandle>,
    /// Backend object backing the heap.
    pub raw: RawDescriptorHeap,
}

/// Backend object behind a [`GpuDescriptorHeap`].
pub enum RawDescriptorHeap {
    /// Dummy heap.
    Dummy {
        /// Heap identity.
        id: u64,
    },
    /// Vulkan descriptor table.
    #[cfg(feature = "vulkan-backend")]
    Vulkan(vulkan::VulkanDescriptorHeap),
}

/// Handle to a presentable swapchain.
#[allow(clippy::large_enum_variant)]
pub enum GpuSwapchain {
    /// Dummy swapchain.
    Dummy(dummy::DummySwapchain),
    /// Vulkan swapchain.
    #[cfg(feature = "vulkan-backend")]
    Vulkan(vulkan::VulkanSwapchain),
}

/// Handle to a compiled binding layout (root signature).
pub enum GpuRootSignature {
    /// Dummy binding layout.
    Dummy {
        /// Layout identity; 0 is the null layout.
        id: u64,
    },
    /// Vulkan pipeline layout.
    #[cfg(feature = "vulkan-backend")]
    Vulkan(vulkan::VulkanPipelineLayout),
}

impl GpuRootSignature {
    /// Returns true for a null handle.
    pub fn is_null(&self) -> bool {
        match self {
            Self::Dummy { id } => *id == 0,
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan(layout) => layout.is_null(),
        }
    }
}

/// Handle to a compiled graphics pipeline.
pub enum GpuPipeline {
    /// Dummy pipeline.
    Dummy {
        /// Pipeline identity; 0 is the null pipeline.
        id: u64,
    },
    /// Vulkan pipeline.
    #[cfg(feature = "vulkan-backend")]
    Vulkan(vulkan::VulkanPipeline),
}

impl GpuPipeline {
    /// Returns true for a null handle.
    pub fn is_null(&self) -> bool {
        match self {
            Self::Dummy { id } => *id == 0,
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan(pipeline) => pipeline.is_null(),
        }
    }
}

macro_rules! debug_handle {
    ($ty:ident, $name:literal) => {
        impl std::fmt::Debug for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    Self::Dummy { .. } => write!(f, concat!($name, "::Dummy")),
                    #[cfg(feature = "vulkan-backend")]
                    Self::Vulkan(_) => write!(f, concat!($name, "::Vulkan")),
                }
            }
        }
    };
}

debug_handle!(GpuQueue, "GpuQueue");
debug_handle!(GpuCommandAllocator, "GpuCommandAllocator");
debug_handle!(GpuRootSignature, "GpuRootSignature");
debug_handle!(GpuPipeline, "GpuPipeline");

impl std::fmt::Debug for GpuCommandList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy(list) => f
                .debug_struct("GpuCommandList::Dummy")
                .field("id", &list.id())
                .finish_non_exhaustive(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan(_) => write!(f, "GpuCommandList::Vulkan"),
        }
    }
}

impl std::fmt::Debug for GpuFence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy(fence) => f
                .debug_struct("GpuFence::Dummy")
                .field("completed", &fence.completed_value())
                .finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan(_) => write!(f, "GpuFence::Vulkan"),
        }
    }
}

impl std::fmt::Debug for GpuResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy { id, format, extent } => f
                .debug_struct("GpuResource::Dummy")
                .field("id", id)
                .field("format", format)
                .field("extent", extent)
                .finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan(image) => f
                .debug_struct("GpuResource::Vulkan")
                .field("format", &image.format())
                .field("extent", &image.extent())
                .finish_non_exhaustive(),
        }
    }
}

impl std::fmt::Debug for GpuDescriptorHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuDescriptorHeap")
            .field("heap_type", &self.heap_type)
            .field("capacity", &self.capacity)
            .field("cpu_start", &self.cpu_start)
            .field("gpu_start", &self.gpu_start)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for GpuSwapchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy(_) => write!(f, "GpuSwapchain::Dummy"),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan(_) => write!(f, "GpuSwapchain::Vulkan"),
        }
    }
}

// ============================================================================
// Commands
// ============================================================================

/// A single command recorded into a [`GpuCommandList`].
#[derive(Debug, Clone, Copy)]
pub enum GpuCommand<'a> {
    /// Transition a resource between usage states.
    Barrier {
        /// Resource being transitioned.
        resource: &'a GpuResource,
        /// Current state.
        before: ResourceState,
        /// New state.
        after: ResourceState,
    },
    /// Bind output targets.
    SetRenderTargets {
        /// Render-target view.
        color: CpuDescriptorHandle,
        /// Depth-stencil view.
        depth: Option<CpuDescriptorHandle>,
    },
    /// Clear a render-target view.
    ClearRenderTarget {
        /// View to clear.
        view: CpuDescriptorHandle,
        /// RGBA clear color.
        color: [f32; 4],
    },
    /// Clear a depth-stencil view.
    ClearDepthStencil {
        /// View to clear.
        view: CpuDescriptorHandle,
        /// Depth clear value.
        depth: f32,
        /// Stencil clear value.
        stencil: u8,
    },
    /// Bind the shader-visible descriptor heap.
    SetDescriptorHeap(&'a GpuDescriptorHeap),
    /// Set the viewport.
    SetViewport(Viewport),
    /// Set the scissor rectangle.
    SetScissor(ScissorRect),
    /// Bind a binding layout for subsequent draws.
    SetRootSignature(&'a GpuRootSignature),
    /// Bind a graphics pipeline for subsequent draws.
    SetPipeline(&'a GpuPipeline),
    /// Draw non-indexed primitives.
    Draw {
        /// Vertices per instance.
        vertex_count: u32,
        /// Number of instances.
        instance_count: u32,
        /// First vertex.
        first_vertex: u32,
        /// First instance.
        first_instance: u32,
    },
}

// ============================================================================
// Pipeline creation input
// ============================================================================

/// Native form of one input-layout element.
///
/// The semantic name borrows from storage owned by the pipeline build, which
/// must outlive every element that points into it.
#[derive(Debug, Clone, Copy)]
pub struct NativeInputElement<'a> {
    /// Semantic name.
    pub semantic_name: &'a CStr,
    /// Semantic index.
    pub semantic_index: u32,
    /// Attribute format.
    pub format: VertexFormat,
    /// Vertex buffer slot.
    pub input_slot: u32,
    /// Byte offset within the vertex.
    pub aligned_byte_offset: u32,
    /// Per-vertex or per-instance.
    pub classification: InputClassification,
    /// Instances per step for per-instance data.
    pub instance_step_rate: u32,
}

/// Compiled shader stage passed to pipeline creation.
#[derive(Debug, Clone, Copy)]
pub struct ShaderStageBytecode<'a> {
    /// SPIR-V words.
    pub bytecode: &'a [u32],
    /// Entry point name.
    pub entry_point: &'a str,
}

/// Everything the device needs to compile one graphics pipeline.
#[derive(Debug, Clone, Copy)]
pub struct GraphicsPipelineDesc<'a> {
    /// Debug label.
    pub label: &'a str,
    /// Binding layout the pipeline is compiled against.
    pub root_signature: &'a GpuRootSignature,
    /// Vertex stage.
    pub vertex_shader: ShaderStageBytecode<'a>,
    /// Pixel stage.
    pub pixel_shader: ShaderStageBytecode<'a>,
    /// Input layout.
    pub input_layout: &'a [NativeInputElement<'a>],
    /// Blend state.
    pub blend: BlendState,
    /// Rasterizer state.
    pub rasterizer: RasterizerState,
    /// Depth-stencil state.
    pub depth_stencil: DepthStencilState,
    /// Primitive topology.
    pub topology: PrimitiveTopology,
    /// Render-target formats.
    pub render_target_formats: &'a [TextureFormat],
    /// Depth-stencil format.
    pub depth_stencil_format: Option<TextureFormat>,
    /// Multisample count.
    pub sample_count: u32,
    /// Multisample coverage mask.
    pub sample_mask: u32,
}

// ============================================================================
// Traits
// ============================================================================

/// An API instance: enumerates adapters and creates devices.
pub trait GpuInstance: Send + Sync + 'static {
    /// Backend name.
    fn name(&self) -> &'static str;

    /// List every adapter the API exposes, in enumeration order.
    fn enumerate_adapters(&self) -> Result<Vec<AdapterInfo>, GraphicsError>;

    /// Create a logical device on `adapter` at exactly `level`.
    fn create_device(
        &self,
        adapter: &AdapterInfo,
        level: FeatureLevel,
    ) -> Result<Arc<dyn GpuDevice>, GraphicsError>;
}

/// A logical device.
///
/// Methods mirror an explicit graphics API: objects are created once, and the
/// caller is responsible for ordering CPU and GPU access with fences.
pub trait GpuDevice: Send + Sync + 'static {
    /// Backend name.
    fn name(&self) -> &'static str;

    // --- Submission -------------------------------------------------------

    /// Create the direct (graphics) queue.
    fn create_queue(&self) -> Result<GpuQueue, GraphicsError>;

    /// Create a command allocator.
    fn create_command_allocator(&self) -> Result<GpuCommandAllocator, GraphicsError>;

    /// Create a command list, open for recording against `allocator`.
    fn create_command_list(
        &self,
        allocator: &GpuCommandAllocator,
    ) -> Result<GpuCommandList, GraphicsError>;

    /// Reclaim an allocator's memory. The GPU must be done with it.
    fn reset_command_allocator(&self, allocator: &GpuCommandAllocator)
    -> Result<(), GraphicsError>;

    /// Reopen a closed list against `allocator`.
    fn reset_command_list(
        &self,
        list: &mut GpuCommandList,
        allocator: &GpuCommandAllocator,
    ) -> Result<(), GraphicsError>;

    /// Record one command.
    fn encode(&self, list: &mut GpuCommandList, command: GpuCommand<'_>);

    /// Finish recording.
    fn close_command_list(&self, list: &mut GpuCommandList) -> Result<(), GraphicsError>;

    /// Submit a closed list.
    fn execute_command_list(
        &self,
        queue: &GpuQueue,
        list: &GpuCommandList,
    ) -> Result<(), GraphicsError>;

    // --- Synchronization --------------------------------------------------

    /// Create a fence with the given initial value.
    fn create_fence(&self, initial_value: u64) -> Result<GpuFence, GraphicsError>;

    /// Ask the queue to write `value` into the fence once prior work finishes.
    fn signal_fence(
        &self,
        queue: &GpuQueue,
        fence: &GpuFence,
        value: u64,
    ) -> Result<(), GraphicsError>;

    /// Last value the GPU wrote into the fence.
    fn fence_completed_value(&self, fence: &GpuFence) -> u64;

    /// Block the calling thread until the fence reaches `value`.
    fn wait_fence(&self, fence: &GpuFence, value: u64) -> Result<(), GraphicsError>;

    /// Block until all submitted work has finished.
    fn wait_idle(&self) -> Result<(), GraphicsError>;

    // --- Descriptors ------------------------------------------------------

    /// Create a descriptor heap.
    fn create_descriptor_heap(
        &self,
        heap_type: DescriptorHeapType,
        capacity: u32,
    ) -> Result<GpuDescriptorHeap, GraphicsError>;

    /// Write a render-target view of `resource` into `dest`.
    fn create_render_target_view(
        &self,
        resource: &GpuResource,
        format: TextureFormat,
        dest: CpuDescriptorHandle,
    ) -> Result<(), GraphicsError>;

    /// Write a depth-stencil view of `resource` into `dest`.
    fn create_depth_stencil_view(
        &self,
        resource: &GpuResource,
        format: TextureFormat,
        dest: CpuDescriptorHandle,
    ) -> Result<(), GraphicsError>;

    // --- Resources --------------------------------------------------------

    /// Create a depth-stencil texture in [`ResourceState::DepthWrite`].
    fn create_depth_texture(
        &self,
        descriptor: &TextureDescriptor,
    ) -> Result<GpuResource, GraphicsError>;

    // --- Presentation -----------------------------------------------------

    /// Create a swapchain for a window. Back buffers start in
    /// [`ResourceState::Present`].
    fn create_swapchain(
        &self,
        queue: &GpuQueue,
        surface: &SurfaceHandle,
        descriptor: &SwapchainDescriptor,
    ) -> Result<GpuSwapchain, GraphicsError>;

    /// Back buffer `index` of a swapchain.
    fn swapchain_buffer(
        &self,
        swapchain: &GpuSwapchain,
        index: u32,
    ) -> Result<GpuResource, GraphicsError>;

    /// Index of the back buffer that is writable this frame.
    fn current_back_buffer_index(&self, swapchain: &GpuSwapchain) -> u32;

    /// Present the current back buffer.
    fn present(
        &self,
        queue: &GpuQueue,
        swapchain: &mut GpuSwapchain,
        sync_interval: u32,
    ) -> Result<(), GraphicsError>;

    // --- Pipelines --------------------------------------------------------

    /// Create a binding layout from a serialized description.
    fn create_root_signature(
        &self,
        desc: &RootSignatureDesc,
    ) -> Result<GpuRootSignature, GraphicsError>;

    /// Compile a graphics pipeline.
    fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDesc<'_>,
    ) -> Result<GpuPipeline, GraphicsError>;
}

static_assertions::assert_impl_all!(GpuResource: Send, Sync, Clone);
static_assertions::assert_impl_all!(GpuPipeline: Send, Sync);
static_assertions::assert_impl_all!(GpuRootSignature: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_offset() {
        let base = CpuDescriptorHandle(1000);
        assert_eq!(base.offset(3, 32), CpuDescriptorHandle(1096));
        let gpu = GpuDescriptorHandle(0);
        assert_eq!(gpu.offset(2, 8), GpuDescriptorHandle(16));
    }

    #[test]
    fn test_null_handles() {
        assert!(GpuPipeline::Dummy { id: 0 }.is_null());
        assert!(!GpuPipeline::Dummy { id: 4 }.is_null());
        assert!(GpuRootSignature::Dummy { id: 0 }.is_null());
    }
}
