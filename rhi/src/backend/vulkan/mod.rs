//! Native Vulkan backend implementation using ash.
//!
//! The explicit-API model the frontend expects maps onto Vulkan like this:
//!
//! | Frontend concept        | Vulkan object                                    |
//! |-------------------------|--------------------------------------------------|
//! | command allocator       | `VkCommandPool` with one primary command buffer  |
//! | command list            | the pool's command buffer, re-begun on reset     |
//! | fence                   | timeline semaphore                               |
//! | render-target binding   | dynamic rendering, begun lazily on first draw    |
//! | CPU descriptor handle   | key into the device's image view table           |
//! | binding layout          | `VkPipelineLayout`, one descriptor set per slot  |
//! | resource barrier        | image memory barrier with tracked layouts        |
//!
//! Every object keeps an `Arc<VulkanShared>` so the logical device outlives
//! all of them. Validation layer output is routed through [`log`] by the
//! debug messenger installed on the instance.

mod allocator;
mod command;
mod conversion;
mod debug;
mod device;
mod instance;
mod layout;
mod pipeline;
mod swapchain;
mod sync;

use std::collections::HashMap;
use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::Allocator;
use parking_lot::Mutex;

use crate::error::GraphicsError;
use crate::instance::FeatureLevel;
use crate::root_signature::RootSignatureDesc;
use crate::swapchain::{SurfaceHandle, SwapchainDescriptor};
use crate::types::{DescriptorHeapType, TextureDescriptor, TextureFormat};

use super::{
    CpuDescriptorHandle, GpuCommand, GpuCommandAllocator, GpuCommandList, GpuDescriptorHandle,
    GpuDescriptorHeap, GpuDevice, GpuFence, GpuPipeline, GpuQueue, GpuResource, GpuRootSignature,
    GpuSwapchain, GraphicsPipelineDesc, RawDescriptorHeap,
};

pub use command::{VulkanCommandList, VulkanCommandPool};
pub use instance::VulkanInstance;
pub use pipeline::{VulkanPipeline, VulkanPipelineLayout};
pub use swapchain::VulkanSwapchain;
pub use sync::VulkanTimeline;

use self::instance::InstanceShared;

// ============================================================================
// Shared device state
// ============================================================================

/// Image view written into a descriptor handle.
pub(crate) struct ViewEntry {
    pub(crate) image: Arc<VulkanImage>,
    pub(crate) view: vk::ImageView,
}

/// Logical device state shared by every object created from it.
pub(crate) struct VulkanShared {
    pub(crate) instance: Arc<InstanceShared>,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) device: ash::Device,
    pub(crate) queue_family: u32,
    pub(crate) queue: Mutex<vk::Queue>,
    pub(crate) allocator: Mutex<Option<Allocator>>,
    pub(crate) swapchain_loader: ash::khr::swapchain::Device,
    pub(crate) dynamic_rendering: ash::khr::dynamic_rendering::Device,
    pub(crate) feature_level: FeatureLevel,
    /// Views keyed by CPU descriptor handle.
    pub(crate) views: Mutex<HashMap<CpuDescriptorHandle, ViewEntry>>,
    /// Frontend formats substituted with a different native format.
    pub(crate) format_overrides: Mutex<HashMap<TextureFormat, vk::Format>>,
    /// Acquire semaphores the next queue submission must wait on.
    pub(crate) pending_waits: Mutex<Vec<vk::Semaphore>>,
    next_heap_id: Mutex<u64>,
}

impl VulkanShared {
    /// Native format for a frontend format, honoring overrides.
    pub(crate) fn native_format(&self, format: TextureFormat) -> vk::Format {
        self.format_overrides
            .lock()
            .get(&format)
            .copied()
            .unwrap_or_else(|| conversion::convert_texture_format(format))
    }

    /// Record that `format` is backed by `native` on this device.
    pub(crate) fn override_format(&self, format: TextureFormat, native: vk::Format) {
        if native != conversion::convert_texture_format(format) {
            log::info!("Vulkan: {format:?} is backed by {native:?} on this device");
        }
        self.format_overrides.lock().insert(format, native);
    }

    fn allocate_heap_id(&self) -> u64 {
        let mut next = self.next_heap_id.lock();
        *next += 1;
        *next
    }

    /// Image view stored at `handle`.
    pub(crate) fn view(
        &self,
        handle: CpuDescriptorHandle,
    ) -> Option<(Arc<VulkanImage>, vk::ImageView)> {
        self.views
            .lock()
            .get(&handle)
            .map(|entry| (entry.image.clone(), entry.view))
    }

    fn store_view(&self, handle: CpuDescriptorHandle, entry: ViewEntry) {
        if let Some(old) = self.views.lock().insert(handle, entry) {
            // SAFETY: descriptor slots are only rewritten once the GPU is done
            // with the previous view.
            unsafe { self.device.destroy_image_view(old.view, None) };
        }
    }
}

impl Drop for VulkanShared {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            for (_, entry) in self.views.get_mut().drain() {
                self.device.destroy_image_view(entry.view, None);
            }
        }
        // The allocator must go before the device it allocates from.
        drop(self.allocator.lock().take());
        unsafe { self.device.destroy_device(None) };
        log::debug!("Vulkan device destroyed");
    }
}

// ============================================================================
// Handle types
// ============================================================================

/// Submission queue handle.
///
/// The queue itself lives in [`VulkanShared`]; the handle keeps the device
/// alive for as long as the frontend holds it.
pub struct VulkanQueue {
    #[allow(dead_code)]
    shared: Arc<VulkanShared>,
}

/// A Vulkan image: a back buffer or an allocated depth target.
pub struct VulkanImage {
    shared: Arc<VulkanShared>,
    pub(crate) image: vk::Image,
    pub(crate) native_format: vk::Format,
    format: TextureFormat,
    extent: crate::types::Extent2d,
    pub(crate) aspect: vk::ImageAspectFlags,
    /// Layout as of the last recorded command.
    pub(crate) layout: layout::ImageLayoutState,
    allocation: Mutex<Option<gpu_allocator::vulkan::Allocation>>,
    owned: bool,
}

impl VulkanImage {
    /// Frontend format of the image.
    pub fn format(&self) -> TextureFormat {
        self.format
    }

    /// Size in pixels.
    pub fn extent(&self) -> crate::types::Extent2d {
        self.extent
    }
}

impl Drop for VulkanImage {
    fn drop(&mut self) {
        if !self.owned {
            return;
        }
        unsafe { self.shared.device.destroy_image(self.image, None) };
        if let Some(allocation) = self.allocation.get_mut().take()
            && let Some(allocator) = self.shared.allocator.lock().as_mut()
            && let Err(e) = allocator.free(allocation)
        {
            log::error!("Failed to free image memory: {e}");
        }
    }
}

/// Descriptor heap backing object.
///
/// Render-target and depth-stencil heaps are pure view tables. The
/// shader-visible heap also owns a descriptor pool sized to its capacity.
pub struct VulkanDescriptorHeap {
    shared: Arc<VulkanShared>,
    id: u64,
    pool: vk::DescriptorPool,
}

impl Drop for VulkanDescriptorHeap {
    fn drop(&mut self) {
        let id = self.id;
        let mut views = self.shared.views.lock();
        let owned: Vec<_> = views
            .keys()
            .filter(|handle| handle.0 >> HEAP_ID_SHIFT == id)
            .copied()
            .collect();
        for handle in owned {
            if let Some(entry) = views.remove(&handle) {
                unsafe { self.shared.device.destroy_image_view(entry.view, None) };
            }
        }
        drop(views);
        if self.pool != vk::DescriptorPool::null() {
            unsafe {
                self.shared
                    .device
                    .destroy_descriptor_pool(self.pool, None)
            };
        }
    }
}

/// Heap identity lives in the upper half of a CPU descriptor handle.
const HEAP_ID_SHIFT: u32 = 32;

// ============================================================================
// Device
// ============================================================================

/// Vulkan logical device.
pub struct VulkanDevice {
    shared: Arc<VulkanShared>,
}

impl std::fmt::Debug for VulkanDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanDevice")
            .field("queue_family", &self.shared.queue_family)
            .field("feature_level", &self.shared.feature_level)
            .finish_non_exhaustive()
    }
}

fn vk_error(what: &str) -> impl FnOnce(vk::Result) -> GraphicsError + '_ {
    move |e| match e {
        vk::Result::ERROR_DEVICE_LOST => GraphicsError::DeviceLost,
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
            GraphicsError::OutOfMemory
        }
        vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::ERROR_SURFACE_LOST_KHR => {
            GraphicsError::SurfaceOutdated
        }
        other => GraphicsError::Internal(format!("{what}: {other:?}")),
    }
}

fn wrong_backend(what: &str) -> GraphicsError {
    GraphicsError::InvalidParameter(format!("{what} was not created by the Vulkan backend"))
}

#[allow(unreachable_patterns)]
impl GpuDevice for VulkanDevice {
    fn name(&self) -> &'static str {
        "Vulkan"
    }

    fn create_queue(&self) -> Result<GpuQueue, GraphicsError> {
        Ok(GpuQueue::Vulkan(VulkanQueue {
            shared: self.shared.clone(),
        }))
    }

    fn create_command_allocator(&self) -> Result<GpuCommandAllocator, GraphicsError> {
        Ok(GpuCommandAllocator::Vulkan(VulkanCommandPool::new(
            &self.shared,
        )?))
    }

    fn create_command_list(
        &self,
        allocator: &GpuCommandAllocator,
    ) -> Result<GpuCommandList, GraphicsError> {
        let GpuCommandAllocator::Vulkan(pool) = allocator else {
            return Err(wrong_backend("command allocator"));
        };
        Ok(GpuCommandList::Vulkan(VulkanCommandList::begin(
            &self.shared,
            pool,
        )?))
    }

    fn reset_command_allocator(
        &self,
        allocator: &GpuCommandAllocator,
    ) -> Result<(), GraphicsError> {
        let GpuCommandAllocator::Vulkan(pool) = allocator else {
            return Err(wrong_backend("command allocator"));
        };
        pool.reset()
    }

    fn reset_command_list(
        &self,
        list: &mut GpuCommandList,
        allocator: &GpuCommandAllocator,
    ) -> Result<(), GraphicsError> {
        let (GpuCommandList::Vulkan(list), GpuCommandAllocator::Vulkan(pool)) = (list, allocator)
        else {
            return Err(wrong_backend("command list"));
        };
        list.reset(pool)
    }

    fn encode(&self, list: &mut GpuCommandList, command: GpuCommand<'_>) {
        match list {
            GpuCommandList::Vulkan(list) => list.encode(command),
            _ => log::error!("Vulkan device asked to encode into a foreign command list"),
        }
    }

    fn close_command_list(&self, list: &mut GpuCommandList) -> Result<(), GraphicsError> {
        let GpuCommandList::Vulkan(list) = list else {
            return Err(wrong_backend("command list"));
        };
        list.close()
    }

    fn execute_command_list(
        &self,
        _queue: &GpuQueue,
        list: &GpuCommandList,
    ) -> Result<(), GraphicsError> {
        let GpuCommandList::Vulkan(list) = list else {
            return Err(wrong_backend("command list"));
        };
        list.submit()
    }

    fn create_fence(&self, initial_value: u64) -> Result<GpuFence, GraphicsError> {
        Ok(GpuFence::Vulkan(VulkanTimeline::new(
            &self.shared,
            initial_value,
        )?))
    }

    fn signal_fence(
        &self,
        _queue: &GpuQueue,
        fence: &GpuFence,
        value: u64,
    ) -> Result<(), GraphicsError> {
        let GpuFence::Vulkan(timeline) = fence else {
            return Err(wrong_backend("fence"));
        };
        timeline.signal(value)
    }

    fn fence_completed_value(&self, fence: &GpuFence) -> u64 {
        match fence {
            GpuFence::Vulkan(timeline) => timeline.completed_value(),
            _ => 0,
        }
    }

    fn wait_fence(&self, fence: &GpuFence, value: u64) -> Result<(), GraphicsError> {
        let GpuFence::Vulkan(timeline) = fence else {
            return Err(wrong_backend("fence"));
        };
        timeline.wait(value)
    }

    fn wait_idle(&self) -> Result<(), GraphicsError> {
        unsafe { self.shared.device.device_wait_idle() }.map_err(vk_error("device wait idle"))
    }

    fn create_descriptor_heap(
        &self,
        heap_type: DescriptorHeapType,
        capacity: u32,
    ) -> Result<GpuDescriptorHeap, GraphicsError> {
        let id = self.shared.allocate_heap_id();
        let pool = if heap_type.is_shader_visible() {
            pipeline::create_shader_visible_pool(&self.shared, capacity)?
        } else {
            vk::DescriptorPool::null()
        };
        let base = id << HEAP_ID_SHIFT;

        log::debug!("Vulkan: created {heap_type:?} heap {id} with {capacity} descriptors");

        Ok(GpuDescriptorHeap {
            heap_type,
            capacity,
            increment: 1,
            cpu_start: CpuDescriptorHandle(base),
            gpu_start: heap_type
                .is_shader_visible()
                .then_some(GpuDescriptorHandle(base)),
            raw: RawDescriptorHeap::Vulkan(VulkanDescriptorHeap {
                shared: self.shared.clone(),
                id,
                pool,
            }),
        })
    }

    fn create_render_target_view(
        &self,
        resource: &GpuResource,
        format: TextureFormat,
        dest: CpuDescriptorHandle,
    ) -> Result<(), GraphicsError> {
        let GpuResource::Vulkan(image) = resource else {
            return Err(wrong_backend("resource"));
        };
        if format.is_depth_stencil() {
            return Err(GraphicsError::InvalidParameter(format!(
                "{format:?} cannot be used for a render-target view"
            )));
        }
        let view =
            allocator::create_image_view(&self.shared, image, self.shared.native_format(format))?;
        self.shared.store_view(
            dest,
            ViewEntry {
                image: image.clone(),
                view,
            },
        );
        Ok(())
    }

    fn create_depth_stencil_view(
        &self,
        resource: &GpuResource,
        format: TextureFormat,
        dest: CpuDescriptorHandle,
    ) -> Result<(), GraphicsError> {
        let GpuResource::Vulkan(image) = resource else {
            return Err(wrong_backend("resource"));
        };
        if !format.is_depth_stencil() {
            return Err(GraphicsError::InvalidParameter(format!(
                "{format:?} cannot be used for a depth-stencil view"
            )));
        }
        let view = allocator::create_image_view(&self.shared, image, image.native_format)?;
        self.shared.store_view(
            dest,
            ViewEntry {
                image: image.clone(),
                view,
            },
        );
        Ok(())
    }

    fn create_depth_texture(
        &self,
        descriptor: &TextureDescriptor,
    ) -> Result<GpuResource, GraphicsError> {
        allocator::create_depth_image(&self.shared, descriptor)
            .map(|image| GpuResource::Vulkan(Arc::new(image)))
    }

    fn create_swapchain(
        &self,
        _queue: &GpuQueue,
        surface: &SurfaceHandle,
        descriptor: &SwapchainDescriptor,
    ) -> Result<GpuSwapchain, GraphicsError> {
        Ok(GpuSwapchain::Vulkan(VulkanSwapchain::new(
            &self.shared,
            surface,
            descriptor,
        )?))
    }

    fn swapchain_buffer(
        &self,
        swapchain: &GpuSwapchain,
        index: u32,
    ) -> Result<GpuResource, GraphicsError> {
        let GpuSwapchain::Vulkan(swapchain) = swapchain else {
            return Err(wrong_backend("swapchain"));
        };
        swapchain.image(index).map(GpuResource::Vulkan)
    }

    fn current_back_buffer_index(&self, swapchain: &GpuSwapchain) -> u32 {
        match swapchain {
            GpuSwapchain::Vulkan(swapchain) => swapchain.current_index(),
            _ => 0,
        }
    }

    fn present(
        &self,
        _queue: &GpuQueue,
        swapchain: &mut GpuSwapchain,
        sync_interval: u32,
    ) -> Result<(), GraphicsError> {
        let GpuSwapchain::Vulkan(swapchain) = swapchain else {
            return Err(wrong_backend("swapchain"));
        };
        swapchain.present(sync_interval)
    }

    fn create_root_signature(
        &self,
        desc: &RootSignatureDesc,
    ) -> Result<GpuRootSignature, GraphicsError> {
        Ok(GpuRootSignature::Vulkan(VulkanPipelineLayout::new(
            &self.shared,
            desc,
        )?))
    }

    fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDesc<'_>,
    ) -> Result<GpuPipeline, GraphicsError> {
        let GpuRootSignature::Vulkan(layout) = desc.root_signature else {
            return Err(wrong_backend("binding layout"));
        };
        Ok(GpuPipeline::Vulkan(VulkanPipeline::new(
            &self.shared,
            layout,
            desc,
        )?))
    }
}
