//! Vulkan surface and swapchain.
//!
//! Image acquisition is folded into presentation: the first image is
//! acquired when the swapchain is created and each `present` acquires the
//! next one. The acquire semaphore is parked in the device's pending waits
//! and consumed by the next queue submission.

use std::sync::Arc;

use ash::vk;

use crate::error::GraphicsError;
use crate::swapchain::{SurfaceHandle, SwapchainDescriptor};
use crate::types::{Extent2d, TextureFormat};

use super::{VulkanImage, VulkanShared, allocator, vk_error};

/// Vulkan swapchain resources.
pub struct VulkanSwapchain {
    shared: Arc<VulkanShared>,
    surface: vk::SurfaceKHR,
    swapchain: vk::SwapchainKHR,
    images: Vec<Arc<VulkanImage>>,
    current_image_index: u32,
    /// Ring of acquire semaphores, one more than there are images.
    image_available: Vec<vk::Semaphore>,
    next_acquire: usize,
    /// Signaled when rendering to the image at the same index is done.
    render_finished: Vec<vk::Semaphore>,
}

impl VulkanSwapchain {
    /// Create a surface for `handle` and a swapchain on it.
    pub(crate) fn new(
        shared: &Arc<VulkanShared>,
        handle: &SurfaceHandle,
        descriptor: &SwapchainDescriptor,
    ) -> Result<Self, GraphicsError> {
        let instance = &shared.instance;
        if !instance.surface_support {
            return Err(GraphicsError::InitializationFailed(
                "instance was created without a display handle".into(),
            ));
        }

        let surface = unsafe {
            ash_window::create_surface(
                &instance.entry,
                &instance.instance,
                handle.display(),
                handle.window(),
                None,
            )
        }
        .map_err(|e| {
            GraphicsError::ResourceCreationFailed(format!("failed to create surface: {e:?}"))
        })?;

        let mut swapchain = Self {
            shared: shared.clone(),
            surface,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            current_image_index: 0,
            image_available: Vec::new(),
            next_acquire: 0,
            render_finished: Vec::new(),
        };
        // On error, Drop releases whatever was created so far.
        swapchain.create(descriptor)?;
        swapchain.acquire()?;
        Ok(swapchain)
    }

    fn create(&mut self, descriptor: &SwapchainDescriptor) -> Result<(), GraphicsError> {
        let shared = &self.shared;
        let surface_loader = &shared.instance.surface_loader;
        let supported = unsafe {
            surface_loader.get_physical_device_surface_support(
                shared.physical_device,
                shared.queue_family,
                self.surface,
            )
        }
        .map_err(vk_error("failed to query surface support"))?;
        if !supported {
            return Err(GraphicsError::FeatureNotSupported(
                "graphics queue cannot present to this surface".into(),
            ));
        }

        let capabilities = unsafe {
            surface_loader
                .get_physical_device_surface_capabilities(shared.physical_device, self.surface)
        }
        .map_err(vk_error("failed to query surface capabilities"))?;
        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(shared.physical_device, self.surface)
        }
        .map_err(vk_error("failed to query surface formats"))?;

        let surface_format = choose_surface_format(&formats, descriptor).ok_or_else(|| {
            GraphicsError::FeatureNotSupported(format!(
                "surface supports neither {:?} nor {:?}",
                descriptor.format, descriptor.view_format
            ))
        })?;
        // Views and pipelines use the swapchain's own format.
        shared.override_format(descriptor.format, surface_format.format);
        shared.override_format(descriptor.view_format, surface_format.format);

        let extent = if capabilities.current_extent.width != u32::MAX {
            capabilities.current_extent
        } else {
            vk::Extent2D {
                width: descriptor.extent.width.clamp(
                    capabilities.min_image_extent.width,
                    capabilities.max_image_extent.width,
                ),
                height: descriptor.extent.height.clamp(
                    capabilities.min_image_extent.height,
                    capabilities.max_image_extent.height,
                ),
            }
        };
        if extent.width != descriptor.extent.width || extent.height != descriptor.extent.height {
            log::warn!(
                "Surface is {}x{}, requested {}x{}",
                extent.width,
                extent.height,
                descriptor.extent.width,
                descriptor.extent.height
            );
        }

        let max_images = if capabilities.max_image_count > 0 {
            capabilities.max_image_count
        } else {
            u32::MAX
        };
        let image_count = descriptor
            .buffer_count
            .clamp(capabilities.min_image_count, max_images);
        if image_count != descriptor.buffer_count {
            return Err(GraphicsError::FeatureNotSupported(format!(
                "surface needs between {} and {max_images} back buffers, requested {}",
                capabilities.min_image_count, descriptor.buffer_count
            )));
        }

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            // FIFO is the only mode every driver offers.
            .present_mode(vk::PresentModeKHR::FIFO)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        self.swapchain = unsafe { shared.swapchain_loader.create_swapchain(&create_info, None) }
            .map_err(vk_error("failed to create swapchain"))?;

        let images = unsafe { shared.swapchain_loader.get_swapchain_images(self.swapchain) }
            .map_err(vk_error("failed to get swapchain images"))?;
        if images.len() != descriptor.buffer_count as usize {
            return Err(GraphicsError::ResourceCreationFailed(format!(
                "driver created {} back buffers, requested {}",
                images.len(),
                descriptor.buffer_count
            )));
        }

        let size = Extent2d::new(extent.width, extent.height);
        self.images = images
            .into_iter()
            .map(|image| {
                Arc::new(allocator::wrap_swapchain_image(
                    shared,
                    image,
                    surface_format.format,
                    descriptor.format,
                    size,
                ))
            })
            .collect();

        for _ in 0..=self.images.len() {
            let semaphore = create_semaphore(shared)?;
            self.image_available.push(semaphore);
        }
        for _ in 0..self.images.len() {
            let semaphore = create_semaphore(shared)?;
            self.render_finished.push(semaphore);
        }

        log::info!(
            "Created Vulkan swapchain: {}x{}, {} images, {:?}",
            extent.width,
            extent.height,
            self.images.len(),
            surface_format.format
        );
        Ok(())
    }

    /// Acquire the next image and queue its semaphore for the next submit.
    fn acquire(&mut self) -> Result<(), GraphicsError> {
        let semaphore = self.image_available[self.next_acquire];
        let (index, suboptimal) = unsafe {
            self.shared.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        }
        .map_err(vk_error("failed to acquire swapchain image"))?;
        if suboptimal {
            log::trace!("Swapchain is suboptimal for the surface");
        }

        self.next_acquire = (self.next_acquire + 1) % self.image_available.len();
        self.current_image_index = index;
        self.shared.pending_waits.lock().push(semaphore);
        Ok(())
    }

    /// Back buffer `index`.
    pub(crate) fn image(&self, index: u32) -> Result<Arc<VulkanImage>, GraphicsError> {
        self.images.get(index as usize).cloned().ok_or_else(|| {
            GraphicsError::InvalidParameter(format!(
                "back buffer {index} out of range (count {})",
                self.images.len()
            ))
        })
    }

    /// Index of the back buffer the next frame renders into.
    pub(crate) fn current_index(&self) -> u32 {
        self.current_image_index
    }

    /// Present the current image and acquire the next one.
    ///
    /// The present mode is fixed at creation, so `sync_interval` only
    /// distinguishes tearing-allowed requests in the log.
    pub(crate) fn present(&mut self, sync_interval: u32) -> Result<(), GraphicsError> {
        crate::profile_scope!("vulkan_present");
        if sync_interval == 0 {
            log::trace!("Vulkan presents with FIFO regardless of sync interval 0");
        }

        let index = self.current_image_index;
        let render_finished = [self.render_finished[index as usize]];

        // Bridge from the last submission to the present: wait on an
        // acquire nobody consumed and signal this image's semaphore.
        let waits: Vec<vk::Semaphore> = std::mem::take(&mut *self.shared.pending_waits.lock());
        let wait_stages = vec![vk::PipelineStageFlags::ALL_COMMANDS; waits.len()];
        let submit = vk::SubmitInfo::default()
            .wait_semaphores(&waits)
            .wait_dst_stage_mask(&wait_stages)
            .signal_semaphores(&render_finished);

        let swapchains = [self.swapchain];
        let indices = [index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&render_finished)
            .swapchains(&swapchains)
            .image_indices(&indices);

        {
            let queue = self.shared.queue.lock();
            unsafe {
                self.shared
                    .device
                    .queue_submit(*queue, &[submit], vk::Fence::null())
            }
            .map_err(vk_error("failed to submit present bridge"))?;

            let suboptimal = unsafe {
                self.shared
                    .swapchain_loader
                    .queue_present(*queue, &present_info)
            }
            .map_err(vk_error("failed to present"))?;
            if suboptimal {
                log::trace!("Swapchain is suboptimal for the surface");
            }
        }

        self.acquire()
    }
}

impl Drop for VulkanSwapchain {
    fn drop(&mut self) {
        let shared = &self.shared;
        unsafe {
            let queue = shared.queue.lock();
            let _ = shared.device.queue_wait_idle(*queue);
        }
        shared
            .pending_waits
            .lock()
            .retain(|semaphore| !self.image_available.contains(semaphore));
        self.images.clear();

        unsafe {
            for &semaphore in self.image_available.iter().chain(&self.render_finished) {
                shared.device.destroy_semaphore(semaphore, None);
            }
            if self.swapchain != vk::SwapchainKHR::null() {
                shared
                    .swapchain_loader
                    .destroy_swapchain(self.swapchain, None);
            }
            shared
                .instance
                .surface_loader
                .destroy_surface(self.surface, None);
        }
        log::debug!("Vulkan swapchain destroyed");
    }
}

fn create_semaphore(shared: &VulkanShared) -> Result<vk::Semaphore, GraphicsError> {
    unsafe {
        shared
            .device
            .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
    }
    .map_err(vk_error("failed to create semaphore"))
}

/// Swap the channel order of an 8-bit color format.
fn swizzled(format: TextureFormat) -> TextureFormat {
    match format {
        TextureFormat::Rgba8Unorm => TextureFormat::Bgra8Unorm,
        TextureFormat::Rgba8UnormSrgb => TextureFormat::Bgra8UnormSrgb,
        TextureFormat::Bgra8Unorm => TextureFormat::Rgba8Unorm,
        TextureFormat::Bgra8UnormSrgb => TextureFormat::Rgba8UnormSrgb,
        other => other,
    }
}

/// Pick the surface format closest to what the frontend asked for.
///
/// The view format wins because views cannot reinterpret swapchain images;
/// after that the storage format, each in both channel orders.
fn choose_surface_format(
    available: &[vk::SurfaceFormatKHR],
    descriptor: &SwapchainDescriptor,
) -> Option<vk::SurfaceFormatKHR> {
    let candidates = [
        descriptor.view_format,
        swizzled(descriptor.view_format),
        descriptor.format,
        swizzled(descriptor.format),
    ];
    candidates.iter().find_map(|&candidate| {
        let native = super::conversion::convert_texture_format(candidate);
        available.iter().find(|f| f.format == native).copied()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface_format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    fn descriptor() -> SwapchainDescriptor {
        SwapchainDescriptor {
            extent: Extent2d::new(800, 600),
            buffer_count: 2,
            format: TextureFormat::Rgba8Unorm,
            view_format: TextureFormat::Rgba8UnormSrgb,
        }
    }

    #[test]
    fn test_prefers_view_format() {
        let available = [
            surface_format(vk::Format::R8G8B8A8_UNORM),
            surface_format(vk::Format::R8G8B8A8_SRGB),
        ];
        let chosen = choose_surface_format(&available, &descriptor());
        assert_eq!(chosen.map(|f| f.format), Some(vk::Format::R8G8B8A8_SRGB));
    }

    #[test]
    fn test_falls_back_to_bgra() {
        let available = [
            surface_format(vk::Format::B8G8R8A8_UNORM),
            surface_format(vk::Format::B8G8R8A8_SRGB),
        ];
        let chosen = choose_surface_format(&available, &descriptor());
        assert_eq!(chosen.map(|f| f.format), Some(vk::Format::B8G8R8A8_SRGB));
    }

    #[test]
    fn test_no_match() {
        let available = [surface_format(vk::Format::R16G16B16A16_SFLOAT)];
        assert!(choose_surface_format(&available, &descriptor()).is_none());
    }
}
