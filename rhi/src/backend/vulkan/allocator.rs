//! GPU memory and image creation using gpu-allocator.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc};
use parking_lot::Mutex;

use crate::error::GraphicsError;
use crate::types::{TextureDescriptor, TextureFormat};

use super::layout::ImageLayoutState;
use super::{VulkanImage, VulkanShared, conversion, vk_error};

/// Create a memory allocator for the Vulkan device.
pub(crate) fn create_allocator(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: &ash::Device,
) -> Result<Allocator, GraphicsError> {
    Allocator::new(&AllocatorCreateDesc {
        instance: instance.clone(),
        device: device.clone(),
        physical_device,
        debug_settings: Default::default(),
        buffer_device_address: false,
        allocation_sizes: gpu_allocator::AllocationSizes::default(),
    })
    .map_err(|e| {
        GraphicsError::DeviceCreationFailed(format!("failed to create memory allocator: {e}"))
    })
}

/// Aspect mask covering every plane of `format`.
pub(crate) fn aspect_of(format: TextureFormat) -> vk::ImageAspectFlags {
    if format.has_stencil() {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else if format.is_depth_stencil() {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

/// Create a 2D view of `image` interpreted as `format`.
pub(crate) fn create_image_view(
    shared: &VulkanShared,
    image: &VulkanImage,
    format: vk::Format,
) -> Result<vk::ImageView, GraphicsError> {
    let create_info = vk::ImageViewCreateInfo::default()
        .image(image.image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(image.aspect)
                .base_mip_level(0)
                .level_count(1)
                .base_array_layer(0)
                .layer_count(1),
        );

    unsafe { shared.device.create_image_view(&create_info, None) }
        .map_err(vk_error("failed to create image view"))
}

fn supports_depth_attachment(shared: &VulkanShared, format: vk::Format) -> bool {
    let properties = unsafe {
        shared
            .instance
            .instance
            .get_physical_device_format_properties(shared.physical_device, format)
    };
    properties
        .optimal_tiling_features
        .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
}

/// Pick the native depth format, substituting where the device lacks one.
fn resolve_depth_format(
    shared: &VulkanShared,
    format: TextureFormat,
) -> Result<vk::Format, GraphicsError> {
    let preferred = conversion::convert_texture_format(format);
    if supports_depth_attachment(shared, preferred) {
        return Ok(preferred);
    }
    // Some vendors never expose D24S8.
    let fallback = match format {
        TextureFormat::Depth24UnormStencil8 => vk::Format::D32_SFLOAT_S8_UINT,
        _ => preferred,
    };
    if fallback != preferred && supports_depth_attachment(shared, fallback) {
        shared.override_format(format, fallback);
        return Ok(fallback);
    }
    Err(GraphicsError::FeatureNotSupported(format!(
        "{format:?} depth attachments"
    )))
}

/// Create and bind device-local memory for a depth-stencil image.
pub(crate) fn create_depth_image(
    shared: &Arc<VulkanShared>,
    descriptor: &TextureDescriptor,
) -> Result<VulkanImage, GraphicsError> {
    let format = descriptor.format;
    if !format.is_depth_stencil() {
        return Err(GraphicsError::InvalidParameter(format!(
            "{format:?} is not a depth format"
        )));
    }
    let native_format = resolve_depth_format(shared, format)?;

    let create_info = vk::ImageCreateInfo::default()
        .image_type(vk::ImageType::TYPE_2D)
        .format(native_format)
        .extent(vk::Extent3D {
            width: descriptor.size.width,
            height: descriptor.size.height,
            depth: 1,
        })
        .mip_levels(1)
        .array_layers(1)
        .samples(conversion::convert_sample_count(descriptor.sample_count))
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(vk::ImageLayout::UNDEFINED);

    let image = unsafe { shared.device.create_image(&create_info, None) }
        .map_err(vk_error("failed to create depth image"))?;
    let requirements = unsafe { shared.device.get_image_memory_requirements(image) };

    let name = descriptor.label.as_deref().unwrap_or("depth");
    let allocation = {
        let mut guard = shared.allocator.lock();
        let Some(allocator) = guard.as_mut() else {
            unsafe { shared.device.destroy_image(image, None) };
            return Err(GraphicsError::Internal("allocator already destroyed".into()));
        };
        allocator.allocate(&AllocationCreateDesc {
            name,
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })
    };
    let allocation = match allocation {
        Ok(allocation) => allocation,
        Err(e) => {
            unsafe { shared.device.destroy_image(image, None) };
            return Err(GraphicsError::ResourceCreationFailed(format!(
                "failed to allocate '{name}': {e}"
            )));
        }
    };

    let bound = unsafe {
        shared
            .device
            .bind_image_memory(image, allocation.memory(), allocation.offset())
    };
    let vk_image = VulkanImage {
        shared: shared.clone(),
        image,
        native_format,
        format,
        extent: descriptor.size,
        aspect: aspect_of(format),
        layout: ImageLayoutState::new(vk::ImageLayout::UNDEFINED),
        allocation: Mutex::new(Some(allocation)),
        owned: true,
    };
    // Dropping the image on failure releases both the handle and the memory.
    bound.map_err(vk_error("failed to bind depth image memory"))?;

    log::debug!(
        "Vulkan: created {}x{} depth image '{name}' as {native_format:?}",
        descriptor.size.width,
        descriptor.size.height
    );
    Ok(vk_image)
}

/// Wrap a swapchain-owned image.
pub(crate) fn wrap_swapchain_image(
    shared: &Arc<VulkanShared>,
    image: vk::Image,
    native_format: vk::Format,
    format: TextureFormat,
    extent: crate::types::Extent2d,
) -> VulkanImage {
    VulkanImage {
        shared: shared.clone(),
        image,
        native_format,
        format,
        extent,
        aspect: vk::ImageAspectFlags::COLOR,
        layout: ImageLayoutState::new(vk::ImageLayout::UNDEFINED),
        allocation: Mutex::new(None),
        owned: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aspect_of() {
        assert_eq!(
            aspect_of(TextureFormat::Depth24UnormStencil8),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(
            aspect_of(TextureFormat::Depth32Float),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            aspect_of(TextureFormat::Bgra8Unorm),
            vk::ImageAspectFlags::COLOR
        );
    }
}
