//! Image layout tracking and barrier construction.
//!
//! Frontend barriers name a resource state on each side. Each state maps to
//! one Vulkan image layout plus the access mask and pipeline stage that go
//! with it. Images remember the layout of the last recorded transition so
//! the first barrier on a fresh image can start from `UNDEFINED`.

use ash::vk;
use parking_lot::Mutex;

use crate::types::ResourceState;

/// Layout, access and stages implied by a resource state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StateLayout {
    pub(crate) layout: vk::ImageLayout,
    pub(crate) access: vk::AccessFlags,
    /// Stage that must finish before leaving this state.
    pub(crate) src_stage: vk::PipelineStageFlags,
    /// Stage that waits before entering this state.
    pub(crate) dst_stage: vk::PipelineStageFlags,
}

impl StateLayout {
    pub(crate) fn of(state: ResourceState, depth: bool) -> Self {
        use vk::{AccessFlags as A, ImageLayout as L, PipelineStageFlags as S};

        let (layout, access, src_stage, dst_stage) = match state {
            ResourceState::Common => (L::GENERAL, A::empty(), S::ALL_COMMANDS, S::ALL_COMMANDS),
            ResourceState::Present => (
                L::PRESENT_SRC_KHR,
                A::empty(),
                S::COLOR_ATTACHMENT_OUTPUT,
                S::BOTTOM_OF_PIPE,
            ),
            ResourceState::RenderTarget => (
                L::COLOR_ATTACHMENT_OPTIMAL,
                A::COLOR_ATTACHMENT_READ | A::COLOR_ATTACHMENT_WRITE,
                S::COLOR_ATTACHMENT_OUTPUT,
                S::COLOR_ATTACHMENT_OUTPUT,
            ),
            ResourceState::DepthWrite => (
                L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                A::DEPTH_STENCIL_ATTACHMENT_READ | A::DEPTH_STENCIL_ATTACHMENT_WRITE,
                S::LATE_FRAGMENT_TESTS,
                S::EARLY_FRAGMENT_TESTS,
            ),
            ResourceState::DepthRead => (
                L::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
                A::DEPTH_STENCIL_ATTACHMENT_READ,
                S::EARLY_FRAGMENT_TESTS,
                S::EARLY_FRAGMENT_TESTS,
            ),
            ResourceState::PixelShaderResource => {
                let layout = if depth {
                    L::DEPTH_STENCIL_READ_ONLY_OPTIMAL
                } else {
                    L::SHADER_READ_ONLY_OPTIMAL
                };
                (layout, A::SHADER_READ, S::FRAGMENT_SHADER, S::FRAGMENT_SHADER)
            }
            ResourceState::UnorderedAccess => (
                L::GENERAL,
                A::SHADER_READ | A::SHADER_WRITE,
                S::FRAGMENT_SHADER | S::COMPUTE_SHADER,
                S::FRAGMENT_SHADER | S::COMPUTE_SHADER,
            ),
            ResourceState::CopySource => {
                (L::TRANSFER_SRC_OPTIMAL, A::TRANSFER_READ, S::TRANSFER, S::TRANSFER)
            }
            ResourceState::CopyDest => {
                (L::TRANSFER_DST_OPTIMAL, A::TRANSFER_WRITE, S::TRANSFER, S::TRANSFER)
            }
        };

        Self {
            layout,
            access,
            src_stage,
            dst_stage,
        }
    }
}

/// Layout an image was last transitioned to in recorded commands.
#[derive(Debug)]
pub(crate) struct ImageLayoutState(Mutex<vk::ImageLayout>);

impl ImageLayoutState {
    pub(crate) fn new(layout: vk::ImageLayout) -> Self {
        Self(Mutex::new(layout))
    }

    pub(crate) fn get(&self) -> vk::ImageLayout {
        *self.0.lock()
    }

    pub(crate) fn set(&self, layout: vk::ImageLayout) {
        *self.0.lock() = layout;
    }
}

/// One image transition ready for `vkCmdPipelineBarrier`.
pub(crate) struct ImageTransition {
    pub(crate) barrier: vk::ImageMemoryBarrier<'static>,
    pub(crate) src_stage: vk::PipelineStageFlags,
    pub(crate) dst_stage: vk::PipelineStageFlags,
}

/// Build the transition from `before` to `after`.
///
/// When the image has never been transitioned its contents are undefined,
/// and the barrier starts from `UNDEFINED` whatever `before` claims.
pub(crate) fn transition(
    image: vk::Image,
    aspect: vk::ImageAspectFlags,
    tracked: vk::ImageLayout,
    before: ResourceState,
    after: ResourceState,
) -> ImageTransition {
    let depth = aspect.contains(vk::ImageAspectFlags::DEPTH);
    let src = StateLayout::of(before, depth);
    let dst = StateLayout::of(after, depth);

    let (old_layout, src_access, src_stage) = if tracked == vk::ImageLayout::UNDEFINED {
        (
            vk::ImageLayout::UNDEFINED,
            vk::AccessFlags::empty(),
            vk::PipelineStageFlags::TOP_OF_PIPE,
        )
    } else {
        (src.layout, src.access, src.src_stage)
    };

    ImageTransition {
        barrier: layout_barrier(image, aspect, old_layout, dst.layout, src_access, dst.access),
        src_stage,
        dst_stage: dst.dst_stage,
    }
}

/// Barrier covering the single subresource of `image`.
pub(crate) fn layout_barrier(
    image: vk::Image,
    aspect: vk::ImageAspectFlags,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    src_access: vk::AccessFlags,
    dst_access: vk::AccessFlags,
) -> vk::ImageMemoryBarrier<'static> {
    vk::ImageMemoryBarrier::default()
        .src_access_mask(src_access)
        .dst_access_mask(dst_access)
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(aspect)
                .base_mip_level(0)
                .level_count(1)
                .base_array_layer(0)
                .layer_count(1),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_present_to_render_target() {
        let t = transition(
            vk::Image::null(),
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::PRESENT_SRC_KHR,
            ResourceState::Present,
            ResourceState::RenderTarget,
        );
        assert_eq!(t.barrier.old_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(t.barrier.new_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(t.dst_stage, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
    }

    #[test]
    fn test_first_transition_starts_undefined() {
        let t = transition(
            vk::Image::null(),
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::UNDEFINED,
            ResourceState::Present,
            ResourceState::RenderTarget,
        );
        assert_eq!(t.barrier.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(t.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
    }

    #[test]
    fn test_depth_write_to_depth_write_orders_fragment_tests() {
        let t = transition(
            vk::Image::null(),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            ResourceState::DepthWrite,
            ResourceState::DepthWrite,
        );
        assert_eq!(t.barrier.old_layout, t.barrier.new_layout);
        assert_eq!(t.src_stage, vk::PipelineStageFlags::LATE_FRAGMENT_TESTS);
        assert_eq!(t.dst_stage, vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS);
        assert!(
            t.barrier
                .src_access_mask
                .contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
        );
        assert!(
            t.barrier
                .dst_access_mask
                .contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
        );
    }

    #[test]
    fn test_depth_sampling_keeps_depth_layout() {
        let state = StateLayout::of(ResourceState::PixelShaderResource, true);
        assert_eq!(state.layout, vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL);
        let state = StateLayout::of(ResourceState::PixelShaderResource, false);
        assert_eq!(state.layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }

    #[test]
    fn test_layout_state() {
        let state = ImageLayoutState::new(vk::ImageLayout::UNDEFINED);
        state.set(vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(state.get(), vk::ImageLayout::PRESENT_SRC_KHR);
    }
}
