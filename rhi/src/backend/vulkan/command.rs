//! Vulkan command pools and command buffer recording.
//!
//! Render targets are bound with dynamic rendering. Binding targets does not
//! begin rendering by itself: the pass opens lazily at the first draw, and
//! clears recorded before that become the pass's load operations. Clears
//! with no draw after them are flushed as an empty pass.

use std::sync::Arc;

use ash::vk;

use crate::backend::{CpuDescriptorHandle, GpuCommand, GpuPipeline, GpuResource, GpuRootSignature};
use crate::error::GraphicsError;
use crate::types::{ResourceState, ScissorRect, Viewport};

use super::layout::{self, StateLayout};
use super::{VulkanImage, VulkanShared, vk_error};

/// A command pool owning exactly one primary command buffer.
pub struct VulkanCommandPool {
    shared: Arc<VulkanShared>,
    pool: vk::CommandPool,
    buffer: vk::CommandBuffer,
}

impl VulkanCommandPool {
    pub(crate) fn new(shared: &Arc<VulkanShared>) -> Result<Self, GraphicsError> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(shared.queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = unsafe { shared.device.create_command_pool(&pool_info, None) }
            .map_err(vk_error("failed to create command pool"))?;

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffer = match unsafe { shared.device.allocate_command_buffers(&alloc_info) } {
            Ok(buffers) => buffers[0],
            Err(e) => {
                unsafe { shared.device.destroy_command_pool(pool, None) };
                return Err(vk_error("failed to allocate command buffer")(e));
            }
        };

        Ok(Self {
            shared: shared.clone(),
            pool,
            buffer,
        })
    }

    /// Return the pool's memory. The GPU must be done with its buffer.
    pub(crate) fn reset(&self) -> Result<(), GraphicsError> {
        unsafe {
            self.shared
                .device
                .reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty())
        }
        .map_err(vk_error("failed to reset command pool"))
    }
}

impl Drop for VulkanCommandPool {
    fn drop(&mut self) {
        // Frees the command buffer too.
        unsafe { self.shared.device.destroy_command_pool(self.pool, None) };
    }
}

/// Attachments bound by the last `SetRenderTargets`.
#[derive(Default)]
struct BoundTargets {
    color: Option<CpuDescriptorHandle>,
    depth: Option<CpuDescriptorHandle>,
}

/// A command buffer being recorded, plus the state needed to translate
/// frontend commands into dynamic rendering.
pub struct VulkanCommandList {
    shared: Arc<VulkanShared>,
    buffer: vk::CommandBuffer,
    recording: bool,
    targets: BoundTargets,
    rendering: bool,
    pending_color_clear: Option<[f32; 4]>,
    pending_depth_clear: Option<(f32, u8)>,
    viewport: Option<vk::Viewport>,
    scissor: Option<vk::Rect2D>,
    pipeline_bound: bool,
    /// First recording error; reported by `close`.
    error: Option<String>,
}

impl VulkanCommandList {
    /// Begin recording into the pool's buffer.
    pub(crate) fn begin(
        shared: &Arc<VulkanShared>,
        pool: &VulkanCommandPool,
    ) -> Result<Self, GraphicsError> {
        let mut list = Self {
            shared: shared.clone(),
            buffer: pool.buffer,
            recording: false,
            targets: BoundTargets::default(),
            rendering: false,
            pending_color_clear: None,
            pending_depth_clear: None,
            viewport: None,
            scissor: None,
            pipeline_bound: false,
            error: None,
        };
        list.reset(pool)?;
        Ok(list)
    }

    /// Restart recording, discarding all state from the previous recording.
    pub(crate) fn reset(&mut self, pool: &VulkanCommandPool) -> Result<(), GraphicsError> {
        if self.recording {
            return Err(GraphicsError::CommandFailed(
                "command list reset while still recording".into(),
            ));
        }
        self.buffer = pool.buffer;
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.shared
                .device
                .begin_command_buffer(self.buffer, &begin_info)
        }
        .map_err(vk_error("failed to begin command buffer"))?;

        self.recording = true;
        self.targets = BoundTargets::default();
        self.rendering = false;
        self.pending_color_clear = None;
        self.pending_depth_clear = None;
        self.viewport = None;
        self.scissor = None;
        self.pipeline_bound = false;
        self.error = None;
        Ok(())
    }

    fn fail(&mut self, message: String) {
        log::error!("Vulkan command recording: {message}");
        if self.error.is_none() {
            self.error = Some(message);
        }
    }

    pub(crate) fn encode(&mut self, command: GpuCommand<'_>) {
        if !self.recording {
            self.fail(format!("{command:?} recorded into a closed list"));
            return;
        }
        match command {
            GpuCommand::Barrier {
                resource,
                before,
                after,
            } => self.barrier(resource, before, after),
            GpuCommand::SetRenderTargets { color, depth } => {
                self.flush_pass();
                self.targets = BoundTargets {
                    color: Some(color),
                    depth,
                };
            }
            GpuCommand::ClearRenderTarget { view, color } => self.clear_color(view, color),
            GpuCommand::ClearDepthStencil {
                view,
                depth,
                stencil,
            } => self.clear_depth(view, depth, stencil),
            // Resource views are written into descriptor sets at bind time;
            // the heap itself has nothing to bind.
            GpuCommand::SetDescriptorHeap(_) => {}
            GpuCommand::SetViewport(viewport) => {
                let viewport = convert_viewport(&viewport);
                if self.rendering {
                    unsafe {
                        self.shared
                            .device
                            .cmd_set_viewport(self.buffer, 0, &[viewport])
                    };
                }
                self.viewport = Some(viewport);
            }
            GpuCommand::SetScissor(scissor) => {
                let scissor = convert_scissor(&scissor);
                if self.rendering {
                    unsafe { self.shared.device.cmd_set_scissor(self.buffer, 0, &[scissor]) };
                }
                self.scissor = Some(scissor);
            }
            GpuCommand::SetRootSignature(root_signature) => {
                if !matches!(root_signature, GpuRootSignature::Vulkan(_)) {
                    self.fail("binding layout from another backend".into());
                }
            }
            GpuCommand::SetPipeline(pipeline) => match pipeline {
                GpuPipeline::Vulkan(pipeline) if !pipeline.is_null() => {
                    unsafe {
                        self.shared.device.cmd_bind_pipeline(
                            self.buffer,
                            vk::PipelineBindPoint::GRAPHICS,
                            pipeline.raw(),
                        )
                    };
                    self.pipeline_bound = true;
                }
                _ => self.fail("bound a pipeline that is null or from another backend".into()),
            },
            GpuCommand::Draw {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            } => {
                if !self.pipeline_bound {
                    self.fail("draw without a bound pipeline".into());
                    return;
                }
                if !self.rendering && !self.begin_pass() {
                    return;
                }
                unsafe {
                    self.shared.device.cmd_draw(
                        self.buffer,
                        vertex_count,
                        instance_count,
                        first_vertex,
                        first_instance,
                    )
                };
            }
        }
    }

    fn barrier(&mut self, resource: &GpuResource, before: ResourceState, after: ResourceState) {
        let GpuResource::Vulkan(image) = resource else {
            self.fail("barrier on a resource from another backend".into());
            return;
        };
        self.flush_pass();

        let t = layout::transition(image.image, image.aspect, image.layout.get(), before, after);
        unsafe {
            self.shared.device.cmd_pipeline_barrier(
                self.buffer,
                t.src_stage,
                t.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[t.barrier],
            )
        };
        image.layout.set(t.barrier.new_layout);
    }

    fn clear_color(&mut self, view: CpuDescriptorHandle, color: [f32; 4]) {
        if self.targets.color == Some(view) {
            if self.rendering {
                let extent = self.view_extent(view);
                self.clear_attachment(
                    vk::ClearAttachment {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        color_attachment: 0,
                        clear_value: color_clear_value(color),
                    },
                    extent,
                );
            } else {
                self.pending_color_clear = Some(color);
            }
            return;
        }

        // Clearing a view that is not bound: run it as a pass of its own.
        let saved = std::mem::take(&mut self.targets);
        self.flush_pass();
        self.targets = BoundTargets {
            color: Some(view),
            depth: None,
        };
        self.pending_color_clear = Some(color);
        self.flush_pass();
        self.targets = saved;
    }

    fn clear_depth(&mut self, view: CpuDescriptorHandle, depth: f32, stencil: u8) {
        if self.targets.depth == Some(view) {
            if self.rendering {
                let aspect_mask = self
                    .shared
                    .view(view)
                    .map(|(image, _)| image.aspect)
                    .unwrap_or(vk::ImageAspectFlags::DEPTH);
                let extent = self.view_extent(view);
                self.clear_attachment(
                    vk::ClearAttachment {
                        aspect_mask,
                        color_attachment: 0,
                        clear_value: depth_clear_value(depth, stencil),
                    },
                    extent,
                );
            } else {
                self.pending_depth_clear = Some((depth, stencil));
            }
            return;
        }

        let saved = std::mem::take(&mut self.targets);
        self.flush_pass();
        self.targets = BoundTargets {
            color: None,
            depth: Some(view),
        };
        self.pending_depth_clear = Some((depth, stencil));
        self.flush_pass();
        self.targets = saved;
    }

    fn clear_attachment(&mut self, attachment: vk::ClearAttachment, extent: vk::Extent2D) {
        let rect = vk::ClearRect {
            rect: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            },
            base_array_layer: 0,
            layer_count: 1,
        };
        unsafe {
            self.shared
                .device
                .cmd_clear_attachments(self.buffer, &[attachment], &[rect])
        };
    }

    fn view_extent(&self, view: CpuDescriptorHandle) -> vk::Extent2D {
        self.shared
            .view(view)
            .map(|(image, _)| vk::Extent2D {
                width: image.extent().width,
                height: image.extent().height,
            })
            .unwrap_or_default()
    }

    /// Move `image` into `state`'s layout if a barrier did not already.
    fn ensure_layout(&self, image: &VulkanImage, state: ResourceState) {
        let target = StateLayout::of(state, image.aspect.contains(vk::ImageAspectFlags::DEPTH));
        let current = image.layout.get();
        if current == target.layout {
            return;
        }
        let (src_access, src_stage) = if current == vk::ImageLayout::UNDEFINED {
            (vk::AccessFlags::empty(), vk::PipelineStageFlags::TOP_OF_PIPE)
        } else {
            (vk::AccessFlags::MEMORY_WRITE, vk::PipelineStageFlags::ALL_COMMANDS)
        };
        let barrier = layout::layout_barrier(
            image.image,
            image.aspect,
            current,
            target.layout,
            src_access,
            target.access,
        );
        unsafe {
            self.shared.device.cmd_pipeline_barrier(
                self.buffer,
                src_stage,
                target.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            )
        };
        image.layout.set(target.layout);
    }

    /// Open a rendering pass on the bound targets, consuming pending clears.
    fn begin_pass(&mut self) -> bool {
        let color = match self.targets.color {
            Some(handle) => match self.shared.view(handle) {
                Some(view) => Some(view),
                None => {
                    self.fail(format!("render-target view {handle:?} was never created"));
                    return false;
                }
            },
            None => None,
        };
        let depth = match self.targets.depth {
            Some(handle) => match self.shared.view(handle) {
                Some(view) => Some(view),
                None => {
                    self.fail(format!("depth-stencil view {handle:?} was never created"));
                    return false;
                }
            },
            None => None,
        };
        let Some(extent) = color.as_ref().or(depth.as_ref()).map(|(image, _)| image.extent())
        else {
            self.fail("draw without bound render targets".into());
            return false;
        };

        let mut color_attachments = Vec::with_capacity(1);
        if let Some((image, view)) = &color {
            self.ensure_layout(image, ResourceState::RenderTarget);
            let (load_op, clear_value) = match self.pending_color_clear.take() {
                Some(color) => (vk::AttachmentLoadOp::CLEAR, color_clear_value(color)),
                None => (vk::AttachmentLoadOp::LOAD, vk::ClearValue::default()),
            };
            color_attachments.push(
                vk::RenderingAttachmentInfo::default()
                    .image_view(*view)
                    .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .load_op(load_op)
                    .store_op(vk::AttachmentStoreOp::STORE)
                    .clear_value(clear_value),
            );
        }

        let depth_attachment = depth.as_ref().map(|(image, view)| {
            self.ensure_layout(image, ResourceState::DepthWrite);
            let (load_op, clear_value) = match self.pending_depth_clear.take() {
                Some((depth, stencil)) => {
                    (vk::AttachmentLoadOp::CLEAR, depth_clear_value(depth, stencil))
                }
                None => (vk::AttachmentLoadOp::LOAD, vk::ClearValue::default()),
            };
            vk::RenderingAttachmentInfo::default()
                .image_view(*view)
                .image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .load_op(load_op)
                .store_op(vk::AttachmentStoreOp::STORE)
                .clear_value(clear_value)
        });
        let has_stencil = depth
            .as_ref()
            .is_some_and(|(image, _)| image.aspect.contains(vk::ImageAspectFlags::STENCIL));

        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: vk::Extent2D {
                width: extent.width,
                height: extent.height,
            },
        };
        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(render_area)
            .layer_count(1)
            .color_attachments(&color_attachments);
        if let Some(ref depth) = depth_attachment {
            rendering_info = rendering_info.depth_attachment(depth);
            if has_stencil {
                rendering_info = rendering_info.stencil_attachment(depth);
            }
        }

        unsafe {
            self.shared
                .dynamic_rendering
                .cmd_begin_rendering(self.buffer, &rendering_info)
        };
        self.rendering = true;

        let viewport = self.viewport.unwrap_or(vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        });
        let scissor = self.scissor.unwrap_or(render_area);
        unsafe {
            self.shared
                .device
                .cmd_set_viewport(self.buffer, 0, &[viewport]);
            self.shared.device.cmd_set_scissor(self.buffer, 0, &[scissor]);
        }
        true
    }

    /// End the open pass, or run pending clears as an empty pass.
    fn flush_pass(&mut self) {
        if !self.rendering
            && (self.pending_color_clear.is_some() || self.pending_depth_clear.is_some())
        {
            self.begin_pass();
            // A failed begin leaves clears that can never apply.
            self.pending_color_clear = None;
            self.pending_depth_clear = None;
        }
        if self.rendering {
            unsafe {
                self.shared
                    .dynamic_rendering
                    .cmd_end_rendering(self.buffer)
            };
            self.rendering = false;
        }
    }

    /// Finish recording. Reports the first recording error, if any.
    pub(crate) fn close(&mut self) -> Result<(), GraphicsError> {
        if !self.recording {
            return Err(GraphicsError::CommandFailed(
                "command list closed twice".into(),
            ));
        }
        self.flush_pass();
        self.recording = false;
        unsafe { self.shared.device.end_command_buffer(self.buffer) }
            .map_err(vk_error("failed to end command buffer"))?;
        match self.error.take() {
            Some(message) => Err(GraphicsError::CommandFailed(message)),
            None => Ok(()),
        }
    }

    /// Submit the closed buffer, waiting on any pending image acquisition.
    pub(crate) fn submit(&self) -> Result<(), GraphicsError> {
        if self.recording {
            return Err(GraphicsError::CommandFailed(
                "submitted a command list that is still recording".into(),
            ));
        }
        let waits: Vec<vk::Semaphore> = std::mem::take(&mut *self.shared.pending_waits.lock());
        let wait_stages = vec![vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT; waits.len()];
        let buffers = [self.buffer];
        let submit = vk::SubmitInfo::default()
            .wait_semaphores(&waits)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&buffers);

        let queue = self.shared.queue.lock();
        unsafe {
            self.shared
                .device
                .queue_submit(*queue, &[submit], vk::Fence::null())
        }
        .map_err(vk_error("failed to submit command buffer"))
    }
}

fn convert_viewport(viewport: &Viewport) -> vk::Viewport {
    vk::Viewport {
        x: viewport.x,
        y: viewport.y,
        width: viewport.width,
        height: viewport.height,
        min_depth: viewport.min_depth,
        max_depth: viewport.max_depth,
    }
}

fn convert_scissor(scissor: &ScissorRect) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D {
            x: scissor.x,
            y: scissor.y,
        },
        extent: vk::Extent2D {
            width: scissor.width,
            height: scissor.height,
        },
    }
}

fn color_clear_value(color: [f32; 4]) -> vk::ClearValue {
    vk::ClearValue {
        color: vk::ClearColorValue { float32: color },
    }
}

fn depth_clear_value(depth: f32, stencil: u8) -> vk::ClearValue {
    vk::ClearValue {
        depth_stencil: vk::ClearDepthStencilValue {
            depth,
            stencil: stencil as u32,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_scissor() {
        let rect = convert_scissor(&ScissorRect {
            x: 4,
            y: 8,
            width: 640,
            height: 480,
        });
        assert_eq!(rect.offset.x, 4);
        assert_eq!(rect.extent.height, 480);
    }

    #[test]
    fn test_depth_clear_value() {
        let value = depth_clear_value(1.0, 7);
        let depth_stencil = unsafe { value.depth_stencil };
        assert_eq!(depth_stencil.depth, 1.0);
        assert_eq!(depth_stencil.stencil, 7);
    }
}
