//! Command recording and submission.
//!
//! The [`CommandExecutor`] owns the direct queue, one command allocator per
//! frame slot and the single [`CommandRecorder`] that every frame records into.
//!
//! ```text
//!            reset(slot)          draw calls          close + submit
//! allocator[slot] ──► recorder ──────────────► recorder ──────────────► queue
//!   (GPU must be done                                         (allocator[slot] now
//!    with it: the scheduler                                    in use until the
//!    waits on the fence)                                       fence passes)
//! ```
//!
//! Every failure in here means the caller broke synchronization or the device
//! is gone, so all of them are fatal.

use std::sync::Arc;

use crate::backend::{
    CpuDescriptorHandle, GpuCommand, GpuCommandAllocator, GpuCommandList, GpuDescriptorHeap,
    GpuDevice, GpuQueue, GpuResource,
};
use crate::device::GraphicsDevice;
use crate::error::OrFatal;
use crate::pipeline::PipelineBinding;
use crate::types::{ResourceState, ScissorRect, Viewport};

/// Records commands for one frame.
///
/// Obtained from [`CommandExecutor::recorder`] or returned by
/// [`FrameScheduler::pre_draw`](crate::scheduler::FrameScheduler::pre_draw).
///
/// # Panics
///
/// Every recording method panics if the recorder has been closed.
pub struct CommandRecorder {
    device: Arc<dyn GpuDevice>,
    list: GpuCommandList,
    recording: bool,
    command_count: u32,
}

impl std::fmt::Debug for CommandRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRecorder")
            .field("list", &self.list)
            .field("recording", &self.recording)
            .field("command_count", &self.command_count)
            .finish()
    }
}

impl CommandRecorder {
    fn encode(&mut self, command: GpuCommand<'_>) {
        assert!(
            self.recording,
            "command {command:?} recorded into a closed recorder"
        );
        self.device.encode(&mut self.list, command);
        self.command_count += 1;
    }

    /// Whether the recorder accepts commands.
    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Commands recorded since the last reset.
    pub fn command_count(&self) -> u32 {
        self.command_count
    }

    /// Backend command list.
    pub fn raw(&self) -> &GpuCommandList {
        &self.list
    }

    /// Transition `resource` from `before` to `after`.
    pub fn resource_barrier(
        &mut self,
        resource: &GpuResource,
        before: ResourceState,
        after: ResourceState,
    ) {
        self.encode(GpuCommand::Barrier {
            resource,
            before,
            after,
        });
    }

    /// Bind a color target and an optional depth target.
    pub fn set_render_targets(
        &mut self,
        color: CpuDescriptorHandle,
        depth: Option<CpuDescriptorHandle>,
    ) {
        self.encode(GpuCommand::SetRenderTargets { color, depth });
    }

    /// Clear a color target.
    pub fn clear_render_target(&mut self, view: CpuDescriptorHandle, color: [f32; 4]) {
        self.encode(GpuCommand::ClearRenderTarget { view, color });
    }

    /// Clear a depth-stencil target.
    pub fn clear_depth_stencil(&mut self, view: CpuDescriptorHandle, depth: f32, stencil: u8) {
        self.encode(GpuCommand::ClearDepthStencil {
            view,
            depth,
            stencil,
        });
    }

    /// Bind the shader-visible descriptor heap.
    pub fn set_descriptor_heap(&mut self, heap: &GpuDescriptorHeap) {
        self.encode(GpuCommand::SetDescriptorHeap(heap));
    }

    /// Set the viewport.
    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.encode(GpuCommand::SetViewport(viewport));
    }

    /// Set the scissor rectangle.
    pub fn set_scissor(&mut self, rect: ScissorRect) {
        self.encode(GpuCommand::SetScissor(rect));
    }

    /// Bind a pipeline and its binding layout.
    pub fn set_pipeline(&mut self, binding: &PipelineBinding) {
        self.encode(GpuCommand::SetRootSignature(binding.layout().raw()));
        self.encode(GpuCommand::SetPipeline(binding.pipeline()));
    }

    /// Draw non-indexed, instanced primitives.
    pub fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        self.encode(GpuCommand::Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        });
    }
}

/// Owns the direct queue, the allocator ring and the recorder.
pub struct CommandExecutor {
    device: Arc<dyn GpuDevice>,
    queue: GpuQueue,
    allocators: Vec<GpuCommandAllocator>,
    current_allocator: usize,
    recorder: CommandRecorder,
    submit_count: u64,
}

impl std::fmt::Debug for CommandExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandExecutor")
            .field("allocators", &self.allocators.len())
            .field("current_allocator", &self.current_allocator)
            .field("recorder", &self.recorder)
            .field("submit_count", &self.submit_count)
            .finish()
    }
}

impl CommandExecutor {
    /// Create the queue, `allocator_count` allocators and the recorder.
    ///
    /// The recorder starts open against allocator 0.
    ///
    /// # Panics
    ///
    /// Panics if `allocator_count` is 0. Any creation failure is fatal.
    pub fn new(device: &GraphicsDevice, allocator_count: usize) -> Self {
        assert!(allocator_count > 0, "allocator_count must be at least 1");
        let raw = device.raw().clone();

        let queue = raw.create_queue().or_fatal("queue creation");
        let allocators: Vec<_> = (0..allocator_count)
            .map(|_| {
                raw.create_command_allocator()
                    .or_fatal("command allocator creation")
            })
            .collect();
        let list = raw
            .create_command_list(&allocators[0])
            .or_fatal("command recorder creation");

        log::debug!("Created command executor with {allocator_count} allocators");

        Self {
            recorder: CommandRecorder {
                device: raw.clone(),
                list,
                recording: true,
                command_count: 0,
            },
            device: raw,
            queue,
            allocators,
            current_allocator: 0,
            submit_count: 0,
        }
    }

    /// Reset allocator `slot`, then reopen the recorder against it.
    ///
    /// The GPU must have finished every list previously recorded from that
    /// allocator.
    pub fn reset(&mut self, slot: usize) {
        let allocator = &self.allocators[slot];
        self.device
            .reset_command_allocator(allocator)
            .or_fatal("command allocator reset");
        self.device
            .reset_command_list(&mut self.recorder.list, allocator)
            .or_fatal("command recorder reset");
        self.recorder.recording = true;
        self.recorder.command_count = 0;
        self.current_allocator = slot;
    }

    /// Finish recording.
    pub fn close(&mut self) {
        self.device
            .close_command_list(&mut self.recorder.list)
            .or_fatal("command recorder close");
        self.recorder.recording = false;
    }

    /// Submit the closed recorder to the queue.
    pub fn submit(&mut self) {
        self.device
            .execute_command_list(&self.queue, &self.recorder.list)
            .or_fatal("command submission");
        self.submit_count += 1;
        log::trace!(
            "Submitted {} commands from allocator {}",
            self.recorder.command_count,
            self.current_allocator
        );
    }

    /// The recorder.
    pub fn recorder(&mut self) -> &mut CommandRecorder {
        &mut self.recorder
    }

    /// Whether the recorder is open.
    pub fn is_recording(&self) -> bool {
        self.recorder.recording
    }

    /// The direct queue.
    pub fn queue(&self) -> &GpuQueue {
        &self.queue
    }

    /// Number of allocators in the ring.
    pub fn allocator_count(&self) -> usize {
        self.allocators.len()
    }

    /// Allocator the recorder was last reset against.
    pub fn current_allocator(&self) -> usize {
        self.current_allocator
    }

    /// Number of submissions so far.
    pub fn submit_count(&self) -> u64 {
        self.submit_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::{DummyInstance, RecordedCommand};
    use crate::config::RendererConfig;

    fn executor() -> (CommandExecutor, crate::backend::dummy::DummyController) {
        let instance = DummyInstance::new();
        let device = GraphicsDevice::initialize(&instance, &RendererConfig::default());
        (CommandExecutor::new(&device, 2), instance.controller())
    }

    #[test]
    fn test_recorder_starts_open() {
        let (executor, _) = executor();
        assert!(executor.is_recording());
        assert_eq!(executor.current_allocator(), 0);
    }

    #[test]
    fn test_close_submit_reset_cycle() {
        let (mut executor, controller) = executor();
        executor.recorder().set_viewport(Viewport::from_dimensions(8, 8));
        executor.recorder().draw(3, 1, 0, 0);
        executor.close();
        executor.submit();

        assert!(!executor.is_recording());
        assert_eq!(controller.submissions(), 1);
        assert!(matches!(
            controller.executed_commands().last(),
            Some(RecordedCommand::Draw {
                vertex_count: 3,
                instance_count: 1
            })
        ));

        executor.reset(1);
        assert!(executor.is_recording());
        assert_eq!(executor.current_allocator(), 1);
        assert_eq!(executor.recorder().command_count(), 0);
    }

    #[test]
    #[should_panic(expected = "closed recorder")]
    fn test_recording_after_close_panics() {
        let (mut executor, _) = executor();
        executor.close();
        executor.recorder().draw(3, 1, 0, 0);
    }

    #[test]
    #[should_panic(expected = "fatal graphics error: command submission")]
    fn test_submitting_open_recorder_is_fatal() {
        let (mut executor, _) = executor();
        executor.submit();
    }
}
