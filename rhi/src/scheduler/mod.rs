//! Per-frame scheduling.
//!
//! [`FrameScheduler`] drives every frame through the same four calls and
//! bounds how far the CPU can run ahead of the GPU.
//!
//! # Frame Lifecycle
//!
//! ```text
//!            begin_frame          pre_draw / draws / post_draw
//!   ┌──────┐ ──────────► ┌───────────┐
//!   │ Idle │             │ Recording │
//!   └──────┘ ◄────┐      └───────────┘
//!                 │            │ end_frame: close + submit
//!     reset slot  │            ▼
//!    (maybe wait) │      ┌───────────┐   present   ┌───────────┐
//!                 └───── │ Presented │ ◄────────── │ Submitted │
//!                        └───────────┘             └───────────┘
//! ```
//!
//! Calling an operation in the wrong phase is a programmer error and panics.
//!
//! # Frame Slots
//!
//! With N frames in flight there are N command allocators and N stored fence
//! values, indexed by `frame % N`:
//!
//! ```text
//! frames_in_flight = 2
//!
//! Slot 0: [Frame 0] ──► [Frame 2] ──► [Frame 4] ──►
//! Slot 1: [Frame 1] ──► [Frame 3] ──► [Frame 5] ──►
//! ```
//!
//! At the end of each frame the scheduler signals the fence, stores the value
//! for the slot just used and moves to the next slot. Before resetting that
//! slot's allocator it blocks only if the GPU has not yet reached the value
//! stored for the slot's previous use. When the GPU keeps up, `end_frame`
//! never waits.
//!
//! # Example
//!
//! ```ignore
//! loop {
//!     scheduler.begin_frame(&context, &presenter);
//!     let recorder = scheduler.pre_draw(&mut context, &heaps, &presenter);
//!     recorder.set_pipeline(&sprite_pipeline);
//!     recorder.draw(3, 1, 0, 0);
//!     scheduler.post_draw(&mut context, &presenter);
//!     scheduler.end_frame(&mut context, &mut presenter);
//! }
//!
//! scheduler.wait_idle(&mut context);
//! ```

mod sync;

pub use sync::Fence;

use std::fmt;
use std::sync::Arc;

use crate::command::CommandRecorder;
use crate::config::{CLEAR_DEPTH, RendererConfig};
use crate::context::DeviceContext;
use crate::descriptor::DescriptorHeapManager;
use crate::pipeline::PipelineBinding;
use crate::swapchain::SwapchainPresenter;
use crate::types::ResourceState;

/// Where the scheduler is within the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FramePhase {
    /// Between frames.
    Idle,
    /// Commands are being recorded.
    Recording,
    /// The recorder has been submitted.
    Submitted,
    /// The back buffer has been handed to the display.
    Presented,
}

impl fmt::Display for FramePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Bookkeeping for the frame in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameState {
    /// Frame number, starting at 0.
    pub frame_index: u64,
    /// Back buffer written this frame.
    pub back_buffer_index: u32,
    /// Allocator and fence-value slot used this frame.
    pub frame_slot: usize,
    /// Fence value the GPU must reach before this slot was reused.
    pub fence_value: u64,
}

/// Drives the begin/pre-draw/post-draw/end cycle.
pub struct FrameScheduler {
    phase: FramePhase,
    back_buffer_state: ResourceState,
    frame_slot: usize,
    slot_fence_values: Box<[u64]>,
    frame_count: u64,
    fence_value: u64,
    current: Option<FrameState>,
    clear_color: [f32; 4],
    sync_interval: u32,
    default_pipeline: Option<Arc<PipelineBinding>>,
    last_frame_blocked: bool,
}

impl fmt::Debug for FrameScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameScheduler")
            .field("phase", &self.phase)
            .field("frame_slot", &self.frame_slot)
            .field("slot_fence_values", &self.slot_fence_values)
            .field("frame_count", &self.frame_count)
            .finish_non_exhaustive()
    }
}

impl FrameScheduler {
    /// Create a scheduler with `config.frames_in_flight` slots.
    ///
    /// The [`DeviceContext`] must have been created from the same
    /// configuration, so its executor has one allocator per slot.
    ///
    /// # Panics
    ///
    /// Panics if `frames_in_flight` is 0.
    pub fn new(config: &RendererConfig) -> Self {
        assert!(
            config.frames_in_flight > 0,
            "frames_in_flight must be at least 1"
        );
        Self {
            phase: FramePhase::Idle,
            back_buffer_state: ResourceState::Present,
            frame_slot: 0,
            slot_fence_values: vec![0; config.frames_in_flight].into_boxed_slice(),
            frame_count: 0,
            fence_value: 0,
            current: None,
            clear_color: config.clear_color,
            sync_interval: config.sync_interval,
            default_pipeline: None,
            last_frame_blocked: false,
        }
    }

    #[track_caller]
    fn expect_phase(&self, operation: &str, expected: FramePhase) {
        assert!(
            self.phase == expected,
            "{operation} called in phase {}, expected {expected}",
            self.phase
        );
    }

    #[track_caller]
    fn expect_back_buffer(&self, operation: &str, expected: ResourceState) {
        assert!(
            self.back_buffer_state == expected,
            "{operation} with back buffer in {:?}, expected {expected:?}",
            self.back_buffer_state
        );
    }

    /// Start a frame.
    ///
    /// Pure bookkeeping: records which back buffer and slot the frame uses.
    pub fn begin_frame(
        &mut self,
        context: &DeviceContext,
        presenter: &SwapchainPresenter,
    ) -> FrameState {
        self.expect_phase("begin_frame", FramePhase::Idle);
        debug_assert_eq!(context.executor().current_allocator(), self.frame_slot);

        let state = FrameState {
            frame_index: self.frame_count,
            back_buffer_index: presenter.acquire_current_index(),
            frame_slot: self.frame_slot,
            fence_value: self.slot_fence_values[self.frame_slot],
        };
        self.current = Some(state);
        self.phase = FramePhase::Recording;

        log::trace!(
            "Begin frame {} (slot {}, back buffer {})",
            state.frame_index,
            state.frame_slot,
            state.back_buffer_index
        );
        state
    }

    /// Prepare the back buffer for drawing and return the recorder.
    ///
    /// Records, in order: the Present→RenderTarget barrier, a DepthWrite
    /// barrier on the shared depth target, render-target and depth binding,
    /// both clears, the shader-visible heap, a full-client viewport and
    /// scissor, and the default pipeline if one is set.
    pub fn pre_draw<'a>(
        &mut self,
        context: &'a mut DeviceContext,
        heaps: &DescriptorHeapManager,
        presenter: &SwapchainPresenter,
    ) -> &'a mut CommandRecorder {
        self.expect_phase("pre_draw", FramePhase::Recording);
        self.expect_back_buffer("pre_draw", ResourceState::Present);
        crate::profile_scope!("pre_draw");

        let index = presenter.acquire_current_index();
        let extent = presenter.extent();
        let recorder = context.executor_mut().recorder();

        recorder.resource_barrier(
            presenter.back_buffer(index),
            ResourceState::Present,
            ResourceState::RenderTarget,
        );
        self.back_buffer_state = ResourceState::RenderTarget;
        // The depth target is shared by every frame slot: order this frame's
        // clear after the previous frame's depth writes.
        recorder.resource_barrier(
            presenter.depth_target(),
            ResourceState::DepthWrite,
            ResourceState::DepthWrite,
        );

        let rtv = presenter.rtv(index);
        let dsv = presenter.dsv();
        recorder.set_render_targets(rtv, Some(dsv));
        recorder.clear_render_target(rtv, self.clear_color);
        recorder.clear_depth_stencil(dsv, CLEAR_DEPTH, 0);
        recorder.set_descriptor_heap(heaps.shader_visible_heap());
        recorder.set_viewport(extent.viewport());
        recorder.set_scissor(extent.scissor());
        if let Some(pipeline) = &self.default_pipeline {
            recorder.set_pipeline(pipeline);
        }

        recorder
    }

    /// Return the back buffer to the presentable state. Does not submit.
    pub fn post_draw(&mut self, context: &mut DeviceContext, presenter: &SwapchainPresenter) {
        self.expect_phase("post_draw", FramePhase::Recording);
        self.expect_back_buffer("post_draw", ResourceState::RenderTarget);

        let index = presenter.acquire_current_index();
        context.executor_mut().recorder().resource_barrier(
            presenter.back_buffer(index),
            ResourceState::RenderTarget,
            ResourceState::Present,
        );
        self.back_buffer_state = ResourceState::Present;
    }

    /// Submit, present, signal, and get the next slot ready.
    ///
    /// Blocks only if the GPU has not finished the previous use of the next
    /// slot.
    pub fn end_frame(&mut self, context: &mut DeviceContext, presenter: &mut SwapchainPresenter) {
        self.expect_phase("end_frame", FramePhase::Recording);
        self.expect_back_buffer("end_frame", ResourceState::Present);
        crate::profile_scope!("end_frame");

        let (executor, fence) = context.split_mut();

        executor.close();
        executor.submit();
        self.phase = FramePhase::Submitted;

        presenter.present(executor.queue(), self.sync_interval);
        self.phase = FramePhase::Presented;

        let signaled = fence.signal(executor.queue());
        self.fence_value = signaled;
        self.slot_fence_values[self.frame_slot] = signaled;
        self.frame_slot = (self.frame_slot + 1) % self.slot_fence_values.len();

        let pending = self.slot_fence_values[self.frame_slot];
        self.last_frame_blocked = !fence.is_complete(pending);
        if self.last_frame_blocked {
            log::trace!(
                "GPU behind: waiting for fence {pending} before reusing slot {}",
                self.frame_slot
            );
            fence.wait(pending);
        }

        executor.reset(self.frame_slot);

        self.frame_count += 1;
        self.current = None;
        self.phase = FramePhase::Idle;

        crate::profile_plot!("fence_value", signaled);
        crate::frame_mark!();
    }

    /// Signal the fence and wait for it: every submitted frame has finished
    /// on the GPU when this returns.
    pub fn wait_idle(&mut self, context: &mut DeviceContext) {
        let (executor, fence) = context.split_mut();
        let value = fence.signal(executor.queue());
        self.fence_value = value;
        fence.wait(value);
        log::trace!("GPU idle at fence {value}");
    }

    /// Current phase.
    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    /// State the back buffer was last transitioned to.
    pub fn back_buffer_state(&self) -> ResourceState {
        self.back_buffer_state
    }

    /// The frame in progress, if any.
    pub fn current_frame(&self) -> Option<FrameState> {
        self.current
    }

    /// Number of completed frames.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Last fence value this scheduler signaled.
    pub fn fence_value(&self) -> u64 {
        self.fence_value
    }

    /// Number of frame slots.
    pub fn frames_in_flight(&self) -> usize {
        self.slot_fence_values.len()
    }

    /// Slot the next frame records into.
    pub fn frame_slot(&self) -> usize {
        self.frame_slot
    }

    /// Fence value stored for `slot`.
    pub fn slot_fence_value(&self, slot: usize) -> u64 {
        self.slot_fence_values[slot]
    }

    /// Whether the last `end_frame` had to wait for the GPU.
    pub fn last_frame_blocked(&self) -> bool {
        self.last_frame_blocked
    }

    /// Set the back buffer clear color.
    pub fn set_clear_color(&mut self, color: [f32; 4]) {
        self.clear_color = color;
    }

    /// Pipeline bound by every `pre_draw`, or none.
    pub fn set_default_pipeline(&mut self, pipeline: Option<Arc<PipelineBinding>>) {
        self.default_pipeline = pipeline;
    }

    /// The default pipeline.
    pub fn default_pipeline(&self) -> Option<&Arc<PipelineBinding>> {
        self.default_pipeline.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::GpuResource;
    use crate::backend::dummy::{DummyController, DummyInstance, RecordedCommand};
    use crate::device::GraphicsDevice;
    use crate::swapchain::SurfaceHandle;
    use raw_window_handle::{
        RawDisplayHandle, RawWindowHandle, WebDisplayHandle, WebWindowHandle,
    };

    struct Harness {
        controller: DummyController,
        context: DeviceContext,
        heaps: DescriptorHeapManager,
        presenter: SwapchainPresenter,
        scheduler: FrameScheduler,
    }

    fn harness(frames_in_flight: usize) -> Harness {
        let config = RendererConfig::default()
            .with_size(320, 240)
            .with_frames_in_flight(frames_in_flight);
        let instance = DummyInstance::new();
        let controller = instance.controller();
        let device = GraphicsDevice::initialize(&instance, &config);
        let mut heaps = DescriptorHeapManager::new(&device, &config);
        let context = DeviceContext::new(device.clone(), &config);
        // SAFETY: the dummy backend never dereferences surface handles.
        let surface = unsafe {
            SurfaceHandle::from_raw(
                RawWindowHandle::Web(WebWindowHandle::new(1)),
                RawDisplayHandle::Web(WebDisplayHandle::new()),
            )
        };
        let presenter =
            SwapchainPresenter::new(&device, context.executor(), &mut heaps, &surface, &config);
        Harness {
            controller,
            context,
            heaps,
            presenter,
            scheduler: FrameScheduler::new(&config),
        }
    }

    fn run_frame(h: &mut Harness) {
        h.scheduler.begin_frame(&h.context, &h.presenter);
        h.scheduler
            .pre_draw(&mut h.context, &h.heaps, &h.presenter)
            .draw(3, 1, 0, 0);
        h.scheduler.post_draw(&mut h.context, &h.presenter);
        h.scheduler.end_frame(&mut h.context, &mut h.presenter);
    }

    #[test]
    fn test_frame_records_expected_sequence() {
        let mut h = harness(2);
        h.scheduler.set_clear_color([0.1, 0.2, 0.3, 1.0]);
        run_frame(&mut h);

        let commands = h.controller.executed_commands();
        assert!(matches!(
            commands[0],
            RecordedCommand::Barrier {
                before: ResourceState::Present,
                after: ResourceState::RenderTarget,
                ..
            }
        ));
        let GpuResource::Dummy { id: depth_id, .. } = h.presenter.depth_target() else {
            panic!("depth target is not a dummy resource");
        };
        assert_eq!(
            commands[1],
            RecordedCommand::Barrier {
                resource: *depth_id,
                before: ResourceState::DepthWrite,
                after: ResourceState::DepthWrite,
            }
        );
        assert!(matches!(
            commands[2],
            RecordedCommand::SetRenderTargets { depth: Some(_), .. }
        ));
        assert_eq!(
            commands[3],
            RecordedCommand::ClearRenderTarget {
                view: h.presenter.rtv(0),
                color: [0.1, 0.2, 0.3, 1.0],
            }
        );
        assert_eq!(
            commands[4],
            RecordedCommand::ClearDepthStencil {
                view: h.presenter.dsv(),
                depth: 1.0,
                stencil: 0,
            }
        );
        assert!(matches!(commands[5], RecordedCommand::SetDescriptorHeap { .. }));
        assert!(matches!(commands[6], RecordedCommand::SetViewport(ref v) if v.width == 320.0));
        assert!(matches!(commands[7], RecordedCommand::SetScissor(ref s) if s.width == 320));
        assert!(matches!(commands[8], RecordedCommand::Draw { vertex_count: 3, .. }));
        assert!(matches!(
            commands.last(),
            Some(RecordedCommand::Barrier {
                before: ResourceState::RenderTarget,
                after: ResourceState::Present,
                ..
            })
        ));
        assert!(h.controller.validation_errors().is_empty());
    }

    #[test]
    fn test_frames_advance_slots_and_back_buffers() {
        let mut h = harness(2);
        for frame in 0..5u64 {
            let state = h.scheduler.begin_frame(&h.context, &h.presenter);
            assert_eq!(state.frame_index, frame);
            assert_eq!(state.frame_slot, (frame % 2) as usize);
            assert_eq!(state.back_buffer_index, (frame % 2) as u32);
            h.scheduler.pre_draw(&mut h.context, &h.heaps, &h.presenter);
            h.scheduler.post_draw(&mut h.context, &h.presenter);
            h.scheduler.end_frame(&mut h.context, &mut h.presenter);
        }

        assert_eq!(h.scheduler.frame_count(), 5);
        assert_eq!(h.context.fence().value(), 5);
        assert_eq!(h.scheduler.fence_value(), 5);
        assert_eq!(h.controller.presents(), 5);
        assert_eq!(h.controller.submissions(), 5);
        assert_eq!(h.controller.fence_waits(), 0);
        assert_eq!(h.scheduler.phase(), FramePhase::Idle);
        assert_eq!(h.scheduler.back_buffer_state(), ResourceState::Present);
    }

    #[test]
    fn test_single_slot_waits_for_its_own_frame() {
        let mut h = harness(1);
        h.controller.set_manual_completion(true);

        let handle = h.controller.complete_on_wait(1);
        run_frame(&mut h);
        handle.join().unwrap();

        assert!(h.scheduler.last_frame_blocked());
        assert_eq!(h.scheduler.slot_fence_value(0), 1);
        assert!(h.context.fence().is_complete(1));
    }

    #[test]
    fn test_two_slots_wait_only_when_gpu_falls_behind() {
        let mut h = harness(2);
        h.controller.set_manual_completion(true);

        run_frame(&mut h);
        assert!(!h.scheduler.last_frame_blocked());

        let handle = h.controller.complete_on_wait(1);
        run_frame(&mut h);
        handle.join().unwrap();

        assert!(h.scheduler.last_frame_blocked());
        assert_eq!(h.scheduler.frame_slot(), 0);
        assert_eq!(h.scheduler.slot_fence_value(1), 2);
        h.controller.set_manual_completion(false);
    }

    #[test]
    fn test_wait_idle_reaches_last_signal() {
        let mut h = harness(2);
        run_frame(&mut h);
        h.scheduler.wait_idle(&mut h.context);
        assert_eq!(h.context.fence().value(), 2);
        assert!(h.context.fence().is_complete(2));
    }

    #[test]
    #[should_panic(expected = "pre_draw called in phase Idle")]
    fn test_pre_draw_requires_begin_frame() {
        let mut h = harness(2);
        h.scheduler.pre_draw(&mut h.context, &h.heaps, &h.presenter);
    }

    #[test]
    #[should_panic(expected = "end_frame with back buffer in RenderTarget")]
    fn test_end_frame_requires_post_draw() {
        let mut h = harness(2);
        h.scheduler.begin_frame(&h.context, &h.presenter);
        h.scheduler.pre_draw(&mut h.context, &h.heaps, &h.presenter);
        h.scheduler.end_frame(&mut h.context, &mut h.presenter);
    }
}
