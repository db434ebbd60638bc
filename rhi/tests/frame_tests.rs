//! Frame loop behavior of [`RenderBackend`] on the dummy GPU.

mod common;

use rstest::rstest;

use common::{TestBackend, test_config};
use redlilium_rhi::backend::dummy::RecordedCommand;
use redlilium_rhi::{FramePhase, ResourceState};

#[rstest]
#[case::single_buffered(1)]
#[case::double_buffered(2)]
#[case::triple_buffered(3)]
fn test_fence_advances_by_one_per_frame(#[case] frames_in_flight: usize) {
    let mut t = TestBackend::new(test_config().with_frames_in_flight(frames_in_flight));

    for frame in 1..=6u64 {
        t.run_frame(1);
        assert_eq!(t.backend.scheduler().fence_value(), frame);
        assert_eq!(t.backend.scheduler().frame_count(), frame);
    }
    assert_eq!(t.controller.submissions(), 6);
    assert_eq!(t.controller.presents(), 6);
}

#[test]
fn test_end_frame_never_blocks_when_gpu_caught_up() {
    let mut t = TestBackend::new(test_config());

    for _ in 0..8 {
        t.run_frame(2);
        assert!(!t.backend.scheduler().last_frame_blocked());
    }
    assert_eq!(t.controller.fence_waits(), 0);
}

#[test]
fn test_end_frame_blocks_when_slot_still_in_flight() {
    let mut t = TestBackend::new(test_config().with_frames_in_flight(2));
    t.controller.set_manual_completion(true);

    // Both slots are fresh: neither frame waits.
    t.run_frame(1);
    assert!(!t.backend.scheduler().last_frame_blocked());

    // The second frame wraps back to slot 0, whose fence is still pending.
    let gpu = t.controller.complete_on_wait(1);
    t.run_frame(1);
    gpu.join().unwrap();

    assert!(t.backend.scheduler().last_frame_blocked());
    assert_eq!(t.controller.fence_waits(), 1);
    assert_eq!(t.backend.scheduler().fence_value(), 2);
}

#[test]
fn test_empty_frame_leaves_back_buffer_presentable() {
    let mut t = TestBackend::new(test_config());

    let frame = t.backend.begin_frame();
    t.backend.pre_draw();
    assert_eq!(t.backend.scheduler().back_buffer_state(), ResourceState::RenderTarget);
    t.backend.post_draw();
    assert_eq!(t.backend.scheduler().back_buffer_state(), ResourceState::Present);
    t.backend.end_frame();

    let back_buffer = t.backend.presenter().back_buffer(frame.back_buffer_index);
    assert_eq!(
        t.controller.resource_state(back_buffer),
        Some(ResourceState::Present)
    );
    assert!(t.controller.validation_errors().is_empty());
}

#[test]
fn test_frame_records_transitions_and_clears_in_order() {
    let mut t = TestBackend::new(test_config());
    t.controller.clear_executed_commands();

    t.run_frame(1);

    let commands = t.controller.executed_commands();
    let barriers: Vec<_> = commands
        .iter()
        .filter_map(|command| match command {
            RecordedCommand::Barrier { before, after, .. } => Some((*before, *after)),
            _ => None,
        })
        .collect();
    assert_eq!(
        barriers,
        vec![
            (ResourceState::Present, ResourceState::RenderTarget),
            (ResourceState::DepthWrite, ResourceState::DepthWrite),
            (ResourceState::RenderTarget, ResourceState::Present),
        ]
    );

    let position = |predicate: fn(&RecordedCommand) -> bool| {
        commands.iter().position(predicate).unwrap()
    };
    let targets = position(|c| matches!(c, RecordedCommand::SetRenderTargets { .. }));
    let clear = position(|c| matches!(c, RecordedCommand::ClearRenderTarget { .. }));
    let depth = position(|c| matches!(c, RecordedCommand::ClearDepthStencil { .. }));
    let draw = position(|c| matches!(c, RecordedCommand::Draw { .. }));
    assert!(targets < clear && clear < depth && depth < draw);
    assert!(t.controller.validation_errors().is_empty());
}

#[test]
fn test_back_buffers_rotate() {
    let mut t = TestBackend::new(test_config().with_buffer_count(3));

    let mut indices = Vec::new();
    for _ in 0..6 {
        let frame = t.backend.begin_frame();
        indices.push(frame.back_buffer_index);
        t.backend.pre_draw();
        t.backend.post_draw();
        t.backend.end_frame();
    }
    assert_eq!(indices, vec![0, 1, 2, 0, 1, 2]);
}

#[test]
fn test_frame_state_reports_slot_and_index() {
    let mut t = TestBackend::new(test_config().with_frames_in_flight(2));

    for expected in 0..4u64 {
        let frame = t.backend.begin_frame();
        assert_eq!(frame.frame_index, expected);
        assert_eq!(frame.frame_slot, (expected % 2) as usize);
        assert_eq!(t.backend.scheduler().phase(), FramePhase::Recording);
        t.backend.pre_draw();
        t.backend.post_draw();
        t.backend.end_frame();
        assert_eq!(t.backend.scheduler().phase(), FramePhase::Idle);
    }
}

#[test]
fn test_wait_idle_drains_outstanding_work() {
    let mut t = TestBackend::new(test_config());
    t.controller.set_manual_completion(true);

    t.run_frame(1);
    let gpu = t.controller.complete_on_wait(1);
    t.backend.wait_idle();
    gpu.join().unwrap();

    let fence = t.backend.scheduler().fence_value();
    assert_eq!(fence, 2);
    assert!(t.backend.context().fence().is_complete(fence));
}

#[test]
#[should_panic(expected = "pre_draw called in phase")]
fn test_pre_draw_outside_frame_panics() {
    let mut t = TestBackend::new(test_config());
    t.backend.pre_draw();
}
