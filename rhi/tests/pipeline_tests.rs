//! Pipeline and binding layout creation on the dummy device.

mod common;

use std::path::Path;
use std::sync::Arc;

use rstest::rstest;

use common::{TestBackend, test_config, write_sprite_shader};
use redlilium_rhi::backend::GpuPipeline;
use redlilium_rhi::backend::dummy::RecordedCommand;
use redlilium_rhi::types::{AddressMode, FilterMode};
use redlilium_rhi::{
    DescriptorRange, GraphicsError, PsoDescriptor, RootSignatureBuilder, ShaderRef,
    ShaderVisibility, StaticSampler, presets,
};

fn sprite_descriptor(shader: &Path) -> PsoDescriptor {
    presets::screen_space_sprite(
        ShaderRef::vertex(shader, "vs_main"),
        ShaderRef::pixel(shader, "ps_main"),
    )
}

#[allow(unreachable_patterns)]
fn pipeline_id(pipeline: &GpuPipeline) -> u64 {
    match pipeline {
        GpuPipeline::Dummy { id } => *id,
        _ => panic!("not a dummy pipeline"),
    }
}

fn sprite_root_signature() -> RootSignatureBuilder {
    RootSignatureBuilder::new()
        .with_label("sprite")
        .with_constant_buffer(0, ShaderVisibility::Vertex)
        .with_descriptor_table(&[DescriptorRange::srv(0, 1)], ShaderVisibility::Pixel)
        .with_static_sampler(StaticSampler::new(
            0,
            FilterMode::Linear,
            AddressMode::Clamp,
        ))
}

#[test]
fn test_sprite_pipeline_builds() {
    let dir = tempfile::tempdir().unwrap();
    let shader = write_sprite_shader(dir.path());
    let t = TestBackend::new(test_config());

    let binding = t
        .backend
        .create_pso(&sprite_descriptor(&shader), &sprite_root_signature())
        .unwrap();

    assert!(binding.is_valid());
    assert_eq!(binding.label(), "screen_space_sprite");
    assert_eq!(t.controller.root_signature_creations(), 1);
    assert_eq!(t.controller.pipeline_creations(), 1);
    assert_eq!(
        t.controller.pipeline_input_semantics(),
        vec![vec!["POSITION", "TEXCOORD", "COLOR"]]
    );
}

#[rstest]
#[case::overlapping_constant_buffers(
    RootSignatureBuilder::new()
        .with_constant_buffer(0, ShaderVisibility::All)
        .with_constant_buffer(0, ShaderVisibility::All)
)]
#[case::empty_table(
    RootSignatureBuilder::new().with_descriptor_table(&[], ShaderVisibility::Pixel)
)]
#[case::zero_count_range(
    RootSignatureBuilder::new()
        .with_descriptor_table(&[DescriptorRange::srv(0, 0)], ShaderVisibility::Pixel)
)]
#[case::duplicate_sampler(
    RootSignatureBuilder::new()
        .with_static_sampler(StaticSampler::new(1, FilterMode::Nearest, AddressMode::Wrap))
        .with_static_sampler(StaticSampler::new(1, FilterMode::Linear, AddressMode::Wrap))
)]
fn test_failing_layout_makes_no_pipeline_call(#[case] root_signature: RootSignatureBuilder) {
    // The shader file is never written: a layout failure must return before
    // shader compilation would load it.
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.wgsl");
    let t = TestBackend::new(test_config());

    let result = t
        .backend
        .create_pso(&sprite_descriptor(&missing), &root_signature);

    assert!(matches!(result, Err(GraphicsError::RootSignature(_))));
    assert_eq!(t.controller.root_signature_creations(), 0);
    assert_eq!(t.controller.pipeline_creations(), 0);
}

#[test]
fn test_device_rejecting_layout_makes_no_pipeline_call() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.wgsl");
    let t = TestBackend::new(test_config());
    t.controller.set_fail_root_signature_creation(true);

    let result = t
        .backend
        .create_pso(&sprite_descriptor(&missing), &sprite_root_signature());

    assert!(matches!(result, Err(GraphicsError::RootSignature(_))));
    assert_eq!(t.controller.root_signature_creations(), 1);
    assert_eq!(t.controller.pipeline_creations(), 0);
}

#[test]
fn test_same_configuration_twice_yields_independent_bindings() {
    let dir = tempfile::tempdir().unwrap();
    let shader = write_sprite_shader(dir.path());
    let t = TestBackend::new(test_config());
    let desc = sprite_descriptor(&shader);
    let root_signature = sprite_root_signature();

    let first = t.backend.create_pso(&desc, &root_signature).unwrap();
    let second = t.backend.create_pso(&desc, &root_signature).unwrap();

    assert!(!Arc::ptr_eq(&first, &second));
    assert!(!Arc::ptr_eq(first.layout(), second.layout()));
    assert_ne!(pipeline_id(first.pipeline()), pipeline_id(second.pipeline()));
    assert_eq!(t.controller.root_signature_creations(), 2);
    assert_eq!(t.controller.pipeline_creations(), 2);

    let semantics = t.controller.pipeline_input_semantics();
    assert_eq!(semantics.len(), 2);
    assert_eq!(semantics[0], semantics[1]);

    // Dropping one leaves the other usable.
    drop(first);
    assert!(second.is_valid());
}

#[test]
fn test_device_rejection_is_returned() {
    let dir = tempfile::tempdir().unwrap();
    let shader = write_sprite_shader(dir.path());
    let t = TestBackend::new(test_config());
    t.controller.set_fail_pipeline_creation(true);

    let result = t
        .backend
        .create_pso(&sprite_descriptor(&shader), &sprite_root_signature());

    assert!(matches!(result, Err(GraphicsError::PipelineCreationFailed(_))));
    assert_eq!(t.controller.pipeline_creations(), 1);

    t.controller.set_fail_pipeline_creation(false);
    assert!(
        t.backend
            .create_pso(&sprite_descriptor(&shader), &sprite_root_signature())
            .is_ok()
    );
}

#[test]
#[should_panic(expected = "fatal graphics error")]
fn test_missing_shader_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let t = TestBackend::new(test_config());

    let _ = t.backend.create_pso(
        &sprite_descriptor(&dir.path().join("missing.wgsl")),
        &sprite_root_signature(),
    );
}

#[test]
#[should_panic(expected = "fatal graphics error")]
fn test_unknown_entry_point_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let shader = write_sprite_shader(dir.path());
    let t = TestBackend::new(test_config());

    let desc = presets::screen_space_sprite(
        ShaderRef::vertex(&shader, "vs_missing"),
        ShaderRef::pixel(&shader, "ps_main"),
    );
    let _ = t.backend.create_pso(&desc, &sprite_root_signature());
}

#[test]
fn test_default_pipeline_is_bound_every_frame() {
    let dir = tempfile::tempdir().unwrap();
    let shader = write_sprite_shader(dir.path());
    let mut t = TestBackend::new(test_config());

    let binding = t
        .backend
        .create_pso(&sprite_descriptor(&shader), &sprite_root_signature())
        .unwrap();
    t.backend.scheduler_mut().set_default_pipeline(Some(binding));
    t.controller.clear_executed_commands();

    t.run_frame(1);
    t.run_frame(1);

    let pipelines = t
        .controller
        .executed_commands()
        .iter()
        .filter(|command| matches!(command, RecordedCommand::SetPipeline { .. }))
        .count();
    assert_eq!(pipelines, 2);
    assert!(t.controller.validation_errors().is_empty());
}
