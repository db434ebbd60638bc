//! Adapter selection and device bring-up.

mod common;

use rstest::rstest;

use common::{dummy_surface, init_logging, software_only_instance, test_config};
use redlilium_rhi::backend::dummy::DummyInstance;
use redlilium_rhi::{AdapterType, FeatureLevel, GraphicsDevice, GraphicsError, RenderBackend};

#[test]
fn test_software_only_is_not_suitable() {
    init_logging();
    let instance = software_only_instance();

    let result = GraphicsDevice::try_initialize(&instance);

    assert!(matches!(result, Err(GraphicsError::NoSuitableAdapter(_))));
    // Software adapters are filtered before any device is attempted.
    assert!(instance.controller().device_attempts().is_empty());
}

#[test]
#[should_panic(expected = "fatal graphics error")]
fn test_software_only_is_fatal_for_device() {
    init_logging();
    GraphicsDevice::initialize(&software_only_instance(), &test_config());
}

#[test]
#[should_panic(expected = "fatal graphics error")]
fn test_software_only_is_fatal_for_backend() {
    init_logging();
    RenderBackend::new(&software_only_instance(), &dummy_surface(), test_config());
}

#[test]
#[should_panic(expected = "fatal graphics error")]
fn test_invalid_configuration_is_fatal() {
    init_logging();
    GraphicsDevice::initialize(&DummyInstance::new(), &test_config().with_buffer_count(1));
}

#[rstest]
#[case::discrete_beats_integrated(
    vec![
        ("Integrated", AdapterType::Integrated, FeatureLevel::V1_3),
        ("Discrete", AdapterType::Discrete, FeatureLevel::V1_3),
    ],
    "Discrete",
    FeatureLevel::V1_3
)]
#[case::software_skipped(
    vec![
        ("Software", AdapterType::Software, FeatureLevel::V1_3),
        ("Integrated", AdapterType::Integrated, FeatureLevel::V1_2),
    ],
    "Integrated",
    FeatureLevel::V1_2
)]
#[case::first_of_equals(
    vec![
        ("First", AdapterType::Discrete, FeatureLevel::V1_3),
        ("Second", AdapterType::Discrete, FeatureLevel::V1_3),
    ],
    "First",
    FeatureLevel::V1_3
)]
fn test_adapter_preference(
    #[case] adapters: Vec<(&str, AdapterType, FeatureLevel)>,
    #[case] expected_name: &str,
    #[case] expected_level: FeatureLevel,
) {
    init_logging();
    let instance = DummyInstance::with_adapters(
        adapters
            .into_iter()
            .map(|(name, kind, level)| DummyInstance::adapter(name, kind, level))
            .collect(),
    );

    let device = GraphicsDevice::try_initialize(&instance).unwrap();

    assert_eq!(device.adapter().name, expected_name);
    assert_eq!(device.feature_level(), expected_level);
    assert_eq!(device.backend_name(), "Dummy");
}

#[test]
fn test_newest_feature_level_is_tried_first() {
    init_logging();
    let instance = DummyInstance::with_adapters(vec![DummyInstance::adapter(
        "Older",
        AdapterType::Discrete,
        FeatureLevel::V1_2,
    )]);

    let device = GraphicsDevice::try_initialize(&instance).unwrap();

    assert_eq!(device.feature_level(), FeatureLevel::V1_2);
    // The 1.3 attempt is skipped because the adapter does not report it.
    assert_eq!(
        instance.controller().device_attempts(),
        vec![("Older".to_string(), FeatureLevel::V1_2)]
    );
}

#[test]
fn test_rejected_level_falls_back_to_next() {
    init_logging();
    let instance = DummyInstance::with_adapters(vec![DummyInstance::adapter(
        "Picky",
        AdapterType::Discrete,
        FeatureLevel::V1_3,
    )]);
    let controller = instance.controller();
    controller.set_fail_device_at(Some(FeatureLevel::V1_3));

    let device = GraphicsDevice::try_initialize(&instance).unwrap();

    assert_eq!(device.adapter().name, "Picky");
    assert_eq!(device.feature_level(), FeatureLevel::V1_2);
    assert_eq!(
        controller.device_attempts(),
        vec![
            ("Picky".to_string(), FeatureLevel::V1_3),
            ("Picky".to_string(), FeatureLevel::V1_2),
        ]
    );
}

#[test]
fn test_backend_comes_up_on_dummy() {
    init_logging();
    let instance = DummyInstance::new();
    let backend = RenderBackend::new(&instance, &dummy_surface(), test_config());

    assert_eq!(backend.presenter().buffer_count(), 2);
    assert_eq!(backend.scheduler().frames_in_flight(), 2);
    assert_eq!(backend.scheduler().fence_value(), 0);
    assert_eq!(backend.device().adapter().name, "Dummy Adapter");
}
