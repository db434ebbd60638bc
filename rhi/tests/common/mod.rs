//! Shared fixtures for the integration tests.
//!
//! Everything runs on the dummy backend, which simulates the GPU in-process
//! and exposes a [`DummyController`] for steering and inspecting it.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use raw_window_handle::{RawDisplayHandle, RawWindowHandle, WebDisplayHandle, WebWindowHandle};
use redlilium_rhi::backend::dummy::{DummyController, DummyInstance};
use redlilium_rhi::{AdapterType, FeatureLevel, RenderBackend, RendererConfig, SurfaceHandle};

/// Vertex and pixel entry points matching the sprite input layout.
pub const SPRITE_WGSL: &str = r#"
struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
    @location(1) color: vec4<f32>,
};

@vertex
fn vs_main(
    @location(0) position: vec2<f32>,
    @location(1) uv: vec2<f32>,
    @location(2) color: vec4<f32>,
) -> VertexOutput {
    var out: VertexOutput;
    out.position = vec4<f32>(position, 0.0, 1.0);
    out.uv = uv;
    out.color = color;
    return out;
}

@fragment
fn ps_main(in: VertexOutput) -> @location(0) vec4<f32> {
    return in.color;
}
"#;

/// Route `log` output through the test harness.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A surface handle the dummy backend accepts.
pub fn dummy_surface() -> SurfaceHandle {
    // SAFETY: the dummy backend never dereferences surface handles.
    unsafe {
        SurfaceHandle::from_raw(
            RawWindowHandle::Web(WebWindowHandle::new(1)),
            RawDisplayHandle::Web(WebDisplayHandle::new()),
        )
    }
}

/// Small configuration that keeps the tests fast.
pub fn test_config() -> RendererConfig {
    RendererConfig::default().with_size(320, 240)
}

/// A full render backend on a single discrete dummy adapter.
pub struct TestBackend {
    pub backend: RenderBackend,
    pub controller: DummyController,
}

impl TestBackend {
    pub fn new(config: RendererConfig) -> Self {
        init_logging();
        let instance = DummyInstance::new();
        let controller = instance.controller();
        let backend = RenderBackend::new(&instance, &dummy_surface(), config);
        Self {
            backend,
            controller,
        }
    }

    /// Run one frame with `draws` triangle draws.
    pub fn run_frame(&mut self, draws: u32) {
        self.backend.begin_frame();
        let recorder = self.backend.pre_draw();
        for _ in 0..draws {
            recorder.draw(3, 1, 0, 0);
        }
        self.backend.post_draw();
        self.backend.end_frame();
    }
}

/// An instance whose adapters are all software rasterizers.
pub fn software_only_instance() -> DummyInstance {
    DummyInstance::with_adapters(vec![
        DummyInstance::adapter("Software Rasterizer", AdapterType::Software, FeatureLevel::V1_3),
        DummyInstance::adapter("Reference Device", AdapterType::Software, FeatureLevel::V1_2),
    ])
}

/// Write the sprite shader into `dir` and return its path.
pub fn write_sprite_shader(dir: &Path) -> PathBuf {
    let path = dir.join("sprite.wgsl");
    std::fs::write(&path, SPRITE_WGSL).expect("failed to write test shader");
    path
}
