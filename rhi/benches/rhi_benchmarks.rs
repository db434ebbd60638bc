use criterion::{Criterion, black_box, criterion_group, criterion_main};

use raw_window_handle::{RawDisplayHandle, RawWindowHandle, WebDisplayHandle, WebWindowHandle};
use redlilium_rhi::backend::dummy::DummyInstance;
use redlilium_rhi::{
    DescriptorHeapType, DescriptorRange, RenderBackend, RendererConfig, RootSignatureBuilder,
    ShaderCompiler, ShaderVisibility, SurfaceHandle,
};

const SPRITE_WGSL: &str = r#"
@vertex
fn vs_main(@location(0) position: vec2<f32>) -> @builtin(position) vec4<f32> {
    return vec4<f32>(position, 0.0, 1.0);
}

@fragment
fn ps_main() -> @location(0) vec4<f32> {
    return vec4<f32>(1.0, 0.0, 1.0, 1.0);
}
"#;

fn backend(config: RendererConfig) -> RenderBackend {
    // SAFETY: the dummy backend never dereferences surface handles.
    let surface = unsafe {
        SurfaceHandle::from_raw(
            RawWindowHandle::Web(WebWindowHandle::new(1)),
            RawDisplayHandle::Web(WebDisplayHandle::new()),
        )
    };
    RenderBackend::new(&DummyInstance::new(), &surface, config)
}

// ---------------------------------------------------------------------------
// Descriptor heaps
// ---------------------------------------------------------------------------

fn bench_descriptor_churn(c: &mut Criterion) {
    let mut backend = backend(RendererConfig::default().with_heap_capacities(16, 4, 1024));
    c.bench_function("descriptor_allocate_release_64", |b| {
        b.iter(|| {
            let mut slots = Vec::with_capacity(64);
            for _ in 0..64 {
                slots.push(
                    backend
                        .allocate_descriptor(DescriptorHeapType::ShaderVisible)
                        .unwrap(),
                );
            }
            for slot in slots.iter_mut().rev() {
                backend.release_descriptor(slot).unwrap();
            }
            black_box(&slots);
        });
    });
}

// ---------------------------------------------------------------------------
// Frame loop
// ---------------------------------------------------------------------------

fn bench_frame_loop(c: &mut Criterion) {
    let mut backend = backend(RendererConfig::default().with_size(1280, 720));
    c.bench_function("dummy_frame_16_draws", |b| {
        b.iter(|| {
            black_box(backend.begin_frame());
            let recorder = backend.pre_draw();
            for _ in 0..16 {
                recorder.draw(6, 1, 0, 0);
            }
            backend.post_draw();
            backend.end_frame();
        });
    });
}

// ---------------------------------------------------------------------------
// Pipeline construction
// ---------------------------------------------------------------------------

fn bench_root_signature_serialize(c: &mut Criterion) {
    let builder = RootSignatureBuilder::new()
        .with_constant_buffer(0, ShaderVisibility::All)
        .with_constant_buffer(1, ShaderVisibility::Vertex)
        .with_descriptor_table(
            &[DescriptorRange::srv(0, 8), DescriptorRange::cbv(2, 2)],
            ShaderVisibility::Pixel,
        );
    c.bench_function("root_signature_serialize", |b| {
        b.iter(|| black_box(builder.serialize().unwrap()));
    });
}

fn bench_shader_compile(c: &mut Criterion) {
    let compiler = ShaderCompiler::default();
    c.bench_function("shader_compile_vertex", |b| {
        b.iter(|| {
            black_box(
                compiler
                    .compile_source(SPRITE_WGSL, "bench.wgsl", "vs_main", "vs_6_0")
                    .unwrap(),
            )
        });
    });
}

criterion_group!(
    benches,
    bench_descriptor_churn,
    bench_frame_loop,
    bench_root_signature_serialize,
    bench_shader_compile,
);
criterion_main!(benches);
