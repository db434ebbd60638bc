//! # Triangle Demo
//!
//! Opens a window, brings up the Vulkan backend on it and draws one
//! vertex-colored triangle per frame over the configured clear color.
//!
//! The triangle is generated from the vertex index, so the pipeline uses the
//! sprite preset with an empty input layout.

use std::path::PathBuf;
use std::sync::Arc;

use redlilium_rhi::backend::GpuInstance;
use redlilium_rhi::{
    BackendType, InstanceParameters, PipelineBinding, RenderBackend, RendererConfig,
    RootSignatureBuilder, ShaderRef, SurfaceHandle, ValidationConfig, create_instance, presets,
};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::window::{Window, WindowId};

const WINDOW_SIZE: (u32, u32) = (1280, 720);
const CLEAR_COLOR: [f32; 4] = [0.1, 0.1, 0.15, 1.0];

/// Rendering state, created once the window exists.
struct Renderer {
    backend: RenderBackend,
    // Keeps the instance alive for as long as the device.
    _instance: Arc<dyn GpuInstance>,
}

impl Renderer {
    fn new(window: &Window) -> Result<Self, redlilium_rhi::GraphicsError> {
        let surface = SurfaceHandle::from_window(window)?;
        let size = window.inner_size();

        let validation = ValidationConfig::default().with_enabled(cfg!(debug_assertions));
        let instance = create_instance(
            &InstanceParameters::new(BackendType::Vulkan)
                .with_validation(validation.clone())
                .with_display(surface.display()),
        )?;

        let config = RendererConfig::default()
            .with_size(size.width.max(1), size.height.max(1))
            .with_clear_color(CLEAR_COLOR)
            .with_validation(validation);
        let mut backend = RenderBackend::new(instance.as_ref(), &surface, config);

        let pipeline = create_triangle_pipeline(&backend)?;
        backend.scheduler_mut().set_default_pipeline(Some(pipeline));

        Ok(Self {
            backend,
            _instance: instance,
        })
    }

    fn render_frame(&mut self) {
        self.backend.begin_frame();
        self.backend.pre_draw().draw(3, 1, 0, 0);
        self.backend.post_draw();
        self.backend.end_frame();
    }
}

fn shader_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("shaders/triangle.wgsl")
}

fn create_triangle_pipeline(
    backend: &RenderBackend,
) -> Result<Arc<PipelineBinding>, redlilium_rhi::GraphicsError> {
    let shader = shader_path();
    let config = backend.config();
    let desc = presets::screen_space_sprite(
        ShaderRef::vertex(&shader, "vs_main"),
        ShaderRef::pixel(&shader, "ps_main"),
    )
    .with_label("triangle")
    .with_input_layout(Vec::new())
    .with_render_target_format(config.render_target_format)
    .with_depth_stencil_format(Some(config.depth_stencil_format));

    backend.create_pso(&desc, &RootSignatureBuilder::new().with_label("triangle"))
}

/// Main application state
#[derive(Default)]
struct App {
    // Dropped before the window it presents to.
    renderer: Option<Renderer>,
    window: Option<Window>,
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attributes = Window::default_attributes()
            .with_title("RedLilium RHI - Triangle")
            .with_inner_size(winit::dpi::PhysicalSize::new(WINDOW_SIZE.0, WINDOW_SIZE.1))
            .with_resizable(false);

        let window = match event_loop.create_window(window_attributes) {
            Ok(window) => window,
            Err(e) => {
                log::error!("Failed to create window: {e}");
                event_loop.exit();
                return;
            }
        };

        match Renderer::new(&window) {
            Ok(renderer) => {
                log::info!("Renderer ready");
                self.renderer = Some(renderer);
                window.request_redraw();
                self.window = Some(window);
            }
            Err(e) => {
                log::error!("Failed to set up renderer: {e}");
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, exiting...");
                if let Some(renderer) = &mut self.renderer {
                    renderer.backend.wait_idle();
                    log::info!(
                        "Rendered {} frames",
                        renderer.backend.scheduler().frame_count()
                    );
                }
                self.renderer = None;
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                // The swapchain keeps its creation size.
                log::debug!("Window resized to {}x{}", size.width, size.height);
            }
            WindowEvent::RedrawRequested => {
                if let Some(renderer) = &mut self.renderer {
                    renderer.render_frame();
                }
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Starting RedLilium RHI triangle demo");
    log::info!("RHI version: {}", redlilium_rhi::VERSION);

    let event_loop = EventLoop::new().expect("Failed to create event loop");
    let mut app = App::default();

    event_loop.run_app(&mut app).expect("Event loop error");
}
