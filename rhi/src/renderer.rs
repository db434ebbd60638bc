//! The render backend facade.
//!
//! [`RenderBackend`] creates every component once at startup, in dependency
//! order, and owns them until shutdown:
//!
//! ```text
//! GpuInstance ─► GraphicsDevice ─► DeviceContext (executor + fence)
//!                      │
//!                      ├─► DescriptorHeapManager ─► SwapchainPresenter
//!                      │
//!                      └─► PipelineStateFactory (load time)
//!
//!                          FrameScheduler (every frame)
//! ```
//!
//! It is passed around by reference; nothing here is global.
//!
//! # Example
//!
//! ```ignore
//! let instance = create_instance(&InstanceParameters::new(BackendType::Vulkan))?;
//! let surface = SurfaceHandle::from_window(&window)?;
//! let mut backend = RenderBackend::new(instance.as_ref(), &surface, RendererConfig::default());
//!
//! let sprite = backend.create_pso(
//!     &presets::screen_space_sprite(vs, ps),
//!     &RootSignatureBuilder::new().with_label("sprite"),
//! )?;
//!
//! loop {
//!     backend.begin_frame();
//!     let recorder = backend.pre_draw();
//!     recorder.set_pipeline(&sprite);
//!     recorder.draw(3, 1, 0, 0);
//!     backend.post_draw();
//!     backend.end_frame();
//! }
//! ```

use std::sync::Arc;

use crate::backend::GpuInstance;
use crate::command::CommandRecorder;
use crate::config::RendererConfig;
use crate::context::DeviceContext;
use crate::descriptor::{DescriptorHeapManager, DescriptorSlot};
use crate::device::GraphicsDevice;
use crate::error::{GraphicsError, OrFatal};
use crate::pipeline::{PipelineBinding, PipelineStateFactory, PsoDescriptor};
use crate::root_signature::RootSignatureBuilder;
use crate::scheduler::{FrameScheduler, FrameState};
use crate::shader::ShaderCompiler;
use crate::swapchain::{SurfaceHandle, SwapchainPresenter};
use crate::types::DescriptorHeapType;

/// Every rendering component, created together.
pub struct RenderBackend {
    config: RendererConfig,
    context: DeviceContext,
    heaps: DescriptorHeapManager,
    presenter: SwapchainPresenter,
    scheduler: FrameScheduler,
    factory: PipelineStateFactory,
}

impl std::fmt::Debug for RenderBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderBackend")
            .field("device", self.context.device())
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl RenderBackend {
    /// Bring up the device, heaps, swapchain and frame machinery.
    ///
    /// # Panics
    ///
    /// Any startup failure is fatal: an invalid configuration, no usable
    /// adapter, or a failure creating the queue, heaps or swapchain.
    pub fn new(
        instance: &dyn GpuInstance,
        surface: &SurfaceHandle,
        config: RendererConfig,
    ) -> Self {
        crate::profile_scope!("render_backend_init");
        config.validate().or_fatal("renderer configuration");

        let device = GraphicsDevice::initialize(instance, &config);
        let mut heaps = DescriptorHeapManager::new(&device, &config);
        let context = DeviceContext::new(device.clone(), &config);
        let presenter =
            SwapchainPresenter::new(&device, context.executor(), &mut heaps, surface, &config);
        let scheduler = FrameScheduler::new(&config);
        let factory = PipelineStateFactory::new(&device, ShaderCompiler::new(config.shader));

        log::info!(
            "Render backend ready on '{}' ({}, feature level {}, {} frames in flight)",
            device.adapter().name,
            device.backend_name(),
            device.feature_level(),
            config.frames_in_flight
        );

        Self {
            config,
            context,
            heaps,
            presenter,
            scheduler,
            factory,
        }
    }

    // ========================================================================
    // Frame loop
    // ========================================================================

    /// Start a frame.
    pub fn begin_frame(&mut self) -> FrameState {
        self.scheduler.begin_frame(&self.context, &self.presenter)
    }

    /// Prepare the back buffer and return the recorder for draw calls.
    pub fn pre_draw(&mut self) -> &mut CommandRecorder {
        self.scheduler
            .pre_draw(&mut self.context, &self.heaps, &self.presenter)
    }

    /// Return the back buffer to the presentable state.
    pub fn post_draw(&mut self) {
        self.scheduler.post_draw(&mut self.context, &self.presenter);
    }

    /// Submit, present and advance to the next frame slot.
    pub fn end_frame(&mut self) {
        self.scheduler
            .end_frame(&mut self.context, &mut self.presenter);
    }

    /// Block until all submitted frames have finished on the GPU.
    pub fn wait_idle(&mut self) {
        self.scheduler.wait_idle(&mut self.context);
    }

    // ========================================================================
    // Resources
    // ========================================================================

    /// Build a pipeline and its binding layout.
    ///
    /// See [`PipelineStateFactory::create_pso`].
    pub fn create_pso(
        &self,
        desc: &PsoDescriptor,
        root_signature: &RootSignatureBuilder,
    ) -> Result<Arc<PipelineBinding>, GraphicsError> {
        self.factory.create_pso(desc, root_signature).map(Arc::new)
    }

    /// Allocate one descriptor slot.
    pub fn allocate_descriptor(
        &mut self,
        heap_type: DescriptorHeapType,
    ) -> Result<DescriptorSlot, GraphicsError> {
        self.heaps.allocate(heap_type)
    }

    /// Return a descriptor slot to its heap.
    pub fn release_descriptor(&mut self, slot: &mut DescriptorSlot) -> Result<(), GraphicsError> {
        self.heaps.release_slot(slot)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Configuration the backend was created with.
    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// The device.
    pub fn device(&self) -> &GraphicsDevice {
        self.context.device()
    }

    /// The device context.
    pub fn context(&self) -> &DeviceContext {
        &self.context
    }

    /// The descriptor heaps.
    pub fn heaps(&self) -> &DescriptorHeapManager {
        &self.heaps
    }

    /// The swapchain presenter.
    pub fn presenter(&self) -> &SwapchainPresenter {
        &self.presenter
    }

    /// The frame scheduler.
    pub fn scheduler(&self) -> &FrameScheduler {
        &self.scheduler
    }

    /// The frame scheduler, mutably (clear color, default pipeline).
    pub fn scheduler_mut(&mut self) -> &mut FrameScheduler {
        &mut self.scheduler
    }

    /// The pipeline factory.
    pub fn factory(&self) -> &PipelineStateFactory {
        &self.factory
    }
}

impl Drop for RenderBackend {
    fn drop(&mut self) {
        if let Err(e) = self.context.device().wait_idle() {
            log::error!("Failed to wait for GPU idle before teardown: {e}");
        }
        self.presenter.release_descriptors(&mut self.heaps);
        log::debug!(
            "Render backend shut down after {} frames",
            self.scheduler.frame_count()
        );
    }
}
