//! Swapchain and presentation.
//!
//! This module provides:
//!
//! - [`SurfaceHandle`] - the platform window the swapchain presents to
//! - [`SwapchainDescriptor`] - surface format, size and buffer count
//! - [`SwapchainPresenter`] - the back buffers, their render-target views and
//!   the depth target that goes with them
//!
//! The surface is created once at startup. Resizing is not supported: an
//! outdated surface is reported as a fatal present failure.
//!
//! # Example
//!
//! ```ignore
//! let surface = SurfaceHandle::from_window(&window)?;
//! let mut presenter =
//!     SwapchainPresenter::new(&device, context.executor(), &mut heaps, &surface, &config);
//!
//! // In render loop:
//! let index = presenter.acquire_current_index();
//! // ... record into presenter.back_buffer(index) via presenter.rtv(index) ...
//! presenter.present(context.executor().queue(), config.sync_interval);
//! ```

use std::sync::Arc;

use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};

use crate::backend::{CpuDescriptorHandle, GpuDevice, GpuQueue, GpuResource, GpuSwapchain};
use crate::command::CommandExecutor;
use crate::config::RendererConfig;
use crate::descriptor::{DescriptorHeapManager, DescriptorSlot};
use crate::device::GraphicsDevice;
use crate::error::{GraphicsError, OrFatal};
use crate::types::{DescriptorHeapType, Extent2d, TextureDescriptor, TextureFormat};

/// Raw window and display handles of the window being presented to.
///
/// The window must outlive every swapchain created from this handle.
#[derive(Debug, Clone, Copy)]
pub struct SurfaceHandle {
    window: RawWindowHandle,
    display: RawDisplayHandle,
}

impl SurfaceHandle {
    /// Capture the handles of a windowing-library window.
    pub fn from_window<W>(window: &W) -> Result<Self, GraphicsError>
    where
        W: HasWindowHandle + HasDisplayHandle + ?Sized,
    {
        let window_handle = window.window_handle().map_err(|e| {
            GraphicsError::InitializationFailed(format!("window handle unavailable: {e}"))
        })?;
        let display_handle = window.display_handle().map_err(|e| {
            GraphicsError::InitializationFailed(format!("display handle unavailable: {e}"))
        })?;
        Ok(Self {
            window: window_handle.as_raw(),
            display: display_handle.as_raw(),
        })
    }

    /// Wrap raw handles directly.
    ///
    /// # Safety
    ///
    /// Both handles must refer to live platform objects for as long as any
    /// swapchain created from them exists.
    pub unsafe fn from_raw(window: RawWindowHandle, display: RawDisplayHandle) -> Self {
        Self { window, display }
    }

    /// Raw window handle.
    pub fn window(&self) -> RawWindowHandle {
        self.window
    }

    /// Raw display handle.
    pub fn display(&self) -> RawDisplayHandle {
        self.display
    }
}

/// Swapchain configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainDescriptor {
    /// Size of the back buffers.
    pub extent: Extent2d,
    /// Number of back buffers.
    pub buffer_count: u32,
    /// Storage format of the back buffers.
    pub format: TextureFormat,
    /// Format render-target views are created with.
    pub view_format: TextureFormat,
}

impl SwapchainDescriptor {
    /// Build from renderer configuration.
    pub fn from_config(config: &RendererConfig) -> Self {
        Self {
            extent: Extent2d::new(config.width, config.height),
            buffer_count: config.buffer_count,
            format: config.surface_format,
            view_format: config.render_target_format,
        }
    }
}

/// Presentable surface, its back buffers and the matching depth target.
pub struct SwapchainPresenter {
    device: Arc<dyn GpuDevice>,
    swapchain: GpuSwapchain,
    descriptor: SwapchainDescriptor,
    back_buffers: Vec<GpuResource>,
    rtvs: Vec<DescriptorSlot>,
    depth_target: GpuResource,
    dsv: DescriptorSlot,
    present_count: u64,
}

impl std::fmt::Debug for SwapchainPresenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwapchainPresenter")
            .field("swapchain", &self.swapchain)
            .field("descriptor", &self.descriptor)
            .field("present_count", &self.present_count)
            .finish_non_exhaustive()
    }
}

impl SwapchainPresenter {
    /// Create the swapchain, one render-target view per back buffer, and the
    /// depth target with its view.
    ///
    /// # Panics
    ///
    /// Every failure here happens at startup and is fatal.
    pub fn new(
        device: &GraphicsDevice,
        executor: &CommandExecutor,
        heaps: &mut DescriptorHeapManager,
        surface: &SurfaceHandle,
        config: &RendererConfig,
    ) -> Self {
        let raw = device.raw().clone();
        let descriptor = SwapchainDescriptor::from_config(config);

        let swapchain = raw
            .create_swapchain(executor.queue(), surface, &descriptor)
            .or_fatal("swapchain creation");

        let mut back_buffers = Vec::with_capacity(descriptor.buffer_count as usize);
        let mut rtvs = Vec::with_capacity(descriptor.buffer_count as usize);
        for index in 0..descriptor.buffer_count {
            let buffer = raw
                .swapchain_buffer(&swapchain, index)
                .or_fatal("back buffer query");
            let slot = heaps
                .allocate(DescriptorHeapType::RenderTarget)
                .or_fatal("back buffer view allocation");
            raw.create_render_target_view(&buffer, descriptor.view_format, slot.cpu_handle)
                .or_fatal("back buffer view creation");
            back_buffers.push(buffer);
            rtvs.push(slot);
        }

        let depth_target = raw
            .create_depth_texture(
                &TextureDescriptor::new_2d(
                    descriptor.extent.width,
                    descriptor.extent.height,
                    config.depth_stencil_format,
                )
                .with_label("depth_stencil"),
            )
            .or_fatal("depth target creation");
        let dsv = heaps
            .allocate(DescriptorHeapType::DepthStencil)
            .or_fatal("depth view allocation");
        raw.create_depth_stencil_view(&depth_target, config.depth_stencil_format, dsv.cpu_handle)
            .or_fatal("depth view creation");

        log::info!(
            "Created swapchain: {}x{}, {} buffers, {:?} viewed as {:?}, depth {:?}",
            descriptor.extent.width,
            descriptor.extent.height,
            descriptor.buffer_count,
            descriptor.format,
            descriptor.view_format,
            config.depth_stencil_format
        );

        Self {
            device: raw,
            swapchain,
            descriptor,
            back_buffers,
            rtvs,
            depth_target,
            dsv,
            present_count: 0,
        }
    }

    /// Index of the back buffer writable this frame.
    pub fn acquire_current_index(&self) -> u32 {
        self.device.current_back_buffer_index(&self.swapchain)
    }

    /// Hand the current back buffer to the display.
    ///
    /// `sync_interval` 1 waits for vertical refresh.
    ///
    /// # Panics
    ///
    /// Present failure, including an outdated surface, is fatal.
    pub fn present(&mut self, queue: &GpuQueue, sync_interval: u32) {
        self.device
            .present(queue, &mut self.swapchain, sync_interval)
            .or_fatal("present");
        self.present_count += 1;
    }

    /// Number of back buffers.
    pub fn buffer_count(&self) -> u32 {
        self.descriptor.buffer_count
    }

    /// Back buffer `index`.
    pub fn back_buffer(&self, index: u32) -> &GpuResource {
        &self.back_buffers[index as usize]
    }

    /// Render-target view of back buffer `index`.
    pub fn rtv(&self, index: u32) -> CpuDescriptorHandle {
        self.rtvs[index as usize].cpu_handle
    }

    /// Depth target.
    pub fn depth_target(&self) -> &GpuResource {
        &self.depth_target
    }

    /// Depth-stencil view.
    pub fn dsv(&self) -> CpuDescriptorHandle {
        self.dsv.cpu_handle
    }

    /// Back buffer size.
    pub fn extent(&self) -> Extent2d {
        self.descriptor.extent
    }

    /// The configuration the swapchain was created with.
    pub fn descriptor(&self) -> &SwapchainDescriptor {
        &self.descriptor
    }

    /// Number of presents so far.
    pub fn present_count(&self) -> u64 {
        self.present_count
    }

    /// Return every view slot to `heaps`. Call once at teardown.
    pub fn release_descriptors(&mut self, heaps: &mut DescriptorHeapManager) {
        for slot in self.rtvs.iter_mut().chain(std::iter::once(&mut self.dsv)) {
            if slot.is_valid()
                && let Err(e) = heaps.release_slot(slot)
            {
                log::warn!("Failed to release swapchain view {}: {e}", slot.index);
            }
        }
    }
}
