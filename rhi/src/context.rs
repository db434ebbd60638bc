//! Device context: the device plus the single submission path.

use crate::command::CommandExecutor;
use crate::config::RendererConfig;
use crate::device::GraphicsDevice;
use crate::scheduler::Fence;

/// Owns the device, the command executor and the frame fence.
///
/// One per [`RenderBackend`](crate::renderer::RenderBackend). Dropping it
/// waits for the GPU to finish all submitted work.
#[derive(Debug)]
pub struct DeviceContext {
    device: GraphicsDevice,
    executor: CommandExecutor,
    fence: Fence,
}

impl DeviceContext {
    /// Create the executor (one allocator per frame slot) and the fence.
    pub fn new(device: GraphicsDevice, config: &RendererConfig) -> Self {
        let executor = CommandExecutor::new(&device, config.frames_in_flight);
        let fence = Fence::new(&device);
        Self {
            device,
            executor,
            fence,
        }
    }

    /// The device.
    pub fn device(&self) -> &GraphicsDevice {
        &self.device
    }

    /// The command executor.
    pub fn executor(&self) -> &CommandExecutor {
        &self.executor
    }

    /// The command executor, mutably.
    pub fn executor_mut(&mut self) -> &mut CommandExecutor {
        &mut self.executor
    }

    /// The frame fence.
    pub fn fence(&self) -> &Fence {
        &self.fence
    }

    /// Executor and fence at once, for signalling after a submit.
    pub fn split_mut(&mut self) -> (&mut CommandExecutor, &mut Fence) {
        (&mut self.executor, &mut self.fence)
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            log::error!("Failed to wait for GPU idle on shutdown: {e}");
        }
    }
}
