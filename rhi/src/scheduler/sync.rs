//! CPU-GPU synchronization.
//!
//! The frame loop uses a single monotonic [`Fence`]: the queue writes an
//! ever-increasing value into it as work completes, and the CPU waits for a
//! value when it needs to reuse resources from an earlier frame.

use std::sync::Arc;

use crate::backend::{GpuDevice, GpuFence, GpuQueue};
use crate::device::GraphicsDevice;
use crate::error::OrFatal;

/// Monotonic GPU fence with a CPU-side target value.
///
/// # Example
///
/// ```ignore
/// let value = fence.signal(executor.queue());
///
/// // Later, before reusing that frame's resources:
/// if !fence.is_complete(value) {
///     fence.wait(value);
/// }
/// ```
pub struct Fence {
    device: Arc<dyn GpuDevice>,
    raw: GpuFence,
    value: u64,
}

impl std::fmt::Debug for Fence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fence")
            .field("raw", &self.raw)
            .field("value", &self.value)
            .finish()
    }
}

impl Fence {
    /// Create a fence at value 0.
    ///
    /// # Panics
    ///
    /// Fence creation failure is fatal.
    pub fn new(device: &GraphicsDevice) -> Self {
        let raw = device.raw().create_fence(0).or_fatal("fence creation");
        Self {
            device: device.raw().clone(),
            raw,
            value: 0,
        }
    }

    /// Last value handed to the queue.
    pub fn value(&self) -> u64 {
        self.value
    }

    /// Increment the target and have `queue` write it once prior work is done.
    ///
    /// Returns the new target.
    pub fn signal(&mut self, queue: &GpuQueue) -> u64 {
        self.value += 1;
        self.device
            .signal_fence(queue, &self.raw, self.value)
            .or_fatal("fence signal");
        log::trace!("Fence signaled {}", self.value);
        self.value
    }

    /// Last value the GPU has reached.
    pub fn completed_value(&self) -> u64 {
        self.device.fence_completed_value(&self.raw)
    }

    /// Whether the GPU has reached `value`.
    pub fn is_complete(&self, value: u64) -> bool {
        self.completed_value() >= value
    }

    /// Block until the GPU reaches `value`. No timeout.
    pub fn wait(&self, value: u64) {
        if self.is_complete(value) {
            return;
        }
        crate::profile_scope!("fence_wait");
        log::trace!(
            "Waiting for fence {value} (completed {})",
            self.completed_value()
        );
        self.device
            .wait_fence(&self.raw, value)
            .or_fatal("fence wait");
    }

    /// Backend fence.
    pub fn raw(&self) -> &GpuFence {
        &self.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyInstance;
    use crate::config::RendererConfig;

    fn setup() -> (GraphicsDevice, GpuQueue, crate::backend::dummy::DummyController) {
        let instance = DummyInstance::new();
        let device = GraphicsDevice::initialize(&instance, &RendererConfig::default());
        let queue = device.raw().create_queue().unwrap();
        (device, queue, instance.controller())
    }

    #[test]
    fn test_signal_increments_by_one() {
        let (device, queue, _) = setup();
        let mut fence = Fence::new(&device);
        assert_eq!(fence.value(), 0);
        assert_eq!(fence.signal(&queue), 1);
        assert_eq!(fence.signal(&queue), 2);
        assert!(fence.is_complete(2));
    }

    #[test]
    fn test_wait_skips_completed_values() {
        let (device, queue, controller) = setup();
        let mut fence = Fence::new(&device);
        let value = fence.signal(&queue);
        fence.wait(value);
        assert_eq!(controller.fence_waits(), 0);
    }

    #[test]
    fn test_wait_blocks_until_gpu_catches_up() {
        let (device, queue, controller) = setup();
        controller.set_manual_completion(true);
        let mut fence = Fence::new(&device);
        let value = fence.signal(&queue);
        assert!(!fence.is_complete(value));

        let handle = controller.complete_on_wait(1);

        fence.wait(value);
        handle.join().unwrap();
        assert!(fence.is_complete(value));
        assert_eq!(controller.fence_waits(), 1);
    }
}
