//! Timeline semaphores backing frontend fences.

use std::sync::Arc;

use ash::vk;

use crate::error::GraphicsError;

use super::{VulkanShared, vk_error};

/// A monotonically increasing GPU counter.
pub struct VulkanTimeline {
    shared: Arc<VulkanShared>,
    semaphore: vk::Semaphore,
}

impl VulkanTimeline {
    pub(crate) fn new(
        shared: &Arc<VulkanShared>,
        initial_value: u64,
    ) -> Result<Self, GraphicsError> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(initial_value);
        let create_info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);

        let semaphore = unsafe { shared.device.create_semaphore(&create_info, None) }
            .map_err(vk_error("failed to create timeline semaphore"))?;

        Ok(Self {
            shared: shared.clone(),
            semaphore,
        })
    }

    /// Queue a signal of `value` behind all previously submitted work.
    pub(crate) fn signal(&self, value: u64) -> Result<(), GraphicsError> {
        let semaphores = [self.semaphore];
        let values = [value];
        let mut timeline_info =
            vk::TimelineSemaphoreSubmitInfo::default().signal_semaphore_values(&values);
        let submit = vk::SubmitInfo::default()
            .signal_semaphores(&semaphores)
            .push_next(&mut timeline_info);

        let queue = self.shared.queue.lock();
        unsafe {
            self.shared
                .device
                .queue_submit(*queue, &[submit], vk::Fence::null())
        }
        .map_err(vk_error("failed to signal timeline"))
    }

    /// Last value the GPU has reached.
    ///
    /// A query failure usually means the device is gone; it reads as zero
    /// so the caller blocks in `wait`, which reports the error.
    pub(crate) fn completed_value(&self) -> u64 {
        match unsafe { self.shared.device.get_semaphore_counter_value(self.semaphore) } {
            Ok(value) => value,
            Err(e) => {
                log::error!("Failed to query timeline value: {e:?}");
                0
            }
        }
    }

    /// Block until the counter reaches `value`.
    pub(crate) fn wait(&self, value: u64) -> Result<(), GraphicsError> {
        let semaphores = [self.semaphore];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);
        unsafe { self.shared.device.wait_semaphores(&wait_info, u64::MAX) }
            .map_err(vk_error("failed to wait on timeline"))
    }
}

impl Drop for VulkanTimeline {
    fn drop(&mut self) {
        unsafe { self.shared.device.destroy_semaphore(self.semaphore, None) };
    }
}
