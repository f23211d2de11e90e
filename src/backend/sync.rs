// Synchronization primitives
//
// Per frame slot: a fence the CPU waits on, and two semaphores ordering
// acquire -> render -> present on the GPU.

use anyhow::{Context, Result};
use ash::prelude::VkResult;
use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;

/// Frame synchronization - one per frame slot
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    pub fn new(device: &ash::Device) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        // Start signaled so the first wait on each slot returns immediately
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);

        Self::assemble(
            || unsafe { device.create_semaphore(&semaphore_info, None) },
            || unsafe { device.create_fence(&fence_info, None) },
            |semaphore| unsafe { device.destroy_semaphore(semaphore, None) },
        )
    }

    /// Creates the three objects in order. On failure, the semaphores
    /// already created are handed to `discard`.
    fn assemble<S, F, D>(mut create_semaphore: S, create_fence: F, mut discard: D) -> Result<Self>
    where
        S: FnMut() -> VkResult<vk::Semaphore>,
        F: FnOnce() -> VkResult<vk::Fence>,
        D: FnMut(vk::Semaphore),
    {
        let image_available = create_semaphore().context("Failed to create image-available semaphore")?;

        let render_finished = match create_semaphore() {
            Ok(semaphore) => semaphore,
            Err(e) => {
                discard(image_available);
                return Err(e).context("Failed to create render-finished semaphore");
            }
        };

        let in_flight_fence = match create_fence() {
            Ok(fence) => fence,
            Err(e) => {
                discard(render_finished);
                discard(image_available);
                return Err(e).context("Failed to create in-flight fence");
            }
        };

        Ok(Self {
            image_available,
            render_finished,
            in_flight_fence,
        })
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight_fence, None);
        }
    }
}

/// Sync objects for every slot of one swapchain generation.
pub struct FrameSyncSet {
    frames: Vec<FrameSync>,
    device: Arc<VulkanDevice>,
}

impl FrameSyncSet {
    pub fn new(device: &Arc<VulkanDevice>, count: usize) -> Result<Self> {
        let mut set = Self {
            frames: Vec::with_capacity(count),
            device: device.clone(),
        };
        for slot in 0..count {
            let frame = FrameSync::new(&device.device)
                .with_context(|| format!("Failed to create sync objects for slot {}", slot))?;
            set.frames.push(frame);
        }
        Ok(set)
    }

    pub fn frame(&self, slot: usize) -> Result<&FrameSync> {
        self.frames
            .get(slot)
            .with_context(|| format!("Frame slot {} out of range ({} slots)", slot, self.frames.len()))
    }

    /// Block until the slot's last submission has completed.
    pub fn wait(&self, slot: usize) -> Result<()> {
        let fence = self.frame(slot)?.in_flight_fence;
        unsafe { self.device.device.wait_for_fences(&[fence], true, u64::MAX) }?;
        Ok(())
    }

    pub fn reset(&self, slot: usize) -> Result<()> {
        let fence = self.frame(slot)?.in_flight_fence;
        unsafe { self.device.device.reset_fences(&[fence]) }?;
        Ok(())
    }
}

impl Drop for FrameSyncSet {
    fn drop(&mut self) {
        for frame in &self.frames {
            frame.destroy(&self.device.device);
        }
    }
}
