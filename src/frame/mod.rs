// Frame loop - acquire/submit/present state machine and rebuild orchestration
//
// Nothing in here touches Vulkan directly. The state machine drives a
// `FrameBackend` (the GPU side) and a `SurfaceHost` (the window side), which
// keeps the ordering rules testable without a device.

pub mod rebuild;
pub mod synchronizer;

#[cfg(test)]
mod mock;

pub use synchronizer::{FrameStatus, FrameSynchronizer};

use anyhow::Result;
use ash::vk;

/// Result of asking the presentation engine for the next image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image is available. `suboptimal` still renders this frame but
    /// schedules a rebuild after presentation.
    Acquired { image_index: u32, suboptimal: bool },
    /// The chain no longer matches the surface. Nothing was signaled.
    OutOfDate,
}

/// Result of queueing an image for presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

impl PresentOutcome {
    pub fn is_stale(self) -> bool {
        !matches!(self, PresentOutcome::Presented)
    }
}

/// GPU side of the frame loop.
///
/// `slot` always indexes the per-slot sync primitives (fence, "image
/// available", "render finished"); `image_index` always indexes per-image
/// resources (command buffer, framebuffer, uniform data). The two are never
/// interchangeable even though both ranges equal `image_count()`.
///
/// Hard failures are returned as errors. Staleness is reported through the
/// outcome enums and never as an error.
pub trait FrameBackend {
    /// Image count of the current generation, 0 before the first build.
    fn image_count(&self) -> usize;

    /// Block until the slot's fence is signaled.
    fn wait_for_fence(&mut self, slot: usize) -> Result<()>;

    /// Acquire the next image, signaling the slot's "image available" semaphore.
    fn acquire_next_image(&mut self, slot: usize) -> Result<AcquireOutcome>;

    /// Copy the current frame's data into the resources bound for `image_index`.
    fn prepare_image(&mut self, image_index: u32) -> Result<()>;

    fn reset_fence(&mut self, slot: usize) -> Result<()>;

    /// Submit the command buffer of `image_index`, waiting on the slot's
    /// "image available" and signaling its "render finished" and fence.
    fn submit(&mut self, slot: usize, image_index: u32) -> Result<()>;

    /// Present `image_index` after the slot's "render finished" semaphore.
    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome>;

    /// Block until the device has no work in flight.
    fn wait_idle(&mut self) -> Result<()>;

    /// Release every size-dependent resource in reverse dependency order.
    fn destroy_targets(&mut self);

    /// Build a new generation of size-dependent resources in forward order.
    fn create_targets(&mut self, framebuffer_size: vk::Extent2D) -> Result<()>;
}

/// Window side of the frame loop.
pub trait SurfaceHost {
    /// Current drawable size in physical pixels.
    fn framebuffer_size(&self) -> vk::Extent2D;

    /// Block until at least one platform event has been processed.
    fn wait_events(&mut self);

    /// Return and clear the pending resize notification.
    fn take_resize_request(&mut self) -> bool;

    fn should_close(&self) -> bool;
}

pub(crate) fn is_zero_sized(extent: vk::Extent2D) -> bool {
    extent.width == 0 || extent.height == 0
}
