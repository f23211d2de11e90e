// Rebuild orchestration
//
// Recreates every size-dependent resource after the surface stops matching
// the current chain. A zero-sized (minimized) window pauses here until the
// platform reports a usable size again.

use anyhow::{Context, Result};
use ash::vk;

use super::{is_zero_sized, FrameBackend, SurfaceHost};

/// Block on platform events until the drawable has a non-zero size.
///
/// Returns `None` when shutdown is requested while paused.
pub fn wait_for_drawable_size<H: SurfaceHost>(host: &mut H) -> Option<vk::Extent2D> {
    let mut size = host.framebuffer_size();
    if !is_zero_sized(size) {
        return Some(size);
    }

    log::info!("Window minimized, pausing rendering");
    while is_zero_sized(size) {
        if host.should_close() {
            log::info!("Shutdown requested while paused");
            return None;
        }
        host.wait_events();
        size = host.framebuffer_size();
    }
    log::info!("Window restored to {}x{}, resuming", size.width, size.height);

    Some(size)
}

/// Tear down and rebuild the current generation.
///
/// Returns `Ok(false)` if the rebuild was abandoned because the window is
/// closing, in which case no GPU resource has been touched. Any failure
/// after the pause is fatal and leaves the backend without targets.
pub fn rebuild<B: FrameBackend, H: SurfaceHost>(backend: &mut B, host: &mut H) -> Result<bool> {
    let Some(size) = wait_for_drawable_size(host) else {
        return Ok(false);
    };

    log::info!("Rebuilding render targets for {}x{}", size.width, size.height);

    backend.wait_idle().context("Failed to wait for device idle before rebuild")?;
    backend.destroy_targets();
    backend
        .create_targets(size)
        .context("Failed to recreate render targets")?;

    // The new generation already reflects any resize that arrived meanwhile
    host.take_resize_request();

    log::info!("Rebuild complete: {} images", backend.image_count());
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::mock::{Event, MockBackend, MockHost};

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    // ========================================================================
    // Pause
    // ========================================================================

    #[test]
    fn test_pause_holds_until_size_is_nonzero() {
        let (mut backend, log) = MockBackend::new(3);
        let mut host = MockHost::with_log(extent(0, 0), log.clone());
        host.queue_sizes(&[extent(0, 0), extent(0, 0), extent(640, 480)]);

        assert!(rebuild(&mut backend, &mut host).unwrap());

        assert_eq!(
            log.take(),
            vec![
                Event::HostWait,
                Event::HostWait,
                Event::HostWait,
                Event::WaitIdle,
                Event::DestroyTargets,
                Event::CreateTargets(640, 480),
            ]
        );
    }

    #[test]
    fn test_pause_with_partially_zero_size() {
        let (mut backend, log) = MockBackend::new(3);
        let mut host = MockHost::with_log(extent(800, 0), log.clone());
        host.queue_sizes(&[extent(0, 600), extent(800, 600)]);

        assert!(rebuild(&mut backend, &mut host).unwrap());
        assert_eq!(host.wait_calls(), 2);
        assert_eq!(backend.generation().unwrap().extent, extent(800, 600));
    }

    #[test]
    fn test_no_pause_when_size_is_usable() {
        let (mut backend, log) = MockBackend::new(2);
        let mut host = MockHost::with_log(extent(1024, 768), log.clone());

        assert!(rebuild(&mut backend, &mut host).unwrap());
        assert_eq!(host.wait_calls(), 0);
        assert_eq!(
            log.take(),
            vec![Event::WaitIdle, Event::DestroyTargets, Event::CreateTargets(1024, 768)]
        );
    }

    #[test]
    fn test_close_while_paused_abandons_rebuild() {
        let (mut backend, log) = MockBackend::new(3);
        let mut host = MockHost::with_log(extent(0, 0), log.clone());
        host.queue_sizes(&[extent(0, 0)]);
        host.close_after_waits(1);

        assert!(!rebuild(&mut backend, &mut host).unwrap());
        assert_eq!(log.take(), vec![Event::HostWait]);
        assert!(backend.generation().is_none());
    }

    // ========================================================================
    // Ordering and atomicity
    // ========================================================================

    #[test]
    fn test_rebuild_consumes_resize_request() {
        let (mut backend, _log) = MockBackend::new(3);
        let mut host = MockHost::new(extent(800, 600));
        host.request_resize();

        rebuild(&mut backend, &mut host).unwrap();
        assert!(!host.take_resize_request());
    }

    #[test]
    fn test_rebuilt_generation_is_consistent() {
        let (mut backend, _log) = MockBackend::new(3);
        let mut host = MockHost::new(extent(800, 600));
        rebuild(&mut backend, &mut host).unwrap();
        let first_id = backend.generation().unwrap().id;

        backend.set_min_image_count(3);
        host.set_size(extent(1280, 720));
        rebuild(&mut backend, &mut host).unwrap();

        let generation = backend.generation().unwrap();
        assert_ne!(generation.id, first_id);
        assert_eq!(generation.extent, extent(1280, 720));
        assert_eq!(generation.image_count, 4);
        assert_eq!(generation.framebuffers.len(), 4);
        assert!(generation.framebuffers.iter().all(|fb| fb.extent == generation.extent));
        assert!(generation.framebuffers.iter().all(|fb| fb.generation == generation.id));
        assert_eq!(generation.command_buffers, generation.image_count);
        assert_eq!(generation.sync_slots, generation.image_count);
    }

    #[test]
    fn test_create_failure_is_fatal() {
        let (mut backend, _log) = MockBackend::new(3);
        let mut host = MockHost::new(extent(800, 600));
        backend.fail_next_create();

        assert!(rebuild(&mut backend, &mut host).is_err());
        assert!(backend.generation().is_none());
    }
}
