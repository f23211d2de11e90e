// Frame synchronizer
//
// One call to `render_frame` runs one full cycle:
//
//   WAIT_PREV -> ACQUIRE -> SUBMIT -> PRESENT -> ADVANCE
//
// Slots pipeline CPU work against GPU work. The slot count always equals
// the current swapchain image count, and the slot index resets to 0 after
// every rebuild.

use anyhow::{bail, Context, Result};

use super::{rebuild, AcquireOutcome, FrameBackend, SurfaceHost};

/// What happened to the frame that was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// The frame was submitted and queued for presentation.
    Presented,
    /// Nothing was submitted: the chain was stale or the window is closing.
    Skipped,
}

#[derive(Debug, Default)]
pub struct FrameSynchronizer {
    slot: usize,
    /// Slot whose fence guards the latest submission rendering to each image
    images_in_flight: Vec<Option<usize>>,
    rebuild_requested: bool,
    frames_presented: u64,
}

impl FrameSynchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot the next frame will use.
    #[cfg(test)]
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    /// Rebuild after the next presentation, e.g. when shaders changed on disk.
    pub fn request_rebuild(&mut self) {
        self.rebuild_requested = true;
    }

    /// Render and present one frame.
    ///
    /// Staleness is handled here by rebuilding and never escapes as an
    /// error. The first call builds the initial generation.
    pub fn render_frame<B, H>(&mut self, backend: &mut B, host: &mut H) -> Result<FrameStatus>
    where
        B: FrameBackend,
        H: SurfaceHost,
    {
        if backend.image_count() == 0 && !self.rebuild(backend, host)? {
            return Ok(FrameStatus::Skipped);
        }
        let image_count = backend.image_count();

        // ─────────────────────────────────────────────────────────────────────
        // WAIT_PREV: the GPU must be done with this slot's last submission
        // ─────────────────────────────────────────────────────────────────────
        backend
            .wait_for_fence(self.slot)
            .with_context(|| format!("Failed to wait for frame slot {}", self.slot))?;

        // ─────────────────────────────────────────────────────────────────────
        // ACQUIRE
        // ─────────────────────────────────────────────────────────────────────
        let (image_index, suboptimal) = match backend
            .acquire_next_image(self.slot)
            .context("Failed to acquire swapchain image")?
        {
            AcquireOutcome::Acquired { image_index, suboptimal } => (image_index, suboptimal),
            AcquireOutcome::OutOfDate => {
                log::debug!("Swapchain out of date on acquire, rebuilding");
                self.rebuild(backend, host)?;
                return Ok(FrameStatus::Skipped);
            }
        };

        let image = image_index as usize;
        if image >= self.images_in_flight.len() {
            bail!("Acquired image {} but the chain has {} images", image_index, image_count);
        }

        // A different slot may still be rendering into this image
        if let Some(owner) = self.images_in_flight[image] {
            if owner != self.slot {
                backend
                    .wait_for_fence(owner)
                    .with_context(|| format!("Failed to wait for image {} in flight", image_index))?;
            }
        }
        self.images_in_flight[image] = Some(self.slot);

        backend
            .prepare_image(image_index)
            .with_context(|| format!("Failed to update frame data for image {}", image_index))?;

        // ─────────────────────────────────────────────────────────────────────
        // SUBMIT
        // ─────────────────────────────────────────────────────────────────────
        backend.reset_fence(self.slot)?;
        backend
            .submit(self.slot, image_index)
            .context("Failed to submit draw command buffer")?;

        // ─────────────────────────────────────────────────────────────────────
        // PRESENT
        // ─────────────────────────────────────────────────────────────────────
        let presented = backend
            .present(self.slot, image_index)
            .context("Failed to present swapchain image")?;
        let resized = host.take_resize_request();
        let requested = std::mem::take(&mut self.rebuild_requested);

        // ─────────────────────────────────────────────────────────────────────
        // ADVANCE
        // ─────────────────────────────────────────────────────────────────────
        self.slot = (self.slot + 1) % image_count;
        self.frames_presented += 1;

        if suboptimal || presented.is_stale() || resized || requested {
            log::debug!(
                "Rebuild after present (suboptimal acquire: {}, present: {:?}, resized: {}, requested: {})",
                suboptimal,
                presented,
                resized,
                requested
            );
            self.rebuild(backend, host)?;
        }

        Ok(FrameStatus::Presented)
    }

    fn rebuild<B: FrameBackend, H: SurfaceHost>(&mut self, backend: &mut B, host: &mut H) -> Result<bool> {
        let rebuilt = rebuild::rebuild(backend, host)?;
        if rebuilt {
            self.slot = 0;
            self.images_in_flight = vec![None; backend.image_count()];
        }
        Ok(rebuilt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::mock::{Event, MockBackend, MockHost};
    use crate::frame::PresentOutcome;
    use ash::vk;

    fn window() -> vk::Extent2D {
        vk::Extent2D { width: 800, height: 600 }
    }

    /// Backend and synchronizer with the initial generation already built
    fn started(image_count: u32) -> (MockBackend, MockHost, FrameSynchronizer, crate::frame::mock::EventLog) {
        let (mut backend, log) = MockBackend::new(image_count);
        let mut host = MockHost::with_log(window(), log.clone());
        let mut sync = FrameSynchronizer::new();
        assert!(sync.rebuild(&mut backend, &mut host).unwrap());
        log.take();
        (backend, host, sync, log)
    }

    fn submissions(events: &[Event]) -> Vec<(usize, u32)> {
        events
            .iter()
            .filter_map(|e| match *e {
                Event::Submit { slot, image } => Some((slot, image)),
                _ => None,
            })
            .collect()
    }

    fn rebuilt(events: &[Event]) -> bool {
        events.contains(&Event::DestroyTargets)
    }

    // ========================================================================
    // Steady state
    // ========================================================================

    #[test]
    fn test_first_frame_builds_targets() {
        let (mut backend, log) = MockBackend::new(3);
        let mut host = MockHost::with_log(window(), log.clone());
        let mut sync = FrameSynchronizer::new();

        assert_eq!(sync.render_frame(&mut backend, &mut host).unwrap(), FrameStatus::Presented);
        assert_eq!(
            log.take(),
            vec![
                Event::WaitIdle,
                Event::DestroyTargets,
                Event::CreateTargets(800, 600),
                Event::WaitFence(0),
                Event::Acquire { slot: 0, image: 0 },
                Event::Prepare(0),
                Event::ResetFence(0),
                Event::Submit { slot: 0, image: 0 },
                Event::Present { slot: 0, image: 0 },
            ]
        );
    }

    #[test]
    fn test_five_frames_over_three_images() {
        let (mut backend, mut host, mut sync, log) = started(3);

        for _ in 0..5 {
            assert_eq!(sync.render_frame(&mut backend, &mut host).unwrap(), FrameStatus::Presented);
        }

        let events = log.take();
        let slots: Vec<usize> = submissions(&events).iter().map(|&(slot, _)| slot).collect();
        assert_eq!(slots, vec![0, 1, 2, 0, 1]);

        // Every reuse of a slot waits on its fence before resetting it
        for slot in 0..3 {
            let waits = events.iter().filter(|e| **e == Event::WaitFence(slot)).count();
            let resets = events.iter().filter(|e| **e == Event::ResetFence(slot)).count();
            assert_eq!(waits, resets);
        }
        let wait_pos = events.iter().rposition(|e| *e == Event::WaitFence(0)).unwrap();
        let reset_pos = events.iter().rposition(|e| *e == Event::ResetFence(0)).unwrap();
        assert!(wait_pos < reset_pos);

        assert_eq!(sync.slot(), 2);
        assert_eq!(sync.frames_presented(), 5);
        assert!(!rebuilt(&events));
    }

    #[test]
    fn test_slot_tracks_frame_count_modulo_images() {
        let (mut backend, mut host, mut sync, _log) = started(4);
        for k in 1..=10 {
            sync.render_frame(&mut backend, &mut host).unwrap();
            assert_eq!(sync.slot(), k % 4);
        }
    }

    #[test]
    fn test_submits_acquired_image_not_slot() {
        let (mut backend, mut host, mut sync, log) = started(3);
        backend.script_acquire(AcquireOutcome::Acquired { image_index: 2, suboptimal: false });
        backend.script_acquire(AcquireOutcome::Acquired { image_index: 0, suboptimal: false });

        sync.render_frame(&mut backend, &mut host).unwrap();
        sync.render_frame(&mut backend, &mut host).unwrap();

        assert_eq!(submissions(&log.take()), vec![(0, 2), (1, 0)]);
    }

    #[test]
    fn test_waits_for_slot_still_rendering_acquired_image() {
        let (mut backend, mut host, mut sync, log) = started(3);
        backend.script_acquire(AcquireOutcome::Acquired { image_index: 1, suboptimal: false });
        backend.script_acquire(AcquireOutcome::Acquired { image_index: 1, suboptimal: false });

        sync.render_frame(&mut backend, &mut host).unwrap();
        log.take();
        sync.render_frame(&mut backend, &mut host).unwrap();

        assert_eq!(
            log.take()[..4],
            [
                Event::WaitFence(1),
                Event::Acquire { slot: 1, image: 1 },
                Event::WaitFence(0),
                Event::Prepare(1),
            ]
        );
    }

    // ========================================================================
    // Staleness
    // ========================================================================

    #[test]
    fn test_out_of_date_acquire_skips_frame_and_rebuilds() {
        let (mut backend, mut host, mut sync, log) = started(3);
        sync.render_frame(&mut backend, &mut host).unwrap();
        log.take();

        backend.script_acquire(AcquireOutcome::OutOfDate);
        assert_eq!(sync.render_frame(&mut backend, &mut host).unwrap(), FrameStatus::Skipped);

        assert_eq!(
            log.take(),
            vec![
                Event::WaitFence(1),
                Event::AcquireOutOfDate(1),
                Event::WaitIdle,
                Event::DestroyTargets,
                Event::CreateTargets(800, 600),
            ]
        );
        assert_eq!(sync.slot(), 0);
        assert_eq!(sync.frames_presented(), 1);
    }

    #[test]
    fn test_suboptimal_acquire_presents_then_rebuilds() {
        let (mut backend, mut host, mut sync, log) = started(3);
        backend.script_acquire(AcquireOutcome::Acquired { image_index: 0, suboptimal: true });

        assert_eq!(sync.render_frame(&mut backend, &mut host).unwrap(), FrameStatus::Presented);

        let events = log.take();
        let present = events.iter().position(|e| matches!(e, Event::Present { .. })).unwrap();
        let idle = events.iter().position(|e| *e == Event::WaitIdle).unwrap();
        assert!(present < idle);
        assert_eq!(submissions(&events), vec![(0, 0)]);
        assert_eq!(sync.slot(), 0);
    }

    #[test]
    fn test_stale_present_rebuilds() {
        for outcome in [PresentOutcome::Suboptimal, PresentOutcome::OutOfDate] {
            let (mut backend, mut host, mut sync, log) = started(2);
            backend.script_present(outcome);

            assert_eq!(sync.render_frame(&mut backend, &mut host).unwrap(), FrameStatus::Presented);
            assert!(rebuilt(&log.take()), "{:?} should rebuild", outcome);
            assert_eq!(sync.slot(), 0);
        }
    }

    #[test]
    fn test_resize_notification_rebuilds_after_present() {
        let (mut backend, mut host, mut sync, log) = started(3);
        sync.render_frame(&mut backend, &mut host).unwrap();
        assert!(!rebuilt(&log.take()));

        host.request_resize();
        host.set_size(vk::Extent2D { width: 1920, height: 1080 });
        sync.render_frame(&mut backend, &mut host).unwrap();

        assert!(log.take().contains(&Event::CreateTargets(1920, 1080)));
        assert_eq!(backend.generation().unwrap().extent, vk::Extent2D { width: 1920, height: 1080 });
    }

    #[test]
    fn test_requested_rebuild_happens_once() {
        let (mut backend, mut host, mut sync, log) = started(3);
        sync.request_rebuild();

        sync.render_frame(&mut backend, &mut host).unwrap();
        assert!(rebuilt(&log.take()));

        sync.render_frame(&mut backend, &mut host).unwrap();
        assert!(!rebuilt(&log.take()));
    }

    #[test]
    fn test_index_cycling_across_image_count_change() {
        let (mut backend, mut host, mut sync, log) = started(3);
        for _ in 0..4 {
            sync.render_frame(&mut backend, &mut host).unwrap();
        }
        assert_eq!(sync.slot(), 1);

        // Next generation has two images
        backend.set_min_image_count(1);
        host.request_resize();
        sync.render_frame(&mut backend, &mut host).unwrap();
        assert_eq!(backend.image_count(), 2);
        assert_eq!(sync.slot(), 0);

        for k in 1..=5 {
            sync.render_frame(&mut backend, &mut host).unwrap();
            assert_eq!(sync.slot(), k % 2);
        }

        let slots: Vec<usize> = submissions(&log.take()).iter().map(|&(slot, _)| slot).collect();
        assert_eq!(slots, vec![0, 1, 2, 0, 1, 0, 1, 0, 1, 0]);
    }

    #[test]
    fn test_minimized_during_rebuild_pauses() {
        let (mut backend, mut host, mut sync, log) = started(3);
        host.request_resize();
        host.set_size(vk::Extent2D { width: 0, height: 0 });
        host.queue_sizes(&[
            vk::Extent2D { width: 0, height: 0 },
            vk::Extent2D { width: 0, height: 0 },
            vk::Extent2D { width: 400, height: 300 },
        ]);

        sync.render_frame(&mut backend, &mut host).unwrap();

        let events = log.take();
        let first_idle = events.iter().position(|e| *e == Event::WaitIdle).unwrap();
        let waits_before_idle = events[..first_idle].iter().filter(|e| **e == Event::HostWait).count();
        assert_eq!(waits_before_idle, 3);
        assert!(events.contains(&Event::CreateTargets(400, 300)));
    }

    // ========================================================================
    // Failures
    // ========================================================================

    #[test]
    fn test_hard_present_failure_is_fatal() {
        let (mut backend, mut host, mut sync, _log) = started(3);
        backend.fail_next_present();
        assert!(sync.render_frame(&mut backend, &mut host).is_err());
    }

    #[test]
    fn test_hard_acquire_failure_is_fatal() {
        let (mut backend, mut host, mut sync, log) = started(3);
        backend.fail_next_acquire();

        assert!(sync.render_frame(&mut backend, &mut host).is_err());
        let events = log.take();
        assert!(submissions(&events).is_empty());
        assert!(!rebuilt(&events));
    }

    #[test]
    fn test_hard_submit_failure_is_fatal_and_skips_present() {
        let (mut backend, mut host, mut sync, log) = started(3);
        backend.fail_next_submit();

        assert!(sync.render_frame(&mut backend, &mut host).is_err());
        let events = log.take();
        assert!(!events.iter().any(|e| matches!(e, Event::Present { .. })));
        assert!(!rebuilt(&events));
        assert_eq!(sync.frames_presented(), 0);
    }

    #[test]
    fn test_close_during_initial_pause_skips() {
        let (mut backend, log) = MockBackend::new(3);
        let mut host = MockHost::with_log(vk::Extent2D { width: 0, height: 0 }, log.clone());
        host.close_after_waits(1);
        let mut sync = FrameSynchronizer::new();

        assert_eq!(sync.render_frame(&mut backend, &mut host).unwrap(), FrameStatus::Skipped);
        assert_eq!(log.take(), vec![Event::HostWait]);
        assert_eq!(backend.image_count(), 0);
    }
}
