// In-memory backend and host used by the frame loop tests.
//
// The backend models each slot's fence and which image a pending submission
// renders to, and panics on any ordering violation a real device would turn
// into undefined behavior.

use anyhow::{bail, Result};
use ash::vk;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use super::{AcquireOutcome, FrameBackend, PresentOutcome, SurfaceHost};
use crate::backend::swapchain::{SurfaceSupport, SwapchainSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    WaitFence(usize),
    Acquire { slot: usize, image: u32 },
    AcquireOutOfDate(usize),
    Prepare(u32),
    ResetFence(usize),
    Submit { slot: usize, image: u32 },
    Present { slot: usize, image: u32 },
    WaitIdle,
    DestroyTargets,
    CreateTargets(u32, u32),
    HostWait,
}

/// Event log shared between the mock backend and host.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Rc<RefCell<Vec<Event>>>);

impl EventLog {
    pub fn push(&self, event: Event) {
        self.0.borrow_mut().push(event);
    }

    pub fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.0.borrow_mut())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FenceState {
    Signaled,
    Unsignaled,
    Pending,
}

#[derive(Debug, Clone, Copy)]
pub struct MockFramebuffer {
    pub generation: u64,
    pub extent: vk::Extent2D,
}

/// Everything one rebuild produces, tagged with the generation it belongs to.
#[derive(Debug)]
pub struct MockGeneration {
    pub id: u64,
    pub extent: vk::Extent2D,
    pub image_count: usize,
    pub framebuffers: Vec<MockFramebuffer>,
    pub command_buffers: usize,
    pub sync_slots: usize,
}

pub struct MockBackend {
    log: EventLog,
    support: SurfaceSupport,
    generation: Option<MockGeneration>,
    generations_built: u64,
    fences: Vec<FenceState>,
    /// Whether the slot's fence was observed signaled since its last submission
    fence_observed: Vec<bool>,
    /// Image rendered by each slot's pending submission
    in_flight: Vec<Option<u32>>,
    next_image: u32,
    acquire_script: VecDeque<AcquireOutcome>,
    present_script: VecDeque<PresentOutcome>,
    fail_next_create: bool,
    fail_next_acquire: bool,
    fail_next_submit: bool,
    fail_next_present: bool,
}

impl MockBackend {
    /// A backend whose surface yields `image_count` images per generation.
    pub fn new(image_count: u32) -> (Self, EventLog) {
        let log = EventLog::default();
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: image_count.saturating_sub(1),
            max_image_count: 0,
            current_extent: vk::Extent2D { width: u32::MAX, height: u32::MAX },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D { width: 4096, height: 4096 },
            ..Default::default()
        };
        let support = SurfaceSupport {
            capabilities,
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        };

        let backend = Self {
            log: log.clone(),
            support,
            generation: None,
            generations_built: 0,
            fences: Vec::new(),
            fence_observed: Vec::new(),
            in_flight: Vec::new(),
            next_image: 0,
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            fail_next_create: false,
            fail_next_acquire: false,
            fail_next_submit: false,
            fail_next_present: false,
        };
        (backend, log)
    }

    pub fn generation(&self) -> Option<&MockGeneration> {
        self.generation.as_ref()
    }

    /// Images per generation become `min_image_count + 1` from the next build.
    pub fn set_min_image_count(&mut self, min_image_count: u32) {
        self.support.capabilities.min_image_count = min_image_count;
    }

    pub fn script_acquire(&mut self, outcome: AcquireOutcome) {
        self.acquire_script.push_back(outcome);
    }

    pub fn script_present(&mut self, outcome: PresentOutcome) {
        self.present_script.push_back(outcome);
    }

    pub fn fail_next_create(&mut self) {
        self.fail_next_create = true;
    }

    pub fn fail_next_acquire(&mut self) {
        self.fail_next_acquire = true;
    }

    pub fn fail_next_submit(&mut self) {
        self.fail_next_submit = true;
    }

    pub fn fail_next_present(&mut self) {
        self.fail_next_present = true;
    }

    fn assert_image_idle(&self, image: u32, action: &str) {
        for (slot, pending) in self.in_flight.iter().enumerate() {
            if *pending == Some(image) && self.fences[slot] == FenceState::Pending {
                panic!("{} image {} while slot {} still renders to it", action, image, slot);
            }
        }
    }
}

impl FrameBackend for MockBackend {
    fn image_count(&self) -> usize {
        self.generation.as_ref().map_or(0, |g| g.image_count)
    }

    fn wait_for_fence(&mut self, slot: usize) -> Result<()> {
        self.log.push(Event::WaitFence(slot));
        match self.fences[slot] {
            FenceState::Unsignaled => panic!("slot {} waited on a reset fence with nothing submitted", slot),
            FenceState::Pending | FenceState::Signaled => {
                self.fences[slot] = FenceState::Signaled;
                self.in_flight[slot] = None;
                self.fence_observed[slot] = true;
            }
        }
        Ok(())
    }

    fn acquire_next_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
        if std::mem::take(&mut self.fail_next_acquire) {
            bail!("surface lost");
        }
        let outcome = self.acquire_script.pop_front().unwrap_or_else(|| {
            let image_index = self.next_image % self.image_count() as u32;
            self.next_image += 1;
            AcquireOutcome::Acquired { image_index, suboptimal: false }
        });

        match outcome {
            AcquireOutcome::Acquired { image_index, .. } => {
                self.log.push(Event::Acquire { slot, image: image_index })
            }
            AcquireOutcome::OutOfDate => self.log.push(Event::AcquireOutOfDate(slot)),
        }
        Ok(outcome)
    }

    fn prepare_image(&mut self, image_index: u32) -> Result<()> {
        self.assert_image_idle(image_index, "overwrote uniforms of");
        self.log.push(Event::Prepare(image_index));
        Ok(())
    }

    fn reset_fence(&mut self, slot: usize) -> Result<()> {
        assert!(
            self.fence_observed[slot],
            "slot {} reset before its previous submission was observed complete",
            slot
        );
        self.log.push(Event::ResetFence(slot));
        self.fences[slot] = FenceState::Unsignaled;
        Ok(())
    }

    fn submit(&mut self, slot: usize, image_index: u32) -> Result<()> {
        assert_eq!(self.fences[slot], FenceState::Unsignaled, "submitted with a signaled fence");
        if std::mem::take(&mut self.fail_next_submit) {
            bail!("device lost");
        }
        self.assert_image_idle(image_index, "resubmitted");
        self.log.push(Event::Submit { slot, image: image_index });
        self.fences[slot] = FenceState::Pending;
        self.in_flight[slot] = Some(image_index);
        self.fence_observed[slot] = false;
        Ok(())
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
        if std::mem::take(&mut self.fail_next_present) {
            bail!("device lost");
        }
        self.log.push(Event::Present { slot, image: image_index });
        Ok(self.present_script.pop_front().unwrap_or(PresentOutcome::Presented))
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.log.push(Event::WaitIdle);
        for (slot, fence) in self.fences.iter_mut().enumerate() {
            if *fence == FenceState::Pending {
                *fence = FenceState::Signaled;
                self.in_flight[slot] = None;
            }
        }
        Ok(())
    }

    fn destroy_targets(&mut self) {
        self.log.push(Event::DestroyTargets);
        assert!(
            !self.fences.contains(&FenceState::Pending),
            "destroyed targets with GPU work in flight"
        );
        self.generation = None;
        self.fences.clear();
        self.fence_observed.clear();
        self.in_flight.clear();
    }

    fn create_targets(&mut self, framebuffer_size: vk::Extent2D) -> Result<()> {
        self.log.push(Event::CreateTargets(framebuffer_size.width, framebuffer_size.height));
        if std::mem::take(&mut self.fail_next_create) {
            bail!("out of device memory");
        }

        let settings =
            SwapchainSettings::resolve(&self.support, framebuffer_size, vk::PresentModeKHR::MAILBOX)?;
        let image_count = settings.min_image_count as usize;

        self.generations_built += 1;
        let id = self.generations_built;
        self.generation = Some(MockGeneration {
            id,
            extent: settings.extent,
            image_count,
            framebuffers: vec![MockFramebuffer { generation: id, extent: settings.extent }; image_count],
            command_buffers: image_count,
            sync_slots: image_count,
        });

        // Fences start signaled so the first wait on each slot returns at once
        self.fences = vec![FenceState::Signaled; image_count];
        self.fence_observed = vec![true; image_count];
        self.in_flight = vec![None; image_count];
        self.next_image = 0;
        Ok(())
    }
}

pub struct MockHost {
    log: EventLog,
    size: vk::Extent2D,
    queued_sizes: VecDeque<vk::Extent2D>,
    resize_requested: bool,
    close_after_waits: Option<usize>,
    wait_calls: usize,
}

impl MockHost {
    pub fn new(size: vk::Extent2D) -> Self {
        Self::with_log(size, EventLog::default())
    }

    pub fn with_log(size: vk::Extent2D, log: EventLog) -> Self {
        Self {
            log,
            size,
            queued_sizes: VecDeque::new(),
            resize_requested: false,
            close_after_waits: None,
            wait_calls: 0,
        }
    }

    /// Sizes reported after each successive `wait_events`.
    pub fn queue_sizes(&mut self, sizes: &[vk::Extent2D]) {
        self.queued_sizes.extend(sizes.iter().copied());
    }

    pub fn set_size(&mut self, size: vk::Extent2D) {
        self.size = size;
    }

    pub fn request_resize(&mut self) {
        self.resize_requested = true;
    }

    pub fn close_after_waits(&mut self, waits: usize) {
        self.close_after_waits = Some(waits);
    }

    pub fn wait_calls(&self) -> usize {
        self.wait_calls
    }
}

impl SurfaceHost for MockHost {
    fn framebuffer_size(&self) -> vk::Extent2D {
        self.size
    }

    fn wait_events(&mut self) {
        self.log.push(Event::HostWait);
        self.wait_calls += 1;
        if let Some(size) = self.queued_sizes.pop_front() {
            self.size = size;
        }
    }

    fn take_resize_request(&mut self) -> bool {
        std::mem::take(&mut self.resize_requested)
    }

    fn should_close(&self) -> bool {
        self.close_after_waits.is_some_and(|waits| self.wait_calls >= waits)
    }
}
