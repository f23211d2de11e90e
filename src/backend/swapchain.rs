// Swapchain - Window presentation
//
// The chain of images we render to and present, plus the per-image
// multisample color and depth attachments that live and die with it.
// Format, present mode, extent and image count are chosen by pure functions
// over a `SurfaceSupport` snapshot.

use anyhow::{bail, Context, Result};
use ash::vk;
use std::sync::Arc;

use super::attachment::{AttachmentFormats, AttachmentViews};
use super::command::CommandPool;
use super::image::{self, Image, ImageDesc};
use super::VulkanDevice;
use crate::frame::{AcquireOutcome, PresentOutcome};

pub const PREFERRED_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_SRGB,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// What the surface currently allows.
#[derive(Debug, Clone, Default)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

/// Prefer sRGB BGRA. A lone UNDEFINED entry means the surface has no
/// preference, so the preferred pair is used.
pub fn choose_surface_format(available: &[vk::SurfaceFormatKHR]) -> Result<vk::SurfaceFormatKHR> {
    match available {
        [] => bail!("Surface reports no supported formats"),
        [only] if only.format == vk::Format::UNDEFINED => Ok(PREFERRED_SURFACE_FORMAT),
        formats => Ok(formats
            .iter()
            .copied()
            .find(|f| {
                f.format == PREFERRED_SURFACE_FORMAT.format
                    && f.color_space == PREFERRED_SURFACE_FORMAT.color_space
            })
            .unwrap_or(formats[0])),
    }
}

/// The preferred mode when offered, otherwise FIFO, which every surface supports.
pub fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if available.contains(&preferred) {
        preferred
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Use the surface's extent unless it leaves the choice to us (width
/// u32::MAX), in which case the framebuffer size is clamped to the limits.
pub fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, framebuffer_size: vk::Extent2D) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    let min = capabilities.min_image_extent;
    let max = capabilities.max_image_extent;
    vk::Extent2D {
        width: framebuffer_size.width.min(max.width).max(min.width),
        height: framebuffer_size.height.min(max.height).max(min.height),
    }
}

/// One more than the minimum, capped by the maximum (0 means no cap).
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        desired.min(capabilities.max_image_count)
    } else {
        desired
    }
}

/// Parameters for one swapchain generation.
#[derive(Debug, Clone, Copy)]
pub struct SwapchainSettings {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub min_image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

impl SwapchainSettings {
    pub fn resolve(
        support: &SurfaceSupport,
        framebuffer_size: vk::Extent2D,
        preferred_present_mode: vk::PresentModeKHR,
    ) -> Result<Self> {
        let extent = choose_extent(&support.capabilities, framebuffer_size);
        if extent.width == 0 || extent.height == 0 {
            bail!(
                "Surface extent is {}x{} for a {}x{} framebuffer",
                extent.width,
                extent.height,
                framebuffer_size.width,
                framebuffer_size.height
            );
        }

        Ok(Self {
            surface_format: choose_surface_format(&support.formats)?,
            present_mode: choose_present_mode(&support.present_modes, preferred_present_mode),
            extent,
            min_image_count: choose_image_count(&support.capabilities),
            pre_transform: support.capabilities.current_transform,
        })
    }
}

/// Maps `vkAcquireNextImageKHR` results: out-of-date is control flow,
/// anything else that is not a success is fatal.
pub fn acquire_outcome(result: ash::prelude::VkResult<(u32, bool)>) -> Result<AcquireOutcome> {
    match result {
        Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired {
            image_index,
            suboptimal,
        }),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
        Err(e) => Err(e).context("Failed to acquire swapchain image"),
    }
}

pub fn present_outcome(result: ash::prelude::VkResult<bool>) -> Result<PresentOutcome> {
    match result {
        Ok(false) => Ok(PresentOutcome::Presented),
        Ok(true) => Ok(PresentOutcome::Suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
        Err(e) => Err(e).context("Failed to present swapchain image"),
    }
}

pub struct Swapchain {
    loader: ash::khr::swapchain::Device,
    handle: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    color_views: Vec<vk::ImageView>,
    multisample: Vec<Image>,
    depth: Vec<Image>,
    settings: SwapchainSettings,
    samples: vk::SampleCountFlags,
    depth_format: vk::Format,
    device: Arc<VulkanDevice>,
}

impl Swapchain {
    pub fn new(
        device: &Arc<VulkanDevice>,
        pool: &CommandPool,
        framebuffer_size: vk::Extent2D,
        preferred_present_mode: vk::PresentModeKHR,
    ) -> Result<Self> {
        let support = device.surface.support(device.physical_device)?;
        let settings = SwapchainSettings::resolve(&support, framebuffer_size, preferred_present_mode)?;

        log::info!(
            "Creating swapchain: {}x{}, {:?}, {:?}",
            settings.extent.width,
            settings.extent.height,
            settings.surface_format.format,
            settings.present_mode
        );

        let queue_families = [device.graphics_queue_family, device.present_queue_family];
        let mut create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(device.surface.handle)
            .min_image_count(settings.min_image_count)
            .image_format(settings.surface_format.format)
            .image_color_space(settings.surface_format.color_space)
            .image_extent(settings.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(settings.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(settings.present_mode)
            .clipped(true);

        create_info = if device.graphics_queue_family != device.present_queue_family {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&queue_families)
        } else {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        let loader = ash::khr::swapchain::Device::new(&device.instance, &device.device);
        let handle = unsafe { loader.create_swapchain(&create_info, None) }.context("Failed to create swapchain")?;

        let mut swapchain = Self {
            loader,
            handle,
            images: Vec::new(),
            color_views: Vec::new(),
            multisample: Vec::new(),
            depth: Vec::new(),
            settings,
            samples: device.msaa_samples,
            depth_format: device.depth_format,
            device: device.clone(),
        };

        swapchain.images = unsafe { swapchain.loader.get_swapchain_images(handle) }
            .context("Failed to get swapchain images")?;
        for &image in &swapchain.images {
            let view = image::create_view(&device.device, image, settings.surface_format.format)?;
            swapchain.color_views.push(view);
        }
        swapchain.create_attachments(pool)?;

        log::info!("Created swapchain with {} images", swapchain.images.len());
        Ok(swapchain)
    }

    /// Multisample color and depth images, one of each per swapchain image.
    fn create_attachments(&mut self, pool: &CommandPool) -> Result<()> {
        let extent = self.settings.extent;

        for _ in 0..self.images.len() {
            let multisample = Image::new(
                &self.device,
                &ImageDesc {
                    name: "msaa color",
                    extent,
                    format: self.settings.surface_format.format,
                    usage: vk::ImageUsageFlags::TRANSIENT_ATTACHMENT | vk::ImageUsageFlags::COLOR_ATTACHMENT,
                    samples: self.samples,
                },
            )?;
            multisample.transition_layout(
                pool,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            )?;
            self.multisample.push(multisample);

            let depth = Image::new(
                &self.device,
                &ImageDesc {
                    name: "depth",
                    extent,
                    format: self.depth_format,
                    usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                    samples: self.samples,
                },
            )?;
            depth.transition_layout(
                pool,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            )?;
            self.depth.push(depth);
        }

        Ok(())
    }

    /// One framebuffer per image, views ordered as the render pass expects.
    ///
    /// The caller owns the returned framebuffers.
    pub fn create_framebuffers(&self, render_pass: vk::RenderPass) -> Result<Vec<vk::Framebuffer>> {
        let mut framebuffers = Vec::with_capacity(self.images.len());

        for i in 0..self.images.len() {
            let views = AttachmentViews {
                resolved_color: self.color_views[i],
                multisample_color: self.multisample[i].view,
                depth: self.depth[i].view,
            }
            .ordered();

            let framebuffer_info = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass)
                .attachments(&views)
                .width(self.settings.extent.width)
                .height(self.settings.extent.height)
                .layers(1);

            match unsafe { self.device.device.create_framebuffer(&framebuffer_info, None) } {
                Ok(framebuffer) => framebuffers.push(framebuffer),
                Err(e) => {
                    for framebuffer in framebuffers {
                        unsafe { self.device.device.destroy_framebuffer(framebuffer, None) };
                    }
                    return Err(e).with_context(|| format!("Failed to create framebuffer {}", i));
                }
            }
        }

        Ok(framebuffers)
    }

    /// Acquire the next image, signaling `semaphore` when it is ready.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<AcquireOutcome> {
        let result = unsafe {
            self.loader
                .acquire_next_image(self.handle, u64::MAX, semaphore, vk::Fence::null())
        };

        acquire_outcome(result)
    }

    /// Queue `image_index` for presentation after `wait_semaphore`.
    pub fn present(&self, queue: vk::Queue, image_index: u32, wait_semaphore: vk::Semaphore) -> Result<PresentOutcome> {
        let wait_semaphores = [wait_semaphore];
        let swapchains = [self.handle];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        present_outcome(unsafe { self.loader.queue_present(queue, &present_info) })
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.settings.extent
    }

    pub fn attachment_formats(&self) -> AttachmentFormats {
        AttachmentFormats {
            color: self.settings.surface_format.format,
            depth: self.depth_format,
            samples: self.samples,
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        // Attachment images drop with their Vecs. Swapchain images belong to the platform.
        unsafe {
            for &view in &self.color_views {
                self.device.device.destroy_image_view(view, None);
            }
            self.loader.destroy_swapchain(self.handle, None);
        }
    }
}
