// Vulkan frame backend
//
// Owns the size-independent resources (mesh buffers, texture, command pool)
// and at most one `SwapchainGeneration` of size-dependent ones. The frame
// synchronizer decides when a generation is torn down and rebuilt.

use anyhow::{Context, Result};
use ash::vk;
use glam::Mat4;
use std::sync::Arc;

use crate::backend::attachment;
use crate::backend::buffer::Buffer;
use crate::backend::command::{CommandBufferSet, CommandPool, DrawContext};
use crate::backend::descriptor::{FrameBindings, UniformParameter};
use crate::backend::pipeline::RenderTargetSet;
use crate::backend::shader::ShaderSet;
use crate::backend::sync::FrameSyncSet;
use crate::backend::texture::Texture;
use crate::backend::{Swapchain, VulkanDevice};
use crate::camera::Lens;
use crate::config::Config;
use crate::frame::{AcquireOutcome, FrameBackend, PresentOutcome};
use crate::model::{ObjectUniform, Vertex, VpMatrices, MESH_INDICES, MESH_VERTICES};

const VP_BINDING: u32 = 0;
const OBJECT_BINDING: u32 = 1;
const TEXTURE_BINDING: u32 = 2;

#[derive(Debug, Clone)]
pub struct RendererSettings {
    pub preferred_present_mode: vk::PresentModeKHR,
    pub clear_color: [f32; 4],
    pub shaders: ShaderSet,
}

impl RendererSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            preferred_present_mode: config.preferred_present_mode(),
            clear_color: config.graphics.clear_color,
            shaders: ShaderSet {
                vertex: config.assets.vertex_shader.clone(),
                fragment: config.assets.fragment_shader.clone(),
            },
        }
    }
}

/// Size-independent inputs a generation is built from.
struct SceneResources<'a> {
    vertex_buffer: &'a Buffer,
    index_buffer: &'a Buffer,
    texture: &'a Arc<Texture>,
    settings: &'a RendererSettings,
}

/// Everything that depends on the swapchain, created and destroyed together.
///
/// Fields drop top to bottom, the reverse of creation order.
struct SwapchainGeneration {
    sync: FrameSyncSet,
    commands: CommandBufferSet,
    targets: RenderTargetSet,
    bindings: FrameBindings,
    swapchain: Swapchain,
}

impl SwapchainGeneration {
    fn new(
        device: &Arc<VulkanDevice>,
        pool: &CommandPool,
        scene: &SceneResources,
        framebuffer_size: vk::Extent2D,
    ) -> Result<Self> {
        let swapchain = Swapchain::new(
            device,
            pool,
            framebuffer_size,
            scene.settings.preferred_present_mode,
        )?;
        let count = swapchain.image_count();

        let params = vec![
            UniformParameter::uniform_buffer::<VpMatrices>(device, VP_BINDING, vk::ShaderStageFlags::VERTEX, count)?,
            UniformParameter::uniform_buffer::<ObjectUniform>(
                device,
                OBJECT_BINDING,
                vk::ShaderStageFlags::VERTEX,
                count,
            )?,
            UniformParameter::CombinedImageSampler {
                binding: TEXTURE_BINDING,
                stage: vk::ShaderStageFlags::FRAGMENT,
                texture: scene.texture.clone(),
            },
        ];
        let bindings = FrameBindings::new(device, params, count)?;

        let targets = RenderTargetSet::new(
            device,
            &swapchain,
            bindings.layout(),
            &scene.settings.shaders,
            &Vertex::layout(),
        )?;

        let clear_values = attachment::clear_values(scene.settings.clear_color);
        let commands = CommandBufferSet::record(
            device,
            pool,
            &DrawContext {
                render_pass: targets.render_pass,
                framebuffers: &targets.framebuffers,
                extent: targets.extent,
                pipeline: targets.pipeline,
                pipeline_layout: targets.pipeline_layout,
                descriptor_sets: bindings.sets(),
                vertex_buffer: scene.vertex_buffer.buffer,
                index_buffer: scene.index_buffer.buffer,
                index_count: MESH_INDICES.len() as u32,
                clear_values: &clear_values,
            },
        )?;

        let sync = FrameSyncSet::new(device, count)?;

        Ok(Self {
            sync,
            commands,
            targets,
            bindings,
            swapchain,
        })
    }
}

pub struct VulkanRenderer {
    generation: Option<SwapchainGeneration>,
    texture: Arc<Texture>,
    index_buffer: Buffer,
    vertex_buffer: Buffer,
    pool: CommandPool,
    settings: RendererSettings,
    view: Mat4,
    lens: Lens,
    object: ObjectUniform,
    device: Arc<VulkanDevice>,
}

impl VulkanRenderer {
    /// Upload the mesh and texture. The first frame builds the swapchain.
    pub fn new(device: &Arc<VulkanDevice>, config: &Config, lens: Lens) -> Result<Self> {
        let pool = CommandPool::new(device)?;

        let vertex_buffer = Buffer::device_local_with_data(
            device,
            &pool,
            "mesh vertices",
            vk::BufferUsageFlags::VERTEX_BUFFER,
            &MESH_VERTICES,
        )?;
        let index_buffer = Buffer::device_local_with_data(
            device,
            &pool,
            "mesh indices",
            vk::BufferUsageFlags::INDEX_BUFFER,
            &MESH_INDICES,
        )?;
        let texture = Arc::new(Texture::load_or_fallback(device, &pool, &config.assets.texture)?);

        Ok(Self {
            generation: None,
            texture,
            index_buffer,
            vertex_buffer,
            pool,
            settings: RendererSettings::from_config(config),
            view: Mat4::IDENTITY,
            lens,
            object: ObjectUniform::default(),
            device: device.clone(),
        })
    }

    /// Scene state copied into the acquired image's uniforms next frame.
    pub fn set_scene(&mut self, view: Mat4, object: ObjectUniform) {
        self.view = view;
        self.object = object;
    }

    fn current(&self) -> Result<&SwapchainGeneration> {
        self.generation.as_ref().context("No swapchain has been built")
    }
}

impl FrameBackend for VulkanRenderer {
    fn image_count(&self) -> usize {
        self.generation.as_ref().map_or(0, |g| g.swapchain.image_count())
    }

    fn wait_for_fence(&mut self, slot: usize) -> Result<()> {
        self.current()?.sync.wait(slot)
    }

    fn acquire_next_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
        let generation = self.current()?;
        let semaphore = generation.sync.frame(slot)?.image_available;
        generation.swapchain.acquire_next_image(semaphore)
    }

    fn prepare_image(&mut self, image_index: u32) -> Result<()> {
        let generation = self.generation.as_mut().context("No swapchain has been built")?;
        let extent = generation.swapchain.extent();
        let matrices = VpMatrices {
            view: self.view,
            projection: self.lens.projection(extent.width as f32 / extent.height as f32),
        };

        let index = image_index as usize;
        generation.bindings.write_uniform(VP_BINDING, index, &matrices)?;
        generation.bindings.write_uniform(OBJECT_BINDING, index, &self.object)
    }

    fn reset_fence(&mut self, slot: usize) -> Result<()> {
        self.current()?.sync.reset(slot)
    }

    fn submit(&mut self, slot: usize, image_index: u32) -> Result<()> {
        let generation = self.current()?;
        let frame = generation.sync.frame(slot)?;
        let command_buffer = generation
            .commands
            .get(image_index)
            .with_context(|| format!("No command buffer for image {}", image_index))?;

        let wait_semaphores = [frame.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [command_buffer];
        let signal_semaphores = [frame.render_finished];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device
                .device
                .queue_submit(self.device.graphics_queue, &[submit_info], frame.in_flight_fence)
        }?;
        Ok(())
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
        let generation = self.current()?;
        let wait = generation.sync.frame(slot)?.render_finished;
        generation
            .swapchain
            .present(self.device.present_queue, image_index, wait)
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.device.wait_idle()
    }

    fn destroy_targets(&mut self) {
        if self.generation.take().is_some() {
            log::debug!("Destroyed swapchain generation");
        }
    }

    fn create_targets(&mut self, framebuffer_size: vk::Extent2D) -> Result<()> {
        let scene = SceneResources {
            vertex_buffer: &self.vertex_buffer,
            index_buffer: &self.index_buffer,
            texture: &self.texture,
            settings: &self.settings,
        };
        let generation = SwapchainGeneration::new(&self.device, &self.pool, &scene, framebuffer_size)
            .context("Failed to build swapchain generation")?;

        let extent = generation.targets.extent;
        log::info!(
            "Swapchain generation ready: {} images at {}x{}",
            generation.swapchain.image_count(),
            extent.width,
            extent.height
        );
        self.generation = Some(generation);
        Ok(())
    }
}

impl Drop for VulkanRenderer {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            log::error!("Failed to wait for device idle: {:#}", e);
        }
        self.generation = None;
    }
}
