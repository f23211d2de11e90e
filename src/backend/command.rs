// Command pool and pre-recorded draw command buffers
//
// One command buffer per swapchain image, recorded once per generation.
// Only uniform buffer contents change between frames.

use anyhow::{bail, Context, Result};
use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;

pub struct CommandPool {
    pub pool: vk::CommandPool,
    device: Arc<VulkanDevice>,
}

impl CommandPool {
    pub fn new(device: &Arc<VulkanDevice>) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(device.graphics_queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .context("Failed to create command pool")?;

        Ok(Self {
            pool,
            device: device.clone(),
        })
    }

    pub fn allocate(&self, count: u32) -> Result<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        unsafe { self.device.device.allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate command buffers")
    }

    /// Record a throwaway command buffer, submit it and wait for the queue.
    ///
    /// Used for uploads and layout transitions outside the frame loop.
    pub fn submit_once<F>(&self, record: F) -> Result<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let device = &self.device.device;
        let cmd = self
            .allocate(1)?
            .into_iter()
            .next()
            .context("Command pool returned no buffer")?;

        let result = (|| -> Result<()> {
            unsafe {
                let begin_info =
                    vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
                device.begin_command_buffer(cmd, &begin_info)?;
                record(device, cmd);
                device.end_command_buffer(cmd)?;

                let command_buffers = [cmd];
                let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
                device.queue_submit(self.device.graphics_queue, &[submit_info], vk::Fence::null())?;
                device.queue_wait_idle(self.device.graphics_queue)?;
            }
            Ok(())
        })();

        unsafe { device.free_command_buffers(self.pool, &[cmd]) };
        result.context("One-shot command submission failed")
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_command_pool(self.pool, None) };
    }
}

/// Everything one draw command buffer references.
pub struct DrawContext<'a> {
    pub render_pass: vk::RenderPass,
    pub framebuffers: &'a [vk::Framebuffer],
    pub extent: vk::Extent2D,
    pub pipeline: vk::Pipeline,
    pub pipeline_layout: vk::PipelineLayout,
    pub descriptor_sets: &'a [vk::DescriptorSet],
    pub vertex_buffer: vk::Buffer,
    pub index_buffer: vk::Buffer,
    pub index_count: u32,
    pub clear_values: &'a [vk::ClearValue],
}

/// Draw command buffers, one per swapchain image.
///
/// Must be dropped before the pool it was allocated from.
pub struct CommandBufferSet {
    buffers: Vec<vk::CommandBuffer>,
    pool: vk::CommandPool,
    device: Arc<VulkanDevice>,
}

impl CommandBufferSet {
    pub fn record(device: &Arc<VulkanDevice>, pool: &CommandPool, draw: &DrawContext) -> Result<Self> {
        let count = draw.framebuffers.len();
        if draw.descriptor_sets.len() != count {
            bail!(
                "{} framebuffers but {} descriptor sets",
                count,
                draw.descriptor_sets.len()
            );
        }

        let set = Self {
            buffers: pool.allocate(count as u32)?,
            pool: pool.pool,
            device: device.clone(),
        };

        for (i, &cmd) in set.buffers.iter().enumerate() {
            set.record_one(cmd, draw, i)
                .with_context(|| format!("Failed to record command buffer {}", i))?;
        }

        log::info!("Recorded {} draw command buffers", count);
        Ok(set)
    }

    fn record_one(&self, cmd: vk::CommandBuffer, draw: &DrawContext, index: usize) -> Result<()> {
        let device = &self.device.device;

        let render_pass_info = vk::RenderPassBeginInfo::default()
            .render_pass(draw.render_pass)
            .framebuffer(draw.framebuffers[index])
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: draw.extent,
            })
            .clear_values(draw.clear_values);

        unsafe {
            device.begin_command_buffer(cmd, &vk::CommandBufferBeginInfo::default())?;

            device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, draw.pipeline);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                draw.pipeline_layout,
                0,
                &[draw.descriptor_sets[index]],
                &[],
            );
            device.cmd_bind_vertex_buffers(cmd, 0, &[draw.vertex_buffer], &[0]);
            device.cmd_bind_index_buffer(cmd, draw.index_buffer, 0, vk::IndexType::UINT32);
            device.cmd_draw_indexed(cmd, draw.index_count, 1, 0, 0, 0);
            device.cmd_end_render_pass(cmd);

            device.end_command_buffer(cmd)?;
        }

        Ok(())
    }

    pub fn get(&self, image_index: u32) -> Option<vk::CommandBuffer> {
        self.buffers.get(image_index as usize).copied()
    }
}

impl Drop for CommandBufferSet {
    fn drop(&mut self) {
        unsafe { self.device.device.free_command_buffers(self.pool, &self.buffers) };
    }
}
