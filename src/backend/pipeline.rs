// Render pass, framebuffers and graphics pipeline
//
// Everything here depends on the swapchain's format and extent, so a
// `RenderTargetSet` is rebuilt with every swapchain generation.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::attachment::{self, AttachmentFormats, AttachmentKind};
use super::shader::{ShaderModule, ShaderSet};
use super::swapchain::Swapchain;
use super::VulkanDevice;

/// Vertex buffer layout the pipeline consumes.
#[derive(Debug, Clone)]
pub struct VertexLayout {
    pub bindings: Vec<vk::VertexInputBindingDescription>,
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
}

/// Single subpass rendering into the multisample color and depth
/// attachments and resolving into the swapchain image.
pub fn create_render_pass(device: &ash::Device, formats: &AttachmentFormats) -> Result<vk::RenderPass> {
    let attachments = attachment::attachment_descriptions(formats);

    let color_refs = [AttachmentKind::MultisampleColor.reference()];
    let resolve_refs = [AttachmentKind::ResolvedColor.reference()];
    let depth_ref = AttachmentKind::Depth.reference();

    let subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs)
        .resolve_attachments(&resolve_refs)
        .depth_stencil_attachment(&depth_ref);

    let dependency = vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS)
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_READ
                | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        );

    let subpasses = [subpass];
    let dependencies = [dependency];
    let render_pass_info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    unsafe { device.create_render_pass(&render_pass_info, None) }.context("Failed to create render pass")
}

/// Full-extent viewport with a negative height, so clip-space +Y points up.
pub fn flipped_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: extent.height as f32,
        width: extent.width as f32,
        height: -(extent.height as f32),
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

pub fn full_scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

fn create_pipeline_layout(device: &ash::Device, set_layout: vk::DescriptorSetLayout) -> Result<vk::PipelineLayout> {
    let set_layouts = [set_layout];
    let layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
    unsafe { device.create_pipeline_layout(&layout_info, None) }.context("Failed to create pipeline layout")
}

fn create_graphics_pipeline(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    layout: vk::PipelineLayout,
    extent: vk::Extent2D,
    samples: vk::SampleCountFlags,
    stages: &[vk::PipelineShaderStageCreateInfo],
    vertex: &VertexLayout,
) -> Result<vk::Pipeline> {
    let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&vertex.bindings)
        .vertex_attribute_descriptions(&vertex.attributes);

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .primitive_restart_enable(false);

    let viewports = [flipped_viewport(extent)];
    let scissors = [full_scissor(extent)];
    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewports(&viewports)
        .scissors(&scissors);

    // Front faces are CCW as seen after the viewport flip
    let rasterizer = vk::PipelineRasterizationStateCreateInfo::default()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(vk::CullModeFlags::BACK)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .depth_bias_enable(false);

    let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
        .sample_shading_enable(false)
        .rasterization_samples(samples);

    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(true)
        .depth_write_enable(true)
        .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL)
        .depth_bounds_test_enable(false)
        .stencil_test_enable(false);

    let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .blend_enable(false)];
    let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
        .logic_op_enable(false)
        .attachments(&color_blend_attachments);

    let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(stages)
        .vertex_input_state(&vertex_input_info)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterizer)
        .multisample_state(&multisampling)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blending)
        .layout(layout)
        .render_pass(render_pass)
        .subpass(0);

    let pipelines = unsafe { device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None) }
        .map_err(|(_, e)| e)
        .context("Failed to create graphics pipeline")?;

    pipelines.into_iter().next().context("Driver returned no pipeline")
}

/// Render pass, framebuffers and pipeline for one swapchain generation.
pub struct RenderTargetSet {
    pub pipeline: vk::Pipeline,
    pub pipeline_layout: vk::PipelineLayout,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub render_pass: vk::RenderPass,
    pub extent: vk::Extent2D,
    device: Arc<VulkanDevice>,
}

impl RenderTargetSet {
    pub fn new(
        device: &Arc<VulkanDevice>,
        swapchain: &Swapchain,
        set_layout: vk::DescriptorSetLayout,
        shaders: &ShaderSet,
        vertex: &VertexLayout,
    ) -> Result<Self> {
        let formats = swapchain.attachment_formats();
        let extent = swapchain.extent();

        // Null handles until created; destroying a null handle is a no-op
        let mut targets = Self {
            pipeline: vk::Pipeline::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            framebuffers: Vec::new(),
            render_pass: vk::RenderPass::null(),
            extent,
            device: device.clone(),
        };

        targets.render_pass = create_render_pass(&device.device, &formats)?;
        targets.framebuffers = swapchain.create_framebuffers(targets.render_pass)?;

        let vertex_shader = ShaderModule::load(device, &shaders.vertex, vk::ShaderStageFlags::VERTEX)?;
        let fragment_shader = ShaderModule::load(device, &shaders.fragment, vk::ShaderStageFlags::FRAGMENT)?;
        let stages = [vertex_shader.stage_info(), fragment_shader.stage_info()];

        targets.pipeline_layout = create_pipeline_layout(&device.device, set_layout)?;
        targets.pipeline = create_graphics_pipeline(
            &device.device,
            targets.render_pass,
            targets.pipeline_layout,
            extent,
            formats.samples,
            &stages,
            vertex,
        )?;

        log::info!(
            "Built render targets: {} framebuffers at {}x{}, {:?}",
            targets.framebuffers.len(),
            extent.width,
            extent.height,
            formats.samples
        );
        Ok(targets)
    }
}

impl Drop for RenderTargetSet {
    fn drop(&mut self) {
        let device = &self.device.device;
        unsafe {
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.pipeline_layout, None);
            for &framebuffer in &self.framebuffers {
                device.destroy_framebuffer(framebuffer, None);
            }
            device.destroy_render_pass(self.render_pass, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_viewport_is_flipped() {
        let viewport = flipped_viewport(vk::Extent2D {
            width: 800,
            height: 600,
        });
        assert_eq!(viewport.y, 600.0);
        assert_eq!(viewport.height, -600.0);
        assert_eq!(viewport.width, 800.0);
        assert_eq!((viewport.min_depth, viewport.max_depth), (0.0, 1.0));
    }

    #[test]
    fn test_scissor_covers_extent() {
        let extent = vk::Extent2D {
            width: 1280,
            height: 720,
        };
        let scissor = full_scissor(extent);
        assert_eq!(scissor.extent, extent);
        assert_eq!((scissor.offset.x, scissor.offset.y), (0, 0));
    }
}
