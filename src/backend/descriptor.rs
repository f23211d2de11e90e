// Descriptor set layout, pool and per-image sets
//
// Set k is bound by command buffer k, so uniform data written for image k
// is only read by the submission rendering image k.

use anyhow::{bail, Context, Result};
use ash::vk;
use bytemuck::Pod;
use std::sync::Arc;

use super::buffer::Buffer;
use super::texture::Texture;
use super::VulkanDevice;

/// One binding of the shader interface and the resources behind it.
pub enum UniformParameter {
    /// One buffer per swapchain image
    UniformBuffer {
        binding: u32,
        stage: vk::ShaderStageFlags,
        buffers: Vec<Buffer>,
    },
    CombinedImageSampler {
        binding: u32,
        stage: vk::ShaderStageFlags,
        texture: Arc<Texture>,
    },
}

impl UniformParameter {
    /// `count` host-visible buffers sized for `T`.
    pub fn uniform_buffer<T: Pod>(
        device: &Arc<VulkanDevice>,
        binding: u32,
        stage: vk::ShaderStageFlags,
        count: usize,
    ) -> Result<Self> {
        let buffers = (0..count)
            .map(|i| Buffer::uniform::<T>(device, &format!("uniform {} image {}", binding, i)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::UniformBuffer { binding, stage, buffers })
    }

    pub fn binding(&self) -> u32 {
        match self {
            Self::UniformBuffer { binding, .. } | Self::CombinedImageSampler { binding, .. } => *binding,
        }
    }

    pub fn descriptor_type(&self) -> vk::DescriptorType {
        match self {
            Self::UniformBuffer { .. } => vk::DescriptorType::UNIFORM_BUFFER,
            Self::CombinedImageSampler { .. } => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        }
    }

    fn stage(&self) -> vk::ShaderStageFlags {
        match self {
            Self::UniformBuffer { stage, .. } | Self::CombinedImageSampler { stage, .. } => *stage,
        }
    }

    pub fn layout_binding(&self) -> vk::DescriptorSetLayoutBinding<'static> {
        vk::DescriptorSetLayoutBinding::default()
            .binding(self.binding())
            .descriptor_type(self.descriptor_type())
            .descriptor_count(1)
            .stage_flags(self.stage())
    }
}

/// Pool sizes for `set_count` sets, one entry per distinct descriptor type
/// in first-seen order.
pub fn pool_sizes(
    types: impl IntoIterator<Item = vk::DescriptorType>,
    set_count: u32,
) -> Vec<vk::DescriptorPoolSize> {
    let mut sizes: Vec<vk::DescriptorPoolSize> = Vec::new();
    for ty in types {
        match sizes.iter_mut().find(|size| size.ty == ty) {
            Some(size) => size.descriptor_count += set_count,
            None => sizes.push(vk::DescriptorPoolSize {
                ty,
                descriptor_count: set_count,
            }),
        }
    }
    sizes
}

/// Layout, pool and one set per swapchain image.
pub struct FrameBindings {
    params: Vec<UniformParameter>,
    layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    sets: Vec<vk::DescriptorSet>,
    device: Arc<VulkanDevice>,
}

impl FrameBindings {
    pub fn new(device: &Arc<VulkanDevice>, params: Vec<UniformParameter>, set_count: usize) -> Result<Self> {
        for param in &params {
            if let UniformParameter::UniformBuffer { binding, buffers, .. } = param {
                if buffers.len() != set_count {
                    bail!(
                        "Binding {} has {} buffers for {} descriptor sets",
                        binding,
                        buffers.len(),
                        set_count
                    );
                }
            }
        }

        let mut bindings = Self {
            params,
            layout: vk::DescriptorSetLayout::null(),
            pool: vk::DescriptorPool::null(),
            sets: Vec::new(),
            device: device.clone(),
        };

        let layout_bindings: Vec<_> = bindings.params.iter().map(UniformParameter::layout_binding).collect();
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&layout_bindings);
        bindings.layout = unsafe { device.device.create_descriptor_set_layout(&layout_info, None) }
            .context("Failed to create descriptor set layout")?;

        let sizes = pool_sizes(
            bindings.params.iter().map(UniformParameter::descriptor_type),
            set_count as u32,
        );
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .pool_sizes(&sizes)
            .max_sets(set_count as u32);
        bindings.pool = unsafe { device.device.create_descriptor_pool(&pool_info, None) }
            .context("Failed to create descriptor pool")?;

        let set_layouts = vec![bindings.layout; set_count];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(bindings.pool)
            .set_layouts(&set_layouts);
        bindings.sets = unsafe { device.device.allocate_descriptor_sets(&alloc_info) }
            .context("Failed to allocate descriptor sets")?;

        bindings.write_sets();
        Ok(bindings)
    }

    fn write_sets(&self) {
        for (i, &set) in self.sets.iter().enumerate() {
            for param in &self.params {
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(param.binding())
                    .dst_array_element(0)
                    .descriptor_type(param.descriptor_type());

                match param {
                    UniformParameter::UniformBuffer { buffers, .. } => {
                        let buffer_info = [buffers[i].descriptor_info()];
                        let write = write.buffer_info(&buffer_info);
                        unsafe { self.device.device.update_descriptor_sets(&[write], &[]) };
                    }
                    UniformParameter::CombinedImageSampler { texture, .. } => {
                        let image_info = [texture.descriptor_info()];
                        let write = write.image_info(&image_info);
                        unsafe { self.device.device.update_descriptor_sets(&[write], &[]) };
                    }
                }
            }
        }
    }

    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    pub fn sets(&self) -> &[vk::DescriptorSet] {
        &self.sets
    }

    /// Copy `value` into the uniform buffer at `binding` for `image_index`.
    pub fn write_uniform<T: Pod>(&mut self, binding: u32, image_index: usize, value: &T) -> Result<()> {
        let buffers = self
            .params
            .iter_mut()
            .find_map(|param| match param {
                UniformParameter::UniformBuffer { binding: b, buffers, .. } if *b == binding => Some(buffers),
                _ => None,
            })
            .with_context(|| format!("No uniform buffer at binding {}", binding))?;

        buffers
            .get_mut(image_index)
            .with_context(|| format!("No uniform buffer for image {}", image_index))?
            .write(value)
    }
}

impl Drop for FrameBindings {
    fn drop(&mut self) {
        // Sets are freed with the pool
        unsafe {
            self.device.device.destroy_descriptor_pool(self.pool, None);
            self.device.device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}
