// Sampled texture
//
// JPEG pixels are expanded to RGBA8, uploaded through a staging buffer and
// left in SHADER_READ_ONLY layout. A missing or unreadable file falls back
// to a generated checkerboard so the scene still renders.

use anyhow::{bail, Context, Result};
use ash::vk;
use gpu_allocator::MemoryLocation;
use jpeg_decoder::{Decoder, PixelFormat};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use super::buffer::Buffer;
use super::command::CommandPool;
use super::image::{Image, ImageDesc};
use super::VulkanDevice;

pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;
const MAX_ANISOTROPY: f32 = 16.0;

/// Decoded RGBA8 pixels.
#[derive(Debug, Clone)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl TextureData {
    pub fn load_jpeg(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Failed to open texture {}", path.display()))?;
        let mut decoder = Decoder::new(BufReader::new(file));
        let pixels = decoder
            .decode()
            .with_context(|| format!("Failed to decode texture {}", path.display()))?;
        let info = decoder.info().context("Decoder returned no image info")?;

        Ok(Self {
            width: u32::from(info.width),
            height: u32::from(info.height),
            pixels: expand_to_rgba(&pixels, info.pixel_format)?,
        })
    }

    /// `size`x`size` black and white checkerboard with `cells` squares per side.
    pub fn checkerboard(size: u32, cells: u32) -> Self {
        let cell = (size / cells.max(1)).max(1);
        let mut pixels = Vec::with_capacity((size * size * 4) as usize);
        for y in 0..size {
            for x in 0..size {
                let value = if (x / cell + y / cell) % 2 == 0 { 255 } else { 0 };
                pixels.extend_from_slice(&[value, value, value, 255]);
            }
        }
        Self {
            width: size,
            height: size,
            pixels,
        }
    }
}

pub fn expand_to_rgba(pixels: &[u8], format: PixelFormat) -> Result<Vec<u8>> {
    match format {
        PixelFormat::RGB24 => Ok(pixels
            .chunks_exact(3)
            .flat_map(|rgb| [rgb[0], rgb[1], rgb[2], 255])
            .collect()),
        PixelFormat::L8 => Ok(pixels.iter().flat_map(|&l| [l, l, l, 255]).collect()),
        other => bail!("Unsupported JPEG pixel format {:?}", other),
    }
}

pub struct Texture {
    pub image: Image,
    pub sampler: vk::Sampler,
    device: Arc<VulkanDevice>,
}

impl Texture {
    pub fn new(device: &Arc<VulkanDevice>, pool: &CommandPool, data: &TextureData) -> Result<Self> {
        let extent = vk::Extent2D {
            width: data.width,
            height: data.height,
        };

        let mut staging = Buffer::new(
            device,
            "texture staging",
            data.pixels.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
        )?;
        staging.write_bytes(&data.pixels)?;

        let image = Image::new(
            device,
            &ImageDesc {
                name: "texture",
                extent,
                format: TEXTURE_FORMAT,
                usage: vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
                samples: vk::SampleCountFlags::TYPE_1,
            },
        )?;

        image.transition_layout(pool, vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL)?;
        let region = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
            image_extent: vk::Extent3D {
                width: data.width,
                height: data.height,
                depth: 1,
            },
        };
        pool.submit_once(|device, cmd| unsafe {
            device.cmd_copy_buffer_to_image(
                cmd,
                staging.buffer,
                image.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        })?;
        image.transition_layout(
            pool,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )?;

        let anisotropy = MAX_ANISOTROPY.min(device.properties.limits.max_sampler_anisotropy);
        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(true)
            .max_anisotropy(anisotropy)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .min_lod(0.0)
            .max_lod(0.0);
        let sampler = unsafe { device.device.create_sampler(&sampler_info, None) }
            .context("Failed to create texture sampler")?;

        log::info!("Uploaded {}x{} texture", data.width, data.height);
        Ok(Self {
            image,
            sampler,
            device: device.clone(),
        })
    }

    pub fn load_or_fallback(device: &Arc<VulkanDevice>, pool: &CommandPool, path: &Path) -> Result<Self> {
        let data = TextureData::load_jpeg(path).unwrap_or_else(|e| {
            log::warn!("{:#}; using a checkerboard texture", e);
            TextureData::checkerboard(256, 8)
        });
        Self::new(device, pool, &data)
    }

    pub fn descriptor_info(&self) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo {
            sampler: self.sampler,
            image_view: self.image.view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_sampler(self.sampler, None) };
    }
}
