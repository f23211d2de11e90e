// Buffer utilities for vertex, index, and uniform buffers
//
// Memory comes from gpu-allocator. Static geometry is uploaded once through
// a staging buffer; uniform buffers stay persistently mapped.

use anyhow::{bail, Context, Result};
use ash::vk;
use bytemuck::Pod;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

use super::command::CommandPool;
use super::VulkanDevice;

pub struct Buffer {
    pub buffer: vk::Buffer,
    pub size: vk::DeviceSize,
    allocation: Option<Allocation>,
    device: Arc<VulkanDevice>,
}

impl Buffer {
    pub fn new(
        device: &Arc<VulkanDevice>,
        name: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> Result<Self> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }
            .with_context(|| format!("Failed to create buffer '{}'", name))?;

        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };
        let allocation = device.allocator().allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.device.destroy_buffer(buffer, None) };
                return Err(e).with_context(|| format!("Failed to allocate memory for '{}'", name));
            }
        };

        let result = Self {
            buffer,
            size,
            allocation: Some(allocation),
            device: device.clone(),
        };

        if let Some(allocation) = result.allocation.as_ref() {
            unsafe {
                device
                    .device
                    .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
                    .with_context(|| format!("Failed to bind memory for '{}'", name))?;
            }
        }

        Ok(result)
    }

    /// Host-visible uniform buffer sized for one `T`.
    pub fn uniform<T: Pod>(device: &Arc<VulkanDevice>, name: &str) -> Result<Self> {
        Self::new(
            device,
            name,
            std::mem::size_of::<T>() as vk::DeviceSize,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            MemoryLocation::CpuToGpu,
        )
    }

    /// Device-local buffer filled with `data` through a staging copy.
    pub fn device_local_with_data<T: Pod>(
        device: &Arc<VulkanDevice>,
        pool: &CommandPool,
        name: &str,
        usage: vk::BufferUsageFlags,
        data: &[T],
    ) -> Result<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let size = bytes.len() as vk::DeviceSize;
        if size == 0 {
            bail!("Buffer '{}' has no data", name);
        }

        let mut staging = Self::new(
            device,
            "staging",
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
        )?;
        staging.write_bytes(bytes)?;

        let buffer = Self::new(
            device,
            name,
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuOnly,
        )?;

        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        pool.submit_once(|device, cmd| unsafe {
            device.cmd_copy_buffer(cmd, staging.buffer, buffer.buffer, &[region]);
        })
        .with_context(|| format!("Failed to upload '{}'", name))?;

        Ok(buffer)
    }

    /// Copy `value` to the start of a host-visible buffer.
    pub fn write<T: Pod>(&mut self, value: &T) -> Result<()> {
        self.write_bytes(bytemuck::bytes_of(value))
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() as vk::DeviceSize > self.size {
            bail!("Write of {} bytes exceeds buffer size {}", bytes.len(), self.size);
        }

        let mapped = self
            .allocation
            .as_mut()
            .and_then(|allocation| allocation.mapped_slice_mut())
            .context("Buffer memory is not host visible")?;
        mapped[..bytes.len()].copy_from_slice(bytes);

        Ok(())
    }

    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: self.buffer,
            offset: 0,
            range: self.size,
        }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_buffer(self.buffer, None) };
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.device.allocator().free(allocation) {
                log::error!("Failed to free buffer memory: {}", e);
            }
        }
    }
}
