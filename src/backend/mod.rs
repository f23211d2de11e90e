// Backend module - Vulkan abstraction layer
//
// Thin RAII wrappers around ash. Each type owns its handles and an
// `Arc<VulkanDevice>`, so nothing outlives the device it was created from.

pub mod attachment;
pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod image;
pub mod pipeline;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod texture;

pub use device::VulkanDevice;
pub use swapchain::Swapchain;
