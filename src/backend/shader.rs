// Shader module loading
//
// SPIR-V is read from disk every time a pipeline is built, so a rebuilt
// generation picks up shaders recompiled while the app runs.

use anyhow::{bail, Context, Result};
use ash::vk;
use std::ffi::CStr;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::VulkanDevice;

pub const ENTRY_POINT: &CStr = c"main";
const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Vertex and fragment shader paths for the mesh pipeline.
#[derive(Debug, Clone)]
pub struct ShaderSet {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

impl ShaderSet {
    /// Distinct directories holding the shaders, for file watching.
    pub fn directories(&self) -> Vec<PathBuf> {
        let mut directories: Vec<PathBuf> = Vec::new();
        for path in [&self.vertex, &self.fragment] {
            let directory = match path.parent() {
                Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
                _ => PathBuf::from("."),
            };
            if !directories.contains(&directory) {
                directories.push(directory);
            }
        }
        directories
    }

    /// Check both binaries parse as SPIR-V without touching the device.
    pub fn validate(&self) -> Result<()> {
        read_spirv(&self.vertex)?;
        read_spirv(&self.fragment)?;
        Ok(())
    }
}

pub fn read_spirv(path: &Path) -> Result<Vec<u32>> {
    let mut file = File::open(path).with_context(|| format!("Failed to open shader {}", path.display()))?;
    let words = ash::util::read_spv(&mut file).with_context(|| format!("Failed to read SPIR-V from {}", path.display()))?;

    match words.first() {
        Some(&SPIRV_MAGIC) => Ok(words),
        Some(&other) => bail!("{} is not SPIR-V (magic {:#010x})", path.display(), other),
        None => bail!("{} is empty", path.display()),
    }
}

pub struct ShaderModule {
    pub module: vk::ShaderModule,
    pub stage: vk::ShaderStageFlags,
    device: Arc<VulkanDevice>,
}

impl ShaderModule {
    pub fn load(device: &Arc<VulkanDevice>, path: &Path, stage: vk::ShaderStageFlags) -> Result<Self> {
        let code = read_spirv(path)?;
        let create_info = vk::ShaderModuleCreateInfo::default().code(&code);
        let module = unsafe { device.device.create_shader_module(&create_info, None) }
            .with_context(|| format!("Failed to create shader module from {}", path.display()))?;

        log::debug!("Loaded {:?} shader {}", stage, path.display());
        Ok(Self {
            module,
            stage,
            device: device.clone(),
        })
    }

    pub fn stage_info(&self) -> vk::PipelineShaderStageCreateInfo<'static> {
        vk::PipelineShaderStageCreateInfo::default()
            .stage(self.stage)
            .module(self.module)
            .name(ENTRY_POINT)
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_shader_module(self.module, None) };
    }
}
