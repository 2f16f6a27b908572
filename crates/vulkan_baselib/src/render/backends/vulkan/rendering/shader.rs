//! SPIR-V shader modules

use ash::vk;
use std::ffi::CStr;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use crate::render::backends::vulkan::{Device, VulkanError, VulkanResult};

/// Entry point every stage is expected to export
pub const SHADER_ENTRY_POINT: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"main\0") };

/// Shader module with RAII cleanup
pub struct ShaderModule {
    device: Arc<Device>,
    module: vk::ShaderModule,
}

impl ShaderModule {
    /// Create a module from SPIR-V bytes
    pub fn from_bytes(device: &Arc<Device>, bytes: &[u8]) -> VulkanResult<Self> {
        let words = ash::util::read_spv(&mut Cursor::new(bytes))
            .map_err(|e| VulkanError::InitializationFailed(format!("Invalid SPIR-V: {e}")))?;

        let create_info = vk::ShaderModuleCreateInfo::builder().code(&words);
        let module = unsafe {
            device.handle().create_shader_module(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        log::debug!("Created shader module from {} SPIR-V words", words.len());
        Ok(Self { device: Arc::clone(device), module })
    }

    /// Create a module from a SPIR-V file
    pub fn from_file(device: &Arc<Device>, path: impl AsRef<Path>) -> VulkanResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            VulkanError::InitializationFailed(format!("Failed to read shader file {}: {e}", path.display()))
        })?;
        Self::from_bytes(device, &bytes)
    }

    /// Get the module handle
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    /// Stage description using the `main` entry point
    pub fn stage_info(&self, stage: vk::ShaderStageFlags) -> vk::PipelineShaderStageCreateInfo {
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(stage)
            .module(self.module)
            .name(SHADER_ENTRY_POINT)
            .build()
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_shader_module(self.module, None);
        }
    }
}
