//! Surface materials
//!
//! A [`Material`] is built on the CPU, optionally bound to a descriptor set
//! with [`Material::bind`], then wrapped in an `Arc` and shared by the
//! primitives that use it. It is not modified after that.

use ash::vk;
use std::sync::Arc;

use super::render_data::PbrFactors;
use crate::render::backends::vulkan::{Buffer, Device, Texture, VulkanResult};

/// Binding of the [`PbrFactors`] uniform block in the material set
pub const FACTORS_BINDING: u32 = 0;

/// Binding of the base colour sampler in the material set
pub const BASE_COLOR_BINDING: u32 = 1;

/// Layout bindings of the per-material descriptor set (set 1)
pub fn material_set_bindings() -> [vk::DescriptorSetLayoutBinding; 2] {
    [
        vk::DescriptorSetLayoutBinding::builder()
            .binding(FACTORS_BINDING)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT)
            .build(),
        vk::DescriptorSetLayoutBinding::builder()
            .binding(BASE_COLOR_BINDING)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT)
            .build(),
    ]
}

struct MaterialBinding {
    device: Arc<Device>,
    set: vk::DescriptorSet,
    _factors: Buffer,
}

impl Drop for MaterialBinding {
    fn drop(&mut self) {
        if let Err(e) = self.device.free_descriptor_set(self.set) {
            log::warn!("Failed to free material descriptor set: {e}");
        }
    }
}

/// Cull flag, PBR factors and an optional base colour texture
pub struct Material {
    /// Cull back faces when drawing
    pub cull: bool,
    /// Scalar PBR factors
    pub factors: PbrFactors,
    /// Base colour texture
    pub texture: Option<Arc<Texture>>,
    binding: Option<MaterialBinding>,
}

impl Default for Material {
    fn default() -> Self {
        Self::new(PbrFactors::default())
    }
}

impl std::fmt::Debug for Material {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Material")
            .field("cull", &self.cull)
            .field("factors", &self.factors)
            .field("textured", &self.texture.is_some())
            .field("bound", &self.binding.is_some())
            .finish()
    }
}

impl Material {
    /// Back-face culled material with the given factors
    pub fn new(factors: PbrFactors) -> Self {
        Self {
            cull: true,
            factors,
            texture: None,
            binding: None,
        }
    }

    /// Set whether back faces are culled
    pub fn with_cull(mut self, cull: bool) -> Self {
        self.cull = cull;
        self
    }

    /// Attach a base colour texture
    pub fn with_texture(mut self, texture: Arc<Texture>) -> Self {
        self.texture = Some(texture);
        self
    }

    /// Factors as uploaded, with the texture flag filled in
    pub fn uniform_factors(&self) -> PbrFactors {
        let mut factors = self.factors;
        factors.textured = u32::from(self.has_realized_texture());
        factors
    }

    fn has_realized_texture(&self) -> bool {
        self.texture.as_ref().is_some_and(|t| t.is_realized())
    }

    /// Allocate and write this material's descriptor set
    ///
    /// `layout` must have the bindings of [`material_set_bindings`]. The
    /// sampler binding is only written when a realized texture is attached.
    pub fn bind(&mut self, device: &Arc<Device>, layout: vk::DescriptorSetLayout) -> VulkanResult<()> {
        let factors = self.uniform_factors();
        let buffer = device.create_buffer(
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            std::mem::size_of::<PbrFactors>() as vk::DeviceSize,
            Some(bytemuck::bytes_of(&factors)),
        )?;

        let set = device.allocate_descriptor_set(layout)?;
        let buffer_info = [buffer.descriptor()];
        let mut writes = vec![vk::WriteDescriptorSet::builder()
            .dst_set(set)
            .dst_binding(FACTORS_BINDING)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .buffer_info(&buffer_info)
            .build()];

        let image_info: Vec<vk::DescriptorImageInfo> = self
            .texture
            .as_ref()
            .and_then(|t| t.descriptor())
            .into_iter()
            .collect();
        if !image_info.is_empty() {
            writes.push(
                vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(BASE_COLOR_BINDING)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(&image_info)
                    .build(),
            );
        }

        unsafe { device.handle().update_descriptor_sets(&writes, &[]) };

        self.binding = Some(MaterialBinding {
            device: Arc::clone(device),
            set,
            _factors: buffer,
        });
        Ok(())
    }

    /// Descriptor set written by [`Material::bind`]
    pub fn descriptor_set(&self) -> Option<vk::DescriptorSet> {
        self.binding.as_ref().map(|b| b.set)
    }

    /// Cull mode implied by the cull flag
    pub fn cull_mode(&self) -> vk::CullModeFlags {
        if self.cull {
            vk::CullModeFlags::BACK
        } else {
            vk::CullModeFlags::NONE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cull_flag_maps_to_cull_mode() {
        assert_eq!(Material::default().cull_mode(), vk::CullModeFlags::BACK);
        assert_eq!(Material::default().with_cull(false).cull_mode(), vk::CullModeFlags::NONE);
    }

    #[test]
    fn test_untextured_material_reports_no_texture() {
        let material = Material::new(PbrFactors { metallic: 0.25, ..Default::default() });
        let factors = material.uniform_factors();
        assert_eq!(factors.textured, 0);
        assert_eq!(factors.metallic, 0.25);
        assert!(material.descriptor_set().is_none());
    }
}
