//! Primitives drawn together under one transform
//!
//! A [`MeshInstance`] shares one pipeline layout and one common descriptor
//! set (matrices, lights) across its primitives. When push-constant stages
//! are configured, each draw is preceded by a 64-byte push of
//! `transform * primitive.matrix()`.

use ash::vk;
use std::sync::Arc;

use super::mesh_primitive::MeshPrimitive;
use crate::foundation::math::Mat4;
use crate::render::backends::vulkan::{Device, PipelineLayout, VulkanError, VulkanResult};

/// Size of the model-matrix push constant
pub const MODEL_PUSH_CONSTANT_SIZE: u32 = 64;

/// Set index of the shared per-instance descriptor set
pub const INSTANCE_SET: u32 = 0;

/// Set index of the per-material descriptor set
pub const MATERIAL_SET: u32 = 1;

/// Aggregate of primitives with a shared transform
pub struct MeshInstance {
    primitives: Vec<MeshPrimitive>,
    transform: Mat4,
    descriptor_set: vk::DescriptorSet,
    push_constant_stages: vk::ShaderStageFlags,
    pipeline_layout: Option<PipelineLayout>,
    device: Arc<Device>,
}

impl MeshInstance {
    /// Create an empty instance
    pub fn new(device: &Arc<Device>) -> Self {
        Self {
            primitives: Vec::new(),
            transform: Mat4::identity(),
            descriptor_set: vk::DescriptorSet::null(),
            push_constant_stages: vk::ShaderStageFlags::empty(),
            pipeline_layout: None,
            device: Arc::clone(device),
        }
    }

    /// Append a primitive
    pub fn add_primitive(&mut self, primitive: MeshPrimitive) {
        self.primitives.push(primitive);
    }

    /// Primitives in draw order
    pub fn primitives(&self) -> &[MeshPrimitive] {
        &self.primitives
    }

    /// Mutable access, e.g. to build pipelines
    pub fn primitives_mut(&mut self) -> &mut [MeshPrimitive] {
        &mut self.primitives
    }

    /// Set the instance transform
    pub fn set_transform(&mut self, transform: Mat4) {
        self.transform = transform;
    }

    /// Instance transform
    pub fn transform(&self) -> &Mat4 {
        &self.transform
    }

    /// Set the shared descriptor set bound as set 0
    pub fn set_descriptor_set(&mut self, set: vk::DescriptorSet) {
        self.descriptor_set = set;
    }

    /// Take ownership of the layout used for descriptor binds and pushes
    ///
    /// If the layout has a push constant range, its stages receive the model
    /// matrix before every draw.
    pub fn set_pipeline_layout(&mut self, layout: PipelineLayout) {
        self.push_constant_stages = layout
            .push_constant_ranges()
            .iter()
            .filter(|r| r.offset == 0 && r.size >= MODEL_PUSH_CONSTANT_SIZE)
            .fold(vk::ShaderStageFlags::empty(), |acc, r| acc | r.stage_flags);
        self.pipeline_layout = Some(layout);
    }

    /// Owned pipeline layout
    pub fn pipeline_layout(&self) -> Option<&PipelineLayout> {
        self.pipeline_layout.as_ref()
    }

    /// Stages receiving the model matrix push constant
    pub fn push_constant_stages(&self) -> vk::ShaderStageFlags {
        self.push_constant_stages
    }

    /// Build a pipeline for every primitive with the owned layout
    pub fn create_pipelines(
        &mut self,
        render_pass: vk::RenderPass,
        stages: &[vk::PipelineShaderStageCreateInfo],
        subpass: u32,
    ) -> VulkanResult<()> {
        let layout = self
            .pipeline_layout
            .as_ref()
            .map(PipelineLayout::handle)
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: "mesh instance has no pipeline layout".to_string(),
            })?;
        for primitive in &mut self.primitives {
            primitive.create_pipeline(render_pass, layout, stages, subpass)?;
        }
        Ok(())
    }

    /// Model matrix pushed for `primitive`
    pub fn model_matrix(&self, primitive: &MeshPrimitive) -> Mat4 {
        self.transform * primitive.matrix()
    }

    /// Total indices across primitives
    pub fn index_count(&self) -> u32 {
        self.primitives.iter().map(MeshPrimitive::index_count).sum()
    }

    /// Record every primitive into `cmd`
    ///
    /// The shared set is bound once; each primitive then binds its pipeline,
    /// its material set and its buffers before drawing.
    pub fn build_command_buffer(&self, cmd: vk::CommandBuffer) {
        let raw = self.device.handle();
        let layout = self.pipeline_layout.as_ref().map(PipelineLayout::handle);

        if let Some(layout) = layout {
            if self.descriptor_set != vk::DescriptorSet::null() {
                unsafe {
                    raw.cmd_bind_descriptor_sets(
                        cmd,
                        vk::PipelineBindPoint::GRAPHICS,
                        layout,
                        INSTANCE_SET,
                        &[self.descriptor_set],
                        &[],
                    );
                }
            }
        }

        for primitive in &self.primitives {
            if let Some(layout) = layout {
                if let Some(set) = primitive.material().and_then(|m| m.descriptor_set()) {
                    unsafe {
                        raw.cmd_bind_descriptor_sets(cmd, vk::PipelineBindPoint::GRAPHICS, layout, MATERIAL_SET, &[set], &[]);
                    }
                }
                if !self.push_constant_stages.is_empty() {
                    let model: [[f32; 4]; 4] = self.model_matrix(primitive).into();
                    unsafe {
                        raw.cmd_push_constants(cmd, layout, self.push_constant_stages, 0, bytemuck::bytes_of(&model));
                    }
                }
            }
            primitive.draw(cmd);
        }
    }
}
