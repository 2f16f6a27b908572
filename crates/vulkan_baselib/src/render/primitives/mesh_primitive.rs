//! GPU-resident mesh primitive
//!
//! A [`MeshPrimitive`] owns one device-local buffer per vertex attribute plus
//! an index buffer. Every buffer is filled through the staging path in
//! [`Device::upload_buffer`], so adding data blocks until the copy has
//! finished.
//!
//! Attribute locations follow a fixed naming convention:
//!
//! | name         | location |
//! |--------------|----------|
//! | `POSITION`   | 0        |
//! | `NORMAL`     | 1        |
//! | `TEXCOORD_0` | 2        |
//! | `TEXCOORD_1` | 3        |
//!
//! Each attribute gets its own binding, numbered like its location.

use ash::vk;
use std::sync::Arc;

use super::material::Material;
use crate::foundation::math::Mat4;
use crate::render::backends::vulkan::{
    Buffer, Device, GraphicsPipelineDesc, Pipeline, VulkanError, VulkanResult,
};

/// Location of a named vertex attribute, or `None` for names that are ignored
pub fn attribute_location(name: &str) -> Option<u32> {
    match name {
        "POSITION" => Some(0),
        "NORMAL" => Some(1),
        "TEXCOORD_0" => Some(2),
        "TEXCOORD_1" => Some(3),
        _ => None,
    }
}

/// Size in bytes of one index of `index_type`
///
/// Only 16- and 32-bit indices are accepted.
pub fn index_size(index_type: vk::IndexType) -> Option<usize> {
    match index_type {
        vk::IndexType::UINT16 => Some(2),
        vk::IndexType::UINT32 => Some(4),
        _ => None,
    }
}

struct VertexStream {
    buffer: Buffer,
    binding: vk::VertexInputBindingDescription,
    attribute: vk::VertexInputAttributeDescription,
    vertex_count: u32,
}

struct IndexStream {
    buffer: Buffer,
    index_type: vk::IndexType,
    count: u32,
}

/// Vertex and index buffers for one draw call
pub struct MeshPrimitive {
    device: Arc<Device>,
    topology: vk::PrimitiveTopology,
    matrix: Mat4,
    vertices: Vec<VertexStream>,
    indices: Option<IndexStream>,
    material: Option<Arc<Material>>,
    pipeline: Option<Pipeline>,
}

impl MeshPrimitive {
    /// Create an empty primitive with the given topology
    pub fn new(device: &Arc<Device>, topology: vk::PrimitiveTopology) -> Self {
        Self {
            device: Arc::clone(device),
            topology,
            matrix: Mat4::identity(),
            vertices: Vec::new(),
            indices: None,
            material: None,
            pipeline: None,
        }
    }

    /// Upload one vertex attribute
    ///
    /// `stride` is the distance between consecutive elements in `data`.
    /// Replaces any attribute already at `location`.
    pub fn add_vertex_buf(&mut self, location: u32, format: vk::Format, stride: u32, data: &[u8]) -> VulkanResult<()> {
        if stride == 0 || data.is_empty() {
            return Err(VulkanError::InvalidOperation {
                reason: format!("vertex attribute {location} needs a non-zero stride and data"),
            });
        }

        let buffer = self.device.upload_buffer(vk::BufferUsageFlags::VERTEX_BUFFER, data)?;
        let stream = VertexStream {
            buffer,
            binding: vk::VertexInputBindingDescription {
                binding: location,
                stride,
                input_rate: vk::VertexInputRate::VERTEX,
            },
            attribute: vk::VertexInputAttributeDescription {
                location,
                binding: location,
                format,
                offset: 0,
            },
            vertex_count: (data.len() / stride as usize) as u32,
        };

        self.vertices.retain(|s| s.attribute.location != location);
        let at = self.vertices.partition_point(|s| s.attribute.location < location);
        self.vertices.insert(at, stream);
        Ok(())
    }

    /// Upload a vertex attribute by name
    ///
    /// Returns `false` without uploading when the name has no location.
    pub fn add_named_vertex_buf(&mut self, name: &str, format: vk::Format, stride: u32, data: &[u8]) -> VulkanResult<bool> {
        match attribute_location(name) {
            Some(location) => {
                self.add_vertex_buf(location, format, stride, data)?;
                Ok(true)
            }
            None => {
                log::debug!("Ignoring vertex attribute {name}");
                Ok(false)
            }
        }
    }

    /// Upload a typed vertex attribute, one element per value
    pub fn add_vertex_data<T: bytemuck::Pod>(&mut self, location: u32, format: vk::Format, values: &[T]) -> VulkanResult<()> {
        self.add_vertex_buf(location, format, std::mem::size_of::<T>() as u32, bytemuck::cast_slice(values))
    }

    /// Upload the index buffer
    ///
    /// The index count is derived from the byte length.
    pub fn set_index_buf(&mut self, index_type: vk::IndexType, data: &[u8]) -> VulkanResult<()> {
        let size = index_size(index_type).ok_or_else(|| VulkanError::InvalidOperation {
            reason: format!("unsupported index type {index_type:?}"),
        })?;
        if data.is_empty() || data.len() % size != 0 {
            return Err(VulkanError::InvalidOperation {
                reason: format!("{} index bytes are not a whole number of {size}-byte indices", data.len()),
            });
        }

        let buffer = self.device.upload_buffer(vk::BufferUsageFlags::INDEX_BUFFER, data)?;
        self.indices = Some(IndexStream {
            buffer,
            index_type,
            count: (data.len() / size) as u32,
        });
        Ok(())
    }

    /// Upload 16-bit indices
    pub fn set_indices_u16(&mut self, indices: &[u16]) -> VulkanResult<()> {
        self.set_index_buf(vk::IndexType::UINT16, bytemuck::cast_slice(indices))
    }

    /// Upload 32-bit indices
    pub fn set_indices_u32(&mut self, indices: &[u32]) -> VulkanResult<()> {
        self.set_index_buf(vk::IndexType::UINT32, bytemuck::cast_slice(indices))
    }

    /// Set the local transform
    pub fn set_matrix(&mut self, matrix: Mat4) {
        self.matrix = matrix;
    }

    /// Local transform
    pub fn matrix(&self) -> &Mat4 {
        &self.matrix
    }

    /// Attach the material
    pub fn set_material(&mut self, material: Arc<Material>) {
        self.material = Some(material);
    }

    /// Attached material
    pub fn material(&self) -> Option<&Arc<Material>> {
        self.material.as_ref()
    }

    /// Primitive topology
    pub fn topology(&self) -> vk::PrimitiveTopology {
        self.topology
    }

    /// Number of indices; 0 without an index buffer
    pub fn index_count(&self) -> u32 {
        self.indices.as_ref().map_or(0, |i| i.count)
    }

    /// Index type, when an index buffer is set
    pub fn index_type(&self) -> Option<vk::IndexType> {
        self.indices.as_ref().map(|i| i.index_type)
    }

    /// Index buffer, when set
    pub fn index_buffer(&self) -> Option<&Buffer> {
        self.indices.as_ref().map(|i| &i.buffer)
    }

    /// Number of vertex attribute buffers
    pub fn attribute_count(&self) -> usize {
        self.vertices.len()
    }

    /// Vertex buffer at `location`
    pub fn vertex_buffer(&self, location: u32) -> Option<&Buffer> {
        self.vertices
            .iter()
            .find(|s| s.attribute.location == location)
            .map(|s| &s.buffer)
    }

    /// Vertices in the smallest attribute stream
    pub fn vertex_count(&self) -> u32 {
        self.vertices.iter().map(|s| s.vertex_count).min().unwrap_or(0)
    }

    /// Binding descriptions, ordered by location
    pub fn input_bindings(&self) -> Vec<vk::VertexInputBindingDescription> {
        self.vertices.iter().map(|s| s.binding).collect()
    }

    /// Attribute descriptions, ordered by location
    pub fn input_attributes(&self) -> Vec<vk::VertexInputAttributeDescription> {
        self.vertices.iter().map(|s| s.attribute).collect()
    }

    /// Cull mode from the material; back-face culling without one
    pub fn cull_mode(&self) -> vk::CullModeFlags {
        self.material
            .as_ref()
            .map_or(vk::CullModeFlags::BACK, |m| m.cull_mode())
    }

    /// Build this primitive's own graphics pipeline
    ///
    /// Vertex input comes from the uploaded attributes, topology from the
    /// primitive and culling from the material.
    pub fn create_pipeline(
        &mut self,
        render_pass: vk::RenderPass,
        layout: vk::PipelineLayout,
        stages: &[vk::PipelineShaderStageCreateInfo],
        subpass: u32,
    ) -> VulkanResult<()> {
        let bindings = self.input_bindings();
        let attributes = self.input_attributes();
        let desc = GraphicsPipelineDesc::new(render_pass, layout, stages)
            .with_vertex_input(&bindings, &attributes)
            .with_topology(self.topology)
            .with_cull_mode(self.cull_mode())
            .with_subpass(subpass);
        self.pipeline = Some(Pipeline::graphics(&self.device, &desc)?);
        Ok(())
    }

    /// Pipeline built by [`MeshPrimitive::create_pipeline`]
    pub fn pipeline(&self) -> Option<&Pipeline> {
        self.pipeline.as_ref()
    }

    /// Record pipeline, buffer binds and the draw
    pub fn draw(&self, cmd: vk::CommandBuffer) {
        let raw = self.device.handle();
        unsafe {
            if let Some(pipeline) = &self.pipeline {
                raw.cmd_bind_pipeline(cmd, pipeline.bind_point(), pipeline.handle());
            }
            for stream in &self.vertices {
                raw.cmd_bind_vertex_buffers(cmd, stream.binding.binding, &[stream.buffer.handle()], &[0]);
            }
            match &self.indices {
                Some(indices) => {
                    raw.cmd_bind_index_buffer(cmd, indices.buffer.handle(), 0, indices.index_type);
                    raw.cmd_draw_indexed(cmd, indices.count, 1, 0, 0, 0);
                }
                None => raw.cmd_draw(cmd, self.vertex_count(), 1, 0, 0),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_name_convention() {
        assert_eq!(attribute_location("POSITION"), Some(0));
        assert_eq!(attribute_location("NORMAL"), Some(1));
        assert_eq!(attribute_location("TEXCOORD_0"), Some(2));
        assert_eq!(attribute_location("TEXCOORD_1"), Some(3));
        assert_eq!(attribute_location("TANGENT"), None);
        assert_eq!(attribute_location("COLOR_0"), None);
    }

    #[test]
    fn test_only_16_and_32_bit_indices() {
        assert_eq!(index_size(vk::IndexType::UINT16), Some(2));
        assert_eq!(index_size(vk::IndexType::UINT32), Some(4));
        assert_eq!(index_size(vk::IndexType::UINT8_EXT), None);
    }
}
