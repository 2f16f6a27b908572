//! Procedural shapes

use ash::vk;
use std::f32::consts::PI;
use std::sync::Arc;

use super::mesh_primitive::MeshPrimitive;
use crate::foundation::math::{Vec2, Vec3};
use crate::render::backends::vulkan::{Device, VulkanResult};

/// Unit UV sphere drawn as a single triangle strip
///
/// The seam column is duplicated so texture coordinates wrap cleanly.
#[derive(Debug, Clone)]
pub struct Sphere {
    x_segments: u32,
    y_segments: u32,
    positions: Vec<[f32; 3]>,
    normals: Vec<[f32; 3]>,
    uvs: Vec<[f32; 2]>,
    indices: Vec<u16>,
}

impl Default for Sphere {
    fn default() -> Self {
        Self::new(64, 32)
    }
}

impl Sphere {
    /// Generate a sphere with the given number of longitude and latitude segments
    pub fn new(x_segments: u32, y_segments: u32) -> Self {
        let x_segments = x_segments.max(3);
        let y_segments = y_segments.max(2);
        let columns = x_segments + 1;

        let vertex_count = (columns * (y_segments + 1)) as usize;
        let mut positions = Vec::with_capacity(vertex_count);
        let mut normals = Vec::with_capacity(vertex_count);
        let mut uvs = Vec::with_capacity(vertex_count);

        for y in 0..=y_segments {
            for x in 0..=x_segments {
                let u = x as f32 / x_segments as f32;
                let v = y as f32 / y_segments as f32;
                let p = Vec3::new(
                    (u * 2.0 * PI).cos() * (v * PI).sin(),
                    (v * PI).cos(),
                    (u * 2.0 * PI).sin() * (v * PI).sin(),
                );
                positions.push(p.into());
                normals.push(p.into());
                uvs.push(Vec2::new(u, v).into());
            }
        }

        // rows alternate direction so the strip never jumps back
        let mut indices = Vec::with_capacity((columns * y_segments * 2) as usize);
        for y in 0..y_segments {
            let row = y * columns;
            let next = (y + 1) * columns;
            if y % 2 == 0 {
                for x in 0..columns {
                    indices.push((row + x) as u16);
                    indices.push((next + x) as u16);
                }
            } else {
                for x in (0..columns).rev() {
                    indices.push((next + x) as u16);
                    indices.push((row + x) as u16);
                }
            }
        }

        Self {
            x_segments,
            y_segments,
            positions,
            normals,
            uvs,
            indices,
        }
    }

    /// Longitude and latitude segment counts
    pub fn segments(&self) -> (u32, u32) {
        (self.x_segments, self.y_segments)
    }

    /// Vertex positions on the unit sphere
    pub fn positions(&self) -> &[[f32; 3]] {
        &self.positions
    }

    /// Outward normals
    pub fn normals(&self) -> &[[f32; 3]] {
        &self.normals
    }

    /// Texture coordinates
    pub fn uvs(&self) -> &[[f32; 2]] {
        &self.uvs
    }

    /// Triangle-strip indices
    pub fn indices(&self) -> &[u16] {
        &self.indices
    }

    /// Upload as a triangle-strip primitive with position, normal and UV streams
    pub fn to_primitive(&self, device: &Arc<Device>) -> VulkanResult<MeshPrimitive> {
        let mut primitive = MeshPrimitive::new(device, vk::PrimitiveTopology::TRIANGLE_STRIP);
        primitive.add_vertex_data(0, vk::Format::R32G32B32_SFLOAT, &self.positions)?;
        primitive.add_vertex_data(1, vk::Format::R32G32B32_SFLOAT, &self.normals)?;
        primitive.add_vertex_data(2, vk::Format::R32G32_SFLOAT, &self.uvs)?;
        primitive.set_indices_u16(&self.indices)?;
        Ok(primitive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_sphere_counts() {
        let sphere = Sphere::default();
        assert_eq!(sphere.positions().len(), 65 * 33);
        assert_eq!(sphere.normals().len(), sphere.positions().len());
        assert_eq!(sphere.uvs().len(), sphere.positions().len());
        assert_eq!(sphere.indices().len(), 65 * 32 * 2);
    }

    #[test]
    fn test_vertices_lie_on_unit_sphere() {
        let sphere = Sphere::new(8, 4);
        for p in sphere.positions() {
            assert_relative_eq!(Vec3::from(*p).norm(), 1.0, epsilon = 1e-5);
        }
        assert_relative_eq!(sphere.positions()[0][1], 1.0, epsilon = 1e-6);
        assert_relative_eq!(sphere.positions().last().unwrap()[1], -1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_strip_indices_are_in_range_and_connected() {
        let sphere = Sphere::new(6, 3);
        let vertex_count = sphere.positions().len() as u16;
        assert!(sphere.indices().iter().all(|&i| i < vertex_count));

        // consecutive rows share their turning vertex
        let row_len = 7 * 2;
        let end_of_first = sphere.indices()[row_len - 1];
        assert_eq!(sphere.indices()[row_len + 1], end_of_first);
        assert_eq!(sphere.indices()[row_len], end_of_first + 7);
    }
}
