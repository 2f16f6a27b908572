//! Uniform blocks shared with the shaders
//!
//! All blocks use std140-compatible layouts: vec3 quantities are padded to
//! vec4 and matrices are column-major.

use bytemuck::{Pod, Zeroable};

use crate::foundation::math::{Mat4, Vec3, Vec4};

/// Model, projection and view matrices plus the eye position
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Mvp {
    /// Model matrix
    pub model: [[f32; 4]; 4],
    /// Projection matrix
    pub projection: [[f32; 4]; 4],
    /// View matrix
    pub view: [[f32; 4]; 4],
    /// Eye position in world space; w is 1
    pub eye: [f32; 4],
}

impl Default for Mvp {
    fn default() -> Self {
        Self::new(&Mat4::identity(), &Mat4::identity(), &Mat4::identity(), Vec3::zeros())
    }
}

impl Mvp {
    /// Pack the matrices and eye position
    pub fn new(model: &Mat4, projection: &Mat4, view: &Mat4, eye: Vec3) -> Self {
        Self {
            model: (*model).into(),
            projection: (*projection).into(),
            view: (*view).into(),
            eye: [eye.x, eye.y, eye.z, 1.0],
        }
    }
}

/// Perspective projection for Vulkan depth (0..1)
///
/// Pairs with the flipped viewport the frame loop sets, so no Y inversion
/// is applied here.
pub fn perspective(fov_y_radians: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
    let f = 1.0 / (fov_y_radians * 0.5).tan();
    let mut m = Mat4::zeros();
    m[(0, 0)] = f / aspect;
    m[(1, 1)] = f;
    m[(2, 2)] = far / (near - far);
    m[(2, 3)] = near * far / (near - far);
    m[(3, 2)] = -1.0;
    m
}

/// Directional light
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct ParallelLight {
    /// Direction the light travels; w unused
    pub direction: [f32; 4],
    /// Linear RGB colour; w is intensity
    pub color: [f32; 4],
}

impl ParallelLight {
    /// Light travelling along `direction`
    pub fn new(direction: Vec3, color: Vec4) -> Self {
        Self {
            direction: [direction.x, direction.y, direction.z, 0.0],
            color: color.into(),
        }
    }
}

/// Point light
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct PointLight {
    /// Position in world space; w is 1
    pub position: [f32; 4],
    /// Linear RGB colour; w is intensity
    pub color: [f32; 4],
}

impl PointLight {
    /// Light at `position`
    pub fn new(position: Vec3, color: Vec4) -> Self {
        Self {
            position: [position.x, position.y, position.z, 1.0],
            color: color.into(),
        }
    }
}

/// Scalar PBR material factors
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PbrFactors {
    /// Ambient occlusion
    pub ao: f32,
    /// Metalness
    pub metallic: f32,
    /// Roughness
    pub roughness: f32,
    /// Non-zero when a base colour texture is bound
    pub textured: u32,
    /// Base colour
    pub albedo: [f32; 4],
}

impl Default for PbrFactors {
    fn default() -> Self {
        Self {
            ao: 1.0,
            metallic: 1.0,
            roughness: 1.0,
            textured: 0,
            albedo: [1.0; 4],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_block_sizes_match_std140() {
        assert_eq!(std::mem::size_of::<Mvp>(), 3 * 64 + 16);
        assert_eq!(std::mem::size_of::<ParallelLight>(), 32);
        assert_eq!(std::mem::size_of::<PointLight>(), 32);
        assert_eq!(std::mem::size_of::<PbrFactors>(), 32);
    }

    #[test]
    fn test_mvp_is_column_major() {
        let model = Mat4::new_translation(&Vec3::new(1.0, 2.0, 3.0));
        let mvp = Mvp::new(&model, &Mat4::identity(), &Mat4::identity(), Vec3::new(0.0, -5.0, 0.0));
        assert_eq!(mvp.model[3], [1.0, 2.0, 3.0, 1.0]);
        assert_eq!(mvp.eye, [0.0, -5.0, 0.0, 1.0]);
    }

    #[test]
    fn test_perspective_maps_near_and_far_to_unit_depth() {
        let proj = perspective(std::f32::consts::FRAC_PI_2, 1.0, 0.1, 100.0);
        let near = proj * Vec4::new(0.0, 0.0, -0.1, 1.0);
        let far = proj * Vec4::new(0.0, 0.0, -100.0, 1.0);
        assert_relative_eq!(near.z / near.w, 0.0, epsilon = 1e-5);
        assert_relative_eq!(far.z / far.w, 1.0, epsilon = 1e-5);
    }
}
