//! Math utilities and types
//!
//! Provides the nalgebra aliases used by the camera, mesh transforms and
//! the glTF node hierarchy.

pub use nalgebra::{
    Vector2, Vector3, Vector4,
    Matrix3, Matrix4,
    Quaternion,
    Unit,
};

/// 2D vector type
pub type Vec2 = Vector2<f32>;

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 3x3 matrix type
pub type Mat3 = Matrix3<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// 3D point type
pub type Point3 = nalgebra::Point3<f32>;

/// Quaternion type for rotations
pub type Quat = Unit<Quaternion<f32>>;

/// Translation, rotation and scale of a node
///
/// Components left unset by an asset default to identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Transform {
    /// Position in 3D space
    pub position: Vec3,

    /// Rotation quaternion
    pub rotation: Quat,

    /// Scale factors
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::zeros(),
            rotation: Quat::identity(),
            scale: Vec3::new(1.0, 1.0, 1.0),
        }
    }
}

impl Transform {
    /// Create a new identity transform
    pub fn identity() -> Self {
        Self::default()
    }

    /// Create a transform with only position
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    /// Compose into a matrix as `translation * scale * rotation`
    pub fn to_matrix(&self) -> Mat4 {
        let translation = Mat4::new_translation(&self.position);
        let scale = Mat4::new_nonuniform_scaling(&self.scale);
        let rotation = self.rotation.to_homogeneous();
        translation * scale * rotation
    }
}

/// Rotation that takes a Y-up asset into the Z-up world used by the camera
pub fn y_up_to_z_up() -> Mat4 {
    Mat4::from_axis_angle(&Vec3::x_axis(), std::f32::consts::FRAC_PI_2)
}

/// Math utility functions
pub mod utils {
    /// Convert degrees to radians
    pub fn deg_to_rad(degrees: f32) -> f32 {
        degrees.to_radians()
    }

    /// Convert radians to degrees
    pub fn rad_to_deg(radians: f32) -> f32 {
        radians.to_degrees()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn identity_transform_is_identity_matrix() {
        assert_relative_eq!(Transform::identity().to_matrix(), Mat4::identity());
    }

    #[test]
    fn translation_is_applied_last() {
        let transform = Transform {
            position: Vec3::new(1.0, 2.0, 3.0),
            rotation: Quat::from_axis_angle(&Vec3::z_axis(), std::f32::consts::FRAC_PI_2),
            scale: Vec3::new(2.0, 2.0, 2.0),
        };
        let p = transform.to_matrix().transform_point(&Point3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(p, Point3::new(1.0, 4.0, 3.0), epsilon = 1e-5);
    }

    #[test]
    fn axis_correction_maps_y_to_z() {
        let v = y_up_to_z_up().transform_vector(&Vec3::y());
        assert_relative_eq!(v, Vec3::z(), epsilon = 1e-6);
    }

    #[test]
    fn test_angle_conversion() {
        assert_relative_eq!(utils::deg_to_rad(180.0), std::f32::consts::PI);
        assert_relative_eq!(utils::rad_to_deg(std::f32::consts::PI), 180.0);
    }
}
