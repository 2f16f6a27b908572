//! Orbit camera manipulator
//!
//! Keeps an eye point orbiting a target about a fixed up axis. Mouse
//! deltas are in pixels; one pixel is 1/100 radian of orbit or 1/100 unit
//! of pan.

use crate::core::CameraHome;
use crate::foundation::math::{Mat4, Point3, Vec3};
use nalgebra::{Rotation3, Unit};

const PIXELS_PER_UNIT: f32 = 100.0;
const ZOOM_IN_FACTOR: f32 = 0.9;
const ZOOM_OUT_FACTOR: f32 = 1.1;
const MIN_DISTANCE: f32 = 1.0;
const MAX_DISTANCE: f32 = 1000.0;

/// Orbit camera with a stored home position
#[derive(Debug, Clone, PartialEq)]
pub struct Manipulator {
    eye: Vec3,
    target: Vec3,
    up: Vec3,
    home: (Vec3, Vec3, Vec3),
}

impl Default for Manipulator {
    fn default() -> Self {
        Self::from_home(&CameraHome::default())
    }
}

impl Manipulator {
    /// Create a manipulator whose home is `eye` looking at `target`
    pub fn new(eye: Vec3, target: Vec3, up: Vec3) -> Self {
        let mut manipulator = Self {
            eye,
            target,
            up,
            home: (eye, target, up),
        };
        manipulator.set_home(eye, target, up);
        manipulator
    }

    /// Create a manipulator from a configured home
    pub fn from_home(home: &CameraHome) -> Self {
        Self::new(Vec3::from(home.eye), Vec3::from(home.target), Vec3::from(home.up))
    }

    /// Store a new home and move there
    pub fn set_home(&mut self, eye: Vec3, target: Vec3, up: Vec3) {
        self.home = (eye, target, up);
        self.place(eye, target, up);
    }

    /// Return to the stored home
    pub fn home(&mut self) {
        let (eye, target, up) = self.home;
        self.place(eye, target, up);
    }

    fn place(&mut self, eye: Vec3, target: Vec3, up: Vec3) {
        self.eye = eye;
        self.target = target;
        let dir = eye - target;
        let ortho = dir.cross(&up.cross(&dir));
        self.up = ortho.try_normalize(f32::EPSILON).unwrap_or(up);
    }

    /// Orbit the eye about the up axis through the target
    ///
    /// Only the horizontal delta is used.
    pub fn rotate(&mut self, dx: i32, _dy: i32) {
        if dx == 0 {
            return;
        }
        let Some(axis) = Unit::try_new(self.up, f32::EPSILON) else {
            return;
        };
        let rotation = Rotation3::from_axis_angle(&axis, -(dx as f32) / PIXELS_PER_UNIT);
        self.eye = self.target + rotation * (self.eye - self.target);
    }

    /// Pan eye and target together in the view plane
    pub fn translate(&mut self, dx: i32, dy: i32) {
        let forward = self.target - self.eye;
        let Some(right) = forward.cross(&self.up).try_normalize(f32::EPSILON) else {
            return;
        };
        let up = right.cross(&forward).normalize();
        let offset = right * (-(dx as f32) / PIXELS_PER_UNIT) + up * (dy as f32 / PIXELS_PER_UNIT);
        self.eye += offset;
        self.target += offset;
    }

    /// Move the eye toward or away from the target
    ///
    /// Returns false, leaving the camera unchanged, when the new distance
    /// would leave the [1, 1000] range.
    pub fn zoom(&mut self, zoom_in: bool) -> bool {
        let factor = if zoom_in { ZOOM_IN_FACTOR } else { ZOOM_OUT_FACTOR };
        let offset = (self.eye - self.target) * factor;
        let distance = offset.norm();
        if !(MIN_DISTANCE..=MAX_DISTANCE).contains(&distance) {
            return false;
        }
        self.eye = self.target + offset;
        true
    }

    /// Right-handed look-at matrix
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(&Point3::from(self.eye), &Point3::from(self.target), &self.up)
    }

    /// Eye position
    pub fn eye(&self) -> Vec3 {
        self.eye
    }

    /// Orbit target
    pub fn target(&self) -> Vec3 {
        self.target
    }

    /// Up axis, orthogonal to the view direction
    pub fn up(&self) -> Vec3 {
        self.up
    }

    /// Distance from eye to target
    pub fn distance(&self) -> f32 {
        (self.eye - self.target).norm()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn manipulator() -> Manipulator {
        Manipulator::new(Vec3::new(0.0, -30.0, 0.0), Vec3::zeros(), Vec3::new(0.0, 0.0, 1.0))
    }

    #[test]
    fn test_home_orthogonalises_up() {
        let m = Manipulator::new(Vec3::new(0.0, -10.0, 0.0), Vec3::zeros(), Vec3::new(0.0, 1.0, 1.0));
        assert_relative_eq!(m.up().dot(&(m.eye() - m.target())), 0.0, epsilon = 1e-5);
        assert_relative_eq!(m.up().norm(), 1.0, epsilon = 1e-5);
        assert_relative_eq!(m.up(), Vec3::new(0.0, 0.0, 1.0), epsilon = 1e-5);
    }

    #[test]
    fn test_rotate_keeps_distance_and_ignores_vertical() {
        let mut m = manipulator();
        m.rotate(0, 50);
        assert_eq!(m, manipulator());

        m.rotate(157, 0);
        assert_relative_eq!(m.distance(), 30.0, epsilon = 1e-3);
        assert_relative_eq!(m.eye().z, 0.0, epsilon = 1e-5);
        assert!((m.eye().x).abs() > 29.0);
    }

    #[test]
    fn test_translate_moves_eye_and_target_together() {
        let mut m = manipulator();
        m.translate(100, 0);
        assert_relative_eq!(m.distance(), 30.0, epsilon = 1e-5);
        assert_relative_eq!((m.target() - Vec3::zeros()).norm(), 1.0, epsilon = 1e-5);

        m.translate(0, 200);
        assert_relative_eq!(m.target().z, 2.0, epsilon = 1e-5);
    }

    #[test]
    fn test_zoom_respects_bounds() {
        let mut m = manipulator();
        assert!(m.zoom(true));
        assert_relative_eq!(m.distance(), 27.0, epsilon = 1e-4);
        assert!(m.zoom(false));
        assert_relative_eq!(m.distance(), 29.7, epsilon = 1e-4);

        let mut close = Manipulator::new(Vec3::new(0.0, -1.05, 0.0), Vec3::zeros(), Vec3::z());
        assert!(!close.zoom(true));
        assert_relative_eq!(close.distance(), 1.05, epsilon = 1e-6);

        let mut far = Manipulator::new(Vec3::new(0.0, -950.0, 0.0), Vec3::zeros(), Vec3::z());
        assert!(!far.zoom(false));
    }

    #[test]
    fn test_home_restores_stored_position() {
        let mut m = manipulator();
        m.rotate(40, 0);
        m.translate(10, 10);
        m.zoom(true);
        m.home();
        assert_eq!(m, manipulator());
    }

    #[test]
    fn test_view_matrix_moves_target_in_front_of_camera() {
        let m = manipulator();
        let target = m.view_matrix().transform_point(&Point3::origin());
        assert_relative_eq!(target.z, -30.0, epsilon = 1e-4);
        assert_relative_eq!(target.x, 0.0, epsilon = 1e-4);
    }
}
