// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]

pub use glam;
use glam::{Mat4, Vec3};

const PITCH_LIMIT: f32 = 1.55;
const MIN_DISTANCE: f32 = 0.05;

/// Orbit camera around a target point. Produces Vulkan clip-space matrices
/// (depth 0..1, Y pointing down).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    pub target: Vec3,
    pub distance: f32,
    pub yaw: f32,
    pub pitch: f32,
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            target: Vec3::ZERO,
            distance: 3.0,
            yaw: 0.0,
            pitch: 0.0,
            fov_y: 45f32.to_radians(),
            aspect: 1200.0 / 720.0,
            near: 0.1,
            far: 256.0,
        }
    }
}

impl Camera {
    pub fn eye(&self) -> Vec3 {
        let (sy, cy) = self.yaw.sin_cos();
        let (sp, cp) = self.pitch.sin_cos();
        self.target + Vec3::new(cp * sy, sp, cp * cy) * self.distance
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye(), self.target, Vec3::Y)
    }

    pub fn proj(&self) -> Mat4 {
        let mut p = Mat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far);
        // GL-style Y up -> Vulkan Y down
        p.y_axis.y *= -1.0;
        p
    }

    pub fn set_viewport(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.aspect = width as f32 / height as f32;
        }
    }

    /// Rotates by a cursor delta in radians. Pitch stays clear of the poles.
    pub fn orbit(&mut self, d_yaw: f32, d_pitch: f32) {
        self.yaw = (self.yaw + d_yaw).rem_euclid(std::f32::consts::TAU);
        self.pitch = (self.pitch + d_pitch).clamp(-PITCH_LIMIT, PITCH_LIMIT);
    }

    /// Positive steps move towards the target.
    pub fn zoom(&mut self, steps: f32) {
        self.distance = (self.distance * 0.9f32.powf(steps)).max(MIN_DISTANCE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;
    use rstest::rstest;

    #[test]
    fn default_eye_sits_on_positive_z() {
        let cam = Camera::default();
        assert!((cam.eye() - Vec3::new(0.0, 0.0, 3.0)).length() < 1e-5);
    }

    #[test]
    fn proj_flips_y_for_vulkan() {
        let cam = Camera::default();
        let clip = cam.proj() * cam.view() * Vec4::new(0.0, 1.0, 0.0, 1.0);
        assert!(clip.y / clip.w < 0.0);
    }

    #[test]
    fn target_projects_into_depth_range() {
        let cam = Camera::default();
        let clip = cam.proj() * cam.view() * cam.target.extend(1.0);
        let z = clip.z / clip.w;
        assert!((0.0..=1.0).contains(&z));
    }

    #[rstest]
    #[case(10.0)]
    #[case(-10.0)]
    fn pitch_is_clamped(#[case] delta: f32) {
        let mut cam = Camera::default();
        cam.orbit(0.0, delta);
        assert!(cam.pitch.abs() <= PITCH_LIMIT);
    }

    #[test]
    fn zoom_never_reaches_target() {
        let mut cam = Camera::default();
        cam.zoom(1000.0);
        assert!(cam.distance >= MIN_DISTANCE);
        cam.zoom(-2.0);
        assert!(cam.distance > MIN_DISTANCE);
    }

    #[test]
    fn zero_viewport_keeps_aspect() {
        let mut cam = Camera::default();
        let before = cam.aspect;
        cam.set_viewport(0, 720);
        assert_eq!(cam.aspect, before);
        cam.set_viewport(800, 400);
        assert_eq!(cam.aspect, 2.0);
    }
}
