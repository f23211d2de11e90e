// Free-fly camera
//
// WASD moves along the view direction, mouse movement turns. Yaw and pitch
// are in degrees; pitch stays within ±89 so the view never flips.

use glam::{Mat4, Vec3};

use crate::config::CameraConfig;

const PITCH_LIMIT: f32 = 89.0;

/// Perspective parameters, applied to whatever aspect ratio the current
/// swapchain has.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lens {
    pub fov_degrees: f32,
    pub near: f32,
    pub far: f32,
}

impl Lens {
    pub fn projection(&self, aspect_ratio: f32) -> Mat4 {
        Mat4::perspective_rh(self.fov_degrees.to_radians(), aspect_ratio, self.near, self.far)
    }
}

/// Movement keys held during a frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct Movement {
    pub forward: bool,
    pub back: bool,
    pub left: bool,
    pub right: bool,
}

#[derive(Debug)]
pub struct Camera {
    pub position: Vec3,
    pub front: Vec3,
    pub up: Vec3,
    yaw: f32,
    pitch: f32,
    lens: Lens,
    speed: f32,
    sensitivity: f32,
    /// Previous cursor position, None until the first mouse event
    last_cursor: Option<(f64, f64)>,
}

impl Camera {
    pub fn new(config: &CameraConfig) -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 3.0),
            front: Vec3::NEG_Z,
            up: Vec3::Y,
            yaw: -90.0,
            pitch: 0.0,
            lens: Lens {
                fov_degrees: config.fov_degrees,
                near: config.near,
                far: config.far,
            },
            speed: config.speed,
            sensitivity: config.sensitivity,
            last_cursor: None,
        }
    }

    pub fn advance(&mut self, movement: Movement, dt: f32) {
        let step = self.speed * dt;
        let right = self.front.cross(self.up).normalize();

        if movement.forward {
            self.position += self.front * step;
        }
        if movement.back {
            self.position -= self.front * step;
        }
        if movement.left {
            self.position -= right * step;
        }
        if movement.right {
            self.position += right * step;
        }
    }

    /// Turn toward an absolute cursor position. The first event only records
    /// the position so the view does not jump.
    pub fn look(&mut self, cursor: (f64, f64)) {
        let Some((last_x, last_y)) = self.last_cursor.replace(cursor) else {
            return;
        };

        let dx = (cursor.0 - last_x) as f32 * self.sensitivity;
        let dy = (last_y - cursor.1) as f32 * self.sensitivity;

        self.yaw += dx;
        self.pitch = (self.pitch + dy).clamp(-PITCH_LIMIT, PITCH_LIMIT);
        self.front = direction(self.yaw, self.pitch);
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.position + self.front, self.up)
    }

    pub fn lens(&self) -> Lens {
        self.lens
    }
}

fn direction(yaw: f32, pitch: f32) -> Vec3 {
    let (yaw, pitch) = (yaw.to_radians(), pitch.to_radians());
    Vec3::new(yaw.cos() * pitch.cos(), pitch.sin(), yaw.sin() * pitch.cos()).normalize()
}
