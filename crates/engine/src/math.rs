use std::ops::{Add, Mul, Sub};

use serde::{Deserialize, Serialize};

/// World-space vector. Serialized as `[x, y, z]`, the layout used by episode
/// files and recorded object states.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 3]", into = "[f32; 3]")]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Length of the projection onto the ground (x/z) plane.
    pub fn planar_length(self) -> f32 {
        (self.x * self.x + self.z * self.z).sqrt()
    }

    pub fn distance(self, other: Vec3) -> f32 {
        (self - other).length()
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl From<[f32; 3]> for Vec3 {
    fn from(value: [f32; 3]) -> Self {
        Self::new(value[0], value[1], value[2])
    }
}

impl From<Vec3> for [f32; 3] {
    fn from(value: Vec3) -> Self {
        [value.x, value.y, value.z]
    }
}

impl Add for Vec3 {
    type Output = Vec3;

    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Vec3;

    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for Vec3 {
    type Output = Vec3;

    fn mul(self, rhs: f32) -> Vec3 {
        Vec3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

/// Unit quaternion in coefficient order `[x, y, z, w]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct Quat {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Default for Quat {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Quat {
    pub const IDENTITY: Quat = Quat {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };

    pub const fn from_coeffs(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }

    pub fn from_axis_angle(axis: Vec3, angle_radians: f32) -> Self {
        let len = axis.length();
        if len <= f32::EPSILON {
            return Self::IDENTITY;
        }
        let (sin, cos) = (angle_radians * 0.5).sin_cos();
        let scale = sin / len;
        Self::from_coeffs(axis.x * scale, axis.y * scale, axis.z * scale, cos)
    }

    pub fn conjugate(self) -> Self {
        Self::from_coeffs(-self.x, -self.y, -self.z, self.w)
    }

    /// Hamilton product `self * rhs`.
    pub fn mul(self, rhs: Quat) -> Quat {
        Quat::from_coeffs(
            self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
            self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
        )
    }

    pub fn normalized(self) -> Quat {
        let len = (self.x * self.x + self.y * self.y + self.z * self.z + self.w * self.w).sqrt();
        if len <= f32::EPSILON || !len.is_finite() {
            return Self::IDENTITY;
        }
        Quat::from_coeffs(self.x / len, self.y / len, self.z / len, self.w / len)
    }

    /// Computes `q' * v * q`, taking a world-space vector into the frame
    /// this rotation describes.
    pub fn inverse_rotate(self, v: Vec3) -> Vec3 {
        let ix = self.w * v.x - self.y * v.z + self.z * v.y;
        let iy = self.w * v.y - self.z * v.x + self.x * v.z;
        let iz = self.w * v.z - self.x * v.y + self.y * v.x;
        let iw = self.x * v.x + self.y * v.y + self.z * v.z;

        Vec3::new(
            ix * self.w + iw * self.x + iy * self.z - iz * self.y,
            iy * self.w + iw * self.y + iz * self.x - ix * self.z,
            iz * self.w + iw * self.z + ix * self.y - iy * self.x,
        )
    }

    /// Computes `q * v * q'`.
    pub fn rotate(self, v: Vec3) -> Vec3 {
        self.conjugate().inverse_rotate(v)
    }
}

impl From<[f32; 4]> for Quat {
    fn from(value: [f32; 4]) -> Self {
        Self::from_coeffs(value[0], value[1], value[2], value[3])
    }
}

impl From<Quat> for [f32; 4] {
    fn from(value: Quat) -> Self {
        [value.x, value.y, value.z, value.w]
    }
}

pub const UP: Vec3 = Vec3::new(0.0, 1.0, 0.0);
pub const FORWARD: Vec3 = Vec3::new(0.0, 0.0, -1.0);

/// Polar offset of `target` as seen by an observer at `origin` facing along
/// `rotation`: `(magnitude, clockwise angle in radians)` where angle 0 is
/// straight ahead.
pub fn polar_offset(origin: Vec3, rotation: Quat, target: Vec3) -> (f32, f32) {
    let local = rotation.inverse_rotate(target - origin);
    cartesian_to_polar(-local.z, local.x)
}

pub fn cartesian_to_polar(x: f32, y: f32) -> (f32, f32) {
    ((x * x + y * y).sqrt(), y.atan2(x))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f32, expected: f32) {
        assert!(
            (actual - expected).abs() <= 1e-5,
            "{actual} vs {expected}"
        );
    }

    #[test]
    fn vec3_serializes_as_array() {
        let json = serde_json::to_string(&Vec3::new(1.0, 2.5, -3.0)).expect("encode");
        assert_eq!(json, "[1.0,2.5,-3.0]");
        let back: Vec3 = serde_json::from_str("[0.5, 0, 1]").expect("decode");
        assert_eq!(back, Vec3::new(0.5, 0.0, 1.0));
    }

    #[test]
    fn rotate_and_inverse_rotate_cancel() {
        let q = Quat::from_axis_angle(UP, 0.7);
        let v = Vec3::new(1.0, 2.0, 3.0);
        let back = q.inverse_rotate(q.rotate(v));
        assert_close(back.x, v.x);
        assert_close(back.y, v.y);
        assert_close(back.z, v.z);
    }

    #[test]
    fn quarter_turn_left_maps_forward_to_negative_x() {
        let q = Quat::from_axis_angle(UP, std::f32::consts::FRAC_PI_2);
        let facing = q.rotate(FORWARD);
        assert_close(facing.x, -1.0);
        assert_close(facing.z, 0.0);
    }

    #[test]
    fn polar_offset_is_zero_angle_straight_ahead() {
        let (magnitude, angle) =
            polar_offset(Vec3::ZERO, Quat::IDENTITY, Vec3::new(0.0, 0.0, -4.0));
        assert_close(magnitude, 4.0);
        assert_close(angle, 0.0);
    }

    #[test]
    fn polar_offset_angle_is_clockwise() {
        let (_, right) = polar_offset(Vec3::ZERO, Quat::IDENTITY, Vec3::new(2.0, 0.0, 0.0));
        assert_close(right, std::f32::consts::FRAC_PI_2);

        // After turning left a quarter, a target on the world -x axis is ahead.
        let turned = Quat::from_axis_angle(UP, std::f32::consts::FRAC_PI_2);
        let (_, ahead) = polar_offset(Vec3::ZERO, turned, Vec3::new(-3.0, 0.0, 0.0));
        assert_close(ahead, 0.0);
    }
}
