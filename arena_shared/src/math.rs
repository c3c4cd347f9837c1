//! Math types.
//!
//! This module intentionally stays small and deterministic.
//! It avoids SIMD/unsafe and focuses on stable semantics.

use std::ops::{Add, AddAssign, Mul, Neg, Sub};

use serde::{Deserialize, Serialize};

/// 3D vector. Y is up.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const UP: Self = Self {
        x: 0.0,
        y: 1.0,
        z: 0.0,
    };

    pub const DOWN: Self = Self {
        x: 0.0,
        y: -1.0,
        z: 0.0,
    };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn dot(self, rhs: Self) -> f32 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    pub fn cross(self, rhs: Self) -> Self {
        Self::new(
            self.y * rhs.z - self.z * rhs.y,
            self.z * rhs.x - self.x * rhs.z,
            self.x * rhs.y - self.y * rhs.x,
        )
    }

    pub fn len_sq(self) -> f32 {
        self.dot(self)
    }

    pub fn length(self) -> f32 {
        self.len_sq().sqrt()
    }

    /// Returns the unit vector, or zero when the length is negligible.
    pub fn normalize_or_zero(self) -> Self {
        let len = self.length();
        if len > 1e-6 {
            self * (1.0 / len)
        } else {
            Self::ZERO
        }
    }

    /// Drops the vertical component.
    pub fn horizontal(self) -> Self {
        Self::new(self.x, 0.0, self.z)
    }

    pub fn distance(self, other: Self) -> f32 {
        (other - self).length()
    }

    pub fn lerp(self, to: Self, t: f32) -> Self {
        let t = t.clamp(0.0, 1.0);
        Self::new(
            self.x + (to.x - self.x) * t,
            self.y + (to.y - self.y) * t,
            self.z + (to.z - self.z) * t,
        )
    }

    pub fn axis(self, i: usize) -> f32 {
        match i {
            0 => self.x,
            1 => self.y,
            _ => self.z,
        }
    }
}

impl Add for Vec3 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl AddAssign for Vec3 {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for Vec3 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for Vec3 {
    type Output = Self;

    fn mul(self, s: f32) -> Self {
        Self::new(self.x * s, self.y * s, self.z * s)
    }
}

impl Neg for Vec3 {
    type Output = Self;

    fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}

/// Unit quaternion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
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
    pub const IDENTITY: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };

    /// Rotation of `angle` radians around a unit `axis`.
    pub fn from_axis_angle(axis: Vec3, angle: f32) -> Self {
        let (s, c) = (angle * 0.5).sin_cos();
        Self {
            x: axis.x * s,
            y: axis.y * s,
            z: axis.z * s,
            w: c,
        }
    }

    /// Rotation around the vertical axis.
    pub fn from_yaw(yaw: f32) -> Self {
        Self::from_axis_angle(Vec3::UP, yaw)
    }

    pub fn dot(self, rhs: Self) -> f32 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z + self.w * rhs.w
    }

    pub fn length(self) -> f32 {
        self.dot(self).sqrt()
    }

    pub fn normalize(self) -> Self {
        let len = self.length();
        if len < 1e-9 {
            return Self::IDENTITY;
        }
        let inv = 1.0 / len;
        Self {
            x: self.x * inv,
            y: self.y * inv,
            z: self.z * inv,
            w: self.w * inv,
        }
    }

    /// Spherical interpolation towards `to`. `t` is clamped to $[0,1]$.
    ///
    /// Callers that need the shortest arc must flip `to` themselves when the
    /// dot product is negative; this keeps the raw interpolation predictable.
    pub fn slerp(self, to: Self, t: f32) -> Self {
        let t = t.clamp(0.0, 1.0);
        if t == 0.0 {
            return self;
        }
        if t == 1.0 {
            return to;
        }

        let cos_half = self.dot(to);
        if cos_half.abs() >= 1.0 {
            return self;
        }

        let sqr_sin_half = 1.0 - cos_half * cos_half;
        if sqr_sin_half <= f32::EPSILON {
            let s = 1.0 - t;
            return Self {
                x: s * self.x + t * to.x,
                y: s * self.y + t * to.y,
                z: s * self.z + t * to.z,
                w: s * self.w + t * to.w,
            }
            .normalize();
        }

        let sin_half = sqr_sin_half.sqrt();
        let half = sin_half.atan2(cos_half);
        let a = ((1.0 - t) * half).sin() / sin_half;
        let b = (t * half).sin() / sin_half;
        Self {
            x: self.x * a + to.x * b,
            y: self.y * a + to.y * b,
            z: self.z * a + to.z * b,
            w: self.w * a + to.w * b,
        }
    }

    /// Rotates a vector by this quaternion.
    pub fn rotate(self, v: Vec3) -> Vec3 {
        let q = Vec3::new(self.x, self.y, self.z);
        let t = q.cross(v) * 2.0;
        v + t * self.w + q.cross(t)
    }
}

impl Neg for Quat {
    type Output = Self;

    fn neg(self) -> Self {
        Self {
            x: -self.x,
            y: -self.y,
            z: -self.z,
            w: -self.w,
        }
    }
}

/// Axis-aligned box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn from_center_size(center: Vec3, size: Vec3) -> Self {
        let half = size * 0.5;
        Self {
            min: center - half,
            max: center + half,
        }
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn contains(&self, p: Vec3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    pub fn overlaps(&self, other: &Aabb) -> bool {
        self.min.x < other.max.x
            && self.max.x > other.min.x
            && self.min.y < other.max.y
            && self.max.y > other.min.y
            && self.min.z < other.max.z
            && self.max.z > other.min.z
    }

    /// Slab test. Returns the entry distance along `dir` and the face normal
    /// that was crossed. A ray starting inside reports distance 0 and a normal
    /// facing back along the ray.
    pub fn ray_intersect(&self, origin: Vec3, dir: Vec3, max_toi: f32) -> Option<(f32, Vec3)> {
        if self.contains(origin) {
            return Some((0.0, (-dir).normalize_or_zero()));
        }

        let mut t_min = 0.0_f32;
        let mut t_max = max_toi;
        let mut entry_axis = None;

        for axis in 0..3 {
            let o = origin.axis(axis);
            let d = dir.axis(axis);
            let lo = self.min.axis(axis);
            let hi = self.max.axis(axis);

            if d.abs() < 1e-8 {
                if o < lo || o > hi {
                    return None;
                }
                continue;
            }

            let inv = 1.0 / d;
            let (t0, t1) = {
                let a = (lo - o) * inv;
                let b = (hi - o) * inv;
                if a <= b {
                    (a, b)
                } else {
                    (b, a)
                }
            };

            if t0 > t_min {
                t_min = t0;
                entry_axis = Some(axis);
            }
            t_max = t_max.min(t1);
            if t_min > t_max {
                return None;
            }
        }

        let axis = entry_axis?;
        let sign = if dir.axis(axis) > 0.0 { -1.0 } else { 1.0 };
        let normal = match axis {
            0 => Vec3::new(sign, 0.0, 0.0),
            1 => Vec3::new(0.0, sign, 0.0),
            _ => Vec3::new(0.0, 0.0, sign),
        };
        Some((t_min, normal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec3_lerp_midpoint() {
        let a = Vec3::new(0.0, 0.0, 0.0);
        let b = Vec3::new(2.0, 4.0, 6.0);
        let mid = a.lerp(b, 0.5);
        assert_eq!(mid, Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn yaw_quat_rotates_forward() {
        let q = Quat::from_yaw(std::f32::consts::FRAC_PI_2);
        let v = q.rotate(Vec3::new(0.0, 0.0, -1.0));
        assert!((v.x + 1.0).abs() < 1e-5, "{v:?}");
        assert!(v.z.abs() < 1e-5, "{v:?}");
    }

    #[test]
    fn slerp_halfway_between_yaws() {
        let a = Quat::from_yaw(0.0);
        let b = Quat::from_yaw(1.0);
        let mid = a.slerp(b, 0.5);
        let expected = Quat::from_yaw(0.5);
        assert!(mid.dot(expected) > 0.9999);
    }

    #[test]
    fn ray_hits_top_face_from_above() {
        let floor = Aabb::from_center_size(Vec3::new(0.0, -0.5, 0.0), Vec3::new(10.0, 1.0, 10.0));
        let (toi, normal) = floor
            .ray_intersect(Vec3::new(1.0, 2.0, 1.0), Vec3::DOWN, 5.0)
            .expect("hit");
        assert!((toi - 2.0).abs() < 1e-5);
        assert_eq!(normal, Vec3::UP);
    }

    #[test]
    fn ray_misses_beyond_max_toi() {
        let floor = Aabb::from_center_size(Vec3::new(0.0, -0.5, 0.0), Vec3::new(10.0, 1.0, 10.0));
        assert!(floor
            .ray_intersect(Vec3::new(0.0, 2.0, 0.0), Vec3::DOWN, 1.0)
            .is_none());
    }
}
