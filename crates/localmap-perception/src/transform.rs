//! Rigid-pose algebra.
//!
//! [`Pose3D`] is a 3-D rigid-body transform (translation + unit quaternion).
//! A pose `T_a_b` places frame `b` inside frame `a`: a point expressed in `b`
//! is mapped into `a` by rotating it with `rotation` and then adding
//! `translation`.
//!
//! Composition order follows the subscript chain: `T_a_b.compose(T_b_c)`
//! yields `T_a_c`.  [`Pose3D::relative_to`] is the inverse composition used
//! to re-express a historical robot pose in the robot's current frame.
//!
//! # Example
//!
//! ```rust
//! use localmap_perception::transform::{Pose3D, Quaternion, Vec3};
//!
//! // robot_base is 1 m forward of odom, same orientation.
//! let odom_robot = Pose3D::new(Vec3::new(1.0, 0.0, 0.0), Quaternion::identity());
//! // laser is 0.5 m forward of robot_base.
//! let robot_laser = Pose3D::new(Vec3::new(0.5, 0.0, 0.0), Quaternion::identity());
//!
//! let odom_laser = odom_robot.compose(robot_laser);
//! assert!((odom_laser.translation.x - 1.5).abs() < 1e-12);
//!
//! // Expressed relative to itself a pose is the identity.
//! assert!(odom_robot.relative_to(&odom_robot).approx_eq(&Pose3D::identity(), 1e-12));
//! ```

use serde::{Deserialize, Serialize};

// ────────────────────────────────────────────────────────────────────────────
// Primitive types
// ────────────────────────────────────────────────────────────────────────────

/// A 3-D vector.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    /// Create a new vector.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// The zero vector.
    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }

    pub fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }

    pub fn scale(self, k: f64) -> Self {
        Self::new(self.x * k, self.y * k, self.z * k)
    }

    pub fn neg(self) -> Self {
        self.scale(-1.0)
    }

    pub fn norm(self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Linear interpolation: `self` at `t = 0`, `other` at `t = 1`.
    pub fn lerp(self, other: Self, t: f64) -> Self {
        self.add(other.sub(self).scale(t))
    }
}

/// A unit quaternion representing a 3-D rotation (w, x, y, z convention).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::identity()
    }
}

impl Quaternion {
    /// Create a quaternion.  The caller is responsible for providing a unit
    /// quaternion (|q| = 1); see [`Quaternion::normalized`].
    pub fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }
    }

    /// The identity rotation (no rotation).
    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0)
    }

    /// Rotation of `angle` radians around `axis` (need not be unit length).
    pub fn from_axis_angle(axis: Vec3, angle: f64) -> Self {
        let n = axis.norm();
        if n == 0.0 {
            return Self::identity();
        }
        let (s, c) = (angle * 0.5).sin_cos();
        let a = axis.scale(1.0 / n);
        Self::new(c, a.x * s, a.y * s, a.z * s)
    }

    /// Rotation from intrinsic Z-Y-X Euler angles (yaw, then pitch, then roll).
    pub fn from_ypr(yaw: f64, pitch: f64, roll: f64) -> Self {
        let qz = Self::from_axis_angle(Vec3::new(0.0, 0.0, 1.0), yaw);
        let qy = Self::from_axis_angle(Vec3::new(0.0, 1.0, 0.0), pitch);
        let qx = Self::from_axis_angle(Vec3::new(1.0, 0.0, 0.0), roll);
        qz.mul(qy).mul(qx)
    }

    /// Hamilton product: compose two rotations.
    pub fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
            self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
        )
    }

    /// Conjugate (== inverse for a unit quaternion).
    pub fn conjugate(self) -> Self {
        Self::new(self.w, -self.x, -self.y, -self.z)
    }

    pub fn dot(self, rhs: Self) -> f64 {
        self.w * rhs.w + self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    /// Rescale to unit length.  A zero quaternion becomes the identity.
    pub fn normalized(self) -> Self {
        let n = self.dot(self).sqrt();
        if n == 0.0 {
            Self::identity()
        } else {
            Self::new(self.w / n, self.x / n, self.y / n, self.z / n)
        }
    }

    /// Rotate a vector by this quaternion: p' = q * p * q*.
    pub fn rotate(self, v: Vec3) -> Vec3 {
        let p = Self::new(0.0, v.x, v.y, v.z);
        let rotated = self.mul(p).mul(self.conjugate());
        Vec3::new(rotated.x, rotated.y, rotated.z)
    }

    /// Rotation angle in radians, in `[0, π]`.
    pub fn angle(self) -> f64 {
        let q = self.normalized();
        let v = Vec3::new(q.x, q.y, q.z).norm();
        2.0 * v.atan2(q.w.abs())
    }

    /// Spherical linear interpolation along the shortest arc.
    pub fn slerp(self, other: Self, t: f64) -> Self {
        let mut other = other;
        let mut cos = self.dot(other);
        if cos < 0.0 {
            other = Self::new(-other.w, -other.x, -other.y, -other.z);
            cos = -cos;
        }
        if cos > 1.0 - 1e-9 {
            // Nearly parallel: fall back to normalised lerp.
            return Self::new(
                self.w + (other.w - self.w) * t,
                self.x + (other.x - self.x) * t,
                self.y + (other.y - self.y) * t,
                self.z + (other.z - self.z) * t,
            )
            .normalized();
        }
        let theta = cos.acos();
        let sin = theta.sin();
        let a = ((1.0 - t) * theta).sin() / sin;
        let b = (t * theta).sin() / sin;
        Self::new(
            a * self.w + b * other.w,
            a * self.x + b * other.x,
            a * self.y + b * other.y,
            a * self.z + b * other.z,
        )
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Pose3D
// ────────────────────────────────────────────────────────────────────────────

/// A rigid-body 3-D pose: rotation followed by translation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose3D {
    pub translation: Vec3,
    pub rotation: Quaternion,
}

impl Pose3D {
    /// Create a pose from a translation and rotation.
    pub fn new(translation: Vec3, rotation: Quaternion) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    /// The identity pose (no translation, no rotation).
    pub fn identity() -> Self {
        Self::new(Vec3::zero(), Quaternion::identity())
    }

    /// Planar pose: position `(x, y)` with heading `yaw` about +Z.
    pub fn from_xy_yaw(x: f64, y: f64, yaw: f64) -> Self {
        Self::new(
            Vec3::new(x, y, 0.0),
            Quaternion::from_axis_angle(Vec3::new(0.0, 0.0, 1.0), yaw),
        )
    }

    /// Compose two poses.
    ///
    /// If `self` = T_A_B and `other` = T_B_C, the result is T_A_C.
    pub fn compose(self, other: Self) -> Self {
        let translated = self.translation.add(self.rotation.rotate(other.translation));
        let rotated = self.rotation.mul(other.rotation).normalized();
        Self::new(translated, rotated)
    }

    /// The inverse pose: T_A_B becomes T_B_A.
    pub fn inverse(self) -> Self {
        let inv_rot = self.rotation.conjugate();
        Self::new(inv_rot.rotate(self.translation).neg(), inv_rot)
    }

    /// Express `self` relative to `base`: `base⁻¹ ∘ self`.
    ///
    /// With both poses given in the same reference frame (T_ref_past and
    /// T_ref_now) the result is T_now_past: where the past frame sits as seen
    /// from the current one.
    pub fn relative_to(&self, base: &Pose3D) -> Pose3D {
        base.inverse().compose(*self)
    }

    /// Map a point expressed in the child frame into the parent frame.
    pub fn transform_point(&self, p: Vec3) -> Vec3 {
        self.translation.add(self.rotation.rotate(p))
    }

    /// Interpolate between two poses (`t` in `[0, 1]`).
    pub fn interpolate(self, other: Self, t: f64) -> Self {
        Self::new(
            self.translation.lerp(other.translation, t),
            self.rotation.slerp(other.rotation, t).normalized(),
        )
    }

    /// Heading about +Z, assuming a mostly planar rotation.
    pub fn yaw(&self) -> f64 {
        let q = self.rotation;
        (2.0 * (q.w * q.z + q.x * q.y)).atan2(1.0 - 2.0 * (q.y * q.y + q.z * q.z))
    }

    /// True when translations differ by less than `tol` metres and the
    /// relative rotation is smaller than `tol` radians.
    pub fn approx_eq(&self, other: &Pose3D, tol: f64) -> bool {
        let dt = self.translation.sub(other.translation).norm();
        let dr = self.rotation.conjugate().mul(other.rotation).angle();
        dt < tol && dr < tol
    }
}

impl std::fmt::Display for Pose3D {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[x={:.3} y={:.3} z={:.3} yaw={:.3}]",
            self.translation.x,
            self.translation.y,
            self.translation.z,
            self.yaw()
        )
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
