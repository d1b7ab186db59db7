//! Aggregate point map.
//!
//! A flat, rebuildable set of 3-D points.  Observations are inserted at a
//! caller-supplied robot pose; every valid return lands at
//! `robot_pose ∘ sensor_pose ∘ p`.
//!
//! | Type | Role |
//! |------|------|
//! | [`Point3`]   | A 3-D coordinate.                        |
//! | [`Aabb`]     | An axis-aligned bounding box.            |
//! | [`PointMap`] | The point set; insert observations, read points. |

use serde::{Deserialize, Serialize};

use crate::observation::Observation;
use crate::transform::{Pose3D, Vec3};

// ────────────────────────────────────────────────────────────────────────────
// Point3
// ────────────────────────────────────────────────────────────────────────────

/// A point in 3-D space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point3 {
    /// Create a new point.
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn to_array(self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }
}

impl From<Vec3> for Point3 {
    fn from(v: Vec3) -> Self {
        Self::new(v.x as f32, v.y as f32, v.z as f32)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Aabb
// ────────────────────────────────────────────────────────────────────────────

/// An axis-aligned bounding box, defined by its minimum and maximum corners.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Point3,
    pub max: Point3,
}

impl Aabb {
    /// Create a bounding box from its two opposite corners.
    ///
    /// The constructor normalises the corners so that `min ≤ max` per axis.
    pub fn new(a: Point3, b: Point3) -> Self {
        Self {
            min: Point3::new(a.x.min(b.x), a.y.min(b.y), a.z.min(b.z)),
            max: Point3::new(a.x.max(b.x), a.y.max(b.y), a.z.max(b.z)),
        }
    }

    /// True when the point lies inside or on the boundary of the box.
    pub fn contains_point(&self, p: Point3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }
}

// ────────────────────────────────────────────────────────────────────────────
// PointMap
// ────────────────────────────────────────────────────────────────────────────

/// A flat point set rebuilt from scratch every cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointMap {
    points: Vec<Point3>,
}

impl PointMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_points(points: Vec<Point3>) -> Self {
        Self { points }
    }

    /// Remove every point, keeping the allocation.
    pub fn clear(&mut self) {
        self.points.clear();
    }

    pub fn push(&mut self, p: Point3) {
        self.points.push(p);
    }

    /// Insert every valid return of `obs`, with the robot placed at
    /// `robot_pose`.  Returns the number of points added.
    pub fn insert_observation(&mut self, obs: &Observation, robot_pose: &Pose3D) -> usize {
        let placement = robot_pose.compose(obs.sensor_pose());
        let before = self.points.len();
        match obs {
            Observation::RangeScan2D(scan) => self
                .points
                .extend(scan.local_points().map(|p| Point3::from(placement.transform_point(p)))),
            Observation::PointCloud3D(cloud) => self
                .points
                .extend(cloud.local_points().map(|p| Point3::from(placement.transform_point(p)))),
        }
        self.points.len() - before
    }

    pub fn points(&self) -> &[Point3] {
        &self.points
    }

    /// Points as plain `[x, y, z]` triples, the wire representation.
    pub fn to_xyz(&self) -> Vec<[f32; 3]> {
        self.points.iter().map(|p| p.to_array()).collect()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
