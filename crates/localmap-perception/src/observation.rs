//! Sensor observations in their insertable form.
//!
//! An [`Observation`] is a single reading plus the pose of the sensor on the
//! robot at capture time.  It is a closed sum type: the point map dispatches
//! on the variant instead of calling into an open class hierarchy.

use localmap_types::{LaserScan, PointCloud};

use crate::transform::{Pose3D, Vec3};

/// A planar range scan together with its mounting pose.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeScan {
    pub angle_min: f32,
    pub angle_increment: f32,
    pub range_min: f32,
    pub range_max: f32,
    pub ranges: Vec<f32>,
    /// `T_robot_sensor` at capture time.
    pub sensor_pose: Pose3D,
}

impl RangeScan {
    pub fn from_message(scan: &LaserScan, sensor_pose: Pose3D) -> Self {
        Self {
            angle_min: scan.angle_min,
            angle_increment: scan.angle_increment,
            range_min: scan.range_min,
            range_max: scan.range_max,
            ranges: scan.ranges.clone(),
            sensor_pose,
        }
    }

    /// True when `range` is a usable return.
    pub fn is_valid(&self, range: f32) -> bool {
        range.is_finite() && range >= self.range_min && range <= self.range_max
    }

    /// Valid returns as points in the sensor frame (z = 0).
    pub fn local_points(&self) -> impl Iterator<Item = Vec3> + '_ {
        self.ranges
            .iter()
            .enumerate()
            .filter(|(_, r)| self.is_valid(**r))
            .map(|(i, &r)| {
                let angle = f64::from(self.angle_min) + i as f64 * f64::from(self.angle_increment);
                let r = f64::from(r);
                Vec3::new(r * angle.cos(), r * angle.sin(), 0.0)
            })
    }
}

/// A 3-D point cloud together with its mounting pose.
#[derive(Debug, Clone, PartialEq)]
pub struct CloudObservation {
    pub points: Vec<[f32; 3]>,
    /// `T_robot_sensor` at capture time.
    pub sensor_pose: Pose3D,
}

impl CloudObservation {
    pub fn from_message(cloud: &PointCloud, sensor_pose: Pose3D) -> Self {
        Self {
            points: cloud.points.clone(),
            sensor_pose,
        }
    }

    /// Finite points in the sensor frame.
    pub fn local_points(&self) -> impl Iterator<Item = Vec3> + '_ {
        self.points
            .iter()
            .filter(|p| p.iter().all(|c| c.is_finite()))
            .map(|p| Vec3::new(f64::from(p[0]), f64::from(p[1]), f64::from(p[2])))
    }
}

/// One sensor reading, tagged by modality.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    RangeScan2D(RangeScan),
    PointCloud3D(CloudObservation),
}

impl Observation {
    /// `T_robot_sensor` baked into the reading.
    pub fn sensor_pose(&self) -> Pose3D {
        match self {
            Observation::RangeScan2D(scan) => scan.sensor_pose,
            Observation::PointCloud3D(cloud) => cloud.sensor_pose,
        }
    }

    /// Raw element count (rays or points), valid or not.
    pub fn len(&self) -> usize {
        match self {
            Observation::RangeScan2D(scan) => scan.ranges.len(),
            Observation::PointCloud3D(cloud) => cloud.points.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Observation::RangeScan2D(_) => "range_scan_2d",
            Observation::PointCloud3D(_) => "point_cloud_3d",
        }
    }
}
