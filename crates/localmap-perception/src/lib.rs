//! `localmap-perception` – geometry of the local obstacle map.
//!
//! Turns sensor readings and frame transforms into points expressed in a
//! common frame.
//!
//! # Modules
//!
//! - [`transform`] – [`Pose3D`][transform::Pose3D]: rigid-pose algebra
//!   (compose, inverse, relative pose, interpolation).
//! - [`tf_buffer`] – [`TfBuffer`][tf_buffer::TfBuffer]: time-indexed frame
//!   graph implementing the [`TransformSource`][tf_buffer::TransformSource]
//!   lookup contract with bounded waits.
//! - [`observation`] – [`Observation`][observation::Observation]: range scans
//!   and point clouds tagged with their sensor pose.
//! - [`point_map`] – [`PointMap`][point_map::PointMap]: the aggregate point
//!   set that observations are inserted into.

pub mod observation;
pub mod point_map;
pub mod tf_buffer;
pub mod transform;

pub use observation::{CloudObservation, Observation, RangeScan};
pub use point_map::{Aabb, Point3, PointMap};
pub use tf_buffer::{LookupTime, TfBuffer, TransformSource};
pub use transform::{Pose3D, Quaternion, Vec3};
