//! `localmap-types` – shared vocabulary of the local obstacle map.
//!
//! Wire-level sensor and map messages, the [`Stamp`] time type, and the
//! global [`LocalMapError`] used by every other crate in the workspace.

use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ────────────────────────────────────────────────────────────────────────────
// Time
// ────────────────────────────────────────────────────────────────────────────

/// A capture time, stored as integer nanoseconds since the Unix epoch.
///
/// Integer storage gives a total order (usable as a `BTreeMap` key) while the
/// wire format stays plain floating-point seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub struct Stamp(i64);

impl Stamp {
    /// Build a stamp from floating-point seconds since the epoch.
    pub fn from_secs_f64(secs: f64) -> Self {
        Self((secs * 1e9).round() as i64)
    }

    /// Build a stamp from integer nanoseconds since the epoch.
    pub fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        let now = Utc::now();
        Self(now.timestamp_nanos_opt().unwrap_or(i64::MAX))
    }

    pub fn as_nanos(self) -> i64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1e9
    }

    /// This stamp moved `secs` seconds into the past.
    pub fn saturating_sub_secs(self, secs: f64) -> Self {
        Self(self.0.saturating_sub((secs * 1e9).round() as i64))
    }

    /// Signed difference `self - earlier` in seconds.
    pub fn secs_since(self, earlier: Stamp) -> f64 {
        (self.0 - earlier.0) as f64 / 1e9
    }
}

impl From<f64> for Stamp {
    fn from(secs: f64) -> Self {
        Self::from_secs_f64(secs)
    }
}

impl From<Stamp> for f64 {
    fn from(stamp: Stamp) -> Self {
        stamp.as_secs_f64()
    }
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.9}", self.as_secs_f64())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Wire messages
// ────────────────────────────────────────────────────────────────────────────

/// Frame name and capture time attached to every message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub frame_id: String,
    pub stamp: Stamp,
}

/// A planar range scan, `sensor_msgs/LaserScan` style.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaserScan {
    /// Angle of the first ray (radians).
    pub angle_min: f32,
    /// Angular distance between consecutive rays (radians).
    pub angle_increment: f32,
    /// Readings below this value are invalid (metres).
    pub range_min: f32,
    /// Readings above this value are invalid (metres).
    pub range_max: f32,
    pub ranges: Vec<f32>,
}

/// An unorganised cloud of 3-D points in the sensor frame.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PointCloud {
    pub points: Vec<[f32; 3]>,
}

/// The modality-specific body of a [`SensorMessage`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SensorPayload {
    LaserScan(LaserScan),
    PointCloud(PointCloud),
}

/// One physical reading as delivered by a sensor channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorMessage {
    pub header: Header,
    pub payload: SensorPayload,
}

/// The aggregated local obstacle map, expressed in the robot frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalMapMessage {
    pub header: Header,
    pub points: Vec<[f32; 3]>,
}

// ────────────────────────────────────────────────────────────────────────────
// Scene
// ────────────────────────────────────────────────────────────────────────────

/// Placement of a pose marker: position plus `(w, x, y, z)` orientation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarkerPose {
    pub position: [f64; 3],
    pub orientation: [f64; 4],
}

/// One named group of the visualisation scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Renderable {
    /// A point cloud drawn with a single colour (`0xRRGGBB`).
    Points {
        points: Vec<[f32; 3]>,
        color: u32,
        point_size: f32,
    },
    /// A set of small XYZ axis markers.
    PoseMarkers { poses: Vec<MarkerPose>, scale: f32 },
}

/// The full scene as of one rebuild cycle.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SceneSnapshot {
    /// Incremented on every change to the scene.
    pub revision: u64,
    pub groups: std::collections::BTreeMap<String, Renderable>,
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Global error type of the local obstacle map stack.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LocalMapError {
    #[error("Transform {target} <- {source_frame} unavailable: {reason}")]
    TransformUnavailable {
        target: String,
        source_frame: String,
        reason: String,
    },

    #[error(
        "Transform {target} <- {source_frame} requires extrapolation: requested {requested}, available [{earliest}, {latest}]"
    )]
    TransformExtrapolation {
        target: String,
        source_frame: String,
        requested: Stamp,
        earliest: Stamp,
        latest: Stamp,
    },

    #[error("Observation history is empty")]
    EmptyHistory,

    #[error("Startup configuration error: {0}")]
    StartupConfiguration(String),

    #[error("Filter error: {0}")]
    Filter(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl LocalMapError {
    /// `true` for failures that clear up on their own once transforms
    /// arrive (unavailable frames and extrapolation).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LocalMapError::TransformUnavailable { .. } | LocalMapError::TransformExtrapolation { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamp_orders_by_time() {
        let a = Stamp::from_secs_f64(0.05);
        let b = Stamp::from_secs_f64(0.10);
        assert!(a < b);
        assert_eq!(Stamp::from_secs_f64(0.25).saturating_sub_secs(0.20), Stamp::from_secs_f64(0.05));
    }

    #[test]
    fn stamp_secs_roundtrip_is_exact_to_nanos() {
        let s = Stamp::from_secs_f64(1_700_000_000.123_456_789);
        assert!((s.as_secs_f64() - 1_700_000_000.123_456_789).abs() < 1e-6);
        assert!((Stamp::from_secs_f64(0.3).secs_since(Stamp::from_secs_f64(0.1)) - 0.2).abs() < 1e-12);
    }

    #[test]
    fn nanosecond_stamps_keep_full_precision() {
        // Two stamps one nanosecond apart stay distinct and ordered.
        let a = Stamp::from_nanos(1_700_000_000_000_000_001);
        let b = Stamp::from_nanos(1_700_000_000_000_000_002);
        assert!(a < b);
        assert_eq!(b.as_nanos() - a.as_nanos(), 1);
        assert_eq!(Stamp::from_secs_f64(0.25).as_nanos(), 250_000_000);
    }

    #[test]
    fn sensor_message_json_uses_seconds() {
        let msg = SensorMessage {
            header: Header {
                frame_id: "laser".to_string(),
                stamp: Stamp::from_secs_f64(12.5),
            },
            payload: SensorPayload::LaserScan(LaserScan {
                angle_min: -1.0,
                angle_increment: 0.5,
                range_min: 0.1,
                range_max: 10.0,
                ranges: vec![1.0, 2.0, 3.0],
            }),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"stamp\":12.5"));
        assert!(json.contains("\"type\":\"LaserScan\""));
        let back: SensorMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn transient_classification() {
        let unavailable = LocalMapError::TransformUnavailable {
            target: "base_link".to_string(),
            source_frame: "laser".to_string(),
            reason: "frame not connected".to_string(),
        };
        assert!(unavailable.is_transient());
        assert!(unavailable.to_string().contains("laser"));
        assert!(!LocalMapError::EmptyHistory.is_transient());
        assert!(!LocalMapError::StartupConfiguration("x".into()).is_transient());
    }
}
