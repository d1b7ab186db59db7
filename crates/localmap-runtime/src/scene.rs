//! Visualisation surface.
//!
//! The builder renders into a [`Scene`]: named groups that are replaced
//! wholesale every cycle.  [`SceneGraph`] keeps them in memory and, on
//! [`Scene::present`], broadcasts a [`SceneSnapshot`] to WebSocket clients.

use std::collections::BTreeMap;

use localmap_middleware::ScenePublisher;
use localmap_perception::{Point3, Pose3D};
use localmap_types::{MarkerPose, Renderable, SceneSnapshot};
use tracing::trace;

pub const RAW_POINTS_GROUP: &str = "raw_points";
pub const FINAL_POINTS_GROUP: &str = "final_points";
pub const OBSTACLES_GROUP: &str = "obstacles";

const RAW_POINTS_COLOR: u32 = 0x00ff00;
const RAW_POINTS_SIZE: f32 = 1.0;
const FINAL_POINTS_COLOR: u32 = 0x0000ff;
const FINAL_POINTS_SIZE: f32 = 3.0;
const MARKER_SCALE: f32 = 0.9;

/// Scene-graph style render target.
pub trait Scene: Send {
    /// Replace (or create) the group `name`.
    fn replace_group(&mut self, name: &str, renderable: Renderable);

    fn clear_group(&mut self, name: &str);

    fn groups(&self) -> Vec<String>;

    /// Make the pending changes visible.
    fn present(&mut self);
}

/// Green, small points for the unfiltered aggregate.
pub fn raw_points(points: &[Point3]) -> Renderable {
    Renderable::Points {
        points: points.iter().map(|p| p.to_array()).collect(),
        color: RAW_POINTS_COLOR,
        point_size: RAW_POINTS_SIZE,
    }
}

/// Blue, large points for the published result.
pub fn final_points(points: &[Point3]) -> Renderable {
    Renderable::Points {
        points: points.iter().map(|p| p.to_array()).collect(),
        color: FINAL_POINTS_COLOR,
        point_size: FINAL_POINTS_SIZE,
    }
}

/// One small axis marker per pose.
pub fn pose_markers<'a>(poses: impl IntoIterator<Item = &'a Pose3D>) -> Renderable {
    Renderable::PoseMarkers {
        poses: poses
            .into_iter()
            .map(|p| MarkerPose {
                position: [p.translation.x, p.translation.y, p.translation.z],
                orientation: [p.rotation.w, p.rotation.x, p.rotation.y, p.rotation.z],
            })
            .collect(),
        scale: MARKER_SCALE,
    }
}

/// In-memory scene with an optional broadcast of every presented revision.
#[derive(Debug, Default)]
pub struct SceneGraph {
    groups: BTreeMap<String, Renderable>,
    revision: u64,
    publisher: Option<ScenePublisher>,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_publisher(publisher: ScenePublisher) -> Self {
        Self {
            publisher: Some(publisher),
            ..Self::default()
        }
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn group(&self, name: &str) -> Option<&Renderable> {
        self.groups.get(name)
    }

    pub fn snapshot(&self) -> SceneSnapshot {
        SceneSnapshot {
            revision: self.revision,
            groups: self.groups.clone(),
        }
    }
}

impl Scene for SceneGraph {
    fn replace_group(&mut self, name: &str, renderable: Renderable) {
        self.groups.insert(name.to_string(), renderable);
    }

    fn clear_group(&mut self, name: &str) {
        self.groups.remove(name);
    }

    fn groups(&self) -> Vec<String> {
        self.groups.keys().cloned().collect()
    }

    fn present(&mut self) {
        self.revision += 1;
        if let Some(publisher) = &self.publisher {
            let viewers = publisher.send(self.snapshot());
            trace!(revision = self.revision, viewers, "scene presented");
        }
    }
}
