//! [`MapBuilder`] – one rebuild cycle of the local obstacle map.
//!
//! ```text
//! Idle → Snapshotting ─(empty)──────────────────────────────→ Idle
//!                     → ResolvingPose ─(fail)───────────────→ Idle
//!                                     → Reprojecting → Filtering → Publishing/Rendering → Idle
//! ```
//!
//! Every exit before the last step leaves no side effect: nothing is
//! published and nothing is rendered.  Records purged by the snapshot stay
//! purged.

use std::sync::Arc;
use std::time::{Duration, Instant};

use localmap_middleware::MapSink;
use localmap_perception::{LookupTime, PointMap, Pose3D, TransformSource};
use localmap_types::{Header, LocalMapError, LocalMapMessage, Stamp};
use tracing::{debug, instrument};

use crate::config::LocalMapConfig;
use crate::filter::FilterPipeline;
use crate::history::HistoryBuffer;
use crate::scene::{self, Scene};

/// Outcome of a successful cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    /// Newest record stamp, used as the published header stamp.
    pub stamp: Stamp,
    pub records: usize,
    pub raw_points: usize,
    pub final_points: usize,
    pub published: bool,
}

/// Single consumer of the [`HistoryBuffer`].
///
/// Owns the aggregate map, the optional scene and the optional filter
/// pipeline; none of them are shared.
pub struct MapBuilder {
    history: Arc<HistoryBuffer>,
    tf: Arc<dyn TransformSource>,
    sink: Arc<dyn MapSink>,
    scene: Option<Box<dyn Scene>>,
    pipeline: Option<(FilterPipeline, String)>,
    robot_frame: String,
    reference_frame: String,
    time_window: f64,
    timeout: Duration,
    map: PointMap,
}

impl MapBuilder {
    pub fn new(
        config: &LocalMapConfig,
        history: Arc<HistoryBuffer>,
        tf: Arc<dyn TransformSource>,
        sink: Arc<dyn MapSink>,
    ) -> Self {
        Self {
            history,
            tf,
            sink,
            scene: None,
            pipeline: None,
            robot_frame: config.robot_frame.clone(),
            reference_frame: config.reference_frame.clone(),
            time_window: config.time_window,
            timeout: config.transform_timeout(),
            map: PointMap::new(),
        }
    }

    /// Render into `scene` after every successful cycle.
    pub fn with_scene(mut self, scene: Box<dyn Scene>) -> Self {
        self.set_scene(scene);
        self
    }

    /// Attach `scene` in place; replaces any scene attached earlier.
    pub fn set_scene(&mut self, scene: Box<dyn Scene>) {
        self.scene = Some(scene);
    }

    /// Filter the aggregate through `pipeline` and publish `output_layer`.
    pub fn with_filter(mut self, pipeline: FilterPipeline, output_layer: impl Into<String>) -> Self {
        self.pipeline = Some((pipeline, output_layer.into()));
        self
    }

    /// The aggregate built by the last cycle that got past pose resolution.
    pub fn map(&self) -> &PointMap {
        &self.map
    }

    /// Run one cycle.
    ///
    /// # Errors
    ///
    /// - [`LocalMapError::EmptyHistory`] when there is nothing to build.
    /// - Transform errors from the current-pose lookup.
    /// - [`LocalMapError::Filter`] when the pipeline fails.
    #[instrument(name = "rebuild", skip(self))]
    pub async fn rebuild(&mut self) -> Result<CycleReport, LocalMapError> {
        let started = Instant::now();

        let records = self.history.snapshot_and_purge(self.time_window);
        let Some(newest) = records.iter().map(|r| r.timestamp).max() else {
            return Err(LocalMapError::EmptyHistory);
        };

        let current = self
            .tf
            .lookup(&self.reference_frame, &self.robot_frame, LookupTime::Latest, self.timeout)
            .await?;

        self.map.clear();
        let relative_poses: Vec<Pose3D> = records
            .iter()
            .map(|record| {
                let relative = record.robot_pose.relative_to(&current);
                self.map.insert_observation(&record.observation, &relative);
                relative
            })
            .collect();

        let filtered = match &self.pipeline {
            Some((pipeline, layer)) => Some(pipeline.apply(&self.map, layer)?),
            None => None,
        };
        let output = filtered.as_ref().unwrap_or(&self.map);

        let published = if self.sink.subscriber_count() > 0 {
            self.sink.publish(LocalMapMessage {
                header: Header {
                    frame_id: self.robot_frame.clone(),
                    stamp: newest,
                },
                points: output.to_xyz(),
            })?;
            true
        } else {
            false
        };

        if let Some(scene) = self.scene.as_mut() {
            scene.replace_group(scene::RAW_POINTS_GROUP, scene::raw_points(self.map.points()));
            scene.replace_group(scene::FINAL_POINTS_GROUP, scene::final_points(output.points()));
            scene.replace_group(scene::OBSTACLES_GROUP, scene::pose_markers(&relative_poses));
            scene.present();
        }

        let report = CycleReport {
            stamp: newest,
            records: records.len(),
            raw_points: self.map.len(),
            final_points: output.len(),
            published,
        };
        debug!(
            records = report.records,
            raw_points = report.raw_points,
            final_points = report.final_points,
            published,
            current = %current,
            elapsed_ms = started.elapsed().as_secs_f64() * 1e3,
            "local map rebuilt"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::ObservationRecord;
    use crate::scene::SceneGraph;
    use async_trait::async_trait;
    use localmap_perception::{CloudObservation, Observation, Quaternion, Vec3};
    use localmap_types::Renderable;
    use std::sync::Mutex;

    // ── Fakes ────────────────────────────────────────────────────────────

    struct FixedPose(Mutex<Result<Pose3D, LocalMapError>>);

    impl FixedPose {
        fn ok(pose: Pose3D) -> Arc<Self> {
            Arc::new(Self(Mutex::new(Ok(pose))))
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self(Mutex::new(Err(LocalMapError::TransformUnavailable {
                target: "odom".to_string(),
                source_frame: "base_link".to_string(),
                reason: "no data".to_string(),
            }))))
        }

        fn set(&self, result: Result<Pose3D, LocalMapError>) {
            *self.0.lock().unwrap() = result;
        }
    }

    #[async_trait]
    impl TransformSource for FixedPose {
        async fn lookup(
            &self,
            _target: &str,
            _source: &str,
            at: LookupTime,
            _timeout: Duration,
        ) -> Result<Pose3D, LocalMapError> {
            assert_eq!(at, LookupTime::Latest, "current pose must use the latest transform");
            self.0.lock().unwrap().clone()
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        subscribers: usize,
        published: Mutex<Vec<LocalMapMessage>>,
    }

    impl MapSink for RecordingSink {
        fn subscriber_count(&self) -> usize {
            self.subscribers
        }

        fn publish(&self, map: LocalMapMessage) -> Result<usize, LocalMapError> {
            self.published.lock().unwrap().push(map);
            Ok(self.subscribers)
        }
    }

    #[derive(Default)]
    struct SceneLog {
        presents: usize,
        groups: Vec<String>,
    }

    struct RecordingScene(Arc<Mutex<SceneLog>>);

    impl Scene for RecordingScene {
        fn replace_group(&mut self, name: &str, _renderable: Renderable) {
            self.0.lock().unwrap().groups.push(name.to_string());
        }

        fn clear_group(&mut self, _name: &str) {}

        fn groups(&self) -> Vec<String> {
            self.0.lock().unwrap().groups.clone()
        }

        fn present(&mut self) {
            self.0.lock().unwrap().presents += 1;
        }
    }

    // ── Helpers ──────────────────────────────────────────────────────────

    fn cloud_record(secs: f64, robot_pose: Pose3D, points: Vec<[f32; 3]>) -> ObservationRecord {
        ObservationRecord::new(
            Stamp::from_secs_f64(secs),
            Observation::PointCloud3D(CloudObservation {
                points,
                sensor_pose: Pose3D::identity(),
            }),
            robot_pose,
        )
    }

    struct Rig {
        history: Arc<HistoryBuffer>,
        tf: Arc<FixedPose>,
        sink: Arc<RecordingSink>,
        scene: Arc<Mutex<SceneLog>>,
        builder: MapBuilder,
    }

    fn rig(tf: Arc<FixedPose>, subscribers: usize) -> Rig {
        let history = Arc::new(HistoryBuffer::new());
        let sink = Arc::new(RecordingSink {
            subscribers,
            ..RecordingSink::default()
        });
        let scene = Arc::new(Mutex::new(SceneLog::default()));
        let builder = MapBuilder::new(
            &LocalMapConfig::default(),
            Arc::clone(&history),
            tf.clone(),
            sink.clone(),
        )
        .with_scene(Box::new(RecordingScene(Arc::clone(&scene))));
        Rig {
            history,
            tf,
            sink,
            scene,
            builder,
        }
    }

    // ── Tests ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn empty_history_skips_cycle() {
        let mut r = rig(FixedPose::ok(Pose3D::identity()), 1);
        let err = r.builder.rebuild().await.unwrap_err();
        assert_eq!(err, LocalMapError::EmptyHistory);
        assert!(r.sink.published.lock().unwrap().is_empty());
        assert_eq!(r.scene.lock().unwrap().presents, 0);
    }

    #[tokio::test]
    async fn pose_failure_publishes_nothing_and_keeps_map() {
        let mut r = rig(FixedPose::ok(Pose3D::identity()), 1);
        r.history
            .insert(cloud_record(1.0, Pose3D::identity(), vec![[1.0, 0.0, 0.0]]));
        r.builder.rebuild().await.unwrap();
        let before = r.builder.map().clone();
        assert_eq!(r.sink.published.lock().unwrap().len(), 1);

        r.tf.set(Err(LocalMapError::TransformExtrapolation {
            target: "odom".to_string(),
            source_frame: "base_link".to_string(),
            requested: Stamp::from_secs_f64(2.0),
            earliest: Stamp::from_secs_f64(0.0),
            latest: Stamp::from_secs_f64(1.0),
        }));
        r.history
            .insert(cloud_record(1.1, Pose3D::identity(), vec![[5.0, 5.0, 0.0]]));
        let err = r.builder.rebuild().await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(r.sink.published.lock().unwrap().len(), 1, "no publish on pose failure");
        assert_eq!(r.scene.lock().unwrap().presents, 1, "no render on pose failure");
        assert_eq!(r.builder.map(), &before);
    }

    #[tokio::test]
    async fn failed_lookup_still_purged_history() {
        let mut r = rig(FixedPose::failing(), 1);
        r.history.insert(cloud_record(0.0, Pose3D::identity(), vec![]));
        r.history.insert(cloud_record(1.0, Pose3D::identity(), vec![]));
        assert!(r.builder.rebuild().await.is_err());
        assert_eq!(r.history.len(), 1);
    }

    #[tokio::test]
    async fn past_observations_are_reprojected_into_current_frame() {
        // Robot drove 0.5 m forward since the obstacle 1 m ahead was seen.
        let mut r = rig(FixedPose::ok(Pose3D::from_xy_yaw(0.5, 0.0, 0.0)), 1);
        r.history
            .insert(cloud_record(1.0, Pose3D::identity(), vec![[1.0, 0.0, 0.0]]));

        let report = r.builder.rebuild().await.unwrap();
        assert_eq!(report.raw_points, 1);
        let p = r.builder.map().points()[0];
        assert!((p.x - 0.5).abs() < 1e-6, "x={}", p.x);
        assert!(p.y.abs() < 1e-6);
    }

    #[tokio::test]
    async fn reprojection_handles_rotation() {
        // Robot has turned 90° left in place: an obstacle that was straight
        // ahead is now on its right.
        let current = Pose3D::from_xy_yaw(0.0, 0.0, std::f64::consts::FRAC_PI_2);
        let mut r = rig(FixedPose::ok(current), 1);
        r.history
            .insert(cloud_record(1.0, Pose3D::identity(), vec![[2.0, 0.0, 0.0]]));
        r.builder.rebuild().await.unwrap();
        let p = r.builder.map().points()[0];
        assert!(p.x.abs() < 1e-6, "x={}", p.x);
        assert!((p.y + 2.0).abs() < 1e-6, "y={}", p.y);
    }

    #[tokio::test]
    async fn record_at_current_pose_is_placed_unchanged() {
        let pose = Pose3D::new(
            Vec3::new(3.0, -1.0, 0.2),
            Quaternion::from_ypr(0.7, 0.1, -0.2),
        );
        let mut r = rig(FixedPose::ok(pose), 1);
        r.history
            .insert(cloud_record(1.0, pose, vec![[1.0, 2.0, 3.0]]));
        r.builder.rebuild().await.unwrap();
        let p = r.builder.map().points()[0];
        assert!((p.x - 1.0).abs() < 1e-5);
        assert!((p.y - 2.0).abs() < 1e-5);
        assert!((p.z - 3.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn header_uses_newest_record_stamp_and_robot_frame() {
        let mut r = rig(FixedPose::ok(Pose3D::identity()), 2);
        r.history.insert(cloud_record(1.10, Pose3D::identity(), vec![[1.0, 0.0, 0.0]]));
        r.history.insert(cloud_record(1.00, Pose3D::identity(), vec![[2.0, 0.0, 0.0]]));

        let report = r.builder.rebuild().await.unwrap();
        assert!(report.published);
        let published = r.sink.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].header.frame_id, "base_link");
        assert_eq!(published[0].header.stamp, Stamp::from_secs_f64(1.10));
        assert_eq!(published[0].points.len(), 2);
    }

    #[tokio::test]
    async fn no_subscribers_means_no_publish() {
        let mut r = rig(FixedPose::ok(Pose3D::identity()), 0);
        r.history.insert(cloud_record(1.0, Pose3D::identity(), vec![[1.0, 0.0, 0.0]]));
        let report = r.builder.rebuild().await.unwrap();
        assert!(!report.published);
        assert!(r.sink.published.lock().unwrap().is_empty());
        assert_eq!(r.scene.lock().unwrap().presents, 1);
    }

    #[tokio::test]
    async fn scene_receives_all_three_groups() {
        let mut r = rig(FixedPose::ok(Pose3D::identity()), 0);
        r.history.insert(cloud_record(1.0, Pose3D::identity(), vec![[1.0, 0.0, 0.0]]));
        r.builder.rebuild().await.unwrap();
        let log = r.scene.lock().unwrap();
        assert_eq!(log.groups, vec!["raw_points", "final_points", "obstacles"]);
    }

    #[tokio::test]
    async fn filter_output_is_published() {
        let pipeline = FilterPipeline::from_toml_str(
            "[[filters]]\ntype = \"bounding_box\"\ninput_layer = \"raw\"\ninside_layer = \"near\"\nmin = [-1.0, -1.0, -1.0]\nmax = [1.0, 1.0, 1.0]\n",
        )
        .unwrap();
        let tf = FixedPose::ok(Pose3D::identity());
        let history = Arc::new(HistoryBuffer::new());
        let sink = Arc::new(RecordingSink {
            subscribers: 1,
            ..RecordingSink::default()
        });
        let mut builder = MapBuilder::new(&LocalMapConfig::default(), Arc::clone(&history), tf, sink.clone())
            .with_filter(pipeline, "near")
            .with_scene(Box::new(SceneGraph::new()));
        history.insert(cloud_record(
            1.0,
            Pose3D::identity(),
            vec![[0.5, 0.0, 0.0], [4.0, 0.0, 0.0]],
        ));

        let report = builder.rebuild().await.unwrap();
        assert_eq!(report.raw_points, 2);
        assert_eq!(report.final_points, 1);
        assert_eq!(sink.published.lock().unwrap()[0].points, vec![[0.5, 0.0, 0.0]]);
    }

    #[tokio::test]
    async fn missing_filter_layer_aborts_cycle() {
        let tf = FixedPose::ok(Pose3D::identity());
        let history = Arc::new(HistoryBuffer::new());
        let sink = Arc::new(RecordingSink {
            subscribers: 1,
            ..RecordingSink::default()
        });
        let mut builder = MapBuilder::new(&LocalMapConfig::default(), Arc::clone(&history), tf, sink.clone())
            .with_filter(FilterPipeline::default(), "decimated");
        history.insert(cloud_record(1.0, Pose3D::identity(), vec![[0.5, 0.0, 0.0]]));

        assert!(matches!(builder.rebuild().await, Err(LocalMapError::Filter(_))));
        assert!(sink.published.lock().unwrap().is_empty());
    }
}
