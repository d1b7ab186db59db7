//! [`SensorIngestor`] – turns raw sensor messages into observation records.
//!
//! Each subscribed channel gets its own task (see
//! [`SensorIngestor::spawn_channel`]).  Per message:
//!
//! 1. resolve `T_robot_sensor` at the capture stamp,
//! 2. build the modality-specific [`Observation`],
//! 3. resolve `T_reference_robot` at the same stamp,
//! 4. insert the [`ObservationRecord`] into the shared [`HistoryBuffer`].
//!
//! Any failure drops that message only.  Channels share nothing but the
//! buffer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use localmap_middleware::TopicReceiver;
use localmap_perception::{CloudObservation, LookupTime, Observation, RangeScan, TransformSource};
use localmap_types::{LocalMapError, SensorMessage, SensorPayload, Stamp};
use tokio::task::JoinHandle;
use tracing::{debug, info_span, warn, Instrument};

use crate::history::{HistoryBuffer, ObservationRecord};

/// Sensor modality a channel was subscribed as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modality {
    RangeScan2D,
    PointCloud3D,
}

impl Modality {
    pub fn as_str(self) -> &'static str {
        match self {
            Modality::RangeScan2D => "2d",
            Modality::PointCloud3D => "3d",
        }
    }
}

/// Stateless ingestion logic shared by every channel task.
pub struct SensorIngestor {
    tf: Arc<dyn TransformSource>,
    history: Arc<HistoryBuffer>,
    robot_frame: String,
    reference_frame: String,
    timeout: Duration,
}

impl SensorIngestor {
    pub fn new(
        tf: Arc<dyn TransformSource>,
        history: Arc<HistoryBuffer>,
        robot_frame: impl Into<String>,
        reference_frame: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            tf,
            history,
            robot_frame: robot_frame.into(),
            reference_frame: reference_frame.into(),
            timeout,
        }
    }

    /// Process one message.  Returns the stamp of the inserted record.
    ///
    /// # Errors
    ///
    /// - [`LocalMapError::TransformUnavailable`] /
    ///   [`LocalMapError::TransformExtrapolation`] from either lookup.
    /// - [`LocalMapError::Serialization`] when the payload does not match
    ///   the channel's modality.
    pub async fn ingest(&self, msg: &SensorMessage, modality: Modality) -> Result<Stamp, LocalMapError> {
        let stamp = msg.header.stamp;
        let at = LookupTime::At(stamp);

        let sensor_pose = self
            .tf
            .lookup(&self.robot_frame, &msg.header.frame_id, at, self.timeout)
            .await?;

        let observation = match (&msg.payload, modality) {
            (SensorPayload::LaserScan(scan), Modality::RangeScan2D) => {
                Observation::RangeScan2D(RangeScan::from_message(scan, sensor_pose))
            }
            (SensorPayload::PointCloud(cloud), Modality::PointCloud3D) => {
                Observation::PointCloud3D(CloudObservation::from_message(cloud, sensor_pose))
            }
            _ => {
                return Err(LocalMapError::Serialization(format!(
                    "payload does not match {} channel",
                    modality.as_str()
                )));
            }
        };

        let robot_pose = self
            .tf
            .lookup(&self.reference_frame, &self.robot_frame, at, self.timeout)
            .await?;

        self.history
            .insert(ObservationRecord::new(stamp, observation, robot_pose));
        Ok(stamp)
    }

    /// Spawn the task draining `rx`.  It ends when the topic closes or the
    /// handle is aborted.
    ///
    /// Only the newest queued message is processed: readings that arrived
    /// while a lookup was waiting are skipped, so a transform outage costs
    /// at most one timeout per channel once it clears.
    pub fn spawn_channel(self: Arc<Self>, mut rx: TopicReceiver, modality: Modality) -> JoinHandle<()> {
        let span = info_span!("ingest", channel = %rx.topic(), modality = modality.as_str());
        tokio::spawn(
            async move {
                while let Some(msg) = rx.recv_latest().await {
                    let started = Instant::now();
                    match self.ingest(&msg, modality).await {
                        Ok(stamp) => debug!(
                            %stamp,
                            frame = %msg.header.frame_id,
                            elapsed_ms = started.elapsed().as_secs_f64() * 1e3,
                            "observation recorded"
                        ),
                        Err(e) => warn!(frame = %msg.header.frame_id, error = %e, "dropped sensor message"),
                    }
                }
                debug!("channel closed");
            }
            .instrument(span),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use localmap_middleware::SensorBus;
    use localmap_perception::{Pose3D, TfBuffer};
    use localmap_types::{Header, LaserScan, PointCloud};

    fn scan_msg(frame: &str, secs: f64) -> SensorMessage {
        SensorMessage {
            header: Header {
                frame_id: frame.to_string(),
                stamp: Stamp::from_secs_f64(secs),
            },
            payload: SensorPayload::LaserScan(LaserScan {
                angle_min: 0.0,
                angle_increment: 0.1,
                range_min: 0.1,
                range_max: 10.0,
                ranges: vec![1.0, 2.0],
            }),
        }
    }

    fn cloud_msg(frame: &str, secs: f64) -> SensorMessage {
        SensorMessage {
            header: Header {
                frame_id: frame.to_string(),
                stamp: Stamp::from_secs_f64(secs),
            },
            payload: SensorPayload::PointCloud(PointCloud {
                points: vec![[1.0, 0.0, 0.5]],
            }),
        }
    }

    fn setup() -> (Arc<TfBuffer>, Arc<HistoryBuffer>, SensorIngestor) {
        let tf = Arc::new(TfBuffer::default());
        tf.set_static_transform("base_link", "laser", Pose3D::from_xy_yaw(0.2, 0.0, 0.0));
        tf.set_transform("odom", "base_link", Stamp::from_secs_f64(0.0), Pose3D::from_xy_yaw(0.0, 0.0, 0.0));
        tf.set_transform("odom", "base_link", Stamp::from_secs_f64(1.0), Pose3D::from_xy_yaw(1.0, 0.0, 0.0));
        let history = Arc::new(HistoryBuffer::new());
        let ingestor = SensorIngestor::new(
            tf.clone(),
            Arc::clone(&history),
            "base_link",
            "odom",
            Duration::from_millis(20),
        );
        (tf, history, ingestor)
    }

    #[tokio::test]
    async fn scan_is_recorded_with_both_poses() {
        let (_tf, history, ingestor) = setup();
        let stamp = ingestor
            .ingest(&scan_msg("laser", 0.5), Modality::RangeScan2D)
            .await
            .unwrap();
        assert_eq!(stamp, Stamp::from_secs_f64(0.5));

        let records = history.snapshot_and_purge(1.0);
        assert_eq!(records.len(), 1);
        let rec = &records[0];
        assert!((rec.robot_pose.translation.x - 0.5).abs() < 1e-9);
        assert!((rec.observation.sensor_pose().translation.x - 0.2).abs() < 1e-9);
        assert_eq!(rec.observation.kind(), "range_scan_2d");
    }

    #[tokio::test]
    async fn unknown_sensor_frame_drops_message() {
        let (_tf, history, ingestor) = setup();
        let err = ingestor
            .ingest(&scan_msg("sonar", 0.5), Modality::RangeScan2D)
            .await
            .unwrap_err();
        assert!(matches!(err, LocalMapError::TransformUnavailable { .. }));
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn future_stamp_is_extrapolation() {
        let (_tf, history, ingestor) = setup();
        let err = ingestor
            .ingest(&scan_msg("laser", 5.0), Modality::RangeScan2D)
            .await
            .unwrap_err();
        assert!(matches!(err, LocalMapError::TransformExtrapolation { .. }));
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn modality_mismatch_is_rejected() {
        let (_tf, history, ingestor) = setup();
        let err = ingestor
            .ingest(&cloud_msg("laser", 0.5), Modality::RangeScan2D)
            .await
            .unwrap_err();
        assert!(matches!(err, LocalMapError::Serialization(_)));
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn channel_task_survives_bad_messages() {
        let (_tf, history, ingestor) = setup();
        let bus = SensorBus::default();
        let handle = Arc::new(ingestor).spawn_channel(bus.subscribe("points"), Modality::PointCloud3D);

        async fn wait_for(history: &HistoryBuffer, n: usize) {
            for _ in 0..100 {
                if history.len() == n {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }

        // One at a time: a burst would be collapsed to its newest message.
        bus.publish("points", cloud_msg("nowhere", 0.5));
        tokio::time::sleep(Duration::from_millis(100)).await;
        bus.publish("points", cloud_msg("laser", 0.25));
        wait_for(&history, 1).await;
        bus.publish("points", cloud_msg("laser", 0.75));
        wait_for(&history, 2).await;

        assert_eq!(history.len(), 2);
        handle.abort();
    }

    #[tokio::test]
    async fn stale_backlog_is_skipped_after_transform_gap() {
        let (tf, history, _) = setup();
        let timeout = Duration::from_millis(500);
        let ingestor = Arc::new(SensorIngestor::new(
            tf,
            Arc::clone(&history),
            "base_link",
            "odom",
            timeout,
        ));
        let bus = SensorBus::default();
        let rx = bus.subscribe("scan");

        // Beyond the transform history: each would wait out the full timeout.
        for _ in 0..10 {
            bus.publish("scan", scan_msg("laser", 5.0));
        }
        bus.publish("scan", scan_msg("laser", 0.75));

        let started = Instant::now();
        let handle = ingestor.spawn_channel(rx, Modality::RangeScan2D);
        while history.is_empty() && started.elapsed() < timeout * 4 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let elapsed = started.elapsed();
        handle.abort();

        assert!(elapsed < timeout, "fresh scan recorded after {elapsed:?}");
        let records = history.snapshot_and_purge(1.0);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].timestamp, Stamp::from_secs_f64(0.75));
    }
}
