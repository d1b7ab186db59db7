//! [`HistoryBuffer`] – the time-ordered store of recent observations.
//!
//! Any number of ingestion paths call [`HistoryBuffer::insert`]
//! concurrently; a single consumer (the map builder) calls
//! [`HistoryBuffer::snapshot_and_purge`] once per cycle.  Both run under one
//! short critical section.  The snapshot copies the retained records out so
//! that reprojection happens with the lock released.
//!
//! Records are only purged by a snapshot; between cycles the buffer may grow
//! beyond the time window.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use localmap_perception::{Observation, Pose3D};
use localmap_types::Stamp;
use tracing::debug;

/// Immutable capture of one sensor reading plus the robot's pose in the
/// reference frame at capture time.
#[derive(Debug, Clone)]
pub struct ObservationRecord {
    pub timestamp: Stamp,
    /// Shared so that snapshots copy a pointer, not the payload.
    pub observation: Arc<Observation>,
    /// `T_reference_robot` at `timestamp`.
    pub robot_pose: Pose3D,
}

impl ObservationRecord {
    pub fn new(timestamp: Stamp, observation: Observation, robot_pose: Pose3D) -> Self {
        Self {
            timestamp,
            observation: Arc::new(observation),
            robot_pose,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    /// Keyed by `(timestamp, insertion sequence)` so equal timestamps coexist.
    records: BTreeMap<(Stamp, u64), ObservationRecord>,
    next_seq: u64,
}

/// Thread-safe, time-ordered observation store.
#[derive(Debug, Default)]
pub struct HistoryBuffer {
    inner: Mutex<Inner>,
}

impl HistoryBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record.  O(log n); safe from any number of threads.
    pub fn insert(&self, record: ObservationRecord) {
        // A panicking holder cannot leave a record half-written, so the data
        // behind a poisoned lock is still consistent.
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.records.insert((record.timestamp, seq), record);
    }

    /// Drop every record older than `latest - time_window` and return copies
    /// of the rest, oldest first.
    ///
    /// `latest` is the newest timestamp present at the time of the call.  An
    /// empty buffer yields an empty snapshot.
    pub fn snapshot_and_purge(&self, time_window: f64) -> Vec<ObservationRecord> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        let Some(&(latest, _)) = inner.records.keys().next_back() else {
            return Vec::new();
        };
        let horizon = latest.saturating_sub_secs(time_window);
        let retained = inner.records.split_off(&(horizon, 0));
        let evicted = inner.records.len();
        inner.records = retained;

        debug!(evicted, retained = inner.records.len(), %latest, "purged observation history");
        inner.records.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use localmap_perception::CloudObservation;
    use std::thread;

    fn record(secs: f64) -> ObservationRecord {
        ObservationRecord::new(
            Stamp::from_secs_f64(secs),
            Observation::PointCloud3D(CloudObservation {
                points: vec![[secs as f32, 0.0, 0.0]],
                sensor_pose: Pose3D::identity(),
            }),
            Pose3D::from_xy_yaw(secs, 0.0, 0.0),
        )
    }

    fn stamps(records: &[ObservationRecord]) -> Vec<Stamp> {
        records.iter().map(|r| r.timestamp).collect()
    }

    #[test]
    fn empty_buffer_snapshot_is_empty() {
        let history = HistoryBuffer::new();
        assert!(history.snapshot_and_purge(0.2).is_empty());
    }

    #[test]
    fn window_boundary_is_inclusive_then_slides() {
        let history = HistoryBuffer::new();
        for t in [0.00, 0.05, 0.10, 0.15, 0.20] {
            history.insert(record(t));
        }
        let snap = history.snapshot_and_purge(0.20);
        assert_eq!(snap.len(), 5, "0.00 >= 0.20 - 0.20 must be retained");

        history.insert(record(0.25));
        let snap = history.snapshot_and_purge(0.20);
        let expected: Vec<Stamp> = [0.05, 0.10, 0.15, 0.20, 0.25]
            .iter()
            .map(|&t| Stamp::from_secs_f64(t))
            .collect();
        assert_eq!(stamps(&snap), expected);
        assert_eq!(history.len(), 5);
    }

    #[test]
    fn out_of_order_inserts_come_back_sorted() {
        let history = HistoryBuffer::new();
        for t in [3.0, 1.0, 2.0] {
            history.insert(record(t));
        }
        let snap = history.snapshot_and_purge(10.0);
        assert!(snap.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn duplicate_timestamps_are_kept() {
        let history = HistoryBuffer::new();
        history.insert(record(1.0));
        history.insert(record(1.0));
        history.insert(record(1.0));
        assert_eq!(history.snapshot_and_purge(0.0).len(), 3);
    }

    #[test]
    fn purge_partitions_by_horizon() {
        // Pseudo-random, unordered stamps in [0, 10).
        let history = HistoryBuffer::new();
        let mut inserted = Vec::new();
        let mut x: u64 = 12345;
        for _ in 0..200 {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let t = (x >> 33) as f64 / (1u64 << 31) as f64 * 10.0;
            inserted.push(Stamp::from_secs_f64(t));
            history.insert(record(t));
        }
        let window = 1.5;
        let latest = *inserted.iter().max().unwrap();
        let horizon = latest.saturating_sub_secs(window);

        let kept = history.snapshot_and_purge(window);
        assert!(kept.iter().all(|r| r.timestamp >= horizon));
        let expected_kept = inserted.iter().filter(|&&t| t >= horizon).count();
        assert_eq!(kept.len(), expected_kept, "every discarded record was older than the horizon");
    }

    #[test]
    fn snapshot_does_not_share_state_with_buffer() {
        let history = HistoryBuffer::new();
        history.insert(record(1.0));
        let snap = history.snapshot_and_purge(1.0);
        history.insert(record(1.5));
        assert_eq!(snap.len(), 1);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn concurrent_producers_do_not_lose_records() {
        let history = Arc::new(HistoryBuffer::new());
        let handles: Vec<_> = (0..4)
            .map(|p| {
                let history = Arc::clone(&history);
                thread::spawn(move || {
                    for i in 0..250 {
                        history.insert(record(f64::from(p) + f64::from(i) * 1e-3));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(history.len(), 1000);
        assert_eq!(history.snapshot_and_purge(100.0).len(), 1000);
    }

    #[test]
    fn snapshots_stay_ordered_and_windowed_under_concurrent_inserts() {
        let window = 0.05;
        let history = Arc::new(HistoryBuffer::new());
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let history = Arc::clone(&history);
                thread::spawn(move || {
                    for i in 0..500 {
                        history.insert(record(f64::from(i) * 1e-3 + f64::from(p) * 1e-4));
                    }
                })
            })
            .collect();

        let mut snapshots = 0;
        while producers.iter().any(|h| !h.is_finished()) || snapshots == 0 {
            let snap = history.snapshot_and_purge(window);
            if let Some(newest) = snap.last() {
                let horizon = newest.timestamp.saturating_sub_secs(window);
                assert!(snap.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
                assert!(snap.iter().all(|r| r.timestamp >= horizon));
            }
            snapshots += 1;
        }
        for h in producers {
            h.join().unwrap();
        }

        let last = history.snapshot_and_purge(window);
        let newest = last.last().expect("records remain").timestamp;
        assert_eq!(newest, Stamp::from_secs_f64(499e-3 + 3e-4));
        assert!(last.iter().all(|r| r.timestamp >= newest.saturating_sub_secs(window)));
    }
}
