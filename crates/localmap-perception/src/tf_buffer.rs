//! Time-indexed Transform Frame (TF) buffer.
//!
//! Maintains a graph of named reference frames whose edges carry a short
//! history of timestamped [`Pose3D`] samples (`T_parent_child`).  Given any
//! two frame names and a time, the buffer walks the graph breadth-first,
//! evaluates every edge at that time (interpolating between samples), and
//! composes the chain into a single `T_target_source`.
//!
//! The buffer implements [`TransformSource`], the lookup contract consumed
//! by sensor ingestion and the map builder.  Lookups wait up to a bounded
//! timeout for data that has not arrived yet.
//!
//! # Example
//!
//! ```rust
//! use localmap_perception::tf_buffer::{LookupTime, TfBuffer};
//! use localmap_perception::transform::Pose3D;
//! use localmap_types::Stamp;
//!
//! let tf = TfBuffer::default();
//! tf.set_static_transform("base_link", "laser", Pose3D::from_xy_yaw(0.2, 0.0, 0.0));
//! tf.set_transform("odom", "base_link", Stamp::from_secs_f64(1.0), Pose3D::from_xy_yaw(1.0, 0.0, 0.0));
//! tf.set_transform("odom", "base_link", Stamp::from_secs_f64(2.0), Pose3D::from_xy_yaw(2.0, 0.0, 0.0));
//!
//! let t = tf
//!     .lookup_now("odom", "laser", LookupTime::At(Stamp::from_secs_f64(1.5)))
//!     .unwrap();
//! assert!((t.translation.x - 1.7).abs() < 1e-9);
//! ```

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use localmap_types::{LocalMapError, Stamp};
use tokio::sync::Notify;
use tracing::trace;

use crate::transform::Pose3D;

/// Default amount of history retained per edge (seconds).
pub const DEFAULT_CACHE_TIME: f64 = 10.0;

// ────────────────────────────────────────────────────────────────────────────
// Lookup contract
// ────────────────────────────────────────────────────────────────────────────

/// The instant at which a transform is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupTime {
    /// Evaluate every edge at exactly this time.
    At(Stamp),
    /// The most recent time at which the whole chain is known.
    Latest,
}

/// Resolves rigid transforms between named frames.
///
/// `lookup(target, source, ..)` returns `T_target_source`: the pose of
/// `source` inside `target`, i.e. the transform that maps points expressed in
/// `source` into `target`.
#[async_trait]
pub trait TransformSource: Send + Sync {
    /// Resolve `T_target_source` at `at`, waiting up to `timeout` for the
    /// data to become available.
    async fn lookup(
        &self,
        target: &str,
        source: &str,
        at: LookupTime,
        timeout: Duration,
    ) -> Result<Pose3D, LocalMapError>;
}

// ────────────────────────────────────────────────────────────────────────────
// Edge history
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
enum EdgeHistory {
    Static(Pose3D),
    Dynamic(BTreeMap<Stamp, Pose3D>),
}

/// Why a single edge could not be evaluated.
enum EdgeMiss {
    Empty,
    OutOfRange { earliest: Stamp, latest: Stamp },
}

impl EdgeHistory {
    fn newest(&self) -> Option<Stamp> {
        match self {
            EdgeHistory::Static(_) => None,
            EdgeHistory::Dynamic(samples) => samples.keys().next_back().copied(),
        }
    }

    fn sample(&self, at: Stamp) -> Result<Pose3D, EdgeMiss> {
        let samples = match self {
            EdgeHistory::Static(pose) => return Ok(*pose),
            EdgeHistory::Dynamic(samples) => samples,
        };
        let (Some((&earliest, _)), Some((&latest, _))) =
            (samples.iter().next(), samples.iter().next_back())
        else {
            return Err(EdgeMiss::Empty);
        };
        if at < earliest || at > latest {
            return Err(EdgeMiss::OutOfRange { earliest, latest });
        }
        let before = samples.range(..=at).next_back();
        let after = samples.range(at..).next();
        match (before, after) {
            (Some((&t0, p0)), Some((&t1, p1))) => {
                if t0 == t1 {
                    Ok(*p0)
                } else {
                    let ratio = at.secs_since(t0) / t1.secs_since(t0);
                    Ok(p0.interpolate(*p1, ratio))
                }
            }
            _ => Err(EdgeMiss::OutOfRange { earliest, latest }),
        }
    }
}

/// One step of a path through the frame graph.
#[derive(Debug, Clone)]
struct Step {
    parent: String,
    child: String,
    /// `true` when walking parent → child (use the edge as stored).
    forward: bool,
}

#[derive(Debug, Default)]
struct FrameGraph {
    /// `edges[parent][child]`
    edges: HashMap<String, HashMap<String, EdgeHistory>>,
    /// `parents[child]` – reverse adjacency for child → parent walks.
    parents: HashMap<String, HashSet<String>>,
}

impl FrameGraph {
    fn knows(&self, frame: &str) -> bool {
        self.edges.contains_key(frame) || self.parents.contains_key(frame)
    }

    fn edge(&self, step: &Step) -> Option<&EdgeHistory> {
        self.edges.get(&step.parent).and_then(|c| c.get(&step.child))
    }

    /// Shortest path from `target` to `source`, edges walked in either
    /// direction.
    fn path(&self, target: &str, source: &str) -> Option<Vec<Step>> {
        let mut queue: VecDeque<String> = VecDeque::new();
        let mut came_from: HashMap<String, Step> = HashMap::new();
        let mut visited: HashSet<String> = HashSet::new();

        queue.push_back(target.to_string());
        visited.insert(target.to_string());

        while let Some(current) = queue.pop_front() {
            if current == source {
                let mut steps = Vec::new();
                let mut node = current;
                while let Some(step) = came_from.get(&node) {
                    let prev = if step.forward {
                        step.parent.clone()
                    } else {
                        step.child.clone()
                    };
                    steps.push(step.clone());
                    node = prev;
                }
                steps.reverse();
                return Some(steps);
            }

            let children = self
                .edges
                .get(&current)
                .into_iter()
                .flat_map(|c| c.keys())
                .map(|child| Step {
                    parent: current.clone(),
                    child: child.clone(),
                    forward: true,
                });
            let parents = self
                .parents
                .get(&current)
                .into_iter()
                .flatten()
                .map(|parent| Step {
                    parent: parent.clone(),
                    child: current.clone(),
                    forward: false,
                });

            for step in children.chain(parents).collect::<Vec<_>>() {
                let next = if step.forward {
                    step.child.clone()
                } else {
                    step.parent.clone()
                };
                if visited.insert(next.clone()) {
                    came_from.insert(next.clone(), step);
                    queue.push_back(next);
                }
            }
        }
        None
    }
}

// ────────────────────────────────────────────────────────────────────────────
// TfBuffer
// ────────────────────────────────────────────────────────────────────────────

/// Thread-safe store of timestamped frame transforms.
///
/// Writers call [`TfBuffer::set_transform`] (or
/// [`TfBuffer::set_static_transform`]); readers call
/// [`TransformSource::lookup`] or the non-waiting [`TfBuffer::lookup_now`].
#[derive(Debug)]
pub struct TfBuffer {
    graph: RwLock<FrameGraph>,
    cache_time: f64,
    updated: Notify,
}

impl Default for TfBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TIME)
    }
}

impl TfBuffer {
    /// Create an empty buffer keeping `cache_time` seconds of history per
    /// edge.
    pub fn new(cache_time: f64) -> Self {
        Self {
            graph: RwLock::new(FrameGraph::default()),
            cache_time: cache_time.max(0.0),
            updated: Notify::new(),
        }
    }

    /// Record `T_parent_child` at `stamp`.
    ///
    /// Samples older than the cache time (relative to the newest sample on
    /// the same edge) are discarded.  A dynamic sample replaces a static
    /// transform previously registered on the same edge.
    pub fn set_transform(&self, parent: &str, child: &str, stamp: Stamp, pose: Pose3D) {
        {
            let mut graph = self.graph.write().unwrap_or_else(PoisonError::into_inner);
            let entry = graph
                .edges
                .entry(parent.to_string())
                .or_default()
                .entry(child.to_string())
                .or_insert_with(|| EdgeHistory::Dynamic(BTreeMap::new()));
            if let EdgeHistory::Static(_) = entry {
                *entry = EdgeHistory::Dynamic(BTreeMap::new());
            }
            if let EdgeHistory::Dynamic(samples) = entry {
                samples.insert(stamp, pose);
                if let Some(&newest) = samples.keys().next_back() {
                    let horizon = newest.saturating_sub_secs(self.cache_time);
                    *samples = samples.split_off(&horizon);
                }
            }
            graph
                .parents
                .entry(child.to_string())
                .or_default()
                .insert(parent.to_string());
        }
        trace!(parent, child, %stamp, "transform updated");
        self.updated.notify_waiters();
    }

    /// Record a time-invariant `T_parent_child` (e.g. a sensor mount).
    pub fn set_static_transform(&self, parent: &str, child: &str, pose: Pose3D) {
        {
            let mut graph = self.graph.write().unwrap_or_else(PoisonError::into_inner);
            graph
                .edges
                .entry(parent.to_string())
                .or_default()
                .insert(child.to_string(), EdgeHistory::Static(pose));
            graph
                .parents
                .entry(child.to_string())
                .or_default()
                .insert(parent.to_string());
        }
        self.updated.notify_waiters();
    }

    /// Resolve `T_target_source` with the data present right now, without
    /// waiting.
    pub fn lookup_now(
        &self,
        target: &str,
        source: &str,
        at: LookupTime,
    ) -> Result<Pose3D, LocalMapError> {
        let unavailable = |reason: &str| LocalMapError::TransformUnavailable {
            target: target.to_string(),
            source_frame: source.to_string(),
            reason: reason.to_string(),
        };

        if target == source {
            return Ok(Pose3D::identity());
        }

        let graph = self.graph.read().unwrap_or_else(PoisonError::into_inner);
        if !graph.knows(target) {
            return Err(unavailable(&format!("frame '{target}' does not exist")));
        }
        if !graph.knows(source) {
            return Err(unavailable(&format!("frame '{source}' does not exist")));
        }
        let steps = graph
            .path(target, source)
            .ok_or_else(|| unavailable("frames are not connected"))?;

        let edges: Vec<(&Step, &EdgeHistory)> = steps
            .iter()
            .filter_map(|s| graph.edge(s).map(|e| (s, e)))
            .collect();

        let stamp = match at {
            LookupTime::At(stamp) => stamp,
            // Newest instant covered by every dynamic edge of the chain.
            LookupTime::Latest => edges
                .iter()
                .filter_map(|(_, e)| e.newest())
                .min()
                .unwrap_or_default(),
        };

        let mut accumulated = Pose3D::identity();
        for (step, edge) in edges {
            let pose = edge.sample(stamp).map_err(|miss| match miss {
                EdgeMiss::Empty => unavailable(&format!(
                    "no data for {} -> {}",
                    step.parent, step.child
                )),
                EdgeMiss::OutOfRange { earliest, latest } => {
                    LocalMapError::TransformExtrapolation {
                        target: target.to_string(),
                        source_frame: source.to_string(),
                        requested: stamp,
                        earliest,
                        latest,
                    }
                }
            })?;
            let step_pose = if step.forward { pose } else { pose.inverse() };
            accumulated = accumulated.compose(step_pose);
        }
        Ok(accumulated)
    }
}

#[async_trait]
impl TransformSource for TfBuffer {
    async fn lookup(
        &self,
        target: &str,
        source: &str,
        at: LookupTime,
        timeout: Duration,
    ) -> Result<Pose3D, LocalMapError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register for wake-ups before checking, so an update landing
            // between the check and the wait is not missed.
            let notified = self.updated.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let err = match self.lookup_now(target, source, at) {
                Ok(pose) => return Ok(pose),
                Err(err) => err,
            };
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(err);
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
