//! `localmap-runtime` – the time-windowed local obstacle map.
//!
//! Sensor channels feed a shared observation history; a periodic builder
//! reprojects that history into the robot's current frame and publishes the
//! result.
//!
//! # Modules
//!
//! - [`history`] – [`HistoryBuffer`]: time-ordered, thread-safe record store
//!   with atomic snapshot-and-purge.
//! - [`ingestion`] – [`SensorIngestor`]: per-channel tasks resolving
//!   sensor→robot and robot→reference transforms for each message.
//! - [`builder`] – [`MapBuilder`]: one rebuild cycle (snapshot, current pose,
//!   reprojection, filtering, publish, render).
//! - [`filter`] – [`FilterPipeline`]: layered point filters loaded from TOML.
//! - [`scene`] – [`Scene`] / [`SceneGraph`]: the visualisation surface.
//! - [`config`] – [`LocalMapConfig`]: options and startup validation.
//! - [`node`] – [`LocalObstaclesNode`]: wires it all together and drives the
//!   builder at the publish period.
//! - [`telemetry`] – [`init_tracing`]: log output and optional OTLP export.

pub mod builder;
pub mod config;
pub mod filter;
pub mod history;
pub mod ingestion;
pub mod node;
pub mod scene;
pub mod telemetry;

pub use builder::{CycleReport, MapBuilder};
pub use config::{LocalMapConfig, parse_channel_list};
pub use filter::{BoundingBoxFilter, DecimateVoxels, Filter, FilterPipeline, FilterSpec, MetricMap, RAW_LAYER};
pub use history::{HistoryBuffer, ObservationRecord};
pub use ingestion::{Modality, SensorIngestor};
pub use node::LocalObstaclesNode;
pub use scene::{Scene, SceneGraph};
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
