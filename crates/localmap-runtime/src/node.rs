//! [`LocalObstaclesNode`] – wires ingestion, history and the map builder.
//!
//! Construction validates the configuration, loads the optional filter
//! pipeline and subscribes one ingestion task per configured channel.
//! [`LocalObstaclesNode::run`] then drives the builder at `publish_period`
//! until shutdown is signalled.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn demo() -> Result<(), localmap_types::LocalMapError> {
//! use std::sync::Arc;
//! use localmap_middleware::{MapPublisher, SensorBus};
//! use localmap_perception::TfBuffer;
//! use localmap_runtime::{LocalMapConfig, LocalObstaclesNode};
//!
//! let bus = SensorBus::default();
//! let tf = Arc::new(TfBuffer::default());
//! let node = LocalObstaclesNode::new(LocalMapConfig::default(), tf, &bus, Arc::new(MapPublisher::default()))?;
//! let (_stop, stop_rx) = tokio::sync::watch::channel(false);
//! node.run(stop_rx).await;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use localmap_middleware::{MapSink, SensorBus};
use localmap_perception::TransformSource;
use localmap_types::LocalMapError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

use crate::builder::MapBuilder;
use crate::config::LocalMapConfig;
use crate::filter::FilterPipeline;
use crate::history::HistoryBuffer;
use crate::ingestion::{Modality, SensorIngestor};
use crate::scene::Scene;

/// The running local obstacle map.
pub struct LocalObstaclesNode {
    config: LocalMapConfig,
    builder: MapBuilder,
    ingestion: Vec<JoinHandle<()>>,
}

impl LocalObstaclesNode {
    /// Validate `config` and subscribe to every channel on `bus`.
    ///
    /// Must be called from within a Tokio runtime: ingestion tasks are
    /// spawned here.
    ///
    /// # Errors
    ///
    /// [`LocalMapError::StartupConfiguration`] for invalid options or an
    /// unreadable filter pipeline.  Nothing is spawned in that case.
    pub fn new(
        config: LocalMapConfig,
        tf: Arc<dyn TransformSource>,
        bus: &SensorBus,
        sink: Arc<dyn MapSink>,
    ) -> Result<Self, LocalMapError> {
        config.validate()?;

        let history = Arc::new(HistoryBuffer::new());
        let mut builder = MapBuilder::new(&config, Arc::clone(&history), Arc::clone(&tf), sink);

        if let Some(path) = &config.filter_config_path {
            let pipeline = FilterPipeline::load(path)?;
            let layer = config.filter_output_layer_name.clone().unwrap_or_default();
            info!(path = %path.display(), filters = pipeline.len(), output_layer = %layer, "filter pipeline loaded");
            builder = builder.with_filter(pipeline, layer);
        }

        let ingestor = Arc::new(SensorIngestor::new(
            tf,
            Arc::clone(&history),
            config.robot_frame.clone(),
            config.reference_frame.clone(),
            config.transform_timeout(),
        ));

        let channels = config
            .channels_2d()
            .into_iter()
            .map(|c| (c, Modality::RangeScan2D))
            .chain(config.channels_3d().into_iter().map(|c| (c, Modality::PointCloud3D)));
        let mut ingestion = Vec::new();
        for (channel, modality) in channels {
            debug!(channel = %channel, modality = modality.as_str(), "subscribing");
            ingestion.push(Arc::clone(&ingestor).spawn_channel(bus.subscribe(&channel), modality));
        }
        info!(total = ingestion.len(), "sensor subscriptions");

        Ok(Self {
            config,
            builder,
            ingestion,
        })
    }

    /// Render each cycle into `scene` when `enable_gui` is set; otherwise
    /// the scene is dropped.
    pub fn with_scene(mut self, scene: Box<dyn Scene>) -> Self {
        if self.config.enable_gui {
            self.builder.set_scene(scene);
        } else {
            debug!("enable_gui is off, scene not attached");
        }
        self
    }

    pub fn subscription_count(&self) -> usize {
        self.ingestion.len()
    }

    /// Rebuild every `publish_period` until `shutdown` turns `true` (or its
    /// sender is dropped).  A slow cycle delays the next tick rather than
    /// queueing extra ones.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.publish_period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            period_s = self.config.publish_period,
            window_s = self.config.time_window,
            robot = %self.config.robot_frame,
            reference = %self.config.reference_frame,
            "local obstacle map running"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => self.cycle().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        for handle in &self.ingestion {
            handle.abort();
        }
        info!("local obstacle map stopped");
    }

    async fn cycle(&mut self) {
        match self.builder.rebuild().await {
            Ok(report) => trace!(points = report.final_points, published = report.published, "cycle done"),
            Err(LocalMapError::EmptyHistory) => trace!("no observations, cycle skipped"),
            Err(e) if e.is_transient() => warn!(error = %e, "cycle aborted"),
            Err(e) => error!(error = %e, "cycle failed"),
        }
    }
}

impl Drop for LocalObstaclesNode {
    fn drop(&mut self) {
        for handle in &self.ingestion {
            handle.abort();
        }
    }
}
