//! Post-aggregation filter pipeline.
//!
//! The aggregate map is wrapped in a [`MetricMap`] under the [`RAW_LAYER`]
//! name.  Each [`Filter`] reads one named layer and writes another; the
//! builder then takes the configured output layer.
//!
//! Pipelines are described in TOML:
//!
//! ```toml
//! [[filters]]
//! type = "decimate_voxels"
//! input_layer = "raw"
//! output_layer = "decimated"
//! voxel_size = 0.10
//!
//! [[filters]]
//! type = "bounding_box"
//! input_layer = "decimated"
//! inside_layer = "obstacles"
//! min = [-5.0, -5.0, -0.5]
//! max = [5.0, 5.0, 2.0]
//! ```

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

use localmap_perception::{Aabb, Point3, PointMap};
use localmap_types::LocalMapError;
use serde::{Deserialize, Serialize};

/// Layer holding the unfiltered aggregate.
pub const RAW_LAYER: &str = "raw";

// ────────────────────────────────────────────────────────────────────────────
// MetricMap
// ────────────────────────────────────────────────────────────────────────────

/// A set of named point layers.
#[derive(Debug, Clone, Default)]
pub struct MetricMap {
    layers: BTreeMap<String, PointMap>,
}

impl MetricMap {
    pub fn with_raw(raw: PointMap) -> Self {
        let mut map = Self::default();
        map.set_layer(RAW_LAYER, raw);
        map
    }

    pub fn layer(&self, name: &str) -> Option<&PointMap> {
        self.layers.get(name)
    }

    pub fn set_layer(&mut self, name: &str, points: PointMap) {
        self.layers.insert(name.to_string(), points);
    }

    pub fn take_layer(&mut self, name: &str) -> Option<PointMap> {
        self.layers.remove(name)
    }

    pub fn layer_names(&self) -> impl Iterator<Item = &str> {
        self.layers.keys().map(String::as_str)
    }

    fn input(&self, name: &str) -> Result<&PointMap, LocalMapError> {
        self.layer(name)
            .ok_or_else(|| LocalMapError::Filter(format!("input layer '{name}' does not exist")))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Filters
// ────────────────────────────────────────────────────────────────────────────

/// One pipeline stage: a pure function from one layer to another.
pub trait Filter: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(&self, map: &mut MetricMap) -> Result<(), LocalMapError>;
}

/// Keeps one point per occupied voxel: the first one seen.
#[derive(Debug, Clone)]
pub struct DecimateVoxels {
    pub input_layer: String,
    pub output_layer: String,
    pub voxel_size: f32,
}

impl DecimateVoxels {
    fn voxel_of(&self, p: Point3) -> (i64, i64, i64) {
        let v = self.voxel_size;
        (
            (p.x / v).floor() as i64,
            (p.y / v).floor() as i64,
            (p.z / v).floor() as i64,
        )
    }
}

impl Filter for DecimateVoxels {
    fn name(&self) -> &'static str {
        "decimate_voxels"
    }

    fn apply(&self, map: &mut MetricMap) -> Result<(), LocalMapError> {
        let input = map.input(&self.input_layer)?;
        let mut occupied = HashSet::with_capacity(input.len());
        let mut out = PointMap::new();
        for &p in input.points() {
            if occupied.insert(self.voxel_of(p)) {
                out.push(p);
            }
        }
        map.set_layer(&self.output_layer, out);
        Ok(())
    }
}

/// Keeps the points inside an axis-aligned box.
#[derive(Debug, Clone)]
pub struct BoundingBoxFilter {
    pub input_layer: String,
    pub inside_layer: String,
    pub bounds: Aabb,
}

impl Filter for BoundingBoxFilter {
    fn name(&self) -> &'static str {
        "bounding_box"
    }

    fn apply(&self, map: &mut MetricMap) -> Result<(), LocalMapError> {
        let input = map.input(&self.input_layer)?;
        let inside = PointMap::from_points(
            input
                .points()
                .iter()
                .copied()
                .filter(|&p| self.bounds.contains_point(p))
                .collect(),
        );
        map.set_layer(&self.inside_layer, inside);
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Pipeline description
// ────────────────────────────────────────────────────────────────────────────

/// One `[[filters]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterSpec {
    DecimateVoxels {
        input_layer: String,
        output_layer: String,
        voxel_size: f32,
    },
    BoundingBox {
        input_layer: String,
        inside_layer: String,
        min: [f32; 3],
        max: [f32; 3],
    },
}

#[derive(Debug, Deserialize)]
struct PipelineFile {
    #[serde(default)]
    filters: Vec<FilterSpec>,
}

impl FilterSpec {
    fn build(self) -> Result<Box<dyn Filter>, LocalMapError> {
        match self {
            FilterSpec::DecimateVoxels {
                input_layer,
                output_layer,
                voxel_size,
            } => {
                if !(voxel_size.is_finite() && voxel_size > 0.0) {
                    return Err(LocalMapError::StartupConfiguration(format!(
                        "decimate_voxels: voxel_size must be positive, got {voxel_size}"
                    )));
                }
                Ok(Box::new(DecimateVoxels {
                    input_layer,
                    output_layer,
                    voxel_size,
                }))
            }
            FilterSpec::BoundingBox {
                input_layer,
                inside_layer,
                min,
                max,
            } => Ok(Box::new(BoundingBoxFilter {
                input_layer,
                inside_layer,
                bounds: Aabb::new(Point3::new(min[0], min[1], min[2]), Point3::new(max[0], max[1], max[2])),
            })),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// FilterPipeline
// ────────────────────────────────────────────────────────────────────────────

/// An ordered list of filters.
#[derive(Default)]
pub struct FilterPipeline {
    filters: Vec<Box<dyn Filter>>,
}

impl std::fmt::Debug for FilterPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.filters.iter().map(|flt| flt.name()))
            .finish()
    }
}

impl FilterPipeline {
    pub fn new(filters: Vec<Box<dyn Filter>>) -> Self {
        Self { filters }
    }

    /// Parse a pipeline description.
    ///
    /// # Errors
    ///
    /// [`LocalMapError::StartupConfiguration`] on malformed TOML, an unknown
    /// filter type, or invalid parameters.
    pub fn from_toml_str(raw: &str) -> Result<Self, LocalMapError> {
        let file: PipelineFile = toml::from_str(raw)
            .map_err(|e| LocalMapError::StartupConfiguration(format!("failed to parse filter pipeline: {e}")))?;
        let filters = file
            .filters
            .into_iter()
            .map(FilterSpec::build)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { filters })
    }

    /// Read and parse the pipeline at `path`.
    pub fn load(path: &Path) -> Result<Self, LocalMapError> {
        let raw = fs::read_to_string(path).map_err(|e| {
            LocalMapError::StartupConfiguration(format!("failed to read filter pipeline {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Run every filter over `raw` and return `output_layer`.
    ///
    /// # Errors
    ///
    /// [`LocalMapError::Filter`] when a stage fails or `output_layer` was
    /// never produced.
    pub fn apply(&self, raw: &PointMap, output_layer: &str) -> Result<PointMap, LocalMapError> {
        let mut map = MetricMap::with_raw(raw.clone());
        for filter in &self.filters {
            filter.apply(&mut map)?;
        }
        map.take_layer(output_layer).ok_or_else(|| {
            let available: Vec<&str> = map.layer_names().collect();
            LocalMapError::Filter(format!(
                "output layer '{output_layer}' not produced (layers: {available:?})"
            ))
        })
    }
}
