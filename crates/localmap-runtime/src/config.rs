//! [`LocalMapConfig`] – the node's recognised options and their startup
//! validation.

use std::path::PathBuf;
use std::time::Duration;

use localmap_types::LocalMapError;
use serde::{Deserialize, Serialize};

/// Options of the local obstacle map node.
///
/// Every field has a default, so a partial TOML file (or none at all) is a
/// valid configuration as far as parsing goes; [`LocalMapConfig::validate`]
/// enforces the cross-field rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalMapConfig {
    /// Frame the robot pose is tracked against.
    pub reference_frame: String,
    /// Frame attached to the robot body; the map is published in it.
    pub robot_frame: String,
    pub output_topic_name: String,
    /// 2-D range scan channels, separated by spaces, commas, tabs or newlines.
    pub input_channel_list_2d: String,
    /// 3-D point cloud channels, same separators.
    pub input_channel_list_3d: String,
    /// Seconds of history aggregated into each map.
    pub time_window: f64,
    /// Seconds between rebuilds.
    pub publish_period: f64,
    pub enable_gui: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_config_path: Option<PathBuf>,
    /// Layer taken from the filter pipeline; required with a pipeline.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_output_layer_name: Option<String>,
    /// Seconds a transform lookup may wait for data.
    pub transform_timeout: f64,
    /// Seconds of transform history kept per frame edge.
    pub tf_cache_time: f64,
    /// Port of the WebSocket bridge.
    pub ws_port: u16,
}

impl Default for LocalMapConfig {
    fn default() -> Self {
        Self {
            reference_frame: "odom".to_string(),
            robot_frame: "base_link".to_string(),
            output_topic_name: "local_map_pointcloud".to_string(),
            input_channel_list_2d: "scan,laser1".to_string(),
            input_channel_list_3d: String::new(),
            time_window: 0.20,
            publish_period: 0.05,
            enable_gui: true,
            filter_config_path: None,
            filter_output_layer_name: None,
            transform_timeout: 1.0,
            tf_cache_time: 10.0,
            ws_port: 9090,
        }
    }
}

/// Split a channel list on spaces, commas, tabs and newlines, dropping empty
/// tokens.
pub fn parse_channel_list(list: &str) -> Vec<String> {
    list.split([' ', ',', '\t', '\n'])
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl LocalMapConfig {
    pub fn channels_2d(&self) -> Vec<String> {
        parse_channel_list(&self.input_channel_list_2d)
    }

    pub fn channels_3d(&self) -> Vec<String> {
        parse_channel_list(&self.input_channel_list_3d)
    }

    pub fn transform_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.transform_timeout.max(0.0))
    }

    pub fn publish_period(&self) -> Duration {
        Duration::from_secs_f64(self.publish_period)
    }

    /// Check the startup rules.
    ///
    /// # Errors
    ///
    /// [`LocalMapError::StartupConfiguration`] naming the first violated
    /// rule.
    pub fn validate(&self) -> Result<(), LocalMapError> {
        let fail = |msg: String| Err(LocalMapError::StartupConfiguration(msg));

        if !(self.publish_period.is_finite() && self.publish_period > 0.0) {
            return fail(format!("publish_period must be > 0, got {}", self.publish_period));
        }
        if !(self.time_window.is_finite() && self.time_window > self.publish_period) {
            return fail(format!(
                "time_window ({}) must be greater than publish_period ({})",
                self.time_window, self.publish_period
            ));
        }
        if !(self.transform_timeout.is_finite() && self.transform_timeout >= 0.0) {
            return fail(format!("transform_timeout must be >= 0, got {}", self.transform_timeout));
        }
        if !(self.tf_cache_time.is_finite() && self.tf_cache_time > 0.0) {
            return fail(format!("tf_cache_time must be > 0, got {}", self.tf_cache_time));
        }
        if self.reference_frame.is_empty() || self.robot_frame.is_empty() {
            return fail("reference_frame and robot_frame must be set".to_string());
        }
        if self.channels_2d().is_empty() && self.channels_3d().is_empty() {
            return fail("at least one input channel (2d or 3d) is required".to_string());
        }
        if self.filter_config_path.is_some()
            && self.filter_output_layer_name.as_deref().is_none_or(str::is_empty)
        {
            return fail("filter_config_path also requires filter_output_layer_name".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = LocalMapConfig::default();
        assert_eq!(cfg.reference_frame, "odom");
        assert_eq!(cfg.robot_frame, "base_link");
        assert!((cfg.time_window - 0.20).abs() < 1e-12);
        assert!((cfg.publish_period - 0.05).abs() < 1e-12);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn channel_lists_split_on_all_separators() {
        assert_eq!(parse_channel_list("scan,laser1"), vec!["scan", "laser1"]);
        assert!(parse_channel_list("").is_empty());
        assert_eq!(parse_channel_list(" a ,,b\tc\nd "), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn window_not_exceeding_period_fails() {
        let cfg = LocalMapConfig {
            time_window: 0.20,
            publish_period: 0.25,
            ..LocalMapConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(LocalMapError::StartupConfiguration(_))));

        let equal = LocalMapConfig {
            time_window: 0.25,
            publish_period: 0.25,
            ..LocalMapConfig::default()
        };
        assert!(equal.validate().is_err());
    }

    #[test]
    fn non_positive_period_fails() {
        let cfg = LocalMapConfig {
            publish_period: 0.0,
            ..LocalMapConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn no_channels_fails() {
        let cfg = LocalMapConfig {
            input_channel_list_2d: " , ".to_string(),
            input_channel_list_3d: String::new(),
            ..LocalMapConfig::default()
        };
        assert!(cfg.validate().is_err());

        let only_3d = LocalMapConfig {
            input_channel_list_2d: String::new(),
            input_channel_list_3d: "velodyne".to_string(),
            ..LocalMapConfig::default()
        };
        assert!(only_3d.validate().is_ok());
    }

    #[test]
    fn filter_path_requires_output_layer() {
        let mut cfg = LocalMapConfig {
            filter_config_path: Some(PathBuf::from("filters.toml")),
            ..LocalMapConfig::default()
        };
        assert!(cfg.validate().is_err());
        cfg.filter_output_layer_name = Some(String::new());
        assert!(cfg.validate().is_err());
        cfg.filter_output_layer_name = Some("decimated".to_string());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: LocalMapConfig = toml::from_str("time_window = 0.5\ninput_channel_list_3d = \"points\"\n").unwrap();
        assert!((cfg.time_window - 0.5).abs() < 1e-12);
        assert_eq!(cfg.channels_3d(), vec!["points"]);
        assert_eq!(cfg.robot_frame, "base_link");
        assert_eq!(cfg.ws_port, 9090);
    }
}
