//! Config file handling – reads/writes `~/.localmap/config.toml` and applies
//! `LOCALMAP_*` environment overrides.

use std::fs;
use std::path::{Path, PathBuf};

use localmap_runtime::LocalMapConfig;

/// Tests that read or write `LOCALMAP_*` variables hold this lock.
#[cfg(test)]
pub(crate) static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// Return the path to `~/.localmap/config.toml`.
pub fn default_config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".localmap").join("config.toml")
}

/// Load the config at `path`.  Returns `None` if the file does not exist.
///
/// Environment overrides are not applied here; see [`resolve`].
pub fn load_from(path: &Path) -> Result<Option<LocalMapConfig>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: LocalMapConfig =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config {}: {}", path.display(), e))?;
    Ok(Some(cfg))
}

/// File contents (or defaults when the file is absent) with environment
/// overrides on top.  The second value tells whether the file existed.
pub fn resolve(path: &Path) -> Result<(LocalMapConfig, bool), String> {
    let loaded = load_from(path)?;
    let found = loaded.is_some();
    let mut cfg = loaded.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    Ok((cfg, found))
}

/// Apply `LOCALMAP_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `LOCALMAP_REFERENCE_FRAME` | `reference_frame` |
/// | `LOCALMAP_ROBOT_FRAME` | `robot_frame` |
/// | `LOCALMAP_TIME_WINDOW` | `time_window` |
/// | `LOCALMAP_PUBLISH_PERIOD` | `publish_period` |
/// | `LOCALMAP_SCAN_TOPICS` | `input_channel_list_2d` |
/// | `LOCALMAP_CLOUD_TOPICS` | `input_channel_list_3d` |
/// | `LOCALMAP_WS_PORT` | `ws_port` |
///
/// Numeric values that fail to parse are ignored.
pub fn apply_env_overrides(cfg: &mut LocalMapConfig) {
    if let Ok(v) = std::env::var("LOCALMAP_REFERENCE_FRAME") {
        cfg.reference_frame = v;
    }
    if let Ok(v) = std::env::var("LOCALMAP_ROBOT_FRAME") {
        cfg.robot_frame = v;
    }
    if let Ok(v) = std::env::var("LOCALMAP_SCAN_TOPICS") {
        cfg.input_channel_list_2d = v;
    }
    if let Ok(v) = std::env::var("LOCALMAP_CLOUD_TOPICS") {
        cfg.input_channel_list_3d = v;
    }
    if let Ok(v) = std::env::var("LOCALMAP_TIME_WINDOW")
        && let Ok(secs) = v.parse::<f64>()
    {
        cfg.time_window = secs;
    }
    if let Ok(v) = std::env::var("LOCALMAP_PUBLISH_PERIOD")
        && let Ok(secs) = v.parse::<f64>()
    {
        cfg.publish_period = secs;
    }
    if let Ok(v) = std::env::var("LOCALMAP_WS_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.ws_port = port;
    }
}

/// Write `cfg` to `path`, creating the parent directory if necessary.
pub fn save_to(cfg: &LocalMapConfig, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let raw = toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    // Owner read/write, group/other read (rw-r--r--) on Unix.
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o644)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
