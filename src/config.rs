//! Settings and application paths
//!
//! Settings live in `vcompare.json` in the config directory; missing fields
//! fall back to defaults so old files keep loading.

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::player::{MAX_SPEED, MIN_SPEED};
use crate::entities::viewport::{MIN_DRAG_FRACTION, ZOOM_BASE};

pub const SETTINGS_FILE: &str = "vcompare.json";
pub const LOG_FILE: &str = "vcompare.log";
const CONFIG_ENV: &str = "VCOMPARE_CONFIG_DIR";
const APP_DIR: &str = "vcompare";

/// Engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Cached frames per video stream
    pub cache_capacity: usize,
    /// Frames decoded ahead of the playhead
    pub prefetch_window: usize,
    /// Zoom factor per wheel notch
    pub zoom_base: f64,
    /// Drags smaller than this fraction of the visible frame are ignored
    pub min_drag_fraction: f64,
    /// Prefetch threads (0 = auto)
    pub workers: usize,
    pub rows: usize,
    /// Interactive panel height; width follows the visible aspect
    pub panel_height: usize,
    pub audio_enabled: bool,
    pub snippet_audio: bool,
    pub default_speed: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_capacity: 120,
            prefetch_window: 8,
            zoom_base: ZOOM_BASE,
            min_drag_fraction: MIN_DRAG_FRACTION,
            workers: 0,
            rows: 1,
            panel_height: 360,
            audio_enabled: true,
            snippet_audio: true,
            default_speed: 1.0,
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings: {}", path.display()))?;
        let settings: Settings =
            serde_json::from_str(&json).with_context(|| format!("Failed to parse settings: {}", path.display()))?;
        Ok(settings.validated())
    }

    /// Replace out-of-range values, warning about each one.
    ///
    /// A `zoom_base` outside (0, 1) would invert or freeze wheel zoom, and a
    /// prefetch window as large as the cache would evict its own results.
    pub fn validated(mut self) -> Self {
        let defaults = Settings::default();
        if self.cache_capacity < 2 {
            warn!("cache_capacity {} too small, using 2", self.cache_capacity);
            self.cache_capacity = 2;
        }
        if self.prefetch_window >= self.cache_capacity {
            let window = self.cache_capacity - 1;
            warn!(
                "prefetch_window {} must be below cache_capacity {}, using {}",
                self.prefetch_window, self.cache_capacity, window
            );
            self.prefetch_window = window;
        }
        if !(self.zoom_base > 0.0 && self.zoom_base < 1.0) {
            warn!("zoom_base {} outside (0, 1), using {}", self.zoom_base, defaults.zoom_base);
            self.zoom_base = defaults.zoom_base;
        }
        if !(0.0..1.0).contains(&self.min_drag_fraction) {
            warn!(
                "min_drag_fraction {} outside [0, 1), using {}",
                self.min_drag_fraction, defaults.min_drag_fraction
            );
            self.min_drag_fraction = defaults.min_drag_fraction;
        }
        if self.rows == 0 {
            warn!("rows 0, using 1");
            self.rows = 1;
        }
        if self.panel_height == 0 {
            warn!("panel_height 0, using {}", defaults.panel_height);
            self.panel_height = defaults.panel_height;
        }
        if !self.default_speed.is_finite() {
            warn!("default_speed {} is not a number, using 1.0", self.default_speed);
            self.default_speed = 1.0;
        } else if !(MIN_SPEED..=MAX_SPEED).contains(&self.default_speed) {
            let speed = self.default_speed.clamp(MIN_SPEED, MAX_SPEED);
            warn!("default_speed {} out of range, using {}", self.default_speed, speed);
            self.default_speed = speed;
        }
        self
    }

    /// Load settings, falling back to defaults when absent or broken
    pub fn load_or_default(config: &PathConfig) -> Self {
        let path = config_file(SETTINGS_FILE, config);
        if !path.exists() {
            return Self::default();
        }
        match Self::load(&path) {
            Ok(settings) => {
                info!("Settings loaded from {}", path.display());
                settings
            }
            Err(e) => {
                warn!("{:#}; using defaults", e);
                Self::default()
            }
        }
    }

    pub fn save(&self, config: &PathConfig) -> Result<PathBuf> {
        ensure_dirs(config)?;
        let path = config_file(SETTINGS_FILE, config);
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json).with_context(|| format!("Failed to write settings: {}", path.display()))?;
        Ok(path)
    }
}

/// Overrides for the default application paths
#[derive(Debug, Clone, Default)]
pub struct PathConfig {
    /// Custom config directory (from CLI or ENV)
    pub config_dir: Option<PathBuf>,
}

impl PathConfig {
    /// Priority: CLI arg → `VCOMPARE_CONFIG_DIR` → None (platform defaults)
    pub fn from_env_and_cli(cli_dir: Option<PathBuf>) -> Self {
        let config_dir = cli_dir.or_else(|| std::env::var(CONFIG_ENV).ok().map(PathBuf::from));
        Self { config_dir }
    }
}

/// Path to a configuration file.
///
/// Priority:
/// 1. `--config-dir` / `VCOMPARE_CONFIG_DIR`
/// 2. Current folder if it already holds `vcompare.json` or `vcompare.log`
/// 3. Platform config dir (`~/.config/vcompare` on Linux)
pub fn config_file(name: &str, config: &PathConfig) -> PathBuf {
    config_dir(config).join(name)
}

/// Path to a data file (logs). Same priority as `config_file`, but falls
/// back to the platform data dir.
pub fn data_file(name: &str, config: &PathConfig) -> PathBuf {
    data_dir(config).join(name)
}

pub fn ensure_dirs(config: &PathConfig) -> Result<()> {
    let config_dir = config_dir(config);
    let data_dir = data_dir(config);
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)
            .with_context(|| format!("Failed to create config directory: {}", config_dir.display()))?;
    }
    if data_dir != config_dir && !data_dir.exists() {
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;
    }
    Ok(())
}

fn has_local_files(dir: &Path) -> bool {
    [SETTINGS_FILE, LOG_FILE].iter().any(|f| dir.join(f).exists())
}

fn local_dir() -> Option<PathBuf> {
    std::env::current_dir().ok().filter(|d| has_local_files(d))
}

fn config_dir(config: &PathConfig) -> PathBuf {
    if let Some(dir) = &config.config_dir {
        return dir.clone();
    }
    local_dir()
        .or_else(|| dirs_next::config_dir().map(|d| d.join(APP_DIR)))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn data_dir(config: &PathConfig) -> PathBuf {
    if let Some(dir) = &config.config_dir {
        return dir.clone();
    }
    local_dir()
        .or_else(|| dirs_next::data_dir().map(|d| d.join(APP_DIR)))
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_file_with_custom_dir() {
        let config = PathConfig {
            config_dir: Some(PathBuf::from("/custom")),
        };
        assert_eq!(config_file("test.json", &config), PathBuf::from("/custom/test.json"));
        assert_eq!(data_file(LOG_FILE, &config), PathBuf::from("/custom/vcompare.log"));
    }

    #[test]
    fn test_partial_settings_fill_defaults() {
        let s: Settings = serde_json::from_str(r#"{"cache_capacity": 30, "rows": 2}"#).unwrap();
        assert_eq!(s.cache_capacity, 30);
        assert_eq!(s.rows, 2);
        assert_eq!(s.prefetch_window, 8);
        assert_eq!(s.zoom_base, ZOOM_BASE);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let config = PathConfig {
            config_dir: Some(dir.path().to_path_buf()),
        };
        let settings = Settings {
            workers: 3,
            snippet_audio: false,
            ..Settings::default()
        };
        let path = settings.save(&config).unwrap();
        assert!(path.ends_with(SETTINGS_FILE));
        assert_eq!(Settings::load_or_default(&config), settings);
    }

    #[test]
    fn test_out_of_range_settings_replaced_on_load() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(SETTINGS_FILE),
            r#"{"zoom_base": 1.5, "cache_capacity": 10, "prefetch_window": 40, "rows": 0, "default_speed": 99.0}"#,
        )
        .unwrap();
        let s = Settings::load(&dir.path().join(SETTINGS_FILE)).unwrap();
        assert_eq!(s.zoom_base, ZOOM_BASE);
        assert_eq!(s.cache_capacity, 10);
        assert_eq!(s.prefetch_window, 9);
        assert_eq!(s.rows, 1);
        assert_eq!(s.default_speed, MAX_SPEED);
    }

    #[test]
    fn test_valid_settings_untouched() {
        let s = Settings {
            zoom_base: 0.5,
            prefetch_window: 4,
            cache_capacity: 5,
            ..Settings::default()
        };
        assert_eq!(s.clone().validated(), s);
        let zero = Settings {
            zoom_base: 0.0,
            ..Settings::default()
        };
        assert_eq!(zero.validated().zoom_base, ZOOM_BASE);
    }

    #[test]
    fn test_broken_settings_fall_back() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SETTINGS_FILE), "{not json").unwrap();
        let config = PathConfig {
            config_dir: Some(dir.path().to_path_buf()),
        };
        assert_eq!(Settings::load_or_default(&config), Settings::default());
    }
}
