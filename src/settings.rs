use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, RwLock};

use crate::tiles::{
    DEFAULT_CACHE_BYTES, DEFAULT_TILE_SIZE, DEFAULT_WORKERS, DisplayMetrics, PixelFormat,
    PoolConfig, Scale, default_scales,
};

pub const CURRENT_VERSION: u32 = 1;
const SETTINGS_FILENAME: &str = "config.yaml";
const APP_NAME: &str = "tessera";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default = "default_scales")]
    pub scales: Vec<Scale>,

    #[serde(default = "default_tile_size")]
    pub tile_size: u32,

    #[serde(default)]
    pub format: PixelFormat,

    #[serde(default = "default_dpi")]
    pub dpi: f64,

    #[serde(default = "default_device_pixel_ratio")]
    pub device_pixel_ratio: f64,

    /// Threads used for asynchronous renders
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Resident tile memory cap, 0 for unbounded
    #[serde(default = "default_max_cache_bytes")]
    pub max_cache_bytes: usize,
}

fn default_version() -> u32 {
    CURRENT_VERSION
}

fn default_tile_size() -> u32 {
    DEFAULT_TILE_SIZE
}

fn default_dpi() -> f64 {
    DisplayMetrics::default().dpi
}

fn default_device_pixel_ratio() -> f64 {
    DisplayMetrics::default().device_pixel_ratio
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_max_cache_bytes() -> usize {
    DEFAULT_CACHE_BYTES
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            scales: default_scales(),
            tile_size: default_tile_size(),
            format: PixelFormat::default(),
            dpi: default_dpi(),
            device_pixel_ratio: default_device_pixel_ratio(),
            workers: default_workers(),
            max_cache_bytes: default_max_cache_bytes(),
        }
    }
}

impl Settings {
    /// Pool configuration for a graphic of native size `content_size`
    #[must_use]
    pub fn pool_config(&self, content_size: (f64, f64)) -> PoolConfig {
        PoolConfig::new(content_size.0, content_size.1)
            .with_scales(self.scales.clone())
            .with_tile_size(self.tile_size)
            .with_format(self.format)
            .with_metrics(DisplayMetrics::new(self.dpi, self.device_pixel_ratio))
            .with_cache_budget(self.max_cache_bytes)
    }
}

static SETTINGS: LazyLock<RwLock<Settings>> = LazyLock::new(|| RwLock::new(Settings::default()));

pub fn preferred_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|config| config.join(APP_NAME).join(SETTINGS_FILENAME))
}

pub fn load_settings() {
    let Some(path) = preferred_config_path() else {
        warn!("Could not determine config directory, using default settings");
        return;
    };
    if path.exists() {
        load_settings_from_path(&path);
    } else {
        info!("Settings file not found, creating with defaults at {path:?}");
        if let Ok(settings) = SETTINGS.read() {
            save_settings_to_file(&settings, &path);
        }
    }
}

/// Replace the global settings with the contents of `path`. Unreadable or
/// malformed files are logged and leave the current settings in place.
pub fn load_settings_from_path(path: &Path) {
    if let Some(settings) = read_settings_file(path) {
        if let Ok(mut global) = SETTINGS.write() {
            *global = settings;
        }
    }
}

/// Parse a settings file, migrating and rewriting it when outdated
pub fn read_settings_file(path: &Path) -> Option<Settings> {
    match fs::read_to_string(path) {
        Ok(content) => match serde_yaml::from_str::<Settings>(&content) {
            Ok(mut settings) => {
                debug!("Loaded settings from {path:?}");

                if settings.version < CURRENT_VERSION {
                    migrate_settings(&mut settings);
                    save_settings_to_file(&settings, path);
                }
                Some(settings)
            }
            Err(e) => {
                error!("Failed to parse settings file {path:?}: {e}");
                None
            }
        },
        Err(e) => {
            error!("Failed to read settings file {path:?}: {e}");
            None
        }
    }
}

fn migrate_settings(settings: &mut Settings) {
    info!(
        "Migrating settings from v{} to v{}",
        settings.version, CURRENT_VERSION
    );
    settings.version = CURRENT_VERSION;
}

pub fn save_settings() {
    let Some(path) = preferred_config_path() else {
        warn!("Could not determine config directory, cannot save settings");
        return;
    };

    if let Ok(settings) = SETTINGS.read() {
        save_settings_to_file(&settings, &path);
    }
}

pub fn save_settings_to_file(settings: &Settings, path: &Path) {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            if let Err(e) = fs::create_dir_all(parent) {
                error!("Failed to create config directory {parent:?}: {e}");
                return;
            }
        }
    }

    let content = generate_settings_yaml(settings);

    match fs::write(path, content) {
        Ok(()) => debug!("Saved settings to {path:?}"),
        Err(e) => error!("Failed to save settings to {path:?}: {e}"),
    }
}

fn generate_settings_yaml(settings: &Settings) -> String {
    let mut content = String::new();

    content.push_str(&format!("version: {}\n", settings.version));
    content.push('\n');
    content.push_str("# Magnification levels, increasing. \"N\" or \"N/D\".\n");
    let scales: Vec<String> = settings
        .scales
        .iter()
        .map(|s| format!("\"{s}\""))
        .collect();
    content.push_str(&format!("scales: [{}]\n", scales.join(", ")));
    content.push_str("# Tile edge in device pixels\n");
    content.push_str(&format!("tile_size: {}\n", settings.tile_size));
    content.push_str("# rgb8, rgba8, bgra8 or gray8\n");
    let format = match settings.format {
        PixelFormat::Rgb8 => "rgb8",
        PixelFormat::Rgba8 => "rgba8",
        PixelFormat::Bgra8 => "bgra8",
        PixelFormat::Gray8 => "gray8",
    };
    content.push_str(&format!("format: {format}\n"));
    content.push('\n');
    content.push_str(&format!("dpi: {:?}\n", settings.dpi));
    content.push_str(&format!(
        "device_pixel_ratio: {:?}\n",
        settings.device_pixel_ratio
    ));
    content.push('\n');
    content.push_str(&format!("workers: {}\n", settings.workers));
    content.push_str("# Resident tile memory cap in bytes, 0 for unbounded\n");
    content.push_str(&format!("max_cache_bytes: {}\n", settings.max_cache_bytes));

    content
}

// Public API for accessing/modifying settings

pub fn get_settings() -> Settings {
    SETTINGS
        .read()
        .map(|s| s.clone())
        .unwrap_or_default()
}

pub fn get_scales() -> Vec<Scale> {
    SETTINGS
        .read()
        .map(|s| s.scales.clone())
        .unwrap_or_else(|_| default_scales())
}

pub fn set_scales(scales: Vec<Scale>) {
    if let Ok(mut settings) = SETTINGS.write() {
        settings.scales = scales;
    }
    save_settings();
}

pub fn get_tile_size() -> u32 {
    SETTINGS
        .read()
        .map(|s| s.tile_size)
        .unwrap_or_else(|_| default_tile_size())
}

pub fn set_tile_size(tile_size: u32) {
    if let Ok(mut settings) = SETTINGS.write() {
        settings.tile_size = tile_size;
    }
    save_settings();
}

pub fn get_workers() -> usize {
    SETTINGS
        .read()
        .map(|s| s.workers)
        .unwrap_or_else(|_| default_workers())
}

pub fn get_max_cache_bytes() -> usize {
    SETTINGS
        .read()
        .map(|s| s.max_cache_bytes)
        .unwrap_or_else(|_| default_max_cache_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_yaml_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(SETTINGS_FILENAME);

        let settings = Settings {
            scales: vec![Scale::new(1, 2), Scale::ONE, Scale::new(3, 2)],
            tile_size: 128,
            format: PixelFormat::Bgra8,
            dpi: 144.0,
            device_pixel_ratio: 2.0,
            workers: 4,
            max_cache_bytes: 0,
            ..Settings::default()
        };
        save_settings_to_file(&settings, &path);

        assert_eq!(read_settings_file(&path), Some(settings));
    }

    #[test]
    fn missing_fields_take_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILENAME);
        fs::write(&path, "version: 1\ntile_size: 512\n").unwrap();

        let settings = read_settings_file(&path).unwrap();
        assert_eq!(settings.tile_size, 512);
        assert_eq!(settings.scales, default_scales());
        assert_eq!(settings.format, PixelFormat::Rgb8);
    }

    #[test]
    fn old_version_is_migrated_and_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILENAME);
        fs::write(&path, "version: 0\n").unwrap();

        let settings = read_settings_file(&path).unwrap();
        assert_eq!(settings.version, CURRENT_VERSION);
        let rewritten = fs::read_to_string(&path).unwrap();
        assert!(rewritten.starts_with(&format!("version: {CURRENT_VERSION}\n")));
    }

    #[test]
    fn malformed_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILENAME);
        fs::write(&path, "scales: [\"two\"]\n").unwrap();
        assert_eq!(read_settings_file(&path), None);
    }

    #[test]
    fn settings_build_a_valid_pool_config() {
        let config = Settings::default().pool_config((612.0, 792.0));
        assert!(config.validate().is_ok());
        assert_eq!(config.tile_size, DEFAULT_TILE_SIZE);
    }
}
