//! Pool construction parameters and their validation

use super::transform::DisplayMetrics;
use super::types::{PixelFormat, Scale};

/// Default tile edge in device pixels
pub const DEFAULT_TILE_SIZE: u32 = 256;

/// Default cap on resident tile memory (256 MB)
pub const DEFAULT_CACHE_BYTES: usize = 256 * 1024 * 1024;

/// Default visible area in device pixels
pub const DEFAULT_VIEWPORT: (u32, u32) = (1024, 768);

/// Default number of threads for a [`WorkerPool`](super::WorkerPool)
pub const DEFAULT_WORKERS: usize = 2;

/// Magnification levels used when none are configured
#[must_use]
pub fn default_scales() -> Vec<Scale> {
    [1, 2, 4, 8, 16, 32].into_iter().map(Scale::integer).collect()
}

/// Rejected pool configuration
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("at least one scale level is required")]
    EmptyScales,

    #[error("scale {0} is not positive")]
    NonPositiveScale(Scale),

    #[error("scale {0} is listed twice")]
    DuplicateScale(Scale),

    #[error("scales must be increasing, {next} follows {prev}")]
    UnorderedScales { prev: Scale, next: Scale },

    #[error("tile size must be positive, got {0}")]
    InvalidTileSize(u32),

    #[error("content size {width}x{height} is not a finite non-negative size")]
    InvalidContentSize { width: f64, height: f64 },

    #[error("display metrics {0:?} must be finite and positive")]
    InvalidDisplayMetrics(DisplayMetrics),

    #[error("scale index {index} is out of range for {count} scales")]
    InvalidScaleIndex { index: usize, count: usize },
}

/// Everything needed to build a [`TilePool`](super::TilePool)
#[derive(Clone, Debug, PartialEq)]
pub struct PoolConfig {
    /// Size of the graphic in native units
    pub content_size: (f64, f64),
    /// Ordered, distinct magnification levels
    pub scales: Vec<Scale>,
    /// Tile edge in device pixels
    pub tile_size: u32,
    pub format: PixelFormat,
    pub metrics: DisplayMetrics,
    /// Visible area in device pixels
    pub viewport: (u32, u32),
    /// Resident tile memory cap in bytes, `0` for unbounded
    pub max_cache_bytes: usize,
}

impl PoolConfig {
    /// Defaults for a graphic of the given native size
    #[must_use]
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            content_size: (width, height),
            scales: default_scales(),
            tile_size: DEFAULT_TILE_SIZE,
            format: PixelFormat::default(),
            metrics: DisplayMetrics::default(),
            viewport: DEFAULT_VIEWPORT,
            max_cache_bytes: DEFAULT_CACHE_BYTES,
        }
    }

    #[must_use]
    pub fn with_scales(mut self, scales: Vec<Scale>) -> Self {
        self.scales = scales;
        self
    }

    #[must_use]
    pub fn with_tile_size(mut self, tile_size: u32) -> Self {
        self.tile_size = tile_size;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: PixelFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: DisplayMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    #[must_use]
    pub fn with_viewport(mut self, width: u32, height: u32) -> Self {
        self.viewport = (width, height);
        self
    }

    #[must_use]
    pub fn with_cache_budget(mut self, bytes: usize) -> Self {
        self.max_cache_bytes = bytes;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tile_size == 0 {
            return Err(ConfigError::InvalidTileSize(self.tile_size));
        }
        validate_scales(&self.scales)?;
        validate_content_size(self.content_size)?;
        validate_metrics(&self.metrics)
    }
}

pub(crate) fn validate_scales(scales: &[Scale]) -> Result<(), ConfigError> {
    if scales.is_empty() {
        return Err(ConfigError::EmptyScales);
    }
    if let Some(bad) = scales.iter().find(|s| !s.is_positive()) {
        return Err(ConfigError::NonPositiveScale(*bad));
    }
    for pair in scales.windows(2) {
        let (prev, next) = (pair[0], pair[1]);
        if prev == next {
            return Err(ConfigError::DuplicateScale(next));
        }
        if prev > next {
            if scales.iter().filter(|s| **s == next).count() > 1 {
                return Err(ConfigError::DuplicateScale(next));
            }
            return Err(ConfigError::UnorderedScales { prev, next });
        }
    }
    Ok(())
}

pub(crate) fn validate_content_size((width, height): (f64, f64)) -> Result<(), ConfigError> {
    let ok = |v: f64| v.is_finite() && v >= 0.0;
    if ok(width) && ok(height) {
        Ok(())
    } else {
        Err(ConfigError::InvalidContentSize { width, height })
    }
}

pub(crate) fn validate_metrics(metrics: &DisplayMetrics) -> Result<(), ConfigError> {
    if metrics.is_valid() {
        Ok(())
    } else {
        Err(ConfigError::InvalidDisplayMetrics(*metrics))
    }
}
