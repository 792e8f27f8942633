//! View state management

use super::config::{
    ConfigError, PoolConfig, validate_content_size, validate_metrics, validate_scales,
};
use super::transform::{DisplayMetrics, Transform};
use super::types::{NativeRect, Scale};

/// Where the viewport looks and what the grids are built for
#[derive(Clone, Debug, PartialEq)]
pub struct ViewState {
    /// Size of the graphic in native units
    pub content_size: (f64, f64),

    /// Ordered magnification levels
    pub scales: Vec<Scale>,

    pub metrics: DisplayMetrics,

    /// Top-left corner of the viewport in native units
    pub origin: (f64, f64),

    /// Active entry of `scales`
    pub scale_index: usize,

    /// Visible area in device pixels
    pub viewport: (u32, u32),
}

impl ViewState {
    #[must_use]
    pub fn new(config: &PoolConfig) -> Self {
        Self {
            content_size: config.content_size,
            scales: config.scales.clone(),
            metrics: config.metrics,
            origin: (0.0, 0.0),
            scale_index: 0,
            viewport: config.viewport,
        }
    }

    /// Apply a command and return resulting effects. A rejected command
    /// leaves the state untouched.
    pub fn apply(&mut self, cmd: Command) -> Result<Vec<Effect>, ConfigError> {
        match cmd {
            Command::SetViewport { x, y, scale_index } => {
                if scale_index >= self.scales.len() {
                    return Err(ConfigError::InvalidScaleIndex {
                        index: scale_index,
                        count: self.scales.len(),
                    });
                }
                let origin = (finite_or_zero(x), finite_or_zero(y));
                if self.origin != origin || self.scale_index != scale_index {
                    self.origin = origin;
                    self.scale_index = scale_index;
                    Ok(vec![Effect::ViewportChanged])
                } else {
                    Ok(vec![])
                }
            }

            Command::ResizeViewport { width, height } => {
                self.viewport = (width, height);
                Ok(vec![])
            }

            Command::SetContentSize { width, height } => {
                validate_content_size((width, height))?;
                if self.content_size != (width, height) {
                    self.content_size = (width, height);
                    Ok(vec![Effect::Rebuild])
                } else {
                    Ok(vec![])
                }
            }

            Command::SetScales(scales) => {
                validate_scales(&scales)?;
                if self.scales != scales {
                    self.scale_index = self.scale_index.min(scales.len() - 1);
                    self.scales = scales;
                    Ok(vec![Effect::Rebuild])
                } else {
                    Ok(vec![])
                }
            }

            Command::SetDisplayMetrics(metrics) => {
                validate_metrics(&metrics)?;
                if self.metrics != metrics {
                    self.metrics = metrics;
                    Ok(vec![Effect::Rebuild])
                } else {
                    Ok(vec![])
                }
            }

            Command::Reinitialize => Ok(vec![Effect::Rebuild]),

            Command::Invalidate => Ok(vec![Effect::BumpGeneration]),

            Command::InvalidateRegion(rect) => {
                if rect.is_empty() {
                    Ok(vec![])
                } else {
                    Ok(vec![Effect::StaleRegion(rect)])
                }
            }
        }
    }

    #[must_use]
    pub fn active_scale(&self) -> Scale {
        self.scales[self.scale_index]
    }

    /// Conversions at the active scale
    #[must_use]
    pub fn transform(&self) -> Transform {
        Transform::new(self.metrics, self.active_scale().factor())
    }
}

fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() { v } else { 0.0 }
}

/// Commands that modify view state
#[derive(Clone, Debug)]
pub enum Command {
    /// Move the viewport and pick a scale level
    SetViewport { x: f64, y: f64, scale_index: usize },
    /// Set the visible area in device pixels
    ResizeViewport { width: u32, height: u32 },
    /// Resize the graphic
    SetContentSize { width: f64, height: f64 },
    /// Replace the scale levels
    SetScales(Vec<Scale>),
    /// Switch display
    SetDisplayMetrics(DisplayMetrics),
    /// Rebuild with unchanged parameters
    Reinitialize,
    /// Mark every tile stale
    Invalidate,
    /// Mark tiles overlapping a native rectangle stale
    InvalidateRegion(NativeRect),
}

/// Effects produced by state changes
#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    /// Discard every grid and start a new epoch
    Rebuild,
    /// Advance the pool generation
    BumpGeneration,
    /// Stale the tiles overlapping a region on every level
    StaleRegion(NativeRect),
    /// Notify listeners of the new origin and scale
    ViewportChanged,
}
