//! Unit conversions between device pixels, logical pixels and native units
//!
//! Displays with a pixel ratio above one (HiDPI) address the screen in
//! logical pixels that cover several device pixels each. The graphic itself
//! is measured in native units, `reference_dpi` of them per inch (72 for
//! PostScript points). A [`Transform`] captures the three inputs that relate
//! those spaces at one scale level and is rebuilt, never patched, when any of
//! them changes.

use serde::{Deserialize, Serialize};

use super::types::{DeviceRect, NativeRect};

/// Native units per inch of PostScript points
pub const POINTS_PER_INCH: f64 = 72.0;

/// Physical properties of the display the pool renders for
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DisplayMetrics {
    /// Display resolution in pixels per inch
    pub dpi: f64,
    /// Device pixels per logical pixel
    pub device_pixel_ratio: f64,
    /// Native units per inch of the graphic
    #[serde(default = "default_reference_dpi")]
    pub reference_dpi: f64,
}

fn default_reference_dpi() -> f64 {
    POINTS_PER_INCH
}

impl Default for DisplayMetrics {
    fn default() -> Self {
        Self {
            dpi: 96.0,
            device_pixel_ratio: 1.0,
            reference_dpi: POINTS_PER_INCH,
        }
    }
}

impl DisplayMetrics {
    #[must_use]
    pub const fn new(dpi: f64, device_pixel_ratio: f64) -> Self {
        Self {
            dpi,
            device_pixel_ratio,
            reference_dpi: POINTS_PER_INCH,
        }
    }

    /// All three quantities finite and strictly positive
    #[must_use]
    pub fn is_valid(&self) -> bool {
        [self.dpi, self.device_pixel_ratio, self.reference_dpi]
            .iter()
            .all(|v| v.is_finite() && *v > 0.0)
    }
}

/// Conversions at one scale factor
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    metrics: DisplayMetrics,
    scale: f64,
}

impl Transform {
    #[must_use]
    pub const fn new(metrics: DisplayMetrics, scale: f64) -> Self {
        Self { metrics, scale }
    }

    #[must_use]
    pub const fn metrics(&self) -> DisplayMetrics {
        self.metrics
    }

    #[must_use]
    pub const fn scale(&self) -> f64 {
        self.scale
    }

    /// Same display, different scale factor
    #[must_use]
    pub const fn with_scale(&self, scale: f64) -> Self {
        Self::new(self.metrics, scale)
    }

    #[must_use]
    pub fn device_to_logical(&self, device: f64) -> f64 {
        device / self.metrics.device_pixel_ratio
    }

    #[must_use]
    pub fn logical_to_device(&self, logical: f64) -> f64 {
        logical * self.metrics.device_pixel_ratio
    }

    #[must_use]
    pub fn logical_to_native(&self, logical: f64) -> f64 {
        logical * self.metrics.reference_dpi / self.metrics.dpi / self.scale
    }

    #[must_use]
    pub fn native_to_logical(&self, native: f64) -> f64 {
        native * self.scale * self.metrics.dpi / self.metrics.reference_dpi
    }

    #[must_use]
    pub fn device_to_native(&self, device: f64) -> f64 {
        self.logical_to_native(self.device_to_logical(device))
    }

    #[must_use]
    pub fn native_to_device(&self, native: f64) -> f64 {
        self.logical_to_device(self.native_to_logical(native))
    }

    /// Native-unit area covered by a device rectangle
    #[must_use]
    pub fn device_rect_to_native(&self, rect: &DeviceRect) -> NativeRect {
        NativeRect::new(
            self.device_to_native(f64::from(rect.x)),
            self.device_to_native(f64::from(rect.y)),
            self.device_to_native(f64::from(rect.width)),
            self.device_to_native(f64::from(rect.height)),
        )
    }

    /// Whole device pixels needed to hold content of native size
    /// `(width, height)`
    #[must_use]
    pub fn content_extent(&self, (width, height): (f64, f64)) -> (u32, u32) {
        let to_px = |native: f64| {
            // Absorb float noise so exact sizes do not round up a pixel
            let px = (self.native_to_device(native) - 1e-6).ceil();
            if px.is_finite() && px > 0.0 {
                px.min(f64::from(u32::MAX)) as u32
            } else {
                0
            }
        };
        (to_px(width), to_px(height))
    }
}
