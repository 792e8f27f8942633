//! Procedural pixel producer for demos and diagnostics
//!
//! Draws a page-like pattern defined in native coordinates: a diagonal color
//! ramp over a checkerboard of one-inch squares with a darker border. Since
//! every pixel is computed from its native position, tiles produced at the
//! same scale line up seamlessly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::tiles::{PixelBuffer, PixelProducer, ProducerError, TileSpec};

/// Edge of one checker square, in native units
const CHECKER: f64 = 72.0;

/// Border width in native units
const BORDER: f64 = 6.0;

pub struct PatternProducer {
    content_size: (f64, f64),
    delay: Duration,
    calls: AtomicU64,
}

impl PatternProducer {
    #[must_use]
    pub fn new(content_size: (f64, f64)) -> Self {
        Self {
            content_size,
            delay: Duration::ZERO,
            calls: AtomicU64::new(0),
        }
    }

    /// Sleep this long per tile, to make asynchronous renders observable
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Tiles produced so far
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Color of the graphic at native `(x, y)`
    #[must_use]
    pub fn color_at(&self, x: f64, y: f64) -> (u8, u8, u8) {
        let (width, height) = self.content_size;
        let ramp = |v: f64, extent: f64| {
            if extent > 0.0 {
                ((v / extent).clamp(0.0, 1.0) * 255.0).round() as u8
            } else {
                0
            }
        };

        let on_border =
            x < BORDER || y < BORDER || x >= width - BORDER || y >= height - BORDER;
        if on_border {
            return (0x20, 0x20, 0x20);
        }

        let dark = ((x / CHECKER).floor() + (y / CHECKER).floor()) as i64 % 2 == 0;
        let blue = if dark { 0x60 } else { 0xC0 };
        (ramp(x, width), ramp(y, height), blue)
    }
}

impl PixelProducer for PatternProducer {
    fn produce(&self, spec: &TileSpec) -> Result<PixelBuffer, ProducerError> {
        if spec.width == 0 || spec.height == 0 {
            return Err(ProducerError::generic(format!(
                "empty tile {:?} requested",
                spec.key
            )));
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.calls.fetch_add(1, Ordering::Relaxed);

        let bpp = spec.format.bytes_per_pixel();
        let dx = spec.native_rect.width / f64::from(spec.width);
        let dy = spec.native_rect.height / f64::from(spec.height);

        let mut data = Vec::with_capacity(spec.width as usize * spec.height as usize * bpp);
        for row in 0..spec.height {
            let y = spec.native_rect.y + (f64::from(row) + 0.5) * dy;
            for col in 0..spec.width {
                let x = spec.native_rect.x + (f64::from(col) + 0.5) * dx;
                let px = spec.format.encode(self.color_at(x, y));
                data.extend_from_slice(&px[..bpp]);
            }
        }
        Ok(PixelBuffer::new(spec.width, spec.height, spec.format, data))
    }
}
