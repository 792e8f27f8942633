//! Pixel producer seam
//!
//! The pool never rasterizes anything itself. Every tile is filled by a
//! caller-supplied [`PixelProducer`], typically a document rasterizer; plain
//! closures work too.

use super::tile::TileKey;
use super::types::{NativeRect, PixelBuffer, PixelFormat, Scale};

/// What the pool asks a producer for
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TileSpec {
    pub key: TileKey,
    /// Region of the graphic to rasterize, in native units
    pub native_rect: NativeRect,
    /// Scale level the tile belongs to
    pub scale: Scale,
    /// Expected output width in device pixels
    pub width: u32,
    /// Expected output height in device pixels
    pub height: u32,
    pub format: PixelFormat,
}

impl TileSpec {
    /// Check a produced buffer against this request
    pub fn accept(&self, buffer: PixelBuffer) -> Result<PixelBuffer, ProducerError> {
        if buffer.width != self.width
            || buffer.height != self.height
            || buffer.format != self.format
            || !buffer.is_consistent()
        {
            return Err(ProducerError::Mismatch {
                expected: (self.width, self.height, self.format),
                got: (buffer.width, buffer.height, buffer.format),
                bytes: buffer.data.len(),
            });
        }
        Ok(buffer)
    }
}

/// Errors from a pixel producer
#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    #[error("buffer {got:?} ({bytes} bytes) does not match requested {expected:?}")]
    Mismatch {
        expected: (u32, u32, PixelFormat),
        got: (u32, u32, PixelFormat),
        bytes: usize,
    },

    #[error("{detail}")]
    Generic { detail: String },
}

impl ProducerError {
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic { detail: msg.into() }
    }
}

/// Rasterizes one tile.
///
/// Implementations are called from whatever thread runs the render, possibly
/// several at once for different tiles.
pub trait PixelProducer: Send + Sync {
    fn produce(&self, spec: &TileSpec) -> Result<PixelBuffer, ProducerError>;
}

impl<F> PixelProducer for F
where
    F: Fn(&TileSpec) -> Result<PixelBuffer, ProducerError> + Send + Sync,
{
    fn produce(&self, spec: &TileSpec) -> Result<PixelBuffer, ProducerError> {
        self(spec)
    }
}

const PLACEHOLDER_CELL: u32 = 8;
const PLACEHOLDER_LIGHT: (u8, u8, u8) = (0xFF, 0xFF, 0xCC);
const PLACEHOLDER_DARK: (u8, u8, u8) = (0xCC, 0xCC, 0x99);

/// Checker pattern drawn in place of a tile whose production failed
#[must_use]
pub fn placeholder(width: u32, height: u32, format: PixelFormat) -> PixelBuffer {
    let bpp = format.bytes_per_pixel();
    let light = format.encode(PLACEHOLDER_LIGHT);
    let dark = format.encode(PLACEHOLDER_DARK);

    let mut data = Vec::with_capacity(width as usize * height as usize * bpp);
    for y in 0..height {
        for x in 0..width {
            let px = if (x / PLACEHOLDER_CELL + y / PLACEHOLDER_CELL) % 2 == 0 {
                &light
            } else {
                &dark
            };
            data.extend_from_slice(&px[..bpp]);
        }
    }
    PixelBuffer::new(width, height, format, data)
}
