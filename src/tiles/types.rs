//! Core value types for tiled rendering

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Rational magnification factor, always stored in lowest terms
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Scale {
    num: u32,
    den: u32,
}

impl Scale {
    /// 1:1
    pub const ONE: Self = Self { num: 1, den: 1 };

    /// Build `num/den`. A zero denominator is kept as-is and rejected by
    /// pool validation.
    #[must_use]
    pub const fn new(num: u32, den: u32) -> Self {
        let g = gcd(num, den);
        if g == 0 {
            return Self { num, den };
        }
        Self {
            num: num / g,
            den: den / g,
        }
    }

    #[must_use]
    pub const fn integer(n: u32) -> Self {
        Self { num: n, den: 1 }
    }

    #[must_use]
    pub const fn numerator(self) -> u32 {
        self.num
    }

    #[must_use]
    pub const fn denominator(self) -> u32 {
        self.den
    }

    #[must_use]
    pub const fn is_positive(self) -> bool {
        self.num > 0 && self.den > 0
    }

    /// Floating point value of the ratio
    #[must_use]
    pub fn factor(self) -> f64 {
        f64::from(self.num) / f64::from(self.den)
    }
}

const fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

impl PartialOrd for Scale {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scale {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = u64::from(self.num) * u64::from(other.den);
        let rhs = u64::from(other.num) * u64::from(self.den);
        lhs.cmp(&rhs)
    }
}

impl fmt::Display for Scale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.den == 1 {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{}/{}", self.num, self.den)
        }
    }
}

/// Error parsing a [`Scale`] from text
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid scale {0:?}, expected \"N\" or \"N/D\"")]
pub struct ParseScaleError(pub String);

impl FromStr for Scale {
    type Err = ParseScaleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseScaleError(s.to_string());
        let (num, den) = match s.trim().split_once('/') {
            Some((n, d)) => (n.trim(), d.trim()),
            None => (s.trim(), "1"),
        };
        let num = num.parse().map_err(|_| err())?;
        let den = den.parse().map_err(|_| err())?;
        Ok(Self::new(num, den))
    }
}

impl TryFrom<String> for Scale {
    type Error = ParseScaleError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Scale> for String {
    fn from(scale: Scale) -> Self {
        scale.to_string()
    }
}

/// Rectangle in the graphic's native units
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct NativeRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl NativeRect {
    #[must_use]
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    #[must_use]
    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    #[must_use]
    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    /// True when the interiors overlap
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }
}

/// Rectangle in device pixels, relative to the content origin at one scale
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct DeviceRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl DeviceRect {
    #[must_use]
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Packed pixel layout shared by every buffer of a pool
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    #[default]
    Rgb8,
    Rgba8,
    Bgra8,
    Gray8,
}

impl PixelFormat {
    #[must_use]
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgb8 => 3,
            Self::Rgba8 | Self::Bgra8 => 4,
            Self::Gray8 => 1,
        }
    }

    /// Encode an opaque RGB color in this format
    #[must_use]
    pub fn encode(self, (r, g, b): (u8, u8, u8)) -> [u8; 4] {
        match self {
            Self::Rgb8 => [r, g, b, 0],
            Self::Rgba8 => [r, g, b, 0xFF],
            Self::Bgra8 => [b, g, r, 0xFF],
            Self::Gray8 => {
                let luma = (u16::from(r) * 54 + u16::from(g) * 183 + u16::from(b) * 19) >> 8;
                [luma as u8, 0, 0, 0]
            }
        }
    }
}

/// Contiguous single-plane raster, stride = width * bytes per pixel
#[derive(Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

impl PixelBuffer {
    #[must_use]
    pub fn new(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            format,
            data,
        }
    }

    /// Zero-filled buffer
    #[must_use]
    pub fn blank(width: u32, height: u32, format: PixelFormat) -> Self {
        let len = width as usize * height as usize * format.bytes_per_pixel();
        Self::new(width, height, format, vec![0; len])
    }

    /// Buffer where every pixel is `rgb`
    #[must_use]
    pub fn solid(width: u32, height: u32, format: PixelFormat, rgb: (u8, u8, u8)) -> Self {
        let bpp = format.bytes_per_pixel();
        let px = format.encode(rgb);
        let data = px[..bpp].repeat(width as usize * height as usize);
        Self::new(width, height, format, data)
    }

    /// Bytes per row
    #[must_use]
    pub fn stride(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }

    /// True when `data` is exactly `stride * height` bytes
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.data.len() == self.stride() * self.height as usize
    }

    /// Bytes of the pixel at `(x, y)`
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> Option<&[u8]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let bpp = self.format.bytes_per_pixel();
        let start = y as usize * self.stride() + x as usize * bpp;
        self.data.get(start..start + bpp)
    }
}

impl fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Composed raster handed to the viewport
#[derive(Clone, Debug)]
pub struct Clip {
    /// Left edge in device pixels, relative to the content origin
    pub x: u32,
    /// Top edge in device pixels, relative to the content origin
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// `None` when the viewport does not overlap the content
    pub pixels: Option<Arc<PixelBuffer>>,
    /// Scale level the clip was composed at
    pub scale_index: usize,
    /// Pool layout epoch the clip was composed from
    pub epoch: u64,
}

impl Clip {
    /// Clip covering nothing
    #[must_use]
    pub const fn empty(scale_index: usize, epoch: u64) -> Self {
        Self {
            x: 0,
            y: 0,
            width: 0,
            height: 0,
            pixels: None,
            scale_index,
            epoch,
        }
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    #[must_use]
    pub const fn rect(&self) -> DeviceRect {
        DeviceRect::new(self.x, self.y, self.width, self.height)
    }
}
