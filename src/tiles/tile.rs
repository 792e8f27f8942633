//! One cached raster cell

use std::sync::Arc;

use super::producer::TileSpec;
use super::types::{DeviceRect, NativeRect, PixelBuffer, PixelFormat, Scale};

/// Production state of a tile
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TileState {
    /// No usable pixels
    #[default]
    Empty,
    /// A producer call is in flight
    Requested,
    /// Pixels present for the recorded generation
    Ready,
}

/// Address of a tile across all scale levels
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    pub level: usize,
    pub row: usize,
    pub col: usize,
}

impl TileKey {
    #[must_use]
    pub const fn new(level: usize, row: usize, col: usize) -> Self {
        Self { level, row, col }
    }
}

/// Generation value that never matches a live pool generation
pub(crate) const STALE_GENERATION: u64 = 0;

/// Cached raster cell of one scale level
#[derive(Clone, Debug)]
pub struct Tile {
    pub key: TileKey,
    /// Area of the graphic covered, in native units
    pub native_rect: NativeRect,
    /// Area covered in device pixels at this tile's scale
    pub device_rect: DeviceRect,
    pub pixels: Option<Arc<PixelBuffer>>,
    /// Pool generation the pixels were produced for
    pub generation: u64,
    pub state: TileState,
    /// Consecutive failed productions
    pub failures: u32,
    /// Region invalidations that hit this tile
    pub invalidations: u64,
}

impl Tile {
    #[must_use]
    pub fn empty(key: TileKey, native_rect: NativeRect, device_rect: DeviceRect) -> Self {
        Self {
            key,
            native_rect,
            device_rect,
            pixels: None,
            generation: STALE_GENERATION,
            state: TileState::Empty,
            failures: 0,
            invalidations: 0,
        }
    }

    /// Ready with pixels of the given generation
    #[must_use]
    pub fn is_fresh(&self, generation: u64) -> bool {
        self.state == TileState::Ready && self.pixels.is_some() && self.generation == generation
    }

    /// Resident pixel bytes
    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.pixels.as_ref().map_or(0, |p| p.data.len())
    }

    /// Producer request for this tile
    #[must_use]
    pub fn spec(&self, scale: Scale, format: PixelFormat) -> TileSpec {
        TileSpec {
            key: self.key,
            native_rect: self.native_rect,
            scale,
            width: self.device_rect.width,
            height: self.device_rect.height,
            format,
        }
    }

    pub(crate) fn mark_requested(&mut self) {
        self.state = TileState::Requested;
    }

    /// Store pixels produced for `generation` by a request that saw
    /// `invalidations` region invalidations. Pixels whose region was
    /// invalidated while they were being produced are kept but stay stale.
    pub(crate) fn store(&mut self, pixels: Arc<PixelBuffer>, generation: u64, invalidations: u64) {
        self.pixels = Some(pixels);
        self.generation = if self.invalidations == invalidations {
            generation
        } else {
            STALE_GENERATION
        };
        self.state = TileState::Ready;
        self.failures = 0;
    }

    pub(crate) fn mark_stale(&mut self) {
        self.generation = STALE_GENERATION;
        self.invalidations = self.invalidations.wrapping_add(1);
    }

    pub(crate) fn fail(&mut self) {
        self.pixels = None;
        self.state = TileState::Empty;
        self.failures = self.failures.saturating_add(1);
    }

    /// Back to `Empty` unless another request already completed it.
    /// Returns true when stale pixels were dropped on the way.
    pub(crate) fn abandon(&mut self) -> bool {
        if self.state != TileState::Requested {
            return false;
        }
        self.state = TileState::Empty;
        self.pixels.take().is_some()
    }

    pub(crate) fn evict(&mut self) {
        self.pixels = None;
        self.state = TileState::Empty;
    }
}
