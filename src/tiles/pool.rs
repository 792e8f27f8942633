//! Tile pool - caches tiles per scale level and composes viewport clips
//!
//! Every scale level gets its own grid of tile cells, allocated the first
//! time a render needs the level. A cell holds no tile until the cell itself
//! is first needed. A render takes a consistent snapshot of the view state
//! and the current layout, works out which cells of the active level
//! overlap the viewport, produces the missing or stale ones through the
//! caller's [`PixelProducer`] and stitches everything into one [`Clip`].
//!
//! Changing the content size, the scale levels or the display metrics swaps
//! in a fresh layout with a new epoch. Requests already running keep the old
//! layout alive until they finish, so their writes never reach the new grids.

use std::collections::HashSet;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, RwLock};

use flume::Receiver;
use log::{debug, info, warn};
use rayon::prelude::*;

use crate::grid::Grid;

use super::config::{ConfigError, PoolConfig};
use super::events::{Listeners, PoolEvent};
use super::executor::Executor;
use super::producer::{PixelProducer, TileSpec, placeholder};
use super::request::{CancellationToken, PendingRender, RenderError, RenderOutcome, RequestId};
use super::residency::Residency;
use super::state::{Command, Effect, ViewState};
use super::tile::{STALE_GENERATION, Tile, TileKey, TileState};
use super::transform::{DisplayMetrics, Transform};
use super::types::{Clip, DeviceRect, NativeRect, PixelBuffer, PixelFormat, Scale};

/// Clips at least this many pixels are composed on the rayon pool
const PARALLEL_COMPOSE_PIXELS: usize = 200_000;

/// Counters and residency figures for a pool
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Tiles produced successfully
    pub produced: u64,
    /// Cached tiles served without calling the producer
    pub reused: u64,
    /// Failed producer calls
    pub failed: u64,
    /// Tiles dropped to honor the cache budget
    pub evicted: u64,
    /// Bytes of pixels held by the current layout
    pub resident_bytes: usize,
    /// Tiles holding pixels in the current layout
    pub resident_tiles: usize,
    /// Byte budget of the tile cache, `0` when unbounded
    pub cache_budget: usize,
    pub epoch: u64,
    pub generation: u64,
}

#[derive(Default)]
struct Counters {
    produced: AtomicU64,
    reused: AtomicU64,
    failed: AtomicU64,
    evicted: AtomicU64,
}

/// Viewport parameters a render works from
#[derive(Clone, Copy, Debug)]
struct Frame {
    origin: (f64, f64),
    scale_index: usize,
    viewport: (u32, u32),
}

/// One scale level of a layout
struct Level {
    scale: Scale,
    transform: Transform,
    /// Content size in device pixels at this scale
    extent: (u32, u32),
    /// `(rows, cols)` of the level grid
    shape: (usize, usize),
    tile_size: u32,
    grid: OnceLock<Grid<Option<Tile>>>,
}

impl Level {
    fn new(scale: Scale, metrics: DisplayMetrics, content_size: (f64, f64), tile_size: u32) -> Self {
        let transform = Transform::new(metrics, scale.factor());
        let extent = transform.content_extent(content_size);
        let cells = |px: u32| px.div_ceil(tile_size) as usize;
        Self {
            scale,
            transform,
            extent,
            shape: (cells(extent.1), cells(extent.0)),
            tile_size,
            grid: OnceLock::new(),
        }
    }

    fn grid(&self, level: usize) -> &Grid<Option<Tile>> {
        self.grid.get_or_init(|| {
            debug!(
                "Allocating {}x{} tile cells for level {level} (scale {})",
                self.shape.0, self.shape.1, self.scale
            );
            Grid::new(None, self.shape.0, self.shape.1)
        })
    }

    /// Empty tile for a cell; edge tiles are trimmed to the content extent
    fn tile_at(&self, key: TileKey) -> Tile {
        let x = key.col as u32 * self.tile_size;
        let y = key.row as u32 * self.tile_size;
        let rect = DeviceRect::new(
            x,
            y,
            self.tile_size.min(self.extent.0.saturating_sub(x)),
            self.tile_size.min(self.extent.1.saturating_sub(y)),
        );
        Tile::empty(key, self.transform.device_rect_to_native(&rect), rect)
    }

    /// Rows and columns of cells overlapping the viewport, `None` when the
    /// viewport misses the content
    fn covering(&self, frame: &Frame, tile_size: u32) -> Option<(Range<usize>, Range<usize>)> {
        let span = |origin: f64, visible: u32, extent: u32, cells: usize| {
            let start = self.transform.native_to_device(origin);
            let lo = start.max(0.0);
            let hi = (start + f64::from(visible)).min(f64::from(extent));
            if hi <= lo {
                return None;
            }
            let t = f64::from(tile_size);
            let first = (lo / t).floor() as usize;
            let last = ((hi / t).ceil() as usize).min(cells);
            (first < last).then_some(first..last)
        };

        let cols = span(frame.origin.0, frame.viewport.0, self.extent.0, self.shape.1)?;
        let rows = span(frame.origin.1, frame.viewport.1, self.extent.1, self.shape.0)?;
        Some((rows, cols))
    }
}

/// Grids and bookkeeping for one epoch
struct Layout {
    epoch: u64,
    generation: AtomicU64,
    levels: Vec<Level>,
    residency: Mutex<Residency>,
}

impl Layout {
    fn build(view: &ViewState, tile_size: u32, budget: usize, epoch: u64) -> Self {
        let levels = view
            .scales
            .iter()
            .map(|&scale| Level::new(scale, view.metrics, view.content_size, tile_size))
            .collect();
        Self {
            epoch,
            generation: AtomicU64::new(STALE_GENERATION + 1),
            levels,
            residency: Mutex::new(Residency::new(budget)),
        }
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn residency(&self) -> MutexGuard<'_, Residency> {
        self.residency.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark tiles overlapping `rect` stale on every level built so far
    fn stale_region(&self, rect: &NativeRect) -> usize {
        let mut staled = 0;
        for level in &self.levels {
            let Some(grid) = level.grid.get() else {
                continue;
            };
            for row in 0..grid.rows() {
                for col in 0..grid.cols() {
                    let hit = grid.update(row as isize, col as isize, |cell| match cell {
                        Some(tile) if tile.native_rect.intersects(rect) => {
                            tile.mark_stale();
                            true
                        }
                        _ => false,
                    });
                    if matches!(hit, Ok(true)) {
                        staled += 1;
                    }
                }
            }
        }
        staled
    }
}

/// Cached pixels placed in a composed clip
struct Piece {
    rect: DeviceRect,
    pixels: Arc<PixelBuffer>,
}

enum Plan {
    Reuse(Arc<PixelBuffer>),
    /// Carries the tile's invalidation count when production was planned
    Produce(TileSpec, u64),
}

struct Shared {
    producer: Box<dyn PixelProducer>,
    format: PixelFormat,
    tile_size: u32,
    budget: usize,
    view: Mutex<ViewState>,
    layout: RwLock<Arc<Layout>>,
    listeners: Listeners,
    next_request_id: AtomicU64,
    pending: Mutex<HashSet<RequestId>>,
    counters: Counters,
}

/// Tiled renderer for one graphic.
///
/// Cloning is cheap; clones drive the same cache.
#[derive(Clone)]
pub struct TilePool {
    shared: Arc<Shared>,
}

impl TilePool {
    /// Create a pool rendering through `producer`
    pub fn new(config: PoolConfig, producer: impl PixelProducer + 'static) -> Result<Self, ConfigError> {
        config.validate()?;

        let view = ViewState::new(&config);
        let layout = Layout::build(&view, config.tile_size, config.max_cache_bytes, 1);
        info!(
            "Tile pool for {}x{} content, {} scales, {}px tiles, {:?}",
            config.content_size.0,
            config.content_size.1,
            config.scales.len(),
            config.tile_size,
            config.format
        );

        Ok(Self {
            shared: Arc::new(Shared {
                producer: Box::new(producer),
                format: config.format,
                tile_size: config.tile_size,
                budget: config.max_cache_bytes,
                view: Mutex::new(view),
                layout: RwLock::new(Arc::new(layout)),
                listeners: Listeners::default(),
                next_request_id: AtomicU64::new(1),
                pending: Mutex::new(HashSet::new()),
                counters: Counters::default(),
            }),
        })
    }

    /// Move the viewport to native `(x, y)` at scale level `scale_index`.
    /// Nothing is rendered until the next render call.
    pub fn set_viewport(&self, x: f64, y: f64, scale_index: usize) -> Result<(), ConfigError> {
        self.apply_command(Command::SetViewport { x, y, scale_index })
    }

    /// Set the visible area in device pixels
    pub fn resize_viewport(&self, width: u32, height: u32) {
        let _ = self.apply_command(Command::ResizeViewport { width, height });
    }

    /// Resize the graphic, discarding every cached tile
    pub fn set_content_size(&self, width: f64, height: f64) -> Result<(), ConfigError> {
        self.apply_command(Command::SetContentSize { width, height })
    }

    /// Replace the scale levels, discarding every cached tile
    pub fn set_scales(&self, scales: Vec<Scale>) -> Result<(), ConfigError> {
        self.apply_command(Command::SetScales(scales))
    }

    /// Switch display, discarding every cached tile
    pub fn set_display_metrics(&self, metrics: DisplayMetrics) -> Result<(), ConfigError> {
        self.apply_command(Command::SetDisplayMetrics(metrics))
    }

    /// Rebuild all grids with unchanged parameters
    pub fn reinitialize(&self) {
        let _ = self.apply_command(Command::Reinitialize);
    }

    /// Mark every cached tile stale
    pub fn invalidate(&self) {
        let _ = self.apply_command(Command::Invalidate);
    }

    /// Mark cached tiles overlapping a native rectangle stale, on every level
    pub fn invalidate_region(&self, rect: NativeRect) {
        let _ = self.apply_command(Command::InvalidateRegion(rect));
    }

    fn apply_command(&self, cmd: Command) -> Result<(), ConfigError> {
        let mut view = self.shared.view();
        let effects = view.apply(cmd)?;
        self.shared.execute_effects(&view, effects);
        Ok(())
    }

    /// Render the current viewport, producing missing tiles on this thread
    #[must_use]
    pub fn render(&self) -> Clip {
        let (frame, layout) = self.shared.snapshot();
        let never = CancellationToken::new();
        self.shared
            .render_frame(&frame, &layout, &never)
            .unwrap_or_else(|| Clip::empty(frame.scale_index, layout.epoch))
    }

    /// Render the current viewport on `executor`.
    ///
    /// The viewport and layout are captured now; later changes do not affect
    /// this request. `on_complete` runs exactly once on the executor, after
    /// the outcome is available to [`TilePool::render_finish`]. Superseded
    /// requests are not cancelled automatically.
    pub fn render_async<F>(
        &self,
        executor: &(impl Executor + ?Sized),
        cancel: CancellationToken,
        on_complete: F,
    ) -> PendingRender
    where
        F: FnOnce(RequestId, &RenderOutcome) + Send + 'static,
    {
        let id = RequestId::new(self.shared.next_request_id.fetch_add(1, Ordering::Relaxed));
        let (frame, layout) = self.shared.snapshot();
        let (tx, rx) = flume::bounded(1);

        self.shared.pending().insert(id);
        let guard = PendingGuard {
            shared: Arc::clone(&self.shared),
            id,
        };
        debug!(
            "Render {id:?} queued at level {} for epoch {}",
            frame.scale_index, layout.epoch
        );

        executor.execute(Box::new(move || {
            let shared = &guard.shared;
            let outcome = if cancel.is_cancelled() {
                RenderOutcome::Cancelled
            } else {
                match shared.render_frame(&frame, &layout, &cancel) {
                    // Results are discarded at dispatch if the token fired meanwhile
                    Some(clip) if !cancel.is_cancelled() => RenderOutcome::Ready(clip),
                    _ => RenderOutcome::Cancelled,
                }
            };
            debug!("Render {id:?} finished, cancelled: {}", outcome.is_cancelled());
            drop(guard);

            let _ = tx.send(outcome.clone());
            on_complete(id, &outcome);
        }));

        PendingRender::new(id, rx)
    }

    /// Take the result of a completed asynchronous render
    pub fn render_finish(&self, pending: &mut PendingRender) -> Result<Clip, RenderError> {
        let result = pending.finish();
        if let Err(e) = &result {
            debug!("render_finish: {e}");
        }
        result
    }

    /// True when `clip` was composed from the current layout
    #[must_use]
    pub fn is_current(&self, clip: &Clip) -> bool {
        clip.epoch == self.shared.layout().epoch
    }

    /// State of one tile, `None` when the address is outside the level grid
    #[must_use]
    pub fn tile_state(&self, level: usize, row: usize, col: usize) -> Option<TileState> {
        self.tile(level, row, col).map(|tile| tile.state)
    }

    /// Snapshot of one tile. Cells no render has needed yet report an
    /// `Empty` tile.
    #[must_use]
    pub fn tile(&self, level: usize, row: usize, col: usize) -> Option<Tile> {
        let layout = self.shared.layout();
        let entry = layout.levels.get(level)?;
        if row >= entry.shape.0 || col >= entry.shape.1 {
            return None;
        }
        let stored = entry
            .grid
            .get()
            .and_then(|grid| grid.item(row as isize, col as isize).ok())
            .flatten();
        Some(stored.unwrap_or_else(|| entry.tile_at(TileKey::new(level, row, col))))
    }

    /// Aliasing handle on the tile cells of a level in the current layout.
    /// A cell stays `None` until a render first needs it.
    #[must_use]
    pub fn grid(&self, level: usize) -> Option<Grid<Option<Tile>>> {
        let layout = self.shared.layout();
        let entry = layout.levels.get(level)?;
        Some(entry.grid(level).clone())
    }

    /// `(rows, cols)` of a level grid
    #[must_use]
    pub fn grid_shape(&self, level: usize) -> Option<(usize, usize)> {
        self.shared.layout().levels.get(level).map(|l| l.shape)
    }

    /// Content size in device pixels at a level
    #[must_use]
    pub fn content_extent(&self, level: usize) -> Option<(u32, u32)> {
        self.shared.layout().levels.get(level).map(|l| l.extent)
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let layout = self.shared.layout();
        let residency = layout.residency();
        let counters = &self.shared.counters;
        PoolStats {
            produced: counters.produced.load(Ordering::Relaxed),
            reused: counters.reused.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            evicted: counters.evicted.load(Ordering::Relaxed),
            resident_bytes: residency.bytes(),
            resident_tiles: residency.len(),
            cache_budget: residency.budget(),
            epoch: layout.epoch,
            generation: layout.generation(),
        }
    }

    #[must_use]
    pub fn scales(&self) -> Vec<Scale> {
        self.shared.view().scales.clone()
    }

    #[must_use]
    pub fn scale_index(&self) -> usize {
        self.shared.view().scale_index
    }

    #[must_use]
    pub fn active_scale(&self) -> Scale {
        self.shared.view().active_scale()
    }

    /// Viewport origin in native units
    #[must_use]
    pub fn origin(&self) -> (f64, f64) {
        self.shared.view().origin
    }

    /// Visible area in device pixels
    #[must_use]
    pub fn viewport(&self) -> (u32, u32) {
        self.shared.view().viewport
    }

    #[must_use]
    pub fn content_size(&self) -> (f64, f64) {
        self.shared.view().content_size
    }

    #[must_use]
    pub fn display_metrics(&self) -> DisplayMetrics {
        self.shared.view().metrics
    }

    /// Unit conversions at the active scale
    #[must_use]
    pub fn transform(&self) -> Transform {
        self.shared.view().transform()
    }

    #[must_use]
    pub fn tile_size(&self) -> u32 {
        self.shared.tile_size
    }

    #[must_use]
    pub fn format(&self) -> PixelFormat {
        self.shared.format
    }

    /// Asynchronous renders submitted but not yet finished
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.shared.pending().len()
    }

    /// Receive [`PoolEvent`]s from now on
    pub fn subscribe(&self) -> Receiver<PoolEvent> {
        self.shared.listeners.subscribe()
    }
}

impl Shared {
    fn view(&self) -> MutexGuard<'_, ViewState> {
        self.view.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending(&self) -> MutexGuard<'_, HashSet<RequestId>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn layout(&self) -> Arc<Layout> {
        Arc::clone(&self.layout.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// View and layout taken under the view lock, so they always agree
    fn snapshot(&self) -> (Frame, Arc<Layout>) {
        let view = self.view();
        let frame = Frame {
            origin: view.origin,
            scale_index: view.scale_index,
            viewport: view.viewport,
        };
        (frame, self.layout())
    }

    fn execute_effects(&self, view: &ViewState, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Rebuild => {
                    let (epoch, retired) = {
                        let mut slot = self.layout.write().unwrap_or_else(PoisonError::into_inner);
                        let epoch = slot.epoch + 1;
                        let fresh = Arc::new(Layout::build(view, self.tile_size, self.budget, epoch));
                        (epoch, std::mem::replace(&mut *slot, fresh))
                    };
                    // Only the current layout counts against the budget
                    retired.residency().clear();
                    info!(
                        "Tile grids rebuilt for epoch {epoch}: content {}x{}, {} scales",
                        view.content_size.0,
                        view.content_size.1,
                        view.scales.len()
                    );
                    self.listeners.emit(PoolEvent::Reinitialized { epoch });
                }

                Effect::BumpGeneration => {
                    let generation = self.layout().generation.fetch_add(1, Ordering::AcqRel) + 1;
                    debug!("Tile cache invalidated, generation {generation}");
                    self.listeners.emit(PoolEvent::Invalidated { generation });
                }

                Effect::StaleRegion(rect) => {
                    let layout = self.layout();
                    let staled = layout.stale_region(&rect);
                    debug!("Region {rect:?} invalidated {staled} tiles");
                    self.listeners.emit(PoolEvent::Invalidated {
                        generation: layout.generation(),
                    });
                }

                Effect::ViewportChanged => {
                    self.listeners.emit(PoolEvent::ViewportChanged {
                        x: view.origin.0,
                        y: view.origin.1,
                        scale_index: view.scale_index,
                    });
                }
            }
        }
    }

    /// Produce and compose the covering set of `frame`. Returns `None` when
    /// `cancel` fires before the last tile is settled.
    fn render_frame(
        &self,
        frame: &Frame,
        layout: &Layout,
        cancel: &CancellationToken,
    ) -> Option<Clip> {
        let empty = || Clip::empty(frame.scale_index, layout.epoch);
        let Some(level) = layout.levels.get(frame.scale_index) else {
            return Some(empty());
        };
        let Some((rows, cols)) = level.covering(frame, self.tile_size) else {
            return Some(empty());
        };

        let grid = level.grid(frame.scale_index);
        let cover = match grid.view((rows.clone(), cols.clone())) {
            Ok(cover) => cover,
            Err(e) => {
                warn!("Covering set {rows:?}x{cols:?} outside level grid: {e}");
                return Some(empty());
            }
        };

        let generation = layout.generation();
        let mut pinned = HashSet::with_capacity(cover.len());
        let mut bands: Vec<Vec<Piece>> = Vec::with_capacity(cover.rows());

        for i in 0..cover.rows() as isize {
            let mut band = Vec::with_capacity(cover.cols());
            for j in 0..cover.cols() as isize {
                if cancel.is_cancelled() {
                    return None;
                }
                let key = TileKey::new(
                    frame.scale_index,
                    rows.start + i as usize,
                    cols.start + j as usize,
                );
                let piece = self.settle(&cover, (i, j), key, level, layout, generation, cancel)?;
                pinned.insert(key);
                band.push(piece);
            }
            bands.push(band);
        }

        self.evict(layout, &pinned);

        let t = self.tile_size;
        let x = cols.start as u32 * t;
        let y = rows.start as u32 * t;
        let bbox = DeviceRect::new(
            x,
            y,
            (cols.end as u32 * t).min(level.extent.0) - x,
            (rows.end as u32 * t).min(level.extent.1) - y,
        );
        let pixels = compose(bbox, self.format, t, &bands);

        Some(Clip {
            x: bbox.x,
            y: bbox.y,
            width: bbox.width,
            height: bbox.height,
            pixels: Some(Arc::new(pixels)),
            scale_index: frame.scale_index,
            epoch: layout.epoch,
        })
    }

    /// Reuse or produce the tile at `(i, j)` of the covering view
    #[allow(clippy::too_many_arguments)]
    fn settle(
        &self,
        cover: &Grid<Option<Tile>>,
        (i, j): (isize, isize),
        key: TileKey,
        level: &Level,
        layout: &Layout,
        generation: u64,
        cancel: &CancellationToken,
    ) -> Option<Piece> {
        let (rect, plan) = cover
            .update(i, j, |cell| {
                let tile = cell.get_or_insert_with(|| level.tile_at(key));
                let plan = match tile.pixels.clone() {
                    Some(pixels) if tile.is_fresh(generation) => Plan::Reuse(pixels),
                    _ => {
                        tile.mark_requested();
                        Plan::Produce(tile.spec(level.scale, self.format), tile.invalidations)
                    }
                };
                (tile.device_rect, plan)
            })
            .ok()?;

        let (spec, invalidations) = match plan {
            Plan::Reuse(pixels) => {
                layout.residency().touch(&key);
                self.counters.reused.fetch_add(1, Ordering::Relaxed);
                return Some(Piece { rect, pixels });
            }
            Plan::Produce(spec, invalidations) => (spec, invalidations),
        };

        // The store lock is not held while the producer runs
        let produced = self
            .producer
            .produce(&spec)
            .and_then(|buffer| spec.accept(buffer));

        if cancel.is_cancelled() {
            let dropped = cover.update(i, j, |cell| cell.as_mut().is_some_and(Tile::abandon));
            if matches!(dropped, Ok(true)) {
                layout.residency().remove(&key);
            }
            debug!("Tile {key:?} discarded, request cancelled");
            return None;
        }

        match produced {
            Ok(buffer) => {
                let pixels = Arc::new(buffer);
                let bytes = pixels.data.len();
                let _ = cover.update(i, j, |cell| {
                    if let Some(tile) = cell {
                        tile.store(Arc::clone(&pixels), generation, invalidations);
                    }
                });
                layout.residency().insert(key, bytes);
                self.counters.produced.fetch_add(1, Ordering::Relaxed);
                debug!("Tile {key:?} produced, {bytes} bytes");
                self.listeners.emit(PoolEvent::TileReady(key));
                Some(Piece { rect, pixels })
            }
            Err(e) => {
                let _ = cover.update(i, j, |cell| cell.as_mut().map(Tile::fail));
                layout.residency().remove(&key);
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!("Tile {key:?} failed to render: {e}");
                self.listeners.emit(PoolEvent::TileFailed {
                    key,
                    reason: e.to_string(),
                });
                Some(Piece {
                    rect,
                    pixels: Arc::new(placeholder(rect.width, rect.height, self.format)),
                })
            }
        }
    }

    fn evict(&self, layout: &Layout, pinned: &HashSet<TileKey>) {
        let evicted = layout.residency().evict(pinned);
        if evicted.is_empty() {
            return;
        }

        for key in &evicted {
            if let Some(grid) = layout.levels.get(key.level).and_then(|l| l.grid.get()) {
                let _ = grid.update(key.row as isize, key.col as isize, |cell| {
                    cell.as_mut().map(Tile::evict)
                });
            }
            self.listeners.emit(PoolEvent::TileEvicted(*key));
        }
        self.counters
            .evicted
            .fetch_add(evicted.len() as u64, Ordering::Relaxed);
        debug!(
            "Evicted {} tiles, {} bytes resident",
            evicted.len(),
            layout.residency().bytes()
        );
    }
}

/// Drops the request from the pending set however the job ends
struct PendingGuard {
    shared: Arc<Shared>,
    id: RequestId,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.shared.pending().remove(&self.id);
    }
}

/// Stitch tile bands into one buffer covering `bbox`. Band `k` holds the
/// tiles of the `k`-th tile row, left to right.
fn compose(bbox: DeviceRect, format: PixelFormat, tile_size: u32, bands: &[Vec<Piece>]) -> PixelBuffer {
    let bpp = format.bytes_per_pixel();
    let stride = bbox.width as usize * bpp;
    let height = bbox.height as usize;
    let mut data = vec![0u8; stride * height];
    if stride == 0 || height == 0 {
        return PixelBuffer::new(bbox.width, bbox.height, format, data);
    }

    let copy_row = |y: usize, row: &mut [u8]| {
        let Some(band) = bands.get(y / tile_size as usize) else {
            return;
        };
        for piece in band {
            let local_y = bbox.y as usize + y - piece.rect.y as usize;
            let src_stride = piece.pixels.stride();
            let start = (piece.rect.x - bbox.x) as usize * bpp;
            let (Some(src), Some(dst)) = (
                piece
                    .pixels
                    .data
                    .get(local_y * src_stride..(local_y + 1) * src_stride),
                row.get_mut(start..start + src_stride),
            ) else {
                continue;
            };
            dst.copy_from_slice(src);
        }
    };

    let total_pixels = bbox.width as usize * height;
    if total_pixels >= PARALLEL_COMPOSE_PIXELS && height >= 4 {
        data.par_chunks_mut(stride)
            .enumerate()
            .for_each(|(y, row)| copy_row(y, row));
    } else {
        for (y, row) in data.chunks_mut(stride).enumerate() {
            copy_row(y, row);
        }
    }

    PixelBuffer::new(bbox.width, bbox.height, format, data)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::tiles::executor::InlineExecutor;
    use crate::tiles::producer::ProducerError;

    fn solid_producer(
        calls: Arc<AtomicUsize>,
    ) -> impl Fn(&TileSpec) -> Result<PixelBuffer, ProducerError> + Send + Sync {
        move |spec: &TileSpec| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(PixelBuffer::solid(
                spec.width,
                spec.height,
                spec.format,
                (spec.key.row as u8, spec.key.col as u8, 0),
            ))
        }
    }

    fn letter_pool(calls: &Arc<AtomicUsize>) -> TilePool {
        let config = PoolConfig::new(612.0, 792.0).with_viewport(300, 300);
        TilePool::new(config, solid_producer(Arc::clone(calls))).unwrap()
    }

    #[test]
    fn level_shape_follows_extent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pool = letter_pool(&calls);
        assert_eq!(pool.content_extent(0), Some((816, 1056)));
        assert_eq!(pool.grid_shape(0), Some((5, 4)));
        assert_eq!(pool.grid_shape(1), Some((9, 7)));
        assert_eq!(pool.grid_shape(6), None);
    }

    #[test]
    fn edge_tiles_are_trimmed() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pool = letter_pool(&calls);
        let tile = pool.tile(0, 4, 3).unwrap();
        assert_eq!(tile.device_rect, DeviceRect::new(768, 1024, 48, 32));
        assert_eq!(tile.state, TileState::Empty);
    }

    #[test]
    fn render_composes_covering_set() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pool = letter_pool(&calls);

        let clip = pool.render();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(clip.rect(), DeviceRect::new(0, 0, 512, 512));

        let pixels = clip.pixels.unwrap();
        assert_eq!(pixels.pixel(0, 0), Some(&[0, 0, 0][..]));
        assert_eq!(pixels.pixel(300, 10), Some(&[0, 1, 0][..]));
        assert_eq!(pixels.pixel(10, 300), Some(&[1, 0, 0][..]));
        assert_eq!(pixels.pixel(511, 511), Some(&[1, 1, 0][..]));
    }

    #[test]
    fn cells_are_filled_on_first_need() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pool = letter_pool(&calls);
        let _ = pool.render();

        let cells = pool.grid(0).unwrap();
        assert_eq!(cells.len(), 20);
        assert_eq!(cells.iter().filter(Option::is_some).count(), 4);
        assert!(cells.item(0, 0).unwrap().is_some());
        assert!(cells.item(4, 3).unwrap().is_none());
        assert!(pool.grid(1).unwrap().iter().all(|cell| cell.is_none()));
    }

    #[test]
    fn viewport_off_content_gives_empty_clip() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pool = letter_pool(&calls);
        pool.set_viewport(10_000.0, 0.0, 0).unwrap();

        let clip = pool.render();
        assert!(clip.is_empty());
        assert!(clip.pixels.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn partial_overlap_covers_trailing_tiles() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pool = letter_pool(&calls);
        // 600 native units is 800 device px at 96 dpi
        pool.set_viewport(600.0, 0.0, 0).unwrap();

        let clip = pool.render();
        assert_eq!(clip.rect(), DeviceRect::new(768, 0, 48, 512));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn region_invalidation_only_hits_overlapping_tiles() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pool = letter_pool(&calls);
        let _ = pool.render();

        // Tile (0, 0) spans native 0..192
        pool.invalidate_region(NativeRect::new(10.0, 10.0, 5.0, 5.0));
        let _ = pool.render();
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(pool.stats().reused, 3);
    }

    #[test]
    fn async_request_uses_captured_viewport() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pool = letter_pool(&calls);

        let mut pending = pool.render_async(&InlineExecutor, CancellationToken::new(), |_, _| {});
        pool.set_viewport(100.0, 100.0, 1).unwrap();

        let clip = pool.render_finish(&mut pending).unwrap();
        assert_eq!(clip.scale_index, 0);
        assert_eq!(pool.pending_requests(), 0);
    }

    #[test]
    fn compose_places_pieces() {
        let format = PixelFormat::Gray8;
        let piece = |x, y, w, h, v| Piece {
            rect: DeviceRect::new(x, y, w, h),
            pixels: Arc::new(PixelBuffer::solid(w, h, format, (v, v, v))),
        };
        let bands = vec![
            vec![piece(4, 4, 2, 2, 10), piece(6, 4, 1, 2, 20)],
            vec![piece(4, 6, 2, 1, 30), piece(6, 6, 1, 1, 40)],
        ];

        let out = compose(DeviceRect::new(4, 4, 3, 3), format, 2, &bands);
        let luma = |x, y| out.pixel(x, y).map(|p| p[0]);
        assert_eq!(luma(0, 0), format.encode((10, 10, 10)).first().copied());
        assert_eq!(luma(2, 1), format.encode((20, 20, 20)).first().copied());
        assert_eq!(luma(1, 2), format.encode((30, 30, 30)).first().copied());
        assert_eq!(luma(2, 2), format.encode((40, 40, 40)).first().copied());
    }
}
