use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tessera::tiles::{
    CancellationToken, ConfigError, DEFAULT_CACHE_BYTES, DisplayMetrics, Executor, InlineExecutor,
    Job, NativeRect, PixelBuffer, PoolConfig, PoolEvent, ProducerError, RenderError, TileKey,
    TilePool, TileSpec, TileState, WorkerPool,
};

const TILE_BYTES: usize = 256 * 256 * 3;

type Log = Arc<Mutex<Vec<TileKey>>>;

fn recording(
    log: &Log,
) -> impl Fn(&TileSpec) -> Result<PixelBuffer, ProducerError> + Send + Sync + 'static {
    let log = Arc::clone(log);
    move |spec: &TileSpec| {
        log.lock().unwrap().push(spec.key);
        Ok(PixelBuffer::solid(spec.width, spec.height, spec.format, (10, 20, 30)))
    }
}

/// US letter page, 300x300 viewport: the first render covers 2x2 tiles
fn letter() -> PoolConfig {
    PoolConfig::new(612.0, 792.0).with_viewport(300, 300)
}

fn produced(log: &Log) -> usize {
    log.lock().unwrap().len()
}

/// Holds jobs until told to run them
#[derive(Default)]
struct Deferred {
    jobs: Mutex<Vec<Job>>,
}

impl Executor for Deferred {
    fn execute(&self, job: Job) {
        self.jobs.lock().unwrap().push(job);
    }
}

impl Deferred {
    fn run_all(&self) {
        let jobs = std::mem::take(&mut *self.jobs.lock().unwrap());
        for job in jobs {
            job();
        }
    }
}

#[test]
fn cached_tiles_are_reused() {
    let log = Log::default();
    let pool = TilePool::new(letter(), recording(&log)).unwrap();

    let first = pool.render();
    assert_eq!(produced(&log), 4);

    let second = pool.render();
    assert_eq!(produced(&log), 4, "no tile may be produced twice");
    assert_eq!(first.rect(), second.rect());
    assert_eq!(first.pixels, second.pixels);

    let stats = pool.stats();
    assert_eq!(stats.produced, 4);
    assert_eq!(stats.reused, 4);
    assert_eq!(stats.resident_tiles, 4);
    assert_eq!(stats.resident_bytes, 4 * TILE_BYTES);
    assert_eq!(pool.tile_state(0, 1, 1), Some(TileState::Ready));
}

#[test]
fn content_resize_discards_every_tile() {
    let log = Log::default();
    let pool = TilePool::new(letter(), recording(&log)).unwrap();
    let events = pool.subscribe();

    let first = pool.render();
    assert!(pool.is_current(&first));

    pool.set_content_size(612.0, 1008.0).unwrap();
    assert!(!pool.is_current(&first));
    assert_eq!(pool.grid_shape(0), Some((6, 4)));
    assert_eq!(pool.tile_state(0, 0, 0), Some(TileState::Empty));
    assert_eq!(pool.stats().resident_tiles, 0);

    let second = pool.render();
    assert!(pool.is_current(&second));
    let log = log.lock().unwrap();
    assert_eq!(log.len(), 8);
    let before: HashSet<_> = log[..4].iter().collect();
    let after: HashSet<_> = log[4..].iter().collect();
    assert_eq!(before, after);

    assert!(events.try_iter().any(|e| e == PoolEvent::Reinitialized { epoch: 2 }));
}

#[test]
fn same_content_size_keeps_cache() {
    let log = Log::default();
    let pool = TilePool::new(letter(), recording(&log)).unwrap();

    let _ = pool.render();
    pool.set_content_size(612.0, 792.0).unwrap();
    let _ = pool.render();
    assert_eq!(produced(&log), 4);
}

#[test]
fn invalidate_makes_every_tile_stale() {
    let log = Log::default();
    let pool = TilePool::new(letter(), recording(&log)).unwrap();
    let events = pool.subscribe();

    let _ = pool.render();
    pool.invalidate();
    assert_eq!(pool.stats().generation, 2);

    let _ = pool.render();
    assert_eq!(produced(&log), 8);
    assert_eq!(pool.tile(0, 0, 0).unwrap().generation, 2);
    assert!(events.try_iter().any(|e| e == PoolEvent::Invalidated { generation: 2 }));
}

#[test]
fn display_metrics_change_rebuilds_grids() {
    let log = Log::default();
    let pool = TilePool::new(letter(), recording(&log)).unwrap();
    let _ = pool.render();

    pool.set_display_metrics(DisplayMetrics::new(96.0, 2.0)).unwrap();
    assert_eq!(pool.content_extent(0), Some((1632, 2112)));
    assert_eq!(pool.grid_shape(0), Some((9, 7)));

    let clip = pool.render();
    assert_eq!(clip.rect().width, 512);
    assert_eq!(produced(&log), 8);
}

#[test]
fn viewport_and_scale_selection() {
    let log = Log::default();
    let pool = TilePool::new(letter(), recording(&log)).unwrap();
    let events = pool.subscribe();

    assert_eq!(
        pool.set_viewport(0.0, 0.0, 6),
        Err(ConfigError::InvalidScaleIndex { index: 6, count: 6 })
    );

    pool.set_viewport(10.0, 20.0, 1).unwrap();
    assert_eq!(pool.transform().scale(), 2.0);
    assert_eq!(
        events.try_recv().unwrap(),
        PoolEvent::ViewportChanged {
            x: 10.0,
            y: 20.0,
            scale_index: 1
        }
    );

    // 10pt at 2x is 26.7px, 20pt is 53.3px: still inside the first tile
    let clip = pool.render();
    assert_eq!((clip.x, clip.y, clip.scale_index), (0, 0, 1));
    assert_eq!(produced(&log), 4);
    assert!(log.lock().unwrap().iter().all(|k| k.level == 1));

    let ready = events
        .try_iter()
        .filter(|e| matches!(e, PoolEvent::TileReady(_)))
        .count();
    assert_eq!(ready, 4);
}

#[test]
fn invalid_configuration_is_rejected() {
    let log = Log::default();
    let config = letter().with_scales(Vec::new());
    assert!(matches!(
        TilePool::new(config, recording(&log)),
        Err(ConfigError::EmptyScales)
    ));

    let pool = TilePool::new(letter(), recording(&log)).unwrap();
    assert!(pool.set_scales(Vec::new()).is_err());
    assert_eq!(pool.scales().len(), 6);
    assert!(pool.set_content_size(-5.0, 10.0).is_err());
    assert_eq!(pool.content_size(), (612.0, 792.0));
}

#[test]
fn failed_tile_draws_placeholder_and_is_retried() {
    let failed_once = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&failed_once);
    let producer = move |spec: &TileSpec| {
        if spec.key == TileKey::new(0, 0, 0) && !flag.swap(true, Ordering::SeqCst) {
            return Err(ProducerError::generic("boom"));
        }
        Ok(PixelBuffer::solid(spec.width, spec.height, spec.format, (10, 20, 30)))
    };
    let pool = TilePool::new(letter(), producer).unwrap();
    let events = pool.subscribe();

    let clip = pool.render();
    let pixels = clip.pixels.unwrap();
    assert_eq!(pixels.pixel(0, 0), Some(&[0xFF, 0xFF, 0xCC][..]));
    assert_eq!(pixels.pixel(300, 0), Some(&[10, 20, 30][..]));

    assert_eq!(pool.tile_state(0, 0, 0), Some(TileState::Empty));
    assert_eq!(pool.tile(0, 0, 0).unwrap().failures, 1);
    assert_eq!(pool.stats().failed, 1);
    assert!(events.try_iter().any(|e| e
        == PoolEvent::TileFailed {
            key: TileKey::new(0, 0, 0),
            reason: "boom".to_string()
        }));

    let retry = pool.render();
    assert_eq!(retry.pixels.unwrap().pixel(0, 0), Some(&[10, 20, 30][..]));
    assert_eq!(pool.tile_state(0, 0, 0), Some(TileState::Ready));
    assert_eq!(pool.stats().produced, 4);
    assert!(failed_once.load(Ordering::SeqCst));
}

#[test]
fn mismatched_buffer_counts_as_failure() {
    let producer =
        |_: &TileSpec| Ok::<_, ProducerError>(PixelBuffer::blank(1, 1, Default::default()));
    let pool = TilePool::new(letter(), producer).unwrap();

    let clip = pool.render();
    assert_eq!(clip.rect().width, 512);
    assert_eq!(pool.stats().failed, 4);
    assert_eq!(pool.stats().resident_tiles, 0);
    assert_eq!(pool.tile_state(0, 1, 0), Some(TileState::Empty));
}

#[test]
fn least_recently_used_tiles_are_evicted() {
    let log = Log::default();
    let pool = TilePool::new(letter().with_cache_budget(4 * TILE_BYTES), recording(&log)).unwrap();
    let events = pool.subscribe();

    let _ = pool.render();
    // 400pt is 533px: rows 2..4
    pool.set_viewport(0.0, 400.0, 0).unwrap();
    let _ = pool.render();

    let stats = pool.stats();
    assert_eq!(stats.evicted, 4);
    assert_eq!(stats.resident_tiles, 4);
    assert_eq!(stats.resident_bytes, 4 * TILE_BYTES);
    assert_eq!(pool.tile_state(0, 0, 0), Some(TileState::Empty));
    assert_eq!(pool.tile_state(0, 3, 1), Some(TileState::Ready));

    let evicted: HashSet<_> = events
        .try_iter()
        .filter_map(|e| match e {
            PoolEvent::TileEvicted(key) => Some(key),
            _ => None,
        })
        .collect();
    let expected: HashSet<_> = [(0, 0), (0, 1), (1, 0), (1, 1)]
        .into_iter()
        .map(|(r, c)| TileKey::new(0, r, c))
        .collect();
    assert_eq!(evicted, expected);

    // Coming back produces the evicted tiles again
    pool.set_viewport(0.0, 0.0, 0).unwrap();
    let _ = pool.render();
    assert_eq!(produced(&log), 12);
}

#[test]
fn visible_tiles_survive_a_tiny_budget() {
    let log = Log::default();
    let pool = TilePool::new(letter().with_cache_budget(1), recording(&log)).unwrap();

    let _ = pool.render();
    assert_eq!(pool.stats().evicted, 0);
    assert_eq!(pool.stats().resident_tiles, 4);

    let _ = pool.render();
    assert_eq!(produced(&log), 4);
}

#[test]
fn async_render_delivers_once_on_worker_pool() {
    let log = Log::default();
    let pool = TilePool::new(letter(), recording(&log)).unwrap();
    let workers = WorkerPool::new(2);
    let (tx, rx) = flume::unbounded();

    let mut pending = pool.render_async(&workers, CancellationToken::new(), move |id, outcome| {
        tx.send((id, outcome.is_cancelled())).unwrap();
    });

    let (id, cancelled) = rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(id, pending.id());
    assert!(!cancelled);
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

    let clip = pool.render_finish(&mut pending).unwrap();
    assert_eq!(clip.rect(), pool.render().rect());
    assert_eq!(produced(&log), 4);
}

#[test]
fn render_finish_before_completion_or_twice_is_invalid() {
    let log = Log::default();
    let pool = TilePool::new(letter(), recording(&log)).unwrap();
    let exec = Deferred::default();

    let mut pending = pool.render_async(&exec, CancellationToken::new(), |_, _| {});
    assert!(matches!(
        pool.render_finish(&mut pending),
        Err(RenderError::InvalidState { .. })
    ));
    assert_eq!(pool.pending_requests(), 1);

    exec.run_all();
    assert!(pool.render_finish(&mut pending).is_ok());
    assert!(matches!(
        pool.render_finish(&mut pending),
        Err(RenderError::InvalidState { .. })
    ));
    assert_eq!(pool.pending_requests(), 0);
}

#[test]
fn cancelled_before_start_never_produces() {
    let log = Log::default();
    let pool = TilePool::new(letter(), recording(&log)).unwrap();
    let exec = Deferred::default();
    let outcomes = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&outcomes);

    let token = CancellationToken::new();
    let mut pending = pool.render_async(&exec, token.clone(), move |_, outcome| {
        assert!(outcome.is_cancelled());
        seen.fetch_add(1, Ordering::SeqCst);
    });
    token.cancel();
    exec.run_all();

    assert_eq!(outcomes.load(Ordering::SeqCst), 1);
    assert_eq!(
        pool.render_finish(&mut pending).unwrap_err(),
        RenderError::Cancelled(pending.id())
    );
    assert_eq!(produced(&log), 0);
}

#[test]
fn cancellation_mid_render_discards_results() {
    let token = CancellationToken::new();
    let trigger = token.clone();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let producer = move |spec: &TileSpec| {
        counter.fetch_add(1, Ordering::SeqCst);
        // Cancel while the first tile is in flight
        trigger.cancel();
        Ok::<_, ProducerError>(PixelBuffer::solid(spec.width, spec.height, spec.format, (1, 2, 3)))
    };
    let pool = TilePool::new(letter(), producer).unwrap();

    let mut pending = pool.render_async(&InlineExecutor, token, |_, _| {});
    assert!(matches!(
        pool.render_finish(&mut pending),
        Err(RenderError::Cancelled(_))
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for (row, col) in [(0, 0), (0, 1), (1, 0), (1, 1)] {
        assert_eq!(pool.tile_state(0, row, col), Some(TileState::Empty));
    }

    let clip = pool.render();
    assert!(clip.pixels.is_some());
    assert_eq!(calls.load(Ordering::SeqCst), 5);
}

#[test]
fn request_started_before_reinit_writes_to_old_grids() {
    let log = Log::default();
    let pool = TilePool::new(letter(), recording(&log)).unwrap();
    let exec = Deferred::default();

    let mut pending = pool.render_async(&exec, CancellationToken::new(), |_, _| {});
    pool.set_scales(vec!["1".parse().unwrap(), "3/2".parse().unwrap()])
        .unwrap();
    exec.run_all();

    let clip = pool.render_finish(&mut pending).unwrap();
    assert_eq!(clip.epoch, 1);
    assert!(!pool.is_current(&clip));
    assert_eq!(produced(&log), 4);
    assert_eq!(pool.tile_state(0, 0, 0), Some(TileState::Empty));
    assert_eq!(pool.stats().resident_tiles, 0);
}

#[test]
fn region_invalidated_while_producing_is_produced_again() {
    let log = Log::default();
    let record = Arc::clone(&log);
    let slot: Arc<Mutex<Option<TilePool>>> = Arc::default();
    let handle = Arc::clone(&slot);
    let producer = move |spec: &TileSpec| {
        record.lock().unwrap().push(spec.key);
        if spec.key == TileKey::new(0, 0, 0) {
            // The graphic under tile (0, 0) changes while it is being rendered
            if let Some(pool) = handle.lock().unwrap().take() {
                pool.invalidate_region(NativeRect::new(10.0, 10.0, 5.0, 5.0));
            }
        }
        Ok::<_, ProducerError>(PixelBuffer::solid(spec.width, spec.height, spec.format, (10, 20, 30)))
    };
    let pool = TilePool::new(letter(), producer).unwrap();
    *slot.lock().unwrap() = Some(pool.clone());

    let _ = pool.render();
    assert_eq!(produced(&log), 4);
    assert!(slot.lock().unwrap().is_none());
    let tile = pool.tile(0, 0, 0).unwrap();
    assert_eq!(tile.state, TileState::Ready);
    assert_ne!(tile.generation, pool.stats().generation);

    let _ = pool.render();
    assert_eq!(produced(&log), 5);
    assert_eq!(log.lock().unwrap()[4], TileKey::new(0, 0, 0));
    assert_eq!(pool.tile(0, 0, 0).unwrap().generation, pool.stats().generation);

    let _ = pool.render();
    assert_eq!(produced(&log), 5);
}

#[test]
fn cancelled_refresh_releases_stale_pixels() {
    let trigger: Arc<Mutex<Option<CancellationToken>>> = Arc::default();
    let armed = Arc::clone(&trigger);
    let producer = move |spec: &TileSpec| {
        if let Some(token) = armed.lock().unwrap().as_ref() {
            token.cancel();
        }
        Ok::<_, ProducerError>(PixelBuffer::solid(spec.width, spec.height, spec.format, (1, 2, 3)))
    };
    let pool = TilePool::new(letter(), producer).unwrap();

    let _ = pool.render();
    pool.invalidate();
    assert_eq!(pool.stats().resident_tiles, 4);

    let token = CancellationToken::new();
    *trigger.lock().unwrap() = Some(token.clone());
    let mut pending = pool.render_async(&InlineExecutor, token, |_, _| {});
    assert!(matches!(
        pool.render_finish(&mut pending),
        Err(RenderError::Cancelled(_))
    ));

    let tile = pool.tile(0, 0, 0).unwrap();
    assert_eq!(tile.state, TileState::Empty);
    assert!(tile.pixels.is_none());

    let stats = pool.stats();
    assert_eq!(stats.resident_tiles, 3);
    assert_eq!(stats.resident_bytes, 3 * TILE_BYTES);
    assert_eq!(stats.cache_budget, DEFAULT_CACHE_BYTES);
}

#[test]
fn overlapping_renders_write_whole_tiles() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let producer = move |spec: &TileSpec| {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(5));
        // Every call paints its own color
        Ok::<_, ProducerError>(PixelBuffer::solid(
            spec.width,
            spec.height,
            spec.format,
            (n as u8, (n >> 8) as u8, 0x7F),
        ))
    };
    let pool = TilePool::new(letter(), producer).unwrap();
    let workers = WorkerPool::new(4);

    let mut pending: Vec<_> = (0..4)
        .map(|_| pool.render_async(&workers, CancellationToken::new(), |_, _| {}))
        .collect();
    let mut clips = vec![pool.render()];
    for request in &mut pending {
        request.wait();
        clips.push(pool.render_finish(request).unwrap());
    }

    let tiles = [(0u32, 0u32), (0, 1), (1, 0), (1, 1)];
    for clip in &clips {
        assert_eq!(clip.rect().width, 512);
        let pixels = clip.pixels.as_ref().unwrap();
        assert!(pixels.is_consistent());
        for (row, col) in tiles {
            let (x0, y0) = (col * 256, row * 256);
            let first = pixels.pixel(x0, y0).unwrap();
            for y in y0..y0 + 256 {
                for x in x0..x0 + 256 {
                    assert_eq!(pixels.pixel(x, y).unwrap(), first, "tile ({row}, {col}) is torn");
                }
            }
        }
    }

    for (row, col) in tiles {
        let tile = pool.tile(0, row as usize, col as usize).unwrap();
        assert_eq!(tile.state, TileState::Ready);
        let buffer = tile.pixels.unwrap();
        assert!(buffer.is_consistent());
        assert_eq!((buffer.width, buffer.height), (256, 256));
    }
    assert!(calls.load(Ordering::SeqCst) >= 4);
    assert_eq!(pool.pending_requests(), 0);
}
