//! Tiled rendering of a scalable graphic
//!
//! A [`TilePool`] keeps one grid of cached [`Tile`]s per scale level and
//! serves the viewport a composed [`Clip`], producing missing tiles through a
//! caller-supplied [`PixelProducer`].

mod config;
mod events;
mod executor;
mod pool;
mod producer;
mod request;
mod residency;
mod state;
mod tile;
mod transform;
mod types;

pub use config::{
    ConfigError, DEFAULT_CACHE_BYTES, DEFAULT_TILE_SIZE, DEFAULT_VIEWPORT, DEFAULT_WORKERS,
    PoolConfig, default_scales,
};
pub use events::{Listeners, PoolEvent};
pub use executor::{Executor, InlineExecutor, Job, WorkerPool};
pub use pool::{PoolStats, TilePool};
pub use producer::{PixelProducer, ProducerError, TileSpec, placeholder};
pub use request::{CancellationToken, PendingRender, RenderError, RenderOutcome, RequestId};
pub use residency::Residency;
pub use state::{Command, Effect, ViewState};
pub use tile::{Tile, TileKey, TileState};
pub use transform::{DisplayMetrics, POINTS_PER_INCH, Transform};
pub use types::{Clip, DeviceRect, NativeRect, ParseScaleError, PixelBuffer, PixelFormat, Scale};
