//! Tiled, multi-scale raster cache for drawing large scalable graphics
//! into a viewport.

pub mod demo;
pub mod grid;
pub mod panic_handler;
pub mod settings;
pub mod tiles;

pub use grid::{Axis, Grid, GridError, GridIndex, Selection};
pub use tiles::{
    CancellationToken, Clip, PixelBuffer, PixelFormat, PixelProducer, PoolConfig, PoolEvent,
    RenderError, RenderOutcome, Scale, TilePool, Transform,
};
