use std::borrow::Cow;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{debug, info};
use simplelog::{Config, LevelFilter, WriteLogger};

use tessera::demo::PatternProducer;
use tessera::panic_handler::initialize_panic_handler;
use tessera::settings;
use tessera::tiles::{
    CancellationToken, Clip, PixelFormat, PoolEvent, Scale, TilePool, WorkerPool,
};

/// Render a region of a procedural page through the tile pool and save it
/// as PNG
#[derive(Parser, Debug)]
#[command(name = "tessera", version, about)]
struct Cli {
    /// Content width in native units (points)
    #[arg(long, default_value_t = 612.0)]
    width: f64,

    /// Content height in native units (points)
    #[arg(long, default_value_t = 792.0)]
    height: f64,

    /// Viewport origin x in native units
    #[arg(short, long, default_value_t = 0.0, allow_negative_numbers = true)]
    x: f64,

    /// Viewport origin y in native units
    #[arg(short, long, default_value_t = 0.0, allow_negative_numbers = true)]
    y: f64,

    /// Scale level to render at
    #[arg(short, long, default_value_t = 0)]
    scale_index: usize,

    /// Viewport width in device pixels
    #[arg(long, default_value_t = 1024)]
    viewport_width: u32,

    /// Viewport height in device pixels
    #[arg(long, default_value_t = 768)]
    viewport_height: u32,

    /// Override the configured scale levels, e.g. 1/2,1,2,4
    #[arg(long, value_delimiter = ',')]
    scales: Option<Vec<Scale>>,

    /// Override the configured tile edge in device pixels
    #[arg(long)]
    tile_size: Option<u32>,

    /// Render on a worker pool instead of the main thread
    #[arg(long = "async")]
    run_async: bool,

    /// Settings file to use instead of the default location
    #[arg(long)]
    config: Option<PathBuf>,

    /// Where to write the composed clip
    #[arg(short, long, default_value = "clip.png")]
    output: PathBuf,

    /// Log file
    #[arg(long, default_value = "tessera.log")]
    log: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    WriteLogger::init(
        LevelFilter::Debug,
        Config::default(),
        File::create(&cli.log)?,
    )?;
    initialize_panic_handler();

    info!("Starting tessera");

    match &cli.config {
        Some(path) => settings::load_settings_from_path(path),
        None => settings::load_settings(),
    }
    let mut settings = settings::get_settings();
    if let Some(scales) = cli.scales.clone() {
        settings.scales = scales;
    }
    if let Some(tile_size) = cli.tile_size {
        settings.tile_size = tile_size;
    }

    let content_size = (cli.width, cli.height);
    let config = settings
        .pool_config(content_size)
        .with_viewport(cli.viewport_width, cli.viewport_height);
    let pool = TilePool::new(config, PatternProducer::new(content_size))
        .context("Invalid pool configuration")?;
    let events = pool.subscribe();

    pool.set_viewport(cli.x, cli.y, cli.scale_index)?;

    let clip = if cli.run_async {
        let workers = WorkerPool::new(settings.workers);
        let mut pending = pool.render_async(&workers, CancellationToken::new(), |id, outcome| {
            debug!("Render {id:?} completed, cancelled: {}", outcome.is_cancelled());
        });
        pending.wait();
        pool.render_finish(&mut pending)?
    } else {
        pool.render()
    };

    let failed = events
        .try_iter()
        .filter(|e| matches!(e, PoolEvent::TileFailed { .. }))
        .count();
    let stats = pool.stats();
    info!("Render done: {stats:?}, {failed} failed tiles");

    write_png(&cli.output, &clip)?;
    println!(
        "{}x{} clip at ({}, {}) scale {}: {} tiles produced, written to {}",
        clip.width,
        clip.height,
        clip.x,
        clip.y,
        pool.active_scale(),
        stats.produced,
        cli.output.display()
    );

    info!("Shutting down tessera");
    Ok(())
}

fn write_png(path: &Path, clip: &Clip) -> Result<()> {
    let Some(pixels) = &clip.pixels else {
        bail!("Viewport does not overlap the content, nothing to write");
    };

    let (color, data) = match pixels.format {
        PixelFormat::Rgb8 => (png::ColorType::Rgb, Cow::Borrowed(&pixels.data[..])),
        PixelFormat::Rgba8 => (png::ColorType::Rgba, Cow::Borrowed(&pixels.data[..])),
        PixelFormat::Gray8 => (png::ColorType::Grayscale, Cow::Borrowed(&pixels.data[..])),
        PixelFormat::Bgra8 => {
            let mut rgba = pixels.data.clone();
            for px in rgba.chunks_exact_mut(4) {
                px.swap(0, 2);
            }
            (png::ColorType::Rgba, Cow::Owned(rgba))
        }
    };

    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut encoder = png::Encoder::new(BufWriter::new(file), pixels.width, pixels.height);
    encoder.set_color(color);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(&data)?;
    debug!("Wrote {} bytes of pixels to {path:?}", data.len());
    Ok(())
}
