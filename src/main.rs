//! tilevault - inspect and read MBTiles-style tile stores.
//!
//! This binary wires the library's discovery, query, read and layer
//! components into four subcommands.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tilevault::{
    config::{Cli, Command, EngineConfig, InspectArgs, QueryArgs, TileArgs, WarmArgs},
    encode_tile, CacheEntry, Discovery, MosaicQuery, PixelLayout, SourceRect, StoreRegistry,
    TileAddress, TileFileFormat, TileLayer, TileReader, TileRenderer, View, VisibilitySignal,
};
use tilevault::tile::native_channel_order;

/// Frame interval used by `warm`.
const FRAME_INTERVAL: Duration = Duration::from_millis(16);

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = cli.engine.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }
    let registry = cli.engine.registry();

    let result = match cli.command {
        Command::Inspect(args) => run_inspect(&registry, args),
        Command::Query(args) => run_query(&registry, &cli.engine, args),
        Command::Tile(args) => run_tile(&registry, args),
        Command::Warm(args) => run_warm(&registry, &cli.engine, args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "tilevault=debug"
    } else {
        "tilevault=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

// =============================================================================
// Inspect Command
// =============================================================================

fn run_inspect(registry: &StoreRegistry, args: InspectArgs) -> Result<(), String> {
    let handle = registry.open(&args.path).map_err(|e| e.to_string())?;

    let descriptor = match handle.discovery() {
        Discovery::Store(descriptor) => descriptor,
        Discovery::NotATileStore => {
            return Err(format!("{} is not a tile store", args.path.display()))
        }
        Discovery::Empty => {
            println!("{}: tile store holds no tiles", args.path.display());
            return Ok(());
        }
    };

    if args.json {
        let json = serde_json::json!({
            "descriptor": descriptor,
            "bounds": descriptor.bounds(),
            "zoom_levels": descriptor.zoom_levels(),
        });
        let text = serde_json::to_string_pretty(&json).map_err(|e| e.to_string())?;
        println!("{}", text);
        return Ok(());
    }

    let bounds = descriptor.bounds();
    println!("Tile store: {}", descriptor.path.display());
    println!("═════════════════════════════════");
    if let Some(ref name) = descriptor.name {
        println!("  Name:      {}", name);
    }
    if let Some(ref format) = descriptor.format {
        println!("  Format:    {}", format);
    }
    println!("  Zoom:      {}..={}", descriptor.min_zoom, descriptor.max_zoom);
    println!(
        "  Tile size: {}x{}",
        descriptor.tile_width, descriptor.tile_height
    );
    println!("  Alpha:     {}", descriptor.has_alpha_channel);
    println!("  SRID:      {}", descriptor.srid);
    println!(
        "  Bounds:    S {:.6} W {:.6} N {:.6} E {:.6}",
        bounds.south, bounds.west, bounds.north, bounds.east
    );
    println!();
    println!("Zoom levels:");
    println!("─────────────────");
    for (index, level) in descriptor.zoom_levels().iter().enumerate() {
        println!(
            "  [{}] zoom {:>2}  {:>14.4} m/px",
            index, level.level, level.resolution
        );
    }
    Ok(())
}

// =============================================================================
// Query Command
// =============================================================================

fn run_query(
    registry: &StoreRegistry,
    engine: &EngineConfig,
    args: QueryArgs,
) -> Result<(), String> {
    let reader = TileReader::open(registry, &args.path).map_err(|e| e.to_string())?;
    let query = MosaicQuery {
        min_gsd: args.min_gsd,
        max_gsd: args.max_gsd,
        spatial_filter: args.bbox,
        ascending_gsd: args.ascending,
    };

    let tiles = reader
        .query_mosaic(&query, engine.zoom_fudge_factor)
        .map_err(|e| e.to_string())?;

    for tile in &tiles {
        println!(
            "{}/{}/{}\t{:.4} m/px\t{}",
            tile.address.zoom, tile.address.column, tile.address.row, tile.resolution, tile.locator
        );
    }
    info!("{} tile(s) matched", tiles.len());
    Ok(())
}

// =============================================================================
// Tile Command
// =============================================================================

fn run_tile(registry: &StoreRegistry, args: TileArgs) -> Result<(), String> {
    let reader = TileReader::open(registry, &args.path)
        .map_err(|e| e.to_string())?
        .with_layout(PixelLayout::from(args.layout));

    let address = TileAddress::new(args.zoom, args.x, args.y).ok_or_else(|| {
        format!(
            "tile {}/{}/{} is outside the zoom {} grid",
            args.zoom, args.x, args.y, args.zoom
        )
    })?;

    let descriptor = reader.descriptor();
    let rect = args
        .src
        .unwrap_or_else(|| SourceRect::full(descriptor.tile_width, descriptor.tile_height));
    let width = args.width.unwrap_or(rect.width);
    let height = args.height.unwrap_or(rect.height);

    let tile = reader
        .read(address, rect, width, height)
        .map_err(|e| e.to_string())?;
    if tile.layout == PixelLayout::NativeArgb32 {
        let order = native_channel_order();
        debug!(
            "Native ARGB words are {:?} in memory ({:?})",
            order,
            order.write_path()
        );
    }

    let format = TileFileFormat::from_extension(args.output.extension().and_then(|e| e.to_str()));
    let encoded = encode_tile(&tile, format).map_err(|e| e.to_string())?;
    std::fs::write(&args.output, &encoded)
        .map_err(|e| format!("Failed to write {}: {}", args.output.display(), e))?;

    info!(
        "Wrote {}x{} tile to {} ({} bytes)",
        tile.width,
        tile.height,
        args.output.display(),
        encoded.len()
    );
    Ok(())
}

// =============================================================================
// Warm Command
// =============================================================================

#[derive(Default)]
struct FrameCounter {
    tiles: usize,
}

impl TileRenderer for FrameCounter {
    fn draw_tile(&mut self, _entry: &CacheEntry) {
        self.tiles += 1;
    }
}

fn run_warm(registry: &StoreRegistry, engine: &EngineConfig, args: WarmArgs) -> Result<(), String> {
    let reader = TileReader::open(registry, &args.path).map_err(|e| e.to_string())?;
    let signal = Arc::new(VisibilitySignal::new(true));
    let mut layer = TileLayer::new(Arc::new(reader), signal, engine.layer_config());

    let selected = layer.select_zoom_level(args.resolution);
    info!(
        "Warming {} at {} m/px (zoom index {:?})",
        args.path.display(),
        args.resolution,
        selected
    );

    layer
        .start()
        .map_err(|e| format!("Failed to start worker: {}", e))?;

    let view = View {
        resolution: args.resolution,
        area: args.bbox,
    };
    let started = Instant::now();
    let mut renderer = FrameCounter::default();
    let mut first_frame = None;

    for frame in 0..args.frames {
        renderer.tiles = 0;
        let drawn = layer.draw(&view, &mut renderer);
        debug!("Frame {}: {} tiles ({:?})", frame, drawn, layer.state());
        if drawn > 0 && first_frame.is_none() {
            first_frame = Some((frame, started.elapsed()));
        }
        std::thread::sleep(FRAME_INTERVAL);
    }

    layer.stop();
    let cache = layer.cache();

    println!("Layer state:      {:?}", layer.state());
    println!("Cached tiles:     {}", cache.len());
    println!(
        "Cache size:       {:.2} MB of {:.2} MB",
        cache.size() as f64 / (1024.0 * 1024.0),
        cache.capacity() as f64 / (1024.0 * 1024.0)
    );
    println!("Published sets:   {}", cache.publications());
    match cache.published_version() {
        Some(version) => println!("Draw version:     {}", version),
        None => println!("Draw version:     none"),
    }
    match first_frame {
        Some((frame, elapsed)) => println!("First tiles drawn: frame {} after {:?}", frame, elapsed),
        None => println!("First tiles drawn: never"),
    }
    Ok(())
}
