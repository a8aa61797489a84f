//! grid-frame-cache demo binary.
//!
//! `generate` writes a synthetic frame snapshot file; `run` drives the full
//! pipeline (ingest → compress → cache → retrieve → decompress) over
//! generated or loaded frames and prints the cache statistics as JSON.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::Parser;
use tracing::info;

use grid_frame_cache::cache::FrameCache;
use grid_frame_cache::codec::FrameCodec;
use grid_frame_cache::config::{CacheMode, Cli, Command, Config};
use grid_frame_cache::frame::FeaturePacket;
use grid_frame_cache::generator;
use grid_frame_cache::pool::MemoryPool;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "grid_frame_cache=debug"
    } else {
        "grid_frame_cache=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .init();

    info!("grid-frame-cache v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load(&cli.config)?;
    info!(
        block_size = config.codec.block_size,
        rate = config.codec.rate,
        lossless = config.codec.lossless,
        capacity = config.cache.capacity,
        "Configuration loaded"
    );

    match cli.command {
        Command::Generate { output } => {
            let frames = generator::generate_sequence(&config.generator, now_ns());
            generator::save_frames(&output, &frames)?;
            let bytes = frames
                .iter()
                .map(|f| f.grid.as_slice().len() * 4)
                .sum::<usize>();
            info!(
                frames = frames.len(),
                rows = config.generator.rows,
                cols = config.generator.cols,
                megabytes = bytes / (1024 * 1024),
                path = %output.display(),
                "Snapshot written"
            );
        }
        Command::Run { input } => {
            let frames = match input {
                Some(path) => {
                    info!(path = %path.display(), "Loading snapshot");
                    generator::load_frames(&path)?
                }
                None => generator::generate_sequence(&config.generator, now_ns()),
            };
            run_pipeline(&config, &frames)?;
        }
    }

    Ok(())
}

fn run_pipeline(config: &Config, frames: &[FeaturePacket]) -> anyhow::Result<()> {
    let codec = FrameCodec::new(config.codec)?;
    let pool = Arc::new(MemoryPool::new(config.pool)?);
    let cache = FrameCache::new(config.cache, config.codec.block_size, pool);

    let raw_bytes: usize = frames.iter().map(|f| f.grid.as_slice().len() * 4).sum();

    let stream = codec.compress(frames)?;
    info!(
        frames = frames.len(),
        raw_bytes,
        compressed_bytes = stream.len(),
        ratio = format!("{:.2}x", raw_bytes as f64 / stream.len() as f64),
        "Compressed"
    );

    match config.cache.mode {
        CacheMode::Tiles => {
            let inserted = cache.insert_packets(&stream)?;
            info!(tiles = inserted, "Inserted into tile cache");

            // Touch tile (0, 0) of every frame, oldest first.
            for frame in frames {
                cache.retrieve(frame.timestamp_ns, 0, 0);
            }
        }
        CacheMode::WholeGrid => {
            let decoded = codec.decompress(&stream)?;
            for frame in decoded {
                cache.put(frame.timestamp_ns, frame.grid);
            }
            for frame in frames {
                cache.get(frame.timestamp_ns);
            }
        }
    }

    let decoded = codec.decompress(&stream)?;
    info!(frames = decoded.len(), "Decompressed stream verified");

    let stats = cache.stats();
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
