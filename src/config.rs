//! Runtime configuration for grid-frame-cache.
//!
//! Configuration can be loaded from a JSON file or constructed
//! programmatically. All codec, cache and pool knobs live here; producer and
//! consumer must agree on the codec section, since tile payloads are not
//! self-describing.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::generator::FramePattern;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("block_size must be at least 1")]
    ZeroBlockSize,

    #[error("rate must be between 1 and 32 bits per value, got {0}")]
    InvalidRate(u32),

    #[error("cache capacity must be at least 1")]
    ZeroCapacity,

    #[error("pool slot_bytes and chunk_slots must be at least 1")]
    ZeroPoolSize,
}

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "grid-frame-cache",
    about = "Block-wise compression and LRU caching for sensor feature frames"
)]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Generate a synthetic frame snapshot file.
    Generate {
        /// Output snapshot path.
        #[arg(short, long, default_value = "frames.bin")]
        output: PathBuf,
    },
    /// Run the compress → cache → retrieve → decompress pipeline and print
    /// cache statistics as JSON.
    Run {
        /// Optional snapshot file to ingest instead of generated frames.
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
}

/// Which granularity the cache stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheMode {
    /// Independent compressed tiles keyed by (timestamp, tile x, tile y).
    /// Capacity counts tiles.
    Tiles,
    /// Whole decompressed grids keyed by timestamp. Capacity counts frames.
    WholeGrid,
}

/// Codec settings, shared between producer and consumer.
///
/// Tile payloads are not self-describing: a consumer must decode with the
/// same `block_size`, `rate` and `lossless` used at encode time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CodecConfig {
    /// Tile edge length; grids are partitioned into block_size × block_size
    /// tiles, edge tiles clipped to the remaining extent.
    pub block_size: usize,

    /// Bits-per-value budget for lossy tiles (1-32).
    pub rate: u32,

    /// Lossless mode: bit-exact round trip, zstd-backed.
    pub lossless: bool,

    /// zstd compression level for lossless payloads (1-22).
    pub zstd_level: i32,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            block_size: 16,
            rate: 6,
            lossless: false,
            zstd_level: 3,
        }
    }
}

impl CodecConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.block_size == 0 {
            return Err(ConfigError::ZeroBlockSize);
        }
        if self.rate == 0 || self.rate > 32 {
            return Err(ConfigError::InvalidRate(self.rate));
        }
        Ok(())
    }
}

/// Cache sizing and mode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum resident entries (tiles or frames depending on mode).
    pub capacity: usize,

    /// Store granularity. A deployment picks one mode per store.
    pub mode: CacheMode,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            mode: CacheMode::Tiles,
        }
    }
}

/// Memory pool sizing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Payload capacity of one slot in bytes. Requests above this bypass
    /// the pool and use the default allocator.
    pub slot_bytes: usize,

    /// Slots per arena chunk; also the growth increment when the free
    /// stack runs dry.
    pub chunk_slots: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            // A 16×16 f32 tile is 1 KiB raw; compressed payloads fit well
            // within one slot.
            slot_bytes: 1024,
            chunk_slots: 1024,
        }
    }
}

/// Synthetic frame generator settings (bench/test input, off the hot path).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GeneratorConfig {
    pub frames: usize,
    pub rows: usize,
    pub cols: usize,
    pub pattern: FramePattern,
    pub noise_level: f32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            frames: 50,
            rows: 256,
            cols: 256,
            pattern: FramePattern::Random,
            noise_level: 0.2,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub codec: CodecConfig,
    pub cache: CacheConfig,
    pub pool: PoolConfig,
    pub generator: GeneratorConfig,
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults when
    /// the file does not exist.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            config.validate()?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.codec.validate()?;
        if self.cache.capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.pool.slot_bytes == 0 || self.pool.chunk_slots == 0 {
            return Err(ConfigError::ZeroPoolSize);
        }
        Ok(())
    }
}
