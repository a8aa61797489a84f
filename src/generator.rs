//! Synthetic frame generator and snapshot file I/O.
//!
//! Produces test frames for benchmarks and the demo pipeline. Not part of
//! the hot path; the snapshot layout below is a simple benchmarking format,
//! unrelated to the compressed wire format.
//!
//! Snapshot layout (little-endian):
//!
//! ```text
//! File  := frame_count:u32, Frame{frame_count}
//! Frame := timestamp:u64, ego_speed:f32, health:u8, ego_pose:f32[3],
//!          rows:u32, cols:u32, value_min:f32, value_max:f32,
//!          channel:u8, is_normalized:u8, values:f32[rows*cols]
//! ```

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use anyhow::Context;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::codec::cursor::Cursor;
use crate::config::GeneratorConfig;
use crate::frame::{FeatureGrid, FeaturePacket, GridMeta, SensorContext, SensorHealth};

const NS_TO_S_RATE: f32 = 1e-8;
const ROTATION_RATE: f32 = 1e-10;

/// Fill pattern for generated frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FramePattern {
    /// Uniform noise in [-1, 1].
    Random,
    /// Intensity falling off with distance from the grid center.
    RadialGradient,
    /// A bright square obstacle whose position tracks the timestamp.
    MovingObstacle,
    /// Bright grid lines every min(rows, cols)/16 cells.
    RoadGrid,
}

fn range_meta(rows: usize, cols: usize, value_min: f32, value_max: f32) -> GridMeta {
    GridMeta {
        rows,
        cols,
        value_min,
        value_max,
        channel: 0,
        is_normalized: false,
    }
}

/// Generate one frame. Deterministic for a given (pattern, timestamp) pair.
pub fn generate_frame(
    rows: usize,
    cols: usize,
    pattern: FramePattern,
    noise_level: f32,
    timestamp_ns: u64,
) -> FeaturePacket {
    let mut rng = StdRng::seed_from_u64(timestamp_ns);

    let (mut meta, mut data) = match pattern {
        FramePattern::Random => {
            let data: Vec<f32> = (0..rows * cols).map(|_| rng.gen_range(-1.0..=1.0)).collect();
            (range_meta(rows, cols, -1.0, 1.0), data)
        }
        FramePattern::RadialGradient => {
            let diag = ((rows * rows + cols * cols) as f32).sqrt();
            let mut data = vec![0.0f32; rows * cols];
            for r in 0..rows {
                for c in 0..cols {
                    let dr = r as f32 - rows as f32 / 2.0;
                    let dc = c as f32 - cols as f32 / 2.0;
                    let norm = (dr * dr + dc * dc).sqrt() / diag * 2.0;
                    data[r * cols + c] = (1.0 - norm).max(0.0);
                }
            }
            (range_meta(rows, cols, 0.0, 1.0), data)
        }
        FramePattern::MovingObstacle => {
            let size = rows.min(cols) / 10;
            let cx = (cols / 2 + (timestamp_ns as usize / 10 % 20) * cols / 20).min(cols - 1);
            let cy = (rows / 2 + (timestamp_ns as usize / 5 % 10) * rows / 10).min(rows - 1);
            let mut data = vec![0.0f32; rows * cols];
            for r in cy.saturating_sub(size)..(cy + size).min(rows) {
                for c in cx.saturating_sub(size)..(cx + size).min(cols) {
                    data[r * cols + c] = 1.0;
                }
            }
            (range_meta(rows, cols, 0.0, 1.0), data)
        }
        FramePattern::RoadGrid => {
            let spacing = (rows.min(cols) / 16).max(1);
            let mut data = vec![0.0f32; rows * cols];
            for r in 0..rows {
                for c in 0..cols {
                    if r % spacing == 0 || c % spacing == 0 {
                        data[r * cols + c] = 0.8;
                    }
                }
            }
            (range_meta(rows, cols, 0.0, 1.0), data)
        }
    };

    if noise_level > 0.0 {
        for v in &mut data {
            *v = (*v + rng.gen_range(-noise_level..=noise_level))
                .clamp(meta.value_min, meta.value_max);
        }
    }
    meta.is_normalized = true;

    FeaturePacket {
        grid: FeatureGrid::from_data(meta, data).expect("generated data matches meta"),
        context: SensorContext {
            ego_speed: 15.0 + (timestamp_ns as f64).sin() as f32 * 5.0,
            health: SensorHealth::Normal,
            ego_pose: [
                timestamp_ns as f32 * NS_TO_S_RATE,
                timestamp_ns as f32 * NS_TO_S_RATE,
                timestamp_ns as f32 * ROTATION_RATE,
            ],
        },
        timestamp_ns,
    }
}

/// Generate a frame sequence spaced at 25 fps starting from `base_ns`.
pub fn generate_sequence(config: &GeneratorConfig, base_ns: u64) -> Vec<FeaturePacket> {
    const FRAME_INTERVAL_NS: u64 = 1_000_000_000 / 25;
    (0..config.frames)
        .map(|i| {
            generate_frame(
                config.rows,
                config.cols,
                config.pattern,
                config.noise_level,
                base_ns + i as u64 * FRAME_INTERVAL_NS,
            )
        })
        .collect()
}

/// Write frames to a snapshot file, creating parent directories as needed.
pub fn save_frames(path: &Path, packets: &[FeaturePacket]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }

    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut w = BufWriter::new(file);

    w.write_all(&(packets.len() as u32).to_le_bytes())?;
    for packet in packets {
        let meta = packet.grid.meta();
        w.write_all(&packet.timestamp_ns.to_le_bytes())?;
        w.write_all(&packet.context.ego_speed.to_le_bytes())?;
        w.write_all(&[packet.context.health.to_u8()])?;
        for p in packet.context.ego_pose {
            w.write_all(&p.to_le_bytes())?;
        }
        w.write_all(&(meta.rows as u32).to_le_bytes())?;
        w.write_all(&(meta.cols as u32).to_le_bytes())?;
        w.write_all(&meta.value_min.to_le_bytes())?;
        w.write_all(&meta.value_max.to_le_bytes())?;
        w.write_all(&[meta.channel, meta.is_normalized as u8])?;
        for v in packet.grid.as_slice() {
            w.write_all(&v.to_le_bytes())?;
        }
    }
    w.flush()?;
    Ok(())
}

/// Read frames back from a snapshot file.
pub fn load_frames(path: &Path) -> anyhow::Result<Vec<FeaturePacket>> {
    let mut bytes = Vec::new();
    File::open(path)
        .with_context(|| format!("opening {}", path.display()))?
        .read_to_end(&mut bytes)?;

    let mut cur = Cursor::new(&bytes);
    let count = cur.read_u32().context("snapshot header")?;

    let mut packets = Vec::with_capacity(count as usize);
    for i in 0..count {
        packets.push(read_frame(&mut cur).with_context(|| format!("snapshot frame {i}"))?);
    }
    Ok(packets)
}

fn read_frame(cur: &mut Cursor<'_>) -> Result<FeaturePacket, crate::codec::cursor::FormatError> {
    let timestamp_ns = cur.read_u64()?;
    let ego_speed = cur.read_f32()?;
    let health = SensorHealth::from_u8(cur.read_u8()?);
    let ego_pose = [cur.read_f32()?, cur.read_f32()?, cur.read_f32()?];
    let rows = cur.read_u32()? as usize;
    let cols = cur.read_u32()? as usize;
    let value_min = cur.read_f32()?;
    let value_max = cur.read_f32()?;
    let channel = cur.read_u8()?;
    let is_normalized = cur.read_u8()? != 0;

    let mut data = Vec::with_capacity(rows * cols);
    for _ in 0..rows * cols {
        data.push(cur.read_f32()?);
    }

    let meta = GridMeta {
        rows,
        cols,
        value_min,
        value_max,
        channel,
        is_normalized,
    };
    Ok(FeaturePacket {
        grid: FeatureGrid::from_data(meta, data).expect("data length derived from meta"),
        context: SensorContext {
            ego_speed,
            health,
            ego_pose,
        },
        timestamp_ns,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_frame_shape_and_range() {
        for pattern in [
            FramePattern::Random,
            FramePattern::RadialGradient,
            FramePattern::MovingObstacle,
            FramePattern::RoadGrid,
        ] {
            let packet = generate_frame(32, 48, pattern, 0.1, 42);
            let meta = packet.grid.meta();
            assert_eq!((meta.rows, meta.cols), (32, 48));
            for &v in packet.grid.as_slice() {
                assert!(
                    v >= meta.value_min && v <= meta.value_max,
                    "{pattern:?}: {v} outside [{}, {}]",
                    meta.value_min,
                    meta.value_max
                );
            }
        }
    }

    #[test]
    fn test_deterministic_for_timestamp() {
        let a = generate_frame(16, 16, FramePattern::Random, 0.2, 1234);
        let b = generate_frame(16, 16, FramePattern::Random, 0.2, 1234);
        assert_eq!(a.grid.as_slice(), b.grid.as_slice());
    }

    #[test]
    fn test_sequence_timestamps_monotonic() {
        let cfg = GeneratorConfig {
            frames: 5,
            rows: 8,
            cols: 8,
            pattern: FramePattern::RoadGrid,
            noise_level: 0.0,
        };
        let seq = generate_sequence(&cfg, 1_000);
        assert_eq!(seq.len(), 5);
        for pair in seq.windows(2) {
            assert!(pair[0].timestamp_ns < pair[1].timestamp_ns);
        }
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frames.bin");

        let cfg = GeneratorConfig {
            frames: 3,
            rows: 16,
            cols: 24,
            pattern: FramePattern::RadialGradient,
            noise_level: 0.05,
        };
        let frames = generate_sequence(&cfg, 10_000);

        save_frames(&path, &frames).unwrap();
        let loaded = load_frames(&path).unwrap();
        assert_eq!(loaded, frames);
    }

    #[test]
    fn test_truncated_snapshot_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frames.bin");

        let frames = vec![generate_frame(8, 8, FramePattern::Random, 0.0, 7)];
        save_frames(&path, &frames).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 10]).unwrap();
        assert!(load_frames(&path).is_err());
    }
}
