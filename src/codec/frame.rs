//! Stream framing: partitions grids into tiles and frames them on the wire.
//!
//! Wire format, all integers little-endian:
//!
//! ```text
//! Stream  := packet_count:u32, Packet{packet_count}
//! Packet  := timestamp:u64, grid_rows:u16, grid_cols:u16,
//!            tile_count:u16, Tile{tile_count}
//! Tile    := row_offset:u16, col_offset:u16, tile_rows:u16,
//!            payload_size:u16, payload:u8[payload_size]
//! ```
//!
//! `tile_cols` is never stored; it is derived as
//! `min(block_size, grid_cols - col_offset)`. `block_size`, `rate` and
//! `lossless` are out-of-band configuration that producer and consumer must
//! agree on.

use tracing::debug;

use crate::codec::block::{BlockCodec, CodecError};
use crate::codec::cursor::{Cursor, FormatError};
use crate::config::{CodecConfig, ConfigError};
use crate::frame::{FeatureGrid, FeaturePacket, GridMeta};

/// One parsed tile, borrowing its payload from the stream buffer.
#[derive(Debug, Clone, Copy)]
pub struct CompressedTile<'a> {
    pub row_offset: u16,
    pub col_offset: u16,
    pub tile_rows: u16,
    /// Derived from `block_size` and the packet's `grid_cols`; not on the wire.
    pub tile_cols: u16,
    pub payload: &'a [u8],
}

/// One parsed packet: a timestamp plus its tile list.
#[derive(Debug, Clone)]
pub struct CompressedPacket<'a> {
    pub timestamp_ns: u64,
    pub grid_rows: u16,
    pub grid_cols: u16,
    pub tiles: Vec<CompressedTile<'a>>,
}

/// A reconstructed packet. Sensor context and value-range metadata are not
/// on the wire; the grid's value range is folded from the decoded data.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    pub timestamp_ns: u64,
    pub grid: FeatureGrid,
}

/// Parse a compressed stream into packets without decoding tile payloads.
///
/// Every field is bounds-checked; tile geometry is validated against the
/// packet's declared grid dimensions. Fail-fast: the first malformed field
/// aborts the whole parse.
pub fn parse_stream(bytes: &[u8], block_size: usize) -> Result<Vec<CompressedPacket<'_>>, FormatError> {
    let mut cur = Cursor::new(bytes);
    let packet_count = cur.read_u32()?;

    let mut packets = Vec::with_capacity(packet_count as usize);
    for _ in 0..packet_count {
        let timestamp_ns = cur.read_u64()?;
        let grid_rows = cur.read_u16()?;
        let grid_cols = cur.read_u16()?;
        if grid_rows == 0 || grid_cols == 0 {
            return Err(FormatError::Malformed(format!(
                "packet declares a {grid_rows}x{grid_cols} grid"
            )));
        }
        let tile_count = cur.read_u16()?;

        let mut tiles = Vec::with_capacity(tile_count as usize);
        for _ in 0..tile_count {
            let row_offset = cur.read_u16()?;
            let col_offset = cur.read_u16()?;
            let tile_rows = cur.read_u16()?;
            let payload_size = cur.read_u16()?;
            let payload = cur.read_bytes(payload_size as usize)?;

            if row_offset >= grid_rows || col_offset >= grid_cols {
                return Err(FormatError::Malformed(format!(
                    "tile offset ({row_offset},{col_offset}) outside {grid_rows}x{grid_cols} grid"
                )));
            }
            if tile_rows == 0 || row_offset as usize + tile_rows as usize > grid_rows as usize {
                return Err(FormatError::Malformed(format!(
                    "tile at row {row_offset} spans {tile_rows} rows past the grid"
                )));
            }

            let tile_cols = block_size.min(grid_cols as usize - col_offset as usize) as u16;
            tiles.push(CompressedTile {
                row_offset,
                col_offset,
                tile_rows,
                tile_cols,
                payload,
            });
        }

        packets.push(CompressedPacket {
            timestamp_ns,
            grid_rows,
            grid_cols,
            tiles,
        });
    }

    if cur.remaining() > 0 {
        return Err(FormatError::TrailingBytes(cur.remaining()));
    }
    Ok(packets)
}

/// Compresses packets into a multi-packet stream and reconstructs them.
///
/// Immutable after construction; shareable across threads.
pub struct FrameCodec {
    config: CodecConfig,
    block: BlockCodec,
}

impl FrameCodec {
    pub fn new(config: CodecConfig) -> Result<Self, ConfigError> {
        let block = BlockCodec::new(config)?;
        Ok(Self { config, block })
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Compress a sequence of packets into one stream.
    ///
    /// Each grid is partitioned into row-major `block_size × block_size`
    /// tiles, the final row/column tiles clipped to the remaining extent.
    pub fn compress(&self, packets: &[FeaturePacket]) -> Result<Vec<u8>, CodecError> {
        let bs = self.config.block_size;
        let mut out = Vec::new();
        out.extend_from_slice(&(packets.len() as u32).to_le_bytes());

        let mut tile_buf = Vec::new();
        for packet in packets {
            let grid = &packet.grid;
            let (rows, cols) = (grid.rows(), grid.cols());
            if rows > u16::MAX as usize || cols > u16::MAX as usize {
                return Err(CodecError::GridTooLarge { rows, cols });
            }

            let tile_count = rows.div_ceil(bs) * cols.div_ceil(bs);
            if tile_count > u16::MAX as usize {
                return Err(CodecError::GridTooLarge { rows, cols });
            }

            out.extend_from_slice(&packet.timestamp_ns.to_le_bytes());
            out.extend_from_slice(&(rows as u16).to_le_bytes());
            out.extend_from_slice(&(cols as u16).to_le_bytes());
            out.extend_from_slice(&(tile_count as u16).to_le_bytes());

            for row_offset in (0..rows).step_by(bs) {
                for col_offset in (0..cols).step_by(bs) {
                    let tile_rows = bs.min(rows - row_offset);
                    let tile_cols = bs.min(cols - col_offset);
                    grid.copy_tile(row_offset, col_offset, tile_rows, tile_cols, &mut tile_buf);

                    let payload = self.block.encode(&tile_buf, tile_rows, tile_cols)?;
                    if payload.len() > u16::MAX as usize {
                        return Err(CodecError::PayloadTooLarge(payload.len()));
                    }

                    out.extend_from_slice(&(row_offset as u16).to_le_bytes());
                    out.extend_from_slice(&(col_offset as u16).to_le_bytes());
                    out.extend_from_slice(&(tile_rows as u16).to_le_bytes());
                    out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
                    out.extend_from_slice(&payload);
                }
            }

            debug!(
                timestamp = packet.timestamp_ns,
                rows, cols, tile_count, "Compressed packet"
            );
        }

        Ok(out)
    }

    /// Reconstruct packets from a compressed stream.
    ///
    /// Fail-fast: a truncated or malformed stream aborts the whole call; no
    /// partial packets are returned.
    pub fn decompress(&self, bytes: &[u8]) -> Result<Vec<DecodedFrame>, FormatError> {
        let packets = parse_stream(bytes, self.config.block_size)?;

        let mut frames = Vec::with_capacity(packets.len());
        for packet in packets {
            let rows = packet.grid_rows as usize;
            let cols = packet.grid_cols as usize;
            let mut grid = FeatureGrid::zeros(GridMeta {
                rows,
                cols,
                value_min: 0.0,
                value_max: 0.0,
                channel: 0,
                is_normalized: false,
            });

            for tile in &packet.tiles {
                let values =
                    self.block
                        .decode(tile.payload, tile.tile_rows as usize, tile.tile_cols as usize)?;
                grid.write_tile(
                    tile.row_offset as usize,
                    tile.col_offset as usize,
                    tile.tile_rows as usize,
                    tile.tile_cols as usize,
                    &values,
                );
            }

            // Fold the reconstructed value range back into the metadata.
            let (mut lo, mut hi) = (f32::INFINITY, f32::NEG_INFINITY);
            for &v in grid.as_slice() {
                lo = lo.min(v);
                hi = hi.max(v);
            }
            grid.set_value_range(lo, hi);

            frames.push(DecodedFrame {
                timestamp_ns: packet.timestamp_ns,
                grid,
            });
        }

        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::SensorContext;

    fn packet(rows: usize, cols: usize, timestamp_ns: u64) -> FeaturePacket {
        let meta = GridMeta {
            rows,
            cols,
            value_min: -1.0,
            value_max: 1.0,
            channel: 0,
            is_normalized: true,
        };
        let data: Vec<f32> = (0..rows * cols)
            .map(|i| ((i % 97) as f32 / 97.0) * 2.0 - 1.0)
            .collect();
        FeaturePacket {
            grid: FeatureGrid::from_data(meta, data).unwrap(),
            context: SensorContext::default(),
            timestamp_ns,
        }
    }

    fn codec(block_size: usize, lossless: bool) -> FrameCodec {
        FrameCodec::new(CodecConfig {
            block_size,
            rate: 8,
            lossless,
            zstd_level: 3,
        })
        .unwrap()
    }

    #[test]
    fn test_tile_count_256x256_block16() {
        let codec = codec(16, true);
        let stream = codec.compress(&[packet(256, 256, 77)]).unwrap();

        let parsed = parse_stream(&stream, 16).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].timestamp_ns, 77);
        assert_eq!(parsed[0].tiles.len(), 256);

        let frames = codec.decompress(&stream).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].timestamp_ns, 77);
    }

    #[test]
    fn test_lossless_roundtrip() {
        let codec = codec(16, true);
        let original = packet(64, 64, 1);
        let stream = codec.compress(std::slice::from_ref(&original)).unwrap();
        let frames = codec.decompress(&stream).unwrap();
        assert_eq!(frames[0].grid.as_slice(), original.grid.as_slice());
    }

    #[test]
    fn test_clipped_edge_tiles() {
        // 20x35 with block 16: rows split 16+4, cols split 16+16+3.
        let codec = codec(16, true);
        let original = packet(20, 35, 5);
        let stream = codec.compress(std::slice::from_ref(&original)).unwrap();

        let parsed = parse_stream(&stream, 16).unwrap();
        assert_eq!(parsed[0].tiles.len(), 2 * 3);
        let edge = parsed[0]
            .tiles
            .iter()
            .find(|t| t.row_offset == 16 && t.col_offset == 32)
            .unwrap();
        assert_eq!(edge.tile_rows, 4);
        assert_eq!(edge.tile_cols, 3);

        let frames = codec.decompress(&stream).unwrap();
        assert_eq!(frames[0].grid.as_slice(), original.grid.as_slice());
    }

    #[test]
    fn test_tile_coverage_exact_partition() {
        let codec = codec(16, true);
        for (rows, cols) in [(256usize, 256usize), (100, 60), (16, 16), (17, 1)] {
            let stream = codec.compress(&[packet(rows, cols, 0)]).unwrap();
            let parsed = parse_stream(&stream, 16).unwrap();
            let expected = rows.div_ceil(16) * cols.div_ceil(16);
            assert_eq!(parsed[0].tiles.len(), expected);

            // Exactly one covering tile per cell.
            let mut covered = vec![0u8; rows * cols];
            for t in &parsed[0].tiles {
                for r in t.row_offset as usize..t.row_offset as usize + t.tile_rows as usize {
                    for c in t.col_offset as usize..t.col_offset as usize + t.tile_cols as usize {
                        covered[r * cols + c] += 1;
                    }
                }
            }
            assert!(covered.iter().all(|&n| n == 1), "{rows}x{cols} not partitioned");
        }
    }

    #[test]
    fn test_multi_packet_stream() {
        let codec = codec(16, false);
        let packets = vec![packet(32, 32, 10), packet(32, 32, 20), packet(48, 16, 30)];
        let stream = codec.compress(&packets).unwrap();
        let frames = codec.decompress(&stream).unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(
            frames.iter().map(|f| f.timestamp_ns).collect::<Vec<_>>(),
            vec![10, 20, 30]
        );
    }

    #[test]
    fn test_truncated_stream_fails() {
        let codec = codec(16, true);
        let stream = codec.compress(&[packet(32, 32, 1)]).unwrap();
        for cut in [stream.len() - 1, stream.len() / 2, 3, 10] {
            assert!(codec.decompress(&stream[..cut]).is_err(), "cut at {cut}");
        }
    }

    #[test]
    fn test_trailing_bytes_fail() {
        let codec = codec(16, true);
        let mut stream = codec.compress(&[packet(32, 32, 1)]).unwrap();
        stream.push(0);
        assert!(matches!(
            codec.decompress(&stream),
            Err(FormatError::TrailingBytes(1))
        ));
    }

    #[test]
    fn test_out_of_grid_tile_fails() {
        // Hand-build a stream whose single tile sits outside the grid.
        let mut stream = Vec::new();
        stream.extend_from_slice(&1u32.to_le_bytes());
        stream.extend_from_slice(&9u64.to_le_bytes());
        stream.extend_from_slice(&16u16.to_le_bytes()); // grid_rows
        stream.extend_from_slice(&16u16.to_le_bytes()); // grid_cols
        stream.extend_from_slice(&1u16.to_le_bytes()); // tile_count
        stream.extend_from_slice(&32u16.to_le_bytes()); // row_offset past grid
        stream.extend_from_slice(&0u16.to_le_bytes());
        stream.extend_from_slice(&16u16.to_le_bytes());
        stream.extend_from_slice(&0u16.to_le_bytes());
        assert!(matches!(
            parse_stream(&stream, 16),
            Err(FormatError::Malformed(_))
        ));
    }

    #[test]
    fn test_empty_stream() {
        let codec = codec(16, true);
        let stream = codec.compress(&[]).unwrap();
        assert_eq!(stream.len(), 4);
        assert!(codec.decompress(&stream).unwrap().is_empty());
    }
}
