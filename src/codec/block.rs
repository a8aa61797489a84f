//! Fixed-rate tile codec.
//!
//! Compresses one tile of f32 values at a time. Lossless mode stores the
//! raw little-endian bytes behind zstd and round-trips bit-exactly. Lossy
//! mode applies per-tile uniform scalar quantization at `rate` bits per
//! value: the payload carries the tile's value range followed by the packed
//! codes, so reconstruction error shrinks monotonically as `rate` grows.
//!
//! Payloads are not self-describing: tile dimensions and the codec
//! configuration must be carried by the framing layer.

use thiserror::Error;

use crate::config::{CodecConfig, ConfigError};

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("degenerate tile dimensions: {rows}x{cols}")]
    EmptyTile { rows: usize, cols: usize },

    #[error("tile buffer holds {len} values, expected {rows}x{cols}")]
    DimensionMismatch { len: usize, rows: usize, cols: usize },

    #[error("payload too short: {got} bytes, need {need}")]
    ShortPayload { got: usize, need: usize },

    #[error("compressed payload exceeds the tile header limit: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("grid of {rows}x{cols} does not fit the wire header")]
    GridTooLarge { rows: usize, cols: usize },

    #[error("codec backend: {0}")]
    Backend(#[from] std::io::Error),
}

/// Encodes and decodes single tiles under a fixed configuration.
///
/// Holds no mutable state; one instance may be shared across threads.
pub struct BlockCodec {
    config: CodecConfig,
}

impl BlockCodec {
    pub fn new(config: CodecConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Encode a row-major rows×cols tile into an opaque payload.
    pub fn encode(&self, values: &[f32], rows: usize, cols: usize) -> Result<Vec<u8>, CodecError> {
        if rows == 0 || cols == 0 {
            return Err(CodecError::EmptyTile { rows, cols });
        }
        if values.len() != rows * cols {
            return Err(CodecError::DimensionMismatch {
                len: values.len(),
                rows,
                cols,
            });
        }

        if self.config.lossless {
            self.encode_lossless(values)
        } else {
            Ok(self.encode_lossy(values))
        }
    }

    /// Decode a payload produced by [`encode`](Self::encode) with the same
    /// configuration and tile dimensions.
    pub fn decode(&self, payload: &[u8], rows: usize, cols: usize) -> Result<Vec<f32>, CodecError> {
        if rows == 0 || cols == 0 {
            return Err(CodecError::EmptyTile { rows, cols });
        }

        if self.config.lossless {
            self.decode_lossless(payload, rows * cols)
        } else {
            self.decode_lossy(payload, rows * cols)
        }
    }

    fn encode_lossless(&self, values: &[f32]) -> Result<Vec<u8>, CodecError> {
        let mut raw = Vec::with_capacity(values.len() * 4);
        for v in values {
            raw.extend_from_slice(&v.to_le_bytes());
        }
        let compressed = zstd::encode_all(raw.as_slice(), self.config.zstd_level)?;
        Ok(compressed)
    }

    fn decode_lossless(&self, payload: &[u8], count: usize) -> Result<Vec<f32>, CodecError> {
        let raw = zstd::decode_all(payload)?;
        if raw.len() != count * 4 {
            return Err(CodecError::ShortPayload {
                got: raw.len(),
                need: count * 4,
            });
        }
        let values = raw
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Ok(values)
    }

    fn encode_lossy(&self, values: &[f32]) -> Vec<u8> {
        let rate = self.config.rate;
        let max_code = max_code(rate);

        // Per-tile range; non-finite values are excluded from the range and
        // saturate to its ends.
        let mut lo = f32::INFINITY;
        let mut hi = f32::NEG_INFINITY;
        for &v in values {
            if v.is_finite() {
                lo = lo.min(v);
                hi = hi.max(v);
            }
        }
        if !lo.is_finite() || !hi.is_finite() {
            lo = 0.0;
            hi = 0.0;
        }

        let mut out = Vec::with_capacity(8 + (values.len() * rate as usize).div_ceil(8));
        out.extend_from_slice(&lo.to_le_bytes());
        out.extend_from_slice(&hi.to_le_bytes());

        let span = (hi - lo) as f64;
        let mut writer = BitWriter::new(out);
        for &v in values {
            let code = if span > 0.0 {
                let norm = ((v as f64 - lo as f64) / span).clamp(0.0, 1.0);
                (norm * max_code as f64).round() as u64
            } else {
                0
            };
            writer.push(code.min(max_code), rate);
        }
        writer.finish()
    }

    fn decode_lossy(&self, payload: &[u8], count: usize) -> Result<Vec<f32>, CodecError> {
        let rate = self.config.rate;
        let need = 8 + (count * rate as usize).div_ceil(8);
        if payload.len() < need {
            return Err(CodecError::ShortPayload {
                got: payload.len(),
                need,
            });
        }

        let lo = f32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let hi = f32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]);
        let span = (hi - lo) as f64;
        let max_code = max_code(rate);

        let mut reader = BitReader::new(&payload[8..]);
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            let code = reader.read(rate).ok_or(CodecError::ShortPayload {
                got: payload.len(),
                need,
            })?;
            let v = if max_code > 0 && span > 0.0 {
                lo as f64 + (code as f64 / max_code as f64) * span
            } else {
                lo as f64
            };
            values.push(v as f32);
        }
        Ok(values)
    }
}

fn max_code(rate: u32) -> u64 {
    if rate >= 64 {
        u64::MAX
    } else {
        (1u64 << rate) - 1
    }
}

/// LSB-first bit packer.
struct BitWriter {
    out: Vec<u8>,
    acc: u64,
    nbits: u32,
}

impl BitWriter {
    fn new(out: Vec<u8>) -> Self {
        Self {
            out,
            acc: 0,
            nbits: 0,
        }
    }

    fn push(&mut self, code: u64, bits: u32) {
        self.acc |= code << self.nbits;
        self.nbits += bits;
        while self.nbits >= 8 {
            self.out.push(self.acc as u8);
            self.acc >>= 8;
            self.nbits -= 8;
        }
    }

    fn finish(mut self) -> Vec<u8> {
        if self.nbits > 0 {
            self.out.push(self.acc as u8);
        }
        self.out
    }
}

/// LSB-first bit unpacker.
struct BitReader<'a> {
    buf: &'a [u8],
    pos: usize,
    acc: u64,
    nbits: u32,
}

impl<'a> BitReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            acc: 0,
            nbits: 0,
        }
    }

    fn read(&mut self, bits: u32) -> Option<u64> {
        while self.nbits < bits {
            let byte = *self.buf.get(self.pos)?;
            self.acc |= (byte as u64) << self.nbits;
            self.pos += 1;
            self.nbits += 8;
        }
        let mask = if bits >= 64 {
            u64::MAX
        } else {
            (1u64 << bits) - 1
        };
        let code = self.acc & mask;
        self.acc >>= bits;
        self.nbits -= bits;
        Some(code)
    }
}
