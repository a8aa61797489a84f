//! Compression and framing codec.
//!
//! - [`block`]: fixed-rate tile codec (lossless zstd / lossy quantization)
//! - [`frame`]: tile partitioning and multi-packet stream framing
//! - [`cursor`]: bounds-checked reads over compressed byte streams

pub mod block;
pub mod cursor;
pub mod frame;

pub use block::{BlockCodec, CodecError};
pub use cursor::{Cursor, FormatError};
pub use frame::{CompressedPacket, CompressedTile, DecodedFrame, FrameCodec};
