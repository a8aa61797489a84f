//! grid-frame-cache: block-wise compression and bounded LRU caching for
//! streamed grid-shaped sensor feature frames.
//!
//! The pipeline: a producer hands [`frame::FeaturePacket`]s to
//! [`codec::frame::FrameCodec::compress`], which partitions each grid into
//! fixed-size tiles and frames them into a compact byte stream. The stream
//! feeds [`cache::FrameCache::insert_packets`], which parses it into
//! independent tile entries whose payloads live in [`pool::MemoryPool`]
//! slots. Consumers retrieve tiles (or whole cached grids in the alternate
//! mode) and decompress with the same codec configuration.
//!
//! Single-process, shared-memory, no persistence beyond the process
//! lifetime.

pub mod cache;
pub mod codec;
pub mod config;
pub mod frame;
pub mod generator;
pub mod pool;
