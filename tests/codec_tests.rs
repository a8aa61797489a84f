//! Integration tests for the full compress/decompress path.

use grid_frame_cache::codec::frame::parse_stream;
use grid_frame_cache::codec::FrameCodec;
use grid_frame_cache::config::CodecConfig;
use grid_frame_cache::frame::{FeatureGrid, FeaturePacket, GridMeta, SensorContext};
use grid_frame_cache::generator::{self, FramePattern};

fn config(block_size: usize, rate: u32, lossless: bool) -> CodecConfig {
    CodecConfig {
        block_size,
        rate,
        lossless,
        zstd_level: 3,
    }
}

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
        .map(|i| ((i % 113) as f32 / 113.0) * 2.0 - 1.0)
        .collect();
    FeaturePacket {
        grid: FeatureGrid::from_data(meta, data).unwrap(),
        context: SensorContext::default(),
        timestamp_ns,
    }
}

#[test]
fn test_256x256_block16_yields_256_tiles() {
    let codec = FrameCodec::new(config(16, 8, false)).unwrap();
    let stream = codec.compress(&[packet(256, 256, 424242)]).unwrap();

    let parsed = parse_stream(&stream, 16).unwrap();
    assert_eq!(parsed.len(), 1);
    assert_eq!(parsed[0].tiles.len(), 256);

    let frames = codec.decompress(&stream).unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].timestamp_ns, 424242);
    assert_eq!(frames[0].grid.rows(), 256);
    assert_eq!(frames[0].grid.cols(), 256);
}

#[test]
fn test_lossless_roundtrip_generated_frames() {
    let codec = FrameCodec::new(config(16, 8, true)).unwrap();
    for pattern in [
        FramePattern::Random,
        FramePattern::RadialGradient,
        FramePattern::MovingObstacle,
        FramePattern::RoadGrid,
    ] {
        let original = generator::generate_frame(128, 96, pattern, 0.2, 555);
        let stream = codec.compress(std::slice::from_ref(&original)).unwrap();
        let frames = codec.decompress(&stream).unwrap();
        assert_eq!(
            frames[0].grid.as_slice(),
            original.grid.as_slice(),
            "{pattern:?} did not round-trip bit-exactly"
        );
    }
}

#[test]
fn test_lossy_error_shrinks_with_rate() {
    let original = generator::generate_frame(64, 64, FramePattern::RadialGradient, 0.3, 31337);

    let mut last_err = f32::INFINITY;
    for rate in [3u32, 6, 10, 14] {
        let codec = FrameCodec::new(config(16, rate, false)).unwrap();
        let stream = codec.compress(std::slice::from_ref(&original)).unwrap();
        let decoded = codec.decompress(&stream).unwrap();

        let err = original
            .grid
            .as_slice()
            .iter()
            .zip(decoded[0].grid.as_slice())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0f32, f32::max);
        assert!(err <= last_err, "rate {rate}: error {err} grew past {last_err}");
        last_err = err;
    }
}

#[test]
fn test_lossy_smaller_than_raw() {
    let codec = FrameCodec::new(config(16, 6, false)).unwrap();
    let original = packet(256, 256, 1);
    let stream = codec.compress(&[original]).unwrap();
    // 6 bits/value plus headers against 32 bits/value raw.
    assert!(stream.len() < 256 * 256 * 4 / 4);
}

#[test]
fn test_every_truncation_point_fails_cleanly() {
    let codec = FrameCodec::new(config(16, 8, false)).unwrap();
    let stream = codec.compress(&[packet(48, 48, 8)]).unwrap();

    for cut in 0..stream.len() {
        assert!(
            codec.decompress(&stream[..cut]).is_err(),
            "truncation at {cut} was accepted"
        );
    }
}

#[test]
fn test_non_multiple_grid_roundtrip() {
    let codec = FrameCodec::new(config(16, 8, true)).unwrap();
    let original = packet(250, 130, 2);
    let stream = codec.compress(std::slice::from_ref(&original)).unwrap();

    let parsed = parse_stream(&stream, 16).unwrap();
    assert_eq!(parsed[0].tiles.len(), 16 * 9); // ceil(250/16) * ceil(130/16)

    let frames = codec.decompress(&stream).unwrap();
    assert_eq!(frames[0].grid.as_slice(), original.grid.as_slice());
}

#[test]
fn test_stream_order_preserved() {
    let codec = FrameCodec::new(config(16, 8, false)).unwrap();
    let packets: Vec<FeaturePacket> = (0..10).map(|i| packet(32, 32, 100 + i)).collect();
    let stream = codec.compress(&packets).unwrap();
    let frames = codec.decompress(&stream).unwrap();
    let timestamps: Vec<u64> = frames.iter().map(|f| f.timestamp_ns).collect();
    assert_eq!(timestamps, (100..110).collect::<Vec<u64>>());
}
