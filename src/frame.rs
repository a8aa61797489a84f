//! Feature frame data model.
//!
//! A feature frame is a dense 2D float map produced by an upstream sensor
//! pipeline, together with the metadata the codec needs (value range,
//! normalization) and the sensor context the cache may consult.

use serde::{Deserialize, Serialize};

/// Health state of the producing sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorHealth {
    /// Sensor operating normally.
    Normal,
    /// Sensor degraded (reduced confidence).
    Degraded,
    /// Sensor faulted.
    Fault,
}

impl SensorHealth {
    /// Stable u8 encoding used by the snapshot file format.
    pub fn to_u8(self) -> u8 {
        match self {
            SensorHealth::Normal => 0,
            SensorHealth::Degraded => 1,
            SensorHealth::Fault => 2,
        }
    }

    /// Decode from the snapshot encoding. Unknown values map to `Fault`.
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => SensorHealth::Normal,
            1 => SensorHealth::Degraded,
            _ => SensorHealth::Fault,
        }
    }
}

impl std::fmt::Display for SensorHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorHealth::Normal => write!(f, "NORMAL"),
            SensorHealth::Degraded => write!(f, "DEGRADED"),
            SensorHealth::Fault => write!(f, "FAULT"),
        }
    }
}

/// Metadata describing a feature grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridMeta {
    /// Number of rows.
    pub rows: usize,

    /// Number of columns.
    pub cols: usize,

    /// Minimum expected feature value (quantization range lower bound).
    pub value_min: f32,

    /// Maximum expected feature value (quantization range upper bound).
    pub value_max: f32,

    /// Feature channel index (0 for single-channel).
    pub channel: u8,

    /// Whether the values are already normalized into the value range.
    pub is_normalized: bool,
}

/// Ego-vehicle / sensor context attached to each frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorContext {
    /// Ego speed in m/s.
    pub ego_speed: f32,

    /// Sensor health at capture time.
    pub health: SensorHealth,

    /// Ego pose as (x, y, yaw).
    pub ego_pose: [f32; 3],
}

impl Default for SensorContext {
    fn default() -> Self {
        Self {
            ego_speed: 0.0,
            health: SensorHealth::Normal,
            ego_pose: [0.0; 3],
        }
    }
}

/// A dense rows×cols f32 feature map, stored row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureGrid {
    meta: GridMeta,
    data: Vec<f32>,
}

impl FeatureGrid {
    /// Create a zero-filled grid with the given metadata.
    pub fn zeros(meta: GridMeta) -> Self {
        Self {
            data: vec![0.0; meta.rows * meta.cols],
            meta,
        }
    }

    /// Create a grid from row-major data.
    ///
    /// Returns `None` if `data.len() != meta.rows * meta.cols`.
    pub fn from_data(meta: GridMeta, data: Vec<f32>) -> Option<Self> {
        if data.len() != meta.rows * meta.cols {
            return None;
        }
        Some(Self { meta, data })
    }

    pub fn meta(&self) -> &GridMeta {
        &self.meta
    }

    pub fn rows(&self) -> usize {
        self.meta.rows
    }

    pub fn cols(&self) -> usize {
        self.meta.cols
    }

    /// Value at (row, col). Panics on out-of-range indices.
    pub fn get(&self, row: usize, col: usize) -> f32 {
        debug_assert!(row < self.meta.rows && col < self.meta.cols);
        self.data[row * self.meta.cols + col]
    }

    /// Set the value at (row, col). Panics on out-of-range indices.
    pub fn set(&mut self, row: usize, col: usize, value: f32) {
        debug_assert!(row < self.meta.rows && col < self.meta.cols);
        self.data[row * self.meta.cols + col] = value;
    }

    /// Overwrite the declared value range.
    pub fn set_value_range(&mut self, value_min: f32, value_max: f32) {
        self.meta.value_min = value_min;
        self.meta.value_max = value_max;
    }

    /// Row-major view of all values.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Mutable row-major view of all values.
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Copy the tile starting at (row_offset, col_offset) with extent
    /// tile_rows×tile_cols into a contiguous row-major buffer.
    pub fn copy_tile(
        &self,
        row_offset: usize,
        col_offset: usize,
        tile_rows: usize,
        tile_cols: usize,
        out: &mut Vec<f32>,
    ) {
        out.clear();
        out.reserve(tile_rows * tile_cols);
        for r in row_offset..row_offset + tile_rows {
            let start = r * self.meta.cols + col_offset;
            out.extend_from_slice(&self.data[start..start + tile_cols]);
        }
    }

    /// Scatter a contiguous row-major tile buffer back into place.
    pub fn write_tile(
        &mut self,
        row_offset: usize,
        col_offset: usize,
        tile_rows: usize,
        tile_cols: usize,
        values: &[f32],
    ) {
        debug_assert_eq!(values.len(), tile_rows * tile_cols);
        for (tr, row) in values.chunks(tile_cols).enumerate() {
            let start = (row_offset + tr) * self.meta.cols + col_offset;
            self.data[start..start + tile_cols].copy_from_slice(row);
        }
    }
}

/// One timestamped frame: grid + sensor context.
///
/// The timestamp is the primary ordering and cache key. The producer does
/// not guarantee uniqueness; the cache treats a duplicate as an overwrite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeaturePacket {
    /// The feature grid and its metadata.
    pub grid: FeatureGrid,

    /// Sensor context at capture time.
    pub context: SensorContext,

    /// Nanosecond Unix timestamp.
    pub timestamp_ns: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(rows: usize, cols: usize) -> GridMeta {
        GridMeta {
            rows,
            cols,
            value_min: -1.0,
            value_max: 1.0,
            channel: 0,
            is_normalized: true,
        }
    }

    #[test]
    fn test_grid_indexing() {
        let mut grid = FeatureGrid::zeros(meta(4, 6));
        grid.set(2, 5, 0.75);
        assert_eq!(grid.get(2, 5), 0.75);
        assert_eq!(grid.as_slice()[2 * 6 + 5], 0.75);
    }

    #[test]
    fn test_from_data_length_check() {
        assert!(FeatureGrid::from_data(meta(2, 3), vec![0.0; 6]).is_some());
        assert!(FeatureGrid::from_data(meta(2, 3), vec![0.0; 5]).is_none());
    }

    #[test]
    fn test_tile_copy_roundtrip() {
        let m = meta(4, 4);
        let data: Vec<f32> = (0..16).map(|v| v as f32).collect();
        let grid = FeatureGrid::from_data(m, data).unwrap();

        let mut tile = Vec::new();
        grid.copy_tile(1, 2, 2, 2, &mut tile);
        assert_eq!(tile, vec![6.0, 7.0, 10.0, 11.0]);

        let mut dest = FeatureGrid::zeros(m);
        dest.write_tile(1, 2, 2, 2, &tile);
        assert_eq!(dest.get(1, 2), 6.0);
        assert_eq!(dest.get(2, 3), 11.0);
        assert_eq!(dest.get(0, 0), 0.0);
    }

    #[test]
    fn test_health_encoding() {
        for h in [SensorHealth::Normal, SensorHealth::Degraded, SensorHealth::Fault] {
            assert_eq!(SensorHealth::from_u8(h.to_u8()), h);
        }
        assert_eq!(SensorHealth::from_u8(9), SensorHealth::Fault);
    }
}
