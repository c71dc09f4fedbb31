//! Sensor SDK seam.
//!
//! The server never talks to sensors directly: it opens a [`SensorSource`]
//! through a [`SensorSdk`] and keeps that handle inside a device session.
//! A handle is released exactly once, either by [`SensorSource::close`] or by
//! being dropped.

mod http;

#[cfg(test)]
pub(crate) mod fake;

pub use http::OusterHttpSdk;

use crate::error::SdkError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Opens sensor handles.
#[async_trait]
pub trait SensorSdk: Send + Sync {
    async fn open(&self, address: &str) -> Result<Box<dyn SensorSource>, SdkError>;
}

/// An open connection to one sensor.
#[async_trait]
pub trait SensorSource: Send {
    async fn fetch_metadata(&mut self) -> Result<SensorMetadata, SdkError>;

    /// Read the next full frame. `Ok(None)` means the source is exhausted.
    async fn next_scan(&mut self) -> Result<Option<LidarScan>, SdkError>;

    /// Project a scan to cartesian points in meters, row-major (h × w),
    /// one point per pixel.
    fn xyz(&self, scan: &LidarScan) -> Result<Vec<[f64; 3]>, SdkError>;

    async fn close(&mut self) -> Result<(), SdkError>;
}

/// Static sensor description fetched at connect time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorMetadata {
    pub serial: String,
    pub product_line: String,
    pub firmware_version: String,
    pub lidar_mode: String,
    pub azimuth_window: [u32; 2],
    pub beam_altitude_angles: Vec<f64>,
    pub beam_azimuth_angles: Vec<f64>,
    pub lidar_origin_to_beam_origin_mm: f64,
    pub pixels_per_column: usize,
    pub columns_per_frame: usize,
    pub udp_port_lidar: u16,
    pub udp_port_imu: u16,
}

/// Channel fields carried by a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChanField {
    Range,
    Signal,
    Reflectivity,
    NearIr,
}

impl ChanField {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChanField::Range => "RANGE",
            ChanField::Signal => "SIGNAL",
            ChanField::Reflectivity => "REFLECTIVITY",
            ChanField::NearIr => "NEAR_IR",
        }
    }

    pub fn all() -> &'static [ChanField] {
        &[
            ChanField::Range,
            ChanField::Signal,
            ChanField::Reflectivity,
            ChanField::NearIr,
        ]
    }
}

/// One staggered channel image, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldImage {
    pub dtype: &'static str,
    pub values: Vec<u32>,
}

/// A full lidar frame: per-column headers plus channel images.
#[derive(Debug, Clone, PartialEq)]
pub struct LidarScan {
    pub frame_id: u64,
    pub height: usize,
    pub width: usize,
    pub timestamp: Vec<u64>,
    pub measurement_id: Vec<u16>,
    pub status: Vec<u32>,
    fields: BTreeMap<ChanField, FieldImage>,
}

impl LidarScan {
    pub fn new(frame_id: u64, height: usize, width: usize) -> Self {
        Self {
            frame_id,
            height,
            width,
            timestamp: vec![0; width],
            measurement_id: (0..width).map(|c| c as u16).collect(),
            status: vec![0; width],
            fields: BTreeMap::new(),
        }
    }

    /// Attach a field image; `values` must hold `height * width` entries.
    pub fn with_field(mut self, field: ChanField, dtype: &'static str, values: Vec<u32>) -> Self {
        self.fields.insert(field, FieldImage { dtype, values });
        self
    }

    pub fn field(&self, field: ChanField) -> Option<&FieldImage> {
        self.fields.get(&field)
    }

    pub fn pixel_count(&self) -> usize {
        self.height * self.width
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_fields_are_looked_up_by_channel() {
        let scan = LidarScan::new(7, 2, 3)
            .with_field(ChanField::Range, "uint32", vec![0, 1, 2, 3, 4, 5])
            .with_field(ChanField::Signal, "uint16", vec![9; 6]);

        assert_eq!(scan.pixel_count(), 6);
        assert_eq!(scan.measurement_id, vec![0, 1, 2]);
        assert_eq!(scan.field(ChanField::Range).map(|f| f.dtype), Some("uint32"));
        assert!(scan.field(ChanField::NearIr).is_none());
    }

    #[test]
    fn channel_names_match_sdk_constants() {
        let names: Vec<_> = ChanField::all().iter().map(|f| f.as_str()).collect();
        assert_eq!(names, vec!["RANGE", "SIGNAL", "REFLECTIVITY", "NEAR_IR"]);
    }
}
