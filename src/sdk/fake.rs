//! In-memory SDK used by unit tests.

use super::{ChanField, LidarScan, SensorMetadata, SensorSdk, SensorSource};
use crate::error::SdkError;
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct Counters {
    opens: AtomicUsize,
    closes: AtomicUsize,
    drops: AtomicUsize,
}

/// Counts opens and releases; can be told to fail per address.
#[derive(Default)]
pub struct FakeSdk {
    counters: Arc<Counters>,
    fail_open: Mutex<HashSet<String>>,
    fail_metadata: Mutex<HashSet<String>>,
    fail_close: Mutex<HashSet<String>>,
    hang_close: Mutex<HashSet<String>>,
    open_delay: Option<Duration>,
    scans: Mutex<Vec<LidarScan>>,
}

impl FakeSdk {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = Some(delay);
        self
    }

    /// Scans served (in order) by every source opened afterwards.
    pub fn with_scans(self, scans: Vec<LidarScan>) -> Self {
        *self.scans.lock().unwrap() = scans;
        self
    }

    pub fn fail_open(&self, address: &str) {
        self.fail_open.lock().unwrap().insert(address.to_string());
    }

    pub fn fail_metadata(&self, address: &str) {
        self.fail_metadata.lock().unwrap().insert(address.to_string());
    }

    pub fn fail_close(&self, address: &str) {
        self.fail_close.lock().unwrap().insert(address.to_string());
    }

    /// Sources for `address` never finish closing.
    pub fn hang_close(&self, address: &str) {
        self.hang_close.lock().unwrap().insert(address.to_string());
    }

    pub fn opens(&self) -> usize {
        self.counters.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.counters.closes.load(Ordering::SeqCst)
    }

    /// Handles released by being dropped without an explicit close.
    pub fn drops(&self) -> usize {
        self.counters.drops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SensorSdk for FakeSdk {
    async fn open(&self, address: &str) -> Result<Box<dyn SensorSource>, SdkError> {
        if let Some(delay) = self.open_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_open.lock().unwrap().contains(address) {
            return Err(SdkError::Connect {
                address: address.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSource {
            metadata: metadata(address),
            fail_metadata: self.fail_metadata.lock().unwrap().contains(address),
            fail_close: self.fail_close.lock().unwrap().contains(address),
            hang_close: self.hang_close.lock().unwrap().contains(address),
            scans: self.scans.lock().unwrap().iter().cloned().collect(),
            counters: Arc::clone(&self.counters),
            closed: false,
        }))
    }
}

struct FakeSource {
    metadata: SensorMetadata,
    fail_metadata: bool,
    fail_close: bool,
    hang_close: bool,
    scans: VecDeque<LidarScan>,
    counters: Arc<Counters>,
    closed: bool,
}

#[async_trait]
impl SensorSource for FakeSource {
    async fn fetch_metadata(&mut self) -> Result<SensorMetadata, SdkError> {
        if self.fail_metadata {
            return Err(SdkError::Metadata("metadata endpoint returned 500".to_string()));
        }
        Ok(self.metadata.clone())
    }

    async fn next_scan(&mut self) -> Result<Option<LidarScan>, SdkError> {
        Ok(self.scans.pop_front())
    }

    /// x is the range in meters, y the column index, z the row index.
    fn xyz(&self, scan: &LidarScan) -> Result<Vec<[f64; 3]>, SdkError> {
        let range = scan
            .field(ChanField::Range)
            .ok_or_else(|| SdkError::Scan("scan has no RANGE field".to_string()))?;
        Ok(range
            .values
            .iter()
            .enumerate()
            .map(|(i, mm)| {
                let row = i / scan.width;
                let col = i % scan.width;
                [f64::from(*mm) / 1000.0, col as f64, row as f64]
            })
            .collect())
    }

    async fn close(&mut self) -> Result<(), SdkError> {
        if self.hang_close {
            std::future::pending::<()>().await;
        }
        self.closed = true;
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            return Err(SdkError::Scan("socket already torn down".to_string()));
        }
        Ok(())
    }
}

impl Drop for FakeSource {
    fn drop(&mut self) {
        if !self.closed {
            self.counters.drops.fetch_add(1, Ordering::SeqCst);
        }
    }
}

pub fn metadata(address: &str) -> SensorMetadata {
    SensorMetadata {
        serial: format!("SN-{address}"),
        product_line: "OS-1-64".to_string(),
        firmware_version: "v2.5.2".to_string(),
        lidar_mode: "1024x10".to_string(),
        azimuth_window: [0, 360_000],
        beam_altitude_angles: vec![16.6, 16.0],
        beam_azimuth_angles: vec![3.1, 0.9],
        lidar_origin_to_beam_origin_mm: 15.806,
        pixels_per_column: 64,
        columns_per_frame: 1024,
        udp_port_lidar: 7502,
        udp_port_imu: 7503,
    }
}

/// A 2 × 3 scan; range values are millimeters.
pub fn scan(frame_id: u64, range: [u32; 6]) -> LidarScan {
    LidarScan::new(frame_id, 2, 3)
        .with_field(ChanField::Range, "uint32", range.to_vec())
        .with_field(ChanField::Signal, "uint16", vec![10, 20, 30, 40, 50, 60])
        .with_field(ChanField::Reflectivity, "uint8", vec![1, 2, 3, 4, 5, 6])
        .with_field(ChanField::NearIr, "uint16", vec![0, 0, 7, 0, 9, 0])
}
