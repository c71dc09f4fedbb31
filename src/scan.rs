//! Scan capture and point-cloud statistics for connected sensors.

use crate::error::{SdkError, ToolError};
use crate::progress::Progress;
use crate::registry::DeviceSession;
use crate::sdk::{ChanField, LidarScan};
use crate::session::SessionManager;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{error, info};

/// Edge length of an occupancy grid cell, in meters.
pub const GRID_RESOLUTION: f64 = 1.0;
/// Number of densest grid cells reported.
pub const DENSEST_CELLS: usize = 5;
pub const MAX_STREAM_SCANS: usize = 1000;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScanOutcome<T> {
    Success(T),
    Warning(T),
    NotConnected { hostname: String, message: String },
    Error { hostname: String, error: String },
}

impl<T> ScanOutcome<T> {
    pub fn is_error(&self) -> bool {
        matches!(self, ScanOutcome::Error { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FieldStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

impl FieldStats {
    /// All zeros for an empty slice.
    pub fn of(values: &[u32]) -> Self {
        if values.is_empty() {
            return Self { min: 0.0, max: 0.0, mean: 0.0 };
        }
        let (mut min, mut max, mut sum) = (u32::MAX, 0u32, 0f64);
        for v in values {
            min = min.min(*v);
            max = max.max(*v);
            sum += f64::from(*v);
        }
        Self {
            min: f64::from(min),
            max: f64::from(max),
            mean: sum / values.len() as f64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SpreadStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl SpreadStats {
    /// Population standard deviation; `None` for an empty input.
    pub fn of(values: impl IntoIterator<Item = f64>) -> Option<Self> {
        let values: Vec<f64> = values.into_iter().collect();
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Some(Self {
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            mean,
            std_dev: variance.sqrt(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanShape {
    pub h: usize,
    pub w: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanSummary {
    pub frame_id: u64,
    pub scan_shape: ScanShape,
    pub range_stats: FieldStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal_stats: Option<FieldStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reflectivity_stats: Option<FieldStats>,
    pub num_valid_returns: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapturedScan {
    pub scan_summary: ScanSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldReport {
    pub shape: [usize; 2],
    pub dtype: &'static str,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub non_zero_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanDetail {
    pub frame_id: u64,
    pub timestamp: Vec<u64>,
    pub measurement_id: Vec<u16>,
    pub status: Vec<u32>,
    pub fields: BTreeMap<&'static str, FieldReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanData {
    pub scan_data: ScanDetail,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamStat {
    pub frame_id: u64,
    pub valid_returns: usize,
    pub range_mean: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamedScans {
    pub scans_captured: usize,
    pub scan_statistics: Vec<StreamStat>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub min_z: f64,
    pub max_x: f64,
    pub max_y: f64,
    pub max_z: f64,
    pub width: f64,
    pub length: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridSize {
    pub x: usize,
    pub y: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DensityCell {
    /// Cell centre.
    pub x: f64,
    pub y: f64,
    pub point_count: usize,
    /// Points per square meter.
    pub density: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridAnalysis {
    pub resolution: f64,
    pub grid_size: GridSize,
    pub occupied_cells: usize,
    pub occupancy_percentage: f64,
    pub highest_density_regions: Vec<DensityCell>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeightStats {
    pub mean: f64,
    pub std_dev: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointCloudSummary {
    pub total_points: usize,
    pub valid_points: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grid_analysis: Option<GridAnalysis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height_statistics: Option<HeightStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal_statistics: Option<SpreadStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reflectivity_statistics: Option<SpreadStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointCloudReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub frame_id: u64,
    pub point_cloud: PointCloudSummary,
}

enum Failure {
    NotConnected,
    Tool(ToolError),
}

impl From<ToolError> for Failure {
    fn from(e: ToolError) -> Self {
        Failure::Tool(e)
    }
}

/// Read-only scan operations over connected sensors.
pub struct ScanOperations {
    sessions: Arc<SessionManager>,
}

impl ScanOperations {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }

    /// Summary statistics of one frame.
    pub async fn capture_single_scan(
        &self,
        address: &str,
        progress: &Progress,
    ) -> ScanOutcome<CapturedScan> {
        info!(address = %address, "Capturing scan");
        let result = self.capture(address, progress).await;
        finish(address, "capture scan", result, progress)
    }

    async fn capture(&self, address: &str, progress: &Progress) -> Result<CapturedScan, Failure> {
        let session = self.session(address).await?;
        progress.info("Starting scan capture");
        progress.percent(20);
        let scan = self.next_scan(address, &session).await?;
        progress.info("Scan capture complete");
        progress.percent(80);

        let range = range_values(&scan)?;
        let scan_summary = ScanSummary {
            frame_id: scan.frame_id,
            scan_shape: ScanShape {
                h: scan.height,
                w: scan.width,
            },
            range_stats: FieldStats::of(range),
            signal_stats: scan.field(ChanField::Signal).map(|f| FieldStats::of(&f.values)),
            reflectivity_stats: scan
                .field(ChanField::Reflectivity)
                .map(|f| FieldStats::of(&f.values)),
            num_valid_returns: range.iter().filter(|r| **r > 0).count(),
        };
        progress.percent(100);
        Ok(CapturedScan { scan_summary })
    }

    /// Column headers plus per-field statistics of one frame.
    pub async fn get_scan(&self, address: &str, progress: &Progress) -> ScanOutcome<ScanData> {
        info!(address = %address, "Getting scan");
        let result = self.scan_data(address, progress).await;
        finish(address, "get scan", result, progress)
    }

    async fn scan_data(&self, address: &str, progress: &Progress) -> Result<ScanData, Failure> {
        let session = self.session(address).await?;
        progress.info("Retrieving scan");
        progress.percent(20);
        let scan = self.next_scan(address, &session).await?;
        progress.info("Scan retrieved successfully");
        progress.percent(80);

        let fields = ChanField::all()
            .iter()
            .filter_map(|field| {
                let image = scan.field(*field)?;
                let stats = FieldStats::of(&image.values);
                Some((
                    field.as_str(),
                    FieldReport {
                        shape: [scan.height, scan.width],
                        dtype: image.dtype,
                        min: stats.min,
                        max: stats.max,
                        mean: stats.mean,
                        non_zero_count: image.values.iter().filter(|v| **v > 0).count(),
                    },
                ))
            })
            .collect();

        progress.percent(100);
        Ok(ScanData {
            scan_data: ScanDetail {
                frame_id: scan.frame_id,
                timestamp: scan.timestamp,
                measurement_id: scan.measurement_id,
                status: scan.status,
                fields,
            },
        })
    }

    /// Per-frame valid-return statistics for `num_scans` consecutive frames.
    pub async fn stream_scans(
        &self,
        address: &str,
        num_scans: usize,
        progress: &Progress,
    ) -> ScanOutcome<StreamedScans> {
        info!(address = %address, num_scans, "Streaming scans");
        let result = self.stream(address, num_scans, progress).await;
        finish(address, "stream scans", result, progress)
    }

    async fn stream(
        &self,
        address: &str,
        num_scans: usize,
        progress: &Progress,
    ) -> Result<StreamedScans, Failure> {
        if num_scans == 0 || num_scans > MAX_STREAM_SCANS {
            return Err(ToolError::InvalidParams(format!(
                "num_scans must be between 1 and {MAX_STREAM_SCANS}"
            ))
            .into());
        }
        let session = self.session(address).await?;
        progress.info(format!("Starting to stream {num_scans} scans"));

        let mut stats = Vec::with_capacity(num_scans);
        let mut handle = session.handle().await;
        while stats.len() < num_scans {
            let next = match handle.as_mut() {
                Some(source) => source.next_scan().await,
                None => Err(SdkError::Closed),
            };
            let scan = match next {
                Ok(Some(scan)) => scan,
                // Source ended early; report what was captured.
                Ok(None) => break,
                Err(e) => {
                    drop(handle);
                    if e.invalidates_handle() {
                        self.sessions.discard(address, &session).await;
                    }
                    return Err(ToolError::Streaming {
                        captured: stats.len(),
                        reason: e.to_string(),
                    }
                    .into());
                }
            };
            let range = range_values(&scan)?;
            let valid: Vec<u32> = range.iter().copied().filter(|r| *r > 0).collect();
            stats.push(StreamStat {
                frame_id: scan.frame_id,
                valid_returns: valid.len(),
                range_mean: FieldStats::of(&valid).mean,
            });
            progress.percent((stats.len() * 100 / num_scans) as u32);
            progress.info(format!("Captured scan {}/{num_scans}", stats.len()));
        }

        progress.info(format!("Successfully streamed {} scans", stats.len()));
        Ok(StreamedScans {
            scans_captured: stats.len(),
            scan_statistics: stats,
        })
    }

    /// Project one frame to points and summarize the cloud. A frame without
    /// valid points is a warning, not an error.
    pub async fn process_point_cloud(
        &self,
        address: &str,
        max_distance: Option<f64>,
        progress: &Progress,
    ) -> ScanOutcome<PointCloudReport> {
        info!(address = %address, ?max_distance, "Processing point cloud");
        let result = self.point_cloud(address, max_distance, progress).await;
        match finish(address, "process point cloud", result, progress) {
            ScanOutcome::Success(mut report) if report.point_cloud.valid_points == 0 => {
                report.message = Some("No valid points found in scan".to_string());
                ScanOutcome::Warning(report)
            }
            other => other,
        }
    }

    async fn point_cloud(
        &self,
        address: &str,
        max_distance: Option<f64>,
        progress: &Progress,
    ) -> Result<PointCloudReport, Failure> {
        if max_distance.is_some_and(|d| !d.is_finite() || d <= 0.0) {
            return Err(ToolError::InvalidParams(
                "max_distance must be a positive number of meters".to_string(),
            )
            .into());
        }
        let session = self.session(address).await?;
        progress.info("Capturing scan for point cloud processing");
        progress.percent(10);

        let read = {
            let mut handle = session.handle().await;
            match handle.as_mut() {
                Some(source) => match source.next_scan().await {
                    Ok(Some(scan)) => source.xyz(&scan).map(|points| Some((scan, points))),
                    Ok(None) => Ok(None),
                    Err(e) => Err(e),
                },
                None => Err(SdkError::Closed),
            }
        };
        let (scan, points) = self
            .check(address, &session, read)
            .await?
            .ok_or(ToolError::NoScanData)?;

        progress.info("Calculating point cloud statistics");
        progress.percent(30);
        let range = range_values(&scan)?;
        if points.len() != range.len() {
            let mismatch = SdkError::Scan(format!(
                "projection returned {} points for {} pixels",
                points.len(),
                range.len()
            ));
            return Err(ToolError::from(mismatch).into());
        }
        let point_cloud = analyze_point_cloud(
            &points,
            range,
            scan.field(ChanField::Signal).map(|f| f.values.as_slice()),
            scan.field(ChanField::Reflectivity).map(|f| f.values.as_slice()),
            max_distance,
        );
        progress.percent(100);
        Ok(PointCloudReport {
            message: None,
            frame_id: scan.frame_id,
            point_cloud,
        })
    }

    async fn session(&self, address: &str) -> Result<Arc<DeviceSession>, Failure> {
        self.sessions
            .session(address)
            .await
            .ok_or(Failure::NotConnected)
    }

    async fn next_scan(
        &self,
        address: &str,
        session: &Arc<DeviceSession>,
    ) -> Result<LidarScan, Failure> {
        let read = {
            let mut handle = session.handle().await;
            match handle.as_mut() {
                Some(source) => source.next_scan().await,
                None => Err(SdkError::Closed),
            }
        };
        Ok(self
            .check(address, session, read)
            .await?
            .ok_or(ToolError::NoScanData)?)
    }

    /// Drop the session when the SDK reports its handle unusable.
    async fn check<T>(
        &self,
        address: &str,
        session: &Arc<DeviceSession>,
        result: Result<T, SdkError>,
    ) -> Result<T, Failure> {
        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                if e.invalidates_handle() {
                    self.sessions.discard(address, session).await;
                }
                Err(ToolError::from(e).into())
            }
        }
    }
}

fn range_values(scan: &LidarScan) -> Result<&[u32], ToolError> {
    scan.field(ChanField::Range)
        .map(|f| f.values.as_slice())
        .ok_or_else(|| SdkError::Scan("scan has no RANGE field".to_string()).into())
}

fn finish<T>(
    address: &str,
    action: &str,
    result: Result<T, Failure>,
    progress: &Progress,
) -> ScanOutcome<T> {
    match result {
        Ok(value) => ScanOutcome::Success(value),
        Err(Failure::NotConnected) => ScanOutcome::NotConnected {
            hostname: address.to_string(),
            message: format!("Sensor {address} is not connected. Use connect_sensor first."),
        },
        Err(Failure::Tool(e)) => {
            error!(address = %address, error = %e, "Failed to {action}");
            progress.error(e.to_string());
            ScanOutcome::Error {
                hostname: address.to_string(),
                error: e.to_string(),
            }
        }
    }
}

/// Bounding box, XY occupancy grid, height and intensity statistics of the
/// valid points: range > 0, finite coordinates and, when given, within
/// `max_distance` meters.
pub fn analyze_point_cloud(
    points: &[[f64; 3]],
    range: &[u32],
    signal: Option<&[u32]>,
    reflectivity: Option<&[u32]>,
    max_distance: Option<f64>,
) -> PointCloudSummary {
    let valid: Vec<usize> = (0..points.len().min(range.len()))
        .filter(|&i| range[i] > 0 && points[i].iter().all(|v| v.is_finite()))
        .filter(|&i| {
            max_distance.is_none_or(|max| {
                let [x, y, z] = points[i];
                (x * x + y * y + z * z).sqrt() <= max
            })
        })
        .collect();

    let mut summary = PointCloudSummary {
        total_points: range.len(),
        valid_points: valid.len(),
        bounding_box: None,
        grid_analysis: None,
        height_statistics: None,
        signal_statistics: None,
        reflectivity_statistics: None,
    };
    if valid.is_empty() {
        return summary;
    }

    let axis = |k: usize| valid.iter().map(move |&i| points[i][k]);
    let bounds = |k: usize| {
        axis(k).fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        })
    };
    let (min_x, max_x) = bounds(0);
    let (min_y, max_y) = bounds(1);
    let (min_z, max_z) = bounds(2);

    summary.bounding_box = Some(BoundingBox {
        min_x,
        min_y,
        min_z,
        max_x,
        max_y,
        max_z,
        width: max_x - min_x,
        length: max_y - min_y,
        height: max_z - min_z,
    });

    // Float to int casts saturate; keep the arithmetic saturating too.
    let x_cells = (((max_x - min_x) / GRID_RESOLUTION).ceil() as usize).saturating_add(1);
    let y_cells = (((max_y - min_y) / GRID_RESOLUTION).ceil() as usize).saturating_add(1);
    let mut counts: HashMap<(usize, usize), usize> = HashMap::new();
    for &i in &valid {
        let [x, y, _] = points[i];
        let cx = (((x - min_x) / GRID_RESOLUTION).floor() as usize).min(x_cells - 1);
        let cy = (((y - min_y) / GRID_RESOLUTION).floor() as usize).min(y_cells - 1);
        *counts.entry((cx, cy)).or_default() += 1;
    }

    let mut cells: Vec<((usize, usize), usize)> = counts.into_iter().collect();
    let occupied_cells = cells.len();
    // Densest first; ties go to the later cell in row-major grid order.
    cells.sort_by(|(a, ca), (b, cb)| {
        cb.cmp(ca).then_with(|| b.cmp(a))
    });
    let highest_density_regions = cells
        .iter()
        .take(DENSEST_CELLS)
        .map(|&((cx, cy), count)| DensityCell {
            x: min_x + (cx as f64 + 0.5) * GRID_RESOLUTION,
            y: min_y + (cy as f64 + 0.5) * GRID_RESOLUTION,
            point_count: count,
            density: count as f64 / (GRID_RESOLUTION * GRID_RESOLUTION),
        })
        .collect();

    summary.grid_analysis = Some(GridAnalysis {
        resolution: GRID_RESOLUTION,
        grid_size: GridSize {
            x: x_cells,
            y: y_cells,
        },
        occupied_cells,
        occupancy_percentage: occupied_cells as f64 / (x_cells as f64 * y_cells as f64) * 100.0,
        highest_density_regions,
    });

    summary.height_statistics = SpreadStats::of(axis(2)).map(|s| HeightStats {
        mean: s.mean,
        std_dev: s.std_dev,
    });
    let pick = |values: &[u32]| {
        SpreadStats::of(
            valid
                .iter()
                .filter_map(|&i| values.get(i))
                .map(|v| f64::from(*v)),
        )
    };
    summary.signal_statistics = signal.and_then(pick);
    summary.reflectivity_statistics = reflectivity.and_then(pick);
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DeviceRegistry;
    use crate::sdk::fake::{self, FakeSdk};
    use serde_json::json;

    async fn operations(sdk: FakeSdk) -> (ScanOperations, Arc<SessionManager>) {
        let sessions = Arc::new(SessionManager::new(
            Arc::new(sdk),
            Arc::new(DeviceRegistry::new()),
        ));
        sessions.connect("os-1", &Progress::noop()).await;
        (ScanOperations::new(Arc::clone(&sessions)), sessions)
    }

    #[test]
    fn field_stats_cover_min_max_mean() {
        let stats = FieldStats::of(&[0, 2, 4, 10]);
        assert_eq!(stats, FieldStats { min: 0.0, max: 10.0, mean: 4.0 });
        assert_eq!(FieldStats::of(&[]).mean, 0.0);
    }

    #[test]
    fn spread_stats_use_population_std_dev() {
        let stats = SpreadStats::of([2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert_eq!(stats.mean, 5.0);
        assert_eq!(stats.std_dev, 2.0);
        assert!(SpreadStats::of(std::iter::empty()).is_none());
    }

    #[test]
    fn point_cloud_grid_and_density() {
        let points = [
            [0.2, 0.2, 1.0],
            [0.4, 0.3, 3.0],
            [0.9, 0.1, 2.0],
            [2.5, 1.5, 2.0],
            [9.0, 9.0, 9.0],
        ];
        let range = [1000, 1000, 1000, 3000, 0];
        let signal = [10, 20, 30, 40, 50];

        let summary = analyze_point_cloud(&points, &range, Some(&signal), None, None);
        assert_eq!(summary.total_points, 5);
        assert_eq!(summary.valid_points, 4);

        let bbox = summary.bounding_box.expect("bbox for valid points");
        assert_eq!((bbox.min_x, bbox.max_x), (0.2, 2.5));
        assert_eq!(bbox.height, 2.0);

        let grid = summary.grid_analysis.expect("grid for valid points");
        assert_eq!((grid.grid_size.x, grid.grid_size.y), (4, 3));
        assert_eq!(grid.occupied_cells, 2);
        let densest = &grid.highest_density_regions[0];
        assert_eq!(densest.point_count, 3);
        assert!((densest.x - 0.7).abs() < 1e-9);
        assert!((densest.y - 0.6).abs() < 1e-9);

        let height = summary.height_statistics.unwrap();
        assert_eq!(height.mean, 2.0);
        assert_eq!(summary.signal_statistics.unwrap().max, 40.0);
        assert!(summary.reflectivity_statistics.is_none());
    }

    #[test]
    fn non_finite_and_far_flung_points_do_not_overflow_the_grid() {
        let points = [
            [1.0, 1.0, 0.0],
            [f64::NAN, 0.0, 0.0],
            [f64::INFINITY, 2.0, 0.0],
            [-1.0e300, 1.0e300, 1.0],
        ];
        let range = [1000, 1000, 1000, 1000];
        let summary = analyze_point_cloud(&points, &range, None, None, None);

        assert_eq!(summary.valid_points, 2);
        let grid = summary.grid_analysis.expect("valid points should yield a grid");
        assert_eq!(grid.grid_size.x, usize::MAX);
        assert_eq!(grid.occupied_cells, 2);
        assert!(grid.occupancy_percentage.is_finite());
    }

    #[test]
    fn max_distance_filters_far_points() {
        let points = [[1.0, 0.0, 0.0], [30.0, 40.0, 0.0]];
        let summary = analyze_point_cloud(&points, &[1000, 50_000], None, None, Some(10.0));
        assert_eq!(summary.valid_points, 1);
    }

    #[tokio::test]
    async fn unknown_sensor_is_not_connected() {
        let (ops, _) = operations(FakeSdk::new()).await;
        let outcome = ops.capture_single_scan("os-9", &Progress::noop()).await;
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({
                "status": "not_connected",
                "hostname": "os-9",
                "message": "Sensor os-9 is not connected. Use connect_sensor first."
            })
        );
    }

    #[tokio::test]
    async fn capture_summarizes_the_frame() {
        let sdk = FakeSdk::new().with_scans(vec![fake::scan(42, [0, 1000, 2000, 0, 3000, 6000])]);
        let (ops, _) = operations(sdk).await;

        let outcome = ops.capture_single_scan("os-1", &Progress::noop()).await;
        let ScanOutcome::Success(captured) = &outcome else {
            panic!("capture should succeed: {outcome:?}");
        };
        let summary = &captured.scan_summary;
        assert_eq!(summary.frame_id, 42);
        assert_eq!(summary.scan_shape, ScanShape { h: 2, w: 3 });
        assert_eq!(summary.num_valid_returns, 4);
        assert_eq!(summary.range_stats.max, 6000.0);

        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["status"], "success");
        assert_eq!(value["scan_summary"]["signal_stats"]["min"], 10.0);
    }

    #[tokio::test]
    async fn exhausted_source_reports_no_scan_data() {
        let (ops, _) = operations(FakeSdk::new()).await;
        match ops.get_scan("os-1", &Progress::noop()).await {
            ScanOutcome::Error { error, .. } => {
                assert_eq!(error, "No scan data available from sensor")
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn get_scan_reports_every_available_field() {
        let sdk = FakeSdk::new().with_scans(vec![fake::scan(7, [5, 5, 5, 5, 5, 5])]);
        let (ops, _) = operations(sdk).await;

        let ScanOutcome::Success(data) = ops.get_scan("os-1", &Progress::noop()).await else {
            panic!("get_scan should succeed");
        };
        let fields = &data.scan_data.fields;
        assert_eq!(
            fields.keys().copied().collect::<Vec<_>>(),
            vec!["NEAR_IR", "RANGE", "REFLECTIVITY", "SIGNAL"]
        );
        assert_eq!(fields["NEAR_IR"].non_zero_count, 2);
        assert_eq!(fields["RANGE"].shape, [2, 3]);
        assert_eq!(data.scan_data.measurement_id, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn stream_stops_when_the_source_ends() {
        let sdk = FakeSdk::new().with_scans(vec![
            fake::scan(1, [0, 0, 0, 0, 2000, 4000]),
            fake::scan(2, [0; 6]),
        ]);
        let (ops, _) = operations(sdk).await;

        let ScanOutcome::Success(streamed) = ops.stream_scans("os-1", 5, &Progress::noop()).await
        else {
            panic!("stream should succeed");
        };
        assert_eq!(streamed.scans_captured, 2);
        assert_eq!(
            streamed.scan_statistics[0],
            StreamStat { frame_id: 1, valid_returns: 2, range_mean: 3000.0 }
        );
        assert_eq!(streamed.scan_statistics[1].range_mean, 0.0);
    }

    #[tokio::test]
    async fn stream_rejects_zero_scans() {
        let (ops, _) = operations(FakeSdk::new()).await;
        assert!(ops.stream_scans("os-1", 0, &Progress::noop()).await.is_error());
    }

    #[tokio::test]
    async fn closed_handle_drops_the_session() {
        let (ops, sessions) = operations(FakeSdk::new()).await;
        let session = sessions.session("os-1").await.unwrap();
        session.release().await.unwrap();

        match ops.stream_scans("os-1", 3, &Progress::noop()).await {
            ScanOutcome::Error { error, .. } => {
                assert!(error.starts_with("Streaming failed after 0 scans"))
            }
            other => panic!("expected error, got {other:?}"),
        }
        assert!(sessions.session("os-1").await.is_none());
    }

    #[tokio::test]
    async fn empty_frame_is_a_point_cloud_warning() {
        let sdk = FakeSdk::new().with_scans(vec![fake::scan(3, [0; 6])]);
        let (ops, _) = operations(sdk).await;

        let outcome = ops.process_point_cloud("os-1", None, &Progress::noop()).await;
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({
                "status": "warning",
                "message": "No valid points found in scan",
                "frame_id": 3,
                "point_cloud": {"total_points": 6, "valid_points": 0}
            })
        );
    }

    #[tokio::test]
    async fn point_cloud_from_a_live_frame() {
        let sdk = FakeSdk::new().with_scans(vec![fake::scan(9, [1000, 1500, 0, 2000, 2500, 0])]);
        let (ops, _) = operations(sdk).await;

        let ScanOutcome::Success(report) =
            ops.process_point_cloud("os-1", Some(100.0), &Progress::noop()).await
        else {
            panic!("point cloud should succeed");
        };
        assert_eq!(report.frame_id, 9);
        assert_eq!(report.point_cloud.valid_points, 4);
        assert!(report.point_cloud.grid_analysis.is_some());
        assert!(report.point_cloud.reflectivity_statistics.is_some());
    }
}
