//! Sensor backend speaking the Ouster HTTP API.
//!
//! Connecting fetches `GET /api/v1/sensor/metadata`; a sensor that answers is
//! considered reachable. Frame capture needs a UDP packet decoder which this
//! backend does not carry, so scan reads report [`SdkError::Unsupported`].

use super::{LidarScan, SensorMetadata, SensorSdk, SensorSource};
use crate::error::SdkError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

const METADATA_PATH: &str = "/api/v1/sensor/metadata";
const DEFAULT_AZIMUTH_WINDOW: [u32; 2] = [0, 360_000];
const DEFAULT_UDP_PORT_LIDAR: u16 = 7502;
const DEFAULT_UDP_PORT_IMU: u16 = 7503;

/// Opens sensors through their HTTP configuration API.
pub struct OusterHttpSdk {
    client: Client,
}

impl OusterHttpSdk {
    pub fn new(request_timeout: Duration) -> Result<Self, SdkError> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SensorSdk for OusterHttpSdk {
    async fn open(&self, address: &str) -> Result<Box<dyn SensorSource>, SdkError> {
        let url = metadata_url(address);
        debug!(address = %address, url = %url, "Probing sensor HTTP API");
        let metadata = fetch(&self.client, &url).await.map_err(|e| SdkError::Connect {
            address: address.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Box::new(HttpSensorSource {
            client: self.client.clone(),
            url,
            prefetched: Some(metadata),
            closed: false,
        }))
    }
}

struct HttpSensorSource {
    client: Client,
    url: String,
    prefetched: Option<SensorMetadata>,
    closed: bool,
}

#[async_trait]
impl SensorSource for HttpSensorSource {
    async fn fetch_metadata(&mut self) -> Result<SensorMetadata, SdkError> {
        if self.closed {
            return Err(SdkError::Closed);
        }
        // First read after open reuses the probe response.
        if let Some(metadata) = self.prefetched.take() {
            return Ok(metadata);
        }
        fetch(&self.client, &self.url).await
    }

    async fn next_scan(&mut self) -> Result<Option<LidarScan>, SdkError> {
        if self.closed {
            return Err(SdkError::Closed);
        }
        Err(SdkError::Unsupported(
            "scan capture requires a UDP packet decoder".to_string(),
        ))
    }

    fn xyz(&self, _scan: &LidarScan) -> Result<Vec<[f64; 3]>, SdkError> {
        Err(SdkError::Unsupported(
            "point projection requires a UDP packet decoder".to_string(),
        ))
    }

    async fn close(&mut self) -> Result<(), SdkError> {
        if self.closed {
            return Err(SdkError::Closed);
        }
        self.closed = true;
        self.prefetched = None;
        Ok(())
    }
}

fn metadata_url(address: &str) -> String {
    let host = address.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        format!("{host}{METADATA_PATH}")
    } else {
        format!("http://{host}{METADATA_PATH}")
    }
}

async fn fetch(client: &Client, url: &str) -> Result<SensorMetadata, SdkError> {
    let document: MetadataDocument = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(document.into_metadata())
}

#[derive(Debug, Deserialize)]
struct MetadataDocument {
    #[serde(default)]
    sensor_info: SensorInfoSection,
    #[serde(default)]
    beam_intrinsics: BeamIntrinsicsSection,
    #[serde(default)]
    lidar_data_format: DataFormatSection,
    #[serde(default)]
    config_params: ConfigSection,
}

#[derive(Debug, Default, Deserialize)]
struct SensorInfoSection {
    #[serde(default)]
    prod_sn: Value,
    #[serde(default)]
    prod_line: String,
    #[serde(default)]
    build_rev: String,
}

#[derive(Debug, Default, Deserialize)]
struct BeamIntrinsicsSection {
    #[serde(default)]
    beam_altitude_angles: Vec<f64>,
    #[serde(default)]
    beam_azimuth_angles: Vec<f64>,
    #[serde(default)]
    lidar_origin_to_beam_origin_mm: f64,
}

#[derive(Debug, Default, Deserialize)]
struct DataFormatSection {
    pixels_per_column: Option<usize>,
    columns_per_frame: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigSection {
    #[serde(default)]
    lidar_mode: String,
    azimuth_window: Option<[u32; 2]>,
    udp_port_lidar: Option<u16>,
    udp_port_imu: Option<u16>,
}

impl MetadataDocument {
    fn into_metadata(self) -> SensorMetadata {
        let columns_from_mode = self
            .config_params
            .lidar_mode
            .split_once('x')
            .and_then(|(columns, _)| columns.parse().ok());

        SensorMetadata {
            serial: value_text(&self.sensor_info.prod_sn),
            product_line: self.sensor_info.prod_line,
            firmware_version: self.sensor_info.build_rev,
            azimuth_window: self
                .config_params
                .azimuth_window
                .unwrap_or(DEFAULT_AZIMUTH_WINDOW),
            pixels_per_column: self
                .lidar_data_format
                .pixels_per_column
                .unwrap_or(self.beam_intrinsics.beam_altitude_angles.len()),
            columns_per_frame: self
                .lidar_data_format
                .columns_per_frame
                .or(columns_from_mode)
                .unwrap_or(0),
            lidar_mode: self.config_params.lidar_mode,
            beam_altitude_angles: self.beam_intrinsics.beam_altitude_angles,
            beam_azimuth_angles: self.beam_intrinsics.beam_azimuth_angles,
            lidar_origin_to_beam_origin_mm: self.beam_intrinsics.lidar_origin_to_beam_origin_mm,
            udp_port_lidar: self
                .config_params
                .udp_port_lidar
                .unwrap_or(DEFAULT_UDP_PORT_LIDAR),
            udp_port_imu: self
                .config_params
                .udp_port_imu
                .unwrap_or(DEFAULT_UDP_PORT_IMU),
        }
    }
}

/// Serial numbers show up as strings or integers depending on firmware.
fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
