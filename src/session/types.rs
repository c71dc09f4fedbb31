//! Session summaries and operation outcomes.

use crate::registry::DeviceSession;
use crate::sdk::SensorMetadata;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Identity of a connected sensor, returned by `connect_sensor`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorSummary {
    pub hostname: String,
    pub serial: String,
    pub model: String,
    pub firmware_version: String,
}

impl SensorSummary {
    pub fn new(address: &str, metadata: &SensorMetadata) -> Self {
        Self {
            hostname: address.to_string(),
            serial: metadata.serial.clone(),
            model: metadata.product_line.clone(),
            firmware_version: metadata.firmware_version.clone(),
        }
    }
}

/// One entry of `get_connected_sensors`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub hostname: String,
    pub serial: String,
    pub model: String,
}

impl From<&DeviceSession> for SessionSummary {
    fn from(session: &DeviceSession) -> Self {
        let metadata = session.metadata();
        Self {
            hostname: session.address().to_string(),
            serial: metadata.serial,
            model: metadata.product_line,
        }
    }
}

/// Full metadata view returned by `get_sensor_info`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorDetails {
    pub hostname: String,
    pub serial: String,
    pub model: String,
    pub firmware_version: String,
    pub mode: String,
    pub azimuth_window: [u32; 2],
    pub beam_altitude_angles: Vec<f64>,
    pub beam_azimuth_angles: Vec<f64>,
    pub lidar_origin_to_beam_origin_mm: f64,
    pub lidar_pixels_per_column: usize,
    pub lidar_columns_per_frame: usize,
    pub udp_port_lidar: u16,
    pub udp_port_imu: u16,
    pub connected_at: DateTime<Utc>,
}

impl From<&DeviceSession> for SensorDetails {
    fn from(session: &DeviceSession) -> Self {
        let m = session.metadata();
        Self {
            hostname: session.address().to_string(),
            serial: m.serial,
            model: m.product_line,
            firmware_version: m.firmware_version,
            mode: m.lidar_mode,
            azimuth_window: m.azimuth_window,
            beam_altitude_angles: m.beam_altitude_angles,
            beam_azimuth_angles: m.beam_azimuth_angles,
            lidar_origin_to_beam_origin_mm: m.lidar_origin_to_beam_origin_mm,
            lidar_pixels_per_column: m.pixels_per_column,
            lidar_columns_per_frame: m.columns_per_frame,
            udp_port_lidar: m.udp_port_lidar,
            udp_port_imu: m.udp_port_imu,
            connected_at: session.connected_at(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConnectOutcome {
    Connected {
        message: String,
        sensor_info: SensorSummary,
    },
    AlreadyConnected {
        message: String,
        sensor_info: SensorSummary,
    },
    Error {
        hostname: String,
        error: String,
    },
}

impl ConnectOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, ConnectOutcome::Error { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DisconnectOutcome {
    Disconnected { hostname: String, message: String },
    NotConnected { hostname: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InfoOutcome {
    Success { sensor_info: SensorDetails },
    NotConnected { hostname: String, message: String },
    Error { hostname: String, error: String },
}

impl InfoOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, InfoOutcome::Error { .. })
    }
}
