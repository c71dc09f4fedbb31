//! Visualization outcomes and listings.

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StartOutcome {
    Success {
        hostname: String,
        pid: u32,
        message: String,
    },
    AlreadyRunning {
        hostname: String,
        pid: u32,
        message: String,
    },
    NotConnected {
        hostname: String,
        message: String,
    },
    Error {
        hostname: String,
        error: String,
    },
}

impl StartOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, StartOutcome::Error { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StopOutcome {
    Success {
        hostname: String,
        message: String,
        /// Processes that ignored SIGTERM and were killed.
        #[serde(skip_serializing_if = "is_zero")]
        force_killed: usize,
    },
    NotRunning {
        hostname: String,
        message: String,
    },
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

/// One live visualizer in `list_visualizations`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VizSummary {
    pub hostname: String,
    pub pid: u32,
    /// OS process status, or `unknown` without introspection.
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_percent: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_percent: Option<f32>,
    /// Seconds since launch.
    pub running_time: f64,
    pub started_at: DateTime<Utc>,
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VizListing {
    pub visualizations: Vec<VizSummary>,
    pub total_count: usize,
}
