use chrono::{DateTime, Utc};

/// A visualizer launched for a connected sensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisualizationProcess {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    /// Launched command line, for listing and debugging.
    pub command: String,
}

impl VisualizationProcess {
    pub fn new(pid: u32, command: String) -> Self {
        Self {
            pid,
            started_at: Utc::now(),
            command,
        }
    }

    /// Seconds since launch.
    pub fn uptime_secs(&self) -> f64 {
        let elapsed = Utc::now().signed_duration_since(self.started_at);
        elapsed.num_milliseconds().max(0) as f64 / 1000.0
    }
}
