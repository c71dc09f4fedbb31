//! Sensor discovery through the external discovery command.
//!
//! `ouster-cli discover` prints either JSON (an array, or one object per
//! record) or a plain listing:
//!
//! ```text
//! Sensor: os-122.local
//!   i: 10.0.0.5
//!   Serial: 122
//!   Model: OS-1-64
//! ```
//!
//! JSON is tried first; the line grammar is the fallback. Output that is
//! neither is only an error when it contains no recognizable line at all.

use crate::config::{CommandSpec, ServerConfig};
use crate::error::ToolError;
use crate::progress::Progress;
use crate::registry::DeviceRegistry;
use serde::de::Error as _;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, error, info};

const UNKNOWN: &str = "unknown";
/// Longest excerpt of unparseable output quoted back in errors.
const EXCERPT_CHARS: usize = 120;

/// A raw discovery record: lowercased key → value.
pub type DiscoveryRecord = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Discovered,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredSensor {
    pub hostname: String,
    pub ip: String,
    pub serial: String,
    pub product_line: String,
    pub firmware_version: String,
    pub connection_status: ConnectionStatus,
}

impl DiscoveredSensor {
    /// Standardize a raw record and mark it connected if its hostname or ip
    /// has a session.
    pub fn from_record(record: &DiscoveryRecord, connected: &HashSet<String>) -> Self {
        let field = |keys: &[&str]| {
            keys.iter()
                .filter_map(|key| record.get(*key))
                .find(|value| !value.is_empty())
                .cloned()
                .unwrap_or_else(|| UNKNOWN.to_string())
        };

        let hostname = field(&["hostname"]);
        let ip = field(&["ip"]);
        let connection_status = if connected.contains(&hostname) || connected.contains(&ip) {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Discovered
        };

        Self {
            serial: field(&["serial", "sn"]),
            product_line: field(&["product_line", "prod_line", "model"]),
            firmware_version: field(&["firmware_version", "fw_rev"]),
            hostname,
            ip,
            connection_status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DiscoverOutcome {
    Success { sensors: Vec<DiscoveredSensor> },
    Error { error: String },
}

impl DiscoverOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, DiscoverOutcome::Error { .. })
    }
}

pub struct DiscoveryAdapter {
    devices: Arc<DeviceRegistry>,
    command: CommandSpec,
    timeout: Duration,
}

impl DiscoveryAdapter {
    pub fn new(devices: Arc<DeviceRegistry>, config: &ServerConfig) -> Self {
        Self {
            devices,
            command: config.discovery.clone(),
            timeout: config.discovery_timeout,
        }
    }

    pub async fn discover(&self, progress: &Progress) -> DiscoverOutcome {
        info!("Searching for Ouster sensors on the network");
        progress.info("Searching for Ouster sensors on the network using mDNS");
        progress.percent(10);

        match self.run(progress).await {
            Ok(sensors) => {
                info!(count = sensors.len(), "Discovery finished");
                progress.info(format!("Found {} sensors on the network", sensors.len()));
                progress.percent(100);
                DiscoverOutcome::Success { sensors }
            }
            Err(e) => {
                error!(error = %e, "Sensor discovery failed");
                progress.error(e.to_string());
                DiscoverOutcome::Error {
                    error: e.to_string(),
                }
            }
        }
    }

    async fn run(&self, progress: &Progress) -> Result<Vec<DiscoveredSensor>, ToolError> {
        progress.percent(30);
        let stdout = self.run_command().await?;
        progress.percent(60);

        if stdout.trim().is_empty() {
            info!("No sensors found on the network");
            return Ok(Vec::new());
        }

        let records = parse_discovery_output(&stdout)?;
        let connected = self.devices.keys().await;
        Ok(records
            .iter()
            .map(|record| DiscoveredSensor::from_record(record, &connected))
            .collect())
    }

    async fn run_command(&self) -> Result<String, ToolError> {
        let child = Command::new(&self.command.program)
            .args(&self.command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolError::DiscoveryFailed(e.to_string()))?;

        // On timeout the wait future is dropped and the child killed with it.
        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| ToolError::DiscoveryFailed(e.to_string()))?,
            Err(_) => return Err(ToolError::DiscoveryTimeout(self.timeout.as_secs())),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let detail = if stderr.is_empty() {
                output.status.to_string()
            } else {
                stderr
            };
            return Err(ToolError::DiscoveryFailed(detail));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Parse discovery output: JSON first, then the line grammar.
pub fn parse_discovery_output(text: &str) -> Result<Vec<DiscoveryRecord>, ToolError> {
    match parse_json(text) {
        Ok(records) => Ok(records),
        Err(e) => {
            debug!(error = %e, "Discovery output is not JSON, using line parser");
            parse_lines(text)
        }
    }
}

fn parse_json(text: &str) -> Result<Vec<DiscoveryRecord>, serde_json::Error> {
    let mut records = Vec::new();
    for value in serde_json::Deserializer::from_str(text).into_iter::<Value>() {
        match value? {
            Value::Array(items) => {
                for item in items {
                    records.push(json_record(item)?);
                }
            }
            object @ Value::Object(_) => records.push(json_record(object)?),
            other => {
                return Err(serde_json::Error::custom(format!(
                    "expected sensor objects, found {other}"
                )))
            }
        }
    }
    Ok(records)
}

fn json_record(value: Value) -> Result<DiscoveryRecord, serde_json::Error> {
    let Value::Object(map) = value else {
        return Err(serde_json::Error::custom("expected a sensor object"));
    };
    Ok(map
        .into_iter()
        .filter_map(|(key, value)| {
            let text = match value {
                Value::Null => return None,
                Value::String(s) => s,
                other => other.to_string(),
            };
            Some((key.to_lowercase(), text))
        })
        .collect())
}

fn parse_lines(text: &str) -> Result<Vec<DiscoveryRecord>, ToolError> {
    let mut records = Vec::new();
    let mut current: Option<DiscoveryRecord> = None;
    let mut recognized = false;

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(hostname) = line
            .strip_prefix("Sensor:")
            .or_else(|| line.strip_prefix("S:"))
        {
            records.extend(current.take());
            let mut record = DiscoveryRecord::new();
            record.insert("hostname".to_string(), hostname.trim().to_string());
            current = Some(record);
            recognized = true;
        } else if let Some((key, value)) = line.split_once(':') {
            current
                .get_or_insert_with(DiscoveryRecord::new)
                .insert(normalize_key(key), value.trim().to_string());
            recognized = true;
        }
    }
    records.extend(current);

    if !recognized {
        let excerpt: String = text.trim().chars().take(EXCERPT_CHARS).collect();
        return Err(ToolError::DiscoveryParse(excerpt));
    }
    Ok(records)
}

fn normalize_key(key: &str) -> String {
    let key = key.trim().to_lowercase().replace(' ', "_");
    if key == "i" {
        "ip".to_string()
    } else {
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn standardized(text: &str, connected: &[&str]) -> Vec<DiscoveredSensor> {
        let connected: HashSet<String> = connected.iter().map(|s| s.to_string()).collect();
        parse_discovery_output(text)
            .expect("output should parse")
            .iter()
            .map(|r| DiscoveredSensor::from_record(r, &connected))
            .collect()
    }

    #[test]
    fn json_array_uses_sdk_key_names() {
        let sensors = standardized(
            r#"[{"hostname": "os-122.local", "ip": "10.0.0.5", "sn": 122, "prod_line": "OS-1-64", "fw_rev": "v2.5.2"}]"#,
            &[],
        );
        assert_eq!(
            sensors,
            vec![DiscoveredSensor {
                hostname: "os-122.local".to_string(),
                ip: "10.0.0.5".to_string(),
                serial: "122".to_string(),
                product_line: "OS-1-64".to_string(),
                firmware_version: "v2.5.2".to_string(),
                connection_status: ConnectionStatus::Discovered,
            }]
        );
    }

    #[test]
    fn json_object_stream_is_accepted() {
        let sensors = standardized(
            "{\"hostname\": \"a\"}\n{\"hostname\": \"b\", \"ip\": \"10.0.0.9\"}\n",
            &["10.0.0.9"],
        );
        assert_eq!(sensors.len(), 2);
        assert_eq!(sensors[0].ip, UNKNOWN);
        assert_eq!(sensors[1].connection_status, ConnectionStatus::Connected);
    }

    #[test]
    fn line_listing_falls_back_after_malformed_json() {
        let text = "Sensor: os-122.local\n  i: 10.0.0.5\n  Serial: 122\n  Model: OS-1-64\nS: os-7.local\n  FW Rev: v3.0.1\n";
        let sensors = standardized(text, &["os-7.local"]);

        assert_eq!(sensors.len(), 2);
        assert_eq!(sensors[0].hostname, "os-122.local");
        assert_eq!(sensors[0].ip, "10.0.0.5");
        assert_eq!(sensors[0].serial, "122");
        assert_eq!(sensors[0].product_line, "OS-1-64");
        assert_eq!(sensors[0].firmware_version, UNKNOWN);
        assert_eq!(sensors[0].connection_status, ConnectionStatus::Discovered);

        assert_eq!(sensors[1].firmware_version, "v3.0.1");
        assert_eq!(sensors[1].connection_status, ConnectionStatus::Connected);
    }

    #[test]
    fn truncated_json_with_listing_lines_uses_fallback() {
        let records = parse_discovery_output("[{\"hostname\": \"os-1\"\nSensor: os-2\n").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].get("hostname").map(String::as_str), Some("os-2"));
    }

    #[test]
    fn keys_are_normalized() {
        assert_eq!(normalize_key(" Product Line "), "product_line");
        assert_eq!(normalize_key("I"), "ip");
        assert_eq!(normalize_key("fw_rev"), "fw_rev");
    }

    #[test]
    fn unrecognized_output_is_a_parse_failure() {
        let err = parse_discovery_output("no sensors responded").unwrap_err();
        assert!(matches!(err, ToolError::DiscoveryParse(_)));
        assert!(err.to_string().contains("no sensors responded"));
    }

    #[cfg(unix)]
    mod command {
        use super::super::*;

        fn adapter(program: &str, args: &[&str], timeout: Duration) -> DiscoveryAdapter {
            let mut config = ServerConfig::default();
            config.discovery = CommandSpec::new(program, args.iter().copied());
            config.discovery_timeout = timeout;
            DiscoveryAdapter::new(Arc::new(DeviceRegistry::new()), &config)
        }

        #[tokio::test]
        async fn empty_output_is_success_with_no_sensors() {
            let adapter = adapter("true", &[], Duration::from_secs(5));
            let outcome = adapter.discover(&Progress::noop()).await;
            assert_eq!(outcome, DiscoverOutcome::Success { sensors: vec![] });
        }

        #[tokio::test]
        async fn nonzero_exit_reports_stderr() {
            let adapter = adapter("sh", &["-c", "echo 'mDNS unavailable' >&2; exit 2"], Duration::from_secs(5));
            match adapter.discover(&Progress::noop()).await {
                DiscoverOutcome::Error { error } => {
                    assert_eq!(error, "Failed to discover sensors: mDNS unavailable")
                }
                other => panic!("expected error, got {other:?}"),
            }
        }

        #[tokio::test]
        async fn slow_command_times_out() {
            let adapter = adapter("sleep", &["5"], Duration::from_secs(1));
            match adapter.discover(&Progress::noop()).await {
                DiscoverOutcome::Error { error } => {
                    assert_eq!(error, "Discovery command timed out after 1 seconds")
                }
                other => panic!("expected timeout, got {other:?}"),
            }
        }

        #[tokio::test]
        async fn command_json_is_standardized() {
            let adapter = adapter(
                "sh",
                &["-c", r#"echo '[{"hostname": "os-1", "ip": "10.0.0.5"}]'"#],
                Duration::from_secs(5),
            );
            let outcome = adapter.discover(&Progress::noop()).await;
            let DiscoverOutcome::Success { sensors } = outcome else {
                panic!("discovery should succeed");
            };
            assert_eq!(sensors[0].connection_status, ConnectionStatus::Discovered);
        }
    }
}
