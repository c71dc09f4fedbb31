//! Runtime configuration shared by the server components.

use std::time::Duration;

pub const DEFAULT_OUSTER_CLI: &str = "ouster-cli";
/// Placeholder replaced by the sensor address in visualizer arguments.
pub const ADDRESS_PLACEHOLDER: &str = "{address}";

pub const DISCOVERY_TIMEOUT_SECS: u64 = 10;
pub const SETTLE_DELAY_MS: u64 = 1000;
pub const TERMINATE_GRACE_SECS: u64 = 3;
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 10;
pub const SENSOR_HTTP_TIMEOUT_SECS: u64 = 10;

/// An external program plus its argument template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new<S: Into<String>>(program: impl Into<String>, args: impl IntoIterator<Item = S>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Arguments with the address placeholder filled in.
    pub fn render_args(&self, address: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.replace(ADDRESS_PLACEHOLDER, address))
            .collect()
    }

    /// Full command line for logs and listings.
    pub fn command_line(&self, address: &str) -> String {
        std::iter::once(self.program.clone())
            .chain(self.render_args(address))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Enumerates sensors on the local network.
    pub discovery: CommandSpec,
    /// Launches the point-cloud viewer for one sensor.
    pub visualizer: CommandSpec,
    pub discovery_timeout: Duration,
    /// How long a new visualizer must survive before it counts as started.
    pub settle_delay: Duration,
    pub terminate_grace: Duration,
    pub shutdown_timeout: Duration,
    pub sensor_http_timeout: Duration,
}

impl ServerConfig {
    /// Defaults with discovery and visualization run through `ouster_cli`.
    pub fn with_ouster_cli(ouster_cli: &str) -> Self {
        Self {
            discovery: CommandSpec::new(ouster_cli, ["discover"]),
            visualizer: CommandSpec::new(ouster_cli, ["source", ADDRESS_PLACEHOLDER, "viz"]),
            discovery_timeout: Duration::from_secs(DISCOVERY_TIMEOUT_SECS),
            settle_delay: Duration::from_millis(SETTLE_DELAY_MS),
            terminate_grace: Duration::from_secs(TERMINATE_GRACE_SECS),
            shutdown_timeout: Duration::from_secs(SHUTDOWN_TIMEOUT_SECS),
            sensor_http_timeout: Duration::from_secs(SENSOR_HTTP_TIMEOUT_SECS),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::with_ouster_cli(DEFAULT_OUSTER_CLI)
    }
}
