//! Launches, tracks and stops visualizer processes.

use super::inspector::{group_exists, signal_group, ProcessInspector, StopSignal};
use super::types::{StartOutcome, StopOutcome, VizListing, VizSummary};
use crate::config::{CommandSpec, ServerConfig};
use crate::error::ToolError;
use crate::progress::Progress;
use crate::registry::{AddressLocks, DeviceRegistry, ProcessRegistry, VisualizationProcess};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};

/// Interval between liveness checks while waiting for SIGTERM to land.
const TERMINATE_POLL_INTERVAL_MS: u64 = 100;
/// Bound on reading the output of a visualizer that exited during settle.
const EXIT_OUTPUT_TIMEOUT_MS: u64 = 1000;

/// Per-address visualizer lifecycle: absent → starting → running → stopping.
///
/// Start and stop for one address are serialized; the process registry is only
/// written from here and from the shutdown drain.
pub struct VisualizationSupervisor {
    devices: Arc<DeviceRegistry>,
    processes: Arc<ProcessRegistry>,
    inspector: Arc<dyn ProcessInspector>,
    locks: AddressLocks,
    command: CommandSpec,
    settle_delay: Duration,
    terminate_grace: Duration,
}

impl VisualizationSupervisor {
    pub fn new(
        devices: Arc<DeviceRegistry>,
        processes: Arc<ProcessRegistry>,
        inspector: Arc<dyn ProcessInspector>,
        config: &ServerConfig,
    ) -> Self {
        Self {
            devices,
            processes,
            inspector,
            locks: AddressLocks::new(),
            command: config.visualizer.clone(),
            settle_delay: config.settle_delay,
            terminate_grace: config.terminate_grace,
        }
    }

    pub fn processes(&self) -> &Arc<ProcessRegistry> {
        &self.processes
    }

    /// Launch a visualizer for a connected sensor.
    pub async fn start(&self, address: &str, progress: &Progress) -> StartOutcome {
        info!(address = %address, "Starting visualization");
        progress.info(format!("Starting visualization for sensor {address}"));
        progress.percent(10);

        let _guard = self.locks.acquire(address).await;

        if !self.devices.contains(address).await {
            progress.info(format!("Sensor {address} is not connected"));
            return StartOutcome::NotConnected {
                hostname: address.to_string(),
                message: format!(
                    "Sensor {address} is not connected. Use connect_sensor first."
                ),
            };
        }

        if let Some(existing) = self.processes.get(address).await {
            if self.is_alive(existing.pid).await {
                info!(address = %address, pid = existing.pid, "Visualization already running");
                progress.percent(100);
                return StartOutcome::AlreadyRunning {
                    hostname: address.to_string(),
                    pid: existing.pid,
                    message: format!(
                        "Visualization already running for sensor {address} (PID: {})",
                        existing.pid
                    ),
                };
            }
            debug!(address = %address, pid = existing.pid, "Purging dead visualization entry");
            self.processes
                .remove_if(address, |p| p.pid == existing.pid)
                .await;
        }

        progress.info("Launching visualization process");
        progress.percent(30);

        match self.launch(address, progress).await {
            Ok(pid) => {
                info!(address = %address, pid, "Visualization started");
                progress.info(format!("Visualization started with PID {pid}"));
                progress.percent(100);
                StartOutcome::Success {
                    hostname: address.to_string(),
                    pid,
                    message: format!("Visualization started for sensor {address}"),
                }
            }
            Err(e) => {
                error!(address = %address, error = %e, "Failed to start visualization");
                progress.error(e.to_string());
                StartOutcome::Error {
                    hostname: address.to_string(),
                    error: e.to_string(),
                }
            }
        }
    }

    /// Spawn, wait out the settle delay, then hand the child to a monitor.
    /// Until the hand-off the child is killed if this future is dropped.
    async fn launch(&self, address: &str, progress: &Progress) -> Result<u32, ToolError> {
        let mut cmd = Command::new(&self.command.program);
        cmd.args(self.command.render_args(address))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| ToolError::Spawn(e.to_string()))?;
        let pid = child
            .id()
            .ok_or_else(|| ToolError::Spawn("process exited before reporting a pid".to_string()))?;
        debug!(address = %address, pid, command = %self.command.command_line(address), "Visualizer spawned");

        progress.info("Waiting for visualization to initialize");
        progress.percent(60);
        sleep(self.settle_delay).await;

        match child.try_wait() {
            Ok(Some(status)) => {
                let output = exit_output(&mut child).await;
                warn!(address = %address, pid, %status, "Visualizer exited during startup");
                return Err(ToolError::ExitedImmediately(output));
            }
            Ok(None) => {}
            Err(e) => return Err(ToolError::Spawn(e.to_string())),
        }

        let entry = VisualizationProcess::new(pid, self.command.command_line(address));
        // Sealed during shutdown: dropping the child kills it.
        self.processes.insert(address, entry).await?;

        spawn_monitor(child, address.to_string(), pid, Arc::clone(&self.processes));
        Ok(pid)
    }

    /// Stop the visualizer tree for an address.
    pub async fn stop(&self, address: &str, progress: &Progress) -> StopOutcome {
        info!(address = %address, "Stopping visualization");
        progress.percent(10);

        let _guard = self.locks.acquire(address).await;

        let Some(entry) = self.processes.get(address).await else {
            progress.percent(100);
            return StopOutcome::NotRunning {
                hostname: address.to_string(),
                message: "No visualization is currently running for this sensor".to_string(),
            };
        };

        progress.percent(40);
        if !self.is_alive(entry.pid).await {
            info!(address = %address, pid = entry.pid, "Visualization already exited");
            self.processes.remove_if(address, |p| p.pid == entry.pid).await;
            progress.percent(100);
            return StopOutcome::NotRunning {
                hostname: address.to_string(),
                message: format!(
                    "Visualization process (PID: {}) is no longer running",
                    entry.pid
                ),
            };
        }

        progress.info(format!("Terminating visualization process {}", entry.pid));
        let force_killed = terminate_tree(&self.inspector, entry.pid, self.terminate_grace)
            .await
            .force_killed;
        self.processes.remove_if(address, |p| p.pid == entry.pid).await;

        info!(address = %address, pid = entry.pid, force_killed, "Visualization stopped");
        progress.percent(100);
        StopOutcome::Success {
            hostname: address.to_string(),
            message: "Visualization stopped successfully".to_string(),
            force_killed,
        }
    }

    /// Live visualizers with resource usage; dead entries are purged.
    pub async fn list(&self, progress: &Progress) -> VizListing {
        progress.percent(10);
        let entries = self.processes.snapshot().await;
        let pids: Vec<u32> = entries.iter().map(|(_, p)| p.pid).collect();

        let supports_metrics = self.inspector.supports_metrics();
        let (alive, snapshots) = self
            .inspect(move |inspector| {
                let alive: Vec<u32> = pids.into_iter().filter(|p| inspector.is_alive(*p)).collect();
                let snapshots = inspector.snapshots(&alive);
                (alive, snapshots)
            })
            .await
            .unwrap_or_else(|| {
                // Inspection failed outright; report everything without metrics.
                (entries.iter().map(|(_, p)| p.pid).collect(), HashMap::new())
            });
        progress.percent(70);

        let mut visualizations = Vec::with_capacity(alive.len());
        for (address, entry) in entries {
            let snapshot = snapshots.get(&entry.pid);
            let gone = !alive.contains(&entry.pid) || (supports_metrics && snapshot.is_none());
            if gone {
                info!(address = %address, pid = entry.pid, "Purging exited visualization");
                self.processes.remove_if(&address, |p| p.pid == entry.pid).await;
                continue;
            }
            visualizations.push(VizSummary {
                hostname: address,
                pid: entry.pid,
                status: snapshot
                    .map(|s| s.status.clone())
                    .unwrap_or_else(|| "unknown".to_string()),
                cpu_percent: snapshot.map(|s| s.cpu_percent),
                memory_percent: snapshot.map(|s| s.memory_percent),
                running_time: entry.uptime_secs(),
                started_at: entry.started_at,
                command: entry.command,
            });
        }

        progress.percent(100);
        let total_count = visualizations.len();
        VizListing {
            visualizations,
            total_count,
        }
    }

    async fn is_alive(&self, pid: u32) -> bool {
        // Unknown counts as alive so a running viewer is never orphaned.
        self.inspect(move |inspector| inspector.is_alive(pid))
            .await
            .unwrap_or(true)
    }

    async fn inspect<T, F>(&self, f: F) -> Option<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn ProcessInspector) -> T + Send + 'static,
    {
        inspect(&self.inspector, f).await
    }
}

/// Run a blocking inspector call off the async workers.
async fn inspect<T, F>(inspector: &Arc<dyn ProcessInspector>, f: F) -> Option<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn ProcessInspector) -> T + Send + 'static,
{
    let inspector = Arc::clone(inspector);
    match tokio::task::spawn_blocking(move || f(inspector.as_ref())).await {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(error = %e, "Process inspection task failed");
            None
        }
    }
}

/// Result of tearing down one visualizer tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Termination {
    /// SIGTERM reached the group or its leader.
    pub delivered: bool,
    /// Processes that outlived the grace period and were killed.
    pub force_killed: usize,
}

/// SIGTERM the process group led by `pid` plus any descendant that left it,
/// wait out the grace period, then SIGKILL whatever is left.
pub async fn terminate_tree(
    inspector: &Arc<dyn ProcessInspector>,
    pid: u32,
    grace: Duration,
) -> Termination {
    let (tree, delivered) = inspect(inspector, move |inspector| {
        let mut tree = inspector.descendants(pid);
        tree.reverse();
        let mut delivered = match signal_group(pid, StopSignal::Terminate) {
            Ok(()) => true,
            Err(e) => {
                debug!(pgid = pid, error = %e, "Group SIGTERM not delivered");
                false
            }
        };
        for target in &tree {
            if let Err(e) = inspector.signal(*target, StopSignal::Terminate) {
                debug!(pid = *target, error = %e, "SIGTERM not delivered");
            }
        }
        match inspector.signal(pid, StopSignal::Terminate) {
            Ok(()) => delivered = true,
            Err(e) => debug!(pid, error = %e, "SIGTERM not delivered"),
        }
        tree.push(pid);
        (tree, delivered)
    })
    .await
    .unwrap_or_else(|| (vec![pid], false));

    if !delivered {
        return Termination::default();
    }

    let deadline = Instant::now() + grace;
    let mut survivors = tree;
    let mut group_alive;
    loop {
        let pending = survivors.clone();
        (survivors, group_alive) = inspect(inspector, move |inspector| {
            let alive: Vec<u32> = pending.into_iter().filter(|p| inspector.is_alive(*p)).collect();
            (alive, group_exists(pid))
        })
        .await
        .unwrap_or_default();
        if (survivors.is_empty() && !group_alive) || Instant::now() >= deadline {
            break;
        }
        sleep(Duration::from_millis(TERMINATE_POLL_INTERVAL_MS)).await;
    }

    if survivors.is_empty() && !group_alive {
        return Termination {
            delivered,
            force_killed: 0,
        };
    }
    warn!(pid, survivors = ?survivors, group_alive, "Processes ignored SIGTERM; killing");
    let count = survivors.len().max(usize::from(group_alive));
    inspect(inspector, move |inspector| {
        if let Err(e) = signal_group(pid, StopSignal::Kill) {
            debug!(pgid = pid, error = %e, "Group SIGKILL not delivered");
        }
        for target in survivors {
            if let Err(e) = inspector.signal(target, StopSignal::Kill) {
                debug!(pid = target, error = %e, "SIGKILL not delivered");
            }
        }
    })
    .await;
    Termination {
        delivered,
        force_killed: count,
    }
}

/// Captured stderr, else stdout, else a placeholder.
async fn exit_output(child: &mut Child) -> String {
    let limit = Duration::from_millis(EXIT_OUTPUT_TIMEOUT_MS);
    let stderr = read_all(child.stderr.take(), limit).await;
    let stdout = read_all(child.stdout.take(), limit).await;
    [stderr, stdout]
        .into_iter()
        .map(|s| s.trim().to_string())
        .find(|s| !s.is_empty())
        .unwrap_or_else(|| "Unknown error".to_string())
}

async fn read_all<R: AsyncRead + Unpin>(reader: Option<R>, limit: Duration) -> String {
    let Some(mut reader) = reader else {
        return String::new();
    };
    let mut buf = Vec::new();
    // A lingering grandchild can hold the pipe open; keep what arrived.
    let _ = timeout(limit, reader.read_to_end(&mut buf)).await;
    String::from_utf8_lossy(&buf).into_owned()
}

/// Own the child after a successful start: log its output, reap it and drop
/// its registry entry so the pid is never signalled after reuse.
fn spawn_monitor(mut child: Child, address: String, pid: u32, processes: Arc<ProcessRegistry>) {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let log_address = address.clone();
    // Forked helpers can hold the pipes open past the viewer's exit.
    tokio::spawn(async move {
        tokio::join!(
            log_lines(stdout, &log_address, "stdout"),
            log_lines(stderr, &log_address, "stderr"),
        );
    });
    tokio::spawn(async move {
        match child.wait().await {
            Ok(status) => info!(address = %address, pid, %status, "Visualization process exited"),
            Err(e) => warn!(address = %address, pid, error = %e, "Failed to reap visualization process"),
        }
        if processes.remove_if(&address, |p| p.pid == pid).await.is_some() {
            debug!(address = %address, pid, "Removed exited visualization from registry");
        }
    });
}

async fn log_lines<R: AsyncRead + Unpin>(reader: Option<R>, address: &str, stream: &'static str) {
    let Some(reader) = reader else {
        return;
    };
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(address = %address, stream, "{line}");
    }
}
