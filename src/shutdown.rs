//! Coordinated teardown on exit.
//!
//! Both registries are drained and sealed before anything is awaited, so
//! nothing can be registered behind the drain and a stuck resource never
//! leaves entries behind. Sensor handles are closed first, then visualizer
//! trees are terminated, then the transport is cancelled. Each phase has its
//! own deadline; every handle close is bounded on its own.

use crate::registry::{DeviceRegistry, ProcessRegistry};
use crate::viz::{terminate_tree, ProcessInspector};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What a teardown managed to do.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    pub sessions_closed: usize,
    pub session_failures: usize,
    pub processes_signalled: usize,
    pub process_failures: usize,
    pub timed_out: bool,
}

pub struct ShutdownCoordinator {
    devices: Arc<DeviceRegistry>,
    processes: Arc<ProcessRegistry>,
    inspector: Arc<dyn ProcessInspector>,
    cancel: CancellationToken,
    started: AtomicBool,
    timeout: Duration,
    terminate_grace: Duration,
}

impl ShutdownCoordinator {
    pub fn new(
        devices: Arc<DeviceRegistry>,
        processes: Arc<ProcessRegistry>,
        inspector: Arc<dyn ProcessInspector>,
        timeout: Duration,
        terminate_grace: Duration,
    ) -> Self {
        Self {
            devices,
            processes,
            inspector,
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
            timeout,
            terminate_grace,
        }
    }

    /// Cancelled once teardown finishes; transports stop on it.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Release everything. Only the first call does work; later calls
    /// return `None`.
    pub async fn shutdown(&self) -> Option<ShutdownReport> {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("Shutdown already performed");
            return None;
        }

        info!("Cleaning up resources before shutdown");
        let sessions = self.devices.drain_and_seal().await;
        let processes = self.processes.drain_and_seal().await;
        let mut report = ShutdownReport::default();

        let mut closing = JoinSet::new();
        for (address, session) in sessions {
            let limit = self.timeout;
            closing.spawn(async move {
                info!(address = %address, "Closing connection to sensor");
                let result = timeout(limit, session.release()).await;
                (address, result)
            });
        }
        while let Some(joined) = closing.join_next().await {
            match joined {
                Ok((_, Ok(Ok(())))) => report.sessions_closed += 1,
                Ok((address, Ok(Err(e)))) => {
                    error!(address = %address, error = %e, "Error closing sensor connection");
                    report.session_failures += 1;
                }
                Ok((address, Err(_))) => {
                    warn!(address = %address, "Closing sensor connection timed out");
                    report.session_failures += 1;
                    report.timed_out = true;
                }
                Err(e) => {
                    error!(error = %e, "Sensor close task failed");
                    report.session_failures += 1;
                }
            }
        }

        let mut stopping = JoinSet::new();
        for (address, entry) in processes {
            let inspector = Arc::clone(&self.inspector);
            let grace = self.terminate_grace;
            stopping.spawn(async move {
                let termination = terminate_tree(&inspector, entry.pid, grace).await;
                (address, entry.pid, termination)
            });
        }
        let drained = timeout(self.timeout, async {
            while let Some(joined) = stopping.join_next().await {
                match joined {
                    Ok((address, pid, termination)) if termination.delivered => {
                        info!(address = %address, pid, force_killed = termination.force_killed, "Terminated visualization process");
                        report.processes_signalled += 1;
                    }
                    Ok((address, pid, _)) => {
                        error!(address = %address, pid, "Visualization process could not be signalled");
                        report.process_failures += 1;
                    }
                    Err(e) => {
                        error!(error = %e, "Visualization termination task failed");
                        report.process_failures += 1;
                    }
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!(timeout_secs = self.timeout.as_secs(), "Visualization teardown timed out");
            report.timed_out = true;
        }

        info!(
            sessions_closed = report.sessions_closed,
            session_failures = report.session_failures,
            processes_signalled = report.processes_signalled,
            process_failures = report.process_failures,
            "Stopping MCP server"
        );
        self.cancel.cancel();
        Some(report)
    }
}
