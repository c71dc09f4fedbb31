//! Process introspection and signalling.
//!
//! [`SysinfoInspector`] reports status, CPU and memory and can walk a
//! process tree. [`SignalInspector`] only knows liveness and signal delivery;
//! it is used where sysinfo does not support the platform. The choice is made
//! once by [`detect`].
//!
//! All methods block; async callers run them on the blocking pool.

use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    Terminate,
    Kill,
}

#[derive(Error, Debug)]
pub enum InspectError {
    #[error("process {0} not found")]
    NotFound(u32),
    #[error("failed to signal process {pid}: {reason}")]
    Signal { pid: u32, reason: String },
    #[error("process signals are not supported on this platform")]
    Unsupported,
}

/// Point-in-time resource usage of one process.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessSnapshot {
    pub status: String,
    pub cpu_percent: f32,
    pub memory_percent: f32,
}

pub trait ProcessInspector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether [`ProcessInspector::snapshots`] returns resource metrics.
    fn supports_metrics(&self) -> bool;

    /// Zombies count as dead.
    fn is_alive(&self, pid: u32) -> bool;

    /// Every process below `pid`, parents before their children.
    fn descendants(&self, pid: u32) -> Vec<u32>;

    /// Metrics for the given pids that are still around.
    fn snapshots(&self, pids: &[u32]) -> HashMap<u32, ProcessSnapshot>;

    fn signal(&self, pid: u32, signal: StopSignal) -> Result<(), InspectError>;
}

/// Pick the richest inspector the platform supports.
pub fn detect() -> Arc<dyn ProcessInspector> {
    let inspector: Arc<dyn ProcessInspector> = if sysinfo::IS_SUPPORTED_SYSTEM {
        Arc::new(SysinfoInspector::new())
    } else {
        warn!("Process introspection unavailable; visualization listings will omit metrics");
        Arc::new(SignalInspector)
    };
    info!(inspector = inspector.name(), "Process inspector selected");
    inspector
}

#[cfg(unix)]
fn raw_signal(signal: StopSignal) -> libc::c_int {
    match signal {
        StopSignal::Terminate => libc::SIGTERM,
        StopSignal::Kill => libc::SIGKILL,
    }
}

/// Signal every member of the process group led by `pgid`.
///
/// Visualizers are spawned as group leaders, so this reaches helpers they
/// fork even when the inspector cannot walk the process tree.
#[cfg(unix)]
pub fn signal_group(pgid: u32, signal: StopSignal) -> Result<(), InspectError> {
    let pgid_t = libc::pid_t::try_from(pgid).map_err(|_| InspectError::NotFound(pgid))?;
    // kill(-1) would hit every process we may signal.
    if pgid_t <= 1 {
        return Err(InspectError::NotFound(pgid));
    }
    // SAFETY: a negative pid targets the process group, nothing else.
    if unsafe { libc::kill(-pgid_t, raw_signal(signal)) } == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Err(InspectError::NotFound(pgid))
    } else {
        Err(InspectError::Signal {
            pid: pgid,
            reason: err.to_string(),
        })
    }
}

#[cfg(not(unix))]
pub fn signal_group(_pgid: u32, _signal: StopSignal) -> Result<(), InspectError> {
    Err(InspectError::Unsupported)
}

/// Whether any process (zombies included) is left in the group.
#[cfg(unix)]
pub fn group_exists(pgid: u32) -> bool {
    let Ok(pgid_t) = libc::pid_t::try_from(pgid) else {
        return false;
    };
    if pgid_t <= 1 {
        return false;
    }
    // SAFETY: signal 0 only performs the existence and permission check.
    if unsafe { libc::kill(-pgid_t, 0) } == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn group_exists(_pgid: u32) -> bool {
    false
}

pub struct SysinfoInspector {
    system: Mutex<System>,
}

impl SysinfoInspector {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, System> {
        self.system.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for SysinfoInspector {
    fn default() -> Self {
        Self::new()
    }
}

fn is_running(status: ProcessStatus) -> bool {
    !matches!(status, ProcessStatus::Zombie | ProcessStatus::Dead)
}

impl ProcessInspector for SysinfoInspector {
    fn name(&self) -> &'static str {
        "sysinfo"
    }

    fn supports_metrics(&self) -> bool {
        true
    }

    fn is_alive(&self, pid: u32) -> bool {
        let pid = Pid::from_u32(pid);
        let mut system = self.lock();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing(),
        );
        system
            .process(pid)
            .is_some_and(|process| is_running(process.status()))
    }

    fn descendants(&self, pid: u32) -> Vec<u32> {
        let mut system = self.lock();
        system.refresh_processes_specifics(ProcessesToUpdate::All, true, ProcessRefreshKind::nothing());

        let mut children: HashMap<Pid, Vec<Pid>> = HashMap::new();
        for (child, process) in system.processes() {
            // Linux lists threads as processes too.
            if process.thread_kind().is_some() {
                continue;
            }
            if let Some(parent) = process.parent() {
                children.entry(parent).or_default().push(*child);
            }
        }

        let root = Pid::from_u32(pid);
        let mut seen = HashSet::from([root]);
        let mut queue = VecDeque::from([root]);
        let mut found = Vec::new();
        while let Some(current) = queue.pop_front() {
            for child in children.get(&current).into_iter().flatten() {
                if seen.insert(*child) {
                    found.push(child.as_u32());
                    queue.push_back(*child);
                }
            }
        }
        found
    }

    fn snapshots(&self, pids: &[u32]) -> HashMap<u32, ProcessSnapshot> {
        if pids.is_empty() {
            return HashMap::new();
        }
        let targets: Vec<Pid> = pids.iter().map(|pid| Pid::from_u32(*pid)).collect();
        let kind = || ProcessRefreshKind::nothing().with_cpu().with_memory();

        let mut system = self.lock();
        system.refresh_memory();
        // CPU usage is the delta between two refreshes.
        system.refresh_processes_specifics(ProcessesToUpdate::Some(&targets), true, kind());
        std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
        system.refresh_processes_specifics(ProcessesToUpdate::Some(&targets), true, kind());

        let total_memory = system.total_memory();
        targets
            .iter()
            .filter_map(|pid| {
                let process = system.process(*pid)?;
                if !is_running(process.status()) {
                    return None;
                }
                let memory_percent = if total_memory > 0 {
                    (process.memory() as f64 / total_memory as f64 * 100.0) as f32
                } else {
                    0.0
                };
                Some((
                    pid.as_u32(),
                    ProcessSnapshot {
                        status: process.status().to_string().to_lowercase(),
                        cpu_percent: process.cpu_usage(),
                        memory_percent,
                    },
                ))
            })
            .collect()
    }

    fn signal(&self, pid: u32, signal: StopSignal) -> Result<(), InspectError> {
        let target = Pid::from_u32(pid);
        let mut system = self.lock();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[target]),
            true,
            ProcessRefreshKind::nothing(),
        );
        let process = system.process(target).ok_or(InspectError::NotFound(pid))?;
        let sig = match signal {
            StopSignal::Terminate => sysinfo::Signal::Term,
            StopSignal::Kill => sysinfo::Signal::Kill,
        };
        debug!(pid, ?signal, "Sending signal");
        match process.kill_with(sig) {
            Some(true) => Ok(()),
            Some(false) => Err(InspectError::Signal {
                pid,
                reason: "signal delivery failed".to_string(),
            }),
            None => Err(InspectError::Unsupported),
        }
    }
}

/// Liveness and signals via `kill(2)`; no metrics, no process tree.
pub struct SignalInspector;

impl ProcessInspector for SignalInspector {
    fn name(&self) -> &'static str {
        "signal"
    }

    fn supports_metrics(&self) -> bool {
        false
    }

    #[cfg(unix)]
    fn is_alive(&self, pid: u32) -> bool {
        let Ok(pid_t) = libc::pid_t::try_from(pid) else {
            return false;
        };
        // SAFETY: signal 0 only performs the existence and permission check.
        let result = unsafe { libc::kill(pid_t, 0) };
        if result == 0 {
            return true;
        }
        // EPERM means the process exists but belongs to someone else.
        std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    #[cfg(not(unix))]
    fn is_alive(&self, _pid: u32) -> bool {
        // Without a way to check, assume alive so nothing is purged early.
        true
    }

    fn descendants(&self, _pid: u32) -> Vec<u32> {
        Vec::new()
    }

    fn snapshots(&self, _pids: &[u32]) -> HashMap<u32, ProcessSnapshot> {
        HashMap::new()
    }

    #[cfg(unix)]
    fn signal(&self, pid: u32, signal: StopSignal) -> Result<(), InspectError> {
        let pid_t = libc::pid_t::try_from(pid).map_err(|_| InspectError::NotFound(pid))?;
        // SAFETY: plain kill(2) on a positive pid.
        if unsafe { libc::kill(pid_t, raw_signal(signal)) } == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            Err(InspectError::NotFound(pid))
        } else {
            Err(InspectError::Signal {
                pid,
                reason: err.to_string(),
            })
        }
    }

    #[cfg(not(unix))]
    fn signal(&self, _pid: u32, _signal: StopSignal) -> Result<(), InspectError> {
        Err(InspectError::Unsupported)
    }
}
