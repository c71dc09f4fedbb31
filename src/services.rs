//! Process-wide component graph.
//!
//! Both registries are created once here and handed to every component that
//! needs them; nothing reaches them through globals.

use crate::config::ServerConfig;
use crate::discovery::DiscoveryAdapter;
use crate::registry::{DeviceRegistry, ProcessRegistry};
use crate::scan::ScanOperations;
use crate::sdk::SensorSdk;
use crate::session::SessionManager;
use crate::shutdown::ShutdownCoordinator;
use crate::viz::{ProcessInspector, VisualizationSupervisor};
use std::sync::Arc;

pub struct Services {
    pub devices: Arc<DeviceRegistry>,
    pub processes: Arc<ProcessRegistry>,
    pub sessions: Arc<SessionManager>,
    pub visualizations: VisualizationSupervisor,
    pub discovery: DiscoveryAdapter,
    pub scans: ScanOperations,
    pub shutdown: ShutdownCoordinator,
}

impl Services {
    pub fn new(
        config: &ServerConfig,
        sdk: Arc<dyn SensorSdk>,
        inspector: Arc<dyn ProcessInspector>,
    ) -> Self {
        let devices = Arc::new(DeviceRegistry::new());
        let processes = Arc::new(ProcessRegistry::new());
        let sessions = Arc::new(SessionManager::new(sdk, Arc::clone(&devices)));

        Self {
            visualizations: VisualizationSupervisor::new(
                Arc::clone(&devices),
                Arc::clone(&processes),
                Arc::clone(&inspector),
                config,
            ),
            discovery: DiscoveryAdapter::new(Arc::clone(&devices), config),
            scans: ScanOperations::new(Arc::clone(&sessions)),
            shutdown: ShutdownCoordinator::new(
                Arc::clone(&devices),
                Arc::clone(&processes),
                inspector,
                config.shutdown_timeout,
                config.terminate_grace,
            ),
            devices,
            processes,
            sessions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CommandSpec;
    use crate::progress::Progress;
    use crate::sdk::fake::FakeSdk;
    use crate::session::ConnectOutcome;
    use crate::viz::{SignalInspector, StartOutcome, StopOutcome};
    use std::time::Duration;

    fn services(sdk: Arc<FakeSdk>) -> Services {
        let mut config = ServerConfig::default();
        config.visualizer = CommandSpec::new("sleep", ["30"]);
        config.settle_delay = Duration::from_millis(200);
        config.terminate_grace = Duration::from_millis(500);
        Services::new(&config, sdk, Arc::new(SignalInspector))
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn full_sensor_lifecycle() {
        let sdk = Arc::new(FakeSdk::new());
        let services = services(sdk.clone());
        let progress = Progress::noop();

        let connected = services.sessions.connect("os-1", &progress).await;
        assert!(matches!(connected, ConnectOutcome::Connected { .. }));

        let pid = match services.visualizations.start("os-1", &progress).await {
            StartOutcome::Success { pid, .. } => pid,
            other => panic!("unexpected start outcome: {other:?}"),
        };

        let listing = services.visualizations.list(&progress).await;
        assert_eq!(listing.total_count, 1);
        assert_eq!(listing.visualizations[0].pid, pid);
        assert_eq!(listing.visualizations[0].hostname, "os-1");

        let stopped = services.visualizations.stop("os-1", &progress).await;
        assert!(matches!(stopped, StopOutcome::Success { .. }));
        assert_eq!(services.visualizations.list(&progress).await.total_count, 0);

        services.sessions.disconnect("os-1", &progress).await;
        assert!(services.devices.is_empty().await);
        assert!(services.processes.is_empty().await);
        assert_eq!(sdk.closes(), 1);
    }

    #[tokio::test]
    async fn components_share_one_device_registry() {
        let services = services(Arc::new(FakeSdk::new()));
        services.sessions.connect("os-1", &Progress::noop()).await;

        assert!(services.devices.contains("os-1").await);
        assert!(Arc::ptr_eq(services.sessions.devices(), &services.devices));
        assert!(Arc::ptr_eq(services.visualizations.processes(), &services.processes));
    }

    #[tokio::test]
    async fn shutdown_seals_registries_for_every_component() {
        let services = services(Arc::new(FakeSdk::new()));
        services.sessions.connect("os-1", &Progress::noop()).await;

        let report = services.shutdown.shutdown().await.unwrap();
        assert_eq!(report.sessions_closed, 1);

        let late = services.sessions.connect("os-2", &Progress::noop()).await;
        assert!(late.is_error());
        assert!(services.devices.is_sealed().await);
        assert!(services.processes.is_sealed().await);
    }
}
