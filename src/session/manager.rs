//! Session manager owning sensor connections.

use super::types::{
    ConnectOutcome, DisconnectOutcome, InfoOutcome, SensorDetails, SensorSummary, SessionSummary,
};
use crate::error::{SdkError, ToolError};
use crate::progress::Progress;
use crate::registry::{AddressLocks, DeviceRegistry, DeviceSession};
use crate::sdk::SensorSdk;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Opens, tracks and releases sensor sessions.
///
/// Every connect/disconnect/refresh for an address runs under that address's
/// lock, so concurrent connects to one sensor open exactly one SDK handle.
pub struct SessionManager {
    sdk: Arc<dyn SensorSdk>,
    devices: Arc<DeviceRegistry>,
    locks: AddressLocks,
}

impl SessionManager {
    pub fn new(sdk: Arc<dyn SensorSdk>, devices: Arc<DeviceRegistry>) -> Self {
        Self {
            sdk,
            devices,
            locks: AddressLocks::new(),
        }
    }

    pub fn devices(&self) -> &Arc<DeviceRegistry> {
        &self.devices
    }

    /// Connect to a sensor, or report the existing connection.
    pub async fn connect(&self, address: &str, progress: &Progress) -> ConnectOutcome {
        info!(address = %address, "Connecting to sensor");
        progress.info(format!("Connecting to sensor {address}"));
        progress.percent(10);

        let _guard = self.locks.acquire(address).await;

        if let Some(session) = self.devices.get(address).await {
            info!(address = %address, "Already connected to sensor");
            progress.info(format!("Already connected to sensor {address}"));
            progress.percent(100);
            return ConnectOutcome::AlreadyConnected {
                message: format!("Already connected to sensor {address}"),
                sensor_info: SensorSummary::new(address, &session.metadata()),
            };
        }

        progress.info("Establishing connection");
        progress.percent(30);

        match self.open_session(address, progress).await {
            Ok(session) => {
                let sensor_info = SensorSummary::new(address, &session.metadata());
                info!(
                    address = %address,
                    serial = %sensor_info.serial,
                    model = %sensor_info.model,
                    "Connected to sensor"
                );
                progress.info(format!("Successfully connected to sensor {address}"));
                progress.percent(100);
                ConnectOutcome::Connected {
                    message: format!("Successfully connected to sensor {address}"),
                    sensor_info,
                }
            }
            Err(e) => {
                error!(address = %address, error = %e, "Failed to connect to sensor");
                progress.error(format!("Connection failed: {e}"));
                ConnectOutcome::Error {
                    hostname: address.to_string(),
                    error: e.to_string(),
                }
            }
        }
    }

    /// Open a handle and register it. Nothing stays registered on failure.
    async fn open_session(
        &self,
        address: &str,
        progress: &Progress,
    ) -> Result<Arc<DeviceSession>, ToolError> {
        let mut source = self.sdk.open(address).await?;

        progress.info("Connection established, retrieving sensor metadata");
        progress.percent(60);

        let metadata = match source.fetch_metadata().await {
            Ok(metadata) => metadata,
            Err(e) => {
                if let Err(close_err) = source.close().await {
                    warn!(address = %address, error = %close_err, "Error closing handle after metadata failure");
                }
                return Err(e.into());
            }
        };

        progress.info("Storing connection information");
        progress.percent(90);

        let session = Arc::new(DeviceSession::new(address, metadata, source));
        if let Err(e) = self.devices.insert(address, Arc::clone(&session)).await {
            if let Err(close_err) = session.release().await {
                warn!(address = %address, error = %close_err, "Error closing rejected handle");
            }
            return Err(e.into());
        }
        Ok(session)
    }

    /// Disconnect from a sensor. Safe to call for unknown addresses.
    pub async fn disconnect(&self, address: &str, progress: &Progress) -> DisconnectOutcome {
        info!(address = %address, "Disconnecting from sensor");
        progress.percent(10);

        let _guard = self.locks.acquire(address).await;

        let Some(session) = self.devices.remove(address).await else {
            info!(address = %address, "Sensor was not connected");
            progress.percent(100);
            return DisconnectOutcome::NotConnected {
                hostname: address.to_string(),
                message: format!("Sensor {address} is not connected"),
            };
        };

        progress.info("Closing sensor connection");
        progress.percent(50);

        if let Err(e) = session.release().await {
            warn!(address = %address, error = %e, "Error closing sensor connection");
        }

        progress.info(format!("Successfully disconnected from sensor {address}"));
        progress.percent(100);
        DisconnectOutcome::Disconnected {
            hostname: address.to_string(),
            message: format!("Successfully disconnected from sensor {address}"),
        }
    }

    /// Cached metadata for a connected sensor, optionally re-read first.
    pub async fn info(&self, address: &str, refresh: bool, progress: &Progress) -> InfoOutcome {
        let Some(session) = self.devices.get(address).await else {
            return not_connected_info(address);
        };

        if refresh {
            let _guard = self.locks.acquire(address).await;
            progress.info(format!("Refreshing metadata for sensor {address}"));
            progress.percent(30);

            let result = {
                let mut handle = session.handle().await;
                match handle.as_mut() {
                    Some(source) => source.fetch_metadata().await,
                    None => Err(SdkError::Closed),
                }
            };

            match result {
                Ok(metadata) => {
                    debug!(address = %address, "Sensor metadata refreshed");
                    session.replace_metadata(metadata);
                }
                Err(e) => {
                    error!(address = %address, error = %e, "Failed to refresh sensor metadata");
                    progress.error(format!("Failed to refresh metadata: {e}"));
                    if e.invalidates_handle() {
                        self.discard(address, &session).await;
                    }
                    return InfoOutcome::Error {
                        hostname: address.to_string(),
                        error: e.to_string(),
                    };
                }
            }
        }

        progress.percent(100);
        InfoOutcome::Success {
            sensor_info: SensorDetails::from(session.as_ref()),
        }
    }

    /// Address, serial and model of every session, unordered.
    pub async fn list(&self) -> Vec<SessionSummary> {
        self.devices
            .snapshot()
            .await
            .iter()
            .map(|(_, session)| SessionSummary::from(session.as_ref()))
            .collect()
    }

    /// Session for read-only consumers such as scan operations.
    pub async fn session(&self, address: &str) -> Option<Arc<DeviceSession>> {
        self.devices.get(address).await
    }

    /// Drop a session whose handle turned out to be unusable.
    pub async fn discard(&self, address: &str, session: &Arc<DeviceSession>) {
        let removed = self
            .devices
            .remove_if(address, |current| Arc::ptr_eq(current, session))
            .await;
        if removed.is_some() {
            warn!(address = %address, "Removed sensor session with an invalid handle");
            if let Err(e) = session.release().await {
                debug!(address = %address, error = %e, "Error releasing invalid handle");
            }
        }
    }
}

fn not_connected_info(address: &str) -> InfoOutcome {
    InfoOutcome::NotConnected {
        hostname: address.to_string(),
        message: format!("Sensor {address} is not connected. Use connect_sensor first."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdk::fake::FakeSdk;
    use std::time::Duration;

    fn manager_with(sdk: Arc<FakeSdk>) -> SessionManager {
        SessionManager::new(sdk, Arc::new(DeviceRegistry::new()))
    }

    #[tokio::test]
    async fn connect_twice_reuses_the_session() {
        let sdk = Arc::new(FakeSdk::new());
        let manager = manager_with(Arc::clone(&sdk));
        let progress = Progress::noop();

        let first = manager.connect("os-1", &progress).await;
        assert!(matches!(first, ConnectOutcome::Connected { .. }));

        let second = manager.connect("os-1", &progress).await;
        match second {
            ConnectOutcome::AlreadyConnected { sensor_info, .. } => {
                assert_eq!(sensor_info.serial, "SN-os-1");
            }
            other => panic!("expected already_connected, got {other:?}"),
        }
        assert_eq!(sdk.opens(), 1);
        assert_eq!(manager.devices().len().await, 1);
    }

    #[tokio::test]
    async fn concurrent_connects_open_one_handle() {
        let sdk = Arc::new(FakeSdk::new().with_open_delay(Duration::from_millis(20)));
        let manager = Arc::new(manager_with(Arc::clone(&sdk)));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move { manager.connect("os-1", &Progress::noop()).await })
            })
            .collect();

        let mut connected = 0;
        for task in tasks {
            match task.await.expect("connect task should not panic") {
                ConnectOutcome::Connected { .. } => connected += 1,
                ConnectOutcome::AlreadyConnected { .. } => {}
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        assert_eq!(connected, 1);
        assert_eq!(sdk.opens(), 1);
    }

    #[tokio::test]
    async fn failed_open_registers_nothing() {
        let sdk = Arc::new(FakeSdk::new());
        sdk.fail_open("os-1");
        let manager = manager_with(Arc::clone(&sdk));

        let outcome = manager.connect("os-1", &Progress::noop()).await;
        match outcome {
            ConnectOutcome::Error { hostname, error } => {
                assert_eq!(hostname, "os-1");
                assert!(error.contains("connection refused"));
            }
            other => panic!("expected error, got {other:?}"),
        }
        assert!(manager.devices().is_empty().await);
    }

    #[tokio::test]
    async fn metadata_failure_closes_the_opened_handle() {
        let sdk = Arc::new(FakeSdk::new());
        sdk.fail_metadata("os-1");
        let manager = manager_with(Arc::clone(&sdk));

        let outcome = manager.connect("os-1", &Progress::noop()).await;
        assert!(outcome.is_error());
        assert_eq!(sdk.opens(), 1);
        assert_eq!(sdk.closes(), 1);
        assert!(manager.devices().is_empty().await);
    }

    #[tokio::test]
    async fn connect_after_seal_closes_the_handle() {
        let sdk = Arc::new(FakeSdk::new());
        let manager = manager_with(Arc::clone(&sdk));
        manager.devices().drain_and_seal().await;

        let outcome = manager.connect("os-1", &Progress::noop()).await;
        match outcome {
            ConnectOutcome::Error { error, .. } => assert!(error.contains("shutting down")),
            other => panic!("expected error, got {other:?}"),
        }
        assert_eq!(sdk.closes(), 1);
        assert!(manager.devices().is_empty().await);
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let sdk = Arc::new(FakeSdk::new());
        let manager = manager_with(Arc::clone(&sdk));
        let progress = Progress::noop();

        assert!(matches!(
            manager.disconnect("os-1", &progress).await,
            DisconnectOutcome::NotConnected { .. }
        ));

        manager.connect("os-1", &progress).await;
        assert!(matches!(
            manager.disconnect("os-1", &progress).await,
            DisconnectOutcome::Disconnected { .. }
        ));
        assert!(matches!(
            manager.disconnect("os-1", &progress).await,
            DisconnectOutcome::NotConnected { .. }
        ));
        assert_eq!(sdk.closes(), 1);
    }

    #[tokio::test]
    async fn disconnect_removes_entry_even_if_close_fails() {
        let sdk = Arc::new(FakeSdk::new());
        sdk.fail_close("os-1");
        let manager = manager_with(Arc::clone(&sdk));

        manager.connect("os-1", &Progress::noop()).await;
        let outcome = manager.disconnect("os-1", &Progress::noop()).await;

        assert!(matches!(outcome, DisconnectOutcome::Disconnected { .. }));
        assert!(manager.devices().is_empty().await);
    }

    #[tokio::test]
    async fn info_reports_cached_metadata() {
        let sdk = Arc::new(FakeSdk::new());
        let manager = manager_with(Arc::clone(&sdk));

        assert!(matches!(
            manager.info("os-1", false, &Progress::noop()).await,
            InfoOutcome::NotConnected { .. }
        ));

        manager.connect("os-1", &Progress::noop()).await;
        match manager.info("os-1", true, &Progress::noop()).await {
            InfoOutcome::Success { sensor_info } => {
                assert_eq!(sensor_info.hostname, "os-1");
                assert_eq!(sensor_info.mode, "1024x10");
                assert_eq!(sensor_info.lidar_columns_per_frame, 1024);
            }
            other => panic!("expected success, got {other:?}"),
        }
        assert_eq!(sdk.opens(), 1);
    }

    #[tokio::test]
    async fn discard_drops_only_the_matching_session() {
        let sdk = Arc::new(FakeSdk::new());
        let manager = manager_with(Arc::clone(&sdk));
        manager.connect("os-1", &Progress::noop()).await;

        let session = manager.session("os-1").await.expect("session should exist");
        manager.discard("os-1", &session).await;
        assert!(manager.session("os-1").await.is_none());
        assert_eq!(sdk.closes(), 1);

        // A stale reference no longer matches anything.
        manager.discard("os-1", &session).await;
        assert_eq!(sdk.closes(), 1);
    }

    #[tokio::test]
    async fn list_reports_every_session() {
        let sdk = Arc::new(FakeSdk::new());
        let manager = manager_with(Arc::clone(&sdk));
        manager.connect("os-1", &Progress::noop()).await;
        manager.connect("os-2", &Progress::noop()).await;

        let mut listed: Vec<_> = manager.list().await.into_iter().map(|s| s.hostname).collect();
        listed.sort();
        assert_eq!(listed, vec!["os-1", "os-2"]);
    }
}
