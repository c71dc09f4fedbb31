use crate::error::SdkError;
use crate::sdk::{SensorMetadata, SensorSource};
use chrono::{DateTime, Utc};
use std::sync::RwLock;
use tokio::sync::{Mutex, MutexGuard};

/// Live connection to one sensor.
///
/// The handle slot is emptied by [`DeviceSession::release`], so a session
/// closes its SDK handle at most once. Readers that find the slot empty treat
/// the session as gone.
pub struct DeviceSession {
    address: String,
    connected_at: DateTime<Utc>,
    metadata: RwLock<SensorMetadata>,
    handle: Mutex<Option<Box<dyn SensorSource>>>,
}

impl DeviceSession {
    pub fn new(address: &str, metadata: SensorMetadata, handle: Box<dyn SensorSource>) -> Self {
        Self {
            address: address.to_string(),
            connected_at: Utc::now(),
            metadata: RwLock::new(metadata),
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn metadata(&self) -> SensorMetadata {
        self.metadata
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn replace_metadata(&self, metadata: SensorMetadata) {
        *self.metadata.write().unwrap_or_else(|e| e.into_inner()) = metadata;
    }

    /// Exclusive access to the SDK handle. `None` once released.
    pub async fn handle(&self) -> MutexGuard<'_, Option<Box<dyn SensorSource>>> {
        self.handle.lock().await
    }

    /// Close the handle. Later calls are no-ops.
    pub async fn release(&self) -> Result<(), SdkError> {
        let taken = self.handle.lock().await.take();
        match taken {
            Some(mut source) => source.close().await,
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("address", &self.address)
            .field("connected_at", &self.connected_at)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdk::fake::{self, FakeSdk};
    use crate::sdk::SensorSdk;

    #[tokio::test]
    async fn release_closes_the_handle_once() {
        let sdk = FakeSdk::new();
        let handle = sdk.open("os-1").await.unwrap();
        let session = DeviceSession::new("os-1", fake::metadata("os-1"), handle);

        session.release().await.expect("release should succeed");
        session.release().await.expect("second release is a no-op");

        assert_eq!(sdk.closes(), 1);
        assert_eq!(sdk.drops(), 0);
        assert!(session.handle().await.is_none());
    }

    #[tokio::test]
    async fn dropping_an_unreleased_session_drops_the_handle() {
        let sdk = FakeSdk::new();
        let handle = sdk.open("os-1").await.unwrap();
        drop(DeviceSession::new("os-1", fake::metadata("os-1"), handle));

        assert_eq!(sdk.closes(), 0);
        assert_eq!(sdk.drops(), 1);
    }

    #[tokio::test]
    async fn metadata_can_be_replaced() {
        let sdk = FakeSdk::new();
        let handle = sdk.open("os-1").await.unwrap();
        let session = DeviceSession::new("os-1", fake::metadata("os-1"), handle);

        let mut updated = fake::metadata("os-1");
        updated.firmware_version = "v3.0.0".to_string();
        session.replace_metadata(updated);

        assert_eq!(session.metadata().firmware_version, "v3.0.0");
    }
}
