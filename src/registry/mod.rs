//! Lock-guarded registries of live resources.
//!
//! A [`Registry`] maps a sensor address to the resource held for it. Both
//! registries are created once and shared by `Arc`; the shutdown path drains
//! and seals them so nothing can be registered after teardown started.

mod devices;
mod locks;
mod processes;

pub use devices::DeviceSession;
pub use locks::AddressLocks;
pub use processes::VisualizationProcess;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

pub type DeviceRegistry = Registry<Arc<DeviceSession>>;
pub type ProcessRegistry = Registry<VisualizationProcess>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Server is shutting down; {0} was not registered")]
    Sealed(String),
    #[error("{0} is already registered")]
    Occupied(String),
}

struct State<V> {
    entries: HashMap<String, V>,
    sealed: bool,
}

/// Address-keyed map with a one-way seal.
pub struct Registry<V> {
    state: RwLock<State<V>>,
}

impl<V> Default for Registry<V> {
    fn default() -> Self {
        Self {
            state: RwLock::new(State {
                entries: HashMap::new(),
                sealed: false,
            }),
        }
    }
}

impl<V: Clone> Registry<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, address: &str) -> Option<V> {
        self.state.read().await.entries.get(address).cloned()
    }

    pub async fn contains(&self, address: &str) -> bool {
        self.state.read().await.entries.contains_key(address)
    }

    pub async fn keys(&self) -> HashSet<String> {
        self.state.read().await.entries.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.entries.is_empty()
    }

    pub async fn is_sealed(&self) -> bool {
        self.state.read().await.sealed
    }

    /// Entries in unspecified order.
    pub async fn snapshot(&self) -> Vec<(String, V)> {
        self.state
            .read()
            .await
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Insert a new entry. Never overwrites; refused once sealed.
    pub async fn insert(&self, address: &str, value: V) -> Result<(), RegistryError> {
        let mut state = self.state.write().await;
        if state.sealed {
            return Err(RegistryError::Sealed(address.to_string()));
        }
        if state.entries.contains_key(address) {
            return Err(RegistryError::Occupied(address.to_string()));
        }
        state.entries.insert(address.to_string(), value);
        Ok(())
    }

    pub async fn remove(&self, address: &str) -> Option<V> {
        self.state.write().await.entries.remove(address)
    }

    /// Remove the entry only if it is still the one the caller looked at.
    pub async fn remove_if<F>(&self, address: &str, same: F) -> Option<V>
    where
        F: FnOnce(&V) -> bool,
    {
        let mut state = self.state.write().await;
        if state.entries.get(address).is_some_and(same) {
            state.entries.remove(address)
        } else {
            None
        }
    }

    /// Take every entry and refuse all later inserts.
    pub async fn drain_and_seal(&self) -> Vec<(String, V)> {
        let mut state = self.state.write().await;
        state.sealed = true;
        state.entries.drain().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_never_overwrites() {
        let registry: Registry<u32> = Registry::new();
        registry.insert("os-1", 1).await.expect("first insert should succeed");

        let err = registry.insert("os-1", 2).await.unwrap_err();
        assert_eq!(err, RegistryError::Occupied("os-1".to_string()));
        assert_eq!(registry.get("os-1").await, Some(1));
    }

    #[tokio::test]
    async fn remove_if_keeps_a_replaced_entry() {
        let registry: Registry<u32> = Registry::new();
        registry.insert("os-1", 41).await.unwrap();

        assert_eq!(registry.remove_if("os-1", |pid| *pid == 40).await, None);
        assert!(registry.contains("os-1").await);
        assert_eq!(registry.remove_if("os-1", |pid| *pid == 41).await, Some(41));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn drain_seals_the_registry() {
        let registry: Registry<u32> = Registry::new();
        registry.insert("a", 1).await.unwrap();
        registry.insert("b", 2).await.unwrap();

        let mut drained = registry.drain_and_seal().await;
        drained.sort();
        assert_eq!(drained, vec![("a".to_string(), 1), ("b".to_string(), 2)]);
        assert!(registry.is_sealed().await);

        let err = registry.insert("c", 3).await.unwrap_err();
        assert!(matches!(err, RegistryError::Sealed(_)));
        assert!(registry.drain_and_seal().await.is_empty());
    }
}
