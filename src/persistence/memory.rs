//! In-memory persistence client
//!
//! Retains everything it is handed with full durable-store semantics, so the
//! orchestrator's bootstrap and recovery paths can be exercised against real
//! records. Backed by DashMap for concurrent access.

use crate::config::{ORCHESTRATOR_API_VERSION, STORE_VERSION};
use crate::error::{Error, Result};
use crate::persistence::{
    backend_key, node_key, snapshot_key, storage_class_key, volume_key, Client,
    PersistentStateVersion, StoreType, VolumeTransaction,
};
use crate::storage::{Backend, BackendPersistent, Node, Snapshot, Volume, VolumeExternal};
use crate::storage_class::{StorageClass, StorageClassPersistent};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

/// Durable-semantics reference store
pub struct InMemoryStore {
    backends: DashMap<String, BackendPersistent>,
    volumes: DashMap<String, VolumeExternal>,
    transactions: DashMap<String, VolumeTransaction>,
    storage_classes: DashMap<String, StorageClassPersistent>,
    snapshots: DashMap<String, Snapshot>,
    nodes: DashMap<String, Node>,
    version: Mutex<PersistentStateVersion>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            backends: DashMap::new(),
            volumes: DashMap::new(),
            transactions: DashMap::new(),
            storage_classes: DashMap::new(),
            snapshots: DashMap::new(),
            nodes: DashMap::new(),
            version: Mutex::new(PersistentStateVersion {
                store_version: STORE_VERSION.to_string(),
                orchestrator_api_version: ORCHESTRATOR_API_VERSION.to_string(),
            }),
        }
    }

    fn insert_new<V>(map: &DashMap<String, V>, key: String, value: V) -> Result<()> {
        match map.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(e) => Err(Error::KeyExists {
                key: e.key().clone(),
            }),
            dashmap::mapref::entry::Entry::Vacant(e) => {
                e.insert(value);
                Ok(())
            }
        }
    }

    fn replace_existing<V>(map: &DashMap<String, V>, key: String, value: V) -> Result<()> {
        match map.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(mut e) => {
                e.insert(value);
                Ok(())
            }
            dashmap::mapref::entry::Entry::Vacant(e) => Err(Error::KeyNotFound {
                key: e.into_key(),
            }),
        }
    }

    fn remove_existing<V>(map: &DashMap<String, V>, key: &str) -> Result<()> {
        map.remove(key)
            .map(|_| ())
            .ok_or_else(|| Error::KeyNotFound {
                key: key.to_string(),
            })
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Client for InMemoryStore {
    fn store_type(&self) -> StoreType {
        StoreType::Memory
    }

    async fn get_version(&self) -> Result<PersistentStateVersion> {
        Ok(self.version.lock().clone())
    }

    async fn set_version(&self, version: &PersistentStateVersion) -> Result<()> {
        *self.version.lock() = version.clone();
        Ok(())
    }

    /// Clears all state so a subsequent bootstrap starts afresh.
    async fn stop(&self) -> Result<()> {
        self.backends.clear();
        self.volumes.clear();
        self.transactions.clear();
        self.storage_classes.clear();
        self.snapshots.clear();
        self.nodes.clear();
        Ok(())
    }

    // =========================================================================
    // Backends
    // =========================================================================

    async fn add_backend(&self, backend: &Backend) -> Result<()> {
        Self::insert_new(
            &self.backends,
            backend_key(&backend.name),
            backend.construct_persistent()?,
        )
    }

    async fn get_backend(&self, name: &str) -> Result<BackendPersistent> {
        self.backends
            .get(&backend_key(name))
            .map(|r| r.value().clone())
            .ok_or_else(|| Error::KeyNotFound {
                key: backend_key(name),
            })
    }

    async fn update_backend(&self, backend: &Backend) -> Result<()> {
        Self::replace_existing(
            &self.backends,
            backend_key(&backend.name),
            backend.construct_persistent()?,
        )
    }

    async fn delete_backend(&self, backend: &Backend) -> Result<()> {
        Self::remove_existing(&self.backends, &backend_key(&backend.name))
    }

    async fn get_backends(&self) -> Result<Vec<BackendPersistent>> {
        Ok(self.backends.iter().map(|r| r.value().clone()).collect())
    }

    async fn delete_backends(&self) -> Result<()> {
        self.backends.clear();
        Ok(())
    }

    // =========================================================================
    // Volumes
    // =========================================================================

    async fn add_volume(&self, volume: &Volume) -> Result<()> {
        Self::insert_new(
            &self.volumes,
            volume_key(&volume.config.name),
            volume.construct_external(),
        )
    }

    async fn get_volume(&self, name: &str) -> Result<VolumeExternal> {
        self.volumes
            .get(&volume_key(name))
            .map(|r| r.value().clone())
            .ok_or_else(|| Error::KeyNotFound {
                key: volume_key(name),
            })
    }

    async fn update_volume(&self, volume: &Volume) -> Result<()> {
        Self::replace_existing(
            &self.volumes,
            volume_key(&volume.config.name),
            volume.construct_external(),
        )
    }

    async fn delete_volume(&self, volume: &Volume) -> Result<()> {
        Self::remove_existing(&self.volumes, &volume_key(&volume.config.name))
    }

    async fn delete_volume_ignore_not_found(&self, volume: &Volume) -> Result<()> {
        self.volumes.remove(&volume_key(&volume.config.name));
        Ok(())
    }

    async fn get_volumes(&self) -> Result<Vec<VolumeExternal>> {
        Ok(self.volumes.iter().map(|r| r.value().clone()).collect())
    }

    async fn delete_volumes(&self) -> Result<()> {
        self.volumes.clear();
        Ok(())
    }

    // =========================================================================
    // Volume Transactions
    // =========================================================================

    async fn add_volume_transaction(&self, txn: &VolumeTransaction) -> Result<()> {
        // Overwrites are allowed; the orchestrator checks for an existing
        // entry before journaling a new operation.
        self.transactions.insert(txn.key(), txn.clone());
        Ok(())
    }

    async fn get_volume_transactions(&self) -> Result<Vec<VolumeTransaction>> {
        Ok(self.transactions.iter().map(|r| r.value().clone()).collect())
    }

    async fn get_existing_volume_transaction(
        &self,
        txn: &VolumeTransaction,
    ) -> Result<Option<VolumeTransaction>> {
        Ok(self.transactions.get(&txn.key()).map(|r| r.value().clone()))
    }

    async fn delete_volume_transaction(&self, txn: &VolumeTransaction) -> Result<()> {
        Self::remove_existing(&self.transactions, &txn.key())
    }

    // =========================================================================
    // Storage Classes
    // =========================================================================

    async fn add_storage_class(&self, sc: &StorageClass) -> Result<()> {
        Self::insert_new(
            &self.storage_classes,
            storage_class_key(sc.name()),
            sc.construct_persistent(),
        )
    }

    async fn get_storage_class(&self, name: &str) -> Result<StorageClassPersistent> {
        self.storage_classes
            .get(&storage_class_key(name))
            .map(|r| r.value().clone())
            .ok_or_else(|| Error::KeyNotFound {
                key: storage_class_key(name),
            })
    }

    async fn get_storage_classes(&self) -> Result<Vec<StorageClassPersistent>> {
        Ok(self
            .storage_classes
            .iter()
            .map(|r| r.value().clone())
            .collect())
    }

    async fn delete_storage_class(&self, sc: &StorageClass) -> Result<()> {
        Self::remove_existing(&self.storage_classes, &storage_class_key(sc.name()))
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    async fn add_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        Self::insert_new(
            &self.snapshots,
            snapshot_key(&snapshot.name),
            snapshot.clone(),
        )
    }

    async fn get_snapshot(&self, name: &str) -> Result<Snapshot> {
        self.snapshots
            .get(&snapshot_key(name))
            .map(|r| r.value().clone())
            .ok_or_else(|| Error::KeyNotFound {
                key: snapshot_key(name),
            })
    }

    async fn get_snapshots(&self) -> Result<Vec<Snapshot>> {
        Ok(self.snapshots.iter().map(|r| r.value().clone()).collect())
    }

    async fn delete_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        Self::remove_existing(&self.snapshots, &snapshot_key(&snapshot.name))
    }

    // =========================================================================
    // Nodes
    // =========================================================================

    async fn add_or_update_node(&self, node: &Node) -> Result<()> {
        self.nodes.insert(node_key(&node.name), node.clone());
        Ok(())
    }

    async fn get_node(&self, name: &str) -> Result<Node> {
        self.nodes
            .get(&node_key(name))
            .map(|r| r.value().clone())
            .ok_or_else(|| Error::KeyNotFound {
                key: node_key(name),
            })
    }

    async fn get_nodes(&self) -> Result<Vec<Node>> {
        Ok(self.nodes.iter().map(|r| r.value().clone()).collect())
    }

    async fn delete_node(&self, node: &Node) -> Result<()> {
        Self::remove_existing(&self.nodes, &node_key(&node.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::VolumeOperation;
    use crate::storage::VolumeConfig;

    fn volume(name: &str) -> Volume {
        Volume::new(
            VolumeConfig {
                name: name.into(),
                size: "1024".into(),
                ..Default::default()
            },
            "fast-a",
            "fast-small",
        )
    }

    #[tokio::test]
    async fn test_volume_crud() {
        let store = InMemoryStore::new();
        let vol = volume("v1");

        store.add_volume(&vol).await.unwrap();
        assert!(store.add_volume(&vol).await.is_err());

        let fetched = store.get_volume("v1").await.unwrap();
        assert_eq!(fetched, vol.construct_external());

        store.delete_volume(&vol).await.unwrap();
        assert!(store.get_volume("v1").await.unwrap_err().is_key_not_found());
        assert!(store.delete_volume(&vol).await.unwrap_err().is_key_not_found());

        store.delete_volume_ignore_not_found(&vol).await.unwrap();
    }

    #[tokio::test]
    async fn test_transaction_lifecycle() {
        let store = InMemoryStore::new();
        let txn = VolumeTransaction::new(VolumeOperation::AddVolume, volume("v1").config);

        assert!(store
            .get_existing_volume_transaction(&txn)
            .await
            .unwrap()
            .is_none());

        store.add_volume_transaction(&txn).await.unwrap();
        let existing = store
            .get_existing_volume_transaction(&txn)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(existing, txn);
        assert_eq!(store.get_volume_transactions().await.unwrap().len(), 1);

        // A delete transaction for the same volume lives under its own key.
        let delete_txn =
            VolumeTransaction::new(VolumeOperation::DeleteVolume, txn.config.clone());
        store.add_volume_transaction(&delete_txn).await.unwrap();
        assert_eq!(store.get_volume_transactions().await.unwrap().len(), 2);

        store.delete_volume_transaction(&txn).await.unwrap();
        store.delete_volume_transaction(&delete_txn).await.unwrap();
        assert!(store.get_volume_transactions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_node_upsert() {
        let store = InMemoryStore::new();
        let mut node = Node {
            name: "worker-1".into(),
            iqn: "iqn.a".into(),
            ips: vec!["10.0.0.1".into()],
        };
        store.add_or_update_node(&node).await.unwrap();

        node.iqn = "iqn.b".into();
        store.add_or_update_node(&node).await.unwrap();
        assert_eq!(store.get_node("worker-1").await.unwrap().iqn, "iqn.b");

        assert_eq!(store.get_nodes().await.unwrap().len(), 1);
        store.delete_node(&node).await.unwrap();
        assert!(store.get_node("worker-1").await.unwrap_err().is_key_not_found());
    }

    #[tokio::test]
    async fn test_stop_clears_state() {
        let store = InMemoryStore::new();
        store.add_volume(&volume("v1")).await.unwrap();
        store
            .add_or_update_node(&Node {
                name: "n1".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        store.stop().await.unwrap();
        assert!(store.get_volumes().await.unwrap().is_empty());
        assert!(store.get_nodes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_version() {
        let store = InMemoryStore::new();
        let version = store.get_version().await.unwrap();
        assert_eq!(version.store_version, STORE_VERSION);

        let new_version = PersistentStateVersion {
            store_version: "v2".into(),
            orchestrator_api_version: "2".into(),
        };
        store.set_version(&new_version).await.unwrap();
        assert_eq!(store.get_version().await.unwrap(), new_version);
    }
}
