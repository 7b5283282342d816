//! Persistence client contract
//!
//! Durable storage for backend configs, volume records, storage classes,
//! nodes, snapshots, and the volume-transaction journal. Stores guarantee
//! single-writer semantics per key but are not transactional across keys;
//! the orchestrator's journal exists precisely to bridge that gap.

mod memory;
mod passthrough;

pub use memory::InMemoryStore;
pub use passthrough::PassthroughStore;

use crate::error::Result;
use crate::storage::{
    Backend, BackendPersistent, Node, Snapshot, Volume, VolumeConfig, VolumeExternal,
};
use crate::storage_class::{StorageClass, StorageClassPersistent};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// =============================================================================
// Store Types and Versioning
// =============================================================================

/// Kind of persistence client backing the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreType {
    Memory,
    Passthrough,
}

impl std::fmt::Display for StoreType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreType::Memory => write!(f, "memory"),
            StoreType::Passthrough => write!(f, "passthrough"),
        }
    }
}

/// On-disk schema version record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistentStateVersion {
    pub store_version: String,
    pub orchestrator_api_version: String,
}

// =============================================================================
// Key Layout
// =============================================================================

pub const BACKEND_PREFIX: &str = "/backend/";
pub const VOLUME_PREFIX: &str = "/volume/";
pub const STORAGE_CLASS_PREFIX: &str = "/storage_class/";
pub const NODE_PREFIX: &str = "/node/";
pub const SNAPSHOT_PREFIX: &str = "/snapshot/";
pub const TRANSACTION_PREFIX: &str = "/transaction/";
pub const STORE_INFO_KEY: &str = "/orchestrator/store_info";

pub fn backend_key(name: &str) -> String {
    format!("{}{}", BACKEND_PREFIX, name)
}

pub fn volume_key(name: &str) -> String {
    format!("{}{}", VOLUME_PREFIX, name)
}

pub fn storage_class_key(name: &str) -> String {
    format!("{}{}", STORAGE_CLASS_PREFIX, name)
}

pub fn node_key(name: &str) -> String {
    format!("{}{}", NODE_PREFIX, name)
}

pub fn snapshot_key(name: &str) -> String {
    format!("{}{}", SNAPSHOT_PREFIX, name)
}

pub fn transaction_key(op: VolumeOperation, name: &str) -> String {
    format!("{}{}-{}", TRANSACTION_PREFIX, op, name)
}

// =============================================================================
// Volume Transactions
// =============================================================================

/// Orchestrator operation recorded in the crash-recovery journal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VolumeOperation {
    AddVolume,
    DeleteVolume,
    ResizeVolume,
    ImportVolume,
    AddSnapshot,
    DeleteSnapshot,
}

impl std::fmt::Display for VolumeOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VolumeOperation::AddVolume => write!(f, "addVolume"),
            VolumeOperation::DeleteVolume => write!(f, "deleteVolume"),
            VolumeOperation::ResizeVolume => write!(f, "resizeVolume"),
            VolumeOperation::ImportVolume => write!(f, "importVolume"),
            VolumeOperation::AddSnapshot => write!(f, "addSnapshot"),
            VolumeOperation::DeleteSnapshot => write!(f, "deleteSnapshot"),
        }
    }
}

/// A journal entry describing an in-flight operation. Written before the
/// driver call, cleared only after the durable post-state is consistent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeTransaction {
    pub op: VolumeOperation,
    pub config: VolumeConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Snapshot>,
}

impl VolumeTransaction {
    pub fn new(op: VolumeOperation, config: VolumeConfig) -> Self {
        Self {
            op,
            config,
            snapshot: None,
        }
    }

    /// Store key; at most one transaction per (op, name) exists at a time.
    pub fn key(&self) -> String {
        transaction_key(self.op, &self.config.name)
    }
}

// =============================================================================
// Client Contract
// =============================================================================

/// Contract every persistence client satisfies. All operations are
/// synchronous from the orchestrator's perspective; errors are classified
/// through the crate error kinds (notably `KeyNotFound`).
#[async_trait]
pub trait Client: Send + Sync {
    fn store_type(&self) -> StoreType;

    async fn get_version(&self) -> Result<PersistentStateVersion>;
    async fn set_version(&self, version: &PersistentStateVersion) -> Result<()>;
    async fn stop(&self) -> Result<()>;

    // Backends
    async fn add_backend(&self, backend: &Backend) -> Result<()>;
    async fn get_backend(&self, name: &str) -> Result<BackendPersistent>;
    async fn update_backend(&self, backend: &Backend) -> Result<()>;
    async fn delete_backend(&self, backend: &Backend) -> Result<()>;
    async fn get_backends(&self) -> Result<Vec<BackendPersistent>>;
    async fn delete_backends(&self) -> Result<()>;

    // Volumes
    async fn add_volume(&self, volume: &Volume) -> Result<()>;
    async fn get_volume(&self, name: &str) -> Result<VolumeExternal>;
    async fn update_volume(&self, volume: &Volume) -> Result<()>;
    async fn delete_volume(&self, volume: &Volume) -> Result<()>;
    async fn delete_volume_ignore_not_found(&self, volume: &Volume) -> Result<()>;
    async fn get_volumes(&self) -> Result<Vec<VolumeExternal>>;
    async fn delete_volumes(&self) -> Result<()>;

    // Volume transactions
    async fn add_volume_transaction(&self, txn: &VolumeTransaction) -> Result<()>;
    async fn get_volume_transactions(&self) -> Result<Vec<VolumeTransaction>>;
    async fn get_existing_volume_transaction(
        &self,
        txn: &VolumeTransaction,
    ) -> Result<Option<VolumeTransaction>>;
    async fn delete_volume_transaction(&self, txn: &VolumeTransaction) -> Result<()>;

    // Storage classes
    async fn add_storage_class(&self, sc: &StorageClass) -> Result<()>;
    async fn get_storage_class(&self, name: &str) -> Result<StorageClassPersistent>;
    async fn get_storage_classes(&self) -> Result<Vec<StorageClassPersistent>>;
    async fn delete_storage_class(&self, sc: &StorageClass) -> Result<()>;

    // Snapshots
    async fn add_snapshot(&self, snapshot: &Snapshot) -> Result<()>;
    async fn get_snapshot(&self, name: &str) -> Result<Snapshot>;
    async fn get_snapshots(&self) -> Result<Vec<Snapshot>>;
    async fn delete_snapshot(&self, snapshot: &Snapshot) -> Result<()>;

    // Nodes
    async fn add_or_update_node(&self, node: &Node) -> Result<()>;
    async fn get_node(&self, name: &str) -> Result<Node>;
    async fn get_nodes(&self) -> Result<Vec<Node>>;
    async fn delete_node(&self, node: &Node) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_keys() {
        let txn = VolumeTransaction::new(
            VolumeOperation::AddVolume,
            VolumeConfig {
                name: "v1".into(),
                size: "1024".into(),
                ..Default::default()
            },
        );
        assert_eq!(txn.key(), "/transaction/addVolume-v1");

        let txn = VolumeTransaction::new(VolumeOperation::DeleteSnapshot, txn.config);
        assert_eq!(txn.key(), "/transaction/deleteSnapshot-v1");
    }

    #[test]
    fn test_entity_keys() {
        assert_eq!(backend_key("fast-a"), "/backend/fast-a");
        assert_eq!(volume_key("v1"), "/volume/v1");
        assert_eq!(storage_class_key("gold"), "/storage_class/gold");
        assert_eq!(node_key("worker-1"), "/node/worker-1");
        assert_eq!(snapshot_key("snap-1"), "/snapshot/snap-1");
    }

    #[test]
    fn test_transaction_serde_round_trip() {
        let txn = VolumeTransaction::new(
            VolumeOperation::ResizeVolume,
            VolumeConfig {
                name: "v1".into(),
                size: "2048".into(),
                ..Default::default()
            },
        );
        let json = serde_json::to_string(&txn).unwrap();
        assert!(json.contains("\"op\":\"resizeVolume\""));
        let back: VolumeTransaction = serde_json::from_str(&json).unwrap();
        assert_eq!(back, txn);
    }
}
