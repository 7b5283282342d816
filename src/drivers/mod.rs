//! Storage driver capability
//!
//! The core consumes backends exclusively through the [`StorageDriver`]
//! trait. Concrete drivers live behind a factory that dispatches on the
//! `storageDriverName` discriminator found in every backend config.

pub mod fake;

pub use fake::{FakeDriver, FakeDriverConfig, FakePoolConfig};

use crate::attributes::Request;
use crate::config::Protocol;
use crate::error::{Error, Result};
use crate::storage::{
    Snapshot, StoragePool, VolumeConfig, VolumeExternal, VolumePublishInfo,
};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;

// =============================================================================
// Driver Names
// =============================================================================

pub const ONTAP_NAS: &str = "ontap-nas";
pub const ONTAP_NAS_QTREE: &str = "ontap-nas-qtree";
pub const ONTAP_NAS_FLEXGROUP: &str = "ontap-nas-flexgroup";
pub const ONTAP_SAN: &str = "ontap-san";
pub const SOLIDFIRE_SAN: &str = "solidfire-san";
pub const ESERIES_ISCSI: &str = "eseries-iscsi";
pub const AWS_NFS: &str = "aws-nfs";
pub const FAKE: &str = "fake";

/// Driver names a backend config may legitimately carry
pub const KNOWN_DRIVERS: &[&str] = &[
    ONTAP_NAS,
    ONTAP_NAS_QTREE,
    ONTAP_NAS_FLEXGROUP,
    ONTAP_SAN,
    SOLIDFIRE_SAN,
    ESERIES_ISCSI,
    AWS_NFS,
    FAKE,
];

// =============================================================================
// Common Config
// =============================================================================

/// Settings shared by every driver config, used to pick the concrete driver
/// before the full config is handed over.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommonDriverConfig {
    #[serde(default)]
    pub version: i64,
    pub storage_driver_name: String,
    #[serde(default)]
    pub backend_name: String,
    #[serde(default)]
    pub storage_prefix: Option<String>,
}

/// Parse and validate the common settings of a driver config.
pub fn validate_common_config(config_json: &str) -> Result<CommonDriverConfig> {
    let common: CommonDriverConfig = serde_json::from_str(config_json)
        .map_err(|e| Error::InvalidInput(format!("malformed driver config: {}", e)))?;
    if common.storage_driver_name.is_empty() {
        return Err(Error::InvalidInput(
            "driver config is missing storageDriverName".into(),
        ));
    }
    if !KNOWN_DRIVERS.contains(&common.storage_driver_name.as_str()) {
        return Err(Error::InvalidInput(format!(
            "unknown storage driver: {}",
            common.storage_driver_name
        )));
    }
    Ok(common)
}

/// Instantiate a driver for the given config JSON. The driver is returned
/// uninitialized; callers invoke [`StorageDriver::initialize`] so that a
/// failed initialization can leave a previously active backend untouched.
pub fn new_driver_for_config(config_json: &str) -> Result<Arc<dyn StorageDriver>> {
    let common = validate_common_config(config_json)?;
    match common.storage_driver_name.as_str() {
        FAKE => Ok(Arc::new(FakeDriver::from_config_json(config_json)?)),
        other => Err(Error::NotSupported(format!(
            "storage driver {} is not built into this binary",
            other
        ))),
    }
}

// =============================================================================
// Update Diffing
// =============================================================================

/// Which aspects of a backend config changed between two driver instances
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum UpdateType {
    /// The new config is of a different driver type entirely
    InvalidUpdate,
    /// The volume name prefix changed; existing internal names would break
    PrefixChange,
    /// Credentials changed; same storage system, new login
    CredentialsChange,
    /// The config points at a different storage system
    IdentityChange,
}

// =============================================================================
// Driver Trait
// =============================================================================

/// Capability a backend exposes to the core.
///
/// All driver calls may block on network I/O; the orchestrator deliberately
/// holds its lock across them.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Driver type name (the `storageDriverName` discriminator)
    fn driver_name(&self) -> &str;

    /// Configured backend instance name
    fn backend_name(&self) -> String;

    /// Stable key identifying the storage system this driver manages; two
    /// backends reporting the same key are duplicates.
    fn storage_system_key(&self) -> String;

    fn initialized(&self) -> bool;

    /// Validate config and connect to the storage system.
    async fn initialize(&self) -> Result<()>;

    /// Release any resources; the driver reports uninitialized afterwards.
    async fn terminate(&self);

    /// Create a volume on the named pool.
    async fn create(
        &self,
        config: &VolumeConfig,
        pool: &str,
        requests: &BTreeMap<String, Request>,
    ) -> Result<()>;

    /// Create a clone of `clone_source_volume` from the given config.
    async fn create_clone(&self, config: &VolumeConfig) -> Result<()>;

    /// Create a volume from an existing snapshot.
    async fn create_from_snapshot(
        &self,
        snapshot: &Snapshot,
        config: &VolumeConfig,
    ) -> Result<()>;

    /// Destroy a volume by internal name. Destroying a volume that does not
    /// exist is not an error.
    async fn destroy(&self, internal_name: &str) -> Result<()>;

    /// Fill in the access info a freshly created volume needs for mounting.
    async fn create_followup(&self, config: &mut VolumeConfig) -> Result<()>;

    /// Prepare the volume for attachment to a host and fill the node-side
    /// publish parameters.
    async fn publish(&self, internal_name: &str, info: &mut VolumePublishInfo) -> Result<()>;

    /// Check that a volume exists on the backend.
    async fn get(&self, internal_name: &str) -> Result<()>;

    /// Deterministic on-backend name for an external volume name.
    fn get_internal_volume_name(&self, name: &str) -> String;

    /// Report the pools this backend offers, in a stable order.
    async fn get_storage_backend_specs(&self) -> Result<IndexMap<String, StoragePool>>;

    async fn create_snapshot(&self, snapshot_name: &str, config: &VolumeConfig)
        -> Result<Snapshot>;

    async fn delete_snapshot(&self, snapshot_name: &str, config: &VolumeConfig) -> Result<()>;

    async fn snapshot_list(&self, internal_name: &str) -> Result<Vec<Snapshot>>;

    /// Grow a volume to the requested size.
    async fn resize(&self, internal_name: &str, size_bytes: u64) -> Result<()>;

    /// Externalized form of a volume known to the backend, by external name.
    async fn get_volume_external(&self, name: &str) -> Result<VolumeExternal>;

    /// Stream every volume on the backend; used by bootstrap-time discovery.
    /// Errors are delivered per item, the stream itself never fails.
    async fn get_volume_external_wrappers(&self, tx: mpsc::Sender<Result<VolumeExternal>>);

    /// Diff this (new) driver's config against the currently active one.
    fn get_update_type(&self, old: &dyn StorageDriver) -> std::collections::BTreeSet<UpdateType>;

    fn get_protocol(&self) -> Protocol;

    /// The driver config as persisted in a backend record.
    fn persistent_config(&self) -> Result<serde_json::Value>;

    fn as_any(&self) -> &dyn Any;
}
