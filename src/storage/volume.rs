//! Volumes and their externalized forms
//!
//! A volume has an external name (platform-facing) and an internal name
//! (on-backend), derived deterministically by the owning driver so the volume
//! can be re-discovered after a crash.

use crate::config::{AccessMode, Protocol};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// =============================================================================
// Volume Config
// =============================================================================

/// Everything needed to create (or re-create) a volume
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeConfig {
    /// External, platform-facing name
    pub name: String,
    /// On-backend name, derived by the driver's naming rule
    #[serde(default)]
    pub internal_name: String,
    /// Requested size as a decimal string of bytes
    pub size: String,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default)]
    pub storage_class: String,
    #[serde(default)]
    pub access_mode: AccessMode,
    #[serde(default)]
    pub file_system: String,
    #[serde(default)]
    pub snapshot_policy: String,
    #[serde(default)]
    pub snapshot_dir: String,
    #[serde(default)]
    pub unix_permissions: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clone_source_volume: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clone_source_snapshot: Option<String>,
    #[serde(default)]
    pub access_info: VolumeAccessInfo,
}

impl VolumeConfig {
    /// Parse the size string, rejecting anything that is not a plain byte count.
    pub fn size_bytes(&self) -> Result<u64> {
        self.size
            .parse::<u64>()
            .map_err(|_| Error::InvalidInput(format!("could not parse volume size {:?}", self.size)))
    }
}

/// Access parameters a node needs to mount the volume
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeAccessInfo {
    #[serde(default)]
    pub nfs_server_ip: String,
    #[serde(default)]
    pub nfs_path: String,
    #[serde(default)]
    pub iscsi_target_portal: String,
    #[serde(default)]
    pub iscsi_portals: Vec<String>,
    #[serde(default)]
    pub iscsi_target_iqn: String,
    #[serde(default)]
    pub iscsi_lun_number: i32,
    #[serde(default)]
    pub iscsi_interface: String,
    #[serde(default)]
    pub iscsi_igroup: String,
    #[serde(default)]
    pub iscsi_username: String,
    #[serde(default)]
    pub iscsi_initiator_secret: String,
    #[serde(default)]
    pub iscsi_target_secret: String,
}

// =============================================================================
// Volume
// =============================================================================

/// A provisioned volume tracked by the orchestrator
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    pub config: VolumeConfig,
    /// Name of the owning backend
    pub backend: String,
    /// Name of the pool the volume was placed on
    pub pool: String,
    /// Set when the owning backend was replaced and the pool no longer exists
    pub orphaned: bool,
}

impl Volume {
    pub fn new(config: VolumeConfig, backend: impl Into<String>, pool: impl Into<String>) -> Self {
        Self {
            config,
            backend: backend.into(),
            pool: pool.into(),
            orphaned: false,
        }
    }

    pub fn construct_external(&self) -> VolumeExternal {
        VolumeExternal {
            config: self.config.clone(),
            backend: self.backend.clone(),
            pool: self.pool.clone(),
            orphaned: self.orphaned,
        }
    }

    pub fn from_external(ext: VolumeExternal) -> Arc<Volume> {
        Arc::new(Volume {
            config: ext.config,
            backend: ext.backend,
            pool: ext.pool,
            orphaned: ext.orphaned,
        })
    }
}

/// Externalized volume form, also the persisted record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeExternal {
    pub config: VolumeConfig,
    pub backend: String,
    pub pool: String,
    #[serde(default)]
    pub orphaned: bool,
}

// =============================================================================
// Snapshots
// =============================================================================

/// A point-in-time snapshot record; creation and deletion are delegated to
/// the owning driver, the orchestrator only records it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub name: String,
    /// External name of the source volume
    pub volume: String,
    /// RFC3339 creation timestamp
    pub created: String,
    pub size_bytes: u64,
}

// =============================================================================
// Publish Info
// =============================================================================

/// Node-side parameters for publishing a volume, filled in by the driver
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumePublishInfo {
    #[serde(default)]
    pub localhost: bool,
    #[serde(default)]
    pub host_iqn: Vec<String>,
    #[serde(default)]
    pub host_ip: Vec<String>,
    #[serde(default)]
    pub host_name: String,
    #[serde(default)]
    pub filesystem_type: String,
    #[serde(default)]
    pub use_chap: bool,
    #[serde(default)]
    pub shared_target: bool,
}
