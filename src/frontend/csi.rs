//! CSI-shape translation helpers
//!
//! Maps CSI access modes onto orchestrator access modes and protocols,
//! provides the idempotent create/delete semantics CSI requires, builds the
//! publish context a node plugin consumes, and classifies orchestrator
//! errors into CSI status codes.

use crate::config::{AccessMode, Protocol};
use crate::core::Orchestrator;
use crate::error::{Error, Result};
use crate::storage::{VolumeConfig, VolumeExternal, VolumePublishInfo};
use std::collections::BTreeMap;

// =============================================================================
// Access Modes
// =============================================================================

/// CSI volume access modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsiAccessMode {
    SingleNodeWriter,
    SingleNodeReaderOnly,
    MultiNodeReaderOnly,
    MultiNodeSingleWriter,
    MultiNodeMultiWriter,
    Unknown,
}

/// Orchestrator access mode for a CSI access mode.
pub fn access_mode_for(mode: CsiAccessMode) -> AccessMode {
    match mode {
        CsiAccessMode::SingleNodeWriter | CsiAccessMode::SingleNodeReaderOnly => {
            AccessMode::ReadWriteOnce
        }
        CsiAccessMode::MultiNodeReaderOnly => AccessMode::ReadOnlyMany,
        CsiAccessMode::MultiNodeSingleWriter | CsiAccessMode::MultiNodeMultiWriter => {
            AccessMode::ReadWriteMany
        }
        CsiAccessMode::Unknown => AccessMode::Any,
    }
}

/// Protocol constraint implied by a CSI access mode. Only multi-writer
/// forces a protocol; everything else can be served by file or block.
pub fn protocol_for(mode: CsiAccessMode) -> Protocol {
    match mode {
        CsiAccessMode::MultiNodeMultiWriter => Protocol::File,
        _ => Protocol::Any,
    }
}

// =============================================================================
// Status Codes
// =============================================================================

/// CSI status codes the frontend reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsiCode {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    Aborted,
    Unavailable,
    FailedPrecondition,
    Unimplemented,
    Internal,
}

/// Classify an orchestrator error into the code CSI reports for it.
pub fn code_for_error(err: &Error) -> CsiCode {
    if err.is_not_ready() {
        CsiCode::Unavailable
    } else if err.is_not_found() {
        CsiCode::NotFound
    } else if err.is_volume_exists() {
        CsiCode::AlreadyExists
    } else if err.is_in_progress() {
        CsiCode::Aborted
    } else if err.is_invalid_input() {
        CsiCode::InvalidArgument
    } else if err.is_bootstrap() {
        CsiCode::FailedPrecondition
    } else if err.is_not_supported() {
        CsiCode::Unimplemented
    } else {
        CsiCode::Internal
    }
}

// =============================================================================
// Controller Operations
// =============================================================================

/// CSI CreateVolume: idempotent on exact name match with a compatible size,
/// AlreadyExists on a size conflict, otherwise a fresh provisioning. The
/// stable volume identifier is the config name.
pub async fn create_volume(
    orchestrator: &Orchestrator,
    config: VolumeConfig,
) -> Result<VolumeExternal> {
    if config.name.is_empty() {
        return Err(Error::InvalidInput("volume name missing in request".into()));
    }
    let requested_bytes = config.size_bytes()?;

    match orchestrator.get_volume(&config.name).await {
        Ok(existing) => {
            // The driver is never invoked again for a repeat request.
            if existing.config.size_bytes().unwrap_or(0) >= requested_bytes {
                Ok(existing)
            } else {
                Err(Error::VolumeExists {
                    name: config.name,
                })
            }
        }
        Err(e) if e.is_not_found() => orchestrator.add_volume(config).await,
        Err(e) => Err(e),
    }
}

/// CSI DeleteVolume: deletion of a missing volume is success.
pub async fn delete_volume(orchestrator: &Orchestrator, name: &str) -> Result<()> {
    match orchestrator.delete_volume(name).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e),
    }
}

/// CSI ControllerPublishVolume: run the publish path and assemble the
/// publish context map the node plugin consumes.
pub async fn controller_publish_volume(
    orchestrator: &Orchestrator,
    volume_name: &str,
    node_name: &str,
) -> Result<BTreeMap<String, String>> {
    let node = orchestrator.get_node(node_name).await?;
    let mut info = VolumePublishInfo {
        localhost: false,
        host_iqn: vec![node.iqn.clone()],
        host_ip: node.ips.clone(),
        host_name: node.name.clone(),
        ..Default::default()
    };
    orchestrator.publish_volume(volume_name, &mut info).await?;
    let volume = orchestrator.get_volume(volume_name).await?;
    Ok(publish_context(&volume, &info))
}

/// Build the publish context for a published volume.
pub fn publish_context(
    volume: &VolumeExternal,
    info: &VolumePublishInfo,
) -> BTreeMap<String, String> {
    let access = &volume.config.access_info;
    let mut context = BTreeMap::new();
    context.insert("protocol".to_string(), volume.config.protocol.to_string());

    match volume.config.protocol {
        Protocol::File => {
            context.insert("nfsServerIp".to_string(), access.nfs_server_ip.clone());
            context.insert("nfsPath".to_string(), access.nfs_path.clone());
        }
        Protocol::Block => {
            stash_iscsi_target_portals(&mut context, access);
            context.insert("iscsiTargetIqn".to_string(), access.iscsi_target_iqn.clone());
            context.insert(
                "iscsiLunNumber".to_string(),
                access.iscsi_lun_number.to_string(),
            );
            context.insert("iscsiInterface".to_string(), access.iscsi_interface.clone());
            context.insert("iscsiIgroup".to_string(), access.iscsi_igroup.clone());
            context.insert("iscsiUsername".to_string(), access.iscsi_username.clone());
            context.insert(
                "iscsiInitiatorSecret".to_string(),
                access.iscsi_initiator_secret.clone(),
            );
            context.insert(
                "iscsiTargetSecret".to_string(),
                access.iscsi_target_secret.clone(),
            );
            context.insert("filesystemType".to_string(), info.filesystem_type.clone());
            context.insert("useCHAP".to_string(), info.use_chap.to_string());
            context.insert("sharedTarget".to_string(), info.shared_target.to_string());
        }
        Protocol::Any => {}
    }
    context
}

/// Portal list keys: a count plus `p1`..`pN`, the first being the primary
/// target portal.
fn stash_iscsi_target_portals(
    context: &mut BTreeMap<String, String>,
    access: &crate::storage::VolumeAccessInfo,
) {
    let count = 1 + access.iscsi_portals.len();
    context.insert("iscsiTargetPortalCount".to_string(), count.to_string());
    context.insert("p1".to_string(), access.iscsi_target_portal.clone());
    for (i, portal) in access.iscsi_portals.iter().enumerate() {
        context.insert(format!("p{}", i + 2), portal.clone());
    }
}

// =============================================================================
// Unsupported Surface
// =============================================================================

/// Snapshots are not exposed through the CSI surface.
pub fn create_snapshot_unsupported() -> Error {
    Error::NotSupported("snapshots are not supported via CSI".into())
}

/// Pool capacities are not reported.
pub fn get_capacity_unsupported() -> Error {
    Error::NotSupported("capacity reporting is not supported".into())
}
