//! Reference in-memory storage driver
//!
//! Implements the whole driver surface against in-memory pools with capacity
//! accounting. Tests inspect the destroyed-volume log to verify crash
//! recovery, and the [`fixtures`] module provides the canonical pool set the
//! orchestrator tests and benches are written against.

use crate::attributes::{self, Offer, Request};
use crate::config::Protocol;
use crate::drivers::{StorageDriver, UpdateType, FAKE};
use crate::error::{Error, Result};
use crate::storage::{
    Snapshot, StoragePool, VolumeConfig, VolumeExternal, VolumePublishInfo,
};
use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

const DEFAULT_STORAGE_PREFIX: &str = "fake_";

// =============================================================================
// Configuration
// =============================================================================

/// Config for one pool of a fake backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FakePoolConfig {
    /// Usable capacity of the pool
    pub bytes: u64,
    /// Typed offers keyed by attribute name
    pub attributes: BTreeMap<String, Offer>,
}

/// Full config for a fake backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FakeDriverConfig {
    #[serde(default = "default_version")]
    pub version: i64,
    pub storage_driver_name: String,
    pub backend_name: String,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default)]
    pub pools: IndexMap<String, FakePoolConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Overrides the storage-system key; defaults to the backend name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_identity: Option<String>,
}

fn default_version() -> i64 {
    1
}

// =============================================================================
// Driver State
// =============================================================================

#[derive(Debug, Clone)]
struct FakeVolume {
    internal_name: String,
    external_name: String,
    pool: String,
    size_bytes: u64,
}

#[derive(Default)]
struct FakeState {
    /// Volumes keyed by internal name
    volumes: BTreeMap<String, FakeVolume>,
    /// Every internal name `destroy` was called with, in call order
    destroyed: Vec<String>,
    /// Snapshots keyed by snapshot name
    snapshots: BTreeMap<String, Snapshot>,
}

/// In-memory reference driver
pub struct FakeDriver {
    config: FakeDriverConfig,
    initialized: AtomicBool,
    state: RwLock<FakeState>,
}

impl FakeDriver {
    pub fn new(config: FakeDriverConfig) -> Self {
        Self {
            config,
            initialized: AtomicBool::new(false),
            state: RwLock::new(FakeState::default()),
        }
    }

    pub fn from_config_json(config_json: &str) -> Result<Self> {
        let config: FakeDriverConfig = serde_json::from_str(config_json)
            .map_err(|e| Error::InvalidInput(format!("malformed fake driver config: {}", e)))?;
        Ok(Self::new(config))
    }

    fn storage_prefix(&self) -> &str {
        self.config
            .storage_prefix
            .as_deref()
            .unwrap_or(DEFAULT_STORAGE_PREFIX)
    }

    fn require_initialized(&self) -> Result<()> {
        if !self.initialized() {
            return Err(Error::Unrecoverable(format!(
                "fake driver for backend {} is not initialized",
                self.config.backend_name
            )));
        }
        Ok(())
    }

    fn pool_consumed(state: &FakeState, pool: &str) -> u64 {
        state
            .volumes
            .values()
            .filter(|v| v.pool == pool)
            .map(|v| v.size_bytes)
            .sum()
    }

    fn place(&self, config: &VolumeConfig, pool: &str, size_bytes: u64) -> Result<()> {
        let pool_config = self.config.pools.get(pool).ok_or_else(|| {
            Error::BackendOperationFailed {
                backend: self.config.backend_name.clone(),
                operation: "create".into(),
                reason: format!("no such pool: {}", pool),
            }
        })?;

        let mut state = self.state.write();
        if state.volumes.contains_key(&config.internal_name) {
            return Err(Error::VolumeExists {
                name: config.name.clone(),
            });
        }

        let consumed = Self::pool_consumed(&state, pool);
        if consumed + size_bytes > pool_config.bytes {
            return Err(Error::BackendOperationFailed {
                backend: self.config.backend_name.clone(),
                operation: "create".into(),
                reason: format!(
                    "insufficient capacity in pool {}: requested {}, available {}",
                    pool,
                    size_bytes,
                    pool_config.bytes - consumed
                ),
            });
        }

        state.volumes.insert(
            config.internal_name.clone(),
            FakeVolume {
                internal_name: config.internal_name.clone(),
                external_name: config.name.clone(),
                pool: pool.to_string(),
                size_bytes,
            },
        );
        Ok(())
    }

    fn volume_external(&self, vol: &FakeVolume) -> VolumeExternal {
        VolumeExternal {
            config: VolumeConfig {
                name: vol.external_name.clone(),
                internal_name: vol.internal_name.clone(),
                size: vol.size_bytes.to_string(),
                protocol: self.config.protocol,
                ..Default::default()
            },
            backend: self.config.backend_name.clone(),
            pool: vol.pool.clone(),
            orphaned: false,
        }
    }

    // =========================================================================
    // Test Inspection
    // =========================================================================

    /// Whether `destroy` has ever been called for this internal name.
    pub fn was_destroyed(&self, internal_name: &str) -> bool {
        self.state
            .read()
            .destroyed
            .iter()
            .any(|n| n == internal_name)
    }

    /// How many times `destroy` was called for this internal name.
    pub fn destroy_count(&self, internal_name: &str) -> usize {
        self.state
            .read()
            .destroyed
            .iter()
            .filter(|n| *n == internal_name)
            .count()
    }

    /// Number of volumes currently present on the backend.
    pub fn volume_count(&self) -> usize {
        self.state.read().volumes.len()
    }
}

#[async_trait]
impl StorageDriver for FakeDriver {
    fn driver_name(&self) -> &str {
        FAKE
    }

    fn backend_name(&self) -> String {
        self.config.backend_name.clone()
    }

    fn storage_system_key(&self) -> String {
        format!(
            "fake:{}",
            self.config
                .instance_identity
                .as_deref()
                .unwrap_or(&self.config.backend_name)
        )
    }

    fn initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    async fn initialize(&self) -> Result<()> {
        if self.config.storage_driver_name != FAKE {
            return Err(Error::InvalidInput(format!(
                "config names driver {}, expected {}",
                self.config.storage_driver_name, FAKE
            )));
        }
        if self.config.backend_name.is_empty() {
            return Err(Error::InvalidInput(
                "fake driver config is missing backendName".into(),
            ));
        }
        if self.config.protocol == Protocol::Any {
            return Err(Error::InvalidInput(
                "fake driver backends must speak file or block, not any".into(),
            ));
        }
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn terminate(&self) {
        self.initialized.store(false, Ordering::SeqCst);
    }

    async fn create(
        &self,
        config: &VolumeConfig,
        pool: &str,
        requests: &BTreeMap<String, Request>,
    ) -> Result<()> {
        self.require_initialized()?;
        debug!(
            volume = %config.name,
            pool = %pool,
            requests = requests.len(),
            "Fake driver creating volume"
        );
        self.place(config, pool, config.size_bytes()?)
    }

    async fn create_clone(&self, config: &VolumeConfig) -> Result<()> {
        self.require_initialized()?;
        let source_name = config.clone_source_volume.as_deref().ok_or_else(|| {
            Error::InvalidInput("clone request is missing cloneSourceVolume".into())
        })?;
        let source_internal = self.get_internal_volume_name(source_name);

        let (pool, source_size) = {
            let state = self.state.read();
            let source = state.volumes.get(&source_internal).ok_or_else(|| {
                Error::not_found("volume", source_name)
            })?;
            (source.pool.clone(), source.size_bytes)
        };

        let size_bytes = config.size_bytes().unwrap_or(source_size);
        self.place(config, &pool, size_bytes)
    }

    async fn create_from_snapshot(
        &self,
        snapshot: &Snapshot,
        config: &VolumeConfig,
    ) -> Result<()> {
        self.require_initialized()?;
        let source_internal = self.get_internal_volume_name(&snapshot.volume);
        let pool = {
            let state = self.state.read();
            if !state.snapshots.contains_key(&snapshot.name) {
                return Err(Error::not_found("snapshot", &snapshot.name));
            }
            state
                .volumes
                .get(&source_internal)
                .map(|v| v.pool.clone())
                .ok_or_else(|| Error::not_found("volume", &snapshot.volume))?
        };
        let size_bytes = config.size_bytes().unwrap_or(snapshot.size_bytes);
        self.place(config, &pool, size_bytes)
    }

    async fn destroy(&self, internal_name: &str) -> Result<()> {
        let mut state = self.state.write();
        state.destroyed.push(internal_name.to_string());
        state.volumes.remove(internal_name);
        Ok(())
    }

    async fn create_followup(&self, config: &mut VolumeConfig) -> Result<()> {
        match self.config.protocol {
            Protocol::File => {
                config.access_info.nfs_server_ip = "127.0.0.1".into();
                config.access_info.nfs_path = format!("/{}", config.internal_name);
            }
            Protocol::Block => {
                config.access_info.iscsi_target_portal = "127.0.0.1:3260".into();
                config.access_info.iscsi_target_iqn =
                    format!("iqn.2017-06.storage.fake:{}", config.internal_name);
                config.access_info.iscsi_lun_number = 0;
                config.access_info.iscsi_interface = "default".into();
                config.access_info.iscsi_igroup =
                    format!("{}-igroup", self.config.backend_name);
            }
            Protocol::Any => {}
        }
        Ok(())
    }

    async fn publish(&self, internal_name: &str, info: &mut VolumePublishInfo) -> Result<()> {
        self.get(internal_name).await?;
        if info.filesystem_type.is_empty() {
            info.filesystem_type = "ext4".into();
        }
        info.shared_target = true;
        Ok(())
    }

    async fn get(&self, internal_name: &str) -> Result<()> {
        if self.state.read().volumes.contains_key(internal_name) {
            Ok(())
        } else {
            Err(Error::not_found("volume", internal_name))
        }
    }

    fn get_internal_volume_name(&self, name: &str) -> String {
        format!("{}{}", self.storage_prefix(), name)
    }

    async fn get_storage_backend_specs(&self) -> Result<IndexMap<String, StoragePool>> {
        Ok(self
            .config
            .pools
            .iter()
            .map(|(name, pool)| {
                (
                    name.clone(),
                    StoragePool::new(name.clone(), pool.attributes.clone()),
                )
            })
            .collect())
    }

    async fn create_snapshot(
        &self,
        snapshot_name: &str,
        config: &VolumeConfig,
    ) -> Result<Snapshot> {
        self.require_initialized()?;
        let internal = self.get_internal_volume_name(&config.name);
        let size_bytes = {
            let state = self.state.read();
            state
                .volumes
                .get(&internal)
                .map(|v| v.size_bytes)
                .ok_or_else(|| Error::not_found("volume", &config.name))?
        };
        let snapshot = Snapshot {
            name: snapshot_name.to_string(),
            volume: config.name.clone(),
            created: chrono::Utc::now().to_rfc3339(),
            size_bytes,
        };
        self.state
            .write()
            .snapshots
            .insert(snapshot.name.clone(), snapshot.clone());
        Ok(snapshot)
    }

    async fn delete_snapshot(&self, snapshot_name: &str, _config: &VolumeConfig) -> Result<()> {
        self.state.write().snapshots.remove(snapshot_name);
        Ok(())
    }

    async fn snapshot_list(&self, internal_name: &str) -> Result<Vec<Snapshot>> {
        let state = self.state.read();
        let external = state
            .volumes
            .get(internal_name)
            .map(|v| v.external_name.clone())
            .ok_or_else(|| Error::not_found("volume", internal_name))?;
        Ok(state
            .snapshots
            .values()
            .filter(|s| s.volume == external)
            .cloned()
            .collect())
    }

    async fn resize(&self, internal_name: &str, size_bytes: u64) -> Result<()> {
        self.require_initialized()?;
        let mut state = self.state.write();
        let (pool, current) = match state.volumes.get(internal_name) {
            Some(v) => (v.pool.clone(), v.size_bytes),
            None => return Err(Error::not_found("volume", internal_name)),
        };
        if size_bytes < current {
            return Err(Error::InvalidInput(format!(
                "cannot shrink volume {} from {} to {}",
                internal_name, current, size_bytes
            )));
        }
        let pool_bytes = self
            .config
            .pools
            .get(&pool)
            .map(|p| p.bytes)
            .unwrap_or(0);
        let consumed = Self::pool_consumed(&state, &pool);
        if consumed - current + size_bytes > pool_bytes {
            return Err(Error::BackendOperationFailed {
                backend: self.config.backend_name.clone(),
                operation: "resize".into(),
                reason: format!("insufficient capacity in pool {}", pool),
            });
        }
        if let Some(v) = state.volumes.get_mut(internal_name) {
            v.size_bytes = size_bytes;
        }
        Ok(())
    }

    async fn get_volume_external(&self, name: &str) -> Result<VolumeExternal> {
        let state = self.state.read();
        state
            .volumes
            .values()
            .find(|v| v.external_name == name)
            .map(|v| self.volume_external(v))
            .ok_or_else(|| Error::not_found("volume", name))
    }

    async fn get_volume_external_wrappers(&self, tx: mpsc::Sender<Result<VolumeExternal>>) {
        let externals: Vec<VolumeExternal> = {
            let state = self.state.read();
            state.volumes.values().map(|v| self.volume_external(v)).collect()
        };
        for external in externals {
            if tx.send(Ok(external)).await.is_err() {
                return;
            }
        }
    }

    fn get_update_type(&self, old: &dyn StorageDriver) -> BTreeSet<UpdateType> {
        let mut changes = BTreeSet::new();
        let old = match old.as_any().downcast_ref::<FakeDriver>() {
            Some(old) => old,
            None => {
                changes.insert(UpdateType::InvalidUpdate);
                return changes;
            }
        };
        if self.storage_prefix() != old.storage_prefix() {
            changes.insert(UpdateType::PrefixChange);
        }
        if self.config.username != old.config.username
            || self.config.password != old.config.password
        {
            changes.insert(UpdateType::CredentialsChange);
        }
        if self.storage_system_key() != old.storage_system_key() {
            changes.insert(UpdateType::IdentityChange);
        }
        changes
    }

    fn get_protocol(&self) -> Protocol {
        self.config.protocol
    }

    fn persistent_config(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(&self.config)?)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// =============================================================================
// Fixtures
// =============================================================================

/// Canonical pool set used by the orchestrator tests and benches.
pub mod fixtures {
    use super::*;

    pub const FAST_SMALL: &str = "fast-small";
    pub const FAST_THIN_ONLY: &str = "fast-thin-only";
    pub const FAST_UNIQUE_ATTR: &str = "fast-unique-attr";
    pub const SLOW_NO_SNAPSHOTS: &str = "slow-no-snapshots";
    pub const SLOW_SNAPSHOTS: &str = "slow-snapshots";
    pub const MEDIUM_OVERLAP: &str = "medium-overlap";

    const GIB: u64 = 1024 * 1024 * 1024;

    fn pool(
        bytes: u64,
        iops: (i64, i64),
        snapshots: bool,
        provisioning: &[&str],
        media: &str,
        unique: Option<&[&str]>,
    ) -> FakePoolConfig {
        let mut attrs = BTreeMap::new();
        attrs.insert(attributes::IOPS.to_string(), Offer::int(iops.0, iops.1));
        attrs.insert(attributes::SNAPSHOTS.to_string(), Offer::bool(snapshots));
        attrs.insert(
            attributes::PROVISIONING_TYPE.to_string(),
            Offer::string(provisioning.iter().copied()),
        );
        attrs.insert(attributes::MEDIA.to_string(), Offer::string([media]));
        if let Some(options) = unique {
            attrs.insert(
                attributes::UNIQUE_OPTIONS.to_string(),
                Offer::string(options.iter().copied()),
            );
        }
        FakePoolConfig {
            bytes,
            attributes: attrs,
        }
    }

    /// The full fixture pool set, keyed by pool name.
    pub fn get_fake_pools() -> IndexMap<String, FakePoolConfig> {
        let mut pools = IndexMap::new();
        pools.insert(
            FAST_SMALL.to_string(),
            pool(50 * GIB, (2000, 4000), true, &["thin", "thick"], "ssd", None),
        );
        pools.insert(
            FAST_THIN_ONLY.to_string(),
            pool(50 * GIB, (1000, 2000), true, &["thin"], "ssd", None),
        );
        pools.insert(
            FAST_UNIQUE_ATTR.to_string(),
            pool(
                50 * GIB,
                (2000, 3000),
                true,
                &["thin", "thick"],
                "ssd",
                Some(&["foo", "bar", "baz"]),
            ),
        );
        pools.insert(
            SLOW_NO_SNAPSHOTS.to_string(),
            pool(100 * GIB, (30, 100), false, &["thin", "thick"], "hdd", None),
        );
        pools.insert(
            SLOW_SNAPSHOTS.to_string(),
            pool(100 * GIB, (30, 100), true, &["thin"], "hdd", None),
        );
        pools.insert(
            MEDIUM_OVERLAP.to_string(),
            pool(100 * GIB, (300, 1000), true, &["thin"], "hdd", None),
        );
        pools
    }

    /// Build a fake backend config JSON for the named subset of pools.
    pub fn new_fake_config_json(
        backend_name: &str,
        protocol: Protocol,
        pools: IndexMap<String, FakePoolConfig>,
    ) -> Result<String> {
        let config = FakeDriverConfig {
            version: 1,
            storage_driver_name: FAKE.to_string(),
            backend_name: backend_name.to_string(),
            protocol,
            pools,
            storage_prefix: None,
            username: None,
            password: None,
            instance_identity: None,
        };
        Ok(serde_json::to_string(&config)?)
    }

    /// Select a subset of the fixture pools by name.
    pub fn pools_named(names: &[&str]) -> IndexMap<String, FakePoolConfig> {
        let all = get_fake_pools();
        names
            .iter()
            .map(|n| (n.to_string(), all.get(*n).cloned().expect("known pool")))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    const GIB: u64 = 1024 * 1024 * 1024;

    async fn driver(pools: &[&str]) -> FakeDriver {
        let json =
            new_fake_config_json("test-backend", Protocol::File, pools_named(pools)).unwrap();
        let driver = FakeDriver::from_config_json(&json).unwrap();
        driver.initialize().await.unwrap();
        driver
    }

    fn volume_config(name: &str, internal: &str, size_bytes: u64) -> VolumeConfig {
        VolumeConfig {
            name: name.into(),
            internal_name: internal.into(),
            size: size_bytes.to_string(),
            protocol: Protocol::File,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_and_destroy() {
        let d = driver(&[FAST_SMALL]).await;
        let cfg = volume_config("v1", "fake_v1", GIB);

        d.create(&cfg, FAST_SMALL, &BTreeMap::new()).await.unwrap();
        assert_eq!(d.volume_count(), 1);
        d.get("fake_v1").await.unwrap();

        d.destroy("fake_v1").await.unwrap();
        assert_eq!(d.volume_count(), 0);
        assert!(d.was_destroyed("fake_v1"));
        assert_eq!(d.destroy_count("fake_v1"), 1);

        // Destroying a missing volume is not an error but is still recorded.
        d.destroy("fake_v1").await.unwrap();
        assert_eq!(d.destroy_count("fake_v1"), 2);
    }

    #[tokio::test]
    async fn test_create_duplicate_reports_volume_exists() {
        let d = driver(&[FAST_SMALL]).await;
        let cfg = volume_config("v1", "fake_v1", GIB);
        d.create(&cfg, FAST_SMALL, &BTreeMap::new()).await.unwrap();
        let err = d.create(&cfg, FAST_SMALL, &BTreeMap::new()).await.unwrap_err();
        assert!(err.is_volume_exists());
    }

    #[tokio::test]
    async fn test_capacity_accounting() {
        let d = driver(&[FAST_SMALL]).await;
        // Pool is 50 GiB.
        d.create(&volume_config("v1", "fake_v1", 30 * GIB), FAST_SMALL, &BTreeMap::new())
            .await
            .unwrap();
        let err = d
            .create(&volume_config("v2", "fake_v2", 30 * GIB), FAST_SMALL, &BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BackendOperationFailed { .. }));

        d.create(&volume_config("v3", "fake_v3", 20 * GIB), FAST_SMALL, &BTreeMap::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_clone_lands_in_source_pool() {
        let d = driver(&[FAST_SMALL, FAST_THIN_ONLY]).await;
        d.create(&volume_config("v1", "fake_v1", GIB), FAST_THIN_ONLY, &BTreeMap::new())
            .await
            .unwrap();

        let clone_cfg = VolumeConfig {
            clone_source_volume: Some("v1".into()),
            ..volume_config("v1-clone", "fake_v1-clone", GIB)
        };
        d.create_clone(&clone_cfg).await.unwrap();

        let external = d.get_volume_external("v1-clone").await.unwrap();
        assert_eq!(external.pool, FAST_THIN_ONLY);
    }

    #[tokio::test]
    async fn test_snapshot_lifecycle() {
        let d = driver(&[FAST_SMALL]).await;
        let cfg = volume_config("v1", "fake_v1", GIB);
        d.create(&cfg, FAST_SMALL, &BTreeMap::new()).await.unwrap();

        let snapshot = d.create_snapshot("snap-1", &cfg).await.unwrap();
        assert_eq!(snapshot.volume, "v1");
        assert_eq!(snapshot.size_bytes, GIB);

        let listed = d.snapshot_list("fake_v1").await.unwrap();
        assert_eq!(listed.len(), 1);

        let from_snap = volume_config("v2", "fake_v2", GIB);
        d.create_from_snapshot(&snapshot, &from_snap).await.unwrap();
        assert_eq!(d.get_volume_external("v2").await.unwrap().pool, FAST_SMALL);

        d.delete_snapshot("snap-1", &cfg).await.unwrap();
        assert!(d.snapshot_list("fake_v1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resize() {
        let d = driver(&[FAST_SMALL]).await;
        d.create(&volume_config("v1", "fake_v1", GIB), FAST_SMALL, &BTreeMap::new())
            .await
            .unwrap();

        d.resize("fake_v1", 2 * GIB).await.unwrap();
        let external = d.get_volume_external("v1").await.unwrap();
        assert_eq!(external.config.size, (2 * GIB).to_string());

        assert!(d.resize("fake_v1", GIB).await.unwrap_err().is_invalid_input());
        assert!(d.resize("missing", GIB).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_volume_discovery_stream() {
        let d = driver(&[FAST_SMALL]).await;
        d.create(&volume_config("v1", "fake_v1", GIB), FAST_SMALL, &BTreeMap::new())
            .await
            .unwrap();
        d.create(&volume_config("v2", "fake_v2", GIB), FAST_SMALL, &BTreeMap::new())
            .await
            .unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        d.get_volume_external_wrappers(tx).await;

        let mut names = Vec::new();
        while let Some(item) = rx.recv().await {
            names.push(item.unwrap().config.name);
        }
        names.sort();
        assert_eq!(names, vec!["v1", "v2"]);
    }

    #[tokio::test]
    async fn test_update_type_diffing() {
        let base = driver(&[FAST_SMALL]).await;

        let mut changed = FakeDriverConfig {
            version: 1,
            storage_driver_name: FAKE.into(),
            backend_name: "test-backend".into(),
            protocol: Protocol::File,
            pools: pools_named(&[FAST_SMALL]),
            storage_prefix: Some("other_".into()),
            username: Some("admin".into()),
            password: None,
            instance_identity: None,
        };
        let new_driver = FakeDriver::new(changed.clone());
        let diff = new_driver.get_update_type(&base);
        assert!(diff.contains(&UpdateType::PrefixChange));
        assert!(diff.contains(&UpdateType::CredentialsChange));
        assert!(!diff.contains(&UpdateType::IdentityChange));

        changed.storage_prefix = None;
        changed.username = None;
        changed.instance_identity = Some("other-system".into());
        let new_driver = FakeDriver::new(changed);
        let diff = new_driver.get_update_type(&base);
        assert_eq!(
            diff.into_iter().collect::<Vec<_>>(),
            vec![UpdateType::IdentityChange]
        );
    }

    #[tokio::test]
    async fn test_initialize_validation() {
        let json = new_fake_config_json("b1", Protocol::Any, IndexMap::new()).unwrap();
        let d = FakeDriver::from_config_json(&json).unwrap();
        assert!(d.initialize().await.unwrap_err().is_invalid_input());
        assert!(!d.initialized());
    }

    #[test]
    fn test_internal_volume_name() {
        let json =
            new_fake_config_json("b1", Protocol::File, IndexMap::new()).unwrap();
        let d = FakeDriver::from_config_json(&json).unwrap();
        assert_eq!(d.get_internal_volume_name("v1"), "fake_v1");
    }

    #[test]
    fn test_config_json_round_trip() {
        let json = new_fake_config_json(
            "fast-a",
            Protocol::File,
            pools_named(&[FAST_SMALL, FAST_THIN_ONLY]),
        )
        .unwrap();
        let config: FakeDriverConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.backend_name, "fast-a");
        // Pool order is part of the placement contract.
        let names: Vec<_> = config.pools.keys().cloned().collect();
        assert_eq!(names, vec![FAST_SMALL, FAST_THIN_ONLY]);
    }
}
