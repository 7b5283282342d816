//! Passthrough persistence client
//!
//! Persists nothing. The backend list comes from one or more driver config
//! files read at construction time, and volume state is discovered live from
//! the storage controllers during bootstrap. Useful for frontends that have
//! no persistence layer of their own.

use crate::config::{BackendState, ORCHESTRATOR_API_VERSION};
use crate::drivers::{validate_common_config, StorageDriver};
use crate::error::{Error, Result};
use crate::persistence::{
    node_key, snapshot_key, storage_class_key, volume_key, Client, PersistentStateVersion,
    StoreType, VolumeTransaction,
};
use crate::storage::{Backend, BackendPersistent, Node, Snapshot, Volume, VolumeExternal};
use crate::storage_class::{StorageClass, StorageClassPersistent};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error};

const PASSTHROUGH_STORE_VERSION: &str = "passthrough";

/// Stateless persistence client backed by live storage controllers
pub struct PassthroughStore {
    /// Backends registered by the orchestrator after bootstrap, used as the
    /// source of truth for volume discovery.
    live_backends: RwLock<BTreeMap<String, Arc<dyn StorageDriver>>>,
    /// Backend records parsed from config files, returned during bootstrap.
    boot_backends: Vec<BackendPersistent>,
    version: PersistentStateVersion,
}

impl PassthroughStore {
    /// Load backend config files from a single file or a directory of files.
    pub fn new(config_path: &Path) -> Result<Self> {
        let mut store = Self {
            live_backends: RwLock::new(BTreeMap::new()),
            boot_backends: Vec::new(),
            version: PersistentStateVersion {
                store_version: PASSTHROUGH_STORE_VERSION.to_string(),
                orchestrator_api_version: ORCHESTRATOR_API_VERSION.to_string(),
            },
        };
        store.initialize(config_path)?;
        Ok(store)
    }

    fn initialize(&mut self, config_path: &Path) -> Result<()> {
        let metadata = std::fs::metadata(config_path).map_err(|_| {
            Error::InvalidInput(format!(
                "passthrough store config path {} does not exist",
                config_path.display()
            ))
        })?;

        if metadata.is_dir() {
            debug!(path = %config_path.display(), "Passthrough store loading config directory");
            let mut entries: Vec<_> = std::fs::read_dir(config_path)?
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
                .map(|e| e.path())
                .collect();
            entries.sort();
            for path in entries {
                self.load_backend(&path)?;
            }
            Ok(())
        } else if metadata.is_file() {
            self.load_backend(config_path)
        } else {
            Err(Error::InvalidInput(format!(
                "passthrough store config path {} is neither a file nor a directory",
                config_path.display()
            )))
        }
    }

    /// Parse one YAML or JSON driver config file into a boot backend record.
    fn load_backend(&mut self, path: &Path) -> Result<()> {
        debug!(path = %path.display(), "Passthrough store loading config file");
        let contents = std::fs::read_to_string(path)?;

        // YAML is a superset of JSON, so one parse covers both formats.
        let config: serde_json::Value = serde_yaml::from_str(&contents)
            .map_err(|e| Error::InvalidInput(format!("{}: {}", path.display(), e)))?;
        let config_json = serde_json::to_string(&config)?;
        let common = validate_common_config(&config_json)?;

        self.boot_backends.push(BackendPersistent {
            version: ORCHESTRATOR_API_VERSION.to_string(),
            name: common.backend_name,
            state: BackendState::Online,
            config,
        });
        Ok(())
    }

    /// Read all volumes managed by one backend and forward them to the
    /// shared aggregation channel, tagging each with the backend name.
    async fn volumes_from_backend(
        name: String,
        driver: Arc<dyn StorageDriver>,
        tx: mpsc::Sender<Result<VolumeExternal>>,
    ) {
        let (backend_tx, mut backend_rx) = mpsc::channel(16);
        let producer = {
            let driver = driver.clone();
            tokio::spawn(async move { driver.get_volume_external_wrappers(backend_tx).await })
        };
        while let Some(item) = backend_rx.recv().await {
            let item = item.map(|mut vol| {
                vol.backend = name.clone();
                vol
            });
            if tx.send(item).await.is_err() {
                break;
            }
        }
        // Closing our end unblocks a producer mid-send before we join it.
        drop(backend_rx);
        let _ = producer.await;
    }
}

#[async_trait]
impl Client for PassthroughStore {
    fn store_type(&self) -> StoreType {
        StoreType::Passthrough
    }

    async fn get_version(&self) -> Result<PersistentStateVersion> {
        Ok(self.version.clone())
    }

    async fn set_version(&self, _version: &PersistentStateVersion) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.live_backends.write().clear();
        Ok(())
    }

    // =========================================================================
    // Backends
    // =========================================================================

    async fn add_backend(&self, backend: &Backend) -> Result<()> {
        debug!(backend = %backend.name, "Passthrough store adding backend");
        self.live_backends
            .write()
            .insert(backend.name.clone(), backend.driver.clone());
        Ok(())
    }

    async fn get_backend(&self, name: &str) -> Result<BackendPersistent> {
        let driver = self
            .live_backends
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::KeyNotFound {
                key: name.to_string(),
            })?;
        Ok(BackendPersistent {
            version: ORCHESTRATOR_API_VERSION.to_string(),
            name: name.to_string(),
            state: BackendState::Online,
            config: driver.persistent_config()?,
        })
    }

    async fn update_backend(&self, backend: &Backend) -> Result<()> {
        let mut live = self.live_backends.write();
        if !live.contains_key(&backend.name) {
            return Err(Error::KeyNotFound {
                key: backend.name.clone(),
            });
        }
        live.insert(backend.name.clone(), backend.driver.clone());
        Ok(())
    }

    async fn delete_backend(&self, backend: &Backend) -> Result<()> {
        self.live_backends
            .write()
            .remove(&backend.name)
            .map(|_| ())
            .ok_or_else(|| Error::KeyNotFound {
                key: backend.name.clone(),
            })
    }

    /// Called during bootstrap; returns the records read from config files.
    async fn get_backends(&self) -> Result<Vec<BackendPersistent>> {
        Ok(self.boot_backends.clone())
    }

    async fn delete_backends(&self) -> Result<()> {
        self.live_backends.write().clear();
        Ok(())
    }

    // =========================================================================
    // Volumes
    // =========================================================================

    async fn add_volume(&self, _volume: &Volume) -> Result<()> {
        Ok(())
    }

    /// Never called after bootstrap; the orchestrator caches all volumes.
    async fn get_volume(&self, name: &str) -> Result<VolumeExternal> {
        Err(Error::KeyNotFound {
            key: volume_key(name),
        })
    }

    async fn update_volume(&self, _volume: &Volume) -> Result<()> {
        Ok(())
    }

    async fn delete_volume(&self, _volume: &Volume) -> Result<()> {
        Ok(())
    }

    async fn delete_volume_ignore_not_found(&self, _volume: &Volume) -> Result<()> {
        Ok(())
    }

    /// Discover volumes live from every registered backend. Each backend is
    /// queried concurrently; a failing backend contributes error items but
    /// never aborts the fan-out.
    async fn get_volumes(&self) -> Result<Vec<VolumeExternal>> {
        let backends: Vec<(String, Arc<dyn StorageDriver>)> = self
            .live_backends
            .read()
            .iter()
            .map(|(name, driver)| (name.clone(), driver.clone()))
            .collect();

        let (tx, mut rx) = mpsc::channel(64);
        for (name, driver) in backends {
            let tx = tx.clone();
            tokio::spawn(Self::volumes_from_backend(name, driver, tx));
        }
        // The channel closes once every producer task has dropped its sender.
        drop(tx);

        let mut volumes = Vec::new();
        while let Some(item) = rx.recv().await {
            match item {
                Ok(volume) => volumes.push(volume),
                Err(e) => error!(error = %e, "Volume discovery failed for one backend"),
            }
        }
        Ok(volumes)
    }

    async fn delete_volumes(&self) -> Result<()> {
        Ok(())
    }

    // =========================================================================
    // Volume Transactions (never persisted)
    // =========================================================================

    async fn add_volume_transaction(&self, _txn: &VolumeTransaction) -> Result<()> {
        Ok(())
    }

    async fn get_volume_transactions(&self) -> Result<Vec<VolumeTransaction>> {
        Ok(Vec::new())
    }

    async fn get_existing_volume_transaction(
        &self,
        _txn: &VolumeTransaction,
    ) -> Result<Option<VolumeTransaction>> {
        Ok(None)
    }

    async fn delete_volume_transaction(&self, _txn: &VolumeTransaction) -> Result<()> {
        Ok(())
    }

    // =========================================================================
    // Storage Classes (never persisted)
    // =========================================================================

    async fn add_storage_class(&self, _sc: &StorageClass) -> Result<()> {
        Ok(())
    }

    async fn get_storage_class(&self, name: &str) -> Result<StorageClassPersistent> {
        Err(Error::KeyNotFound {
            key: storage_class_key(name),
        })
    }

    async fn get_storage_classes(&self) -> Result<Vec<StorageClassPersistent>> {
        Ok(Vec::new())
    }

    async fn delete_storage_class(&self, _sc: &StorageClass) -> Result<()> {
        Ok(())
    }

    // =========================================================================
    // Snapshots (never persisted)
    // =========================================================================

    async fn add_snapshot(&self, _snapshot: &Snapshot) -> Result<()> {
        Ok(())
    }

    async fn get_snapshot(&self, name: &str) -> Result<Snapshot> {
        Err(Error::KeyNotFound {
            key: snapshot_key(name),
        })
    }

    async fn get_snapshots(&self) -> Result<Vec<Snapshot>> {
        Ok(Vec::new())
    }

    async fn delete_snapshot(&self, _snapshot: &Snapshot) -> Result<()> {
        Ok(())
    }

    // =========================================================================
    // Nodes (never persisted)
    // =========================================================================

    async fn add_or_update_node(&self, _node: &Node) -> Result<()> {
        Ok(())
    }

    async fn get_node(&self, name: &str) -> Result<Node> {
        Err(Error::KeyNotFound {
            key: node_key(name),
        })
    }

    async fn get_nodes(&self) -> Result<Vec<Node>> {
        Ok(Vec::new())
    }

    async fn delete_node(&self, _node: &Node) -> Result<()> {
        Ok(())
    }
}
