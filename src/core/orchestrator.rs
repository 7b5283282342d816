//! The orchestrator engine
//!
//! Owns the in-memory object graph and serializes every public operation
//! under a single lock, deliberately held across driver and store I/O so
//! that the transaction journal never races a competing frontend. Nothing
//! is silently retried here; the journal is the sole cross-crash mechanism
//! and bootstrap reconciliation is the only consumer of an intermediate
//! state.

use crate::config::{BackendState, Protocol};
use crate::drivers::{new_driver_for_config, StorageDriver, UpdateType};
use crate::error::{Error, Result};
use crate::persistence::{Client, VolumeOperation, VolumeTransaction};
use crate::storage::{
    Backend, BackendExternal, Node, Snapshot, StoragePool, Volume, VolumeConfig,
    VolumeExternal, VolumePublishInfo,
};
use crate::storage_class::{StorageClass, StorageClassConfig, StorageClassExternal};
use indexmap::IndexMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

// =============================================================================
// In-Memory Graph
// =============================================================================

struct Inner {
    bootstrapped: bool,
    /// Backends in insertion order; ordering is part of the placement contract
    backends: IndexMap<String, Backend>,
    /// All volumes, shared with their owning backend's volume map
    volumes: BTreeMap<String, Arc<Volume>>,
    storage_classes: BTreeMap<String, StorageClass>,
    nodes: BTreeMap<String, Node>,
}

impl Inner {
    fn new() -> Self {
        Self {
            bootstrapped: false,
            backends: IndexMap::new(),
            volumes: BTreeMap::new(),
            storage_classes: BTreeMap::new(),
            nodes: BTreeMap::new(),
        }
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.bootstrapped {
            Ok(())
        } else {
            Err(Error::NotReady)
        }
    }

    /// Rebuild the bidirectional class↔pool matching index from scratch.
    ///
    /// Runs on the three events that can change match results: class
    /// added/deleted and backend added/updated/offlined. Offline backends
    /// drop out of every class. The rebuild preserves the placement order
    /// contract because backends iterate in insertion order and pools in
    /// driver-reported order.
    fn rescan_all_classes(&mut self) {
        let Inner {
            backends,
            storage_classes,
            ..
        } = self;
        for (sc_name, sc) in storage_classes.iter_mut() {
            sc.clear_pools();
            for (backend_name, backend) in backends.iter_mut() {
                for pool in backend.storage.values_mut() {
                    pool.remove_storage_class(sc_name);
                    if backend.state.is_online() && sc.matches(backend_name, pool) {
                        pool.add_storage_class(sc_name);
                        sc.add_pool(backend_name, &pool.name);
                    }
                }
            }
        }
    }

    /// Scan every online backend's pools for a single (new) class.
    fn scan_class(&mut self, sc: &mut StorageClass) {
        for (backend_name, backend) in self.backends.iter_mut() {
            if !backend.state.is_online() {
                continue;
            }
            for pool in backend.storage.values_mut() {
                if sc.matches(backend_name, pool) {
                    pool.add_storage_class(sc.name());
                    sc.add_pool(backend_name, &pool.name);
                }
            }
        }
    }

    /// Drop every back-reference a class holds on pools.
    fn unlink_class(&mut self, sc_name: &str) {
        for backend in self.backends.values_mut() {
            for pool in backend.storage.values_mut() {
                pool.remove_storage_class(sc_name);
            }
        }
    }

    /// Install a volume into both maps, keeping them consistent.
    fn install_volume(&mut self, volume: Arc<Volume>) {
        if let Some(backend) = self.backends.get_mut(&volume.backend) {
            backend
                .volumes
                .insert(volume.config.name.clone(), volume.clone());
        }
        self.volumes.insert(volume.config.name.clone(), volume);
    }

    /// Remove a volume from both maps.
    fn uninstall_volume(&mut self, volume: &Volume) {
        if let Some(backend) = self.backends.get_mut(&volume.backend) {
            backend.volumes.remove(&volume.config.name);
        }
        self.volumes.remove(&volume.config.name);
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Top-level coordinator owning backends, storage classes, volumes, and nodes
pub struct Orchestrator {
    store: Arc<dyn Client>,
    inner: Mutex<Inner>,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn Client>) -> Self {
        Self {
            store,
            inner: Mutex::new(Inner::new()),
        }
    }

    /// Treat a store-level key miss as "no records of that kind".
    fn ignore_key_not_found<T: Default>(result: Result<T>) -> Result<T> {
        match result {
            Err(e) if e.is_key_not_found() => Ok(T::default()),
            other => other,
        }
    }

    // =========================================================================
    // Bootstrap
    // =========================================================================

    /// Rebuild the in-memory graph from the persistent store and reconcile
    /// residual transactions. Idempotent; until it completes every public
    /// operation fails with NotReady.
    pub async fn bootstrap(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.bootstrapped {
            return Ok(());
        }

        info!("Bootstrapping orchestrator");
        self.bootstrap_backends(&mut inner).await?;
        self.bootstrap_storage_classes(&mut inner).await?;
        self.bootstrap_volumes(&mut inner).await?;
        self.bootstrap_nodes(&mut inner).await?;
        self.bootstrap_transactions(&mut inner).await?;
        self.cleanup_empty_terminal_backends(&mut inner).await;

        inner.bootstrapped = true;
        info!(
            backends = inner.backends.len(),
            volumes = inner.volumes.len(),
            storage_classes = inner.storage_classes.len(),
            nodes = inner.nodes.len(),
            "Bootstrap complete"
        );
        Ok(())
    }

    async fn bootstrap_backends(&self, inner: &mut Inner) -> Result<()> {
        let persisted = Self::ignore_key_not_found(self.store.get_backends().await)?;
        for record in persisted {
            let config_json = record.marshal_config()?;
            let driver = new_driver_for_config(&config_json)
                .map_err(|e| Error::Bootstrap(format!("backend {}: {}", record.name, e)))?;
            driver
                .initialize()
                .await
                .map_err(|e| Error::Bootstrap(format!("backend {}: {}", record.name, e)))?;
            let pools = driver
                .get_storage_backend_specs()
                .await
                .map_err(|e| Error::Bootstrap(format!("backend {}: {}", record.name, e)))?;

            // Passthrough boot records may omit the name; the driver knows it.
            let name = if record.name.is_empty() {
                driver.backend_name()
            } else {
                record.name.clone()
            };
            let mut backend = Backend::new(name.clone(), driver, pools);
            backend.state = record.state;
            debug!(backend = %name, state = %backend.state, "Bootstrapped backend");
            inner.backends.insert(name, backend);
        }
        Ok(())
    }

    async fn bootstrap_storage_classes(&self, inner: &mut Inner) -> Result<()> {
        let persisted = Self::ignore_key_not_found(self.store.get_storage_classes().await)?;
        for record in persisted {
            let mut sc = StorageClass::from_persistent(record);
            inner.scan_class(&mut sc);
            debug!(storage_class = %sc.name(), pools = sc.pool_refs().len(), "Bootstrapped storage class");
            inner.storage_classes.insert(sc.name().to_string(), sc);
        }
        Ok(())
    }

    async fn bootstrap_volumes(&self, inner: &mut Inner) -> Result<()> {
        let persisted = Self::ignore_key_not_found(self.store.get_volumes().await)?;
        for external in persisted {
            let volume = Volume::from_external(external);
            if !inner.backends.contains_key(&volume.backend) {
                return Err(Error::Bootstrap(format!(
                    "volume {} references unknown backend {}",
                    volume.config.name, volume.backend
                )));
            }
            inner.install_volume(volume);
        }
        Ok(())
    }

    async fn bootstrap_nodes(&self, inner: &mut Inner) -> Result<()> {
        let persisted = Self::ignore_key_not_found(self.store.get_nodes().await)?;
        for node in persisted {
            inner.nodes.insert(node.name.clone(), node);
        }
        Ok(())
    }

    async fn bootstrap_transactions(&self, inner: &mut Inner) -> Result<()> {
        let transactions =
            Self::ignore_key_not_found(self.store.get_volume_transactions().await)?;
        for txn in transactions {
            info!(op = %txn.op, volume = %txn.config.name, "Reconciling residual transaction");
            self.reconcile_transaction(inner, &txn).await;
            if let Err(e) = self.store.delete_volume_transaction(&txn).await {
                if !e.is_key_not_found() {
                    return Err(Error::Bootstrap(format!(
                        "could not clear transaction for {}: {}",
                        txn.config.name, e
                    )));
                }
            }
        }
        Ok(())
    }

    /// Apply the reconciliation rules for one residual journal entry.
    async fn reconcile_transaction(&self, inner: &mut Inner, txn: &VolumeTransaction) {
        match txn.op {
            VolumeOperation::AddVolume => self.reconcile_add(inner, txn).await,
            VolumeOperation::DeleteVolume => self.reconcile_delete(inner, txn).await,
            VolumeOperation::ResizeVolume => self.reconcile_resize(inner, txn).await,
            VolumeOperation::ImportVolume => {
                // Import adopts pre-existing state and creates nothing on the
                // backend; an interrupted import simply never happened.
            }
            VolumeOperation::AddSnapshot => self.reconcile_add_snapshot(inner, txn).await,
            VolumeOperation::DeleteSnapshot => {
                self.reconcile_delete_snapshot(inner, txn).await
            }
        }
    }

    async fn reconcile_add(&self, inner: &mut Inner, txn: &VolumeTransaction) {
        if let Some(volume) = inner.volumes.get(&txn.config.name).cloned() {
            // The commit reached the store, so the record wins. Destroy the
            // journalled internal name to clean any partial creation, then
            // restore the committed volume on the backend if it went missing.
            let Some(backend) = inner.backends.get(&volume.backend) else {
                return;
            };
            let driver = backend.driver.clone();
            let journalled = if txn.config.internal_name.is_empty() {
                driver.get_internal_volume_name(&txn.config.name)
            } else {
                txn.config.internal_name.clone()
            };
            if let Err(e) = driver.destroy(&journalled).await {
                warn!(volume = %txn.config.name, error = %e, "Cleanup destroy failed");
            }
            if driver.get(&volume.config.internal_name).await.is_err() {
                if let Err(e) = driver
                    .create(&volume.config, &volume.pool, &BTreeMap::new())
                    .await
                {
                    error!(volume = %volume.config.name, error = %e,
                        "Could not restore committed volume on backend");
                }
            }
        } else {
            // Nothing was committed; the creation may have partially reached
            // any online backend, so clean them all. Destroy is idempotent.
            for backend in inner.backends.values() {
                if !backend.state.is_online() {
                    continue;
                }
                let internal = backend.driver.get_internal_volume_name(&txn.config.name);
                if let Err(e) = backend.driver.destroy(&internal).await {
                    warn!(backend = %backend.name, volume = %txn.config.name, error = %e,
                        "Cleanup destroy failed");
                }
            }
        }
    }

    async fn reconcile_delete(&self, inner: &mut Inner, txn: &VolumeTransaction) {
        if inner.volumes.contains_key(&txn.config.name) {
            // Complete the interrupted delete.
            if let Err(e) = self.delete_volume_locked(inner, &txn.config.name).await {
                error!(volume = %txn.config.name, error = %e,
                    "Could not complete interrupted delete");
            }
        } else {
            // Record already gone; make sure the backend side is too.
            for backend in inner.backends.values() {
                if !backend.state.is_online() {
                    continue;
                }
                let internal = if txn.config.internal_name.is_empty() {
                    backend.driver.get_internal_volume_name(&txn.config.name)
                } else {
                    txn.config.internal_name.clone()
                };
                if let Err(e) = backend.driver.destroy(&internal).await {
                    warn!(backend = %backend.name, volume = %txn.config.name, error = %e,
                        "Best-effort destroy failed");
                }
            }
        }
    }

    async fn reconcile_resize(&self, inner: &mut Inner, txn: &VolumeTransaction) {
        let Some(volume) = inner.volumes.get(&txn.config.name).cloned() else {
            return;
        };
        let Some(backend) = inner.backends.get(&volume.backend) else {
            return;
        };
        // The driver knows the actual size; persist the reconciled record.
        match backend.driver.get_volume_external(&volume.config.name).await {
            Ok(actual) => {
                if actual.config.size != volume.config.size {
                    let mut reconciled = (*volume).clone();
                    reconciled.config.size = actual.config.size;
                    let reconciled = Arc::new(reconciled);
                    inner.install_volume(reconciled.clone());
                    if let Err(e) = self.store.update_volume(&reconciled).await {
                        error!(volume = %txn.config.name, error = %e,
                            "Could not persist reconciled size");
                    }
                }
            }
            Err(e) => {
                warn!(volume = %txn.config.name, error = %e,
                    "Could not read size during resize reconciliation");
            }
        }
    }

    async fn reconcile_add_snapshot(&self, inner: &mut Inner, txn: &VolumeTransaction) {
        let name = txn
            .snapshot
            .as_ref()
            .map(|s| s.name.clone())
            .unwrap_or_else(|| txn.config.name.clone());
        if self.store.get_snapshot(&name).await.is_ok() {
            return;
        }
        // Snapshot never committed; delete any partial one on the backend.
        if let Some(volume) = inner.volumes.get(&txn.config.name) {
            if let Some(backend) = inner.backends.get(&volume.backend) {
                if let Err(e) = backend.driver.delete_snapshot(&name, &txn.config).await {
                    warn!(snapshot = %name, error = %e, "Best-effort snapshot cleanup failed");
                }
            }
        }
    }

    async fn reconcile_delete_snapshot(&self, inner: &mut Inner, txn: &VolumeTransaction) {
        let Some(snapshot) = txn.snapshot.clone() else {
            return;
        };
        if self.store.get_snapshot(&snapshot.name).await.is_err() {
            return;
        }
        if let Some(volume) = inner.volumes.get(&txn.config.name) {
            if let Some(backend) = inner.backends.get(&volume.backend) {
                if let Err(e) = backend
                    .driver
                    .delete_snapshot(&snapshot.name, &txn.config)
                    .await
                {
                    warn!(snapshot = %snapshot.name, error = %e,
                        "Could not complete interrupted snapshot delete");
                }
            }
        }
        if let Err(e) = self.store.delete_snapshot(&snapshot).await {
            if !e.is_key_not_found() {
                error!(snapshot = %snapshot.name, error = %e,
                    "Could not remove snapshot record");
            }
        }
    }

    /// Offline or deleting backends discovered empty after reconciliation
    /// are removed entirely.
    async fn cleanup_empty_terminal_backends(&self, inner: &mut Inner) {
        let removable: Vec<String> = inner
            .backends
            .values()
            .filter(|b| b.state.is_terminal() && !b.has_volumes())
            .map(|b| b.name.clone())
            .collect();
        for name in removable {
            info!(backend = %name, "Removing empty terminal backend");
            if let Some(backend) = inner.backends.shift_remove(&name) {
                if let Err(e) = self.store.delete_backend(&backend).await {
                    if !e.is_key_not_found() {
                        error!(backend = %name, error = %e, "Could not remove backend record");
                    }
                }
                backend.driver.terminate().await;
            }
        }
        inner.rescan_all_classes();
    }

    // =========================================================================
    // Backends
    // =========================================================================

    /// Add a backend, or atomically update it if the name is already known.
    pub async fn add_backend(&self, config_json: &str) -> Result<BackendExternal> {
        let mut inner = self.inner.lock().await;
        inner.ensure_ready()?;

        // The new driver initializes before anything is touched, so a broken
        // config can never take down an active backend.
        let driver = new_driver_for_config(config_json)?;
        driver.initialize().await?;
        let name = driver.backend_name();
        let pools = driver.get_storage_backend_specs().await?;

        if inner.backends.contains_key(&name) {
            return self.update_backend_locked(&mut inner, &name, driver, pools).await;
        }

        let key = driver.storage_system_key();
        if let Some(existing) = inner
            .backends
            .values()
            .find(|b| b.driver.storage_system_key() == key)
        {
            return Err(Error::DuplicateBackend {
                backend: existing.name.clone(),
                key,
            });
        }

        info!(backend = %name, pools = pools.len(), "Adding backend");
        let backend = Backend::new(name.clone(), driver, pools);
        inner.backends.insert(name.clone(), backend);
        inner.rescan_all_classes();

        let backend = inner.backends.get(&name).expect("just inserted");
        self.store.add_backend(backend).await?;
        backend.construct_external()
    }

    /// Atomic swap: replace driver and pools under the lock, port the volume
    /// map (volumes pointing at vanished pools become orphaned), re-match
    /// every class, persist, then terminate the old driver.
    async fn update_backend_locked(
        &self,
        inner: &mut Inner,
        name: &str,
        driver: Arc<dyn StorageDriver>,
        pools: IndexMap<String, StoragePool>,
    ) -> Result<BackendExternal> {
        let old_backend = inner.backends.get(name).expect("caller checked");
        let diff = driver.get_update_type(old_backend.driver.as_ref());
        if diff.contains(&UpdateType::InvalidUpdate) {
            return Err(Error::InvalidInput(format!(
                "backend {} cannot change driver type",
                name
            )));
        }
        if diff.contains(&UpdateType::IdentityChange) {
            return Err(Error::InvalidInput(format!(
                "backend {} config points at a different storage system",
                name
            )));
        }
        if diff.contains(&UpdateType::PrefixChange) {
            return Err(Error::InvalidInput(format!(
                "backend {} cannot change its volume name prefix",
                name
            )));
        }

        info!(backend = %name, pools = pools.len(), "Updating backend");
        let old_driver = old_backend.driver.clone();
        let old_state = old_backend.state;
        let old_volumes = old_backend.volumes.clone();

        let mut backend = Backend::new(name.to_string(), driver, pools);
        // An offline backend being reconfigured stays out of placement and
        // remains removable once drained.
        backend.state = if old_state.is_terminal() {
            BackendState::Deleting
        } else {
            BackendState::Online
        };

        // Port the volume map onto the new pool set.
        let mut reorphaned: Vec<Arc<Volume>> = Vec::new();
        for (vol_name, volume) in old_volumes {
            let orphaned = !backend.storage.contains_key(&volume.pool);
            if orphaned != volume.orphaned {
                let mut updated = (*volume).clone();
                updated.orphaned = orphaned;
                let updated = Arc::new(updated);
                backend.volumes.insert(vol_name.clone(), updated.clone());
                inner.volumes.insert(vol_name, updated.clone());
                reorphaned.push(updated);
            } else {
                backend.volumes.insert(vol_name.clone(), volume.clone());
                inner.volumes.insert(vol_name, volume);
            }
        }

        // Replacement keeps the backend's slot in insertion order.
        inner.backends.insert(name.to_string(), backend);
        inner.rescan_all_classes();

        let backend = inner.backends.get(name).expect("just inserted");
        self.store.update_backend(backend).await?;
        for volume in &reorphaned {
            if let Err(e) = self.store.update_volume(volume).await {
                warn!(volume = %volume.config.name, error = %e,
                    "Could not persist orphaned flag");
            }
        }
        let external = backend.construct_external()?;
        old_driver.terminate().await;
        Ok(external)
    }

    pub async fn get_backend(&self, name: &str) -> Result<BackendExternal> {
        let inner = self.inner.lock().await;
        inner.ensure_ready()?;
        inner
            .backends
            .get(name)
            .ok_or_else(|| Error::not_found("backend", name))?
            .construct_external()
    }

    pub async fn list_backends(&self) -> Result<Vec<BackendExternal>> {
        let inner = self.inner.lock().await;
        inner.ensure_ready()?;
        inner
            .backends
            .values()
            .map(|b| b.construct_external())
            .collect()
    }

    /// Offline an in-use backend, or remove it entirely if it holds no
    /// volumes. An offlined backend's volumes remain usable; it is removed
    /// for good when its last volume is deleted.
    pub async fn delete_backend(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.ensure_ready()?;

        let backend = inner
            .backends
            .get_mut(name)
            .ok_or_else(|| Error::not_found("backend", name))?;

        if backend.has_volumes() {
            info!(backend = %name, volumes = backend.volumes.len(), "Offlining backend");
            backend.state = BackendState::Offline;
            inner.rescan_all_classes();
            let backend = inner.backends.get(name).expect("still present");
            self.store.update_backend(backend).await?;
        } else {
            info!(backend = %name, "Deleting backend");
            let backend = inner.backends.shift_remove(name).expect("just fetched");
            if let Err(e) = self.store.delete_backend(&backend).await {
                if !e.is_key_not_found() {
                    return Err(e);
                }
            }
            backend.driver.terminate().await;
            inner.rescan_all_classes();
        }
        Ok(())
    }

    /// Remove a terminal-state backend once its volume set reaches zero.
    async fn remove_backend_if_drained(&self, inner: &mut Inner, name: &str) {
        let drained = inner
            .backends
            .get(name)
            .map(|b| b.state.is_terminal() && !b.has_volumes())
            .unwrap_or(false);
        if !drained {
            return;
        }
        info!(backend = %name, "Removing drained backend");
        if let Some(backend) = inner.backends.shift_remove(name) {
            if let Err(e) = self.store.delete_backend(&backend).await {
                if !e.is_key_not_found() {
                    error!(backend = %name, error = %e, "Could not remove backend record");
                }
            }
            backend.driver.terminate().await;
        }
        inner.rescan_all_classes();
    }

    // =========================================================================
    // Storage Classes
    // =========================================================================

    /// Register a class, scan all current pools for matches, and persist it.
    pub async fn add_storage_class(
        &self,
        config: StorageClassConfig,
    ) -> Result<StorageClassExternal> {
        let mut inner = self.inner.lock().await;
        inner.ensure_ready()?;

        if config.name.is_empty() {
            return Err(Error::InvalidInput("storage class name is required".into()));
        }
        if inner.storage_classes.contains_key(&config.name) {
            return Err(Error::InvalidInput(format!(
                "storage class {} already exists",
                config.name
            )));
        }

        let mut sc = StorageClass::new(config);
        inner.scan_class(&mut sc);
        info!(storage_class = %sc.name(), pools = sc.pool_refs().len(), "Adding storage class");

        if let Err(e) = self.store.add_storage_class(&sc).await {
            inner.unlink_class(sc.name());
            return Err(e);
        }
        let external = sc.construct_external();
        inner.storage_classes.insert(sc.name().to_string(), sc);
        Ok(external)
    }

    pub async fn get_storage_class(&self, name: &str) -> Result<StorageClassExternal> {
        let inner = self.inner.lock().await;
        inner.ensure_ready()?;
        inner
            .storage_classes
            .get(name)
            .map(|sc| sc.construct_external())
            .ok_or_else(|| Error::not_found("storage class", name))
    }

    pub async fn list_storage_classes(&self) -> Result<Vec<StorageClassExternal>> {
        let inner = self.inner.lock().await;
        inner.ensure_ready()?;
        Ok(inner
            .storage_classes
            .values()
            .map(|sc| sc.construct_external())
            .collect())
    }

    /// Remove a class and its reverse links; volumes that referenced it are
    /// unaffected.
    pub async fn delete_storage_class(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.ensure_ready()?;

        let sc = inner
            .storage_classes
            .remove(name)
            .ok_or_else(|| Error::not_found("storage class", name))?;
        inner.unlink_class(name);

        if let Err(e) = self.store.delete_storage_class(&sc).await {
            if !e.is_key_not_found() {
                return Err(e);
            }
        }
        info!(storage_class = %name, "Deleted storage class");
        Ok(())
    }

    // =========================================================================
    // Volumes
    // =========================================================================

    /// Provision a volume: validate, journal, place across the class's
    /// matched pools in deterministic order, commit, clear the journal.
    pub async fn add_volume(&self, config: VolumeConfig) -> Result<VolumeExternal> {
        let mut inner = self.inner.lock().await;
        inner.ensure_ready()?;

        let mut config = config;
        if config.name.is_empty() {
            return Err(Error::InvalidInput("volume name is required".into()));
        }
        if inner.volumes.contains_key(&config.name) {
            return Err(Error::VolumeExists {
                name: config.name,
            });
        }
        let requested_bytes = config.size_bytes()?;

        let sc = inner
            .storage_classes
            .get(&config.storage_class)
            .ok_or_else(|| {
                Error::InvalidInput(format!("unknown storage class: {}", config.storage_class))
            })?;
        let requests = sc.config().attributes.clone();

        // Candidate pools in placement order, filtered to online backends
        // speaking a compatible protocol.
        let candidates: Vec<(String, String)> = sc
            .pool_refs()
            .iter()
            .filter(|r| {
                inner
                    .backends
                    .get(&r.backend)
                    .map(|b| b.state.is_online() && config.protocol.accepts(b.protocol()))
                    .unwrap_or(false)
            })
            .map(|r| (r.backend.clone(), r.pool.clone()))
            .collect();
        if candidates.is_empty() {
            return Err(Error::InvalidInput(format!(
                "storage class {} has no online pools for protocol {}",
                config.storage_class, config.protocol
            )));
        }

        let txn = VolumeTransaction::new(VolumeOperation::AddVolume, config.clone());
        self.journal(&txn).await?;

        let mut last_err: Option<Error> = None;
        let mut placement: Option<(String, String)> = None;
        for (backend_name, pool_name) in candidates {
            let driver = inner
                .backends
                .get(&backend_name)
                .expect("candidate filtered")
                .driver
                .clone();
            config.internal_name = driver.get_internal_volume_name(&config.name);

            match driver.create(&config, &pool_name, &requests).await {
                Ok(()) => {
                    placement = Some((backend_name, pool_name));
                    break;
                }
                Err(e) if e.is_volume_exists() => {
                    // Benign race: an identical volume may already exist.
                    // Success only if the existing one is large enough.
                    let compatible = match driver.get_volume_external(&config.name).await {
                        Ok(existing) => {
                            existing.config.size_bytes().unwrap_or(0) >= requested_bytes
                        }
                        Err(_) => false,
                    };
                    if compatible {
                        placement = Some((backend_name, pool_name));
                        break;
                    }
                    self.clear_journal(&txn).await;
                    return Err(Error::VolumeExists { name: config.name });
                }
                Err(e) => {
                    debug!(backend = %backend_name, pool = %pool_name, error = %e,
                        "Pool rejected placement, trying next");
                    last_err = Some(e);
                }
            }
        }

        let Some((backend_name, pool_name)) = placement else {
            self.clear_journal(&txn).await;
            return Err(last_err.unwrap_or_else(|| {
                Error::InvalidInput(format!(
                    "no pool of storage class {} could place the volume",
                    config.storage_class
                ))
            }));
        };

        let driver = inner
            .backends
            .get(&backend_name)
            .expect("placed")
            .driver
            .clone();
        if let Err(e) = driver.create_followup(&mut config).await {
            warn!(volume = %config.name, error = %e, "Create followup failed");
        }

        info!(volume = %config.name, backend = %backend_name, pool = %pool_name,
            "Provisioned volume");
        let volume = Arc::new(Volume::new(config, backend_name, pool_name));
        match self.store.add_volume(&volume).await {
            Ok(()) => {
                inner.install_volume(volume.clone());
                self.clear_journal(&txn).await;
                Ok(volume.construct_external())
            }
            Err(e) => {
                // Commit failed; roll back the backend side best-effort.
                error!(volume = %volume.config.name, error = %e, "Volume commit failed");
                if let Err(destroy_err) = driver.destroy(&volume.config.internal_name).await {
                    warn!(volume = %volume.config.name, error = %destroy_err,
                        "Rollback destroy failed");
                }
                self.clear_journal(&txn).await;
                Err(e)
            }
        }
    }

    /// Clone an existing volume. The clone always lands on the source
    /// volume's backend.
    pub async fn clone_volume(&self, config: VolumeConfig) -> Result<VolumeExternal> {
        let mut inner = self.inner.lock().await;
        inner.ensure_ready()?;

        let mut config = config;
        let source_name = config
            .clone_source_volume
            .clone()
            .ok_or_else(|| Error::InvalidInput("cloneSourceVolume is required".into()))?;
        let source = inner
            .volumes
            .get(&source_name)
            .cloned()
            .ok_or_else(|| Error::not_found("volume", &source_name))?;
        if inner.volumes.contains_key(&config.name) {
            return Err(Error::VolumeExists { name: config.name });
        }

        if config.size.is_empty() {
            config.size = source.config.size.clone();
        }
        if config.storage_class.is_empty() {
            config.storage_class = source.config.storage_class.clone();
        }
        config.protocol = source.config.protocol;

        let driver = inner
            .backends
            .get(&source.backend)
            .ok_or_else(|| Error::not_found("backend", &source.backend))?
            .driver
            .clone();
        config.internal_name = driver.get_internal_volume_name(&config.name);

        let txn = VolumeTransaction::new(VolumeOperation::AddVolume, config.clone());
        self.journal(&txn).await?;

        if let Err(e) = driver.create_clone(&config).await {
            self.clear_journal(&txn).await;
            return Err(e);
        }
        if let Err(e) = driver.create_followup(&mut config).await {
            warn!(volume = %config.name, error = %e, "Create followup failed");
        }

        info!(volume = %config.name, source = %source_name, backend = %source.backend,
            "Cloned volume");
        let volume = Arc::new(Volume::new(config, source.backend.clone(), source.pool.clone()));
        match self.store.add_volume(&volume).await {
            Ok(()) => {
                inner.install_volume(volume.clone());
                self.clear_journal(&txn).await;
                Ok(volume.construct_external())
            }
            Err(e) => {
                if let Err(destroy_err) = driver.destroy(&volume.config.internal_name).await {
                    warn!(volume = %volume.config.name, error = %destroy_err,
                        "Rollback destroy failed");
                }
                self.clear_journal(&txn).await;
                Err(e)
            }
        }
    }

    /// Adopt a volume that already exists on a backend.
    pub async fn import_volume(
        &self,
        config: VolumeConfig,
        backend_name: &str,
    ) -> Result<VolumeExternal> {
        let mut inner = self.inner.lock().await;
        inner.ensure_ready()?;

        if config.internal_name.is_empty() {
            return Err(Error::InvalidInput(
                "import requires the on-backend internalName".into(),
            ));
        }
        if inner.volumes.contains_key(&config.name) {
            return Err(Error::VolumeExists { name: config.name });
        }
        let backend = inner
            .backends
            .get(backend_name)
            .ok_or_else(|| Error::not_found("backend", backend_name))?;
        if !backend.state.is_online() {
            return Err(Error::InvalidInput(format!(
                "backend {} is not online",
                backend_name
            )));
        }
        let driver = backend.driver.clone();

        let txn = VolumeTransaction::new(VolumeOperation::ImportVolume, config.clone());
        self.journal(&txn).await?;

        // Locate the existing volume through the discovery stream so we
        // learn its pool and actual size. The producer runs as its own task
        // so a backend with more volumes than the channel buffer cannot
        // stall the scan.
        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        let producer = {
            let driver = driver.clone();
            tokio::spawn(async move { driver.get_volume_external_wrappers(tx).await })
        };
        let mut discovered = None;
        while let Some(item) = rx.recv().await {
            if let Ok(external) = item {
                if external.config.internal_name == config.internal_name {
                    discovered = Some(external);
                    break;
                }
            }
        }
        drop(rx);
        let _ = producer.await;
        let Some(existing) = discovered else {
            self.clear_journal(&txn).await;
            return Err(Error::not_found("volume", &config.internal_name));
        };

        let mut config = config;
        config.size = existing.config.size.clone();
        if config.protocol == Protocol::Any {
            config.protocol = existing.config.protocol;
        }

        info!(volume = %config.name, backend = %backend_name, pool = %existing.pool,
            "Imported volume");
        let volume = Arc::new(Volume::new(config, backend_name, existing.pool));
        match self.store.add_volume(&volume).await {
            Ok(()) => {
                inner.install_volume(volume.clone());
                self.clear_journal(&txn).await;
                Ok(volume.construct_external())
            }
            Err(e) => {
                self.clear_journal(&txn).await;
                Err(e)
            }
        }
    }

    /// Grow a volume; the reconciled size is whatever the driver reports.
    pub async fn resize_volume(&self, name: &str, new_size: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.ensure_ready()?;

        let volume = inner
            .volumes
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found("volume", name))?;
        let mut config = volume.config.clone();
        config.size = new_size.to_string();
        let size_bytes = config.size_bytes()?;

        let driver = inner
            .backends
            .get(&volume.backend)
            .ok_or_else(|| Error::not_found("backend", &volume.backend))?
            .driver
            .clone();

        let txn = VolumeTransaction::new(VolumeOperation::ResizeVolume, config.clone());
        self.journal(&txn).await?;

        match driver.resize(&volume.config.internal_name, size_bytes).await {
            Ok(()) => {
                let mut resized = (*volume).clone();
                resized.config.size = config.size;
                let resized = Arc::new(resized);
                inner.install_volume(resized.clone());
                let result = self.store.update_volume(&resized).await;
                self.clear_journal(&txn).await;
                info!(volume = %name, size = %new_size, "Resized volume");
                result
            }
            Err(e) if e.is_invalid_input() || e.is_not_found() => {
                self.clear_journal(&txn).await;
                Err(e)
            }
            // Outcome unknown; the journal stays for reconciliation.
            Err(e) => Err(e),
        }
    }

    /// Delete a volume. Driver-level NotFound counts as success; a missing
    /// record is NotFound so frontends can treat deletion as idempotent.
    pub async fn delete_volume(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.ensure_ready()?;

        let volume = inner
            .volumes
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found("volume", name))?;

        let txn = VolumeTransaction::new(VolumeOperation::DeleteVolume, volume.config.clone());
        self.journal(&txn).await?;

        // On an unknown driver outcome the journal is deliberately retained
        // so reconciliation can finish the job after a restart.
        self.delete_volume_locked(&mut inner, name).await?;
        self.clear_journal(&txn).await;
        Ok(())
    }

    /// The delete state machine, shared with bootstrap reconciliation. Does
    /// not touch the journal; callers own the transaction lifecycle.
    async fn delete_volume_locked(&self, inner: &mut Inner, name: &str) -> Result<()> {
        let volume = inner
            .volumes
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found("volume", name))?;

        if let Some(backend) = inner.backends.get(&volume.backend) {
            let driver = backend.driver.clone();
            match driver.destroy(&volume.config.internal_name).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        self.store.delete_volume_ignore_not_found(&volume).await?;
        inner.uninstall_volume(&volume);
        info!(volume = %name, backend = %volume.backend, "Deleted volume");

        self.remove_backend_if_drained(inner, &volume.backend).await;
        Ok(())
    }

    pub async fn get_volume(&self, name: &str) -> Result<VolumeExternal> {
        let inner = self.inner.lock().await;
        inner.ensure_ready()?;
        inner
            .volumes
            .get(name)
            .map(|v| v.construct_external())
            .ok_or_else(|| Error::not_found("volume", name))
    }

    pub async fn list_volumes(&self) -> Result<Vec<VolumeExternal>> {
        let inner = self.inner.lock().await;
        inner.ensure_ready()?;
        Ok(inner.volumes.values().map(|v| v.construct_external()).collect())
    }

    pub async fn list_volumes_by_backend(&self, backend: &str) -> Result<Vec<VolumeExternal>> {
        let inner = self.inner.lock().await;
        inner.ensure_ready()?;
        let backend = inner
            .backends
            .get(backend)
            .ok_or_else(|| Error::not_found("backend", backend))?;
        Ok(backend
            .volumes
            .values()
            .map(|v| v.construct_external())
            .collect())
    }

    /// Prepare a volume for attachment and fill the node-side parameters.
    pub async fn publish_volume(
        &self,
        name: &str,
        info: &mut VolumePublishInfo,
    ) -> Result<()> {
        let inner = self.inner.lock().await;
        inner.ensure_ready()?;

        let volume = inner
            .volumes
            .get(name)
            .ok_or_else(|| Error::not_found("volume", name))?;
        let driver = inner
            .backends
            .get(&volume.backend)
            .ok_or_else(|| Error::not_found("backend", &volume.backend))?
            .driver
            .clone();
        driver.publish(&volume.config.internal_name, info).await
    }

    /// Rebuild only the volume portion of the graph from the store; used
    /// after severe inconsistencies.
    pub async fn reload_volumes(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.ensure_ready()?;

        info!("Reloading volumes from the persistent store");
        inner.volumes.clear();
        for backend in inner.backends.values_mut() {
            backend.volumes.clear();
        }
        self.bootstrap_volumes(&mut inner).await
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    /// Snapshot an existing volume: journal, delegate, record, clear.
    pub async fn create_volume_snapshot(
        &self,
        snapshot_name: &str,
        config: &VolumeConfig,
    ) -> Result<Snapshot> {
        let inner = self.inner.lock().await;
        inner.ensure_ready()?;

        let volume_name = config.name.as_str();
        let volume = inner
            .volumes
            .get(volume_name)
            .cloned()
            .ok_or_else(|| Error::not_found("volume", volume_name))?;
        let driver = inner
            .backends
            .get(&volume.backend)
            .ok_or_else(|| Error::not_found("backend", &volume.backend))?
            .driver
            .clone();

        let txn = VolumeTransaction::new(VolumeOperation::AddSnapshot, volume.config.clone());
        self.journal(&txn).await?;

        let snapshot = match driver.create_snapshot(snapshot_name, &volume.config).await {
            Ok(s) => s,
            Err(e) => {
                self.clear_journal(&txn).await;
                return Err(e);
            }
        };
        self.store.add_snapshot(&snapshot).await?;
        self.clear_journal(&txn).await;
        info!(snapshot = %snapshot_name, volume = %volume_name, "Created snapshot");
        Ok(snapshot)
    }

    /// Provision a new volume from a recorded snapshot, on the snapshot's
    /// backend.
    pub async fn create_volume_from_snapshot(
        &self,
        snapshot_name: &str,
        config: VolumeConfig,
    ) -> Result<VolumeExternal> {
        let mut inner = self.inner.lock().await;
        inner.ensure_ready()?;

        let snapshot = self
            .store
            .get_snapshot(snapshot_name)
            .await
            .map_err(|_| Error::not_found("snapshot", snapshot_name))?;
        let source = inner
            .volumes
            .get(&snapshot.volume)
            .cloned()
            .ok_or_else(|| Error::not_found("volume", &snapshot.volume))?;
        if inner.volumes.contains_key(&config.name) {
            return Err(Error::VolumeExists { name: config.name });
        }

        let driver = inner
            .backends
            .get(&source.backend)
            .ok_or_else(|| Error::not_found("backend", &source.backend))?
            .driver
            .clone();

        let mut config = config;
        if config.size.is_empty() {
            config.size = snapshot.size_bytes.to_string();
        }
        config.protocol = source.config.protocol;
        config.internal_name = driver.get_internal_volume_name(&config.name);

        let txn = VolumeTransaction::new(VolumeOperation::AddVolume, config.clone());
        self.journal(&txn).await?;

        if let Err(e) = driver.create_from_snapshot(&snapshot, &config).await {
            self.clear_journal(&txn).await;
            return Err(e);
        }
        if let Err(e) = driver.create_followup(&mut config).await {
            warn!(volume = %config.name, error = %e, "Create followup failed");
        }

        info!(volume = %config.name, snapshot = %snapshot_name, "Created volume from snapshot");
        let volume = Arc::new(Volume::new(config, source.backend.clone(), source.pool.clone()));
        match self.store.add_volume(&volume).await {
            Ok(()) => {
                inner.install_volume(volume.clone());
                self.clear_journal(&txn).await;
                Ok(volume.construct_external())
            }
            Err(e) => {
                if let Err(destroy_err) = driver.destroy(&volume.config.internal_name).await {
                    warn!(volume = %volume.config.name, error = %destroy_err,
                        "Rollback destroy failed");
                }
                self.clear_journal(&txn).await;
                Err(e)
            }
        }
    }

    /// Delete a recorded snapshot: journal, delegate, remove, clear.
    pub async fn delete_volume_snapshot(&self, snapshot_name: &str) -> Result<()> {
        let inner = self.inner.lock().await;
        inner.ensure_ready()?;

        let snapshot = self
            .store
            .get_snapshot(snapshot_name)
            .await
            .map_err(|_| Error::not_found("snapshot", snapshot_name))?;
        let volume = inner
            .volumes
            .get(&snapshot.volume)
            .cloned()
            .ok_or_else(|| Error::not_found("volume", &snapshot.volume))?;
        let driver = inner
            .backends
            .get(&volume.backend)
            .ok_or_else(|| Error::not_found("backend", &volume.backend))?
            .driver
            .clone();

        let mut txn =
            VolumeTransaction::new(VolumeOperation::DeleteSnapshot, volume.config.clone());
        txn.snapshot = Some(snapshot.clone());
        self.journal(&txn).await?;

        if let Err(e) = driver.delete_snapshot(snapshot_name, &volume.config).await {
            return Err(e);
        }
        self.store.delete_snapshot(&snapshot).await?;
        self.clear_journal(&txn).await;
        info!(snapshot = %snapshot_name, "Deleted snapshot");
        Ok(())
    }

    pub async fn list_snapshots(&self) -> Result<Vec<Snapshot>> {
        let inner = self.inner.lock().await;
        inner.ensure_ready()?;
        Self::ignore_key_not_found(self.store.get_snapshots().await)
    }

    pub async fn list_volume_snapshots(&self, volume_name: &str) -> Result<Vec<Snapshot>> {
        let inner = self.inner.lock().await;
        inner.ensure_ready()?;
        if !inner.volumes.contains_key(volume_name) {
            return Err(Error::not_found("volume", volume_name));
        }
        let snapshots = Self::ignore_key_not_found(self.store.get_snapshots().await)?;
        Ok(snapshots
            .into_iter()
            .filter(|s| s.volume == volume_name)
            .collect())
    }

    // =========================================================================
    // Nodes
    // =========================================================================

    pub async fn add_node(&self, node: Node) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.ensure_ready()?;
        if node.name.is_empty() {
            return Err(Error::InvalidInput("node name is required".into()));
        }
        self.store.add_or_update_node(&node).await?;
        info!(node = %node.name, "Registered node");
        inner.nodes.insert(node.name.clone(), node);
        Ok(())
    }

    pub async fn get_node(&self, name: &str) -> Result<Node> {
        let inner = self.inner.lock().await;
        inner.ensure_ready()?;
        inner
            .nodes
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found("node", name))
    }

    pub async fn list_nodes(&self) -> Result<Vec<Node>> {
        let inner = self.inner.lock().await;
        inner.ensure_ready()?;
        Ok(inner.nodes.values().cloned().collect())
    }

    pub async fn delete_node(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.ensure_ready()?;
        let node = inner
            .nodes
            .remove(name)
            .ok_or_else(|| Error::not_found("node", name))?;
        if let Err(e) = self.store.delete_node(&node).await {
            if !e.is_key_not_found() {
                return Err(e);
            }
        }
        info!(node = %name, "Deregistered node");
        Ok(())
    }

    // =========================================================================
    // Journal Helpers
    // =========================================================================

    /// Write a journal entry, rejecting a second in-flight operation on the
    /// same (op, name).
    async fn journal(&self, txn: &VolumeTransaction) -> Result<()> {
        if self
            .store
            .get_existing_volume_transaction(txn)
            .await?
            .is_some()
        {
            return Err(Error::InProgress {
                op: txn.op.to_string(),
                name: txn.config.name.clone(),
            });
        }
        self.store.add_volume_transaction(txn).await
    }

    /// Best-effort journal removal; reconciliation handles leftovers.
    async fn clear_journal(&self, txn: &VolumeTransaction) {
        if let Err(e) = self.store.delete_volume_transaction(txn).await {
            if !e.is_key_not_found() {
                warn!(op = %txn.op, volume = %txn.config.name, error = %e,
                    "Could not clear transaction");
            }
        }
    }
}
