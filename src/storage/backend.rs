//! Backends
//!
//! A backend is a named instance of a storage driver plus the pools it
//! reports and the volumes currently placed on it. Backends are replaced
//! wholesale during config updates, which is why classes and volumes refer
//! to pools by name rather than by pointer.

use crate::config::{BackendState, Protocol};
use crate::drivers::StorageDriver;
use crate::error::Result;
use crate::storage::{StoragePool, StoragePoolExternal, Volume};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A managed storage controller instance
pub struct Backend {
    pub name: String,
    pub state: BackendState,
    pub driver: Arc<dyn StorageDriver>,
    /// Pools in driver-reported order; iteration order is a placement contract
    pub storage: IndexMap<String, StoragePool>,
    /// Volumes placed on this backend, shared with the orchestrator's map
    pub volumes: BTreeMap<String, Arc<Volume>>,
}

impl Backend {
    pub fn new(
        name: impl Into<String>,
        driver: Arc<dyn StorageDriver>,
        storage: IndexMap<String, StoragePool>,
    ) -> Self {
        Self {
            name: name.into(),
            state: BackendState::Online,
            driver,
            storage,
            volumes: BTreeMap::new(),
        }
    }

    pub fn has_volumes(&self) -> bool {
        !self.volumes.is_empty()
    }

    pub fn protocol(&self) -> Protocol {
        self.driver.get_protocol()
    }

    pub fn construct_external(&self) -> Result<BackendExternal> {
        Ok(BackendExternal {
            name: self.name.clone(),
            state: self.state,
            protocol: self.protocol(),
            config: self.driver.persistent_config()?,
            storage: self
                .storage
                .values()
                .map(|p| (p.name.clone(), p.construct_external()))
                .collect(),
            volumes: self.volumes.keys().cloned().collect(),
        })
    }

    pub fn construct_persistent(&self) -> Result<BackendPersistent> {
        Ok(BackendPersistent {
            version: crate::config::ORCHESTRATOR_API_VERSION.to_string(),
            name: self.name.clone(),
            state: self.state,
            config: self.driver.persistent_config()?,
        })
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("driver", &self.driver.driver_name())
            .field("storage", &self.storage.keys().collect::<Vec<_>>())
            .field("volumes", &self.volumes.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Externalized backend form returned to frontends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendExternal {
    pub name: String,
    pub state: BackendState,
    pub protocol: Protocol,
    pub config: serde_json::Value,
    pub storage: IndexMap<String, StoragePoolExternal>,
    pub volumes: Vec<String>,
}

/// Persisted backend record; `config` is the driver-typed config JSON,
/// discriminated by its `storageDriverName` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendPersistent {
    pub version: String,
    pub name: String,
    pub state: BackendState,
    pub config: serde_json::Value,
}

impl BackendPersistent {
    /// Re-marshal the driver config for handing to the driver factory.
    pub fn marshal_config(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.config)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persistent_serde_round_trip() {
        let persistent = BackendPersistent {
            version: "1".into(),
            name: "fast-a".into(),
            state: BackendState::Online,
            config: serde_json::json!({
                "storageDriverName": "fake",
                "backendName": "fast-a",
            }),
        };
        let json = serde_json::to_string(&persistent).unwrap();
        let back: BackendPersistent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, persistent);

        let config_json = back.marshal_config().unwrap();
        assert!(config_json.contains("storageDriverName"));
    }
}
