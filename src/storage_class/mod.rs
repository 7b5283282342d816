//! Storage classes
//!
//! A storage class is a named selector over pools: typed attribute requests,
//! an optional required-inclusion list (`pools`), and an optional permissive
//! union (`additional_pools`). The class keeps the ordered list of matched
//! pools as `(backend, pool)` name pairs; the orchestrator maintains the
//! matching reverse index on the pools themselves.

use crate::attributes::Request;
use crate::storage::StoragePool;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// Configuration
// =============================================================================

/// Storage class definition as supplied by a frontend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageClassConfig {
    pub name: String,
    /// Typed attribute requests keyed by attribute name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Request>,
    /// Required inclusion: backend name to allowed pool names
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pools: BTreeMap<String, Vec<String>>,
    /// Permissive union: pools accepted regardless of the other criteria
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_pools: BTreeMap<String, Vec<String>>,
}

// =============================================================================
// Storage Class
// =============================================================================

/// A reference to a matched pool, by name on both sides
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolRef {
    pub backend: String,
    pub pool: String,
}

/// A storage class plus its ordered matched-pool list
#[derive(Debug, Clone, PartialEq)]
pub struct StorageClass {
    config: StorageClassConfig,
    /// Matched pools in backend-insertion then pool-insertion order
    pools: Vec<PoolRef>,
}

impl StorageClass {
    pub fn new(config: StorageClassConfig) -> Self {
        Self {
            config,
            pools: Vec::new(),
        }
    }

    pub fn from_persistent(persistent: StorageClassPersistent) -> Self {
        Self::new(persistent.config)
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &StorageClassConfig {
        &self.config
    }

    /// The match predicate.
    ///
    /// A pool listed in `additional_pools` matches unconditionally. Otherwise
    /// a non-empty `pools` list restricts candidates to the pools it names,
    /// and a non-empty `attributes` map requires every request to be
    /// satisfied by a same-typed offer. A class with no criteria at all
    /// matches every pool.
    pub fn matches(&self, backend_name: &str, pool: &StoragePool) -> bool {
        if let Some(names) = self.config.additional_pools.get(backend_name) {
            if names.iter().any(|n| n == &pool.name) {
                return true;
            }
        }

        if !self.config.pools.is_empty() {
            let listed = self
                .config
                .pools
                .get(backend_name)
                .map(|names| names.iter().any(|n| n == &pool.name))
                .unwrap_or(false);
            if !listed {
                return false;
            }
        }

        if !self.config.attributes.is_empty() {
            for (attr, request) in &self.config.attributes {
                match pool.attributes.get(attr) {
                    Some(offer) if request.matches(offer) => {}
                    _ => return false,
                }
            }
        }

        // With neither primary criterion set, only additional_pools can admit.
        if self.config.pools.is_empty()
            && self.config.attributes.is_empty()
            && !self.config.additional_pools.is_empty()
        {
            return false;
        }

        true
    }

    /// Matched pools in placement order.
    pub fn pool_refs(&self) -> &[PoolRef] {
        &self.pools
    }

    /// Record a matched pool. Idempotent.
    pub fn add_pool(&mut self, backend: &str, pool: &str) {
        if !self
            .pools
            .iter()
            .any(|r| r.backend == backend && r.pool == pool)
        {
            self.pools.push(PoolRef {
                backend: backend.to_string(),
                pool: pool.to_string(),
            });
        }
    }

    /// Drop every matched pool belonging to a backend.
    pub fn remove_pools_for_backend(&mut self, backend: &str) {
        self.pools.retain(|r| r.backend != backend);
    }

    /// Drop the whole matched-pool list (prior to a full rescan).
    pub fn clear_pools(&mut self) {
        self.pools.clear();
    }

    pub fn construct_external(&self) -> StorageClassExternal {
        let mut storage_pools: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for r in &self.pools {
            storage_pools
                .entry(r.backend.clone())
                .or_default()
                .push(r.pool.clone());
        }
        StorageClassExternal {
            config: self.config.clone(),
            storage_pools,
        }
    }

    pub fn construct_persistent(&self) -> StorageClassPersistent {
        StorageClassPersistent {
            config: self.config.clone(),
        }
    }
}

// =============================================================================
// External / Persistent Forms
// =============================================================================

/// Externalized class form: the config plus the matched pools per backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageClassExternal {
    #[serde(flatten)]
    pub config: StorageClassConfig,
    pub storage_pools: BTreeMap<String, Vec<String>>,
}

/// Persisted class record; the matched-pool list is runtime state and is
/// rebuilt during bootstrap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageClassPersistent {
    #[serde(flatten)]
    pub config: StorageClassConfig,
}
