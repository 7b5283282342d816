//! Storage pools
//!
//! A pool is a subdivision of a backend advertising a set of typed attribute
//! offers. Each pool carries the reverse index of storage classes that
//! currently match it; the orchestrator keeps that index consistent with the
//! class-side matched-pool lists.

use crate::attributes::Offer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A subdivision of a backend with typed attribute offers
#[derive(Debug, Clone, PartialEq)]
pub struct StoragePool {
    pub name: String,
    /// Typed offers keyed by attribute name
    pub attributes: BTreeMap<String, Offer>,
    /// Names of storage classes whose predicate accepts this pool
    pub storage_classes: Vec<String>,
}

impl StoragePool {
    pub fn new(name: impl Into<String>, attributes: BTreeMap<String, Offer>) -> Self {
        Self {
            name: name.into(),
            attributes,
            storage_classes: Vec::new(),
        }
    }

    /// Record that a storage class matches this pool. Idempotent.
    pub fn add_storage_class(&mut self, class: &str) {
        if !self.storage_classes.iter().any(|c| c == class) {
            self.storage_classes.push(class.to_string());
        }
    }

    /// Remove a storage class back-reference, if present.
    pub fn remove_storage_class(&mut self, class: &str) {
        self.storage_classes.retain(|c| c != class);
    }

    pub fn has_storage_class(&self, class: &str) -> bool {
        self.storage_classes.iter().any(|c| c == class)
    }

    pub fn construct_external(&self) -> StoragePoolExternal {
        StoragePoolExternal {
            name: self.name.clone(),
            attributes: self.attributes.clone(),
            storage_classes: self.storage_classes.clone(),
        }
    }
}

/// Externalized pool form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoragePoolExternal {
    pub name: String,
    pub attributes: BTreeMap<String, Offer>,
    pub storage_classes: Vec<String>,
}
