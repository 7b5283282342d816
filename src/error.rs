//! Error types for the volume orchestrator
//!
//! Provides structured error types for the orchestrator core, the storage
//! drivers, and the persistence layer, along with the kind predicates the
//! frontends use to translate errors into their own protocol codes.

use thiserror::Error;

/// Unified error type for the orchestrator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Orchestrator Lifecycle Errors
    // =========================================================================
    #[error("Orchestrator is not yet ready")]
    NotReady,

    #[error("Bootstrap failed: {0}")]
    Bootstrap(String),

    // =========================================================================
    // Entity Errors
    // =========================================================================
    #[error("{kind} {name} was not found")]
    NotFound { kind: String, name: String },

    #[error("Volume {name} already exists")]
    VolumeExists { name: String },

    #[error("Backend {backend} already manages the storage system {key}")]
    DuplicateBackend { backend: String, key: String },

    // =========================================================================
    // Request Errors
    // =========================================================================
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{op} operation is already in progress for volume {name}")]
    InProgress { op: String, name: String },

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    // =========================================================================
    // Driver / Store I/O Errors
    // =========================================================================
    #[error("Unrecoverable error: {0}")]
    Unrecoverable(String),

    #[error("Backend operation failed: {backend} - {operation}: {reason}")]
    BackendOperationFailed {
        backend: String,
        operation: String,
        reason: String,
    },

    // =========================================================================
    // Persistent Store Errors
    // =========================================================================
    #[error("Key {key} was not found in the persistent store")]
    KeyNotFound { key: String },

    #[error("Key {key} already exists in the persistent store")]
    KeyExists { key: String },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Convenience constructor for entity-not-found errors
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Error::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// The operation was invoked before bootstrap completed
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Error::NotReady)
    }

    /// A structural inconsistency was found while bootstrapping
    pub fn is_bootstrap(&self) -> bool {
        matches!(self, Error::Bootstrap(_))
    }

    /// A named entity is missing; deletion paths treat this as success
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// A volume name collision; size-compatible creates translate to success
    pub fn is_volume_exists(&self) -> bool {
        matches!(self, Error::VolumeExists { .. })
    }

    /// The request itself was malformed or references unknown entities
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Error::InvalidInput(_))
    }

    /// A journal entry already exists for this (op, name)
    pub fn is_in_progress(&self) -> bool {
        matches!(self, Error::InProgress { .. })
    }

    /// Driver or store I/O failed in a way the core will not retry
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, Error::Unrecoverable(_))
    }

    pub fn is_not_supported(&self) -> bool {
        matches!(self, Error::NotSupported(_))
    }

    /// A store-level key miss, distinct from an orchestrator-level NotFound.
    /// Bootstrap treats this as "no records of that kind exist".
    pub fn is_key_not_found(&self) -> bool {
        matches!(self, Error::KeyNotFound { .. })
    }
}

/// Result type alias for the orchestrator
pub type Result<T> = std::result::Result<T, Error>;
