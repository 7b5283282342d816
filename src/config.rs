//! Core enums and version constants shared across the orchestrator
//!
//! Protocols, access modes, and backend lifecycle states, plus the schema
//! version strings recorded in the persistent store.

use serde::{Deserialize, Serialize};

/// Version of the externalized object forms written to the persistent store
pub const ORCHESTRATOR_API_VERSION: &str = "1";

/// Schema version of the durable store layout
pub const STORE_VERSION: &str = "v1";

// =============================================================================
// Protocol
// =============================================================================

/// Transport protocol a volume is served over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    File,
    Block,
    /// No preference; matches any backend protocol
    Any,
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol::Any
    }
}

impl Protocol {
    /// Whether a volume requesting `self` can be served by a backend
    /// speaking `backend_protocol`.
    pub fn accepts(&self, backend_protocol: Protocol) -> bool {
        *self == Protocol::Any || *self == backend_protocol
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::File => write!(f, "file"),
            Protocol::Block => write!(f, "block"),
            Protocol::Any => write!(f, "any"),
        }
    }
}

// =============================================================================
// Access Mode
// =============================================================================

/// Volume access mode requested by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessMode {
    ReadWriteOnce,
    ReadOnlyMany,
    ReadWriteMany,
    /// No preference
    Any,
}

impl Default for AccessMode {
    fn default() -> Self {
        AccessMode::Any
    }
}

impl std::fmt::Display for AccessMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessMode::ReadWriteOnce => write!(f, "ReadWriteOnce"),
            AccessMode::ReadOnlyMany => write!(f, "ReadOnlyMany"),
            AccessMode::ReadWriteMany => write!(f, "ReadWriteMany"),
            AccessMode::Any => write!(f, "Any"),
        }
    }
}

// =============================================================================
// Backend State
// =============================================================================

/// Lifecycle state of a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendState {
    /// Accepting new volume placements
    Online,
    /// Retains existing volumes but admits no new ones
    Offline,
    /// Draining; removable once its volume set is empty
    Deleting,
}

impl BackendState {
    pub fn is_online(&self) -> bool {
        matches!(self, BackendState::Online)
    }

    /// States in which the backend is removed as soon as it holds no volumes
    pub fn is_terminal(&self) -> bool {
        matches!(self, BackendState::Offline | BackendState::Deleting)
    }
}

impl std::fmt::Display for BackendState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendState::Online => write!(f, "online"),
            BackendState::Offline => write!(f, "offline"),
            BackendState::Deleting => write!(f, "deleting"),
        }
    }
}
