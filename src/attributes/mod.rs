//! Typed storage attributes
//!
//! Pools advertise *offers* and storage classes express *requests*. Both are
//! tagged variants so the matcher dispatches on the variant tag; a request
//! only ever matches an offer of the same type.

use serde::{Deserialize, Serialize};

// =============================================================================
// Well-Known Attribute Names
// =============================================================================

pub const IOPS: &str = "IOPS";
pub const SNAPSHOTS: &str = "snapshots";
pub const PROVISIONING_TYPE: &str = "provisioningType";
pub const MEDIA: &str = "media";
pub const BACKEND_TYPE: &str = "backendType";
pub const UNIQUE_OPTIONS: &str = "uniqueOptions";

/// Attributes used only by the reference driver's test fixtures
pub const TESTING_ATTRIBUTE: &str = "testingAttribute";
pub const RECOVERY_TEST: &str = "recoveryTest";

// =============================================================================
// Offers
// =============================================================================

/// A typed attribute value advertised by a storage pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Offer {
    /// One of a set of string values
    String { values: Vec<String> },
    /// A fixed boolean capability
    Bool { value: bool },
    /// An inclusive integer range
    Int { min: i64, max: i64 },
}

impl Offer {
    pub fn string<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Offer::String {
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn bool(value: bool) -> Self {
        Offer::Bool { value }
    }

    pub fn int(min: i64, max: i64) -> Self {
        Offer::Int { min, max }
    }
}

// =============================================================================
// Requests
// =============================================================================

/// A typed attribute constraint expressed by a storage class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Request {
    String(String),
    Bool(bool),
    Int(i64),
}

impl Request {
    /// Strictly typed matching: a missing or differently-typed offer never
    /// satisfies a request.
    pub fn matches(&self, offer: &Offer) -> bool {
        match (self, offer) {
            (Request::String(s), Offer::String { values }) => values.iter().any(|v| v == s),
            (Request::Bool(b), Offer::Bool { value }) => b == value,
            (Request::Int(n), Offer::Int { min, max }) => min <= n && n <= max,
            _ => false,
        }
    }
}

impl std::fmt::Display for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Request::String(s) => write!(f, "{}", s),
            Request::Bool(b) => write!(f, "{}", b),
            Request::Int(n) => write!(f, "{}", n),
        }
    }
}
