//! Node records
//!
//! Nodes register themselves with the orchestrator so that block volumes can
//! be published to them. Records are persisted and cached in memory.

use serde::{Deserialize, Serialize};

/// A platform node that can mount volumes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub name: String,
    /// iSCSI initiator qualified name
    #[serde(default)]
    pub iqn: String,
    #[serde(default)]
    pub ips: Vec<String>,
}
