//! Storage data model
//!
//! The in-memory object graph the orchestrator owns: backends, their pools,
//! the volumes placed on them, and registered nodes, together with the
//! externalized and persisted forms of each.

mod backend;
mod node;
mod pool;
mod volume;

pub use backend::{Backend, BackendExternal, BackendPersistent};
pub use node::Node;
pub use pool::{StoragePool, StoragePoolExternal};
pub use volume::{
    Snapshot, Volume, VolumeAccessInfo, VolumeConfig, VolumeExternal, VolumePublishInfo,
};
