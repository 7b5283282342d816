//! Volume Orchestrator - Unified Storage Provisioning
//!
//! A storage orchestrator that provisions and manages persistent volumes on
//! heterogeneous external storage controllers (NAS and SAN) on behalf of a
//! container platform. Volume requests are expressed against abstract
//! storage classes; the orchestrator selects a backend and pool satisfying
//! the class, performs the operation against the backend's driver, and
//! journals its decisions so it can recover from a crash mid-operation.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Frontends                               │
//! │     CSI translation   │   REST API (axum)   │   volcli          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                      Orchestrator Core                          │
//! │   class→pool matching │ provisioning state machines │ bootstrap │
//! ├───────────────────────────────┬─────────────────────────────────┤
//! │      Persistence Client       │         Storage Drivers         │
//! │   memory │ passthrough        │   fake │ (vendor drivers)       │
//! └───────────────────────────────┴─────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`core`]: the orchestrator engine
//! - [`storage`]: backends, pools, volumes, nodes
//! - [`storage_class`]: class definitions and the match predicate
//! - [`attributes`]: typed attribute offers and requests
//! - [`drivers`]: the driver capability and the reference driver
//! - [`persistence`]: the store contract and reference stores
//! - [`frontend`]: CSI-shape translation helpers
//! - [`api`]: REST surface
//! - [`error`]: error types and kind predicates

pub mod api;
pub mod attributes;
pub mod config;
pub mod core;
pub mod drivers;
pub mod error;
pub mod frontend;
pub mod persistence;
pub mod storage;
pub mod storage_class;

pub use crate::core::Orchestrator;
pub use config::{AccessMode, BackendState, Protocol};
pub use error::{Error, Result};
pub use persistence::{Client, InMemoryStore, PassthroughStore, StoreType};
pub use storage::{
    Backend, BackendExternal, BackendPersistent, Node, Snapshot, Volume, VolumeConfig,
    VolumeExternal, VolumePublishInfo,
};
pub use storage_class::{StorageClass, StorageClassConfig, StorageClassExternal};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
