//! Ephemeral blob store for paired original/processed images
//!
//! Holds an original upload and its processed counterpart under one job id
//! until the client releases it, bounded by a maximum age and a maximum
//! number of entries. Eviction policy lives in [`EphemeralStore`] and is
//! written once against the [`BlobBackend`] trait, which has an in-process
//! implementation and an HTTP object store implementation.

mod backend;
mod error;
mod lifecycle;
mod memory;
mod remote;
mod store;
mod types;

pub use backend::{entry_prefix, object_key, BlobBackend, ObjectInfo, KEY_PREFIX};
pub use error::{Result, StoreError};
pub use lifecycle::{open_backend, spawn_purge_task, SharedStore, StoreCell};
pub use memory::MemoryBackend;
pub use remote::RemoteBackend;
pub use store::EphemeralStore;
pub use types::{BackendConfig, EntryMeta, ImageKind, Payload, StoreConfig, StoreStats};
