//! Storage backend interface
//!
//! Backends only move bytes. Entry pairing, ages and eviction are handled by
//! [`crate::EphemeralStore`].

use crate::error::Result;
use crate::types::{ImageKind, Payload};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix under which every object of this store lives
pub const KEY_PREFIX: &str = "deblur/";

/// Object key for one half of an entry: `deblur/{id}/{kind}`
pub fn object_key(id: &str, kind: ImageKind) -> String {
    format!("{}{}/{}", KEY_PREFIX, id, kind)
}

/// Prefix matching both halves of an entry
pub fn entry_prefix(id: &str) -> String {
    format!("{}{}/", KEY_PREFIX, id)
}

/// Split an object key back into its id and kind
pub fn parse_object_key(key: &str) -> Option<(&str, ImageKind)> {
    let rest = key.strip_prefix(KEY_PREFIX)?;
    let (id, kind) = rest.rsplit_once('/')?;
    if id.is_empty() || id.contains('/') || id == "." || id == ".." {
        return None;
    }
    Some((id, kind.parse().ok()?))
}

/// Listing record returned by [`BlobBackend::list_prefix`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub content_type: String,
    #[serde(default)]
    pub uploaded_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait BlobBackend: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Write an object, replacing any previous value
    async fn put(&self, key: &str, payload: Payload) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<Payload>>;

    /// Remove an object, returning whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<ObjectInfo>>;
}
