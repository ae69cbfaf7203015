//! Store types

use crate::error::{Result, StoreError};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::Instant;

/// Which half of an entry to read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    Original,
    Processed,
}

impl ImageKind {
    pub const ALL: [ImageKind; 2] = [ImageKind::Original, ImageKind::Processed];

    pub fn as_str(&self) -> &'static str {
        match self {
            ImageKind::Original => "original",
            ImageKind::Processed => "processed",
        }
    }
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "original" => Ok(ImageKind::Original),
            "processed" => Ok(ImageKind::Processed),
            other => Err(StoreError::InvalidArgument(format!(
                "unknown image kind: {}",
                other
            ))),
        }
    }
}

/// A binary payload with its declared content type.
///
/// Cloning is cheap; callers get a reference-counted view of the stored bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub data: Bytes,
    pub content_type: String,
}

impl Payload {
    pub fn new(data: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            content_type: content_type.into(),
        }
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Index record for a stored entry
#[derive(Debug, Clone)]
pub struct EntryMeta {
    pub original_size: u64,
    pub processed_size: u64,
    pub original_type: String,
    pub processed_type: String,
    /// Monotonic creation time, used for age eviction
    pub created_at: Instant,
    /// Wall clock creation time, used for reporting
    pub stored_at: DateTime<Utc>,
    /// Insertion counter, breaks ties between equal `created_at`
    pub seq: u64,
}

impl EntryMeta {
    pub fn total_size(&self) -> u64 {
        self.original_size + self.processed_size
    }
}

/// Aggregate view over all live entries
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub count: usize,
    pub total_size: u64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

/// Eviction bounds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub max_age: Duration,
    pub max_entries: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(5 * 60), // 5 minutes
            max_entries: 5,
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_entries == 0 {
            return Err(StoreError::InvalidArgument(
                "max_entries must be at least 1".to_string(),
            ));
        }
        if self.max_age.is_zero() {
            return Err(StoreError::InvalidArgument(
                "max_age must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Which storage backend holds the payload bytes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BackendConfig {
    #[default]
    Memory,
    Remote {
        base_url: String,
        token: Option<String>,
    },
}
