//! Error types for the ephemeral blob store

use std::fmt;

/// Errors surfaced by store operations.
///
/// A missing entry is not an error: lookups return `Option` / `bool`.
#[derive(Debug)]
pub enum StoreError {
    /// Empty id, empty payload, unknown image kind or an unusable config
    InvalidArgument(String),
    /// The backing storage could not be initialized or reattached
    StorageUnavailable(String),
    /// A backend call failed after initialization
    Backend(String),
    Http(Box<reqwest::Error>),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            StoreError::StorageUnavailable(msg) => write!(f, "Storage unavailable: {}", msg),
            StoreError::Backend(msg) => write!(f, "Backend error: {}", msg),
            StoreError::Http(err) => write!(f, "HTTP error: {}", err),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Http(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        StoreError::Http(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
