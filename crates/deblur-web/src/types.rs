//! Response bodies for the deblur web service

use ephemeral_blob_store::StoreStats;
use serde::{Deserialize, Serialize};

/// Served in place of an image that is no longer (or never was) stored
pub const PLACEHOLDER_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="256" height="256" viewBox="0 0 256 256"><rect width="256" height="256" fill="#e5e7eb"/><text x="128" y="132" font-family="sans-serif" font-size="16" text-anchor="middle" fill="#6b7280">Image unavailable</text></svg>"##;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub deblur_configured: bool,
    pub storage: StoreStats,
}

/// Result of an upload, in the shape the upload page expects
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeblurResponse {
    pub success: bool,
    pub id: String,
    pub original_url: String,
    pub processed_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl DeblurResponse {
    pub fn new(id: &str, note: Option<String>) -> Self {
        Self {
            success: true,
            id: id.to_string(),
            original_url: format!("/api/images/{}/original", id),
            processed_url: format!("/api/images/{}/processed", id),
            note,
        }
    }
}

/// Storage stats around a mutation
#[derive(Debug, Serialize)]
pub struct StatsChange {
    pub before: StoreStats,
    pub after: StoreStats,
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub success: bool,
    pub deleted: bool,
    pub message: String,
    pub stats: StatsChange,
}

#[derive(Debug, Serialize)]
pub struct PurgeResponse {
    pub success: bool,
    pub purged_count: usize,
    pub message: String,
    pub stats: StatsChange,
}

#[derive(Debug, Deserialize)]
pub struct DebugQuery {
    pub id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum DebugResponse {
    Entry { exists: bool, message: String },
    Stats { stats: StoreStats, message: String },
}
