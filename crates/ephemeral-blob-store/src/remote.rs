//! HTTP object store backend
//!
//! Talks to a bucket-style service exposing
//! `PUT|GET|DELETE {base}/{key}` and `GET {base}?prefix={prefix}`.

use crate::backend::{BlobBackend, ObjectInfo};
use crate::error::{Result, StoreError};
use crate::types::Payload;
use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    objects: Vec<ObjectInfo>,
}

/// Stores payloads in a remote object store so they outlive a single process
pub struct RemoteBackend {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl RemoteBackend {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| StoreError::StorageUnavailable(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Dot segments are refused since URL normalization would resolve them
    /// to a different object than `key` names
    fn object_url(&self, key: &str) -> Result<String> {
        let mut encoded = Vec::new();
        for segment in key.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(StoreError::InvalidArgument(format!(
                    "invalid object key: {}",
                    key
                )));
            }
            encoded.push(urlencoding::encode(segment).into_owned());
        }
        Ok(format!("{}/{}", self.base_url, encoded.join("/")))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn status_error(action: &str, key: &str, status: StatusCode) -> StoreError {
        warn!(action, key, status = %status, "Object store request failed");
        StoreError::Backend(format!("{} {} returned status {}", action, key, status))
    }
}

#[async_trait]
impl BlobBackend for RemoteBackend {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn put(&self, key: &str, payload: Payload) -> Result<()> {
        let url = self.object_url(key)?;
        debug!(url = %url, size = payload.size(), "Uploading object");

        let response = self
            .authorized(self.client.put(&url))
            .header(header::CONTENT_TYPE, payload.content_type)
            .body(payload.data)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::status_error("PUT", key, response.status()));
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Payload>> {
        let url = self.object_url(key)?;
        let response = self.authorized(self.client.get(&url)).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(key, "Object not found");
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::status_error("GET", key, response.status()));
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let data = response.bytes().await?;

        Ok(Some(Payload { data, content_type }))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let url = self.object_url(key)?;
        let response = self.authorized(self.client.delete(&url)).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(Self::status_error("DELETE", key, status)),
        }
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
        let url = format!("{}?prefix={}", self.base_url, urlencoding::encode(prefix));
        let response = self.authorized(self.client.get(&url)).send().await?;

        if !response.status().is_success() {
            return Err(Self::status_error("LIST", prefix, response.status()));
        }

        let listing: ListResponse = response.json().await?;
        debug!(prefix, objects = listing.objects.len(), "Listed objects");
        Ok(listing.objects)
    }
}
