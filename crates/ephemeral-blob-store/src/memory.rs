//! In-process backend

use crate::backend::{BlobBackend, ObjectInfo};
use crate::error::Result;
use crate::types::Payload;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Holds payloads in a process-local map; contents die with the process
#[derive(Default)]
pub struct MemoryBackend {
    objects: RwLock<HashMap<String, Payload>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn put(&self, key: &str, payload: Payload) -> Result<()> {
        self.objects.write().await.insert(key.to_string(), payload);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Payload>> {
        Ok(self.objects.read().await.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.objects.write().await.remove(key).is_some())
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
        let objects = self.objects.read().await;
        Ok(objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, payload)| ObjectInfo {
                key: key.clone(),
                size: payload.size(),
                content_type: payload.content_type.clone(),
                uploaded_at: None,
            })
            .collect())
    }
}
