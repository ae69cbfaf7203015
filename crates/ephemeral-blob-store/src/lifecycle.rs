//! Process-lifetime initialization and background purging

use crate::backend::BlobBackend;
use crate::error::{Result, StoreError};
use crate::memory::MemoryBackend;
use crate::remote::RemoteBackend;
use crate::store::EphemeralStore;
use crate::types::{BackendConfig, StoreConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub type SharedStore = Arc<EphemeralStore>;

/// Build the backend selected by configuration
pub fn open_backend(config: &BackendConfig) -> Result<Arc<dyn BlobBackend>> {
    match config {
        BackendConfig::Memory => Ok(Arc::new(MemoryBackend::new())),
        BackendConfig::Remote { base_url, token } => {
            if base_url.is_empty() {
                return Err(StoreError::StorageUnavailable(
                    "remote backend requires a base URL".to_string(),
                ));
            }
            Ok(Arc::new(RemoteBackend::new(base_url, token.clone())?))
        }
    }
}

/// Holds the single store of a process.
///
/// The owner creates one cell and hands out the [`SharedStore`] it yields.
/// Initialization runs at most once; a failed attempt leaves the cell empty
/// so a later call can retry.
#[derive(Default)]
pub struct StoreCell {
    store: OnceCell<SharedStore>,
}

impl StoreCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_open(
        &self,
        config: &StoreConfig,
        backend: &BackendConfig,
    ) -> Result<SharedStore> {
        let store = self
            .store
            .get_or_try_init(|| async {
                let backend = open_backend(backend)?;
                let store = EphemeralStore::open(config.clone(), backend)
                    .await
                    .map_err(|e| match e {
                        StoreError::StorageUnavailable(_) => e,
                        other => StoreError::StorageUnavailable(other.to_string()),
                    })?;
                info!(
                    backend = store.backend_name(),
                    max_entries = config.max_entries,
                    max_age_secs = config.max_age.as_secs(),
                    "Initialized image storage"
                );
                Ok::<_, StoreError>(Arc::new(store))
            })
            .await?;
        Ok(store.clone())
    }

    /// The store, if it has been initialized
    pub fn get(&self) -> Option<SharedStore> {
        self.store.get().cloned()
    }
}

/// Run `purge` on a fixed interval until the returned task is aborted
pub fn spawn_purge_task(store: SharedStore, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let purged = store.purge().await;
            debug!(purged, "Periodic purge finished");
        }
    })
}
