//! Keyed store of original/processed image pairs with age and capacity eviction

use crate::backend::{object_key, parse_object_key, BlobBackend, ObjectInfo, KEY_PREFIX};
use crate::error::{Result, StoreError};
use crate::types::{EntryMeta, ImageKind, Payload, StoreConfig, StoreStats};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Default)]
struct Index {
    entries: HashMap<String, EntryMeta>,
    next_seq: u64,
}

impl Index {
    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

/// Ephemeral store for paired image payloads.
///
/// All mutations (`put`, `delete`, `purge`) hold the index write lock for
/// their full duration, including backend I/O, so readers only ever observe
/// complete entries and whole eviction passes.
///
/// With a remote backend that I/O is network round-trips: a `put` makes two
/// requests plus two per evicted entry, each bounded by the client timeout,
/// and every `get`, `has` and `stats` waits behind them.
pub struct EphemeralStore {
    backend: Arc<dyn BlobBackend>,
    config: StoreConfig,
    index: RwLock<Index>,
}

impl EphemeralStore {
    /// Create an empty store without looking at existing backend contents
    pub fn new(config: StoreConfig, backend: Arc<dyn BlobBackend>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            backend,
            config,
            index: RwLock::new(Index::default()),
        })
    }

    /// Create a store and reattach entries the backend already holds.
    ///
    /// Complete pairs are indexed again, orphaned halves are deleted and the
    /// eviction bounds are applied before the store is returned.
    pub async fn open(config: StoreConfig, backend: Arc<dyn BlobBackend>) -> Result<Self> {
        let store = Self::new(config, backend)?;
        store.reattach().await?;
        Ok(store)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    async fn reattach(&self) -> Result<()> {
        let objects = self.backend.list_prefix(KEY_PREFIX).await.map_err(|e| {
            StoreError::StorageUnavailable(format!(
                "failed to list {} backend: {}",
                self.backend.name(),
                e
            ))
        })?;

        let mut halves: HashMap<String, [Option<ObjectInfo>; 2]> = HashMap::new();
        for object in objects {
            let Some((id, kind)) = parse_object_key(&object.key) else {
                debug!(key = %object.key, "Ignoring foreign object");
                continue;
            };
            let slot = match kind {
                ImageKind::Original => 0,
                ImageKind::Processed => 1,
            };
            let id = id.to_string();
            halves.entry(id).or_default()[slot] = Some(object);
        }

        let now = Instant::now();
        let wall_now = Utc::now();
        let mut pairs = Vec::new();
        for (id, [original, processed]) in halves {
            match (original, processed) {
                (Some(original), Some(processed)) => {
                    let stored_at = [original.uploaded_at, processed.uploaded_at]
                        .into_iter()
                        .flatten()
                        .min()
                        .unwrap_or(wall_now);
                    pairs.push((id, original, processed, stored_at));
                }
                (Some(orphan), None) | (None, Some(orphan)) => {
                    warn!(id = %id, key = %orphan.key, "Deleting orphaned half of entry");
                    if let Err(e) = self.backend.delete(&orphan.key).await {
                        warn!(key = %orphan.key, error = %e, "Failed to delete orphaned object");
                    }
                }
                (None, None) => {}
            }
        }
        pairs.sort_by(|a, b| a.3.cmp(&b.3).then_with(|| a.0.cmp(&b.0)));

        let mut index = self.index.write().await;
        let mut expired = 0;
        for (id, original, processed, stored_at) in pairs {
            let age = (wall_now - stored_at).to_std().unwrap_or(Duration::ZERO);
            if age > self.config.max_age {
                debug!(id = %id, age_secs = age.as_secs(), "Dropping expired entry");
                self.remove_objects(&id).await;
                expired += 1;
                continue;
            }
            let seq = index.next_seq();
            index.entries.insert(
                id,
                EntryMeta {
                    original_size: original.size,
                    processed_size: processed.size,
                    original_type: original.content_type,
                    processed_type: processed.content_type,
                    created_at: now.checked_sub(age).unwrap_or(now),
                    stored_at,
                    seq,
                },
            );
        }

        info!(
            backend = self.backend.name(),
            entries = index.entries.len(),
            expired,
            "Store attached"
        );
        self.purge_locked(&mut index).await;
        Ok(())
    }

    /// Store both payloads for `id`, replacing any previous entry.
    ///
    /// Runs a purge afterwards when the entry count exceeds `max_entries`.
    /// The new entry is the newest one, so that pass never evicts it for
    /// capacity.
    pub async fn put(&self, id: &str, original: Payload, processed: Payload) -> Result<()> {
        validate_id(id)?;
        if original.is_empty() || processed.is_empty() {
            return Err(StoreError::InvalidArgument(format!(
                "empty payload for {}",
                id
            )));
        }

        let original_size = original.size();
        let processed_size = processed.size();
        let original_type = original.content_type.clone();
        let processed_type = processed.content_type.clone();

        let mut index = self.index.write().await;

        if let Err(e) = self.write_pair(id, original, processed).await {
            warn!(id, error = %e, "Failed to store entry, rolling back");
            index.entries.remove(id);
            self.remove_objects(id).await;
            return Err(e);
        }

        let seq = index.next_seq();
        index.entries.insert(
            id.to_string(),
            EntryMeta {
                original_size,
                processed_size,
                original_type,
                processed_type,
                created_at: Instant::now(),
                stored_at: Utc::now(),
                seq,
            },
        );
        debug!(
            id,
            original_size,
            processed_size,
            entries = index.entries.len(),
            "Stored entry"
        );

        if index.entries.len() > self.config.max_entries {
            self.purge_locked(&mut index).await;
        }

        Ok(())
    }

    async fn write_pair(&self, id: &str, original: Payload, processed: Payload) -> Result<()> {
        self.backend
            .put(&object_key(id, ImageKind::Original), original)
            .await?;
        self.backend
            .put(&object_key(id, ImageKind::Processed), processed)
            .await
    }

    /// Look up one half of an entry. Never extends the entry's lifetime.
    pub async fn get(&self, id: &str, kind: ImageKind) -> Result<Option<Payload>> {
        validate_id(id)?;

        let index = self.index.read().await;
        if !index.entries.contains_key(id) {
            debug!(id, %kind, "Entry not found");
            return Ok(None);
        }

        let payload = self.backend.get(&object_key(id, kind)).await?;
        if payload.is_none() {
            warn!(
                id,
                %kind,
                backend = self.backend.name(),
                "Indexed object missing from backend"
            );
        }
        Ok(payload)
    }

    /// Whether an entry exists. Ids that could never be stored report `false`.
    pub async fn has(&self, id: &str) -> bool {
        if validate_id(id).is_err() {
            return false;
        }
        self.index.read().await.entries.contains_key(id)
    }

    /// Remove an entry. Returns whether it existed; repeated calls return `false`.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        validate_id(id)?;

        let mut index = self.index.write().await;
        if !index.entries.contains_key(id) {
            debug!(id, "Nothing to delete");
            return Ok(false);
        }

        // Unindex first so a half-deleted pair is never readable
        index.entries.remove(id);
        let mut failure = None;
        for kind in ImageKind::ALL {
            if let Err(e) = self.backend.delete(&object_key(id, kind)).await {
                warn!(id, %kind, error = %e, "Failed to delete object");
                failure.get_or_insert(e);
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }
        debug!(id, entries = index.entries.len(), "Deleted entry");
        Ok(true)
    }

    /// Evict entries older than `max_age`, then the oldest entries beyond
    /// `max_entries`. Returns how many entries were removed.
    pub async fn purge(&self) -> usize {
        let mut index = self.index.write().await;
        self.purge_locked(&mut index).await
    }

    async fn purge_locked(&self, index: &mut Index) -> usize {
        if index.entries.is_empty() {
            return 0;
        }

        let now = Instant::now();
        let max_age = self.config.max_age;
        let expired: Vec<String> = index
            .entries
            .iter()
            .filter(|(_, meta)| now.saturating_duration_since(meta.created_at) > max_age)
            .map(|(id, _)| id.clone())
            .collect();
        let expired_count = expired.len();
        for id in expired {
            index.entries.remove(&id);
            self.remove_objects(&id).await;
        }

        let mut evicted_count = 0;
        if index.entries.len() > self.config.max_entries {
            let mut by_age: Vec<(Instant, u64, String)> = index
                .entries
                .iter()
                .map(|(id, meta)| (meta.created_at, meta.seq, id.clone()))
                .collect();
            by_age.sort();

            let excess = index.entries.len() - self.config.max_entries;
            for (_, _, id) in by_age.into_iter().take(excess) {
                index.entries.remove(&id);
                self.remove_objects(&id).await;
                evicted_count += 1;
            }
        }

        let purged = expired_count + evicted_count;
        if purged > 0 {
            info!(
                expired = expired_count,
                evicted = evicted_count,
                remaining = index.entries.len(),
                "Purged entries"
            );
        }
        purged
    }

    /// Best-effort removal of both objects; failures are logged only
    async fn remove_objects(&self, id: &str) {
        for kind in ImageKind::ALL {
            let key = object_key(id, kind);
            if let Err(e) = self.backend.delete(&key).await {
                warn!(key = %key, error = %e, "Failed to delete object");
            }
        }
    }

    /// Consistent snapshot of all live entries
    pub async fn stats(&self) -> StoreStats {
        let index = self.index.read().await;

        let mut stats = StoreStats {
            count: index.entries.len(),
            ..Default::default()
        };
        let mut oldest: Option<&EntryMeta> = None;
        let mut newest: Option<&EntryMeta> = None;

        for meta in index.entries.values() {
            stats.total_size += meta.total_size();
            if oldest.map_or(true, |o| (meta.created_at, meta.seq) < (o.created_at, o.seq)) {
                oldest = Some(meta);
            }
            if newest.map_or(true, |n| (meta.created_at, meta.seq) > (n.created_at, n.seq)) {
                newest = Some(meta);
            }
        }

        stats.oldest = oldest.map(|m| m.stored_at);
        stats.newest = newest.map(|m| m.stored_at);
        stats
    }

    /// Creation time of an entry, if present
    pub async fn stored_at(&self, id: &str) -> Option<DateTime<Utc>> {
        let index = self.index.read().await;
        index.entries.get(id).map(|meta| meta.stored_at)
    }
}

fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(StoreError::InvalidArgument("id must not be empty".to_string()));
    }
    if id.contains('/') {
        return Err(StoreError::InvalidArgument(format!(
            "id must not contain '/': {}",
            id
        )));
    }
    // Dot segments are collapsed in object URLs and would escape the entry prefix
    if id == "." || id == ".." {
        return Err(StoreError::InvalidArgument(format!(
            "id must not be a dot segment: {}",
            id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::entry_prefix;
    use crate::memory::MemoryBackend;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn payload(data: &[u8]) -> Payload {
        Payload::new(data.to_vec(), "image/png")
    }

    fn store_with(max_entries: usize, max_age: Duration) -> EphemeralStore {
        let config = StoreConfig {
            max_age,
            max_entries,
        };
        EphemeralStore::new(config, Arc::new(MemoryBackend::new())).unwrap()
    }

    fn default_store() -> EphemeralStore {
        store_with(5, Duration::from_secs(300))
    }

    #[tokio::test]
    async fn test_put_and_get_round_trip() {
        let store = default_store();
        store
            .put(
                "job-1",
                payload(b"blurry"),
                Payload::new(b"sharp".to_vec(), "image/jpeg"),
            )
            .await
            .unwrap();

        let original = store.get("job-1", ImageKind::Original).await.unwrap().unwrap();
        let processed = store.get("job-1", ImageKind::Processed).await.unwrap().unwrap();
        assert_eq!(&original.data[..], b"blurry");
        assert_eq!(original.content_type, "image/png");
        assert_eq!(&processed.data[..], b"sharp");
        assert_eq!(processed.content_type, "image/jpeg");
        assert!(store.has("job-1").await);
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let store = default_store();
        assert!(store.get("nope", ImageKind::Original).await.unwrap().is_none());
        assert!(!store.has("nope").await);
    }

    #[tokio::test]
    async fn test_invalid_arguments_rejected() {
        let store = default_store();

        let err = store
            .put("", payload(b"a"), payload(b"b"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));

        let err = store
            .put("job", payload(b""), payload(b"b"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));

        let err = store
            .put("a/b", payload(b"a"), payload(b"b"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));

        for id in [".", ".."] {
            let err = store
                .put(id, payload(b"a"), payload(b"b"))
                .await
                .unwrap_err();
            assert!(matches!(err, StoreError::InvalidArgument(_)));
            assert!(!store.has(id).await);
        }

        assert!(store.get("", ImageKind::Original).await.is_err());
        assert!(store.delete("").await.is_err());
        assert!(!store.has("").await);
        assert_eq!(store.stats().await.count, 0);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = default_store();
        assert!(!store.delete("ghost").await.unwrap());

        store.put("job-1", payload(b"a"), payload(b"b")).await.unwrap();
        assert!(store.delete("job-1").await.unwrap());
        assert!(!store.delete("job-1").await.unwrap());
        assert!(store.get("job-1", ImageKind::Processed).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let store = default_store();
        for i in 1..=6 {
            store
                .put(&format!("job-{}", i), payload(b"o"), payload(b"p"))
                .await
                .unwrap();
        }

        assert_eq!(store.stats().await.count, 5);
        assert!(!store.has("job-1").await);
        for i in 2..=6 {
            assert!(store.has(&format!("job-{}", i)).await);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_orders_by_creation_time() {
        let store = store_with(2, Duration::from_secs(60));
        store.put("a", payload(b"1"), payload(b"1")).await.unwrap();
        tokio::time::advance(Duration::from_millis(10)).await;
        store.put("b", payload(b"2"), payload(b"2")).await.unwrap();
        tokio::time::advance(Duration::from_millis(10)).await;
        // Replacing "a" resets its creation time, so "b" becomes the oldest
        store.put("a", payload(b"3"), payload(b"3")).await.unwrap();
        tokio::time::advance(Duration::from_millis(10)).await;
        store.put("c", payload(b"4"), payload(b"4")).await.unwrap();

        assert!(store.has("a").await);
        assert!(!store.has("b").await);
        assert!(store.has("c").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_age_eviction() {
        let store = store_with(5, Duration::from_millis(100));
        store.put("job-1", payload(b"a"), payload(b"b")).await.unwrap();

        tokio::time::advance(Duration::from_millis(150)).await;

        assert_eq!(store.purge().await, 1);
        assert_eq!(store.stats().await.count, 0);
        assert!(!store.has("job-1").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_keeps_fresh_entries() {
        let store = store_with(5, Duration::from_millis(100));
        store.put("old", payload(b"a"), payload(b"b")).await.unwrap();
        tokio::time::advance(Duration::from_millis(80)).await;
        store.put("new", payload(b"c"), payload(b"d")).await.unwrap();
        tokio::time::advance(Duration::from_millis(40)).await;

        assert_eq!(store.purge().await, 1);
        assert!(!store.has("old").await);
        assert!(store.has("new").await);
    }

    #[tokio::test]
    async fn test_purge_empty_store() {
        let store = default_store();
        assert_eq!(store.purge().await, 0);
    }

    #[tokio::test]
    async fn test_stats_snapshot() {
        let store = default_store();
        let empty = store.stats().await;
        assert_eq!(empty, StoreStats::default());

        store.put("a", payload(b"1234"), payload(b"12")).await.unwrap();
        store.put("b", payload(b"123"), payload(b"1")).await.unwrap();

        let stats = store.stats().await;
        assert_eq!(stats.count, 2);
        assert_eq!(stats.total_size, 10);
        assert_eq!(stats.oldest, store.stored_at("a").await);
        assert_eq!(stats.newest, store.stored_at("b").await);

        store.delete("a").await.unwrap();
        let stats = store.stats().await;
        assert_eq!(stats.count, 1);
        assert_eq!(stats.total_size, 4);
        assert_eq!(stats.oldest, stats.newest);
    }

    #[tokio::test]
    async fn test_replacement_overwrites_both_payloads() {
        let store = default_store();
        store.put("job", payload(b"o1"), payload(b"p1")).await.unwrap();
        store.put("job", payload(b"o2-new"), payload(b"p2-new")).await.unwrap();

        let original = store.get("job", ImageKind::Original).await.unwrap().unwrap();
        let processed = store.get("job", ImageKind::Processed).await.unwrap().unwrap();
        assert_eq!(&original.data[..], b"o2-new");
        assert_eq!(&processed.data[..], b"p2-new");

        let stats = store.stats().await;
        assert_eq!(stats.count, 1);
        assert_eq!(stats.total_size, 12);
    }

    #[tokio::test]
    async fn test_last_operation_wins_between_put_and_delete() {
        let store = default_store();

        store.put("job", payload(b"a"), payload(b"b")).await.unwrap();
        store.delete("job").await.unwrap();
        assert!(!store.has("job").await);

        store.put("job", payload(b"c"), payload(b"d")).await.unwrap();
        assert!(store.has("job").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reattach_indexes_pairs_and_drops_orphans() {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .put(&object_key("pair", ImageKind::Original), payload(b"abc"))
            .await
            .unwrap();
        backend
            .put(&object_key("pair", ImageKind::Processed), payload(b"de"))
            .await
            .unwrap();
        backend
            .put(&object_key("orphan", ImageKind::Original), payload(b"x"))
            .await
            .unwrap();

        let store = EphemeralStore::open(StoreConfig::default(), backend.clone())
            .await
            .unwrap();

        assert!(store.has("pair").await);
        assert!(!store.has("orphan").await);
        assert_eq!(store.stats().await.total_size, 5);
        assert!(backend
            .get(&object_key("orphan", ImageKind::Original))
            .await
            .unwrap()
            .is_none());
    }

    /// Memory backend whose writes to processed objects can be made to fail or stall
    #[derive(Default)]
    struct FlakyBackend {
        inner: MemoryBackend,
        fail_processed: AtomicBool,
        slow_processed: AtomicBool,
    }

    #[async_trait]
    impl BlobBackend for FlakyBackend {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn put(&self, key: &str, payload: Payload) -> Result<()> {
            if key.ends_with("/processed") {
                if self.fail_processed.load(Ordering::SeqCst) {
                    return Err(StoreError::Backend("write refused".to_string()));
                }
                if self.slow_processed.load(Ordering::SeqCst) {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
            self.inner.put(key, payload).await
        }

        async fn get(&self, key: &str) -> Result<Option<Payload>> {
            self.inner.get(key).await
        }

        async fn delete(&self, key: &str) -> Result<bool> {
            self.inner.delete(key).await
        }

        async fn list_prefix(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
            self.inner.list_prefix(prefix).await
        }
    }

    #[tokio::test]
    async fn test_failed_put_leaves_no_partial_entry() {
        let backend = Arc::new(FlakyBackend::default());
        let store = EphemeralStore::new(StoreConfig::default(), backend.clone()).unwrap();

        store.put("job", payload(b"old-o"), payload(b"old-p")).await.unwrap();
        backend.fail_processed.store(true, Ordering::SeqCst);

        let result = store.put("job", payload(b"new-o"), payload(b"new-p")).await;
        assert!(matches!(result, Err(StoreError::Backend(_))));

        assert!(!store.has("job").await);
        assert_eq!(store.stats().await.count, 0);
        assert!(backend.list_prefix(KEY_PREFIX).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reader_waits_for_complete_entry() {
        let backend = Arc::new(FlakyBackend::default());
        backend.slow_processed.store(true, Ordering::SeqCst);
        let store = Arc::new(EphemeralStore::new(StoreConfig::default(), backend).unwrap());

        let writer = {
            let store = store.clone();
            tokio::spawn(async move { store.put("job", payload(b"o"), payload(b"p")).await })
        };
        // Let the writer take the lock and stall on the processed half
        tokio::time::sleep(Duration::from_millis(10)).await;

        let original = store.get("job", ImageKind::Original).await.unwrap();
        let processed = store.get("job", ImageKind::Processed).await.unwrap();
        assert!(original.is_some());
        assert!(processed.is_some());

        writer.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_puts_respect_capacity() {
        let store = Arc::new(default_store());

        let handles: Vec<_> = (0..32)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .put(&format!("job-{}", i), payload(b"orig"), payload(b"proc!"))
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let stats = store.stats().await;
        assert_eq!(stats.count, 5);

        let mut live = 0;
        for i in 0..32 {
            if store.has(&format!("job-{}", i)).await {
                live += 1;
            }
        }
        assert_eq!(live, stats.count);
        assert_eq!(stats.total_size, 9 * live as u64);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_put_and_delete_leave_whole_entry_or_nothing() {
        let backend = Arc::new(MemoryBackend::new());
        let store = Arc::new(EphemeralStore::new(StoreConfig::default(), backend.clone()).unwrap());

        for round in 0..50 {
            store.put("job", payload(b"seed"), payload(b"seed")).await.unwrap();

            let putter = {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .put("job", payload(b"fresh-o"), payload(b"fresh-p"))
                        .await
                })
            };
            let deleter = {
                let store = store.clone();
                tokio::spawn(async move { store.delete("job").await })
            };
            putter.await.unwrap().unwrap();
            deleter.await.unwrap().unwrap();

            let objects = backend.list_prefix(&entry_prefix("job")).await.unwrap();
            if store.has("job").await {
                assert_eq!(objects.len(), 2, "round {}", round);
                let original = store.get("job", ImageKind::Original).await.unwrap();
                let processed = store.get("job", ImageKind::Processed).await.unwrap();
                assert_eq!(&original.unwrap().data[..], b"fresh-o");
                assert_eq!(&processed.unwrap().data[..], b"fresh-p");
            } else {
                assert!(objects.is_empty(), "round {}", round);
                assert_eq!(store.stats().await.count, 0);
            }
        }
    }
}
