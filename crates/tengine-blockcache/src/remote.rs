//! Remote KV tier of the block cache.
//!
//! [`RemoteKv`] is the interface to the external key-value cluster. Every
//! call reports a [`RemoteStatus`] instead of failing: anything other than
//! [`RemoteStatus::Success`] means the tier could not answer and lookups
//! fall through as misses.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, warn};

use crate::codec::{decode_key, decode_value, encode_key, encode_value, VALUE_BASE_SIZE};
use crate::error::{CacheError, CacheResult};
use crate::key::{BlockCacheKey, BlockCacheKv, BlockCacheValue, HitStatus};

/// Outcome of a remote tier call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteStatus {
    /// The call completed.
    Success,
    /// The key is not stored.
    NotFound,
    /// The tier did not answer in time.
    Timeout,
    /// The tier is unreachable.
    Unavailable,
    /// Any other tier-specific failure code.
    Failed(i32),
}

impl RemoteStatus {
    /// Returns `true` for [`RemoteStatus::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, RemoteStatus::Success)
    }
}

/// One entry of a batch get reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Encoded key.
    pub key: Bytes,
    /// Per-key status.
    pub status: RemoteStatus,
    /// Stored value, present on success.
    pub value: Option<Bytes>,
}

/// Asynchronous interface to a remote key-value cluster.
#[async_trait]
pub trait RemoteKv: Send + Sync + 'static {
    /// Fetches one key.
    async fn get(&self, key: Bytes) -> (RemoteStatus, Option<Bytes>);

    /// Stores one key. A `ttl_secs` of 0 means no expiry.
    async fn put(&self, key: Bytes, value: Bytes, ttl_secs: u32) -> RemoteStatus;

    /// Fetches several keys in one round-trip.
    async fn batch_get(&self, keys: Vec<Bytes>) -> (RemoteStatus, Vec<RemoteEntry>);

    /// Deletes keys. Absent keys are not an error.
    async fn delete(&self, keys: Vec<Bytes>) -> RemoteStatus;
}

/// Call counters of a [`MemoryRemoteKv`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MemoryRemoteStats {
    /// Single gets served.
    pub gets: u64,
    /// Puts served.
    pub puts: u64,
    /// Batch gets served.
    pub batch_gets: u64,
    /// Delete calls served.
    pub deletes: u64,
}

/// In-process [`RemoteKv`] backed by a concurrent map.
///
/// Can be switched unavailable to simulate an unreachable cluster.
#[derive(Debug)]
pub struct MemoryRemoteKv {
    data: DashMap<Bytes, Bytes>,
    available: AtomicBool,
    latency: Option<Duration>,
    gets: AtomicU64,
    puts: AtomicU64,
    batch_gets: AtomicU64,
    deletes: AtomicU64,
}

impl Default for MemoryRemoteKv {
    fn default() -> Self {
        Self {
            data: DashMap::new(),
            available: AtomicBool::new(true),
            latency: None,
            gets: AtomicU64::new(0),
            puts: AtomicU64::new(0),
            batch_gets: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        }
    }
}

impl MemoryRemoteKv {
    /// Creates an empty, available store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that sleeps `latency` before every answer.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Makes every call succeed or fail with [`RemoteStatus::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Stores raw bytes, bypassing the value encoding.
    pub fn insert_raw(&self, key: Bytes, value: Bytes) {
        self.data.insert(key, value);
    }

    /// Returns `true` if `key` is stored.
    pub fn contains(&self, key: &BlockCacheKey) -> bool {
        self.data.contains_key(&encode_key(key))
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Call counters.
    pub fn stats(&self) -> MemoryRemoteStats {
        MemoryRemoteStats {
            gets: self.gets.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            batch_gets: self.batch_gets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        }
    }

    async fn round_trip(&self) -> bool {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.available.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteKv for MemoryRemoteKv {
    async fn get(&self, key: Bytes) -> (RemoteStatus, Option<Bytes>) {
        self.gets.fetch_add(1, Ordering::Relaxed);
        if !self.round_trip().await {
            return (RemoteStatus::Unavailable, None);
        }
        match self.data.get(&key) {
            Some(value) => (RemoteStatus::Success, Some(value.value().clone())),
            None => (RemoteStatus::NotFound, None),
        }
    }

    async fn put(&self, key: Bytes, value: Bytes, _ttl_secs: u32) -> RemoteStatus {
        self.puts.fetch_add(1, Ordering::Relaxed);
        if !self.round_trip().await {
            return RemoteStatus::Unavailable;
        }
        self.data.insert(key, value);
        RemoteStatus::Success
    }

    async fn batch_get(&self, keys: Vec<Bytes>) -> (RemoteStatus, Vec<RemoteEntry>) {
        self.batch_gets.fetch_add(1, Ordering::Relaxed);
        if !self.round_trip().await {
            return (RemoteStatus::Unavailable, Vec::new());
        }
        let entries = keys
            .into_iter()
            .map(|key| match self.data.get(&key) {
                Some(value) => RemoteEntry {
                    value: Some(value.value().clone()),
                    key,
                    status: RemoteStatus::Success,
                },
                None => RemoteEntry {
                    key,
                    status: RemoteStatus::NotFound,
                    value: None,
                },
            })
            .collect();
        (RemoteStatus::Success, entries)
    }

    async fn delete(&self, keys: Vec<Bytes>) -> RemoteStatus {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        if !self.round_trip().await {
            return RemoteStatus::Unavailable;
        }
        for key in keys {
            self.data.remove(&key);
        }
        RemoteStatus::Success
    }
}

/// Block cache view over a [`RemoteKv`].
#[derive(Debug)]
pub struct RemoteBlockCache<R> {
    kv: Arc<R>,
    ttl_secs: u32,
}

impl<R> Clone for RemoteBlockCache<R> {
    fn clone(&self) -> Self {
        Self {
            kv: Arc::clone(&self.kv),
            ttl_secs: self.ttl_secs,
        }
    }
}

impl<R: RemoteKv> RemoteBlockCache<R> {
    /// Wraps `kv`, writing entries with `ttl_secs`.
    pub fn new(kv: Arc<R>, ttl_secs: u32) -> Self {
        Self { kv, ttl_secs }
    }

    /// The underlying store.
    pub fn kv(&self) -> &Arc<R> {
        &self.kv
    }

    /// Decodes a stored value, dropping it remotely when unusable.
    async fn accept_value(&self, key: &BlockCacheKey, raw: &[u8]) -> Option<BlockCacheValue> {
        if raw.len() <= VALUE_BASE_SIZE {
            return None;
        }
        match decode_value(raw) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(key = %key, error = %e, "remote block cache value invalid, removing");
                self.remove_quiet(key).await;
                None
            }
        }
    }

    /// Looks up `key`. Every failure is reported as a miss.
    pub async fn lookup(&self, key: &BlockCacheKey) -> Option<BlockCacheValue> {
        let (status, raw) = self.kv.get(encode_key(key)).await;
        match (status, raw) {
            (RemoteStatus::Success, Some(raw)) => {
                let value = self.accept_value(key, &raw).await;
                debug!(key = %key, hit = value.is_some(), "remote block cache lookup");
                value
            }
            (status, _) => {
                debug!(key = %key, ?status, "remote block cache miss");
                None
            }
        }
    }

    /// Stores `value` under `key`.
    pub async fn insert(&self, key: &BlockCacheKey, value: &BlockCacheValue) -> CacheResult<()> {
        debug!(key = %key, servers = value.server_count(), "remote block cache insert");
        let status = self
            .kv
            .put(encode_key(key), encode_value(value), self.ttl_secs)
            .await;
        if status.is_success() {
            Ok(())
        } else {
            Err(CacheError::Remote { op: "put", status })
        }
    }

    /// Deletes `key`.
    pub async fn remove(&self, key: &BlockCacheKey) -> CacheResult<()> {
        debug!(key = %key, "remote block cache remove");
        let status = self.kv.delete(vec![encode_key(key)]).await;
        if status.is_success() {
            Ok(())
        } else {
            Err(CacheError::Remote {
                op: "delete",
                status,
            })
        }
    }

    async fn remove_quiet(&self, key: &BlockCacheKey) {
        if let Err(e) = self.remove(key).await {
            warn!(key = %key, error = %e, "failed to remove invalid remote block cache entry");
        }
    }

    /// Looks up `keys` in one round-trip, returning hits in key order.
    ///
    /// Replies are matched to requested keys by identity; replies for keys
    /// that were not asked for, or asked for twice, are ignored.
    pub async fn batch_lookup(&self, keys: &[BlockCacheKey]) -> Vec<BlockCacheKv> {
        if keys.is_empty() {
            return Vec::new();
        }
        let (status, entries) = self
            .kv
            .batch_get(keys.iter().map(encode_key).collect())
            .await;
        if !status.is_success() {
            debug!(keys = keys.len(), ?status, "remote block cache batch miss");
            return Vec::new();
        }

        let mut found: HashMap<BlockCacheKey, BlockCacheValue> = HashMap::new();
        for entry in entries {
            if !entry.status.is_success() {
                continue;
            }
            let (Ok(key), Some(raw)) = (decode_key(&entry.key), entry.value) else {
                continue;
            };
            if !keys.contains(&key) || found.contains_key(&key) {
                continue;
            }
            if let Some(value) = self.accept_value(&key, &raw).await {
                found.insert(key, value);
            }
        }

        let mut kvs = Vec::with_capacity(found.len());
        for key in keys {
            if let Some(value) = found.remove(key) {
                kvs.push(BlockCacheKv {
                    key: *key,
                    value,
                    hit: HitStatus::Remote,
                });
            }
        }
        debug!(keys = keys.len(), hits = kvs.len(), "remote block cache batch lookup");
        kvs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_remote() -> RemoteBlockCache<MemoryRemoteKv> {
        RemoteBlockCache::new(Arc::new(MemoryRemoteKv::new()), 0)
    }

    #[tokio::test]
    async fn test_insert_then_lookup() {
        let remote = create_test_remote();
        let key = BlockCacheKey::new(7, 42);
        let value = BlockCacheValue::new(vec![100, 200]);
        remote.insert(&key, &value).await.unwrap();
        assert_eq!(remote.lookup(&key).await, Some(value));
        assert!(remote.kv().contains(&key));
    }

    #[tokio::test]
    async fn test_lookup_absent_is_miss() {
        let remote = create_test_remote();
        assert_eq!(remote.lookup(&BlockCacheKey::new(1, 1)).await, None);
    }

    #[tokio::test]
    async fn test_unavailable_is_miss_and_insert_error() {
        let remote = create_test_remote();
        let key = BlockCacheKey::new(1, 1);
        let value = BlockCacheValue::new(vec![1]);
        remote.insert(&key, &value).await.unwrap();
        remote.kv().set_available(false);

        assert_eq!(remote.lookup(&key).await, None);
        assert_eq!(
            remote.insert(&key, &value).await,
            Err(CacheError::Remote {
                op: "put",
                status: RemoteStatus::Unavailable
            })
        );
        assert!(remote.batch_lookup(&[key]).await.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_value_removed() {
        let remote = create_test_remote();
        let key = BlockCacheKey::new(3, 9);
        remote
            .kv()
            .insert_raw(encode_key(&key), Bytes::from_static(&[0, 0, 0, 0, 1, 1, 1, 1, 1, 1, 1, 1]));

        assert_eq!(remote.lookup(&key).await, None);
        assert!(!remote.kv().contains(&key));
        assert_eq!(remote.kv().stats().deletes, 1);
    }

    #[tokio::test]
    async fn test_short_value_is_plain_miss() {
        let remote = create_test_remote();
        let key = BlockCacheKey::new(3, 9);
        remote
            .kv()
            .insert_raw(encode_key(&key), Bytes::from_static(&[1, 0, 0, 0]));

        assert_eq!(remote.lookup(&key).await, None);
        assert!(remote.kv().contains(&key));
        assert_eq!(remote.kv().stats().deletes, 0);
    }

    #[tokio::test]
    async fn test_batch_lookup_matches_by_key() {
        let remote = create_test_remote();
        let a = BlockCacheKey::new(1, 1);
        let b = BlockCacheKey::new(1, 2);
        let c = BlockCacheKey::new(1, 3);
        remote.insert(&c, &BlockCacheValue::new(vec![3])).await.unwrap();
        remote.insert(&a, &BlockCacheValue::new(vec![1])).await.unwrap();

        let kvs = remote.batch_lookup(&[a, b, c]).await;
        assert_eq!(kvs.len(), 2);
        assert_eq!(kvs[0].key, a);
        assert_eq!(kvs[0].value.server_addrs, vec![1]);
        assert_eq!(kvs[1].key, c);
        assert!(kvs.iter().all(|kv| kv.hit == HitStatus::Remote));
        assert_eq!(remote.kv().stats().batch_gets, 1);
    }

    #[tokio::test]
    async fn test_batch_lookup_empty_skips_round_trip() {
        let remote = create_test_remote();
        assert!(remote.batch_lookup(&[]).await.is_empty());
        assert_eq!(remote.kv().stats().batch_gets, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_simulated() {
        let kv = MemoryRemoteKv::with_latency(Duration::from_millis(50));
        let start = tokio::time::Instant::now();
        let (status, _) = kv.get(Bytes::from_static(b"k")).await;
        assert_eq!(status, RemoteStatus::NotFound);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_status_success() {
        assert!(RemoteStatus::Success.is_success());
        assert!(!RemoteStatus::Failed(-3997).is_success());
    }
}
