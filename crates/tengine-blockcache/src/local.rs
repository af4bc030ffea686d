//! Shared-memory tier of the block cache.
//!
//! Nodes live in a [`SlabPool`] charged against the zone size. They are
//! indexed by `(murmurhash2(key), key)` so that keys sharing a hash are
//! ordered by key comparison. Each node also sits in a doubly-linked LRU
//! queue threaded through slot indices. Every operation holds the zone
//! lock for its full duration and performs no I/O.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::config::BlockCacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::key::{BlockCacheKey, BlockCacheKv, BlockCacheValue, HitStatus};
use crate::slab::SlabPool;
use crate::zone::{ShmZone, ZoneRegistry};

/// Fixed per-node overhead charged to the zone.
pub const NODE_HEADER_BYTES: usize = 64;

/// Bytes the shared context itself takes out of the zone.
pub const CONTEXT_BYTES: usize = 128;

/// A node records its payload length in one byte.
pub const MAX_SERVERS_PER_NODE: usize = u8::MAX as usize / 8;

/// Registry type for local cache zones.
pub type CacheZoneRegistry = ZoneRegistry<SharedCacheState>;

/// Bytes charged for a node holding `servers` addresses.
pub fn node_bytes(servers: usize) -> usize {
    NODE_HEADER_BYTES + servers * 8
}

#[derive(Debug)]
struct CacheNode {
    hash: u32,
    key: BlockCacheKey,
    payload_len: u8,
    server_addrs: Box<[u64]>,
    prev: Option<usize>,
    next: Option<usize>,
}

impl CacheNode {
    fn value(&self) -> BlockCacheValue {
        let count = self.payload_len as usize / 8;
        BlockCacheValue::new(self.server_addrs[..count].to_vec())
    }
}

/// Point-in-time counters for a local cache zone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LocalCacheStats {
    /// Nodes currently cached.
    pub entries: usize,
    /// Zone bytes used by nodes.
    pub used_bytes: usize,
    /// Zone bytes available to nodes.
    pub capacity_bytes: usize,
    /// Hits since the last hit ratio report.
    pub hit_count: u64,
    /// Misses since the last hit ratio report.
    pub miss_count: u64,
    /// Nodes dropped by discard passes since creation.
    pub discards: u64,
}

impl LocalCacheStats {
    /// Hits over lookups in the current window, 0.0 when idle.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }
}

/// Cache state stored inside a shared zone.
#[derive(Debug)]
pub struct SharedCacheState {
    zone: String,
    pool: SlabPool<CacheNode>,
    index: BTreeMap<(u32, BlockCacheKey), usize>,
    lru_head: Option<usize>,
    lru_tail: Option<usize>,
    hit_count: u64,
    miss_count: u64,
    discards: u64,
    discard_batch_size: usize,
    stat_window: u64,
}

impl SharedCacheState {
    /// Lays out a fresh cache context in a zone of `size` bytes.
    pub fn new(
        zone: &str,
        size: usize,
        discard_batch_size: usize,
        stat_window: u64,
    ) -> CacheResult<Self> {
        if size <= CONTEXT_BYTES {
            return Err(CacheError::ZoneTooSmall {
                zone: zone.to_string(),
                size,
            });
        }
        Ok(Self {
            zone: zone.to_string(),
            pool: SlabPool::new(size - CONTEXT_BYTES),
            index: BTreeMap::new(),
            lru_head: None,
            lru_tail: None,
            hit_count: 0,
            miss_count: 0,
            discards: 0,
            discard_batch_size,
            stat_window,
        })
    }

    fn link_head(&mut self, idx: usize) {
        let old_head = self.lru_head;
        if let Some(node) = self.pool.get_mut(idx) {
            node.prev = None;
            node.next = old_head;
        }
        match old_head {
            Some(head) => {
                if let Some(node) = self.pool.get_mut(head) {
                    node.prev = Some(idx);
                }
            }
            None => self.lru_tail = Some(idx),
        }
        self.lru_head = Some(idx);
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = match self.pool.get_mut(idx) {
            Some(node) => (node.prev.take(), node.next.take()),
            None => return,
        };
        match prev {
            Some(p) => {
                if let Some(node) = self.pool.get_mut(p) {
                    node.next = next;
                }
            }
            None => self.lru_head = next,
        }
        match next {
            Some(n) => {
                if let Some(node) = self.pool.get_mut(n) {
                    node.prev = prev;
                }
            }
            None => self.lru_tail = prev,
        }
    }

    fn promote(&mut self, idx: usize) {
        if self.lru_head != Some(idx) {
            self.unlink(idx);
            self.link_head(idx);
        }
    }

    fn delete_node(&mut self, idx: usize) {
        self.unlink(idx);
        if let Some(node) = self.pool.free(idx) {
            self.index.remove(&(node.hash, node.key));
        }
    }

    fn record_hits(&mut self, hits: u64) {
        self.hit_count += hits;
        if self.hit_count >= self.stat_window {
            let total = self.hit_count + self.miss_count;
            info!(
                zone = %self.zone,
                hits = self.hit_count,
                misses = self.miss_count,
                hit_ratio = self.hit_count as f64 / total as f64,
                "local block cache hit ratio"
            );
            self.hit_count = 0;
            self.miss_count = 0;
        }
    }

    fn lookup(&mut self, key: &BlockCacheKey) -> Option<BlockCacheValue> {
        let hash = key.cache_hash();
        match self.index.get(&(hash, *key)).copied() {
            Some(idx) => {
                self.promote(idx);
                self.record_hits(1);
                self.pool.get(idx).map(CacheNode::value)
            }
            None => {
                self.miss_count += 1;
                None
            }
        }
    }

    fn insert(&mut self, key: &BlockCacheKey, value: &BlockCacheValue) -> CacheResult<()> {
        let count = value.server_count();
        if count == 0 {
            return Err(CacheError::InvalidValue {
                reason: "no server addresses",
            });
        }
        if count > MAX_SERVERS_PER_NODE {
            return Err(CacheError::ValueTooLarge {
                count,
                max: MAX_SERVERS_PER_NODE,
            });
        }

        let hash = key.cache_hash();
        if let Some(old) = self.index.get(&(hash, *key)).copied() {
            self.delete_node(old);
        }

        let bytes = node_bytes(count);
        let node = CacheNode {
            hash,
            key: *key,
            payload_len: (count * 8) as u8,
            server_addrs: value.server_addrs.clone().into_boxed_slice(),
            prev: None,
            next: None,
        };

        let idx = match self.pool.alloc(bytes, node) {
            Ok(idx) => idx,
            Err(node) => {
                let dropped = self.discard();
                debug!(zone = %self.zone, dropped, "zone full, discarded lru tail");
                self.pool
                    .alloc(bytes, node)
                    .map_err(|_| CacheError::OutOfMemory {
                        zone: self.zone.clone(),
                        requested: bytes,
                    })?
            }
        };
        self.index.insert((hash, *key), idx);
        self.link_head(idx);
        Ok(())
    }

    fn remove(&mut self, key: &BlockCacheKey) -> bool {
        match self.index.get(&(key.cache_hash(), *key)).copied() {
            Some(idx) => {
                self.delete_node(idx);
                true
            }
            None => false,
        }
    }

    fn discard(&mut self) -> usize {
        let mut dropped = 0;
        while dropped < self.discard_batch_size {
            let Some(tail) = self.lru_tail else {
                break;
            };
            self.delete_node(tail);
            dropped += 1;
        }
        self.discards += dropped as u64;
        dropped
    }

    fn batch_lookup(&mut self, keys: &[BlockCacheKey]) -> Vec<BlockCacheKv> {
        let mut kvs = Vec::with_capacity(keys.len());
        for key in keys {
            match self.index.get(&(key.cache_hash(), *key)).copied() {
                Some(idx) => {
                    self.promote(idx);
                    if let Some(node) = self.pool.get(idx) {
                        kvs.push(BlockCacheKv {
                            key: *key,
                            value: node.value(),
                            hit: HitStatus::Local,
                        });
                    }
                }
                None => self.miss_count += 1,
            }
        }
        if !kvs.is_empty() {
            self.record_hits(kvs.len() as u64);
        }
        kvs
    }

    fn lru_order(&self) -> Vec<BlockCacheKey> {
        let mut keys = Vec::with_capacity(self.pool.len());
        let mut cursor = self.lru_head;
        while let Some(idx) = cursor {
            match self.pool.get(idx) {
                Some(node) => {
                    keys.push(node.key);
                    cursor = node.next;
                }
                None => break,
            }
        }
        keys
    }

    fn stats(&self) -> LocalCacheStats {
        LocalCacheStats {
            entries: self.pool.len(),
            used_bytes: self.pool.used_bytes(),
            capacity_bytes: self.pool.capacity_bytes(),
            hit_count: self.hit_count,
            miss_count: self.miss_count,
            discards: self.discards,
        }
    }
}

/// Handle on a local cache zone. Cloning shares the zone.
#[derive(Debug, Clone)]
pub struct LocalBlockCache {
    zone: Arc<ShmZone<SharedCacheState>>,
}

impl LocalBlockCache {
    /// Attaches to the zone named in `config`, creating it on first use.
    ///
    /// A zone that already exists keeps its contents.
    pub fn init_zone(registry: &CacheZoneRegistry, config: &BlockCacheConfig) -> CacheResult<Self> {
        let (zone, exists) = registry.attach(&config.zone_name, config.zone_size, |size| {
            SharedCacheState::new(
                &config.zone_name,
                size,
                config.discard_batch_size,
                config.stat_window,
            )
        })?;
        debug!(zone = %config.zone_name, exists, "attached local block cache");
        Ok(Self { zone })
    }

    /// Creates a cache over a private zone that no registry knows about.
    pub fn standalone(config: &BlockCacheConfig) -> CacheResult<Self> {
        let state = SharedCacheState::new(
            &config.zone_name,
            config.zone_size,
            config.discard_batch_size,
            config.stat_window,
        )?;
        Ok(Self {
            zone: Arc::new(ShmZone::new(&config.zone_name, config.zone_size, state)),
        })
    }

    /// Zone name.
    pub fn zone_name(&self) -> &str {
        self.zone.name()
    }

    /// Looks up `key`, promoting it to the LRU head on a hit.
    pub fn lookup(&self, key: &BlockCacheKey) -> Option<BlockCacheValue> {
        let value = self.zone.lock().lookup(key);
        debug!(key = %key, hit = value.is_some(), "local block cache lookup");
        value
    }

    /// Stores `value` under `key`, replacing any existing node.
    ///
    /// When the zone is full one discard pass runs before a single retry.
    pub fn insert(&self, key: &BlockCacheKey, value: &BlockCacheValue) -> CacheResult<()> {
        let result = self.zone.lock().insert(key, value);
        debug!(key = %key, servers = value.server_count(), ok = result.is_ok(), "local block cache insert");
        result
    }

    /// Removes `key`. Returns whether a node was dropped.
    pub fn remove(&self, key: &BlockCacheKey) -> bool {
        let removed = self.zone.lock().remove(key);
        debug!(key = %key, removed, "local block cache remove");
        removed
    }

    /// Drops up to one discard batch from the LRU tail.
    pub fn discard(&self) -> usize {
        self.zone.lock().discard()
    }

    /// Looks up every key under one lock, returning hits in key order.
    pub fn batch_lookup(&self, keys: &[BlockCacheKey]) -> Vec<BlockCacheKv> {
        let kvs = self.zone.lock().batch_lookup(keys);
        debug!(keys = keys.len(), hits = kvs.len(), "local block cache batch lookup");
        kvs
    }

    /// Keys from most to least recently used.
    pub fn lru_order(&self) -> Vec<BlockCacheKey> {
        self.zone.lock().lru_order()
    }

    /// Number of cached nodes.
    pub fn len(&self) -> usize {
        self.zone.lock().pool.len()
    }

    /// Returns `true` when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counter snapshot.
    pub fn stats(&self) -> LocalCacheStats {
        self.zone.lock().stats()
    }
}
