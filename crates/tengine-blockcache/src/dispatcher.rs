//! Two-tier block cache dispatcher.
//!
//! A logical lookup walks the tiers local first, then remote, tracked by a
//! [`LookupCursor`]. The cursor survives across the await on the remote
//! tier, so a lookup resumed after a remote round-trip never queries the
//! local tier again. No zone lock is held while the remote tier is awaited.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::BlockCacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::key::{BlockCacheKey, BlockCacheKv, BlockCacheValue, HitStatus};
use crate::local::{CacheZoneRegistry, LocalBlockCache};
use crate::remote::{RemoteBlockCache, RemoteKv};

/// Next tier a lookup will try.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LookupStage {
    /// The shared-memory tier.
    #[default]
    Local,
    /// The remote KV tier.
    Remote,
    /// Every tier has been tried.
    Done,
}

/// Per-operation position in the tier walk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookupCursor {
    stage: LookupStage,
}

impl LookupCursor {
    /// A cursor positioned at the local tier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Next tier to try.
    pub fn stage(&self) -> LookupStage {
        self.stage
    }

    /// Rewinds to the local tier for a new logical operation.
    pub fn reset(&mut self) {
        self.stage = LookupStage::Local;
    }
}

/// Result of a single-key lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    /// Served by the shared-memory tier.
    LocalHit(BlockCacheValue),
    /// Served by the remote tier.
    RemoteHit(BlockCacheValue),
    /// Not cached in any enabled tier.
    Miss,
}

impl CacheLookup {
    /// Tier that served the lookup.
    pub fn hit_status(&self) -> HitStatus {
        match self {
            CacheLookup::LocalHit(_) => HitStatus::Local,
            CacheLookup::RemoteHit(_) => HitStatus::Remote,
            CacheLookup::Miss => HitStatus::NoHit,
        }
    }

    /// The value, if any tier had it.
    pub fn value(&self) -> Option<&BlockCacheValue> {
        match self {
            CacheLookup::LocalHit(v) | CacheLookup::RemoteHit(v) => Some(v),
            CacheLookup::Miss => None,
        }
    }

    /// Consumes the result, returning the value.
    pub fn into_value(self) -> Option<BlockCacheValue> {
        match self {
            CacheLookup::LocalHit(v) | CacheLookup::RemoteHit(v) => Some(v),
            CacheLookup::Miss => None,
        }
    }
}

/// Whether a batch resolved every key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    /// Every key was found.
    Complete,
    /// Some keys must be resolved by the caller.
    Partial,
}

/// Result of a batch lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchLookup {
    /// Found entries, local hits first, each in request order.
    pub kvs: Vec<BlockCacheKv>,
    /// Completion status.
    pub status: BatchStatus,
}

impl BatchLookup {
    /// Requested keys that no tier resolved.
    pub fn unresolved(&self, keys: &[BlockCacheKey]) -> Vec<BlockCacheKey> {
        unresolved(keys, &self.kvs)
    }
}

fn unresolved(keys: &[BlockCacheKey], kvs: &[BlockCacheKv]) -> Vec<BlockCacheKey> {
    let mut missing: Vec<BlockCacheKey> = Vec::new();
    for key in keys {
        if !kvs.iter().any(|kv| kv.key == *key) && !missing.contains(key) {
            missing.push(*key);
        }
    }
    missing
}

/// Two-tier block location cache.
#[derive(Debug)]
pub struct BlockCache<R> {
    local: Option<LocalBlockCache>,
    remote: Option<RemoteBlockCache<R>>,
    max_batch_keys: usize,
}

impl<R: RemoteKv> BlockCache<R> {
    /// Builds a dispatcher over the given tiers.
    pub fn new(
        local: Option<LocalBlockCache>,
        remote: Option<RemoteBlockCache<R>>,
        max_batch_keys: usize,
    ) -> Self {
        Self {
            local,
            remote,
            max_batch_keys,
        }
    }

    /// Builds a dispatcher from `config`, attaching the local zone through
    /// `registry` and wrapping `kv` when the remote tier is enabled.
    pub fn from_config(
        config: &BlockCacheConfig,
        registry: &CacheZoneRegistry,
        kv: Option<Arc<R>>,
    ) -> CacheResult<Self> {
        let local = if config.use_local {
            Some(LocalBlockCache::init_zone(registry, config)?)
        } else {
            None
        };
        let remote = match (config.use_remote, kv) {
            (true, Some(kv)) => Some(RemoteBlockCache::new(kv, config.remote_ttl_secs)),
            (true, None) => {
                warn!("remote block cache enabled without a remote store, disabling");
                None
            }
            (false, _) => None,
        };
        Ok(Self::new(local, remote, config.max_batch_keys))
    }

    /// The local tier, if enabled.
    pub fn local(&self) -> Option<&LocalBlockCache> {
        self.local.as_ref()
    }

    /// The remote tier, if enabled.
    pub fn remote(&self) -> Option<&RemoteBlockCache<R>> {
        self.remote.as_ref()
    }

    /// Looks up `key`, resuming at the tier `cursor` points to.
    ///
    /// A remote hit is copied into the local tier. Tier failures read as
    /// misses.
    pub async fn lookup(&self, cursor: &mut LookupCursor, key: &BlockCacheKey) -> CacheLookup {
        if cursor.stage == LookupStage::Local {
            cursor.stage = LookupStage::Remote;
            if let Some(local) = &self.local {
                if let Some(value) = local.lookup(key) {
                    return CacheLookup::LocalHit(value);
                }
            }
        }

        if cursor.stage == LookupStage::Remote {
            cursor.stage = LookupStage::Done;
            if let Some(remote) = &self.remote {
                if let Some(value) = remote.lookup(key).await {
                    self.populate_local(key, &value);
                    return CacheLookup::RemoteHit(value);
                }
            }
        }

        debug!(key = %key, "block cache miss");
        CacheLookup::Miss
    }

    fn populate_local(&self, key: &BlockCacheKey, value: &BlockCacheValue) {
        if let Some(local) = &self.local {
            if let Err(e) = local.insert(key, value) {
                debug!(key = %key, error = %e, "failed to populate local block cache");
            }
        }
    }

    /// Stores `value` in every enabled tier, remote first.
    ///
    /// Each tier is best effort; failures are logged and not rolled back.
    pub async fn insert(&self, key: &BlockCacheKey, value: &BlockCacheValue) {
        if let Some(remote) = &self.remote {
            if let Err(e) = remote.insert(key, value).await {
                warn!(key = %key, error = %e, "remote block cache insert failed");
            }
        }
        if let Some(local) = &self.local {
            if let Err(e) = local.insert(key, value) {
                warn!(key = %key, error = %e, "local block cache insert failed");
            }
        }
    }

    /// Removes `key` from the tiers it could be resident in.
    ///
    /// The local tier is touched for any hit, the remote tier only when the
    /// value was served remotely.
    pub async fn remove(&self, key: &BlockCacheKey, hit: HitStatus) {
        if hit == HitStatus::NoHit {
            return;
        }
        if let Some(local) = &self.local {
            local.remove(key);
        }
        if hit == HitStatus::Remote {
            if let Some(remote) = &self.remote {
                if let Err(e) = remote.remove(key).await {
                    warn!(key = %key, error = %e, "remote block cache remove failed");
                }
            }
        }
    }

    /// Looks up several keys: one local pass, then one remote round-trip
    /// restricted to the keys the local tier did not resolve.
    pub async fn batch_lookup(
        &self,
        cursor: &mut LookupCursor,
        keys: &[BlockCacheKey],
    ) -> CacheResult<BatchLookup> {
        if keys.len() > self.max_batch_keys {
            return Err(CacheError::BatchTooLarge {
                count: keys.len(),
                max: self.max_batch_keys,
            });
        }

        let mut kvs = Vec::with_capacity(keys.len());

        if cursor.stage == LookupStage::Local {
            cursor.stage = LookupStage::Remote;
            if let Some(local) = &self.local {
                kvs = local.batch_lookup(keys);
                if unresolved(keys, &kvs).is_empty() {
                    return Ok(BatchLookup {
                        kvs,
                        status: BatchStatus::Complete,
                    });
                }
            }
        }

        if cursor.stage == LookupStage::Remote {
            cursor.stage = LookupStage::Done;
            if let Some(remote) = &self.remote {
                let missing = unresolved(keys, &kvs);
                let found = remote.batch_lookup(&missing).await;
                for kv in &found {
                    self.populate_local(&kv.key, &kv.value);
                }
                kvs.extend(found);
            }
        }

        let status = if unresolved(keys, &kvs).is_empty() {
            BatchStatus::Complete
        } else {
            BatchStatus::Partial
        };
        debug!(keys = keys.len(), hits = kvs.len(), ?status, "block cache batch lookup");
        Ok(BatchLookup { kvs, status })
    }
}
