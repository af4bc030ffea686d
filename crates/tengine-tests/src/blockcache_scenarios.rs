//! Block cache scenarios across both tiers

use std::sync::Arc;

use tengine_blockcache::{
    BlockCacheKey, BlockCacheValue, CacheLookup, HitStatus, LookupCursor, MemoryRemoteKv,
};

/// The key used throughout the scenarios: namespace 7, block 42.
pub fn scenario_key() -> BlockCacheKey {
    BlockCacheKey::new(7, 42)
}

pub fn scenario_value() -> BlockCacheValue {
    BlockCacheValue::new(vec![0x0a00_0001_1f90, 0x0a00_0002_1f90])
}

pub fn shared_remote() -> Arc<MemoryRemoteKv> {
    Arc::new(MemoryRemoteKv::new())
}
