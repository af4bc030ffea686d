//! Property-Based Tests for the local block cache tier

use proptest::prelude::*;
use std::collections::VecDeque;

use tengine_blockcache::local::MAX_SERVERS_PER_NODE;
use tengine_blockcache::{BlockCacheKey, BlockCacheValue, CacheError, LocalBlockCache};

use crate::harness::test_cache_config;

/// Operation applied to the cache and to the reference model.
#[derive(Debug, Clone, Copy)]
pub enum CacheOp {
    Insert(u32),
    Lookup(u32),
    Remove(u32),
}

pub fn arb_cache_op(keys: u32) -> impl Strategy<Value = CacheOp> {
    prop_oneof![
        (0..keys).prop_map(CacheOp::Insert),
        (0..keys).prop_map(CacheOp::Lookup),
        (0..keys).prop_map(CacheOp::Remove),
    ]
}

pub fn block_key(block: u32) -> BlockCacheKey {
    BlockCacheKey::new(0x5eed, block)
}

/// Recency list, most recent first, holding at most `capacity` keys.
#[derive(Debug, Default)]
pub struct LruModel {
    capacity: usize,
    keys: VecDeque<u32>,
}

impl LruModel {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            keys: VecDeque::new(),
        }
    }

    fn take(&mut self, block: u32) -> bool {
        match self.keys.iter().position(|k| *k == block) {
            Some(pos) => {
                self.keys.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Returns the evicted key, if any.
    pub fn insert(&mut self, block: u32) -> Option<u32> {
        let evicted = if !self.take(block) && self.keys.len() == self.capacity {
            self.keys.pop_back()
        } else {
            None
        };
        self.keys.push_front(block);
        evicted
    }

    pub fn lookup(&mut self, block: u32) -> bool {
        let hit = self.take(block);
        if hit {
            self.keys.push_front(block);
        }
        hit
    }

    pub fn remove(&mut self, block: u32) -> bool {
        self.take(block)
    }

    pub fn order(&self) -> Vec<BlockCacheKey> {
        self.keys.iter().map(|b| block_key(*b)).collect()
    }
}
