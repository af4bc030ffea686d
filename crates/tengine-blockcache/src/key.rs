//! Block cache key and value types.

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, CacheResult};
use crate::murmur::murmurhash2;

/// Size of an encoded key in bytes.
pub const KEY_SIZE: usize = 12;

/// Identifies one TFS block inside one namespace.
///
/// Ordering is lexicographic on `(ns_addr, block_id)`; the index uses it to
/// break ties between keys that share a hash.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct BlockCacheKey {
    /// Namespace (name server) address.
    pub ns_addr: u64,
    /// Block identifier within the namespace.
    pub block_id: u32,
}

impl BlockCacheKey {
    /// Creates a key.
    pub fn new(ns_addr: u64, block_id: u32) -> Self {
        Self { ns_addr, block_id }
    }

    /// Encodes the key as little-endian `ns_addr` followed by `block_id`.
    pub fn to_bytes(&self) -> [u8; KEY_SIZE] {
        let mut out = [0u8; KEY_SIZE];
        out[..8].copy_from_slice(&self.ns_addr.to_le_bytes());
        out[8..].copy_from_slice(&self.block_id.to_le_bytes());
        out
    }

    /// Decodes a key produced by [`BlockCacheKey::to_bytes`].
    pub fn from_bytes(data: &[u8]) -> CacheResult<Self> {
        if data.len() != KEY_SIZE {
            return Err(CacheError::Decode {
                reason: format!("key length {} != {}", data.len(), KEY_SIZE),
            });
        }
        let mut ns = [0u8; 8];
        ns.copy_from_slice(&data[..8]);
        let mut block = [0u8; 4];
        block.copy_from_slice(&data[8..]);
        Ok(Self {
            ns_addr: u64::from_le_bytes(ns),
            block_id: u32::from_le_bytes(block),
        })
    }

    /// MurmurHash2 of the encoded key.
    pub fn cache_hash(&self) -> u32 {
        murmurhash2(&self.to_bytes())
    }
}

impl std::fmt::Display for BlockCacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.ns_addr, self.block_id)
    }
}

/// Data server addresses that hold a block.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockCacheValue {
    /// Packed data server addresses.
    pub server_addrs: Vec<u64>,
}

impl BlockCacheValue {
    /// Creates a value from a list of server addresses.
    pub fn new(server_addrs: Vec<u64>) -> Self {
        Self { server_addrs }
    }

    /// Number of servers in the value.
    pub fn server_count(&self) -> usize {
        self.server_addrs.len()
    }

    /// Returns `true` when no server is listed.
    pub fn is_empty(&self) -> bool {
        self.server_addrs.is_empty()
    }
}

/// Which tier answered a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HitStatus {
    /// Not found in any tier.
    #[default]
    NoHit,
    /// Found in the shared-memory tier.
    Local,
    /// Found in the remote tier.
    Remote,
}

/// A key, its value and the tier it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockCacheKv {
    /// The looked-up key.
    pub key: BlockCacheKey,
    /// The resolved value.
    pub value: BlockCacheValue,
    /// Tier that produced the value.
    pub hit: HitStatus,
}
