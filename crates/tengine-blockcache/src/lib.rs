#![warn(missing_docs)]

//! Two-tier TFS block location cache.
//!
//! The local tier is a bounded LRU over a named shared zone, indexed by
//! MurmurHash2 of the block key. The remote tier is an external key-value
//! cluster reached through [`remote::RemoteKv`]. [`dispatcher::BlockCache`]
//! walks the tiers local first and keeps per-key hit status so removals
//! only touch tiers a key was served from.

pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod key;
pub mod local;
pub mod murmur;
pub mod remote;
pub mod slab;
pub mod zone;

pub use config::BlockCacheConfig;
pub use dispatcher::{BatchLookup, BatchStatus, BlockCache, CacheLookup, LookupCursor, LookupStage};
pub use error::{CacheError, CacheResult};
pub use key::{BlockCacheKey, BlockCacheKv, BlockCacheValue, HitStatus};
pub use local::{CacheZoneRegistry, LocalBlockCache, LocalCacheStats};
pub use murmur::murmurhash2;
pub use remote::{MemoryRemoteKv, RemoteBlockCache, RemoteKv, RemoteStatus};
