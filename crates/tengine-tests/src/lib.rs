//! Tengine Test & Validation Infrastructure
//!
//! Cross-crate suites for the block cache and the QUIC path manager:
//! property-based checks of cache recency and path invariants, plus
//! scenario tests that drive both subsystems the way a worker would.

pub mod blockcache_scenarios;
pub mod harness;
pub mod migration_scenarios;
pub mod proptest_blockcache;
pub mod proptest_quic;

pub use harness::{create_block_cache, init_test_tracing, test_cache_config, MigrationHarness};
pub use proptest_blockcache::{arb_cache_op, CacheOp, LruModel};
pub use proptest_quic::{arb_path_op, check_path_invariants, PathOp};
