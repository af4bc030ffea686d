//! Block cache configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Configuration for the two-tier block cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockCacheConfig {
    /// Name of the shared zone holding the local tier.
    pub zone_name: String,
    /// Size of the shared zone in bytes (default 32MB).
    pub zone_size: usize,
    /// Nodes dropped from the LRU tail per discard pass (default 10000).
    pub discard_batch_size: usize,
    /// Hits between two hit ratio reports (default 10800000).
    pub stat_window: u64,
    /// Whether the shared-memory tier is consulted.
    pub use_local: bool,
    /// Whether the remote KV tier is consulted.
    pub use_remote: bool,
    /// Expiry for remote entries in seconds, 0 means never.
    pub remote_ttl_secs: u32,
    /// Largest batch accepted by `batch_lookup` (default 8).
    pub max_batch_keys: usize,
}

impl Default for BlockCacheConfig {
    fn default() -> Self {
        Self {
            zone_name: "tfs_block_cache".to_string(),
            zone_size: 32 * 1024 * 1024,
            discard_batch_size: 10_000,
            stat_window: 3000 * 60 * 60,
            use_local: true,
            use_remote: false,
            remote_ttl_secs: 0,
            max_batch_keys: 8,
        }
    }
}

impl BlockCacheConfig {
    /// Loads a configuration from a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: BlockCacheConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects zero-sized knobs and an empty zone name.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.use_local && self.zone_name.is_empty() {
            anyhow::bail!("zone_name must not be empty");
        }
        if self.use_local && self.zone_size == 0 {
            anyhow::bail!("zone_size must be non-zero");
        }
        if self.discard_batch_size == 0 {
            anyhow::bail!("discard_batch_size must be non-zero");
        }
        if self.stat_window == 0 {
            anyhow::bail!("stat_window must be non-zero");
        }
        if self.max_batch_keys == 0 {
            anyhow::bail!("max_batch_keys must be non-zero");
        }
        Ok(())
    }
}
