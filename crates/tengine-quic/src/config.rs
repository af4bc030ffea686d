//! Path validation configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables of the path validation and migration state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    /// Timer expirations before a validating path is declared failed.
    pub path_retries: u32,
    /// Minimum datagram size carrying PATH_CHALLENGE or PATH_RESPONSE.
    pub min_probe_datagram: usize,
    /// Maximum UDP payload the peer accepts, the congestion MSS.
    pub max_udp_payload_size: usize,
    /// RTT assumed before any sample, in milliseconds.
    pub initial_rtt_ms: u64,
    /// Peer's maximum ACK delay, in milliseconds.
    pub max_ack_delay_ms: u64,
    /// Send budget multiple of received bytes on an unvalidated path.
    pub amplification_factor: u64,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            path_retries: 10,
            min_probe_datagram: 1200,
            max_udp_payload_size: 1200,
            initial_rtt_ms: 333,
            max_ack_delay_ms: 25,
            amplification_factor: 3,
        }
    }
}

impl PathConfig {
    /// Loads a configuration from a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: PathConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects zero-sized knobs.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.path_retries == 0 {
            anyhow::bail!("path_retries must be non-zero");
        }
        if self.max_udp_payload_size == 0 {
            anyhow::bail!("max_udp_payload_size must be non-zero");
        }
        if self.initial_rtt_ms == 0 {
            anyhow::bail!("initial_rtt_ms must be non-zero");
        }
        if self.amplification_factor == 0 {
            anyhow::bail!("amplification_factor must be non-zero");
        }
        Ok(())
    }

    pub fn initial_rtt(&self) -> Duration {
        Duration::from_millis(self.initial_rtt_ms)
    }

    pub fn max_ack_delay(&self) -> Duration {
        Duration::from_millis(self.max_ack_delay_ms)
    }
}
