//! Test Harness - shared setup for block cache and path migration suites

use std::net::SocketAddr;
use std::sync::{Arc, Once};
use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tengine_blockcache::local::{node_bytes, CONTEXT_BYTES};
use tengine_blockcache::{BlockCache, BlockCacheConfig, CacheResult, CacheZoneRegistry, MemoryRemoteKv};
use tengine_quic::{
    ClientIdPool, EncryptionLevel, IncomingPacket, PacketDisposition, PathConfig, PathEvent, PathId,
    PathManager, QuicResult, Transmit,
};

static TRACING: Once = Once::new();

/// Installs a test-writer subscriber once per process. `RUST_LOG` filters.
pub fn init_test_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::registry()
            .with(fmt::layer().with_test_writer())
            .with(EnvFilter::from_default_env())
            .try_init();
    });
}

/// Config for a zone that fits exactly `nodes` single-server nodes and
/// discards one node per pass.
pub fn test_cache_config(zone_name: &str, nodes: usize) -> BlockCacheConfig {
    BlockCacheConfig {
        zone_name: zone_name.to_string(),
        zone_size: CONTEXT_BYTES + nodes * node_bytes(1),
        discard_batch_size: 1,
        use_local: true,
        use_remote: true,
        ..Default::default()
    }
}

/// Both tiers over a fresh registry and the given remote store.
pub fn create_block_cache(
    config: &BlockCacheConfig,
    kv: Arc<MemoryRemoteKv>,
) -> CacheResult<BlockCache<MemoryRemoteKv>> {
    let registry = CacheZoneRegistry::new();
    BlockCache::from_config(config, &registry, Some(kv))
}

/// Drives a [`PathManager`] the way a connection event loop would, with a
/// manual clock and increasing packet numbers.
#[derive(Debug)]
pub struct MigrationHarness {
    pub manager: PathManager<ClientIdPool, StdRng>,
    pub now: Instant,
    next_pn: u64,
}

impl MigrationHarness {
    /// Connection whose handshake with `peer` completed on DCID 0.
    pub fn new(seed: u64, peer: SocketAddr, client_ids: u64) -> Self {
        Self::with_config(PathConfig::default(), seed, peer, client_ids)
    }

    pub fn with_config(config: PathConfig, seed: u64, peer: SocketAddr, client_ids: u64) -> Self {
        let now = Instant::now();
        let manager = PathManager::new(
            config,
            peer,
            ClientIdPool::with_ids(client_ids),
            StdRng::seed_from_u64(seed),
            now,
        )
        .expect("initial path");
        let mut harness = Self {
            manager,
            now,
            next_pn: 0,
        };
        harness
            .recv(peer, 0, false)
            .expect("handshake packet accepted");
        harness.manager.validate_active_address();
        harness.drain_events();
        harness
    }

    pub fn packet(&self, remote: SocketAddr, pn: u64, dcid_seq: u64, probing: bool) -> IncomingPacket {
        IncomingPacket {
            level: EncryptionLevel::Application,
            pn,
            len: 1200,
            remote,
            dcid_seq,
            probing,
        }
    }

    /// Receives the next packet in sequence.
    pub fn recv(&mut self, remote: SocketAddr, dcid_seq: u64, probing: bool) -> QuicResult<PacketDisposition> {
        let pn = self.next_pn;
        self.next_pn += 1;
        self.recv_pn(remote, pn, dcid_seq, probing)
    }

    /// Receives a packet with an explicit number, e.g. a reordered one.
    pub fn recv_pn(
        &mut self,
        remote: SocketAddr,
        pn: u64,
        dcid_seq: u64,
        probing: bool,
    ) -> QuicResult<PacketDisposition> {
        self.next_pn = self.next_pn.max(pn + 1);
        let pkt = self.packet(remote, pn, dcid_seq, probing);
        self.manager.on_packet(&pkt, self.now)
    }

    /// Echoes the first outstanding challenge of `path` as the peer would.
    pub fn answer_challenge(&mut self, path: PathId) -> QuicResult<bool> {
        let Some(p) = self.manager.path(path) else {
            return Ok(false);
        };
        let (c1, _) = p.challenges();
        self.manager.handle_path_response(&c1, self.now)?;
        Ok(self.manager.path(path).is_some_and(|p| p.is_validated()))
    }

    /// Advances the clock to the validation deadline and fires the timer.
    pub fn fire_timer(&mut self) -> Option<QuicResult<()>> {
        let deadline = self.manager.validation_deadline()?;
        self.now = self.now.max(deadline);
        Some(self.manager.on_validation_timer(self.now))
    }

    pub fn drain_transmits(&mut self) -> Vec<Transmit> {
        std::iter::from_fn(|| self.manager.poll_transmit()).collect()
    }

    pub fn drain_events(&mut self) -> Vec<PathEvent> {
        std::iter::from_fn(|| self.manager.poll_event()).collect()
    }
}
