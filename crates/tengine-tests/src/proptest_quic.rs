//! Property-Based Tests for path validation and migration

use proptest::prelude::*;
use std::net::SocketAddr;

use tengine_quic::{PathManager, PathTag};

/// Peer addresses the generated traffic comes from. The first two share an
/// IP so port-only rebinding is exercised too.
pub const PEERS: [&str; 4] = [
    "198.51.100.1:4433",
    "198.51.100.1:5000",
    "203.0.113.7:4433",
    "[2001:db8::9]:443",
];

pub fn peer(idx: usize) -> SocketAddr {
    PEERS[idx % PEERS.len()]
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 4433)))
}

/// One step of peer or timer activity.
#[derive(Debug, Clone, Copy)]
pub enum PathOp {
    /// A packet in sequence.
    Recv { peer: usize, dcid: u64, probing: bool },
    /// A packet numbered `lag` below the largest seen.
    Stale { peer: usize, dcid: u64, lag: u64 },
    /// The peer answers the challenge of the `n`-th live path.
    Respond { n: usize },
    /// The validation timer fires.
    Timer,
}

pub fn arb_path_op() -> impl Strategy<Value = PathOp> {
    prop_oneof![
        4 => (0usize..4, 0u64..6, any::<bool>())
            .prop_map(|(peer, dcid, probing)| PathOp::Recv { peer, dcid, probing }),
        1 => (0usize..4, 0u64..6, 1u64..4)
            .prop_map(|(peer, dcid, lag)| PathOp::Stale { peer, dcid, lag }),
        2 => (0usize..4).prop_map(|n| PathOp::Respond { n }),
        2 => Just(PathOp::Timer),
    ]
}

/// Checks the structural invariants of a manager's paths.
pub fn check_path_invariants<C, R>(m: &PathManager<C, R>, factor: u64) -> Result<(), String>
where
    C: tengine_quic::ClientIdSource,
    R: rand::RngCore,
{
    let paths = m.paths();
    for tag in [PathTag::Active, PathTag::Backup, PathTag::Probe] {
        let n = paths.count_tag(tag);
        if n > 1 {
            return Err(format!("{} paths tagged {:?}", n, tag));
        }
    }
    if let Some(active) = m.active_id() {
        match m.path(active) {
            Some(p) if p.tag() == PathTag::Active => {}
            other => return Err(format!("active handle resolves to {:?}", other.map(|p| p.tag()))),
        }
    } else if paths.count_tag(PathTag::Active) != 0 {
        return Err("active path tagged but not referenced".to_string());
    }
    for (_, p) in paths.iter() {
        if p.is_limited() && p.sent_bytes() > p.received_bytes() * factor {
            return Err(format!(
                "path {} sent {} of {} received",
                p.seqnum(),
                p.sent_bytes(),
                p.received_bytes()
            ));
        }
    }
    Ok(())
}
