//! A network path of a connection.

use std::net::SocketAddr;
use std::time::Instant;

use crate::cid::ClientId;

/// Role of a path within its connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PathTag {
    #[default]
    None,
    /// Path packets are sent on.
    Active,
    /// Last validated path, kept to fall back to.
    Backup,
    /// Newly observed path not yet migrated to.
    Probe,
}

/// Handle on a path slot.
///
/// Carries the path sequence number so a handle to a recycled slot
/// resolves to nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PathId {
    pub(crate) slot: usize,
    pub(crate) seqnum: u64,
}

impl PathId {
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn seqnum(&self) -> u64 {
        self.seqnum
    }
}

/// State of one path.
#[derive(Debug, Clone)]
pub struct QuicPath {
    pub(crate) seqnum: u64,
    pub(crate) remote: SocketAddr,
    pub(crate) addr_text: String,
    pub(crate) tag: PathTag,
    pub(crate) validated: bool,
    pub(crate) validating: bool,
    pub(crate) limited: bool,
    pub(crate) challenge1: [u8; 8],
    pub(crate) challenge2: [u8; 8],
    pub(crate) expires: Option<Instant>,
    pub(crate) tries: u32,
    pub(crate) cid: Option<ClientId>,
    pub(crate) received_bytes: u64,
    pub(crate) sent_bytes: u64,
}

impl QuicPath {
    /// A fresh, unvalidated and amplification-limited path.
    pub(crate) fn new(seqnum: u64, remote: SocketAddr, cid: Option<ClientId>) -> Self {
        Self {
            seqnum,
            remote,
            addr_text: remote.to_string(),
            tag: PathTag::None,
            validated: false,
            validating: false,
            limited: true,
            challenge1: [0; 8],
            challenge2: [0; 8],
            expires: None,
            tries: 0,
            cid,
            received_bytes: 0,
            sent_bytes: 0,
        }
    }

    pub fn seqnum(&self) -> u64 {
        self.seqnum
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    pub fn addr_text(&self) -> &str {
        &self.addr_text
    }

    pub fn tag(&self) -> PathTag {
        self.tag
    }

    pub fn is_validated(&self) -> bool {
        self.validated
    }

    pub fn is_validating(&self) -> bool {
        self.validating
    }

    /// Whether the anti-amplification limit applies.
    pub fn is_limited(&self) -> bool {
        self.limited
    }

    /// The two outstanding challenge payloads.
    pub fn challenges(&self) -> ([u8; 8], [u8; 8]) {
        (self.challenge1, self.challenge2)
    }

    pub(crate) fn matches_challenge(&self, data: &[u8; 8]) -> bool {
        self.challenge1 == *data || self.challenge2 == *data
    }

    /// Next validation timer deadline for this path.
    pub fn expires(&self) -> Option<Instant> {
        self.expires
    }

    /// Timer expirations left before validation fails.
    pub fn tries(&self) -> u32 {
        self.tries
    }

    pub fn cid(&self) -> Option<ClientId> {
        self.cid
    }

    pub fn received_bytes(&self) -> u64 {
        self.received_bytes
    }

    pub fn sent_bytes(&self) -> u64 {
        self.sent_bytes
    }

    /// Bytes that may still be sent, `None` when unlimited.
    pub fn send_allowance(&self, factor: u64) -> Option<u64> {
        if !self.limited {
            return None;
        }
        Some(
            self.received_bytes
                .saturating_mul(factor)
                .saturating_sub(self.sent_bytes),
        )
    }

    /// Compares peer addresses, optionally ignoring the port.
    pub fn same_peer(&self, addr: &SocketAddr, compare_port: bool) -> bool {
        self.remote.ip() == addr.ip() && (!compare_port || self.remote.port() == addr.port())
    }
}
