//! Peer-issued connection ids used to address new paths.
//!
//! Each path needs its own connection id so that its packets cannot be
//! linked to another path. Freeing a path retires its id for good.

use tracing::debug;

use crate::error::{QuicError, QuicResult};

/// A connection id issued by the peer, identified by its sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId {
    pub seqnum: u64,
}

/// Supplier of unused client connection ids.
pub trait ClientIdSource {
    /// Hands out an unused id and marks it used.
    fn next_client_id(&mut self) -> Option<ClientId>;

    /// Retires `cid`, asking the peer for a replacement.
    fn free_client_id(&mut self, cid: ClientId) -> QuicResult<()>;
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    seqnum: u64,
    used: bool,
}

/// In-memory [`ClientIdSource`].
#[derive(Debug, Default)]
pub struct ClientIdPool {
    entries: Vec<Entry>,
    retire_requests: Vec<u64>,
}

impl ClientIdPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// A pool holding ids `0..count`.
    pub fn with_ids(count: u64) -> Self {
        let mut pool = Self::new();
        for seqnum in 0..count {
            pool.add(seqnum);
        }
        pool
    }

    /// Registers an id announced by the peer. Duplicates are ignored.
    pub fn add(&mut self, seqnum: u64) {
        if self.entries.iter().any(|e| e.seqnum == seqnum) {
            return;
        }
        self.entries.push(Entry {
            seqnum,
            used: false,
        });
    }

    /// Ids not yet handed out.
    pub fn available(&self) -> usize {
        self.entries.iter().filter(|e| !e.used).count()
    }

    pub fn is_used(&self, cid: ClientId) -> bool {
        self.entries
            .iter()
            .any(|e| e.seqnum == cid.seqnum && e.used)
    }

    /// Sequence numbers retired so far, oldest first.
    pub fn retire_requests(&self) -> &[u64] {
        &self.retire_requests
    }

    /// Drains pending retire requests.
    pub fn take_retire_requests(&mut self) -> Vec<u64> {
        std::mem::take(&mut self.retire_requests)
    }
}

impl ClientIdSource for ClientIdPool {
    fn next_client_id(&mut self) -> Option<ClientId> {
        let entry = self.entries.iter_mut().find(|e| !e.used)?;
        entry.used = true;
        Some(ClientId {
            seqnum: entry.seqnum,
        })
    }

    fn free_client_id(&mut self, cid: ClientId) -> QuicResult<()> {
        let pos = self
            .entries
            .iter()
            .position(|e| e.seqnum == cid.seqnum)
            .ok_or(QuicError::UnknownClientId { seqnum: cid.seqnum })?;
        self.entries.remove(pos);
        self.retire_requests.push(cid.seqnum);
        debug!(seqnum = cid.seqnum, "client id retired");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hands_out_each_id_once() {
        let mut pool = ClientIdPool::with_ids(2);
        let a = pool.next_client_id().unwrap();
        let b = pool.next_client_id().unwrap();
        assert_ne!(a, b);
        assert!(pool.is_used(a));
        assert!(pool.next_client_id().is_none());
    }

    #[test]
    fn test_free_retires() {
        let mut pool = ClientIdPool::with_ids(1);
        let a = pool.next_client_id().unwrap();
        pool.free_client_id(a).unwrap();
        assert_eq!(pool.retire_requests(), &[0]);
        assert!(pool.next_client_id().is_none());
        assert_eq!(
            pool.free_client_id(a),
            Err(QuicError::UnknownClientId { seqnum: 0 })
        );
    }

    #[test]
    fn test_add_replenishes() {
        let mut pool = ClientIdPool::with_ids(1);
        pool.next_client_id();
        pool.add(5);
        pool.add(5);
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.next_client_id(), Some(ClientId { seqnum: 5 }));
        assert_eq!(pool.take_retire_requests(), Vec::<u64>::new());
    }
}
