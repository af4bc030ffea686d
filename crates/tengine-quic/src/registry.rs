//! Per-connection arena of paths.
//!
//! Slots of freed paths go on a free list and are reused before the arena
//! grows. Live paths keep their creation order, which is the order every
//! scan walks.

use std::net::SocketAddr;

use tracing::debug;

use crate::cid::ClientId;
use crate::path::{PathId, PathTag, QuicPath};

#[derive(Debug, Default)]
pub struct PathRegistry {
    slots: Vec<Option<QuicPath>>,
    free: Vec<usize>,
    order: Vec<usize>,
    next_seqnum: u64,
}

impl PathRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a path for `remote`, reusing a free slot when one exists.
    pub fn insert(&mut self, remote: SocketAddr, cid: Option<ClientId>) -> PathId {
        let seqnum = self.next_seqnum;
        self.next_seqnum += 1;
        let path = QuicPath::new(seqnum, remote, cid);
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(path);
                slot
            }
            None => {
                self.slots.push(Some(path));
                self.slots.len() - 1
            }
        };
        self.order.push(slot);
        debug!(seqnum, addr = %remote, "path created");
        PathId { slot, seqnum }
    }

    /// Takes the path out of the registry and recycles its slot.
    pub fn remove(&mut self, id: PathId) -> Option<QuicPath> {
        self.get(id)?;
        let path = self.slots[id.slot].take()?;
        self.order.retain(|slot| *slot != id.slot);
        self.free.push(id.slot);
        Some(path)
    }

    pub fn get(&self, id: PathId) -> Option<&QuicPath> {
        self.slots
            .get(id.slot)?
            .as_ref()
            .filter(|p| p.seqnum == id.seqnum)
    }

    pub fn get_mut(&mut self, id: PathId) -> Option<&mut QuicPath> {
        self.slots
            .get_mut(id.slot)?
            .as_mut()
            .filter(|p| p.seqnum == id.seqnum)
    }

    fn id_of(&self, slot: usize) -> Option<PathId> {
        self.slots[slot].as_ref().map(|p| PathId {
            slot,
            seqnum: p.seqnum,
        })
    }

    /// Live path ids in creation order.
    pub fn ids(&self) -> Vec<PathId> {
        self.order.iter().filter_map(|s| self.id_of(*s)).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PathId, &QuicPath)> + '_ {
        self.order.iter().filter_map(move |slot| {
            self.slots[*slot].as_ref().map(|p| {
                (
                    PathId {
                        slot: *slot,
                        seqnum: p.seqnum,
                    },
                    p,
                )
            })
        })
    }

    /// First path whose peer address, port included, is `remote`.
    pub fn find_by_addr(&self, remote: &SocketAddr) -> Option<PathId> {
        self.iter()
            .find(|(_, p)| p.same_peer(remote, true))
            .map(|(id, _)| id)
    }

    /// First path carrying `tag`.
    pub fn find_by_tag(&self, tag: PathTag) -> Option<PathId> {
        self.iter().find(|(_, p)| p.tag == tag).map(|(id, _)| id)
    }

    pub fn count_tag(&self, tag: PathTag) -> usize {
        self.iter().filter(|(_, p)| p.tag == tag).count()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Recycled slots waiting for reuse.
    pub fn free_slots(&self) -> usize {
        self.free.len()
    }
}
