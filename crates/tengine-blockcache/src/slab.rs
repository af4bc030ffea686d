//! Fixed-capacity slab pool with byte accounting.
//!
//! Stands in for the slab allocator that carves nodes out of a shared
//! zone: every allocation is charged a byte size against the zone capacity
//! and the caller must free explicitly. Slots are addressed by index so the
//! index and LRU links can refer to nodes without pointers.

/// A slab pool of `T` values with a byte budget.
#[derive(Debug)]
pub struct SlabPool<T> {
    slots: Vec<Option<Slot<T>>>,
    free: Vec<usize>,
    capacity_bytes: usize,
    used_bytes: usize,
    live: usize,
}

#[derive(Debug)]
struct Slot<T> {
    bytes: usize,
    value: T,
}

impl<T> SlabPool<T> {
    /// Creates an empty pool that may hand out at most `capacity_bytes`.
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            capacity_bytes,
            used_bytes: 0,
            live: 0,
        }
    }

    /// Stores `value`, charging `bytes` against the budget.
    ///
    /// Hands `value` back when the budget cannot cover it.
    pub fn alloc(&mut self, bytes: usize, value: T) -> Result<usize, T> {
        if bytes > self.available_bytes() {
            return Err(value);
        }
        self.used_bytes += bytes;
        self.live += 1;
        let slot = Some(Slot { bytes, value });
        match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = slot;
                Ok(idx)
            }
            None => {
                self.slots.push(slot);
                Ok(self.slots.len() - 1)
            }
        }
    }

    /// Releases slot `idx`, returning its value.
    pub fn free(&mut self, idx: usize) -> Option<T> {
        let slot = self.slots.get_mut(idx)?.take()?;
        self.used_bytes -= slot.bytes;
        self.live -= 1;
        self.free.push(idx);
        Some(slot.value)
    }

    /// Borrows the value in slot `idx`.
    pub fn get(&self, idx: usize) -> Option<&T> {
        self.slots.get(idx)?.as_ref().map(|s| &s.value)
    }

    /// Mutably borrows the value in slot `idx`.
    pub fn get_mut(&mut self, idx: usize) -> Option<&mut T> {
        self.slots.get_mut(idx)?.as_mut().map(|s| &mut s.value)
    }

    /// Total byte budget.
    pub fn capacity_bytes(&self) -> usize {
        self.capacity_bytes
    }

    /// Bytes currently charged.
    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    /// Bytes still available.
    pub fn available_bytes(&self) -> usize {
        self.capacity_bytes - self.used_bytes
    }

    /// Number of live allocations.
    pub fn len(&self) -> usize {
        self.live
    }

    /// Returns `true` when nothing is allocated.
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}
