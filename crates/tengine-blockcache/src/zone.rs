//! Named shared zones.
//!
//! A zone is a fixed-size region shared by every worker that attaches to it
//! by name. All access to its contents goes through one lock. A process-wide
//! [`ZoneRegistry`] hands out the same zone to every attachment, and tells
//! the caller whether it created the zone or reused an existing one.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use tracing::debug;

use crate::error::{CacheError, CacheResult};

/// A named zone guarding a `T` with a mutex.
#[derive(Debug)]
pub struct ShmZone<T> {
    name: String,
    size: usize,
    state: Mutex<T>,
}

impl<T> ShmZone<T> {
    /// Creates a standalone zone.
    pub fn new(name: impl Into<String>, size: usize, state: T) -> Self {
        Self {
            name: name.into(),
            size,
            state: Mutex::new(state),
        }
    }

    /// Zone name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Zone size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Locks the zone contents.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.state.lock()
    }
}

/// Registry of named zones.
#[derive(Debug)]
pub struct ZoneRegistry<T> {
    zones: DashMap<String, Arc<ShmZone<T>>>,
}

impl<T> Default for ZoneRegistry<T> {
    fn default() -> Self {
        Self {
            zones: DashMap::new(),
        }
    }
}

impl<T> ZoneRegistry<T> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches to zone `name`, creating it with `init(size)` if absent.
    ///
    /// Returns the zone and `true` when it already existed. Attaching with a
    /// different size than the existing zone is an error.
    pub fn attach<F>(&self, name: &str, size: usize, init: F) -> CacheResult<(Arc<ShmZone<T>>, bool)>
    where
        F: FnOnce(usize) -> CacheResult<T>,
    {
        match self.zones.entry(name.to_string()) {
            Entry::Occupied(entry) => {
                let zone = entry.get().clone();
                if zone.size() != size {
                    return Err(CacheError::ZoneConflict {
                        zone: name.to_string(),
                        existing: zone.size(),
                        requested: size,
                    });
                }
                debug!(zone = name, "reusing existing zone");
                Ok((zone, true))
            }
            Entry::Vacant(entry) => {
                let state = init(size)?;
                let zone = Arc::new(ShmZone::new(name, size, state));
                entry.insert(zone.clone());
                debug!(zone = name, size, "created zone");
                Ok((zone, false))
            }
        }
    }

    /// Looks up an attached zone.
    pub fn get(&self, name: &str) -> Option<Arc<ShmZone<T>>> {
        self.zones.get(name).map(|z| z.value().clone())
    }

    /// Drops the registry's handle on zone `name`.
    pub fn detach(&self, name: &str) -> bool {
        self.zones.remove(name).is_some()
    }

    /// Number of registered zones.
    pub fn len(&self) -> usize {
        self.zones.len()
    }

    /// Returns `true` when no zone is registered.
    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}
