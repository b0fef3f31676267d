//! Snapshot cache with explicit invalidation.
//!
//! Readers get an `Arc` to an immutable snapshot and keep it for as long as
//! they iterate; a rebuild publishes a new `Arc` in one swap. `invalidate()`
//! bumps the generation: snapshots built for an older generation stay
//! readable through [`SnapshotCache::latest`] (last known good) but are no
//! longer returned by [`SnapshotCache::fresh`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::Result;

#[derive(Debug)]
pub struct Snapshot<T> {
    pub value: Arc<T>,
    /// Cache generation the snapshot was built for.
    pub generation: u64,
}

impl<T> Clone for Snapshot<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            generation: self.generation,
        }
    }
}

#[derive(Debug)]
pub struct SnapshotCache<T> {
    name: &'static str,
    generation: AtomicU64,
    slot: RwLock<Option<Snapshot<T>>>,
}

impl<T> SnapshotCache<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            generation: AtomicU64::new(0),
            slot: RwLock::new(None),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Mark the current snapshot stale. Returns the new generation.
    pub fn invalidate(&self) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        log::debug!("{} cache invalidated (generation {generation})", self.name);
        generation
    }

    /// Snapshot built for the current generation, if any.
    pub fn fresh(&self) -> Option<Arc<T>> {
        let generation = self.generation();
        self.slot
            .read()
            .as_ref()
            .filter(|s| s.generation == generation)
            .map(|s| Arc::clone(&s.value))
    }

    /// Last published snapshot, stale or not.
    pub fn latest(&self) -> Option<Snapshot<T>> {
        self.slot.read().clone()
    }

    /// Publish a value built for `generation`. A snapshot built for a newer
    /// generation is never replaced by an older one.
    pub fn publish(&self, generation: u64, value: T) -> Arc<T> {
        let value = Arc::new(value);
        let mut slot = self.slot.write();
        let newer_exists = slot.as_ref().is_some_and(|s| s.generation > generation);
        if !newer_exists {
            *slot = Some(Snapshot {
                value: Arc::clone(&value),
                generation,
            });
        }
        value
    }

    /// Build and publish. On error the previous snapshot is left untouched.
    pub fn rebuild(&self, build: impl FnOnce() -> Result<T>) -> Result<Arc<T>> {
        let generation = self.generation();
        match build() {
            Ok(value) => {
                log::debug!("{} cache rebuilt (generation {generation})", self.name);
                Ok(self.publish(generation, value))
            }
            Err(e) => {
                log::warn!("{} rebuild abandoned, keeping last snapshot: {e}", self.name);
                Err(e)
            }
        }
    }

    pub fn get_or_rebuild(&self, build: impl FnOnce() -> Result<T>) -> Result<Arc<T>> {
        match self.fresh() {
            Some(value) => Ok(value),
            None => self.rebuild(build),
        }
    }
}
