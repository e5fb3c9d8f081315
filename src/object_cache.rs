//! Byte-bounded CLOCK cache for decoded objects.
//!
//! Entries live in a ring. A hit sets the entry's reference bit; eviction
//! sweeps the hand forward, clearing set bits and evicting the first entry
//! whose bit is already clear (second chance). Entries larger than a
//! quarter of the budget are never cached so one large blob cannot flush
//! the working set.
//!
//! The cache is shared across providers and threads behind a `Mutex`;
//! cached bytes are `Arc<[u8]>` so hits copy out without holding the lock.

use std::sync::{Arc, Mutex, MutexGuard};

use ahash::AHashMap;

use super::object::ObjectKind;
use super::object_id::ObjectId;

#[derive(Debug)]
struct Entry {
    oid: ObjectId,
    kind: ObjectKind,
    data: Arc<[u8]>,
    referenced: bool,
}

#[derive(Debug, Default)]
struct ClockRing {
    entries: Vec<Entry>,
    index: AHashMap<ObjectId, usize>,
    hand: usize,
    used_bytes: usize,
    evictions: u64,
}

impl ClockRing {
    fn get(&mut self, oid: &ObjectId) -> Option<(ObjectKind, Arc<[u8]>)> {
        let &slot = self.index.get(oid)?;
        let entry = &mut self.entries[slot];
        entry.referenced = true;
        Some((entry.kind, Arc::clone(&entry.data)))
    }

    fn insert(&mut self, capacity: usize, oid: ObjectId, kind: ObjectKind, data: Arc<[u8]>) {
        if let Some(&slot) = self.index.get(&oid) {
            self.entries[slot].referenced = true;
            return;
        }
        while self.used_bytes + data.len() > capacity && !self.entries.is_empty() {
            self.evict_one();
        }
        self.used_bytes += data.len();
        self.index.insert(oid, self.entries.len());
        self.entries.push(Entry {
            oid,
            kind,
            data,
            referenced: false,
        });
    }

    fn evict_one(&mut self) {
        loop {
            if self.hand >= self.entries.len() {
                self.hand = 0;
            }
            let entry = &mut self.entries[self.hand];
            if entry.referenced {
                entry.referenced = false;
                self.hand += 1;
                continue;
            }
            let victim = self.entries.swap_remove(self.hand);
            self.index.remove(&victim.oid);
            if let Some(moved) = self.entries.get(self.hand) {
                self.index.insert(moved.oid, self.hand);
            }
            self.used_bytes -= victim.data.len();
            self.evictions += 1;
            return;
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
        self.hand = 0;
        self.used_bytes = 0;
    }
}

/// Snapshot of cache counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub used_bytes: usize,
    pub capacity_bytes: usize,
    pub evictions: u64,
}

/// Shared decoded-object cache.
#[derive(Debug)]
pub struct ObjectCache {
    capacity: usize,
    ring: Mutex<ClockRing>,
}

impl ObjectCache {
    /// Creates a cache holding at most `capacity_bytes` of object data.
    ///
    /// A capacity of zero yields a cache that always misses.
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            capacity: capacity_bytes,
            ring: Mutex::new(ClockRing::default()),
        }
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.capacity != 0
    }

    fn lock(&self) -> MutexGuard<'_, ClockRing> {
        // The ring holds no invariants a panicking reader could break midway.
        self.ring.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, oid: &ObjectId) -> Option<(ObjectKind, Arc<[u8]>)> {
        if !self.is_enabled() {
            return None;
        }
        self.lock().get(oid)
    }

    /// Caches `data` unless it exceeds a quarter of the budget.
    pub fn insert(&self, oid: ObjectId, kind: ObjectKind, data: Arc<[u8]>) {
        if !self.is_enabled() || data.len() > self.capacity / 4 {
            return;
        }
        self.lock().insert(self.capacity, oid, kind, data);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        let ring = self.lock();
        CacheStats {
            entries: ring.entries.len(),
            used_bytes: ring.used_bytes,
            capacity_bytes: self.capacity,
            evictions: ring.evictions,
        }
    }
}
