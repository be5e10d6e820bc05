// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Per-key record locks.
//!
//! Mutating operations serialize on the logical key they touch; reads rely
//! on snapshot isolation instead and never take these locks. Multi-key
//! acquisition sorts keys by byte value first, which removes the deadlock
//! case without any detection machinery.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};

const NUM_SHARDS: usize = 256;

type Shard = Mutex<HashMap<Vec<u8>, Arc<Mutex<()>>>>;
type KeyGuard = ArcMutexGuard<RawMutex, ()>;

/// Sharded lock manager mapping logical keys to mutexes on demand.
///
/// Entries are created on first acquisition and removed when the last
/// holder releases, so the map stays proportional to the number of keys
/// currently under mutation.
pub struct LockManager {
    shards: [Shard; NUM_SHARDS],
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            shards: std::array::from_fn(|_| Mutex::new(HashMap::new())),
        }
    }

    #[inline]
    fn shard(&self, key: &[u8]) -> &Shard {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[hasher.finish() as usize % NUM_SHARDS]
    }

    fn acquire(&self, key: &[u8]) -> KeyGuard {
        let entry = {
            let mut map = self.shard(key).lock();
            Arc::clone(
                map.entry(key.to_vec())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };
        entry.lock_arc()
    }

    fn release(&self, key: &[u8]) {
        let mut map = self.shard(key).lock();
        if let Some(entry) = map.get(key) {
            // Only the map itself still references the mutex: no holder, no
            // waiter mid-acquisition.
            if Arc::strong_count(entry) == 1 {
                map.remove(key);
            }
        }
    }

    /// Locks a single logical key for the guard's lifetime.
    pub fn lock(&self, key: &[u8]) -> RecordLock<'_> {
        let guard = self.acquire(key);
        RecordLock {
            mgr: self,
            key: key.to_vec(),
            guard: Some(guard),
        }
    }

    /// Locks several logical keys, sorted and deduplicated by byte value
    /// before acquisition.
    pub fn lock_many(&self, keys: &[&[u8]]) -> MultiRecordLock<'_> {
        let mut sorted: Vec<Vec<u8>> = keys.iter().map(|k| k.to_vec()).collect();
        sorted.sort();
        sorted.dedup();

        let guards = sorted.iter().map(|k| self.acquire(k)).collect();
        MultiRecordLock {
            mgr: self,
            keys: sorted,
            guards,
        }
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard over one record lock.
pub struct RecordLock<'a> {
    mgr: &'a LockManager,
    key: Vec<u8>,
    guard: Option<KeyGuard>,
}

impl Drop for RecordLock<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.mgr.release(&self.key);
    }
}

/// RAII guard over a set of record locks acquired in canonical order.
pub struct MultiRecordLock<'a> {
    mgr: &'a LockManager,
    keys: Vec<Vec<u8>>,
    guards: Vec<KeyGuard>,
}

impl Drop for MultiRecordLock<'_> {
    fn drop(&mut self) {
        while self.guards.pop().is_some() {}
        for key in &self.keys {
            self.mgr.release(key);
        }
    }
}
