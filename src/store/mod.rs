// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! The multi-model store: five type engines under one roof.
//!
//! [`Cinnabar`] opens one database per data type beneath the configured
//! path and routes cross-type operations across them in a fixed order,
//! folding `NotFound` into the aggregate and collecting real errors in a
//! per-type map. A logical key can exist independently in several engines;
//! that is not an error, and `data_type` simply reports the first live
//! match.
//!
//! Type-specific commands are reached through the engine accessors
//! (`store.sets().sadd(...)`); only operations that need cross-engine
//! routing or background-task mediation live here.

pub(crate) mod bgtask;

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::cache::LruCache;
use crate::codec::{data_compact_bounds, meta_compact_bounds};
use crate::engine::{
    HashesEngine, ListsEngine, SetsEngine, StringsEngine, TypeEngine, ZsetsEngine,
};
use crate::error::{Error, Result};
use crate::hyperloglog::{HyperLogLog, MAX_KEYS};
use crate::options::Options;
use crate::types::{ColumnFamilyKind, DataType, KeyInfo};
use crate::util::is_tail_wildcard;
use bgtask::{BgOp, BgTask, TaskQueue};

/// Capacity of the cross-type scan-cursor cache.
const CURSOR_CAPACITY: usize = 5_000;

/// Engine order for cross-type mutation aggregates.
const AGGREGATE_ORDER: [DataType; 5] = [
    DataType::Strings,
    DataType::Hashes,
    DataType::Sets,
    DataType::Lists,
    DataType::ZSets,
];

/// Engine order for the tagged cross-type scan cursor.
const SCAN_ORDER: [DataType; 5] = [
    DataType::Strings,
    DataType::Hashes,
    DataType::Sets,
    DataType::Lists,
    DataType::ZSets,
];

/// Probe order for `data_type`.
const TYPE_PROBE_ORDER: [DataType; 5] = [
    DataType::Strings,
    DataType::Hashes,
    DataType::Lists,
    DataType::ZSets,
    DataType::Sets,
];

struct StoreInner {
    strings: StringsEngine,
    hashes: HashesEngine,
    sets: SetsEngine,
    lists: ListsEngine,
    zsets: ZsetsEngine,
    cursors: LruCache<Vec<u8>, Vec<u8>>,
    scan_keynum_exit: AtomicBool,
    current_task: Mutex<&'static str>,
    batch_delete_limit: usize,
}

impl StoreInner {
    fn engine(&self, data_type: DataType) -> Option<&dyn TypeEngine> {
        match data_type {
            DataType::Strings => Some(&self.strings),
            DataType::Hashes => Some(&self.hashes),
            DataType::Sets => Some(&self.sets),
            DataType::Lists => Some(&self.lists),
            DataType::ZSets => Some(&self.zsets),
            DataType::All => None,
        }
    }

    /// Engine for a data type known to be concrete (never `All`).
    fn concrete(&self, data_type: DataType) -> &dyn TypeEngine {
        match data_type {
            DataType::Strings => &self.strings,
            DataType::Hashes => &self.hashes,
            DataType::Sets => &self.sets,
            DataType::Lists => &self.lists,
            DataType::ZSets => &self.zsets,
            DataType::All => unreachable!("cross-type orders contain only concrete types"),
        }
    }

    fn do_compact(&self, data_type: DataType) -> Result<()> {
        let label = match data_type {
            DataType::All => "All",
            DataType::Strings => "String",
            DataType::Hashes => "Hash",
            DataType::ZSets => "ZSet",
            DataType::Sets => "Set",
            DataType::Lists => "List",
        };
        *self.current_task.lock() = label;
        let result = match self.engine(data_type) {
            Some(engine) => engine.compact_range(ColumnFamilyKind::MetaAndData, None, None),
            None => AGGREGATE_ORDER.iter().try_for_each(|dt| {
                self.concrete(*dt)
                    .compact_range(ColumnFamilyKind::MetaAndData, None, None)
            }),
        };
        *self.current_task.lock() = "No";
        result
    }

    fn do_compact_key(&self, data_type: DataType, key: &[u8]) -> Result<()> {
        // Strings have no data rows; per-key range compaction only applies
        // to the composite engines.
        let Some(engine) = self.engine(data_type) else {
            return Ok(());
        };
        if data_type == DataType::Strings {
            return Ok(());
        }
        let (meta_start, meta_end) = meta_compact_bounds(key);
        let (data_start, data_end) = data_compact_bounds(key);
        engine.compact_range(
            ColumnFamilyKind::Meta,
            Some(&meta_start),
            Some(&meta_end),
        )?;
        engine.compact_range(
            ColumnFamilyKind::Data,
            Some(&data_start),
            Some(&data_end),
        )?;
        Ok(())
    }

    fn run_bg_task(&self, task: &BgTask) {
        let result = match &task.op {
            BgOp::CleanAll => self.do_compact(task.data_type),
            BgOp::CompactKey(key) => self.do_compact_key(task.data_type, key),
        };
        if let Err(e) = result {
            warn!(data_type = task.data_type.name(), error = %e, "background compaction failed");
        }
    }
}

/// The storage engine facade.
pub struct Cinnabar {
    inner: Arc<StoreInner>,
    tasks: Arc<TaskQueue>,
    worker: Option<JoinHandle<()>>,
}

impl Cinnabar {
    /// Opens (or creates) the five per-type databases under `db_path` and
    /// starts the background compaction worker.
    pub fn open(opts: &Options, db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        std::fs::create_dir_all(db_path)?;
        let tasks = Arc::new(TaskQueue::new());

        let inner = Arc::new(StoreInner {
            strings: StringsEngine::open(opts, &db_path.join("strings"), Arc::clone(&tasks))?,
            hashes: HashesEngine::open(opts, &db_path.join("hashes"), Arc::clone(&tasks))?,
            sets: SetsEngine::open(opts, &db_path.join("sets"), Arc::clone(&tasks))?,
            lists: ListsEngine::open(opts, &db_path.join("lists"), Arc::clone(&tasks))?,
            zsets: ZsetsEngine::open(opts, &db_path.join("zsets"), Arc::clone(&tasks))?,
            cursors: LruCache::new(CURSOR_CAPACITY),
            scan_keynum_exit: AtomicBool::new(false),
            current_task: Mutex::new("No"),
            batch_delete_limit: opts.batch_delete_limit,
        });

        let worker = {
            let inner = Arc::clone(&inner);
            let tasks = Arc::clone(&tasks);
            std::thread::Builder::new()
                .name("cinnabar-bgtask".to_string())
                .spawn(move || {
                    while let Some(task) = tasks.wait_pop() {
                        inner.run_bg_task(&task);
                    }
                    debug!("background worker exiting");
                })?
        };

        Ok(Self {
            inner,
            tasks,
            worker: Some(worker),
        })
    }

    pub fn strings(&self) -> &StringsEngine {
        &self.inner.strings
    }

    pub fn hashes(&self) -> &HashesEngine {
        &self.inner.hashes
    }

    pub fn sets(&self) -> &SetsEngine {
        &self.inner.sets
    }

    pub fn lists(&self) -> &ListsEngine {
        &self.inner.lists
    }

    pub fn zsets(&self) -> &ZsetsEngine {
        &self.inner.zsets
    }

    /// Folds one per-type outcome into an aggregate: success counts,
    /// `NotFound` is expected, anything else is recorded and poisons the
    /// aggregate.
    fn fold(
        outcome: Result<()>,
        data_type: DataType,
        count: &mut i64,
        type_status: &mut HashMap<DataType, Error>,
    ) {
        match outcome {
            Ok(()) => *count += 1,
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                type_status.insert(data_type, e);
            }
        }
    }

    /// Deletes each key from every engine. Returns the number of
    /// deletions, or -1 when any engine failed with a real error; per-type
    /// errors are in the map.
    pub fn del(&self, keys: &[Vec<u8>]) -> (i64, HashMap<DataType, Error>) {
        let mut count = 0i64;
        let mut type_status = HashMap::new();
        for key in keys {
            for dt in AGGREGATE_ORDER {
                let engine = self.inner.concrete(dt);
                Self::fold(engine.del(key), dt, &mut count, &mut type_status);
            }
        }
        if type_status.is_empty() {
            (count, type_status)
        } else {
            (-1, type_status)
        }
    }

    /// Deletes keys from one engine only.
    pub fn del_by_type(&self, keys: &[Vec<u8>], data_type: DataType) -> i64 {
        let Some(engine) = self.inner.engine(data_type) else {
            return -1;
        };
        let mut count = 0i64;
        for key in keys {
            match engine.del(key) {
                Ok(()) => count += 1,
                Err(e) if e.is_not_found() => {}
                Err(_) => return -1,
            }
        }
        count
    }

    /// Counts how many engines hold each key live.
    pub fn exists(&self, keys: &[Vec<u8>]) -> (i64, HashMap<DataType, Error>) {
        let mut count = 0i64;
        let mut type_status = HashMap::new();
        for key in keys {
            for dt in AGGREGATE_ORDER {
                let engine = self.inner.concrete(dt);
                Self::fold(engine.exists(key), dt, &mut count, &mut type_status);
            }
        }
        if type_status.is_empty() {
            (count, type_status)
        } else {
            (-1, type_status)
        }
    }

    pub fn expire(&self, key: &[u8], ttl: i64) -> (i64, HashMap<DataType, Error>) {
        let mut count = 0i64;
        let mut type_status = HashMap::new();
        for dt in AGGREGATE_ORDER {
            let engine = self.inner.concrete(dt);
            Self::fold(engine.expire(key, ttl), dt, &mut count, &mut type_status);
        }
        if type_status.is_empty() {
            (count, type_status)
        } else {
            (-1, type_status)
        }
    }

    pub fn expireat(&self, key: &[u8], timestamp: i64) -> (i64, HashMap<DataType, Error>) {
        let mut count = 0i64;
        let mut type_status = HashMap::new();
        for dt in AGGREGATE_ORDER {
            let engine = self.inner.concrete(dt);
            Self::fold(
                engine.expireat(key, timestamp),
                dt,
                &mut count,
                &mut type_status,
            );
        }
        if type_status.is_empty() {
            (count, type_status)
        } else {
            (-1, type_status)
        }
    }

    pub fn persist(&self, key: &[u8]) -> (i64, HashMap<DataType, Error>) {
        let mut count = 0i64;
        let mut type_status = HashMap::new();
        for dt in AGGREGATE_ORDER {
            let engine = self.inner.concrete(dt);
            Self::fold(engine.persist(key), dt, &mut count, &mut type_status);
        }
        if type_status.is_empty() {
            (count, type_status)
        } else {
            (-1, type_status)
        }
    }

    /// Seconds-to-live per type: -1 no expiry, -2 absent or dead, -3 the
    /// engine errored (and the error is in the map).
    pub fn ttl(&self, key: &[u8]) -> (HashMap<DataType, i64>, HashMap<DataType, Error>) {
        let mut ttls = HashMap::new();
        let mut type_status = HashMap::new();
        for dt in AGGREGATE_ORDER {
            let engine = self.inner.concrete(dt);
            match engine.ttl(key) {
                Ok(ttl) => {
                    ttls.insert(dt, ttl);
                }
                Err(e) if e.is_not_found() => {
                    ttls.insert(dt, -2);
                }
                Err(e) => {
                    ttls.insert(dt, -3);
                    type_status.insert(dt, e);
                }
            }
        }
        (ttls, type_status)
    }

    /// The type name of the first engine holding the key live, or
    /// `"none"`. Duplicate-type existence is not an error; probe order
    /// decides.
    pub fn data_type(&self, key: &[u8]) -> Result<&'static str> {
        for dt in TYPE_PROBE_ORDER {
            let engine = self.inner.concrete(dt);
            match engine.exists(key) {
                Ok(()) => {
                    return Ok(match dt {
                        DataType::Strings => "string",
                        DataType::Hashes => "hash",
                        DataType::Lists => "list",
                        DataType::ZSets => "zset",
                        DataType::Sets => "set",
                        DataType::All => unreachable!(),
                    })
                }
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }
        Ok("none")
    }

    /// Every live key matching the pattern, from one engine or all of
    /// them.
    pub fn keys(&self, data_type: DataType, pattern: &[u8]) -> Result<Vec<Vec<u8>>> {
        let mut keys = Vec::new();
        match self.inner.engine(data_type) {
            Some(engine) => keys.extend(engine.scan_keys(pattern)?),
            None => {
                for dt in [
                    DataType::Strings,
                    DataType::Hashes,
                    DataType::ZSets,
                    DataType::Sets,
                    DataType::Lists,
                ] {
                    let engine = self.inner.concrete(dt);
                    keys.extend(engine.scan_keys(pattern)?);
                }
            }
        }
        Ok(keys)
    }

    fn cursor_index_key(data_type: DataType, cursor: i64) -> Vec<u8> {
        let mut index = vec![data_type.tag()];
        index.extend_from_slice(cursor.to_string().as_bytes());
        index
    }

    fn get_start_key(&self, data_type: DataType, cursor: i64) -> Option<Vec<u8>> {
        self.inner
            .cursors
            .lookup(&Self::cursor_index_key(data_type, cursor))
    }

    fn store_cursor_start_key(&self, data_type: DataType, cursor: i64, start_key: Vec<u8>) {
        self.inner
            .cursors
            .insert(Self::cursor_index_key(data_type, cursor), start_key);
    }

    /// Cross-type resumable scan. The opaque cursor resolves through the
    /// cursor cache to a one-byte type tag plus a resume key; when one
    /// type's keyspace is exhausted the cursor hops to the next type.
    /// Losing a cache entry restarts iteration, which is correct, just
    /// wasteful.
    pub fn scan(
        &self,
        data_type: DataType,
        cursor: i64,
        pattern: &[u8],
        count: i64,
    ) -> Result<(Vec<Vec<u8>>, i64)> {
        if cursor < 0 {
            return Ok((Vec::new(), 0));
        }
        let prefix: Vec<u8> = if is_tail_wildcard(pattern) {
            pattern[..pattern.len() - 1].to_vec()
        } else {
            Vec::new()
        };

        let (start_tag, mut start_key) = match self.get_start_key(data_type, cursor) {
            Some(stored) if !stored.is_empty() => (stored[0], stored[1..].to_vec()),
            _ => {
                let tag = if data_type == DataType::All {
                    DataType::Strings.tag()
                } else {
                    data_type.tag()
                };
                (tag, prefix.clone())
            }
        };
        let start_pos = SCAN_ORDER
            .iter()
            .position(|dt| dt.tag() == start_tag)
            .unwrap_or(0);

        let mut keys = Vec::new();
        let mut leftover = count;
        let mut next_cursor = 0i64;
        for (pos, dt) in SCAN_ORDER.iter().enumerate().skip(start_pos) {
            let engine = self.inner.concrete(*dt);
            let mut next_key = Vec::new();
            let is_finish = engine.scan(&start_key, pattern, &mut keys, &mut leftover, &mut next_key)?;

            if leftover == 0 && !is_finish {
                next_cursor = cursor + count;
                let mut stored = vec![dt.tag()];
                stored.extend_from_slice(&next_key);
                self.store_cursor_start_key(data_type, next_cursor, stored);
                break;
            }
            // This type is exhausted.
            if data_type == *dt || pos == SCAN_ORDER.len() - 1 {
                next_cursor = 0;
                break;
            }
            if leftover == 0 {
                next_cursor = cursor + count;
                let mut stored = vec![SCAN_ORDER[pos + 1].tag()];
                stored.extend_from_slice(&prefix);
                self.store_cursor_start_key(data_type, next_cursor, stored);
                break;
            }
            start_key = prefix.clone();
        }
        Ok((keys, next_cursor))
    }

    /// Single-type scan with an explicit resume key instead of a cursor.
    pub fn scanx(
        &self,
        data_type: DataType,
        start_key: &[u8],
        pattern: &[u8],
        count: i64,
    ) -> Result<(Vec<Vec<u8>>, Vec<u8>)> {
        let engine = self
            .inner
            .engine(data_type)
            .ok_or_else(|| Error::Corruption("Unsupported data types".to_string()))?;
        let mut keys = Vec::new();
        let mut next_key = Vec::new();
        let mut leftover = count;
        engine.scan(start_key, pattern, &mut keys, &mut leftover, &mut next_key)?;
        Ok((keys, next_key))
    }

    pub fn pk_scan_range(
        &self,
        data_type: DataType,
        key_start: &[u8],
        key_end: &[u8],
        pattern: &[u8],
        limit: i64,
    ) -> Result<(Vec<Vec<u8>>, Vec<u8>)> {
        let engine = self
            .inner
            .engine(data_type)
            .ok_or_else(|| Error::Corruption("Unsupported data types".to_string()))?;
        engine.pk_scan_range(key_start, key_end, pattern, limit)
    }

    pub fn pk_rscan_range(
        &self,
        data_type: DataType,
        key_start: &[u8],
        key_end: &[u8],
        pattern: &[u8],
        limit: i64,
    ) -> Result<(Vec<Vec<u8>>, Vec<u8>)> {
        let engine = self
            .inner
            .engine(data_type)
            .ok_or_else(|| Error::Corruption("Unsupported data types".to_string()))?;
        engine.pk_rscan_range(key_start, key_end, pattern, limit)
    }

    pub fn pk_pattern_match_del(&self, data_type: DataType, pattern: &[u8]) -> Result<i64> {
        let engine = self
            .inner
            .engine(data_type)
            .ok_or_else(|| Error::Corruption("Unsupported data type".to_string()))?;
        engine.pk_pattern_match_del(pattern, self.inner.batch_delete_limit)
    }

    /// Key censuses in engine order, aborted between engines (and
    /// cooperatively inside them) by [`Cinnabar::stop_scan_key_num`].
    pub fn get_key_num(&self) -> Result<Vec<KeyInfo>> {
        let mut infos = Vec::new();
        for dt in [
            DataType::Strings,
            DataType::Hashes,
            DataType::Lists,
            DataType::ZSets,
            DataType::Sets,
        ] {
            if self.inner.scan_keynum_exit.load(Ordering::Relaxed) {
                self.inner.scan_keynum_exit.store(false, Ordering::Relaxed);
                return Err(Error::Corruption("exit".to_string()));
            }
            let engine = self.inner.concrete(dt);
            infos.push(engine.scan_key_num(&self.inner.scan_keynum_exit)?);
        }
        if self.inner.scan_keynum_exit.load(Ordering::Relaxed) {
            self.inner.scan_keynum_exit.store(false, Ordering::Relaxed);
            return Err(Error::Corruption("exit".to_string()));
        }
        Ok(infos)
    }

    pub fn stop_scan_key_num(&self) {
        self.inner.scan_keynum_exit.store(true, Ordering::Relaxed);
    }

    /// Compacts one type (or all) now, or queues it for the worker.
    pub fn compact(&self, data_type: DataType, sync: bool) -> Result<()> {
        if sync {
            self.inner.do_compact(data_type)
        } else {
            self.tasks.enqueue(BgTask::clean_all(data_type));
            Ok(())
        }
    }

    /// Range-compacts one logical key's meta and data rows.
    pub fn compact_key(&self, data_type: DataType, key: &[u8]) -> Result<()> {
        self.inner.do_compact_key(data_type, key)
    }

    /// The kind of background task currently running, for diagnostics.
    pub fn current_task_type(&self) -> &'static str {
        *self.inner.current_task.lock()
    }

    pub fn get_property(&self, data_type: DataType, property: &str) -> Result<u64> {
        match self.inner.engine(data_type) {
            Some(engine) => engine.get_property(property),
            None => {
                let mut total = 0u64;
                for dt in AGGREGATE_ORDER {
                    total += self.inner.concrete(dt).get_property(property)?;
                }
                Ok(total)
            }
        }
    }

    /// Pops a random member; schedules a range compaction for the key when
    /// the engine reports pop churn past its thresholds.
    pub fn spop(&self, key: &[u8]) -> Result<Vec<u8>> {
        let (member, need_compact) = self.inner.sets.spop(key)?;
        if need_compact {
            self.tasks
                .enqueue(BgTask::compact_key(DataType::Sets, key.to_vec()));
        }
        Ok(member)
    }

    /// Observes elements into the HyperLogLog stored at `key`. Returns
    /// true when the estimate changed or an absent key was created.
    pub fn pf_add(&self, key: &[u8], values: &[Vec<u8>]) -> Result<bool> {
        if values.len() >= MAX_KEYS {
            return Err(Error::InvalidArgument(
                "Invalid the number of key".to_string(),
            ));
        }
        let (registers, existed) = match self.inner.strings.get(key) {
            Ok(value) => (value, true),
            Err(e) if e.is_not_found() => (Vec::new(), false),
            Err(e) => return Err(e),
        };
        let mut hll = HyperLogLog::from_bytes(&registers)?;
        let previous = hll.estimate() as i64;
        for value in values {
            hll.add(value);
        }
        let updated = previous != hll.estimate() as i64 || (!existed && values.is_empty());
        self.inner.strings.set(key, hll.as_bytes())?;
        Ok(updated)
    }

    /// Estimated cardinality of the union of the sketches at `keys`.
    pub fn pf_count(&self, keys: &[Vec<u8>]) -> Result<i64> {
        if keys.is_empty() || keys.len() >= MAX_KEYS {
            return Err(Error::InvalidArgument(
                "Invalid the number of key".to_string(),
            ));
        }
        let mut merged = HyperLogLog::new();
        for key in keys {
            match self.inner.strings.get(key) {
                Ok(value) => merged.merge(&HyperLogLog::from_bytes(&value)?),
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(merged.estimate() as i64)
    }

    /// Merges the sketches at `keys` into the first key.
    pub fn pf_merge(&self, keys: &[Vec<u8>]) -> Result<()> {
        if keys.is_empty() || keys.len() >= MAX_KEYS {
            return Err(Error::InvalidArgument(
                "Invalid the number of key".to_string(),
            ));
        }
        let mut merged = match self.inner.strings.get(&keys[0]) {
            Ok(value) => HyperLogLog::from_bytes(&value)?,
            Err(e) if e.is_not_found() => HyperLogLog::new(),
            Err(e) => return Err(e),
        };
        for key in &keys[1..] {
            match self.inner.strings.get(key) {
                Ok(value) => merged.merge(&HyperLogLog::from_bytes(&value)?),
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }
        self.inner.strings.set(&keys[0], merged.as_bytes())
    }
}

impl Drop for Cinnabar {
    fn drop(&mut self) {
        self.tasks.shutdown();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("background worker panicked during shutdown");
            }
        }
        // Stop rocksdb's own background threads before the engines drop;
        // the data compaction filters read back into their database and
        // must not run during teardown.
        self.inner.strings.core.db.cancel_all_background_work(true);
        self.inner.hashes.core.db.cancel_all_background_work(true);
        self.inner.sets.core.db.cancel_all_background_work(true);
        self.inner.lists.core.db.cancel_all_background_work(true);
        self.inner.zsets.core.db.cancel_all_background_work(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScoreMember;
    use tempfile::TempDir;

    fn create_store() -> (Cinnabar, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Cinnabar::open(&Options::default(), dir.path()).unwrap();
        (store, dir)
    }

    fn seed_one_key_per_type(store: &Cinnabar) {
        store.strings().set(b"key-string", b"v").unwrap();
        store.hashes().hset(b"key-hash", b"f", b"v").unwrap();
        store.sets().sadd(b"key-set", &[b"m".to_vec()]).unwrap();
        store.lists().rpush(b"key-list", &[b"e".to_vec()]).unwrap();
        store
            .zsets()
            .zadd(
                b"key-zset",
                &[ScoreMember {
                    score: 1.0,
                    member: b"m".to_vec(),
                }],
            )
            .unwrap();
    }

    #[test]
    fn test_per_type_subdirectories() {
        let (_store, dir) = create_store();
        for sub in ["strings", "hashes", "sets", "lists", "zsets"] {
            assert!(dir.path().join(sub).is_dir(), "missing {sub}/");
        }
    }

    #[test]
    fn test_del_across_types() {
        let (store, _dir) = create_store();
        store.strings().set(b"k", b"v").unwrap();
        store.sets().sadd(b"k", &[b"m".to_vec()]).unwrap();

        let (count, status) = store.del(&[b"k".to_vec()]);
        assert_eq!(count, 2);
        assert!(status.is_empty());
        assert!(store.strings().get(b"k").unwrap_err().is_not_found());
        assert!(store.sets().scard(b"k").unwrap_err().is_not_found());
    }

    #[test]
    fn test_del_by_type() {
        let (store, _dir) = create_store();
        store.strings().set(b"k", b"v").unwrap();
        store.sets().sadd(b"k", &[b"m".to_vec()]).unwrap();

        assert_eq!(store.del_by_type(&[b"k".to_vec()], DataType::Sets), 1);
        assert!(store.strings().get(b"k").is_ok());
        assert_eq!(store.del_by_type(&[b"k".to_vec()], DataType::All), -1);
    }

    #[test]
    fn test_exists_counts_engines() {
        let (store, _dir) = create_store();
        store.strings().set(b"k", b"v").unwrap();
        store.hashes().hset(b"k", b"f", b"v").unwrap();

        let (count, status) = store.exists(&[b"k".to_vec(), b"missing".to_vec()]);
        assert_eq!(count, 2);
        assert!(status.is_empty());
    }

    #[test]
    fn test_expire_and_ttl_across_types() {
        let (store, _dir) = create_store();
        store.strings().set(b"k", b"v").unwrap();
        store.sets().sadd(b"k", &[b"m".to_vec()]).unwrap();

        let (count, _) = store.expire(b"k", 100);
        assert_eq!(count, 2);

        let (ttls, status) = store.ttl(b"k");
        assert!(status.is_empty());
        assert!((90..=100).contains(&ttls[&DataType::Strings]));
        assert!((90..=100).contains(&ttls[&DataType::Sets]));
        assert_eq!(ttls[&DataType::Hashes], -2);
        assert_eq!(ttls[&DataType::Lists], -2);
        assert_eq!(ttls[&DataType::ZSets], -2);
    }

    #[test]
    fn test_ttl_expiry_scenario() {
        let (store, _dir) = create_store();
        store.sets().sadd(b"k", &[b"x".to_vec()]).unwrap();
        let (count, _) = store.expire(b"k", 1);
        assert_eq!(count, 1);

        std::thread::sleep(std::time::Duration::from_secs(2));

        let err = store.sets().sismember(b"k", b"x").unwrap_err();
        assert!(matches!(
            err,
            Error::NotFound {
                reason: Some("Stale")
            }
        ));
        let (ttls, _) = store.ttl(b"k");
        assert_eq!(ttls[&DataType::Sets], -2);
    }

    #[test]
    fn test_persist() {
        let (store, _dir) = create_store();
        store.strings().set(b"k", b"v").unwrap();
        store.expire(b"k", 100);

        let (count, _) = store.persist(b"k");
        assert_eq!(count, 1);
        let (ttls, _) = store.ttl(b"k");
        assert_eq!(ttls[&DataType::Strings], -1);
    }

    #[test]
    fn test_data_type_probe_order() {
        let (store, _dir) = create_store();
        assert_eq!(store.data_type(b"k").unwrap(), "none");

        store.sets().sadd(b"k", &[b"m".to_vec()]).unwrap();
        assert_eq!(store.data_type(b"k").unwrap(), "set");

        // Duplicate-type existence resolves by probe order, strings first.
        store.strings().set(b"k", b"v").unwrap();
        assert_eq!(store.data_type(b"k").unwrap(), "string");
    }

    #[test]
    fn test_keys_across_types() {
        let (store, _dir) = create_store();
        seed_one_key_per_type(&store);

        let mut keys = store.keys(DataType::All, b"key-*").unwrap();
        keys.sort();
        assert_eq!(keys.len(), 5);

        let keys = store.keys(DataType::Sets, b"*").unwrap();
        assert_eq!(keys, vec![b"key-set".to_vec()]);
    }

    #[test]
    fn test_cross_type_scan_visits_every_type() {
        let (store, _dir) = create_store();
        seed_one_key_per_type(&store);

        let mut visited = Vec::new();
        let mut cursor = 0i64;
        let mut calls = 0;
        loop {
            let (keys, next) = store.scan(DataType::All, cursor, b"*", 1).unwrap();
            visited.extend(keys);
            calls += 1;
            if next == 0 {
                break;
            }
            cursor = next;
        }
        assert_eq!(calls, 5, "one key per call across five types");
        visited.sort();
        assert_eq!(
            visited,
            vec![
                b"key-hash".to_vec(),
                b"key-list".to_vec(),
                b"key-set".to_vec(),
                b"key-string".to_vec(),
                b"key-zset".to_vec(),
            ]
        );
    }

    #[test]
    fn test_single_type_scan_terminates() {
        let (store, _dir) = create_store();
        seed_one_key_per_type(&store);

        let (keys, next) = store.scan(DataType::Sets, 0, b"*", 10).unwrap();
        assert_eq!(keys, vec![b"key-set".to_vec()]);
        assert_eq!(next, 0);
    }

    #[test]
    fn test_scanx() {
        let (store, _dir) = create_store();
        store.sets().sadd(b"a", &[b"m".to_vec()]).unwrap();
        store.sets().sadd(b"b", &[b"m".to_vec()]).unwrap();

        let (keys, next_key) = store.scanx(DataType::Sets, b"", b"*", 1).unwrap();
        assert_eq!(keys, vec![b"a".to_vec()]);
        assert_eq!(next_key, b"b".to_vec());

        assert!(matches!(
            store.scanx(DataType::All, b"", b"*", 1).unwrap_err(),
            Error::Corruption(_)
        ));
    }

    #[test]
    fn test_pk_scan_range_routing() {
        let (store, _dir) = create_store();
        seed_one_key_per_type(&store);

        let (keys, _) = store
            .pk_scan_range(DataType::Lists, b"", b"", b"*", 10)
            .unwrap();
        assert_eq!(keys, vec![b"key-list".to_vec()]);

        assert!(store
            .pk_scan_range(DataType::All, b"", b"", b"*", 10)
            .is_err());
    }

    #[test]
    fn test_pk_pattern_match_del_routing() {
        let (store, _dir) = create_store();
        store.hashes().hset(b"h1", b"f", b"v").unwrap();
        store.hashes().hset(b"h2", b"f", b"v").unwrap();

        assert_eq!(
            store.pk_pattern_match_del(DataType::Hashes, b"h*").unwrap(),
            2
        );
        assert!(store.hashes().hlen(b"h1").unwrap_err().is_not_found());
    }

    #[test]
    fn test_get_key_num() {
        let (store, _dir) = create_store();
        seed_one_key_per_type(&store);

        let infos = store.get_key_num().unwrap();
        assert_eq!(infos.len(), 5);
        assert_eq!(infos.iter().map(|i| i.keys).sum::<u64>(), 5);
    }

    #[test]
    fn test_stop_scan_key_num() {
        let (store, _dir) = create_store();
        store.stop_scan_key_num();
        assert!(matches!(
            store.get_key_num().unwrap_err(),
            Error::Corruption(_)
        ));
        // The flag resets; the next census succeeds.
        assert!(store.get_key_num().is_ok());
    }

    #[test]
    fn test_compact_sync() {
        let (store, _dir) = create_store();
        store.sets().sadd(b"k", &[b"a".to_vec()]).unwrap();
        store.sets().del(b"k").unwrap();
        store.compact(DataType::Sets, true).unwrap();
        store.compact(DataType::All, true).unwrap();
        assert_eq!(store.current_task_type(), "No");
    }

    #[test]
    fn test_compact_async_runs_on_worker() {
        let (store, _dir) = create_store();
        store.sets().sadd(b"k", &[b"a".to_vec()]).unwrap();
        store.compact(DataType::Sets, false).unwrap();
        // Drop joins the worker after it drains the queue.
    }

    #[test]
    fn test_spop_via_dispatcher() {
        let (store, _dir) = create_store();
        store.sets().sadd(b"k", &[b"only".to_vec()]).unwrap();
        assert_eq!(store.spop(b"k").unwrap(), b"only");
        assert!(store.spop(b"k").unwrap_err().is_not_found());
    }

    #[test]
    fn test_get_property() {
        let (store, _dir) = create_store();
        seed_one_key_per_type(&store);
        // Estimated key counts exist per engine; the aggregate sums them.
        let total = store
            .get_property(DataType::All, "rocksdb.estimate-num-keys")
            .unwrap();
        assert!(total >= 1);
    }

    #[test]
    fn test_pf_add_and_count() {
        let (store, _dir) = create_store();
        let updated = store
            .pf_add(b"hll", &[b"x".to_vec(), b"y".to_vec(), b"z".to_vec()])
            .unwrap();
        assert!(updated);

        let count = store.pf_count(&[b"hll".to_vec()]).unwrap();
        assert_eq!(count, 3);

        // Re-adding the same elements changes nothing.
        let updated = store.pf_add(b"hll", &[b"x".to_vec()]).unwrap();
        assert!(!updated);
    }

    #[test]
    fn test_pf_add_creates_empty_key() {
        let (store, _dir) = create_store();
        assert!(store.pf_add(b"hll", &[]).unwrap());
        assert!(store.strings().get(b"hll").is_ok());
        assert!(!store.pf_add(b"hll", &[]).unwrap());
    }

    #[test]
    fn test_pf_count_merge_commutes() {
        let (store, _dir) = create_store();
        store
            .pf_add(b"a", &[b"x".to_vec(), b"y".to_vec()])
            .unwrap();
        store
            .pf_add(b"b", &[b"y".to_vec(), b"z".to_vec()])
            .unwrap();

        let ab = store.pf_count(&[b"a".to_vec(), b"b".to_vec()]).unwrap();
        let ba = store.pf_count(&[b"b".to_vec(), b"a".to_vec()]).unwrap();
        assert_eq!(ab, ba);
        // Union is {x, y, z}; at this cardinality the estimate is exact
        // well within the 2% bound.
        assert_eq!(ab, 3);
    }

    #[test]
    fn test_pf_merge_writes_first_key() {
        let (store, _dir) = create_store();
        store.pf_add(b"a", &[b"x".to_vec()]).unwrap();
        store.pf_add(b"b", &[b"y".to_vec()]).unwrap();

        store.pf_merge(&[b"a".to_vec(), b"b".to_vec()]).unwrap();
        assert_eq!(store.pf_count(&[b"a".to_vec()]).unwrap(), 2);
        assert_eq!(store.pf_count(&[b"b".to_vec()]).unwrap(), 1);
    }

    #[test]
    fn test_hll_rejects_too_many_keys() {
        let (store, _dir) = create_store();
        let too_many: Vec<Vec<u8>> = (0..MAX_KEYS)
            .map(|i| format!("k{i}").into_bytes())
            .collect();
        assert!(matches!(
            store.pf_count(&too_many).unwrap_err(),
            Error::InvalidArgument(_)
        ));
        assert!(matches!(
            store.pf_count(&[]).unwrap_err(),
            Error::InvalidArgument(_)
        ));
        assert!(matches!(
            store.pf_merge(&too_many).unwrap_err(),
            Error::InvalidArgument(_)
        ));
    }

    #[test]
    fn test_compact_key_reclaims_tombstones() {
        let (store, _dir) = create_store();
        let members: Vec<Vec<u8>> = (0..20).map(|i| format!("m{i}").into_bytes()).collect();
        store.sets().sadd(b"k", &members).unwrap();
        store.sets().del(b"k").unwrap();
        store.sets().sadd(b"k", &[b"fresh".to_vec()]).unwrap();

        store.compact_key(DataType::Sets, b"k").unwrap();
        assert_eq!(store.sets().smembers(b"k").unwrap(), vec![b"fresh".to_vec()]);
    }
}
