// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Type engines and their shared plumbing.
//!
//! Each data type owns one RocksDB instance under its own subdirectory: the
//! default column family holds meta rows, additional named families hold
//! data rows. [`EngineCore`] carries everything the engines have in common
//! (database handle, record locks, statistics and scan-cursor caches, the
//! background task queue) plus the key-level operations that work purely on
//! the base meta header and are therefore identical across hashes, sets,
//! sorted sets, and lists. The strings engine has its own value layout and
//! implements the key-level surface itself.

mod hashes;
mod lists;
mod sets;
mod strings;
mod zsets;

pub use hashes::HashesEngine;
pub use lists::ListsEngine;
pub use sets::SetsEngine;
pub use strings::StringsEngine;
pub use zsets::ZsetsEngine;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rocksdb::{
    BlockBasedOptions, BoundColumnFamily, Cache, ColumnFamilyDescriptor, Direction, IteratorMode,
    WriteBatch,
};
use tracing::debug;

use crate::cache::LruCache;
use crate::codec::MetaValue;
use crate::error::{Error, Result};
use crate::filter::{DataFilterFactory, Db, FilterHandle, MetaFilterFactory, StringsFilterFactory};
use crate::lock::LockManager;
use crate::options::Options;
use crate::store::bgtask::{BgTask, TaskQueue};
use crate::types::{ColumnFamilyKind, DataType, KeyInfo};
use crate::util::{is_tail_wildcard, string_match, unix_seconds};

/// Meta rows live in the default column family.
pub const META_CF: &str = "default";
/// Data rows for hashes, sets, and lists.
pub const DATA_CF: &str = "data_cf";
/// Sorted-set member → score rows.
pub const MEMBER_CF: &str = "member_cf";
/// Sorted-set score → member rows.
pub const SCORE_CF: &str = "score_cf";

/// Capacity of each engine's scan-cursor continuation cache.
const SCAN_CURSOR_CAPACITY: usize = 5_000;

/// How often long meta iterations poll the cooperative stop flag.
const STOP_CHECK_INTERVAL: u64 = 128;

pub(crate) fn cf<'a>(db: &'a Db, name: &str) -> Result<Arc<BoundColumnFamily<'a>>> {
    db.cf_handle(name)
        .ok_or_else(|| Error::Corruption(format!("missing column family: {name}")))
}

fn block_opts(opts: &Options) -> BlockBasedOptions {
    let mut block = BlockBasedOptions::default();
    block.set_bloom_filter(opts.bloom_bits_per_key, false);
    if !opts.share_block_cache && opts.block_cache_size > 0 {
        block.set_block_cache(&Cache::new_lru_cache(opts.block_cache_size));
    }
    block
}

fn base_cf_options(opts: &Options) -> rocksdb::Options {
    let mut cf_opts = rocksdb::Options::default();
    cf_opts.set_write_buffer_size(opts.write_buffer_size);
    cf_opts.set_block_based_table_factory(&block_opts(opts));
    cf_opts
}

fn db_options() -> rocksdb::Options {
    let mut db_opts = rocksdb::Options::default();
    db_opts.create_if_missing(true);
    db_opts.create_missing_column_families(true);
    db_opts
}

/// Opens a composite-type database: meta in the default CF with the meta
/// filter, each named data CF with the version-checking data filter wired
/// to a late-bound handle on this same database.
fn open_composite_db(opts: &Options, path: &Path, data_cfs: &[&'static str]) -> Result<Arc<Db>> {
    let handle = FilterHandle::default();

    let mut meta_opts = base_cf_options(opts);
    meta_opts.set_compaction_filter_factory(MetaFilterFactory);
    let mut descriptors = vec![ColumnFamilyDescriptor::new(META_CF, meta_opts)];
    for name in data_cfs {
        let mut data_opts = base_cf_options(opts);
        data_opts.set_compaction_filter_factory(DataFilterFactory::new(handle.clone(), META_CF));
        descriptors.push(ColumnFamilyDescriptor::new(*name, data_opts));
    }

    let db = Arc::new(Db::open_cf_descriptors(&db_options(), path, descriptors)?);
    handle.install(&db);
    debug!(path = %path.display(), "opened composite engine database");
    Ok(db)
}

/// Opens the strings database: a single default CF with the expiry filter.
fn open_strings_db(opts: &Options, path: &Path) -> Result<Arc<Db>> {
    let mut cf_opts = base_cf_options(opts);
    cf_opts.set_compaction_filter_factory(StringsFilterFactory);
    let descriptors = vec![ColumnFamilyDescriptor::new(META_CF, cf_opts)];
    let db = Arc::new(Db::open_cf_descriptors(&db_options(), path, descriptors)?);
    debug!(path = %path.display(), "opened strings engine database");
    Ok(db)
}

/// State shared by every engine of one data type.
pub(crate) struct EngineCore {
    pub db: Arc<Db>,
    pub lock_mgr: LockManager,
    pub data_type: DataType,
    data_cfs: &'static [&'static str],
    statistics: LruCache<Vec<u8>, u64>,
    scan_cursors: LruCache<Vec<u8>, Vec<u8>>,
    small_compaction_threshold: u64,
    tasks: Arc<TaskQueue>,
}

impl EngineCore {
    pub fn open_composite(
        opts: &Options,
        path: &Path,
        data_type: DataType,
        data_cfs: &'static [&'static str],
        tasks: Arc<TaskQueue>,
    ) -> Result<Self> {
        let db = open_composite_db(opts, path, data_cfs)?;
        Ok(Self {
            db,
            lock_mgr: LockManager::new(),
            data_type,
            data_cfs,
            statistics: LruCache::new(opts.statistics_max_size),
            scan_cursors: LruCache::new(SCAN_CURSOR_CAPACITY),
            small_compaction_threshold: opts.small_compaction_threshold,
            tasks,
        })
    }

    pub fn open_strings(opts: &Options, path: &Path, tasks: Arc<TaskQueue>) -> Result<Self> {
        let db = open_strings_db(opts, path)?;
        Ok(Self {
            db,
            lock_mgr: LockManager::new(),
            data_type: DataType::Strings,
            data_cfs: &[],
            statistics: LruCache::new(0),
            scan_cursors: LruCache::new(SCAN_CURSOR_CAPACITY),
            small_compaction_threshold: 0,
            tasks,
        })
    }

    /// Accumulates modification counts against a key; once the small
    /// compaction threshold is crossed, queues a range compaction for it
    /// and resets the counter. Biases compaction toward keys with heavy
    /// delete churn.
    pub fn update_key_statistics(&self, key: &[u8], count: u64) {
        if self.small_compaction_threshold == 0 || count == 0 {
            return;
        }
        let total = self.statistics.lookup(&key.to_vec()).unwrap_or(0) + count;
        if total >= self.small_compaction_threshold {
            self.statistics.remove(&key.to_vec());
            self.tasks
                .enqueue(BgTask::compact_key(self.data_type, key.to_vec()));
        } else {
            self.statistics.insert(key.to_vec(), total);
        }
    }

    fn cursor_index_key(key: &[u8], pattern: &[u8], cursor: i64) -> Vec<u8> {
        let mut index = Vec::with_capacity(key.len() + pattern.len() + 24);
        index.extend_from_slice(key);
        index.push(b'_');
        index.extend_from_slice(pattern);
        index.push(b'_');
        index.extend_from_slice(cursor.to_string().as_bytes());
        index
    }

    /// Continuation point stored for `(key, pattern, cursor)`, if the cache
    /// still has it. A miss restarts the scan from the beginning, which is
    /// correct, just slower.
    pub fn get_scan_start_point(&self, key: &[u8], pattern: &[u8], cursor: i64) -> Option<Vec<u8>> {
        self.scan_cursors
            .lookup(&Self::cursor_index_key(key, pattern, cursor))
    }

    pub fn store_scan_next_point(&self, key: &[u8], pattern: &[u8], cursor: i64, next: Vec<u8>) {
        self.scan_cursors
            .insert(Self::cursor_index_key(key, pattern, cursor), next);
    }

    // Key-level operations over the base meta header, shared by all
    // composite engines. The strings engine has its own layout.

    fn read_live_meta(&self, key: &[u8], now: i64) -> Result<MetaValue> {
        let meta_cf = cf(&self.db, META_CF)?;
        match self.db.get_cf(&meta_cf, key)? {
            None => Err(Error::not_found()),
            Some(bytes) => {
                let meta = MetaValue::decode(&bytes)?;
                if meta.is_stale(now) {
                    Err(Error::not_found_because("Stale"))
                } else if meta.is_empty() {
                    Err(Error::not_found())
                } else {
                    Ok(meta)
                }
            }
        }
    }

    pub fn generic_expire(&self, key: &[u8], ttl: i64) -> Result<()> {
        let _guard = self.lock_mgr.lock(key);
        let now = unix_seconds();
        let mut meta = self.read_live_meta(key, now)?;
        if ttl > 0 {
            meta.set_relative_timestamp(ttl, now);
        } else {
            meta.initial_meta_value(now);
        }
        let meta_cf = cf(&self.db, META_CF)?;
        self.db.put_cf(&meta_cf, key, meta.encode())?;
        Ok(())
    }

    pub fn generic_expireat(&self, key: &[u8], timestamp: i64) -> Result<()> {
        let _guard = self.lock_mgr.lock(key);
        let now = unix_seconds();
        let mut meta = self.read_live_meta(key, now)?;
        if timestamp > 0 {
            meta.timestamp = timestamp.clamp(0, i64::from(i32::MAX)) as i32;
        } else {
            meta.initial_meta_value(now);
        }
        let meta_cf = cf(&self.db, META_CF)?;
        self.db.put_cf(&meta_cf, key, meta.encode())?;
        Ok(())
    }

    pub fn generic_persist(&self, key: &[u8]) -> Result<()> {
        let _guard = self.lock_mgr.lock(key);
        let now = unix_seconds();
        let mut meta = self.read_live_meta(key, now)?;
        if meta.timestamp == 0 {
            return Err(Error::not_found_because("Not have an associated timeout"));
        }
        meta.timestamp = 0;
        let meta_cf = cf(&self.db, META_CF)?;
        self.db.put_cf(&meta_cf, key, meta.encode())?;
        Ok(())
    }

    pub fn generic_ttl(&self, key: &[u8]) -> Result<i64> {
        let now = unix_seconds();
        let meta = self.read_live_meta(key, now)?;
        if meta.timestamp == 0 {
            return Ok(-1);
        }
        let remaining = i64::from(meta.timestamp) - now;
        Ok(if remaining >= 0 { remaining } else { -2 })
    }

    /// Logical delete: one meta rewrite regardless of collection size. The
    /// orphaned data rows are the compaction filter's problem.
    pub fn generic_del(&self, key: &[u8]) -> Result<()> {
        let _guard = self.lock_mgr.lock(key);
        let now = unix_seconds();
        let mut meta = self.read_live_meta(key, now)?;
        let statistic = u64::from(meta.count);
        meta.initial_meta_value(now);
        let meta_cf = cf(&self.db, META_CF)?;
        self.db.put_cf(&meta_cf, key, meta.encode())?;
        self.update_key_statistics(key, statistic);
        Ok(())
    }

    pub fn generic_exists(&self, key: &[u8]) -> Result<()> {
        self.read_live_meta(key, unix_seconds()).map(|_| ())
    }

    /// One step of a resumable meta scan: emit up to `*count` live keys
    /// matching `pattern` starting at `start_key`. Returns true when the
    /// keyspace is exhausted; otherwise `next_key` holds the resume point.
    pub fn generic_scan(
        &self,
        start_key: &[u8],
        pattern: &[u8],
        keys: &mut Vec<Vec<u8>>,
        count: &mut i64,
        next_key: &mut Vec<u8>,
    ) -> Result<bool> {
        next_key.clear();
        let now = unix_seconds();
        let snap = self.db.snapshot();
        let meta_cf = cf(&self.db, META_CF)?;

        let mut iter = snap
            .iterator_cf(&meta_cf, IteratorMode::From(start_key, Direction::Forward))
            .peekable();
        while *count > 0 {
            let Some(item) = iter.next() else {
                break;
            };
            let (key, value) = item?;
            let meta = MetaValue::decode(&value)?;
            if meta.is_stale(now) || meta.is_empty() {
                continue;
            }
            if string_match(pattern, &key) {
                keys.push(key.to_vec());
            }
            *count -= 1;
        }

        let scan_prefix: &[u8] = if is_tail_wildcard(pattern) {
            &pattern[..pattern.len() - 1]
        } else {
            &[]
        };
        if let Some(Ok((key, _))) = iter.peek() {
            if key.as_ref() <= scan_prefix || key.starts_with(scan_prefix) {
                *next_key = key.to_vec();
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn generic_scan_keys(&self, pattern: &[u8]) -> Result<Vec<Vec<u8>>> {
        let now = unix_seconds();
        let snap = self.db.snapshot();
        let meta_cf = cf(&self.db, META_CF)?;
        let mut keys = Vec::new();
        for item in snap.iterator_cf(&meta_cf, IteratorMode::Start) {
            let (key, value) = item?;
            let meta = MetaValue::decode(&value)?;
            if !meta.is_stale(now) && !meta.is_empty() && string_match(pattern, &key) {
                keys.push(key.to_vec());
            }
        }
        Ok(keys)
    }

    pub fn generic_scan_key_num(&self, stop: &AtomicBool) -> Result<KeyInfo> {
        let now = unix_seconds();
        let snap = self.db.snapshot();
        let meta_cf = cf(&self.db, META_CF)?;

        let mut info = KeyInfo::default();
        let mut ttl_sum = 0u64;
        let mut visited = 0u64;
        for item in snap.iterator_cf(&meta_cf, IteratorMode::Start) {
            visited += 1;
            if visited % STOP_CHECK_INTERVAL == 0 && stop.load(Ordering::Relaxed) {
                break;
            }
            let (_, value) = item?;
            let meta = MetaValue::decode(&value)?;
            if meta.is_stale(now) || meta.is_empty() {
                info.invalid_keys += 1;
            } else {
                info.keys += 1;
                if meta.timestamp != 0 {
                    info.expires += 1;
                    ttl_sum += (i64::from(meta.timestamp) - now).max(0) as u64;
                }
            }
        }
        if info.expires > 0 {
            info.avg_ttl = ttl_sum / info.expires;
        }
        Ok(info)
    }

    /// Rewrites every live, pattern-matching key to a dead incarnation,
    /// flushing in bounded batches to cap memory.
    pub fn generic_pk_pattern_match_del(&self, pattern: &[u8], batch_limit: usize) -> Result<i64> {
        let now = unix_seconds();
        let snap = self.db.snapshot();
        let meta_cf = cf(&self.db, META_CF)?;

        let mut total = 0i64;
        let mut pending = 0usize;
        let mut batch = WriteBatch::default();
        for item in snap.iterator_cf(&meta_cf, IteratorMode::Start) {
            let (key, value) = item?;
            let mut meta = MetaValue::decode(&value)?;
            if !meta.is_stale(now) && !meta.is_empty() && string_match(pattern, &key) {
                meta.initial_meta_value(now);
                batch.put_cf(&meta_cf, &key, meta.encode());
                pending += 1;
            }
            if pending >= batch_limit {
                self.db.write(std::mem::take(&mut batch))?;
                total += pending as i64;
                pending = 0;
            }
        }
        if pending > 0 {
            self.db.write(batch)?;
            total += pending as i64;
        }
        Ok(total)
    }

    pub fn generic_pk_scan_range(
        &self,
        key_start: &[u8],
        key_end: &[u8],
        pattern: &[u8],
        limit: i64,
    ) -> Result<(Vec<Vec<u8>>, Vec<u8>)> {
        let start_unbounded = key_start.is_empty();
        let end_unbounded = key_end.is_empty();
        if !start_unbounded && !end_unbounded && key_start > key_end {
            return Err(Error::InvalidArgument("error in given range".to_string()));
        }

        let now = unix_seconds();
        let snap = self.db.snapshot();
        let meta_cf = cf(&self.db, META_CF)?;
        let mode = if start_unbounded {
            IteratorMode::Start
        } else {
            IteratorMode::From(key_start, Direction::Forward)
        };

        let mut keys = Vec::new();
        let mut next_key = Vec::new();
        let mut remain = limit;
        for item in snap.iterator_cf(&meta_cf, mode) {
            let (key, value) = item?;
            if !end_unbounded && key.as_ref() > key_end {
                break;
            }
            let meta = MetaValue::decode(&value)?;
            if meta.is_stale(now) || meta.is_empty() {
                continue;
            }
            if remain <= 0 {
                next_key = key.to_vec();
                break;
            }
            if string_match(pattern, &key) {
                keys.push(key.to_vec());
            }
            remain -= 1;
        }
        Ok((keys, next_key))
    }

    pub fn generic_pk_rscan_range(
        &self,
        key_start: &[u8],
        key_end: &[u8],
        pattern: &[u8],
        limit: i64,
    ) -> Result<(Vec<Vec<u8>>, Vec<u8>)> {
        let start_unbounded = key_start.is_empty();
        let end_unbounded = key_end.is_empty();
        if !start_unbounded && !end_unbounded && key_start < key_end {
            return Err(Error::InvalidArgument("error in given range".to_string()));
        }

        let now = unix_seconds();
        let snap = self.db.snapshot();
        let meta_cf = cf(&self.db, META_CF)?;
        let mode = if start_unbounded {
            IteratorMode::End
        } else {
            IteratorMode::From(key_start, Direction::Reverse)
        };

        let mut keys = Vec::new();
        let mut next_key = Vec::new();
        let mut remain = limit;
        for item in snap.iterator_cf(&meta_cf, mode) {
            let (key, value) = item?;
            if !end_unbounded && key.as_ref() < key_end {
                break;
            }
            let meta = MetaValue::decode(&value)?;
            if meta.is_stale(now) || meta.is_empty() {
                continue;
            }
            if remain <= 0 {
                next_key = key.to_vec();
                break;
            }
            if string_match(pattern, &key) {
                keys.push(key.to_vec());
            }
            remain -= 1;
        }
        Ok((keys, next_key))
    }

    pub fn generic_compact_range(
        &self,
        kind: ColumnFamilyKind,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Result<()> {
        if matches!(kind, ColumnFamilyKind::Meta | ColumnFamilyKind::MetaAndData) {
            let meta_cf = cf(&self.db, META_CF)?;
            self.db.compact_range_cf(&meta_cf, begin, end);
        }
        if matches!(kind, ColumnFamilyKind::Data | ColumnFamilyKind::MetaAndData) {
            for name in self.data_cfs {
                let data_cf = cf(&self.db, name)?;
                self.db.compact_range_cf(&data_cf, begin, end);
            }
        }
        Ok(())
    }

    pub fn generic_get_property(&self, property: &str) -> Result<u64> {
        let mut total = 0u64;
        let meta_cf = cf(&self.db, META_CF)?;
        total += self
            .db
            .property_int_value_cf(&meta_cf, property)?
            .unwrap_or(0);
        for name in self.data_cfs {
            let data_cf = cf(&self.db, name)?;
            total += self
                .db
                .property_int_value_cf(&data_cf, property)?
                .unwrap_or(0);
        }
        Ok(total)
    }
}

/// The key-level surface the dispatcher iterates across all five engines.
pub trait TypeEngine: Send + Sync {
    fn data_type(&self) -> DataType;
    fn expire(&self, key: &[u8], ttl: i64) -> Result<()>;
    fn expireat(&self, key: &[u8], timestamp: i64) -> Result<()>;
    fn persist(&self, key: &[u8]) -> Result<()>;
    fn ttl(&self, key: &[u8]) -> Result<i64>;
    fn del(&self, key: &[u8]) -> Result<()>;
    fn exists(&self, key: &[u8]) -> Result<()>;
    fn scan(
        &self,
        start_key: &[u8],
        pattern: &[u8],
        keys: &mut Vec<Vec<u8>>,
        count: &mut i64,
        next_key: &mut Vec<u8>,
    ) -> Result<bool>;
    fn scan_keys(&self, pattern: &[u8]) -> Result<Vec<Vec<u8>>>;
    fn scan_key_num(&self, stop: &AtomicBool) -> Result<KeyInfo>;
    fn pk_pattern_match_del(&self, pattern: &[u8], batch_limit: usize) -> Result<i64>;
    fn pk_scan_range(
        &self,
        key_start: &[u8],
        key_end: &[u8],
        pattern: &[u8],
        limit: i64,
    ) -> Result<(Vec<Vec<u8>>, Vec<u8>)>;
    fn pk_rscan_range(
        &self,
        key_start: &[u8],
        key_end: &[u8],
        pattern: &[u8],
        limit: i64,
    ) -> Result<(Vec<Vec<u8>>, Vec<u8>)>;
    fn compact_range(
        &self,
        kind: ColumnFamilyKind,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Result<()>;
    fn get_property(&self, property: &str) -> Result<u64>;
}

/// Expands the delegation of the shared key-level surface to `EngineCore`.
macro_rules! delegate_type_engine {
    ($engine:ty, $dtype:expr) => {
        impl crate::engine::TypeEngine for $engine {
            fn data_type(&self) -> crate::types::DataType {
                $dtype
            }
            fn expire(&self, key: &[u8], ttl: i64) -> crate::error::Result<()> {
                self.core.generic_expire(key, ttl)
            }
            fn expireat(&self, key: &[u8], timestamp: i64) -> crate::error::Result<()> {
                self.core.generic_expireat(key, timestamp)
            }
            fn persist(&self, key: &[u8]) -> crate::error::Result<()> {
                self.core.generic_persist(key)
            }
            fn ttl(&self, key: &[u8]) -> crate::error::Result<i64> {
                self.core.generic_ttl(key)
            }
            fn del(&self, key: &[u8]) -> crate::error::Result<()> {
                self.core.generic_del(key)
            }
            fn exists(&self, key: &[u8]) -> crate::error::Result<()> {
                self.core.generic_exists(key)
            }
            fn scan(
                &self,
                start_key: &[u8],
                pattern: &[u8],
                keys: &mut Vec<Vec<u8>>,
                count: &mut i64,
                next_key: &mut Vec<u8>,
            ) -> crate::error::Result<bool> {
                self.core.generic_scan(start_key, pattern, keys, count, next_key)
            }
            fn scan_keys(&self, pattern: &[u8]) -> crate::error::Result<Vec<Vec<u8>>> {
                self.core.generic_scan_keys(pattern)
            }
            fn scan_key_num(
                &self,
                stop: &std::sync::atomic::AtomicBool,
            ) -> crate::error::Result<crate::types::KeyInfo> {
                self.core.generic_scan_key_num(stop)
            }
            fn pk_pattern_match_del(
                &self,
                pattern: &[u8],
                batch_limit: usize,
            ) -> crate::error::Result<i64> {
                self.core.generic_pk_pattern_match_del(pattern, batch_limit)
            }
            fn pk_scan_range(
                &self,
                key_start: &[u8],
                key_end: &[u8],
                pattern: &[u8],
                limit: i64,
            ) -> crate::error::Result<(Vec<Vec<u8>>, Vec<u8>)> {
                self.core.generic_pk_scan_range(key_start, key_end, pattern, limit)
            }
            fn pk_rscan_range(
                &self,
                key_start: &[u8],
                key_end: &[u8],
                pattern: &[u8],
                limit: i64,
            ) -> crate::error::Result<(Vec<Vec<u8>>, Vec<u8>)> {
                self.core.generic_pk_rscan_range(key_start, key_end, pattern, limit)
            }
            fn compact_range(
                &self,
                kind: crate::types::ColumnFamilyKind,
                begin: Option<&[u8]>,
                end: Option<&[u8]>,
            ) -> crate::error::Result<()> {
                self.core.generic_compact_range(kind, begin, end)
            }
            fn get_property(&self, property: &str) -> crate::error::Result<u64> {
                self.core.generic_get_property(property)
            }
        }
    };
}

pub(crate) use delegate_type_engine;
