// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Set engine.
//!
//! Meta rows in the default column family, one data row per member in
//! `data_cf` keyed by `(user_key, version, member)` with an empty value.
//! Mutations hold the record lock and commit through one write batch;
//! multi-key reads run under a snapshot and never lock.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use rand::Rng;
use rocksdb::{Direction, IteratorMode, WriteBatch};

use crate::cache::LruCache;
use crate::codec::{encode_data_key, parse_data_key, version_prefix, MetaValue};
use crate::engine::{cf, delegate_type_engine, EngineCore, DATA_CF, META_CF};
use crate::error::{Error, Result};
use crate::options::Options;
use crate::store::bgtask::TaskQueue;
use crate::types::DataType;
use crate::util::{is_tail_wildcard, string_match, unix_seconds};

/// SPOP pop-counter capacity.
const SPOP_COUNTS_CAPACITY: usize = 1_000;

/// SPOP scans at most this many leading rows for its random pick.
const SPOP_WINDOW: u32 = 50;

pub struct SetsEngine {
    pub(crate) core: EngineCore,
    spop_counts: LruCache<Vec<u8>, u64>,
    spop_compact_duration: Duration,
    spop_compact_count: u64,
}

/// A live input set pinned to the version observed at snapshot time.
struct KeyVersion {
    key: Vec<u8>,
    version: u32,
}

impl SetsEngine {
    pub(crate) fn open(opts: &Options, path: &Path, tasks: Arc<TaskQueue>) -> Result<Self> {
        let core = EngineCore::open_composite(opts, path, DataType::Sets, &[DATA_CF], tasks)?;
        Ok(Self {
            core,
            spop_counts: LruCache::new(SPOP_COUNTS_CAPACITY),
            spop_compact_duration: opts.spop_compact_duration,
            spop_compact_count: opts.spop_compact_count,
        })
    }

    /// Adds members, creating or reviving the key as needed. Returns the
    /// number of members that were not already present.
    pub fn sadd(&self, key: &[u8], members: &[Vec<u8>]) -> Result<i32> {
        // Deduplicate preserving first-seen order.
        let mut seen = HashSet::new();
        let filtered: Vec<&[u8]> = members
            .iter()
            .map(|m| m.as_slice())
            .filter(|m| seen.insert(*m))
            .collect();

        let db = &self.core.db;
        let meta_cf = cf(db, META_CF)?;
        let data_cf = cf(db, DATA_CF)?;
        let mut batch = WriteBatch::default();
        let _guard = self.core.lock_mgr.lock(key);
        let now = unix_seconds();

        match db.get_cf(&meta_cf, key)? {
            Some(bytes) => {
                let mut meta = MetaValue::decode(&bytes)?;
                if meta.is_stale(now) || meta.is_empty() {
                    let version = meta.initial_meta_value(now);
                    meta.count = filtered.len() as u32;
                    batch.put_cf(&meta_cf, key, meta.encode());
                    for member in &filtered {
                        batch.put_cf(&data_cf, encode_data_key(key, version, member), []);
                    }
                    db.write(batch)?;
                    Ok(filtered.len() as i32)
                } else {
                    let version = meta.version;
                    let mut added = 0i32;
                    for member in &filtered {
                        let data_key = encode_data_key(key, version, member);
                        if db.get_cf(&data_cf, &data_key)?.is_none() {
                            added += 1;
                            batch.put_cf(&data_cf, data_key, []);
                        }
                    }
                    if added == 0 {
                        return Ok(0);
                    }
                    meta.modify_count(i64::from(added));
                    batch.put_cf(&meta_cf, key, meta.encode());
                    db.write(batch)?;
                    Ok(added)
                }
            }
            None => {
                let mut meta = MetaValue::new(filtered.len() as u32);
                let version = meta.update_version(now);
                batch.put_cf(&meta_cf, key, meta.encode());
                for member in &filtered {
                    batch.put_cf(&data_cf, encode_data_key(key, version, member), []);
                }
                db.write(batch)?;
                Ok(filtered.len() as i32)
            }
        }
    }

    /// Removes members; returns how many were present.
    pub fn srem(&self, key: &[u8], members: &[Vec<u8>]) -> Result<i32> {
        let db = &self.core.db;
        let meta_cf = cf(db, META_CF)?;
        let data_cf = cf(db, DATA_CF)?;
        let mut batch = WriteBatch::default();
        let _guard = self.core.lock_mgr.lock(key);
        let now = unix_seconds();

        let Some(bytes) = db.get_cf(&meta_cf, key)? else {
            return Err(Error::not_found());
        };
        let mut meta = MetaValue::decode(&bytes)?;
        if meta.is_stale(now) {
            return Err(Error::not_found_because("Stale"));
        }
        if meta.is_empty() {
            return Err(Error::not_found());
        }

        let version = meta.version;
        let mut removed = 0i32;
        for member in members {
            let data_key = encode_data_key(key, version, member);
            if db.get_cf(&data_cf, &data_key)?.is_some() {
                removed += 1;
                batch.delete_cf(&data_cf, data_key);
            }
        }
        meta.modify_count(-i64::from(removed));
        batch.put_cf(&meta_cf, key, meta.encode());
        db.write(batch)?;
        self.core.update_key_statistics(key, removed as u64);
        Ok(removed)
    }

    pub fn scard(&self, key: &[u8]) -> Result<i32> {
        let db = &self.core.db;
        let meta_cf = cf(db, META_CF)?;
        let Some(bytes) = db.get_cf(&meta_cf, key)? else {
            return Err(Error::not_found());
        };
        let meta = MetaValue::decode(&bytes)?;
        if meta.is_stale(unix_seconds()) {
            return Err(Error::not_found_because("Stale"));
        }
        if meta.is_empty() {
            return Err(Error::not_found_because("Deleted"));
        }
        Ok(meta.count as i32)
    }

    pub fn sismember(&self, key: &[u8], member: &[u8]) -> Result<bool> {
        let db = &self.core.db;
        let snap = db.snapshot();
        let meta_cf = cf(db, META_CF)?;
        let data_cf = cf(db, DATA_CF)?;

        let Some(bytes) = snap.get_cf(&meta_cf, key)? else {
            return Err(Error::not_found());
        };
        let meta = MetaValue::decode(&bytes)?;
        if meta.is_stale(unix_seconds()) {
            return Err(Error::not_found_because("Stale"));
        }
        if meta.is_empty() {
            return Err(Error::not_found());
        }
        let data_key = encode_data_key(key, meta.version, member);
        Ok(snap.get_cf(&data_cf, &data_key)?.is_some())
    }

    pub fn smembers(&self, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        let db = &self.core.db;
        let snap = db.snapshot();
        let meta_cf = cf(db, META_CF)?;
        let data_cf = cf(db, DATA_CF)?;

        let Some(bytes) = snap.get_cf(&meta_cf, key)? else {
            return Err(Error::not_found());
        };
        let meta = MetaValue::decode(&bytes)?;
        if meta.is_stale(unix_seconds()) {
            return Err(Error::not_found_because("Stale"));
        }
        if meta.is_empty() {
            return Err(Error::not_found());
        }

        let prefix = version_prefix(key, meta.version);
        let mut members = Vec::with_capacity(meta.count as usize);
        for item in snap.iterator_cf(&data_cf, IteratorMode::From(&prefix, Direction::Forward)) {
            let (data_key, _) = item?;
            if !data_key.starts_with(&prefix) {
                break;
            }
            members.push(parse_data_key(&data_key)?.suffix().to_vec());
        }
        Ok(members)
    }

    /// Moves `member` from `source` to `destination` in one atomic batch.
    /// Returns 1 if the member was moved, `NotFound` if the source or the
    /// member is missing.
    pub fn smove(&self, source: &[u8], destination: &[u8], member: &[u8]) -> Result<i32> {
        let db = &self.core.db;
        let meta_cf = cf(db, META_CF)?;
        let data_cf = cf(db, DATA_CF)?;
        let mut batch = WriteBatch::default();
        let _guard = self.core.lock_mgr.lock_many(&[source, destination]);
        let now = unix_seconds();

        if source == destination {
            return Ok(1);
        }

        let Some(bytes) = db.get_cf(&meta_cf, source)? else {
            return Err(Error::not_found());
        };
        let mut src_meta = MetaValue::decode(&bytes)?;
        if src_meta.is_stale(now) {
            return Err(Error::not_found_because("Stale"));
        }
        if src_meta.is_empty() {
            return Err(Error::not_found());
        }
        let src_key = encode_data_key(source, src_meta.version, member);
        if db.get_cf(&data_cf, &src_key)?.is_none() {
            return Err(Error::not_found());
        }
        src_meta.modify_count(-1);
        batch.put_cf(&meta_cf, source, src_meta.encode());
        batch.delete_cf(&data_cf, src_key);

        match db.get_cf(&meta_cf, destination)? {
            Some(bytes) => {
                let mut dst_meta = MetaValue::decode(&bytes)?;
                if dst_meta.is_stale(now) || dst_meta.is_empty() {
                    let version = dst_meta.initial_meta_value(now);
                    dst_meta.count = 1;
                    batch.put_cf(&meta_cf, destination, dst_meta.encode());
                    batch.put_cf(&data_cf, encode_data_key(destination, version, member), []);
                } else {
                    let dst_key = encode_data_key(destination, dst_meta.version, member);
                    if db.get_cf(&data_cf, &dst_key)?.is_none() {
                        dst_meta.modify_count(1);
                        batch.put_cf(&meta_cf, destination, dst_meta.encode());
                        batch.put_cf(&data_cf, dst_key, []);
                    }
                }
            }
            None => {
                let mut dst_meta = MetaValue::new(1);
                let version = dst_meta.update_version(now);
                batch.put_cf(&meta_cf, destination, dst_meta.encode());
                batch.put_cf(&data_cf, encode_data_key(destination, version, member), []);
            }
        }
        db.write(batch)?;
        self.core.update_key_statistics(source, 1);
        Ok(1)
    }

    /// Pops a pseudo-random member. The second return value asks the
    /// dispatcher to schedule a range compaction for this key: repeated
    /// pops otherwise degrade to O(tombstones) as deleted rows pile up in
    /// front of the live ones.
    pub fn spop(&self, key: &[u8]) -> Result<(Vec<u8>, bool)> {
        let db = &self.core.db;
        let meta_cf = cf(db, META_CF)?;
        let data_cf = cf(db, DATA_CF)?;
        let mut batch = WriteBatch::default();
        let _guard = self.core.lock_mgr.lock(key);
        let start = Instant::now();
        let now = unix_seconds();

        let Some(bytes) = db.get_cf(&meta_cf, key)? else {
            return Err(Error::not_found());
        };
        let mut meta = MetaValue::decode(&bytes)?;
        if meta.is_stale(now) {
            return Err(Error::not_found_because("Stale"));
        }
        if meta.is_empty() {
            return Err(Error::not_found());
        }

        let window = meta.count.min(SPOP_WINDOW);
        let target = rand::thread_rng().gen_range(0..window);
        let prefix = version_prefix(key, meta.version);
        let mut popped = None;
        for (index, item) in db
            .iterator_cf(&data_cf, IteratorMode::From(&prefix, Direction::Forward))
            .enumerate()
        {
            let (data_key, _) = item?;
            if !data_key.starts_with(&prefix) {
                break;
            }
            if index as u32 == target {
                popped = Some(parse_data_key(&data_key)?.suffix().to_vec());
                batch.delete_cf(&data_cf, &data_key);
                meta.modify_count(-1);
                batch.put_cf(&meta_cf, key, meta.encode());
                break;
            }
        }
        let Some(member) = popped else {
            return Err(Error::not_found());
        };
        db.write(batch)?;

        let count = self.spop_counts.lookup(&key.to_vec()).unwrap_or(0) + 1;
        self.spop_counts.insert(key.to_vec(), count);
        let need_compact =
            start.elapsed() >= self.spop_compact_duration || count >= self.spop_compact_count;
        if need_compact {
            self.spop_counts.remove(&key.to_vec());
        }
        Ok((member, need_compact))
    }

    /// With positive `count`, up to `min(count, card)` distinct members;
    /// with negative `count`, `|count|` members with possible repeats.
    /// Result order is shuffled.
    pub fn srandmember(&self, key: &[u8], count: i32) -> Result<Vec<Vec<u8>>> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let db = &self.core.db;
        let meta_cf = cf(db, META_CF)?;
        let data_cf = cf(db, DATA_CF)?;
        let _guard = self.core.lock_mgr.lock(key);
        let now = unix_seconds();

        let Some(bytes) = db.get_cf(&meta_cf, key)? else {
            return Err(Error::not_found());
        };
        let meta = MetaValue::decode(&bytes)?;
        if meta.is_stale(now) {
            return Err(Error::not_found_because("Stale"));
        }
        if meta.is_empty() {
            return Err(Error::not_found());
        }

        let size = meta.count as i64;
        let mut rng = rand::thread_rng();
        let mut targets: Vec<i64> = Vec::new();
        if count > 0 {
            let wanted = i64::from(count).min(size) as usize;
            let mut unique = HashSet::new();
            while targets.len() < wanted {
                let position = rng.gen_range(0..size);
                if unique.insert(position) {
                    targets.push(position);
                }
            }
        } else {
            let wanted = i64::from(count).unsigned_abs() as usize;
            while targets.len() < wanted {
                targets.push(rng.gen_range(0..size));
            }
        }
        targets.sort_unstable();

        // One forward walk collects every sampled position, repeats
        // included.
        let prefix = version_prefix(key, meta.version);
        let mut members = Vec::with_capacity(targets.len());
        let mut next_target = 0usize;
        for (index, item) in db
            .iterator_cf(&data_cf, IteratorMode::From(&prefix, Direction::Forward))
            .enumerate()
        {
            if next_target >= targets.len() {
                break;
            }
            let (data_key, _) = item?;
            if !data_key.starts_with(&prefix) {
                break;
            }
            let member = parse_data_key(&data_key)?.suffix();
            while next_target < targets.len() && targets[next_target] == index as i64 {
                members.push(member.to_vec());
                next_target += 1;
            }
        }
        members.shuffle(&mut rng);
        Ok(members)
    }

    fn live_version(
        snap: &rocksdb::SnapshotWithThreadMode<'_, crate::filter::Db>,
        meta_cf: &Arc<rocksdb::BoundColumnFamily<'_>>,
        key: &[u8],
        now: i64,
    ) -> Result<Option<u32>> {
        match snap.get_cf(meta_cf, key)? {
            None => Ok(None),
            Some(bytes) => {
                let meta = MetaValue::decode(&bytes)?;
                if meta.is_stale(now) || meta.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(meta.version))
                }
            }
        }
    }

    /// Members of the first set absent from every other set.
    pub fn sdiff(&self, keys: &[Vec<u8>]) -> Result<Vec<Vec<u8>>> {
        if keys.is_empty() {
            return Err(Error::Corruption(
                "SDiff invalid parameter, no keys".to_string(),
            ));
        }

        let db = &self.core.db;
        let snap = db.snapshot();
        let meta_cf = cf(db, META_CF)?;
        let data_cf = cf(db, DATA_CF)?;
        let now = unix_seconds();

        let mut exclude = Vec::new();
        for key in &keys[1..] {
            if let Some(version) = Self::live_version(&snap, &meta_cf, key, now)? {
                exclude.push(KeyVersion {
                    key: key.clone(),
                    version,
                });
            }
        }

        let mut members = Vec::new();
        if let Some(version) = Self::live_version(&snap, &meta_cf, &keys[0], now)? {
            let prefix = version_prefix(&keys[0], version);
            for item in snap.iterator_cf(&data_cf, IteratorMode::From(&prefix, Direction::Forward))
            {
                let (data_key, _) = item?;
                if !data_key.starts_with(&prefix) {
                    break;
                }
                let member = parse_data_key(&data_key)?.suffix();
                let mut found = false;
                for kv in &exclude {
                    let probe = encode_data_key(&kv.key, kv.version, member);
                    if snap.get_cf(&data_cf, &probe)?.is_some() {
                        found = true;
                        break;
                    }
                }
                if !found {
                    members.push(member.to_vec());
                }
            }
        }
        Ok(members)
    }

    /// Members present in every set. A single absent or dead input
    /// short-circuits to empty.
    pub fn sinter(&self, keys: &[Vec<u8>]) -> Result<Vec<Vec<u8>>> {
        if keys.is_empty() {
            return Err(Error::Corruption(
                "SInter invalid parameter, no keys".to_string(),
            ));
        }

        let db = &self.core.db;
        let snap = db.snapshot();
        let meta_cf = cf(db, META_CF)?;
        let data_cf = cf(db, DATA_CF)?;
        let now = unix_seconds();

        let mut others = Vec::new();
        for key in &keys[1..] {
            match Self::live_version(&snap, &meta_cf, key, now)? {
                Some(version) => others.push(KeyVersion {
                    key: key.clone(),
                    version,
                }),
                None => return Ok(Vec::new()),
            }
        }

        let Some(version) = Self::live_version(&snap, &meta_cf, &keys[0], now)? else {
            return Ok(Vec::new());
        };
        let prefix = version_prefix(&keys[0], version);
        let mut members = Vec::new();
        for item in snap.iterator_cf(&data_cf, IteratorMode::From(&prefix, Direction::Forward)) {
            let (data_key, _) = item?;
            if !data_key.starts_with(&prefix) {
                break;
            }
            let member = parse_data_key(&data_key)?.suffix();
            let mut in_all = true;
            for kv in &others {
                let probe = encode_data_key(&kv.key, kv.version, member);
                if snap.get_cf(&data_cf, &probe)?.is_none() {
                    in_all = false;
                    break;
                }
            }
            if in_all {
                members.push(member.to_vec());
            }
        }
        Ok(members)
    }

    /// Union of all sets, deduplicated in first-seen order.
    pub fn sunion(&self, keys: &[Vec<u8>]) -> Result<Vec<Vec<u8>>> {
        if keys.is_empty() {
            return Err(Error::Corruption(
                "SUnion invalid parameter, no keys".to_string(),
            ));
        }

        let db = &self.core.db;
        let snap = db.snapshot();
        let meta_cf = cf(db, META_CF)?;
        let data_cf = cf(db, DATA_CF)?;
        let now = unix_seconds();

        let mut inputs = Vec::new();
        for key in keys {
            if let Some(version) = Self::live_version(&snap, &meta_cf, key, now)? {
                inputs.push(KeyVersion {
                    key: key.clone(),
                    version,
                });
            }
        }

        let mut members = Vec::new();
        let mut visited = HashSet::new();
        for kv in &inputs {
            let prefix = version_prefix(&kv.key, kv.version);
            for item in snap.iterator_cf(&data_cf, IteratorMode::From(&prefix, Direction::Forward))
            {
                let (data_key, _) = item?;
                if !data_key.starts_with(&prefix) {
                    break;
                }
                let member = parse_data_key(&data_key)?.suffix();
                if visited.insert(member.to_vec()) {
                    members.push(member.to_vec());
                }
            }
        }
        Ok(members)
    }

    /// Replaces `destination` with the given members under its record
    /// lock; any prior incarnation is version-bumped away and its size
    /// recorded as a compaction hint.
    fn store_members(&self, destination: &[u8], members: &[Vec<u8>]) -> Result<i32> {
        let db = &self.core.db;
        let meta_cf = cf(db, META_CF)?;
        let data_cf = cf(db, DATA_CF)?;
        let mut batch = WriteBatch::default();
        let now = unix_seconds();

        let mut statistic = 0u64;
        let version = match db.get_cf(&meta_cf, destination)? {
            Some(bytes) => {
                let mut meta = MetaValue::decode(&bytes)?;
                statistic = u64::from(meta.count);
                let version = meta.initial_meta_value(now);
                meta.count = members.len() as u32;
                batch.put_cf(&meta_cf, destination, meta.encode());
                version
            }
            None => {
                let mut meta = MetaValue::new(members.len() as u32);
                let version = meta.update_version(now);
                batch.put_cf(&meta_cf, destination, meta.encode());
                version
            }
        };
        for member in members {
            batch.put_cf(&data_cf, encode_data_key(destination, version, member), []);
        }
        db.write(batch)?;
        self.core.update_key_statistics(destination, statistic);
        Ok(members.len() as i32)
    }

    pub fn sdiffstore(&self, destination: &[u8], keys: &[Vec<u8>]) -> Result<i32> {
        if keys.is_empty() {
            return Err(Error::Corruption(
                "SDiffstore invalid parameter, no keys".to_string(),
            ));
        }
        let _guard = self.core.lock_mgr.lock(destination);
        let members = self.sdiff(keys)?;
        self.store_members(destination, &members)
    }

    pub fn sinterstore(&self, destination: &[u8], keys: &[Vec<u8>]) -> Result<i32> {
        if keys.is_empty() {
            return Err(Error::Corruption(
                "SInterstore invalid parameter, no keys".to_string(),
            ));
        }
        let _guard = self.core.lock_mgr.lock(destination);
        let members = self.sinter(keys)?;
        self.store_members(destination, &members)
    }

    pub fn sunionstore(&self, destination: &[u8], keys: &[Vec<u8>]) -> Result<i32> {
        if keys.is_empty() {
            return Err(Error::Corruption(
                "SUnionstore invalid parameter, no keys".to_string(),
            ));
        }
        let _guard = self.core.lock_mgr.lock(destination);
        let members = self.sunion(keys)?;
        self.store_members(destination, &members)
    }

    /// Resumable member iteration. Cursor 0 starts fresh; other cursors
    /// resolve through the continuation cache (a miss restarts). Returns
    /// the matched members and the next cursor, 0 when exhausted.
    pub fn sscan(
        &self,
        key: &[u8],
        cursor: i64,
        pattern: &[u8],
        count: i64,
    ) -> Result<(Vec<Vec<u8>>, i64)> {
        if cursor < 0 {
            return Ok((Vec::new(), 0));
        }

        let db = &self.core.db;
        let snap = db.snapshot();
        let meta_cf = cf(db, META_CF)?;
        let data_cf = cf(db, DATA_CF)?;
        let now = unix_seconds();

        let Some(bytes) = snap.get_cf(&meta_cf, key)? else {
            return Err(Error::not_found());
        };
        let meta = MetaValue::decode(&bytes)?;
        if meta.is_stale(now) || meta.is_empty() {
            return Err(Error::not_found());
        }

        let tail_prefix: &[u8] = if is_tail_wildcard(pattern) {
            &pattern[..pattern.len() - 1]
        } else {
            &[]
        };
        let start_point = match self.core.get_scan_start_point(key, pattern, cursor) {
            Some(point) if cursor != 0 => point,
            _ => tail_prefix.to_vec(),
        };

        let prefix = encode_data_key(key, meta.version, tail_prefix);
        let seek = encode_data_key(key, meta.version, &start_point);
        let mut members = Vec::new();
        let mut rest = count;
        let mut iter = snap
            .iterator_cf(&data_cf, IteratorMode::From(&seek, Direction::Forward))
            .peekable();
        while rest > 0 {
            let Some(item) = iter.next() else {
                break;
            };
            let (data_key, _) = item?;
            if !data_key.starts_with(&prefix) {
                break;
            }
            let member = parse_data_key(&data_key)?.suffix();
            if string_match(pattern, member) {
                members.push(member.to_vec());
            }
            rest -= 1;
        }

        let mut next_cursor = 0;
        if let Some(Ok((data_key, _))) = iter.peek() {
            if data_key.starts_with(&prefix) {
                next_cursor = cursor + count;
                let next_member = parse_data_key(data_key)?.suffix().to_vec();
                self.core
                    .store_scan_next_point(key, pattern, next_cursor, next_member);
            }
        }
        Ok((members, next_cursor))
    }
}

delegate_type_engine!(SetsEngine, DataType::Sets);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TypeEngine;
    use crate::store::bgtask::TaskQueue;
    use tempfile::TempDir;

    fn create_engine() -> (SetsEngine, TempDir) {
        let dir = TempDir::new().unwrap();
        let engine = SetsEngine::open(
            &Options::default(),
            dir.path(),
            Arc::new(TaskQueue::new()),
        )
        .unwrap();
        (engine, dir)
    }

    fn members_of(values: &[&str]) -> Vec<Vec<u8>> {
        values.iter().map(|v| v.as_bytes().to_vec()).collect()
    }

    #[test]
    fn test_sadd_and_smembers() {
        let (engine, _dir) = create_engine();

        assert_eq!(engine.sadd(b"k", &members_of(&["a", "b", "c"])).unwrap(), 3);
        let mut members = engine.smembers(b"k").unwrap();
        members.sort();
        assert_eq!(members, members_of(&["a", "b", "c"]));
    }

    #[test]
    fn test_sadd_dedups_input() {
        let (engine, _dir) = create_engine();
        assert_eq!(engine.sadd(b"k", &members_of(&["a", "a", "b"])).unwrap(), 2);
        assert_eq!(engine.scard(b"k").unwrap(), 2);
    }

    #[test]
    fn test_sadd_counts_only_new_members() {
        let (engine, _dir) = create_engine();
        engine.sadd(b"k", &members_of(&["a", "b"])).unwrap();
        assert_eq!(engine.sadd(b"k", &members_of(&["b", "c"])).unwrap(), 1);
        assert_eq!(engine.scard(b"k").unwrap(), 3);
    }

    #[test]
    fn test_scard_matches_smembers_len() {
        let (engine, _dir) = create_engine();
        engine.sadd(b"k", &members_of(&["x", "y", "z"])).unwrap();
        let card = engine.scard(b"k").unwrap() as usize;
        assert_eq!(engine.smembers(b"k").unwrap().len(), card);
    }

    #[test]
    fn test_srem() {
        let (engine, _dir) = create_engine();
        engine.sadd(b"k", &members_of(&["a", "b", "c"])).unwrap();

        assert_eq!(engine.srem(b"k", &members_of(&["a", "x"])).unwrap(), 1);
        assert_eq!(engine.scard(b"k").unwrap(), 2);
        assert!(!engine.sismember(b"k", b"a").unwrap());
        assert!(engine.sismember(b"k", b"b").unwrap());
    }

    #[test]
    fn test_srem_missing_key() {
        let (engine, _dir) = create_engine();
        let err = engine.srem(b"nope", &members_of(&["a"])).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_revival_does_not_inherit_members() {
        let (engine, _dir) = create_engine();
        engine.sadd(b"k", &members_of(&["a", "b"])).unwrap();
        assert_eq!(engine.scard(b"k").unwrap(), 2);

        engine.del(b"k").unwrap();
        assert!(engine.scard(b"k").unwrap_err().is_not_found());

        assert_eq!(engine.sadd(b"k", &members_of(&["c"])).unwrap(), 1);
        assert_eq!(engine.smembers(b"k").unwrap(), members_of(&["c"]));
        assert_eq!(engine.scard(b"k").unwrap(), 1);
    }

    #[test]
    fn test_expire_negative_ttl_deletes() {
        let (engine, _dir) = create_engine();
        engine.sadd(b"k", &members_of(&["a"])).unwrap();
        engine.expire(b"k", -1).unwrap();
        assert!(engine.smembers(b"k").unwrap_err().is_not_found());
    }

    #[test]
    fn test_expired_key_is_stale() {
        let (engine, _dir) = create_engine();
        engine.sadd(b"k", &members_of(&["x"])).unwrap();
        // Expire at a timestamp already in the past.
        engine.expireat(b"k", 1).unwrap();

        let err = engine.sismember(b"k", b"x").unwrap_err();
        assert!(matches!(
            err,
            Error::NotFound {
                reason: Some("Stale")
            }
        ));
        assert!(engine.ttl(b"k").unwrap_err().is_not_found());
    }

    #[test]
    fn test_ttl_reporting() {
        let (engine, _dir) = create_engine();
        engine.sadd(b"k", &members_of(&["x"])).unwrap();
        assert_eq!(engine.ttl(b"k").unwrap(), -1);

        engine.expire(b"k", 100).unwrap();
        let ttl = engine.ttl(b"k").unwrap();
        assert!((90..=100).contains(&ttl), "ttl was {ttl}");

        engine.persist(b"k").unwrap();
        assert_eq!(engine.ttl(b"k").unwrap(), -1);
    }

    #[test]
    fn test_persist_without_timeout() {
        let (engine, _dir) = create_engine();
        engine.sadd(b"k", &members_of(&["x"])).unwrap();
        let err = engine.persist(b"k").unwrap_err();
        assert!(matches!(
            err,
            Error::NotFound {
                reason: Some("Not have an associated timeout")
            }
        ));
    }

    #[test]
    fn test_smove() {
        let (engine, _dir) = create_engine();
        engine.sadd(b"s1", &members_of(&["m"])).unwrap();

        assert_eq!(engine.smove(b"s1", b"s2", b"m").unwrap(), 1);
        assert!(engine.sismember(b"s1", b"m").unwrap_err().is_not_found());
        assert!(engine.sismember(b"s2", b"m").unwrap());
    }

    #[test]
    fn test_smove_same_key() {
        let (engine, _dir) = create_engine();
        engine.sadd(b"s", &members_of(&["m"])).unwrap();
        assert_eq!(engine.smove(b"s", b"s", b"m").unwrap(), 1);
        assert!(engine.sismember(b"s", b"m").unwrap());
    }

    #[test]
    fn test_smove_missing_member() {
        let (engine, _dir) = create_engine();
        engine.sadd(b"s1", &members_of(&["m"])).unwrap();
        engine.sadd(b"s2", &members_of(&["n"])).unwrap();
        assert!(engine.smove(b"s1", b"s2", b"x").unwrap_err().is_not_found());
        assert_eq!(engine.scard(b"s2").unwrap(), 1);
    }

    #[test]
    fn test_spop_until_empty() {
        let (engine, _dir) = create_engine();
        engine.sadd(b"k", &members_of(&["a", "b", "c"])).unwrap();

        let mut popped = Vec::new();
        for _ in 0..3 {
            let (member, _) = engine.spop(b"k").unwrap();
            popped.push(member);
        }
        popped.sort();
        assert_eq!(popped, members_of(&["a", "b", "c"]));
        assert!(engine.spop(b"k").unwrap_err().is_not_found());
    }

    #[test]
    fn test_srandmember_positive_distinct() {
        let (engine, _dir) = create_engine();
        engine.sadd(b"k", &members_of(&["a", "b", "c", "d"])).unwrap();

        let sampled = engine.srandmember(b"k", 3).unwrap();
        assert_eq!(sampled.len(), 3);
        let unique: HashSet<_> = sampled.iter().collect();
        assert_eq!(unique.len(), 3);

        // More than the cardinality caps at the cardinality.
        assert_eq!(engine.srandmember(b"k", 100).unwrap().len(), 4);
    }

    #[test]
    fn test_srandmember_negative_allows_repeats() {
        let (engine, _dir) = create_engine();
        engine.sadd(b"k", &members_of(&["a"])).unwrap();
        let sampled = engine.srandmember(b"k", -5).unwrap();
        assert_eq!(sampled.len(), 5);
        assert!(sampled.iter().all(|m| m == b"a"));
    }

    #[test]
    fn test_sunion() {
        let (engine, _dir) = create_engine();
        engine.sadd(b"a", &members_of(&["x", "y"])).unwrap();
        engine.sadd(b"b", &members_of(&["y", "z"])).unwrap();

        let mut union = engine
            .sunion(&[b"a".to_vec(), b"b".to_vec(), b"missing".to_vec()])
            .unwrap();
        union.sort();
        assert_eq!(union, members_of(&["x", "y", "z"]));
    }

    #[test]
    fn test_sinter_short_circuits_on_dead_key() {
        let (engine, _dir) = create_engine();
        engine.sadd(b"a", &members_of(&["x", "y"])).unwrap();
        engine.sadd(b"b", &members_of(&["y"])).unwrap();
        engine.del(b"b").unwrap();

        let inter = engine.sinter(&[b"a".to_vec(), b"b".to_vec()]).unwrap();
        assert!(inter.is_empty());
    }

    #[test]
    fn test_sinter() {
        let (engine, _dir) = create_engine();
        engine.sadd(b"a", &members_of(&["x", "y", "z"])).unwrap();
        engine.sadd(b"b", &members_of(&["y", "z"])).unwrap();
        engine.sadd(b"c", &members_of(&["z"])).unwrap();

        let inter = engine
            .sinter(&[b"a".to_vec(), b"b".to_vec(), b"c".to_vec()])
            .unwrap();
        assert_eq!(inter, members_of(&["z"]));
    }

    #[test]
    fn test_sdiff_ignores_missing_exclusions() {
        let (engine, _dir) = create_engine();
        engine.sadd(b"a", &members_of(&["x", "y"])).unwrap();
        engine.sadd(b"b", &members_of(&["y"])).unwrap();

        let mut diff = engine
            .sdiff(&[b"a".to_vec(), b"b".to_vec(), b"missing".to_vec()])
            .unwrap();
        diff.sort();
        assert_eq!(diff, members_of(&["x"]));
    }

    #[test]
    fn test_set_ops_reject_empty_keys() {
        let (engine, _dir) = create_engine();
        assert!(matches!(
            engine.sunion(&[]).unwrap_err(),
            Error::Corruption(_)
        ));
        assert!(matches!(
            engine.sinter(&[]).unwrap_err(),
            Error::Corruption(_)
        ));
        assert!(matches!(engine.sdiff(&[]).unwrap_err(), Error::Corruption(_)));
    }

    #[test]
    fn test_sunionstore_replaces_destination() {
        let (engine, _dir) = create_engine();
        engine.sadd(b"a", &members_of(&["x"])).unwrap();
        engine.sadd(b"b", &members_of(&["y"])).unwrap();
        engine.sadd(b"dest", &members_of(&["old1", "old2"])).unwrap();

        let stored = engine
            .sunionstore(b"dest", &[b"a".to_vec(), b"b".to_vec()])
            .unwrap();
        assert_eq!(stored, 2);
        let mut members = engine.smembers(b"dest").unwrap();
        members.sort();
        assert_eq!(members, members_of(&["x", "y"]));
    }

    #[test]
    fn test_sinterstore_empty_result_kills_destination() {
        let (engine, _dir) = create_engine();
        engine.sadd(b"a", &members_of(&["x"])).unwrap();
        engine.sadd(b"dest", &members_of(&["old"])).unwrap();

        let stored = engine
            .sinterstore(b"dest", &[b"a".to_vec(), b"missing".to_vec()])
            .unwrap();
        assert_eq!(stored, 0);
        assert!(engine.smembers(b"dest").unwrap_err().is_not_found());
    }

    #[test]
    fn test_sscan_resumes_to_full_coverage() {
        let (engine, _dir) = create_engine();
        let all = members_of(&["m1", "m2", "m3", "m4", "m5"]);
        engine.sadd(b"k", &all).unwrap();

        let mut collected = Vec::new();
        let mut cursor = 0;
        loop {
            let (members, next) = engine.sscan(b"k", cursor, b"*", 2).unwrap();
            collected.extend(members);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        collected.sort();
        assert_eq!(collected, all);
    }

    #[test]
    fn test_sscan_with_prefix_pattern() {
        let (engine, _dir) = create_engine();
        engine
            .sadd(b"k", &members_of(&["ax", "ay", "bz"]))
            .unwrap();

        let (members, next) = engine.sscan(b"k", 0, b"a*", 10).unwrap();
        assert_eq!(next, 0);
        let mut members = members;
        members.sort();
        assert_eq!(members, members_of(&["ax", "ay"]));
    }

    #[test]
    fn test_scan_skips_dead_keys() {
        let (engine, _dir) = create_engine();
        engine.sadd(b"alive", &members_of(&["a"])).unwrap();
        engine.sadd(b"dead", &members_of(&["b"])).unwrap();
        engine.del(b"dead").unwrap();

        let keys = engine.scan_keys(b"*").unwrap();
        assert_eq!(keys, vec![b"alive".to_vec()]);
    }

    #[test]
    fn test_pk_scan_range() {
        let (engine, _dir) = create_engine();
        for key in [b"k1".as_slice(), b"k2", b"k3", b"k4"] {
            engine.sadd(key, &members_of(&["m"])).unwrap();
        }

        let (keys, next) = engine.pk_scan_range(b"k2", b"k4", b"*", 2).unwrap();
        assert_eq!(keys, vec![b"k2".to_vec(), b"k3".to_vec()]);
        assert_eq!(next, b"k4".to_vec());

        let (keys, next) = engine.pk_scan_range(b"", b"", b"*", 10).unwrap();
        assert_eq!(keys.len(), 4);
        assert!(next.is_empty());
    }

    #[test]
    fn test_pk_rscan_range() {
        let (engine, _dir) = create_engine();
        for key in [b"k1".as_slice(), b"k2", b"k3"] {
            engine.sadd(key, &members_of(&["m"])).unwrap();
        }

        let (keys, _) = engine.pk_rscan_range(b"k3", b"k1", b"*", 10).unwrap();
        assert_eq!(keys, vec![b"k3".to_vec(), b"k2".to_vec(), b"k1".to_vec()]);

        assert!(matches!(
            engine.pk_rscan_range(b"k1", b"k3", b"*", 10).unwrap_err(),
            Error::InvalidArgument(_)
        ));
    }

    #[test]
    fn test_pk_pattern_match_del() {
        let (engine, _dir) = create_engine();
        engine.sadd(b"user:1", &members_of(&["a"])).unwrap();
        engine.sadd(b"user:2", &members_of(&["b"])).unwrap();
        engine.sadd(b"other", &members_of(&["c"])).unwrap();

        let deleted = engine.pk_pattern_match_del(b"user:*", 100).unwrap();
        assert_eq!(deleted, 2);
        assert!(engine.scard(b"user:1").unwrap_err().is_not_found());
        assert!(engine.scard(b"user:2").unwrap_err().is_not_found());
        assert_eq!(engine.scard(b"other").unwrap(), 1);
    }

    #[test]
    fn test_compaction_drops_orphaned_rows() {
        let (engine, _dir) = create_engine();
        engine.sadd(b"k", &members_of(&["a", "b", "c"])).unwrap();
        engine.del(b"k").unwrap();
        engine.sadd(b"k", &members_of(&["d"])).unwrap();

        // Full compaction runs the data filter to convergence; the old
        // incarnation's rows must be gone, the new one intact.
        engine
            .compact_range(crate::types::ColumnFamilyKind::MetaAndData, None, None)
            .unwrap();

        assert_eq!(engine.smembers(b"k").unwrap(), members_of(&["d"]));
        let data_cf = cf(&engine.core.db, DATA_CF).unwrap();
        let rows: Vec<_> = engine
            .core
            .db
            .iterator_cf(&data_cf, IteratorMode::Start)
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(rows.len(), 1, "orphaned rows survived compaction");
    }

    #[test]
    fn test_scan_key_num() {
        let (engine, _dir) = create_engine();
        engine.sadd(b"a", &members_of(&["m"])).unwrap();
        engine.sadd(b"b", &members_of(&["m"])).unwrap();
        engine.expire(b"b", 100).unwrap();
        engine.sadd(b"c", &members_of(&["m"])).unwrap();
        engine.del(b"c").unwrap();

        let stop = std::sync::atomic::AtomicBool::new(false);
        let info = engine.scan_key_num(&stop).unwrap();
        assert_eq!(info.keys, 2);
        assert_eq!(info.expires, 1);
        assert_eq!(info.invalid_keys, 1);
    }
}
