// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! List engine.
//!
//! Elements are keyed by a 64-bit index in big-endian, so data-key order is
//! list order. The index space is sparse: pushes move the head or tail
//! anchor by [`LIST_INDEX_STEP`], and LINSERT allocates the midpoint
//! between the pivot and its neighbor. Indices are never reused or
//! rebalanced within an incarnation; a fully exhausted gap is an error.
//! Positional reads walk the version prefix.

use std::path::Path;
use std::sync::Arc;

use rocksdb::{Direction, IteratorMode, WriteBatch};

use crate::codec::{
    encode_data_key, parse_data_key, version_prefix, ListsMetaValue, INITIAL_LIST_INDEX,
};
use crate::engine::{cf, delegate_type_engine, EngineCore, DATA_CF, META_CF};
use crate::error::{Error, Result};
use crate::options::Options;
use crate::store::bgtask::TaskQueue;
use crate::types::{BeforeOrAfter, DataType};
use crate::util::{prefix_successor, unix_seconds};

/// Gap between indices allocated by pushes. Each LINSERT between the same
/// neighbors halves the remaining gap, so this allows ~20 nested inserts.
const LIST_INDEX_STEP: u64 = 1 << 20;

pub struct ListsEngine {
    pub(crate) core: EngineCore,
}

impl ListsEngine {
    pub(crate) fn open(opts: &Options, path: &Path, tasks: Arc<TaskQueue>) -> Result<Self> {
        let core = EngineCore::open_composite(opts, path, DataType::Lists, &[DATA_CF], tasks)?;
        Ok(Self { core })
    }

    fn read_live_meta(&self, key: &[u8], now: i64) -> Result<ListsMetaValue> {
        let meta_cf = cf(&self.core.db, META_CF)?;
        match self.core.db.get_cf(&meta_cf, key)? {
            None => Err(Error::not_found()),
            Some(bytes) => {
                let lm = ListsMetaValue::decode(&bytes)?;
                if lm.meta.is_stale(now) {
                    Err(Error::not_found_because("Stale"))
                } else if lm.meta.is_empty() {
                    Err(Error::not_found())
                } else {
                    Ok(lm)
                }
            }
        }
    }

    fn push(&self, key: &[u8], values: &[Vec<u8>], left: bool, require_exists: bool) -> Result<u64> {
        let db = &self.core.db;
        let meta_cf = cf(db, META_CF)?;
        let data_cf = cf(db, DATA_CF)?;
        let mut batch = WriteBatch::default();
        let _guard = self.core.lock_mgr.lock(key);
        let now = unix_seconds();

        let existing = db.get_cf(&meta_cf, key)?;
        let mut lm = match &existing {
            Some(bytes) => ListsMetaValue::decode(bytes)?,
            None => ListsMetaValue::new(),
        };
        let alive = existing.is_some() && !lm.meta.is_stale(now) && !lm.meta.is_empty();
        if !alive {
            if require_exists {
                return Err(Error::not_found());
            }
            if existing.is_some() {
                lm.initial_meta_value(now);
            } else {
                lm.meta.update_version(now);
            }
        }

        let version = lm.meta.version;
        for value in values {
            let index = if lm.meta.count == 0 {
                INITIAL_LIST_INDEX
            } else if left {
                lm.head_index - LIST_INDEX_STEP
            } else {
                lm.tail_index + LIST_INDEX_STEP
            };
            if lm.meta.count == 0 {
                lm.head_index = index;
                lm.tail_index = index;
            } else if left {
                lm.head_index = index;
            } else {
                lm.tail_index = index;
            }
            lm.meta.modify_count(1);
            batch.put_cf(&data_cf, encode_data_key(key, version, &index.to_be_bytes()), value);
        }
        batch.put_cf(&meta_cf, key, lm.encode());
        db.write(batch)?;
        Ok(u64::from(lm.meta.count))
    }

    /// Prepends values; returns the new length.
    pub fn lpush(&self, key: &[u8], values: &[Vec<u8>]) -> Result<u64> {
        self.push(key, values, true, false)
    }

    /// Appends values; returns the new length.
    pub fn rpush(&self, key: &[u8], values: &[Vec<u8>]) -> Result<u64> {
        self.push(key, values, false, false)
    }

    /// Prepends only to an existing list.
    pub fn lpushx(&self, key: &[u8], value: &[u8]) -> Result<u64> {
        self.push(key, &[value.to_vec()], true, true)
    }

    /// Appends only to an existing list.
    pub fn rpushx(&self, key: &[u8], value: &[u8]) -> Result<u64> {
        self.push(key, &[value.to_vec()], false, true)
    }

    /// First two rows (element and its successor) from one end of the
    /// current incarnation.
    fn edge_rows(&self, key: &[u8], version: u32, left: bool) -> Result<Vec<(u64, Vec<u8>)>> {
        let db = &self.core.db;
        let data_cf = cf(db, DATA_CF)?;
        let prefix = version_prefix(key, version);
        let upper = prefix_successor(prefix.clone());
        let mode = if left {
            IteratorMode::From(&prefix, Direction::Forward)
        } else {
            match upper.as_deref() {
                Some(bound) => IteratorMode::From(bound, Direction::Reverse),
                None => IteratorMode::End,
            }
        };

        let mut rows = Vec::with_capacity(2);
        for item in db.iterator_cf(&data_cf, mode) {
            if rows.len() >= 2 {
                break;
            }
            let (data_key, value) = item?;
            if !data_key.starts_with(&prefix) {
                break;
            }
            let suffix = parse_data_key(&data_key)?.suffix();
            let index = u64::from_be_bytes(suffix.try_into().map_err(|_| {
                Error::Corruption("list data key has malformed index".to_string())
            })?);
            rows.push((index, value.to_vec()));
        }
        Ok(rows)
    }

    fn pop(&self, key: &[u8], left: bool) -> Result<Vec<u8>> {
        let db = &self.core.db;
        let meta_cf = cf(db, META_CF)?;
        let data_cf = cf(db, DATA_CF)?;
        let mut batch = WriteBatch::default();
        let _guard = self.core.lock_mgr.lock(key);
        let now = unix_seconds();

        let mut lm = self.read_live_meta(key, now)?;
        let version = lm.meta.version;
        let rows = self.edge_rows(key, version, left)?;
        let Some((index, element)) = rows.first().cloned() else {
            return Err(Error::not_found());
        };

        batch.delete_cf(&data_cf, encode_data_key(key, version, &index.to_be_bytes()));
        lm.meta.modify_count(-1);
        if lm.meta.count == 0 {
            lm.head_index = INITIAL_LIST_INDEX;
            lm.tail_index = INITIAL_LIST_INDEX;
        } else {
            // The neighbor we iterated past becomes the new edge.
            let neighbor = rows
                .get(1)
                .map(|(idx, _)| *idx)
                .ok_or_else(|| Error::Corruption("list count does not match rows".to_string()))?;
            if left {
                lm.head_index = neighbor;
            } else {
                lm.tail_index = neighbor;
            }
        }
        batch.put_cf(&meta_cf, key, lm.encode());
        db.write(batch)?;
        self.core.update_key_statistics(key, 1);
        Ok(element)
    }

    pub fn lpop(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.pop(key, true)
    }

    pub fn rpop(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.pop(key, false)
    }

    pub fn llen(&self, key: &[u8]) -> Result<u64> {
        let lm = self.read_live_meta(key, unix_seconds())?;
        Ok(u64::from(lm.meta.count))
    }

    /// Elements at positions `[start, stop]`, negative positions counting
    /// from the tail.
    pub fn lrange(&self, key: &[u8], start: i64, stop: i64) -> Result<Vec<Vec<u8>>> {
        let db = &self.core.db;
        let snap = db.snapshot();
        let data_cf = cf(db, DATA_CF)?;
        let now = unix_seconds();
        let lm = self.read_live_meta(key, now)?;

        let count = i64::from(lm.meta.count);
        let start = if start < 0 { (count + start).max(0) } else { start };
        let stop = if stop < 0 { count + stop } else { stop.min(count - 1) };
        if start > stop || start >= count {
            return Ok(Vec::new());
        }

        let prefix = version_prefix(key, lm.meta.version);
        let mut elements = Vec::with_capacity((stop - start + 1) as usize);
        for (position, item) in snap
            .iterator_cf(&data_cf, IteratorMode::From(&prefix, Direction::Forward))
            .enumerate()
        {
            let (data_key, value) = item?;
            if !data_key.starts_with(&prefix) || position as i64 > stop {
                break;
            }
            if (position as i64) >= start {
                elements.push(value.to_vec());
            }
        }
        Ok(elements)
    }

    /// Walks the version prefix to logical position `position`, returning
    /// the row's data key and value.
    fn row_at(&self, key: &[u8], lm: &ListsMetaValue, index: i64) -> Result<(Vec<u8>, Vec<u8>)> {
        let count = i64::from(lm.meta.count);
        let position = if index < 0 { count + index } else { index };
        if position < 0 || position >= count {
            return Err(Error::Corruption("index out of range".to_string()));
        }

        let db = &self.core.db;
        let data_cf = cf(db, DATA_CF)?;
        let prefix = version_prefix(key, lm.meta.version);
        for (at, item) in db
            .iterator_cf(&data_cf, IteratorMode::From(&prefix, Direction::Forward))
            .enumerate()
        {
            let (data_key, value) = item?;
            if !data_key.starts_with(&prefix) {
                break;
            }
            if at as i64 == position {
                return Ok((data_key.to_vec(), value.to_vec()));
            }
        }
        Err(Error::Corruption("index out of range".to_string()))
    }

    pub fn lindex(&self, key: &[u8], index: i64) -> Result<Vec<u8>> {
        let now = unix_seconds();
        let lm = self.read_live_meta(key, now)?;
        match self.row_at(key, &lm, index) {
            Ok((_, value)) => Ok(value),
            Err(Error::Corruption(_)) => Err(Error::not_found()),
            Err(e) => Err(e),
        }
    }

    /// Overwrites the element at `index`.
    pub fn lset(&self, key: &[u8], index: i64, value: &[u8]) -> Result<()> {
        let db = &self.core.db;
        let data_cf = cf(db, DATA_CF)?;
        let _guard = self.core.lock_mgr.lock(key);
        let now = unix_seconds();
        let lm = self.read_live_meta(key, now)?;
        let (data_key, _) = self.row_at(key, &lm, index)?;
        db.put_cf(&data_cf, data_key, value)?;
        Ok(())
    }

    /// Inserts `value` before or after the first occurrence of `pivot`,
    /// allocating the midpoint index between the pivot and its neighbor.
    /// Returns the new length, or -1 when the pivot is absent.
    pub fn linsert(
        &self,
        key: &[u8],
        side: BeforeOrAfter,
        pivot: &[u8],
        value: &[u8],
    ) -> Result<i64> {
        let db = &self.core.db;
        let meta_cf = cf(db, META_CF)?;
        let data_cf = cf(db, DATA_CF)?;
        let mut batch = WriteBatch::default();
        let _guard = self.core.lock_mgr.lock(key);
        let now = unix_seconds();

        let mut lm = self.read_live_meta(key, now)?;
        let version = lm.meta.version;
        let prefix = version_prefix(key, version);

        let mut prev_index: Option<u64> = None;
        let mut pivot_index: Option<u64> = None;
        let mut next_index: Option<u64> = None;
        for item in db.iterator_cf(&data_cf, IteratorMode::From(&prefix, Direction::Forward)) {
            let (data_key, row_value) = item?;
            if !data_key.starts_with(&prefix) {
                break;
            }
            let suffix = parse_data_key(&data_key)?.suffix();
            let index = u64::from_be_bytes(suffix.try_into().map_err(|_| {
                Error::Corruption("list data key has malformed index".to_string())
            })?);
            match pivot_index {
                None => {
                    if row_value.as_ref() == pivot {
                        pivot_index = Some(index);
                    } else {
                        prev_index = Some(index);
                    }
                }
                Some(_) => {
                    next_index = Some(index);
                    break;
                }
            }
        }
        let Some(pivot_index) = pivot_index else {
            return Ok(-1);
        };

        let new_index = match side {
            BeforeOrAfter::Before => match prev_index {
                None => {
                    let index = pivot_index - LIST_INDEX_STEP;
                    lm.head_index = index;
                    index
                }
                Some(prev) => {
                    let mid = prev + (pivot_index - prev) / 2;
                    if mid == prev {
                        return Err(Error::Corruption(
                            "no index space between neighbors".to_string(),
                        ));
                    }
                    mid
                }
            },
            BeforeOrAfter::After => match next_index {
                None => {
                    let index = pivot_index + LIST_INDEX_STEP;
                    lm.tail_index = index;
                    index
                }
                Some(next) => {
                    let mid = pivot_index + (next - pivot_index) / 2;
                    if mid == pivot_index {
                        return Err(Error::Corruption(
                            "no index space between neighbors".to_string(),
                        ));
                    }
                    mid
                }
            },
        };

        lm.meta.modify_count(1);
        batch.put_cf(&data_cf, encode_data_key(key, version, &new_index.to_be_bytes()), value);
        batch.put_cf(&meta_cf, key, lm.encode());
        db.write(batch)?;
        Ok(i64::from(lm.meta.count))
    }

    /// Keeps only positions `[start, stop]`, deleting the rest in one
    /// batch.
    pub fn ltrim(&self, key: &[u8], start: i64, stop: i64) -> Result<()> {
        let db = &self.core.db;
        let meta_cf = cf(db, META_CF)?;
        let data_cf = cf(db, DATA_CF)?;
        let mut batch = WriteBatch::default();
        let _guard = self.core.lock_mgr.lock(key);
        let now = unix_seconds();

        let mut lm = self.read_live_meta(key, now)?;
        let count = i64::from(lm.meta.count);
        let start = if start < 0 { (count + start).max(0) } else { start };
        let stop = if stop < 0 { count + stop } else { stop.min(count - 1) };

        let version = lm.meta.version;
        let prefix = version_prefix(key, version);
        let mut kept = 0u32;
        let mut deleted = 0u64;
        let mut first_kept: Option<u64> = None;
        let mut last_kept: Option<u64> = None;
        for (position, item) in db
            .iterator_cf(&data_cf, IteratorMode::From(&prefix, Direction::Forward))
            .enumerate()
        {
            let (data_key, _) = item?;
            if !data_key.starts_with(&prefix) {
                break;
            }
            let position = position as i64;
            if position < start || position > stop {
                batch.delete_cf(&data_cf, &data_key);
                deleted += 1;
            } else {
                let suffix = parse_data_key(&data_key)?.suffix();
                let index = u64::from_be_bytes(suffix.try_into().map_err(|_| {
                    Error::Corruption("list data key has malformed index".to_string())
                })?);
                if first_kept.is_none() {
                    first_kept = Some(index);
                }
                last_kept = Some(index);
                kept += 1;
            }
        }

        lm.meta.count = kept;
        match (first_kept, last_kept) {
            (Some(head), Some(tail)) => {
                lm.head_index = head;
                lm.tail_index = tail;
            }
            _ => {
                lm.head_index = INITIAL_LIST_INDEX;
                lm.tail_index = INITIAL_LIST_INDEX;
            }
        }
        batch.put_cf(&meta_cf, key, lm.encode());
        db.write(batch)?;
        self.core.update_key_statistics(key, deleted);
        Ok(())
    }

    /// Removes occurrences of `value`: the first `count` from the head
    /// when positive, the last `|count|` from the tail when negative, all
    /// when zero. Returns how many were removed.
    pub fn lrem(&self, key: &[u8], count: i64, value: &[u8]) -> Result<u64> {
        let db = &self.core.db;
        let meta_cf = cf(db, META_CF)?;
        let data_cf = cf(db, DATA_CF)?;
        let mut batch = WriteBatch::default();
        let _guard = self.core.lock_mgr.lock(key);
        let now = unix_seconds();

        let mut lm = self.read_live_meta(key, now)?;
        let version = lm.meta.version;
        let prefix = version_prefix(key, version);

        let mut rows: Vec<(u64, bool)> = Vec::with_capacity(lm.meta.count as usize);
        for item in db.iterator_cf(&data_cf, IteratorMode::From(&prefix, Direction::Forward)) {
            let (data_key, row_value) = item?;
            if !data_key.starts_with(&prefix) {
                break;
            }
            let suffix = parse_data_key(&data_key)?.suffix();
            let index = u64::from_be_bytes(suffix.try_into().map_err(|_| {
                Error::Corruption("list data key has malformed index".to_string())
            })?);
            rows.push((index, row_value.as_ref() == value));
        }

        let matches: Vec<usize> = rows
            .iter()
            .enumerate()
            .filter(|(_, (_, matched))| *matched)
            .map(|(at, _)| at)
            .collect();
        let to_remove: Vec<usize> = if count > 0 {
            matches.iter().take(count as usize).copied().collect()
        } else if count < 0 {
            let wanted = count.unsigned_abs() as usize;
            matches
                .iter()
                .rev()
                .take(wanted)
                .copied()
                .collect()
        } else {
            matches
        };

        if to_remove.is_empty() {
            return Ok(0);
        }
        let removing: std::collections::HashSet<usize> = to_remove.iter().copied().collect();
        let mut first_kept: Option<u64> = None;
        let mut last_kept: Option<u64> = None;
        for (at, (index, _)) in rows.iter().enumerate() {
            if removing.contains(&at) {
                batch.delete_cf(&data_cf, encode_data_key(key, version, &index.to_be_bytes()));
            } else {
                if first_kept.is_none() {
                    first_kept = Some(*index);
                }
                last_kept = Some(*index);
            }
        }

        let removed = removing.len() as u64;
        lm.meta.modify_count(-(removed as i64));
        match (first_kept, last_kept) {
            (Some(head), Some(tail)) => {
                lm.head_index = head;
                lm.tail_index = tail;
            }
            _ => {
                lm.head_index = INITIAL_LIST_INDEX;
                lm.tail_index = INITIAL_LIST_INDEX;
            }
        }
        batch.put_cf(&meta_cf, key, lm.encode());
        db.write(batch)?;
        self.core.update_key_statistics(key, removed);
        Ok(removed)
    }

    /// Pops the tail of `source` and pushes it onto the head of
    /// `destination` in one atomic batch. With `source == destination`
    /// this rotates the list.
    pub fn rpoplpush(&self, source: &[u8], destination: &[u8]) -> Result<Vec<u8>> {
        let db = &self.core.db;
        let meta_cf = cf(db, META_CF)?;
        let data_cf = cf(db, DATA_CF)?;
        let mut batch = WriteBatch::default();
        let _guard = self.core.lock_mgr.lock_many(&[source, destination]);
        let now = unix_seconds();

        let mut src = self.read_live_meta(source, now)?;
        let src_version = src.meta.version;
        let rows = self.edge_rows(source, src_version, false)?;
        let Some((tail_index, element)) = rows.first().cloned() else {
            return Err(Error::not_found());
        };
        batch.delete_cf(
            &data_cf,
            encode_data_key(source, src_version, &tail_index.to_be_bytes()),
        );

        if source == destination {
            // Rotate: the popped element re-enters at a fresh head index.
            let new_index = src.head_index - LIST_INDEX_STEP;
            batch.put_cf(
                &data_cf,
                encode_data_key(source, src_version, &new_index.to_be_bytes()),
                &element,
            );
            src.head_index = new_index;
            if src.meta.count == 1 {
                src.tail_index = new_index;
            } else {
                src.tail_index = rows
                    .get(1)
                    .map(|(idx, _)| *idx)
                    .ok_or_else(|| Error::Corruption("list count does not match rows".to_string()))?;
            }
            batch.put_cf(&meta_cf, source, src.encode());
            db.write(batch)?;
            return Ok(element);
        }

        src.meta.modify_count(-1);
        if src.meta.count == 0 {
            src.head_index = INITIAL_LIST_INDEX;
            src.tail_index = INITIAL_LIST_INDEX;
        } else {
            src.tail_index = rows
                .get(1)
                .map(|(idx, _)| *idx)
                .ok_or_else(|| Error::Corruption("list count does not match rows".to_string()))?;
        }
        batch.put_cf(&meta_cf, source, src.encode());

        let existing = db.get_cf(&meta_cf, destination)?;
        let mut dst = match &existing {
            Some(bytes) => ListsMetaValue::decode(bytes)?,
            None => ListsMetaValue::new(),
        };
        let alive = existing.is_some() && !dst.meta.is_stale(now) && !dst.meta.is_empty();
        if !alive {
            if existing.is_some() {
                dst.initial_meta_value(now);
            } else {
                dst.meta.update_version(now);
            }
        }
        let dst_index = if dst.meta.count == 0 {
            INITIAL_LIST_INDEX
        } else {
            dst.head_index - LIST_INDEX_STEP
        };
        if dst.meta.count == 0 {
            dst.tail_index = dst_index;
        }
        dst.head_index = dst_index;
        dst.meta.modify_count(1);
        batch.put_cf(
            &data_cf,
            encode_data_key(destination, dst.meta.version, &dst_index.to_be_bytes()),
            &element,
        );
        batch.put_cf(&meta_cf, destination, dst.encode());
        db.write(batch)?;
        self.core.update_key_statistics(source, 1);
        Ok(element)
    }
}

delegate_type_engine!(ListsEngine, DataType::Lists);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TypeEngine;
    use tempfile::TempDir;

    fn create_engine() -> (ListsEngine, TempDir) {
        let dir = TempDir::new().unwrap();
        let engine = ListsEngine::open(
            &Options::default(),
            dir.path(),
            Arc::new(TaskQueue::new()),
        )
        .unwrap();
        (engine, dir)
    }

    fn values(items: &[&str]) -> Vec<Vec<u8>> {
        items.iter().map(|v| v.as_bytes().to_vec()).collect()
    }

    #[test]
    fn test_push_pop_order() {
        let (engine, _dir) = create_engine();
        assert_eq!(engine.rpush(b"l", &values(&["a", "b", "c"])).unwrap(), 3);
        assert_eq!(engine.lpush(b"l", &values(&["z"])).unwrap(), 4);

        assert_eq!(engine.lpop(b"l").unwrap(), b"z");
        assert_eq!(engine.rpop(b"l").unwrap(), b"c");
        assert_eq!(engine.lpop(b"l").unwrap(), b"a");
        assert_eq!(engine.lpop(b"l").unwrap(), b"b");
        assert!(engine.lpop(b"l").unwrap_err().is_not_found());
    }

    #[test]
    fn test_lpush_ordering() {
        let (engine, _dir) = create_engine();
        // Each value is pushed to the head in turn: final order c, b, a.
        engine.lpush(b"l", &values(&["a", "b", "c"])).unwrap();
        assert_eq!(engine.lrange(b"l", 0, -1).unwrap(), values(&["c", "b", "a"]));
    }

    #[test]
    fn test_llen() {
        let (engine, _dir) = create_engine();
        assert!(engine.llen(b"l").unwrap_err().is_not_found());
        engine.rpush(b"l", &values(&["a", "b"])).unwrap();
        assert_eq!(engine.llen(b"l").unwrap(), 2);
    }

    #[test]
    fn test_lrange_negative_indices() {
        let (engine, _dir) = create_engine();
        engine.rpush(b"l", &values(&["a", "b", "c", "d"])).unwrap();

        assert_eq!(engine.lrange(b"l", 0, -1).unwrap(), values(&["a", "b", "c", "d"]));
        assert_eq!(engine.lrange(b"l", -2, -1).unwrap(), values(&["c", "d"]));
        assert_eq!(engine.lrange(b"l", 1, 2).unwrap(), values(&["b", "c"]));
        assert!(engine.lrange(b"l", 5, 10).unwrap().is_empty());
    }

    #[test]
    fn test_lindex() {
        let (engine, _dir) = create_engine();
        engine.rpush(b"l", &values(&["a", "b", "c"])).unwrap();

        assert_eq!(engine.lindex(b"l", 0).unwrap(), b"a");
        assert_eq!(engine.lindex(b"l", 2).unwrap(), b"c");
        assert_eq!(engine.lindex(b"l", -1).unwrap(), b"c");
        assert!(engine.lindex(b"l", 3).unwrap_err().is_not_found());
    }

    #[test]
    fn test_lset() {
        let (engine, _dir) = create_engine();
        engine.rpush(b"l", &values(&["a", "b", "c"])).unwrap();

        engine.lset(b"l", 1, b"B").unwrap();
        engine.lset(b"l", -1, b"C").unwrap();
        assert_eq!(engine.lrange(b"l", 0, -1).unwrap(), values(&["a", "B", "C"]));
        assert!(matches!(
            engine.lset(b"l", 9, b"x").unwrap_err(),
            Error::Corruption(_)
        ));
    }

    #[test]
    fn test_pushx_requires_existing() {
        let (engine, _dir) = create_engine();
        assert!(engine.lpushx(b"l", b"a").unwrap_err().is_not_found());
        assert!(engine.rpushx(b"l", b"a").unwrap_err().is_not_found());

        engine.rpush(b"l", &values(&["m"])).unwrap();
        assert_eq!(engine.lpushx(b"l", b"h").unwrap(), 2);
        assert_eq!(engine.rpushx(b"l", b"t").unwrap(), 3);
        assert_eq!(engine.lrange(b"l", 0, -1).unwrap(), values(&["h", "m", "t"]));
    }

    #[test]
    fn test_linsert() {
        let (engine, _dir) = create_engine();
        engine.rpush(b"l", &values(&["a", "c"])).unwrap();

        assert_eq!(
            engine.linsert(b"l", BeforeOrAfter::Before, b"c", b"b").unwrap(),
            3
        );
        assert_eq!(
            engine.linsert(b"l", BeforeOrAfter::After, b"c", b"d").unwrap(),
            4
        );
        assert_eq!(
            engine.linsert(b"l", BeforeOrAfter::Before, b"a", b"start").unwrap(),
            5
        );
        assert_eq!(
            engine.lrange(b"l", 0, -1).unwrap(),
            values(&["start", "a", "b", "c", "d"])
        );
        assert_eq!(
            engine.linsert(b"l", BeforeOrAfter::Before, b"missing", b"x").unwrap(),
            -1
        );
    }

    #[test]
    fn test_linsert_nested_between_same_neighbors() {
        let (engine, _dir) = create_engine();
        engine.rpush(b"l", &values(&["lo", "hi"])).unwrap();
        // Repeated midpoint allocation between converging neighbors.
        for i in 0..10 {
            let tag = format!("m{i}");
            assert!(engine
                .linsert(b"l", BeforeOrAfter::After, b"lo", tag.as_bytes())
                .is_ok());
        }
        assert_eq!(engine.llen(b"l").unwrap(), 12);
        let range = engine.lrange(b"l", 0, 1).unwrap();
        assert_eq!(range[0], b"lo");
        assert_eq!(range[1], b"m9");
    }

    #[test]
    fn test_ltrim() {
        let (engine, _dir) = create_engine();
        engine.rpush(b"l", &values(&["a", "b", "c", "d", "e"])).unwrap();

        engine.ltrim(b"l", 1, 3).unwrap();
        assert_eq!(engine.lrange(b"l", 0, -1).unwrap(), values(&["b", "c", "d"]));
        assert_eq!(engine.llen(b"l").unwrap(), 3);

        // Pushes after a trim keep working off the updated anchors.
        engine.lpush(b"l", &values(&["x"])).unwrap();
        engine.rpush(b"l", &values(&["y"])).unwrap();
        assert_eq!(
            engine.lrange(b"l", 0, -1).unwrap(),
            values(&["x", "b", "c", "d", "y"])
        );
    }

    #[test]
    fn test_ltrim_to_nothing() {
        let (engine, _dir) = create_engine();
        engine.rpush(b"l", &values(&["a", "b"])).unwrap();
        engine.ltrim(b"l", 5, 9).unwrap();
        assert!(engine.llen(b"l").unwrap_err().is_not_found());
    }

    #[test]
    fn test_lrem() {
        let (engine, _dir) = create_engine();
        let items = values(&["x", "a", "x", "b", "x", "c"]);
        engine.rpush(b"l", &items).unwrap();

        assert_eq!(engine.lrem(b"l", 2, b"x").unwrap(), 2);
        assert_eq!(engine.lrange(b"l", 0, -1).unwrap(), values(&["a", "b", "x", "c"]));

        engine.del(b"l").unwrap();
        engine.rpush(b"l", &items).unwrap();
        assert_eq!(engine.lrem(b"l", -1, b"x").unwrap(), 1);
        assert_eq!(
            engine.lrange(b"l", 0, -1).unwrap(),
            values(&["x", "a", "x", "b", "c"])
        );

        engine.del(b"l").unwrap();
        engine.rpush(b"l", &items).unwrap();
        assert_eq!(engine.lrem(b"l", 0, b"x").unwrap(), 3);
        assert_eq!(engine.lrange(b"l", 0, -1).unwrap(), values(&["a", "b", "c"]));
    }

    #[test]
    fn test_rpoplpush() {
        let (engine, _dir) = create_engine();
        engine.rpush(b"src", &values(&["a", "b", "c"])).unwrap();

        assert_eq!(engine.rpoplpush(b"src", b"dst").unwrap(), b"c");
        assert_eq!(engine.lrange(b"src", 0, -1).unwrap(), values(&["a", "b"]));
        assert_eq!(engine.lrange(b"dst", 0, -1).unwrap(), values(&["c"]));

        assert_eq!(engine.rpoplpush(b"src", b"dst").unwrap(), b"b");
        assert_eq!(engine.lrange(b"dst", 0, -1).unwrap(), values(&["b", "c"]));
    }

    #[test]
    fn test_rpoplpush_rotation() {
        let (engine, _dir) = create_engine();
        engine.rpush(b"l", &values(&["a", "b", "c"])).unwrap();
        assert_eq!(engine.rpoplpush(b"l", b"l").unwrap(), b"c");
        assert_eq!(engine.lrange(b"l", 0, -1).unwrap(), values(&["c", "a", "b"]));
        assert_eq!(engine.llen(b"l").unwrap(), 3);
    }

    #[test]
    fn test_rpoplpush_single_element_rotation() {
        let (engine, _dir) = create_engine();
        engine.rpush(b"l", &values(&["only"])).unwrap();
        assert_eq!(engine.rpoplpush(b"l", b"l").unwrap(), b"only");
        assert_eq!(engine.lrange(b"l", 0, -1).unwrap(), values(&["only"]));
        assert_eq!(engine.rpop(b"l").unwrap(), b"only");
    }

    #[test]
    fn test_revival_does_not_inherit_elements() {
        let (engine, _dir) = create_engine();
        engine.rpush(b"l", &values(&["a", "b"])).unwrap();
        engine.del(b"l").unwrap();
        engine.rpush(b"l", &values(&["c"])).unwrap();
        assert_eq!(engine.lrange(b"l", 0, -1).unwrap(), values(&["c"]));
    }

    #[test]
    fn test_expire_and_ttl() {
        let (engine, _dir) = create_engine();
        engine.rpush(b"l", &values(&["a"])).unwrap();
        engine.expire(b"l", 100).unwrap();
        let ttl = engine.ttl(b"l").unwrap();
        assert!((90..=100).contains(&ttl));

        engine.expireat(b"l", 1).unwrap();
        assert!(engine.llen(b"l").unwrap_err().is_not_found());
    }
}
