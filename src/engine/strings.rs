// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Strings engine.
//!
//! No data column family: the value row is the string, prefixed by its
//! expiry header. Point reads and writes throughout; the only iteration is
//! the key-level scan surface, which this engine implements itself because
//! its value layout differs from the composite types.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rocksdb::{Direction, IteratorMode, WriteBatch};

use crate::codec::StringsValue;
use crate::engine::{cf, EngineCore, TypeEngine, META_CF};
use crate::error::{Error, Result};
use crate::options::Options;
use crate::store::bgtask::TaskQueue;
use crate::types::{ColumnFamilyKind, DataType, KeyInfo, KeyValue};
use crate::util::{is_tail_wildcard, string_match, unix_seconds};

/// How often long meta iterations poll the cooperative stop flag.
const STOP_CHECK_INTERVAL: u64 = 128;

pub struct StringsEngine {
    pub(crate) core: EngineCore,
}

impl StringsEngine {
    pub(crate) fn open(opts: &Options, path: &Path, tasks: Arc<TaskQueue>) -> Result<Self> {
        let core = EngineCore::open_strings(opts, path, tasks)?;
        Ok(Self { core })
    }

    fn read_live(&self, key: &[u8], now: i64) -> Result<StringsValue> {
        let meta_cf = cf(&self.core.db, META_CF)?;
        match self.core.db.get_cf(&meta_cf, key)? {
            None => Err(Error::not_found()),
            Some(bytes) => {
                let sv = StringsValue::decode(&bytes)?;
                if sv.is_stale(now) {
                    Err(Error::not_found_because("Stale"))
                } else {
                    Ok(sv)
                }
            }
        }
    }

    /// Sets the value, clearing any expiry.
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let meta_cf = cf(&self.core.db, META_CF)?;
        let _guard = self.core.lock_mgr.lock(key);
        self.core
            .db
            .put_cf(&meta_cf, key, StringsValue::new(value.to_vec()).encode())?;
        Ok(())
    }

    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.read_live(key, unix_seconds()).map(|sv| sv.value)
    }

    /// Sets the value and returns the previous one, if any.
    pub fn getset(&self, key: &[u8], value: &[u8]) -> Result<Option<Vec<u8>>> {
        let meta_cf = cf(&self.core.db, META_CF)?;
        let _guard = self.core.lock_mgr.lock(key);
        let old = match self.read_live(key, unix_seconds()) {
            Ok(sv) => Some(sv.value),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };
        self.core
            .db
            .put_cf(&meta_cf, key, StringsValue::new(value.to_vec()).encode())?;
        Ok(old)
    }

    /// Sets only if absent; returns 1 when the value was written.
    pub fn setnx(&self, key: &[u8], value: &[u8], ttl: i64) -> Result<i32> {
        let meta_cf = cf(&self.core.db, META_CF)?;
        let _guard = self.core.lock_mgr.lock(key);
        let now = unix_seconds();
        match self.read_live(key, now) {
            Ok(_) => Ok(0),
            Err(e) if e.is_not_found() => {
                let mut sv = StringsValue::new(value.to_vec());
                if ttl > 0 {
                    sv.set_relative_timestamp(ttl, now);
                }
                self.core.db.put_cf(&meta_cf, key, sv.encode())?;
                Ok(1)
            }
            Err(e) => Err(e),
        }
    }

    /// Sets the value with a mandatory expiry.
    pub fn setex(&self, key: &[u8], value: &[u8], ttl: i64) -> Result<()> {
        if ttl <= 0 {
            return Err(Error::InvalidArgument(
                "invalid expire time, must be >= 1".to_string(),
            ));
        }
        let meta_cf = cf(&self.core.db, META_CF)?;
        let _guard = self.core.lock_mgr.lock(key);
        let mut sv = StringsValue::new(value.to_vec());
        sv.set_relative_timestamp(ttl, unix_seconds());
        self.core.db.put_cf(&meta_cf, key, sv.encode())?;
        Ok(())
    }

    /// Sets every pair in one atomic batch.
    pub fn mset(&self, kvs: &[KeyValue]) -> Result<()> {
        let meta_cf = cf(&self.core.db, META_CF)?;
        let keys: Vec<&[u8]> = kvs.iter().map(|kv| kv.key.as_slice()).collect();
        let _guard = self.core.lock_mgr.lock_many(&keys);
        let mut batch = WriteBatch::default();
        for kv in kvs {
            batch.put_cf(&meta_cf, &kv.key, StringsValue::new(kv.value.clone()).encode());
        }
        self.core.db.write(batch)?;
        Ok(())
    }

    /// Point-reads every key; absent and stale keys yield `None`.
    pub fn mget(&self, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>> {
        let now = unix_seconds();
        let snap = self.core.db.snapshot();
        let meta_cf = cf(&self.core.db, META_CF)?;
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            match snap.get_cf(&meta_cf, key)? {
                None => values.push(None),
                Some(bytes) => {
                    let sv = StringsValue::decode(&bytes)?;
                    values.push(if sv.is_stale(now) { None } else { Some(sv.value) });
                }
            }
        }
        Ok(values)
    }

    /// Appends to the value (creating it if absent); returns the new
    /// length. Keeps the existing expiry.
    pub fn append(&self, key: &[u8], value: &[u8]) -> Result<i32> {
        let meta_cf = cf(&self.core.db, META_CF)?;
        let _guard = self.core.lock_mgr.lock(key);
        let now = unix_seconds();
        let mut sv = match self.read_live(key, now) {
            Ok(sv) => sv,
            Err(e) if e.is_not_found() => StringsValue::new(Vec::new()),
            Err(e) => return Err(e),
        };
        sv.value.extend_from_slice(value);
        let len = sv.value.len() as i32;
        self.core.db.put_cf(&meta_cf, key, sv.encode())?;
        Ok(len)
    }

    pub fn strlen(&self, key: &[u8]) -> Result<i32> {
        self.get(key).map(|v| v.len() as i32)
    }

    /// Adds `delta` to the integer value; the key is created at 0 when
    /// absent. Keeps the existing expiry.
    pub fn incrby(&self, key: &[u8], delta: i64) -> Result<i64> {
        let meta_cf = cf(&self.core.db, META_CF)?;
        let _guard = self.core.lock_mgr.lock(key);
        let now = unix_seconds();
        let mut sv = match self.read_live(key, now) {
            Ok(sv) => sv,
            Err(e) if e.is_not_found() => StringsValue::new(b"0".to_vec()),
            Err(e) => return Err(e),
        };
        let current: i64 = std::str::from_utf8(&sv.value)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::Corruption("value is not an integer".to_string()))?;
        let updated = current
            .checked_add(delta)
            .ok_or_else(|| Error::InvalidArgument("increment or decrement would overflow".to_string()))?;
        sv.value = updated.to_string().into_bytes();
        self.core.db.put_cf(&meta_cf, key, sv.encode())?;
        Ok(updated)
    }

    pub fn decrby(&self, key: &[u8], delta: i64) -> Result<i64> {
        let delta = delta
            .checked_neg()
            .ok_or_else(|| Error::InvalidArgument("increment or decrement would overflow".to_string()))?;
        self.incrby(key, delta)
    }

    /// Adds a float delta, re-parsing the stored human-readable decimal on
    /// every update. Returns the new textual representation.
    pub fn incrbyfloat(&self, key: &[u8], delta: &[u8]) -> Result<Vec<u8>> {
        let delta: f64 = std::str::from_utf8(delta)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::Corruption("value is not a valid float".to_string()))?;

        let meta_cf = cf(&self.core.db, META_CF)?;
        let _guard = self.core.lock_mgr.lock(key);
        let now = unix_seconds();
        let mut sv = match self.read_live(key, now) {
            Ok(sv) => sv,
            Err(e) if e.is_not_found() => StringsValue::new(b"0".to_vec()),
            Err(e) => return Err(e),
        };
        let current: f64 = std::str::from_utf8(&sv.value)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::Corruption("value is not a valid float".to_string()))?;
        let updated = current + delta;
        if updated.is_nan() || updated.is_infinite() {
            return Err(Error::InvalidArgument(
                "increment would produce NaN or Infinity".to_string(),
            ));
        }
        sv.value = format!("{updated}").into_bytes();
        self.core.db.put_cf(&meta_cf, key, sv.encode())?;
        Ok(sv.value)
    }
}

impl TypeEngine for StringsEngine {
    fn data_type(&self) -> DataType {
        DataType::Strings
    }

    fn expire(&self, key: &[u8], ttl: i64) -> Result<()> {
        let meta_cf = cf(&self.core.db, META_CF)?;
        let _guard = self.core.lock_mgr.lock(key);
        let now = unix_seconds();
        let mut sv = self.read_live(key, now)?;
        if ttl > 0 {
            sv.set_relative_timestamp(ttl, now);
            self.core.db.put_cf(&meta_cf, key, sv.encode())?;
        } else {
            // Strings have no data rows to orphan; deletion is physical.
            self.core.db.delete_cf(&meta_cf, key)?;
        }
        Ok(())
    }

    fn expireat(&self, key: &[u8], timestamp: i64) -> Result<()> {
        let meta_cf = cf(&self.core.db, META_CF)?;
        let _guard = self.core.lock_mgr.lock(key);
        let now = unix_seconds();
        let mut sv = self.read_live(key, now)?;
        if timestamp > 0 {
            sv.timestamp = timestamp.clamp(0, i64::from(i32::MAX)) as i32;
            self.core.db.put_cf(&meta_cf, key, sv.encode())?;
        } else {
            self.core.db.delete_cf(&meta_cf, key)?;
        }
        Ok(())
    }

    fn persist(&self, key: &[u8]) -> Result<()> {
        let meta_cf = cf(&self.core.db, META_CF)?;
        let _guard = self.core.lock_mgr.lock(key);
        let now = unix_seconds();
        let mut sv = self.read_live(key, now)?;
        if sv.timestamp == 0 {
            return Err(Error::not_found_because("Not have an associated timeout"));
        }
        sv.timestamp = 0;
        self.core.db.put_cf(&meta_cf, key, sv.encode())?;
        Ok(())
    }

    fn ttl(&self, key: &[u8]) -> Result<i64> {
        let now = unix_seconds();
        let sv = self.read_live(key, now)?;
        if sv.timestamp == 0 {
            return Ok(-1);
        }
        let remaining = i64::from(sv.timestamp) - now;
        Ok(if remaining >= 0 { remaining } else { -2 })
    }

    fn del(&self, key: &[u8]) -> Result<()> {
        let meta_cf = cf(&self.core.db, META_CF)?;
        let _guard = self.core.lock_mgr.lock(key);
        self.read_live(key, unix_seconds())?;
        self.core.db.delete_cf(&meta_cf, key)?;
        Ok(())
    }

    fn exists(&self, key: &[u8]) -> Result<()> {
        self.read_live(key, unix_seconds()).map(|_| ())
    }

    fn scan(
        &self,
        start_key: &[u8],
        pattern: &[u8],
        keys: &mut Vec<Vec<u8>>,
        count: &mut i64,
        next_key: &mut Vec<u8>,
    ) -> Result<bool> {
        next_key.clear();
        let now = unix_seconds();
        let snap = self.core.db.snapshot();
        let meta_cf = cf(&self.core.db, META_CF)?;

        let mut iter = snap
            .iterator_cf(&meta_cf, IteratorMode::From(start_key, Direction::Forward))
            .peekable();
        while *count > 0 {
            let Some(item) = iter.next() else {
                break;
            };
            let (key, value) = item?;
            let sv = StringsValue::decode(&value)?;
            if sv.is_stale(now) {
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

    fn scan_keys(&self, pattern: &[u8]) -> Result<Vec<Vec<u8>>> {
        let now = unix_seconds();
        let snap = self.core.db.snapshot();
        let meta_cf = cf(&self.core.db, META_CF)?;
        let mut keys = Vec::new();
        for item in snap.iterator_cf(&meta_cf, IteratorMode::Start) {
            let (key, value) = item?;
            let sv = StringsValue::decode(&value)?;
            if !sv.is_stale(now) && string_match(pattern, &key) {
                keys.push(key.to_vec());
            }
        }
        Ok(keys)
    }

    fn scan_key_num(&self, stop: &AtomicBool) -> Result<KeyInfo> {
        let now = unix_seconds();
        let snap = self.core.db.snapshot();
        let meta_cf = cf(&self.core.db, META_CF)?;

        let mut info = KeyInfo::default();
        let mut ttl_sum = 0u64;
        let mut visited = 0u64;
        for item in snap.iterator_cf(&meta_cf, IteratorMode::Start) {
            visited += 1;
            if visited % STOP_CHECK_INTERVAL == 0 && stop.load(Ordering::Relaxed) {
                break;
            }
            let (_, value) = item?;
            let sv = StringsValue::decode(&value)?;
            if sv.is_stale(now) {
                info.invalid_keys += 1;
            } else {
                info.keys += 1;
                if sv.timestamp != 0 {
                    info.expires += 1;
                    ttl_sum += (i64::from(sv.timestamp) - now).max(0) as u64;
                }
            }
        }
        if info.expires > 0 {
            info.avg_ttl = ttl_sum / info.expires;
        }
        Ok(info)
    }

    fn pk_pattern_match_del(&self, pattern: &[u8], batch_limit: usize) -> Result<i64> {
        let now = unix_seconds();
        let snap = self.core.db.snapshot();
        let meta_cf = cf(&self.core.db, META_CF)?;

        let mut total = 0i64;
        let mut pending = 0usize;
        let mut batch = WriteBatch::default();
        for item in snap.iterator_cf(&meta_cf, IteratorMode::Start) {
            let (key, value) = item?;
            let sv = StringsValue::decode(&value)?;
            if !sv.is_stale(now) && string_match(pattern, &key) {
                batch.delete_cf(&meta_cf, &key);
                pending += 1;
            }
            if pending >= batch_limit {
                self.core.db.write(std::mem::take(&mut batch))?;
                total += pending as i64;
                pending = 0;
            }
        }
        if pending > 0 {
            self.core.db.write(batch)?;
            total += pending as i64;
        }
        Ok(total)
    }

    fn pk_scan_range(
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
        let snap = self.core.db.snapshot();
        let meta_cf = cf(&self.core.db, META_CF)?;
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
            let sv = StringsValue::decode(&value)?;
            if sv.is_stale(now) {
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

    fn pk_rscan_range(
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
        let snap = self.core.db.snapshot();
        let meta_cf = cf(&self.core.db, META_CF)?;
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
            let sv = StringsValue::decode(&value)?;
            if sv.is_stale(now) {
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

    fn compact_range(
        &self,
        _kind: ColumnFamilyKind,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Result<()> {
        let meta_cf = cf(&self.core.db, META_CF)?;
        self.core.db.compact_range_cf(&meta_cf, begin, end);
        Ok(())
    }

    fn get_property(&self, property: &str) -> Result<u64> {
        let meta_cf = cf(&self.core.db, META_CF)?;
        Ok(self
            .core
            .db
            .property_int_value_cf(&meta_cf, property)?
            .unwrap_or(0))
    }
}
