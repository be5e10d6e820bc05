// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Hash engine.
//!
//! Same shape as the set engine with one difference: the data row's value
//! carries the field value. The numeric increments keep the human-readable
//! decimal representation and re-parse it on every update.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use rocksdb::{Direction, IteratorMode, WriteBatch};

use crate::codec::{encode_data_key, parse_data_key, version_prefix, MetaValue};
use crate::engine::{cf, delegate_type_engine, EngineCore, DATA_CF, META_CF};
use crate::error::{Error, Result};
use crate::options::Options;
use crate::store::bgtask::TaskQueue;
use crate::types::{DataType, FieldValue};
use crate::util::{is_tail_wildcard, string_match, unix_seconds};

pub struct HashesEngine {
    pub(crate) core: EngineCore,
}

impl HashesEngine {
    pub(crate) fn open(opts: &Options, path: &Path, tasks: Arc<TaskQueue>) -> Result<Self> {
        let core = EngineCore::open_composite(opts, path, DataType::Hashes, &[DATA_CF], tasks)?;
        Ok(Self { core })
    }

    fn read_live_meta(&self, key: &[u8], now: i64) -> Result<MetaValue> {
        let meta_cf = cf(&self.core.db, META_CF)?;
        match self.core.db.get_cf(&meta_cf, key)? {
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

    /// Sets one field; returns 1 if the field is new, 0 if it replaced an
    /// existing value.
    pub fn hset(&self, key: &[u8], field: &[u8], value: &[u8]) -> Result<i32> {
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
                    meta.count = 1;
                    batch.put_cf(&meta_cf, key, meta.encode());
                    batch.put_cf(&data_cf, encode_data_key(key, version, field), value);
                    db.write(batch)?;
                    Ok(1)
                } else {
                    let data_key = encode_data_key(key, meta.version, field);
                    match db.get_cf(&data_cf, &data_key)? {
                        Some(existing) => {
                            if existing == value {
                                return Ok(0);
                            }
                            db.put_cf(&data_cf, data_key, value)?;
                            Ok(0)
                        }
                        None => {
                            meta.modify_count(1);
                            batch.put_cf(&meta_cf, key, meta.encode());
                            batch.put_cf(&data_cf, data_key, value);
                            db.write(batch)?;
                            Ok(1)
                        }
                    }
                }
            }
            None => {
                let mut meta = MetaValue::new(1);
                let version = meta.update_version(now);
                batch.put_cf(&meta_cf, key, meta.encode());
                batch.put_cf(&data_cf, encode_data_key(key, version, field), value);
                db.write(batch)?;
                Ok(1)
            }
        }
    }

    pub fn hget(&self, key: &[u8], field: &[u8]) -> Result<Vec<u8>> {
        let db = &self.core.db;
        let snap = db.snapshot();
        let meta_cf = cf(db, META_CF)?;
        let data_cf = cf(db, DATA_CF)?;
        let now = unix_seconds();

        let Some(bytes) = snap.get_cf(&meta_cf, key)? else {
            return Err(Error::not_found());
        };
        let meta = MetaValue::decode(&bytes)?;
        if meta.is_stale(now) {
            return Err(Error::not_found_because("Stale"));
        }
        if meta.is_empty() {
            return Err(Error::not_found());
        }
        let data_key = encode_data_key(key, meta.version, field);
        snap.get_cf(&data_cf, &data_key)?
            .ok_or_else(Error::not_found)
    }

    /// Sets several fields in one atomic batch.
    pub fn hmset(&self, key: &[u8], fvs: &[FieldValue]) -> Result<()> {
        // Last write per field wins, as with sequential HSETs.
        let mut deduped: Vec<&FieldValue> = Vec::new();
        let mut last: HashMap<&[u8], usize> = HashMap::new();
        for fv in fvs {
            match last.get(fv.field.as_slice()) {
                Some(&at) => deduped[at] = fv,
                None => {
                    last.insert(&fv.field, deduped.len());
                    deduped.push(fv);
                }
            }
        }

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
                    meta.count = deduped.len() as u32;
                    batch.put_cf(&meta_cf, key, meta.encode());
                    for fv in &deduped {
                        batch.put_cf(&data_cf, encode_data_key(key, version, &fv.field), &fv.value);
                    }
                } else {
                    let version = meta.version;
                    let mut added = 0i64;
                    for fv in &deduped {
                        let data_key = encode_data_key(key, version, &fv.field);
                        if db.get_cf(&data_cf, &data_key)?.is_none() {
                            added += 1;
                        }
                        batch.put_cf(&data_cf, data_key, &fv.value);
                    }
                    meta.modify_count(added);
                    batch.put_cf(&meta_cf, key, meta.encode());
                }
            }
            None => {
                let mut meta = MetaValue::new(deduped.len() as u32);
                let version = meta.update_version(now);
                batch.put_cf(&meta_cf, key, meta.encode());
                for fv in &deduped {
                    batch.put_cf(&data_cf, encode_data_key(key, version, &fv.field), &fv.value);
                }
            }
        }
        db.write(batch)?;
        Ok(())
    }

    /// Point-reads several fields under one snapshot; absent fields yield
    /// `None`.
    pub fn hmget(&self, key: &[u8], fields: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>> {
        let db = &self.core.db;
        let snap = db.snapshot();
        let meta_cf = cf(db, META_CF)?;
        let data_cf = cf(db, DATA_CF)?;
        let now = unix_seconds();

        let Some(bytes) = snap.get_cf(&meta_cf, key)? else {
            return Err(Error::not_found());
        };
        let meta = MetaValue::decode(&bytes)?;
        if meta.is_stale(now) {
            return Err(Error::not_found_because("Stale"));
        }
        if meta.is_empty() {
            return Err(Error::not_found());
        }

        let mut values = Vec::with_capacity(fields.len());
        for field in fields {
            let data_key = encode_data_key(key, meta.version, field);
            values.push(snap.get_cf(&data_cf, &data_key)?);
        }
        Ok(values)
    }

    pub fn hgetall(&self, key: &[u8]) -> Result<Vec<FieldValue>> {
        let db = &self.core.db;
        let snap = db.snapshot();
        let meta_cf = cf(db, META_CF)?;
        let data_cf = cf(db, DATA_CF)?;
        let now = unix_seconds();

        let Some(bytes) = snap.get_cf(&meta_cf, key)? else {
            return Err(Error::not_found());
        };
        let meta = MetaValue::decode(&bytes)?;
        if meta.is_stale(now) {
            return Err(Error::not_found_because("Stale"));
        }
        if meta.is_empty() {
            return Err(Error::not_found());
        }

        let prefix = version_prefix(key, meta.version);
        let mut fvs = Vec::with_capacity(meta.count as usize);
        for item in snap.iterator_cf(&data_cf, IteratorMode::From(&prefix, Direction::Forward)) {
            let (data_key, value) = item?;
            if !data_key.starts_with(&prefix) {
                break;
            }
            fvs.push(FieldValue {
                field: parse_data_key(&data_key)?.suffix().to_vec(),
                value: value.to_vec(),
            });
        }
        Ok(fvs)
    }

    pub fn hkeys(&self, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        Ok(self.hgetall(key)?.into_iter().map(|fv| fv.field).collect())
    }

    pub fn hvals(&self, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        Ok(self.hgetall(key)?.into_iter().map(|fv| fv.value).collect())
    }

    /// Sets the field only if absent; returns 1 when written.
    pub fn hsetnx(&self, key: &[u8], field: &[u8], value: &[u8]) -> Result<i32> {
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
                    meta.count = 1;
                    batch.put_cf(&meta_cf, key, meta.encode());
                    batch.put_cf(&data_cf, encode_data_key(key, version, field), value);
                } else {
                    let data_key = encode_data_key(key, meta.version, field);
                    if db.get_cf(&data_cf, &data_key)?.is_some() {
                        return Ok(0);
                    }
                    meta.modify_count(1);
                    batch.put_cf(&meta_cf, key, meta.encode());
                    batch.put_cf(&data_cf, data_key, value);
                }
            }
            None => {
                let mut meta = MetaValue::new(1);
                let version = meta.update_version(now);
                batch.put_cf(&meta_cf, key, meta.encode());
                batch.put_cf(&data_cf, encode_data_key(key, version, field), value);
            }
        }
        db.write(batch)?;
        Ok(1)
    }

    pub fn hlen(&self, key: &[u8]) -> Result<i32> {
        let meta = self.read_live_meta(key, unix_seconds())?;
        Ok(meta.count as i32)
    }

    pub fn hstrlen(&self, key: &[u8], field: &[u8]) -> Result<i32> {
        match self.hget(key, field) {
            Ok(value) => Ok(value.len() as i32),
            Err(e) if e.is_not_found() => Ok(0),
            Err(e) => Err(e),
        }
    }

    pub fn hexists(&self, key: &[u8], field: &[u8]) -> Result<()> {
        self.hget(key, field).map(|_| ())
    }

    /// Adds `delta` to the integer field, creating key and field as
    /// needed.
    pub fn hincrby(&self, key: &[u8], field: &[u8], delta: i64) -> Result<i64> {
        let db = &self.core.db;
        let meta_cf = cf(db, META_CF)?;
        let data_cf = cf(db, DATA_CF)?;
        let mut batch = WriteBatch::default();
        let _guard = self.core.lock_mgr.lock(key);
        let now = unix_seconds();

        let (mut meta, fresh) = match db.get_cf(&meta_cf, key)? {
            Some(bytes) => {
                let mut meta = MetaValue::decode(&bytes)?;
                if meta.is_stale(now) || meta.is_empty() {
                    meta.initial_meta_value(now);
                    (meta, true)
                } else {
                    (meta, false)
                }
            }
            None => {
                let mut meta = MetaValue::new(0);
                meta.update_version(now);
                (meta, true)
            }
        };

        let data_key = encode_data_key(key, meta.version, field);
        let existing = if fresh {
            None
        } else {
            db.get_cf(&data_cf, &data_key)?
        };
        let current: i64 = match &existing {
            None => 0,
            Some(bytes) => std::str::from_utf8(bytes)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| Error::Corruption("hash value is not an integer".to_string()))?,
        };
        let is_new_field = existing.is_none();
        let updated = current
            .checked_add(delta)
            .ok_or_else(|| Error::InvalidArgument("increment or decrement would overflow".to_string()))?;

        if is_new_field {
            meta.modify_count(1);
        }
        batch.put_cf(&meta_cf, key, meta.encode());
        batch.put_cf(&data_cf, data_key, updated.to_string().as_bytes());
        db.write(batch)?;
        Ok(updated)
    }

    /// Adds a float delta to the field, re-parsing the stored decimal text
    /// on every update. Returns the new textual representation.
    pub fn hincrbyfloat(&self, key: &[u8], field: &[u8], delta: &[u8]) -> Result<Vec<u8>> {
        let delta: f64 = std::str::from_utf8(delta)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::Corruption("value is not a valid float".to_string()))?;

        let db = &self.core.db;
        let meta_cf = cf(db, META_CF)?;
        let data_cf = cf(db, DATA_CF)?;
        let mut batch = WriteBatch::default();
        let _guard = self.core.lock_mgr.lock(key);
        let now = unix_seconds();

        let (mut meta, fresh) = match db.get_cf(&meta_cf, key)? {
            Some(bytes) => {
                let mut meta = MetaValue::decode(&bytes)?;
                if meta.is_stale(now) || meta.is_empty() {
                    meta.initial_meta_value(now);
                    (meta, true)
                } else {
                    (meta, false)
                }
            }
            None => {
                let mut meta = MetaValue::new(0);
                meta.update_version(now);
                (meta, true)
            }
        };

        let data_key = encode_data_key(key, meta.version, field);
        let existing = if fresh {
            None
        } else {
            db.get_cf(&data_cf, &data_key)?
        };
        let current: f64 = match &existing {
            None => 0.0,
            Some(bytes) => std::str::from_utf8(bytes)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| Error::Corruption("hash value is not a valid float".to_string()))?,
        };
        let updated = current + delta;
        if updated.is_nan() || updated.is_infinite() {
            return Err(Error::InvalidArgument(
                "increment would produce NaN or Infinity".to_string(),
            ));
        }

        if existing.is_none() {
            meta.modify_count(1);
        }
        let text = format!("{updated}").into_bytes();
        batch.put_cf(&meta_cf, key, meta.encode());
        batch.put_cf(&data_cf, data_key, &text);
        db.write(batch)?;
        Ok(text)
    }

    /// Deletes fields; returns how many were present.
    pub fn hdel(&self, key: &[u8], fields: &[Vec<u8>]) -> Result<i32> {
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
        for field in fields {
            let data_key = encode_data_key(key, version, field);
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

    /// Resumable field iteration, same cursor protocol as the set engine's
    /// SSCAN.
    pub fn hscan(
        &self,
        key: &[u8],
        cursor: i64,
        pattern: &[u8],
        count: i64,
    ) -> Result<(Vec<FieldValue>, i64)> {
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
        let mut field_values = Vec::new();
        let mut rest = count;
        let mut iter = snap
            .iterator_cf(&data_cf, IteratorMode::From(&seek, Direction::Forward))
            .peekable();
        while rest > 0 {
            let Some(item) = iter.next() else {
                break;
            };
            let (data_key, value) = item?;
            if !data_key.starts_with(&prefix) {
                break;
            }
            let field = parse_data_key(&data_key)?.suffix();
            if string_match(pattern, field) {
                field_values.push(FieldValue {
                    field: field.to_vec(),
                    value: value.to_vec(),
                });
            }
            rest -= 1;
        }

        let mut next_cursor = 0;
        if let Some(Ok((data_key, _))) = iter.peek() {
            if data_key.starts_with(&prefix) {
                next_cursor = cursor + count;
                let next_field = parse_data_key(data_key)?.suffix().to_vec();
                self.core
                    .store_scan_next_point(key, pattern, next_cursor, next_field);
            }
        }
        Ok((field_values, next_cursor))
    }
}

delegate_type_engine!(HashesEngine, DataType::Hashes);
