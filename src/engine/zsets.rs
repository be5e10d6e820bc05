// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Sorted-set engine.
//!
//! Two data column families kept in lockstep within every write batch:
//! `member_cf` maps `(user_key, version, member)` to the encoded score for
//! point lookups, `score_cf` keys `(user_key, version, score, member)` with
//! an empty value so that byte order equals rank order. Range and rank
//! queries walk the score family; membership and score lookups hit the
//! member family.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use rocksdb::{Direction, IteratorMode, WriteBatch};

use crate::codec::{
    decode_score, encode_data_key, encode_score, parse_data_key, version_prefix, MetaValue,
};
use crate::engine::{cf, delegate_type_engine, EngineCore, MEMBER_CF, META_CF, SCORE_CF};
use crate::error::{Error, Result};
use crate::options::Options;
use crate::store::bgtask::TaskQueue;
use crate::types::{Aggregate, DataType, ScoreMember};
use crate::util::{prefix_successor, unix_seconds};

pub struct ZsetsEngine {
    pub(crate) core: EngineCore,
}

fn score_suffix(score: f64, member: &[u8]) -> Vec<u8> {
    let mut suffix = Vec::with_capacity(8 + member.len());
    suffix.extend_from_slice(&encode_score(score));
    suffix.extend_from_slice(member);
    suffix
}

impl ZsetsEngine {
    pub(crate) fn open(opts: &Options, path: &Path, tasks: Arc<TaskQueue>) -> Result<Self> {
        let core = EngineCore::open_composite(
            opts,
            path,
            DataType::ZSets,
            &[MEMBER_CF, SCORE_CF],
            tasks,
        )?;
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

    /// Adds or updates members; returns the number of genuinely new ones.
    pub fn zadd(&self, key: &[u8], score_members: &[ScoreMember]) -> Result<i32> {
        // Last score per member wins, as with sequential ZADDs.
        let mut deduped: Vec<ScoreMember> = Vec::new();
        for sm in score_members {
            if let Some(at) = deduped.iter().position(|d| d.member == sm.member) {
                deduped[at].score = sm.score;
            } else {
                deduped.push(sm.clone());
            }
        }

        let db = &self.core.db;
        let meta_cf = cf(db, META_CF)?;
        let member_cf = cf(db, MEMBER_CF)?;
        let score_cf = cf(db, SCORE_CF)?;
        let mut batch = WriteBatch::default();
        let _guard = self.core.lock_mgr.lock(key);
        let now = unix_seconds();

        let existing_meta = db.get_cf(&meta_cf, key)?;
        let (mut meta, alive) = match &existing_meta {
            Some(bytes) => {
                let meta = MetaValue::decode(bytes)?;
                let alive = !meta.is_stale(now) && !meta.is_empty();
                (meta, alive)
            }
            None => (MetaValue::new(0), false),
        };

        if !alive {
            let version = if existing_meta.is_some() {
                meta.initial_meta_value(now)
            } else {
                meta.update_version(now)
            };
            meta.count = deduped.len() as u32;
            batch.put_cf(&meta_cf, key, meta.encode());
            for sm in &deduped {
                batch.put_cf(
                    &member_cf,
                    encode_data_key(key, version, &sm.member),
                    encode_score(sm.score),
                );
                batch.put_cf(
                    &score_cf,
                    encode_data_key(key, version, &score_suffix(sm.score, &sm.member)),
                    [],
                );
            }
            db.write(batch)?;
            return Ok(deduped.len() as i32);
        }

        let version = meta.version;
        let mut added = 0i32;
        let mut changed = 0u64;
        for sm in &deduped {
            let member_key = encode_data_key(key, version, &sm.member);
            match db.get_cf(&member_cf, &member_key)? {
                Some(bytes) => {
                    let old_score = decode_score(&bytes)?;
                    if old_score == sm.score {
                        continue;
                    }
                    batch.delete_cf(
                        &score_cf,
                        encode_data_key(key, version, &score_suffix(old_score, &sm.member)),
                    );
                    batch.put_cf(&member_cf, &member_key, encode_score(sm.score));
                    batch.put_cf(
                        &score_cf,
                        encode_data_key(key, version, &score_suffix(sm.score, &sm.member)),
                        [],
                    );
                    changed += 1;
                }
                None => {
                    added += 1;
                    batch.put_cf(&member_cf, &member_key, encode_score(sm.score));
                    batch.put_cf(
                        &score_cf,
                        encode_data_key(key, version, &score_suffix(sm.score, &sm.member)),
                        [],
                    );
                }
            }
        }
        if added > 0 {
            meta.modify_count(i64::from(added));
            batch.put_cf(&meta_cf, key, meta.encode());
        }
        if added > 0 || changed > 0 {
            db.write(batch)?;
            self.core.update_key_statistics(key, changed);
        }
        Ok(added)
    }

    pub fn zcard(&self, key: &[u8]) -> Result<i32> {
        let meta = self.read_live_meta(key, unix_seconds())?;
        Ok(meta.count as i32)
    }

    pub fn zscore(&self, key: &[u8], member: &[u8]) -> Result<f64> {
        let db = &self.core.db;
        let snap = db.snapshot();
        let meta_cf = cf(db, META_CF)?;
        let member_cf = cf(db, MEMBER_CF)?;
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
        let member_key = encode_data_key(key, meta.version, member);
        match snap.get_cf(&member_cf, &member_key)? {
            Some(bytes) => decode_score(&bytes),
            None => Err(Error::not_found()),
        }
    }

    /// Adds `delta` to the member's score, creating key and member as
    /// needed. Returns the new score.
    pub fn zincrby(&self, key: &[u8], member: &[u8], delta: f64) -> Result<f64> {
        let db = &self.core.db;
        let meta_cf = cf(db, META_CF)?;
        let member_cf = cf(db, MEMBER_CF)?;
        let score_cf = cf(db, SCORE_CF)?;
        let mut batch = WriteBatch::default();
        let _guard = self.core.lock_mgr.lock(key);
        let now = unix_seconds();

        let existing_meta = db.get_cf(&meta_cf, key)?;
        let (mut meta, alive) = match &existing_meta {
            Some(bytes) => {
                let meta = MetaValue::decode(bytes)?;
                let alive = !meta.is_stale(now) && !meta.is_empty();
                (meta, alive)
            }
            None => (MetaValue::new(0), false),
        };
        if !alive {
            if existing_meta.is_some() {
                meta.initial_meta_value(now);
            } else {
                meta.update_version(now);
            }
        }

        let version = meta.version;
        let member_key = encode_data_key(key, version, member);
        let old_score = if alive {
            match db.get_cf(&member_cf, &member_key)? {
                Some(bytes) => Some(decode_score(&bytes)?),
                None => None,
            }
        } else {
            None
        };

        let updated = match old_score {
            Some(old) => {
                batch.delete_cf(
                    &score_cf,
                    encode_data_key(key, version, &score_suffix(old, member)),
                );
                old + delta
            }
            None => {
                meta.modify_count(1);
                delta
            }
        };
        batch.put_cf(&meta_cf, key, meta.encode());
        batch.put_cf(&member_cf, &member_key, encode_score(updated));
        batch.put_cf(
            &score_cf,
            encode_data_key(key, version, &score_suffix(updated, member)),
            [],
        );
        db.write(batch)?;
        Ok(updated)
    }

    /// Members in rank order over `[start, stop]`, negative indices
    /// counting from the tail.
    pub fn zrange(&self, key: &[u8], start: i64, stop: i64) -> Result<Vec<ScoreMember>> {
        let db = &self.core.db;
        let snap = db.snapshot();
        let score_cf = cf(db, SCORE_CF)?;
        let now = unix_seconds();
        let meta = self.read_live_meta(key, now)?;

        let count = i64::from(meta.count);
        let start = if start < 0 { (count + start).max(0) } else { start };
        let stop = if stop < 0 { count + stop } else { stop.min(count - 1) };
        if start > stop || start >= count {
            return Ok(Vec::new());
        }

        let prefix = version_prefix(key, meta.version);
        let mut members = Vec::new();
        for (index, item) in snap
            .iterator_cf(&score_cf, IteratorMode::From(&prefix, Direction::Forward))
            .enumerate()
        {
            let (data_key, _) = item?;
            if !data_key.starts_with(&prefix) || index as i64 > stop {
                break;
            }
            if (index as i64) < start {
                continue;
            }
            let suffix = parse_data_key(&data_key)?.suffix().to_vec();
            members.push(ScoreMember {
                score: decode_score(&suffix)?,
                member: suffix[8..].to_vec(),
            });
        }
        Ok(members)
    }

    /// Members with scores inside the given bounds, in score order.
    pub fn zrangebyscore(
        &self,
        key: &[u8],
        min: f64,
        max: f64,
        left_close: bool,
        right_close: bool,
    ) -> Result<Vec<ScoreMember>> {
        let db = &self.core.db;
        let snap = db.snapshot();
        let score_cf = cf(db, SCORE_CF)?;
        let now = unix_seconds();
        let meta = self.read_live_meta(key, now)?;

        let prefix = version_prefix(key, meta.version);
        // Seek straight to the first candidate score.
        let mut seek = prefix.clone();
        seek.extend_from_slice(&encode_score(min));

        let mut members = Vec::new();
        for item in snap.iterator_cf(&score_cf, IteratorMode::From(&seek, Direction::Forward)) {
            let (data_key, _) = item?;
            if !data_key.starts_with(&prefix) {
                break;
            }
            let suffix = parse_data_key(&data_key)?.suffix().to_vec();
            let score = decode_score(&suffix)?;
            if score > max || (!right_close && score == max) {
                break;
            }
            if !left_close && score == min {
                continue;
            }
            members.push(ScoreMember {
                score,
                member: suffix[8..].to_vec(),
            });
        }
        Ok(members)
    }

    pub fn zcount(
        &self,
        key: &[u8],
        min: f64,
        max: f64,
        left_close: bool,
        right_close: bool,
    ) -> Result<i32> {
        Ok(self.zrangebyscore(key, min, max, left_close, right_close)?.len() as i32)
    }

    /// Rank of the member in ascending score order, 0-based.
    pub fn zrank(&self, key: &[u8], member: &[u8]) -> Result<i32> {
        let db = &self.core.db;
        let snap = db.snapshot();
        let score_cf = cf(db, SCORE_CF)?;
        let now = unix_seconds();
        let meta = self.read_live_meta(key, now)?;

        let prefix = version_prefix(key, meta.version);
        for (index, item) in snap
            .iterator_cf(&score_cf, IteratorMode::From(&prefix, Direction::Forward))
            .enumerate()
        {
            let (data_key, _) = item?;
            if !data_key.starts_with(&prefix) {
                break;
            }
            let suffix = parse_data_key(&data_key)?.suffix();
            if &suffix[8..] == member {
                return Ok(index as i32);
            }
        }
        Err(Error::not_found())
    }

    pub fn zrevrank(&self, key: &[u8], member: &[u8]) -> Result<i32> {
        let card = self.zcard(key)?;
        let rank = self.zrank(key, member)?;
        Ok(card - rank - 1)
    }

    /// Removes members; returns how many were present.
    pub fn zrem(&self, key: &[u8], members: &[Vec<u8>]) -> Result<i32> {
        let db = &self.core.db;
        let meta_cf = cf(db, META_CF)?;
        let member_cf = cf(db, MEMBER_CF)?;
        let score_cf = cf(db, SCORE_CF)?;
        let mut batch = WriteBatch::default();
        let _guard = self.core.lock_mgr.lock(key);
        let now = unix_seconds();

        let mut meta = self.read_live_meta(key, now)?;
        let version = meta.version;
        let mut removed = 0i32;
        for member in members {
            let member_key = encode_data_key(key, version, member);
            if let Some(bytes) = db.get_cf(&member_cf, &member_key)? {
                let score = decode_score(&bytes)?;
                removed += 1;
                batch.delete_cf(&member_cf, member_key);
                batch.delete_cf(
                    &score_cf,
                    encode_data_key(key, version, &score_suffix(score, member)),
                );
            }
        }
        meta.modify_count(-i64::from(removed));
        batch.put_cf(&meta_cf, key, meta.encode());
        db.write(batch)?;
        self.core.update_key_statistics(key, removed as u64);
        Ok(removed)
    }

    fn zpop(&self, key: &[u8], count: i64, from_min: bool) -> Result<Vec<ScoreMember>> {
        let db = &self.core.db;
        let meta_cf = cf(db, META_CF)?;
        let member_cf = cf(db, MEMBER_CF)?;
        let score_cf = cf(db, SCORE_CF)?;
        let mut batch = WriteBatch::default();
        let _guard = self.core.lock_mgr.lock(key);
        let now = unix_seconds();

        let mut meta = self.read_live_meta(key, now)?;
        let version = meta.version;
        let prefix = version_prefix(key, version);
        let upper = prefix_successor(prefix.clone());
        let mode = if from_min {
            IteratorMode::From(&prefix, Direction::Forward)
        } else {
            match upper.as_deref() {
                Some(bound) => IteratorMode::From(bound, Direction::Reverse),
                None => IteratorMode::End,
            }
        };

        let wanted = count.max(0) as usize;
        let mut popped = Vec::new();
        for item in db.iterator_cf(&score_cf, mode) {
            if popped.len() >= wanted {
                break;
            }
            let (data_key, _) = item?;
            if !data_key.starts_with(&prefix) {
                break;
            }
            let suffix = parse_data_key(&data_key)?.suffix().to_vec();
            let score = decode_score(&suffix)?;
            let member = suffix[8..].to_vec();
            batch.delete_cf(&score_cf, &data_key);
            batch.delete_cf(&member_cf, encode_data_key(key, version, &member));
            popped.push(ScoreMember { score, member });
        }
        meta.modify_count(-(popped.len() as i64));
        batch.put_cf(&meta_cf, key, meta.encode());
        db.write(batch)?;
        self.core.update_key_statistics(key, popped.len() as u64);
        Ok(popped)
    }

    /// Pops up to `count` members with the lowest scores.
    pub fn zpop_min(&self, key: &[u8], count: i64) -> Result<Vec<ScoreMember>> {
        self.zpop(key, count, true)
    }

    /// Pops up to `count` members with the highest scores.
    pub fn zpop_max(&self, key: &[u8], count: i64) -> Result<Vec<ScoreMember>> {
        self.zpop(key, count, false)
    }

    /// Members between the lexicographic bounds; `None` means unbounded.
    /// Only meaningful when all scores are equal, as with Redis.
    pub fn zrangebylex(
        &self,
        key: &[u8],
        min: Option<&[u8]>,
        max: Option<&[u8]>,
        left_close: bool,
        right_close: bool,
    ) -> Result<Vec<Vec<u8>>> {
        let db = &self.core.db;
        let snap = db.snapshot();
        let member_cf = cf(db, MEMBER_CF)?;
        let now = unix_seconds();
        let meta = self.read_live_meta(key, now)?;

        let prefix = version_prefix(key, meta.version);
        let mut members = Vec::new();
        for item in snap.iterator_cf(&member_cf, IteratorMode::From(&prefix, Direction::Forward)) {
            let (data_key, _) = item?;
            if !data_key.starts_with(&prefix) {
                break;
            }
            let member = parse_data_key(&data_key)?.suffix();
            if let Some(min) = min {
                if member < min || (!left_close && member == min) {
                    continue;
                }
            }
            if let Some(max) = max {
                if member > max || (!right_close && member == max) {
                    break;
                }
            }
            members.push(member.to_vec());
        }
        Ok(members)
    }

    pub fn zlexcount(
        &self,
        key: &[u8],
        min: Option<&[u8]>,
        max: Option<&[u8]>,
        left_close: bool,
        right_close: bool,
    ) -> Result<i32> {
        Ok(self
            .zrangebylex(key, min, max, left_close, right_close)?
            .len() as i32)
    }

    fn weight(weights: &[f64], index: usize) -> f64 {
        weights.get(index).copied().unwrap_or(1.0)
    }

    fn live_version(&self, key: &[u8], now: i64) -> Result<Option<u32>> {
        match self.read_live_meta(key, now) {
            Ok(meta) => Ok(Some(meta.version)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Replaces `destination` with the given member→score map.
    fn store_score_members(
        &self,
        destination: &[u8],
        scored: &BTreeMap<Vec<u8>, f64>,
    ) -> Result<i32> {
        let db = &self.core.db;
        let meta_cf = cf(db, META_CF)?;
        let member_cf = cf(db, MEMBER_CF)?;
        let score_cf = cf(db, SCORE_CF)?;
        let mut batch = WriteBatch::default();
        let now = unix_seconds();

        let mut statistic = 0u64;
        let version = match db.get_cf(&meta_cf, destination)? {
            Some(bytes) => {
                let mut meta = MetaValue::decode(&bytes)?;
                statistic = u64::from(meta.count);
                let version = meta.initial_meta_value(now);
                meta.count = scored.len() as u32;
                batch.put_cf(&meta_cf, destination, meta.encode());
                version
            }
            None => {
                let mut meta = MetaValue::new(scored.len() as u32);
                let version = meta.update_version(now);
                batch.put_cf(&meta_cf, destination, meta.encode());
                version
            }
        };
        for (member, &score) in scored {
            batch.put_cf(
                &member_cf,
                encode_data_key(destination, version, member),
                encode_score(score),
            );
            batch.put_cf(
                &score_cf,
                encode_data_key(destination, version, &score_suffix(score, member)),
                [],
            );
        }
        db.write(batch)?;
        self.core.update_key_statistics(destination, statistic);
        Ok(scored.len() as i32)
    }

    /// Union of the inputs with per-key weights, written to `destination`.
    pub fn zunionstore(
        &self,
        destination: &[u8],
        keys: &[Vec<u8>],
        weights: &[f64],
        agg: Aggregate,
    ) -> Result<i32> {
        if keys.is_empty() {
            return Err(Error::Corruption(
                "ZUnionstore invalid parameter, no keys".to_string(),
            ));
        }

        let db = &self.core.db;
        let _guard = self.core.lock_mgr.lock(destination);
        let snap = db.snapshot();
        let member_cf = cf(db, MEMBER_CF)?;
        let now = unix_seconds();

        let mut scored: BTreeMap<Vec<u8>, f64> = BTreeMap::new();
        for (index, key) in keys.iter().enumerate() {
            let Some(version) = self.live_version(key, now)? else {
                continue;
            };
            let weight = Self::weight(weights, index);
            let prefix = version_prefix(key, version);
            for item in
                snap.iterator_cf(&member_cf, IteratorMode::From(&prefix, Direction::Forward))
            {
                let (data_key, value) = item?;
                if !data_key.starts_with(&prefix) {
                    break;
                }
                let member = parse_data_key(&data_key)?.suffix().to_vec();
                let weighted = decode_score(&value)? * weight;
                scored
                    .entry(member)
                    .and_modify(|score| *score = agg.apply(*score, weighted))
                    .or_insert(weighted);
            }
        }
        self.store_score_members(destination, &scored)
    }

    /// Intersection of the inputs with per-key weights, written to
    /// `destination`. Any absent or dead input empties the result.
    pub fn zinterstore(
        &self,
        destination: &[u8],
        keys: &[Vec<u8>],
        weights: &[f64],
        agg: Aggregate,
    ) -> Result<i32> {
        if keys.is_empty() {
            return Err(Error::Corruption(
                "ZInterstore invalid parameter, no keys".to_string(),
            ));
        }

        let db = &self.core.db;
        let _guard = self.core.lock_mgr.lock(destination);
        let snap = db.snapshot();
        let member_cf = cf(db, MEMBER_CF)?;
        let now = unix_seconds();

        let mut versions = Vec::with_capacity(keys.len());
        let mut all_live = true;
        for key in keys {
            match self.live_version(key, now)? {
                Some(version) => versions.push(version),
                None => {
                    all_live = false;
                    break;
                }
            }
        }

        let mut scored: BTreeMap<Vec<u8>, f64> = BTreeMap::new();
        if all_live {
            let prefix = version_prefix(&keys[0], versions[0]);
            'members: for item in
                snap.iterator_cf(&member_cf, IteratorMode::From(&prefix, Direction::Forward))
            {
                let (data_key, value) = item?;
                if !data_key.starts_with(&prefix) {
                    break;
                }
                let member = parse_data_key(&data_key)?.suffix().to_vec();
                let mut score = decode_score(&value)? * Self::weight(weights, 0);
                for (index, key) in keys.iter().enumerate().skip(1) {
                    let probe = encode_data_key(key, versions[index], &member);
                    match snap.get_cf(&member_cf, &probe)? {
                        Some(bytes) => {
                            let weighted = decode_score(&bytes)? * Self::weight(weights, index);
                            score = agg.apply(score, weighted);
                        }
                        None => continue 'members,
                    }
                }
                scored.insert(member, score);
            }
        }
        self.store_score_members(destination, &scored)
    }
}

delegate_type_engine!(ZsetsEngine, DataType::ZSets);
