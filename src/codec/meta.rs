// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Meta-value layouts.
//!
//! Base header, 12 bytes little-endian: `count: u32` at byte 0,
//! `version: u32` at byte 4, `timestamp: i32` at byte 8 (absolute seconds
//! since epoch; 0 means no expiry). Type-specific trailing bytes follow.
//!
//! Strings have no data column family; their value is
//! `timestamp: i32` (LE) followed by the raw user bytes.

use crate::error::{Error, Result};

/// Length of the base meta header.
pub const BASE_META_LEN: usize = 12;

/// Length of the lists meta value: base header plus head/tail anchors.
pub const LISTS_META_LEN: usize = BASE_META_LEN + 16;

/// Length of the strings value header.
pub const STRINGS_VALUE_LEN: usize = 4;

/// Center of the list index space. The first element of a fresh list lands
/// here; pushes walk the anchors outward from it.
pub const INITIAL_LIST_INDEX: u64 = 1 << 63;

/// Meta row for hashes, sets, sorted sets, and (via [`ListsMetaValue`])
/// lists.
///
/// A meta row with `count == 0`, or with a non-zero `timestamp` at or
/// before the current time, is logically dead: its data rows are invisible
/// regardless of physical presence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaValue {
    pub count: u32,
    pub version: u32,
    pub timestamp: i32,
    /// Type-specific trailing bytes, carried through decode/encode
    /// untouched.
    pub extra: Vec<u8>,
}

impl MetaValue {
    /// A fresh meta value with the given element count and no version or
    /// expiry yet; call [`MetaValue::update_version`] before writing it.
    pub fn new(count: u32) -> Self {
        Self {
            count,
            version: 0,
            timestamp: 0,
            extra: Vec::new(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(BASE_META_LEN + self.extra.len());
        out.extend_from_slice(&self.count.to_le_bytes());
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        out.extend_from_slice(&self.extra);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < BASE_META_LEN {
            return Err(Error::Corruption(format!(
                "meta value too short: {} < {BASE_META_LEN}",
                bytes.len()
            )));
        }
        Ok(Self {
            count: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            version: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            timestamp: i32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            extra: bytes[BASE_META_LEN..].to_vec(),
        })
    }

    /// True if the expiry has passed at `now`.
    #[inline]
    pub fn is_stale(&self, now: i64) -> bool {
        self.timestamp != 0 && i64::from(self.timestamp) <= now
    }

    /// True if the incarnation holds no live elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Starts a new incarnation: bumps the version, zeroes count and
    /// expiry. Returns the new version. Prior data rows become orphans for
    /// the compaction filter.
    pub fn initial_meta_value(&mut self, now: i64) -> u32 {
        self.count = 0;
        self.timestamp = 0;
        self.update_version(now)
    }

    /// Bumps the version to `max(version + 1, now)`, keeping versions
    /// monotonic and time-correlated. The meta compaction filter's
    /// recently-touched guard depends on the time correlation.
    pub fn update_version(&mut self, now: i64) -> u32 {
        let now = now.clamp(0, i64::from(u32::MAX)) as u32;
        self.version = self.version.wrapping_add(1).max(now);
        self.version
    }

    /// Adjusts the live-element count, saturating at zero.
    pub fn modify_count(&mut self, delta: i64) {
        let count = i64::from(self.count) + delta;
        self.count = count.clamp(0, i64::from(u32::MAX)) as u32;
    }

    /// Sets an absolute expiry `ttl` seconds from `now`.
    pub fn set_relative_timestamp(&mut self, ttl: i64, now: i64) {
        self.timestamp = (now + ttl).clamp(0, i64::from(i32::MAX)) as i32;
    }
}

/// Lists meta row: base header plus the head and tail index anchors
/// (little-endian u64 trailing bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListsMetaValue {
    pub meta: MetaValue,
    pub head_index: u64,
    pub tail_index: u64,
}

impl ListsMetaValue {
    pub fn new() -> Self {
        Self {
            meta: MetaValue::new(0),
            head_index: INITIAL_LIST_INDEX,
            tail_index: INITIAL_LIST_INDEX,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(LISTS_META_LEN);
        out.extend_from_slice(&self.meta.count.to_le_bytes());
        out.extend_from_slice(&self.meta.version.to_le_bytes());
        out.extend_from_slice(&self.meta.timestamp.to_le_bytes());
        out.extend_from_slice(&self.head_index.to_le_bytes());
        out.extend_from_slice(&self.tail_index.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let meta = MetaValue::decode(bytes)?;
        if meta.extra.len() < 16 {
            return Err(Error::Corruption(format!(
                "lists meta value too short: {} < {LISTS_META_LEN}",
                bytes.len()
            )));
        }
        let head_index = u64::from_le_bytes(meta.extra[0..8].try_into().unwrap());
        let tail_index = u64::from_le_bytes(meta.extra[8..16].try_into().unwrap());
        Ok(Self {
            meta: MetaValue {
                extra: Vec::new(),
                ..meta
            },
            head_index,
            tail_index,
        })
    }

    /// Starts a new incarnation and recenters the index anchors.
    pub fn initial_meta_value(&mut self, now: i64) -> u32 {
        self.head_index = INITIAL_LIST_INDEX;
        self.tail_index = INITIAL_LIST_INDEX;
        self.meta.initial_meta_value(now)
    }
}

impl Default for ListsMetaValue {
    fn default() -> Self {
        Self::new()
    }
}

/// Strings value: expiry header followed by the raw user bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringsValue {
    pub timestamp: i32,
    pub value: Vec<u8>,
}

impl StringsValue {
    pub fn new(value: Vec<u8>) -> Self {
        Self {
            timestamp: 0,
            value,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(STRINGS_VALUE_LEN + self.value.len());
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        out.extend_from_slice(&self.value);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < STRINGS_VALUE_LEN {
            return Err(Error::Corruption(format!(
                "strings value too short: {} < {STRINGS_VALUE_LEN}",
                bytes.len()
            )));
        }
        Ok(Self {
            timestamp: i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            value: bytes[STRINGS_VALUE_LEN..].to_vec(),
        })
    }

    #[inline]
    pub fn is_stale(&self, now: i64) -> bool {
        self.timestamp != 0 && i64::from(self.timestamp) <= now
    }

    pub fn set_relative_timestamp(&mut self, ttl: i64, now: i64) {
        self.timestamp = (now + ttl).clamp(0, i64::from(i32::MAX)) as i32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_roundtrip() {
        let mut meta = MetaValue::new(7);
        meta.version = 42;
        meta.timestamp = 1_700_000_000;
        meta.extra = vec![1, 2, 3];

        let decoded = MetaValue::decode(&meta.encode()).unwrap();
        assert_eq!(decoded, meta);
    }

    #[test]
    fn test_meta_decode_tolerates_trailing_bytes() {
        let mut encoded = MetaValue::new(1).encode();
        encoded.extend_from_slice(b"future extension");
        let decoded = MetaValue::decode(&encoded).unwrap();
        assert_eq!(decoded.count, 1);
        assert_eq!(decoded.extra, b"future extension");
    }

    #[test]
    fn test_meta_decode_too_short() {
        assert!(MetaValue::decode(&[0u8; 11]).is_err());
    }

    #[test]
    fn test_staleness() {
        let mut meta = MetaValue::new(1);
        assert!(!meta.is_stale(1000), "no expiry is never stale");

        meta.timestamp = 500;
        assert!(meta.is_stale(500), "expiry at now is stale");
        assert!(meta.is_stale(501));
        assert!(!meta.is_stale(499));
    }

    #[test]
    fn test_initial_meta_value_bumps_version() {
        let mut meta = MetaValue::new(9);
        meta.version = 100;
        meta.timestamp = 12345;

        let v = meta.initial_meta_value(50);
        assert_eq!(v, 101, "past clock falls back to version + 1");
        assert_eq!(meta.count, 0);
        assert_eq!(meta.timestamp, 0);

        let v2 = meta.initial_meta_value(1_000_000);
        assert_eq!(v2, 1_000_000, "version follows the clock forward");
        assert!(v2 > v);
    }

    #[test]
    fn test_modify_count_saturates() {
        let mut meta = MetaValue::new(3);
        meta.modify_count(-5);
        assert_eq!(meta.count, 0);
        meta.modify_count(2);
        assert_eq!(meta.count, 2);
    }

    #[test]
    fn test_relative_timestamp() {
        let mut meta = MetaValue::new(1);
        meta.set_relative_timestamp(10, 1000);
        assert_eq!(meta.timestamp, 1010);
    }

    #[test]
    fn test_lists_meta_roundtrip() {
        let mut lists = ListsMetaValue::new();
        lists.meta.count = 4;
        lists.meta.version = 9;
        lists.head_index = INITIAL_LIST_INDEX - 100;
        lists.tail_index = INITIAL_LIST_INDEX + 200;

        let decoded = ListsMetaValue::decode(&lists.encode()).unwrap();
        assert_eq!(decoded, lists);
    }

    #[test]
    fn test_lists_meta_parses_as_base_header() {
        // Key-level operations read lists meta through the base decoder.
        let mut lists = ListsMetaValue::new();
        lists.meta.count = 4;
        lists.meta.version = 9;
        lists.meta.timestamp = 77;

        let base = MetaValue::decode(&lists.encode()).unwrap();
        assert_eq!(base.count, 4);
        assert_eq!(base.version, 9);
        assert_eq!(base.timestamp, 77);
        assert_eq!(base.extra.len(), 16);
    }

    #[test]
    fn test_lists_initial_recenters_anchors() {
        let mut lists = ListsMetaValue::new();
        lists.meta.count = 4;
        lists.head_index = 1;
        lists.tail_index = u64::MAX - 1;

        lists.initial_meta_value(1000);
        assert_eq!(lists.head_index, INITIAL_LIST_INDEX);
        assert_eq!(lists.tail_index, INITIAL_LIST_INDEX);
        assert_eq!(lists.meta.count, 0);
    }

    #[test]
    fn test_strings_roundtrip() {
        let mut sv = StringsValue::new(b"hello".to_vec());
        sv.timestamp = 123;
        let decoded = StringsValue::decode(&sv.encode()).unwrap();
        assert_eq!(decoded, sv);
    }

    #[test]
    fn test_strings_empty_value() {
        let sv = StringsValue::new(Vec::new());
        let decoded = StringsValue::decode(&sv.encode()).unwrap();
        assert!(decoded.value.is_empty());
        assert_eq!(decoded.timestamp, 0);
    }
}
