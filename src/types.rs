// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Shared value types for the engine surfaces.

/// The five data types plus the cross-type selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataType {
    Strings,
    Hashes,
    Sets,
    Lists,
    ZSets,
    All,
}

impl DataType {
    /// One-byte tag prefixed to cross-type scan cursors.
    #[inline]
    pub fn tag(self) -> u8 {
        match self {
            DataType::Strings => b'k',
            DataType::Hashes => b'h',
            DataType::Sets => b's',
            DataType::Lists => b'l',
            DataType::ZSets => b'z',
            DataType::All => b'a',
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DataType::Strings => "strings",
            DataType::Hashes => "hashes",
            DataType::Sets => "sets",
            DataType::Lists => "lists",
            DataType::ZSets => "zsets",
            DataType::All => "all",
        }
    }
}

/// Which column families a manual compaction covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnFamilyKind {
    Meta,
    Data,
    MetaAndData,
}

/// Per-type key census returned by `scan_key_num`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyInfo {
    pub keys: u64,
    pub expires: u64,
    pub avg_ttl: u64,
    pub invalid_keys: u64,
}

/// A member with its score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreMember {
    pub score: f64,
    pub member: Vec<u8>,
}

/// A hash field with its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldValue {
    pub field: Vec<u8>,
    pub value: Vec<u8>,
}

/// A key with its value, for multi-key string writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Score aggregation for ZUnionstore / ZInterstore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Sum,
    Min,
    Max,
}

impl Aggregate {
    #[inline]
    pub fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            Aggregate::Sum => a + b,
            Aggregate::Min => a.min(b),
            Aggregate::Max => a.max(b),
        }
    }
}

/// Insertion side for LInsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeforeOrAfter {
    Before,
    After,
}
