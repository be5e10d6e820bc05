// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Binary layouts for meta values and data keys.
//!
//! Every composite-type key is split across a meta column family (one row
//! per logical key: count, version, expiry) and one or more data column
//! families (one row per element, keyed by user key + version + element).
//! The version stamp embedded in every data key is what isolates live data
//! from tombstoned incarnations; the compaction filters rely on it.
//!
//! Layouts are fixed: meta fields are little-endian, data-key components
//! that must sort are big-endian. Decoders validate minimum length but
//! tolerate trailing bytes so type-specific extensions can ride behind the
//! base header.

mod data_key;
mod meta;
mod score;

pub use data_key::{
    data_compact_bounds, encode_data_key, meta_compact_bounds, parse_data_key, user_key_prefix,
    version_prefix, ParsedDataKey,
};
pub use meta::{
    ListsMetaValue, MetaValue, StringsValue, BASE_META_LEN, INITIAL_LIST_INDEX, LISTS_META_LEN,
    STRINGS_VALUE_LEN,
};
pub use score::{decode_score, encode_score};
