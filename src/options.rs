// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Engine configuration.

use std::time::Duration;

/// Tunables shared by all type engines.
///
/// Every field has a production-reasonable default; construct with
/// `Options::default()` and override what you need.
#[derive(Debug, Clone)]
pub struct Options {
    /// Capacity of the per-engine per-key statistics cache.
    pub statistics_max_size: usize,
    /// Writes accumulated against one key before a `CompactKey` task is
    /// queued for it. `0` disables small-range compaction scheduling.
    pub small_compaction_threshold: u64,
    /// When false, each column family gets a private block cache of
    /// `block_cache_size` bytes instead of the rocksdb default shared one.
    pub share_block_cache: bool,
    /// Per-CF block cache size in bytes; only used when `share_block_cache`
    /// is false. `0` keeps the rocksdb default.
    pub block_cache_size: usize,
    /// Bloom filter bits per key on every column family.
    pub bloom_bits_per_key: f64,
    /// Memtable size per column family.
    pub write_buffer_size: usize,
    /// SPOP wall-clock duration above which the popped key is scheduled for
    /// compaction.
    pub spop_compact_duration: Duration,
    /// SPOP count per key above which the key is scheduled for compaction.
    pub spop_compact_count: u64,
    /// Rows per write batch during `pk_pattern_match_del`.
    pub batch_delete_limit: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            statistics_max_size: 10_000,
            small_compaction_threshold: 5_000,
            share_block_cache: true,
            block_cache_size: 0,
            bloom_bits_per_key: 10.0,
            write_buffer_size: 64 * 1024 * 1024,
            spop_compact_duration: Duration::from_millis(100),
            spop_compact_count: 500,
            batch_delete_limit: 1_000,
        }
    }
}
