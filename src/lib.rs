// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Cinnabar: a multi-model key/value storage engine on RocksDB.
//!
//! Implements the Redis data types (strings, hashes, sets, sorted sets,
//! lists, HyperLogLog) over a flat ordered byte store, one RocksDB
//! database per type. Composite values are split across a meta column
//! family (one row per logical key: element count, version, expiry) and
//! data column families (one row per element, keyed by user key, version,
//! and element).
//!
//! # Key Concepts
//!
//! - **Logical delete by version bump.** Deleting or expiring a
//!   collection rewrites only its meta row with a fresh version; the old
//!   elements become unreachable immediately and are physically reclaimed
//!   later by compaction filters that compare each data row's embedded
//!   version against the current meta. Delete is O(1) regardless of
//!   collection size.
//! - **Record locks + write batches.** Each mutation serializes on its
//!   logical key and commits through a single atomic multi-CF write
//!   batch. Multi-key operations sort before locking. Readers use
//!   snapshots and never block writers.
//! - **Background compaction scheduling.** Delete-heavy keys accumulate
//!   statistics that queue targeted range compactions on a worker thread.
//!
//! # Example
//!
//! ```no_run
//! use cinnabar::{Cinnabar, Options};
//!
//! let store = Cinnabar::open(&Options::default(), "/tmp/cinnabar")?;
//! store.sets().sadd(b"fruits", &[b"apple".to_vec(), b"pear".to_vec()])?;
//! assert_eq!(store.sets().scard(b"fruits")?, 2);
//!
//! store.del(&[b"fruits".to_vec()]);
//! # Ok::<(), cinnabar::Error>(())
//! ```

pub mod cache;
pub mod codec;
pub mod engine;
pub mod error;
pub mod filter;
pub mod hyperloglog;
pub mod lock;
pub mod options;
pub mod store;
pub mod types;
pub mod util;

pub use engine::{HashesEngine, ListsEngine, SetsEngine, StringsEngine, ZsetsEngine};
pub use error::{Error, Result};
pub use hyperloglog::HyperLogLog;
pub use options::Options;
pub use store::Cinnabar;
pub use types::{
    Aggregate, BeforeOrAfter, ColumnFamilyKind, DataType, FieldValue, KeyInfo, KeyValue,
    ScoreMember,
};
