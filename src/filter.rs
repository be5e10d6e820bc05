// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Compaction filters: the garbage collector.
//!
//! Logical deletes only rewrite the meta row; the orphaned data rows leave
//! disk here, during background merges. The data filter re-reads the
//! current meta for each row's user key and drops the row when the meta is
//! absent, stale, or carries a different version. Correctness of the whole
//! delete protocol rests on that version check.
//!
//! Filters are created per compaction by their factories; the data filter
//! reaches back into the owning database through a [`FilterHandle`] that is
//! installed after open (the factory has to exist before the database
//! does).

use std::ffi::CStr;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use rocksdb::compaction_filter::{CompactionFilter, Decision};
use rocksdb::compaction_filter_factory::{CompactionFilterContext, CompactionFilterFactory};
use rocksdb::{DBWithThreadMode, MultiThreaded};
use tracing::warn;

use crate::codec::{parse_data_key, MetaValue, StringsValue};
use crate::util::unix_seconds;

pub(crate) type Db = DBWithThreadMode<MultiThreaded>;

/// Late-bound database reference for filter factories.
///
/// Holds a `Weak` so a database mid-teardown is observed as absent rather
/// than kept alive by its own compaction machinery; filters keep every row
/// they cannot check.
#[derive(Clone, Default)]
pub struct FilterHandle {
    slot: Arc<RwLock<Option<Weak<Db>>>>,
}

impl FilterHandle {
    pub fn install(&self, db: &Arc<Db>) {
        *self.slot.write() = Some(Arc::downgrade(db));
    }

    fn db(&self) -> Option<Arc<Db>> {
        self.slot.read().as_ref().and_then(Weak::upgrade)
    }
}

/// Drops dead or expired meta rows once they are old enough that no
/// in-flight operation can still be writing against them. Versions are
/// time-correlated, so `version < now` means the incarnation was not
/// created within the current second.
pub struct MetaFilter {
    now: i64,
}

impl CompactionFilter for MetaFilter {
    fn filter(&mut self, _level: u32, _key: &[u8], value: &[u8]) -> Decision {
        let meta = match MetaValue::decode(value) {
            Ok(meta) => meta,
            Err(_) => return Decision::Keep,
        };
        let version_old = i64::from(meta.version) < self.now;
        if meta.timestamp != 0 && i64::from(meta.timestamp) < self.now && version_old {
            return Decision::Remove;
        }
        if meta.is_empty() && version_old {
            return Decision::Remove;
        }
        Decision::Keep
    }

    fn name(&self) -> &CStr {
        c"cinnabar.meta-filter"
    }
}

#[derive(Default)]
pub struct MetaFilterFactory;

impl CompactionFilterFactory for MetaFilterFactory {
    type Filter = MetaFilter;

    fn create(&mut self, _context: CompactionFilterContext) -> Self::Filter {
        MetaFilter {
            now: unix_seconds(),
        }
    }

    fn name(&self) -> &CStr {
        c"cinnabar.meta-filter-factory"
    }
}

/// Drops data rows orphaned by version bumps, expiry, or meta removal.
///
/// Consecutive rows of one user key share a single meta lookup; the cached
/// verdict is invalidated whenever the user key changes.
pub struct DataFilter {
    handle: FilterHandle,
    meta_cf: &'static str,
    now: i64,
    cur_user_key: Vec<u8>,
    cur_meta: Option<CachedMeta>,
    cache_valid: bool,
}

#[derive(Clone, Copy)]
struct CachedMeta {
    version: u32,
    timestamp: i32,
}

impl DataFilter {
    fn lookup_meta(&self, user_key: &[u8]) -> Result<Option<CachedMeta>, ()> {
        let db = self.handle.db().ok_or(())?;
        let cf = db.cf_handle(self.meta_cf).ok_or(())?;
        match db.get_pinned_cf(&cf, user_key) {
            Ok(Some(bytes)) => match MetaValue::decode(&bytes) {
                Ok(meta) => Ok(Some(CachedMeta {
                    version: meta.version,
                    timestamp: meta.timestamp,
                })),
                Err(_) => Err(()),
            },
            Ok(None) => Ok(None),
            Err(e) => {
                warn!(error = %e, "data filter meta read failed, keeping row");
                Err(())
            }
        }
    }
}

impl CompactionFilter for DataFilter {
    fn filter(&mut self, _level: u32, key: &[u8], _value: &[u8]) -> Decision {
        let parsed = match parse_data_key(key) {
            Ok(parsed) => parsed,
            Err(_) => return Decision::Keep,
        };

        if !self.cache_valid || parsed.user_key() != self.cur_user_key.as_slice() {
            self.cur_user_key = parsed.user_key().to_vec();
            match self.lookup_meta(parsed.user_key()) {
                Ok(meta) => {
                    self.cur_meta = meta;
                    self.cache_valid = true;
                }
                Err(()) => {
                    // Transient failure: retain the row, retry next pass.
                    self.cache_valid = false;
                    return Decision::Keep;
                }
            }
        }

        match self.cur_meta {
            None => Decision::Remove,
            Some(meta) => {
                if meta.timestamp != 0 && i64::from(meta.timestamp) <= self.now {
                    return Decision::Remove;
                }
                if meta.version != parsed.version() {
                    return Decision::Remove;
                }
                Decision::Keep
            }
        }
    }

    fn name(&self) -> &CStr {
        c"cinnabar.data-filter"
    }
}

pub struct DataFilterFactory {
    handle: FilterHandle,
    meta_cf: &'static str,
}

impl DataFilterFactory {
    pub fn new(handle: FilterHandle, meta_cf: &'static str) -> Self {
        Self { handle, meta_cf }
    }
}

impl CompactionFilterFactory for DataFilterFactory {
    type Filter = DataFilter;

    fn create(&mut self, _context: CompactionFilterContext) -> Self::Filter {
        DataFilter {
            handle: self.handle.clone(),
            meta_cf: self.meta_cf,
            now: unix_seconds(),
            cur_user_key: Vec::new(),
            cur_meta: None,
            cache_valid: false,
        }
    }

    fn name(&self) -> &CStr {
        c"cinnabar.data-filter-factory"
    }
}

/// Drops expired string rows.
pub struct StringsFilter {
    now: i64,
}

impl CompactionFilter for StringsFilter {
    fn filter(&mut self, _level: u32, _key: &[u8], value: &[u8]) -> Decision {
        match StringsValue::decode(value) {
            Ok(sv) if sv.is_stale(self.now) => Decision::Remove,
            _ => Decision::Keep,
        }
    }

    fn name(&self) -> &CStr {
        c"cinnabar.strings-filter"
    }
}

#[derive(Default)]
pub struct StringsFilterFactory;

impl CompactionFilterFactory for StringsFilterFactory {
    type Filter = StringsFilter;

    fn create(&mut self, _context: CompactionFilterContext) -> Self::Filter {
        StringsFilter {
            now: unix_seconds(),
        }
    }

    fn name(&self) -> &CStr {
        c"cinnabar.strings-filter-factory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_data_key;

    fn meta_bytes(count: u32, version: u32, timestamp: i32) -> Vec<u8> {
        MetaValue {
            count,
            version,
            timestamp,
            extra: Vec::new(),
        }
        .encode()
    }

    #[test]
    fn test_meta_filter_keeps_live_rows() {
        let mut f = MetaFilter { now: 1000 };
        let value = meta_bytes(3, 500, 0);
        assert!(matches!(f.filter(0, b"k", &value), Decision::Keep));
    }

    #[test]
    fn test_meta_filter_drops_old_dead_rows() {
        let mut f = MetaFilter { now: 1000 };
        let value = meta_bytes(0, 500, 0);
        assert!(matches!(f.filter(0, b"k", &value), Decision::Remove));
    }

    #[test]
    fn test_meta_filter_preserves_recently_touched() {
        // A dead incarnation created this second may still be racing with a
        // writer; keep it for the next pass.
        let mut f = MetaFilter { now: 1000 };
        let value = meta_bytes(0, 1000, 0);
        assert!(matches!(f.filter(0, b"k", &value), Decision::Keep));
    }

    #[test]
    fn test_meta_filter_drops_expired_rows() {
        let mut f = MetaFilter { now: 1000 };
        let value = meta_bytes(5, 500, 900);
        assert!(matches!(f.filter(0, b"k", &value), Decision::Remove));
    }

    #[test]
    fn test_meta_filter_keeps_undecodable_rows() {
        let mut f = MetaFilter { now: 1000 };
        assert!(matches!(f.filter(0, b"k", b"xy"), Decision::Keep));
    }

    #[test]
    fn test_strings_filter() {
        let mut f = StringsFilter { now: 1000 };

        let mut live = StringsValue::new(b"v".to_vec());
        live.timestamp = 2000;
        assert!(matches!(f.filter(0, b"k", &live.encode()), Decision::Keep));

        let mut expired = StringsValue::new(b"v".to_vec());
        expired.timestamp = 999;
        assert!(matches!(
            f.filter(0, b"k", &expired.encode()),
            Decision::Remove
        ));

        let persistent = StringsValue::new(b"v".to_vec());
        assert!(matches!(
            f.filter(0, b"k", &persistent.encode()),
            Decision::Keep
        ));
    }

    #[test]
    fn test_data_filter_without_database_keeps_rows() {
        // No database installed: every row must survive.
        let mut f = DataFilter {
            handle: FilterHandle::default(),
            meta_cf: "default",
            now: 1000,
            cur_user_key: Vec::new(),
            cur_meta: None,
            cache_valid: false,
        };
        let key = encode_data_key(b"k", 3, b"member");
        assert!(matches!(f.filter(0, &key, b""), Decision::Keep));
    }

    #[test]
    fn test_data_filter_keeps_undecodable_keys() {
        let mut f = DataFilter {
            handle: FilterHandle::default(),
            meta_cf: "default",
            now: 1000,
            cur_user_key: Vec::new(),
            cur_meta: None,
            cache_valid: false,
        };
        assert!(matches!(f.filter(0, &[1, 2], b""), Decision::Keep));
    }
}
