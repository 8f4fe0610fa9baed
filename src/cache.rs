// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Record cache: true name → cached record.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use crate::record::CachedRecord;
use crate::record_key::RecordKey;

#[derive(Debug, Default)]
pub struct RecordCache {
    records: DashMap<String, Arc<CachedRecord>>,
}

impl RecordCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached record for a true name, if present and (when `max_age` is
    /// given) written within `max_age`.
    ///
    /// Overdue expirations are applied here, so a record whose deadline
    /// passed is found with no value rather than a stale one.
    #[must_use]
    pub fn lookup(&self, true_name: &str, max_age: Option<Duration>) -> Option<Arc<CachedRecord>> {
        let record = self.records.get(true_name)?.value().clone();
        record.expire_if_due();
        if let Some(max_age) = max_age {
            if !record.is_fresh(max_age) {
                debug!(true_name = %true_name, ?max_age, "Cached record too old");
                return None;
            }
        }
        Some(record)
    }

    /// Cached record regardless of age.
    #[must_use]
    pub fn get(&self, true_name: &str) -> Option<Arc<CachedRecord>> {
        self.lookup(true_name, None)
    }

    /// Existing record for the key, or a new empty one.
    pub fn get_or_create(&self, key: &RecordKey) -> Arc<CachedRecord> {
        self.records
            .entry(key.true_name())
            .or_insert_with(|| Arc::new(CachedRecord::new(key.clone())))
            .value()
            .clone()
    }

    /// Write into the record for `key` under its entry lock, creating it
    /// if needed. A new record is only cached once `write` succeeded.
    pub fn upsert<E>(
        &self,
        key: &RecordKey,
        write: impl FnOnce(&CachedRecord) -> Result<(), E>,
    ) -> Result<Arc<CachedRecord>, E> {
        match self.records.entry(key.true_name()) {
            Entry::Occupied(entry) => {
                let record = entry.get();
                write(record)?;
                Ok(Arc::clone(record))
            }
            Entry::Vacant(entry) => {
                let record = Arc::new(CachedRecord::new(key.clone()));
                write(&record)?;
                entry.insert(Arc::clone(&record));
                Ok(record)
            }
        }
    }

    /// Like [`Self::upsert`], but leaves a record that holds a value alone
    /// and returns `Ok(None)`.
    pub fn fill_empty<E>(
        &self,
        key: &RecordKey,
        write: impl FnOnce(&CachedRecord) -> Result<(), E>,
    ) -> Result<Option<Arc<CachedRecord>>, E> {
        match self.records.entry(key.true_name()) {
            Entry::Occupied(entry) => {
                let record = entry.get();
                record.expire_if_due();
                if record.has_value() {
                    return Ok(None);
                }
                write(record)?;
                Ok(Some(Arc::clone(record)))
            }
            Entry::Vacant(entry) => {
                let record = Arc::new(CachedRecord::new(key.clone()));
                write(&record)?;
                entry.insert(Arc::clone(&record));
                Ok(Some(record))
            }
        }
    }

    /// Cache a record, replacing any record under the same true name.
    pub fn insert(&self, record: Arc<CachedRecord>) {
        if let Some(previous) = self.records.insert(record.true_name().to_string(), record) {
            previous.cancel_expiry();
        }
    }

    #[must_use]
    pub fn contains(&self, true_name: &str) -> bool {
        self.records.contains_key(true_name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop every record and cancel their expiry timers.
    pub fn clear(&self) {
        let count = self.records.len();
        for entry in self.records.iter() {
            entry.value().cancel_expiry();
        }
        self.records.clear();
        debug!(count, "Cache cleared");
    }

    /// Every cached record, in no particular order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<CachedRecord>> {
        self.records.iter().map(|entry| entry.value().clone()).collect()
    }
}
