// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Write API.
//!
//! Every public mutation applies to the cache first (exec) and then
//! records the change for the next distribution (queue). When exec fails
//! the queue step is skipped.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::codec::{LiveValue, Payload};
use crate::error::ArchivistError;
use crate::options::WriteOptions;
use crate::record::{CachedRecord, DiffSource};
use crate::record_key::RecordKey;

use super::Archivist;

impl Archivist {
    /// Store a value, replacing whatever was there.
    pub fn set(
        &self,
        key: &RecordKey,
        data: impl Into<Payload>,
        options: WriteOptions,
    ) -> Result<Arc<CachedRecord>, ArchivistError> {
        let payload = data.into();
        let media_type = options.media_type.as_deref();

        let record = self
            .dispatcher()
            .exec_set(key, payload.clone(), media_type, options.expiration_time)
            .inspect_err(|e| crate::metrics::record_error("set", e.kind()))?;
        self.dispatcher()
            .queue_set(key, payload, media_type, options.expiration_time)
            .inspect_err(|e| crate::metrics::record_error("set", e.kind()))?;

        self.report_sizes();
        Ok(record)
    }

    /// Store a value only if none is cached.
    ///
    /// The add is queued even when the cache already holds a value; the
    /// remote store decides. Fails with
    /// [`ArchivistError::ConflictingPendingChange`] when the key already
    /// has a pending change.
    pub fn add(
        &self,
        key: &RecordKey,
        data: impl Into<Payload>,
        options: WriteOptions,
    ) -> Result<Option<Arc<CachedRecord>>, ArchivistError> {
        let payload = data.into();
        let media_type = options.media_type.as_deref();

        let record = self
            .dispatcher()
            .exec_add(key, payload.clone(), media_type, options.expiration_time)
            .inspect_err(|e| crate::metrics::record_error("add", e.kind()))?;
        self.dispatcher()
            .queue_add(key, payload, media_type, options.expiration_time)
            .inspect_err(|e| crate::metrics::record_error("add", e.kind()))?;

        self.report_sizes();
        Ok(record)
    }

    /// Set or clear (`None`) the expiration, in server-clock unix seconds.
    pub fn touch(&self, key: &RecordKey, expiration_time: Option<u64>) -> Option<Arc<CachedRecord>> {
        let record = self.dispatcher().exec_touch(key, expiration_time);
        self.dispatcher().queue_touch(key, expiration_time);
        self.report_sizes();
        record
    }

    /// Delete a value. A cached record stays behind without a value.
    pub fn del(&self, key: &RecordKey) -> Option<Arc<CachedRecord>> {
        let record = self.dispatcher().exec_del(key);
        self.dispatcher().queue_del(key);
        self.report_sizes();
        record
    }

    /// Apply an incremental patch to a cached value and queue it.
    ///
    /// The media type must have a differ.
    pub fn apply_diff(
        &self,
        key: &RecordKey,
        diff: &Value,
        expiration_time: Option<u64>,
    ) -> Result<Option<Arc<CachedRecord>>, ArchivistError> {
        let record = self
            .dispatcher()
            .exec_apply_diff(key, Some(diff), expiration_time, DiffSource::Local)
            .inspect_err(|e| crate::metrics::record_error("applyDiff", e.kind()))?;
        self.dispatcher()
            .queue_apply_diff(key)
            .inspect_err(|e| crate::metrics::record_error("applyDiff", e.kind()))?;

        self.report_sizes();
        Ok(record)
    }

    /// Queue a diff for a value that was changed in place.
    ///
    /// The diff is extracted when the next distribution is serialized.
    pub fn mark_changed(&self, key: &RecordKey) -> Result<(), ArchivistError> {
        self.dispatcher()
            .queue_apply_diff(key)
            .inspect_err(|e| crate::metrics::record_error("mark_changed", e.kind()))?;
        self.report_sizes();
        Ok(())
    }

    /// Mutate a cached value in place and queue the resulting diff.
    ///
    /// Fails with [`ArchivistError::CannotDiffMediaType`] before running
    /// `f` when the value is not cached or its media type has no differ.
    pub fn modify<R>(&self, key: &RecordKey, f: impl FnOnce(&mut LiveValue) -> R) -> Result<R, ArchivistError> {
        let true_name = key.true_name();
        let record = self.cache().get(&true_name);
        let media_type = record.as_ref().and_then(|r| r.media_type());
        let diffable = media_type
            .as_deref()
            .is_some_and(|mt| self.registry().differ_for(mt).is_some());

        let cannot_diff = || ArchivistError::CannotDiffMediaType {
            true_name: true_name.clone(),
            media_type: media_type.clone(),
        };
        let Some(record) = record.filter(|_| diffable) else {
            crate::metrics::record_error("modify", "cannot_diff_media_type");
            return Err(cannot_diff());
        };

        let out = record.with_data_mut(f).ok_or_else(cannot_diff)?;
        debug!(true_name = %true_name, "Value modified in place");
        self.mark_changed(key)?;
        Ok(out)
    }

    fn report_sizes(&self) {
        crate::metrics::set_cached_records(self.cache().len());
        crate::metrics::set_pending_changes(self.dispatcher().ledger().len());
    }
}
