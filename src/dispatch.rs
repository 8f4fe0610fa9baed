// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Dual mutation dispatch.
//!
//! Every mutation kind has two halves:
//!
//! ```text
//!   exec   ─ apply to the cache and notify listeners
//!   queue  ─ record it in the ledger for the next distribution
//! ```
//!
//! Local mutations run exec then queue. Remote echoes run exec only.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::cache::RecordCache;
use crate::codec::{Encoding, MediaTypeRegistry, Payload};
use crate::error::ArchivistError;
use crate::ledger::{ChangeLedger, LazyDiff};
use crate::record::{CachedRecord, DiffSource};
use crate::record_key::RecordKey;
use crate::remote::{RawValue, ServerClock};

/// What happened to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Set,
    Add,
    Touch,
    Del,
    ApplyDiff,
}

impl EventKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Set => "set",
            Self::Add => "add",
            Self::Touch => "touch",
            Self::Del => "del",
            Self::ApplyDiff => "applyDiff",
        }
    }
}

/// Notification sent after a record changed in the cache.
#[derive(Debug, Clone)]
pub struct RecordEvent {
    pub topic: String,
    pub kind: EventKind,
    pub record: Arc<CachedRecord>,
}

pub struct Dispatcher {
    cache: RecordCache,
    ledger: ChangeLedger,
    registry: Arc<MediaTypeRegistry>,
    clock: Option<Arc<dyn ServerClock>>,
    events: broadcast::Sender<RecordEvent>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<MediaTypeRegistry>,
        clock: Option<Arc<dyn ServerClock>>,
        notification_capacity: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(notification_capacity.max(1));
        Self {
            cache: RecordCache::new(),
            ledger: ChangeLedger::new(),
            registry,
            clock,
            events,
        }
    }

    #[must_use]
    pub fn cache(&self) -> &RecordCache {
        &self.cache
    }

    #[must_use]
    pub fn ledger(&self) -> &ChangeLedger {
        &self.ledger
    }

    #[must_use]
    pub fn registry(&self) -> &MediaTypeRegistry {
        &self.registry
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecordEvent> {
        self.events.subscribe()
    }

    fn emit(&self, kind: EventKind, record: &Arc<CachedRecord>) {
        crate::metrics::record_mutation("exec", kind.as_str());
        // No receivers is fine
        let _ = self.events.send(RecordEvent {
            topic: record.topic().to_string(),
            kind,
            record: Arc::clone(record),
        });
    }

    fn clock(&self) -> Option<&dyn ServerClock> {
        self.clock.as_deref()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // exec: cache + notification
    // ═══════════════════════════════════════════════════════════════════════

    /// Store a payload, creating the record if needed.
    ///
    /// A new record only enters the cache once its payload was written, so
    /// a failed write never leaves a "known absent" record behind.
    pub fn exec_set(
        &self,
        key: &RecordKey,
        payload: Payload,
        media_type: Option<&str>,
        expiration_time: Option<u64>,
    ) -> Result<Arc<CachedRecord>, ArchivistError> {
        let record = self
            .cache
            .upsert(key, |record| record.set_payload(&self.registry, media_type, payload))?;
        record.touch(expiration_time, self.clock());
        self.emit(EventKind::Set, &record);
        Ok(record)
    }

    /// Store a payload unless the record already holds one.
    ///
    /// Returns `None` (and changes nothing) when a value exists.
    pub fn exec_add(
        &self,
        key: &RecordKey,
        payload: Payload,
        media_type: Option<&str>,
        expiration_time: Option<u64>,
    ) -> Result<Option<Arc<CachedRecord>>, ArchivistError> {
        let Some(record) = self
            .cache
            .fill_empty(key, |record| record.set_payload(&self.registry, media_type, payload))?
        else {
            warn!(key = %key, "Could not add value, it already exists");
            return Ok(None);
        };
        record.touch(expiration_time, self.clock());
        self.emit(EventKind::Add, &record);
        Ok(Some(record))
    }

    pub fn exec_touch(&self, key: &RecordKey, expiration_time: Option<u64>) -> Option<Arc<CachedRecord>> {
        let record = self.cache.get(&key.true_name())?;
        record.touch(expiration_time, self.clock());
        self.emit(EventKind::Touch, &record);
        Some(record)
    }

    /// Mark the value absent. The record stays cached so later reads
    /// know the value is gone without asking the remote store.
    pub fn exec_del(&self, key: &RecordKey) -> Option<Arc<CachedRecord>> {
        let record = self.cache.get(&key.true_name())?;
        record.del();
        self.emit(EventKind::Del, &record);
        Some(record)
    }

    /// Apply a patch to a cached record. Local patches stay visible to the
    /// next diff extraction; remote ones do not.
    pub fn exec_apply_diff(
        &self,
        key: &RecordKey,
        diff: Option<&Value>,
        expiration_time: Option<u64>,
        source: DiffSource,
    ) -> Result<Option<Arc<CachedRecord>>, ArchivistError> {
        let Some(record) = self.cache.get(&key.true_name()) else {
            debug!(key = %key, "Got a diff for a value that is not cached");
            return Ok(None);
        };
        record.apply_diff(&self.registry, diff, source)?;
        record.touch(expiration_time, self.clock());
        self.emit(EventKind::ApplyDiff, &record);
        Ok(Some(record))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // queue: pending-change ledger
    // ═══════════════════════════════════════════════════════════════════════

    /// Transport form of a payload: live values are encoded to utf8 or
    /// base64 under their (possibly guessed) media type.
    fn to_raw(&self, key: &RecordKey, payload: Payload, media_type: Option<&str>) -> Result<RawValue, ArchivistError> {
        let media_type = match (&payload, media_type) {
            (_, Some(mt)) => Some(mt.to_string()),
            (Payload::Live(live), None) => self.registry.guess_media_type(live),
            (_, None) => None,
        };
        let media_type = media_type.ok_or_else(|| ArchivistError::MediaTypeRequired {
            topic: key.topic.clone(),
        })?;

        let encoded = self
            .registry
            .encode(payload, &media_type, &[Encoding::Utf8, Encoding::Base64])?;
        Ok(RawValue::from_payload(encoded, media_type))
    }

    pub fn queue_set(
        &self,
        key: &RecordKey,
        payload: Payload,
        media_type: Option<&str>,
        expiration_time: Option<u64>,
    ) -> Result<(), ArchivistError> {
        let raw = self.to_raw(key, payload, media_type)?;
        self.ledger.queue_set(key, raw, expiration_time);
        crate::metrics::record_mutation("queue", "set");
        Ok(())
    }

    pub fn queue_add(
        &self,
        key: &RecordKey,
        payload: Payload,
        media_type: Option<&str>,
        expiration_time: Option<u64>,
    ) -> Result<(), ArchivistError> {
        let raw = self.to_raw(key, payload, media_type)?;
        self.ledger.queue_add(key, raw, expiration_time)?;
        crate::metrics::record_mutation("queue", "add");
        Ok(())
    }

    pub fn queue_touch(&self, key: &RecordKey, expiration_time: Option<u64>) {
        self.ledger.queue_touch(key, expiration_time);
        crate::metrics::record_mutation("queue", "touch");
    }

    pub fn queue_del(&self, key: &RecordKey) {
        self.ledger.queue_del(key);
        crate::metrics::record_mutation("queue", "del");
    }

    /// Queue a diff that is read from the cached record when the batch is
    /// serialized.
    pub fn queue_apply_diff(&self, key: &RecordKey) -> Result<(), ArchivistError> {
        self.ledger.queue_diff(key, || {
            let true_name = key.true_name();
            let record = self.cache.get(&true_name);
            let media_type = record.as_ref().and_then(|r| r.media_type());
            let differ = media_type.as_deref().and_then(|mt| self.registry.differ_for(mt));

            match (record, differ) {
                (Some(record), Some(differ)) => {
                    let extract: LazyDiff = Box::new(move || record.extract_diff(differ.as_ref()));
                    Ok(extract)
                }
                _ => Err(ArchivistError::CannotDiffMediaType { true_name, media_type }),
            }
        })?;
        crate::metrics::record_mutation("queue", "applyDiff");
        Ok(())
    }
}
