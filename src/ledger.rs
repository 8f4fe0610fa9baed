// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Pending-change ledger.
//!
//! Holds at most one not-yet-distributed change per record, keyed by true
//! name and kept in the order keys first received a change. New mutations
//! merge into the existing change:
//!
//! | incoming | existing | result |
//! |---|---|---|
//! | set | any | replaced by the set |
//! | add | none | add |
//! | add | any | `ConflictingPendingChange` |
//! | touch | del | unchanged |
//! | touch | none | touch |
//! | touch | other | same op, new expiration |
//! | del | any | bare del |
//! | diff | payload, del or diff | unchanged |
//! | diff | none or touch | set with a lazy diff |
//!
//! A replacement keeps the key's position in the batch.
//!
//! # Example
//!
//! ```
//! use archivist::ledger::{ChangeLedger, Operation};
//! use archivist::RecordKey;
//!
//! let ledger = ChangeLedger::new();
//! let key = RecordKey::topic_only("settings");
//!
//! ledger.queue_touch(&key, Some(1_900_000_000));
//! ledger.queue_del(&key);
//! ledger.queue_touch(&key, Some(1_900_000_500));
//!
//! let pending = ledger.views();
//! assert_eq!(pending.len(), 1);
//! assert_eq!(pending[0].operation, Operation::Del);
//! ```

use std::fmt;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use crate::codec::CodecError;
use crate::error::ArchivistError;
use crate::record_key::RecordKey;
use crate::remote::types::{RawValue, SerializedChange};

pub use crate::remote::types::Operation;

/// Deferred diff extraction, run once when the batch is serialized.
pub type LazyDiff = Box<dyn FnOnce() -> Result<Value, CodecError> + Send>;

/// One not-yet-distributed change.
pub struct PendingChange {
    key: RecordKey,
    operation: Operation,
    value: Option<RawValue>,
    diff: Option<LazyDiff>,
    expiration_time: Option<u64>,
}

impl PendingChange {
    fn new(key: RecordKey, operation: Operation) -> Self {
        Self {
            key,
            operation,
            value: None,
            diff: None,
            expiration_time: None,
        }
    }

    #[must_use]
    pub fn key(&self) -> &RecordKey {
        &self.key
    }

    #[must_use]
    pub fn operation(&self) -> Operation {
        self.operation
    }

    #[must_use]
    pub fn value(&self) -> Option<&RawValue> {
        self.value.as_ref()
    }

    #[must_use]
    pub fn has_diff(&self) -> bool {
        self.diff.is_some()
    }

    #[must_use]
    pub fn expiration_time(&self) -> Option<u64> {
        self.expiration_time
    }

    /// Wire form. Runs the lazy diff, if any.
    pub fn serialize(self) -> Result<SerializedChange, CodecError> {
        let diff = match self.diff {
            Some(extract) => Some(extract()?),
            None => None,
        };
        Ok(SerializedChange {
            topic: self.key.topic,
            index: self.key.index,
            operation: self.operation,
            value: self.value,
            diff,
            expiration_time: self.expiration_time,
        })
    }

    fn view(&self) -> ChangeView {
        ChangeView {
            key: self.key.clone(),
            operation: self.operation,
            value: self.value.clone(),
            has_diff: self.diff.is_some(),
            expiration_time: self.expiration_time,
        }
    }
}

impl fmt::Debug for PendingChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingChange")
            .field("key", &self.key)
            .field("operation", &self.operation)
            .field("value", &self.value)
            .field("diff", &self.diff.is_some())
            .field("expiration_time", &self.expiration_time)
            .finish()
    }
}

/// Read-only copy of a pending change, for inspection.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeView {
    pub key: RecordKey,
    pub operation: Operation,
    pub value: Option<RawValue>,
    pub has_diff: bool,
    pub expiration_time: Option<u64>,
}

#[derive(Default)]
pub struct ChangeLedger {
    changes: Mutex<IndexMap<String, PendingChange>>,
}

impl ChangeLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a set. Overrides whatever was pending.
    pub fn queue_set(&self, key: &RecordKey, value: RawValue, expiration_time: Option<u64>) {
        let mut change = PendingChange::new(key.clone(), Operation::Set);
        change.value = Some(value);
        change.expiration_time = expiration_time;
        self.changes.lock().insert(key.true_name(), change);
    }

    /// Queue an add. Fails if anything is already pending for the key.
    pub fn queue_add(
        &self,
        key: &RecordKey,
        value: RawValue,
        expiration_time: Option<u64>,
    ) -> Result<(), ArchivistError> {
        let true_name = key.true_name();
        let mut changes = self.changes.lock();
        if changes.contains_key(&true_name) {
            return Err(ArchivistError::ConflictingPendingChange { true_name });
        }
        let mut change = PendingChange::new(key.clone(), Operation::Add);
        change.value = Some(value);
        change.expiration_time = expiration_time;
        changes.insert(true_name, change);
        Ok(())
    }

    /// Queue an expiration change. Never overrides a pending del.
    pub fn queue_touch(&self, key: &RecordKey, expiration_time: Option<u64>) {
        let mut changes = self.changes.lock();
        let change = changes
            .entry(key.true_name())
            .or_insert_with(|| PendingChange::new(key.clone(), Operation::Touch));
        if change.operation != Operation::Del {
            change.expiration_time = expiration_time;
        }
    }

    /// Queue a delete. Overrides whatever was pending.
    pub fn queue_del(&self, key: &RecordKey) {
        self.changes
            .lock()
            .insert(key.true_name(), PendingChange::new(key.clone(), Operation::Del));
    }

    /// Queue an incremental change.
    ///
    /// Skipped when a payload or del is already pending (they supersede
    /// any diff), or a diff is already pending (it will pick up this
    /// change too). Otherwise `make` builds the lazy diff and the change
    /// becomes a `set`.
    pub fn queue_diff(
        &self,
        key: &RecordKey,
        make: impl FnOnce() -> Result<LazyDiff, ArchivistError>,
    ) -> Result<(), ArchivistError> {
        let true_name = key.true_name();
        let mut changes = self.changes.lock();

        if let Some(existing) = changes.get(&true_name) {
            if existing.value.is_some() || existing.operation == Operation::Del || existing.diff.is_some() {
                debug!(true_name = %true_name, operation = %existing.operation, "Diff superseded by pending change");
                return Ok(());
            }
        }

        let diff = make()?;
        let change = changes
            .entry(true_name)
            .or_insert_with(|| PendingChange::new(key.clone(), Operation::Set));
        change.operation = Operation::Set;
        change.diff = Some(diff);
        Ok(())
    }

    /// Take every pending change in order, leaving the ledger empty.
    pub fn take_all(&self) -> Vec<PendingChange> {
        std::mem::take(&mut *self.changes.lock())
            .into_values()
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.changes.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.lock().is_empty()
    }

    #[must_use]
    pub fn contains(&self, key: &RecordKey) -> bool {
        self.changes.lock().contains_key(&key.true_name())
    }

    /// Copy of the pending change for a key.
    #[must_use]
    pub fn peek(&self, key: &RecordKey) -> Option<ChangeView> {
        self.changes.lock().get(&key.true_name()).map(PendingChange::view)
    }

    /// Copies of every pending change, in batch order.
    #[must_use]
    pub fn views(&self) -> Vec<ChangeView> {
        self.changes.lock().values().map(PendingChange::view).collect()
    }
}
