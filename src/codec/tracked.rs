// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Tracked JSON documents: the built-in diffable payload.
//!
//! A [`TrackedDocument`] keeps the document the application edits plus the
//! baseline it was last synced at. The differ for
//! `application/x-tracked+json` turns the gap between the two into a JSON
//! merge patch (RFC 7386).
//!
//! Merge patches use `null` to mean "remove this member", so a member
//! explicitly set to `null` is transmitted as a removal.

use serde_json::{Map, Value};

use super::{CodecError, Differ, LiveValue};

#[derive(Debug, Clone, PartialEq)]
pub struct TrackedDocument {
    current: Value,
    baseline: Value,
}

impl TrackedDocument {
    /// A document that is fully synced at `value`.
    #[must_use]
    pub fn new(value: Value) -> Self {
        Self {
            baseline: value.clone(),
            current: value,
        }
    }

    #[must_use]
    pub fn get(&self) -> &Value {
        &self.current
    }

    pub fn get_mut(&mut self) -> &mut Value {
        &mut self.current
    }

    #[must_use]
    pub fn into_inner(self) -> Value {
        self.current
    }

    /// Whether local edits exist since the last sync point.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.current != self.baseline
    }

    /// Merge patch from the baseline to the current document. Advances the
    /// baseline.
    pub fn take_patch(&mut self) -> Value {
        let patch = diff(&self.baseline, &self.current);
        self.baseline = self.current.clone();
        patch
    }

    /// Apply a remote patch. Both the document and the baseline move, so
    /// the remote change is not sent back.
    pub fn apply_patch(&mut self, patch: &Value) {
        merge_patch(&mut self.current, patch);
        merge_patch(&mut self.baseline, patch);
    }
}

/// Apply an RFC 7386 merge patch to `target`.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_members) = patch else {
        *target = patch.clone();
        return;
    };

    if !target.is_object() {
        *target = Value::Object(Map::new());
    }

    if let Value::Object(members) = target {
        for (name, value) in patch_members {
            if value.is_null() {
                members.remove(name);
            } else {
                merge_patch(members.entry(name.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

/// Compute the merge patch that turns `from` into `to`.
#[must_use]
pub fn diff(from: &Value, to: &Value) -> Value {
    match (from, to) {
        (Value::Object(old), Value::Object(new)) => {
            let mut patch = Map::new();
            for name in old.keys() {
                if !new.contains_key(name) {
                    patch.insert(name.clone(), Value::Null);
                }
            }
            for (name, value) in new {
                match old.get(name) {
                    Some(prev) if prev == value => {}
                    Some(prev) if prev.is_object() && value.is_object() => {
                        patch.insert(name.clone(), diff(prev, value));
                    }
                    _ => {
                        patch.insert(name.clone(), value.clone());
                    }
                }
            }
            Value::Object(patch)
        }
        (old, new) if old == new => Value::Object(Map::new()),
        (_, new) => new.clone(),
    }
}

/// Differ for `application/x-tracked+json`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MergePatchDiffer;

impl Differ for MergePatchDiffer {
    fn extract(&self, live: &mut LiveValue) -> Result<Value, CodecError> {
        match live {
            LiveValue::Tracked(doc) => Ok(doc.take_patch()),
            other => Err(CodecError::UnsupportedLiveValue {
                media_type: super::builtin::TRACKED_JSON.to_string(),
                found: other.kind(),
            }),
        }
    }

    fn apply(&self, live: &mut LiveValue, patch: &Value) -> Result<(), CodecError> {
        match live {
            LiveValue::Tracked(doc) => {
                doc.apply_patch(patch);
                Ok(())
            }
            other => Err(CodecError::UnsupportedLiveValue {
                media_type: super::builtin::TRACKED_JSON.to_string(),
                found: other.kind(),
            }),
        }
    }

    fn apply_local(&self, live: &mut LiveValue, patch: &Value) -> Result<(), CodecError> {
        match live {
            LiveValue::Tracked(doc) => {
                merge_patch(doc.get_mut(), patch);
                Ok(())
            }
            other => Err(CodecError::UnsupportedLiveValue {
                media_type: super::builtin::TRACKED_JSON.to_string(),
                found: other.kind(),
            }),
        }
    }
}
