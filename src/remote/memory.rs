// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory remote store for tests and demos.
//!
//! Applies distributed changes to a `DashMap`, counts calls, and can be
//! told to delay, fail, or echo every applied change back over a channel
//! the way a real server broadcasts writes to subscribed clients.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use super::traits::{RemoteStore, TransportError};
use super::types::{DistributionIssue, EchoEvent, Operation, RawValue, RemoteRecord, SerializedChange};
use crate::codec::tracked::merge_patch;
use crate::codec::Encoding;
use crate::options::{GetOptions, ListOptions};
use crate::record_key::{Index, RecordKey};

#[derive(Debug, Clone)]
struct StoredValue {
    key: RecordKey,
    value: RawValue,
    expiration_time: Option<u64>,
}

#[derive(Default)]
pub struct InMemoryRemote {
    data: DashMap<String, StoredValue>,
    get_calls: AtomicUsize,
    mget_calls: AtomicUsize,
    distribute_calls: AtomicUsize,
    delay_ms: AtomicU64,
    failure: Mutex<Option<TransportError>>,
    echoes: Mutex<Option<mpsc::UnboundedSender<EchoEvent>>>,
    distributed: Mutex<Vec<SerializedChange>>,
    fetch_log: Mutex<Vec<Vec<RecordKey>>>,
}

impl InMemoryRemote {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a value directly, bypassing distribution.
    pub fn put(&self, key: RecordKey, value: RawValue, expiration_time: Option<u64>) {
        self.data.insert(
            key.true_name(),
            StoredValue {
                key,
                value,
                expiration_time,
            },
        );
    }

    /// Seed a JSON value as `application/json` text.
    pub fn put_json(&self, key: RecordKey, value: &Value) {
        let raw = RawValue {
            data: Value::String(value.to_string()),
            media_type: "application/json".into(),
            encoding: Encoding::Utf8,
        };
        self.put(key, raw, None);
    }

    /// Stored wire value for a key.
    #[must_use]
    pub fn value(&self, key: &RecordKey) -> Option<RawValue> {
        self.data.get(&key.true_name()).map(|v| v.value.clone())
    }

    /// Stored value parsed as JSON text.
    #[must_use]
    pub fn json(&self, key: &RecordKey) -> Option<Value> {
        let raw = self.value(key)?;
        raw.data.as_str().and_then(|s| serde_json::from_str(s).ok())
    }

    #[must_use]
    pub fn expiration_time(&self, key: &RecordKey) -> Option<u64> {
        self.data.get(&key.true_name()).and_then(|v| v.expiration_time)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of `get` plus `mget` calls.
    #[must_use]
    pub fn fetch_calls(&self) -> usize {
        self.get_calls.load(Ordering::Acquire) + self.mget_calls.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn mget_calls(&self) -> usize {
        self.mget_calls.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn distribute_calls(&self) -> usize {
        self.distribute_calls.load(Ordering::Acquire)
    }

    /// Keys asked for by every `get` and `mget` call, one entry per call.
    #[must_use]
    pub fn fetch_log(&self) -> Vec<Vec<RecordKey>> {
        self.fetch_log.lock().clone()
    }

    /// Every change received so far, in order.
    #[must_use]
    pub fn distributed(&self) -> Vec<SerializedChange> {
        self.distributed.lock().clone()
    }

    /// Delay every call by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::Release);
    }

    /// Fail every call with `error` until cleared with `None`.
    pub fn set_failure(&self, error: Option<TransportError>) {
        *self.failure.lock() = error;
    }

    /// Echo every applied change to `tx`.
    pub fn set_echoes(&self, tx: mpsc::UnboundedSender<EchoEvent>) {
        *self.echoes.lock() = Some(tx);
    }

    async fn enter(&self) -> Result<(), TransportError> {
        let delay = self.delay_ms.load(Ordering::Acquire);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        match self.failure.lock().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn read(&self, key: &RecordKey) -> RemoteRecord {
        match self.data.get(&key.true_name()) {
            Some(stored) => RemoteRecord {
                key: key.clone(),
                value: Some(stored.value.clone()),
                expiration_time: stored.expiration_time,
            },
            None => RemoteRecord::absent(key.clone()),
        }
    }

    fn echo(&self, event: EchoEvent) {
        if let Some(tx) = self.echoes.lock().as_ref() {
            let _ = tx.send(event);
        }
    }

    fn apply(&self, change: SerializedChange) -> Result<(), String> {
        let key = change.key();
        let true_name = key.true_name();

        match (change.operation, change.value, change.diff) {
            (Operation::Add, _, _) if self.data.contains_key(&true_name) => {
                Err("value already exists".to_string())
            }
            (Operation::Set | Operation::Add, Some(value), _) => {
                self.put(key.clone(), value.clone(), change.expiration_time);
                self.echo(EchoEvent::Set {
                    key,
                    value,
                    expiration_time: change.expiration_time,
                });
                Ok(())
            }
            (Operation::Set, None, Some(diff)) => {
                let mut stored = self
                    .data
                    .get_mut(&true_name)
                    .ok_or_else(|| "cannot apply a diff to a missing value".to_string())?;
                let text = match (&stored.value.encoding, &stored.value.data) {
                    (Encoding::Utf8, Value::String(s)) => s.clone(),
                    _ => return Err("stored value is not JSON text".to_string()),
                };
                let mut document: Value = serde_json::from_str(&text).map_err(|e| e.to_string())?;
                merge_patch(&mut document, &diff);
                stored.value.data = Value::String(document.to_string());
                if change.expiration_time.is_some() {
                    stored.expiration_time = change.expiration_time;
                }
                drop(stored);
                self.echo(EchoEvent::ApplyDiff {
                    key,
                    diff,
                    expiration_time: change.expiration_time,
                });
                Ok(())
            }
            (Operation::Touch, _, _) => {
                let mut stored = self
                    .data
                    .get_mut(&true_name)
                    .ok_or_else(|| "cannot touch a missing value".to_string())?;
                stored.expiration_time = change.expiration_time;
                drop(stored);
                self.echo(EchoEvent::Touch {
                    key,
                    expiration_time: change.expiration_time,
                });
                Ok(())
            }
            (Operation::Del, _, _) => {
                self.data.remove(&true_name);
                self.echo(EchoEvent::Del { key });
                Ok(())
            }
            (operation, _, _) => Err(format!("{} change carries no value", operation)),
        }
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemote {
    async fn get(&self, key: &RecordKey, _options: &GetOptions) -> Result<RemoteRecord, TransportError> {
        self.get_calls.fetch_add(1, Ordering::AcqRel);
        self.fetch_log.lock().push(vec![key.clone()]);
        self.enter().await?;
        Ok(self.read(key))
    }

    async fn mget(&self, keys: &[RecordKey], _options: &GetOptions) -> Result<Vec<RemoteRecord>, TransportError> {
        self.mget_calls.fetch_add(1, Ordering::AcqRel);
        self.fetch_log.lock().push(keys.to_vec());
        self.enter().await?;
        Ok(keys.iter().map(|key| self.read(key)).collect())
    }

    async fn exists(&self, key: &RecordKey) -> Result<bool, TransportError> {
        self.enter().await?;
        Ok(self.data.contains_key(&key.true_name()))
    }

    async fn list(
        &self,
        topic: &str,
        partial_index: &Index,
        options: &ListOptions,
    ) -> Result<Vec<Index>, TransportError> {
        self.enter().await?;
        let mut matches: Vec<Index> = self
            .data
            .iter()
            .filter(|entry| {
                let key = &entry.value().key;
                key.topic == topic
                    && partial_index
                        .iter()
                        .all(|(field, value)| key.index.get(field) == Some(value))
            })
            .map(|entry| entry.value().key.index.clone())
            .collect();
        // DashMap iteration order is arbitrary
        matches.sort_by_key(|index| RecordKey::new(topic, index.clone()).true_name());

        let page = matches.into_iter().skip(options.offset);
        Ok(match options.limit {
            Some(limit) => page.take(limit).collect(),
            None => page.collect(),
        })
    }

    async fn distribute(&self, changes: Vec<SerializedChange>) -> Result<Vec<DistributionIssue>, TransportError> {
        self.distribute_calls.fetch_add(1, Ordering::AcqRel);
        self.enter().await?;
        debug!(count = changes.len(), "In-memory remote applying batch");

        self.distributed.lock().extend(changes.iter().cloned());

        let mut issues = Vec::new();
        for change in changes {
            let key = change.key();
            if let Err(message) = self.apply(change) {
                issues.push(DistributionIssue {
                    key: Some(key),
                    message,
                });
            }
        }
        Ok(issues)
    }
}
