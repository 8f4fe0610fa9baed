// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Read API: get, mget, exists, list.
//!
//! Reads are answered from the cache when possible. Misses go through the
//! coalescer so each key has at most one fetch in flight; the fetch runs
//! as a spawned task and answers every waiter, even if the caller that
//! started it went away.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::coalesce::{apply_fetched, Enqueue, FetchResult, Waiter};
use crate::codec::LiveValue;
use crate::error::ArchivistError;
use crate::options::{GetOptions, ListOptions};
use crate::record::CachedRecord;
use crate::record_key::{Index, RecordKey};
use crate::remote::RemoteRecord;

use super::Archivist;

/// How a single key of a read will be answered.
enum Pending {
    Ready(Arc<CachedRecord>),
    Waiting(Waiter),
}

impl Archivist {
    /// Live value for a key, fetching it on a cache miss.
    ///
    /// `Ok(None)` when the value is absent and `options.optional` is set.
    #[tracing::instrument(skip(self, key), fields(key = %key))]
    pub async fn get(&self, key: &RecordKey, options: GetOptions) -> Result<Option<LiveValue>, ArchivistError> {
        Ok(self.get_value(key, options).await?.and_then(|record| record.data()))
    }

    /// Cached record for a key, fetching it on a cache miss.
    ///
    /// `Ok(None)` means the key was never cached and the remote store does
    /// not have it. A record without a value means the value is known to
    /// be absent. With `optional: false` both are reported as
    /// [`ArchivistError::RequiredValueMissing`].
    #[tracing::instrument(skip(self, key), fields(key = %key))]
    pub async fn get_value(
        &self,
        key: &RecordKey,
        options: GetOptions,
    ) -> Result<Option<Arc<CachedRecord>>, ArchivistError> {
        let true_name = key.true_name();
        let pending = match self.enqueue(&true_name, options) {
            Enqueue::Hit(record) => Pending::Ready(record),
            Enqueue::Lead(waiter) => {
                self.spawn_get(key.clone(), options);
                Pending::Waiting(waiter)
            }
            Enqueue::Wait(waiter) => Pending::Waiting(waiter),
        };

        let record = settle(pending, &true_name).await?;
        require(record, &true_name, options)
    }

    /// Live values for several keys, in the order given.
    #[tracing::instrument(skip(self, keys), fields(count = keys.len()))]
    pub async fn mget(&self, keys: &[RecordKey], options: GetOptions) -> Result<Vec<Option<LiveValue>>, ArchivistError> {
        let records = self.mget_values(keys, options).await?;
        Ok(records
            .into_iter()
            .map(|record| record.and_then(|r| r.data()))
            .collect())
    }

    /// Cached records for several keys, in the order given.
    ///
    /// Cached keys are answered right away, keys already in flight are
    /// joined, and the rest are fetched with a single `mget` call. The
    /// first error wins.
    #[tracing::instrument(skip(self, keys), fields(count = keys.len()))]
    pub async fn mget_values(
        &self,
        keys: &[RecordKey],
        options: GetOptions,
    ) -> Result<Vec<Option<Arc<CachedRecord>>>, ArchivistError> {
        let mut pending = Vec::with_capacity(keys.len());
        let mut leads = Vec::new();

        for key in keys {
            let true_name = key.true_name();
            let slot = match self.enqueue(&true_name, options) {
                Enqueue::Hit(record) => Pending::Ready(record),
                Enqueue::Lead(waiter) => {
                    leads.push(key.clone());
                    Pending::Waiting(waiter)
                }
                Enqueue::Wait(waiter) => Pending::Waiting(waiter),
            };
            pending.push((true_name, slot));
        }

        match leads.len() {
            0 => {}
            1 => {
                if let Some(key) = leads.pop() {
                    self.spawn_get(key, options);
                }
            }
            _ => self.spawn_mget(leads, options),
        }

        let mut records = Vec::with_capacity(pending.len());
        for (true_name, slot) in pending {
            let record = settle(slot, &true_name).await?;
            records.push(require(record, &true_name, options)?);
        }
        Ok(records)
    }

    /// Live values for named keys.
    pub async fn mget_named(
        &self,
        queries: &BTreeMap<String, RecordKey>,
        options: GetOptions,
    ) -> Result<BTreeMap<String, Option<LiveValue>>, ArchivistError> {
        let records = self.mget_values_named(queries, options).await?;
        Ok(records
            .into_iter()
            .map(|(name, record)| (name, record.and_then(|r| r.data())))
            .collect())
    }

    /// Cached records for named keys.
    pub async fn mget_values_named(
        &self,
        queries: &BTreeMap<String, RecordKey>,
        options: GetOptions,
    ) -> Result<BTreeMap<String, Option<Arc<CachedRecord>>>, ArchivistError> {
        let (names, keys): (Vec<&String>, Vec<RecordKey>) =
            queries.iter().map(|(name, key)| (name, key.clone())).unzip();
        let records = self.mget_values(&keys, options).await?;
        Ok(names.into_iter().cloned().zip(records).collect())
    }

    /// Whether a value exists.
    ///
    /// A cached record answers without asking the remote store.
    #[tracing::instrument(skip(self, key), fields(key = %key))]
    pub async fn exists(&self, key: &RecordKey, options: GetOptions) -> Result<bool, ArchivistError> {
        if let Some(record) = self.cache().lookup(&key.true_name(), self.max_age(options)) {
            crate::metrics::record_cache_lookup(true);
            return Ok(record.has_value());
        }
        crate::metrics::record_cache_lookup(false);
        crate::metrics::record_fetch("exists", 1);

        self.inner.remote.exists(key).await.map_err(|e| {
            crate::metrics::record_error("exists", "transport");
            e.into()
        })
    }

    /// Indexes in `topic` matching every field of `partial_index`.
    ///
    /// Always asks the remote store.
    #[tracing::instrument(skip(self, topic), fields(topic = %topic))]
    pub async fn list(
        &self,
        topic: &str,
        partial_index: &Index,
        options: ListOptions,
    ) -> Result<Vec<Index>, ArchivistError> {
        crate::metrics::record_fetch("list", 1);
        let indexes = self
            .inner
            .remote
            .list(topic, partial_index, &options)
            .await
            .map_err(|e| {
                crate::metrics::record_error("list", "transport");
                ArchivistError::from(e)
            })?;
        debug!(count = indexes.len(), "Listed indexes");
        Ok(indexes)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Fetch plumbing
    // ═══════════════════════════════════════════════════════════════════════

    /// Max age for a read, falling back to the configured default.
    fn max_age(&self, options: GetOptions) -> Option<Duration> {
        options.max_age.or_else(|| self.inner.config.read().default_max_age())
    }

    fn enqueue(&self, true_name: &str, options: GetOptions) -> Enqueue {
        let max_age = self.max_age(options);
        self.inner.coalescer.enqueue(self.cache(), true_name, max_age)
    }

    /// Fetch one key in the background and answer its waiters.
    fn spawn_get(&self, key: RecordKey, options: GetOptions) {
        let inner = Arc::clone(&self.inner);
        crate::metrics::record_fetch("get", 1);
        tokio::spawn(async move {
            let fetched = inner.remote.get(&key, &options).await;
            inner.coalescer.resolve(&key.true_name(), || {
                let fetched = fetched?;
                apply_fetched(&inner.dispatcher, &key, fetched)
            });
        });
    }

    /// Fetch several keys with one `mget` call and answer each key's
    /// waiters. Keys the remote store leaves out count as absent.
    fn spawn_mget(&self, keys: Vec<RecordKey>, options: GetOptions) {
        let inner = Arc::clone(&self.inner);
        crate::metrics::record_fetch("mget", keys.len());
        tokio::spawn(async move {
            match inner.remote.mget(&keys, &options).await {
                Ok(records) => {
                    let mut by_name: HashMap<String, RemoteRecord> = records
                        .into_iter()
                        .map(|record| (record.key.true_name(), record))
                        .collect();
                    for key in &keys {
                        let true_name = key.true_name();
                        let fetched = by_name
                            .remove(&true_name)
                            .unwrap_or_else(|| RemoteRecord::absent(key.clone()));
                        inner
                            .coalescer
                            .resolve(&true_name, || apply_fetched(&inner.dispatcher, key, fetched));
                    }
                }
                Err(e) => {
                    debug!(error = %e, count = keys.len(), "mget failed");
                    for key in &keys {
                        inner.coalescer.resolve(&key.true_name(), || Err(e.clone().into()));
                    }
                }
            }
        });
    }
}

/// Wait for a pending read. A fetch task that died without answering
/// surfaces as [`ArchivistError::FetchAbandoned`].
async fn settle(pending: Pending, true_name: &str) -> FetchResult {
    match pending {
        Pending::Ready(record) => Ok(Some(record)),
        Pending::Waiting(waiter) => waiter.await.map_err(|_| ArchivistError::FetchAbandoned {
            true_name: true_name.to_string(),
        })?,
    }
}

/// Enforce `optional: false`.
fn require(
    record: Option<Arc<CachedRecord>>,
    true_name: &str,
    options: GetOptions,
) -> Result<Option<Arc<CachedRecord>>, ArchivistError> {
    let missing = record.as_ref().map_or(true, |r| !r.has_value());
    if missing && !options.optional {
        return Err(ArchivistError::RequiredValueMissing {
            true_name: true_name.to_string(),
        });
    }
    Ok(record)
}
