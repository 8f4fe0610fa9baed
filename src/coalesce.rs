// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Fetch coalescing.
//!
//! Concurrent reads of the same uncached record share one remote fetch.
//! The first caller to miss becomes the leader and starts the fetch; later
//! callers become waiters on the leader's result. The cache check and the
//! waiter registration happen under one lock, and so do applying the
//! result and removing the waiter list, so a key is never fetched twice at
//! once and nobody registers on a list that was already answered.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use crate::cache::RecordCache;
use crate::dispatch::Dispatcher;
use crate::error::ArchivistError;
use crate::record::CachedRecord;
use crate::record_key::RecordKey;
use crate::remote::RemoteRecord;

/// Outcome of one fetch, shared by every waiter.
pub type FetchResult = Result<Option<Arc<CachedRecord>>, ArchivistError>;

pub type Waiter = oneshot::Receiver<FetchResult>;

/// Result of registering interest in a key.
#[derive(Debug)]
pub enum Enqueue {
    /// Answered from the cache.
    Hit(Arc<CachedRecord>),
    /// Nothing in flight: the caller must start the fetch.
    Lead(Waiter),
    /// A fetch is already in flight.
    Wait(Waiter),
}

#[derive(Debug, Default)]
pub struct Coalescer {
    inflight: Mutex<HashMap<String, Vec<oneshot::Sender<FetchResult>>>>,
}

impl Coalescer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer from the cache, or register as leader or waiter.
    pub fn enqueue(&self, cache: &RecordCache, true_name: &str, max_age: Option<Duration>) -> Enqueue {
        let mut inflight = self.inflight.lock();

        if let Some(record) = cache.lookup(true_name, max_age) {
            crate::metrics::record_cache_lookup(true);
            return Enqueue::Hit(record);
        }
        crate::metrics::record_cache_lookup(false);

        let (tx, rx) = oneshot::channel();
        match inflight.entry(true_name.to_string()) {
            Entry::Occupied(mut waiters) => {
                waiters.get_mut().push(tx);
                crate::metrics::record_coalesced_waiter();
                debug!(true_name = %true_name, waiters = waiters.get().len(), "Joined in-flight fetch");
                Enqueue::Wait(rx)
            }
            Entry::Vacant(slot) => {
                slot.insert(vec![tx]);
                Enqueue::Lead(rx)
            }
        }
    }

    /// Apply a fetch result and answer every waiter in registration order.
    ///
    /// `apply` runs under the registration lock; the waiters are notified
    /// after it is released.
    pub fn resolve(&self, true_name: &str, apply: impl FnOnce() -> FetchResult) {
        let (waiters, result) = {
            let mut inflight = self.inflight.lock();
            let result = apply();
            (inflight.remove(true_name).unwrap_or_default(), result)
        };

        debug!(true_name = %true_name, waiters = waiters.len(), ok = result.is_ok(), "Fetch resolved");
        for waiter in waiters {
            // A waiter that gave up is fine
            let _ = waiter.send(result.clone());
        }
    }

    /// Number of keys with a fetch in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inflight.lock().len()
    }
}

/// Apply a fetched record to the cache.
///
/// A value is stored with `exec_set`; an absent value runs `exec_del`,
/// which only affects records that are already cached. The answer is
/// whatever the cache holds afterwards.
pub fn apply_fetched(dispatcher: &Dispatcher, key: &RecordKey, fetched: RemoteRecord) -> FetchResult {
    match fetched.value {
        Some(raw) => {
            let (media_type, payload) = raw.into_payload()?;
            dispatcher
                .exec_set(key, payload, Some(&media_type), fetched.expiration_time)
                .map(Some)
        }
        None => {
            dispatcher.exec_del(key);
            Ok(dispatcher.cache().get(&key.true_name()))
        }
    }
}
