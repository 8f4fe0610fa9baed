// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! A single cached record.
//!
//! A record holds at most one live payload together with its media type.
//! "No payload" means the value is known to be absent remotely, which is
//! different from the record not being cached at all.
//!
//! # Expiry
//!
//! `touch` arms a one-shot tokio task that deletes the payload at the
//! deadline. Re-touching aborts the previous task. Each arm bumps a
//! generation counter so a task that already woke up cannot delete a
//! payload that was re-armed in the meantime. Outside a runtime no task is
//! spawned and the deadline is enforced by [`CachedRecord::expire_if_due`]
//! on lookup.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::codec::{CodecError, Differ, LiveValue, MediaTypeRegistry, Payload, WILDCARD};
use crate::record_key::RecordKey;
use crate::remote::ServerClock;

/// Where an incremental patch came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffSource {
    /// Made by this client, still to be distributed
    Local,
    /// Received from the remote store, already synced
    Remote,
}

/// Current unix time in whole seconds.
pub(crate) fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Time left until a unix-seconds deadline. `None` once it has passed.
fn until(deadline_secs: u64) -> Option<Duration> {
    let deadline = UNIX_EPOCH + Duration::from_secs(deadline_secs);
    deadline.duration_since(SystemTime::now()).ok().filter(|d| !d.is_zero())
}

/// Media type and live payload of a record, set together by writers.
#[derive(Debug, Default, Clone)]
pub struct StoredPayload {
    media_type: Option<String>,
    data: Option<LiveValue>,
}

impl StoredPayload {
    /// Store a live value under a media type.
    pub fn store(&mut self, media_type: &str, data: LiveValue) {
        self.media_type = Some(media_type.to_string());
        self.data = Some(data);
    }

    #[must_use]
    pub fn media_type(&self) -> Option<&str> {
        self.media_type.as_deref()
    }

    #[must_use]
    pub fn data(&self) -> Option<&LiveValue> {
        self.data.as_ref()
    }

    fn clear(&mut self) {
        self.media_type = None;
        self.data = None;
    }
}

/// Pending expiry task. Aborted when dropped.
struct ExpiryTimer(JoinHandle<()>);

impl Drop for ExpiryTimer {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[derive(Default)]
struct RecordState {
    payload: StoredPayload,
    /// Local-clock unix seconds
    expiration_time: Option<u64>,
    written_at: Option<Instant>,
    timer: Option<ExpiryTimer>,
    generation: u64,
}

impl RecordState {
    fn disarm(&mut self) {
        self.timer = None;
        self.generation = self.generation.wrapping_add(1);
    }

    fn clear_payload(&mut self) {
        self.payload.clear();
        self.disarm();
        self.expiration_time = None;
    }
}

/// One cached value.
pub struct CachedRecord {
    key: RecordKey,
    true_name: String,
    state: Mutex<RecordState>,
}

impl CachedRecord {
    /// Empty record: cached, with no payload.
    #[must_use]
    pub fn new(key: RecordKey) -> Self {
        let true_name = key.true_name();
        Self {
            key,
            true_name,
            state: Mutex::new(RecordState::default()),
        }
    }

    #[must_use]
    pub fn key(&self) -> &RecordKey {
        &self.key
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        &self.key.topic
    }

    #[must_use]
    pub fn true_name(&self) -> &str {
        &self.true_name
    }

    /// Clone of the live payload.
    #[must_use]
    pub fn data(&self) -> Option<LiveValue> {
        self.state.lock().payload.data.clone()
    }

    #[must_use]
    pub fn media_type(&self) -> Option<String> {
        self.state.lock().payload.media_type.clone()
    }

    #[must_use]
    pub fn has_value(&self) -> bool {
        self.state.lock().payload.data.is_some()
    }

    /// Expiration in local-clock unix seconds.
    #[must_use]
    pub fn expiration_time(&self) -> Option<u64> {
        self.state.lock().expiration_time
    }

    /// When the payload was last written or deleted.
    #[must_use]
    pub fn written_at(&self) -> Option<Instant> {
        self.state.lock().written_at
    }

    /// Whether the record was written within `max_age`.
    #[must_use]
    pub fn is_fresh(&self, max_age: Duration) -> bool {
        self.state
            .lock()
            .written_at
            .is_some_and(|at| at.elapsed() <= max_age)
    }

    /// Borrow the live payload.
    pub fn with_data<R>(&self, f: impl FnOnce(Option<&LiveValue>) -> R) -> R {
        f(self.state.lock().payload.data.as_ref())
    }

    /// Mutate the live payload in place. `None` when there is no payload.
    pub fn with_data_mut<R>(&self, f: impl FnOnce(&mut LiveValue) -> R) -> Option<R> {
        self.state.lock().payload.data.as_mut().map(f)
    }

    /// Store a payload.
    ///
    /// Live payloads without a media type get one guessed; encoded
    /// payloads are decoded first. The media type's writer (or the
    /// wildcard writer) does the store.
    pub fn set_payload(
        &self,
        registry: &MediaTypeRegistry,
        media_type: Option<&str>,
        payload: Payload,
    ) -> Result<(), CodecError> {
        let (media_type, live) = match payload {
            Payload::Live(live) => {
                let media_type = match media_type {
                    Some(mt) => Some(mt.to_string()),
                    None => registry.guess_media_type(&live),
                };
                (media_type, live)
            }
            encoded => {
                let mt = media_type.unwrap_or(WILDCARD);
                let live = registry.decode(encoded, mt)?;
                (media_type.map(str::to_string), live)
            }
        };

        let Some(media_type) = media_type else {
            return Err(CodecError::NoWriterForMediaType {
                media_type: WILDCARD.to_string(),
            });
        };
        let writer = registry
            .writer_for(&media_type)
            .ok_or_else(|| CodecError::NoWriterForMediaType {
                media_type: media_type.clone(),
            })?;

        let mut state = self.state.lock();
        writer(&mut state.payload, &media_type, live);
        state.written_at = Some(Instant::now());
        Ok(())
    }

    /// Set or clear the expiration.
    ///
    /// `expiration` is in server-clock unix seconds and goes through
    /// `clock` when one is given. `None` and `0` clear it. A deadline that
    /// has already passed deletes the payload right away.
    pub fn touch(self: &Arc<Self>, expiration: Option<u64>, clock: Option<&dyn ServerClock>) {
        let mut state = self.state.lock();
        state.disarm();

        let Some(server_time) = expiration.filter(|t| *t > 0) else {
            state.expiration_time = None;
            return;
        };
        let local = clock.map_or(server_time, |c| c.server_to_client(server_time));
        state.expiration_time = Some(local);

        let Some(remaining) = until(local) else {
            debug!(true_name = %self.true_name, expiration = local, "Expiration already passed, deleting");
            state.written_at = Some(Instant::now());
            state.clear_payload();
            return;
        };

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let generation = state.generation;
        let record: Weak<Self> = Arc::downgrade(self);
        let handle = runtime.spawn(async move {
            tokio::time::sleep(remaining).await;
            if let Some(record) = record.upgrade() {
                record.expire(generation);
            }
        });
        state.timer = Some(ExpiryTimer(handle));
    }

    fn expire(&self, generation: u64) {
        let mut state = self.state.lock();
        if state.generation != generation {
            return;
        }
        // Dropping our own handle mid-run is harmless, the task ends here
        if state.payload.data.is_some() {
            debug!(true_name = %self.true_name, "Record expired");
            state.written_at = Some(Instant::now());
        }
        state.clear_payload();
    }

    /// Delete the payload if its deadline has passed. Returns whether it did.
    pub fn expire_if_due(&self) -> bool {
        let mut state = self.state.lock();
        let due = state.payload.data.is_some()
            && state.expiration_time.is_some_and(|t| until(t).is_none());
        if due {
            debug!(true_name = %self.true_name, "Record expired on lookup");
            state.written_at = Some(Instant::now());
            state.clear_payload();
        }
        due
    }

    /// Cancel a pending expiry task without touching the payload.
    pub fn cancel_expiry(&self) {
        self.state.lock().disarm();
    }

    /// Mark the value as absent. The record itself stays cached.
    pub fn del(&self) {
        let mut state = self.state.lock();
        state.written_at = Some(Instant::now());
        if state.payload.data.is_some() {
            state.clear_payload();
        }
    }

    /// Apply an incremental patch in place.
    ///
    /// No-op without a patch or payload, or when the media type has no
    /// differ.
    pub fn apply_diff(
        &self,
        registry: &MediaTypeRegistry,
        patch: Option<&Value>,
        source: DiffSource,
    ) -> Result<(), CodecError> {
        let Some(patch) = patch else {
            return Ok(());
        };
        let mut state = self.state.lock();
        let Some(media_type) = state.payload.media_type.clone() else {
            return Ok(());
        };
        let Some(differ) = registry.differ_for(&media_type) else {
            warn!(true_name = %self.true_name, media_type = %media_type, "Media type cannot apply diffs, ignoring");
            return Ok(());
        };
        if let Some(live) = state.payload.data.as_mut() {
            match source {
                DiffSource::Local => differ.apply_local(live, patch)?,
                DiffSource::Remote => differ.apply(live, patch)?,
            }
            state.written_at = Some(Instant::now());
        }
        Ok(())
    }

    /// Extract the patch describing local edits since the last extraction.
    ///
    /// An absent payload yields an empty patch.
    pub fn extract_diff(&self, differ: &dyn Differ) -> Result<Value, CodecError> {
        let mut state = self.state.lock();
        match state.payload.data.as_mut() {
            Some(live) => differ.extract(live),
            None => Ok(Value::Object(Map::new())),
        }
    }
}

impl fmt::Debug for CachedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CachedRecord")
            .field("key", &self.key)
            .field("media_type", &state.payload.media_type)
            .field("has_value", &state.payload.data.is_some())
            .field("expiration_time", &state.expiration_time)
            .finish()
    }
}
