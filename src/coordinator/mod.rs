// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Archivist coordinator.
//!
//! The [`Archivist`] ties the components together:
//! - record cache and change ledger, behind the dual dispatcher
//! - fetch coalescer in front of the remote store
//! - distribution cycle and echo handling
//! - record notifications
//!
//! # Lifecycle
//!
//! ```text
//! Created → Running → ShuttingDown
//! ```
//!
//! Reads, writes and manual `distribute()` work in any state. The run loop
//! only adds periodic distribution and live config updates.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use archivist::{Archivist, ArchivistConfig, EngineState, InMemoryRemote};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let remote = Arc::new(InMemoryRemote::new());
//! let archivist = Archivist::new(ArchivistConfig::default(), remote);
//!
//! assert_eq!(archivist.state(), EngineState::Created);
//! # }
//! ```

mod types;
mod api;
mod mutate;
mod echo;
mod flush;
mod lifecycle;

pub use types::{EngineState, TopicSubscription};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::debug;

use crate::cache::RecordCache;
use crate::coalesce::Coalescer;
use crate::codec::MediaTypeRegistry;
use crate::config::ArchivistConfig;
use crate::dispatch::{Dispatcher, RecordEvent};
use crate::remote::{RemoteStore, ServerClock};

/// Client-side cache and mutation queue in front of a remote store.
///
/// Cloning is cheap and every clone shares the same cache, ledger and
/// remote connection.
///
/// # Thread Safety
///
/// The archivist is `Send + Sync`. Cache and ledger operations are short
/// critical sections that never cross an `.await`.
#[derive(Clone)]
pub struct Archivist {
    pub(super) inner: Arc<Inner>,
}

pub(super) struct Inner {
    /// Configuration (updated at runtime via the watch channel)
    pub(super) config: RwLock<ArchivistConfig>,

    /// Runtime config updates, consumed by the run loop
    pub(super) config_rx: Mutex<watch::Receiver<ArchivistConfig>>,

    /// Engine state (broadcast to watchers)
    pub(super) state: watch::Sender<EngineState>,

    /// Engine state receiver (for internal use)
    pub(super) state_rx: watch::Receiver<EngineState>,

    /// Cache, ledger, codecs and notifications
    pub(super) dispatcher: Arc<Dispatcher>,

    /// One in-flight fetch per key
    pub(super) coalescer: Arc<Coalescer>,

    pub(super) remote: Arc<dyn RemoteStore>,

    /// Distribution sends currently outstanding. Echoes are dropped while
    /// this is non-zero.
    pub(super) sends_in_flight: AtomicUsize,

    /// Echo stream fed by `attach_echoes`
    pub(super) echoes: parking_lot::Mutex<Option<echo::EchoInbox>>,
}

impl Archivist {
    /// Create an archivist with the builtin media types, no server clock
    /// and no config updates.
    pub fn new(config: ArchivistConfig, remote: Arc<dyn RemoteStore>) -> Self {
        Self::builder(remote).config(config).build()
    }

    pub fn builder(remote: Arc<dyn RemoteStore>) -> ArchivistBuilder {
        ArchivistBuilder {
            remote,
            config: ArchivistConfig::default(),
            registry: None,
            clock: None,
            config_rx: None,
        }
    }

    /// Get current engine state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.inner.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.inner.state_rx.clone()
    }

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> ArchivistConfig {
        self.inner.config.read().clone()
    }

    /// The record cache.
    #[must_use]
    pub fn cache(&self) -> &RecordCache {
        self.inner.dispatcher.cache()
    }

    /// Forget every cached record. Pending changes are kept.
    pub fn clear_cache(&self) {
        self.inner.dispatcher.cache().clear();
        crate::metrics::set_cached_records(0);
    }

    #[must_use]
    pub fn registry(&self) -> &MediaTypeRegistry {
        self.inner.dispatcher.registry()
    }

    /// Notifications for every record change in the cache.
    pub fn subscribe(&self) -> broadcast::Receiver<RecordEvent> {
        self.inner.dispatcher.subscribe()
    }

    /// Notifications for record changes in one topic.
    pub fn subscribe_topic(&self, topic: impl Into<String>) -> TopicSubscription {
        TopicSubscription {
            topic: topic.into(),
            rx: self.inner.dispatcher.subscribe(),
        }
    }

    /// Whether a distribution send is outstanding.
    #[must_use]
    pub fn is_distributing(&self) -> bool {
        self.inner.sends_in_flight.load(Ordering::Acquire) > 0
    }

    pub(super) fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }
}

impl std::fmt::Debug for Archivist {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archivist")
            .field("state", &self.state())
            .field("cached_records", &self.cache().len())
            .field("pending_changes", &self.dispatcher().ledger().len())
            .field("sends_in_flight", &self.inner.sends_in_flight.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Builder for [`Archivist`].
pub struct ArchivistBuilder {
    remote: Arc<dyn RemoteStore>,
    config: ArchivistConfig,
    registry: Option<MediaTypeRegistry>,
    clock: Option<Arc<dyn ServerClock>>,
    config_rx: Option<watch::Receiver<ArchivistConfig>>,
}

impl ArchivistBuilder {
    #[must_use]
    pub fn config(mut self, config: ArchivistConfig) -> Self {
        self.config = config;
        self
    }

    /// Media type registry to use instead of the builtin one.
    #[must_use]
    pub fn registry(mut self, registry: MediaTypeRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Translate server-clock expirations to the local clock.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn ServerClock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Config updates picked up by [`Archivist::run`].
    #[must_use]
    pub fn config_updates(mut self, config_rx: watch::Receiver<ArchivistConfig>) -> Self {
        self.config_rx = Some(config_rx);
        self
    }

    pub fn build(self) -> Archivist {
        let (state_tx, state_rx) = watch::channel(EngineState::Created);

        // Without updates, a closed channel keeps the run loop branch idle
        let config_rx = self
            .config_rx
            .unwrap_or_else(|| watch::channel(self.config.clone()).1);

        let registry = Arc::new(self.registry.unwrap_or_else(MediaTypeRegistry::new));
        let dispatcher = Dispatcher::new(registry, self.clock, self.config.notification_capacity);

        debug!(
            distribute_interval_ms = self.config.distribute_interval_ms,
            notification_capacity = self.config.notification_capacity,
            "Archivist created"
        );

        Archivist {
            inner: Arc::new(Inner {
                config: RwLock::new(self.config),
                config_rx: Mutex::new(config_rx),
                state: state_tx,
                state_rx,
                dispatcher: Arc::new(dispatcher),
                coalescer: Arc::new(Coalescer::new()),
                remote: self.remote,
                sends_in_flight: AtomicUsize::new(0),
                echoes: parking_lot::Mutex::new(None),
            }),
        }
    }
}
