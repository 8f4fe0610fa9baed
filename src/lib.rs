// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Archivist
//!
//! A client-side record cache and mutation queue in front of a remote
//! key-value store.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Archivist (API)                        │
//! │  • get / mget / exists / list                              │
//! │  • set / add / touch / del / apply_diff / modify           │
//! └─────────────────────────────────────────────────────────────┘
//!          │ reads                               │ writes
//!          ▼                                     ▼
//! ┌──────────────────────────┐   ┌──────────────────────────────┐
//! │      Fetch Coalescer     │   │       Dual Dispatcher        │
//! │  • one fetch per key     │   │  • exec: cache + notify      │
//! │  • waiters fan out       │   │  • queue: change ledger      │
//! └──────────────────────────┘   └──────────────────────────────┘
//!          │                          │                  │
//!          ▼                          ▼                  ▼
//! ┌──────────────────────────┐   ┌──────────────────────────────┐
//! │      Record Cache        │   │        Change Ledger         │
//! │  • DashMap of records    │   │  • one change per key        │
//! │  • per-record expiry     │   │  • lazy diffs                │
//! └──────────────────────────┘   └──────────────────────────────┘
//!                                             │
//!                                (distribute: snapshot + send)
//!                                             ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 RemoteStore (async trait)                   │
//! │  • get / mget / exists / list / distribute                 │
//! │  • echo events flow back into exec                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use archivist::{index, Archivist, ArchivistConfig, GetOptions, InMemoryRemote, RecordKey, WriteOptions};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let remote = Arc::new(InMemoryRemote::new());
//!     let archivist = Archivist::new(ArchivistConfig::default(), remote);
//!
//!     let key = RecordKey::new("player", index([("id", "alice")]));
//!     archivist
//!         .set(&key, json!({"hp": 10}), WriteOptions::default())
//!         .expect("Failed to set");
//!
//!     // Served from the cache, no fetch
//!     let value = archivist.get(&key, GetOptions::default()).await.unwrap();
//!     println!("Found: {:?}", value);
//!
//!     // Send queued changes to the remote store
//!     let issues = archivist.distribute().await.expect("Failed to distribute");
//!     assert!(issues.is_empty());
//! }
//! ```
//!
//! ## Modules
//!
//! - [`coordinator`]: The main [`Archivist`] orchestrating all components
//! - [`codec`]: Media type registry, encodings and diffing
//! - [`remote`]: Remote store trait, wire types and an in-memory store
//! - [`dispatch`]: exec and queue halves of every mutation
//! - [`ledger`]: Pending changes awaiting distribution
//! - [`cache`]: Cached records by true name

pub mod cache;
pub mod coalesce;
pub mod codec;
pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod options;
pub mod record;
pub mod record_key;
pub mod remote;

pub use cache::RecordCache;
pub use codec::{
    CodecError, Differ, Encoding, LiveValue, MediaTypeRegistry, MediaTypeSpec, Payload, TrackedDocument,
};
pub use config::ArchivistConfig;
pub use coordinator::{Archivist, ArchivistBuilder, EngineState, TopicSubscription};
pub use dispatch::{EventKind, RecordEvent};
pub use error::ArchivistError;
pub use ledger::{ChangeView, Operation};
pub use options::{GetOptions, ListOptions, WriteOptions};
pub use record::{CachedRecord, DiffSource, StoredPayload};
pub use record_key::{index, Index, RecordKey, Scalar};
pub use remote::{
    DistributionIssue, EchoEvent, InMemoryRemote, RawValue, RemoteRecord, RemoteStore, SerializedChange, ServerClock,
    TransportError,
};
