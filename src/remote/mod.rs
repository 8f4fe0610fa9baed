// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The remote store boundary.
//!
//! The archivist never talks to a network itself. It calls a
//! [`RemoteStore`] for reads and for batched writes, optionally translates
//! expirations through a [`ServerClock`], and receives remote changes as
//! [`EchoEvent`]s. [`InMemoryRemote`] implements the store for tests and
//! demos.

pub mod memory;
pub mod traits;
pub mod types;

pub use memory::InMemoryRemote;
pub use traits::{RemoteStore, ServerClock, TransportError};
pub use types::{DistributionIssue, EchoEvent, RawValue, RemoteRecord, SerializedChange};
