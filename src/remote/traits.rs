// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use thiserror::Error;

use super::types::{DistributionIssue, RemoteRecord, SerializedChange};
use crate::options::{GetOptions, ListOptions};
use crate::record_key::{Index, RecordKey};

/// Failure talking to the remote store. Passed to callers untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Remote store unavailable: {0}")]
    Unavailable(String),
    #[error("Remote store rejected the request: {0}")]
    Rejected(String),
    #[error("Remote store timed out")]
    Timeout,
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Read one record. An absent value comes back as a record with no
    /// value, not as an error.
    async fn get(&self, key: &RecordKey, options: &GetOptions) -> Result<RemoteRecord, TransportError>;

    /// Read several records, one result per key in the same order.
    /// Default implementation falls back to sequential gets.
    async fn mget(&self, keys: &[RecordKey], options: &GetOptions) -> Result<Vec<RemoteRecord>, TransportError> {
        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            records.push(self.get(key, options).await?);
        }
        Ok(records)
    }

    async fn exists(&self, key: &RecordKey) -> Result<bool, TransportError>;

    /// Indexes of the records in `topic` matching every field of
    /// `partial_index`.
    async fn list(
        &self,
        topic: &str,
        partial_index: &Index,
        options: &ListOptions,
    ) -> Result<Vec<Index>, TransportError>;

    /// Apply a batch of changes in order.
    async fn distribute(&self, changes: Vec<SerializedChange>) -> Result<Vec<DistributionIssue>, TransportError>;
}

/// Translates server-clock timestamps to the local clock.
pub trait ServerClock: Send + Sync {
    fn server_to_client(&self, server_secs: u64) -> u64;
}
