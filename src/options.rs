// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-call options for reads and writes.
//!
//! # Example
//!
//! ```rust
//! use archivist::{GetOptions, WriteOptions};
//! use std::time::Duration;
//!
//! // Plain JSON write, no expiry
//! let write = WriteOptions::media_type("application/json");
//!
//! // Expire one hour from now (server clock)
//! let session = WriteOptions::default().expires_in(Duration::from_secs(3600));
//!
//! // Refetch anything older than 30 seconds, fail if absent
//! let read = GetOptions::required().max_age(Duration::from_secs(30));
//! assert!(!read.optional);
//! ```

use std::time::Duration;

use crate::record::unix_now_secs;

/// Options for `set` and `add`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Media type of the payload. Guessed from the live value when `None`.
    ///
    /// Default: `None`
    pub media_type: Option<String>,

    /// Expiration in server-clock unix seconds. `None` means no expiry.
    ///
    /// Default: `None`
    pub expiration_time: Option<u64>,
}

impl WriteOptions {
    /// Options with an explicit media type.
    #[must_use]
    pub fn media_type(media_type: impl Into<String>) -> Self {
        Self {
            media_type: Some(media_type.into()),
            ..Self::default()
        }
    }

    /// Set an absolute expiration (server-clock unix seconds).
    #[must_use]
    pub fn expires_at(mut self, unix_secs: u64) -> Self {
        self.expiration_time = Some(unix_secs);
        self
    }

    /// Expire `ttl` from now.
    #[must_use]
    pub fn expires_in(mut self, ttl: Duration) -> Self {
        self.expiration_time = Some(unix_now_secs().saturating_add(ttl.as_secs()));
        self
    }
}

/// Options for reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetOptions {
    /// Refetch cached records written longer ago than this.
    ///
    /// Default: `None` (cached records never go stale)
    pub max_age: Option<Duration>,

    /// Whether an absent value is an acceptable answer. When `false`,
    /// absence is reported as an error.
    ///
    /// Default: `true`
    pub optional: bool,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self {
            max_age: None,
            optional: true,
        }
    }
}

impl GetOptions {
    /// Options that fail on absent values.
    #[must_use]
    pub fn required() -> Self {
        Self {
            optional: false,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }
}

/// Paging for `list`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListOptions {
    pub offset: usize,
    /// `None` means no limit
    pub limit: Option<usize>,
}

impl ListOptions {
    #[must_use]
    pub fn page(offset: usize, limit: usize) -> Self {
        Self {
            offset,
            limit: Some(limit),
        }
    }
}
