// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the archivist.
//!
//! # Example
//!
//! ```
//! use archivist::ArchivistConfig;
//!
//! // Manual distribution only (the default)
//! let config = ArchivistConfig::default();
//! assert_eq!(config.distribute_interval_ms, 0);
//!
//! // Flush pending changes every 250ms, cached reads go stale after a minute
//! let config = ArchivistConfig {
//!     distribute_interval_ms: 250,
//!     default_max_age_secs: Some(60),
//!     ..Default::default()
//! };
//! ```

use std::time::Duration;

use serde::Deserialize;

/// Configuration for the archivist.
///
/// All fields have defaults, so an empty document deserializes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ArchivistConfig {
    /// Auto-distribution interval in milliseconds (0 = manual only)
    #[serde(default = "default_distribute_interval_ms")]
    pub distribute_interval_ms: u64,

    /// Buffer size of the record notification channel
    #[serde(default = "default_notification_capacity")]
    pub notification_capacity: usize,

    /// Max age applied to reads that don't set one (None = no limit)
    #[serde(default)]
    pub default_max_age_secs: Option<u64>,

    /// Log suppressed echo events at warn instead of debug
    #[serde(default = "default_warn_on_echo_suppressed")]
    pub warn_on_echo_suppressed: bool,
}

fn default_distribute_interval_ms() -> u64 { 0 }
fn default_notification_capacity() -> usize { 1024 }
fn default_warn_on_echo_suppressed() -> bool { false }

impl Default for ArchivistConfig {
    fn default() -> Self {
        Self {
            distribute_interval_ms: default_distribute_interval_ms(),
            notification_capacity: default_notification_capacity(),
            default_max_age_secs: None,
            warn_on_echo_suppressed: default_warn_on_echo_suppressed(),
        }
    }
}

impl ArchivistConfig {
    /// Auto-distribution interval, `None` when disabled.
    #[must_use]
    pub fn distribute_interval(&self) -> Option<Duration> {
        (self.distribute_interval_ms > 0).then(|| Duration::from_millis(self.distribute_interval_ms))
    }

    #[must_use]
    pub fn default_max_age(&self) -> Option<Duration> {
        self.default_max_age_secs.map(Duration::from_secs)
    }
}
