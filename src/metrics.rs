// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the archivist.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host application is responsible for installing a recorder.
//!
//! # Metric Naming Convention
//! - `archivist_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `operation`: set, add, touch, del, applyDiff
//! - `path`: exec, queue, echo
//! - `outcome`: applied, suppressed, failed

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record a cache lookup
pub fn record_cache_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("archivist_cache_lookups_total", "result" => result).increment(1);
}

/// Record a fetch sent to the remote store
pub fn record_fetch(operation: &'static str, keys: usize) {
    counter!("archivist_fetches_total", "operation" => operation).increment(1);
    counter!("archivist_fetched_keys_total", "operation" => operation).increment(keys as u64);
}

/// Record a caller joining a fetch that was already in flight
pub fn record_coalesced_waiter() {
    counter!("archivist_coalesced_waiters_total").increment(1);
}

/// Record a mutation taking effect
pub fn record_mutation(path: &'static str, operation: &'static str) {
    counter!(
        "archivist_mutations_total",
        "path" => path,
        "operation" => operation
    )
    .increment(1);
}

/// Record an echo event from the remote store
pub fn record_echo(outcome: &'static str) {
    counter!("archivist_echo_events_total", "outcome" => outcome).increment(1);
}

/// Record a distribution batch
pub fn record_distribution(changes: usize, issues: usize, duration: Duration) {
    counter!("archivist_distributions_total").increment(1);
    histogram!("archivist_distribution_batch_size").record(changes as f64);
    histogram!("archivist_distribution_seconds").record(duration.as_secs_f64());
    if issues > 0 {
        counter!("archivist_distribution_issues_total").increment(issues as u64);
    }
}

/// Set the number of pending changes
pub fn set_pending_changes(count: usize) {
    gauge!("archivist_pending_changes").set(count as f64);
}

/// Set the number of cached records
pub fn set_cached_records(count: usize) {
    gauge!("archivist_cached_records").set(count as f64);
}

/// Record an error
pub fn record_error(operation: &'static str, kind: &'static str) {
    counter!(
        "archivist_errors_total",
        "operation" => operation,
        "kind" => kind
    )
    .increment(1);
}
