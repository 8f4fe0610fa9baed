// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Distribution: sending pending changes to the remote store.
//!
//! A cycle snapshots and clears the ledger, serializes the snapshot in
//! queue order (running lazy diffs), and sends it as one batch. A failed
//! send drops the snapshot.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::error::ArchivistError;
use crate::ledger::ChangeView;
use crate::remote::DistributionIssue;

use super::Archivist;

/// Marks a send as outstanding for as long as it lives.
struct SendGuard<'a>(&'a AtomicUsize);

impl<'a> SendGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for SendGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Archivist {
    /// Send every pending change to the remote store.
    ///
    /// Returns the issues reported for individual changes, including
    /// changes whose diff could not be extracted (those are not sent). An
    /// empty ledger returns right away without contacting the remote or
    /// suppressing echoes.
    #[tracing::instrument(skip(self))]
    pub async fn distribute(&self) -> Result<Vec<DistributionIssue>, ArchivistError> {
        if self.dispatcher().ledger().is_empty() {
            debug!("Nothing to distribute");
            return Ok(Vec::new());
        }

        // Mark before snapshotting so no echo slips in between
        let _sending = SendGuard::new(&self.inner.sends_in_flight);

        let pending = self.dispatcher().ledger().take_all();
        crate::metrics::set_pending_changes(self.dispatcher().ledger().len());
        if pending.is_empty() {
            debug!("Nothing to distribute");
            return Ok(Vec::new());
        }

        let start = Instant::now();
        let total = pending.len();
        let mut issues = Vec::new();
        let mut batch = Vec::with_capacity(total);
        for change in pending {
            let key = change.key().clone();
            match change.serialize() {
                Ok(serialized) => batch.push(serialized),
                Err(e) => {
                    warn!(key = %key, error = %e, "Could not extract diff, change dropped");
                    crate::metrics::record_error("distribute", e.kind());
                    issues.push(DistributionIssue {
                        key: Some(key),
                        message: e.to_string(),
                    });
                }
            }
        }

        if batch.is_empty() {
            return Ok(issues);
        }

        let sent = batch.len();
        info!(changes = sent, "Distributing pending changes");
        let sent_result = self.inner.remote.distribute(batch).await;
        // Echoes queued during the send are ours; drop them before the
        // guard releases
        self.drop_queued_echoes();
        let remote_issues = sent_result.map_err(|e| {
            warn!(changes = sent, error = %e, "Distribution failed, changes dropped");
            crate::metrics::record_error("distribute", "transport");
            ArchivistError::from(e)
        })?;

        issues.extend(remote_issues);
        crate::metrics::record_distribution(sent, issues.len(), start.elapsed());
        if issues.is_empty() {
            info!(changes = sent, "Distribution complete");
        } else {
            warn!(changes = sent, issues = issues.len(), "Distribution completed with issues");
        }
        Ok(issues)
    }

    /// Distribute and log the outcome instead of returning it.
    pub(super) async fn distribute_logged(&self) {
        match self.distribute().await {
            Ok(issues) => {
                for issue in &issues {
                    warn!(issue = %issue, "Distribution issue");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Auto-distribution failed");
            }
        }
    }

    /// Snapshot of the changes waiting for the next distribution, in
    /// queue order.
    #[must_use]
    pub fn pending_changes(&self) -> Vec<ChangeView> {
        self.dispatcher().ledger().views()
    }
}
