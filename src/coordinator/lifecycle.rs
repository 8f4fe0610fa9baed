// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Engine lifecycle: run loop, auto-distribution, shutdown.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::error::ArchivistError;
use crate::remote::DistributionIssue;

use super::{Archivist, EngineState};

/// Distribution timer, `None` when auto-distribution is disabled.
fn distribute_timer(period: Option<Duration>) -> Option<Interval> {
    period.map(|period| {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    })
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

impl Archivist {
    /// Main run loop.
    ///
    /// Distributes on the configured interval and applies config updates
    /// until [`Self::shutdown`] is called.
    pub async fn run(&self) {
        let started = self.inner.state.send_if_modified(|state| {
            if *state == EngineState::ShuttingDown {
                return false;
            }
            *state = EngineState::Running;
            true
        });
        if !started {
            debug!("Archivist already shut down, not running");
            return;
        }
        info!("Archivist running");

        let mut config_rx = self.inner.config_rx.lock().await;
        let mut state_rx = self.state_receiver();
        if *state_rx.borrow_and_update() == EngineState::ShuttingDown {
            return;
        }
        let mut timer = distribute_timer(self.inner.config.read().distribute_interval());

        loop {
            tokio::select! {
                Ok(()) = config_rx.changed() => {
                    let new_config = config_rx.borrow_and_update().clone();
                    info!(
                        distribute_interval_ms = new_config.distribute_interval_ms,
                        "Config updated"
                    );
                    let period = new_config.distribute_interval();
                    if period != self.inner.config.read().distribute_interval() {
                        timer = distribute_timer(period);
                    }
                    *self.inner.config.write() = new_config;
                }

                _ = next_tick(&mut timer) => {
                    self.distribute_logged().await;
                }

                Ok(()) = state_rx.changed() => {
                    if *state_rx.borrow_and_update() == EngineState::ShuttingDown {
                        break;
                    }
                }
            }
        }
        debug!("Run loop stopped");
    }

    /// Run the loop in a background task.
    ///
    /// The task ends on [`Self::shutdown`] or when the handle is aborted.
    pub fn spawn_auto_distribute(&self) -> JoinHandle<()> {
        let archivist = self.clone();
        tokio::spawn(async move { archivist.run().await })
    }

    /// Initiate graceful shutdown: stop the run loop and distribute
    /// whatever is still pending.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<Vec<DistributionIssue>, ArchivistError> {
        info!("Initiating archivist shutdown...");
        let _ = self.inner.state.send(EngineState::ShuttingDown);

        let issues = self.distribute().await?;
        info!(issues = issues.len(), "Archivist shutdown complete");
        Ok(issues)
    }
}
