// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Remote echo handling.
//!
//! Changes pushed by the remote store are applied to the cache (exec
//! only, never queued). While one of our own distribution sends is
//! outstanding, echoes are dropped: they would mostly be our own changes
//! coming back.
//!
//! An attached echo stream is read under the inbox lock, and suppression
//! is decided while that lock is held. `distribute()` drains the inbox
//! under the same lock before it stops counting as outstanding, so an echo
//! that arrived during a send is never applied after it.

use std::task::{Poll, Waker};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ArchivistError;
use crate::record::DiffSource;
use crate::remote::EchoEvent;

use super::Archivist;

/// Receiving end of the attached echo stream.
pub(crate) struct EchoInbox {
    generation: u64,
    rx: mpsc::UnboundedReceiver<EchoEvent>,
    waker: Option<Waker>,
}

impl Archivist {
    /// Apply a change pushed by the remote store.
    ///
    /// Returns whether the event was applied. Suppressed events and events
    /// that fail to apply (undecodable payloads) return `false`; failures
    /// are logged, never returned.
    pub fn handle_echo(&self, event: EchoEvent) -> bool {
        let suppressed = self.is_distributing();
        self.settle_echo(event, suppressed)
    }

    fn settle_echo(&self, event: EchoEvent, suppressed: bool) -> bool {
        if suppressed {
            self.note_suppressed(&event);
            return false;
        }

        let key = event.key().clone();
        let operation = event.operation();
        match self.exec_echo(event) {
            Ok(()) => {
                crate::metrics::record_echo("applied");
                debug!(key = %key, operation, "Echo applied");
                true
            }
            Err(e) => {
                crate::metrics::record_echo("failed");
                crate::metrics::record_error("echo", e.kind());
                warn!(key = %key, operation, error = %e, "Could not apply echo");
                false
            }
        }
    }

    fn note_suppressed(&self, event: &EchoEvent) {
        crate::metrics::record_echo("suppressed");
        let key = event.key();
        let operation = event.operation();
        if self.inner.config.read().warn_on_echo_suppressed {
            warn!(key = %key, operation, "Echo dropped while distributing");
        } else {
            debug!(key = %key, operation, "Echo dropped while distributing");
        }
    }

    fn exec_echo(&self, event: EchoEvent) -> Result<(), ArchivistError> {
        let dispatcher = self.dispatcher();
        match event {
            EchoEvent::Set { key, value, expiration_time } => {
                let (media_type, payload) = value.into_payload()?;
                dispatcher.exec_set(&key, payload, Some(&media_type), expiration_time)?;
            }
            EchoEvent::ApplyDiff { key, diff, expiration_time } => {
                dispatcher.exec_apply_diff(&key, Some(&diff), expiration_time, DiffSource::Remote)?;
            }
            EchoEvent::Touch { key, expiration_time } => {
                dispatcher.exec_touch(&key, expiration_time);
            }
            EchoEvent::Del { key } => {
                dispatcher.exec_del(&key);
            }
        }
        Ok(())
    }

    /// Feed echo events from a channel into the cache until the sender
    /// side closes.
    ///
    /// Attaching a new stream replaces the previous one, whose task then
    /// ends.
    pub fn attach_echoes(&self, events: mpsc::UnboundedReceiver<EchoEvent>) -> JoinHandle<()> {
        let (generation, replaced) = {
            let mut inbox = self.inner.echoes.lock();
            let generation = inbox.as_ref().map_or(0, |inbox| inbox.generation + 1);
            let replaced = inbox.replace(EchoInbox {
                generation,
                rx: events,
                waker: None,
            });
            (generation, replaced)
        };
        if let Some(waker) = replaced.and_then(|inbox| inbox.waker) {
            debug!("Replacing attached echo stream");
            waker.wake();
        }

        let archivist = self.clone();
        tokio::spawn(async move {
            let mut applied = 0usize;
            while let Some((event, suppressed)) = archivist.next_echo(generation).await {
                if archivist.settle_echo(event, suppressed) {
                    applied += 1;
                }
            }
            info!(applied, "Echo stream closed");
        })
    }

    /// Next event of the attached stream, with whether it arrived while a
    /// send was outstanding. `None` once the stream closed or was replaced.
    async fn next_echo(&self, generation: u64) -> Option<(EchoEvent, bool)> {
        std::future::poll_fn(|cx| {
            let mut inbox = self.inner.echoes.lock();
            let Some(inbox) = inbox.as_mut().filter(|inbox| inbox.generation == generation) else {
                return Poll::Ready(None);
            };
            match inbox.rx.poll_recv(cx) {
                Poll::Ready(event) => {
                    inbox.waker = None;
                    Poll::Ready(event.map(|event| (event, self.is_distributing())))
                }
                Poll::Pending => {
                    inbox.waker = Some(cx.waker().clone());
                    Poll::Pending
                }
            }
        })
        .await
    }

    /// Drop every echo still queued on the attached stream. Called by
    /// `distribute()` while its send still counts as outstanding.
    pub(super) fn drop_queued_echoes(&self) {
        let mut inbox = self.inner.echoes.lock();
        let Some(inbox) = inbox.as_mut() else {
            return;
        };
        let mut dropped = 0usize;
        while let Ok(event) = inbox.rx.try_recv() {
            self.note_suppressed(&event);
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, "Dropped echoes queued during the send");
        }
    }
}

