// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types.
//!
//! Every fallible public operation returns [`ArchivistError`]. Errors are
//! `Clone` because a single fetch failure is handed to every coalesced
//! waiter.

use thiserror::Error;

use crate::codec::CodecError;
use crate::remote::TransportError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ArchivistError {
    /// Encoding, decoding or writing a payload failed.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// No media type was given and none could be detected from the payload.
    #[error("Could not detect media type for {topic}")]
    MediaTypeRequired { topic: String },

    /// `add` was queued on a key that already has a pending change.
    #[error("Value {true_name} already has changes queued, so cannot add")]
    ConflictingPendingChange { true_name: String },

    /// A diff was requested for a record whose media type cannot produce one.
    #[error("Cannot read diffs from media type {media_type:?} ({true_name})")]
    CannotDiffMediaType {
        true_name: String,
        media_type: Option<String>,
    },

    /// A non-optional read resolved to an absent value.
    #[error("Required value does not exist: {true_name}")]
    RequiredValueMissing { true_name: String },

    /// The fetch task went away without answering its waiters.
    #[error("Fetch for {true_name} was abandoned before it resolved")]
    FetchAbandoned { true_name: String },

    /// Error reported by the remote store, passed through untouched.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ArchivistError {
    /// Short label used for metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Codec(e) => e.kind(),
            Self::MediaTypeRequired { .. } => "media_type_required",
            Self::ConflictingPendingChange { .. } => "conflicting_pending_change",
            Self::CannotDiffMediaType { .. } => "cannot_diff_media_type",
            Self::RequiredValueMissing { .. } => "required_value_missing",
            Self::FetchAbandoned { .. } => "fetch_abandoned",
            Self::Transport(_) => "transport",
        }
    }
}
