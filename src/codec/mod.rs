// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Media-type registry: detection, encoding and diffing of record payloads.
//!
//! A payload lives in one of three forms ([`Encoding`]):
//!
//! ```text
//!   live   ─ the in-memory value the application reads and mutates
//!   utf8   ─ a portable string (JSON text, plain text)
//!   base64 ─ a binary-safe string
//! ```
//!
//! Each registered media type may carry a detector (confidence that a live
//! value is of this type), an encoder table keyed by `(from, to)` form
//! pairs, a writer that stores a live value into a record, and a differ
//! producing and applying incremental patches. The wildcard type `*`
//! supplies the default writer and fallback encoders.
//!
//! # Example
//!
//! ```
//! use archivist::codec::{Encoding, LiveValue, MediaTypeRegistry, Payload};
//! use serde_json::json;
//!
//! let registry = MediaTypeRegistry::new();
//! let live = LiveValue::Json(json!({"hp": 10}));
//!
//! let media_type = registry.guess_media_type(&live).unwrap();
//! assert_eq!(media_type, "application/json");
//!
//! let wire = registry
//!     .encode(Payload::Live(live.clone()), &media_type, &[Encoding::Utf8, Encoding::Base64])
//!     .unwrap();
//! assert_eq!(wire.encoding(), Encoding::Utf8);
//!
//! assert_eq!(registry.decode(wire, &media_type).unwrap(), live);
//! ```

pub mod builtin;
pub mod tracked;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::record::StoredPayload;

pub use tracked::TrackedDocument;

/// Media type whose spec supplies defaults for unregistered types.
pub const WILDCARD: &str = "*";

/// Representation a payload is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    Live,
    Utf8,
    Base64,
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Live => write!(f, "live"),
            Self::Utf8 => write!(f, "utf8"),
            Self::Base64 => write!(f, "base64"),
        }
    }
}

/// In-memory, application-facing payload.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveValue {
    Json(Value),
    Text(String),
    Binary(Bytes),
    Tracked(TrackedDocument),
}

impl LiveValue {
    /// Variant name, for error messages.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Json(_) => "json",
            Self::Text(_) => "text",
            Self::Binary(_) => "binary",
            Self::Tracked(_) => "tracked",
        }
    }

    /// JSON view of the value, if it has one.
    #[must_use]
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(v) => Some(v),
            Self::Tracked(doc) => Some(doc.get()),
            _ => None,
        }
    }
}

/// A payload tagged with the form it is in.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Live(LiveValue),
    Utf8(String),
    Base64(String),
}

impl Payload {
    #[must_use]
    pub fn encoding(&self) -> Encoding {
        match self {
            Self::Live(_) => Encoding::Live,
            Self::Utf8(_) => Encoding::Utf8,
            Self::Base64(_) => Encoding::Base64,
        }
    }

    /// Build a payload from wire parts.
    ///
    /// Encoded forms must carry a string; a live value arriving over the
    /// wire is taken as JSON.
    pub fn from_wire(data: Value, encoding: Encoding, media_type: &str) -> Result<Self, CodecError> {
        match (encoding, data) {
            (Encoding::Live, data) => Ok(Self::Live(LiveValue::Json(data))),
            (Encoding::Utf8, Value::String(s)) => Ok(Self::Utf8(s)),
            (Encoding::Base64, Value::String(s)) => Ok(Self::Base64(s)),
            (encoding, _) => Err(CodecError::InvalidPayload {
                media_type: media_type.to_string(),
                reason: format!("{} payload must be a string", encoding),
            }),
        }
    }

    /// The transport string of an encoded payload. `None` for live values.
    #[must_use]
    pub fn into_wire_string(self) -> Option<String> {
        match self {
            Self::Live(_) => None,
            Self::Utf8(s) | Self::Base64(s) => Some(s),
        }
    }
}

impl From<LiveValue> for Payload {
    fn from(v: LiveValue) -> Self {
        Self::Live(v)
    }
}

impl From<Value> for Payload {
    fn from(v: Value) -> Self {
        Self::Live(LiveValue::Json(v))
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Self::Live(LiveValue::Text(s.to_string()))
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Self::Live(LiveValue::Text(s))
    }
}

impl From<Bytes> for Payload {
    fn from(b: Bytes) -> Self {
        Self::Live(LiveValue::Binary(b))
    }
}

impl From<Vec<u8>> for Payload {
    fn from(b: Vec<u8>) -> Self {
        Self::Live(LiveValue::Binary(Bytes::from(b)))
    }
}

impl From<TrackedDocument> for Payload {
    fn from(doc: TrackedDocument) -> Self {
        Self::Live(LiveValue::Tracked(doc))
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("No encoder found for {media_type} from {from} to {to}")]
    NoEncoderFound {
        media_type: String,
        from: Encoding,
        to: String,
    },
    #[error("No writer for media type {media_type}")]
    NoWriterForMediaType { media_type: String },
    #[error("Cannot convert encoding \"{encoding}\" to \"live\" for {media_type}")]
    CannotDecode { media_type: String, encoding: Encoding },
    #[error("Invalid {media_type} payload: {reason}")]
    InvalidPayload { media_type: String, reason: String },
    #[error("Media type {media_type} cannot hold a {found} value")]
    UnsupportedLiveValue {
        media_type: String,
        found: &'static str,
    },
}

impl CodecError {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoEncoderFound { .. } => "no_encoder_found",
            Self::NoWriterForMediaType { .. } => "no_writer_for_media_type",
            Self::CannotDecode { .. } => "cannot_decode",
            Self::InvalidPayload { .. } => "invalid_payload",
            Self::UnsupportedLiveValue { .. } => "unsupported_live_value",
        }
    }
}

/// Confidence in `[0, 1]` that a live value is of a media type.
pub type Detector = Arc<dyn Fn(&LiveValue) -> f64 + Send + Sync>;

/// Pure conversion between two payload forms.
pub type Encoder = Arc<dyn Fn(Payload) -> Result<Payload, CodecError> + Send + Sync>;

/// Stores a live value into a record.
pub type Writer = Arc<dyn Fn(&mut StoredPayload, &str, LiveValue) + Send + Sync>;

/// Incremental patch support for a media type.
pub trait Differ: Send + Sync {
    /// Produce the patch describing changes since the last extraction.
    fn extract(&self, live: &mut LiveValue) -> Result<Value, CodecError>;

    /// Apply a patch received from the remote store. The patch is already
    /// synced, so it must not show up in the next extraction.
    fn apply(&self, live: &mut LiveValue, patch: &Value) -> Result<(), CodecError>;

    /// Apply a patch made locally, to be picked up by the next extraction.
    fn apply_local(&self, live: &mut LiveValue, patch: &Value) -> Result<(), CodecError> {
        self.apply(live, patch)
    }
}

/// Capabilities of one media type.
#[derive(Clone, Default)]
pub struct MediaTypeSpec {
    detector: Option<Detector>,
    encoders: HashMap<(Encoding, Encoding), Encoder>,
    writer: Option<Writer>,
    differ: Option<Arc<dyn Differ>>,
}

impl MediaTypeSpec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_detector(mut self, f: impl Fn(&LiveValue) -> f64 + Send + Sync + 'static) -> Self {
        self.detector = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn with_encoder(
        mut self,
        from: Encoding,
        to: Encoding,
        f: impl Fn(Payload) -> Result<Payload, CodecError> + Send + Sync + 'static,
    ) -> Self {
        self.encoders.insert((from, to), Arc::new(f));
        self
    }

    #[must_use]
    pub fn with_writer(
        mut self,
        f: impl Fn(&mut StoredPayload, &str, LiveValue) + Send + Sync + 'static,
    ) -> Self {
        self.writer = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn with_differ(mut self, differ: impl Differ + 'static) -> Self {
        self.differ = Some(Arc::new(differ));
        self
    }

    #[must_use]
    pub fn has_differ(&self) -> bool {
        self.differ.is_some()
    }
}

impl fmt::Debug for MediaTypeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut encoders: Vec<String> = self
            .encoders
            .keys()
            .map(|(from, to)| format!("{}-{}", from, to))
            .collect();
        encoders.sort();
        f.debug_struct("MediaTypeSpec")
            .field("detector", &self.detector.is_some())
            .field("encoders", &encoders)
            .field("writer", &self.writer.is_some())
            .field("differ", &self.differ.is_some())
            .finish()
    }
}

/// Registry of media types.
///
/// Built once and shared read-only by the engine.
#[derive(Debug, Clone, Default)]
pub struct MediaTypeRegistry {
    specs: HashMap<String, MediaTypeSpec>,
    /// Media types with a detector, in registration order.
    detectors: Vec<String>,
}

impl MediaTypeRegistry {
    /// Registry with the built-in media types.
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Self::empty();
        builtin::register_all(&mut registry);
        registry
    }

    /// Registry with nothing registered, not even the wildcard writer.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Register (or replace) a media type.
    pub fn register(&mut self, name: impl Into<String>, spec: MediaTypeSpec) {
        let name = name.into();
        let has_detector = spec.detector.is_some();
        self.detectors.retain(|n| *n != name);
        if has_detector {
            self.detectors.push(name.clone());
        }
        debug!(media_type = %name, detector = has_detector, "Media type registered");
        self.specs.insert(name, spec);
    }

    #[must_use]
    pub fn is_registered(&self, media_type: &str) -> bool {
        self.specs.contains_key(media_type)
    }

    /// Guess the media type of a live value.
    ///
    /// A detector answering `1.0` wins immediately; otherwise the highest
    /// confidence wins and ties keep the earliest registration.
    #[must_use]
    pub fn guess_media_type(&self, live: &LiveValue) -> Option<String> {
        let mut best: Option<&str> = None;
        let mut best_certainty = 0.0;

        for name in &self.detectors {
            let Some(detector) = self.specs.get(name).and_then(|s| s.detector.as_ref()) else {
                continue;
            };
            let certainty = detector(live);
            if certainty >= 1.0 {
                return Some(name.clone());
            }
            if certainty > best_certainty {
                best_certainty = certainty;
                best = Some(name.as_str());
            }
        }

        best.map(str::to_string)
    }

    fn encoders_for(&self, media_type: &str) -> Option<&HashMap<(Encoding, Encoding), Encoder>> {
        self.specs
            .get(media_type)
            .map(|s| &s.encoders)
            .filter(|e| !e.is_empty())
            .or_else(|| {
                self.specs
                    .get(WILDCARD)
                    .map(|s| &s.encoders)
                    .filter(|e| !e.is_empty())
            })
    }

    /// Convert a payload into the first reachable form of `to`.
    ///
    /// A payload already in one of the `to` forms is returned unchanged.
    pub fn encode(&self, payload: Payload, media_type: &str, to: &[Encoding]) -> Result<Payload, CodecError> {
        let from = payload.encoding();
        if to.contains(&from) {
            return Ok(payload);
        }

        if let Some(encoders) = self.encoders_for(media_type) {
            for target in to {
                if let Some(encoder) = encoders.get(&(from, *target)) {
                    return encoder(payload);
                }
            }
        }

        Err(CodecError::NoEncoderFound {
            media_type: media_type.to_string(),
            from,
            to: to.iter().map(ToString::to_string).collect::<Vec<_>>().join(","),
        })
    }

    /// Convert a payload to its live form.
    pub fn decode(&self, payload: Payload, media_type: &str) -> Result<LiveValue, CodecError> {
        let payload = match payload {
            Payload::Live(live) => return Ok(live),
            encoded => encoded,
        };
        let encoding = payload.encoding();

        let decoder = self
            .encoders_for(media_type)
            .and_then(|e| e.get(&(encoding, Encoding::Live)))
            .ok_or_else(|| CodecError::CannotDecode {
                media_type: media_type.to_string(),
                encoding,
            })?;

        match decoder(payload)? {
            Payload::Live(live) => Ok(live),
            _ => Err(CodecError::CannotDecode {
                media_type: media_type.to_string(),
                encoding,
            }),
        }
    }

    /// Writer for a media type, falling back to the wildcard writer.
    #[must_use]
    pub fn writer_for(&self, media_type: &str) -> Option<&Writer> {
        self.specs
            .get(media_type)
            .and_then(|s| s.writer.as_ref())
            .or_else(|| self.specs.get(WILDCARD).and_then(|s| s.writer.as_ref()))
    }

    #[must_use]
    pub fn differ_for(&self, media_type: &str) -> Option<Arc<dyn Differ>> {
        self.specs.get(media_type).and_then(|s| s.differ.clone())
    }
}
