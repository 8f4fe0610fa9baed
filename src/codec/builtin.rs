// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Built-in media types.
//!
//! Registration order matters: detectors are evaluated in this order and
//! ties keep the earliest.
//!
//! | media type | detector | forms |
//! |---|---|---|
//! | `*` | – | default writer |
//! | `application/json` | 0.5 for JSON and text | live ↔ utf8 |
//! | `text/plain` | 0.2 for text | live ↔ utf8 |
//! | `application/octet-stream` | 1.0 for binary | live ↔ base64 |
//! | `application/x-tracked+json` | 1.0 for tracked documents | live ↔ utf8, merge-patch diffs |

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;

use super::tracked::{MergePatchDiffer, TrackedDocument};
use super::{CodecError, Encoding, LiveValue, MediaTypeRegistry, MediaTypeSpec, Payload, WILDCARD};

pub const JSON: &str = "application/json";
pub const TEXT: &str = "text/plain";
pub const OCTET_STREAM: &str = "application/octet-stream";
pub const TRACKED_JSON: &str = "application/x-tracked+json";

pub(super) fn register_all(registry: &mut MediaTypeRegistry) {
    registry.register(
        WILDCARD,
        MediaTypeSpec::new().with_writer(|stored, media_type, data| stored.store(media_type, data)),
    );
    registry.register(JSON, json_spec());
    registry.register(TEXT, text_spec());
    registry.register(OCTET_STREAM, octet_stream_spec());
    registry.register(TRACKED_JSON, tracked_spec());
}

fn unsupported(media_type: &str, found: &LiveValue) -> CodecError {
    CodecError::UnsupportedLiveValue {
        media_type: media_type.to_string(),
        found: found.kind(),
    }
}

fn invalid(media_type: &str, reason: impl ToString) -> CodecError {
    CodecError::InvalidPayload {
        media_type: media_type.to_string(),
        reason: reason.to_string(),
    }
}

/// Tab-indented JSON text.
fn to_json_text(media_type: &str, value: &Value) -> Result<String, CodecError> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    value
        .serialize(&mut serializer)
        .map_err(|e| invalid(media_type, e))?;
    String::from_utf8(out).map_err(|e| invalid(media_type, e))
}

fn parse_json_text(media_type: &str, text: &str) -> Result<Value, CodecError> {
    serde_json::from_str(text).map_err(|e| invalid(media_type, e))
}

fn json_spec() -> MediaTypeSpec {
    MediaTypeSpec::new()
        .with_detector(|v| match v {
            LiveValue::Json(_) | LiveValue::Text(_) => 0.5,
            _ => 0.0,
        })
        .with_encoder(Encoding::Live, Encoding::Utf8, |p| match p {
            Payload::Live(LiveValue::Json(v)) => Ok(Payload::Utf8(to_json_text(JSON, &v)?)),
            Payload::Live(LiveValue::Text(s)) => Ok(Payload::Utf8(to_json_text(JSON, &Value::String(s))?)),
            Payload::Live(LiveValue::Tracked(doc)) => Ok(Payload::Utf8(to_json_text(JSON, doc.get())?)),
            Payload::Live(other) => Err(unsupported(JSON, &other)),
            encoded => Ok(encoded),
        })
        .with_encoder(Encoding::Utf8, Encoding::Live, |p| match p {
            Payload::Utf8(s) => Ok(Payload::Live(LiveValue::Json(parse_json_text(JSON, &s)?))),
            other => Ok(other),
        })
}

fn text_spec() -> MediaTypeSpec {
    MediaTypeSpec::new()
        .with_detector(|v| match v {
            LiveValue::Text(_) => 0.2,
            _ => 0.0,
        })
        .with_encoder(Encoding::Live, Encoding::Utf8, |p| match p {
            Payload::Live(LiveValue::Text(s)) => Ok(Payload::Utf8(s)),
            Payload::Live(LiveValue::Json(Value::String(s))) => Ok(Payload::Utf8(s)),
            Payload::Live(other) => Err(unsupported(TEXT, &other)),
            encoded => Ok(encoded),
        })
        .with_encoder(Encoding::Utf8, Encoding::Live, |p| match p {
            Payload::Utf8(s) => Ok(Payload::Live(LiveValue::Text(s))),
            other => Ok(other),
        })
}

fn octet_stream_spec() -> MediaTypeSpec {
    MediaTypeSpec::new()
        .with_detector(|v| match v {
            LiveValue::Binary(_) => 1.0,
            _ => 0.0,
        })
        .with_encoder(Encoding::Live, Encoding::Base64, |p| match p {
            Payload::Live(LiveValue::Binary(b)) => Ok(Payload::Base64(STANDARD.encode(&b))),
            Payload::Live(LiveValue::Text(s)) => Ok(Payload::Base64(STANDARD.encode(s.as_bytes()))),
            Payload::Live(other) => Err(unsupported(OCTET_STREAM, &other)),
            encoded => Ok(encoded),
        })
        .with_encoder(Encoding::Base64, Encoding::Live, |p| match p {
            Payload::Base64(s) => {
                let bytes = STANDARD.decode(s.as_bytes()).map_err(|e| invalid(OCTET_STREAM, e))?;
                Ok(Payload::Live(LiveValue::Binary(Bytes::from(bytes))))
            }
            other => Ok(other),
        })
}

fn tracked_spec() -> MediaTypeSpec {
    MediaTypeSpec::new()
        .with_detector(|v| match v {
            LiveValue::Tracked(_) => 1.0,
            _ => 0.0,
        })
        .with_encoder(Encoding::Live, Encoding::Utf8, |p| match p {
            Payload::Live(LiveValue::Tracked(doc)) => Ok(Payload::Utf8(to_json_text(TRACKED_JSON, doc.get())?)),
            Payload::Live(LiveValue::Json(v)) => Ok(Payload::Utf8(to_json_text(TRACKED_JSON, &v)?)),
            Payload::Live(other) => Err(unsupported(TRACKED_JSON, &other)),
            encoded => Ok(encoded),
        })
        .with_encoder(Encoding::Utf8, Encoding::Live, |p| match p {
            Payload::Utf8(s) => {
                let value = parse_json_text(TRACKED_JSON, &s)?;
                Ok(Payload::Live(LiveValue::Tracked(TrackedDocument::new(value))))
            }
            other => Ok(other),
        })
        .with_writer(|stored, media_type, data| {
            // Plain JSON written under the tracked type starts tracking here
            let data = match data {
                LiveValue::Json(v) => LiveValue::Tracked(TrackedDocument::new(v)),
                other => other,
            };
            stored.store(media_type, data);
        })
        .with_differ(MergePatchDiffer)
}
