// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Wire types exchanged with the remote store.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::{CodecError, Encoding, Payload};
use crate::record_key::{Index, RecordKey};

/// Mutation kind of a pending change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Set,
    Add,
    Touch,
    Del,
}

impl Operation {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Set => "set",
            Self::Add => "add",
            Self::Touch => "touch",
            Self::Del => "del",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A payload in transport form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawValue {
    pub data: Value,
    pub media_type: String,
    pub encoding: Encoding,
}

impl RawValue {
    /// Wrap an encoded payload. Live payloads travel as JSON data.
    pub fn from_payload(payload: Payload, media_type: impl Into<String>) -> Self {
        let encoding = payload.encoding();
        let data = match payload {
            Payload::Live(live) => live.as_json().cloned().unwrap_or(Value::Null),
            Payload::Utf8(s) | Payload::Base64(s) => Value::String(s),
        };
        Self {
            data,
            media_type: media_type.into(),
            encoding,
        }
    }

    /// Turn the wire parts back into a payload.
    pub fn into_payload(self) -> Result<(String, Payload), CodecError> {
        let payload = Payload::from_wire(self.data, self.encoding, &self.media_type)?;
        Ok((self.media_type, payload))
    }
}

/// One record as returned by a read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRecord {
    pub key: RecordKey,
    /// `None` when the value does not exist remotely
    #[serde(default)]
    pub value: Option<RawValue>,
    /// Server-clock unix seconds
    #[serde(default)]
    pub expiration_time: Option<u64>,
}

impl RemoteRecord {
    #[must_use]
    pub fn absent(key: RecordKey) -> Self {
        Self {
            key,
            value: None,
            expiration_time: None,
        }
    }
}

/// One entry of a distribution batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedChange {
    pub topic: String,
    pub index: Index,
    pub operation: Operation,
    #[serde(flatten)]
    pub value: Option<RawValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_time: Option<u64>,
}

impl SerializedChange {
    #[must_use]
    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.topic.clone(), self.index.clone())
    }
}

/// A per-change problem reported by the remote store (or found locally
/// while serializing). Issues do not fail the batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionIssue {
    #[serde(default)]
    pub key: Option<RecordKey>,
    pub message: String,
}

impl std::fmt::Display for DistributionIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.key {
            Some(key) => write!(f, "{}: {}", key, self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// A change made remotely by someone else, pushed to this client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "camelCase")]
pub enum EchoEvent {
    Set {
        key: RecordKey,
        value: RawValue,
        #[serde(default, rename = "expirationTime")]
        expiration_time: Option<u64>,
    },
    ApplyDiff {
        key: RecordKey,
        diff: Value,
        #[serde(default, rename = "expirationTime")]
        expiration_time: Option<u64>,
    },
    Touch {
        key: RecordKey,
        #[serde(default, rename = "expirationTime")]
        expiration_time: Option<u64>,
    },
    Del {
        key: RecordKey,
    },
}

impl EchoEvent {
    #[must_use]
    pub fn key(&self) -> &RecordKey {
        match self {
            Self::Set { key, .. } | Self::ApplyDiff { key, .. } | Self::Touch { key, .. } | Self::Del { key } => key,
        }
    }

    #[must_use]
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Set { .. } => "set",
            Self::ApplyDiff { .. } => "applyDiff",
            Self::Touch { .. } => "touch",
            Self::Del { .. } => "del",
        }
    }
}
