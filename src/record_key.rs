// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Record keys and their canonical "true name".
//!
//! A record is addressed by a topic (think table name) and an index (think
//! primary key: a map of scalar fields). The true name is the canonical
//! string form used as the lookup key by the cache, the pending-change
//! ledger and the in-flight fetch map.
//!
//! # Example
//!
//! ```
//! use archivist::{RecordKey, index};
//!
//! let a = RecordKey::new("player", index([("id", "p1"), ("realm", "eu")]));
//! let b = RecordKey::new("player", index([("realm", "eu"), ("id", "p1")]));
//!
//! assert_eq!(a, b);
//! assert_eq!(a.true_name(), b.true_name());
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single index field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Scalar {
    /// Write the canonical token for this scalar.
    ///
    /// Strings are JSON-quoted, so they never contain a bare separator.
    /// Floats carry an `f` suffix so `1` and `1.0` stay distinct, matching
    /// `PartialEq`.
    fn write_canonical(&self, out: &mut String) {
        match self {
            Scalar::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            Scalar::Int(n) => out.push_str(&n.to_string()),
            Scalar::Float(f) => {
                // -0.0 == 0.0, so they must share a name
                let f = if *f == 0.0 { 0.0 } else { *f };
                out.push_str(&format!("{:?}", f));
                out.push('f');
            }
            Scalar::Str(s) => out.push_str(&Value::String(s.clone()).to_string()),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{}", b),
            Scalar::Int(n) => write!(f, "{}", n),
            Scalar::Float(x) => write!(f, "{}", x),
            Scalar::Str(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::Str(s.to_string())
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Scalar::Str(s)
    }
}

impl From<i64> for Scalar {
    fn from(n: i64) -> Self {
        Scalar::Int(n)
    }
}

impl From<i32> for Scalar {
    fn from(n: i32) -> Self {
        Scalar::Int(i64::from(n))
    }
}

impl From<u32> for Scalar {
    fn from(n: u32) -> Self {
        Scalar::Int(i64::from(n))
    }
}

impl From<f64> for Scalar {
    fn from(x: f64) -> Self {
        Scalar::Float(x)
    }
}

impl From<bool> for Scalar {
    fn from(b: bool) -> Self {
        Scalar::Bool(b)
    }
}

/// Index fields of a record. Ordered, so equality ignores insertion order.
pub type Index = BTreeMap<String, Scalar>;

/// Build an [`Index`] from `(field, value)` pairs.
pub fn index<I, K, V>(fields: I) -> Index
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Scalar>,
{
    fields
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Address of one record: `(topic, index)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordKey {
    pub topic: String,
    #[serde(default)]
    pub index: Index,
}

impl RecordKey {
    pub fn new(topic: impl Into<String>, index: Index) -> Self {
        Self {
            topic: topic.into(),
            index,
        }
    }

    /// Key with an empty index (singleton records).
    pub fn topic_only(topic: impl Into<String>) -> Self {
        Self::new(topic, Index::new())
    }

    /// Canonical string form of this key.
    ///
    /// Layout: `<topic-json>:<field-json>=<value>,<field-json>=<value>...`
    /// with fields in sorted order. Every string is JSON-quoted and every
    /// other token is free of `"`, `,`, `=` and `:`, so the mapping is
    /// injective.
    #[must_use]
    pub fn true_name(&self) -> String {
        let mut out = Value::String(self.topic.clone()).to_string();
        out.push(':');
        for (i, (field, value)) in self.index.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(&Value::String(field.clone()).to_string());
            out.push('=');
            value.write_canonical(&mut out);
        }
        out
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.topic)?;
        if !self.index.is_empty() {
            f.write_str("(")?;
            for (i, (field, value)) in self.index.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{}={}", field, value)?;
            }
            f.write_str(")")?;
        }
        Ok(())
    }
}
