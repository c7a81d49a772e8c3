// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Tag key carrying the raw text of a log line.
pub const MESSAGE_TAG: &str = "message";

pub type Tags = BTreeMap<String, TagValue>;

/// Scalar tag value. Serializes as the bare JSON scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl TagValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            TagValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Null => write!(f, "null"),
            TagValue::Bool(b) => write!(f, "{}", b),
            TagValue::Int(i) => write!(f, "{}", i),
            TagValue::Float(v) => write!(f, "{}", v),
            TagValue::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for TagValue {
    fn from(value: &str) -> Self {
        TagValue::String(value.to_string())
    }
}

impl From<String> for TagValue {
    fn from(value: String) -> Self {
        TagValue::String(value)
    }
}

impl From<i64> for TagValue {
    fn from(value: i64) -> Self {
        TagValue::Int(value)
    }
}

impl From<f64> for TagValue {
    fn from(value: f64) -> Self {
        TagValue::Float(value)
    }
}

impl From<bool> for TagValue {
    fn from(value: bool) -> Self {
        TagValue::Bool(value)
    }
}

/// A single timestamped, named, valued and tagged unit of telemetry.
///
/// Records are treated as immutable values once created by a receiver.
/// Processors that change a record build a new one, typically through
/// [`Record::with_tags`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub name: String,
    pub value: f64,
    #[serde(default)]
    pub tags: Tags,
}

impl Record {
    pub fn new(source: impl Into<String>, name: impl Into<String>, value: f64) -> Self {
        Self {
            timestamp: Utc::now(),
            source: source.into(),
            name: name.into(),
            value,
            tags: Tags::new(),
        }
    }

    /// Builds a log line record as emitted by line oriented receivers.
    pub fn log_line(source: impl Into<String>, line: impl Into<String>) -> Self {
        let mut r = Self::new(source, "log", 0.0);
        r.tags
            .insert(MESSAGE_TAG.to_string(), TagValue::String(line.into()));
        r
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<TagValue>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Returns a copy of this record with its tags replaced.
    pub fn with_tags(&self, tags: Tags) -> Self {
        Self {
            timestamp: self.timestamp,
            source: self.source.clone(),
            name: self.name.clone(),
            value: self.value,
            tags,
        }
    }

    pub fn message(&self) -> Option<&str> {
        self.tags.get(MESSAGE_TAG).and_then(|v| v.as_str())
    }
}
