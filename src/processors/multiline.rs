// SPDX-License-Identifier: Apache-2.0

use crate::processors::{ProcessorError, compile};
use crate::record::{MESSAGE_TAG, Record, TagValue};
use crate::topology::component::{Processor, ScopeId};
use chrono::{DateTime, TimeDelta, Utc};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

pub const DEFAULT_START_PATTERN: &str = r"^\S+.*";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MultilineConfig {
    pub name: String,
    /// Lines matching this pattern open a new entry
    pub start_pattern: String,
    /// Maximum age of an open entry before it is flushed
    #[serde(with = "crate::init::parse::humantime_duration")]
    pub timeout: Duration,
}

impl Default for MultilineConfig {
    fn default() -> Self {
        Self {
            name: "multiline".to_string(),
            start_pattern: DEFAULT_START_PATTERN.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

struct OpenEntry {
    text: String,
    anchor: Record,
    started: DateTime<Utc>,
}

impl OpenEntry {
    fn new(line: String, anchor: Record) -> Self {
        let started = anchor.timestamp;
        Self {
            text: line,
            anchor,
            started,
        }
    }

    fn finish(self) -> Record {
        let mut tags = self.anchor.tags.clone();
        let text = self.text.trim_end_matches(['\r', '\n']).to_string();
        tags.insert(MESSAGE_TAG.to_string(), TagValue::String(text));
        self.anchor.with_tags(tags)
    }
}

/// Joins continuation lines onto the preceding start line. Entries are kept
/// per pipeline scope and record source, so neither interleaved sources nor
/// pipelines sharing this processor ever mix.
pub struct MultilineProcessor {
    name: String,
    start: Regex,
    timeout: TimeDelta,
    open: Mutex<HashMap<(ScopeId, String), OpenEntry>>,
}

impl MultilineProcessor {
    pub fn new(config: MultilineConfig) -> Result<Self, ProcessorError> {
        let start = compile("start_pattern", &config.start_pattern)?;
        let timeout = TimeDelta::from_std(config.timeout)
            .map_err(|e| ProcessorError::Config(format!("invalid timeout: {}", e)))?;
        Ok(Self {
            name: config.name,
            start,
            timeout,
            open: Mutex::new(HashMap::new()),
        })
    }

    fn take_where(&self, scope: ScopeId, pred: impl Fn(&OpenEntry) -> bool) -> Vec<Record> {
        let mut open = self.open.lock().unwrap_or_else(|e| e.into_inner());
        let keys: Vec<(ScopeId, String)> = open
            .iter()
            .filter(|((s, _), e)| *s == scope && pred(e))
            .map(|(k, _)| k.clone())
            .collect();

        let mut entries: Vec<OpenEntry> = keys.iter().filter_map(|k| open.remove(k)).collect();
        entries.sort_by_key(|e| e.started);
        entries.into_iter().map(OpenEntry::finish).collect()
    }
}

impl Processor for MultilineProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, scope: ScopeId, batch: Vec<Record>) -> Vec<Record> {
        let mut out = Vec::with_capacity(batch.len());
        let mut open = self.open.lock().unwrap_or_else(|e| e.into_inner());

        for record in batch {
            let Some(line) = record.message().map(str::to_string) else {
                out.push(record);
                continue;
            };

            let key = (scope, record.source.clone());
            let expired = open
                .get(&key)
                .is_some_and(|e| record.timestamp - e.started > self.timeout);
            if expired {
                if let Some(e) = open.remove(&key) {
                    out.push(e.finish());
                }
            }

            if !self.start.is_match(&line) {
                if let Some(entry) = open.get_mut(&key) {
                    entry.text.push('\n');
                    entry.text.push_str(&line);
                    continue;
                }
            }

            if let Some(prev) = open.insert(key, OpenEntry::new(line, record)) {
                out.push(prev.finish());
            }
        }
        out
    }

    fn flush_idle(&self, scope: ScopeId, now: DateTime<Utc>) -> Vec<Record> {
        let timeout = self.timeout;
        self.take_where(scope, |e| now - e.started > timeout)
    }

    fn drain(&self, scope: ScopeId) -> Vec<Record> {
        self.take_where(scope, |_| true)
    }
}
