// SPDX-License-Identifier: Apache-2.0

//! Parser for the plain-text metrics exposition format.

use crate::init::parse::unquote;
use crate::record::{Record, TagValue, Tags};
use chrono::{DateTime, Utc};

pub const SOURCE: &str = "dapr-prometheus";
pub const SOURCE_TAG: &str = "metric.source";
pub const SOURCE_TAG_VALUE: &str = "dapr";

/// Parses every sample line of `body` into a record stamped with `now`.
/// Comments, blank lines and malformed lines are skipped.
pub fn parse_exposition(body: &str, now: DateTime<Utc>) -> Vec<Record> {
    body.lines()
        .filter_map(|line| parse_line(line, now))
        .collect()
}

fn parse_line(line: &str, now: DateTime<Utc>) -> Option<Record> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let split = line.rfind(' ')?;
    if split == 0 || split == line.len() - 1 {
        return None;
    }
    let (series, value) = (line[..split].trim_end(), &line[split + 1..]);
    let value: f64 = value.parse().ok()?;

    let mut tags = Tags::new();
    // an unterminated label set runs to the end of the series
    let name = match series.find('{') {
        Some(open) => {
            let rest = &series[open + 1..];
            let labels = rest.rfind('}').map_or(rest, |close| &rest[..close]);
            parse_labels(labels, &mut tags);
            series[..open].trim()
        }
        None => series,
    };
    if name.is_empty() {
        return None;
    }
    tags.insert(
        SOURCE_TAG.to_string(),
        TagValue::String(SOURCE_TAG_VALUE.to_string()),
    );

    Some(Record {
        timestamp: now,
        source: SOURCE.to_string(),
        name: name.to_string(),
        value,
        tags,
    })
}

fn parse_labels(labels: &str, tags: &mut Tags) {
    for pair in labels.split(',') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        if key.is_empty() || value.is_empty() {
            continue;
        }
        tags.entry(key.to_string())
            .or_insert_with(|| TagValue::String(unquote(value).to_string()));
    }
}
