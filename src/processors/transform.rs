// SPDX-License-Identifier: Apache-2.0

use crate::processors::{ProcessorError, compile};
use crate::record::{Record, TagValue};
use crate::topology::component::{Processor, ScopeId};
use regex::Regex;
use serde::Deserialize;

pub const DEFAULT_REPLACEMENT: &str = "***";

fn default_replacement() -> String {
    DEFAULT_REPLACEMENT.to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MaskRule {
    pub pattern: String,
    #[serde(default = "default_replacement")]
    pub replacement: String,
    /// Tags the rule applies to. Empty means every string tag.
    #[serde(default)]
    pub target_fields: Vec<String>,
}

impl MaskRule {
    pub fn new(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            replacement: default_replacement(),
            target_fields: Vec::new(),
        }
    }

    pub fn with_replacement(mut self, replacement: &str) -> Self {
        self.replacement = replacement.to_string();
        self
    }

    pub fn with_target(mut self, field: &str) -> Self {
        self.target_fields.push(field.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    pub name: String,
    /// Regex with named groups applied to the `message` tag
    pub field_pattern: Option<String>,
    pub mask_rules: Vec<MaskRule>,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            name: "transform".to_string(),
            field_pattern: None,
            mask_rules: Vec::new(),
        }
    }
}

struct Extraction {
    regex: Regex,
    group_names: Vec<String>,
}

struct Mask {
    regex: Regex,
    replacement: String,
    targets: Vec<String>,
}

impl Mask {
    fn applies_to(&self, key: &str) -> bool {
        self.targets.is_empty() || self.targets.iter().any(|t| t == key)
    }
}

/// Extracts named fields from the message and masks sensitive values.
pub struct TransformProcessor {
    name: String,
    extraction: Option<Extraction>,
    masks: Vec<Mask>,
}

impl TransformProcessor {
    pub fn new(config: TransformConfig) -> Result<Self, ProcessorError> {
        let extraction = match config.field_pattern.as_deref().map(str::trim) {
            Some(p) if !p.is_empty() => {
                let regex = compile("field_pattern", p)?;
                let group_names = regex
                    .capture_names()
                    .skip(1)
                    .filter_map(|name| name.map(|s| s.to_string()))
                    .collect();
                Some(Extraction { regex, group_names })
            }
            _ => None,
        };

        let mut masks = Vec::with_capacity(config.mask_rules.len());
        for (i, rule) in config.mask_rules.into_iter().enumerate() {
            if rule.pattern.trim().is_empty() {
                continue;
            }
            masks.push(Mask {
                regex: compile(&format!("mask_rules[{}]", i), &rule.pattern)?,
                replacement: rule.replacement,
                targets: rule.target_fields,
            });
        }

        Ok(Self {
            name: config.name,
            extraction,
            masks,
        })
    }

    fn transform(&self, record: Record) -> Record {
        let mut tags = record.tags.clone();

        if let (Some(ext), Some(msg)) = (&self.extraction, record.message()) {
            if let Some(caps) = ext.regex.captures(msg) {
                for name in &ext.group_names {
                    if let Some(m) = caps.name(name).filter(|m| !m.as_str().is_empty()) {
                        tags.insert(name.clone(), TagValue::String(m.as_str().to_string()));
                    }
                }
            }
        }

        for mask in &self.masks {
            for (key, value) in tags.iter_mut() {
                if !mask.applies_to(key) {
                    continue;
                }
                if let TagValue::String(s) = value {
                    if !s.is_empty() && mask.regex.is_match(s) {
                        *s = mask
                            .regex
                            .replace_all(s, mask.replacement.as_str())
                            .into_owned();
                    }
                }
            }
        }

        record.with_tags(tags)
    }
}

impl Processor for TransformProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, _scope: ScopeId, batch: Vec<Record>) -> Vec<Record> {
        batch.into_iter().map(|r| self.transform(r)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processor(field_pattern: Option<&str>, rules: Vec<MaskRule>) -> TransformProcessor {
        TransformProcessor::new(TransformConfig {
            name: "t".to_string(),
            field_pattern: field_pattern.map(str::to_string),
            mask_rules: rules,
        })
        .unwrap()
    }

    #[test]
    fn masks_every_string_tag() {
        let p = processor(None, vec![MaskRule::new(r"secret\d+")]);
        let r = Record::log_line("s", "token=secret123 ok")
            .with_tag("other", "secret9")
            .with_tag("count", 5i64);

        let out = p.process(ScopeId(0), vec![r]);
        assert_eq!(Some("token=*** ok"), out[0].message());
        assert_eq!(Some("***"), out[0].tags["other"].as_str());
        assert_eq!(TagValue::Int(5), out[0].tags["count"]);
    }

    #[test]
    fn masks_only_targets() {
        let rule = MaskRule::new(r"\d{4}-\d{4}")
            .with_replacement("[card]")
            .with_target("message")
            .with_target("absent");
        let p = processor(None, vec![rule]);
        let r = Record::log_line("s", "card 1234-5678").with_tag("raw", "1234-5678");

        let out = p.process(ScopeId(0), vec![r]);
        assert_eq!(Some("card [card]"), out[0].message());
        assert_eq!(Some("1234-5678"), out[0].tags["raw"].as_str());
        assert!(!out[0].tags.contains_key("absent"));
    }

    #[test]
    fn extracts_named_groups_then_masks() {
        let p = processor(
            Some(r"user=(?P<user>\w+) password=(?P<password>\S+)(?: ip=(?P<ip>\S+))?"),
            vec![MaskRule::new(r"password=\S+").with_replacement("password=***")],
        );
        let r = Record::log_line("s", "login user=bob password=hunter2");

        let out = p.process(ScopeId(0), vec![r]);
        let tags = &out[0].tags;
        assert_eq!(Some("bob"), tags["user"].as_str());
        assert_eq!(Some("hunter2"), tags["password"].as_str());
        // unmatched optional group adds nothing
        assert!(!tags.contains_key("ip"));
        assert_eq!(Some("login user=bob password=***"), out[0].message());
    }

    #[test]
    fn blank_rules_ignored_and_invalid_rejected() {
        let p = processor(None, vec![MaskRule::new("  ")]);
        let r = Record::log_line("s", "unchanged");
        assert_eq!(Some("unchanged"), p.process(ScopeId(0), vec![r])[0].message());

        let res = TransformProcessor::new(TransformConfig {
            mask_rules: vec![MaskRule::new("(")],
            ..Default::default()
        });
        assert!(matches!(res, Err(ProcessorError::InvalidPattern { .. })));
    }

    #[test]
    fn input_is_not_mutated() {
        let p = processor(None, vec![MaskRule::new("a")]);
        let r = Record::log_line("s", "aaa");
        let out = p.process(ScopeId(0), vec![r.clone()]);
        assert_eq!(Some("aaa"), r.message());
        assert_eq!(Some("***"), out[0].message());
        assert_eq!(r.timestamp, out[0].timestamp);
    }
}
