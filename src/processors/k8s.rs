// SPDX-License-Identifier: Apache-2.0

use crate::init::parse::{parse_key_val, unquote};
use crate::record::{Record, TagValue, Tags};
use crate::topology::component::{Processor, ScopeId};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

pub const POD_NAME_TAG: &str = "k8s.pod.name";
pub const NAMESPACE_TAG: &str = "k8s.namespace.name";
pub const NODE_NAME_TAG: &str = "k8s.node.name";
pub const LABEL_PREFIX: &str = "k8s.pod.label.";
pub const ANNOTATION_PREFIX: &str = "k8s.pod.annotation.";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct K8sMetadataConfig {
    pub name: String,
    pub enabled: bool,
    pub pod_name_env: String,
    pub namespace_env: String,
    pub node_name_env: String,
    /// Downward API labels file, one `key="value"` per line
    pub pod_labels_path: Option<PathBuf>,
    /// Downward API annotations file
    pub pod_annotations_path: Option<PathBuf>,
}

impl Default for K8sMetadataConfig {
    fn default() -> Self {
        Self {
            name: "k8s_metadata".to_string(),
            enabled: true,
            pod_name_env: "POD_NAME".to_string(),
            namespace_env: "POD_NAMESPACE".to_string(),
            node_name_env: "NODE_NAME".to_string(),
            pod_labels_path: None,
            pod_annotations_path: None,
        }
    }
}

pub type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Adds pod identity, labels and annotations to every record. Tags are
/// resolved on first use and never refreshed.
pub struct K8sMetadataProcessor {
    config: K8sMetadataConfig,
    env: EnvLookup,
    // None once resolution has failed
    static_tags: OnceLock<Option<Tags>>,
}

impl K8sMetadataProcessor {
    pub fn new(config: K8sMetadataConfig) -> Self {
        Self::with_env(config, Arc::new(|k| std::env::var(k).ok()))
    }

    pub fn with_env(config: K8sMetadataConfig, env: EnvLookup) -> Self {
        Self {
            config,
            env,
            static_tags: OnceLock::new(),
        }
    }

    fn static_tags(&self) -> Option<&Tags> {
        self.static_tags
            .get_or_init(|| match self.resolve() {
                Ok(tags) => {
                    debug!(processor = %self.config.name, tags = tags.len(), "Resolved k8s metadata");
                    Some(tags)
                }
                Err(e) => {
                    warn!(
                        processor = %self.config.name,
                        error = %e,
                        "Unable to resolve k8s metadata, enrichment disabled"
                    );
                    None
                }
            })
            .as_ref()
    }

    fn resolve(&self) -> Result<Tags, std::io::Error> {
        let mut tags = Tags::new();
        for (env_key, tag) in [
            (&self.config.pod_name_env, POD_NAME_TAG),
            (&self.config.namespace_env, NAMESPACE_TAG),
            (&self.config.node_name_env, NODE_NAME_TAG),
        ] {
            if let Some(v) = (self.env)(env_key).filter(|v| !v.trim().is_empty()) {
                tags.insert(tag.to_string(), TagValue::String(v.trim().to_string()));
            }
        }

        if let Some(path) = &self.config.pod_labels_path {
            load_kv_file(path, LABEL_PREFIX, &mut tags)?;
        }
        if let Some(path) = &self.config.pod_annotations_path {
            load_kv_file(path, ANNOTATION_PREFIX, &mut tags)?;
        }
        Ok(tags)
    }
}

fn load_kv_file(path: &Path, prefix: &str, tags: &mut Tags) -> Result<(), std::io::Error> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "Metadata file not present, skipping");
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    let mut seen = HashSet::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok((key, value)) = parse_key_val::<String, String>(line) else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() || !seen.insert(key.to_lowercase()) {
            continue;
        }
        let value = unquote(value.trim());
        tags.insert(
            format!("{}{}", prefix, key),
            TagValue::String(value.to_string()),
        );
    }
    Ok(())
}

impl Processor for K8sMetadataProcessor {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn process(&self, _scope: ScopeId, batch: Vec<Record>) -> Vec<Record> {
        if !self.config.enabled || batch.is_empty() {
            return batch;
        }
        let Some(static_tags) = self.static_tags().filter(|t| !t.is_empty()) else {
            return batch;
        };

        batch
            .into_iter()
            .map(|r| {
                let mut tags = r.tags.clone();
                for (k, v) in static_tags {
                    tags.entry(k.clone()).or_insert_with(|| v.clone());
                }
                r.with_tags(tags)
            })
            .collect()
    }
}
