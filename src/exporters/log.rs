// SPDX-License-Identifier: Apache-2.0

use crate::record::Record;
use crate::topology::component::Exporter;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LogExporterConfig {
    pub name: String,
}

impl Default for LogExporterConfig {
    fn default() -> Self {
        Self {
            name: "log".to_string(),
        }
    }
}

/// Emits each record as a structured log event.
pub struct LogExporter {
    name: String,
}

impl LogExporter {
    pub fn new(config: LogExporterConfig) -> Self {
        Self { name: config.name }
    }
}

#[async_trait]
impl Exporter for LogExporter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn export(&self, batch: &[Record]) {
        for r in batch {
            let tags = serde_json::to_string(&r.tags).unwrap_or_default();
            info!(
                target: "telemeter::records",
                exporter = %self.name,
                name = %r.name,
                value = r.value,
                source = %r.source,
                timestamp = %r.timestamp.to_rfc3339(),
                tags = %tags,
                "record"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exports_without_subscriber() {
        let exporter = LogExporter::new(LogExporterConfig::default());
        assert_eq!("log", exporter.name());
        exporter
            .export(&[Record::new("s", "cpu", 0.5).with_tag("host", "h1")])
            .await;
    }
}
