// SPDX-License-Identifier: Apache-2.0

use crate::record::Record;
use crate::topology::component::Exporter;
use async_trait::async_trait;
use serde::Deserialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const DEFAULT_PATH: &str = "logs/metering-debug.log";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DebugFileConfig {
    pub name: String,
    pub path: PathBuf,
}

impl Default for DebugFileConfig {
    fn default() -> Self {
        Self {
            name: "debug_file".to_string(),
            path: PathBuf::from(DEFAULT_PATH),
        }
    }
}

/// Appends every record as a JSON line to a local file.
pub struct DebugFileExporter {
    config: DebugFileConfig,
}

impl DebugFileExporter {
    pub fn new(config: DebugFileConfig) -> Self {
        Self { config }
    }
}

fn append_lines(path: &Path, batch: &[Record]) -> std::io::Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }

    let mut buf = Vec::with_capacity(batch.len() * 128);
    for r in batch {
        serde_json::to_writer(&mut buf, r)?;
        buf.push(b'\n');
    }

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(&buf)?;
    file.flush()
}

#[async_trait]
impl Exporter for DebugFileExporter {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn export(&self, batch: &[Record]) {
        if batch.is_empty() {
            return;
        }

        let path = self.config.path.clone();
        let batch = batch.to_vec();
        let count = batch.len();
        let res = tokio::task::spawn_blocking(move || append_lines(&path, &batch)).await;

        match res {
            Ok(Ok(())) => debug!(exporter = %self.config.name, records = count, "Wrote debug records"),
            Ok(Err(e)) => warn!(
                exporter = %self.config.name,
                path = %self.config.path.display(),
                error = %e,
                "Unable to write debug records"
            ),
            Err(e) => warn!(exporter = %self.config.name, error = %e, "Debug writer task failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.log");
        let exporter = DebugFileExporter::new(DebugFileConfig {
            name: "dbg".to_string(),
            path: path.clone(),
        });

        exporter
            .export(&[Record::new("s", "a", 1.0), Record::new("s", "b", 2.0)])
            .await;
        exporter.export(&[Record::log_line("s", "hello")]).await;

        let contents = std::fs::read_to_string(&path).unwrap();
        let records: Vec<Record> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(3, records.len());
        assert_eq!("b", records[1].name);
        assert_eq!(Some("hello"), records[2].message());
    }

    #[tokio::test]
    async fn io_errors_are_logged() {
        let dir = tempfile::tempdir().unwrap();
        // the path is an existing directory, so opening it for append fails
        let exporter = DebugFileExporter::new(DebugFileConfig {
            name: "dbg".to_string(),
            path: dir.path().to_path_buf(),
        });
        exporter.export(&[Record::new("s", "a", 1.0)]).await;
    }
}
