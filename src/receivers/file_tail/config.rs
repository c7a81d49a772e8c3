// SPDX-License-Identifier: Apache-2.0

//! Configuration for the file-tail receiver.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);
pub const DEFAULT_MAX_BYTES_PER_SECOND: u64 = 1024 * 1024;
pub const CHECKPOINT_FILE_NAME: &str = ".position";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FileTailConfig {
    /// Component name pipelines refer to
    pub name: String,
    /// File to follow
    pub file_path: PathBuf,
    /// Where the read offset is persisted, defaults to `.position` next to the file
    pub checkpoint_path: Option<PathBuf>,
    #[serde(with = "crate::init::parse::humantime_duration")]
    pub poll_interval: Duration,
    /// Read budget per one-second window, 0 disables the limit
    pub max_bytes_per_second: u64,
    /// Restart from the beginning when the file shrinks below the offset
    pub follow_rotation: bool,
}

impl Default for FileTailConfig {
    fn default() -> Self {
        Self {
            name: "file_tail".to_string(),
            file_path: PathBuf::new(),
            checkpoint_path: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_bytes_per_second: DEFAULT_MAX_BYTES_PER_SECOND,
            follow_rotation: true,
        }
    }
}

impl FileTailConfig {
    pub fn new(name: &str, file_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            file_path: file_path.into(),
            ..Default::default()
        }
    }

    pub fn with_checkpoint_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint_path = Some(path.into());
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_bytes_per_second(mut self, max: u64) -> Self {
        self.max_bytes_per_second = max;
        self
    }

    pub fn with_follow_rotation(mut self, follow: bool) -> Self {
        self.follow_rotation = follow;
        self
    }

    /// Resolved checkpoint location.
    pub fn checkpoint_path(&self) -> PathBuf {
        match &self.checkpoint_path {
            Some(p) => p.clone(),
            None => self
                .file_path
                .parent()
                .unwrap_or_else(|| Path::new(""))
                .join(CHECKPOINT_FILE_NAME),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.poll_interval.is_zero() {
            return Err("poll_interval must be greater than 0".to_string());
        }
        Ok(())
    }
}
