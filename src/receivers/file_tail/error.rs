// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Checkpoint error for {path}: {reason}")]
    Checkpoint { path: PathBuf, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Pipeline output closed")]
    OutputClosed,
}

pub type Result<T> = std::result::Result<T, Error>;
