// SPDX-License-Identifier: Apache-2.0

pub mod k8s;
pub mod multiline;
pub mod transform;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error("invalid pattern for {field}: {error}")]
    InvalidPattern { field: String, error: regex::Error },

    #[error("configuration error: {0}")]
    Config(String),
}

pub(crate) fn compile(field: &str, pattern: &str) -> Result<regex::Regex, ProcessorError> {
    regex::Regex::new(pattern).map_err(|error| ProcessorError::InvalidPattern {
        field: field.to_string(),
        error,
    })
}
