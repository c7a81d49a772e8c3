// SPDX-License-Identifier: Apache-2.0

//! Plain-text byte offset persistence with atomic writes.

use crate::receivers::file_tail::error::{Error, Result};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Reads the persisted offset. A missing or unparsable checkpoint is offset 0.
pub async fn load_offset(path: &Path) -> u64 {
    match fs::read_to_string(path).await {
        Ok(s) => s.trim().parse::<u64>().unwrap_or(0),
        Err(_) => 0,
    }
}

/// Writes the offset to a temp file and renames it over the checkpoint.
pub async fn save_offset(path: &Path, offset: u64) -> Result<()> {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let err = |reason: String| Error::Checkpoint {
        path: path.to_path_buf(),
        reason,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !fs::try_exists(parent).await.unwrap_or(false) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| err(format!("failed to create parent directory: {}", e)))?;
        }
    }

    // Unique temp name so concurrent writers never share a temp file
    let unique_id = COUNTER.fetch_add(1, Ordering::SeqCst);
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = path.with_file_name(format!(
        "{}.tmp.{}.{}",
        file_name,
        std::process::id(),
        unique_id
    ));

    let mut file = fs::File::create(&temp_path)
        .await
        .map_err(|e| err(format!("failed to create temp file: {}", e)))?;
    file.write_all(offset.to_string().as_bytes())
        .await
        .map_err(|e| err(format!("failed to write checkpoint: {}", e)))?;
    file.flush()
        .await
        .map_err(|e| err(format!("failed to flush checkpoint: {}", e)))?;
    drop(file);

    fs::rename(&temp_path, path)
        .await
        .map_err(|e| err(format!("failed to rename checkpoint file: {}", e)))?;

    Ok(())
}
