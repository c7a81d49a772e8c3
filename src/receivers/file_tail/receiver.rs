// SPDX-License-Identifier: Apache-2.0

use crate::receivers::file_tail::checkpoint;
use crate::receivers::file_tail::config::FileTailConfig;
use crate::receivers::file_tail::decoder::LineDecoder;
use crate::receivers::file_tail::error::{Error, Result};
use crate::receivers::file_tail::rate::{Allowance, RateWindow};
use crate::receivers::output::RecordOutput;
use crate::record::Record;
use crate::topology::component::Receiver;
use async_trait::async_trait;
use std::io::{ErrorKind, SeekFrom};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::{debug, info, warn};

const READ_CHUNK_SIZE: usize = 8192;

/// Follows a single file, emitting one record per completed line.
pub struct FileTailReceiver {
    config: FileTailConfig,
    source: String,
}

/// Per-run read position and buffers.
struct TailState {
    checkpoint_path: PathBuf,
    offset: u64,
    decoder: LineDecoder,
    window: RateWindow,
    buf: Vec<u8>,
}

enum Progress {
    Read,
    Idle,
    Throttled(Duration),
}

impl FileTailReceiver {
    pub fn new(config: FileTailConfig) -> Result<Self> {
        config.validate().map_err(Error::Config)?;
        let source = config.file_path.to_string_lossy().into_owned();
        Ok(Self { config, source })
    }

    async fn poll_once(&self, state: &mut TailState, output: &RecordOutput) -> Result<Progress> {
        let path = &self.config.file_path;
        let len = match tokio::fs::metadata(path).await {
            Ok(m) => m.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Progress::Idle),
            Err(e) => return Err(e.into()),
        };

        if len < state.offset {
            if !self.config.follow_rotation {
                return Ok(Progress::Idle);
            }
            info!(
                file = %self.source,
                offset = state.offset,
                length = len,
                "File shrank below read offset, assuming rotation"
            );
            state.offset = 0;
            state.decoder.reset();
        }
        if len == state.offset {
            return Ok(Progress::Idle);
        }

        let budget = match state.window.allowance(Instant::now()) {
            Allowance::Bytes(n) => n,
            Allowance::WaitFor(d) => return Ok(Progress::Throttled(d)),
        };
        let want = (READ_CHUNK_SIZE as u64).min(budget).min(len - state.offset) as usize;

        let mut file = tokio::fs::File::open(path).await?;
        file.seek(SeekFrom::Start(state.offset)).await?;
        let n = file.read(&mut state.buf[..want]).await?;
        if n == 0 {
            return Ok(Progress::Idle);
        }
        state.window.consume(n as u64);
        state.offset += n as u64;

        let lines = state.decoder.push(&state.buf[..n]);
        for line in lines {
            if line.is_empty() {
                continue;
            }
            if output.send(Record::log_line(&self.source, line)).await.is_err() {
                return Err(Error::OutputClosed);
            }
        }

        // Persist the end of the last complete line so a partial line is
        // read again after a restart.
        let committed = state.offset - state.decoder.pending_len() as u64;
        if let Err(e) = checkpoint::save_offset(&state.checkpoint_path, committed).await {
            warn!(file = %self.source, error = %e, "Failed to persist read position");
        }

        Ok(Progress::Read)
    }
}

#[async_trait]
impl Receiver for FileTailReceiver {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn run(&self, output: RecordOutput, cancel: CancellationToken) -> std::result::Result<(), BoxError> {
        if self.config.file_path.as_os_str().is_empty() {
            warn!(receiver = %self.config.name, "No file path configured, file tail receiver is idle");
            return Ok(());
        }

        let checkpoint_path = self.config.checkpoint_path();
        let offset = checkpoint::load_offset(&checkpoint_path).await;
        info!(
            receiver = %self.config.name,
            file = %self.source,
            offset,
            pipeline = output.pipeline(),
            "Starting file tail receiver"
        );

        let mut state = TailState {
            checkpoint_path,
            offset,
            decoder: LineDecoder::default(),
            window: RateWindow::new(self.config.max_bytes_per_second, Instant::now()),
            buf: vec![0u8; READ_CHUNK_SIZE],
        };

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let wait = match self.poll_once(&mut state, &output).await {
                Ok(Progress::Read) => continue,
                Ok(Progress::Idle) => self.config.poll_interval,
                Ok(Progress::Throttled(d)) => {
                    debug!(file = %self.source, wait = ?d, "Read budget exhausted");
                    d
                }
                Err(Error::OutputClosed) => break,
                Err(e) => {
                    warn!(file = %self.source, error = %e, "Error tailing file");
                    self.config.poll_interval
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        debug!(receiver = %self.config.name, "File tail receiver exiting");
        Ok(())
    }
}
