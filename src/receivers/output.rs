// SPDX-License-Identifier: Apache-2.0

use crate::bounded_channel::{BoundedSender, SendError, SendOutcome};
use crate::record::Record;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

// Log a warning once per this many dropped records.
const DROP_WARN_EVERY: u64 = 1000;

/// Producer side of a pipeline queue handed to a receiver's run loop.
#[derive(Clone)]
pub struct RecordOutput {
    pipeline: Arc<str>,
    tx: BoundedSender<Record>,
    cancel: CancellationToken,
    dropped: Arc<AtomicU64>,
}

impl RecordOutput {
    pub fn new(pipeline: &str, tx: BoundedSender<Record>, cancel: CancellationToken) -> Self {
        Self {
            pipeline: Arc::from(pipeline),
            tx,
            cancel,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Offers a record to the pipeline queue. Returns `SendError::Closed` once
    /// the pipeline is stopping, including while waiting under the Block policy.
    pub async fn send(&self, record: Record) -> Result<SendOutcome, SendError> {
        let outcome = select! {
            biased;

            _ = self.cancel.cancelled() => return Err(SendError::Closed),
            res = self.tx.send(record) => res?,
        };

        match outcome {
            SendOutcome::Accepted => {}
            SendOutcome::DroppedNewest | SendOutcome::DroppedOldest => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(pipeline = %self.pipeline, ?outcome, "Pipeline queue full");
                if total % DROP_WARN_EVERY == 1 {
                    warn!(
                        pipeline = %self.pipeline,
                        policy = ?self.tx.policy(),
                        dropped_total = total,
                        "Pipeline queue full, dropping records"
                    );
                }
            }
        }
        Ok(outcome)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }
}
