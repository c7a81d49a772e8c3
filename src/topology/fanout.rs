// SPDX-License-Identifier: Apache-2.0

use crate::bounded_channel::{
    BoundedReceiver, BoundedSender, DropPolicy, SendOutcome, bounded_with_policy,
};
use crate::record::Record;
use crate::topology::component::Exporter;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tower::BoxError;
use tracing::{debug, error, warn};

/// Batches queued per exporter before further batches are dropped for it.
pub const DEFAULT_EXPORTER_QUEUE_SIZE: usize = 16;

pub type SharedBatch = Arc<Vec<Record>>;

/// Distributes each processed batch to every exporter of a pipeline.
///
/// Every exporter is fed through its own bounded queue and drained by its
/// own task (see [`ExporterTask`]), so a slow or failing exporter never
/// stalls the consumer loop or its siblings.
pub struct Fanout {
    pipeline: String,
    consumers: Vec<(String, BoundedSender<SharedBatch>)>,
}

#[derive(Default)]
pub struct FanoutBuilder {
    pipeline: String,
    queue_size: usize,
    exporters: Vec<Arc<dyn Exporter>>,
}

impl FanoutBuilder {
    pub fn new(pipeline: &str) -> Self {
        Self {
            pipeline: pipeline.to_string(),
            queue_size: DEFAULT_EXPORTER_QUEUE_SIZE,
            exporters: Vec::new(),
        }
    }

    pub fn with_queue_size(mut self, queue_size: usize) -> Self {
        self.queue_size = queue_size;
        self
    }

    pub fn add_exporter(mut self, exporter: Arc<dyn Exporter>) -> Self {
        self.exporters.push(exporter);
        self
    }

    pub fn build(self) -> Result<(Fanout, Vec<ExporterTask>), BoxError> {
        if self.exporters.is_empty() {
            return Err("Fanout requires at least one exporter".into());
        }

        let mut consumers = Vec::with_capacity(self.exporters.len());
        let mut tasks = Vec::with_capacity(self.exporters.len());
        for exporter in self.exporters {
            let (tx, rx) = bounded_with_policy(self.queue_size.max(1), DropPolicy::DropNewest);
            consumers.push((exporter.name().to_string(), tx));
            tasks.push(ExporterTask {
                pipeline: self.pipeline.clone(),
                exporter,
                rx,
            });
        }

        Ok((
            Fanout {
                pipeline: self.pipeline,
                consumers,
            },
            tasks,
        ))
    }
}

impl Fanout {
    /// Hands the batch to every exporter queue without waiting. A full queue
    /// drops the batch for that exporter only.
    pub fn send(&self, batch: Vec<Record>) {
        if batch.is_empty() {
            return;
        }

        let shared: SharedBatch = Arc::new(batch);
        for (name, tx) in &self.consumers {
            match tx.try_send(shared.clone()) {
                Ok(SendOutcome::Accepted) => {}
                Ok(_) => {
                    warn!(
                        pipeline = %self.pipeline,
                        exporter = %name,
                        batch_size = shared.len(),
                        "Exporter is falling behind, dropping batch"
                    );
                }
                Err(e) => {
                    debug!(pipeline = %self.pipeline, exporter = %name, error = %e, "Exporter queue unavailable");
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.consumers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }
}

/// Drains one exporter's queue until every sender is dropped.
pub struct ExporterTask {
    pipeline: String,
    exporter: Arc<dyn Exporter>,
    rx: BoundedReceiver<SharedBatch>,
}

impl ExporterTask {
    pub async fn run(mut self) -> Result<(), BoxError> {
        while let Some(batch) = self.rx.next().await {
            let res = AssertUnwindSafe(self.exporter.export(&batch))
                .catch_unwind()
                .await;
            if res.is_err() {
                error!(
                    pipeline = %self.pipeline,
                    exporter = self.exporter.name(),
                    batch_size = batch.len(),
                    "Exporter panicked while exporting batch"
                );
            }
        }

        debug!(
            pipeline = %self.pipeline,
            exporter = self.exporter.name(),
            "Exporter queue closed, exiting"
        );
        Ok(())
    }
}
