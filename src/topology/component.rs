// SPDX-License-Identifier: Apache-2.0

//! Contracts implemented by pluggable pipeline components.

use crate::receivers::output::RecordOutput;
use crate::record::Record;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;
use tower::BoxError;

/// Produces records from an external source into a pipeline queue.
///
/// A receiver instance may be shared by several pipelines, so any per-run
/// state must live inside `run`. `run` returns when `cancel` fires; it must
/// never fail because the consumer is slow.
#[async_trait]
pub trait Receiver: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, output: RecordOutput, cancel: CancellationToken) -> Result<(), BoxError>;

    async fn stop(&self, _cancel: CancellationToken) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Identifies one running pipeline instance. A processor shared by several
/// pipelines, or by the old and new instance during a reload, keeps any
/// buffered state separate per scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub(crate) u64);

impl ScopeId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ScopeId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Pure batch transform applied in the consumer's flush step.
pub trait Processor: Send + Sync {
    fn name(&self) -> &str;

    fn process(&self, scope: ScopeId, batch: Vec<Record>) -> Vec<Record>;

    /// Releases records of `scope` buffered longer than the processor's
    /// inactivity limit.
    fn flush_idle(&self, _scope: ScopeId, _now: DateTime<Utc>) -> Vec<Record> {
        Vec::new()
    }

    /// Releases everything still buffered for `scope`. Called once when a
    /// pipeline stops.
    fn drain(&self, _scope: ScopeId) -> Vec<Record> {
        Vec::new()
    }
}

/// Terminal sink for a processed batch. Expected failures are logged, not
/// returned.
#[async_trait]
pub trait Exporter: Send + Sync {
    fn name(&self) -> &str;

    async fn export(&self, batch: &[Record]);
}
