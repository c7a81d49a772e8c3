// SPDX-License-Identifier: Apache-2.0

use crate::bounded_channel::{BoundedReceiver, BoundedSender, bounded_with_policy};
use crate::init::wait;
use crate::receivers::output::RecordOutput;
use crate::record::Record;
use crate::topology::batch::{BackpressureConfig, Batch};
use crate::topology::component::{Exporter, Processor, Receiver, ScopeId};
use crate::topology::fanout::{Fanout, FanoutBuilder};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::select;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::{debug, error, info};

pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Declarative description of one pipeline.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    pub receiver: String,
    #[serde(default)]
    pub processors: Vec<String>,
    #[serde(default)]
    pub exporters: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub backpressure: BackpressureConfig,
}

fn default_enabled() -> bool {
    true
}

impl PipelineConfig {
    pub fn new(name: &str, receiver: &str) -> Self {
        Self {
            name: name.to_string(),
            receiver: receiver.to_string(),
            processors: Vec::new(),
            exporters: Vec::new(),
            enabled: true,
            backpressure: BackpressureConfig::default(),
        }
    }

    pub fn with_processor(mut self, name: &str) -> Self {
        self.processors.push(name.to_string());
        self
    }

    pub fn with_exporter(mut self, name: &str) -> Self {
        self.exporters.push(name.to_string());
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_backpressure(mut self, backpressure: BackpressureConfig) -> Self {
        self.backpressure = backpressure;
        self
    }
}

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("invalid pipeline {pipeline}: {reason}")]
    InvalidConfig { pipeline: String, reason: String },

    #[error("pipeline {pipeline} has no exporters")]
    NoExporters { pipeline: String },

    #[error("pipeline {pipeline} failed while stopping: {error}")]
    Stop { pipeline: String, error: BoxError },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerState::Stopped => write!(f, "stopped"),
            RunnerState::Starting => write!(f, "starting"),
            RunnerState::Running => write!(f, "running"),
            RunnerState::Stopping => write!(f, "stopping"),
        }
    }
}

struct RunningPipeline {
    cancel: CancellationToken,
    queue: BoundedSender<Record>,
    tasks: JoinSet<Result<(), BoxError>>,
}

/// Owns one pipeline instance: a receiver task feeding a bounded queue, a
/// consumer task that batches and processes, and one task per exporter.
pub struct PipelineRunner {
    name: String,
    receiver: Arc<dyn Receiver>,
    processors: Arc<[Arc<dyn Processor>]>,
    exporters: Vec<Arc<dyn Exporter>>,
    backpressure: BackpressureConfig,
    stop_timeout: Option<Duration>,
    state: Mutex<RunnerState>,
    running: Mutex<Option<RunningPipeline>>,
}

impl PipelineRunner {
    pub fn new(
        name: &str,
        receiver: Arc<dyn Receiver>,
        processors: Vec<Arc<dyn Processor>>,
        exporters: Vec<Arc<dyn Exporter>>,
        backpressure: BackpressureConfig,
    ) -> Result<Self, RunnerError> {
        if let Err(reason) = backpressure.validate() {
            return Err(RunnerError::InvalidConfig {
                pipeline: name.to_string(),
                reason,
            });
        }
        if exporters.is_empty() {
            return Err(RunnerError::NoExporters {
                pipeline: name.to_string(),
            });
        }

        Ok(Self {
            name: name.to_string(),
            receiver,
            processors: processors.into(),
            exporters,
            backpressure,
            stop_timeout: Some(DEFAULT_STOP_TIMEOUT),
            state: Mutex::new(RunnerState::Stopped),
            running: Mutex::new(None),
        })
    }

    /// Bounds how long `stop` waits for the pipeline tasks. `None` waits
    /// indefinitely.
    pub fn with_stop_timeout(mut self, stop_timeout: Option<Duration>) -> Self {
        self.stop_timeout = stop_timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> RunnerState {
        *lock(&self.state)
    }

    /// Launches the pipeline tasks under a child of `parent`. Calling start on
    /// a runner that is not stopped does nothing.
    pub fn start(&self, parent: &CancellationToken) {
        {
            let mut state = lock(&self.state);
            if *state != RunnerState::Stopped {
                debug!(pipeline = %self.name, state = %*state, "Pipeline already started");
                return;
            }
            *state = RunnerState::Starting;
        }

        let cancel = parent.child_token();
        let (queue_tx, queue_rx) = bounded_with_policy(
            self.backpressure.channel_capacity,
            self.backpressure.drop_policy,
        );

        let mut fanout_builder = FanoutBuilder::new(&self.name);
        for exp in &self.exporters {
            fanout_builder = fanout_builder.add_exporter(exp.clone());
        }

        let mut tasks = JoinSet::new();
        let fanout = match fanout_builder.build() {
            Ok((fanout, exporter_tasks)) => {
                for t in exporter_tasks {
                    tasks.spawn(t.run());
                }
                fanout
            }
            Err(e) => {
                // exporters are validated in new()
                error!(pipeline = %self.name, error = %e, "Unable to build exporter fanout");
                *lock(&self.state) = RunnerState::Stopped;
                return;
            }
        };

        let consumer = Consumer {
            pipeline: self.name.clone(),
            scope: ScopeId::next(),
            processors: self.processors.clone(),
            backpressure: self.backpressure.clone(),
            fanout,
        };
        let consumer_cancel = cancel.clone();
        tasks.spawn(async move { consumer.run(queue_rx, consumer_cancel).await });

        let receiver = self.receiver.clone();
        let output = RecordOutput::new(&self.name, queue_tx.clone(), cancel.clone());
        let receiver_cancel = cancel.clone();
        let pipeline = self.name.clone();
        tasks.spawn(async move {
            let res = receiver.run(output, receiver_cancel).await;
            if let Err(e) = &res {
                error!(
                    pipeline = %pipeline,
                    receiver = receiver.name(),
                    error = %e,
                    "Receiver returned from run loop with error"
                );
            }
            res
        });

        *lock(&self.running) = Some(RunningPipeline {
            cancel,
            queue: queue_tx,
            tasks,
        });
        *lock(&self.state) = RunnerState::Running;

        info!(
            pipeline = %self.name,
            receiver = self.receiver.name(),
            processors = self.processors.len(),
            exporters = self.exporters.len(),
            "Pipeline started"
        );
    }

    /// Cancels the pipeline, closes its queue to new writes and joins every
    /// task. Stopping a runner that is not running does nothing.
    pub async fn stop(&self) -> Result<(), RunnerError> {
        {
            let mut state = lock(&self.state);
            if *state != RunnerState::Running {
                return Ok(());
            }
            *state = RunnerState::Stopping;
        }

        let running = lock(&self.running).take();
        let mut result = Ok(());
        if let Some(mut running) = running {
            running.cancel.cancel();
            running.queue.close();

            if let Err(e) = self.receiver.stop(running.cancel.clone()).await {
                error!(pipeline = %self.name, error = %e, "Receiver failed to stop");
            }

            let res = match self.stop_timeout {
                Some(t) => wait::wait_for_tasks_with_timeout(&mut running.tasks, t).await,
                None => wait::wait_for_all_tasks(&mut running.tasks).await,
            };
            if let Err(e) = res {
                running.tasks.abort_all();
                result = Err(RunnerError::Stop {
                    pipeline: self.name.clone(),
                    error: e,
                });
            }
        }

        *lock(&self.state) = RunnerState::Stopped;
        debug!(pipeline = %self.name, "Pipeline stopped");
        result
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    // Guarded values are plain state, a poisoned lock is still usable.
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Clone, Copy)]
enum FlushHook {
    None,
    Idle(DateTime<Utc>),
    Drain,
}

struct Consumer {
    pipeline: String,
    scope: ScopeId,
    processors: Arc<[Arc<dyn Processor>]>,
    backpressure: BackpressureConfig,
    fanout: Fanout,
}

impl Consumer {
    async fn run(
        self,
        mut queue: BoundedReceiver<Record>,
        cancel: CancellationToken,
    ) -> Result<(), BoxError> {
        let mut batch = Batch::new(self.backpressure.batch_size, self.backpressure.flush_interval);
        let timer = tokio::time::sleep_until(batch.deadline());
        tokio::pin!(timer);

        loop {
            select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!(pipeline = %self.pipeline, "Pipeline received shutdown signal, exiting consumer loop");
                    break;
                },

                // flush whatever has accumulated once the interval elapses
                _ = &mut timer => {
                    let to_send = batch.take_batch();
                    if !to_send.is_empty() {
                        debug!(pipeline = %self.pipeline, batch_size = to_send.len(), "Flushing a batch in timeout handler");
                    }
                    self.flush(to_send, FlushHook::Idle(Utc::now()));
                    timer.as_mut().reset(batch.deadline());
                },

                item = queue.next() => {
                    match item {
                        Some(record) => {
                            if let Some(full) = batch.offer(record) {
                                self.flush(full, FlushHook::None);
                                timer.as_mut().reset(batch.deadline());
                            }
                        }
                        None => {
                            debug!(pipeline = %self.pipeline, "Pipeline queue has closed, exiting consumer loop");
                            break;
                        }
                    }
                }
            }
        }

        // Flush the partial batch and anything still queued, then release
        // processor buffers so exporters see the tail.
        let mut remaining = batch.take_batch();
        remaining.extend(queue.drain());
        debug!(pipeline = %self.pipeline, remaining = remaining.len(), "Flushing remaining records");
        while !remaining.is_empty() {
            let split_at = remaining.len().min(self.backpressure.batch_size);
            let rest = remaining.split_off(split_at);
            self.flush(remaining, FlushHook::None);
            remaining = rest;
        }
        self.flush(Vec::new(), FlushHook::Drain);

        Ok(())
    }

    fn flush(&self, batch: Vec<Record>, hook: FlushHook) {
        let processed = run_processors(&self.pipeline, self.scope, &self.processors, batch, hook);
        self.fanout.send(processed);
    }
}

/// Runs `batch` through the processors in order. Records released by a
/// processor's idle or drain hook continue through the rest of the chain.
/// Hooks only release state buffered under `scope`.
fn run_processors(
    pipeline: &str,
    scope: ScopeId,
    processors: &[Arc<dyn Processor>],
    batch: Vec<Record>,
    hook: FlushHook,
) -> Vec<Record> {
    let mut items = batch;
    for p in processors {
        let mut out = match hook {
            FlushHook::Idle(now) => p.flush_idle(scope, now),
            _ => Vec::new(),
        };

        if !items.is_empty() {
            let batch_size = items.len();
            match std::panic::catch_unwind(AssertUnwindSafe(|| p.process(scope, items))) {
                Ok(processed) => out.extend(processed),
                Err(_) => {
                    error!(
                        pipeline = pipeline,
                        processor = p.name(),
                        batch_size,
                        "Processor panicked, dropping batch"
                    );
                }
            }
        }

        if let FlushHook::Drain = hook {
            out.extend(p.drain(scope));
        }
        items = out;
    }
    items
}
