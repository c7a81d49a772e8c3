// SPDX-License-Identifier: Apache-2.0

use crate::init::wait;
use crate::topology::component::{Exporter, Processor};
use crate::topology::pipeline::{PipelineConfig, PipelineRunner};
use crate::topology::registry::ComponentRegistry;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::select;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::{debug, error, info, warn};

/// Point-in-time view of the supervisor for external collaborators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSnapshot {
    pub last_reload: Option<DateTime<Utc>>,
    pub pipeline_count: usize,
    pub active_scenarios: Vec<String>,
}

/// Outcome of retiring a pipeline runner in the background.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    Stopped { pipeline: String },
    StopFailed { pipeline: String, error: String },
}

type Runners = Arc<Vec<Arc<PipelineRunner>>>;

/// Builds pipeline runners from configuration and swaps them on reload.
pub struct PipelineSupervisor {
    registry: ComponentRegistry,
    cancel: CancellationToken,
    stop_timeout: Option<Duration>,
    runners: Mutex<Runners>,
    last_reload: Mutex<Option<DateTime<Utc>>>,
    scenarios: Mutex<BTreeSet<String>>,
    retiring: Mutex<JoinSet<Result<(), BoxError>>>,
    events_tx: mpsc::UnboundedSender<LifecycleEvent>,
    events_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<LifecycleEvent>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl PipelineSupervisor {
    /// Runners started by this supervisor cancel when `cancel` fires.
    pub fn new(registry: ComponentRegistry, cancel: CancellationToken) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            registry,
            cancel,
            stop_timeout: Some(crate::topology::pipeline::DEFAULT_STOP_TIMEOUT),
            runners: Mutex::new(Arc::new(Vec::new())),
            last_reload: Mutex::new(None),
            scenarios: Mutex::new(BTreeSet::new()),
            retiring: Mutex::new(JoinSet::new()),
            events_tx,
            events_rx: tokio::sync::Mutex::new(events_rx),
        }
    }

    pub fn with_stop_timeout(mut self, stop_timeout: Option<Duration>) -> Self {
        self.stop_timeout = stop_timeout;
        self
    }

    /// Current runner set. The returned list is never mutated; a reload
    /// replaces it.
    pub fn pipelines(&self) -> Runners {
        lock(&self.runners).clone()
    }

    fn build_runners(&self, configs: &[PipelineConfig]) -> Vec<Arc<PipelineRunner>> {
        let mut runners = Vec::with_capacity(configs.len());
        for config in configs {
            if !config.enabled {
                info!(pipeline = %config.name, "Pipeline disabled, skipping");
                continue;
            }

            let Some(receiver) = self.registry.receiver(&config.receiver) else {
                warn!(
                    pipeline = %config.name,
                    receiver = %config.receiver,
                    "Unknown receiver, skipping pipeline"
                );
                continue;
            };

            let mut processors: Vec<Arc<dyn Processor>> = Vec::new();
            for name in &config.processors {
                match self.registry.processor(name) {
                    Some(p) => processors.push(p),
                    None => {
                        warn!(pipeline = %config.name, processor = %name, "Unknown processor, ignoring")
                    }
                }
            }

            let mut exporters: Vec<Arc<dyn Exporter>> = Vec::new();
            for name in &config.exporters {
                match self.registry.exporter(name) {
                    Some(e) => exporters.push(e),
                    None => {
                        warn!(pipeline = %config.name, exporter = %name, "Unknown exporter, ignoring")
                    }
                }
            }
            if exporters.is_empty() {
                warn!(pipeline = %config.name, "Pipeline has no resolvable exporters, skipping");
                continue;
            }

            match PipelineRunner::new(
                &config.name,
                receiver,
                processors,
                exporters,
                config.backpressure.clone(),
            ) {
                Ok(r) => runners.push(Arc::new(r.with_stop_timeout(self.stop_timeout))),
                Err(e) => warn!(pipeline = %config.name, error = %e, "Invalid pipeline, skipping"),
            }
        }
        runners
    }

    /// Builds a new runner set, swaps it in, starts it and retires the
    /// previous set in the background. Returns the number of active pipelines.
    pub fn reload(&self, configs: &[PipelineConfig]) -> usize {
        let new_runners: Runners = Arc::new(self.build_runners(configs));

        let old = {
            let mut current = lock(&self.runners);
            std::mem::replace(&mut *current, new_runners.clone())
        };
        *lock(&self.last_reload) = Some(Utc::now());

        for r in new_runners.iter() {
            r.start(&self.cancel);
        }
        self.retire(old);

        info!(
            pipelines = new_runners.len(),
            configured = configs.len(),
            "Pipeline set reloaded"
        );
        new_runners.len()
    }

    fn retire(&self, old: Runners) {
        let mut retiring = lock(&self.retiring);
        // reap stop tasks that already finished
        while retiring.try_join_next().is_some() {}

        for r in old.iter() {
            let runner = r.clone();
            let events = self.events_tx.clone();
            retiring.spawn(async move {
                let pipeline = runner.name().to_string();
                let res = runner.stop().await;
                let event = match &res {
                    Ok(()) => LifecycleEvent::Stopped { pipeline },
                    Err(e) => LifecycleEvent::StopFailed {
                        pipeline,
                        error: e.to_string(),
                    },
                };
                // run loop may already be gone during shutdown
                let _ = events.send(event);
                res.map_err(|e| e.into())
            });
        }
    }

    /// Applies the current configuration, then every update published on
    /// `updates`, until the supervisor's token is cancelled. Stops all
    /// pipelines before returning.
    pub async fn run(&self, mut updates: watch::Receiver<Vec<PipelineConfig>>) -> Result<(), BoxError> {
        let initial = updates.borrow_and_update().clone();
        self.reload(&initial);

        let mut events = self.events_rx.lock().await;
        loop {
            select! {
                biased;

                _ = self.cancel.cancelled() => {
                    debug!("Supervisor received shutdown signal");
                    break;
                },

                changed = updates.changed() => {
                    if changed.is_err() {
                        debug!("Configuration source closed, keeping current pipelines");
                        self.cancel.cancelled().await;
                        break;
                    }
                    let configs = updates.borrow_and_update().clone();
                    self.reload(&configs);
                },

                Some(event) = events.recv() => log_event(&event),
            }
        }
        drop(events);

        self.shutdown().await
    }

    /// Stops every active runner and waits for all outstanding stop tasks.
    pub async fn shutdown(&self) -> Result<(), BoxError> {
        let current = {
            let mut current = lock(&self.runners);
            std::mem::replace(&mut *current, Arc::new(Vec::new()))
        };
        self.retire(current);

        let mut retiring = std::mem::take(&mut *lock(&self.retiring));
        let res = wait::wait_for_all_tasks(&mut retiring).await;

        // drain events produced while shutting down
        if let Ok(mut events) = self.events_rx.try_lock() {
            while let Ok(event) = events.try_recv() {
                log_event(&event);
            }
        }

        info!("All pipelines stopped");
        res
    }

    /// Marks a scenario active. Blank names are ignored and repeated starts
    /// are no-ops.
    pub fn start_scenario(&self, name: &str) {
        let name = name.trim();
        if name.is_empty() {
            return;
        }
        if lock(&self.scenarios).insert(name.to_string()) {
            info!(scenario = name, "Scenario started");
        }
    }

    pub fn stop_scenario(&self, name: &str) {
        let name = name.trim();
        if name.is_empty() {
            return;
        }
        if lock(&self.scenarios).remove(name) {
            info!(scenario = name, "Scenario stopped");
        }
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            last_reload: *lock(&self.last_reload),
            pipeline_count: lock(&self.runners).len(),
            active_scenarios: lock(&self.scenarios).iter().cloned().collect(),
        }
    }
}

fn log_event(event: &LifecycleEvent) {
    match event {
        LifecycleEvent::Stopped { pipeline } => debug!(pipeline = %pipeline, "Retired pipeline stopped"),
        LifecycleEvent::StopFailed { pipeline, error } => {
            error!(pipeline = %pipeline, error = %error, "Retired pipeline failed to stop cleanly")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use crate::topology::pipeline::RunnerState;
    use crate::topology::batch::BackpressureConfig;
    use crate::receivers::output::RecordOutput;
    use crate::topology::component::Receiver;
    use crate::topology::registry::test_components::*;
    use async_trait::async_trait;

    /// Never looks at its cancellation token.
    struct Stuck;

    #[async_trait]
    impl Receiver for Stuck {
        fn name(&self) -> &str {
            "stuck"
        }

        async fn run(&self, _output: RecordOutput, _cancel: CancellationToken) -> Result<(), BoxError> {
            loop {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
        }
    }

    fn registry() -> (ComponentRegistry, Arc<CollectingExporter>) {
        let exp = Arc::new(CollectingExporter::named("collect"));
        let mut reg = ComponentRegistry::new();
        reg.register_receiver(Arc::new(StaticReceiver {
            name: "static".to_string(),
            records: vec![Record::log_line("s", "hello")],
        }))
        .unwrap();
        reg.register_processor(Arc::new(PassThrough("pass".to_string())))
            .unwrap();
        reg.register_exporter(exp.clone()).unwrap();
        (reg, exp)
    }

    #[tokio::test]
    async fn skips_unbuildable_pipelines() {
        let (reg, _exp) = registry();
        let sup = PipelineSupervisor::new(reg, CancellationToken::new());

        let configs = vec![
            PipelineConfig::new("ok", "static")
                .with_processor("pass")
                .with_processor("missing")
                .with_exporter("collect"),
            PipelineConfig::new("no-receiver", "nope").with_exporter("collect"),
            PipelineConfig::new("no-exporters", "static").with_exporter("missing"),
            PipelineConfig::new("disabled", "static")
                .with_exporter("collect")
                .with_enabled(false),
        ];
        assert_eq!(1, sup.reload(&configs));

        let pipelines = sup.pipelines();
        assert_eq!("ok", pipelines[0].name());
        assert_eq!(RunnerState::Running, pipelines[0].state());

        sup.shutdown().await.unwrap();
        assert_eq!(RunnerState::Stopped, pipelines[0].state());
        assert_eq!(0, sup.snapshot().pipeline_count);
    }

    #[tokio::test]
    async fn reload_swaps_runner_set() {
        let (reg, _exp) = registry();
        let sup = PipelineSupervisor::new(reg, CancellationToken::new());
        assert_eq!(None, sup.snapshot().last_reload);

        sup.reload(&[PipelineConfig::new("a", "static").with_exporter("collect")]);
        let first = sup.pipelines();
        let first_reload = sup.snapshot().last_reload.unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        sup.reload(&[
            PipelineConfig::new("a", "static").with_exporter("collect"),
            PipelineConfig::new("b", "static").with_exporter("COLLECT"),
        ]);
        let snap = sup.snapshot();
        assert_eq!(2, snap.pipeline_count);
        assert!(snap.last_reload.unwrap() > first_reload);

        // the previous set is retired in the background
        for _ in 0..100 {
            if first[0].state() == RunnerState::Stopped {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(RunnerState::Stopped, first[0].state());

        sup.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn run_applies_updates_until_cancelled() {
        let (reg, exp) = registry();
        let cancel = CancellationToken::new();
        let sup = Arc::new(PipelineSupervisor::new(reg, cancel.clone()));

        let (tx, rx) = watch::channel(vec![]);
        let sup_run = sup.clone();
        let handle = tokio::spawn(async move { sup_run.run(rx).await });

        let bp = BackpressureConfig::default().with_flush_interval(Duration::from_millis(20));
        tx.send(vec![
            PipelineConfig::new("a", "static")
                .with_exporter("collect")
                .with_backpressure(bp),
        ])
        .unwrap();
        for _ in 0..200 {
            if !exp.records().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(1, sup.snapshot().pipeline_count);

        cancel.cancel();
        handle.await.unwrap().unwrap();
        assert_eq!(0, sup.snapshot().pipeline_count);
        assert_eq!(Some("hello"), exp.records()[0].message());
    }

    #[tokio::test]
    async fn stuck_receiver_is_aborted_after_stop_timeout() {
        let (mut reg, _exp) = registry();
        reg.register_receiver(Arc::new(Stuck)).unwrap();
        let sup = PipelineSupervisor::new(reg, CancellationToken::new())
            .with_stop_timeout(Some(Duration::from_millis(100)));
        assert_eq!(1, sup.reload(&[PipelineConfig::new("p", "stuck").with_exporter("collect")]));
        let pipelines = sup.pipelines();

        let res = tokio::time::timeout(Duration::from_secs(5), sup.shutdown()).await;
        assert!(res.is_ok(), "shutdown hung on a receiver ignoring cancellation");
        assert_eq!(RunnerState::Stopped, pipelines[0].state());
    }

    #[test]
    fn scenarios_are_idempotent() {
        let (reg, _exp) = registry();
        let sup = PipelineSupervisor::new(reg, CancellationToken::new());

        sup.start_scenario("load-test");
        sup.start_scenario("load-test");
        sup.start_scenario("  ");
        sup.start_scenario("canary");
        assert_eq!(
            vec!["canary".to_string(), "load-test".to_string()],
            sup.snapshot().active_scenarios
        );

        sup.stop_scenario("load-test");
        sup.stop_scenario("load-test");
        sup.stop_scenario("");
        assert_eq!(vec!["canary".to_string()], sup.snapshot().active_scenarios);
    }

    #[test]
    fn snapshot_serializes() {
        let (reg, _exp) = registry();
        let sup = PipelineSupervisor::new(reg, CancellationToken::new());
        sup.start_scenario("x");

        let v = serde_json::to_value(sup.snapshot()).unwrap();
        assert!(v["last_reload"].is_null());
        assert_eq!(0, v["pipeline_count"]);
        assert_eq!(serde_json::json!(["x"]), v["active_scenarios"]);
    }
}
