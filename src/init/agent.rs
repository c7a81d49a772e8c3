// SPDX-License-Identifier: Apache-2.0

use crate::crypto::init_crypto_provider;
use crate::init::args::AgentRun;
use crate::init::config::{build_registry, load_config};
use crate::init::reload::ConfigReloader;
use crate::init::wait;
use crate::topology::supervisor::{HealthSnapshot, PipelineSupervisor};
use std::sync::Arc;
use tokio::select;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::{debug, error, info, warn};

pub struct Agent {
    config: AgentRun,
}

impl Agent {
    pub fn new(config: AgentRun) -> Self {
        Self { config }
    }

    pub async fn run(self, agent_cancel: CancellationToken) -> Result<(), BoxError> {
        let args = self.config;

        info!(config = %args.config.display(), "Starting telemeter.");

        init_crypto_provider()?;

        let config = load_config(&args.config)?;
        let registry = build_registry(&config)?;
        debug!(components = registry.len(), "Built component registry");

        let pipeline_cancel = CancellationToken::new();
        let supervisor = Arc::new(
            PipelineSupervisor::new(registry, pipeline_cancel.clone())
                .with_stop_timeout(config.stop_timeout),
        );
        for s in &args.scenarios {
            supervisor.start_scenario(s);
        }

        let (pipelines_tx, pipelines_rx) = watch::channel(config.pipelines);

        let mut supervisor_task_set = JoinSet::new();
        {
            let supervisor = supervisor.clone();
            supervisor_task_set.spawn(async move { supervisor.run(pipelines_rx).await });
        }

        let reload_cancel = CancellationToken::new();
        let mut reload_task_set = JoinSet::new();
        reload_task_set.spawn(ConfigReloader::new(&args.config, pipelines_tx).run(reload_cancel.clone()));

        log_health(&supervisor.snapshot());

        let mut result = Ok(());
        loop {
            select! {
                _ = agent_cancel.cancelled() => {
                    debug!("Agent cancellation signaled.");
                    break;
                },
                e = wait::wait_for_any_task(&mut reload_task_set), if !reload_task_set.is_empty() => {
                    // pipelines keep running, only live reload is lost
                    match e {
                        Ok(()) => warn!("Configuration watcher exited, live reload disabled."),
                        Err(e) => error!(error = e, "Configuration watcher failed, live reload disabled."),
                    }
                },
                e = wait::wait_for_any_task(&mut supervisor_task_set) => {
                    match e {
                        Ok(()) => warn!("Unexpected early exit of supervisor."),
                        Err(e) => result = Err(e),
                    }
                    break;
                },
            }
        }

        reload_cancel.cancel();
        pipeline_cancel.cancel();

        let res = wait::wait_for_tasks_with_timeout(&mut supervisor_task_set, args.shutdown_timeout).await;
        if let Err(e) = res {
            return Err(format!("timed out waiting for pipelines to stop: {}", e).into());
        }
        reload_task_set.abort_all();
        while reload_task_set.join_next().await.is_some() {}

        log_health(&supervisor.snapshot());
        result
    }
}

fn log_health(snapshot: &HealthSnapshot) {
    match serde_json::to_string(snapshot) {
        Ok(health) => info!(health = %health, "Pipeline health"),
        Err(e) => debug!(error = %e, "Unable to serialize health snapshot"),
    }
}
