// SPDX-License-Identifier: Apache-2.0

use clap::Args;
use std::path::PathBuf;

#[derive(Debug, Args, Clone)]
pub struct AgentRun {
    /// Configuration file
    #[arg(long, env = "TELEMETER_CONFIG", default_value = "telemeter.toml")]
    pub config: PathBuf,

    /// Scenarios marked active at startup
    #[arg(long = "scenario", env = "TELEMETER_SCENARIOS", value_delimiter = ',')]
    pub scenarios: Vec<String>,

    /// Maximum time to wait for pipelines to stop on shutdown
    #[arg(long, env = "TELEMETER_SHUTDOWN_TIMEOUT", default_value = "30s", value_parser = humantime::parse_duration)]
    pub shutdown_timeout: std::time::Duration,
}
