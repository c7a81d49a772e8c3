// SPDX-License-Identifier: Apache-2.0

use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:9090/metrics";
pub const DEFAULT_SCRAPE_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Environment variables checked, in order, for a local metrics port.
pub const PORT_ENV_VARS: [&str; 2] = ["DAPR_METRICS_HTTP_PORT", "DAPR_METRICS_PORT"];

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScrapeConfig {
    pub name: String,
    pub enabled: bool,
    /// Used when no port override is found in the environment
    pub endpoint: String,
    #[serde(with = "crate::init::parse::humantime_duration")]
    pub scrape_interval: Duration,
    #[serde(with = "crate::init::parse::humantime_duration")]
    pub request_timeout: Duration,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            name: "scrape".to_string(),
            enabled: false,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            scrape_interval: DEFAULT_SCRAPE_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl ScrapeConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }

    pub fn with_scrape_interval(mut self, interval: Duration) -> Self {
        self.scrape_interval = interval;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.scrape_interval.is_zero() {
            return Err("scrape_interval must be greater than 0".to_string());
        }
        if self.request_timeout.is_zero() {
            return Err("request_timeout must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Endpoint to scrape, preferring a positive port from the environment.
    pub fn resolve_endpoint(&self, env: impl Fn(&str) -> Option<String>) -> String {
        for var in PORT_ENV_VARS {
            let port = env(var).and_then(|v| v.trim().parse::<u16>().ok());
            if let Some(port) = port.filter(|p| *p > 0) {
                return format!("http://127.0.0.1:{}/metrics", port);
            }
        }
        self.endpoint.clone()
    }
}
