// SPDX-License-Identifier: Apache-2.0

use crate::http::client::{HttpClient, build_hyper_client, perform_request};
use crate::receivers::output::RecordOutput;
use crate::receivers::scrape::config::ScrapeConfig;
use crate::receivers::scrape::parser::parse_exposition;
use crate::topology::component::Receiver;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use http::Request;
use http::header::ACCEPT;
use http_body_util::Full;
use thiserror::Error;
use tokio::select;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ScrapeError {
    #[error("invalid scrape configuration: {0}")]
    Config(String),

    #[error("unable to build http client: {0}")]
    Client(BoxError),
}

/// Periodically scrapes a metrics exposition endpoint.
pub struct ScrapeReceiver {
    config: ScrapeConfig,
    client: HttpClient,
}

impl ScrapeReceiver {
    pub fn new(config: ScrapeConfig) -> Result<Self, ScrapeError> {
        config.validate().map_err(ScrapeError::Config)?;
        let client = build_hyper_client().map_err(ScrapeError::Client)?;
        Ok(Self { config, client })
    }

    /// Scrapes once and returns the number of records handed to the output,
    /// or `None` if the output is closed.
    async fn scrape(&self, endpoint: &str, output: &RecordOutput) -> Option<usize> {
        let req = match Request::get(endpoint)
            .header(ACCEPT, "text/plain")
            .body(Full::new(Bytes::new()))
        {
            Ok(req) => req,
            Err(e) => {
                warn!(endpoint, error = %e, "Invalid scrape request");
                return Some(0);
            }
        };

        let resp = match perform_request(&self.client, req, self.config.request_timeout).await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(endpoint, error = %e, "Metrics scrape failed");
                return Some(0);
            }
        };
        if !resp.is_success() {
            warn!(endpoint, status = %resp.status, "Metrics endpoint returned non-success status");
            return Some(0);
        }

        let body = String::from_utf8_lossy(&resp.body);
        let records = parse_exposition(&body, Utc::now());
        let count = records.len();
        for r in records {
            if output.send(r).await.is_err() {
                return None;
            }
        }
        debug!(endpoint, records = count, "Scraped metrics");
        Some(count)
    }
}

#[async_trait]
impl Receiver for ScrapeReceiver {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn run(&self, output: RecordOutput, cancel: CancellationToken) -> Result<(), BoxError> {
        if !self.config.enabled {
            debug!(receiver = %self.config.name, "Scrape receiver disabled");
            return Ok(());
        }

        let endpoint = self.config.resolve_endpoint(|k| std::env::var(k).ok());
        info!(
            receiver = %self.config.name,
            endpoint = %endpoint,
            interval = ?self.config.scrape_interval,
            pipeline = output.pipeline(),
            "Starting metrics scrape receiver"
        );

        let mut ticker = tokio::time::interval(self.config.scrape_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                biased;

                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let done = select! {
                        _ = cancel.cancelled() => true,
                        res = self.scrape(&endpoint, &output) => res.is_none(),
                    };
                    if done {
                        break;
                    }
                }
            }
        }

        debug!(receiver = %self.config.name, "Scrape receiver exiting");
        Ok(())
    }
}
