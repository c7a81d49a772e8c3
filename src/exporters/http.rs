// SPDX-License-Identifier: Apache-2.0

use crate::http::client::{HttpClient, build_hyper_client, perform_request};
use crate::record::Record;
use crate::topology::component::Exporter;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::header::CONTENT_TYPE;
use http::{HeaderName, HeaderValue, Method, Request};
use http_body_util::Full;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tower::BoxError;
use tracing::{debug, warn};

pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:4318/v1/metrics";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Protocol label carried in the payload. Both variants send JSON over HTTP.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub enum Protocol {
    #[default]
    Http,
    Grpc,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HttpExporterConfig {
    pub name: String,
    pub protocol: Protocol,
    pub endpoint: String,
    pub headers: BTreeMap<String, String>,
    #[serde(with = "crate::init::parse::humantime_duration")]
    pub timeout: Duration,
}

impl Default for HttpExporterConfig {
    fn default() -> Self {
        Self {
            name: "http".to_string(),
            protocol: Protocol::default(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            headers: BTreeMap::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl HttpExporterConfig {
    pub fn new(name: &str, endpoint: &str) -> Self {
        Self {
            name: name.to_string(),
            endpoint: endpoint.to_string(),
            ..Default::default()
        }
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.headers.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Serialize)]
struct Payload<'a> {
    protocol: Protocol,
    exported_at: DateTime<Utc>,
    records: &'a [Record],
}

/// Posts each batch as a single JSON document. There is no retry; a failed
/// batch is logged and dropped.
pub struct HttpExporter {
    config: HttpExporterConfig,
    headers: Vec<(HeaderName, HeaderValue)>,
    client: HttpClient,
}

impl HttpExporter {
    pub fn new(config: HttpExporterConfig) -> Result<Self, BoxError> {
        let client = build_hyper_client()?;
        let headers = config
            .headers
            .iter()
            .filter_map(|(k, v)| {
                match (HeaderName::try_from(k.as_str()), HeaderValue::try_from(v.as_str())) {
                    (Ok(k), Ok(v)) => Some((k, v)),
                    _ => {
                        debug!(exporter = %config.name, header = %k, "Skipping invalid header");
                        None
                    }
                }
            })
            .collect();

        Ok(Self {
            config,
            headers,
            client,
        })
    }

    fn build_request(&self, batch: &[Record]) -> Result<Request<Full<Bytes>>, BoxError> {
        let payload = Payload {
            protocol: self.config.protocol,
            exported_at: Utc::now(),
            records: batch,
        };
        let body = serde_json::to_vec(&payload)?;

        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(&self.config.endpoint)
            .header(CONTENT_TYPE, "application/json");
        for (k, v) in &self.headers {
            builder = builder.header(k, v);
        }
        Ok(builder.body(Full::new(Bytes::from(body)))?)
    }
}

#[async_trait]
impl Exporter for HttpExporter {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn export(&self, batch: &[Record]) {
        if batch.is_empty() {
            return;
        }

        let req = match self.build_request(batch) {
            Ok(req) => req,
            Err(e) => {
                warn!(exporter = %self.config.name, error = %e, "Unable to build export request");
                return;
            }
        };

        match perform_request(&self.client, req, self.config.timeout).await {
            Ok(resp) if resp.is_success() => {
                debug!(
                    exporter = %self.config.name,
                    records = batch.len(),
                    "Exported batch"
                );
            }
            Ok(resp) => {
                warn!(
                    exporter = %self.config.name,
                    endpoint = %self.config.endpoint,
                    status = %resp.status,
                    body = %String::from_utf8_lossy(&resp.body),
                    "Export rejected by endpoint"
                );
            }
            Err(e) => {
                warn!(
                    exporter = %self.config.name,
                    endpoint = %self.config.endpoint,
                    error = %e,
                    "Export request failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    #[tokio::test]
    async fn posts_json_with_headers() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/metrics")
                .header("content-type", "application/json")
                .header("x-api-key", "abc")
                .json_body_partial(
                    json!({
                        "protocol": "Grpc",
                        "records": [{"source": "s", "name": "cpu", "value": 0.5, "tags": {"host": "h1"}}]
                    })
                    .to_string(),
                );
            then.status(200);
        });

        let config = HttpExporterConfig::new("otel", &server.url("/v1/metrics"))
            .with_protocol(Protocol::Grpc)
            .with_header("x-api-key", "abc")
            .with_header("bad header", "x");
        let exporter = HttpExporter::new(config).unwrap();
        assert_eq!(1, exporter.headers.len());

        let rec = Record::new("s", "cpu", 0.5).with_tag("host", "h1");
        exporter.export(&[rec]).await;
        mock.assert();
    }

    #[tokio::test]
    async fn empty_batch_sends_nothing() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST);
            then.status(200);
        });

        let exporter = HttpExporter::new(HttpExporterConfig::new("e", &server.url("/"))).unwrap();
        exporter.export(&[]).await;
        mock.assert_hits(0);
    }

    #[tokio::test]
    async fn failures_do_not_raise() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST);
            then.status(500).body("boom");
        });

        let exporter = HttpExporter::new(HttpExporterConfig::new("e", &server.url("/"))).unwrap();
        exporter.export(&[Record::new("s", "m", 1.0)]).await;
        mock.assert_hits(1);

        let unreachable = HttpExporter::new(
            HttpExporterConfig::new("e", "http://127.0.0.1:1/").with_timeout(Duration::from_millis(500)),
        )
        .unwrap();
        unreachable.export(&[Record::new("s", "m", 1.0)]).await;
    }

    #[test]
    fn config_defaults() {
        let cfg: HttpExporterConfig = serde_json::from_value(json!({"name": "x"})).unwrap();
        assert_eq!(DEFAULT_ENDPOINT, cfg.endpoint);
        assert_eq!(Protocol::Http, cfg.protocol);
        assert_eq!(DEFAULT_TIMEOUT, cfg.timeout);
    }
}
