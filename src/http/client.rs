// SPDX-License-Identifier: Apache-2.0

use crate::crypto::init_crypto_provider;
use bytes::Bytes;
use http::{Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_rustls::{ConfigBuilderExt, HttpsConnector};
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use rustls::ClientConfig;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;
use tower::BoxError;
use tracing::debug;

pub type HttpClient = HyperClient<HttpsConnector<HttpConnector>, Full<Bytes>>;

#[derive(Debug)]
pub struct ConnectError;
impl Display for ConnectError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "unable to connect")
    }
}
impl Error for ConnectError {}

#[derive(Debug)]
pub struct TimeoutError(pub Duration);
impl Display for TimeoutError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "request timed out after {:?}", self.0)
    }
}
impl Error for TimeoutError {}

/// Status and fully collected body of a completed request.
#[derive(Debug)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

fn client_config() -> Result<ClientConfig, BoxError> {
    let config = match ClientConfig::builder().with_native_roots() {
        Ok(builder) => builder.with_no_client_auth(),
        Err(e) => {
            debug!(error = %e, "No native root certificates, using bundled roots");
            ClientConfig::builder()
                .with_webpki_roots()
                .with_no_client_auth()
        }
    };
    Ok(config)
}

/// Builds a pooled client that speaks both plain HTTP and HTTPS.
pub fn build_hyper_client() -> Result<HttpClient, BoxError> {
    init_crypto_provider()?;
    let client_config = client_config()?;

    let https = hyper_rustls::HttpsConnectorBuilder::new()
        .with_tls_config(client_config)
        .https_or_http()
        .enable_http1()
        .enable_http2()
        .build();

    let client = hyper_util::client::legacy::Client::builder(TokioExecutor::new())
        .pool_idle_timeout(Duration::from_secs(30))
        .pool_max_idle_per_host(16)
        .timer(TokioTimer::new())
        .build::<_, Full<Bytes>>(https);

    Ok(client)
}

/// Sends the request and collects the response body, failing if the whole
/// exchange takes longer than `timeout`.
pub async fn perform_request(
    client: &HttpClient,
    req: Request<Full<Bytes>>,
    timeout: Duration,
) -> Result<HttpResponse, BoxError> {
    let exchange = async {
        let resp = match client.request(req).await {
            Ok(resp) => resp,
            Err(e) if e.is_connect() => return Err(BoxError::from(ConnectError {})),
            Err(e) => return Err(e.into()),
        };

        let (head, body) = resp.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| format!("failed reading response: {}", e))?
            .to_bytes();

        Ok(HttpResponse {
            status: head.status,
            body,
        })
    };

    match tokio::time::timeout(timeout, exchange).await {
        Ok(res) => res,
        Err(_) => Err(TimeoutError(timeout).into()),
    }
}
