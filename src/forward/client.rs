//! Shadow request dispatch.
//!
//! # Responsibilities
//! - Build the outbound request (method, body, URL, forwarded headers)
//! - Send it on a pooled HTTP/1.1 client with a per-request timeout
//! - Drain and discard the response
//!
//! # Design Decisions
//! - One shared client; clones share its connection pool
//! - Failures are logged and counted, never retried
//! - The timeout covers the whole exchange, response drain included

use std::time::{Duration, Instant};

use bytes::Bytes;
use http::uri::InvalidUri;
use http::{Request, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use thiserror::Error;

use crate::config::ForwardConfig;
use crate::forward::headers::forwarded_headers;
use crate::http::CapturedRequest;
use crate::observability::metrics;

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("invalid shadow URL {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: InvalidUri,
    },

    #[error("failed to build request: {0}")]
    Build(#[from] http::Error),

    #[error("request failed: {0}")]
    Request(#[from] hyper_util::client::legacy::Error),

    #[error("failed to drain response body: {0}")]
    Body(#[from] hyper::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl ForwardError {
    /// Short label for metrics.
    pub fn outcome(&self) -> &'static str {
        match self {
            ForwardError::InvalidUrl { .. } | ForwardError::Build(_) => "invalid_request",
            ForwardError::Request(_) => "request_error",
            ForwardError::Body(_) => "body_error",
            ForwardError::Timeout(_) => "timeout",
        }
    }
}

/// Fire-and-forget HTTP forwarder.
#[derive(Clone)]
pub struct Forwarder {
    client: Client<HttpConnector, Full<Bytes>>,
    timeout: Duration,
}

impl Forwarder {
    pub fn new(config: &ForwardConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(config.pool_idle_timeout_secs))
            .build(connector);

        Self {
            client,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Send the shadow copy of `request` to `url` and discard the response.
    ///
    /// Every outcome is logged at debug level and counted; callers may ignore
    /// the result.
    pub async fn forward(
        &self,
        request: CapturedRequest,
        url: &str,
    ) -> Result<StatusCode, ForwardError> {
        let start = Instant::now();
        let client = request.client_ip();

        let result = match tokio::time::timeout(self.timeout, self.dispatch(request, url)).await {
            Ok(result) => result,
            Err(_) => Err(ForwardError::Timeout(self.timeout)),
        };

        match &result {
            Ok(status) => {
                metrics::record_forward("ok", start);
                tracing::debug!(
                    url = %url,
                    client = %client,
                    status = status.as_u16(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Shadow request sent"
                );
            }
            Err(e) => {
                metrics::record_forward(e.outcome(), start);
                tracing::debug!(url = %url, client = %client, error = %e, "Shadow request failed");
            }
        }
        result
    }

    async fn dispatch(&self, request: CapturedRequest, url: &str) -> Result<StatusCode, ForwardError> {
        let uri: Uri = url.parse().map_err(|source| ForwardError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;

        let headers = forwarded_headers(&request);
        let mut outbound = Request::builder()
            .method(request.method)
            .uri(uri)
            .body(Full::new(request.body))?;
        *outbound.headers_mut() = headers;

        let response = self.client.request(outbound).await?;
        let status = response.status();
        response.into_body().collect().await?;
        Ok(status)
    }
}
