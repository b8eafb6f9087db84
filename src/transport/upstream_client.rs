use std::time::Duration;

use bytes::Bytes;
use http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};

use crate::config::UpstreamConfig;
use crate::error::{sanitize_upstream_error, RelayError};

use super::retry_policy::{
    retry_backoff_delay, retry_delay, should_retry_transport_error, should_retry_upstream_status,
    RETRY_MAX_ATTEMPTS,
};

const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

fn build_reqwest_client(config: &UpstreamConfig) -> Result<reqwest::Client, RelayError> {
    let mut builder = reqwest::Client::builder()
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .tcp_nodelay(true)
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .redirect(reqwest::redirect::Policy::none());

    if let Some(proxy_url) = config.proxy.as_deref() {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|err| RelayError::Config(format!("Invalid proxy URL: {err}")))?;
        builder = builder.no_proxy().proxy(proxy);
    } else if !config.use_env_proxy {
        builder = builder.no_proxy();
    }

    builder
        .build()
        .map_err(|err| RelayError::Config(format!("Failed to build HTTP client: {err}")))
}

/// Join an upstream base URL (`https://host/v1`) and an endpoint path.
#[must_use]
pub fn endpoint_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Pooled HTTP client for the OpenAI-compatible upstreams.
///
/// Streaming calls carry no overall deadline; the body may legitimately run
/// for minutes. Non-streaming calls are bounded by `request_timeout_secs`.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    request_timeout: Duration,
}

impl UpstreamClient {
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] when the proxy URL is invalid or the
    /// client cannot be built.
    pub fn new(config: &UpstreamConfig) -> Result<Self, RelayError> {
        Ok(Self {
            client: build_reqwest_client(config)?,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        })
    }

    /// POST a JSON body with a bearer credential and return the response once
    /// its status is 2xx.
    ///
    /// Retriable statuses and connect failures are retried before any body
    /// byte is read. For `stream == true` the caller owns the body stream.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Upstream`] for a non-2xx final status (with the
    /// sanitized upstream body) and [`RelayError::Transport`] when the request
    /// could not be sent.
    pub async fn post_json(
        &self,
        url: &str,
        api_key: &str,
        body: Bytes,
        stream: bool,
    ) -> Result<reqwest::Response, RelayError> {
        let accept = if stream {
            "text/event-stream, application/x-ndjson, application/json"
        } else {
            "application/json"
        };

        let mut attempt = 0;
        loop {
            let mut request = self
                .client
                .post(url)
                .bearer_auth(api_key)
                .header(CONTENT_TYPE, "application/json")
                .header(ACCEPT, accept)
                .body(body.clone());
            if !stream {
                request = request.timeout(self.request_timeout);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if attempt < RETRY_MAX_ATTEMPTS && should_retry_upstream_status(status) {
                        let delay = retry_delay(response.headers(), attempt);
                        tracing::debug!(
                            status = status.as_u16(),
                            retry_attempt = attempt + 1,
                            delay_ms = delay.as_millis(),
                            "retrying upstream request after retriable status"
                        );
                        drop(response);
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    return ensure_success(response).await;
                }
                Err(err) => {
                    if attempt >= RETRY_MAX_ATTEMPTS || !should_retry_transport_error(&err) {
                        return Err(transport_error(&err));
                    }
                    let delay = retry_backoff_delay(attempt);
                    tracing::debug!(
                        retry_attempt = attempt + 1,
                        delay_ms = delay.as_millis(),
                        error = %err,
                        "retrying upstream request after connect error"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

fn transport_error(err: &reqwest::Error) -> RelayError {
    if err.is_timeout() {
        RelayError::Transport(format!("Request timed out: {err}"))
    } else {
        RelayError::Transport(err.to_string())
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, RelayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.bytes().await.unwrap_or_default();
    let message = sanitize_upstream_error(&body);
    tracing::warn!(status = status.as_u16(), error = %message, "upstream returned error status");
    Err(RelayError::Upstream {
        status: status.as_u16(),
        message,
    })
}
