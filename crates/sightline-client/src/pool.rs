//! Shared HTTP connection pool for all backend traffic.
//!
//! One `reqwest::Client` is built on [`ConnectionPool::initialize`] and shared
//! by every clone of the pool. Transient failures are retried with
//! exponential backoff, and every response body is read to completion before
//! [`ConnectionPool::execute`] returns so connections always go back to the
//! pool.

use std::sync::Arc;
use std::time::{Duration, Instant};

use once_cell::sync::OnceCell;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tracing::{debug, info, trace, warn};

use sightline_core::{Error, Result};

use crate::config::ClientConfig;

/// Longest error body excerpt carried in an error message.
const ERROR_BODY_EXCERPT: usize = 200;

// =============================================================================
// REQUEST / RESPONSE
// =============================================================================

/// A request relative to the server root.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    /// Path beginning with `/`.
    pub path: String,
    pub json: Option<JsonValue>,
    /// Whether transient failures may be retried. Off for requests that
    /// create remote state.
    pub retryable: bool,
}

impl Request {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            json: None,
            retryable: true,
        }
    }

    pub fn post(path: impl Into<String>, json: JsonValue) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            json: Some(json),
            retryable: true,
        }
    }

    pub fn patch(path: impl Into<String>, json: JsonValue) -> Self {
        Self {
            method: Method::PATCH,
            path: path.into(),
            json: Some(json),
            retryable: true,
        }
    }

    /// Send at most once, whatever the failure.
    pub fn once(mut self) -> Self {
        self.retryable = false;
        self
    }
}

/// A fully-read response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Short, lossy excerpt of the body for error messages.
    fn excerpt(&self) -> String {
        let text = String::from_utf8_lossy(&self.body);
        text.chars().take(ERROR_BODY_EXCERPT).collect()
    }
}

// =============================================================================
// RETRY POLICY
// =============================================================================

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub total: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, after `attempt` failed.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.backoff.saturating_mul(1u32 << exp)
    }

    fn should_retry(&self, err: &Error, attempt: u32) -> bool {
        attempt < self.total && err.is_retryable()
    }
}

impl From<&ClientConfig> for RetryPolicy {
    fn from(config: &ClientConfig) -> Self {
        Self {
            total: config.retry_total.max(1),
            backoff: Duration::from_millis(config.backoff_ms),
        }
    }
}

// =============================================================================
// POOL
// =============================================================================

struct PoolInner {
    config: ClientConfig,
    retry: RetryPolicy,
    client: OnceCell<Client>,
}

/// Process-wide pooled HTTP session.
///
/// Cheap to clone; clones share the same underlying connections.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Create an uninitialized pool.
    pub fn new(config: ClientConfig) -> Self {
        let retry = RetryPolicy::from(&config);
        Self {
            inner: Arc::new(PoolInner {
                config,
                retry,
                client: OnceCell::new(),
            }),
        }
    }

    /// Create and initialize in one step.
    pub fn connect(config: ClientConfig) -> Result<Self> {
        let pool = Self::new(config);
        pool.initialize()?;
        Ok(pool)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.client.get().is_some()
    }

    /// Build the underlying client. Later calls are no-ops.
    pub fn initialize(&self) -> Result<()> {
        self.inner
            .client
            .get_or_try_init(|| build_client(&self.inner.config))
            .map(|_| ())
    }

    /// Send `request`, retrying transient failures.
    ///
    /// Non-success statuses become errors: 401/403 map to `Auth`, 404 to
    /// `NotFound`, anything else to `Http`.
    pub async fn execute(&self, request: Request) -> Result<HttpResponse> {
        let client = self
            .inner
            .client
            .get()
            .ok_or_else(|| Error::Config("Connection pool used before initialize()".to_string()))?;
        let retry = self.inner.retry;
        let url = self.inner.config.url(&request.path);

        let mut attempt = 1;
        loop {
            let started = Instant::now();
            let result = send_once(client, &request, &url).await.and_then(|resp| {
                if resp.is_success() {
                    Ok(resp)
                } else {
                    Err(Error::from_status(
                        resp.status,
                        format!("{} {}: {}", request.method, request.path, resp.excerpt()),
                    ))
                }
            });
            let duration_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(resp) => {
                    trace!(
                        method = %request.method,
                        path = %request.path,
                        status = resp.status,
                        attempt,
                        duration_ms,
                        "Request complete"
                    );
                    return Ok(resp);
                }
                Err(err) if request.retryable && retry.should_retry(&err, attempt) => {
                    let delay = retry.delay_after(attempt);
                    warn!(
                        method = %request.method,
                        path = %request.path,
                        attempt,
                        duration_ms,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    debug!(
                        method = %request.method,
                        path = %request.path,
                        attempt,
                        duration_ms,
                        error = %err,
                        "Request failed"
                    );
                    return Err(err);
                }
            }
        }
    }

    /// Send a JSON request and decode a JSON response.
    pub async fn execute_json<T: DeserializeOwned>(&self, request: Request) -> Result<T> {
        self.execute(request).await?.json()
    }
}

fn build_client(config: &ClientConfig) -> Result<Client> {
    if config.api_key.is_empty() {
        return Err(Error::Auth("No API key configured".to_string()));
    }

    let mut headers = HeaderMap::new();
    let mut bearer = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
        .map_err(|e| Error::Config(format!("Invalid API key: {}", e)))?;
    bearer.set_sensitive(true);
    headers.insert(AUTHORIZATION, bearer);

    let client = Client::builder()
        .timeout(config.timeout())
        .pool_max_idle_per_host(config.pool_capacity)
        .default_headers(headers)
        .build()
        .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

    info!(
        server_url = %config.server_url,
        pool_capacity = config.pool_capacity,
        timeout_secs = config.timeout_secs,
        retry_total = config.retry_total,
        "Connection pool initialized"
    );
    Ok(client)
}

/// One attempt. The body is always read in full, whatever the status.
async fn send_once(client: &Client, request: &Request, url: &str) -> Result<HttpResponse> {
    let mut builder = client.request(request.method.clone(), url);
    if let Some(json) = &request.json {
        builder = builder.json(json);
    }

    let response = builder.send().await?;
    let status = response.status().as_u16();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    let body = response.bytes().await?.to_vec();

    Ok(HttpResponse {
        status,
        content_type,
        body,
    })
}
