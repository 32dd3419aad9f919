/// HTTP client shared by the portal listing fetch, the timetable fetch, the screenshot
/// APIs and the WebDriver session.
///
/// Page fetches go through `get_text`, which retries transient failures (timeouts,
/// connect errors, 429, 5xx) with capped exponential backoff. Binary captures and JSON
/// commands are single attempts: their callers already have a fallback of their own.
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};
use std::str::FromStr;
use std::time::Duration;

use reqwest::{Method, StatusCode};
use tracing::warn;

#[derive(Clone, Debug)]
pub struct HttpClientConfig {
    pub default_timeout: Duration,
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_error_body_bytes: usize,
    pub user_agent: String,
}

impl HttpClientConfig {
    /// Defaults, each overridable through an `HTTP_*` variable. Unparsable values
    /// fall back to the default.
    pub fn from_env() -> Self {
        Self {
            default_timeout: Duration::from_secs(env_or("HTTP_TIMEOUT_SECS", 20)),
            max_retries: env_or("HTTP_MAX_RETRIES", 2),
            initial_backoff: Duration::from_millis(env_or("HTTP_RETRY_INITIAL_MS", 200)),
            max_backoff: Duration::from_millis(env_or("HTTP_RETRY_MAX_MS", 5_000)),
            max_error_body_bytes: env_or("HTTP_MAX_ERROR_BODY_BYTES", 8 * 1024),
            user_agent: format!("results-bot/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, thiserror::Error)]
pub enum HttpClientError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("upstream returned error: status={status} body={body}")]
    Upstream { status: StatusCode, body: String },

    #[error("invalid response JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

impl HttpClientError {
    /// Status code of an upstream error response, if the request got that far.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            HttpClientError::Upstream { status, .. } => Some(*status),
            HttpClientError::Request(e) => e.status(),
            HttpClientError::InvalidJson(_) => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, HttpClientError::Request(e) if e.is_timeout())
    }

    pub fn is_connect(&self) -> bool {
        matches!(self, HttpClientError::Request(e) if e.is_connect())
    }
}

/// A successful binary response.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// A JSON exchange, returned whatever the status so protocol clients can read
/// structured error payloads.
#[derive(Debug, Clone)]
pub struct JsonReply {
    pub status: StatusCode,
    pub body: serde_json::Value,
}

#[derive(Clone)]
pub struct HttpClient {
    config: HttpClientConfig,
    http: reqwest::Client,
}

impl HttpClient {
    pub fn new(config: HttpClientConfig) -> Result<Self, HttpClientError> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { config, http })
    }

    /// GET a page as text, retrying transient failures.
    pub async fn get_text(&self, url: &str) -> Result<String, HttpClientError> {
        self.request_with_retry(|| async {
            let resp = self
                .http
                .get(url)
                .timeout(self.config.default_timeout)
                .send()
                .await?;
            if !resp.status().is_success() {
                return Err(Self::to_upstream_error(resp, self.config.max_error_body_bytes).await);
            }
            Ok(resp.text().await?)
        })
        .await
    }

    /// GET a binary payload in a single attempt.
    pub async fn get_bytes(
        &self,
        url: &str,
        timeout_override: Option<Duration>,
    ) -> Result<Fetched, HttpClientError> {
        let timeout = timeout_override.unwrap_or(self.config.default_timeout);
        let resp = self.http.get(url).timeout(timeout).send().await?;
        if resp.status() != StatusCode::OK {
            return Err(Self::to_upstream_error(resp, self.config.max_error_body_bytes).await);
        }
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_ascii_lowercase());
        let body = resp.bytes().await?.to_vec();
        Ok(Fetched { content_type, body })
    }

    /// Send a JSON command in a single attempt. Non-2xx replies are returned, not
    /// raised, as long as the body parses.
    pub async fn send_json(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
        timeout_override: Option<Duration>,
    ) -> Result<JsonReply, HttpClientError> {
        let timeout = timeout_override.unwrap_or(self.config.default_timeout);
        let mut req = self.http.request(method, url).timeout(timeout);
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req.send().await?;
        let status = resp.status();
        let raw = resp.bytes().await?;
        let body = if raw.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&raw)?
        };
        Ok(JsonReply { status, body })
    }

    async fn to_upstream_error(
        resp: reqwest::Response,
        max_error_body_bytes: usize,
    ) -> HttpClientError {
        let status = resp.status();
        let body = read_limited_text(resp, max_error_body_bytes).await;
        HttpClientError::Upstream { status, body }
    }

    /// Run `attempt` until it succeeds, fails permanently or runs out of retries.
    async fn request_with_retry<T, Fut, F>(&self, mut attempt: F) -> Result<T, HttpClientError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, HttpClientError>>,
    {
        let mut retries = 0;
        loop {
            let err = match attempt().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if retries >= self.config.max_retries || !should_retry(&err) {
                return Err(err);
            }
            let config = &self.config;
            let delay = backoff_delay(config.initial_backoff, config.max_backoff, retries);
            retries += 1;
            warn!(retry = retries, ?delay, error = %err, "transient http failure");
            tokio::time::sleep(delay).await;
        }
    }
}

fn should_retry(err: &HttpClientError) -> bool {
    match err {
        HttpClientError::Request(e) => e.is_timeout() || e.is_connect() || e.is_body(),
        HttpClientError::Upstream { status, .. } => {
            *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
        }
        HttpClientError::InvalidJson(_) => false,
    }
}

/// `initial * 2^retry`, capped at `max`, plus up to a quarter of that as jitter.
fn backoff_delay(initial: Duration, max: Duration, retry: u32) -> Duration {
    let base = initial.saturating_mul(2u32.saturating_pow(retry)).min(max);
    base + jitter(base / 4)
}

fn jitter(ceiling: Duration) -> Duration {
    let ceiling_ms = ceiling.as_millis() as u64;
    if ceiling_ms == 0 {
        return Duration::ZERO;
    }
    let seed = RandomState::new().build_hasher().finish();
    Duration::from_millis(seed % (ceiling_ms + 1))
}

async fn read_limited_text(resp: reqwest::Response, max_bytes: usize) -> String {
    match resp.bytes().await {
        Ok(b) => {
            let end = b.len().min(max_bytes);
            String::from_utf8_lossy(&b[..end]).to_string()
        }
        Err(e) => {
            warn!(error = %e, "failed to read upstream error body");
            "<failed to read error body>".to_string()
        }
    }
}
