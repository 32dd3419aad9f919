/// Screenshot web APIs, tried one after another until one hands back an image.
///
/// The strategy shares one budget between its providers: each gets an equal slice of
/// whatever time is left, so a provider that hangs cannot starve the ones after it.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use portal_common::http::HttpClient;
use reqwest::Url;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{RenderError, RenderStrategy};
use crate::model::{RenderResult, RenderTarget, Screenshot};

/// One external screenshot service.
#[async_trait]
pub trait ScreenshotProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn capture(&self, url: &str) -> Result<Vec<u8>, RenderError>;
}

/// A provider reached with a single GET carrying the page URL as a query parameter.
pub struct HttpScreenshotProvider {
    name: String,
    endpoint: String,
    params: Vec<(String, String)>,
    http: Arc<HttpClient>,
    timeout: Duration,
}

impl HttpScreenshotProvider {
    pub fn new(
        name: &str,
        endpoint: &str,
        params: &[(&str, &str)],
        http: Arc<HttpClient>,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.to_string(),
            endpoint: endpoint.to_string(),
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            http,
            timeout,
        }
    }

    /// Attach a credential query parameter when one is configured.
    pub fn with_key(mut self, param: &str, key: Option<&str>) -> Self {
        if let Some(key) = key.filter(|k| !k.is_empty()) {
            self.params.push((param.to_string(), key.to_string()));
        }
        self
    }

    pub fn screenshotone(http: Arc<HttpClient>, timeout: Duration, key: Option<&str>) -> Self {
        Self::new(
            "screenshotone",
            "https://api.screenshotone.com/take",
            &[("delay", "2"), ("format", "png")],
            http,
            timeout,
        )
        .with_key("access_key", key)
    }

    pub fn urlbox(http: Arc<HttpClient>, timeout: Duration, key: Option<&str>) -> Self {
        Self::new(
            "urlbox",
            "https://api.urlbox.io/v1/render",
            &[("full_page", "true"), ("format", "png")],
            http,
            timeout,
        )
        .with_key("api_key", key)
    }

    pub fn apiflash(http: Arc<HttpClient>, timeout: Duration, key: Option<&str>) -> Self {
        Self::new(
            "apiflash",
            "https://v1.apiflash.com/capture",
            &[("format", "png"), ("full_page", "true"), ("response_type", "image")],
            http,
            timeout,
        )
        .with_key("access_key", key)
    }

    fn request_url(&self, target: &str) -> Result<Url, RenderError> {
        let params = std::iter::once(("url", target))
            .chain(self.params.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        Url::parse_with_params(&self.endpoint, params).map_err(|e| {
            RenderError::Payload(format!("bad provider endpoint {}: {e}", self.endpoint))
        })
    }
}

#[async_trait]
impl ScreenshotProvider for HttpScreenshotProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn capture(&self, url: &str) -> Result<Vec<u8>, RenderError> {
        let request = self.request_url(url)?;
        let fetched = self
            .http
            .get_bytes(request.as_str(), Some(self.timeout))
            .await
            .map_err(|e| match e.status() {
                Some(status) => RenderError::Status(status.as_u16()),
                None if e.is_timeout() => RenderError::Timeout(self.timeout),
                None => RenderError::Http(e),
            })?;
        if !is_image_payload(fetched.content_type.as_deref(), &fetched.body) {
            return Err(RenderError::Payload(format!(
                "{} returned {} bytes of {}",
                self.name,
                fetched.body.len(),
                fetched.content_type.as_deref().unwrap_or("unknown content")
            )));
        }
        Ok(fetched.body)
    }
}

/// Providers answer errors with 200 and a JSON or HTML body surprisingly often.
fn is_image_payload(content_type: Option<&str>, body: &[u8]) -> bool {
    if body.is_empty() {
        return false;
    }
    match content_type {
        Some(ct) => !(ct.contains("json") || ct.contains("html") || ct.starts_with("text/")),
        None => true,
    }
}

pub struct ScreenshotApiStrategy {
    providers: Vec<Box<dyn ScreenshotProvider>>,
    budget: Duration,
}

impl ScreenshotApiStrategy {
    pub fn new(providers: Vec<Box<dyn ScreenshotProvider>>, budget: Duration) -> Self {
        Self { providers, budget }
    }

    /// Per-provider budget when every provider is given the same share up front.
    pub fn provider_budget(budget: Duration, providers: usize) -> Duration {
        budget / providers.max(1) as u32
    }
}

#[async_trait]
impl RenderStrategy for ScreenshotApiStrategy {
    fn name(&self) -> &str {
        "screenshot-api"
    }

    async fn render(&self, target: &RenderTarget) -> Result<RenderResult, RenderError> {
        let deadline = Instant::now() + self.budget;
        let total = self.providers.len();
        for (i, provider) in self.providers.iter().enumerate() {
            let slice = Self::provider_budget(
                deadline.saturating_duration_since(Instant::now()),
                total - i,
            );
            debug!(provider = provider.name(), ?slice, "trying screenshot provider");
            let outcome = match tokio::time::timeout(slice, provider.capture(&target.link)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(RenderError::Timeout(slice)),
            };
            match outcome {
                Ok(png) => {
                    return Ok(RenderResult::Screenshot(Screenshot {
                        png,
                        source: provider.name().to_string(),
                    }));
                }
                Err(e) => {
                    warn!(provider = provider.name(), error = %e, "screenshot provider failed");
                }
            }
        }
        Err(RenderError::Unavailable("screenshot provider".to_string()))
    }
}
