/// Rendering chain: turns a resolved result target into something the user can look at.
///
/// Strategies run in priority order (headless browser, then screenshot web APIs). The
/// first one to return `Ok` wins, including a "not found" text from the browser, which
/// means the portal rejected the details rather than the infrastructure failing. Every
/// error or timeout is logged and the next strategy runs. When all of them fail, the
/// chain answers with the plain link so the user can open the result by hand.
pub mod browser;
pub mod capture_api;
pub mod webdriver;

use std::time::Duration;

use async_trait::async_trait;
use portal_common::http::HttpClientError;
use tracing::{info, warn};

use crate::model::{RenderResult, RenderTarget};

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("{0} is not available")]
    Unavailable(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("upstream returned status {0}")]
    Status(u16),

    #[error("expected element missing: {0}")]
    MissingElement(String),

    #[error("webdriver error {error}: {message}")]
    WebDriver { error: String, message: String },

    #[error("unusable payload: {0}")]
    Payload(String),

    #[error(transparent)]
    Http(#[from] HttpClientError),
}

/// One rung of the rendering ladder.
#[async_trait]
pub trait RenderStrategy: Send + Sync {
    fn name(&self) -> &str;

    async fn render(&self, target: &RenderTarget) -> Result<RenderResult, RenderError>;
}

pub struct RenderChain {
    strategies: Vec<Box<dyn RenderStrategy>>,
    strategy_timeout: Duration,
}

impl RenderChain {
    pub fn new(strategies: Vec<Box<dyn RenderStrategy>>, strategy_timeout: Duration) -> Self {
        Self {
            strategies,
            strategy_timeout,
        }
    }

    /// Produce the best available result. Never fails: the last resort is a text
    /// message carrying the link and the submitted details.
    pub async fn render(&self, target: &RenderTarget) -> RenderResult {
        if target.link.trim().is_empty() {
            return RenderResult::Error("No results link available".to_string());
        }

        for strategy in &self.strategies {
            let name = strategy.name();
            match tokio::time::timeout(self.strategy_timeout, strategy.render(target)).await {
                Ok(Ok(result)) => {
                    info!(strategy = name, kind = result_kind(&result), "render succeeded");
                    return result;
                }
                Ok(Err(e)) => {
                    warn!(strategy = name, error = %e, "render strategy failed, falling through");
                }
                Err(_) => {
                    let e = RenderError::Timeout(self.strategy_timeout);
                    warn!(strategy = name, error = %e, "render strategy timed out");
                }
            }
        }

        info!("all render strategies failed, sending link");
        link_fallback(target)
    }
}

/// Plain-text answer used when nothing could be captured.
pub fn link_fallback(target: &RenderTarget) -> RenderResult {
    let mut text = String::from("Your results could not be captured automatically.\n\n");
    text.push_str(&format!("Roll Number: {}\n", target.roll_number));
    text.push_str(&format!("Date of Birth: {}\n", target.date_of_birth));
    if let Some(option) = &target.selected_option {
        text.push_str(&format!("Result: {option}\n"));
    }
    text.push_str(&format!(
        "\nResults link:\n{}\n\nOpen the link and enter the details above to view your results.",
        target.link
    ));
    RenderResult::Text(text)
}

/// Answer for a portal that accepted the form but showed no result.
pub fn not_found_message(target: &RenderTarget) -> String {
    format!(
        "No result was found for roll number {} with date of birth {}.\n\
         Please check your details and retry with /resultscheck.",
        target.roll_number, target.date_of_birth
    )
}

/// Text summary built from labeled fields read off the result page.
pub fn summary_message(target: &RenderTarget, fields: &[(String, String)]) -> String {
    let mut text = format!("Result for {}\n\n", target.roll_number);
    for (label, value) in fields {
        text.push_str(&format!("{label}: {value}\n"));
    }
    text.push_str(&format!("\nFull result: {}", target.link));
    text
}

fn result_kind(result: &RenderResult) -> &'static str {
    match result {
        RenderResult::Screenshot(_) => "screenshot",
        RenderResult::Text(_) => "text",
        RenderResult::Error(_) => "error",
    }
}
