use std::time::Duration;

use portal_common::error::CommonError;
use reqwest::Url;

use crate::error::AppError;

const DEFAULT_PORTAL_URL: &str = "http://125.16.54.154/mitsresults/resultug";
const DEFAULT_TIMETABLE_URL: &str = "https://mits.ac.in/ugc-autonomous-exam-portal#ugc-pro3";
const DEFAULT_REGULATIONS: &[&str] = &["R18", "R20", "R23"];

/// Application configuration loaded from environment variables.
///
/// Only the bot token is required. Every rendering backend is optional: without a
/// WebDriver endpoint the browser strategy reports itself unavailable, and providers
/// without a key are still tried with their free tiers.
#[derive(Debug, Clone)]
pub struct Config {
    pub telegram_token: String,
    pub portal_url: Url,
    pub timetable_url: Url,
    /// Regulations offered as buttons, in display order.
    pub regulations: Vec<String>,
    pub webdriver_url: Option<String>,
    pub results_table_selector: String,
    pub strategy_timeout: Duration,
    pub form_settle: Duration,
    pub screenshotone_key: Option<String>,
    pub urlbox_key: Option<String>,
    pub apiflash_key: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `TELEGRAM_BOT_TOKEN`
    ///
    /// Optional:
    /// - `PORTAL_URL`, `TIMETABLE_URL`: page locations
    /// - `REGULATIONS`: comma-separated list (default `R18,R20,R23`)
    /// - `WEBDRIVER_URL`: chromedriver or Selenium endpoint (omit to skip the browser)
    /// - `RESULTS_TABLE_SELECTOR`: CSS selector of the results table (default `table`)
    /// - `RENDER_STRATEGY_TIMEOUT_SECS` (default 60), `FORM_SETTLE_MILLIS` (default 2500)
    /// - `SCREENSHOTONE_ACCESS_KEY`, `URLBOX_API_KEY`, `APIFLASH_ACCESS_KEY`
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let telegram_token = var("TELEGRAM_BOT_TOKEN").ok_or_else(|| {
            AppError::Config("TELEGRAM_BOT_TOKEN environment variable is required".to_string())
        })?;

        let portal_url = parse_url(var("PORTAL_URL").as_deref().unwrap_or(DEFAULT_PORTAL_URL))?;
        let timetable_url =
            parse_url(var("TIMETABLE_URL").as_deref().unwrap_or(DEFAULT_TIMETABLE_URL))?;

        let regulations: Vec<String> = match var("REGULATIONS") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_uppercase)
                .collect(),
            None => DEFAULT_REGULATIONS.iter().map(|r| r.to_string()).collect(),
        };
        if regulations.is_empty() {
            return Err(AppError::Config(
                "REGULATIONS must name at least one regulation".to_string(),
            ));
        }

        let strategy_timeout = var("RENDER_STRATEGY_TIMEOUT_SECS")
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(60));

        let form_settle = var("FORM_SETTLE_MILLIS")
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or_else(|| Duration::from_millis(2_500));

        Ok(Self {
            telegram_token,
            portal_url,
            timetable_url,
            regulations,
            webdriver_url: var("WEBDRIVER_URL"),
            results_table_selector: var("RESULTS_TABLE_SELECTOR")
                .unwrap_or_else(|| "table".to_string()),
            strategy_timeout,
            form_settle,
            screenshotone_key: var("SCREENSHOTONE_ACCESS_KEY"),
            urlbox_key: var("URLBOX_API_KEY"),
            apiflash_key: var("APIFLASH_ACCESS_KEY"),
        })
    }
}

fn parse_url(raw: &str) -> Result<Url, AppError> {
    Url::parse(raw).map_err(|e| {
        AppError::from(CommonError::InvalidUrl {
            url: raw.to_string(),
            message: e.to_string(),
        })
    })
}
