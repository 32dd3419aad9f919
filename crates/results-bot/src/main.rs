mod bot;
mod cache;
mod config;
mod conversation;
mod error;
mod messenger;
mod model;
mod normalize;
mod parser;
mod render;
mod resolver;
mod telegram;
mod timetable;

use std::sync::Arc;

use portal_common::http::{HttpClient, HttpClientConfig};
use teloxide::Bot;
use tracing::info;
use tracing_subscriber::EnvFilter;

use bot::ResultsBot;
use cache::ResultCache;
use config::Config;
use conversation::Conversation;
use messenger::Messenger;
use render::browser::BrowserStrategy;
use render::capture_api::{HttpScreenshotProvider, ScreenshotApiStrategy, ScreenshotProvider};
use render::webdriver::WebDriverClient;
use render::{RenderChain, RenderStrategy};
use resolver::{PortalListing, Resolver};
use telegram::TelegramMessenger;
use timetable::TimetableService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    info!("starting results bot");

    // 1. Load config from environment
    let config = Config::from_env()?;
    info!(
        portal = %config.portal_url,
        regulations = ?config.regulations,
        webdriver = config.webdriver_url.is_some(),
        "configuration loaded"
    );

    // 2. Shared HTTP client
    let http = Arc::new(HttpClient::new(HttpClientConfig::from_env())?);

    // 3. Resolver over the portal listing, cached per process
    let listing = Arc::new(PortalListing::new(Arc::clone(&http), config.portal_url.clone()));
    let resolver = Arc::new(Resolver::new(
        listing,
        config.portal_url.clone(),
        Arc::new(ResultCache::new()),
    ));

    // 4. Rendering chain: headless browser, then screenshot APIs, then the plain link
    let driver = config
        .webdriver_url
        .as_deref()
        .map(|url| WebDriverClient::new(Arc::clone(&http), url));
    if driver.is_none() {
        info!("WEBDRIVER_URL not set, browser rendering disabled");
    }
    let provider_budget = ScreenshotApiStrategy::provider_budget(config.strategy_timeout, 3);
    let providers: Vec<Box<dyn ScreenshotProvider>> = vec![
        Box::new(HttpScreenshotProvider::screenshotone(
            Arc::clone(&http),
            provider_budget,
            config.screenshotone_key.as_deref(),
        )),
        Box::new(HttpScreenshotProvider::urlbox(
            Arc::clone(&http),
            provider_budget,
            config.urlbox_key.as_deref(),
        )),
        Box::new(HttpScreenshotProvider::apiflash(
            Arc::clone(&http),
            provider_budget,
            config.apiflash_key.as_deref(),
        )),
    ];
    let strategies: Vec<Box<dyn RenderStrategy>> = vec![
        Box::new(BrowserStrategy::new(
            driver,
            &config.results_table_selector,
            config.form_settle,
        )),
        Box::new(ScreenshotApiStrategy::new(providers, config.strategy_timeout)),
    ];
    let chain = Arc::new(RenderChain::new(strategies, config.strategy_timeout));

    // 5. Telegram transport and the bot core
    let telegram_bot = Bot::new(&config.telegram_token);
    let messenger: Arc<dyn Messenger> = Arc::new(TelegramMessenger::new(telegram_bot.clone()));
    let conversation = Conversation::new(
        resolver,
        chain,
        Arc::clone(&messenger),
        config.regulations.clone(),
    );
    let timetable = TimetableService::new(
        Arc::new(PortalListing::new(Arc::clone(&http), config.timetable_url.clone())),
        config.timetable_url.clone(),
    );
    let core = Arc::new(ResultsBot::new(
        conversation,
        timetable,
        messenger,
        config.regulations.clone(),
    ));

    // 6. Poll until interrupted
    telegram::run(telegram_bot, core).await?;

    info!("results bot stopped");
    Ok(())
}
