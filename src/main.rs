use anyhow::{bail, Context, Result};
use std::sync::Arc;
use trendbot::api::PolygonClient;
use trendbot::config::Settings;
use trendbot::llm::{backend_from_settings, Analyzer};
use trendbot::market_data::{MarketData, WindowResolver};
use trendbot::orchestrator::Orchestrator;
use trendbot::store::{HistoryStore, PromptStore, WeightsStore};
use trendbot::telegram::{Bot, TelegramClient};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let settings = Settings::load().context("loading settings")?;
    if settings.telegram.token.is_empty() {
        bail!("TELEGRAM_BOT_TOKEN is not set");
    }
    if settings.polygon.api_key.is_empty() {
        tracing::warn!("POLYGON_API_KEY is not set; market data requests will fail");
    }

    let polygon = PolygonClient::from_settings(&settings.polygon, settings.retry.policy())?;
    let market_data = MarketData::new(polygon, &settings.market)?;

    let backend = backend_from_settings(&settings.llm)?;
    tracing::info!(backend = backend.name(), "LLM backend ready");
    let analyzer = Analyzer::new(backend, settings.llm.policy());

    let storage = &settings.storage;
    let orchestrator = Orchestrator::new(
        Arc::new(market_data),
        analyzer,
        Arc::new(HistoryStore::new(storage.history_path())),
        Arc::new(PromptStore::new(storage.prompts_path())),
        Arc::new(WeightsStore::new(storage.weights_path(), storage.features_path())),
        WindowResolver::from_settings(&settings.market)?,
    )
    .with_intraday_days(
        settings.market.intraday_days_single,
        settings.market.intraday_days_batch,
    );

    let client = TelegramClient::new(&settings.telegram)?;
    let bot = Bot::new(client, Arc::new(orchestrator), storage.tickers_path());

    tracing::info!("Trend bot starting");
    tokio::select! {
        result = bot.run_polling() => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("Shutting down"),
    }
    Ok(())
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trendbot=info".into()),
        )
        .init();
}
