//! Process-wide settings, built once in `main` and handed to each component.
//!
//! Sources, lowest precedence first: struct defaults, optional `trendbot.toml`,
//! `TRENDBOT_*` environment variables (`__` separates nested keys). API secrets
//! are additionally picked up from their conventional names
//! (`POLYGON_API_KEY`, `GEMINI_API_KEY`, `OPENAI_API_KEY`, `TELEGRAM_BOT_TOKEN`).

use crate::api::retry::RetryPolicy;
use crate::{Error, Result};
use chrono::NaiveTime;
use chrono_tz::Tz;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub polygon: PolygonSettings,
    pub retry: RetrySettings,
    pub llm: LlmSettings,
    pub market: MarketSettings,
    pub storage: StorageSettings,
    pub telegram: TelegramSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PolygonSettings {
    pub base_url: String,
    pub api_key: String,
    pub timeout_secs: u64,
    /// Client-side throttle; `None` relies on 429 handling alone
    pub requests_per_minute: Option<u32>,
}

impl Default for PolygonSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.polygon.io".to_string(),
            api_key: String::new(),
            timeout_secs: 10,
            requests_per_minute: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub jitter_ratio: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 1000,
            jitter_ratio: 0.1,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(
            self.max_attempts,
            Duration::from_millis(self.initial_backoff_ms),
        )
        .with_jitter(self.jitter_ratio)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Gemini,
    OpenAi,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub provider: LlmProvider,
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub gemini_base_url: String,
    pub openai_api_key: String,
    pub openai_model: String,
    pub openai_base_url: String,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Gemini,
            gemini_api_key: String::new(),
            gemini_model: "gemini-2.0-flash".to_string(),
            gemini_base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            openai_api_key: String::new(),
            openai_model: "gpt-4o-mini".to_string(),
            openai_base_url: "https://api.openai.com/v1".to_string(),
            max_attempts: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl LlmSettings {
    /// Fixed-delay policy used around every model call
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.max_attempts, Duration::from_millis(self.retry_delay_ms))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MarketSettings {
    pub exchange_timezone: String,
    /// Local `HH:MM` used when a reference has no time of day
    pub anchor_time: String,
    pub intraday_multiplier: u32,
    pub intraday_days_single: u32,
    pub intraday_days_batch: u32,
    pub daily_days: u32,
    pub fundamentals_days: u32,
    pub with_indicators: bool,
    pub indicator_period: usize,
}

impl Default for MarketSettings {
    fn default() -> Self {
        Self {
            exchange_timezone: "America/New_York".to_string(),
            anchor_time: "09:45".to_string(),
            intraday_multiplier: 5,
            intraday_days_single: 5,
            intraday_days_batch: 3,
            daily_days: 30,
            fundamentals_days: 30,
            with_indicators: true,
            indicator_period: 14,
        }
    }
}

impl MarketSettings {
    pub fn timezone(&self) -> Result<Tz> {
        self.exchange_timezone
            .parse::<Tz>()
            .map_err(|e| Error::invalid(format!("timezone {}: {}", self.exchange_timezone, e)))
    }

    pub fn anchor(&self) -> Result<NaiveTime> {
        NaiveTime::parse_from_str(&self.anchor_time, "%H:%M")
            .map_err(|e| Error::invalid(format!("anchor time {}: {}", self.anchor_time, e)))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            output_dir: PathBuf::from("output"),
        }
    }
}

impl StorageSettings {
    pub fn history_path(&self) -> PathBuf {
        self.output_dir.join("history.json")
    }

    pub fn prompts_path(&self) -> PathBuf {
        self.data_dir.join("prompts.json")
    }

    pub fn weights_path(&self) -> PathBuf {
        self.data_dir.join("weights.json")
    }

    pub fn features_path(&self) -> PathBuf {
        self.data_dir.join("features.csv")
    }

    pub fn tickers_path(&self) -> PathBuf {
        self.data_dir.join("tickers.csv")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelegramSettings {
    pub token: String,
    pub base_url: String,
    pub poll_timeout_secs: u64,
}

impl Default for TelegramSettings {
    fn default() -> Self {
        Self {
            token: String::new(),
            base_url: "https://api.telegram.org".to_string(),
            poll_timeout_secs: 30,
        }
    }
}

impl Settings {
    /// Load settings from `trendbot.toml` (optional) and the environment
    pub fn load() -> Result<Self> {
        Self::load_from("trendbot")
    }

    pub fn load_from(file_stem: &str) -> Result<Self> {
        let raw = Config::builder()
            .add_source(File::with_name(file_stem).required(false))
            .add_source(
                Environment::with_prefix("TRENDBOT")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let mut settings: Settings = raw.try_deserialize()?;
        settings.apply_conventional_env();
        Ok(settings)
    }

    fn apply_conventional_env(&mut self) {
        fill_from_env(&mut self.polygon.api_key, "POLYGON_API_KEY");
        fill_from_env(&mut self.llm.gemini_api_key, "GEMINI_API_KEY");
        fill_from_env(&mut self.llm.openai_api_key, "OPENAI_API_KEY");
        fill_from_env(&mut self.telegram.token, "TELEGRAM_BOT_TOKEN");
    }
}

fn fill_from_env(slot: &mut String, var: &str) {
    if slot.is_empty() {
        if let Ok(value) = std::env::var(var) {
            *slot = value;
        }
    }
}
