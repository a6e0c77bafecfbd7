use super::retry::{json_attempt, RetryPolicy};
use crate::config::PolygonSettings;
use crate::models::Timespan;
use crate::Result;
use chrono::NaiveDate;
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Number;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.polygon.io";

// Type alias for the rate limiter to simplify signatures
type PolygonRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Client for the Polygon.io REST API (aggregates + financials)
///
/// Cloneable; clones share the optional client-side throttle.
#[derive(Clone)]
pub struct PolygonClient {
    client: Client,
    base_url: String,
    api_key: String,
    policy: RetryPolicy,
    rate_limiter: Option<Arc<PolygonRateLimiter>>,
}

// ============== Response Types ==============

#[derive(Debug, Deserialize)]
struct AggregatesResponse {
    #[serde(default)]
    results: Vec<AggregateBar>,
}

/// One bar as the provider sends it. `t` is epoch milliseconds UTC.
///
/// Prices and volume stay [`Number`] so integers render without a fraction.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AggregateBar {
    pub t: i64,
    pub o: Number,
    pub h: Number,
    pub l: Number,
    pub c: Number,
    #[serde(default = "zero_volume")]
    pub v: Number,
}

fn zero_volume() -> Number {
    Number::from(0)
}

#[derive(Debug, Deserialize)]
struct FinancialsResponse {
    #[serde(default)]
    results: Vec<FinancialFiling>,
}

/// One quarterly filing: `financials.{section}.{metric}.value`
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct FinancialFiling {
    #[serde(default)]
    pub end_date: String,
    #[serde(default)]
    pub filing_date: Option<String>,
    #[serde(default)]
    pub financials: serde_json::Map<String, serde_json::Value>,
}

// ============== Implementation ==============

impl PolygonClient {
    pub fn new(api_key: String) -> Result<Self> {
        Self::with_base_url(DEFAULT_BASE_URL, api_key, RetryPolicy::default())
    }

    pub fn with_base_url(base_url: &str, api_key: String, policy: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            policy,
            rate_limiter: None,
        })
    }

    pub fn from_settings(settings: &PolygonSettings, policy: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;

        let rate_limiter = settings
            .requests_per_minute
            .and_then(NonZeroU32::new)
            .map(|rpm| Arc::new(RateLimiter::direct(Quota::per_minute(rpm))));

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            policy,
            rate_limiter,
        })
    }

    /// Aggregate bars for a ticker
    /// Endpoint: GET /v2/aggs/ticker/{ticker}/range/{multiplier}/{timespan}/{from}/{to}
    ///
    /// `from`/`to` are either `YYYY-MM-DD` or epoch milliseconds.
    pub async fn get_aggregates(
        &self,
        ticker: &str,
        multiplier: u32,
        timespan: Timespan,
        from: &str,
        to: &str,
    ) -> Result<Vec<AggregateBar>> {
        let path = format!(
            "/v2/aggs/ticker/{}/range/{}/{}/{}/{}",
            ticker, multiplier, timespan, from, to
        );
        let query = [("sort", "asc".to_string()), ("limit", "50000".to_string())];

        let response: AggregatesResponse = self.get_json("aggregates", &path, &query).await?;
        tracing::debug!(ticker, bars = response.results.len(), "Fetched aggregates");
        Ok(response.results)
    }

    /// Most recent quarterly filing with a filing date inside `[filed_from, filed_to]`
    /// Endpoint: GET /vX/reference/financials
    pub async fn get_latest_financials(
        &self,
        ticker: &str,
        filed_from: NaiveDate,
        filed_to: NaiveDate,
    ) -> Result<Option<FinancialFiling>> {
        let query = [
            ("ticker", ticker.to_string()),
            ("timeframe", "quarterly".to_string()),
            ("limit", "1".to_string()),
            ("sort", "filing_date".to_string()),
            ("order", "desc".to_string()),
            ("filing_date.gte", filed_from.to_string()),
            ("filing_date.lte", filed_to.to_string()),
        ];

        let response: FinancialsResponse = self
            .get_json("financials", "/vX/reference/financials", &query)
            .await?;
        Ok(response.results.into_iter().next())
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        label: &str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(url = %url, "Polygon request");

        self.policy
            .run(label, |_attempt| {
                let request = self
                    .client
                    .get(&url)
                    .query(query)
                    .query(&[("apiKey", self.api_key.as_str())]);
                async move {
                    if let Some(limiter) = &self.rate_limiter {
                        limiter.until_ready().await;
                    }
                    json_attempt(request.send().await).await
                }
            })
            .await
    }
}
