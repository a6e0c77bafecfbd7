// Market-data retrieval: bars, indicators and fundamentals rendered as prompt text

pub mod bars;
pub mod fundamentals;
pub mod window;

pub use bars::{format_bar_line, format_bars, BarFetcher, BarRequest};
pub use fundamentals::{flatten_filing, parse_reference_date, short_metric_name, FundamentalsFetcher};
pub use window::WindowResolver;

use crate::api::PolygonClient;
use crate::config::MarketSettings;
use crate::models::{TickerData, Timespan};
use crate::Result;
use async_trait::async_trait;

/// Source of the three data blocks for one ticker
#[async_trait]
pub trait TickerDataSource: Send + Sync {
    async fn fetch_ticker_data(
        &self,
        ticker: &str,
        reference: Option<&str>,
        intraday_days: u32,
    ) -> Result<TickerData>;
}

/// Polygon-backed [`TickerDataSource`]
#[derive(Clone)]
pub struct MarketData {
    bars: BarFetcher,
    fundamentals: FundamentalsFetcher,
    intraday_multiplier: u32,
    daily_days: u32,
    fundamentals_days: u32,
}

impl MarketData {
    pub fn new(client: PolygonClient, settings: &MarketSettings) -> Result<Self> {
        let resolver = WindowResolver::from_settings(settings)?;
        let mut bars = BarFetcher::new(client.clone(), resolver);
        if settings.with_indicators {
            bars = bars.with_indicators(settings.indicator_period);
        }

        Ok(Self {
            bars,
            fundamentals: FundamentalsFetcher::new(client),
            intraday_multiplier: settings.intraday_multiplier,
            daily_days: settings.daily_days,
            fundamentals_days: settings.fundamentals_days,
        })
    }
}

#[async_trait]
impl TickerDataSource for MarketData {
    async fn fetch_ticker_data(
        &self,
        ticker: &str,
        reference: Option<&str>,
        intraday_days: u32,
    ) -> Result<TickerData> {
        let intraday = self
            .bars
            .fetch_market_prompt(&BarRequest {
                ticker,
                multiplier: self.intraday_multiplier,
                timespan: Timespan::Minute,
                lookback_days: i64::from(intraday_days),
                reference,
            })
            .await?;

        let daily = self
            .bars
            .fetch_market_prompt(&BarRequest {
                ticker,
                multiplier: 1,
                timespan: Timespan::Day,
                lookback_days: i64::from(self.daily_days),
                reference,
            })
            .await?;

        let fundamentals = self
            .fundamentals
            .fetch_financial_prompt(ticker, self.fundamentals_days, reference)
            .await?;

        Ok(TickerData {
            intraday,
            daily,
            fundamentals,
        })
    }
}
