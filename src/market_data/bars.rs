use super::window::WindowResolver;
use crate::api::{AggregateBar, PolygonClient};
use crate::indicators::attach_adx;
use crate::models::{format_float, Bar, Timespan};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::fmt::Write as _;

/// What to fetch for one ticker
#[derive(Debug, Clone, PartialEq)]
pub struct BarRequest<'a> {
    pub ticker: &'a str,
    pub multiplier: u32,
    pub timespan: Timespan,
    pub lookback_days: i64,
    pub reference: Option<&'a str>,
}

/// Fetches OHLCV bars and renders them as prompt lines
#[derive(Clone)]
pub struct BarFetcher {
    client: PolygonClient,
    resolver: WindowResolver,
    indicator_period: Option<usize>,
}

impl BarFetcher {
    pub fn new(client: PolygonClient, resolver: WindowResolver) -> Self {
        Self {
            client,
            resolver,
            indicator_period: None,
        }
    }

    /// Attach +DI/-DI/ADX to every fetched series
    pub fn with_indicators(mut self, period: usize) -> Self {
        self.indicator_period = Some(period);
        self
    }

    pub async fn fetch_bars(&self, request: &BarRequest<'_>) -> Result<Vec<Bar>> {
        let window = self.resolver.window(request.reference, request.lookback_days)?;
        // start is a local calendar date, end is an exact instant in ms
        let from = window.start.date_naive().format("%Y-%m-%d").to_string();
        let to = window.end.timestamp_millis().to_string();

        let raw = self
            .client
            .get_aggregates(request.ticker, request.multiplier, request.timespan, &from, &to)
            .await?;

        let mut bars = raw
            .iter()
            .map(|agg| to_bar(request.ticker, agg))
            .collect::<Result<Vec<_>>>()?;

        if let Some(period) = self.indicator_period {
            attach_adx(&mut bars, period);
        }
        Ok(bars)
    }

    /// Newline-joined bar lines, or an empty string when there are no bars
    pub async fn fetch_market_prompt(&self, request: &BarRequest<'_>) -> Result<String> {
        let bars = self.fetch_bars(request).await?;
        if bars.is_empty() {
            tracing::info!(
                ticker = request.ticker,
                timespan = %request.timespan,
                "No bars returned"
            );
        }
        Ok(format_bars(&bars, self.resolver.timezone()))
    }
}

fn to_bar(ticker: &str, agg: &AggregateBar) -> Result<Bar> {
    let timestamp = DateTime::<Utc>::from_timestamp_millis(agg.t)
        .ok_or_else(|| Error::MalformedResponse(format!("bar timestamp out of range: {}", agg.t)))?;
    Ok(Bar {
        ticker: ticker.to_string(),
        timestamp,
        open: agg.o.clone(),
        high: agg.h.clone(),
        low: agg.l.clone(),
        close: agg.c.clone(),
        volume: agg.v.clone(),
        plus_di: None,
        minus_di: None,
        adx: None,
    })
}

/// `2024-03-01T09:30:00-0500|o:..|h:..|l:..|c:..|v:..[|DI+:..|DI-:..|ADX:..]`
///
/// Indicator fields appear only when defined.
pub fn format_bar_line(bar: &Bar, tz: Tz) -> String {
    let mut line = format!(
        "{}|o:{}|h:{}|l:{}|c:{}|v:{}",
        bar.timestamp.with_timezone(&tz).format("%Y-%m-%dT%H:%M:%S%z"),
        bar.open,
        bar.high,
        bar.low,
        bar.close,
        bar.volume,
    );
    for (label, value) in [("DI+", bar.plus_di), ("DI-", bar.minus_di), ("ADX", bar.adx)] {
        if let Some(value) = value {
            let _ = write!(line, "|{}:{}", label, format_float(value));
        }
    }
    line
}

pub fn format_bars(bars: &[Bar], tz: Tz) -> String {
    bars.iter()
        .map(|bar| format_bar_line(bar, tz))
        .collect::<Vec<_>>()
        .join("\n")
}
