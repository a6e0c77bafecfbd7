use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::Number;
use std::fmt;

/// One OHLCV sample from the market-data provider.
///
/// Directional indicator fields stay `None` until [`crate::indicators::attach_adx`]
/// runs, and stay `None` for bars where a denominator was zero.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bar {
    pub ticker: String,
    pub timestamp: DateTime<Utc>,
    /// Prices and volume keep the provider's number text (`180` stays `180`)
    pub open: Number,
    pub high: Number,
    pub low: Number,
    pub close: Number,
    pub volume: Number,
    pub plus_di: Option<f64>,
    pub minus_di: Option<f64>,
    pub adx: Option<f64>,
}

impl Bar {
    /// (high, low, close) as floats for indicator math
    pub fn hlc(&self) -> (f64, f64, f64) {
        let float = |n: &Number| n.as_f64().unwrap_or(f64::NAN);
        (float(&self.high), float(&self.low), float(&self.close))
    }
}

/// Aggregate bar unit understood by the provider
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Timespan {
    Minute,
    Day,
}

impl Timespan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timespan::Minute => "minute",
            Timespan::Day => "day",
        }
    }
}

impl fmt::Display for Timespan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved request window in the exchange timezone.
///
/// `start` is always exactly `lookback_days` before `end`.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketWindow {
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
}

impl MarketWindow {
    pub fn ending_at(end: DateTime<Tz>, lookback_days: u32) -> Self {
        Self {
            start: end - Duration::days(i64::from(lookback_days)),
            end,
        }
    }
}

/// Flattened metrics from the most recent quarterly filing
#[derive(Debug, Clone, PartialEq)]
pub struct FundamentalRecord {
    pub ticker: String,
    pub end_date: String,
    /// `(short_name, value)` in provider order; duplicate short names are kept.
    pub metrics: Vec<(String, String)>,
}

impl FundamentalRecord {
    /// `ticker|end_date|metric:value|...`
    pub fn to_prompt_line(&self) -> String {
        let mut parts = Vec::with_capacity(self.metrics.len() + 2);
        parts.push(self.ticker.clone());
        parts.push(self.end_date.clone());
        for (name, value) in &self.metrics {
            parts.push(format!("{}:{}", name, value));
        }
        parts.join("|")
    }
}

/// The three textual data blocks gathered for one ticker
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickerData {
    pub intraday: String,
    pub daily: String,
    pub fundamentals: String,
}

/// One model verdict for one ticker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisVerdict {
    pub ticker: String,
    /// Percentage, 0-100
    pub probability_value: f64,
    /// 1-10; 0 when the model omitted it
    #[serde(default)]
    pub confidence: u8,
    #[serde(default)]
    pub justification: String,
    #[serde(default)]
    pub fundamental_impact: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<String>,
}

/// Verdicts ordered by probability, highest first.
///
/// Ties keep the order the provider returned them in.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RankedResultSet(Vec<AnalysisVerdict>);

impl RankedResultSet {
    pub fn from_unsorted(mut verdicts: Vec<AnalysisVerdict>) -> Self {
        // Vec::sort_by is stable
        verdicts.sort_by(|a, b| {
            b.probability_value
                .partial_cmp(&a.probability_value)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Self(verdicts)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, AnalysisVerdict> {
        self.0.iter()
    }

}

impl IntoIterator for RankedResultSet {
    type Item = AnalysisVerdict;
    type IntoIter = std::vec::IntoIter<AnalysisVerdict>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Shortest round-trip form; whole numbers keep one decimal place (`3.0`).
pub fn format_float(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    }
}
