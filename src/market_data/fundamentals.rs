use crate::api::{FinancialFiling, PolygonClient};
use crate::models::FundamentalRecord;
use crate::{Error, Result};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Latest quarterly filing in a lookback window, flattened to one line
#[derive(Clone)]
pub struct FundamentalsFetcher {
    client: PolygonClient,
}

impl FundamentalsFetcher {
    pub fn new(client: PolygonClient) -> Self {
        Self { client }
    }

    /// Most recent filing with `filing_date` in `[reference - lookback_days, reference]`
    pub async fn fetch_record(
        &self,
        ticker: &str,
        lookback_days: u32,
        reference: Option<&str>,
    ) -> Result<Option<FundamentalRecord>> {
        let filed_to = parse_reference_date(reference, Utc::now())?;
        let filed_from = filed_to - Duration::days(i64::from(lookback_days));

        let filing = self
            .client
            .get_latest_financials(ticker, filed_from, filed_to)
            .await?;

        Ok(filing.map(|f| flatten_filing(ticker, &f)))
    }

    /// `ticker|end_date|metric:value|...`, or `""` when nothing was filed.
    ///
    /// An unparseable reference date is logged and yields `""`; provider
    /// failures propagate.
    pub async fn fetch_financial_prompt(
        &self,
        ticker: &str,
        lookback_days: u32,
        reference: Option<&str>,
    ) -> Result<String> {
        match self.fetch_record(ticker, lookback_days, reference).await {
            Ok(Some(record)) => Ok(record.to_prompt_line()),
            Ok(None) => {
                tracing::info!(ticker, "No quarterly filing in window");
                Ok(String::new())
            }
            Err(Error::InvalidArgument(msg)) => {
                tracing::error!(ticker, "Invalid reference date: {}", msg);
                Ok(String::new())
            }
            Err(e) => Err(e),
        }
    }
}

/// Calendar date of the reference (UTC), or today when absent.
///
/// Any time or offset part is ignored.
pub fn parse_reference_date(reference: Option<&str>, now: DateTime<Utc>) -> Result<NaiveDate> {
    let Some(raw) = reference.map(str::trim) else {
        return Ok(now.date_naive());
    };

    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(date);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.naive_local().date());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|dt| dt.date())
        .ok_or_else(|| Error::invalid(format!("reference date {:?}", raw)))
}

/// Flatten `financials.{section}.{metric}.value` in provider order.
///
/// Metrics without a value are skipped; colliding short names are all kept.
pub fn flatten_filing(ticker: &str, filing: &FinancialFiling) -> FundamentalRecord {
    let metrics = filing
        .financials
        .values()
        .filter_map(Value::as_object)
        .flat_map(|section| section.iter())
        .filter_map(|(key, info)| {
            let value = info.as_object()?.get("value")?;
            if value.is_null() {
                return None;
            }
            Some((short_metric_name(key).to_string(), render_value(value)))
        })
        .collect();

    FundamentalRecord {
        ticker: ticker.to_string(),
        end_date: filing.end_date.clone(),
        metrics,
    }
}

/// Last `_`/`.` separated segment: `net_cash_flow_from_operating_activities` -> `activities`
pub fn short_metric_name(key: &str) -> &str {
    key.rsplit(['_', '.']).next().unwrap_or(key)
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
