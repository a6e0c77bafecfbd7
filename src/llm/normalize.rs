//! Model response normalization.
//!
//! Batch replies arrive in one of three shapes, resolved by [`classify`]:
//!
//! ```text
//! [{"ticker": "X", "probability_value": 80}, ...]          BareList
//! {"ranked": [...]}  or  {"results": [...]}                Wrapped
//! {"X": {"probability_value": 80}, ...}                    KeyedMap
//! ```
//!
//! Every record then goes through [`decode_record`]; records without a ticker
//! or with an uncoercible probability are dropped, never the whole batch.

use super::strip_code_fences;
use crate::models::{AnalysisVerdict, RankedResultSet};
use crate::{Error, Result};
use serde_json::{Map, Value};

const WRAPPER_KEYS: [&str; 2] = ["ranked", "results"];
const SINGLE_VERDICT_KEY: &str = "intraday_trend_movement_probability";

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseShape {
    BareList(Vec<Value>),
    Wrapped { key: &'static str, records: Vec<Value> },
    /// `(ticker, partial record)` in provider order
    KeyedMap(Vec<(String, Value)>),
    Unrecognized(Value),
}

impl ResponseShape {
    /// Flatten to raw records; keyed entries get their key as the ticker
    /// unless the record names one itself.
    pub fn into_records(self) -> Result<Vec<Value>> {
        match self {
            ResponseShape::BareList(records) | ResponseShape::Wrapped { records, .. } => Ok(records),
            ResponseShape::KeyedMap(entries) => Ok(entries
                .into_iter()
                .map(|(ticker, partial)| {
                    let mut record = Map::new();
                    record.insert("ticker".to_string(), Value::String(ticker));
                    if let Value::Object(fields) = partial {
                        record.extend(fields);
                    }
                    Value::Object(record)
                })
                .collect()),
            ResponseShape::Unrecognized(value) => Err(Error::MalformedResponse(format!(
                "unexpected response shape: {}",
                truncate(&value.to_string(), 200)
            ))),
        }
    }
}

pub fn classify(value: Value) -> ResponseShape {
    match value {
        Value::Array(records) => ResponseShape::BareList(records),
        Value::Object(mut map) => {
            for key in WRAPPER_KEYS {
                if matches!(map.get(key), Some(Value::Array(_))) {
                    if let Some(Value::Array(records)) = map.remove(key) {
                        return ResponseShape::Wrapped { key, records };
                    }
                }
            }
            if map.values().all(Value::is_object) {
                ResponseShape::KeyedMap(map.into_iter().collect())
            } else {
                ResponseShape::Unrecognized(Value::Object(map))
            }
        }
        other => ResponseShape::Unrecognized(other),
    }
}

/// Parse a batch reply into a ranked set.
///
/// Fails only when the text is not JSON or the shape is unrecognized.
pub fn normalize_batch(text: &str) -> Result<RankedResultSet> {
    let value: Value = serde_json::from_str(strip_code_fences(text))
        .map_err(|e| Error::MalformedResponse(format!("invalid JSON: {}", e)))?;

    let shape = classify(value);
    if let ResponseShape::Wrapped { key, records } = &shape {
        tracing::debug!(key, records = records.len(), "Unwrapped ranked records");
    }

    let verdicts = shape
        .into_records()?
        .iter()
        .filter_map(|record| {
            let verdict = decode_record(record);
            if verdict.is_none() {
                tracing::warn!("Skipping record: {}", truncate(&record.to_string(), 200));
            }
            verdict
        })
        .collect();

    Ok(RankedResultSet::from_unsorted(verdicts))
}

/// Decode one record; JSON-encoded strings are parsed first.
pub fn decode_record(record: &Value) -> Option<AnalysisVerdict> {
    if let Value::String(raw) = record {
        let parsed: Value = serde_json::from_str(raw).ok()?;
        return decode_object(parsed.as_object()?);
    }
    decode_object(record.as_object()?)
}

fn decode_object(fields: &Map<String, Value>) -> Option<AnalysisVerdict> {
    let ticker = fields.get("ticker")?.as_str()?.trim();
    if ticker.is_empty() {
        return None;
    }
    let probability_value = coerce_number(fields.get("probability_value")?)?;
    let confidence = match fields.get("confidence") {
        None | Some(Value::Null) => 0,
        Some(value) => coerce_number(value)?.trunc().clamp(0.0, 10.0) as u8,
    };

    Some(AnalysisVerdict {
        ticker: ticker.to_string(),
        probability_value,
        confidence,
        justification: text_field(fields, "justification"),
        fundamental_impact: text_field(fields, "fundamental_impact"),
        extra: fields
            .get("extra")
            .filter(|v| !v.is_null())
            .map(value_text),
    })
}

/// Parse a single-ticker reply.
///
/// Accepts `{"ticker", "intraday_trend_movement_probability": {...}}`, a list
/// of those (the entry for `ticker` wins, else the first), or a flat record.
pub fn parse_single_verdict(text: &str, ticker: &str) -> Result<AnalysisVerdict> {
    let value: Value = serde_json::from_str(strip_code_fences(text))
        .map_err(|e| Error::MalformedResponse(format!("invalid JSON: {}", e)))?;

    let object = match &value {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_object)
            .find(|o| {
                o.get("ticker")
                    .and_then(Value::as_str)
                    .is_some_and(|t| t.eq_ignore_ascii_case(ticker))
            })
            .or_else(|| items.iter().find_map(Value::as_object)),
        Value::Object(o) => Some(o),
        _ => None,
    }
    .ok_or_else(|| Error::MalformedResponse("expected a verdict object".to_string()))?;

    let mut flat = match object.get(SINGLE_VERDICT_KEY) {
        Some(Value::Object(inner)) => inner.clone(),
        _ => object.clone(),
    };
    if !flat.contains_key("ticker") {
        let outer = object.get("ticker").cloned();
        flat.insert(
            "ticker".to_string(),
            outer.unwrap_or_else(|| Value::String(ticker.to_string())),
        );
    }

    decode_object(&flat).ok_or_else(|| {
        Error::MalformedResponse(format!(
            "verdict for {} lacks a usable probability_value",
            ticker
        ))
    })
}

/// Number, or numeric string with an optional trailing `%`
fn coerce_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok()?,
        _ => return None,
    };
    number.is_finite().then_some(number)
}

fn text_field(fields: &Map<String, Value>, key: &str) -> String {
    fields.get(key).map(value_text).unwrap_or_default()
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tickers(set: &RankedResultSet) -> Vec<&str> {
        set.iter().map(|v| v.ticker.as_str()).collect()
    }

    #[test]
    fn test_three_shapes_normalize_equivalently() {
        let bare = normalize_batch(r#"[{"ticker":"X","probability_value":"80"}]"#).unwrap();
        let wrapped = normalize_batch(r#"{"ranked":[{"ticker":"X","probability_value":80}]}"#).unwrap();
        let keyed = normalize_batch(r#"{"X":{"probability_value":80}}"#).unwrap();

        for set in [&bare, &wrapped, &keyed] {
            assert_eq!(set.len(), 1);
            let verdict = set.iter().next().unwrap();
            assert_eq!(verdict.ticker, "X");
            assert_eq!(verdict.probability_value, 80.0);
        }
        assert_eq!(bare, wrapped);
        assert_eq!(wrapped, keyed);
    }

    #[test]
    fn test_classify_shapes() {
        assert!(matches!(classify(json!([])), ResponseShape::BareList(_)));
        assert!(matches!(
            classify(json!({"results": []})),
            ResponseShape::Wrapped { key: "results", .. }
        ));
        assert!(matches!(
            classify(json!({"ranked": [], "results": []})),
            ResponseShape::Wrapped { key: "ranked", .. }
        ));
        assert!(matches!(classify(json!({"A": {}, "B": {}})), ResponseShape::KeyedMap(ref e) if e.len() == 2));
        assert!(matches!(classify(json!({"ranked": "nope"})), ResponseShape::Unrecognized(_)));
        assert!(matches!(classify(json!(42)), ResponseShape::Unrecognized(_)));
    }

    #[test]
    fn test_unrecognized_shape_is_an_error() {
        assert!(matches!(
            normalize_batch(r#"{"message":"sorry"}"#),
            Err(Error::MalformedResponse(_))
        ));
        assert!(matches!(normalize_batch("not json"), Err(Error::MalformedResponse(_))));
    }

    #[test]
    fn test_sorted_descending_regardless_of_input_order() {
        let set = normalize_batch(
            r#"[{"ticker":"LOW","probability_value":70},{"ticker":"HIGH","probability_value":90}]"#,
        )
        .unwrap();
        assert_eq!(tickers(&set), vec!["HIGH", "LOW"]);
    }

    #[test]
    fn test_ties_keep_provider_order() {
        let set = normalize_batch(
            r#"[{"ticker":"A","probability_value":50},{"ticker":"B","probability_value":60},{"ticker":"C","probability_value":50}]"#,
        )
        .unwrap();
        assert_eq!(tickers(&set), vec!["B", "A", "C"]);
    }

    #[test]
    fn test_bad_records_are_dropped() {
        let set = normalize_batch(
            r#"[
                {"ticker":"OK","probability_value":"75%","confidence":"7"},
                {"probability_value":99},
                {"ticker":"NOPROB"},
                {"ticker":"WORDS","probability_value":"high"},
                {"ticker":"BADCONF","probability_value":10,"confidence":"very"},
                "{\"ticker\":\"STR\",\"probability_value\":40}",
                "garbage",
                17
            ]"#,
        )
        .unwrap();

        assert_eq!(tickers(&set), vec!["OK", "STR"]);
        let ok = set.iter().next().unwrap();
        assert_eq!(ok.probability_value, 75.0);
        assert_eq!(ok.confidence, 7);
    }

    #[test]
    fn test_keyed_map_record_ticker_wins() {
        let set = normalize_batch(r#"{"aapl":{"ticker":"AAPL","probability_value":55}}"#).unwrap();
        assert_eq!(tickers(&set), vec!["AAPL"]);
    }

    #[test]
    fn test_code_fenced_reply() {
        let set = normalize_batch("```json\n[{\"ticker\":\"X\",\"probability_value\":1}]\n```").unwrap();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_missing_confidence_defaults_to_zero() {
        let set = normalize_batch(r#"[{"ticker":"X","probability_value":12.5,"extra":null}]"#).unwrap();
        let verdict = set.iter().next().unwrap();
        assert_eq!(verdict.confidence, 0);
        assert_eq!(verdict.probability_value, 12.5);
        assert_eq!(verdict.extra, None);
    }

    #[test]
    fn test_parse_single_verdict_nested_list() {
        let text = r#"[{"ticker":"AAPL","intraday_trend_movement_probability":{"probability_value":"65%","confidence":6,"justification":"ADX>25","fundamental_impact":"neutral","extra":"watch VWAP"}}]"#;
        let verdict = parse_single_verdict(text, "AAPL").unwrap();

        assert_eq!(verdict.ticker, "AAPL");
        assert_eq!(verdict.probability_value, 65.0);
        assert_eq!(verdict.confidence, 6);
        assert_eq!(verdict.justification, "ADX>25");
        assert_eq!(verdict.extra.as_deref(), Some("watch VWAP"));
    }

    #[test]
    fn test_parse_single_verdict_flat_object_without_ticker() {
        let verdict = parse_single_verdict(r#"{"probability_value":30}"#, "MSFT").unwrap();
        assert_eq!(verdict.ticker, "MSFT");
    }

    #[test]
    fn test_parse_single_verdict_rejects_missing_probability() {
        let result = parse_single_verdict(
            r#"{"ticker":"AAPL","intraday_trend_movement_probability":{"confidence":5}}"#,
            "AAPL",
        );
        assert!(matches!(result, Err(Error::MalformedResponse(_))));
    }

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate("абвгд", 2), "аб...");
        assert_eq!(truncate("ab", 5), "ab");
    }
}
