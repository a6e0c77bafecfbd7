//! Analysis history: `{ticker: {date: {result, feedback}}}`.
//!
//! Entries are created as pending (`result: null`) before analysis and filled
//! in afterwards. Nothing is ever deleted.

use super::{read_json, write_json_atomic};
use crate::models::AnalysisVerdict;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

pub type History = BTreeMap<String, BTreeMap<String, HistoryEntry>>;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    /// Verdict object, a failure message, or `null` while pending
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<Value>,
}

impl HistoryEntry {
    /// Probability for display, from a flat or nested verdict
    pub fn probability(&self) -> Option<String> {
        let result = self.result.as_ref()?;
        let value = result
            .get("probability_value")
            .or_else(|| result.get("intraday_trend_movement_probability")?.get("probability_value"))?;
        Some(match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

pub struct HistoryStore {
    path: PathBuf,
    // serialises read-modify-write cycles
    lock: Mutex<()>,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Result<History> {
        Ok(read_json(&self.path).await?.unwrap_or_default())
    }

    /// Create an empty entry unless one exists already
    pub async fn record_pending(&self, ticker: &str, date: &str) -> Result<()> {
        self.update(|history| {
            history
                .entry(ticker.to_string())
                .or_default()
                .entry(date.to_string())
                .or_default();
        })
        .await
    }

    pub async fn record_result(&self, ticker: &str, date: &str, verdict: &AnalysisVerdict) -> Result<()> {
        let value = serde_json::to_value(verdict)?;
        self.record_raw_result(ticker, date, value).await
    }

    /// Store any result value (e.g. a failure message) for the entry
    pub async fn record_raw_result(&self, ticker: &str, date: &str, result: Value) -> Result<()> {
        self.update(|history| {
            history
                .entry(ticker.to_string())
                .or_default()
                .entry(date.to_string())
                .or_default()
                .result = Some(result);
        })
        .await
    }

    /// Attach operator feedback; false if the entry does not exist
    pub async fn record_feedback(&self, ticker: &str, date: &str, feedback: Value) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let mut history = self.load().await?;
        let Some(entry) = history.get_mut(ticker).and_then(|dates| dates.get_mut(date)) else {
            return Ok(false);
        };
        entry.feedback = Some(feedback);
        write_json_atomic(&self.path, &history)?;
        Ok(true)
    }

    pub async fn is_processed(&self, ticker: &str, date: &str) -> Result<bool> {
        let history = self.load().await?;
        Ok(history.get(ticker).is_some_and(|dates| dates.contains_key(date)))
    }

    async fn update(&self, apply: impl FnOnce(&mut History)) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut history = self.load().await?;
        apply(&mut history);
        write_json_atomic(&self.path, &history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn verdict(ticker: &str, probability: f64) -> AnalysisVerdict {
        AnalysisVerdict {
            ticker: ticker.to_string(),
            probability_value: probability,
            confidence: 7,
            justification: "ADX>25".to_string(),
            fundamental_impact: String::new(),
            extra: None,
        }
    }

    fn store() -> (tempfile::TempDir, HistoryStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path().join("output").join("history.json"));
        (dir, store)
    }

    #[tokio::test]
    async fn test_pending_then_result() {
        let (_dir, store) = store();
        store.record_pending("AAPL", "2024-03-01").await.unwrap();

        let history = store.load().await.unwrap();
        assert_eq!(history["AAPL"]["2024-03-01"].result, None);
        assert!(store.is_processed("AAPL", "2024-03-01").await.unwrap());
        assert!(!store.is_processed("AAPL", "2024-03-02").await.unwrap());

        store
            .record_result("AAPL", "2024-03-01", &verdict("AAPL", 81.0))
            .await
            .unwrap();
        let entry = &store.load().await.unwrap()["AAPL"]["2024-03-01"];
        assert_eq!(entry.probability().as_deref(), Some("81.0"));
    }

    #[tokio::test]
    async fn test_pending_does_not_clobber_result() {
        let (_dir, store) = store();
        store
            .record_result("AAPL", "2024-03-01", &verdict("AAPL", 60.0))
            .await
            .unwrap();
        store.record_pending("AAPL", "2024-03-01").await.unwrap();

        let entry = &store.load().await.unwrap()["AAPL"]["2024-03-01"];
        assert!(entry.result.is_some());
    }

    #[tokio::test]
    async fn test_feedback_requires_entry() {
        let (_dir, store) = store();
        assert!(!store
            .record_feedback("MSFT", "2024-03-01", json!("missed"))
            .await
            .unwrap());

        store.record_pending("MSFT", "2024-03-01").await.unwrap();
        assert!(store
            .record_feedback("MSFT", "2024-03-01", json!({"outcome": "up"}))
            .await
            .unwrap());
        let entry = &store.load().await.unwrap()["MSFT"]["2024-03-01"];
        assert_eq!(entry.feedback, Some(json!({"outcome": "up"})));
    }

    #[tokio::test]
    async fn test_nested_probability_for_display() {
        let entry = HistoryEntry {
            result: Some(json!({"intraday_trend_movement_probability": {"probability_value": "75%"}})),
            feedback: None,
        };
        assert_eq!(entry.probability().as_deref(), Some("75%"));
        assert_eq!(HistoryEntry::default().probability(), None);
    }

    #[tokio::test]
    async fn test_concurrent_writes_are_not_lost() {
        let (_dir, store) = store();
        let store = Arc::new(store);

        let tasks: Vec<_> = (0..10)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .record_pending(&format!("T{}", i), "2024-03-01")
                        .await
                        .unwrap();
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(store.load().await.unwrap().len(), 10);
    }
}
