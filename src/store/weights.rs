use super::{read_json, write_json_atomic, UserHistory, UserId};
use crate::models::format_float;
use crate::Result;
use chrono::Utc;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Feature weights in insertion order, serialised as a JSON object
pub type Weights = IndexMap<String, f64>;

/// `- feature: weight X` per line, in order
pub fn format_weights_for_prompt(weights: &Weights) -> String {
    weights
        .iter()
        .map(|(feature, weight)| format!("- {}: weight {}", feature, format_float(*weight)))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeightsEntry {
    pub weights: Weights,
    pub timestamp: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct WeightsFile {
    default: Option<Weights>,
    #[serde(default)]
    users: BTreeMap<String, UserHistory<WeightsEntry>>,
}

#[derive(Debug, Deserialize)]
struct FeatureRow {
    parameter: String,
    weight: f64,
}

/// Per-user weight overrides on top of a shared default.
///
/// The default comes from the store file, or from the features CSV
/// (`parameter,weight`) until one is saved.
pub struct WeightsStore {
    path: PathBuf,
    features_path: PathBuf,
    lock: Mutex<()>,
}

impl WeightsStore {
    pub fn new(path: impl Into<PathBuf>, features_path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            features_path: features_path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn read(&self) -> Result<WeightsFile> {
        Ok(read_json(&self.path).await?.unwrap_or_default())
    }

    /// Read path only: an unreadable file falls back to defaults
    async fn load(&self) -> WeightsFile {
        match self.read().await {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "Unreadable weights store, using defaults: {}", e);
                WeightsFile::default()
            }
        }
    }

    pub async fn default_weights(&self) -> Weights {
        match self.load().await.default {
            Some(weights) => weights,
            None => load_feature_weights(&self.features_path),
        }
    }

    pub async fn user_weights(&self, user: UserId) -> Option<Weights> {
        self.load()
            .await
            .users
            .remove(&user.to_string())
            .and_then(|u| u.history.into_iter().last())
            .map(|entry| entry.weights)
            .filter(|w| !w.is_empty())
    }

    pub async fn active_weights(&self, user: Option<UserId>) -> Weights {
        if let Some(user) = user {
            if let Some(weights) = self.user_weights(user).await {
                return weights;
            }
        }
        self.default_weights().await
    }

    pub async fn weights_history(&self, user: UserId) -> Vec<WeightsEntry> {
        self.load()
            .await
            .users
            .remove(&user.to_string())
            .map(|u| u.history)
            .unwrap_or_default()
    }

    pub async fn save_weights(&self, user: UserId, weights: Weights) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut file = self.read().await?;
        file.users
            .entry(user.to_string())
            .or_default()
            .history
            .push(WeightsEntry {
                weights,
                timestamp: Utc::now().to_rfc3339(),
            });
        write_json_atomic(&self.path, &file)
    }

    /// Replace the shared default
    pub async fn save_default(&self, weights: Weights) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut file = self.read().await?;
        file.default = Some(weights);
        write_json_atomic(&self.path, &file)
    }

    pub async fn reset_user(&self, user: UserId) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let mut file = self.read().await?;
        if file.users.remove(&user.to_string()).is_none() {
            return Ok(false);
        }
        write_json_atomic(&self.path, &file)?;
        Ok(true)
    }
}

/// Weights from a `parameter,weight` CSV; empty if missing or unreadable
pub fn load_feature_weights(path: &Path) -> Weights {
    let mut reader = match csv::Reader::from_path(path) {
        Ok(reader) => reader,
        Err(e) => {
            tracing::debug!(path = %path.display(), "No feature weights: {}", e);
            return Weights::new();
        }
    };

    let rows: std::result::Result<Vec<FeatureRow>, _> = reader.deserialize().collect();
    match rows {
        Ok(rows) => rows.into_iter().map(|r| (r.parameter, r.weight)).collect(),
        Err(e) => {
            tracing::warn!(path = %path.display(), "Unreadable feature weights: {}", e);
            Weights::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_features(csv: Option<&str>) -> (tempfile::TempDir, WeightsStore) {
        let dir = tempfile::tempdir().unwrap();
        let features = dir.path().join("features.csv");
        if let Some(csv) = csv {
            std::fs::write(&features, csv).unwrap();
        }
        let store = WeightsStore::new(dir.path().join("weights.json"), features);
        (dir, store)
    }

    #[test]
    fn test_weights_keep_order_through_json() {
        let weights: Weights = serde_json::from_str(r#"{"zeta": 0.5, "alpha": 0.25, "mid": 1}"#).unwrap();
        let names: Vec<_> = weights.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
        assert_eq!(serde_json::to_string(&weights).unwrap(), r#"{"zeta":0.5,"alpha":0.25,"mid":1.0}"#);
    }

    #[test]
    fn test_format_weights_for_prompt() {
        let weights = Weights::from([("trend".to_string(), 0.5), ("volume".to_string(), 1.0)]);
        assert_eq!(
            format_weights_for_prompt(&weights),
            "- trend: weight 0.5\n- volume: weight 1.0"
        );
        assert_eq!(format_weights_for_prompt(&Weights::new()), "");
    }

    #[tokio::test]
    async fn test_default_comes_from_features_csv() {
        let (_dir, store) = store_with_features(Some("parameter,weight\nadx,0.4\nvolume,0.6\n"));
        let weights = store.active_weights(None).await;
        assert_eq!(weights.get("adx"), Some(&0.4));
        assert_eq!(weights.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_features_csv_gives_empty_default() {
        let (_dir, store) = store_with_features(None);
        assert!(store.default_weights().await.is_empty());
    }

    #[tokio::test]
    async fn test_user_override_and_reset() {
        let (_dir, store) = store_with_features(Some("parameter,weight\nadx,0.4\n"));
        let mut mine = Weights::new();
        mine.insert("momentum".to_string(), 0.9);
        store.save_weights(5, mine.clone()).await.unwrap();

        assert_eq!(store.active_weights(Some(5)).await, mine);
        assert_eq!(store.active_weights(Some(6)).await.get("adx"), Some(&0.4));
        assert_eq!(store.weights_history(5).await.len(), 1);

        assert!(store.reset_user(5).await.unwrap());
        assert!(!store.reset_user(5).await.unwrap());
        assert_eq!(store.active_weights(Some(5)).await.get("adx"), Some(&0.4));
    }

    #[tokio::test]
    async fn test_saved_default_overrides_csv() {
        let (_dir, store) = store_with_features(Some("parameter,weight\nadx,0.4\n"));
        let mut tuned = Weights::new();
        tuned.insert("adx".to_string(), 0.7);
        store.save_default(tuned).await.unwrap();
        assert_eq!(store.default_weights().await.get("adx"), Some(&0.7));
    }

    #[tokio::test]
    async fn test_unreadable_store_is_not_overwritten() {
        let (dir, store) = store_with_features(None);
        let path = dir.path().join("weights.json");
        let corrupt = r#"{"default":{"adx":"0.5"},"users":{"1":{"history":[]}}}"#;
        std::fs::write(&path, corrupt).unwrap();

        let mut mine = Weights::new();
        mine.insert("x".to_string(), 1.0);
        assert!(store.save_weights(2, mine).await.is_err());
        assert!(store.save_default(Weights::new()).await.is_err());
        assert!(store.reset_user(1).await.is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), corrupt);

        // reads still degrade to the CSV default
        assert!(store.active_weights(Some(1)).await.is_empty());
    }
}
