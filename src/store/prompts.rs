use super::{read_json, write_json_atomic, UserHistory, UserId};
use crate::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::Mutex;

pub const DEFAULT_PROMPT: &str = "\
You are an intraday stock analyst. For every ticker below, estimate the probability of a \
significant intraday trend move today after the market open, using only:
- 5-minute and 1-day price data
- ADX, DI+ and DI- for momentum strength
- volume spikes and divergences
- key support/resistance levels and imminent breakouts
- fundamentals, with low weight
For each ticker return:
1. ticker
2. probability_value: integer percent
3. confidence: integer 1-10
4. justification: short keywords
5. fundamental_impact: brief note on any fundamental driver
6. extra: optional short outlook
Return a pure JSON array sorted by probability_value descending.";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromptEntry {
    pub prompt: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PromptFile {
    #[serde(default = "default_prompt")]
    default: String,
    #[serde(default)]
    users: BTreeMap<String, UserHistory<PromptEntry>>,
}

impl Default for PromptFile {
    fn default() -> Self {
        Self {
            default: default_prompt(),
            users: BTreeMap::new(),
        }
    }
}

fn default_prompt() -> String {
    DEFAULT_PROMPT.to_string()
}

/// Per-user prompt overrides on top of a shared default
pub struct PromptStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl PromptStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn read(&self) -> Result<PromptFile> {
        Ok(read_json(&self.path).await?.unwrap_or_default())
    }

    /// Read path only: an unreadable file falls back to defaults
    async fn load(&self) -> PromptFile {
        match self.read().await {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "Unreadable prompt store, using defaults: {}", e);
                PromptFile::default()
            }
        }
    }

    pub async fn default_prompt(&self) -> String {
        self.load().await.default
    }

    /// Latest custom prompt for the user, if any
    pub async fn user_prompt(&self, user: UserId) -> Option<String> {
        self.load()
            .await
            .users
            .remove(&user.to_string())
            .and_then(|u| u.history.into_iter().last())
            .map(|entry| entry.prompt)
    }

    /// User override if present, otherwise the default
    pub async fn active_prompt(&self, user: Option<UserId>) -> String {
        if let Some(user) = user {
            if let Some(prompt) = self.user_prompt(user).await {
                return prompt;
            }
        }
        self.default_prompt().await
    }

    pub async fn prompt_history(&self, user: UserId) -> Vec<PromptEntry> {
        self.load()
            .await
            .users
            .remove(&user.to_string())
            .map(|u| u.history)
            .unwrap_or_default()
    }

    pub async fn save_prompt(&self, user: UserId, prompt: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut file = self.read().await?;
        file.users
            .entry(user.to_string())
            .or_default()
            .history
            .push(PromptEntry {
                prompt: prompt.to_string(),
                timestamp: Utc::now().to_rfc3339(),
            });
        write_json_atomic(&self.path, &file)
    }

    /// Drop all custom prompts; false when the user had none
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
