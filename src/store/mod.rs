// File-backed collaborators: analysis history, per-user prompts and weights, ticker list

pub mod history;
pub mod prompts;
pub mod tickers;
pub mod weights;

pub use history::{HistoryEntry, HistoryStore};
pub use prompts::{PromptEntry, PromptStore};
pub use tickers::load_tickers;
pub use weights::{format_weights_for_prompt, Weights, WeightsEntry, WeightsStore};

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

/// Telegram user id
pub type UserId = i64;

/// Versioned per-user overrides: `{"history": [entry, ...]}`, latest last
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserHistory<E> {
    #[serde(default = "Vec::new")]
    pub history: Vec<E>,
}

impl<E> Default for UserHistory<E> {
    fn default() -> Self {
        Self { history: Vec::new() }
    }
}

/// `None` when the file does not exist
pub(crate) async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Write pretty JSON through a temp file in the same directory, then rename
/// over `path`, so readers never see a partial file.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut file, value)?;
    file.write_all(b"\n")?;
    file.persist(path).map_err(|e| Error::Io(e.error))?;

    tracing::debug!(path = %path.display(), "Saved");
    Ok(())
}
