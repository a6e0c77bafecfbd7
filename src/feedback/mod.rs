//! Offline feedback loop for the feature weights.
//!
//! `score` asks the model for a 0-100 score per input row, `label` collects
//! operator corrections, `evaluate` asks for a review of recent labels and
//! `adjust` asks for new weights and saves them as the shared default.
//!
//! Files: `input.csv` (`ticker,features`), `results.jsonl` (scores),
//! `history.jsonl` (labelled entries, append-only).

use crate::llm::Analyzer;
use crate::store::{Weights, WeightsStore};
use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Labelled entries sent with evaluate/adjust prompts
pub const RECENT_ENTRIES: usize = 20;

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreInput {
    pub ticker: String,
    pub features: Value,
}

/// One line of `results.jsonl`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredRow {
    pub ticker: String,
    pub features: Value,
    pub score_given: f64,
    pub response: String,
    /// Set when an operator labelled the row by hand
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub real_outcome: Option<Value>,
}

/// One line of `history.jsonl`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LabeledEntry {
    pub features: Value,
    pub score_given: f64,
    pub real_outcome: Value,
}

#[derive(Debug, Clone)]
pub struct FeedbackPaths {
    pub input: PathBuf,
    pub results: PathBuf,
    pub history: PathBuf,
}

impl FeedbackPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            input: dir.join("input.csv"),
            results: dir.join("results.jsonl"),
            history: dir.join("history.jsonl"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct InputRow {
    ticker: String,
    features: String,
}

/// Rows of `input.csv`; single-quoted feature objects are accepted
pub fn load_inputs(path: &Path) -> Result<Vec<ScoreInput>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut inputs = Vec::new();

    for (line, row) in reader.deserialize::<InputRow>().enumerate() {
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                tracing::warn!(line = line + 2, "Skipping input row: {}", e);
                continue;
            }
        };
        match serde_json::from_str::<Value>(&row.features.replace('\'', "\"")) {
            Ok(features) => inputs.push(ScoreInput {
                ticker: row.ticker,
                features,
            }),
            Err(e) => tracing::warn!(ticker = %row.ticker, "Skipping row with bad features: {}", e),
        }
    }
    Ok(inputs)
}

pub fn build_score_prompt(features: &Value, weights: &Weights) -> String {
    let weights = serde_json::to_string(weights).unwrap_or_default();
    format!(
        "You are analysing a financial instrument from a set of features.\n\
         Each feature has a weight. Taking the features and their weights into account, \
         estimate the probability of a trend movement on a scale from 0 to 100.\n\
         Weights:\n{}\n\
         Instrument features:\n{}\n\n\
         Answer only in the format: SCORE: <number from 0 to 100>.",
        weights, features
    )
}

/// The number after the first parseable `SCORE:` marker
pub fn parse_score(response: &str) -> Option<f64> {
    response.lines().find_map(|line| {
        let (_, rest) = line.split_once("SCORE:")?;
        rest.trim().parse::<f64>().ok()
    })
}

fn push_examples(prompt: &mut String, entries: &[LabeledEntry]) {
    for entry in entries {
        prompt.push_str(&format!(
            "\nfeatures: {}\nscore: {}\noutcome: {}\n",
            entry.features,
            entry.score_given,
            outcome_text(&entry.real_outcome)
        ));
    }
}

fn outcome_text(outcome: &Value) -> String {
    match outcome {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn build_evaluation_prompt(entries: &[LabeledEntry]) -> String {
    let mut prompt = String::from(
        "You are reviewing how well a model's predictions held up.\n\
         Below are examples with the instrument features, the score given and the real outcome.\n\n\
         Analyse:\n\
         - How accurate the scores were\n\
         - Where the model overestimated or underestimated\n\
         - Which features were misleading\n\
         - What could change in the scoring logic or the feature weights\n\n\
         Examples:\n",
    );
    push_examples(&mut prompt, entries);
    prompt.push_str("\nGive your conclusion.");
    prompt
}

pub fn build_adjust_prompt(entries: &[LabeledEntry], current: &Weights) -> String {
    let current = serde_json::to_string_pretty(current).unwrap_or_default();
    let mut prompt = format!(
        "You are correcting feature weights used to predict the probability of a trend movement.\n\
         The score is based on features, each with its own weight. The output is a number from 0 to 100.\n\
         Given the historical scores and the real outcomes, propose new feature weights that improve accuracy.\n\n\
         Current weights:\n{}\n\n\
         History:\n",
        current
    );
    push_examples(&mut prompt, entries);
    prompt.push_str(
        "\n---\nPropose new weights as a JSON object and briefly explain the changes. \
         Do not introduce new features, only use the existing ones. The weights must sum to 1.0.",
    );
    prompt
}

/// Weights from the span between the first `{` and the last `}`
pub fn extract_weights(response: &str) -> Option<Weights> {
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&response[start..=end]).ok()
}

pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path)?;
    let mut items = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        items.push(serde_json::from_str(&line)?);
    }
    Ok(items)
}

pub fn write_jsonl<T: Serialize>(path: &Path, items: &[T]) -> Result<()> {
    let mut file = File::create(path)?;
    for item in items {
        writeln!(file, "{}", serde_json::to_string(item)?)?;
    }
    Ok(())
}

pub fn append_jsonl<T: Serialize>(path: &Path, item: &T) -> Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", serde_json::to_string(item)?)?;
    Ok(())
}

/// Last `n` labelled entries, oldest first; empty when there is no history
pub fn recent_entries(path: &Path, n: usize) -> Result<Vec<LabeledEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut entries: Vec<LabeledEntry> = read_jsonl(path)?;
    let skip = entries.len().saturating_sub(n);
    Ok(entries.split_off(skip))
}

pub struct FeedbackLoop {
    analyzer: Analyzer,
    weights: Arc<WeightsStore>,
    paths: FeedbackPaths,
}

impl FeedbackLoop {
    pub fn new(analyzer: Analyzer, weights: Arc<WeightsStore>, paths: FeedbackPaths) -> Self {
        Self {
            analyzer,
            weights,
            paths,
        }
    }

    pub fn paths(&self) -> &FeedbackPaths {
        &self.paths
    }

    /// Score every input row and rewrite `results.jsonl`; returns rows written
    pub async fn score(&self) -> Result<usize> {
        let weights = self.weights.default_weights().await;
        let inputs = load_inputs(&self.paths.input)?;
        let mut results = Vec::with_capacity(inputs.len());

        for input in inputs {
            tracing::info!(ticker = %input.ticker, "Scoring");
            let prompt = build_score_prompt(&input.features, &weights);
            let response = match self.analyzer.complete_text(&prompt).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::error!(ticker = %input.ticker, "Scoring failed: {}", e);
                    continue;
                }
            };
            let Some(score) = parse_score(&response) else {
                tracing::warn!(ticker = %input.ticker, response = %response, "No SCORE in reply");
                continue;
            };
            results.push(ScoredRow {
                ticker: input.ticker,
                features: input.features,
                score_given: score,
                response,
                real_outcome: None,
            });
        }

        write_jsonl(&self.paths.results, &results)?;
        tracing::info!(rows = results.len(), path = %self.paths.results.display(), "Saved scores");
        Ok(results.len())
    }

    /// Ask the operator to correct each score; appends to `history.jsonl`.
    ///
    /// Rows that already carry an outcome are copied as they are.
    pub fn label<R: BufRead, W: Write>(&self, mut input: R, mut output: W) -> Result<usize> {
        if !self.paths.results.exists() {
            writeln!(output, "No results to label. Run `score` first.")?;
            return Ok(0);
        }
        let rows: Vec<ScoredRow> = read_jsonl(&self.paths.results)?;
        let mut labelled = 0;

        for row in rows {
            let entry = match row.real_outcome {
                Some(outcome) => LabeledEntry {
                    features: row.features,
                    score_given: row.score_given,
                    real_outcome: outcome,
                },
                None => {
                    writeln!(output, "\n--- {} ---", row.ticker)?;
                    writeln!(output, "Features: {}", row.features)?;
                    writeln!(output, "Model replied:\n{}", row.response)?;
                    let score = ask_score(&mut input, &mut output)?;
                    write!(output, "Outcome (success/failure/other): ")?;
                    output.flush()?;
                    let outcome = read_answer(&mut input)?.to_lowercase();
                    LabeledEntry {
                        features: row.features,
                        score_given: score,
                        real_outcome: Value::String(if outcome.is_empty() {
                            "unknown".to_string()
                        } else {
                            outcome
                        }),
                    }
                }
            };
            append_jsonl(&self.paths.history, &entry)?;
            labelled += 1;
        }

        writeln!(output, "\nHistory updated with {} entries.", labelled)?;
        Ok(labelled)
    }

    /// Model review of the most recent labelled entries
    pub async fn evaluate(&self) -> Result<Option<String>> {
        let entries = recent_entries(&self.paths.history, RECENT_ENTRIES)?;
        if entries.is_empty() {
            tracing::warn!(path = %self.paths.history.display(), "No labelled history");
            return Ok(None);
        }
        let review = self
            .analyzer
            .complete_text(&build_evaluation_prompt(&entries))
            .await?;
        Ok(Some(review))
    }

    /// Ask for new weights and save them as the default.
    ///
    /// Returns the raw reply and the weights, if any could be extracted.
    pub async fn adjust(&self) -> Result<Option<(String, Option<Weights>)>> {
        let entries = recent_entries(&self.paths.history, RECENT_ENTRIES)?;
        if entries.is_empty() {
            tracing::warn!(path = %self.paths.history.display(), "No labelled history");
            return Ok(None);
        }

        let current = self.weights.default_weights().await;
        let response = self
            .analyzer
            .complete_text(&build_adjust_prompt(&entries, &current))
            .await?;

        let weights = extract_weights(&response).filter(|w| !w.is_empty());
        match &weights {
            Some(weights) => {
                self.weights.save_default(weights.clone()).await?;
                tracing::info!(features = weights.len(), "Saved adjusted weights");
            }
            None => tracing::warn!("Could not parse weights from the reply"),
        }
        Ok(Some((response, weights)))
    }
}

fn read_answer<R: BufRead>(input: &mut R) -> Result<String> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Err(Error::invalid("input closed while labelling"));
    }
    Ok(line.trim().to_string())
}

fn ask_score<R: BufRead, W: Write>(input: &mut R, output: &mut W) -> Result<f64> {
    loop {
        write!(output, "Real trend probability (0-100): ")?;
        output.flush()?;
        match read_answer(input)?.parse::<f64>() {
            Ok(score) if (0.0..=100.0).contains(&score) => return Ok(score),
            _ => writeln!(output, "Enter a number from 0 to 100.")?,
        }
    }
}
