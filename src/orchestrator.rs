//! Analysis pipelines: fetch data per ticker, call the analyzer, keep history.
//!
//! Tickers are processed one after another. A ticker whose data fetch fails
//! is dropped from the batch and reported; its siblings carry on.

use crate::llm::{Analyzer, PromptContext, SingleAnalysis, TickerSection};
use crate::market_data::{TickerDataSource, WindowResolver};
use crate::models::{AnalysisVerdict, RankedResultSet, TickerData};
use crate::store::{format_weights_for_prompt, HistoryStore, PromptStore, UserId, WeightsStore};
use crate::Result;
use serde_json::Value;
use std::sync::Arc;

/// A ticker excluded before analysis, with the reason
#[derive(Debug, Clone, PartialEq)]
pub struct DroppedTicker {
    pub ticker: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub date_key: String,
    pub ranked: RankedResultSet,
    /// Fetch failures
    pub dropped: Vec<DroppedTicker>,
    /// Analysed tickers the model returned no verdict for
    pub missing: Vec<String>,
    /// Verdicts for tickers that were never requested
    pub unmatched: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SingleReport {
    pub date_key: String,
    pub ticker: String,
    pub analysis: SingleAnalysis,
}

pub struct Orchestrator {
    data: Arc<dyn TickerDataSource>,
    analyzer: Analyzer,
    history: Arc<HistoryStore>,
    prompts: Arc<PromptStore>,
    weights: Arc<WeightsStore>,
    resolver: WindowResolver,
    intraday_days_single: u32,
    intraday_days_batch: u32,
}

impl Orchestrator {
    pub fn new(
        data: Arc<dyn TickerDataSource>,
        analyzer: Analyzer,
        history: Arc<HistoryStore>,
        prompts: Arc<PromptStore>,
        weights: Arc<WeightsStore>,
        resolver: WindowResolver,
    ) -> Self {
        Self {
            data,
            analyzer,
            history,
            prompts,
            weights,
            resolver,
            intraday_days_single: 5,
            intraday_days_batch: 3,
        }
    }

    pub fn with_intraday_days(mut self, single: u32, batch: u32) -> Self {
        self.intraday_days_single = single;
        self.intraday_days_batch = batch;
        self
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn prompts(&self) -> &PromptStore {
        &self.prompts
    }

    pub fn weights(&self) -> &WeightsStore {
        &self.weights
    }

    /// History key for a run: the exchange-local date the bar window ends on
    pub fn date_key(&self, reference: Option<&str>) -> Result<String> {
        let end = self.resolver.resolve_end(reference)?;
        Ok(end.date_naive().format("%Y-%m-%d").to_string())
    }

    pub async fn analyze_single(
        &self,
        ticker: &str,
        reference: Option<&str>,
        user: Option<UserId>,
    ) -> Result<SingleReport> {
        let date_key = self.date_key(reference)?;
        let data = self
            .data
            .fetch_ticker_data(ticker, reference, self.intraday_days_single)
            .await?;

        self.record_pending(ticker, &date_key).await;
        let context = self.prompt_context(user).await;
        let analysis = self.analyzer.analyze_single(&context, ticker, &data).await;

        let stored = match &analysis {
            SingleAnalysis::Verdict(verdict) => serde_json::to_value(verdict)?,
            SingleAnalysis::Failed(message) => Value::String(message.clone()),
        };
        if let Err(e) = self.history.record_raw_result(ticker, &date_key, stored).await {
            tracing::warn!(ticker, "Could not update history: {}", e);
        }

        Ok(SingleReport {
            date_key,
            ticker: ticker.to_string(),
            analysis,
        })
    }

    /// Analyse a set of tickers in one model call.
    ///
    /// Fails only when the date is invalid or the analysis call itself fails.
    pub async fn analyze_batch(
        &self,
        tickers: &[String],
        reference: Option<&str>,
        user: Option<UserId>,
    ) -> Result<BatchReport> {
        let date_key = self.date_key(reference)?;
        tracing::info!(tickers = tickers.len(), date = %date_key, "Starting batch analysis");

        let mut survivors: Vec<(String, TickerData)> = Vec::with_capacity(tickers.len());
        let mut dropped = Vec::new();

        for ticker in tickers {
            if survivors.iter().any(|(t, _)| t == ticker) {
                continue;
            }
            match self
                .data
                .fetch_ticker_data(ticker, reference, self.intraday_days_batch)
                .await
            {
                Ok(data) => {
                    self.record_pending(ticker, &date_key).await;
                    survivors.push((ticker.clone(), data));
                }
                Err(e) => {
                    tracing::error!(ticker = %ticker, "Error fetching data: {}", e);
                    dropped.push(DroppedTicker {
                        ticker: ticker.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            surviving = survivors.len(),
            dropped = dropped.len(),
            "Data fetch complete"
        );

        if survivors.is_empty() {
            return Ok(BatchReport {
                date_key,
                dropped,
                ..BatchReport::default()
            });
        }

        let context = self.prompt_context(user).await;
        let sections: Vec<TickerSection<'_>> = survivors
            .iter()
            .map(|(ticker, data)| TickerSection { ticker, data })
            .collect();

        let ranked = self.analyzer.analyze_batch(&context, &sections).await.map_err(|e| {
            tracing::error!("Batch analysis failed: {}", e);
            e
        })?;

        let (kept, unmatched) = self.reconcile(ranked, &survivors, &date_key).await;
        let missing = survivors
            .iter()
            .map(|(ticker, _)| ticker)
            .filter(|ticker| !kept.iter().any(|v| &v.ticker == *ticker))
            .cloned()
            .collect();

        Ok(BatchReport {
            date_key,
            ranked: RankedResultSet::from_unsorted(kept),
            dropped,
            missing,
            unmatched,
        })
    }

    /// Match verdicts to analysed tickers and store them.
    ///
    /// Verdicts for tickers outside the batch are skipped.
    async fn reconcile(
        &self,
        ranked: RankedResultSet,
        survivors: &[(String, TickerData)],
        date_key: &str,
    ) -> (Vec<AnalysisVerdict>, Vec<String>) {
        let mut kept: Vec<AnalysisVerdict> = Vec::with_capacity(ranked.len());
        let mut unmatched = Vec::new();

        for mut verdict in ranked {
            let Some((ticker, _)) = survivors
                .iter()
                .find(|(t, _)| t.eq_ignore_ascii_case(&verdict.ticker))
            else {
                tracing::warn!(ticker = %verdict.ticker, "Skipping verdict for unrequested ticker");
                unmatched.push(verdict.ticker);
                continue;
            };
            if kept.iter().any(|v| &v.ticker == ticker) {
                tracing::warn!(ticker = %ticker, "Skipping duplicate verdict");
                continue;
            }

            verdict.ticker = ticker.clone();
            if let Err(e) = self.history.record_result(ticker, date_key, &verdict).await {
                tracing::warn!(ticker = %ticker, "Could not update history: {}", e);
            }
            kept.push(verdict);
        }

        (kept, unmatched)
    }

    async fn record_pending(&self, ticker: &str, date_key: &str) {
        if let Err(e) = self.history.record_pending(ticker, date_key).await {
            tracing::warn!(ticker, "Could not record pending entry: {}", e);
        }
    }

    async fn prompt_context(&self, user: Option<UserId>) -> PromptContext {
        let template = self.prompts.active_prompt(user).await;
        let weights = self.weights.active_weights(user).await;
        PromptContext::new(template, format_weights_for_prompt(&weights))
    }
}
