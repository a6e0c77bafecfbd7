use super::normalize::{normalize_batch, parse_single_verdict};
use super::prompt::{single_response_schema, PromptContext, TickerSection};
use super::{CompletionRequest, LlmBackend};
use crate::api::{Attempt, RetryPolicy};
use crate::models::{AnalysisVerdict, RankedResultSet, TickerData};
use crate::Result;
use std::sync::Arc;

/// Outcome of a single-ticker analysis.
///
/// Exhausted retries degrade to `Failed` with a user-facing message instead of
/// an error, unlike [`Analyzer::analyze_batch`].
#[derive(Debug, Clone, PartialEq)]
pub enum SingleAnalysis {
    Verdict(AnalysisVerdict),
    Failed(String),
}

impl SingleAnalysis {
    pub fn verdict(&self) -> Option<&AnalysisVerdict> {
        match self {
            SingleAnalysis::Verdict(v) => Some(v),
            SingleAnalysis::Failed(_) => None,
        }
    }
}

/// Runs prompts through an [`LlmBackend`] under a fixed-delay retry policy.
///
/// Provider errors and unparseable replies are both retried.
#[derive(Clone)]
pub struct Analyzer {
    backend: Arc<dyn LlmBackend>,
    policy: RetryPolicy,
}

impl Analyzer {
    pub fn new(backend: Arc<dyn LlmBackend>, policy: RetryPolicy) -> Self {
        Self { backend, policy }
    }

    pub async fn analyze_single(
        &self,
        context: &PromptContext,
        ticker: &str,
        data: &TickerData,
    ) -> SingleAnalysis {
        let request =
            CompletionRequest::new(context.single(ticker, data)).with_schema(single_response_schema());

        let result = self
            .retry(ticker, &request, |text| parse_single_verdict(text, ticker))
            .await;

        match result {
            Ok(verdict) => SingleAnalysis::Verdict(verdict),
            Err(e) => {
                tracing::error!(ticker, "Single analysis failed: {}", e);
                SingleAnalysis::Failed(format!(
                    "Analysis of {} failed after {} attempts.",
                    ticker,
                    self.policy.max_attempts()
                ))
            }
        }
    }

    /// One combined call for all sections; exhaustion is an error
    pub async fn analyze_batch(
        &self,
        context: &PromptContext,
        sections: &[TickerSection<'_>],
    ) -> Result<RankedResultSet> {
        if sections.is_empty() {
            return Ok(RankedResultSet::default());
        }
        let request = CompletionRequest::new(context.batch(sections));
        let ranked = self.retry("batch", &request, normalize_batch).await?;

        tracing::info!(
            backend = self.backend.name(),
            requested = sections.len(),
            ranked = ranked.len(),
            "Batch analysis complete"
        );
        Ok(ranked)
    }

    /// Free-form completion under the same retry policy
    pub async fn complete_text(&self, prompt: &str) -> Result<String> {
        let request = CompletionRequest::text(prompt);
        self.retry("completion", &request, |text| Ok(text.to_string()))
            .await
    }

    async fn retry<T>(
        &self,
        label: &str,
        request: &CompletionRequest,
        parse: impl Fn(&str) -> Result<T>,
    ) -> Result<T> {
        let parse = &parse;
        self.policy
            .run(label, |_attempt| async move {
                match self.backend.complete(request).await.and_then(|text| parse(&text)) {
                    Ok(value) => Attempt::Done(value),
                    Err(e) => Attempt::Retry(e),
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replays scripted replies, then keeps failing
    struct ScriptedBackend {
        replies: Mutex<Vec<Result<String>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedBackend {
        fn new(replies: Vec<Result<String>>) -> Arc<Self> {
            let mut replies = replies;
            replies.reverse();
            Arc::new(Self {
                replies: Mutex::new(replies),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl LlmBackend for ScriptedBackend {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn complete(&self, request: &CompletionRequest) -> Result<String> {
            self.prompts.lock().unwrap().push(request.prompt.clone());
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(Error::Provider("no more replies".to_string())))
        }
    }

    fn analyzer(backend: Arc<ScriptedBackend>) -> Analyzer {
        Analyzer::new(backend, RetryPolicy::fixed(3, Duration::ZERO))
    }

    fn context() -> PromptContext {
        PromptContext::new("Analyse.", "- adx: weight 1")
    }

    #[tokio::test]
    async fn test_single_retries_unparseable_reply() {
        let backend = ScriptedBackend::new(vec![
            Ok("not json".to_string()),
            Ok(r#"{"ticker":"AAPL","intraday_trend_movement_probability":{"probability_value":"70%","confidence":8}}"#.to_string()),
        ]);
        let result = analyzer(backend.clone())
            .analyze_single(&context(), "AAPL", &TickerData::default())
            .await;

        assert_eq!(backend.calls(), 2);
        let verdict = result.verdict().unwrap();
        assert_eq!(verdict.probability_value, 70.0);
        assert_eq!(verdict.confidence, 8);
    }

    #[tokio::test]
    async fn test_single_exhaustion_returns_sentinel() {
        let backend = ScriptedBackend::new(vec![]);
        let result = analyzer(backend.clone())
            .analyze_single(&context(), "AAPL", &TickerData::default())
            .await;

        assert_eq!(backend.calls(), 3);
        assert_eq!(
            result,
            SingleAnalysis::Failed("Analysis of AAPL failed after 3 attempts.".to_string())
        );
    }

    #[tokio::test]
    async fn test_batch_exhaustion_is_an_error() {
        let backend = ScriptedBackend::new(vec![
            Err(Error::RateLimited("busy".to_string())),
            Ok(r#"{"note":"no data"}"#.to_string()),
        ]);
        let data = TickerData::default();
        let result = analyzer(backend.clone())
            .analyze_batch(&context(), &[TickerSection { ticker: "A", data: &data }])
            .await;

        assert_eq!(backend.calls(), 3);
        assert!(matches!(result, Err(Error::RetriesExhausted { attempts: 3, .. })));
    }

    #[tokio::test]
    async fn test_batch_ranks_reply() {
        let backend = ScriptedBackend::new(vec![Ok(
            r#"{"results":[{"ticker":"A","probability_value":40},{"ticker":"B","probability_value":85}]}"#
                .to_string(),
        )]);
        let data = TickerData::default();
        let ranked = analyzer(backend.clone())
            .analyze_batch(
                &context(),
                &[
                    TickerSection { ticker: "A", data: &data },
                    TickerSection { ticker: "B", data: &data },
                ],
            )
            .await
            .unwrap();

        assert_eq!(backend.calls(), 1);
        let order: Vec<_> = ranked.iter().map(|v| v.ticker.clone()).collect();
        assert_eq!(order, vec!["B", "A"]);
        assert!(backend.prompts.lock().unwrap()[0].contains("Ticker: A"));
    }

    #[tokio::test]
    async fn test_empty_batch_skips_provider() {
        let backend = ScriptedBackend::new(vec![]);
        let ranked = analyzer(backend.clone()).analyze_batch(&context(), &[]).await.unwrap();
        assert!(ranked.is_empty());
        assert_eq!(backend.calls(), 0);
    }
}
