// LLM-backed analysis: provider backends, prompt assembly, response normalization

pub mod analyzer;
pub mod gemini;
pub mod normalize;
pub mod openai;
pub mod prompt;

pub use analyzer::{Analyzer, SingleAnalysis};
pub use gemini::GeminiBackend;
pub use normalize::{classify, normalize_batch, parse_single_verdict, ResponseShape};
pub use openai::OpenAiBackend;
pub use prompt::{PromptContext, TickerSection};

use crate::config::{LlmProvider, LlmSettings};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// One text-in, text-out model call; JSON output unless built with [`CompletionRequest::text`]
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub prompt: String,
    pub json: bool,
    /// Response schema for providers that can enforce one
    pub response_schema: Option<serde_json::Value>,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            json: true,
            response_schema: None,
        }
    }

    /// Free-form reply, no JSON mode
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            json: false,
            ..Self::new(prompt)
        }
    }

    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.response_schema = Some(schema);
        self
    }
}

#[async_trait]
pub trait LlmBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Raw model text
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

pub fn backend_from_settings(settings: &LlmSettings) -> Result<Arc<dyn LlmBackend>> {
    Ok(match settings.provider {
        LlmProvider::Gemini => Arc::new(GeminiBackend::from_settings(settings)?),
        LlmProvider::OpenAi => Arc::new(OpenAiBackend::from_settings(settings)?),
    })
}

/// Strip a surrounding markdown code block (```json ... ``` or ``` ... ```)
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(body) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = body.strip_prefix("json").unwrap_or(body);
    body.strip_suffix("```").unwrap_or(body).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fences("  {\"a\":1} "), "{\"a\":1}");
        assert_eq!(strip_code_fences("```json\n{\"a\":1}"), "{\"a\":1}");
    }
}
