//! OpenAI chat-completions backend
//!
//! Requests `response_format: json_object` for JSON calls and logs token usage per call.
use super::{CompletionRequest, LlmBackend};
use crate::config::LlmSettings;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const OPENAI_API_URL: &str = "https://api.openai.com/v1";
const MODEL: &str = "gpt-4o-mini";
const SYSTEM_PROMPT: &str =
    "You are a stock market analyst with a high level of expertise in predicting trend movements.";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Debug, Deserialize)]
struct MessageContent {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
    total_tokens: u64,
}

pub struct OpenAiBackend {
    api_key: String,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiBackend {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            base_url: OPENAI_API_URL.to_string(),
            model: MODEL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(base_url: &str, api_key: String, model: String) -> Self {
        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_settings(settings: &LlmSettings) -> Result<Self> {
        Ok(Self::with_base_url(
            &settings.openai_base_url,
            settings.openai_api_key.clone(),
            settings.openai_model.clone(),
        ))
    }
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                Message {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                Message {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            response_format: request.json.then_some(ResponseFormat { kind: "json_object" }),
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", &self.api_key))
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            if status.as_u16() == 429 {
                return Err(Error::RateLimited(body));
            }
            return Err(Error::Http {
                status: status.as_u16(),
                body,
            });
        }

        let chat: ChatResponse = response.json().await?;
        if let Some(usage) = &chat.usage {
            tracing::info!(
                input = usage.prompt_tokens,
                output = usage.completion_tokens,
                total = usage.total_tokens,
                "OpenAI tokens used"
            );
        }

        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| Error::Provider("OpenAI returned no content".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    #[tokio::test]
    async fn test_complete_requests_json_object() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(Matcher::PartialJson(json!({
                "model": "gpt-4o-mini",
                "response_format": {"type": "json_object"}
            })))
            .with_status(200)
            .with_body(
                r#"{"choices":[{"message":{"content":"{\"ranked\":[]}"}}],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#,
            )
            .create_async()
            .await;

        let backend = OpenAiBackend::with_base_url(&server.url(), "sk-test".to_string(), MODEL.to_string());
        let text = backend.complete(&CompletionRequest::new("go")).await.unwrap();

        mock.assert_async().await;
        assert_eq!(text, r#"{"ranked":[]}"#);
    }

    #[tokio::test]
    async fn test_rate_limit_maps_to_rate_limited() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_body("quota")
            .create_async()
            .await;

        let backend = OpenAiBackend::with_base_url(&server.url(), "k".to_string(), MODEL.to_string());
        let result = backend.complete(&CompletionRequest::new("go")).await;
        assert!(matches!(result, Err(Error::RateLimited(ref body)) if body == "quota"));
    }
}
