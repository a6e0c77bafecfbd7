use super::{CompletionRequest, LlmBackend};
use crate::config::LlmSettings;
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.0-flash";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig<'a>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<&'a serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

/// Gemini `generateContent` with a JSON response MIME type
pub struct GeminiBackend {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl GeminiBackend {
    pub fn new(api_key: String) -> Result<Self> {
        Self::with_base_url(DEFAULT_BASE_URL, api_key, DEFAULT_MODEL.to_string())
    }

    pub fn with_base_url(base_url: &str, api_key: String, model: String) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(120)).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
        })
    }

    pub fn from_settings(settings: &LlmSettings) -> Result<Self> {
        Self::with_base_url(
            &settings.gemini_base_url,
            settings.gemini_api_key.clone(),
            settings.gemini_model.clone(),
        )
    }
}

#[async_trait]
impl LlmBackend for GeminiBackend {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: &request.prompt,
                }],
            }],
            generation_config: GenerationConfig {
                response_mime_type: request.json.then_some("application/json"),
                response_schema: request.response_schema.as_ref(),
            },
        };

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response.json().await?;
        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(Error::Provider("Gemini returned no content".to_string()));
        }
        tracing::debug!(model = %self.model, chars = text.len(), "Gemini response");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    #[tokio::test]
    async fn test_complete_sends_json_mime_type_and_schema() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/models/gemini-2.0-flash:generateContent")
            .match_query(Matcher::UrlEncoded("key".into(), "g-key".into()))
            .match_body(Matcher::PartialJson(json!({
                "contents": [{"parts": [{"text": "rank these"}]}],
                "generationConfig": {
                    "responseMimeType": "application/json",
                    "responseSchema": {"type": "ARRAY"}
                }
            })))
            .with_status(200)
            .with_body(r#"{"candidates":[{"content":{"parts":[{"text":"[{\"ticker\":\"X\"}]"}]}}]}"#)
            .create_async()
            .await;

        let backend =
            GeminiBackend::with_base_url(&server.url(), "g-key".to_string(), DEFAULT_MODEL.to_string())
                .unwrap();
        let text = backend
            .complete(&CompletionRequest::new("rank these").with_schema(json!({"type": "ARRAY"})))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(text, r#"[{"ticker":"X"}]"#);
    }

    #[tokio::test]
    async fn test_text_request_omits_mime_type() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/models/gemini-2.0-flash:generateContent")
            .match_query(Matcher::Any)
            .match_body(Matcher::Json(json!({
                "contents": [{"parts": [{"text": "score it"}]}],
                "generationConfig": {}
            })))
            .with_status(200)
            .with_body(r#"{"candidates":[{"content":{"parts":[{"text":"SCORE: 70"}]}}]}"#)
            .create_async()
            .await;

        let backend =
            GeminiBackend::with_base_url(&server.url(), "g".to_string(), DEFAULT_MODEL.to_string()).unwrap();
        let text = backend.complete(&CompletionRequest::text("score it")).await.unwrap();

        mock.assert_async().await;
        assert_eq!(text, "SCORE: 70");
    }

    #[tokio::test]
    async fn test_complete_reports_http_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", Matcher::Any)
            .match_query(Matcher::Any)
            .with_status(503)
            .with_body("overloaded")
            .create_async()
            .await;

        let backend =
            GeminiBackend::with_base_url(&server.url(), "g".to_string(), DEFAULT_MODEL.to_string()).unwrap();
        let result = backend.complete(&CompletionRequest::new("x")).await;
        assert!(matches!(result, Err(Error::Http { status: 503, .. })));
    }

    #[tokio::test]
    async fn test_complete_without_candidates_is_provider_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", Matcher::Any)
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"candidates":[]}"#)
            .create_async()
            .await;

        let backend =
            GeminiBackend::with_base_url(&server.url(), "g".to_string(), DEFAULT_MODEL.to_string()).unwrap();
        let result = backend.complete(&CompletionRequest::new("x")).await;
        assert!(matches!(result, Err(Error::Provider(_))));
    }
}
