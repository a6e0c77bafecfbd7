// Telegram Bot API front-end: long polling, command parsing, replies

pub mod bot;
pub mod commands;

pub use bot::{Bot, ReplySink};
pub use commands::{Command, UsageError};

use crate::config::TelegramSettings;
use crate::{Error, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Telegram caps messages at 4096 characters
pub const MAX_MESSAGE_CHARS: usize = 4000;

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    pub from: Option<User>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct User {
    pub id: i64,
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'static str>,
}

/// Minimal Bot API client (`getUpdates`, `sendMessage`)
#[derive(Clone)]
pub struct TelegramClient {
    client: Client,
    base_url: String,
    token: String,
    poll_timeout_secs: u64,
}

impl TelegramClient {
    pub fn new(settings: &TelegramSettings) -> Result<Self> {
        Self::with_base_url(&settings.base_url, settings.token.clone(), settings.poll_timeout_secs)
    }

    pub fn with_base_url(base_url: &str, token: String, poll_timeout_secs: u64) -> Result<Self> {
        // the HTTP timeout must outlive the long-poll window
        let client = Client::builder()
            .timeout(Duration::from_secs(poll_timeout_secs + 15))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            poll_timeout_secs,
        })
    }

    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        let query = [
            ("offset", offset.to_string()),
            ("timeout", self.poll_timeout_secs.to_string()),
            ("allowed_updates", r#"["message"]"#.to_string()),
        ];
        let request = self.client.get(self.method_url("getUpdates")).query(&query);
        self.call(request).await
    }

    pub async fn send_message(&self, chat_id: i64, text: &str, html: bool) -> Result<()> {
        let body = SendMessage {
            chat_id,
            text,
            parse_mode: html.then_some("HTML"),
        };
        let request = self.client.post(self.method_url("sendMessage")).json(&body);
        let _: serde_json::Value = self.call(request).await?;
        Ok(())
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.token, method)
    }

    async fn call<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        let response = request.send().await?;
        let status = response.status();
        let body: ApiResponse<T> = response.json().await.map_err(|e| {
            if status.is_success() {
                Error::from(e)
            } else {
                Error::Http {
                    status: status.as_u16(),
                    body: e.to_string(),
                }
            }
        })?;

        match body {
            ApiResponse {
                ok: true,
                result: Some(result),
                ..
            } => Ok(result),
            ApiResponse { description, .. } => Err(Error::Provider(format!(
                "Telegram API error ({}): {}",
                status,
                description.unwrap_or_default()
            ))),
        }
    }
}

/// Escape text for HTML parse mode
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

/// Split on line boundaries into chunks of at most `max_chars`
pub fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0;

    for line in text.split_inclusive('\n') {
        let mut line = line;
        loop {
            let line_chars = line.chars().count();
            if current_chars + line_chars <= max_chars {
                current.push_str(line);
                current_chars += line_chars;
                break;
            }
            if current_chars > 0 {
                chunks.push(std::mem::take(&mut current));
                current_chars = 0;
                continue;
            }
            // a single line longer than the limit
            let split = line
                .char_indices()
                .nth(max_chars)
                .map(|(i, _)| i)
                .unwrap_or(line.len());
            chunks.push(line[..split].to_string());
            line = &line[split..];
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
