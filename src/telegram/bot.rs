use super::commands::Command;
use super::{escape_html, split_message, Message, TelegramClient, MAX_MESSAGE_CHARS};
use crate::llm::SingleAnalysis;
use crate::models::AnalysisVerdict;
use crate::orchestrator::Orchestrator;
use crate::store::{load_tickers, UserId};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const HELP: &str = "\
Hi! I rank stocks by their chance of a strong intraday trend.
/analyze <TICKER> [YYYY-MM-DD] - analyse one ticker (default: today)
/analyze_all [T1,T2 ...] [YYYY-MM-DD] - rank several tickers (default: the configured list)
/history - past analyses
/setweights feature:value ... - set your feature weights
/myweights - show your weights
/resetweights - back to default weights
/setmyprompt <text> - set your analysis prompt
/myprompt - show your prompt
/prompthistory - your saved prompts
/resetprompt - back to the default prompt";

/// Where replies for one chat go
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn reply(&self, text: &str, html: bool) -> Result<()>;
}

struct ChatReplier<'a> {
    client: &'a TelegramClient,
    chat_id: i64,
}

#[async_trait]
impl<'a> ReplySink for ChatReplier<'a> {
    async fn reply(&self, text: &str, html: bool) -> Result<()> {
        self.client.send_message(self.chat_id, text, html).await
    }
}

pub struct Bot {
    client: TelegramClient,
    orchestrator: Arc<Orchestrator>,
    tickers_path: PathBuf,
}

impl Bot {
    pub fn new(client: TelegramClient, orchestrator: Arc<Orchestrator>, tickers_path: PathBuf) -> Self {
        Self {
            client,
            orchestrator,
            tickers_path,
        }
    }

    /// Long-poll for updates forever; one message is handled at a time
    pub async fn run_polling(&self) -> Result<()> {
        let mut offset = 0;
        tracing::info!("Bot started");

        loop {
            let updates = match self.client.get_updates(offset).await {
                Ok(updates) => updates,
                Err(e) => {
                    tracing::warn!("getUpdates failed: {}; retrying in 5s", e);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                }
            };

            for update in updates {
                offset = offset.max(update.update_id + 1);
                if let Some(message) = update.message {
                    self.handle_message(&message).await;
                }
            }
        }
    }

    pub async fn handle_message(&self, message: &Message) {
        let Some(text) = message.text.as_deref() else {
            return;
        };
        let sink = ChatReplier {
            client: &self.client,
            chat_id: message.chat.id,
        };
        let user = message.from.as_ref().map(|u| u.id);
        self.handle_text(text, user, &sink).await;
    }

    /// Parse and execute one message; failures are reported to the chat
    pub async fn handle_text(&self, text: &str, user: Option<UserId>, sink: &dyn ReplySink) {
        let outcome = match Command::parse(text) {
            None => return,
            Some(Err(usage)) => sink.reply(&usage.0, false).await,
            Some(Ok(command)) => {
                tracing::info!(user = ?user, command = ?command, "Handling command");
                self.execute(command, user, sink).await
            }
        };
        if let Err(e) = outcome {
            tracing::error!("Failed to reply: {}", e);
        }
    }

    async fn execute(&self, command: Command, user: Option<UserId>, sink: &dyn ReplySink) -> Result<()> {
        let orchestrator = &self.orchestrator;
        match command {
            Command::Start => sink.reply(HELP, false).await,
            Command::Analyze { ticker, date } => self.analyze(&ticker, date.as_deref(), user, sink).await,
            Command::AnalyzeAll { tickers, date } => {
                self.analyze_all(tickers, date.as_deref(), user, sink).await
            }
            Command::History => self.history(sink).await,
            Command::SetWeights(weights) => match user {
                Some(user) => {
                    orchestrator.weights().save_weights(user, weights).await?;
                    sink.reply("Your custom weights have been saved!", false).await
                }
                None => sink.reply("Cannot identify user.", false).await,
            },
            Command::MyWeights => {
                let weights = orchestrator.weights().active_weights(user).await;
                if weights.is_empty() {
                    return sink.reply("No weights configured.", false).await;
                }
                let mut text = String::from("Your current weights:\n");
                for (feature, weight) in weights.iter() {
                    text.push_str(&format!("- {}: {}\n", feature, weight));
                }
                sink.reply(&text, false).await
            }
            Command::ResetWeights => {
                let reset = match user {
                    Some(user) => orchestrator.weights().reset_user(user).await?,
                    None => false,
                };
                let text = if reset {
                    "Your weights have been reset to default"
                } else {
                    "No custom weights to reset"
                };
                sink.reply(text, false).await
            }
            Command::SetMyPrompt(prompt) => match user {
                Some(user) => {
                    orchestrator.prompts().save_prompt(user, &prompt).await?;
                    sink.reply("Your custom prompt has been saved!", false).await
                }
                None => sink.reply("Cannot identify user.", false).await,
            },
            Command::MyPrompt => {
                let prompt = orchestrator.prompts().active_prompt(user).await;
                for chunk in split_message(&format!("Your current prompt:\n\n{}", prompt), MAX_MESSAGE_CHARS) {
                    sink.reply(&chunk, false).await?;
                }
                Ok(())
            }
            Command::PromptHistory => {
                let history = match user {
                    Some(user) => orchestrator.prompts().prompt_history(user).await,
                    None => Vec::new(),
                };
                if history.is_empty() {
                    return sink.reply("You have no prompt history", false).await;
                }
                let mut text = String::from("Your prompt history:\n\n");
                for (i, entry) in history.iter().enumerate() {
                    let preview: String = entry.prompt.chars().take(100).collect();
                    text.push_str(&format!(
                        "{}. [{}]:\n{}...\n\n",
                        i + 1,
                        display_timestamp(&entry.timestamp),
                        preview
                    ));
                }
                for chunk in split_message(&text, MAX_MESSAGE_CHARS) {
                    sink.reply(&chunk, false).await?;
                }
                Ok(())
            }
            Command::ResetPrompt => {
                let reset = match user {
                    Some(user) => orchestrator.prompts().reset_user(user).await?,
                    None => false,
                };
                let text = if reset {
                    "Your prompt has been reset to default"
                } else {
                    "No custom prompt to reset"
                };
                sink.reply(text, false).await
            }
            Command::Unknown(name) => {
                sink.reply(
                    &format!("Unknown command /{}. Send /start for the list of commands.", name),
                    false,
                )
                .await
            }
        }
    }

    async fn analyze(
        &self,
        ticker: &str,
        date: Option<&str>,
        user: Option<UserId>,
        sink: &dyn ReplySink,
    ) -> Result<()> {
        let date_key = self.orchestrator.date_key(date)?;
        sink.reply(&format!("Starting analysis of {} for {}...", ticker, date_key), false)
            .await?;

        match self.orchestrator.analyze_single(ticker, date, user).await {
            Ok(report) => match report.analysis {
                SingleAnalysis::Verdict(verdict) => sink.reply(&render_verdict(&verdict), true).await,
                SingleAnalysis::Failed(message) => sink.reply(&message, false).await,
            },
            Err(e) => {
                tracing::error!(ticker, "Error analysing: {}", e);
                sink.reply(&format!("Error while analysing {}.", ticker), false).await
            }
        }
    }

    async fn analyze_all(
        &self,
        tickers: Vec<String>,
        date: Option<&str>,
        user: Option<UserId>,
        sink: &dyn ReplySink,
    ) -> Result<()> {
        let tickers = if tickers.is_empty() {
            match load_tickers(&self.tickers_path) {
                Ok(tickers) => tickers,
                Err(e) => {
                    tracing::error!(path = %self.tickers_path.display(), "Cannot load tickers: {}", e);
                    return sink.reply("Could not load the ticker list.", false).await;
                }
            }
        } else {
            tickers
        };
        if tickers.is_empty() {
            return sink.reply("No tickers to analyse.", false).await;
        }

        let date_key = self.orchestrator.date_key(date)?;
        sink.reply(
            &format!("Starting analysis of tickers for {}: {}", date_key, tickers.join(", ")),
            false,
        )
        .await?;

        let report = match self.orchestrator.analyze_batch(&tickers, date, user).await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!("Error in multi-ticker analysis: {}", e);
                return sink
                    .reply("Batch analysis failed. Please try again later.", false)
                    .await;
            }
        };

        if !report.dropped.is_empty() {
            let names: Vec<_> = report.dropped.iter().map(|d| d.ticker.as_str()).collect();
            sink.reply(&format!("Skipped (data unavailable): {}", names.join(", ")), false)
                .await?;
        }
        for verdict in report.ranked.iter() {
            sink.reply(&render_verdict(verdict), true).await?;
        }
        if !report.missing.is_empty() {
            sink.reply(
                &format!("No verdict returned for: {}", report.missing.join(", ")),
                false,
            )
            .await?;
        }
        Ok(())
    }

    async fn history(&self, sink: &dyn ReplySink) -> Result<()> {
        let history = self.orchestrator.history().load().await?;
        if history.is_empty() {
            return sink.reply("Analysis history is empty.", false).await;
        }

        let mut text = String::from("<b>Analysis history:</b>\n\n");
        for (ticker, dates) in &history {
            text.push_str(&format!("<b>{}</b>:\n", escape_html(ticker)));
            for (date, entry) in dates {
                let probability = entry.probability().unwrap_or_else(|| "N/A".to_string());
                text.push_str(&format!("  - {}: {}\n", escape_html(date), escape_html(&probability)));
            }
            text.push('\n');
        }
        for chunk in split_message(&text, MAX_MESSAGE_CHARS) {
            sink.reply(&chunk, true).await?;
        }
        Ok(())
    }
}

/// `<b>TICKER</b>` followed by the verdict as pretty JSON
pub fn render_verdict(verdict: &AnalysisVerdict) -> String {
    let pretty = serde_json::to_string_pretty(verdict).unwrap_or_default();
    format!(
        "<b>{}</b>\n<pre>{}</pre>",
        escape_html(&verdict.ticker),
        escape_html(&pretty)
    )
}

fn display_timestamp(raw: &str) -> String {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.format("%Y-%m-%d %H:%M").to_string();
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|_| raw.to_string())
}
