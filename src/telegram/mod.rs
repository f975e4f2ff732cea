// Telegram adapter
// Routes chat updates to commands or the query service and sends the replies


use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::{ConfigError, TelegramConfig};
use crate::rag::QueryError;

pub const START_MESSAGE: &str = "👋 Hello! I am a legal assistant. How can I help?";
pub const HELP_MESSAGE: &str =
    "📚 Legal Assistant\n\nSend your question about legal matters and I will answer it.";
pub const SEARCHING_MESSAGE: &str = "🔍 Searching for information...";
pub const APOLOGY_MESSAGE: &str = "❌ Failed to process your query. Please try again later.";

const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to send message to chat {chat_id}: {message}")]
    Send { chat_id: i64, message: String },
    #[error("Send task failed: {0}")]
    Task(String),
}

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("unrecognized request")]
    UnrecognizedRequest,
    #[error("malformed update: {0}")]
    MalformedBody(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Message {
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

/// Incoming chat update, reduced to the fields the bot reads
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Update {
    #[serde(default)]
    pub update_id: Option<i64>,
    #[serde(default)]
    pub message: Option<Message>,
}

/// Result of handling one update, serialized with a `status` tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum UpdateOutcome {
    Ignored { reason: String },
    Command { command: String },
    Success { query: String },
    Error { error: String },
}

impl UpdateOutcome {
    fn ignored(reason: &str) -> Self {
        Self::Ignored {
            reason: reason.to_string(),
        }
    }
}

/// Sends text messages to a chat
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), TransportError>;
}

/// Answers a question in plain text
#[async_trait]
pub trait Answerer: Send + Sync {
    async fn answer(&self, question: &str) -> Result<String, QueryError>;
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
    parse_mode: &'a str,
}

/// [`ChatTransport`] backed by the Telegram Bot API
#[derive(Clone)]
pub struct TelegramClient {
    send_url: Url,
    agent: ureq::Agent,
}

impl fmt::Debug for TelegramClient {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramClient")
            .field("host", &self.send_url.host_str())
            .finish_non_exhaustive()
    }
}

impl TelegramClient {
    #[inline]
    pub fn new(api_url: &Url, token: &str) -> Result<Self, url::ParseError> {
        let send_url = api_url.join(&format!("/bot{}/sendMessage", token))?;

        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS)))
            .build()
            .into();

        Ok(Self { send_url, agent })
    }

    /// Client for the configured API URL and bot token
    #[inline]
    pub fn from_config(config: &TelegramConfig) -> Result<Self, ConfigError> {
        let token = config.token()?;
        let api_url = config.api_url()?;
        Self::new(&api_url, token).map_err(|_| ConfigError::InvalidUrl(config.api_url.clone()))
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        self
    }

    fn send_blocking(&self, chat_id: i64, text: &str) -> Result<(), TransportError> {
        let payload = serde_json::to_string(&SendMessageRequest {
            chat_id,
            text,
            parse_mode: "Markdown",
        })
        .map_err(|e| TransportError::Send {
            chat_id,
            message: e.to_string(),
        })?;

        // The URL carries the bot token, so it is never logged
        self.agent
            .post(self.send_url.as_str())
            .header("Content-Type", "application/json")
            .send(&payload)
            .map_err(|e| TransportError::Send {
                chat_id,
                message: e.to_string(),
            })?;

        debug!("Sent {} characters to chat {}", text.len(), chat_id);
        Ok(())
    }
}

#[async_trait]
impl ChatTransport for TelegramClient {
    #[inline]
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), TransportError> {
        let client = self.clone();
        let text = text.to_string();

        tokio::task::spawn_blocking(move || client.send_blocking(chat_id, &text))
            .await
            .map_err(|e| TransportError::Task(e.to_string()))?
    }
}

fn format_answer(answer: &str) -> String {
    format!("Answer:\n\n{}", answer)
}

async fn reply_to_command(
    transport: &dyn ChatTransport,
    chat_id: i64,
    command: &str,
    text: &str,
) -> UpdateOutcome {
    match transport.send_message(chat_id, text).await {
        Ok(()) => UpdateOutcome::Command {
            command: command.to_string(),
        },
        Err(e) => {
            error!("Failed to reply to /{} in chat {}: {}", command, chat_id, e);
            UpdateOutcome::Error {
                error: e.to_string(),
            }
        }
    }
}

async fn answer_question(
    transport: &dyn ChatTransport,
    answerer: &dyn Answerer,
    chat_id: i64,
    question: &str,
) -> Result<(), crate::RagError> {
    transport.send_message(chat_id, SEARCHING_MESSAGE).await?;
    let answer = answerer.answer(question).await?;
    transport
        .send_message(chat_id, &format_answer(&answer))
        .await?;
    Ok(())
}

/// Handle one chat update.
///
/// Never fails: every path ends in an [`UpdateOutcome`]. The apology sent
/// after a failed query is best-effort and its own failure is only logged.
#[inline]
pub async fn process_update(
    update: &Update,
    answerer: &dyn Answerer,
    transport: &dyn ChatTransport,
) -> UpdateOutcome {
    let Some(message) = &update.message else {
        debug!("Ignoring update {:?} without a message", update.update_id);
        return UpdateOutcome::ignored("not a message");
    };
    let Some(text) = &message.text else {
        debug!("Ignoring message without text in chat {}", message.chat.id);
        return UpdateOutcome::ignored("no text in message");
    };
    let chat_id = message.chat.id;

    if text.starts_with("/start") {
        return reply_to_command(transport, chat_id, "start", START_MESSAGE).await;
    }
    if text.starts_with("/help") {
        return reply_to_command(transport, chat_id, "help", HELP_MESSAGE).await;
    }

    info!("Answering question from chat {}", chat_id);

    match answer_question(transport, answerer, chat_id, text).await {
        Ok(()) => UpdateOutcome::Success {
            query: text.clone(),
        },
        Err(e) => {
            error!("Failed to process query from chat {}: {}", chat_id, e);
            if let Err(send_error) = transport.send_message(chat_id, APOLOGY_MESSAGE).await {
                warn!(
                    "Failed to notify chat {} about the error: {}",
                    chat_id, send_error
                );
            }
            UpdateOutcome::Error {
                error: e.to_string(),
            }
        }
    }
}

/// Parse a webhook event carrying `httpMethod` and `body`
#[inline]
pub fn parse_webhook_event(event: &Value) -> Result<Update, WebhookError> {
    let is_post = event.get("httpMethod").and_then(Value::as_str) == Some("POST");
    let body = match event.get("body") {
        Some(body) if is_post => body,
        _ => return Err(WebhookError::UnrecognizedRequest),
    };

    let parsed = match body {
        Value::String(raw) => serde_json::from_str(raw),
        Value::Object(_) => Update::deserialize(body),
        other => {
            return Err(WebhookError::MalformedBody(format!(
                "expected a JSON object or string, got {}",
                other
            )));
        }
    };

    parsed.map_err(|e| WebhookError::MalformedBody(e.to_string()))
}

/// Parse a webhook event and process the update it carries
#[inline]
pub async fn handle_webhook(
    event: &Value,
    answerer: &dyn Answerer,
    transport: &dyn ChatTransport,
) -> Result<UpdateOutcome, WebhookError> {
    let update = parse_webhook_event(event).inspect_err(|e| warn!("Rejected webhook: {}", e))?;
    Ok(process_update(&update, answerer, transport).await)
}
