//! Minimal Telegram Bot API client.
//!
//! Covers the three methods the delivery path needs: `sendMessage`,
//! `sendPhoto` (by URL) and `sendVoice` (multipart upload). No webhook or
//! polling machinery; the worker only pushes outbound messages.

use std::time::Duration;

use reqwest::multipart;
use serde_json::json;
use tracing::debug;

pub mod models;

pub use models::{ApiResponse, Chat, Message};

const API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, thiserror::Error)]
pub enum TelegramError {
    #[error("telegram request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The API answered with `ok: false`.
    #[error("telegram api error {code}: {description}")]
    Api { code: i32, description: String },

    /// Rate limited; the API told us how long to back off.
    #[error("telegram rate limited, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },
}

impl TelegramError {
    /// Whether a later retry of the same send could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            TelegramError::Transport(_) | TelegramError::RateLimited { .. } => true,
            // 400 = bad request (malformed chat id, caption too long),
            // 403 = bot blocked by the user. Neither heals on retry.
            TelegramError::Api { code, .. } => !matches!(code, 400 | 403),
        }
    }
}

pub type Result<T> = std::result::Result<T, TelegramError>;

#[derive(Debug, Clone)]
pub struct BotClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl BotClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_base_url(token, API_BASE)
    }

    /// Point the client at a different API host (tests, local bot-api server).
    pub fn with_base_url(token: impl Into<String>, base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.token, method)
    }

    async fn unwrap_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T> {
        let envelope: ApiResponse<T> = response.json().await?;
        if envelope.ok {
            if let Some(result) = envelope.result {
                return Ok(result);
            }
        }
        if let Some(retry_after) = envelope.parameters.and_then(|p| p.retry_after) {
            return Err(TelegramError::RateLimited { retry_after });
        }
        Err(TelegramError::Api {
            code: envelope.error_code.unwrap_or(0),
            description: envelope
                .description
                .unwrap_or_else(|| "unknown error".to_string()),
        })
    }

    /// Send a plain text message.
    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<Message> {
        let response = self
            .http
            .post(self.method_url("sendMessage"))
            .json(&json!({ "chat_id": chat_id, "text": text }))
            .send()
            .await?;
        Self::unwrap_response(response).await
    }

    /// Send a photo by URL with a MarkdownV2 caption.
    pub async fn send_photo(&self, chat_id: i64, photo_url: &str, caption: &str) -> Result<Message> {
        debug!(chat_id, "sending photo");
        let response = self
            .http
            .post(self.method_url("sendPhoto"))
            .json(&json!({
                "chat_id": chat_id,
                "photo": photo_url,
                "caption": caption,
                "parse_mode": "MarkdownV2",
            }))
            .send()
            .await?;
        Self::unwrap_response(response).await
    }

    /// Upload and send a voice note, optionally as a reply.
    pub async fn send_voice(
        &self,
        chat_id: i64,
        voice: Vec<u8>,
        file_name: &str,
        reply_to_message_id: Option<i64>,
    ) -> Result<Message> {
        debug!(chat_id, bytes = voice.len(), "sending voice");
        let part = multipart::Part::bytes(voice)
            .file_name(file_name.to_string())
            .mime_str("audio/mpeg")?;
        let mut form = multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .part("voice", part);
        if let Some(reply_to) = reply_to_message_id {
            form = form.text("reply_to_message_id", reply_to.to_string());
        }
        let response = self
            .http
            .post(self.method_url("sendVoice"))
            .multipart(form)
            .send()
            .await?;
        Self::unwrap_response(response).await
    }
}

/// Escape text for `parse_mode: MarkdownV2`.
///
/// The Bot API rejects the whole message if any reserved character is
/// unescaped, so everything in the reserved set gets a backslash.
pub fn escape_markdown(text: &str) -> String {
    const RESERVED: &[char] = &[
        '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!',
    ];
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if RESERVED.contains(&ch) {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}
