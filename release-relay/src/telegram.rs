//! Telegram Bot API client.
//!
//! Plays two roles: as a [`ByteSource`] it resolves a `file_id` through
//! `getFile` and streams the file body; as a [`Messenger`] it long-polls
//! `getUpdates`, answers with `sendMessage` and updates status messages with
//! `editMessageText`. Works against the public Bot API
//! or a self-hosted `telegram-bot-api` server (needed for files above 20 MB).

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use release_relay_core::contract::{ByteSource, SourceBody, SourceRef};
use release_relay_core::stream::bounded_chunks;
use release_relay_core::RelayError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::dispatcher::Messenger;

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub document: Option<Document>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Document {
    pub file_id: String,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct FileJson {
    #[serde(default)]
    file_path: Option<String>,
    #[serde(default)]
    file_size: Option<u64>,
}

/// A file as the Bot API server describes it after `getFile`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelegramFile {
    pub file_path: String,
    pub file_size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

pub struct TelegramClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
    chunk_size: usize,
    poll_timeout_secs: u64,
}

impl TelegramClient {
    pub fn new(api_base: &str, token: String, chunk_size: usize, poll_timeout_secs: u64) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(60))
            .build()
            .context("building Telegram HTTP client")?;
        info!(api_base, chunk_size, "Initialized TelegramClient");
        Ok(TelegramClient {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            token,
            chunk_size,
            poll_timeout_secs,
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    fn file_url(&self, file_path: &str) -> String {
        format!(
            "{}/file/bot{}/{}",
            self.api_base,
            self.token,
            file_path.trim_start_matches('/')
        )
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, payload: &serde_json::Value) -> Result<T> {
        let response = self
            .http
            .post(self.method_url(method))
            .json(payload)
            .send()
            .await
            .with_context(|| format!("Telegram {method} request failed"))?;
        let status = response.status();
        let body: ApiResponse<T> = response
            .json()
            .await
            .with_context(|| format!("Telegram {method} returned unreadable body [{status}]"))?;
        match (body.ok, body.result) {
            (true, Some(result)) => Ok(result),
            _ => anyhow::bail!(
                "Telegram {method} failed [{status}]: {}",
                body.description.unwrap_or_default()
            ),
        }
    }

    /// Drop any webhook so `getUpdates` polling is allowed.
    pub async fn delete_webhook(&self) -> Result<()> {
        self.call::<bool>(
            "deleteWebhook",
            &serde_json::json!({ "drop_pending_updates": true }),
        )
        .await?;
        info!("Webhook removed, polling enabled");
        Ok(())
    }

    /// `getFile` handshake: the server-side path and size of `file_id`.
    pub async fn resolve_file(&self, file_id: &str) -> Result<TelegramFile, RelayError> {
        let response = self
            .http
            .post(self.method_url("getFile"))
            .json(&serde_json::json!({ "file_id": file_id }))
            .send()
            .await
            .map_err(|e| RelayError::Transport(format!("getFile: {e}")))?;
        let status = response.status();
        if status.is_server_error() {
            return Err(RelayError::Transport(format!("getFile failed [{status}]")));
        }
        let body: ApiResponse<FileJson> = response
            .json()
            .await
            .map_err(|e| RelayError::SourceUnavailable(format!("getFile [{status}]: {e}")))?;
        let (path, size) = match body.result {
            Some(file) => (file.file_path, file.file_size),
            None => (None, None),
        };
        match (body.ok, path) {
            (true, Some(file_path)) => Ok(TelegramFile {
                file_path,
                file_size: size,
            }),
            _ => {
                let reason = body.description.unwrap_or_else(|| "no file_path".to_string());
                error!(file_id, %status, reason = %reason, "getFile failed");
                Err(RelayError::SourceUnavailable(format!(
                    "getFile failed [{status}]: {reason}"
                )))
            }
        }
    }
}

#[async_trait]
impl ByteSource for TelegramClient {
    async fn open(&self, source_ref: &SourceRef) -> Result<SourceBody, RelayError> {
        let TelegramFile {
            file_path,
            file_size,
        } = self.resolve_file(source_ref.as_str()).await?;
        debug!(file_path = %file_path, file_size = ?file_size, "Resolved Telegram file");

        let response = self
            .http
            .get(self.file_url(&file_path))
            .send()
            .await
            .map_err(|e| RelayError::Transport(format!("file download: {e}")))?;
        let status = response.status();
        if status.is_server_error() {
            return Err(RelayError::Transport(format!("file download failed [{status}]")));
        }
        if !status.is_success() {
            error!(file_path = %file_path, %status, "Telegram file download refused");
            return Err(RelayError::SourceUnavailable(format!(
                "file download failed [{status}]"
            )));
        }
        let content_length = response.content_length().or(file_size);
        info!(file_path = %file_path, content_length = ?content_length, "Streaming Telegram file");

        let body = response
            .bytes_stream()
            .map(|block| block.map_err(|e| RelayError::SourceInterrupted(format!("file download: {e}"))));
        let stream = bounded_chunks(Box::pin(body), self.chunk_size);
        Ok(SourceBody::new(stream).with_content_length(content_length))
    }
}

#[async_trait]
impl Messenger for TelegramClient {
    async fn poll_updates(&self, offset: Option<i64>) -> Result<Vec<Update>> {
        let mut payload = serde_json::json!({
            "timeout": self.poll_timeout_secs,
            "allowed_updates": ["message"],
        });
        if let Some(offset) = offset {
            payload["offset"] = serde_json::json!(offset);
        }
        self.call("getUpdates", &payload).await
    }

    async fn reply(&self, chat_id: i64, reply_to: i64, html: &str) -> Result<i64> {
        let sent: SentMessage = self
            .call(
                "sendMessage",
                &serde_json::json!({
                    "chat_id": chat_id,
                    "text": html,
                    "parse_mode": "HTML",
                    "reply_to_message_id": reply_to,
                    "disable_web_page_preview": true,
                }),
            )
            .await?;
        Ok(sent.message_id)
    }

    async fn edit(&self, chat_id: i64, message_id: i64, html: &str) -> Result<()> {
        self.call::<serde_json::Value>(
            "editMessageText",
            &serde_json::json!({
                "chat_id": chat_id,
                "message_id": message_id,
                "text": html,
                "parse_mode": "HTML",
                "disable_web_page_preview": true,
            }),
        )
        .await?;
        Ok(())
    }
}
