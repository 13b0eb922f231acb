//! Bot dispatcher: turns inbound messages into transfers and answers with the outcome.
//!
//! The dispatcher owns no transfer logic. It decides what an inbound message is
//! ([`Intake`]), hands documents to the shared [`TransferCoordinator`] on their
//! own tasks, and reports each [`TransferOutcome`] back to the chat verbatim by
//! editing the "Preparing" status message it sent on acceptance.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use release_relay_core::contract::{
    ArtifactRepository, ByteSource, SourceRef, TransferOutcome, TransferRequest,
};
use release_relay_core::TransferCoordinator;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::naming::{matching_extension, sanitize_file_name, TagPolicy};
use crate::telegram::{Message, Update};

pub const HELP_TEXT: &str =
    "👋 Send me a file and I will upload it to GitHub Releases for you.";

/// Chat side of the bot.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Next batch of updates at or after `offset`.
    async fn poll_updates(&self, offset: Option<i64>) -> Result<Vec<Update>>;

    /// Send an HTML-formatted reply to `reply_to` in `chat_id`; returns the new message id.
    async fn reply(&self, chat_id: i64, reply_to: i64, html: &str) -> Result<i64>;

    /// Replace the text of a message the bot sent earlier.
    async fn edit(&self, chat_id: i64, message_id: i64, html: &str) -> Result<()>;
}

/// What an inbound message asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intake {
    Help,
    WrongType { file_name: String },
    Transfer(TransferRequest),
}

/// Which documents are accepted and where they go.
#[derive(Debug, Clone)]
pub struct IntakeRules {
    pub allowed_extensions: Vec<String>,
    pub tag_policy: TagPolicy,
}

impl IntakeRules {
    pub fn classify(&self, message: &Message, now: DateTime<Utc>) -> Intake {
        let Some(document) = &message.document else {
            return Intake::Help;
        };
        let raw_name = document.file_name.as_deref().unwrap_or("file.bin");
        let Some(ext) = matching_extension(raw_name, &self.allowed_extensions) else {
            return Intake::WrongType {
                file_name: raw_name.to_string(),
            };
        };
        let required_ext = (!ext.is_empty()).then_some(ext);
        Intake::Transfer(TransferRequest {
            source_ref: SourceRef::new(document.file_id.clone()),
            target_name: sanitize_file_name(raw_name, required_ext),
            bucket_tag: self.tag_policy.tag_for(now),
        })
    }
}

pub(crate) fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Chat text for a finished transfer. `release_page` is the bucket's browse URL.
pub fn format_outcome(tag: &str, outcome: &TransferOutcome, release_page: Option<&str>) -> String {
    match outcome {
        TransferOutcome::Success(descriptor) => {
            let mut text = format!(
                "✅ Upload complete!\nTag: <code>{}</code>\nFile: <b>{}</b>\n👉 {}",
                escape_html(tag),
                escape_html(&descriptor.name),
                escape_html(&descriptor.download_url),
            );
            if let Some(page) = release_page {
                text.push_str(&format!("\nRelease page: {}", escape_html(page)));
            }
            text
        }
        TransferOutcome::Failure { kind, message } => format!(
            "❌ Upload failed ({kind}): {}",
            escape_html(message)
        ),
    }
}

pub struct Dispatcher<M: ?Sized, S: ?Sized, R: ?Sized> {
    messenger: Arc<M>,
    coordinator: Arc<TransferCoordinator<S, R>>,
    rules: IntakeRules,
    poll_retry_delay: Duration,
}

impl<M, S, R> Dispatcher<M, S, R>
where
    M: Messenger + ?Sized + 'static,
    S: ByteSource + ?Sized + 'static,
    R: ArtifactRepository + ?Sized + 'static,
{
    pub fn new(
        messenger: Arc<M>,
        coordinator: Arc<TransferCoordinator<S, R>>,
        rules: IntakeRules,
    ) -> Self {
        Self {
            messenger,
            coordinator,
            rules,
            poll_retry_delay: Duration::from_secs(3),
        }
    }

    /// Pause after a failed poll before trying again.
    pub fn with_poll_retry_delay(mut self, delay: Duration) -> Self {
        self.poll_retry_delay = delay;
        self
    }

    /// Poll and dispatch until `shutdown` resolves. In-flight transfers are
    /// aborted on shutdown, which closes their source streams.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        let mut transfers = JoinSet::new();
        let mut offset: Option<i64> = None;
        info!("Dispatcher polling for updates");

        loop {
            let polled = tokio::select! {
                _ = &mut shutdown => break,
                polled = self.messenger.poll_updates(offset) => polled,
            };

            while let Some(joined) = transfers.try_join_next() {
                if let Err(e) = joined {
                    error!(error = %e, "Transfer task ended abnormally");
                }
            }

            let updates = match polled {
                Ok(updates) => updates,
                Err(e) => {
                    warn!(error = %e, "Polling for updates failed");
                    tokio::select! {
                        _ = &mut shutdown => break,
                        _ = tokio::time::sleep(self.poll_retry_delay) => continue,
                    }
                }
            };

            for update in updates {
                offset = Some(update.update_id + 1);
                if let Some(message) = update.message {
                    self.dispatch(message, &mut transfers).await;
                }
            }
        }

        info!(in_flight = transfers.len(), "Dispatcher stopping");
        transfers.shutdown().await;
    }

    async fn dispatch(&self, message: Message, transfers: &mut JoinSet<()>) {
        let chat_id = message.chat.id;
        let message_id = message.message_id;
        match self.rules.classify(&message, Utc::now()) {
            Intake::Help => {
                self.send(chat_id, message_id, HELP_TEXT).await;
            }
            Intake::WrongType { file_name } => {
                info!(file_name = %file_name, "Rejected document with unsupported extension");
                let allowed = self.rules.allowed_extensions.join(", ");
                let text = format!("❗ Please send a file of type: {}", escape_html(&allowed));
                self.send(chat_id, message_id, &text).await;
            }
            Intake::Transfer(request) => {
                info!(
                    chat_id,
                    name = %request.target_name,
                    tag = %request.bucket_tag,
                    "Accepted document for transfer"
                );
                let status = self
                    .send(chat_id, message_id, "⏳ Preparing upload to GitHub Releases...")
                    .await;
                let messenger = self.messenger.clone();
                let coordinator = self.coordinator.clone();
                transfers.spawn(async move {
                    let report = coordinator.run(&request).await;
                    let text = format_outcome(
                        &request.bucket_tag,
                        &report.outcome,
                        report.bucket_url.as_deref(),
                    );
                    report_outcome(messenger.as_ref(), chat_id, message_id, status, &text).await;
                });
            }
        }
    }

    async fn send(&self, chat_id: i64, reply_to: i64, text: &str) -> Option<i64> {
        match self.messenger.reply(chat_id, reply_to, text).await {
            Ok(sent) => Some(sent),
            Err(e) => {
                warn!(error = %e, chat_id, "Failed to send reply");
                None
            }
        }
    }
}

/// Rewrite the status message with the outcome, or reply if there is none to edit.
async fn report_outcome<M: Messenger + ?Sized>(
    messenger: &M,
    chat_id: i64,
    reply_to: i64,
    status: Option<i64>,
    text: &str,
) {
    if let Some(status) = status {
        match messenger.edit(chat_id, status, text).await {
            Ok(()) => return,
            Err(e) => warn!(error = %e, chat_id, status, "Failed to edit status message"),
        }
    }
    if let Err(e) = messenger.reply(chat_id, reply_to, text).await {
        error!(error = %e, chat_id, "Failed to report transfer outcome");
    }
}
