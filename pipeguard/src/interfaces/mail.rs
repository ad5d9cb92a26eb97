//! Mail transport used by the notifier.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::PathBuf;
use tracing::info;

use crate::errors::MailError;
use crate::utils::iso_timestamp;

/// A rendered message ready for dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailMessage {
    /// Recipient addresses.
    pub to: Vec<String>,
    /// Subject line.
    pub subject: String,
    /// Plain-text body.
    pub body: String,
    /// Files to attach.
    #[serde(default)]
    pub attachments: Vec<PathBuf>,
}

/// Sends mail.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Sends one message to all of its recipients.
    async fn send(&self, message: &MailMessage) -> Result<(), MailError>;
}

/// Transport that only logs the message.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingMailTransport;

#[async_trait]
impl MailTransport for LoggingMailTransport {
    async fn send(&self, message: &MailMessage) -> Result<(), MailError> {
        info!(
            to = ?message.to,
            subject = %message.subject,
            attachments = message.attachments.len(),
            "Notification dispatched"
        );
        Ok(())
    }
}

/// Transport that writes each message as a file into an outbox directory.
///
/// A mail relay (or a human) picks the files up from there.
#[derive(Debug, Clone)]
pub struct OutboxMailTransport {
    dir: PathBuf,
}

impl OutboxMailTransport {
    /// Creates a transport writing into `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Renders a message in RFC 822 style.
    #[must_use]
    pub fn render(message: &MailMessage) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Date: {}", iso_timestamp());
        let _ = writeln!(out, "To: {}", message.to.join(", "));
        let _ = writeln!(out, "Subject: {}", message.subject);
        for attachment in &message.attachments {
            let _ = writeln!(out, "X-Attachment: {}", attachment.display());
        }
        out.push('\n');
        out.push_str(&message.body);
        out
    }
}

#[async_trait]
impl MailTransport for OutboxMailTransport {
    async fn send(&self, message: &MailMessage) -> Result<(), MailError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| MailError::Delivery(e.to_string()))?;
        let path = self.dir.join(format!("{}.eml", uuid::Uuid::now_v7()));
        tokio::fs::write(&path, Self::render(message))
            .await
            .map_err(|e| MailError::Delivery(e.to_string()))?;
        info!(path = %path.display(), "Notification written to outbox");
        Ok(())
    }
}
