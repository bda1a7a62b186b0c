pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;

use crate::format::Attachment;

/// A text message received from the transport
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    /// Sender's user id, absent for channel posts
    pub user_id: Option<u64>,
    pub chat_id: i64,
    pub text: String,
}

/// Outbound side of a chat transport. All text and captions are MarkdownV2.
#[async_trait]
pub trait Replier: Send + Sync {
    /// Show a "typing" indicator. Best effort.
    async fn typing(&self, chat_id: i64);

    async fn send_markdown(&self, chat_id: i64, text: &str) -> Result<()>;

    async fn send_photo(&self, chat_id: i64, photo: &Attachment) -> Result<()>;

    async fn send_document(&self, chat_id: i64, document: &Attachment) -> Result<()>;
}
