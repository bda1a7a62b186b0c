use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{ChatAction, InputFile, ParseMode};
use tracing::debug;

use super::Replier;
use crate::format::{Attachment, AttachmentSource};

/// [`Replier`] backed by the Telegram Bot API.
pub struct TelegramReplier {
    bot: Bot,
    http: reqwest::Client,
}

impl TelegramReplier {
    pub fn new(bot: Bot) -> Self {
        Self {
            bot,
            http: reqwest::Client::new(),
        }
    }

    /// Turn an attachment into an uploadable file, fetching remote sources
    /// first so Telegram receives the bytes directly.
    async fn input_file(&self, attachment: &Attachment) -> Result<InputFile> {
        let bytes = match &attachment.source {
            AttachmentSource::Bytes(bytes) => bytes.clone(),
            AttachmentSource::Url(url) => {
                debug!("Downloading attachment from {}", url);
                let response = self
                    .http
                    .get(url)
                    .send()
                    .await
                    .with_context(|| format!("Failed to fetch {}", url))?
                    .error_for_status()
                    .with_context(|| format!("Bad response from {}", url))?;
                response
                    .bytes()
                    .await
                    .context("Failed to read attachment body")?
                    .to_vec()
            }
        };
        Ok(InputFile::memory(bytes).file_name(attachment.file_name.clone()))
    }
}

#[async_trait]
impl Replier for TelegramReplier {
    async fn typing(&self, chat_id: i64) {
        self.bot
            .send_chat_action(ChatId(chat_id), ChatAction::Typing)
            .await
            .ok();
    }

    async fn send_markdown(&self, chat_id: i64, text: &str) -> Result<()> {
        self.bot
            .send_message(ChatId(chat_id), text)
            .parse_mode(ParseMode::MarkdownV2)
            .await
            .context("Failed to send message")?;
        Ok(())
    }

    async fn send_photo(&self, chat_id: i64, photo: &Attachment) -> Result<()> {
        let file = self.input_file(photo).await?;
        let mut request = self.bot.send_photo(ChatId(chat_id), file);
        if !photo.caption.is_empty() {
            request = request
                .caption(photo.caption.clone())
                .parse_mode(ParseMode::MarkdownV2);
        }
        request.await.context("Failed to send photo")?;
        Ok(())
    }

    async fn send_document(&self, chat_id: i64, document: &Attachment) -> Result<()> {
        let file = self.input_file(document).await?;
        let mut request = self.bot.send_document(ChatId(chat_id), file);
        if !document.caption.is_empty() {
            request = request
                .caption(document.caption.clone())
                .parse_mode(ParseMode::MarkdownV2);
        }
        request.await.context("Failed to send document")?;
        Ok(())
    }
}
