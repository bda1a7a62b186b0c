//! Test doubles shared by the unit tests.

use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::format::Attachment;
use crate::platform::Replier;

/// One call recorded by [`RecordingReplier`].
#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Text(String),
    /// Caption of a photo.
    Photo(String),
    /// Caption of a document.
    Document(String),
}

/// Replier that keeps every successful send in memory.
#[derive(Default)]
pub struct RecordingReplier {
    sent: Mutex<Vec<Sent>>,
    /// Reject any text containing this marker, the way Telegram rejects
    /// malformed markup.
    reject: Option<&'static str>,
}

impl RecordingReplier {
    pub fn rejecting(marker: &'static str) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            reject: Some(marker),
        }
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Replier for RecordingReplier {
    async fn typing(&self, _chat_id: i64) {}

    async fn send_markdown(&self, _chat_id: i64, text: &str) -> Result<()> {
        if let Some(marker) = self.reject {
            if text.contains(marker) {
                bail!("Bad Request: can't parse entities");
            }
        }
        self.sent.lock().unwrap().push(Sent::Text(text.to_string()));
        Ok(())
    }

    async fn send_photo(&self, _chat_id: i64, photo: &Attachment) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push(Sent::Photo(photo.caption.clone()));
        Ok(())
    }

    async fn send_document(&self, _chat_id: i64, document: &Attachment) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push(Sent::Document(document.caption.clone()));
        Ok(())
    }
}
