//! Reply strategy for plain text messages.
//!
//! A message is answered by the first tier that gets all of its parts out:
//! chunked conversion with attachments, then a one-shot conversion cut into
//! fixed-size pieces, then a single error notice.

use anyhow::Result;
use tracing::{error, info, warn};

use crate::format::split::split_fixed;
use crate::format::{escape_code, Attachment, Chunk, Formatter};
use crate::platform::Replier;

/// Which tier answered a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Formatted { parts: usize },
    Fallback { parts: usize },
    ErrorNotice,
    /// Even the error notice could not be sent.
    Failed,
}

pub struct Responder<'a> {
    replier: &'a dyn Replier,
    formatter: &'a dyn Formatter,
    fallback_chunk_len: usize,
}

impl<'a> Responder<'a> {
    pub fn new(
        replier: &'a dyn Replier,
        formatter: &'a dyn Formatter,
        fallback_chunk_len: usize,
    ) -> Self {
        Self {
            replier,
            formatter,
            fallback_chunk_len,
        }
    }

    pub async fn respond(&self, chat_id: i64, text: &str) -> Delivery {
        self.replier.typing(chat_id).await;

        let primary_err = match self.send_formatted(chat_id, text).await {
            Ok(parts) => return Delivery::Formatted { parts },
            Err(e) => e,
        };
        warn!("Formatted reply failed, using fallback: {:#}", primary_err);

        let fallback_err = match self.send_fallback(chat_id, text).await {
            Ok(parts) => return Delivery::Fallback { parts },
            Err(e) => e,
        };
        error!("Error formatting message: {:#}", fallback_err);

        match self
            .replier
            .send_markdown(chat_id, &error_notice(&format!("{:#}", fallback_err)))
            .await
        {
            Ok(()) => Delivery::ErrorNotice,
            Err(e) => {
                error!("Failed to send error notice: {:#}", e);
                Delivery::Failed
            }
        }
    }

    async fn send_formatted(&self, chat_id: i64, text: &str) -> Result<usize> {
        let chunks = self.formatter.telegramify(text)?;
        let total = chunks.len();

        for (i, chunk) in chunks.into_iter().enumerate() {
            let header = part_header(i + 1, total);
            match chunk {
                Chunk::Text(body) => {
                    self.replier
                        .send_markdown(chat_id, &format!("{header}{body}"))
                        .await?
                }
                Chunk::Photo(photo) => {
                    self.replier
                        .send_photo(chat_id, &with_header(photo, &header))
                        .await?
                }
                Chunk::Document(document) => {
                    self.replier
                        .send_document(chat_id, &with_header(document, &header))
                        .await?
                }
            }
        }

        info!("Sent formatted reply in {} part(s)", total);
        Ok(total)
    }

    async fn send_fallback(&self, chat_id: i64, text: &str) -> Result<usize> {
        let formatted = self.formatter.markdownify(text)?;

        let pieces = if formatted.chars().count() > self.fallback_chunk_len {
            split_fixed(&formatted, self.fallback_chunk_len)
        } else {
            vec![formatted]
        };
        let total = pieces.len();

        for (i, piece) in pieces.iter().enumerate() {
            let header = part_header(i + 1, total);
            self.replier
                .send_markdown(chat_id, &format!("{header}{piece}"))
                .await?;
        }

        info!("Sent fallback reply in {} part(s)", total);
        Ok(total)
    }
}

/// Bold `Part i/N` line, empty for single-part replies.
pub fn part_header(index: usize, total: usize) -> String {
    if total > 1 {
        format!("*Part {index}/{total}*\n\n")
    } else {
        String::new()
    }
}

fn with_header(mut attachment: Attachment, header: &str) -> Attachment {
    if !header.is_empty() {
        attachment.caption = format!("{}{}", header, attachment.caption)
            .trim_end()
            .to_string();
    }
    attachment
}

pub fn error_notice(error: &str) -> String {
    format!(
        "❌ Sorry, I couldn't format your message\\. Error: `{}`",
        escape_code(error)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{AttachmentSource, FormatError, MarkdownFormatter};
    use crate::testing::{RecordingReplier, Sent};

    /// Formatter with scripted results for each entry point.
    struct ScriptedFormatter {
        chunks: Option<Vec<Chunk>>,
        single: Option<String>,
    }

    impl Formatter for ScriptedFormatter {
        fn telegramify(&self, _markdown: &str) -> Result<Vec<Chunk>, FormatError> {
            self.chunks.clone().ok_or(FormatError::Empty)
        }

        fn markdownify(&self, _markdown: &str) -> Result<String, FormatError> {
            self.single.clone().ok_or(FormatError::Empty)
        }
    }

    fn attachment(name: &str) -> Attachment {
        Attachment {
            file_name: name.to_string(),
            source: AttachmentSource::Bytes(Vec::new()),
            caption: String::new(),
        }
    }

    #[tokio::test]
    async fn test_single_chunk_has_no_header() {
        let replier = RecordingReplier::default();
        let formatter = MarkdownFormatter::default();
        let responder = Responder::new(&replier, &formatter, 4000);

        let delivery = responder.respond(42, "# Hi\n**bold**").await;

        assert_eq!(delivery, Delivery::Formatted { parts: 1 });
        assert_eq!(
            replier.sent(),
            vec![Sent::Text("📌 *Hi*\n\n*bold*".to_string())]
        );
    }

    #[tokio::test]
    async fn test_multiple_chunks_are_numbered() {
        let replier = RecordingReplier::default();
        let formatter = ScriptedFormatter {
            chunks: Some(vec![
                Chunk::Text("one".into()),
                Chunk::Text("two".into()),
                Chunk::Text("three".into()),
            ]),
            single: None,
        };
        let responder = Responder::new(&replier, &formatter, 4000);

        let delivery = responder.respond(1, "ignored").await;

        assert_eq!(delivery, Delivery::Formatted { parts: 3 });
        assert_eq!(
            replier.sent(),
            vec![
                Sent::Text("*Part 1/3*\n\none".into()),
                Sent::Text("*Part 2/3*\n\ntwo".into()),
                Sent::Text("*Part 3/3*\n\nthree".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_attachments_routed_by_kind() {
        let replier = RecordingReplier::default();
        let formatter = ScriptedFormatter {
            chunks: Some(vec![
                Chunk::Photo(attachment("diagram.png")),
                Chunk::Document(attachment("code.rs")),
            ]),
            single: None,
        };
        let responder = Responder::new(&replier, &formatter, 4000);

        responder.respond(1, "ignored").await;

        assert_eq!(
            replier.sent(),
            vec![
                Sent::Photo("*Part 1/2*".into()),
                Sent::Document("*Part 2/2*".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_formatter_error_uses_fallback() {
        let replier = RecordingReplier::default();
        let formatter = ScriptedFormatter {
            chunks: None,
            single: Some("plain".into()),
        };
        let responder = Responder::new(&replier, &formatter, 4000);

        let delivery = responder.respond(1, "ignored").await;

        assert_eq!(delivery, Delivery::Fallback { parts: 1 });
        assert_eq!(replier.sent(), vec![Sent::Text("plain".into())]);
    }

    #[tokio::test]
    async fn test_send_error_uses_fallback() {
        let replier = RecordingReplier::rejecting("rich");
        let formatter = ScriptedFormatter {
            chunks: Some(vec![Chunk::Text("rich".into())]),
            single: Some("simple".into()),
        };
        let responder = Responder::new(&replier, &formatter, 4000);

        let delivery = responder.respond(1, "ignored").await;

        assert_eq!(delivery, Delivery::Fallback { parts: 1 });
        assert_eq!(replier.sent(), vec![Sent::Text("simple".into())]);
    }

    #[tokio::test]
    async fn test_long_fallback_split_into_fixed_pieces() {
        let replier = RecordingReplier::default();
        let formatter = ScriptedFormatter {
            chunks: None,
            single: Some("x".repeat(650)),
        };
        let responder = Responder::new(&replier, &formatter, 300);

        let delivery = responder.respond(1, "ignored").await;

        assert_eq!(delivery, Delivery::Fallback { parts: 3 });
        let sent = replier.sent();
        assert_eq!(sent.len(), 3);
        assert_eq!(
            sent[0],
            Sent::Text(format!("*Part 1/3*\n\n{}", "x".repeat(300)))
        );
        assert_eq!(
            sent[2],
            Sent::Text(format!("*Part 3/3*\n\n{}", "x".repeat(50)))
        );
    }

    #[tokio::test]
    async fn test_both_failing_sends_one_error_notice() {
        let replier = RecordingReplier::default();
        let formatter = ScriptedFormatter {
            chunks: None,
            single: None,
        };
        let responder = Responder::new(&replier, &formatter, 4000);

        let delivery = responder.respond(1, "ignored").await;

        assert_eq!(delivery, Delivery::ErrorNotice);
        assert_eq!(
            replier.sent(),
            vec![Sent::Text(
                "❌ Sorry, I couldn't format your message\\. Error: `message has no content to format`"
                    .into()
            )]
        );
    }

    #[tokio::test]
    async fn test_error_notice_failure_is_reported() {
        let replier = RecordingReplier::rejecting("");
        let formatter = MarkdownFormatter::default();
        let responder = Responder::new(&replier, &formatter, 4000);

        let delivery = responder.respond(1, "hello").await;

        assert_eq!(delivery, Delivery::Failed);
        assert!(replier.sent().is_empty());
    }

    #[test]
    fn test_error_notice_escapes_code_span() {
        assert_eq!(
            error_notice("bad `tick` \\ here"),
            "❌ Sorry, I couldn't format your message\\. Error: `bad \\`tick\\` \\\\ here`"
        );
    }

    #[test]
    fn test_part_header() {
        assert_eq!(part_header(1, 1), "");
        assert_eq!(part_header(2, 5), "*Part 2/5*\n\n");
    }
}
