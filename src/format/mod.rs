//! Markdown to Telegram MarkdownV2 conversion.
//!
//! Two entry points mirror how replies are built: [`Formatter::markdownify`]
//! renders a message into one string, [`Formatter::telegramify`] renders it
//! into length-bounded chunks and pulls large code blocks and diagrams out as
//! attachments.

pub mod escape;
mod render;
pub mod split;

use serde::Deserialize;
use thiserror::Error;

pub use escape::escape_code;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("message has no content to format")]
    Empty,
}

/// One outbound unit of a formatted reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    /// MarkdownV2 text.
    Text(String),
    Photo(Attachment),
    Document(Attachment),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub source: AttachmentSource,
    /// MarkdownV2 caption, may be empty.
    pub caption: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentSource {
    Bytes(Vec<u8>),
    Url(String),
}

/// Decorations placed in front of rendered elements.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Symbols {
    pub heading_1: String,
    pub heading_2: String,
    pub heading_3: String,
    pub heading_4: String,
    pub link: String,
    pub image: String,
    pub bullet: String,
    pub task_done: String,
    pub task_open: String,
}

impl Default for Symbols {
    fn default() -> Self {
        Self {
            heading_1: "📌".to_string(),
            heading_2: String::new(),
            heading_3: String::new(),
            heading_4: String::new(),
            link: "🔗".to_string(),
            image: "🖼".to_string(),
            bullet: "⦁".to_string(),
            task_done: "✅".to_string(),
            task_open: "☑".to_string(),
        }
    }
}

impl Symbols {
    /// Symbol for a heading level (1-6); levels past 4 share the level 4 symbol.
    pub fn heading(&self, level: usize) -> &str {
        match level {
            1 => &self.heading_1,
            2 => &self.heading_2,
            3 => &self.heading_3,
            _ => &self.heading_4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatOptions {
    pub symbols: Symbols,
    /// Emit long block quotes as expandable quotes.
    pub cite_expandable: bool,
    /// Upper bound in bytes for one text chunk from `telegramify`.
    pub max_chunk_len: usize,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            symbols: Symbols::default(),
            cite_expandable: true,
            max_chunk_len: DEFAULT_CHUNK_LEN,
        }
    }
}

pub const DEFAULT_CHUNK_LEN: usize = 4000;

/// The conversion backend used by the responder.
pub trait Formatter: Send + Sync {
    /// Convert markdown into length-bounded chunks with attachments extracted.
    fn telegramify(&self, markdown: &str) -> Result<Vec<Chunk>, FormatError>;

    /// Convert markdown into a single MarkdownV2 string.
    fn markdownify(&self, markdown: &str) -> Result<String, FormatError>;
}

/// pulldown-cmark backed [`Formatter`].
#[derive(Debug, Clone, Default)]
pub struct MarkdownFormatter {
    options: FormatOptions,
}

impl MarkdownFormatter {
    pub fn new(options: FormatOptions) -> Self {
        Self { options }
    }
}

impl Formatter for MarkdownFormatter {
    fn telegramify(&self, markdown: &str) -> Result<Vec<Chunk>, FormatError> {
        let blocks = render::render(markdown, &self.options, true);
        let chunks = split::pack(blocks, self.options.max_chunk_len);
        if chunks.is_empty() {
            return Err(FormatError::Empty);
        }
        Ok(chunks)
    }

    fn markdownify(&self, markdown: &str) -> Result<String, FormatError> {
        let text = render::render(markdown, &self.options, false)
            .into_iter()
            .filter_map(|block| match block {
                Chunk::Text(text) => Some(text),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n\n");
        if text.is_empty() {
            return Err(FormatError::Empty);
        }
        Ok(text)
    }
}
