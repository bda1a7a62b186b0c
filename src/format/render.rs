use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use pulldown_cmark::{
    Alignment, CodeBlockKind, Event, HeadingLevel, Options, Parser, Tag, TagEnd, TextMergeStream,
};
use unicode_width::UnicodeWidthStr;

use super::escape::{escape_code, escape_text, escape_url};
use super::{Attachment, AttachmentSource, Chunk, FormatOptions};

/// Quotes longer than this many lines collapse when expandable quotes are on.
const EXPANDABLE_QUOTE_LINES: usize = 3;
const RULE: &str = "————————";
const MERMAID_ENDPOINT: &str = "https://mermaid.ink/img/";
/// Stands in for a backslash-escaped `|` while parsing, so an escaped `||`
/// is not taken for a spoiler marker.
const ESCAPED_PIPE: char = '\u{E000}';

/// Render markdown into top-level blocks.
///
/// With `attachments` set, mermaid diagrams and code blocks too long for a
/// single message come back as attachment chunks; otherwise everything is
/// rendered inline as text.
pub fn render(markdown: &str, options: &FormatOptions, attachments: bool) -> Vec<Chunk> {
    let mut parser_options = Options::empty();
    parser_options.insert(Options::ENABLE_TABLES);
    parser_options.insert(Options::ENABLE_STRIKETHROUGH);
    parser_options.insert(Options::ENABLE_TASKLISTS);
    parser_options.insert(Options::ENABLE_FOOTNOTES);
    parser_options.insert(Options::ENABLE_MATH);

    let source = mark_escaped_pipes(markdown);
    let parser = TextMergeStream::new(Parser::new_ext(&source, parser_options));
    let mut renderer = Renderer::new(options, attachments);
    for event in parser {
        renderer.event(event);
    }
    renderer.finish()
}

struct CodeBlock {
    lang: String,
    text: String,
}

struct Table {
    alignments: Vec<Alignment>,
    rows: Vec<Vec<String>>,
    row: Vec<String>,
    cell: String,
}

struct Renderer<'a> {
    options: &'a FormatOptions,
    attachments: bool,
    blocks: Vec<Chunk>,
    out: String,
    /// Buffers of enclosing list items and quotes. Empty at top level.
    parents: Vec<String>,
    /// Next number per open list; `None` for bullet lists.
    lists: Vec<Option<u64>>,
    /// Open link targets; `None` when the link sits in a table cell.
    links: Vec<Option<String>>,
    bold: usize,
    italic: usize,
    strike: usize,
    /// Inline depth at which the open spoiler started.
    spoiler: Option<usize>,
    quote_depth: usize,
    code: Option<CodeBlock>,
    table: Option<Table>,
}

impl<'a> Renderer<'a> {
    fn new(options: &'a FormatOptions, attachments: bool) -> Self {
        Self {
            options,
            attachments,
            blocks: Vec::new(),
            out: String::new(),
            parents: Vec::new(),
            lists: Vec::new(),
            links: Vec::new(),
            bold: 0,
            italic: 0,
            strike: 0,
            spoiler: None,
            quote_depth: 0,
            code: None,
            table: None,
        }
    }

    fn event(&mut self, event: Event<'_>) {
        match event {
            Event::Start(tag) => self.start(tag),
            Event::End(tag) => self.end(tag),
            Event::Text(text) => self.text(&text),
            Event::Code(code) | Event::InlineMath(code) => self.inline_code(&verbatim(&code)),
            Event::DisplayMath(math) => {
                self.ensure_line_start();
                self.out.push_str(&pre("", &verbatim(&math)));
                self.out.push('\n');
            }
            Event::Html(html) | Event::InlineHtml(html) => self.plain(&verbatim(&html)),
            Event::FootnoteReference(name) => self.plain(&format!("[^{}]", literal(&name))),
            Event::SoftBreak | Event::HardBreak => match self.table.as_mut() {
                Some(table) => table.cell.push(' '),
                None => self.out.push('\n'),
            },
            Event::Rule => {
                self.ensure_line_start();
                self.out.push_str(RULE);
                self.end_block();
            }
            Event::TaskListMarker(done) => {
                let symbols = &self.options.symbols;
                let symbol = if done {
                    &symbols.task_done
                } else {
                    &symbols.task_open
                };
                if !symbol.is_empty() {
                    self.out.push_str(&escape_text(symbol));
                    self.out.push(' ');
                }
            }
        }
    }

    fn start(&mut self, tag: Tag<'_>) {
        match tag {
            Tag::Paragraph => self.ensure_line_start(),
            Tag::Heading { level, .. } => {
                self.ensure_line_start();
                let symbol = self.options.symbols.heading(heading_level(level));
                if !symbol.is_empty() {
                    self.out.push_str(&escape_text(symbol));
                    self.out.push(' ');
                }
                self.open_bold();
            }
            Tag::BlockQuote(_) => {
                self.parents.push(std::mem::take(&mut self.out));
                self.quote_depth += 1;
            }
            Tag::CodeBlock(kind) => {
                let lang = match kind {
                    CodeBlockKind::Fenced(info) => {
                        info.split_whitespace().next().unwrap_or("").to_string()
                    }
                    CodeBlockKind::Indented => String::new(),
                };
                self.code = Some(CodeBlock {
                    lang,
                    text: String::new(),
                });
            }
            Tag::List(start) => {
                self.ensure_line_start();
                self.lists.push(start);
            }
            Tag::Item => self.parents.push(std::mem::take(&mut self.out)),
            Tag::FootnoteDefinition(name) => {
                self.ensure_line_start();
                self.out.push_str(&escape_text(&format!("[^{}]: ", literal(&name))));
            }
            Tag::Table(alignments) => {
                self.table = Some(Table {
                    alignments,
                    rows: Vec::new(),
                    row: Vec::new(),
                    cell: String::new(),
                });
            }
            Tag::Emphasis if self.table.is_none() => {
                if self.italic == 0 {
                    self.out.push('_');
                }
                self.italic += 1;
            }
            Tag::Strong if self.table.is_none() => self.open_bold(),
            Tag::Strikethrough if self.table.is_none() => {
                if self.strike == 0 {
                    self.out.push('~');
                }
                self.strike += 1;
            }
            Tag::Link { dest_url, .. } => {
                let symbol = self.options.symbols.link.clone();
                self.open_link(&symbol, &literal(&dest_url));
            }
            Tag::Image { dest_url, .. } => {
                let symbol = self.options.symbols.image.clone();
                self.open_link(&symbol, &literal(&dest_url));
            }
            _ => {}
        }
    }

    fn end(&mut self, tag: TagEnd) {
        match tag {
            TagEnd::Paragraph | TagEnd::HtmlBlock | TagEnd::FootnoteDefinition => {
                self.end_block()
            }
            TagEnd::Heading(_) => {
                self.close_bold();
                self.end_block();
            }
            TagEnd::BlockQuote(_) => self.end_quote(),
            TagEnd::CodeBlock => self.end_code_block(),
            TagEnd::List(_) => {
                self.lists.pop();
                self.end_block();
            }
            TagEnd::Item => self.end_item(),
            TagEnd::Table => {
                if let Some(table) = self.table.take() {
                    self.ensure_line_start();
                    self.out.push_str(&pre("", &layout_table(table)));
                    self.end_block();
                }
            }
            TagEnd::TableHead | TagEnd::TableRow => {
                if let Some(table) = self.table.as_mut() {
                    let row = std::mem::take(&mut table.row);
                    table.rows.push(row);
                }
            }
            TagEnd::TableCell => {
                if let Some(table) = self.table.as_mut() {
                    let cell = std::mem::take(&mut table.cell);
                    table.row.push(cell.trim().to_string());
                }
            }
            TagEnd::Emphasis if self.table.is_none() => {
                if self.italic <= 1 {
                    self.close_inner_spoiler();
                }
                self.italic = self.italic.saturating_sub(1);
                if self.italic == 0 {
                    self.out.push('_');
                }
            }
            TagEnd::Strong if self.table.is_none() => self.close_bold(),
            TagEnd::Strikethrough if self.table.is_none() => {
                if self.strike <= 1 {
                    self.close_inner_spoiler();
                }
                self.strike = self.strike.saturating_sub(1);
                if self.strike == 0 {
                    self.out.push('~');
                }
            }
            TagEnd::Link | TagEnd::Image => {
                if matches!(self.links.last(), Some(Some(_))) {
                    self.close_inner_spoiler();
                }
                if let Some(Some(url)) = self.links.pop() {
                    self.out.push_str("](");
                    self.out.push_str(&escape_url(&url));
                    self.out.push(')');
                }
            }
            _ => {}
        }
    }

    fn text(&mut self, text: &str) {
        if let Some(code) = self.code.as_mut() {
            code.text.push_str(&verbatim(text));
            return;
        }
        if let Some(table) = self.table.as_mut() {
            table.cell.push_str(&literal(text));
            return;
        }

        let mut parts = text.split("||");
        if let Some(first) = parts.next() {
            self.out.push_str(&escape_text(&literal(first)));
        }
        for part in parts {
            let depth = self.inline_depth();
            match self.spoiler {
                None => {
                    self.out.push_str("||");
                    self.spoiler = Some(depth);
                }
                Some(start) if start == depth => {
                    self.out.push_str("||");
                    self.spoiler = None;
                }
                // closing here would cross a span opened inside the spoiler
                Some(_) => self.out.push_str("\\|\\|"),
            }
            self.out.push_str(&escape_text(&literal(part)));
        }
    }

    /// Number of open inline spans that emitted a marker.
    fn inline_depth(&self) -> usize {
        self.links.iter().filter(|link| link.is_some()).count()
            + usize::from(self.bold > 0)
            + usize::from(self.italic > 0)
            + usize::from(self.strike > 0)
    }

    /// Close a spoiler that started inside the inline span about to end.
    fn close_inner_spoiler(&mut self) {
        if let Some(start) = self.spoiler {
            if start >= self.inline_depth() {
                self.out.push_str("||");
                self.spoiler = None;
            }
        }
    }

    fn close_spoiler(&mut self) {
        if self.spoiler.take().is_some() {
            self.out.push_str("||");
        }
    }

    fn plain(&mut self, text: &str) {
        match self.table.as_mut() {
            Some(table) => table.cell.push_str(text),
            None => self.out.push_str(&escape_text(text)),
        }
    }

    fn inline_code(&mut self, code: &str) {
        match self.table.as_mut() {
            Some(table) => table.cell.push_str(code),
            None => {
                self.out.push('`');
                self.out.push_str(&escape_code(code));
                self.out.push('`');
            }
        }
    }

    fn open_bold(&mut self) {
        if self.bold == 0 {
            self.out.push('*');
        }
        self.bold += 1;
    }

    fn close_bold(&mut self) {
        if self.bold <= 1 {
            self.close_inner_spoiler();
        }
        self.bold = self.bold.saturating_sub(1);
        if self.bold == 0 {
            self.out.push('*');
        }
    }

    fn open_link(&mut self, symbol: &str, url: &str) {
        if self.table.is_some() {
            self.links.push(None);
            return;
        }
        self.out.push('[');
        self.out.push_str(&escape_text(symbol));
        self.links.push(Some(url.to_string()));
    }

    fn ensure_line_start(&mut self) {
        if !self.out.is_empty() && !self.out.ends_with('\n') {
            self.out.push('\n');
        }
    }

    /// Close a block element: at top level the buffer becomes its own block,
    /// inside a list item or quote it just ends the line.
    fn end_block(&mut self) {
        self.close_spoiler();
        if self.parents.is_empty() {
            let text = self.out.trim_end();
            if !text.trim_start().is_empty() {
                self.blocks.push(Chunk::Text(text.to_string()));
            }
            self.out.clear();
        } else {
            self.ensure_line_start();
        }
    }

    fn end_item(&mut self) {
        let content = std::mem::take(&mut self.out);
        self.out = self.parents.pop().unwrap_or_default();

        let marker = match self.lists.last_mut() {
            Some(Some(n)) => {
                let marker = format!("{n}\\. ");
                *n += 1;
                marker
            }
            _ => format!("{} ", escape_text(&self.options.symbols.bullet)),
        };

        self.ensure_line_start();
        self.out.push_str(&marker);
        // Quote markers only count at the start of a line, and indenting
        // would change the contents of a pre block
        let mut in_pre = false;
        for (i, line) in content.trim_end().lines().enumerate() {
            if i > 0 || is_quote_line(line) {
                if i == 0 {
                    self.out.truncate(self.out.trim_end().len());
                }
                self.out.push('\n');
                if !line.is_empty() && !in_pre && !is_quote_line(line) {
                    self.out.push_str("  ");
                }
            }
            self.out.push_str(line);
            if line.trim_start().starts_with("```") {
                in_pre = !in_pre;
            }
        }
        self.out.push('\n');
    }

    fn end_quote(&mut self) {
        self.quote_depth = self.quote_depth.saturating_sub(1);
        self.close_spoiler();
        let inner = std::mem::take(&mut self.out);
        let inner = inner.trim_end();
        self.out = self.parents.pop().unwrap_or_default();
        self.ensure_line_start();
        // Telegram has no nested quotes; only the outermost one is marked
        if self.quote_depth == 0 {
            let quoted = self.quote(inner);
            self.out.push_str(&quoted);
        } else {
            self.out.push_str(inner);
        }
        self.end_block();
    }

    fn quote(&self, inner: &str) -> String {
        let lines: Vec<&str> = inner.lines().collect();
        let expandable = self.options.cite_expandable && lines.len() > EXPANDABLE_QUOTE_LINES;

        let mut quoted = String::with_capacity(inner.len() + lines.len() + 4);
        for (i, line) in lines.iter().enumerate() {
            if i > 0 {
                quoted.push('\n');
            }
            if expandable && i == 0 {
                quoted.push_str("**>");
            } else {
                quoted.push('>');
            }
            quoted.push_str(line);
        }
        if expandable {
            quoted.push_str("||");
        }
        quoted
    }

    fn end_code_block(&mut self) {
        let Some(code) = self.code.take() else {
            return;
        };
        let top_level = self.parents.is_empty();

        if self.attachments && top_level && code.lang.eq_ignore_ascii_case("mermaid") {
            self.end_block();
            self.blocks.push(Chunk::Photo(Attachment {
                file_name: "diagram.png".to_string(),
                source: AttachmentSource::Url(mermaid_url(&code.text)),
                caption: String::new(),
            }));
            return;
        }

        let rendered = pre(&code.lang, &code.text);
        if self.attachments && top_level && rendered.len() > self.options.max_chunk_len {
            self.end_block();
            self.blocks.push(Chunk::Document(Attachment {
                file_name: format!("code.{}", file_extension(&code.lang)),
                source: AttachmentSource::Bytes(code.text.into_bytes()),
                caption: String::new(),
            }));
            return;
        }

        self.ensure_line_start();
        self.out.push_str(&rendered);
        self.end_block();
    }

    fn finish(mut self) -> Vec<Chunk> {
        self.end_block();
        self.blocks
    }
}

fn is_quote_line(line: &str) -> bool {
    line.starts_with('>') || line.starts_with("**>")
}

/// Swap each `\|` outside of an escaped backslash for [`ESCAPED_PIPE`].
fn mark_escaped_pipes(markdown: &str) -> String {
    let mut out = String::with_capacity(markdown.len());
    let mut chars = markdown.chars().peekable();
    while let Some(ch) = chars.next() {
        match (ch, chars.peek()) {
            ('\\', Some('|')) => {
                chars.next();
                out.push(ESCAPED_PIPE);
            }
            ('\\', Some('\\')) => {
                chars.next();
                out.push_str("\\\\");
            }
            _ => out.push(ch),
        }
    }
    out
}

/// Escaped pipes in prose are plain `|`.
fn literal(text: &str) -> String {
    text.replace(ESCAPED_PIPE, "|")
}

/// Code and raw HTML keep the backslash.
fn verbatim(text: &str) -> String {
    text.replace(ESCAPED_PIPE, "\\|")
}

fn heading_level(level: HeadingLevel) -> usize {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

/// A ```pre``` block with an optional language tag.
fn pre(lang: &str, code: &str) -> String {
    let lang: String = lang
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '#' | '-' | '_'))
        .collect();
    let mut out = String::with_capacity(code.len() + lang.len() + 8);
    out.push_str("```");
    out.push_str(&lang);
    out.push('\n');
    out.push_str(&escape_code(code));
    if !code.ends_with('\n') {
        out.push('\n');
    }
    out.push_str("```");
    out
}

fn layout_table(table: Table) -> String {
    let columns = table.rows.iter().map(Vec::len).max().unwrap_or(0);
    let mut widths = vec![0; columns];
    for row in &table.rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.width());
        }
    }

    let mut lines = Vec::with_capacity(table.rows.len() + 1);
    for (r, row) in table.rows.iter().enumerate() {
        let cells: Vec<String> = (0..columns)
            .map(|i| {
                let cell = row.get(i).map(String::as_str).unwrap_or("");
                let alignment = table.alignments.get(i).copied().unwrap_or(Alignment::None);
                pad(cell, widths[i], alignment)
            })
            .collect();
        lines.push(cells.join(" | ").trim_end().to_string());

        if r == 0 {
            let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
            lines.push(rule.join("-+-"));
        }
    }
    lines.join("\n")
}

fn pad(cell: &str, width: usize, alignment: Alignment) -> String {
    let gap = width.saturating_sub(cell.width());
    match alignment {
        Alignment::Right => format!("{}{}", " ".repeat(gap), cell),
        Alignment::Center => {
            let left = gap / 2;
            format!("{}{}{}", " ".repeat(left), cell, " ".repeat(gap - left))
        }
        Alignment::Left | Alignment::None => format!("{}{}", cell, " ".repeat(gap)),
    }
}

fn mermaid_url(source: &str) -> String {
    format!("{}{}", MERMAID_ENDPOINT, URL_SAFE.encode(source.trim()))
}

fn file_extension(lang: &str) -> &'static str {
    match lang.to_ascii_lowercase().as_str() {
        "rust" | "rs" => "rs",
        "python" | "py" => "py",
        "javascript" | "js" => "js",
        "typescript" | "ts" => "ts",
        "shell" | "bash" | "sh" | "zsh" => "sh",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "html" => "html",
        "css" => "css",
        "go" => "go",
        "java" => "java",
        "c" => "c",
        "cpp" | "c++" => "cpp",
        "sql" => "sql",
        "markdown" | "md" => "md",
        _ => "txt",
    }
}
