//! Splitting rendered MarkdownV2 into message-sized pieces.
//!
//! Each piece parses on its own: entities still open at a cut are closed at
//! the end of the piece and reopened at the start of the next one.

use super::Chunk;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Bytes,
    Chars,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    Bold,
    Italic,
    Strike,
    Spoiler,
    Code,
}

impl Marker {
    fn as_str(self) -> &'static str {
        match self {
            Marker::Bold => "*",
            Marker::Italic => "_",
            Marker::Strike => "~",
            Marker::Spoiler => "||",
            Marker::Code => "`",
        }
    }
}

/// Entities open at a position of the text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Open {
    /// Inline markers, outermost first.
    markers: Vec<Marker>,
    /// Language tag of an open ```pre``` block.
    pre: Option<String>,
    expandable_quote: bool,
}

impl Open {
    fn toggle(&mut self, marker: Marker) {
        match self.markers.iter().rposition(|m| *m == marker) {
            Some(pos) => {
                self.markers.remove(pos);
            }
            None => self.markers.push(marker),
        }
    }

    fn closing(&self) -> String {
        let mut out = String::new();
        for marker in self.markers.iter().rev() {
            out.push_str(marker.as_str());
        }
        if self.pre.is_some() {
            out.push_str("\n```");
        }
        if self.expandable_quote {
            out.push_str("||");
        }
        out
    }

    fn reopening(&self) -> String {
        let mut out = String::new();
        // the continuation line already starts with `>`
        if self.expandable_quote {
            out.push_str("**");
        }
        if let Some(lang) = &self.pre {
            out.push_str("```");
            out.push_str(lang);
            out.push('\n');
        }
        for marker in &self.markers {
            out.push_str(marker.as_str());
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Break {
    Line,
    Word,
    Char,
}

/// A position where the text may be cut.
#[derive(Debug, Clone)]
struct Cut {
    byte: usize,
    chars: usize,
    after: Break,
    open: Open,
}

impl Cut {
    fn start() -> Self {
        Self {
            byte: 0,
            chars: 0,
            after: Break::Line,
            open: Open::default(),
        }
    }
}

/// Split long messages for Telegram's 4096 char limit.
///
/// Prefers cutting after a newline, then after a space. A cut never lands
/// inside an escape, a link or a multi-character marker, and inside a quote
/// only between lines.
pub fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }
    split_balanced(text, max_len, Unit::Bytes, true)
}

/// Cut `text` into pieces of at most `size` characters, without regard for
/// words or lines.
pub fn split_fixed(text: &str, size: usize) -> Vec<String> {
    split_balanced(text, size, Unit::Chars, false)
}

fn split_balanced(text: &str, max_len: usize, unit: Unit, prefer_breaks: bool) -> Vec<String> {
    let cuts = cut_points(text);
    let total_chars = text.chars().count();
    let span = |from: &Cut, byte: usize, chars: usize| match unit {
        Unit::Bytes => byte - from.byte,
        Unit::Chars => chars - from.chars,
    };

    let mut pieces = Vec::new();
    let mut start = Cut::start();
    let mut next = 0;

    loop {
        let opening = start.open.reopening();
        if opening.len() + span(&start, text.len(), total_chars) <= max_len {
            push_piece(&mut pieces, &opening, &text[start.byte..], "", false);
            break;
        }

        while next < cuts.len() && cuts[next].byte <= start.byte {
            next += 1;
        }
        let (mut line, mut word, mut any) = (None, None, None);
        for (i, cut) in cuts.iter().enumerate().skip(next) {
            let len = opening.len() + span(&start, cut.byte, cut.chars) + cut.open.closing().len();
            if len > max_len {
                break;
            }
            any = Some(i);
            match cut.after {
                Break::Line => line = Some(i),
                Break::Word => word = Some(i),
                Break::Char => {}
            }
        }
        let chosen = if prefer_breaks {
            line.or(word).or(any)
        } else {
            any
        };

        // Nothing fits: take the nearest cut and accept an oversized piece
        let Some(cut) = chosen.or((next < cuts.len()).then_some(next)).map(|i| &cuts[i]) else {
            push_piece(&mut pieces, &opening, &text[start.byte..], "", false);
            break;
        };

        let closing = cut.open.closing();
        push_piece(
            &mut pieces,
            &opening,
            &text[start.byte..cut.byte],
            &closing,
            prefer_breaks,
        );
        start = cut.clone();
    }

    pieces
}

fn push_piece(pieces: &mut Vec<String>, opening: &str, body: &str, closing: &str, trim: bool) {
    if body.trim().is_empty() {
        return;
    }
    let mut piece = format!("{opening}{body}");
    if !closing.is_empty() {
        piece.truncate(piece.trim_end().len());
        piece.push_str(closing);
    } else if trim {
        piece.truncate(piece.trim_end_matches('\n').len());
    }
    pieces.push(piece);
}

/// Scan rendered MarkdownV2 and list every position where it can be cut,
/// with the entities open there.
fn cut_points(text: &str) -> Vec<Cut> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut cuts = Vec::new();
    let mut open = Open::default();
    let mut in_link = false;
    let mut in_quote = false;
    let mut k = 0;

    while k < chars.len() {
        let (byte, ch) = chars[k];
        let rest = &text[byte..];
        let line_start = k == 0 || chars[k - 1].1 == '\n';

        if line_start && open.pre.is_none() {
            in_quote = rest.starts_with('>') || rest.starts_with("**>");
            if !rest.starts_with('>') {
                open.expandable_quote = false;
            }
        }

        let quote_safe =
            !in_quote || (line_start && open.markers.is_empty() && open.pre.is_none());
        if k > 0 && !in_link && quote_safe {
            let after = match chars[k - 1].1 {
                '\n' => Break::Line,
                ' ' => Break::Word,
                _ => Break::Char,
            };
            cuts.push(Cut {
                byte,
                chars: k,
                after,
                open: open.clone(),
            });
        }

        k += if open.pre.is_some() {
            if ch == '\\' {
                2
            } else if rest.starts_with("```") {
                open.pre = None;
                3
            } else {
                1
            }
        } else if line_start && rest.starts_with("**>") {
            open.expandable_quote = true;
            3
        } else if line_start && ch == '>' {
            1
        } else if open.markers.last() == Some(&Marker::Code) {
            match ch {
                '\\' => 2,
                '`' => {
                    open.toggle(Marker::Code);
                    1
                }
                _ => 1,
            }
        } else {
            match ch {
                '\\' => 2,
                '`' if rest.starts_with("```") => {
                    let line_len = rest.find('\n').map_or(rest.len(), |i| i + 1);
                    open.pre = Some(rest[3..line_len].trim_end().to_string());
                    rest[..line_len].chars().count()
                }
                '`' => {
                    open.toggle(Marker::Code);
                    1
                }
                '*' => {
                    open.toggle(Marker::Bold);
                    1
                }
                '_' => {
                    open.toggle(Marker::Italic);
                    1
                }
                '~' => {
                    open.toggle(Marker::Strike);
                    1
                }
                '|' if rest.starts_with("||") => {
                    if open.expandable_quote
                        && !open.markers.contains(&Marker::Spoiler)
                        && closes_quote(&rest[2..])
                    {
                        open.expandable_quote = false;
                    } else {
                        open.toggle(Marker::Spoiler);
                    }
                    2
                }
                '[' => {
                    in_link = true;
                    1
                }
                ')' if in_link => {
                    in_link = false;
                    1
                }
                _ => 1,
            }
        };
    }

    cuts
}

/// `||` ends an expandable quote when it closes the quote's last line.
fn closes_quote(after: &str) -> bool {
    match after.strip_prefix('\n') {
        Some(next) => !next.starts_with('>'),
        None => after.is_empty(),
    }
}

/// Pack rendered top-level blocks into as few text chunks as fit under
/// `max_len`, keeping attachments in place between them.
pub fn pack(blocks: Vec<Chunk>, max_len: usize) -> Vec<Chunk> {
    let mut packed = Vec::new();
    let mut current = String::new();

    for block in blocks {
        match block {
            Chunk::Text(text) => {
                if text.len() > max_len {
                    flush(&mut current, &mut packed);
                    packed.extend(split_message(&text, max_len).into_iter().map(Chunk::Text));
                } else if current.is_empty() {
                    current = text;
                } else if current.len() + 2 + text.len() > max_len {
                    flush(&mut current, &mut packed);
                    current = text;
                } else {
                    current.push_str("\n\n");
                    current.push_str(&text);
                }
            }
            attachment => {
                flush(&mut current, &mut packed);
                packed.push(attachment);
            }
        }
    }

    flush(&mut current, &mut packed);
    packed
}

fn flush(current: &mut String, packed: &mut Vec<Chunk>) {
    if !current.is_empty() {
        packed.push(Chunk::Text(std::mem::take(current)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{Attachment, AttachmentSource};

    #[test]
    fn test_short_message_untouched() {
        assert_eq!(split_message("hello", 10), vec!["hello".to_string()]);
    }

    #[test]
    fn test_split_prefers_newline() {
        let text = "first line\nsecond line\nthird line";
        let chunks = split_message(text, 24);
        assert_eq!(chunks, vec!["first line\nsecond line", "third line"]);
    }

    #[test]
    fn test_split_falls_back_to_space() {
        let chunks = split_message("aaaa bbbb cccc", 10);
        assert_eq!(chunks, vec!["aaaa bbbb ", "cccc"]);
    }

    #[test]
    fn test_hard_cut_keeps_escapes_together() {
        // 9 'a' then an escaped dot: a cut at 10 would orphan the backslash
        let text = format!("{}\\.{}", "a".repeat(9), "b".repeat(5));
        let chunks = split_message(&text, 10);
        assert_eq!(chunks, vec!["a".repeat(9), format!("\\.{}", "b".repeat(5))]);
    }

    #[test]
    fn test_split_respects_char_boundaries() {
        let text = "é".repeat(10);
        let chunks = split_message(&text, 5);
        assert!(chunks.iter().all(|c| c.len() <= 5));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_bold_closed_and_reopened() {
        let text = format!("*{}*", "word ".repeat(100).trim());
        let chunks = split_message(&text, 120);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.len() <= 120, "{chunk:?}");
            assert!(chunk.starts_with('*') && chunk.ends_with('*'), "{chunk:?}");
            assert_eq!(chunk.matches('*').count(), 2, "{chunk:?}");
        }
    }

    #[test]
    fn test_pre_reopened_with_language() {
        let text = format!("```rust\n{}```", "let x = 1;\n".repeat(30));
        let chunks = split_message(&text, 100);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.len() <= 100, "{chunk:?}");
            assert!(chunk.starts_with("```rust\nlet x"), "{chunk:?}");
            assert!(chunk.ends_with(";\n```"), "{chunk:?}");
            assert_eq!(chunk.matches("```").count(), 2, "{chunk:?}");
        }
    }

    #[test]
    fn test_expandable_quote_cut_between_lines() {
        let lines: Vec<String> = (0..30).map(|i| format!("line {i}")).collect();
        let text = format!("**>{}||", lines.join("\n>"));
        let chunks = split_message(&text, 80);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.len() <= 80, "{chunk:?}");
            assert!(chunk.starts_with("**>line "), "{chunk:?}");
            assert!(chunk.ends_with("||"), "{chunk:?}");
            assert!(chunk.lines().all(|l| l.starts_with('>') || l.starts_with("**>")));
        }
    }

    #[test]
    fn test_link_never_cut() {
        let link = format!("[🔗link](https://example.com/{})", "p".repeat(30));
        let text = format!("{} {}", "a".repeat(10), link);
        let chunks = split_message(&text, 30);
        assert_eq!(chunks, vec![format!("{} ", "a".repeat(10)), link]);
    }

    #[test]
    fn test_split_fixed_sizes() {
        let pieces = split_fixed(&"x".repeat(25), 10);
        assert_eq!(pieces.len(), 3);
        assert_eq!(pieces[0].chars().count(), 10);
        assert_eq!(pieces[2].chars().count(), 5);
    }

    #[test]
    fn test_split_fixed_moves_orphan_backslash() {
        let text = format!("{}\\!tail", "x".repeat(9));
        let pieces = split_fixed(&text, 10);
        assert_eq!(pieces[0], "x".repeat(9));
        assert_eq!(pieces[1], "\\!tail");
    }

    #[test]
    fn test_split_fixed_balances_spoiler() {
        let text = format!("||{}||", "x".repeat(50));
        let pieces = split_fixed(&text, 20);
        assert_eq!(pieces.len(), 4);
        for piece in &pieces {
            assert!(piece.chars().count() <= 20, "{piece:?}");
            assert!(piece.starts_with("||x") && piece.ends_with("x||"), "{piece:?}");
        }
        assert_eq!(pieces.concat().matches('x').count(), 50);
    }

    #[test]
    fn test_pack_merges_small_blocks() {
        let blocks = vec![Chunk::Text("one".into()), Chunk::Text("two".into())];
        let packed = pack(blocks, 100);
        assert_eq!(packed.len(), 1);
        assert!(matches!(&packed[0], Chunk::Text(t) if t == "one\n\ntwo"));
    }

    #[test]
    fn test_pack_starts_new_chunk_when_full() {
        let blocks = vec![
            Chunk::Text("a".repeat(60)),
            Chunk::Text("b".repeat(60)),
        ];
        let packed = pack(blocks, 100);
        assert_eq!(packed.len(), 2);
    }

    #[test]
    fn test_pack_keeps_attachment_order() {
        let attachment = Attachment {
            file_name: "code.rs".into(),
            source: AttachmentSource::Bytes(b"fn main() {}".to_vec()),
            caption: String::new(),
        };
        let blocks = vec![
            Chunk::Text("before".into()),
            Chunk::Document(attachment),
            Chunk::Text("after".into()),
        ];
        let packed = pack(blocks, 100);
        assert_eq!(packed.len(), 3);
        assert!(matches!(&packed[1], Chunk::Document(_)));
        assert!(matches!(&packed[2], Chunk::Text(t) if t == "after"));
    }
}
