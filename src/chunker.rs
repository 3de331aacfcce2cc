//! Document chunking with proper Unicode support
//!
//! Chunks are verbatim character ranges of the source text: concatenating
//! them minus the recorded overlaps reproduces the document exactly. All
//! size calculations are based on character count, not byte count, so CJK
//! and emoji content never gets split mid-character.

use pulldown_cmark::{Event, HeadingLevel, Parser, Tag, TagEnd};

use crate::error::{RagError, RagResult};
use crate::types::{Chunk, Document};

/// Splits documents into overlapping chunks along semantic boundaries
#[derive(Debug, Clone)]
pub struct Chunker {
    /// Maximum chunk size in characters
    max_chunk_chars: usize,
    /// Overlap between adjacent chunks in characters
    overlap_chars: usize,
}

impl Chunker {
    /// Create a new chunker; requires `0 < overlap_chars < max_chunk_chars`.
    pub fn new(max_chunk_chars: usize, overlap_chars: usize) -> RagResult<Self> {
        if max_chunk_chars == 0 || overlap_chars == 0 || overlap_chars >= max_chunk_chars {
            return Err(RagError::Config(format!(
                "chunking requires 0 < overlap ({overlap_chars}) < max chunk size ({max_chunk_chars})"
            )));
        }
        Ok(Self {
            max_chunk_chars,
            overlap_chars,
        })
    }

    /// Chunk a document. Empty or whitespace-only documents produce zero
    /// chunks; documents shorter than the maximum produce exactly one.
    pub fn chunk(&self, document: &Document) -> Vec<Chunk> {
        self.chunk_text(&document.text, &document.id)
    }

    fn chunk_text(&self, text: &str, doc_id: &str) -> Vec<Chunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let chars: Vec<char> = text.chars().collect();
        // Byte offset of every char position, plus the end of the text
        let mut byte_at: Vec<usize> = Vec::with_capacity(chars.len() + 1);
        for (byte, _) in text.char_indices() {
            byte_at.push(byte);
        }
        byte_at.push(text.len());

        let outline = heading_outline(text);
        let total = chars.len();

        let mut chunks = Vec::new();
        let mut start = 0usize;
        let mut seq = 0usize;

        loop {
            if total - start <= self.max_chunk_chars {
                chunks.push(self.make_chunk(text, &byte_at, &outline, doc_id, seq, start, total));
                break;
            }

            let hard_end = start + self.max_chunk_chars;
            let lo = hard_end.saturating_sub(self.tolerance()).max(start + 1);
            let end = find_paragraph_break(&chars, lo, hard_end)
                .or_else(|| find_sentence_break(&chars, lo, hard_end))
                .or_else(|| find_whitespace_break(&chars, lo, hard_end))
                .unwrap_or(hard_end);

            chunks.push(self.make_chunk(text, &byte_at, &outline, doc_id, seq, start, end));
            seq += 1;
            start = end.saturating_sub(self.overlap_chars).max(start + 1);
        }

        chunks
    }

    /// Window below the character limit searched for a natural boundary
    fn tolerance(&self) -> usize {
        (self.max_chunk_chars / 3).max(1)
    }

    #[allow(clippy::too_many_arguments)]
    fn make_chunk(
        &self,
        text: &str,
        byte_at: &[usize],
        outline: &[(usize, String)],
        doc_id: &str,
        seq: usize,
        start: usize,
        end: usize,
    ) -> Chunk {
        let chunk_text = &text[byte_at[start]..byte_at[end]];
        let heading_path = outline
            .iter()
            .rev()
            .find(|(offset, _)| *offset <= byte_at[end])
            .map(|(_, path)| path.clone())
            .unwrap_or_default();

        Chunk {
            doc_id: doc_id.to_string(),
            seq,
            text: chunk_text.to_string(),
            start_offset: start,
            end_offset: end,
            heading_path,
        }
    }
}

/// Cut after a blank line, nearest to `hi`, within `[lo, hi]`
fn find_paragraph_break(chars: &[char], lo: usize, hi: usize) -> Option<usize> {
    for cut in (lo..=hi).rev() {
        if cut >= 2 && chars[cut - 1] == '\n' && chars[cut - 2] == '\n' {
            return Some(cut);
        }
    }
    None
}

/// Cut after a sentence terminator (supports CJK and Latin punctuation)
fn find_sentence_break(chars: &[char], lo: usize, hi: usize) -> Option<usize> {
    for cut in (lo..=hi).rev() {
        let last = chars[cut - 1];
        if matches!(last, '。' | '！' | '？') {
            return Some(cut);
        }
        if cut >= 2 && last.is_whitespace() && matches!(chars[cut - 2], '.' | '!' | '?') {
            return Some(cut);
        }
    }
    None
}

/// Cut after any whitespace character
fn find_whitespace_break(chars: &[char], lo: usize, hi: usize) -> Option<usize> {
    for cut in (lo..=hi).rev() {
        if chars[cut - 1].is_whitespace() {
            return Some(cut);
        }
    }
    None
}

/// Heading paths over the raw markdown, as (byte offset after the heading,
/// "A > B" path) pairs. Plain-text documents yield an empty outline.
fn heading_outline(text: &str) -> Vec<(usize, String)> {
    let mut outline = Vec::new();
    let mut stack: Vec<(HeadingLevel, String)> = Vec::new();
    let mut in_heading: Option<HeadingLevel> = None;
    let mut buf = String::new();

    for (event, range) in Parser::new(text).into_offset_iter() {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                in_heading = Some(level);
                buf.clear();
            }
            Event::Text(t) => {
                if in_heading.is_some() {
                    buf.push_str(&t);
                }
            }
            Event::Code(t) => {
                if in_heading.is_some() {
                    buf.push_str(&t);
                }
            }
            Event::End(TagEnd::Heading(_)) => {
                if let Some(level) = in_heading.take() {
                    while stack.last().map_or(false, |(l, _)| *l >= level) {
                        stack.pop();
                    }
                    stack.push((level, buf.trim().to_string()));
                    let path = stack
                        .iter()
                        .map(|(_, t)| t.as_str())
                        .collect::<Vec<_>>()
                        .join(" > ");
                    outline.push((range.end, path));
                }
            }
            _ => {}
        }
    }

    outline
}
