//! Paragraph-aware splitting of long generated answers into transport-sized parts.
//!
//! Lengths are counted in `char`s so a cut never lands inside a UTF-8 sequence.

use serde::{Deserialize, Serialize};

pub const PARAGRAPH_SEPARATOR: &str = "\n\n";
pub const DEFAULT_MAX_CHUNK_CHARS: usize = 3_000;

const SEPARATOR_CHARS: usize = 2;

/// What to do with a single paragraph that is longer than the limit on its own.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OversizePolicy {
    /// Emit the paragraph as one chunk even though it exceeds the limit.
    #[default]
    Keep,
    /// Cut the paragraph at the last whitespace before the limit. An unbroken
    /// run longer than the limit is cut at the character boundary.
    SplitOnWhitespace,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkOptions {
    pub max_length: usize,
    pub oversize: OversizePolicy,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self { max_length: DEFAULT_MAX_CHUNK_CHARS, oversize: OversizePolicy::Keep }
    }
}

impl ChunkOptions {
    pub fn new(max_length: usize, oversize: OversizePolicy) -> Self {
        Self { max_length, oversize }
    }
}

pub fn chunk(text: &str, max_length: usize) -> Vec<String> {
    chunk_with(text, &ChunkOptions::new(max_length, OversizePolicy::Keep))
}

pub fn chunk_with(text: &str, options: &ChunkOptions) -> Vec<String> {
    let max_length = options.max_length.max(1);
    if char_len(text) <= max_length {
        return vec![text.to_owned()];
    }

    let mut builder = ChunkBuilder::new(max_length);
    for paragraph in text.split(PARAGRAPH_SEPARATOR) {
        if paragraph.trim().is_empty() {
            continue;
        }

        match options.oversize {
            OversizePolicy::Keep => builder.push(paragraph),
            OversizePolicy::SplitOnWhitespace => {
                for piece in split_oversized(paragraph, max_length) {
                    builder.push(piece);
                }
            }
        }
    }

    let chunks = builder.finish();
    if chunks.is_empty() {
        // Every paragraph was blank; the caller still gets one part.
        return vec![text.trim_end().to_owned()];
    }
    chunks
}

struct ChunkBuilder {
    max_length: usize,
    chunks: Vec<String>,
    buffer: String,
    buffer_len: usize,
}

impl ChunkBuilder {
    fn new(max_length: usize) -> Self {
        Self { max_length, chunks: Vec::new(), buffer: String::new(), buffer_len: 0 }
    }

    fn push(&mut self, paragraph: &str) {
        let paragraph_len = char_len(paragraph);
        if self.buffer_len > 0
            && self.buffer_len + SEPARATOR_CHARS + paragraph_len > self.max_length
        {
            self.flush();
        }

        if self.buffer_len > 0 {
            self.buffer.push_str(PARAGRAPH_SEPARATOR);
            self.buffer_len += SEPARATOR_CHARS;
        }
        self.buffer.push_str(paragraph);
        self.buffer_len += paragraph_len;
    }

    fn flush(&mut self) {
        let closed = self.buffer.trim_end();
        if !closed.is_empty() {
            self.chunks.push(closed.to_owned());
        }
        self.buffer.clear();
        self.buffer_len = 0;
    }

    fn finish(mut self) -> Vec<String> {
        self.flush();
        self.chunks
    }
}

fn split_oversized(paragraph: &str, max_length: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut remaining = paragraph;

    while char_len(remaining) > max_length {
        let Some((limit, _)) = remaining.char_indices().nth(max_length) else {
            break;
        };

        let (piece, rest) = if remaining[limit..].starts_with(char::is_whitespace) {
            (&remaining[..limit], &remaining[limit..])
        } else {
            match remaining[..limit].rfind(char::is_whitespace) {
                Some(position) if position > 0 => (&remaining[..position], &remaining[position..]),
                _ => (&remaining[..limit], &remaining[limit..]),
            }
        };

        let piece = piece.trim_end();
        if !piece.is_empty() {
            pieces.push(piece);
        }
        remaining = rest.trim_start();
    }

    if !remaining.trim().is_empty() {
        pieces.push(remaining);
    }
    pieces
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}
