use crate::config::ChunkingSettings;
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub text: String,
    pub chunk_index: usize,
}

/// Chunking strategy used during ingestion.
pub trait TextSplitter: Send + Sync {
    fn split(&self, text: &str) -> Vec<TextChunk>;
}

/// Splits on the coarsest boundary that fits: paragraph, line, sentence,
/// word, then raw bytes. Consecutive chunks share roughly `overlap` bytes.
#[derive(Debug, Clone)]
pub struct RecursiveSplitter {
    chunk_size: usize,
    overlap: usize,
}

impl RecursiveSplitter {
    pub fn new(chunk_size: usize, overlap: usize) -> AppResult<Self> {
        if chunk_size == 0 || overlap >= chunk_size {
            return Err(AppError::Config(format!(
                "invalid chunking: size {} overlap {}",
                chunk_size, overlap
            )));
        }
        Ok(Self { chunk_size, overlap })
    }

    pub fn from_settings(settings: &ChunkingSettings) -> AppResult<Self> {
        Self::new(settings.chunk_size, settings.chunk_overlap)
    }
}

impl TextSplitter for RecursiveSplitter {
    fn split(&self, text: &str) -> Vec<TextChunk> {
        let text = text.trim();
        if text.is_empty() {
            return Vec::new();
        }

        let mut chunks = Vec::new();
        let mut start = 0;

        while start < text.len() {
            let limit = floor_char_boundary(text, start + self.chunk_size);
            let end = if limit < text.len() {
                find_break_point(text, start, limit)
            } else {
                text.len()
            };

            let piece = text[start..end].trim();
            if !piece.is_empty() {
                chunks.push(TextChunk {
                    text: piece.to_string(),
                    chunk_index: chunks.len(),
                });
            }
            if end >= text.len() {
                break;
            }

            let next = ceil_char_boundary(text, end.saturating_sub(self.overlap));
            start = if next > start { next } else { end };
        }

        chunks
    }
}

fn floor_char_boundary(text: &str, pos: usize) -> usize {
    if pos >= text.len() {
        return text.len();
    }
    let mut pos = pos;
    while !text.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}

fn ceil_char_boundary(text: &str, pos: usize) -> usize {
    let mut pos = pos.min(text.len());
    while !text.is_char_boundary(pos) {
        pos += 1;
    }
    pos
}

/// Best split position in `text[start..limit]`; always greater than `start`.
fn find_break_point(text: &str, start: usize, limit: usize) -> usize {
    let segment = &text[start..limit];

    for sep in ["\n\n", "\n", ". ", "? ", "! ", "。", " "] {
        if let Some(pos) = segment.rfind(sep) {
            let end = start + pos + sep.len();
            if end > start && pos > 0 {
                return end;
            }
        }
    }

    if limit > start {
        limit
    } else {
        // A single char wider than the chunk size.
        ceil_char_boundary(text, start + 1)
    }
}
