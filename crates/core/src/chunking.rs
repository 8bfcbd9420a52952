use crate::error::RagError;
use crate::models::{Chunk, Document, IngestionOptions};

/// Fraction of `chunk_size` searched backwards from a chunk boundary for a
/// whitespace break.
const BREAK_WINDOW_DIVISOR: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, RagError> {
        let config = Self {
            chunk_size,
            chunk_overlap,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), RagError> {
        if self.chunk_size == 0 {
            return Err(RagError::InvalidConfig(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::InvalidConfig(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

impl From<&IngestionOptions> for ChunkingConfig {
    fn from(value: &IngestionOptions) -> Self {
        Self {
            chunk_size: value.chunk_size,
            chunk_overlap: value.chunk_overlap,
        }
    }
}

/// Splits every page of `document` into overlapping chunks. `chunk_index`
/// counts across the whole document in emission order.
pub fn split(document: &Document, config: ChunkingConfig) -> Result<Vec<Chunk>, RagError> {
    config.validate()?;

    let mut chunks = Vec::new();
    let mut cursor = 0u64;

    for page in &document.pages {
        for (start_offset, text) in split_text(&page.text, config) {
            chunks.push(Chunk {
                text,
                source_name: document.source_name.clone(),
                page_number: page.number,
                start_offset,
                chunk_index: cursor,
            });
            cursor = cursor.saturating_add(1);
        }
    }

    Ok(chunks)
}

/// Returns `(start_offset, text)` pairs with offsets counted in characters.
/// Starts strictly increase, consecutive spans overlap by exactly
/// `chunk_overlap` characters and together cover the whole input.
pub fn split_text(text: &str, config: ChunkingConfig) -> Vec<(usize, String)> {
    let chars: Vec<char> = text.chars().collect();
    let mut pieces = Vec::new();
    let mut start = 0usize;

    while start < chars.len() {
        let hard_end = (start + config.chunk_size).min(chars.len());
        let end = if hard_end == chars.len() {
            hard_end
        } else {
            find_break(&chars, start, hard_end, config)
        };

        pieces.push((start, chars[start..end].iter().collect::<String>()));

        if end == chars.len() {
            break;
        }
        start = end - config.chunk_overlap;
    }

    pieces
}

/// Picks the end of the chunk starting at `start`: a paragraph break, then a
/// line break, then any whitespace, searched backwards inside the trailing
/// window. The end never drops to `start + chunk_overlap` or below so the
/// next start keeps advancing.
fn find_break(chars: &[char], start: usize, hard_end: usize, config: ChunkingConfig) -> usize {
    let window = (config.chunk_size / BREAK_WINDOW_DIVISOR).max(1);
    let lower = (start + config.chunk_overlap + 1).max(hard_end.saturating_sub(window));
    if lower > hard_end {
        return hard_end;
    }

    let candidates = || (lower..=hard_end).rev();

    let paragraph = candidates().find(|&end| end >= 2 && chars[end - 1] == '\n' && chars[end - 2] == '\n');
    if let Some(end) = paragraph {
        return end;
    }

    let line = candidates().find(|&end| chars[end - 1] == '\n');
    if let Some(end) = line {
        return end;
    }

    candidates()
        .find(|&end| chars[end - 1].is_whitespace())
        .unwrap_or(hard_end)
}
