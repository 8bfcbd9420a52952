use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

pub const DEFAULT_TOP_K: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// 1-indexed PDF page number.
    pub number: u32,
    pub text: String,
}

/// A source file and its extracted pages. Immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub source_name: String,
    pub source_path: String,
    pub checksum: String,
    pub pages: Vec<Page>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub source_name: String,
    pub page_number: u32,
    /// Character offset into the page text.
    pub start_offset: usize,
    /// Ordinal within the document.
    pub chunk_index: u64,
}

impl Chunk {
    pub fn citation(&self) -> Citation {
        Citation {
            source_name: self.source_name.clone(),
            page_number: self.page_number,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f64,
}

/// Search hits ordered by descending similarity, ties by ascending
/// `chunk_index`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub hits: Vec<ScoredChunk>,
}

impl RetrievalResult {
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.hits.iter().map(|hit| &hit.chunk)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Citation {
    pub source_name: String,
    pub page_number: u32,
}

impl fmt::Display for Citation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Page {})", self.source_name, self.page_number)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub citations: Vec<Citation>,
}

/// What the answer composer hands back to the chat surface. Both variants
/// render to a displayable string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnswerOutcome {
    Grounded(Answer),
    GenerationFailed { message: String },
}

impl AnswerOutcome {
    pub fn render(&self) -> String {
        match self {
            AnswerOutcome::Grounded(answer) => {
                let mut rendered = answer.text.trim().to_string();
                if !answer.citations.is_empty() {
                    rendered.push_str("\n\nSources:");
                    for citation in &answer.citations {
                        rendered.push_str(&format!("\n- {citation}"));
                    }
                }
                rendered
            }
            AnswerOutcome::GenerationFailed { message } => {
                format!("Error generating an answer: {message}")
            }
        }
    }
}

#[derive(Debug)]
pub struct SkippedPdf {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug)]
pub struct IngestionReport {
    pub documents_processed: usize,
    pub chunks_produced: usize,
    pub skipped_files: Vec<SkippedPdf>,
    /// False when nothing was produced and the previous index was kept.
    pub index_rewritten: bool,
}

impl IngestionReport {
    pub fn documents_failed(&self) -> usize {
        self.skipped_files.len()
    }
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub embed_batch_size: usize,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1_000,
            chunk_overlap: 150,
            embed_batch_size: 32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodingMethod {
    Sample,
    Greedy,
}

impl DecodingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecodingMethod::Sample => "sample",
            DecodingMethod::Greedy => "greedy",
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationParams {
    pub max_new_tokens: u32,
    pub temperature: f32,
    pub decoding: DecodingMethod,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_new_tokens: 512,
            temperature: 0.2,
            decoding: DecodingMethod::Sample,
        }
    }
}
