pub mod file;
pub mod memory;

pub use file::{FileVectorIndex, IndexManifest};
pub use memory::InMemoryVectorIndex;

use crate::{IndexEntry, RagError, RetrievalResult, ScoredChunk};
use std::cmp::Ordering;

/// An immutable set of entries sharing one dimensionality. Stores swap whole
/// collections behind an `Arc`, which is what keeps rebuilds atomic for
/// readers.
#[derive(Debug, Default)]
pub(crate) struct Collection {
    pub dimensions: usize,
    pub entries: Vec<IndexEntry>,
}

impl Collection {
    pub fn build(entries: Vec<IndexEntry>) -> Result<Self, RagError> {
        let dimensions = entries.first().map(|entry| entry.embedding.len()).unwrap_or(0);

        for entry in &entries {
            if entry.embedding.len() != dimensions {
                return Err(RagError::DimensionMismatch {
                    expected: dimensions,
                    actual: entry.embedding.len(),
                });
            }
        }
        if !entries.is_empty() && dimensions == 0 {
            return Err(RagError::Storage("entries carry empty embeddings".to_string()));
        }

        Ok(Self {
            dimensions,
            entries,
        })
    }

    pub fn search(&self, query_vector: &[f32], k: usize) -> Result<RetrievalResult, RagError> {
        if k == 0 {
            return Err(RagError::InvalidConfig("k must be at least 1".to_string()));
        }
        if self.entries.is_empty() {
            return Err(RagError::IndexEmpty);
        }
        if query_vector.len() != self.dimensions {
            return Err(RagError::DimensionMismatch {
                expected: self.dimensions,
                actual: query_vector.len(),
            });
        }

        let mut scored: Vec<(f64, &IndexEntry)> = self
            .entries
            .iter()
            .map(|entry| (cosine_similarity(&entry.embedding, query_vector), entry))
            .collect();

        scored.sort_by(|(left_score, left), (right_score, right)| {
            right_score
                .total_cmp(left_score)
                .then_with(|| tie_break(left, right))
        });
        scored.truncate(k);

        Ok(RetrievalResult {
            hits: scored
                .into_iter()
                .map(|(score, entry)| ScoredChunk {
                    chunk: entry.chunk.clone(),
                    score,
                })
                .collect(),
        })
    }
}

fn tie_break(left: &IndexEntry, right: &IndexEntry) -> Ordering {
    let (left, right) = (&left.chunk, &right.chunk);
    left.chunk_index
        .cmp(&right.chunk_index)
        .then_with(|| left.source_name.cmp(&right.source_name))
        .then_with(|| left.page_number.cmp(&right.page_number))
        .then_with(|| left.start_offset.cmp(&right.start_offset))
}

/// Cosine similarity accumulated in `f64`. Zero-magnitude vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0f64;
    let mut norm_a = 0f64;
    let mut norm_b = 0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
