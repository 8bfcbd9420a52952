use crate::{IndexEntry, RagError, RetrievalResult};
use async_trait::async_trait;

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Replaces the whole collection. Readers see either the previous or the
    /// new collection, never a mix.
    async fn upsert_all(&self, entries: Vec<IndexEntry>) -> Result<(), RagError>;

    /// Up to `k` entries by descending cosine similarity, ties broken by
    /// ascending `chunk_index`.
    async fn search(&self, query_vector: &[f32], k: usize) -> Result<RetrievalResult, RagError>;
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, crate::GenerationError>;
}
