use crate::embeddings::EmbeddingClient;
use crate::traits::VectorIndex;
use crate::{RagError, RetrievalResult, DEFAULT_TOP_K};
use std::sync::Arc;
use tracing::debug;

pub struct Retriever {
    embedder: Arc<dyn EmbeddingClient>,
    index: Arc<dyn VectorIndex>,
    default_k: usize,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn EmbeddingClient>, index: Arc<dyn VectorIndex>) -> Self {
        Self {
            embedder,
            index,
            default_k: DEFAULT_TOP_K,
        }
    }

    pub fn with_default_k(mut self, k: usize) -> Result<Self, RagError> {
        validate_k(k)?;
        self.default_k = k;
        Ok(self)
    }

    pub fn default_k(&self) -> usize {
        self.default_k
    }

    /// Retrieves with the configured default `k`.
    pub async fn retrieve_default(&self, query: &str) -> Result<RetrievalResult, RagError> {
        self.retrieve(query, self.default_k).await
    }

    /// Embeds `query` and returns the `k` closest chunks. Errors from the
    /// embedding client and the index are passed through untouched.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<RetrievalResult, RagError> {
        validate_k(k)?;
        if query.trim().is_empty() {
            return Err(RagError::EmptyQuery);
        }

        let query_vector = self.embedder.embed(query).await?;
        let result = self.index.search(&query_vector, k).await?;

        debug!(
            k,
            hits = result.len(),
            top_score = result.hits.first().map(|hit| hit.score).unwrap_or(0.0),
            "retrieved context"
        );
        Ok(result)
    }
}

fn validate_k(k: usize) -> Result<(), RagError> {
    if k == 0 {
        return Err(RagError::InvalidConfig("k must be at least 1".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::stores::InMemoryVectorIndex;
    use crate::{Chunk, IndexEntry};
    use async_trait::async_trait;

    struct FixedEmbedder(Vec<f32>);

    #[async_trait]
    impl EmbeddingClient for FixedEmbedder {
        fn model(&self) -> &str {
            "fixed"
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, RagError> {
            Ok(self.0.clone())
        }
    }

    struct DownEmbedder;

    #[async_trait]
    impl EmbeddingClient for DownEmbedder {
        fn model(&self) -> &str {
            "down"
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, RagError> {
            Err(RagError::EmbeddingUnavailable("timed out".to_string()))
        }
    }

    fn chunk(source_name: &str, chunk_index: u64, text: &str) -> Chunk {
        Chunk {
            text: text.to_string(),
            source_name: source_name.to_string(),
            page_number: 1,
            start_offset: 0,
            chunk_index,
        }
    }

    async fn indexed(texts: &[&str], embedder: &CharacterNgramEmbedder) -> Result<Arc<InMemoryVectorIndex>, RagError> {
        let index = Arc::new(InMemoryVectorIndex::new());
        let entries = texts
            .iter()
            .enumerate()
            .map(|(position, text)| IndexEntry {
                chunk: chunk("contract", position as u64, text),
                embedding: embedder.embed_text(text),
            })
            .collect();
        index.upsert_all(entries).await?;
        Ok(index)
    }

    #[tokio::test]
    async fn chunk_text_retrieves_itself_with_top_score() -> Result<(), RagError> {
        let embedder = CharacterNgramEmbedder::default();
        let texts = [
            "Liability is capped at one thousand dollars.",
            "The agreement renews every year unless cancelled.",
            "Invoices are payable within thirty days.",
        ];
        let retriever = Retriever::new(Arc::new(embedder), indexed(&texts, &embedder).await?);

        for (position, text) in texts.iter().enumerate() {
            let result = retriever.retrieve(text, 1).await?;
            assert_eq!(result.hits[0].chunk.chunk_index, position as u64);
            assert!((result.hits[0].score - 1.0).abs() < 1e-6);
        }
        Ok(())
    }

    #[tokio::test]
    async fn default_k_is_three() -> Result<(), RagError> {
        let embedder = CharacterNgramEmbedder::default();
        let texts = ["one clause", "two clauses", "three clauses", "four clauses", "five clauses"];
        let retriever = Retriever::new(Arc::new(embedder), indexed(&texts, &embedder).await?);

        assert_eq!(retriever.default_k(), 3);
        assert_eq!(retriever.retrieve_default("clauses").await?.len(), 3);
        assert_eq!(retriever.retrieve("clauses", 5).await?.len(), 5);
        Ok(())
    }

    #[tokio::test]
    async fn zero_k_is_invalid() -> Result<(), RagError> {
        let embedder = CharacterNgramEmbedder::default();
        let retriever = Retriever::new(Arc::new(embedder), indexed(&["text"], &embedder).await?);

        assert!(matches!(
            retriever.retrieve("text", 0).await,
            Err(RagError::InvalidConfig(_))
        ));
        assert!(Retriever::new(Arc::new(embedder), Arc::new(InMemoryVectorIndex::new()))
            .with_default_k(0)
            .is_err());
        Ok(())
    }

    #[tokio::test]
    async fn dependency_errors_pass_through() -> Result<(), RagError> {
        let empty = Retriever::new(Arc::new(FixedEmbedder(vec![1.0, 0.0])), Arc::new(InMemoryVectorIndex::new()));
        assert!(matches!(empty.retrieve("q", 3).await, Err(RagError::IndexEmpty)));

        let embedder = CharacterNgramEmbedder::default();
        let index = indexed(&["text"], &embedder).await?;

        let mismatched = Retriever::new(Arc::new(FixedEmbedder(vec![1.0, 0.0])), index.clone());
        assert!(matches!(
            mismatched.retrieve("q", 3).await,
            Err(RagError::DimensionMismatch { expected: 128, actual: 2 })
        ));

        let down = Retriever::new(Arc::new(DownEmbedder), index);
        assert!(matches!(
            down.retrieve("q", 3).await,
            Err(RagError::EmbeddingUnavailable(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn blank_query_is_rejected() -> Result<(), RagError> {
        let embedder = CharacterNgramEmbedder::default();
        let retriever = Retriever::new(Arc::new(embedder), indexed(&["text"], &embedder).await?);
        assert!(matches!(retriever.retrieve("   ", 3).await, Err(RagError::EmptyQuery)));
        Ok(())
    }
}
