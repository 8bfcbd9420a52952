use super::Collection;
use crate::traits::VectorIndex;
use crate::{IndexEntry, RagError, RetrievalResult};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Non-persistent index with the same contract as [`super::FileVectorIndex`].
#[derive(Debug, Default)]
pub struct InMemoryVectorIndex {
    collection: RwLock<Arc<Collection>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.collection.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert_all(&self, entries: Vec<IndexEntry>) -> Result<(), RagError> {
        let collection = Arc::new(Collection::build(entries)?);
        *self.collection.write().await = collection;
        Ok(())
    }

    async fn search(&self, query_vector: &[f32], k: usize) -> Result<RetrievalResult, RagError> {
        let collection = Arc::clone(&*self.collection.read().await);
        collection.search(query_vector, k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::tests::entry;

    #[tokio::test]
    async fn upsert_all_replaces_previous_entries() -> Result<(), RagError> {
        let index = InMemoryVectorIndex::new();
        assert!(matches!(index.search(&[1.0], 1).await, Err(RagError::IndexEmpty)));

        index
            .upsert_all(vec![entry("old", 0, vec![1.0, 0.0]), entry("old", 1, vec![0.0, 1.0])])
            .await?;
        index.upsert_all(vec![entry("new", 0, vec![1.0, 0.0])]).await?;

        assert_eq!(index.len().await, 1);
        let result = index.search(&[1.0, 0.0], 5).await?;
        assert_eq!(result.hits[0].chunk.source_name, "new");
        Ok(())
    }

    #[tokio::test]
    async fn rejected_rebuild_keeps_previous_collection() -> Result<(), RagError> {
        let index = InMemoryVectorIndex::new();
        index.upsert_all(vec![entry("old", 0, vec![1.0, 0.0])]).await?;

        let mixed = vec![entry("new", 0, vec![1.0, 0.0]), entry("new", 1, vec![1.0])];
        assert!(index.upsert_all(mixed).await.is_err());

        let result = index.search(&[1.0, 0.0], 1).await?;
        assert_eq!(result.hits[0].chunk.source_name, "old");
        Ok(())
    }
}
