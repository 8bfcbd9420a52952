use crate::answer::AnswerComposer;
use crate::retriever::Retriever;
use crate::{AnswerOutcome, RagError};
use tracing::{info, warn};

/// Query-time coordination: retrieval first, then grounded generation.
pub struct QueryEngine {
    retriever: Retriever,
    composer: AnswerComposer,
}

impl QueryEngine {
    pub fn new(retriever: Retriever, composer: AnswerComposer) -> Self {
        Self {
            retriever,
            composer,
        }
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Retrieval errors propagate; generation failures are already folded
    /// into the outcome.
    pub async fn ask(&self, question: &str, k: Option<usize>) -> Result<AnswerOutcome, RagError> {
        let k = k.unwrap_or_else(|| self.retriever.default_k());
        let retrieval = self.retriever.retrieve(question, k).await?;
        info!(k, hits = retrieval.len(), "context retrieved");
        Ok(self.composer.answer(question, &retrieval).await)
    }

    /// Always yields something the chat surface can show.
    pub async fn respond(&self, question: &str) -> String {
        match self.ask(question, None).await {
            Ok(outcome) => outcome.render(),
            Err(error) => {
                warn!(%error, "retrieval failed");
                format!("Unable to retrieve context for this question: {error}")
            }
        }
    }
}
