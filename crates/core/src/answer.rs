use crate::traits::LanguageModel;
use crate::{Answer, AnswerOutcome, Citation, GenerationError, RetrievalResult};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

const INSTRUCTIONS: &str = "Use the following pieces of context to answer the question at the end.
If you don't know the answer, just say that you don't know, don't try to make up an answer.
Keep the answer as concise as possible. Always cite the source document name.";

pub const NO_CONTEXT_MARKER: &str = "[No context available: no matching passages were found.]";

/// Builds the grounded prompt: instructions, the retrieved chunk texts in
/// result order, then the question.
pub fn build_prompt(question: &str, retrieval: &RetrievalResult) -> String {
    let context = if retrieval.is_empty() {
        NO_CONTEXT_MARKER.to_string()
    } else {
        retrieval
            .chunks()
            .map(|chunk| chunk.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    };

    format!("{INSTRUCTIONS}\n\n{context}\n\nQuestion: {question}\nHelpful Answer:")
}

/// Unique `(source_name, page_number)` pairs of the retrieved chunks, in
/// first-occurrence order.
pub fn citations(retrieval: &RetrievalResult) -> Vec<Citation> {
    let mut seen = HashSet::new();
    retrieval
        .chunks()
        .map(|chunk| chunk.citation())
        .filter(|citation| seen.insert(citation.clone()))
        .collect()
}

pub struct AnswerComposer {
    model: Arc<dyn LanguageModel>,
}

impl AnswerComposer {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// Always calls the model, even without context. Model failures come
    /// back as [`AnswerOutcome::GenerationFailed`].
    pub async fn answer(&self, question: &str, retrieval: &RetrievalResult) -> AnswerOutcome {
        let prompt = build_prompt(question, retrieval);
        debug!(
            prompt_chars = prompt.chars().count(),
            context_chunks = retrieval.len(),
            "invoking language model"
        );

        match self.model.generate(&prompt).await {
            Ok(text) if !text.trim().is_empty() => AnswerOutcome::Grounded(Answer {
                text: text.trim().to_string(),
                citations: citations(retrieval),
            }),
            Ok(_) => failed(GenerationError::EmptyResponse),
            Err(error) => failed(error),
        }
    }
}

fn failed(error: GenerationError) -> AnswerOutcome {
    warn!(%error, "answer generation failed");
    AnswerOutcome::GenerationFailed {
        message: error.to_string(),
    }
}
