pub mod answer;
pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod generation;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod retriever;
pub mod stores;
pub mod traits;

pub use answer::{build_prompt, citations, AnswerComposer, NO_CONTEXT_MARKER};
pub use chunking::{split, split_text, ChunkingConfig};
pub use embeddings::{
    CharacterNgramEmbedder, EmbeddingClient, EmbeddingEndpointConfig, OllamaEmbeddingClient,
    DEFAULT_EMBEDDING_DIMENSIONS, DEFAULT_EMBEDDING_MODEL,
};
pub use error::{GenerationError, IngestError, RagError};
pub use extractor::{clean_page_text, digest_file, load_document, LopdfExtractor, PdfExtractor};
pub use generation::{
    OllamaGenerateClient, OllamaGenerateConfig, WatsonxClient, WatsonxConfig,
    DEFAULT_WATSONX_MODEL, DEFAULT_WATSONX_URL,
};
pub use ingest::{discover_pdf_files, source_name_for, IngestionPipeline};
pub use models::{
    Answer, AnswerOutcome, Chunk, Citation, DecodingMethod, Document, GenerationParams,
    IndexEntry, IngestionOptions, IngestionReport, Page, RetrievalResult, ScoredChunk, SkippedPdf,
    DEFAULT_TOP_K,
};
pub use orchestrator::QueryEngine;
pub use retriever::Retriever;
pub use stores::{cosine_similarity, FileVectorIndex, InMemoryVectorIndex, IndexManifest};
pub use traits::{LanguageModel, VectorIndex};
