use thiserror::Error;

/// Failure of a single document during ingestion. Recorded in the report,
/// never fatal for the run.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("path has no file name: {0}")]
    MissingFileName(String),
}

#[derive(Debug, Error)]
pub enum RagError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("embedding endpoint unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("malformed embedding response: {0}")]
    MalformedEmbedding(String),

    #[error("vector index is empty; run ingestion first")]
    IndexEmpty,

    #[error("dimension mismatch: index stores {expected}-dimensional vectors, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("query is empty")]
    EmptyQuery,

    #[error("no pdf files found in {0}")]
    NoDocuments(String),

    #[error("vector index storage error: {0}")]
    Storage(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure of the language-model collaborator. The answer composer turns
/// this into a displayable outcome; it is never propagated to the caller.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("invalid language model configuration: {0}")]
    InvalidConfig(String),

    #[error("language model unavailable: {0}")]
    Unavailable(String),

    #[error("language model authentication failed: {0}")]
    Authentication(String),

    #[error("language model rejected the request ({status}): {details}")]
    Rejected { status: u16, details: String },

    #[error("language model returned an empty response")]
    EmptyResponse,

    #[error("malformed language model response: {0}")]
    Malformed(String),
}
