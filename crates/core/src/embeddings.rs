use crate::error::RagError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

const DEFAULT: usize = 128;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;
pub const DEFAULT_EMBEDDING_MODEL: &str = "mxbai-embed-large";

/// Maps text to fixed-length vectors. `embed_batch` returns one vector per
/// input, in input order.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Label stored alongside an index so a model change is visible.
    fn model(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}

/// Hashed character-trigram embedder. Deterministic and offline.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl EmbeddingClient for CharacterNgramEmbedder {
    fn model(&self) -> &str {
        "character-trigram"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
        Ok(self.embed_text(text))
    }
}

#[derive(Debug, Clone)]
pub struct EmbeddingEndpointConfig {
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

impl Default for EmbeddingEndpointConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

/// Adapter for an Ollama-compatible `/api/embed` endpoint.
pub struct OllamaEmbeddingClient {
    endpoint: Url,
    model: String,
    client: reqwest::Client,
}

impl OllamaEmbeddingClient {
    pub fn new(config: EmbeddingEndpointConfig) -> Result<Self, RagError> {
        let base = Url::parse(&config.base_url).map_err(|error| {
            RagError::InvalidConfig(format!(
                "embedding endpoint {:?} is not a url: {error}",
                config.base_url
            ))
        })?;
        let endpoint = join_endpoint(base, "api/embed").map_err(|error| {
            RagError::InvalidConfig(format!("embedding endpoint path: {error}"))
        })?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|error| RagError::InvalidConfig(format!("http client: {error}")))?;

        Ok(Self {
            endpoint,
            model: config.model,
            client,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

/// Appends `path` below the base URL's path, whether or not the base ends
/// in a slash.
pub(crate) fn join_endpoint(mut base: Url, path: &str) -> Result<Url, url::ParseError> {
    if !base.path().ends_with('/') {
        let directory = format!("{}/", base.path());
        base.set_path(&directory);
    }
    base.join(path)
}

#[async_trait]
impl EmbeddingClient for OllamaEmbeddingClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| RagError::MalformedEmbedding("no vector returned".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(endpoint = %self.endpoint, model = %self.model, batch = texts.len(), "embedding batch");

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|error| {
                RagError::EmbeddingUnavailable(format!("{}: {error}", self.endpoint))
            })?;

        let status = response.status();
        if !status.is_success() {
            let details = response.text().await.unwrap_or_default();
            return Err(RagError::EmbeddingUnavailable(format!(
                "{} returned {status}: {}",
                self.endpoint,
                details.trim()
            )));
        }

        let payload: EmbedResponse = response
            .json()
            .await
            .map_err(|error| RagError::MalformedEmbedding(error.to_string()))?;

        validate_batch(texts.len(), payload.embeddings)
    }
}

fn validate_batch(expected: usize, vectors: Vec<Vec<f32>>) -> Result<Vec<Vec<f32>>, RagError> {
    if vectors.len() != expected {
        return Err(RagError::MalformedEmbedding(format!(
            "requested {expected} embeddings, received {}",
            vectors.len()
        )));
    }

    if let Some(first) = vectors.first() {
        let dimensions = first.len();
        if dimensions == 0 {
            return Err(RagError::MalformedEmbedding("empty vector".to_string()));
        }
        if vectors.iter().any(|vector| vector.len() != dimensions) {
            return Err(RagError::MalformedEmbedding(
                "vectors in one batch differ in length".to_string(),
            ));
        }
    }

    Ok(vectors)
}
