use crate::embeddings::join_endpoint;
use crate::error::GenerationError;
use crate::models::GenerationParams;
use crate::traits::LanguageModel;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

pub const DEFAULT_WATSONX_URL: &str = "https://us-south.ml.cloud.ibm.com";
pub const DEFAULT_WATSONX_MODEL: &str = "ibm/granite-3-8b-instruct";
const IAM_TOKEN_URL: &str = "https://iam.cloud.ibm.com/identity/token";
const WATSONX_API_VERSION: &str = "2023-05-29";
/// Tokens are refreshed this long before the expiry IAM reports.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct WatsonxConfig {
    pub url: String,
    pub api_key: String,
    pub project_id: String,
    pub model_id: String,
    pub params: GenerationParams,
    pub timeout: Duration,
}

#[derive(Debug, Serialize)]
struct WatsonxParameters {
    decoding_method: &'static str,
    max_new_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct WatsonxRequest<'a> {
    model_id: &'a str,
    project_id: &'a str,
    input: &'a str,
    parameters: WatsonxParameters,
}

#[derive(Debug, Deserialize)]
struct WatsonxResponse {
    #[serde(default)]
    results: Vec<WatsonxResult>,
}

#[derive(Debug, Deserialize)]
struct WatsonxResult {
    #[serde(default)]
    generated_text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IamTokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    value: String,
    refresh_after: Instant,
}

/// IBM watsonx.ai text generation, authenticated with an IAM API key.
pub struct WatsonxClient {
    generation_url: Url,
    token_url: Url,
    api_key: String,
    project_id: String,
    model_id: String,
    params: GenerationParams,
    client: reqwest::Client,
    token: Mutex<Option<CachedToken>>,
}

impl WatsonxClient {
    pub fn new(config: WatsonxConfig) -> Result<Self, GenerationError> {
        if config.api_key.trim().is_empty() {
            return Err(GenerationError::Authentication(
                "watsonx API key is not set".to_string(),
            ));
        }
        if config.project_id.trim().is_empty() {
            return Err(GenerationError::Authentication(
                "watsonx project id is not set".to_string(),
            ));
        }

        let mut generation_url = join_endpoint(parse_url(&config.url)?, "ml/v1/text/generation")
            .map_err(|error| GenerationError::InvalidConfig(error.to_string()))?;
        generation_url
            .query_pairs_mut()
            .append_pair("version", WATSONX_API_VERSION);

        Ok(Self {
            generation_url,
            token_url: parse_url(IAM_TOKEN_URL)?,
            api_key: config.api_key,
            project_id: config.project_id,
            model_id: config.model_id,
            params: config.params,
            client: build_client(config.timeout)?,
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String, GenerationError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_after {
                return Ok(token.value.clone());
            }
        }

        debug!(url = %self.token_url, "requesting IAM token");
        let response = self
            .client
            .post(self.token_url.clone())
            .form(&[
                ("grant_type", "urn:ibm:params:oauth:grant-type:apikey"),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|error| GenerationError::Unavailable(format!("{}: {error}", self.token_url)))?;

        let status = response.status();
        if !status.is_success() {
            let details = response.text().await.unwrap_or_default();
            return Err(GenerationError::Authentication(format!(
                "IAM token request returned {status}: {}",
                details.trim()
            )));
        }

        let token: IamTokenResponse = response
            .json()
            .await
            .map_err(|error| GenerationError::Malformed(error.to_string()))?;
        let lifetime = Duration::from_secs(token.expires_in.unwrap_or(3_600));

        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            refresh_after: Instant::now() + lifetime.saturating_sub(TOKEN_REFRESH_MARGIN),
        });
        Ok(token.access_token)
    }
}

#[async_trait]
impl LanguageModel for WatsonxClient {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let token = self.access_token().await?;

        let request = WatsonxRequest {
            model_id: &self.model_id,
            project_id: &self.project_id,
            input: prompt,
            parameters: WatsonxParameters {
                decoding_method: self.params.decoding.as_str(),
                max_new_tokens: self.params.max_new_tokens,
                temperature: self.params.temperature,
            },
        };

        let response = self
            .client
            .post(self.generation_url.clone())
            .bearer_auth(token)
            .json(&request)
            .send()
            .await
            .map_err(|error| GenerationError::Unavailable(error.to_string()))?;

        let payload: WatsonxResponse = read_success(response).await?;
        let text = payload
            .results
            .into_iter()
            .next()
            .and_then(|result| result.generated_text)
            .ok_or_else(|| GenerationError::Malformed("response has no results".to_string()))?;

        non_empty(text)
    }
}

#[derive(Debug, Clone)]
pub struct OllamaGenerateConfig {
    pub base_url: String,
    pub model: String,
    pub params: GenerationParams,
    pub timeout: Duration,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    #[serde(default)]
    response: Option<String>,
}

/// Text generation through an Ollama-compatible `/api/generate` endpoint.
pub struct OllamaGenerateClient {
    endpoint: Url,
    model: String,
    params: GenerationParams,
    client: reqwest::Client,
}

impl OllamaGenerateClient {
    pub fn new(config: OllamaGenerateConfig) -> Result<Self, GenerationError> {
        let endpoint = join_endpoint(parse_url(&config.base_url)?, "api/generate")
            .map_err(|error| GenerationError::InvalidConfig(error.to_string()))?;

        Ok(Self {
            endpoint,
            model: config.model,
            params: config.params,
            client: build_client(config.timeout)?,
        })
    }
}

#[async_trait]
impl LanguageModel for OllamaGenerateClient {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        // Greedy decoding maps onto temperature zero.
        let temperature = match self.params.decoding {
            crate::models::DecodingMethod::Greedy => 0.0,
            crate::models::DecodingMethod::Sample => self.params.temperature,
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&OllamaGenerateRequest {
                model: &self.model,
                prompt,
                stream: false,
                options: OllamaOptions {
                    temperature,
                    num_predict: self.params.max_new_tokens,
                },
            })
            .send()
            .await
            .map_err(|error| GenerationError::Unavailable(format!("{}: {error}", self.endpoint)))?;

        let payload: OllamaGenerateResponse = read_success(response).await?;
        non_empty(payload.response.unwrap_or_default())
    }
}

fn parse_url(raw: &str) -> Result<Url, GenerationError> {
    Url::parse(raw)
        .map_err(|error| GenerationError::InvalidConfig(format!("{raw:?} is not a url: {error}")))
}

fn build_client(timeout: Duration) -> Result<reqwest::Client, GenerationError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|error| GenerationError::InvalidConfig(format!("http client: {error}")))
}

async fn read_success<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, GenerationError> {
    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        let details = response.text().await.unwrap_or_default();
        return Err(GenerationError::Authentication(format!("{status}: {}", details.trim())));
    }
    if !status.is_success() {
        let details = response.text().await.unwrap_or_default();
        return Err(GenerationError::Rejected {
            status: status.as_u16(),
            details: details.trim().to_string(),
        });
    }

    response
        .json()
        .await
        .map_err(|error| GenerationError::Malformed(error.to_string()))
}

fn non_empty(text: String) -> Result<String, GenerationError> {
    if text.trim().is_empty() {
        Err(GenerationError::EmptyResponse)
    } else {
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn watsonx_config() -> WatsonxConfig {
        WatsonxConfig {
            url: DEFAULT_WATSONX_URL.to_string(),
            api_key: "key".to_string(),
            project_id: "project".to_string(),
            model_id: DEFAULT_WATSONX_MODEL.to_string(),
            params: GenerationParams::default(),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn watsonx_requires_credentials() {
        let missing_key = WatsonxConfig {
            api_key: " ".to_string(),
            ..watsonx_config()
        };
        assert!(matches!(
            WatsonxClient::new(missing_key),
            Err(GenerationError::Authentication(_))
        ));

        let missing_project = WatsonxConfig {
            project_id: String::new(),
            ..watsonx_config()
        };
        assert!(matches!(
            WatsonxClient::new(missing_project),
            Err(GenerationError::Authentication(_))
        ));
    }

    #[test]
    fn watsonx_generation_url_carries_api_version() -> Result<(), GenerationError> {
        let client = WatsonxClient::new(watsonx_config())?;
        assert_eq!(
            client.generation_url.as_str(),
            "https://us-south.ml.cloud.ibm.com/ml/v1/text/generation?version=2023-05-29"
        );
        Ok(())
    }

    #[test]
    fn watsonx_request_body_uses_generation_parameters() -> Result<(), serde_json::Error> {
        let request = WatsonxRequest {
            model_id: DEFAULT_WATSONX_MODEL,
            project_id: "project",
            input: "prompt",
            parameters: WatsonxParameters {
                decoding_method: "sample",
                max_new_tokens: 512,
                temperature: 0.25,
            },
        };
        let body = serde_json::to_value(&request)?;
        assert_eq!(body["parameters"]["decoding_method"], "sample");
        assert_eq!(body["parameters"]["max_new_tokens"], 512);
        assert_eq!(body["parameters"]["temperature"], 0.25);
        assert_eq!(body["input"], "prompt");
        Ok(())
    }

    #[test]
    fn blank_generation_is_empty_response() {
        assert!(matches!(
            non_empty("  \n".to_string()),
            Err(GenerationError::EmptyResponse)
        ));
        assert!(non_empty("answer".to_string()).is_ok());
    }

    #[test]
    fn ollama_endpoint_keeps_base_path_prefix() -> Result<(), GenerationError> {
        let client = OllamaGenerateClient::new(OllamaGenerateConfig {
            base_url: "http://gateway.internal/ollama".to_string(),
            model: "granite".to_string(),
            params: GenerationParams::default(),
            timeout: Duration::from_secs(2),
        })?;
        assert_eq!(client.endpoint.as_str(), "http://gateway.internal/ollama/api/generate");
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_ollama_is_unavailable() -> Result<(), GenerationError> {
        let client = OllamaGenerateClient::new(OllamaGenerateConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            model: "granite".to_string(),
            params: GenerationParams::default(),
            timeout: Duration::from_secs(2),
        })?;

        let result = client.generate("State your status.").await;
        assert!(matches!(result, Err(GenerationError::Unavailable(_))));
        Ok(())
    }
}
