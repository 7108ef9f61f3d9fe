//! Embedding providers selected by configuration.
//!
//! Every provider is exposed through [`docqa_core::embedding::Embedder`]:
//! - **`hash`**: [`HashEmbedder`], deterministic and offline.
//! - **`openai`**: `POST /v1/embeddings` on the OpenAI API.
//! - **`ollama`**: `POST /api/embed` on a local Ollama instance.
//! - **`local`**: fastembed sentence-transformer models (feature
//!   `local-embeddings-fastembed`); the model is loaded once per process.
//!
//! Remote and model-backed providers implement the narrow
//! [`EmbeddingBackend`] trait and are wrapped in [`BatchedEmbedder`], which
//! owns the shared contract: input validation, the zero-vector sentinel for
//! blank text, batching, retry, and output shape checks.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors and model load failures → retry
//! - Backoff: `backoff_ms` × 1, 2, 4, 8, 16, 32 (capped at 2^5)

use async_trait::async_trait;
use std::time::Duration;

use docqa_core::embedding::{is_blank, validate_text, zero_vector, Embedder, HashEmbedder};
use docqa_core::models::Embedding;
use docqa_core::{Error, Result};

use crate::config::EmbeddingConfig;

/// A raw embedding capability: one request, no retry, no validation.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Embed non-blank, validated texts. One vector per input, in order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>>;
}

/// Exponential backoff schedule for transient failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff: Duration::from_millis(config.backoff_ms),
        }
    }

    /// Delay before retry `attempt` (1-based). Saturates instead of
    /// overflowing.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff
            .checked_mul(1u32 << attempt.saturating_sub(1).min(5))
            .unwrap_or(Duration::MAX)
    }
}

/// Adapts an [`EmbeddingBackend`] to the [`Embedder`] contract.
pub struct BatchedEmbedder<B> {
    backend: B,
    model_id: String,
    dims: usize,
    batch_size: usize,
    retry: RetryPolicy,
}

impl<B: EmbeddingBackend> BatchedEmbedder<B> {
    pub fn new(
        backend: B,
        model_id: impl Into<String>,
        dims: usize,
        batch_size: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            backend,
            model_id: model_id.into(),
            dims,
            batch_size: batch_size.max(1),
            retry,
        }
    }

    async fn embed_with_retry(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let mut last_err = None;

        for attempt in 0..=self.retry.max_retries {
            if attempt > 0 {
                let delay = self.retry.delay(attempt);
                tracing::warn!(
                    model = %self.model_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying embedding batch"
                );
                tokio::time::sleep(delay).await;
            }

            match self.backend.embed_batch(texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(e) if e.is_transient() => {
                    tracing::debug!(model = %self.model_id, error = %e, "transient embedding failure");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        let attempts = self.retry.max_retries + 1;
        Err(match last_err {
            Some(Error::ModelUnavailable { model, reason }) => Error::ModelUnavailable {
                model,
                reason: format!("{} (gave up after {} attempts)", reason, attempts),
            },
            Some(Error::Embedding { reason, .. }) => Error::Embedding {
                reason: format!("{} (gave up after {} attempts)", reason, attempts),
                transient: false,
            },
            Some(e) => e,
            None => Error::Embedding {
                reason: "embedding failed after retries".to_string(),
                transient: false,
            },
        })
    }

    fn check_shape(&self, sent: usize, vectors: &[Embedding]) -> Result<()> {
        if vectors.len() != sent {
            return Err(Error::Embedding {
                reason: format!(
                    "{} returned {} vectors for {} inputs",
                    self.model_id,
                    vectors.len(),
                    sent
                ),
                transient: false,
            });
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dims) {
            return Err(Error::DimensionMismatch {
                expected: self.dims,
                actual: bad.len(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl<B: EmbeddingBackend> Embedder for BatchedEmbedder<B> {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        for (i, text) in texts.iter().enumerate() {
            validate_text(i, text)?;
        }

        let mut output: Vec<Option<Embedding>> = vec![None; texts.len()];
        let pending: Vec<usize> = texts
            .iter()
            .enumerate()
            .filter_map(|(i, text)| {
                if is_blank(text) {
                    None
                } else {
                    Some(i)
                }
            })
            .collect();

        for batch in pending.chunks(self.batch_size) {
            let batch_texts: Vec<String> = batch.iter().map(|&i| texts[i].clone()).collect();
            let vectors = self.embed_with_retry(&batch_texts).await?;
            self.check_shape(batch_texts.len(), &vectors)?;
            for (&i, vector) in batch.iter().zip(vectors) {
                output[i] = Some(vector);
            }
        }

        Ok(output
            .into_iter()
            .map(|v| v.unwrap_or_else(|| zero_vector(self.dims)))
            .collect())
    }
}

// ============ HTTP helpers ============

fn http_client(model_id: &str, timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| Error::ModelUnavailable {
            model: model_id.to_string(),
            reason: format!("failed to build HTTP client: {}", e),
        })
}

/// Send a JSON request and return the decoded body, classifying failures.
async fn post_json(
    request: reqwest::RequestBuilder,
    model_id: &str,
    service: &str,
) -> Result<serde_json::Value> {
    let response = request.send().await.map_err(|e| Error::ModelUnavailable {
        model: model_id.to_string(),
        reason: format!("{} unreachable: {}", service, e),
    })?;

    let status = response.status();
    if status.is_success() {
        return response.json().await.map_err(|e| Error::Embedding {
            reason: format!("{} returned an unreadable body: {}", service, e),
            transient: true,
        });
    }

    let body_text = response.text().await.unwrap_or_default();
    Err(Error::Embedding {
        reason: format!("{} API error {}: {}", service, status, body_text),
        transient: status.as_u16() == 429 || status.is_server_error(),
    })
}

fn json_to_vector(value: &serde_json::Value, service: &str) -> Result<Embedding> {
    value
        .as_array()
        .ok_or_else(|| invalid_response(service, "embedding is not an array"))?
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| invalid_response(service, "embedding contains a non-number"))
        })
        .collect()
}

fn invalid_response(service: &str, detail: &str) -> Error {
    Error::Embedding {
        reason: format!("invalid {} response: {}", service, detail),
        transient: false,
    }
}

// ============ OpenAI Provider ============

pub struct OpenAiBackend {
    client: reqwest::Client,
    api_key: String,
    model: String,
    model_id: String,
    url: String,
}

impl OpenAiBackend {
    pub fn new(config: &EmbeddingConfig, api_key: String) -> Result<Self> {
        let model = config.model_name();
        let model_id = format!("openai:{}", model);
        Ok(Self {
            client: http_client(&model_id, config.timeout_secs)?,
            api_key,
            model,
            model_id,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
        })
    }
}

#[async_trait]
impl EmbeddingBackend for OpenAiBackend {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let request = self
            .client
            .post(format!("{}/v1/embeddings", self.url.trim_end_matches('/')))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body);

        let json = post_json(request, &self.model_id, "OpenAI").await?;
        parse_openai_response(&json)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Embedding>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| invalid_response("OpenAI", "missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        let embedding = item
            .get("embedding")
            .ok_or_else(|| invalid_response("OpenAI", "missing embedding"))?;
        indexed.push((index, json_to_vector(embedding, "OpenAI")?));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama Provider ============

/// Requires Ollama to be running with the model pulled
/// (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaBackend {
    client: reqwest::Client,
    model: String,
    model_id: String,
    url: String,
}

impl OllamaBackend {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config.model_name();
        let model_id = format!("ollama:{}", model);
        Ok(Self {
            client: http_client(&model_id, config.timeout_secs)?,
            model,
            model_id,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
        })
    }
}

#[async_trait]
impl EmbeddingBackend for OllamaBackend {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let request = self
            .client
            .post(format!("{}/api/embed", self.url.trim_end_matches('/')))
            .json(&body);

        let json = post_json(request, &self.model_id, "Ollama").await?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Embedding>> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| invalid_response("Ollama", "missing embeddings array"))?
        .iter()
        .map(|e| json_to_vector(e, "Ollama"))
        .collect()
}

// ============ Local Provider (fastembed) ============

#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalBackend {
    model: fastembed::EmbeddingModel,
    model_id: String,
    loaded: tokio::sync::OnceCell<
        std::sync::Arc<std::sync::Mutex<fastembed::TextEmbedding>>,
    >,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalBackend {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let name = config.model_name();
        Ok(Self {
            model: fastembed_model(&name)?,
            model_id: format!("local:{}", name),
            loaded: tokio::sync::OnceCell::new(),
        })
    }

    async fn model(
        &self,
    ) -> Result<std::sync::Arc<std::sync::Mutex<fastembed::TextEmbedding>>> {
        self.loaded
            .get_or_try_init(|| async {
                let model = self.model.clone();
                tracing::info!(model = %self.model_id, "loading local embedding model");
                let loaded = tokio::task::spawn_blocking(move || {
                    fastembed::TextEmbedding::try_new(
                        fastembed::InitOptions::new(model).with_show_download_progress(false),
                    )
                })
                .await
                .map_err(|e| self.unavailable(e.to_string()))?
                .map_err(|e| self.unavailable(e.to_string()))?;
                Ok::<_, Error>(std::sync::Arc::new(std::sync::Mutex::new(loaded)))
            })
            .await
            .cloned()
    }

    fn unavailable(&self, reason: String) -> Error {
        Error::ModelUnavailable {
            model: self.model_id.clone(),
            reason,
        }
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl EmbeddingBackend for LocalBackend {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let model = self.model().await?;
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut guard = model.lock().map_err(|_| Error::Embedding {
                reason: "local embedding model lock poisoned".to_string(),
                transient: false,
            })?;
            guard.embed(texts, None).map_err(|e| Error::Embedding {
                reason: format!("local embedding failed: {}", e),
                transient: false,
            })
        })
        .await
        .map_err(|e| Error::Embedding {
            reason: format!("local embedding task failed: {}", e),
            transient: false,
        })?
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
fn fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    use fastembed::EmbeddingModel;
    match name {
        "all-minilm-l6-v2" => Ok(EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1" => Ok(EmbeddingModel::NomicEmbedTextV1),
        "nomic-embed-text-v1.5" => Ok(EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(EmbeddingModel::MultilingualE5Large),
        other => Err(Error::config(
            "embedding.model",
            format!("unknown local embedding model '{}'", other),
        )),
    }
}

/// Create the [`Embedder`] named by `config.provider`.
///
/// | Config Value | Embedder |
/// |-------------|----------|
/// | `"hash"` | [`HashEmbedder`] |
/// | `"openai"` | [`BatchedEmbedder`] over [`OpenAiBackend`] (needs `OPENAI_API_KEY`) |
/// | `"ollama"` | [`BatchedEmbedder`] over [`OllamaBackend`] |
/// | `"local"` | `BatchedEmbedder` over `LocalBackend` (feature `local-embeddings-fastembed`) |
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Box<dyn Embedder>> {
    let model = config.model_name();
    let dims = config.resolved_dims().ok_or_else(|| {
        Error::config(
            "embedding.dims",
            format!("must be set for model '{}'", model),
        )
    })?;
    let model_id = format!("{}:{}", config.provider, model);
    let retry = RetryPolicy::from_config(config);

    match config.provider.as_str() {
        "hash" => Ok(Box::new(HashEmbedder::new(&model, dims)?)),
        "openai" => {
            let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
                Error::config(
                    "embedding.provider",
                    "OPENAI_API_KEY environment variable not set",
                )
            })?;
            let backend = OpenAiBackend::new(config, api_key)?;
            Ok(Box::new(BatchedEmbedder::new(
                backend,
                model_id,
                dims,
                config.batch_size,
                retry,
            )))
        }
        "ollama" => {
            let backend = OllamaBackend::new(config)?;
            Ok(Box::new(BatchedEmbedder::new(
                backend,
                model_id,
                dims,
                config.batch_size,
                retry,
            )))
        }
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => {
            let backend = LocalBackend::new(config)?;
            Ok(Box::new(BatchedEmbedder::new(
                backend,
                model_id,
                dims,
                config.batch_size,
                retry,
            )))
        }
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => Err(Error::config(
            "embedding.provider",
            "the local provider requires building with --features local-embeddings-fastembed",
        )),
        other => Err(Error::config(
            "embedding.provider",
            format!("unknown provider '{}'", other),
        )),
    }
}
