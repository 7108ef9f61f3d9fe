//! TOML configuration.
//!
//! Every section and key is optional; a missing key takes the default shown
//! in `config/docqa.example.toml`. [`Config::validate`] runs after parsing
//! and reports the first invalid field as [`docqa_core::Error::Config`].

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use docqa_core::models::ChunkingParams;

/// Config file read when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "./config/docqa.toml";

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub documents: DocumentsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct DocumentsConfig {
    #[serde(default = "default_docs_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_true")]
    pub recursive: bool,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            dir: default_docs_dir(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            recursive: true,
            follow_symlinks: false,
        }
    }
}

fn default_docs_dir() -> PathBuf {
    PathBuf::from("./docs")
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    #[serde(default = "default_storage_dir")]
    pub dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: default_storage_dir(),
        }
    }
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("./storage")
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    512
}
fn default_chunk_overlap() -> usize {
    50
}

impl ChunkingConfig {
    pub fn params(&self) -> docqa_core::Result<ChunkingParams> {
        ChunkingParams::new(self.chunk_size, self.chunk_overlap)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First retry delay; doubles per attempt up to 32x.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL override for the `openai` and `ollama` providers.
    #[serde(default)]
    pub url: Option<String>,
    /// Input limit of the model in its own tokens. Overrides the built-in
    /// table; needed to bound `chunk_size` for models the table lacks.
    #[serde(default)]
    pub context_tokens: Option<usize>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
            timeout_secs: default_timeout_secs(),
            url: None,
            context_tokens: None,
        }
    }
}

fn default_embedding_provider() -> String {
    "hash".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_backoff_ms() -> u64 {
    1000
}

/// Upper bound for `embedding.backoff_ms` (ten minutes).
pub const MAX_BACKOFF_MS: u64 = 600_000;
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    /// The configured model, or the provider's default.
    pub fn model_name(&self) -> String {
        if let Some(model) = &self.model {
            return model.clone();
        }
        match self.provider.as_str() {
            "openai" => "text-embedding-3-small",
            "ollama" => "nomic-embed-text",
            "local" => "all-minilm-l6-v2",
            _ => "feature-hash-v1",
        }
        .to_string()
    }

    /// The configured dimensionality, or the known size of the resolved model.
    pub fn resolved_dims(&self) -> Option<usize> {
        if self.dims.is_some() {
            return self.dims;
        }
        let model = self.model_name();
        match (self.provider.as_str(), model.as_str()) {
            ("hash", _) => Some(docqa_core::embedding::HASH_EMBEDDER_DIMS),
            ("openai", "text-embedding-3-small") => Some(1536),
            ("openai", "text-embedding-3-large") => Some(3072),
            ("openai", "text-embedding-ada-002") => Some(1536),
            ("ollama", "nomic-embed-text") => Some(768),
            ("ollama", "mxbai-embed-large") => Some(1024),
            ("ollama", "all-minilm") => Some(384),
            ("local", "all-minilm-l6-v2" | "bge-small-en-v1.5" | "multilingual-e5-small") => {
                Some(384)
            }
            ("local", "bge-base-en-v1.5" | "nomic-embed-text-v1" | "nomic-embed-text-v1.5") => {
                Some(768)
            }
            ("local", "multilingual-e5-base") => Some(768),
            ("local", "bge-large-en-v1.5" | "multilingual-e5-large") => Some(1024),
            _ => None,
        }
    }

    /// How many model tokens one input may hold before the provider
    /// truncates it. `None` means no limit (the hash embedder) or unknown.
    pub fn resolved_context_tokens(&self) -> Option<usize> {
        if self.context_tokens.is_some() {
            return self.context_tokens;
        }
        let model = self.model_name();
        match (self.provider.as_str(), model.as_str()) {
            ("hash", _) => None,
            ("openai", _) => Some(8191),
            ("ollama", "nomic-embed-text") => Some(2048),
            ("ollama", "mxbai-embed-large") => Some(512),
            ("ollama", "all-minilm") => Some(256),
            // fastembed truncates every model at 512 tokens
            ("local", _) => Some(512),
            _ => None,
        }
    }

    /// Largest `chunk_size`, in whitespace words, that fits the model's
    /// input without truncation.
    ///
    /// Subword tokenizers emit about four tokens per three English words.
    pub fn max_chunk_words(&self) -> Option<usize> {
        self.resolved_context_tokens().map(|tokens| tokens * 3 / 4)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: default_generation_model(),
            temperature: default_temperature(),
            timeout_secs: default_generation_timeout_secs(),
            url: None,
        }
    }
}

fn default_generation_provider() -> String {
    "openai".to_string()
}
fn default_generation_model() -> String {
    "gpt-3.5-turbo".to_string()
}
fn default_temperature() -> f32 {
    0.1
}
fn default_generation_timeout_secs() -> u64 {
    60
}

impl Config {
    /// Check every cross-field constraint the pipeline relies on.
    pub fn validate(&self) -> docqa_core::Result<()> {
        use docqa_core::Error;

        self.chunking.params()?;

        if self.retrieval.top_k < 1 {
            return Err(Error::config("retrieval.top_k", "must be >= 1"));
        }

        let embedding = &self.embedding;
        match embedding.provider.as_str() {
            "hash" | "openai" | "ollama" | "local" => {}
            other => {
                return Err(Error::config(
                    "embedding.provider",
                    format!(
                        "unknown provider '{}'; must be hash, openai, ollama, or local",
                        other
                    ),
                ))
            }
        }
        if embedding.batch_size == 0 {
            return Err(Error::config("embedding.batch_size", "must be > 0"));
        }
        if embedding.backoff_ms > MAX_BACKOFF_MS {
            return Err(Error::config(
                "embedding.backoff_ms",
                format!("must be <= {}", MAX_BACKOFF_MS),
            ));
        }
        if embedding.context_tokens == Some(0) {
            return Err(Error::config("embedding.context_tokens", "must be > 0"));
        }
        match embedding.resolved_dims() {
            Some(0) => return Err(Error::config("embedding.dims", "must be > 0")),
            Some(_) => {}
            None => {
                return Err(Error::config(
                    "embedding.dims",
                    format!(
                        "must be set for model '{}' of provider '{}'",
                        embedding.model_name(),
                        embedding.provider
                    ),
                ))
            }
        }

        if let Some(max_words) = embedding.max_chunk_words() {
            if self.chunking.chunk_size > max_words {
                return Err(Error::config(
                    "chunking.chunk_size",
                    format!(
                        "{} words would be truncated by '{}' ({} token input); use at most {} or set embedding.context_tokens",
                        self.chunking.chunk_size,
                        embedding.model_name(),
                        embedding.resolved_context_tokens().unwrap_or_default(),
                        max_words
                    ),
                ));
            }
        }

        let generation = &self.generation;
        match generation.provider.as_str() {
            "openai" | "extractive" => {}
            other => {
                return Err(Error::config(
                    "generation.provider",
                    format!("unknown provider '{}'; must be openai or extractive", other),
                ))
            }
        }
        if !(0.0..=2.0).contains(&generation.temperature) {
            return Err(Error::config(
                "generation.temperature",
                "must be in [0.0, 2.0]",
            ));
        }

        Ok(())
    }
}

/// Read, parse, and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    config
        .validate()
        .with_context(|| format!("Invalid config file: {}", path.display()))?;

    Ok(config)
}

/// Resolve the effective configuration.
///
/// An explicit path must exist. Without one, [`DEFAULT_CONFIG_PATH`] is read
/// if present; otherwise built-in defaults apply.
pub fn resolve_config(explicit: Option<&Path>) -> Result<Config> {
    if let Some(path) = explicit {
        return load_config(path);
    }

    let default_path = Path::new(DEFAULT_CONFIG_PATH);
    if default_path.exists() {
        return load_config(default_path);
    }

    tracing::debug!("no config file at {}, using defaults", DEFAULT_CONFIG_PATH);
    let config = Config::default();
    config.validate()?;
    Ok(config)
}
