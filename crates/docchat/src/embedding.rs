//! Embedding providers.
//!
//! Implementations of [`Embedder`]:
//! - **[`OpenAiEmbedder`]**: `POST {url}/v1/embeddings` on any OpenAI-compatible API.
//! - **[`OllamaEmbedder`]**: `POST {url}/api/embed` on a local Ollama instance.
//! - **[`LocalEmbedder`]**: runs a model in-process via fastembed (feature
//!   `local-embeddings-fastembed`). Models are downloaded on first use and
//!   cached; after that no network calls are made.
//! - **[`HashingEmbedder`]**: deterministic feature hashing. No model, no
//!   network; useful offline and in tests.
//!
//! Each call is a single attempt that classifies failures as
//! [`ServiceError`]s. Retries are applied by the caller through
//! [`CallPolicy`](crate::policy::CallPolicy).
//!
//! Use [`create_embedder`] to build the configured provider:
//!
//! ```rust
//! # use docchat::config::EmbeddingConfig;
//! # use docchat::embedding::create_embedder;
//! # use docchat_core::embedding::Embedder;
//! let config = EmbeddingConfig {
//!     provider: "hashing".to_string(),
//!     ..EmbeddingConfig::default()
//! };
//! let embedder = create_embedder(&config).unwrap();
//! assert_eq!(embedder.dims(), 384);
//! ```

use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use docchat_core::embedding::{check_batch, l2_normalize, Embedder};
use docchat_core::error::ServiceError;

use crate::config::EmbeddingConfig;
use crate::http;

const DEFAULT_LOCAL_MODEL: &str = "bge-small-en-v1.5";
const DEFAULT_HASHING_DIMS: usize = 384;

// ============ OpenAI ============

pub struct OpenAiEmbedder {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    dims: usize,
}

impl OpenAiEmbedder {
    /// # Errors
    ///
    /// Fails if `model` or `dims` is missing, or the API key variable is unset.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow!("embedding.dims required for OpenAI provider"))?;
        let api_key = http::api_key_from_env(&config.api_key_env)
            .ok_or_else(|| anyhow!("{} environment variable not set", config.api_key_env))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string());

        Ok(Self {
            client: http::client()?,
            url: url.trim_end_matches('/').to_string(),
            api_key,
            model,
            dims,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let response = self
            .client
            .post(format!("{}/v1/embeddings", self.url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| http::transport_error("OpenAI", e))?;
        let json = http::json_body("OpenAI", response).await?;
        let vectors = parse_openai_response(&json)?;
        check_batch(texts.len(), self.dims, &vectors)?;
        Ok(vectors)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, ServiceError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| invalid("OpenAI", "missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let embedding = item
            .get("embedding")
            .ok_or_else(|| invalid("OpenAI", "missing embedding"))?;
        indexed.push((index, to_vector("OpenAI", embedding)?));
    }
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama ============

pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow!("embedding.dims required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        Ok(Self {
            client: http::client()?,
            url: url.trim_end_matches('/').to_string(),
            model,
            dims,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let response = self
            .client
            .post(format!("{}/api/embed", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                ServiceError::Retryable(format!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url, e
                ))
            })?;
        let json = http::json_body("Ollama", response).await?;
        let vectors = parse_ollama_response(&json)?;
        check_batch(texts.len(), self.dims, &vectors)?;
        Ok(vectors)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, ServiceError> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| invalid("Ollama", "missing embeddings array"))?
        .iter()
        .map(|embedding| to_vector("Ollama", embedding))
        .collect()
}

fn to_vector(provider: &str, value: &serde_json::Value) -> Result<Vec<f32>, ServiceError> {
    let values = value
        .as_array()
        .ok_or_else(|| invalid(provider, "embedding is not an array"))?;
    values
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| invalid(provider, "embedding contains a non-number"))
        })
        .collect()
}

fn invalid(provider: &str, what: &str) -> ServiceError {
    ServiceError::Terminal(format!("Invalid {} response: {}", provider, what))
}

// ============ Local (fastembed) ============

/// In-process embedding model. The model is loaded on the first call and
/// reused afterwards.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalEmbedder {
    model_name: String,
    dims: usize,
    batch_size: usize,
    model: Arc<std::sync::Mutex<Option<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_LOCAL_MODEL.to_string());
        // validate the name up front so misconfiguration fails at startup
        config_to_fastembed_model(&model_name)?;
        let dims = config.dims.unwrap_or_else(|| local_model_dims(&model_name));
        Ok(Self {
            model_name,
            dims,
            batch_size: config.batch_size,
            model: Arc::new(std::sync::Mutex::new(None)),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl Embedder for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        let model = Arc::clone(&self.model);
        let model_name = self.model_name.clone();
        let batch_size = self.batch_size;
        let input = texts.to_vec();

        let vectors = tokio::task::spawn_blocking(move || {
            let mut guard = model
                .lock()
                .map_err(|_| ServiceError::Terminal("local embedding model lock poisoned".into()))?;
            if guard.is_none() {
                let variant = config_to_fastembed_model(&model_name)
                    .map_err(|e| ServiceError::Terminal(e.to_string()))?;
                let loaded = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(variant).with_show_download_progress(false),
                )
                .map_err(|e| {
                    ServiceError::Terminal(format!(
                        "Failed to initialize local embedding model: {}",
                        e
                    ))
                })?;
                *guard = Some(loaded);
            }
            let Some(embedder) = guard.as_mut() else {
                return Err(ServiceError::Terminal("local embedding model missing".into()));
            };
            embedder
                .embed(input, Some(batch_size))
                .map_err(|e| ServiceError::Terminal(format!("Local embedding failed: {}", e)))
        })
        .await
        .map_err(|e| ServiceError::Terminal(format!("local embedding task failed: {}", e)))??;

        check_batch(texts.len(), self.dims, &vectors)?;
        Ok(vectors)
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
fn local_model_dims(name: &str) -> usize {
    match name {
        "bge-base-en-v1.5" | "nomic-embed-text-v1.5" | "multilingual-e5-base" => 768,
        "bge-large-en-v1.5" | "multilingual-e5-large" => 1024,
        _ => 384,
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1.5, multilingual-e5-small, multilingual-e5-base, \
             multilingual-e5-large",
            other
        ),
    }
}

// ============ Hashing ============

/// Bag-of-words feature hashing into a fixed number of buckets.
///
/// Each lowercase alphanumeric word is hashed with SHA-256; the first eight
/// bytes pick the bucket and the ninth byte picks the sign. Vectors are
/// L2-normalized, so texts sharing words score higher under cosine
/// similarity.
pub struct HashingEmbedder {
    dims: usize,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dims];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let digest = Sha256::digest(word.to_lowercase().as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest[..8]);
            let idx = (u64::from_le_bytes(bucket) % self.dims as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[idx] += sign;
        }
        l2_normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model_name(&self) -> &str {
        "hashing"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Build the [`Embedder`] selected by `embedding.provider`.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"local"` | [`LocalEmbedder`] (requires `local-embeddings-fastembed`) |
/// | `"openai"` | [`OpenAiEmbedder`] |
/// | `"ollama"` | [`OllamaEmbedder`] |
/// | `"hashing"` | [`HashingEmbedder`] |
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        "hashing" => Ok(Arc::new(HashingEmbedder::new(
            config.dims.unwrap_or(DEFAULT_HASHING_DIMS),
        ))),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalEmbedder::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!(
            "Local embedding provider requires --features local-embeddings-fastembed \
             (default model {})",
            DEFAULT_LOCAL_MODEL
        ),
        other => bail!("Unknown embedding provider: {}", other),
    }
}
