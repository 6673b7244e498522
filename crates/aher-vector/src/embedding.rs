//! Embedding provider trait and implementations.
//!
//! - `AzureOpenAiEmbedding` calls an Azure OpenAI embeddings deployment.
//! - `OllamaEmbedding` calls a locally hosted Ollama server.
//! - `MockEmbedding` provides deterministic hash-based vectors for testing.
//!
//! [`EmbeddingBackend`] is the closed set of backends selectable from
//! configuration. Every returned vector is checked against the provider's
//! declared dimension, so a misconfigured model surfaces as
//! `DimensionMismatch` instead of a silently corrupt index.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use aher_core::config::{AherConfig, AzureConfig, OllamaConfig};
use aher_core::error::AherError;
use aher_core::EmbeddingVector;

/// Service for turning text into fixed-dimension vectors.
///
/// Used both by the indexing job and to embed live queries.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed several texts. The output has one vector per input, in order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, AherError>;

    /// Embed a single text.
    async fn embed_text(&self, text: &str) -> Result<EmbeddingVector, AherError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| AherError::Embedding("Provider returned no embedding".to_string()))
    }

    /// Dimensionality of the vectors this provider produces.
    fn dimension(&self) -> usize;
}

fn reject_empty(texts: &[String]) -> Result<(), AherError> {
    if texts.iter().any(|t| t.trim().is_empty()) {
        return Err(AherError::Embedding("Cannot embed empty text".to_string()));
    }
    Ok(())
}

fn check_vectors(
    vectors: Vec<EmbeddingVector>,
    expected_count: usize,
    dimension: usize,
) -> Result<Vec<EmbeddingVector>, AherError> {
    if vectors.len() != expected_count {
        return Err(AherError::Embedding(format!(
            "Expected {} embeddings, provider returned {}",
            expected_count,
            vectors.len()
        )));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
        return Err(AherError::DimensionMismatch {
            expected: dimension,
            actual: bad.len(),
        });
    }
    Ok(vectors)
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client, AherError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| AherError::Config(format!("Failed to build HTTP client: {}", e)))
}

// ---------------------------------------------------------------------------
// AzureOpenAiEmbedding
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct AzureEmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Deserialize)]
struct AzureEmbeddingResponse {
    data: Vec<AzureEmbeddingDatum>,
}

#[derive(Deserialize)]
struct AzureEmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

/// Azure OpenAI embeddings deployment.
#[derive(Debug, Clone)]
pub struct AzureOpenAiEmbedding {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    api_version: String,
    deployment: String,
    model: String,
    dimension: usize,
}

impl AzureOpenAiEmbedding {
    pub fn new(config: &AzureConfig) -> Result<Self, AherError> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            api_version: config.api_version.clone(),
            deployment: config.embedding_deployment.clone(),
            model: config.embedding_model.clone(),
            dimension: config.embedding_dimensions,
        })
    }

    fn url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/embeddings?api-version={}",
            self.endpoint, self.deployment, self.api_version
        )
    }
}

#[async_trait]
impl EmbeddingProvider for AzureOpenAiEmbedding {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, AherError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        reject_empty(texts)?;
        debug!(count = texts.len(), deployment = %self.deployment, "Requesting Azure embeddings");

        let response = self
            .client
            .post(self.url())
            .header("api-key", &self.api_key)
            .json(&AzureEmbeddingRequest {
                input: texts,
                model: &self.model,
            })
            .send()
            .await
            .map_err(|e| AherError::Transport(format!("Azure embedding request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AherError::Transport(format!(
                "Azure embedding HTTP {}: {}",
                status, body
            )));
        }

        let mut parsed: AzureEmbeddingResponse = response
            .json()
            .await
            .map_err(|e| AherError::Transport(format!("Azure embedding decode failed: {}", e)))?;
        parsed.data.sort_by_key(|d| d.index);

        check_vectors(
            parsed.data.into_iter().map(|d| d.embedding).collect(),
            texts.len(),
            self.dimension,
        )
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

// ---------------------------------------------------------------------------
// OllamaEmbedding
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct OllamaEmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Embedding model served by a local Ollama instance.
#[derive(Debug, Clone)]
pub struct OllamaEmbedding {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dimension: usize,
}

impl OllamaEmbedding {
    pub fn new(config: &OllamaConfig) -> Result<Self, AherError> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.embedding_model.clone(),
            dimension: config.embedding_dimensions,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedding {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, AherError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        reject_empty(texts)?;
        debug!(count = texts.len(), model = %self.model, "Requesting Ollama embeddings");

        let response = self
            .client
            .post(format!("{}/api/embed", self.base_url))
            .json(&OllamaEmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|e| AherError::Transport(format!("Ollama embedding request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AherError::Transport(format!(
                "Ollama embedding HTTP {}: {}",
                status, body
            )));
        }

        let parsed: OllamaEmbedResponse = response
            .json()
            .await
            .map_err(|e| AherError::Transport(format!("Ollama embedding decode failed: {}", e)))?;

        check_vectors(parsed.embeddings, texts.len(), self.dimension)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

// ---------------------------------------------------------------------------
// MockEmbedding - deterministic hash-based vectors for testing
// ---------------------------------------------------------------------------

/// Mock embedding provider returning deterministic unit vectors.
///
/// The output is derived from a hash of the input text, so identical inputs
/// always produce identical outputs.
#[derive(Debug, Clone)]
pub struct MockEmbedding {
    dimension: usize,
}

impl MockEmbedding {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn hash_to_vector(&self, text: &str) -> Vec<f32> {
        let mut result = Vec::with_capacity(self.dimension);
        for i in 0..self.dimension {
            let mut hasher = DefaultHasher::new();
            text.hash(&mut hasher);
            i.hash(&mut hasher);
            let h = hasher.finish();
            let val = ((h as f64) / (u64::MAX as f64)) * 2.0 - 1.0;
            result.push(val as f32);
        }

        let norm: f32 = result.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for val in &mut result {
                *val /= norm;
            }
        }
        result
    }
}

impl Default for MockEmbedding {
    fn default() -> Self {
        Self::new(768)
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedding {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, AherError> {
        reject_empty(texts)?;
        Ok(texts.iter().map(|t| self.hash_to_vector(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

// ---------------------------------------------------------------------------
// EmbeddingBackend - configuration-selected provider
// ---------------------------------------------------------------------------

/// The embedding backends selectable by identifier.
#[derive(Debug, Clone)]
pub enum EmbeddingBackend {
    Azure(AzureOpenAiEmbedding),
    Ollama(OllamaEmbedding),
    Mock(MockEmbedding),
}

impl EmbeddingBackend {
    /// Build the backend named by `embedding.provider`.
    ///
    /// Only the identifier is validated; credentials and connectivity are
    /// not checked until the first call.
    pub fn from_config(config: &AherConfig) -> Result<Self, AherError> {
        let backend = match config.embedding.provider.trim().to_ascii_lowercase().as_str() {
            "azure" => EmbeddingBackend::Azure(AzureOpenAiEmbedding::new(&config.azure)?),
            "ollama" => EmbeddingBackend::Ollama(OllamaEmbedding::new(&config.ollama)?),
            "mock" => EmbeddingBackend::Mock(MockEmbedding::new(config.store.dimension)),
            _ => {
                return Err(AherError::UnsupportedProvider {
                    kind: "embedding",
                    name: config.embedding.provider.clone(),
                })
            }
        };
        info!(
            provider = backend.name(),
            dimension = backend.dimension(),
            "Embedding provider configured"
        );
        Ok(backend)
    }

    pub fn name(&self) -> &'static str {
        match self {
            EmbeddingBackend::Azure(_) => "azure",
            EmbeddingBackend::Ollama(_) => "ollama",
            EmbeddingBackend::Mock(_) => "mock",
        }
    }
}

#[async_trait]
impl EmbeddingProvider for EmbeddingBackend {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, AherError> {
        match self {
            EmbeddingBackend::Azure(p) => p.embed_batch(texts).await,
            EmbeddingBackend::Ollama(p) => p.embed_batch(texts).await,
            EmbeddingBackend::Mock(p) => p.embed_batch(texts).await,
        }
    }

    fn dimension(&self) -> usize {
        match self {
            EmbeddingBackend::Azure(p) => p.dimension(),
            EmbeddingBackend::Ollama(p) => p.dimension(),
            EmbeddingBackend::Mock(p) => p.dimension(),
        }
    }
}
