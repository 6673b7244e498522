use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{AherError, Result};
use crate::spatial::DEFAULT_DISTANCE_THRESHOLD_M;

/// Resource instance holding the Arches system settings; never indexed.
pub const SYSTEM_SETTINGS_RESOURCE_ID: &str = "a106c400-260c-11e7-a604-14109fd34195";

/// Top-level configuration for the AHER assistant.
///
/// Loaded from `~/.aher/config.toml` by default. Provider identifiers are
/// kept as plain strings here and only validated when the provider is built.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AherConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub azure: AzureConfig,
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub geocoding: GeocodingConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
}

impl AherConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AherConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| AherError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Reject a live embedding dimension that differs from the persisted store.
    pub fn check_embedding_dimension(&self, provider_dimension: usize) -> Result<()> {
        if provider_dimension != self.store.dimension {
            return Err(AherError::DimensionMismatch {
                expected: self.store.dimension,
                actual: provider_dimension,
            });
        }
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// Address the API server binds to.
    pub host: String,
    /// API server port.
    pub port: u16,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Conversation pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Chat backend identifier: "azure" or "ollama".
    pub provider: String,
    /// Register the document retrieval stage after location filtering.
    pub retrieval: bool,
    /// Number of documents retrieved per turn.
    pub top_k: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            retrieval: true,
            top_k: 5,
        }
    }
}

/// Embedding backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Embedding backend identifier: "azure", "ollama" or "mock".
    pub provider: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
        }
    }
}

/// Azure OpenAI backend parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AzureConfig {
    pub endpoint: String,
    pub api_key: String,
    pub api_version: String,
    pub chat_deployment: String,
    pub chat_model: String,
    pub embedding_deployment: String,
    pub embedding_model: String,
    /// Dimension of vectors produced by the embedding deployment.
    pub embedding_dimensions: usize,
    pub timeout_secs: u64,
}

impl Default for AzureConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: String::new(),
            api_version: "2024-02-01".to_string(),
            chat_deployment: "gpt-4o".to_string(),
            chat_model: "gpt-4o".to_string(),
            embedding_deployment: "text-embedding-3-small".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dimensions: 1536,
            timeout_secs: 60,
        }
    }
}

/// Locally hosted Ollama backend parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub base_url: String,
    pub language_model: String,
    pub embedding_model: String,
    /// Dimension of vectors produced by `embedding_model`.
    pub embedding_dimensions: usize,
    pub timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            language_model: "llama3.1".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            embedding_dimensions: 768,
            timeout_secs: 120,
        }
    }
}

/// Boundary catalog (geocoding) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocodingConfig {
    /// Feature service root; tiers are appended as `/{tier}/query`.
    pub base_url: String,
    /// Catalog tiers queried for every candidate, broad to narrow.
    pub tiers: Vec<u8>,
    /// Proximity threshold for the spatial predicate, in meters.
    pub distance_threshold_m: f64,
    pub timeout_secs: u64,
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            base_url: "https://services.arcgis.com/qHLhLQrcvEnxjtPr/ArcGIS/rest/services/OS_OpenBoundaryLine/FeatureServer".to_string(),
            tiers: vec![4, 5, 6, 7, 9, 11],
            distance_threshold_m: DEFAULT_DISTANCE_THRESHOLD_M,
            timeout_secs: 30,
        }
    }
}

/// Similarity store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database holding tiles and tile embeddings.
    pub database_path: String,
    /// Dimension of persisted embeddings.
    pub dimension: usize,
    /// HNSW graph degree.
    pub hnsw_m: usize,
    /// HNSW construction breadth.
    pub hnsw_ef_construction: usize,
    /// HNSW search breadth.
    pub hnsw_ef_search: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: "~/.aher/data/aher.db".to_string(),
            dimension: 768,
            hnsw_m: 16,
            hnsw_ef_construction: 64,
            hnsw_ef_search: 40,
        }
    }
}

/// Tile indexing job settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    /// Resource instances whose tiles are never indexed.
    pub excluded_resource_instances: Vec<String>,
    /// Tiles embedded per provider call.
    pub batch_size: usize,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            excluded_resource_instances: vec![SYSTEM_SETTINGS_RESOURCE_ID.to_string()],
            batch_size: 16,
        }
    }
}
