use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

use crate::rag::QuerySettings;
use crate::workflow::WorkflowSettings;

const DEFAULT_MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;
const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the Rusty Docs server.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
    /// Root directory of the filesystem object store.
    pub blob_store_dir: PathBuf,
    /// Snapshot file for the metadata store; `None` keeps metadata in memory only.
    pub metadata_snapshot_path: Option<PathBuf>,
    /// Backend used for nearest-neighbour search.
    pub vector_index_provider: VectorIndexProvider,
    /// Base URL of the Qdrant instance, required for the `qdrant` provider.
    pub qdrant_url: Option<String>,
    /// Name of the Qdrant collection holding document vectors.
    pub qdrant_collection_name: String,
    /// Optional API key required to access Qdrant.
    pub qdrant_api_key: Option<String>,
    /// Embedding provider used to generate vector representations.
    pub embedding_provider: EmbeddingProvider,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Base URL of the Ollama runtime serving every model call.
    pub ollama_url: String,
    /// Vision model used for OCR; OCR is skipped when unset.
    pub vision_model: Option<String>,
    /// Chat model used to answer questions.
    pub generation_model: String,
    /// Largest accepted upload, in bytes.
    pub max_upload_bytes: usize,
    /// Attempts granted to each retryable workflow step.
    pub workflow_max_attempts: u32,
    /// Base backoff delay between attempts, doubled after each failure.
    pub workflow_backoff_ms: u64,
    /// Maximum number of workflow instances running at once.
    pub workflow_concurrency: usize,
    /// Number of nearest neighbours retrieved per query.
    pub search_top_k: usize,
    /// Token budget for the context block handed to the generator.
    pub context_max_tokens: usize,
    /// Texts shorter than this many characters are not embedded.
    pub min_embed_text_chars: usize,
    /// Maximum length of the snippet stored with each vector.
    pub snippet_max_chars: usize,
    /// Maximum length of the content stored in a search index entry.
    pub index_content_max_chars: usize,
}

/// Supported embedding backends.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Deterministic byte-hash embeddings; needs no model runtime.
    Hash,
    /// Local Ollama runtime.
    Ollama,
}

/// Supported vector index backends.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VectorIndexProvider {
    /// In-process cosine index.
    Memory,
    /// Remote Qdrant collection.
    Qdrant,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let vector_index_provider: VectorIndexProvider = load_env_optional("VECTOR_INDEX_PROVIDER")
            .map(|value| {
                value
                    .parse()
                    .map_err(|()| ConfigError::InvalidValue("VECTOR_INDEX_PROVIDER".into()))
            })
            .transpose()?
            .unwrap_or(VectorIndexProvider::Memory);
        let qdrant_url = load_env_optional("QDRANT_URL");
        if vector_index_provider == VectorIndexProvider::Qdrant && qdrant_url.is_none() {
            return Err(ConfigError::MissingVariable("QDRANT_URL".into()));
        }

        Ok(Self {
            server_port: parse_optional("SERVER_PORT")?,
            blob_store_dir: load_env_optional("BLOB_STORE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data/blobs")),
            metadata_snapshot_path: match env::var("METADATA_SNAPSHOT_PATH") {
                Ok(value) if value.trim().is_empty() => None,
                Ok(value) => Some(PathBuf::from(value)),
                Err(_) => Some(PathBuf::from("data/metadata.json")),
            },
            vector_index_provider,
            qdrant_url,
            qdrant_collection_name: load_env_optional("QDRANT_COLLECTION_NAME")
                .unwrap_or_else(|| "rusty-docs".to_string()),
            qdrant_api_key: load_env_optional("QDRANT_API_KEY"),
            embedding_provider: load_env_optional("EMBEDDING_PROVIDER")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|()| ConfigError::InvalidValue("EMBEDDING_PROVIDER".into()))
                })
                .transpose()?
                .unwrap_or(EmbeddingProvider::Hash),
            embedding_model: load_env_optional("EMBEDDING_MODEL")
                .unwrap_or_else(|| "nomic-embed-text".to_string()),
            embedding_dimension: parse_or("EMBEDDING_DIMENSION", 768)?,
            ollama_url: load_env_optional("OLLAMA_URL")
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            vision_model: load_env_optional("VISION_MODEL"),
            generation_model: load_env_optional("GENERATION_MODEL")
                .unwrap_or_else(|| "llama3.1".to_string()),
            max_upload_bytes: parse_or("MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
            workflow_max_attempts: parse_or("WORKFLOW_MAX_ATTEMPTS", 3)?,
            workflow_backoff_ms: parse_or("WORKFLOW_BACKOFF_MS", 200)?,
            workflow_concurrency: parse_or("WORKFLOW_CONCURRENCY", 4)?,
            search_top_k: parse_or("SEARCH_TOP_K", 5)?,
            context_max_tokens: parse_or("CONTEXT_MAX_TOKENS", 4000)?,
            min_embed_text_chars: parse_or("MIN_EMBED_TEXT_CHARS", 10)?,
            snippet_max_chars: parse_or("SNIPPET_MAX_CHARS", 500)?,
            index_content_max_chars: parse_or("INDEX_CONTENT_MAX_CHARS", 20_000)?,
        })
    }

    /// Step retry and truncation parameters for the ingestion workflow.
    pub fn workflow_settings(&self) -> WorkflowSettings {
        WorkflowSettings {
            max_attempts: self.workflow_max_attempts.max(1),
            base_backoff: Duration::from_millis(self.workflow_backoff_ms),
            min_embed_text_chars: self.min_embed_text_chars,
            snippet_max_chars: self.snippet_max_chars,
            index_content_max_chars: self.index_content_max_chars,
        }
    }

    /// Retrieval parameters for the query agent.
    pub fn query_settings(&self) -> QuerySettings {
        QuerySettings {
            top_k: self.search_top_k.max(1),
            context_max_tokens: self.context_max_tokens.max(1),
            model: self.generation_model.clone(),
        }
    }
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_optional<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    load_env_optional(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    Ok(parse_optional(key)?.unwrap_or(default))
}

impl std::str::FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hash" => Ok(Self::Hash),
            "ollama" => Ok(Self::Ollama),
            _ => Err(()),
        }
    }
}

impl std::str::FromStr for VectorIndexProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "qdrant" => Ok(Self::Qdrant),
            _ => Err(()),
        }
    }
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() {
    dotenvy::dotenv().ok();
    let config = Config::from_env().expect("Failed to load config from environment");
    tracing::debug!(
        server_port = ?config.server_port,
        blob_store_dir = %config.blob_store_dir.display(),
        vector_index = ?config.vector_index_provider,
        embedding_provider = ?config.embedding_provider,
        vision_model = ?config.vision_model,
        max_upload_bytes = config.max_upload_bytes,
        "Loaded configuration"
    );
    CONFIG.set(config).expect("Failed to set config");
}
