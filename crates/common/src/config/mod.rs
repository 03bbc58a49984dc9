//! Configuration management for ResuMatch services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Embedding service configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Scoring (LLM) service configuration
    #[serde(default)]
    pub scorer: ScorerConfig,

    /// Chunking and retrieval configuration
    #[serde(default)]
    pub rag: RagConfig,

    /// Worker pool and retry configuration
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Request payload limits
    #[serde(default)]
    pub limits: LimitsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: http, lexical, mock
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for the embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries per batch request
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,

    /// Batch size for embedding requests
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Maximum entries held by the process-wide embedding cache
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScorerConfig {
    /// API key for the scoring service
    pub api_key: Option<String>,

    /// API base URL
    pub api_base: Option<String>,

    /// Model to use for analysis generation
    #[serde(default = "default_scorer_model")]
    pub model: String,

    /// Request timeout in seconds
    #[serde(default = "default_scorer_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RagConfig {
    /// Chunk window size in characters
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Overlap between consecutive chunks in characters
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Top-k chunks retrieved per query
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Maximum rendered context length in characters
    #[serde(default = "default_max_context_length")]
    pub max_context_length: usize,

    /// Maximum number of session indexes held concurrently
    #[serde(default = "default_index_capacity")]
    pub index_capacity: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    /// Number of concurrent worker tasks
    #[serde(default = "default_worker_count")]
    pub count: usize,

    /// Maximum attempts per job before it becomes Failed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base retry delay in milliseconds
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    /// Maximum retry delay in milliseconds
    #[serde(default = "default_retry_cap_ms")]
    pub retry_cap_ms: u64,

    /// Idle poll interval in milliseconds (backoff-eligible jobs become
    /// claimable on time even without a submit notification)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitsConfig {
    /// Maximum resume text length in bytes
    #[serde(default = "default_max_text_bytes")]
    pub max_resume_bytes: usize,

    /// Maximum job description length in bytes
    #[serde(default = "default_max_text_bytes")]
    pub max_job_bytes: usize,

    /// Maximum uploaded document size in bytes
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: usize,
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_shutdown_timeout() -> u64 {
    30
}
fn default_embedding_provider() -> String {
    "http".to_string()
}
fn default_embedding_model() -> String {
    "all-MiniLM-L6-v2".to_string()
}
fn default_embedding_dimension() -> usize {
    384
}
fn default_embedding_timeout() -> u64 {
    30
}
fn default_embedding_retries() -> u32 {
    3
}
fn default_batch_size() -> usize {
    20
}
fn default_cache_capacity() -> usize {
    4096
}
fn default_scorer_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_scorer_timeout() -> u64 {
    60
}
fn default_chunk_size() -> usize {
    500
}
fn default_chunk_overlap() -> usize {
    50
}
fn default_top_k() -> usize {
    5
}
fn default_max_context_length() -> usize {
    1500
}
fn default_index_capacity() -> usize {
    32
}
fn default_worker_count() -> usize {
    4
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_base_ms() -> u64 {
    500
}
fn default_retry_cap_ms() -> u64 {
    30_000
}
fn default_poll_interval_ms() -> u64 {
    500
}
fn default_max_text_bytes() -> usize {
    200_000
}
fn default_max_file_bytes() -> usize {
    10 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_embedding_timeout(),
            max_retries: default_embedding_retries(),
            batch_size: default_batch_size(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: None,
            model: default_scorer_model(),
            timeout_secs: default_scorer_timeout(),
        }
    }
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            top_k: default_top_k(),
            max_context_length: default_max_context_length(),
            index_capacity: default_index_capacity(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            max_attempts: default_max_attempts(),
            retry_base_ms: default_retry_base_ms(),
            retry_cap_ms: default_retry_cap_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_resume_bytes: default_max_text_bytes(),
            max_job_bytes: default_max_text_bytes(),
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__SERVER__PORT=8081
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            embedding: EmbeddingConfig::default(),
            scorer: ScorerConfig::default(),
            rag: RagConfig::default(),
            worker: WorkerConfig::default(),
            limits: LimitsConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.rag.chunk_size, 500);
        assert_eq!(config.rag.chunk_overlap, 50);
        assert_eq!(config.worker.max_attempts, 3);
    }

    #[test]
    fn test_overlap_smaller_than_size() {
        let config = AppConfig::default();
        assert!(config.rag.chunk_overlap < config.rag.chunk_size);
    }
}
