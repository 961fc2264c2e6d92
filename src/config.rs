//! # Configuration Management Module
//!
//! ## Purpose
//! Centralized configuration for the grounding engine, loaded from TOML files
//! with environment-variable overrides and validation.
//!
//! ## Input/Output Specification
//! - **Input**: Configuration files (TOML), environment variables
//! - **Output**: Validated configuration structs with defaults and overrides
//! - **Validation**: Range checks and cross-field consistency
//!
//! ## Configuration Sources (in order of precedence)
//! 1. Environment variables (`LEGAL_GROUNDING_*`)
//! 2. Configuration file
//! 3. Default values

use crate::errors::{GroundingError, Result};
use crate::LawCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Main configuration structure containing all system settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Corpus store settings
    pub corpus: CorpusConfig,
    /// Embedding service settings
    pub embedding: EmbeddingConfig,
    /// Retrieval engine behavior
    pub retrieval: RetrievalConfig,
    /// Citation verifier behavior
    pub verifier: VerifierConfig,
    /// Change watcher settings
    pub watcher: WatcherConfig,
    /// Logging settings
    pub logging: LoggingConfig,
}

/// Corpus store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusConfig {
    /// Sled database path
    pub db_path: PathBuf,
    /// Gzip-compress article text at rest
    pub enable_compression: bool,
}

/// Embedding service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Remote embedding service URL; when unset, the local hashing embedder
    /// is used
    pub service_url: Option<String>,
    /// Vector dimension (must match the service output)
    pub dimension: usize,
    /// Request timeout in seconds
    pub request_timeout_seconds: u64,
    /// Embedding cache size (number of entries)
    pub cache_size: usize,
}

/// Retrieval engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Fixed top-K for the semantic lookup, independent of topic size
    pub semantic_top_k: usize,
    /// Context budget in characters. Approximates a token budget at
    /// roughly 4 chars/token, so 24_000 chars ~ 6_000 tokens.
    pub budget_chars: usize,
    /// Query prefix length (chars) handed to the embedder
    pub query_prefix_chars: usize,
    /// Minimum query length
    pub min_query_length: usize,
    /// Maximum query length
    pub max_query_length: usize,
}

/// Citation verifier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifierConfig {
    /// Extra alias pairs (variant -> canonical code) merged over the built-in
    /// table
    pub extra_aliases: HashMap<String, String>,
}

/// Change watcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Source URL per law code; laws without a URL are not tracked
    pub source_urls: HashMap<String, String>,
    /// Fetch timeout in seconds
    pub fetch_timeout_seconds: u64,
    /// Maximum fetch retry attempts
    pub max_retries: u32,
    /// Bounded worker pool size for concurrent law processing
    pub worker_count: usize,
    /// Path to the study-activity file (topic -> recipients) used by the CLI
    pub activity_path: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Enable structured JSON logging
    pub json_format: bool,
}

impl Config {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        Self::from_file("config.toml")
    }

    /// Load configuration from a specific file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::warn!("Configuration file not found: {:?}, using defaults", path);
            let mut config = Self::default();
            config.apply_env_overrides()?;
            config.validate()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path).map_err(|e| GroundingError::Config {
            message: format!("Failed to read config file {:?}: {}", path, e),
        })?;

        let mut config: Config = toml::from_str(&content).map_err(|e| GroundingError::Config {
            message: format!("Failed to parse config file {:?}: {}", path, e),
        })?;

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(db_path) = std::env::var("LEGAL_GROUNDING_DB_PATH") {
            self.corpus.db_path = PathBuf::from(db_path);
        }
        if let Ok(url) = std::env::var("LEGAL_GROUNDING_EMBEDDING_URL") {
            self.embedding.service_url = Some(url);
        }
        if let Ok(budget) = std::env::var("LEGAL_GROUNDING_BUDGET_CHARS") {
            self.retrieval.budget_chars =
                budget.parse().map_err(|_| GroundingError::Config {
                    message: "Invalid number in LEGAL_GROUNDING_BUDGET_CHARS".to_string(),
                })?;
        }
        if let Ok(level) = std::env::var("LEGAL_GROUNDING_LOG_LEVEL") {
            self.logging.level = level;
        }
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.embedding.dimension == 0 {
            return Err(GroundingError::ValidationFailed {
                field: "embedding.dimension".to_string(),
                reason: "Vector dimension must be greater than zero".to_string(),
            });
        }

        if self.retrieval.semantic_top_k == 0 {
            return Err(GroundingError::ValidationFailed {
                field: "retrieval.semantic_top_k".to_string(),
                reason: "Top-K must be greater than zero".to_string(),
            });
        }

        if self.retrieval.budget_chars == 0 {
            return Err(GroundingError::ValidationFailed {
                field: "retrieval.budget_chars".to_string(),
                reason: "Context budget must be greater than zero".to_string(),
            });
        }

        if self.retrieval.min_query_length > self.retrieval.max_query_length {
            return Err(GroundingError::ValidationFailed {
                field: "retrieval.min_query_length".to_string(),
                reason: "Minimum query length cannot be greater than maximum".to_string(),
            });
        }

        if self.watcher.worker_count == 0 {
            return Err(GroundingError::ValidationFailed {
                field: "watcher.worker_count".to_string(),
                reason: "Worker count must be greater than zero".to_string(),
            });
        }

        for law in self.watcher.source_urls.keys() {
            law.parse::<LawCode>()
                .map_err(|_| GroundingError::ValidationFailed {
                    field: "watcher.source_urls".to_string(),
                    reason: format!("Unknown law code '{}'", law),
                })?;
        }

        Ok(())
    }

    /// Get configuration as TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| GroundingError::Config {
            message: format!("Failed to serialize config to TOML: {}", e),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            corpus: CorpusConfig {
                db_path: PathBuf::from("./data/corpus.db"),
                enable_compression: true,
            },
            embedding: EmbeddingConfig {
                service_url: None,
                dimension: 384,
                request_timeout_seconds: 10,
                cache_size: 1000,
            },
            retrieval: RetrievalConfig {
                semantic_top_k: 8,
                budget_chars: 24_000,
                query_prefix_chars: 512,
                min_query_length: 2,
                max_query_length: 2000,
            },
            verifier: VerifierConfig {
                extra_aliases: HashMap::new(),
            },
            watcher: WatcherConfig {
                source_urls: HashMap::new(),
                fetch_timeout_seconds: 30,
                max_retries: 3,
                worker_count: num_cpus::get().min(4),
                activity_path: None,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                json_format: false,
            },
        }
    }
}
