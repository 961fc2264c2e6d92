//! # Error Handling Module
//!
//! ## Purpose
//! Centralized error handling for the grounding engine, providing structured
//! error types and conversion utilities for all system components.
//!
//! ## Input/Output Specification
//! - **Input**: Error conditions from corpus, retrieval, verification, watcher
//! - **Output**: Structured error types with context
//! - **Error Categories**: Configuration, Corpus, Retrieval, Verification,
//!   Watcher, Ingestion
//!
//! ## Taxonomy
//! - Input errors (malformed query, unknown topic) are reported to the caller
//!   and never retried.
//! - Dependency-unavailable errors: the embedding service degrades to a
//!   lexical fallback inside retrieval; corpus-store unavailability is fatal;
//!   a per-law fetch/parse failure is contained by the watcher as a skip.
//! - A citation referencing a missing law or article is *not* an error: it is
//!   the expected, correctly-reported outcome of verification.

use thiserror::Error;

/// Result type used throughout the application
pub type Result<T> = std::result::Result<T, GroundingError>;

/// Error types for the grounding engine
#[derive(Debug, Error)]
pub enum GroundingError {
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Validation errors
    #[error("Validation failed for field '{field}': {reason}")]
    ValidationFailed { field: String, reason: String },

    /// A law code outside the tracked set
    #[error("Unknown law code: '{code}'")]
    UnknownLawCode { code: String },

    /// Database open/connectivity errors
    #[error("Corpus store unavailable at {db_path}: {reason}")]
    CorpusUnavailable { db_path: String, reason: String },

    /// Database operation errors
    #[error("Corpus store error: {0}")]
    Corpus(#[from] sled::Error),

    /// Transactional write failures (change record + article update pair)
    #[error("Change persistence failed for {key}: {reason}")]
    ChangePersistence { key: String, reason: String },

    /// Binary serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Invalid search query
    #[error("Invalid query: {reason}")]
    InvalidQuery { reason: String },

    /// Embedding service failures (retrieval degrades, never hard-fails)
    #[error("Embedding failed: {details}")]
    EmbeddingFailed { details: String },

    /// Source fetch failures (per-law, contained by the watcher)
    #[error("Fetch failed for {law}: {details}")]
    FetchFailed { law: String, details: String },

    /// Source parse failures (per-law, contained by the watcher)
    #[error("Parse failed for {law}: {details}")]
    ParseFailed { law: String, details: String },

    /// Notification sink failures (best-effort, counted not propagated)
    #[error("Notification delivery failed: {details}")]
    NotificationFailed { details: String },

    /// Seed record rejected during ingestion
    #[error("Invalid article record in {file}: {details}")]
    InvalidArticleRecord { file: String, details: String },

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Retry budget exhausted against an external source
    #[error("Retries exhausted after {attempts} attempts: {message}")]
    RetriesExhausted { attempts: u32, message: String },

    /// JSON parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Generic I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal system errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl GroundingError {
    /// Whether the operation may succeed if retried.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            GroundingError::Http(_)
                | GroundingError::FetchFailed { .. }
                | GroundingError::RetriesExhausted { .. }
                | GroundingError::EmbeddingFailed { .. }
                | GroundingError::NotificationFailed { .. }
        )
    }

    /// Error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            GroundingError::Config { .. } | GroundingError::ValidationFailed { .. } => {
                "configuration"
            }
            GroundingError::UnknownLawCode { .. } => "alias",
            GroundingError::CorpusUnavailable { .. }
            | GroundingError::Corpus(_)
            | GroundingError::ChangePersistence { .. }
            | GroundingError::Serialization(_) => "corpus",
            GroundingError::InvalidQuery { .. } | GroundingError::EmbeddingFailed { .. } => {
                "retrieval"
            }
            GroundingError::FetchFailed { .. }
            | GroundingError::ParseFailed { .. }
            | GroundingError::NotificationFailed { .. }
            | GroundingError::Http(_)
            | GroundingError::RetriesExhausted { .. } => "watcher",
            GroundingError::InvalidArticleRecord { .. } => "ingestion",
            GroundingError::Json(_) | GroundingError::Toml(_) | GroundingError::Io(_) => {
                "serialization"
            }
            GroundingError::Internal { .. } => "generic",
        }
    }
}

// Helper macro for common error patterns
#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::errors::GroundingError::Internal {
            message: $msg.to_string(),
        }
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::errors::GroundingError::Internal {
            message: format!($fmt, $($arg)*),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        let err = GroundingError::UnknownLawCode {
            code: "X".to_string(),
        };
        assert_eq!(err.category(), "alias");
        assert!(!err.is_recoverable());

        let err = GroundingError::FetchFailed {
            law: "LPAC".to_string(),
            details: "timeout".to_string(),
        };
        assert_eq!(err.category(), "watcher");
        assert!(err.is_recoverable());
    }
}
