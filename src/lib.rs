//! # Legal Grounding Engine
//!
//! ## Overview
//! This library grounds AI-generated exam content in a corpus of authoritative
//! legal articles and keeps that grounding valid as the underlying law changes.
//!
//! ## Architecture
//! The system is composed of several key modules:
//! - `corpus`: Canonical store of legal articles keyed by law + article + hash
//! - `alias`: Pure mapping from free-text law names to canonical law codes
//! - `embedding`: Query embedders and vector similarity helpers
//! - `retrieval`: Token-bounded, deduplicated context assembly for a topic/query
//! - `citations`: Pattern-based citation extraction from generated prose
//! - `verify`: Deterministic verification of claimed citations against the corpus
//! - `watcher`: Scheduled change detection, diff persistence, notification fan-out
//! - `ingest`: Initial corpus ingestion and validation
//! - `config`: Configuration management and settings
//! - `errors`: Centralized error handling and types
//!
//! ## Input/Output Specification
//! - **Input**: topic/query pairs, AI-generated prose, external law sources
//! - **Output**: context bundles, verification reports with trust scores,
//!   change records and notifications
//! - **Determinism**: retrieval and verification are fully deterministic for a
//!   fixed corpus state; no generative call happens inside this crate
//!
//! ## Usage
//! ```rust,no_run
//! use legal_grounding::{Config, CorpusStore, RetrievalEngine};
//! use legal_grounding::embedding::HashingEmbedder;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_file("config.toml")?;
//!     let store = Arc::new(CorpusStore::open(config.corpus.clone()).await?);
//!     let embedder = Arc::new(HashingEmbedder::new(config.embedding.dimension));
//!     let engine = RetrievalEngine::new(config.retrieval.clone(), store, embedder);
//!     let bundle = engine.build_context(Some("T5"), "recurso de alzada").await?;
//!     println!("{} articles in context", bundle.entries.len());
//!     Ok(())
//! }
//! ```

// Core modules
pub mod config;
pub mod errors;
pub mod text;
pub mod corpus;
pub mod alias;
pub mod embedding;
pub mod retrieval;
pub mod citations;
pub mod verify;
pub mod ingest;
pub mod watcher;

// Re-exports for convenience
pub use alias::AliasResolver;
pub use config::Config;
pub use corpus::{CorpusRead, CorpusStore};
pub use errors::{GroundingError, Result};
pub use retrieval::{ContextBundle, RetrievalEngine, RetrievalStrategy};
pub use verify::{CitationVerifier, VerificationReport};
pub use watcher::{ChangeWatcher, WatchReport};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Canonical short codes for the tracked body of law.
///
/// The set is closed: retrieval, verification and change detection only ever
/// operate on laws the corpus actually tracks. Serialized as the short code
/// string ("LPAC", "CE", ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LawCode {
    /// Constitución Española
    CE,
    /// Ley 39/2015, Procedimiento Administrativo Común
    LPAC,
    /// Ley 40/2015, Régimen Jurídico del Sector Público
    LRJSP,
    /// Estatuto Básico del Empleado Público (texto refundido)
    EBEP,
    /// Ley 9/2017, Contratos del Sector Público
    LCSP,
    /// Ley 47/2003, General Presupuestaria
    LGP,
    /// Ley Orgánica 6/1985, del Poder Judicial
    LOPJ,
}

impl LawCode {
    /// All tracked law codes, in stable order.
    pub const ALL: [LawCode; 7] = [
        LawCode::CE,
        LawCode::LPAC,
        LawCode::LRJSP,
        LawCode::EBEP,
        LawCode::LCSP,
        LawCode::LGP,
        LawCode::LOPJ,
    ];

    /// Canonical short code string.
    pub fn as_str(&self) -> &'static str {
        match self {
            LawCode::CE => "CE",
            LawCode::LPAC => "LPAC",
            LawCode::LRJSP => "LRJSP",
            LawCode::EBEP => "EBEP",
            LawCode::LCSP => "LCSP",
            LawCode::LGP => "LGP",
            LawCode::LOPJ => "LOPJ",
        }
    }

    /// Full legal name for display.
    pub fn full_name(&self) -> &'static str {
        match self {
            LawCode::CE => "Constitución Española",
            LawCode::LPAC => {
                "Ley 39/2015, de 1 de octubre, del Procedimiento Administrativo Común"
            }
            LawCode::LRJSP => "Ley 40/2015, de 1 de octubre, de Régimen Jurídico del Sector Público",
            LawCode::EBEP => "Real Decreto Legislativo 5/2015, Estatuto Básico del Empleado Público",
            LawCode::LCSP => "Ley 9/2017, de 8 de noviembre, de Contratos del Sector Público",
            LawCode::LGP => "Ley 47/2003, de 26 de noviembre, General Presupuestaria",
            LawCode::LOPJ => "Ley Orgánica 6/1985, de 1 de julio, del Poder Judicial",
        }
    }
}

impl fmt::Display for LawCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LawCode {
    type Err = GroundingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CE" => Ok(LawCode::CE),
            "LPAC" => Ok(LawCode::LPAC),
            "LRJSP" => Ok(LawCode::LRJSP),
            "EBEP" | "TREBEP" => Ok(LawCode::EBEP),
            "LCSP" => Ok(LawCode::LCSP),
            "LGP" => Ok(LawCode::LGP),
            "LOPJ" => Ok(LawCode::LOPJ),
            other => Err(GroundingError::UnknownLawCode {
                code: other.to_string(),
            }),
        }
    }
}

/// Identity of a single article within the corpus.
///
/// `article` is a string on purpose: legal numbering includes forms like
/// "14 bis" or "24.2" that are not numeric.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ArticleKey {
    /// Canonical law code
    pub law: LawCode,
    /// Article number as written in the law
    pub article: String,
    /// Optional sub-section within the article
    pub subsection: Option<String>,
}

impl ArticleKey {
    pub fn new(law: LawCode, article: impl Into<String>) -> Self {
        Self {
            law,
            article: article.into(),
            subsection: None,
        }
    }

    pub fn with_subsection(mut self, subsection: impl Into<String>) -> Self {
        self.subsection = Some(subsection.into());
        self
    }

    /// Stable storage key, also used for deterministic ordering.
    pub fn storage_key(&self) -> String {
        match &self.subsection {
            Some(sub) => format!("{}/{}/{}", self.law, self.article, sub),
            None => format!("{}/{}", self.law, self.article),
        }
    }
}

impl fmt::Display for ArticleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.subsection {
            Some(sub) => write!(f, "art. {} {} ({})", self.article, self.law, sub),
            None => write!(f, "art. {} {}", self.article, self.law),
        }
    }
}

/// The atomic unit of truth: one legal article with its current text and hash.
///
/// Invariant: `content_hash` is always the hash of the current `full_text`;
/// the two are only ever written together. Mutated by change detection
/// (text + hash) or topic-mapping tooling (topic_ids); never by retrieval or
/// verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegalArticle {
    /// Identity triple
    pub key: ArticleKey,
    /// Full name of the containing law
    pub law_full_name: String,
    /// Chapter/heading context
    pub section_title: String,
    /// Current article text
    pub full_text: String,
    /// SHA-256 (hex) of the normalized current text
    pub content_hash: String,
    /// Topics this article is relevant to (many-to-many)
    pub topic_ids: BTreeSet<String>,
    /// Soft-delete / superseded flag
    pub active: bool,
    /// First ingestion timestamp
    pub ingested_at: DateTime<Utc>,
    /// Last text update timestamp
    pub updated_at: DateTime<Utc>,
}

/// Kind of change detected between the stored corpus and a fresh parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Modification,
    Repeal,
    Addition,
}

/// A persisted diff between an article's previous and newly observed text.
///
/// Created exactly once per detected diff; only `processed` and
/// `notification_sent` are flipped afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub id: Uuid,
    pub key: ArticleKey,
    pub previous_text: String,
    pub new_text: String,
    pub previous_hash: String,
    pub new_hash: String,
    pub change_type: ChangeType,
    pub processed: bool,
    pub notification_sent: bool,
    pub detected_at: DateTime<Utc>,
}

/// A notification created by change-detection fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub recipient_id: String,
    /// Category tag, e.g. "legal_change"
    pub category: String,
    pub title: String,
    pub body: String,
    /// Opaque pointer back into the consuming application
    pub action_ref: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_law_code_round_trip() {
        for code in LawCode::ALL {
            assert_eq!(code.as_str().parse::<LawCode>().unwrap(), code);
        }
    }

    #[test]
    fn test_law_code_trebep_folds_into_ebep() {
        assert_eq!("trebep".parse::<LawCode>().unwrap(), LawCode::EBEP);
    }

    #[test]
    fn test_unknown_law_code() {
        assert!("LOREG".parse::<LawCode>().is_err());
    }

    #[test]
    fn test_storage_key_is_stable() {
        let key = ArticleKey::new(LawCode::LPAC, "14 bis").with_subsection("2");
        assert_eq!(key.storage_key(), "LPAC/14 bis/2");
        assert_eq!(ArticleKey::new(LawCode::CE, "103").storage_key(), "CE/103");
    }
}
