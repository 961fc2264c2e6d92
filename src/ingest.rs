//! # Corpus Ingestion Module
//!
//! ## Purpose
//! Bootstraps and refreshes the corpus from pre-parsed seed files: validates
//! each record, computes embeddings and writes articles through the store's
//! hash-maintaining upsert.
//!
//! ## Input/Output Specification
//! - **Input**: JSON array of article records (one parsed article per unit,
//!   stable article numbers — upstream scraping is out of scope)
//! - **Output**: Stored `LegalArticle`s with embeddings, ingestion statistics
//! - **Idempotence**: re-ingesting an unchanged record is a cheap skip

use crate::corpus::{CorpusRead, CorpusStore};
use crate::embedding::Embedder;
use crate::errors::{GroundingError, Result};
use crate::text::content_hash;
use crate::{ArticleKey, LawCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

/// Minimum article text length accepted by validation.
const MIN_TEXT_CHARS: usize = 20;

/// One seed record as it appears in the ingestion file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleRecord {
    /// Canonical law code string ("LPAC")
    pub law: String,
    /// Article number ("21", "14 bis")
    pub article: String,
    #[serde(default)]
    pub subsection: Option<String>,
    #[serde(default)]
    pub section_title: String,
    pub text: String,
    #[serde(default)]
    pub topics: Vec<String>,
}

/// Ingestion pass statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestStats {
    pub ingested: usize,
    pub skipped_unchanged: usize,
    pub rejected: usize,
}

/// Writes validated seed records into the corpus.
pub struct CorpusIngestor {
    store: Arc<CorpusStore>,
    embedder: Arc<dyn Embedder>,
}

impl CorpusIngestor {
    pub fn new(store: Arc<CorpusStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }

    /// Ingest a JSON seed file.
    pub async fn ingest_file<P: AsRef<Path>>(&self, path: P) -> Result<IngestStats> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await?;
        let records: Vec<ArticleRecord> =
            serde_json::from_str(&content).map_err(|e| GroundingError::InvalidArticleRecord {
                file: path.to_string_lossy().to_string(),
                details: e.to_string(),
            })?;
        self.ingest_records(records).await
    }

    /// Ingest a batch of records. Rejections are counted and logged, never
    /// fatal to the rest of the batch.
    pub async fn ingest_records(&self, records: Vec<ArticleRecord>) -> Result<IngestStats> {
        let mut stats = IngestStats::default();

        for record in records {
            let (key, topics) = match self.validate(&record) {
                Ok(parts) => parts,
                Err(e) => {
                    tracing::warn!(error = %e, article = %record.article, "Rejected seed record");
                    stats.rejected += 1;
                    continue;
                }
            };

            // Unchanged text means unchanged hash; skip the write entirely
            if let Some(existing) = self.store.get_article(&key).await? {
                if existing.content_hash == content_hash(&record.text) {
                    stats.skipped_unchanged += 1;
                    continue;
                }
            }

            // Embedding is best-effort: a missing vector degrades similarity
            // recall for this article, not ingestion
            let embedding = match self.embedder.embed(&record.text).await {
                Ok(vector) => Some(vector),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Embedding failed during ingestion");
                    None
                }
            };

            self.store
                .upsert_article(key, &record.section_title, &record.text, topics, embedding)
                .await?;
            stats.ingested += 1;
        }

        self.store.flush().await?;
        tracing::info!(
            ingested = stats.ingested,
            skipped = stats.skipped_unchanged,
            rejected = stats.rejected,
            "Ingestion completed"
        );
        Ok(stats)
    }

    fn validate(&self, record: &ArticleRecord) -> Result<(ArticleKey, BTreeSet<String>)> {
        let law: LawCode = record.law.parse()?;

        if record.article.trim().is_empty() {
            return Err(GroundingError::ValidationFailed {
                field: "article".to_string(),
                reason: "Article number is empty".to_string(),
            });
        }
        if record.text.trim().chars().count() < MIN_TEXT_CHARS {
            return Err(GroundingError::ValidationFailed {
                field: "text".to_string(),
                reason: format!("Article text shorter than {} characters", MIN_TEXT_CHARS),
            });
        }

        let mut key = ArticleKey::new(law, record.article.trim());
        if let Some(sub) = &record.subsection {
            if !sub.trim().is_empty() {
                key = key.with_subsection(sub.trim());
            }
        }
        let topics = record.topics.iter().map(|t| t.trim().to_string()).collect();
        Ok((key, topics))
    }
}
