//! # Corpus Store Module
//!
//! ## Purpose
//! Canonical table of legal articles, addressed by (law code, article number,
//! optional sub-section), with persistent storage of article text, content
//! hashes, embedding vectors and change records.
//!
//! ## Input/Output Specification
//! - **Input**: Article upserts from ingestion, text updates from the watcher
//! - **Output**: Exact lookups, topic listings, vector similarity, lexical search
//! - **Storage**: Sled embedded database, bincode records, optional gzip
//!
//! ## Capability split
//! `CorpusRead` is the read-only handle handed to retrieval and verification.
//! Only ingestion and the change watcher hold the concrete `CorpusStore`,
//! which carries the write operations. The split is enforced at the type
//! level, not by convention.

use crate::config::CorpusConfig;
use crate::errors::{GroundingError, Result};
use crate::text::{content_hash, normalize_for_match};
use crate::{ArticleKey, ChangeRecord, ChangeType, LawCode, LegalArticle};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sled::transaction::ConflictableTransactionError;
use sled::Transactional;
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

/// Marker byte prefixed to stored article blobs.
const ENCODING_RAW: u8 = 0;
const ENCODING_GZIP: u8 = 1;

/// Read-only view of the corpus.
///
/// Retrieval and verification depend on this trait only; they can never
/// mutate the corpus.
#[async_trait]
pub trait CorpusRead: Send + Sync {
    /// Exact lookup by full identity.
    async fn get_article(&self, key: &ArticleKey) -> Result<Option<LegalArticle>>;

    /// Lookup by (law, article number), ignoring subsection. Prefers the
    /// subsection-less record, falling back to the first subsection record in
    /// key order.
    async fn find_article(&self, law: LawCode, article: &str) -> Result<Option<LegalArticle>>;

    /// All active articles tagged with the given topic, sorted by key.
    async fn articles_for_topic(&self, topic_id: &str) -> Result<Vec<LegalArticle>>;

    /// Top-K active articles by cosine similarity against stored embeddings.
    async fn similar_articles(
        &self,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<(LegalArticle, f32)>>;

    /// Token-overlap lexical search over active article text; the degraded
    /// fallback when the embedding service is unavailable.
    async fn lexical_search(&self, query: &str, k: usize) -> Result<Vec<LegalArticle>>;

    /// All active articles of one law, sorted by key.
    async fn active_articles_for_law(&self, law: LawCode) -> Result<Vec<LegalArticle>>;

    /// Number of stored articles.
    async fn article_count(&self) -> Result<usize>;
}

/// The corpus store: single source of truth behind a narrow read/write
/// interface.
pub struct CorpusStore {
    config: CorpusConfig,
    db: Arc<sled::Db>,
    articles: Arc<sled::Tree>,
    embeddings: Arc<sled::Tree>,
    changes: Arc<sled::Tree>,
}

/// Corpus statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusStats {
    pub total_articles: usize,
    pub total_embeddings: usize,
    pub unprocessed_changes: usize,
    pub database_size_bytes: u64,
}

impl CorpusStore {
    /// Open (or create) the corpus database.
    pub async fn open(config: CorpusConfig) -> Result<Self> {
        if let Some(parent) = config.db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let db = sled::open(&config.db_path).map_err(|e| GroundingError::CorpusUnavailable {
            db_path: config.db_path.to_string_lossy().to_string(),
            reason: e.to_string(),
        })?;

        let articles = db
            .open_tree("articles")
            .map_err(|e| GroundingError::CorpusUnavailable {
                db_path: config.db_path.to_string_lossy().to_string(),
                reason: format!("Failed to open articles tree: {}", e),
            })?;
        let embeddings =
            db.open_tree("embeddings")
                .map_err(|e| GroundingError::CorpusUnavailable {
                    db_path: config.db_path.to_string_lossy().to_string(),
                    reason: format!("Failed to open embeddings tree: {}", e),
                })?;
        let changes = db
            .open_tree("changes")
            .map_err(|e| GroundingError::CorpusUnavailable {
                db_path: config.db_path.to_string_lossy().to_string(),
                reason: format!("Failed to open changes tree: {}", e),
            })?;

        let store = Self {
            config,
            db: Arc::new(db),
            articles: Arc::new(articles),
            embeddings: Arc::new(embeddings),
            changes: Arc::new(changes),
        };

        tracing::info!(
            articles = store.articles.len(),
            "Corpus store opened"
        );

        Ok(store)
    }

    /// Read-only handle for retrieval and verification.
    pub fn reader(self: &Arc<Self>) -> Arc<dyn CorpusRead> {
        self.clone()
    }

    /// Insert or update an article. The content hash is computed here so the
    /// text/hash pair can never diverge; `ingested_at` is preserved across
    /// updates.
    pub async fn upsert_article(
        &self,
        key: ArticleKey,
        section_title: &str,
        full_text: &str,
        topic_ids: BTreeSet<String>,
        embedding: Option<Vec<f32>>,
    ) -> Result<LegalArticle> {
        let now = Utc::now();
        let existing = self.read_article_blob(&key)?;

        let article = LegalArticle {
            law_full_name: key.law.full_name().to_string(),
            section_title: section_title.to_string(),
            full_text: full_text.to_string(),
            content_hash: content_hash(full_text),
            topic_ids,
            active: true,
            ingested_at: existing.as_ref().map(|a| a.ingested_at).unwrap_or(now),
            updated_at: now,
            key,
        };

        let blob = self.encode_article(&article)?;
        self.articles
            .insert(article.key.storage_key().as_bytes(), blob)?;

        if let Some(vector) = embedding {
            self.set_embedding(&article.key, &vector)?;
        }

        tracing::debug!(key = %article.key, "Upserted article");
        Ok(article)
    }

    /// Store the embedding vector for an article.
    pub fn set_embedding(&self, key: &ArticleKey, vector: &[f32]) -> Result<()> {
        let value = bincode::serialize(vector)?;
        self.embeddings.insert(key.storage_key().as_bytes(), value)?;
        Ok(())
    }

    /// Mark an article inactive (superseded). The record is kept.
    pub async fn deactivate_article(&self, key: &ArticleKey) -> Result<()> {
        if let Some(mut article) = self.read_article_blob(key)? {
            article.active = false;
            article.updated_at = Utc::now();
            let blob = self.encode_article(&article)?;
            self.articles.insert(key.storage_key().as_bytes(), blob)?;
            tracing::info!(key = %key, "Deactivated article");
        }
        Ok(())
    }

    /// Persist a detected change: write the `ChangeRecord` and the updated
    /// article (new text + new hash) as a single transaction. A reader can
    /// never observe one without the other.
    pub async fn apply_change(&self, key: &ArticleKey, new_text: &str) -> Result<ChangeRecord> {
        let article = self.read_article_blob(key)?.ok_or_else(|| {
            GroundingError::ChangePersistence {
                key: key.storage_key(),
                reason: "Article not found".to_string(),
            }
        })?;

        let record = ChangeRecord {
            id: Uuid::new_v4(),
            key: key.clone(),
            previous_text: article.full_text.clone(),
            new_text: new_text.to_string(),
            previous_hash: article.content_hash.clone(),
            new_hash: content_hash(new_text),
            change_type: ChangeType::Modification,
            processed: false,
            notification_sent: false,
            detected_at: Utc::now(),
        };

        let mut updated = article;
        updated.full_text = new_text.to_string();
        updated.content_hash = record.new_hash.clone();
        updated.updated_at = record.detected_at;

        let article_blob = self.encode_article(&updated)?;
        let record_blob = bincode::serialize(&record)?;
        let article_key = key.storage_key();

        (&*self.articles, &*self.changes)
            .transaction(|(articles, changes)| {
                articles.insert(article_key.as_bytes(), article_blob.clone())?;
                changes.insert(record.id.as_bytes(), record_blob.clone())?;
                Ok::<_, ConflictableTransactionError<()>>(())
            })
            .map_err(|e| GroundingError::ChangePersistence {
                key: article_key.clone(),
                reason: format!("{:?}", e),
            })?;

        tracing::info!(key = %key, change_id = %record.id, "Persisted change record");
        Ok(record)
    }

    /// Flip `notification_sent` on a change record after fan-out completed.
    pub async fn mark_notified(&self, change_id: &Uuid) -> Result<()> {
        self.update_change(change_id, |record| record.notification_sent = true)
            .await
    }

    /// Flip `processed` on a change record.
    pub async fn mark_processed(&self, change_id: &Uuid) -> Result<()> {
        self.update_change(change_id, |record| record.processed = true)
            .await
    }

    /// All change records not yet processed, oldest first.
    pub async fn unprocessed_changes(&self) -> Result<Vec<ChangeRecord>> {
        let mut records = Vec::new();
        for entry in self.changes.iter() {
            let (_, value) = entry?;
            let record: ChangeRecord = bincode::deserialize(&value)?;
            if !record.processed {
                records.push(record);
            }
        }
        records.sort_by_key(|r| r.detected_at);
        Ok(records)
    }

    /// Fetch one change record.
    pub async fn get_change(&self, change_id: &Uuid) -> Result<Option<ChangeRecord>> {
        match self.changes.get(change_id.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Corpus statistics.
    pub async fn stats(&self) -> Result<CorpusStats> {
        Ok(CorpusStats {
            total_articles: self.articles.len(),
            total_embeddings: self.embeddings.len(),
            unprocessed_changes: self.unprocessed_changes().await?.len(),
            database_size_bytes: self.db.size_on_disk()?,
        })
    }

    /// Flush pending writes to disk.
    pub async fn flush(&self) -> Result<()> {
        self.db
            .flush_async()
            .await
            .map_err(GroundingError::Corpus)?;
        Ok(())
    }

    async fn update_change(
        &self,
        change_id: &Uuid,
        mutate: impl FnOnce(&mut ChangeRecord),
    ) -> Result<()> {
        let value = self.changes.get(change_id.as_bytes())?.ok_or_else(|| {
            GroundingError::ChangePersistence {
                key: change_id.to_string(),
                reason: "Change record not found".to_string(),
            }
        })?;
        let mut record: ChangeRecord = bincode::deserialize(&value)?;
        mutate(&mut record);
        let blob = bincode::serialize(&record)?;
        self.changes.insert(change_id.as_bytes(), blob)?;
        Ok(())
    }

    fn encode_article(&self, article: &LegalArticle) -> Result<Vec<u8>> {
        let serialized = bincode::serialize(article)?;
        if self.config.enable_compression {
            use std::io::Write;
            let mut encoder =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder
                .write_all(&serialized)
                .map_err(|e| GroundingError::Internal {
                    message: format!("Compression failed: {}", e),
                })?;
            let compressed = encoder.finish().map_err(|e| GroundingError::Internal {
                message: format!("Compression finish failed: {}", e),
            })?;
            let mut blob = Vec::with_capacity(compressed.len() + 1);
            blob.push(ENCODING_GZIP);
            blob.extend_from_slice(&compressed);
            Ok(blob)
        } else {
            let mut blob = Vec::with_capacity(serialized.len() + 1);
            blob.push(ENCODING_RAW);
            blob.extend_from_slice(&serialized);
            Ok(blob)
        }
    }

    fn decode_article(&self, blob: &[u8]) -> Result<LegalArticle> {
        let (marker, payload) = blob.split_first().ok_or_else(|| GroundingError::Internal {
            message: "Empty article blob".to_string(),
        })?;
        match *marker {
            ENCODING_GZIP => {
                use std::io::Read;
                let mut decoder = flate2::read::GzDecoder::new(payload);
                let mut decompressed = Vec::new();
                decoder
                    .read_to_end(&mut decompressed)
                    .map_err(|e| GroundingError::Internal {
                        message: format!("Decompression failed: {}", e),
                    })?;
                Ok(bincode::deserialize(&decompressed)?)
            }
            ENCODING_RAW => Ok(bincode::deserialize(payload)?),
            other => Err(GroundingError::Internal {
                message: format!("Unknown article encoding marker: {}", other),
            }),
        }
    }

    fn read_article_blob(&self, key: &ArticleKey) -> Result<Option<LegalArticle>> {
        match self.articles.get(key.storage_key().as_bytes())? {
            Some(blob) => Ok(Some(self.decode_article(&blob)?)),
            None => Ok(None),
        }
    }

    /// Iterate all stored articles in key order.
    fn scan_articles(&self) -> Result<Vec<LegalArticle>> {
        let mut out = Vec::new();
        for entry in self.articles.iter() {
            let (_, blob) = entry?;
            out.push(self.decode_article(&blob)?);
        }
        Ok(out)
    }

    fn read_embedding(&self, key: &ArticleKey) -> Result<Option<Vec<f32>>> {
        match self.embeddings.get(key.storage_key().as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl CorpusRead for CorpusStore {
    async fn get_article(&self, key: &ArticleKey) -> Result<Option<LegalArticle>> {
        self.read_article_blob(key)
    }

    async fn find_article(&self, law: LawCode, article: &str) -> Result<Option<LegalArticle>> {
        // Superseded articles are invisible here, matching every other read
        // path
        let exact = ArticleKey::new(law, article);
        if let Some(found) = self.read_article_blob(&exact)? {
            if found.active {
                return Ok(Some(found));
            }
        }
        // Prefix scan picks up subsection records ("LPAC/21/..."), in key order
        let prefix = format!("{}/", exact.storage_key());
        for entry in self.articles.scan_prefix(prefix.as_bytes()) {
            let (_, blob) = entry?;
            let candidate = self.decode_article(&blob)?;
            if candidate.active {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    async fn articles_for_topic(&self, topic_id: &str) -> Result<Vec<LegalArticle>> {
        let articles = self
            .scan_articles()?
            .into_iter()
            .filter(|a| a.active && a.topic_ids.contains(topic_id))
            .collect();
        Ok(articles)
    }

    async fn similar_articles(
        &self,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<(LegalArticle, f32)>> {
        let mut scored: Vec<(LegalArticle, f32)> = Vec::new();
        for article in self.scan_articles()? {
            if !article.active {
                continue;
            }
            if let Some(vector) = self.read_embedding(&article.key)? {
                let score = cosine_similarity(query_vector, &vector);
                scored.push((article, score));
            }
        }
        // Descending by score, ties broken by key for determinism
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.key.cmp(&b.0.key))
        });
        scored.truncate(k);
        Ok(scored)
    }

    async fn lexical_search(&self, query: &str, k: usize) -> Result<Vec<LegalArticle>> {
        let query_tokens: BTreeSet<String> = normalize_for_match(query)
            .split_whitespace()
            .filter(|t| t.len() > 2)
            .map(|t| t.to_string())
            .collect();
        if query_tokens.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(LegalArticle, usize)> = Vec::new();
        for article in self.scan_articles()? {
            if !article.active {
                continue;
            }
            let text = normalize_for_match(&article.full_text);
            let hits = query_tokens.iter().filter(|t| text.contains(t.as_str())).count();
            if hits > 0 {
                scored.push((article, hits));
            }
        }
        scored.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.key.cmp(&b.0.key)));
        scored.truncate(k);
        Ok(scored.into_iter().map(|(a, _)| a).collect())
    }

    async fn active_articles_for_law(&self, law: LawCode) -> Result<Vec<LegalArticle>> {
        let prefix = format!("{}/", law);
        let mut out = Vec::new();
        for entry in self.articles.scan_prefix(prefix.as_bytes()) {
            let (_, blob) = entry?;
            let article = self.decode_article(&blob)?;
            if article.active {
                out.push(article);
            }
        }
        Ok(out)
    }

    async fn article_count(&self) -> Result<usize> {
        Ok(self.articles.len())
    }
}

/// Cosine similarity; 0.0 for mismatched dimensions or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
