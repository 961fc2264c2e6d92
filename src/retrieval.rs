//! # Retrieval Engine Module
//!
//! ## Purpose
//! Assembles a bounded, deduplicated context of legal articles for a given
//! topic and free-text query, combining exact topic lookup with semantic
//! similarity search.
//!
//! ## Input/Output Specification
//! - **Input**: Optional topic id, free-text query
//! - **Output**: `ContextBundle` — ordered articles, consumed budget, strategy tag
//! - **Guarantees**: deterministic ordering for fixed corpus state; idempotent;
//!   never exceeds the configured budget; never returns duplicate identities
//!
//! ## Degradation
//! When the embedding service is unavailable the engine falls back to a plain
//! lexical match over the same corpus, with the same output shape and a
//! degraded strategy tag. Retrieval never hard-fails because semantic search
//! is down; corpus-store failures do propagate.

use crate::config::RetrievalConfig;
use crate::corpus::CorpusRead;
use crate::embedding::Embedder;
use crate::errors::{GroundingError, Result};
use crate::text::truncate_chars;
use crate::{ArticleKey, LegalArticle};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// How a context bundle was assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetrievalStrategy {
    /// Topic lookup only; semantic search was not applicable
    TopicOnly,
    /// Topic lookup merged with semantic similarity results
    TopicSemantic,
    /// Semantic similarity only (no topic filter)
    SemanticOnly,
    /// Embedding service unavailable; lexical match used instead
    LexicalFallback,
}

/// One article included in a context bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextEntry {
    pub article: LegalArticle,
    /// Whether this entry came from the topic lookup (authoritative) or the
    /// similarity search
    pub from_topic: bool,
    /// Serialized size this entry contributes to the budget
    pub chars: usize,
}

/// Output of the retrieval engine. Ephemeral, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextBundle {
    pub entries: Vec<ContextEntry>,
    pub strategy: RetrievalStrategy,
    pub chars_used: usize,
    pub budget_chars: usize,
}

/// Separator between rendered articles; counted against the budget.
const ENTRY_SEPARATOR: &str = "\n\n";

impl ContextBundle {
    /// Render the bundle as grounding text for the generative model.
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|e| render_article(&e.article))
            .collect::<Vec<_>>()
            .join(ENTRY_SEPARATOR)
    }
}

/// Render one article the way it is counted against the budget.
fn render_article(article: &LegalArticle) -> String {
    format!(
        "[{} — {}]\n{}",
        article.key, article.section_title, article.full_text
    )
}

/// Builds token-bounded grounding context from the corpus.
pub struct RetrievalEngine {
    config: RetrievalConfig,
    corpus: Arc<dyn CorpusRead>,
    embedder: Arc<dyn Embedder>,
}

impl RetrievalEngine {
    pub fn new(
        config: RetrievalConfig,
        corpus: Arc<dyn CorpusRead>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            config,
            corpus,
            embedder,
        }
    }

    /// Assemble a context bundle for the given topic and query.
    pub async fn build_context(
        &self,
        topic_id: Option<&str>,
        query_text: &str,
    ) -> Result<ContextBundle> {
        let query = query_text.trim();
        self.validate_query(topic_id, query)?;

        // 1. Topic lookup: authoritative, sorted first
        let mut topic_articles = match topic_id {
            Some(topic) => self.corpus.articles_for_topic(topic).await?,
            None => Vec::new(),
        };
        topic_articles.sort_by(|a, b| a.key.cmp(&b.key));

        // 2. Semantic lookup with lexical fallback
        let (semantic_articles, degraded) = if query.is_empty() {
            (Vec::new(), false)
        } else {
            self.semantic_or_lexical(query).await?
        };

        // 3. Merge + dedup, topic precedence
        let mut seen: HashSet<ArticleKey> = HashSet::new();
        let mut candidates: Vec<(LegalArticle, bool)> = Vec::new();
        for article in topic_articles {
            if seen.insert(article.key.clone()) {
                candidates.push((article, true));
            }
        }
        for article in semantic_articles {
            if seen.insert(article.key.clone()) {
                candidates.push((article, false));
            }
        }
        let had_semantic = candidates.iter().any(|(_, from_topic)| !*from_topic);

        // 4. Budget enforcement: an article fits whole or is excluded. The
        // accounting covers the exact rendered output, separators included.
        let budget = self.config.budget_chars;
        let mut entries = Vec::new();
        let mut chars_used = 0usize;
        for (article, from_topic) in candidates {
            let chars = render_article(&article).chars().count();
            let separator = if entries.is_empty() {
                0
            } else {
                ENTRY_SEPARATOR.len()
            };
            if chars_used + separator + chars > budget {
                tracing::debug!(key = %article.key, chars, "Article excluded: over budget");
                continue;
            }
            chars_used += separator + chars;
            entries.push(ContextEntry {
                article,
                from_topic,
                chars,
            });
        }

        // 5. Tag the strategy actually used
        let strategy = if degraded {
            RetrievalStrategy::LexicalFallback
        } else if topic_id.is_some() {
            if had_semantic {
                RetrievalStrategy::TopicSemantic
            } else {
                RetrievalStrategy::TopicOnly
            }
        } else {
            RetrievalStrategy::SemanticOnly
        };

        tracing::debug!(
            entries = entries.len(),
            chars_used,
            strategy = ?strategy,
            "Built context bundle"
        );

        Ok(ContextBundle {
            entries,
            strategy,
            chars_used,
            budget_chars: budget,
        })
    }

    /// Semantic top-K, degrading to lexical search when the embedder fails.
    /// Returns the articles and whether the degraded path was taken.
    async fn semantic_or_lexical(&self, query: &str) -> Result<(Vec<LegalArticle>, bool)> {
        let prefix = truncate_chars(query, self.config.query_prefix_chars);
        match self.embedder.embed(prefix).await {
            Ok(vector) => {
                let hits = self
                    .corpus
                    .similar_articles(&vector, self.config.semantic_top_k)
                    .await?;
                Ok((hits.into_iter().map(|(a, _)| a).collect(), false))
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Embedding unavailable, falling back to lexical search"
                );
                let hits = self
                    .corpus
                    .lexical_search(query, self.config.semantic_top_k)
                    .await?;
                Ok((hits, true))
            }
        }
    }

    fn validate_query(&self, topic_id: Option<&str>, query: &str) -> Result<()> {
        if query.is_empty() {
            if topic_id.is_none() {
                return Err(GroundingError::InvalidQuery {
                    reason: "Query is empty and no topic was given".to_string(),
                });
            }
            return Ok(());
        }
        if query.len() < self.config.min_query_length {
            return Err(GroundingError::InvalidQuery {
                reason: format!(
                    "Query too short: minimum {} characters",
                    self.config.min_query_length
                ),
            });
        }
        if query.len() > self.config.max_query_length {
            return Err(GroundingError::InvalidQuery {
                reason: format!(
                    "Query too long: maximum {} characters",
                    self.config.max_query_length
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CorpusConfig;
    use crate::corpus::CorpusStore;
    use crate::embedding::HashingEmbedder;
    use crate::LawCode;
    use async_trait::async_trait;
    use std::collections::BTreeSet;

    /// Embedder that always fails, to force the lexical fallback.
    struct DownEmbedder;

    #[async_trait]
    impl Embedder for DownEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(GroundingError::EmbeddingFailed {
                details: "service down".to_string(),
            })
        }

        fn dimension(&self) -> usize {
            64
        }
    }

    fn topics(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    async fn seeded_store() -> (Arc<CorpusStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = CorpusConfig {
            db_path: dir.path().join("corpus.db"),
            enable_compression: false,
        };
        let store = Arc::new(CorpusStore::open(config).await.unwrap());
        let embedder = HashingEmbedder::new(64);

        let seed: [(LawCode, &str, &str, &[&str]); 5] = [
            (
                LawCode::LPAC,
                "121",
                "El recurso de alzada podrá interponerse ante el órgano superior jerárquico.",
                &["T5"],
            ),
            (
                LawCode::LPAC,
                "122",
                "El plazo para la interposición del recurso de alzada será de un mes.",
                &["T5"],
            ),
            (
                LawCode::LPAC,
                "112",
                "Contra las resoluciones podrán interponerse los recursos de alzada y reposición.",
                &["T5"],
            ),
            (
                LawCode::LRJSP,
                "9",
                "Los órganos superiores podrán delegar el ejercicio de las competencias.",
                &[],
            ),
            (
                LawCode::LGP,
                "27",
                "La gestión del recurso presupuestario se ajustará al principio de alzada económica.",
                &[],
            ),
        ];
        for (law, number, text, topic_ids) in seed {
            let vector = embedder.embed(text).await.unwrap();
            store
                .upsert_article(
                    ArticleKey::new(law, number),
                    "Recursos",
                    text,
                    topics(topic_ids),
                    Some(vector),
                )
                .await
                .unwrap();
        }
        (store, dir)
    }

    fn engine(
        store: &Arc<CorpusStore>,
        embedder: Arc<dyn Embedder>,
        budget_chars: usize,
    ) -> RetrievalEngine {
        let config = RetrievalConfig {
            semantic_top_k: 4,
            budget_chars,
            query_prefix_chars: 256,
            min_query_length: 2,
            max_query_length: 1000,
        };
        RetrievalEngine::new(config, store.reader(), embedder)
    }

    #[tokio::test]
    async fn test_topic_plus_semantic_merge() {
        let (store, _dir) = seeded_store().await;
        let engine = engine(&store, Arc::new(HashingEmbedder::new(64)), 100_000);
        let bundle = engine
            .build_context(Some("T5"), "recurso de alzada")
            .await
            .unwrap();

        assert_eq!(bundle.strategy, RetrievalStrategy::TopicSemantic);
        // Topic articles come first, in key order
        let topic_count = bundle.entries.iter().filter(|e| e.from_topic).count();
        assert_eq!(topic_count, 3);
        assert!(bundle.entries[..3].iter().all(|e| e.from_topic));
        // Semantic matches from outside the topic were appended
        assert!(bundle.entries.len() > 3);
    }

    #[tokio::test]
    async fn test_no_duplicate_identities() {
        let (store, _dir) = seeded_store().await;
        let engine = engine(&store, Arc::new(HashingEmbedder::new(64)), 100_000);
        let bundle = engine
            .build_context(Some("T5"), "recurso de alzada")
            .await
            .unwrap();

        let mut seen = HashSet::new();
        for entry in &bundle.entries {
            assert!(seen.insert(entry.article.key.clone()), "duplicate identity");
        }
    }

    #[tokio::test]
    async fn test_budget_respected_and_articles_never_split() {
        let (store, _dir) = seeded_store().await;
        // Budget fits roughly two articles
        let engine = engine(&store, Arc::new(HashingEmbedder::new(64)), 300);
        let bundle = engine
            .build_context(Some("T5"), "recurso de alzada")
            .await
            .unwrap();

        assert!(bundle.chars_used <= bundle.budget_chars);
        assert!(!bundle.entries.is_empty());
        for entry in &bundle.entries {
            // Entry accounted at its full rendered size; nothing truncated
            assert_eq!(entry.chars, render_article(&entry.article).chars().count());
        }
    }

    #[tokio::test]
    async fn test_rendered_output_matches_accounted_size() {
        let (store, _dir) = seeded_store().await;
        let engine = engine(&store, Arc::new(HashingEmbedder::new(64)), 100_000);
        let bundle = engine
            .build_context(Some("T5"), "recurso de alzada")
            .await
            .unwrap();

        // Separators are part of the budget, so the rendered text can never
        // exceed budget_chars
        assert!(bundle.entries.len() > 1);
        assert_eq!(bundle.render().chars().count(), bundle.chars_used);
        assert!(bundle.render().chars().count() <= bundle.budget_chars);
    }

    #[tokio::test]
    async fn test_deterministic_and_idempotent() {
        let (store, _dir) = seeded_store().await;
        let engine = engine(&store, Arc::new(HashingEmbedder::new(64)), 100_000);
        let first = engine
            .build_context(Some("T5"), "recurso de alzada")
            .await
            .unwrap();
        let second = engine
            .build_context(Some("T5"), "recurso de alzada")
            .await
            .unwrap();

        let keys = |b: &ContextBundle| {
            b.entries
                .iter()
                .map(|e| e.article.key.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(keys(&first), keys(&second));
        assert_eq!(first.chars_used, second.chars_used);
        assert_eq!(first.strategy, second.strategy);
    }

    #[tokio::test]
    async fn test_lexical_fallback_when_embedder_down() {
        let (store, _dir) = seeded_store().await;
        let engine = engine(&store, Arc::new(DownEmbedder), 100_000);
        let bundle = engine
            .build_context(None, "recurso de alzada")
            .await
            .unwrap();

        assert_eq!(bundle.strategy, RetrievalStrategy::LexicalFallback);
        assert!(!bundle.entries.is_empty());
    }

    #[tokio::test]
    async fn test_topic_only_when_query_empty() {
        let (store, _dir) = seeded_store().await;
        let engine = engine(&store, Arc::new(HashingEmbedder::new(64)), 100_000);
        let bundle = engine.build_context(Some("T5"), "  ").await.unwrap();

        assert_eq!(bundle.strategy, RetrievalStrategy::TopicOnly);
        assert_eq!(bundle.entries.len(), 3);
    }

    #[tokio::test]
    async fn test_empty_query_without_topic_is_input_error() {
        let (store, _dir) = seeded_store().await;
        let engine = engine(&store, Arc::new(HashingEmbedder::new(64)), 100_000);
        assert!(matches!(
            engine.build_context(None, "").await,
            Err(GroundingError::InvalidQuery { .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_topic_yields_semantic_results_only() {
        let (store, _dir) = seeded_store().await;
        let engine = engine(&store, Arc::new(HashingEmbedder::new(64)), 100_000);
        let bundle = engine
            .build_context(Some("T999"), "recurso de alzada")
            .await
            .unwrap();
        assert!(bundle.entries.iter().all(|e| !e.from_topic));
    }
}
