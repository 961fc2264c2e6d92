//! # Change Watcher Module
//!
//! ## Purpose
//! Scheduled detection of legal text changes: fetches each tracked law from
//! its configured source, diffs fresh text against stored content hashes,
//! persists change records transactionally and fans out notifications to the
//! users who studied the affected topics.
//!
//! ## Input/Output Specification
//! - **Input**: Per-law source URLs, the corpus store, a topic-activity index
//! - **Output**: `ChangeRecord`s + article updates, notifications, a
//!   `WatchReport` with run counters
//! - **Containment**: a fetch or parse failure skips that law only; the run
//!   always completes and reports
//!
//! ## Key Features
//! - Collaborator traits at every external seam (fetch, parse, notify,
//!   activity) so runs are fully testable without network or scheduler
//! - Per-law state machine with `Skipped` absorbing local failures
//! - Single-flight guard: overlapping runs are no-ops, not queued
//! - Bounded concurrency across laws via semaphore
//!
//! An article absent from a fresh parse is left untouched. Sources deliver
//! partial documents too often for absence to be treated as a repeal; repeal
//! handling requires an explicit signal, not inference.

pub mod fetch;
pub mod notify;

pub use fetch::HttpSourceFetcher;
pub use notify::{SledNotificationSink, StaticActivityIndex};

use crate::config::WatcherConfig;
use crate::corpus::{CorpusRead, CorpusStore};
use crate::embedding::Embedder;
use crate::errors::{GroundingError, Result};
use crate::text::{content_hash, preview};
use crate::{ChangeRecord, LawCode, LegalArticle, Notification};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use uuid::Uuid;

/// Characters of new text included in notification bodies.
const NOTIFICATION_PREVIEW_CHARS: usize = 160;

/// Retrieves the raw source document for one law.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch_raw_content(&self, law: LawCode) -> Result<String>;
}

/// Parses a raw source document into article-number -> text pairs.
#[async_trait]
pub trait ArticleParser: Send + Sync {
    async fn parse_articles(&self, raw: &str, law: LawCode) -> Result<BTreeMap<String, String>>;
}

/// Accepts notifications for delivery. Best-effort: returns how many were
/// actually accepted.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn create_many(&self, notifications: Vec<Notification>) -> Result<usize>;
}

/// Answers "who studied these topics" for fan-out targeting.
#[async_trait]
pub trait ActivityLookup: Send + Sync {
    async fn users_for_topics(&self, topics: &BTreeSet<String>) -> Result<Vec<String>>;
}

/// Default parser: sources are pre-parsed JSON objects mapping article
/// numbers to article text. HTML scraping lives upstream of this system.
pub struct JsonArticleParser;

#[async_trait]
impl ArticleParser for JsonArticleParser {
    async fn parse_articles(&self, raw: &str, law: LawCode) -> Result<BTreeMap<String, String>> {
        let parsed: BTreeMap<String, String> =
            serde_json::from_str(raw).map_err(|e| GroundingError::ParseFailed {
                law: law.to_string(),
                details: e.to_string(),
            })?;
        if parsed.is_empty() {
            return Err(GroundingError::ParseFailed {
                law: law.to_string(),
                details: "Source document contains no articles".to_string(),
            });
        }
        Ok(parsed)
    }
}

/// Processing state of one law within a run. `Skipped` absorbs fetch and
/// parse failures; everything after parsing must succeed or fail the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LawState {
    Fetching,
    Parsing,
    Diffing,
    Persisting,
    Notifying,
    Done,
    Skipped,
}

impl LawState {
    fn as_str(&self) -> &'static str {
        match self {
            LawState::Fetching => "fetching",
            LawState::Parsing => "parsing",
            LawState::Diffing => "diffing",
            LawState::Persisting => "persisting",
            LawState::Notifying => "notifying",
            LawState::Done => "done",
            LawState::Skipped => "skipped",
        }
    }
}

/// Counters for one watch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchReport {
    pub articles_checked: usize,
    pub changes_detected: usize,
    pub notifications_created: usize,
    pub laws_skipped: usize,
    /// True when this invocation found a run already in progress and did
    /// nothing
    pub skipped_overlap: bool,
}

#[derive(Default)]
struct LawOutcome {
    checked: usize,
    changes: usize,
    notifications: usize,
    skipped: bool,
}

/// Orchestrates one change-detection pass over all tracked laws.
pub struct ChangeWatcher {
    config: WatcherConfig,
    store: Arc<CorpusStore>,
    fetcher: Arc<dyn SourceFetcher>,
    parser: Arc<dyn ArticleParser>,
    sink: Arc<dyn NotificationSink>,
    activity: Arc<dyn ActivityLookup>,
    embedder: Arc<dyn Embedder>,
    run_guard: Mutex<()>,
}

impl ChangeWatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: WatcherConfig,
        store: Arc<CorpusStore>,
        fetcher: Arc<dyn SourceFetcher>,
        parser: Arc<dyn ArticleParser>,
        sink: Arc<dyn NotificationSink>,
        activity: Arc<dyn ActivityLookup>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            config,
            store,
            fetcher,
            parser,
            sink,
            activity,
            embedder,
            run_guard: Mutex::new(()),
        }
    }

    /// One full detection pass. Never queued: an invocation overlapping a
    /// running pass returns immediately with `skipped_overlap` set.
    pub async fn run_once(&self) -> Result<WatchReport> {
        let _guard = match self.run_guard.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::warn!("Watch run already in progress, skipping this invocation");
                return Ok(WatchReport {
                    skipped_overlap: true,
                    ..Default::default()
                });
            }
        };

        // Tracked = configured with a source URL; sorted for stable run order
        let mut laws: Vec<LawCode> = Vec::new();
        for code in self.config.source_urls.keys() {
            laws.push(code.parse()?);
        }
        laws.sort();

        tracing::info!(laws = laws.len(), "Starting watch run");

        let semaphore = Arc::new(Semaphore::new(self.config.worker_count));
        let seen: Arc<DashMap<(String, Uuid), ()>> = Arc::new(DashMap::new());

        let outcomes = futures::future::join_all(laws.into_iter().map(|law| {
            let semaphore = semaphore.clone();
            let seen = seen.clone();
            async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => return Ok(LawOutcome::default()),
                };
                self.process_law(law, &seen).await
            }
        }))
        .await;

        let mut report = WatchReport::default();
        for outcome in outcomes {
            let outcome = outcome?;
            report.articles_checked += outcome.checked;
            report.changes_detected += outcome.changes;
            report.notifications_created += outcome.notifications;
            if outcome.skipped {
                report.laws_skipped += 1;
            }
        }

        self.store.flush().await?;
        tracing::info!(
            articles_checked = report.articles_checked,
            changes_detected = report.changes_detected,
            notifications_created = report.notifications_created,
            laws_skipped = report.laws_skipped,
            "Watch run completed"
        );
        Ok(report)
    }

    async fn process_law(
        &self,
        law: LawCode,
        seen: &DashMap<(String, Uuid), ()>,
    ) -> Result<LawOutcome> {
        trace_state(law, LawState::Fetching);
        let raw = match self.fetcher.fetch_raw_content(law).await {
            Ok(raw) => raw,
            Err(e) => {
                trace_state(law, LawState::Skipped);
                tracing::warn!(law = %law, error = %e, "Fetch failed");
                return Ok(LawOutcome {
                    skipped: true,
                    ..Default::default()
                });
            }
        };

        trace_state(law, LawState::Parsing);
        let parsed = match self.parser.parse_articles(&raw, law).await {
            Ok(parsed) => parsed,
            Err(e) => {
                trace_state(law, LawState::Skipped);
                tracing::warn!(law = %law, error = %e, "Parse failed");
                return Ok(LawOutcome {
                    skipped: true,
                    ..Default::default()
                });
            }
        };

        trace_state(law, LawState::Diffing);
        let stored = self.store.active_articles_for_law(law).await?;
        let mut outcome = LawOutcome::default();

        for article in stored {
            outcome.checked += 1;
            // Articles absent from the parse are untouched, never repealed
            let Some(new_text) = parsed.get(&parsed_key(&article)) else {
                continue;
            };
            if content_hash(new_text) == article.content_hash {
                continue;
            }

            trace_state(law, LawState::Persisting);
            let record = self.store.apply_change(&article.key, new_text).await?;
            outcome.changes += 1;

            // Stale vectors degrade similarity recall, they never block the
            // change record
            match self.embedder.embed(new_text).await {
                Ok(vector) => self.store.set_embedding(&article.key, &vector)?,
                Err(e) => {
                    tracing::warn!(key = %article.key, error = %e, "Embedding refresh failed")
                }
            }

            trace_state(law, LawState::Notifying);
            outcome.notifications += self.notify(&article, &record, seen).await?;
            self.store.mark_processed(&record.id).await?;
        }

        trace_state(law, LawState::Done);
        tracing::debug!(
            law = %law,
            checked = outcome.checked,
            changes = outcome.changes,
            "Law processed"
        );
        Ok(outcome)
    }

    /// Fan one change out to everyone who studied the article's topics.
    /// Deduped at (recipient, change); sink failures are counted, not
    /// propagated.
    async fn notify(
        &self,
        article: &LegalArticle,
        record: &ChangeRecord,
        seen: &DashMap<(String, Uuid), ()>,
    ) -> Result<usize> {
        // Fan-out is best-effort end to end: a broken activity index costs
        // this change its notifications, not the run
        let recipients = match self.activity.users_for_topics(&article.topic_ids).await {
            Ok(recipients) => recipients,
            Err(e) => {
                tracing::warn!(change_id = %record.id, error = %e, "Activity lookup failed");
                return Ok(0);
            }
        };
        let body_preview = preview(&record.new_text, NOTIFICATION_PREVIEW_CHARS);

        let notifications: Vec<Notification> = recipients
            .into_iter()
            .filter(|recipient| {
                seen.insert((recipient.clone(), record.id), ())
                    .is_none()
            })
            .map(|recipient| notify::change_notification(&recipient, record, &body_preview))
            .collect();

        if notifications.is_empty() {
            return Ok(0);
        }

        match self.sink.create_many(notifications).await {
            Ok(accepted) => {
                self.store.mark_notified(&record.id).await?;
                Ok(accepted)
            }
            Err(e) => {
                tracing::warn!(change_id = %record.id, error = %e, "Notification delivery failed");
                Ok(0)
            }
        }
    }
}

fn trace_state(law: LawCode, state: LawState) {
    tracing::debug!(law = %law, state = state.as_str(), "State transition");
}

/// Parse-map key for a stored article: article number, with the subsection
/// appended when present ("21", "24/2").
fn parsed_key(article: &LegalArticle) -> String {
    match &article.key.subsection {
        Some(sub) => format!("{}/{}", article.key.article, sub),
        None => article.key.article.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CorpusConfig;
    use crate::embedding::HashingEmbedder;
    use crate::ArticleKey;
    use std::collections::HashMap;

    struct StubFetcher {
        bodies: HashMap<LawCode, String>,
    }

    #[async_trait]
    impl SourceFetcher for StubFetcher {
        async fn fetch_raw_content(&self, law: LawCode) -> Result<String> {
            self.bodies
                .get(&law)
                .cloned()
                .ok_or_else(|| GroundingError::FetchFailed {
                    law: law.to_string(),
                    details: "unreachable".to_string(),
                })
        }
    }

    struct RecordingSink {
        delivered: std::sync::Mutex<Vec<Notification>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                delivered: std::sync::Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn create_many(&self, notifications: Vec<Notification>) -> Result<usize> {
            let mut delivered = self.delivered.lock().unwrap();
            let count = notifications.len();
            delivered.extend(notifications);
            Ok(count)
        }
    }

    struct FailingActivity;

    #[async_trait]
    impl ActivityLookup for FailingActivity {
        async fn users_for_topics(&self, _topics: &BTreeSet<String>) -> Result<Vec<String>> {
            Err(GroundingError::Internal {
                message: "activity index offline".to_string(),
            })
        }
    }

    struct FailingSink;

    #[async_trait]
    impl NotificationSink for FailingSink {
        async fn create_many(&self, _notifications: Vec<Notification>) -> Result<usize> {
            Err(GroundingError::NotificationFailed {
                details: "sink offline".to_string(),
            })
        }
    }

    fn watcher_config(laws: &[LawCode]) -> WatcherConfig {
        let mut source_urls = HashMap::new();
        for law in laws {
            source_urls.insert(law.to_string(), format!("http://sources/{}.json", law));
        }
        WatcherConfig {
            source_urls,
            fetch_timeout_seconds: 5,
            max_retries: 1,
            worker_count: 2,
            activity_path: None,
        }
    }

    async fn seeded_store(dir: &tempfile::TempDir) -> Arc<CorpusStore> {
        let config = CorpusConfig {
            db_path: dir.path().join("corpus.db"),
            enable_compression: false,
        };
        let store = Arc::new(CorpusStore::open(config).await.unwrap());
        store
            .upsert_article(
                ArticleKey::new(LawCode::LPAC, "21"),
                "Obligación de resolver",
                "El plazo máximo será de tres meses.",
                ["T5".to_string()].into_iter().collect(),
                None,
            )
            .await
            .unwrap();
        store
            .upsert_article(
                ArticleKey::new(LawCode::LPAC, "13"),
                "Derechos de las personas",
                "Derecho a comunicarse con las Administraciones Públicas.",
                ["T2".to_string()].into_iter().collect(),
                None,
            )
            .await
            .unwrap();
        store
    }

    fn build_watcher(
        store: Arc<CorpusStore>,
        bodies: HashMap<LawCode, String>,
        sink: Arc<dyn NotificationSink>,
        topic_users: HashMap<String, Vec<String>>,
        laws: &[LawCode],
    ) -> ChangeWatcher {
        ChangeWatcher::new(
            watcher_config(laws),
            store,
            Arc::new(StubFetcher { bodies }),
            Arc::new(JsonArticleParser),
            sink,
            Arc::new(StaticActivityIndex::new(topic_users)),
            Arc::new(HashingEmbedder::new(32)),
        )
    }

    fn lpac_source_with_changed_21() -> HashMap<LawCode, String> {
        let mut bodies = HashMap::new();
        bodies.insert(
            LawCode::LPAC,
            serde_json::json!({
                "21": "El plazo máximo será de seis meses.",
                "13": "Derecho a comunicarse con las Administraciones Públicas."
            })
            .to_string(),
        );
        bodies
    }

    fn activity_t5(users: &[&str]) -> HashMap<String, Vec<String>> {
        let mut topic_users = HashMap::new();
        topic_users.insert(
            "T5".to_string(),
            users.iter().map(|u| u.to_string()).collect(),
        );
        topic_users
    }

    #[tokio::test]
    async fn test_change_detected_and_fanned_out_once_per_user() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir).await;
        let sink = RecordingSink::new();
        let watcher = build_watcher(
            store.clone(),
            lpac_source_with_changed_21(),
            sink.clone(),
            activity_t5(&["user-1", "user-2"]),
            &[LawCode::LPAC],
        );

        let report = watcher.run_once().await.unwrap();
        assert_eq!(report.articles_checked, 2);
        assert_eq!(report.changes_detected, 1);
        assert_eq!(report.notifications_created, 2);
        assert_eq!(report.laws_skipped, 0);
        assert!(!report.skipped_overlap);

        let delivered = sink.delivered.lock().unwrap();
        let mut recipients: Vec<&str> =
            delivered.iter().map(|n| n.recipient_id.as_str()).collect();
        recipients.sort();
        assert_eq!(recipients, vec!["user-1", "user-2"]);

        let article = store
            .get_article(&ArticleKey::new(LawCode::LPAC, "21"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(article.full_text, "El plazo máximo será de seis meses.");
        assert_eq!(article.content_hash, content_hash(&article.full_text));
    }

    #[tokio::test]
    async fn test_second_run_detects_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir).await;
        let sink = RecordingSink::new();
        let watcher = build_watcher(
            store,
            lpac_source_with_changed_21(),
            sink.clone(),
            activity_t5(&["user-1"]),
            &[LawCode::LPAC],
        );

        let first = watcher.run_once().await.unwrap();
        assert_eq!(first.changes_detected, 1);

        let second = watcher.run_once().await.unwrap();
        assert_eq!(second.changes_detected, 0);
        assert_eq!(second.notifications_created, 0);
        assert_eq!(sink.delivered.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_article_absent_from_parse_is_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir).await;
        let mut bodies = HashMap::new();
        // Partial source document: article 13 is missing entirely
        bodies.insert(
            LawCode::LPAC,
            serde_json::json!({ "21": "El plazo máximo será de tres meses." }).to_string(),
        );
        let watcher = build_watcher(
            store.clone(),
            bodies,
            RecordingSink::new(),
            HashMap::new(),
            &[LawCode::LPAC],
        );

        let report = watcher.run_once().await.unwrap();
        assert_eq!(report.changes_detected, 0);
        let article = store
            .get_article(&ArticleKey::new(LawCode::LPAC, "13"))
            .await
            .unwrap()
            .unwrap();
        assert!(article.active);
    }

    #[tokio::test]
    async fn test_fetch_failure_skips_law_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir).await;
        // CE configured but unreachable; LPAC healthy with a change
        let watcher = build_watcher(
            store,
            lpac_source_with_changed_21(),
            RecordingSink::new(),
            activity_t5(&["user-1"]),
            &[LawCode::LPAC, LawCode::CE],
        );

        let report = watcher.run_once().await.unwrap();
        assert_eq!(report.laws_skipped, 1);
        assert_eq!(report.changes_detected, 1);
    }

    #[tokio::test]
    async fn test_malformed_source_skips_law() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir).await;
        let mut bodies = HashMap::new();
        bodies.insert(LawCode::LPAC, "<html>not json</html>".to_string());
        let watcher = build_watcher(
            store,
            bodies,
            RecordingSink::new(),
            HashMap::new(),
            &[LawCode::LPAC],
        );

        let report = watcher.run_once().await.unwrap();
        assert_eq!(report.laws_skipped, 1);
        assert_eq!(report.changes_detected, 0);
    }

    #[tokio::test]
    async fn test_sink_failure_keeps_change_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir).await;
        let watcher = build_watcher(
            store.clone(),
            lpac_source_with_changed_21(),
            Arc::new(FailingSink),
            activity_t5(&["user-1"]),
            &[LawCode::LPAC],
        );

        let report = watcher.run_once().await.unwrap();
        assert_eq!(report.changes_detected, 1);
        assert_eq!(report.notifications_created, 0);

        let article = store
            .get_article(&ArticleKey::new(LawCode::LPAC, "21"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(article.full_text, "El plazo máximo será de seis meses.");
    }

    #[tokio::test]
    async fn test_activity_lookup_failure_keeps_the_run_alive() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir).await;
        let sink = RecordingSink::new();
        let watcher = ChangeWatcher::new(
            watcher_config(&[LawCode::LPAC]),
            store.clone(),
            Arc::new(StubFetcher {
                bodies: lpac_source_with_changed_21(),
            }),
            Arc::new(JsonArticleParser),
            sink.clone(),
            Arc::new(FailingActivity),
            Arc::new(HashingEmbedder::new(32)),
        );

        let report = watcher.run_once().await.unwrap();
        assert_eq!(report.changes_detected, 1);
        assert_eq!(report.notifications_created, 0);
        assert!(sink.delivered.lock().unwrap().is_empty());

        // The change itself was persisted despite the failed fan-out
        let article = store
            .get_article(&ArticleKey::new(LawCode::LPAC, "21"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(article.full_text, "El plazo máximo será de seis meses.");
    }

    #[tokio::test]
    async fn test_overlapping_run_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir).await;
        let watcher = build_watcher(
            store,
            lpac_source_with_changed_21(),
            RecordingSink::new(),
            HashMap::new(),
            &[LawCode::LPAC],
        );

        let _held = watcher.run_guard.lock().await;
        let report = watcher.run_once().await.unwrap();
        assert!(report.skipped_overlap);
        assert_eq!(report.changes_detected, 0);
    }

    #[tokio::test]
    async fn test_json_parser_rejects_empty_document() {
        let parser = JsonArticleParser;
        assert!(parser.parse_articles("{}", LawCode::CE).await.is_err());
        let parsed = parser
            .parse_articles("{\"1\": \"España se constituye\"}", LawCode::CE)
            .await
            .unwrap();
        assert_eq!(parsed.len(), 1);
    }
}
