//! # Notification Fan-out Module
//!
//! ## Purpose
//! Implementations of the notification side of change detection: a sled-backed
//! sink that persists notifications for the consuming application, and a
//! static activity index mapping topics to the users who studied them.
//!
//! Delivery is best-effort by contract. A sink failure is logged and counted
//! by the watcher; it never rolls back the change record that triggered it.

use crate::errors::{GroundingError, Result};
use crate::watcher::{ActivityLookup, NotificationSink};
use crate::{ChangeRecord, Notification};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use uuid::Uuid;

/// Category tag stamped on every change notification.
pub const LEGAL_CHANGE_CATEGORY: &str = "legal_change";

/// Build the notification for one (recipient, change) pair.
pub fn change_notification(recipient_id: &str, change: &ChangeRecord, preview: &str) -> Notification {
    Notification {
        id: Uuid::new_v4(),
        recipient_id: recipient_id.to_string(),
        category: LEGAL_CHANGE_CATEGORY.to_string(),
        title: format!("Actualización del {}", change.key),
        body: format!(
            "El texto del {} ha cambiado. Nuevo texto: {}",
            change.key, preview
        ),
        action_ref: change.key.storage_key(),
        read: false,
        created_at: Utc::now(),
    }
}

/// Persists notifications in a sled tree for the consuming application to
/// drain.
pub struct SledNotificationSink {
    tree: sled::Tree,
}

impl SledNotificationSink {
    /// Open (or create) a standalone notification database.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path.as_ref())?;
        let tree = db.open_tree("notifications")?;
        Ok(Self { tree })
    }

    pub fn with_tree(tree: sled::Tree) -> Self {
        Self { tree }
    }

    /// All stored notifications, unordered.
    pub fn list(&self) -> Result<Vec<Notification>> {
        let mut out = Vec::new();
        for entry in self.tree.iter() {
            let (_, value) = entry?;
            out.push(bincode::deserialize(&value)?);
        }
        Ok(out)
    }
}

#[async_trait]
impl NotificationSink for SledNotificationSink {
    async fn create_many(&self, notifications: Vec<Notification>) -> Result<usize> {
        let mut accepted = 0;
        for notification in notifications {
            let blob =
                bincode::serialize(&notification).map_err(|e| GroundingError::NotificationFailed {
                    details: e.to_string(),
                })?;
            self.tree
                .insert(notification.id.as_bytes(), blob)
                .map_err(|e| GroundingError::NotificationFailed {
                    details: e.to_string(),
                })?;
            accepted += 1;
        }
        tracing::debug!(accepted, "Stored notifications");
        Ok(accepted)
    }
}

/// In-memory topic-to-users index, loaded once per run.
///
/// The consuming application records which topics each user has studied; a
/// snapshot of that mapping is all change fan-out needs.
pub struct StaticActivityIndex {
    topic_users: HashMap<String, Vec<String>>,
}

impl StaticActivityIndex {
    pub fn new(topic_users: HashMap<String, Vec<String>>) -> Self {
        Self { topic_users }
    }

    /// Load from a JSON file of the shape `{"T5": ["user-1", "user-2"]}`.
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        let topic_users: HashMap<String, Vec<String>> = serde_json::from_str(&content)?;
        Ok(Self::new(topic_users))
    }

    pub fn empty() -> Self {
        Self::new(HashMap::new())
    }
}

#[async_trait]
impl ActivityLookup for StaticActivityIndex {
    async fn users_for_topics(&self, topics: &BTreeSet<String>) -> Result<Vec<String>> {
        // BTreeSet union keeps the recipient list deterministic
        let mut users = BTreeSet::new();
        for topic in topics {
            if let Some(list) = self.topic_users.get(topic) {
                users.extend(list.iter().cloned());
            }
        }
        Ok(users.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ArticleKey, ChangeType, LawCode};

    fn sample_change() -> ChangeRecord {
        ChangeRecord {
            id: Uuid::new_v4(),
            key: ArticleKey::new(LawCode::LPAC, "21"),
            previous_text: "tres meses".to_string(),
            new_text: "seis meses".to_string(),
            previous_hash: "a".to_string(),
            new_hash: "b".to_string(),
            change_type: ChangeType::Modification,
            processed: false,
            notification_sent: false,
            detected_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_sled_sink_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SledNotificationSink::open(dir.path().join("notif.db")).unwrap();

        let change = sample_change();
        let accepted = sink
            .create_many(vec![
                change_notification("user-1", &change, "seis meses"),
                change_notification("user-2", &change, "seis meses"),
            ])
            .await
            .unwrap();
        assert_eq!(accepted, 2);

        let stored = sink.list().unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().all(|n| n.category == LEGAL_CHANGE_CATEGORY));
        assert!(stored.iter().all(|n| !n.read));
    }

    #[tokio::test]
    async fn test_activity_union_is_deduped_and_sorted() {
        let mut topic_users = HashMap::new();
        topic_users.insert(
            "T5".to_string(),
            vec!["user-b".to_string(), "user-a".to_string()],
        );
        topic_users.insert(
            "T7".to_string(),
            vec!["user-a".to_string(), "user-c".to_string()],
        );
        let index = StaticActivityIndex::new(topic_users);

        let topics: BTreeSet<String> = ["T5", "T7"].iter().map(|s| s.to_string()).collect();
        let users = index.users_for_topics(&topics).await.unwrap();
        assert_eq!(users, vec!["user-a", "user-b", "user-c"]);
    }

    #[tokio::test]
    async fn test_unknown_topic_yields_no_users() {
        let index = StaticActivityIndex::empty();
        let topics: BTreeSet<String> = ["T1"].iter().map(|s| s.to_string()).collect();
        assert!(index.users_for_topics(&topics).await.unwrap().is_empty());
    }

    #[test]
    fn test_notification_points_back_to_article() {
        let change = sample_change();
        let notification = change_notification("user-1", &change, "seis meses");
        assert_eq!(notification.action_ref, "LPAC/21");
        assert!(notification.title.contains("art. 21 LPAC"));
    }
}
