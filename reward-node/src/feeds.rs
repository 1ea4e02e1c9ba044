//! Activity feed backed by a JSON snapshot written by an external scraper.
//!
//! Layout: `{"posts": [Post...], "messages": [ChatMessage...]}`, both in
//! platform order (oldest first). The file is re-read on every call so the
//! scraper can replace it between cycles.

use async_trait::async_trait;
use reward_core::engagement::{ActivityFeed, ChatMessage, EngagementError, Post};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

#[derive(Debug, Default, Deserialize)]
struct Snapshot {
    #[serde(default)]
    posts: Vec<Post>,
    #[serde(default)]
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone)]
pub struct SnapshotFeed {
    path: PathBuf,
    fixed_now: Option<u64>,
}

impl SnapshotFeed {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            fixed_now: None,
        }
    }

    /// Pin "now" (unix seconds) for window filtering.
    pub fn with_now(mut self, now_secs: u64) -> Self {
        self.fixed_now = Some(now_secs);
        self
    }

    fn now_secs(&self) -> u64 {
        self.fixed_now.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0)
        })
    }

    fn cutoff(&self, window: Duration) -> u64 {
        self.now_secs().saturating_sub(window.as_secs())
    }

    fn load(&self) -> Result<Snapshot, EngagementError> {
        let raw = std::fs::read_to_string(&self.path).map_err(|e| {
            EngagementError::Unavailable(format!("read {}: {e}", self.path.display()))
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| EngagementError::Malformed(format!("{}: {e}", self.path.display())))
    }
}

#[async_trait]
impl ActivityFeed for SnapshotFeed {
    async fn recent_posts(&self, window: Duration) -> Result<Vec<Post>, EngagementError> {
        let cutoff = self.cutoff(window);
        let posts: Vec<Post> = self
            .load()?
            .posts
            .into_iter()
            .filter(|p| p.created_at >= cutoff)
            .collect();
        debug!(count = posts.len(), cutoff, "snapshot posts loaded");
        Ok(posts)
    }

    async fn recent_messages(&self, window: Duration) -> Result<Vec<ChatMessage>, EngagementError> {
        let cutoff = self.cutoff(window);
        let messages: Vec<ChatMessage> = self
            .load()?
            .messages
            .into_iter()
            .filter(|m| m.sent_at >= cutoff)
            .collect();
        debug!(count = messages.len(), cutoff, "snapshot messages loaded");
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write_snapshot(value: serde_json::Value) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().expect("tmp");
        f.write_all(value.to_string().as_bytes()).expect("write");
        f
    }

    #[tokio::test]
    async fn filters_by_window() {
        let f = write_snapshot(serde_json::json!({
            "posts": [
                {"id": "p1", "author_id": "u1", "author_name": "old", "created_at": 100, "likes": 9},
                {"id": "p2", "author_id": "u2", "author_name": "new", "created_at": 950, "likes": 1}
            ],
            "messages": [
                {"author_id": "u3", "author_name": "c", "sent_at": 999, "text": "gm"}
            ]
        }));
        let feed = SnapshotFeed::new(f.path()).with_now(1_000);
        let posts = feed.recent_posts(Duration::from_secs(100)).await.expect("posts");
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].id, "p2");
        let messages = feed
            .recent_messages(Duration::from_secs(10))
            .await
            .expect("messages");
        assert_eq!(messages.len(), 1);
    }

    #[tokio::test]
    async fn missing_file_is_transient() {
        let feed = SnapshotFeed::new("/nonexistent/snapshot.json");
        let err = feed
            .recent_posts(Duration::from_secs(60))
            .await
            .expect_err("missing");
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn garbage_is_malformed() {
        let mut f = tempfile::NamedTempFile::new().expect("tmp");
        f.write_all(b"not json").expect("write");
        let err = SnapshotFeed::new(f.path())
            .recent_messages(Duration::from_secs(60))
            .await
            .expect_err("bad");
        assert!(matches!(err, EngagementError::Malformed(_)));
    }
}
