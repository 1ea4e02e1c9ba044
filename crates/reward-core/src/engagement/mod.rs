//! Winner selection from platform activity.
//!
//! The engine is parameterized over [`EngagementSource`]; the two platform
//! variants share the same shape:
//! - [`posts::PostEngagement`] ranks social posts by public metrics
//! - [`chat::ChatEngagement`] scores a chat transcript
//!
//! Both read raw activity from an [`ActivityFeed`], which owns the notion of
//! "recent" for its platform.

pub mod chat;
pub mod posts;

use crate::{Candidate, Identity};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

pub use chat::{ChatEngagement, ChatScorer, MessageCountScorer};
pub use posts::PostEngagement;

/// Identities that may not win this cycle.
pub type ExcludedSet = BTreeSet<Identity>;

/// A social post with its public engagement counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub author_id: String,
    pub author_name: String,
    /// Unix seconds.
    pub created_at: u64,
    #[serde(default)]
    pub likes: u64,
    #[serde(default)]
    pub reposts: u64,
    #[serde(default)]
    pub replies: u64,
}

impl Post {
    pub fn engagement(&self) -> u64 {
        self.likes
            .saturating_add(self.reposts)
            .saturating_add(self.replies)
    }
}

/// One chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub id: Option<String>,
    pub author_id: String,
    pub author_name: String,
    /// Unix seconds.
    pub sent_at: u64,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, thiserror::Error)]
pub enum EngagementError {
    #[error("activity source unavailable: {0}")]
    Unavailable(String),
    #[error("malformed activity data: {0}")]
    Malformed(String),
    #[error("scorer failed: {0}")]
    Scorer(String),
}

impl EngagementError {
    pub fn is_transient(&self) -> bool {
        matches!(self, EngagementError::Unavailable(_))
    }
}

/// Raw activity for the last `window`, in feed order (oldest first).
#[async_trait]
pub trait ActivityFeed: Send + Sync {
    async fn recent_posts(&self, window: Duration) -> Result<Vec<Post>, EngagementError>;
    async fn recent_messages(&self, window: Duration) -> Result<Vec<ChatMessage>, EngagementError>;
}

/// What a source found in the window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// No activity at all.
    Empty,
    /// There was activity but nobody in it may win.
    NoneEligible,
    Winner(Candidate),
}

impl Selection {
    pub fn candidate(&self) -> Option<&Candidate> {
        match self {
            Selection::Winner(c) => Some(c),
            _ => None,
        }
    }

    pub fn into_candidate(self) -> Option<Candidate> {
        match self {
            Selection::Winner(c) => Some(c),
            _ => None,
        }
    }
}

/// Pluggable ranking of candidates from platform activity.
#[async_trait]
pub trait EngagementSource: Send + Sync {
    /// Short label for logs ("posts", "chat").
    fn kind(&self) -> &'static str;

    /// The most engaged eligible member over `window`.
    async fn select_candidate(
        &self,
        window: Duration,
        excluded: &ExcludedSet,
    ) -> Result<Selection, EngagementError>;
}
