//! Outbound announcements to the community platform.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a notification goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "ref", rename_all = "snake_case")]
pub enum NotifyTarget {
    /// The community channel or group.
    Channel,
    /// A reply to a specific post or message.
    Reply(String),
}

impl NotifyTarget {
    /// Reply to `content_ref` when known, otherwise post to the channel.
    pub fn for_content(content_ref: Option<&str>) -> Self {
        match content_ref.map(str::trim).filter(|s| !s.is_empty()) {
            Some(r) => NotifyTarget::Reply(r.to_string()),
            None => NotifyTarget::Channel,
        }
    }
}

impl fmt::Display for NotifyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotifyTarget::Channel => f.write_str("channel"),
            NotifyTarget::Reply(r) => write!(f, "reply:{r}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("notifier rejected message (status {status}): {body}")]
    Rejected { status: u16, body: String },
}

impl NotifyError {
    pub fn is_transient(&self) -> bool {
        match self {
            NotifyError::Network(_) => true,
            NotifyError::Rejected { status, .. } => *status >= 500 || *status == 429,
            NotifyError::Config(_) => false,
        }
    }
}

/// Posts text to the originating platform. Failures are reported, never fatal.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, target: &NotifyTarget, text: &str) -> Result<(), NotifyError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_prefers_reply_when_content_known() {
        assert_eq!(
            NotifyTarget::for_content(Some("123")),
            NotifyTarget::Reply("123".to_string())
        );
        assert_eq!(NotifyTarget::for_content(Some("  ")), NotifyTarget::Channel);
        assert_eq!(NotifyTarget::for_content(None), NotifyTarget::Channel);
    }

    #[test]
    fn rate_limit_is_transient() {
        assert!(NotifyError::Rejected {
            status: 429,
            body: String::new()
        }
        .is_transient());
        assert!(!NotifyError::Rejected {
            status: 400,
            body: String::new()
        }
        .is_transient());
    }
}
