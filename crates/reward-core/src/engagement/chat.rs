use super::{
    ActivityFeed, ChatMessage, EngagementError, EngagementSource, ExcludedSet, Selection,
};
use crate::{Candidate, Identity};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default number of recent messages handed to the scorer.
pub const DEFAULT_MAX_MESSAGES: usize = 100;

/// Picks the most engaging participant of a chat transcript.
///
/// Implementations may be remote (a language model) and are not trusted: the
/// returned author id is re-checked against the transcript and exclusions.
#[async_trait]
pub trait ChatScorer: Send + Sync {
    async fn pick(
        &self,
        transcript: &[ChatMessage],
        excluded: &ExcludedSet,
    ) -> Result<Option<String>, EngagementError>;
}

/// Most messages wins; ties go to whoever spoke most recently.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageCountScorer;

#[async_trait]
impl ChatScorer for MessageCountScorer {
    async fn pick(
        &self,
        transcript: &[ChatMessage],
        excluded: &ExcludedSet,
    ) -> Result<Option<String>, EngagementError> {
        // author -> (messages, index of latest message)
        let mut tally: HashMap<&str, (u64, usize)> = HashMap::new();
        for (idx, msg) in transcript.iter().enumerate() {
            if is_excluded(msg, excluded) {
                continue;
            }
            let entry = tally.entry(msg.author_id.as_str()).or_insert((0, idx));
            entry.0 += 1;
            entry.1 = idx;
        }
        Ok(tally
            .into_iter()
            .max_by_key(|(_, score)| *score)
            .map(|(author, _)| author.to_string()))
    }
}

fn is_excluded(msg: &ChatMessage, excluded: &ExcludedSet) -> bool {
    excluded.contains(&Identity::new(msg.author_id.as_str()))
        || excluded.contains(&Identity::new(msg.author_name.as_str()))
}

/// Most recent `max_messages` non-empty messages, oldest first.
pub fn transcript(messages: Vec<ChatMessage>, max_messages: usize) -> Vec<ChatMessage> {
    let mut kept: Vec<ChatMessage> = messages
        .into_iter()
        .filter(|m| !m.text.trim().is_empty())
        .collect();
    let excess = kept.len().saturating_sub(max_messages);
    kept.drain(..excess);
    kept
}

pub struct ChatEngagement {
    feed: Arc<dyn ActivityFeed>,
    scorer: Arc<dyn ChatScorer>,
    max_messages: usize,
}

impl ChatEngagement {
    pub fn new(feed: Arc<dyn ActivityFeed>, scorer: Arc<dyn ChatScorer>) -> Self {
        Self {
            feed,
            scorer,
            max_messages: DEFAULT_MAX_MESSAGES,
        }
    }

    pub fn with_max_messages(mut self, max_messages: usize) -> Self {
        self.max_messages = max_messages.max(1);
        self
    }
}

#[async_trait]
impl EngagementSource for ChatEngagement {
    fn kind(&self) -> &'static str {
        "chat"
    }

    async fn select_candidate(
        &self,
        window: Duration,
        excluded: &ExcludedSet,
    ) -> Result<Selection, EngagementError> {
        let messages = transcript(self.feed.recent_messages(window).await?, self.max_messages);
        if messages.is_empty() {
            info!(event = "engagement_empty_window", source = "chat", "no messages in window");
            return Ok(Selection::Empty);
        }

        let Some(picked) = self.scorer.pick(&messages, excluded).await? else {
            info!(
                event = "engagement_no_eligible",
                source = "chat",
                considered = messages.len(),
                "scorer picked nobody"
            );
            return Ok(Selection::NoneEligible);
        };
        let picked = picked.trim();

        // The scorer's answer must name someone who actually spoke and may win.
        let Some(latest) = messages
            .iter()
            .rev()
            .find(|m| m.author_id == picked || m.author_name == picked)
        else {
            warn!(
                event = "engagement_pick_rejected",
                picked = %picked,
                "scorer picked an author absent from the transcript"
            );
            return Ok(Selection::NoneEligible);
        };
        if is_excluded(latest, excluded) {
            warn!(
                event = "engagement_pick_rejected",
                picked = %picked,
                "scorer picked an excluded author"
            );
            return Ok(Selection::NoneEligible);
        }

        debug!(author = %latest.author_id, "chat winner selected");
        let mut candidate = Candidate::new(latest.author_id.as_str(), latest.author_name.as_str());
        candidate.content_ref = latest.id.clone();
        Ok(Selection::Winner(candidate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engagement::Post;

    fn msg(author: &str, sent_at: u64, text: &str) -> ChatMessage {
        ChatMessage {
            id: Some(format!("m{sent_at}")),
            author_id: author.to_string(),
            author_name: format!("{author}_name"),
            sent_at,
            text: text.to_string(),
        }
    }

    struct FixedFeed(Vec<ChatMessage>);

    #[async_trait]
    impl ActivityFeed for FixedFeed {
        async fn recent_posts(&self, _window: Duration) -> Result<Vec<Post>, EngagementError> {
            Ok(Vec::new())
        }

        async fn recent_messages(
            &self,
            _window: Duration,
        ) -> Result<Vec<ChatMessage>, EngagementError> {
            Ok(self.0.clone())
        }
    }

    struct FixedScorer(&'static str);

    #[async_trait]
    impl ChatScorer for FixedScorer {
        async fn pick(
            &self,
            _transcript: &[ChatMessage],
            _excluded: &ExcludedSet,
        ) -> Result<Option<String>, EngagementError> {
            Ok(Some(self.0.to_string()))
        }
    }

    fn engagement(messages: Vec<ChatMessage>, scorer: Arc<dyn ChatScorer>) -> ChatEngagement {
        ChatEngagement::new(Arc::new(FixedFeed(messages)), scorer)
    }

    #[test]
    fn transcript_keeps_most_recent_non_empty() {
        let messages = vec![
            msg("a", 1, "hi"),
            msg("b", 2, "  "),
            msg("c", 3, "yo"),
            msg("d", 4, "gm"),
        ];
        let kept = transcript(messages, 2);
        let authors: Vec<&str> = kept.iter().map(|m| m.author_id.as_str()).collect();
        assert_eq!(authors, vec!["c", "d"]);
    }

    #[tokio::test]
    async fn count_scorer_ties_go_to_latest_speaker() {
        let transcript = vec![
            msg("a", 1, "x"),
            msg("b", 2, "x"),
            msg("a", 3, "x"),
            msg("b", 4, "x"),
        ];
        let pick = MessageCountScorer
            .pick(&transcript, &ExcludedSet::new())
            .await
            .expect("pick");
        assert_eq!(pick.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn count_scorer_skips_excluded() {
        let transcript = vec![msg("a", 1, "x"), msg("a", 2, "x"), msg("b", 3, "x")];
        let excluded: ExcludedSet = [Identity::new("a")].into_iter().collect();
        let pick = MessageCountScorer
            .pick(&transcript, &excluded)
            .await
            .expect("pick");
        assert_eq!(pick.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn candidate_carries_latest_message() {
        let source = engagement(
            vec![msg("a", 1, "x"), msg("a", 2, "y"), msg("b", 3, "z")],
            Arc::new(MessageCountScorer),
        );
        let c = source
            .select_candidate(Duration::from_secs(3600), &ExcludedSet::new())
            .await
            .expect("select")
            .into_candidate()
            .expect("candidate");
        assert_eq!(c.identity, Identity::new("a"));
        assert_eq!(c.display_name, "a_name");
        assert_eq!(c.content_ref.as_deref(), Some("m2"));
    }

    #[tokio::test]
    async fn pick_absent_from_transcript_is_rejected() {
        let source = engagement(vec![msg("a", 1, "x")], Arc::new(FixedScorer("ghost")));
        let c = source
            .select_candidate(Duration::from_secs(3600), &ExcludedSet::new())
            .await
            .expect("select");
        assert_eq!(c, Selection::NoneEligible);
    }

    #[tokio::test]
    async fn excluded_pick_is_rejected() {
        let source = engagement(vec![msg("a", 1, "x")], Arc::new(FixedScorer("a")));
        let excluded: ExcludedSet = [Identity::new("a")].into_iter().collect();
        let c = source
            .select_candidate(Duration::from_secs(3600), &excluded)
            .await
            .expect("select");
        assert_eq!(c, Selection::NoneEligible);
    }

    #[tokio::test]
    async fn empty_window_is_distinct_from_no_eligible() {
        let source = engagement(Vec::new(), Arc::new(MessageCountScorer));
        let c = source
            .select_candidate(Duration::from_secs(3600), &ExcludedSet::new())
            .await
            .expect("select");
        assert_eq!(c, Selection::Empty);

        let everyone_excluded: ExcludedSet = [Identity::new("a")].into_iter().collect();
        let c = engagement(vec![msg("a", 1, "x")], Arc::new(MessageCountScorer))
            .select_candidate(Duration::from_secs(3600), &everyone_excluded)
            .await
            .expect("select");
        assert_eq!(c, Selection::NoneEligible);
    }
}
