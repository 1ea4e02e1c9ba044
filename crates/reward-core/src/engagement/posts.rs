use super::{ActivityFeed, EngagementError, EngagementSource, ExcludedSet, Post, Selection};
use crate::{Candidate, Identity};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Picks the author of the most engaged post (likes + reposts + replies).
pub struct PostEngagement {
    feed: Arc<dyn ActivityFeed>,
}

impl PostEngagement {
    pub fn new(feed: Arc<dyn ActivityFeed>) -> Self {
        Self { feed }
    }
}

/// Rank `posts` by engagement, highest first. Ties keep feed order.
pub fn rank_posts(posts: &[Post]) -> Vec<&Post> {
    let mut ranked: Vec<&Post> = posts.iter().collect();
    ranked.sort_by(|a, b| b.engagement().cmp(&a.engagement()));
    ranked
}

/// Best-ranked post whose author is neither excluded by id nor by name.
pub fn top_eligible<'a>(posts: &'a [Post], excluded: &ExcludedSet) -> Option<&'a Post> {
    rank_posts(posts).into_iter().find(|p| {
        !excluded.contains(&Identity::new(p.author_id.as_str()))
            && !excluded.contains(&Identity::new(p.author_name.as_str()))
    })
}

#[async_trait]
impl EngagementSource for PostEngagement {
    fn kind(&self) -> &'static str {
        "posts"
    }

    async fn select_candidate(
        &self,
        window: Duration,
        excluded: &ExcludedSet,
    ) -> Result<Selection, EngagementError> {
        let posts = self.feed.recent_posts(window).await?;
        if posts.is_empty() {
            info!(event = "engagement_empty_window", source = "posts", "no posts in window");
            return Ok(Selection::Empty);
        }

        let Some(best) = top_eligible(&posts, excluded) else {
            info!(
                event = "engagement_no_eligible",
                source = "posts",
                considered = posts.len(),
                "no eligible author"
            );
            return Ok(Selection::NoneEligible);
        };
        debug!(
            post_id = %best.id,
            author = %best.author_id,
            engagement = best.engagement(),
            "top post selected"
        );
        Ok(Selection::Winner(
            Candidate::new(best.author_id.as_str(), best.author_name.as_str())
                .with_content_ref(best.id.as_str()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(id: &str, author: &str, likes: u64, reposts: u64, replies: u64) -> Post {
        Post {
            id: id.to_string(),
            author_id: author.to_string(),
            author_name: format!("{author}_name"),
            created_at: 0,
            likes,
            reposts,
            replies,
        }
    }

    #[test]
    fn ranks_by_summed_metrics() {
        let posts = vec![
            post("p1", "a", 5, 0, 0),
            post("p2", "b", 1, 2, 3),
            post("p3", "c", 0, 0, 1),
        ];
        let ids: Vec<&str> = rank_posts(&posts).iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["p2", "p1", "p3"]);
    }

    #[test]
    fn ties_keep_feed_order() {
        let posts = vec![post("p1", "a", 2, 0, 0), post("p2", "b", 0, 2, 0)];
        let best = top_eligible(&posts, &ExcludedSet::new()).expect("winner");
        assert_eq!(best.id, "p1");
    }

    #[test]
    fn skips_excluded_by_id_or_name() {
        let posts = vec![
            post("p1", "a", 10, 0, 0),
            post("p2", "b", 5, 0, 0),
            post("p3", "c", 1, 0, 0),
        ];
        let excluded: ExcludedSet = [Identity::new("a"), Identity::new("b_name")]
            .into_iter()
            .collect();
        let best = top_eligible(&posts, &excluded).expect("winner");
        assert_eq!(best.author_id, "c");
    }

    #[test]
    fn everyone_excluded_yields_none() {
        let posts = vec![post("p1", "a", 10, 0, 0)];
        let excluded: ExcludedSet = [Identity::new("a")].into_iter().collect();
        assert!(top_eligible(&posts, &excluded).is_none());
    }
}
