//! Timeline service
//!
//! Builds the unified feed from the two local mirror tables.
//!
//! The merge itself ([`reconcile`]) is a pure function: it seeds the feed
//! with every tweet, attaches each Bluesky post to the first entry it
//! matches, appends the rest, and sorts newest first. A Bluesky post matches
//! an entry when both texts are equal once line breaks are stripped and
//! their timestamps are strictly closer than the policy window.
//!
//! Known limitation: two near-identical posts written by hand on each
//! platform within the window are merged as one.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::data::{BlueskyPost, Database, TwitterPost};
use crate::error::AppError;

/// Tolerance used to decide that two platform posts are one logical post
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchPolicy {
    /// Timestamps must differ by strictly less than this
    pub window: Duration,
}

impl MatchPolicy {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    fn within_window(&self, a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
        (a - b).abs() < self.window
    }
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            window: Duration::seconds(60),
        }
    }
}

/// Platform ids attached to a logical post
///
/// A logical post always has at least one id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformIds {
    Twitter(String),
    Bluesky(String),
    Both { twitter: String, bluesky: String },
}

impl PlatformIds {
    pub fn twitter(&self) -> Option<&str> {
        match self {
            Self::Twitter(id) | Self::Both { twitter: id, .. } => Some(id),
            Self::Bluesky(_) => None,
        }
    }

    pub fn bluesky(&self) -> Option<&str> {
        match self {
            Self::Bluesky(id) | Self::Both { bluesky: id, .. } => Some(id),
            Self::Twitter(_) => None,
        }
    }
}

/// A post as shown in the feed, possibly backed by one post per platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalPost {
    pub ids: PlatformIds,
    pub text: String,
    pub posted_at: DateTime<Utc>,
}

impl LogicalPost {
    pub fn twitter_id(&self) -> Option<&str> {
        self.ids.twitter()
    }

    pub fn bluesky_id(&self) -> Option<&str> {
        self.ids.bluesky()
    }
}

impl From<TwitterPost> for LogicalPost {
    fn from(tweet: TwitterPost) -> Self {
        Self {
            ids: PlatformIds::Twitter(tweet.id),
            text: tweet.text,
            posted_at: tweet.posted_at,
        }
    }
}

impl From<BlueskyPost> for LogicalPost {
    fn from(post: BlueskyPost) -> Self {
        Self {
            ids: PlatformIds::Bluesky(post.id),
            text: post.text,
            posted_at: post.posted_at,
        }
    }
}

/// Serialized shape of a [`LogicalPost`]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogicalPostView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub twitter_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bluesky_id: Option<String>,
    pub text: String,
    pub posted_at: DateTime<Utc>,
}

impl From<&LogicalPost> for LogicalPostView {
    fn from(post: &LogicalPost) -> Self {
        Self {
            twitter_id: post.twitter_id().map(str::to_owned),
            bluesky_id: post.bluesky_id().map(str::to_owned),
            text: post.text.clone(),
            posted_at: post.posted_at,
        }
    }
}

/// Strip `\r\n` and `\n` line breaks; a lone `\r` is kept.
fn normalize_text(text: &str) -> String {
    text.replace("\r\n", "").replace('\n', "")
}

/// Merge mirrored tweets and Bluesky posts into one feed, newest first.
///
/// When a Bluesky post matches several entries, the first one in feed order
/// wins. A merged entry keeps the tweet's text and timestamp. Entries with
/// equal timestamps keep their insertion order (tweets, then unmatched
/// Bluesky posts).
pub fn reconcile(
    tweets: Vec<TwitterPost>,
    bluesky_posts: Vec<BlueskyPost>,
    policy: &MatchPolicy,
) -> Vec<LogicalPost> {
    // (normalized text, post); the normalized text is computed once per entry
    let mut feed: Vec<(String, LogicalPost)> = tweets
        .into_iter()
        .map(|tweet| (normalize_text(&tweet.text), LogicalPost::from(tweet)))
        .collect();

    for post in bluesky_posts {
        let normalized = normalize_text(&post.text);
        let matched = feed.iter_mut().find(|(entry_text, entry)| {
            *entry_text == normalized && policy.within_window(entry.posted_at, post.posted_at)
        });

        match matched {
            Some((_, entry)) => attach_bluesky(entry, post.id),
            None => feed.push((normalized, LogicalPost::from(post))),
        }
    }

    let mut posts: Vec<LogicalPost> = feed.into_iter().map(|(_, post)| post).collect();
    posts.sort_by(|a, b| b.posted_at.cmp(&a.posted_at));
    posts
}

/// Attach a Bluesky id in place. An id already present is replaced.
fn attach_bluesky(entry: &mut LogicalPost, bluesky_id: String) {
    let ids = std::mem::replace(&mut entry.ids, PlatformIds::Bluesky(String::new()));
    entry.ids = match ids {
        PlatformIds::Twitter(twitter) | PlatformIds::Both { twitter, .. } => PlatformIds::Both {
            twitter,
            bluesky: bluesky_id,
        },
        PlatformIds::Bluesky(_) => PlatformIds::Bluesky(bluesky_id),
    };
}

/// Timeline service
pub struct TimelineService {
    db: Arc<Database>,
    limit: usize,
    policy: MatchPolicy,
}

impl TimelineService {
    /// Create new timeline service
    ///
    /// # Arguments
    /// * `limit` - Rows read per platform
    /// * `policy` - Cross-platform match tolerance
    pub fn new(db: Arc<Database>, limit: usize, policy: MatchPolicy) -> Self {
        Self { db, limit, policy }
    }

    /// Build the unified feed from the current mirror contents
    pub async fn feed(&self) -> Result<Vec<LogicalPost>, AppError> {
        let (tweets, bluesky_posts) = tokio::try_join!(
            self.db.get_recent_tweets(self.limit),
            self.db.get_recent_bluesky_posts(self.limit),
        )?;

        let tweet_count = tweets.len();
        let bluesky_count = bluesky_posts.len();
        let posts = reconcile(tweets, bluesky_posts, &self.policy);

        tracing::debug!(
            tweets = tweet_count,
            bluesky_posts = bluesky_count,
            logical_posts = posts.len(),
            "Feed reconciled"
        );
        crate::metrics::FEED_ITEMS.set(posts.len() as i64);

        Ok(posts)
    }
}
