//! Data models
//!
//! Rust structs representing rows of the local mirror tables.
//! Timestamps use chrono and are stored as RFC 3339 text in UTC.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Mirrored posts
// =============================================================================

/// A tweet mirrored from the Twitter session proxy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TwitterPost {
    /// Platform-native tweet id
    #[sqlx(rename = "tweet_id")]
    pub id: String,
    pub text: String,
    #[sqlx(rename = "tweeted_at")]
    pub posted_at: DateTime<Utc>,
}

/// A Bluesky post mirrored from the author feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct BlueskyPost {
    /// AT URI (`at://did/app.bsky.feed.post/rkey`)
    #[sqlx(rename = "post_id")]
    pub id: String,
    pub text: String,
    pub posted_at: DateTime<Utc>,
}

// =============================================================================
// Twitter proxy sessions
// =============================================================================

/// A session id issued by the Twitter session-management proxy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TwitterManageSession {
    pub id: String,
    pub created_at: DateTime<Utc>,
}

/// Which mirror table a row belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Twitter,
    Bluesky,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Twitter => "twitter",
            Self::Bluesky => "bluesky",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
