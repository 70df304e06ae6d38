//! SQLite database operations
//!
//! All database access goes through this module.

use chrono::Utc;
use sqlx::{Pool, Sqlite, SqlitePool};
use std::path::Path;

use super::models::*;
use crate::error::AppError;

/// Database connection pool wrapper.
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    // =========================================================================
    // Connection
    // =========================================================================

    /// Connect to SQLite database
    ///
    /// Creates the database file if it doesn't exist.
    /// Runs pending migrations automatically.
    ///
    /// # Arguments
    /// * `path` - Path to SQLite database file
    ///
    /// # Errors
    /// Returns error if connection or migration fails
    pub async fn connect(path: &Path) -> Result<Self, AppError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::Database(sqlx::Error::Io(e)))?;
        }

        let connection_string = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePool::connect(&connection_string).await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| {
                tracing::error!("Migration failed: {}", e);
                AppError::Internal(anyhow::anyhow!("Migration failed: {}", e))
            })?;

        tracing::info!("Database connected and migrated successfully");

        Ok(Self { pool })
    }

    // =========================================================================
    // Tweets
    // =========================================================================

    /// Insert or update mirrored tweets in one transaction
    ///
    /// Existing rows keep their id and get the new text and timestamp.
    pub async fn upsert_tweets(&self, tweets: &[TwitterPost]) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        for tweet in tweets {
            sqlx::query(
                r#"
                INSERT INTO tweets (tweet_id, text, tweeted_at)
                VALUES (?, ?, ?)
                ON CONFLICT(tweet_id) DO UPDATE SET
                    text = excluded.text,
                    tweeted_at = excluded.tweeted_at
                "#,
            )
            .bind(&tweet.id)
            .bind(&tweet.text)
            .bind(tweet.posted_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Most recent tweets, newest first
    ///
    /// # Arguments
    /// * `limit` - Maximum number of results
    pub async fn get_recent_tweets(&self, limit: usize) -> Result<Vec<TwitterPost>, AppError> {
        let tweets = sqlx::query_as::<_, TwitterPost>(
            r#"
            SELECT tweet_id, text, tweeted_at FROM tweets
            ORDER BY tweeted_at DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(tweets)
    }

    /// Delete a mirrored tweet
    ///
    /// Deleting an id that is not mirrored is not an error.
    pub async fn delete_tweet(&self, tweet_id: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM tweets WHERE tweet_id = ?")
            .bind(tweet_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // =========================================================================
    // Bluesky posts
    // =========================================================================

    /// Insert or update mirrored Bluesky posts in one transaction
    pub async fn upsert_bluesky_posts(&self, posts: &[BlueskyPost]) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        for post in posts {
            sqlx::query(
                r#"
                INSERT INTO bluesky_posts (post_id, text, posted_at)
                VALUES (?, ?, ?)
                ON CONFLICT(post_id) DO UPDATE SET
                    text = excluded.text,
                    posted_at = excluded.posted_at
                "#,
            )
            .bind(&post.id)
            .bind(&post.text)
            .bind(post.posted_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Most recent Bluesky posts, newest first
    pub async fn get_recent_bluesky_posts(
        &self,
        limit: usize,
    ) -> Result<Vec<BlueskyPost>, AppError> {
        let posts = sqlx::query_as::<_, BlueskyPost>(
            r#"
            SELECT post_id, text, posted_at FROM bluesky_posts
            ORDER BY posted_at DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(posts)
    }

    /// Delete a mirrored Bluesky post
    pub async fn delete_bluesky_post(&self, post_id: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM bluesky_posts WHERE post_id = ?")
            .bind(post_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // =========================================================================
    // Twitter proxy sessions
    // =========================================================================

    /// Remember a session id issued by the Twitter proxy
    pub async fn insert_twitter_session(&self, id: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO twitter_manage_sessions (id, created_at)
            VALUES (?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// The most recently created proxy session, if any
    pub async fn get_latest_twitter_session(
        &self,
    ) -> Result<Option<TwitterManageSession>, AppError> {
        let session = sqlx::query_as::<_, TwitterManageSession>(
            r#"
            SELECT id, created_at FROM twitter_manage_sessions
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }
}
