//! Post, reply and delete dispatch
//!
//! One user action is fanned out to every enabled platform concurrently.
//! Platforms fail independently: an error on one side never cancels or
//! rolls back the other. A successful post is followed by a re-fetch of
//! that platform's feed so the local mirror reflects the new post.

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;

use crate::data::{Database, Platform};
use crate::error::AppError;
use crate::metrics::DISPATCH_OUTCOMES_TOTAL;
use crate::platform::{BlueskyClient, TwitterClient};

/// What a compose request targets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Targets {
    pub twitter: bool,
    pub bluesky: bool,
}

/// Post ids a compose request replies to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplyTo {
    pub twitter_id: Option<String>,
    pub bluesky_id: Option<String>,
}

impl ReplyTo {
    pub fn is_reply(&self) -> bool {
        self.twitter_id.is_some() || self.bluesky_id.is_some()
    }
}

/// A post or reply authored once for every platform
#[derive(Debug, Clone, Default)]
pub struct ComposeRequest {
    pub text: String,
    pub targets: Targets,
    pub reply_to: ReplyTo,
    /// Raw image uploads
    pub files: Vec<Vec<u8>>,
}

/// Result of one platform's part of a dispatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "lowercase")]
pub enum PlatformOutcome {
    /// Not requested, not applicable, or platform disabled
    Skipped,
    Done,
    Failed(String),
}

impl PlatformOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::Done => "done",
            Self::Failed(_) => "failed",
        }
    }
}

/// Per-platform outcomes of a dispatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub twitter: PlatformOutcome,
    pub bluesky: PlatformOutcome,
}

impl DispatchReport {
    pub fn has_failures(&self) -> bool {
        self.twitter.is_failed() || self.bluesky.is_failed()
    }
}

/// Fans user actions out to the enabled platforms
pub struct Dispatcher {
    db: Arc<Database>,
    twitter: Option<Arc<TwitterClient>>,
    bluesky: Option<Arc<BlueskyClient>>,
}

impl Dispatcher {
    /// Create new dispatcher
    ///
    /// A `None` client means the platform is disabled.
    pub fn new(
        db: Arc<Database>,
        twitter: Option<Arc<TwitterClient>>,
        bluesky: Option<Arc<BlueskyClient>>,
    ) -> Self {
        Self {
            db,
            twitter,
            bluesky,
        }
    }

    /// Publish a post or reply
    ///
    /// With any reply id present, a platform is only used when it is
    /// targeted and has its own reply id; otherwise every targeted platform
    /// gets a fresh post.
    pub async fn compose(&self, request: &ComposeRequest) -> DispatchReport {
        let ComposeRequest {
            text,
            targets,
            reply_to,
            files,
        } = request;
        let is_reply = reply_to.is_reply();

        let twitter_job = async {
            let Some(client) = self.twitter.as_deref().filter(|_| targets.twitter) else {
                return None;
            };
            let reply_id = reply_to.twitter_id.as_deref();
            if is_reply && reply_id.is_none() {
                return None;
            }

            Some(async move {
                match reply_id {
                    Some(tweet_id) => client.reply(tweet_id, text, files).await?,
                    None => client.tweet(text, files).await?,
                }
                client.fetch_tweets().await?;
                Ok::<(), AppError>(())
            }
            .await)
        };

        let bluesky_job = async {
            let Some(client) = self.bluesky.as_deref().filter(|_| targets.bluesky) else {
                return None;
            };
            let reply_uri = reply_to.bluesky_id.as_deref();
            if is_reply && reply_uri.is_none() {
                return None;
            }

            Some(async move {
                client.post(text, files, reply_uri).await?;
                client.fetch_posts().await?;
                Ok::<(), AppError>(())
            }
            .await)
        };

        let (twitter, bluesky) = tokio::join!(twitter_job, bluesky_job);
        let report = DispatchReport {
            twitter: settle("compose", Platform::Twitter, twitter),
            bluesky: settle("compose", Platform::Bluesky, bluesky),
        };

        tracing::info!(
            reply = is_reply,
            files = files.len(),
            twitter = report.twitter.label(),
            bluesky = report.bluesky.label(),
            "Compose dispatched"
        );
        report
    }

    /// Delete the platform posts behind one logical post
    ///
    /// The local Bluesky row is dropped alongside the remote delete, even
    /// when Bluesky is disabled or the remote delete fails.
    pub async fn delete(
        &self,
        twitter_id: Option<&str>,
        bluesky_id: Option<&str>,
    ) -> DispatchReport {
        let twitter_job = run_if(
            self.twitter.as_deref().zip(twitter_id),
            |(client, tweet_id)| client.delete_tweet(tweet_id),
        );

        let bluesky_job = run_if(bluesky_id, |uri| async move {
            let remote = async {
                match self.bluesky.as_deref() {
                    Some(client) => client.delete_post(uri).await,
                    None => Ok(()),
                }
            };
            let (remote, local) = tokio::join!(remote, self.db.delete_bluesky_post(uri));
            remote.and(local)
        });

        let (twitter, bluesky) = tokio::join!(twitter_job, bluesky_job);
        let report = DispatchReport {
            twitter: settle("delete", Platform::Twitter, twitter),
            bluesky: settle("delete", Platform::Bluesky, bluesky),
        };

        tracing::info!(
            twitter = report.twitter.label(),
            bluesky = report.bluesky.label(),
            "Delete dispatched"
        );
        report
    }

    /// Re-fetch both platforms into the local mirror
    pub async fn refresh(&self) -> DispatchReport {
        let twitter_job = run_if(self.twitter.as_deref(), |client| async move {
            client.fetch_tweets().await.map(|_| ())
        });
        let bluesky_job = run_if(self.bluesky.as_deref(), |client| async move {
            client.fetch_posts().await.map(|_| ())
        });

        let (twitter, bluesky) = tokio::join!(twitter_job, bluesky_job);
        DispatchReport {
            twitter: settle("refresh", Platform::Twitter, twitter),
            bluesky: settle("refresh", Platform::Bluesky, bluesky),
        }
    }
}

async fn run_if<T, F, Fut>(input: Option<T>, job: F) -> Option<Result<(), AppError>>
where
    F: FnOnce(T) -> Fut,
    Fut: Future<Output = Result<(), AppError>>,
{
    match input {
        Some(input) => Some(job(input).await),
        None => None,
    }
}

fn settle(
    action: &'static str,
    platform: Platform,
    result: Option<Result<(), AppError>>,
) -> PlatformOutcome {
    let outcome = match result {
        None => PlatformOutcome::Skipped,
        Some(Ok(())) => PlatformOutcome::Done,
        Some(Err(error)) => {
            tracing::error!(action, %platform, %error, "Platform dispatch failed");
            PlatformOutcome::Failed(error.to_string())
        }
    };

    DISPATCH_OUTCOMES_TOTAL
        .with_label_values(&[action, platform.as_str(), outcome.label()])
        .inc();
    outcome
}
