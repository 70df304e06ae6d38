//! Twitter session-proxy client
//!
//! Twitter is driven through a remote management service that owns the
//! logged-in browser session. Every call is a JSON `POST` to
//! `<manage_origin>/<endpoint>` carrying the configured Authorization value.
//! Session ids handed out by the proxy are remembered in the local database
//! so that a restart reuses the latest one.

use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::send_observed;
use crate::config::TwitterConfig;
use crate::data::{Database, TwitterPost};
use crate::error::AppError;
use crate::metrics::POSTS_MIRRORED_TOTAL;

const PLATFORM: &str = "twitter";

/// Login state of a proxy session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    LoggedIn,
    WaitingForConfirmationCode,
}

impl SessionStatus {
    /// Parse a status reported by the proxy; other states are not usable
    pub fn from_wire(status: &str) -> Option<Self> {
        match status {
            "loggedIn" => Some(Self::LoggedIn),
            "waitingForConfirmationCode" => Some(Self::WaitingForConfirmationCode),
            _ => None,
        }
    }
}

/// A proxy session and its current status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySession {
    pub id: String,
    pub status: SessionStatus,
}

#[derive(Debug, Serialize)]
struct CreateSessionRequest<'a> {
    username: &'a str,
    password: &'a str,
    email: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateSessionResponse {
    id: String,
    status: SessionStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionRequest<'a> {
    session_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmationCodeRequest<'a> {
    session_id: &'a str,
    code: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TweetRequest<'a> {
    session_id: &'a str,
    text: &'a str,
    /// Base64-encoded image bytes
    files: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to_tweet_id: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteTweetRequest<'a> {
    session_id: &'a str,
    tweet_id: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteTweet {
    tweet_id: String,
    text: String,
    tweeted_at: String,
}

/// Client for the Twitter session-management proxy
pub struct TwitterClient {
    http_client: Arc<reqwest::Client>,
    db: Arc<Database>,
    manage_origin: String,
    manage_auth: String,
    username: String,
    password: String,
    email: String,
    /// Serializes session lookup so concurrent requests don't each create one
    session_lock: Mutex<()>,
}

impl TwitterClient {
    /// Create new proxy client
    pub fn new(config: &TwitterConfig, http_client: Arc<reqwest::Client>, db: Arc<Database>) -> Self {
        Self {
            http_client,
            db,
            manage_origin: config.manage_origin.trim_end_matches('/').to_string(),
            manage_auth: config.manage_auth.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            email: config.email.clone(),
            session_lock: Mutex::new(()),
        }
    }

    /// Account name shown in the UI
    pub fn username(&self) -> &str {
        &self.username
    }

    async fn call<B: Serialize + ?Sized>(
        &self,
        endpoint: &'static str,
        body: &B,
    ) -> Result<reqwest::Response, AppError> {
        let request = self
            .http_client
            .post(format!("{}/{}", self.manage_origin, endpoint))
            .header(reqwest::header::AUTHORIZATION, &self.manage_auth)
            .json(body);

        send_observed(PLATFORM, endpoint, request).await
    }

    async fn call_checked<B: Serialize + ?Sized>(
        &self,
        endpoint: &'static str,
        body: &B,
    ) -> Result<reqwest::Response, AppError> {
        let response = self.call(endpoint, body).await?;
        ensure_success(endpoint, response).await
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    async fn create_session(&self) -> Result<ProxySession, AppError> {
        let response: CreateSessionResponse = self
            .call_checked(
                "create-session",
                &CreateSessionRequest {
                    username: &self.username,
                    password: &self.password,
                    email: &self.email,
                },
            )
            .await?
            .json()
            .await?;

        self.db.insert_twitter_session(&response.id).await?;
        tracing::info!(session_id = %response.id, status = ?response.status, "Twitter proxy session created");

        Ok(ProxySession {
            id: response.id,
            status: response.status,
        })
    }

    /// Status of a known session
    ///
    /// `None` if the proxy no longer has it or reports a state other than
    /// logged in or waiting for a code.
    async fn session_status(&self, id: &str) -> Result<Option<SessionStatus>, AppError> {
        let response = self
            .call("get-status", &SessionRequest { session_id: id })
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let body: StatusResponse = ensure_success("get-status", response).await?.json().await?;
        let status = SessionStatus::from_wire(&body.status);
        if status.is_none() {
            tracing::warn!(session_id = %id, status = %body.status, "Twitter proxy session unusable");
        }
        Ok(status)
    }

    /// Reuse the latest saved session, creating one when there is none
    /// or the proxy forgot it.
    pub async fn get_or_create_session(&self) -> Result<ProxySession, AppError> {
        let _guard = self.session_lock.lock().await;

        let Some(saved) = self.db.get_latest_twitter_session().await? else {
            return self.create_session().await;
        };

        match self.session_status(&saved.id).await? {
            Some(status) => Ok(ProxySession {
                id: saved.id,
                status,
            }),
            None => {
                tracing::info!(session_id = %saved.id, "Twitter proxy session replaced");
                self.create_session().await
            }
        }
    }

    async fn logged_in_session(&self) -> Result<ProxySession, AppError> {
        let session = self.get_or_create_session().await?;
        if session.status != SessionStatus::LoggedIn {
            return Err(AppError::Conflict(
                "Twitter session is not logged in".to_string(),
            ));
        }
        Ok(session)
    }

    /// Login state of the current session
    pub async fn status(&self) -> Result<SessionStatus, AppError> {
        Ok(self.get_or_create_session().await?.status)
    }

    /// Submit the confirmation code the proxy is waiting for
    pub async fn input_confirmation_code(&self, code: &str) -> Result<(), AppError> {
        let session = self.get_or_create_session().await?;
        if session.status != SessionStatus::WaitingForConfirmationCode {
            return Err(AppError::Conflict(
                "latest session is already logged in".to_string(),
            ));
        }

        self.call_checked(
            "input-confirmation-code",
            &ConfirmationCodeRequest {
                session_id: &session.id,
                code,
            },
        )
        .await?;

        tracing::info!(session_id = %session.id, "Twitter confirmation code submitted");
        Ok(())
    }

    // =========================================================================
    // Tweets
    // =========================================================================

    /// Fetch recent tweets and mirror them into the local table
    ///
    /// # Returns
    /// Number of tweets stored
    pub async fn fetch_tweets(&self) -> Result<usize, AppError> {
        let session = self.logged_in_session().await?;

        let remote: Vec<RemoteTweet> = self
            .call_checked(
                "get-tweets",
                &SessionRequest {
                    session_id: &session.id,
                },
            )
            .await?
            .json()
            .await?;

        let tweets: Vec<TwitterPost> = remote
            .into_iter()
            .filter_map(|tweet| match parse_timestamp(&tweet.tweeted_at) {
                Some(posted_at) => Some(TwitterPost {
                    id: tweet.tweet_id,
                    text: tweet.text,
                    posted_at,
                }),
                None => {
                    tracing::warn!(
                        tweet_id = %tweet.tweet_id,
                        tweeted_at = %tweet.tweeted_at,
                        "Skipping tweet with unparseable timestamp"
                    );
                    None
                }
            })
            .collect();

        self.db.upsert_tweets(&tweets).await?;
        POSTS_MIRRORED_TOTAL
            .with_label_values(&[PLATFORM])
            .inc_by(tweets.len() as u64);
        tracing::info!(count = tweets.len(), "Tweets mirrored");

        Ok(tweets.len())
    }

    /// Post a new tweet
    pub async fn tweet(&self, text: &str, files: &[Vec<u8>]) -> Result<(), AppError> {
        self.send_tweet(text, files, None).await
    }

    /// Reply to an existing tweet
    pub async fn reply(&self, tweet_id: &str, text: &str, files: &[Vec<u8>]) -> Result<(), AppError> {
        self.send_tweet(text, files, Some(tweet_id)).await
    }

    async fn send_tweet(
        &self,
        text: &str,
        files: &[Vec<u8>],
        reply_to_tweet_id: Option<&str>,
    ) -> Result<(), AppError> {
        let session = self.logged_in_session().await?;

        self.call_checked(
            "tweet",
            &TweetRequest {
                session_id: &session.id,
                text,
                files: files.iter().map(|file| STANDARD.encode(file)).collect(),
                reply_to_tweet_id,
            },
        )
        .await?;

        tracing::info!(reply_to = ?reply_to_tweet_id, files = files.len(), "Tweet sent");
        Ok(())
    }

    /// Delete a tweet remotely, then drop the local copy
    pub async fn delete_tweet(&self, tweet_id: &str) -> Result<(), AppError> {
        let session = self.logged_in_session().await?;

        self.call_checked(
            "delete-tweet",
            &DeleteTweetRequest {
                session_id: &session.id,
                tweet_id,
            },
        )
        .await?;
        self.db.delete_tweet(tweet_id).await?;

        tracing::info!(tweet_id, "Tweet deleted");
        Ok(())
    }
}

async fn ensure_success(
    endpoint: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, AppError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(AppError::platform(
        PLATFORM,
        format!("{} returned HTTP {}: {}", endpoint, status, body),
    ))
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}
