//! Bluesky client
//!
//! Talks XRPC to the configured PDS with an app password. The access token
//! is created lazily and cached; a request rejected because the token
//! expired re-creates the session once and is retried.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Method, RequestBuilder};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::sync::RwLock;

use super::send_observed;
use crate::config::BlueskyConfig;
use crate::data::{BlueskyPost, Database};
use crate::error::AppError;
use crate::metrics::POSTS_MIRRORED_TOTAL;

const PLATFORM: &str = "bluesky";
const POST_COLLECTION: &str = "app.bsky.feed.post";
/// Upper bound of `getAuthorFeed`'s `limit` parameter
const MAX_FEED_PAGE: usize = 100;
/// Images allowed in one `app.bsky.embed.images` embed
pub const MAX_IMAGES: usize = 4;

#[derive(Debug, Clone)]
struct XrpcSession {
    access_jwt: String,
    did: String,
}

#[derive(Debug, Serialize)]
struct CreateSessionRequest<'a> {
    identifier: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionResponse {
    access_jwt: String,
    did: String,
}

/// Error body returned by XRPC endpoints
#[derive(Debug, Default, Deserialize)]
struct XrpcError {
    error: Option<String>,
    message: Option<String>,
}

impl XrpcError {
    fn is_expired_token(&self) -> bool {
        matches!(
            self.error.as_deref(),
            Some("ExpiredToken") | Some("InvalidToken")
        )
    }

    fn describe(&self) -> String {
        match (&self.error, &self.message) {
            (Some(error), Some(message)) => format!("{error}: {message}"),
            (Some(error), None) => error.clone(),
            (None, Some(message)) => message.clone(),
            (None, None) => "no error body".to_string(),
        }
    }
}

/// Reference to a specific version of a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrongRef {
    pub uri: String,
    pub cid: String,
}

/// Reply target of a post record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyRefs {
    pub root: StrongRef,
    pub parent: StrongRef,
}

#[derive(Debug, Deserialize)]
struct AuthorFeed {
    feed: Vec<FeedViewPost>,
}

#[derive(Debug, Deserialize)]
struct FeedViewPost {
    post: PostView,
    /// Present on reposts
    #[serde(default)]
    reason: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct PostView {
    uri: String,
    cid: String,
    record: PostRecordView,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostRecordView {
    #[serde(default)]
    text: String,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    reply: Option<ReplyRefs>,
}

#[derive(Debug, Deserialize)]
struct PostThread {
    thread: ThreadView,
}

/// Root of a `getPostThread` response
#[derive(Debug, Deserialize)]
#[serde(tag = "$type")]
enum ThreadView {
    #[serde(rename = "app.bsky.feed.defs#threadViewPost")]
    Post { post: PostView },
    #[serde(rename = "app.bsky.feed.defs#notFoundPost")]
    NotFound { uri: String },
    #[serde(rename = "app.bsky.feed.defs#blockedPost")]
    Blocked { uri: String },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct UploadBlobResponse {
    blob: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct CreateRecordRequest<'a> {
    repo: &'a str,
    collection: &'static str,
    record: &'a PostRecord<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PostRecord<'a> {
    #[serde(rename = "$type")]
    record_type: &'static str,
    text: &'a str,
    created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    embed: Option<ImagesEmbed>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply: Option<ReplyRefs>,
}

#[derive(Debug, Serialize)]
struct ImagesEmbed {
    #[serde(rename = "$type")]
    embed_type: &'static str,
    images: Vec<EmbeddedImage>,
}

#[derive(Debug, Serialize)]
struct EmbeddedImage {
    image: serde_json::Value,
    alt: String,
}

#[derive(Debug, Deserialize)]
struct CreateRecordResponse {
    uri: String,
}

#[derive(Debug, Serialize)]
struct DeleteRecordRequest<'a> {
    repo: &'a str,
    collection: &'a str,
    rkey: &'a str,
}

/// Parts of an `at://<repo>/<collection>/<rkey>` URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordUri<'a> {
    pub repo: &'a str,
    pub collection: &'a str,
    pub rkey: &'a str,
}

impl<'a> RecordUri<'a> {
    pub fn parse(uri: &'a str) -> Result<Self, AppError> {
        let invalid = || AppError::Validation(format!("Invalid Bluesky post URI: {uri}"));

        let path = uri.strip_prefix("at://").ok_or_else(invalid)?;
        let mut segments = path.split('/');
        let (Some(repo), Some(collection), Some(rkey), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(invalid());
        };

        if repo.is_empty() || collection.is_empty() || rkey.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            repo,
            collection,
            rkey,
        })
    }
}

/// Bluesky XRPC client
pub struct BlueskyClient {
    http_client: Arc<reqwest::Client>,
    db: Arc<Database>,
    service: String,
    username: String,
    password: String,
    feed_limit: usize,
    session: RwLock<Option<XrpcSession>>,
}

impl BlueskyClient {
    /// Create new client; no request is made until first use
    ///
    /// # Arguments
    /// * `feed_limit` - Posts fetched from the author feed (capped at 100)
    pub fn new(
        config: &BlueskyConfig,
        http_client: Arc<reqwest::Client>,
        db: Arc<Database>,
        feed_limit: usize,
    ) -> Self {
        Self {
            http_client,
            db,
            service: config.service.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            feed_limit: feed_limit.min(MAX_FEED_PAGE),
            session: RwLock::new(None),
        }
    }

    /// Account name shown in the UI
    pub fn username(&self) -> &str {
        &self.username
    }

    fn xrpc_url(&self, nsid: &str) -> String {
        format!("{}/xrpc/{}", self.service, nsid)
    }

    // =========================================================================
    // Session
    // =========================================================================

    async fn create_session(&self) -> Result<XrpcSession, AppError> {
        let request = self
            .http_client
            .post(self.xrpc_url("com.atproto.server.createSession"))
            .json(&CreateSessionRequest {
                identifier: &self.username,
                password: &self.password,
            });

        let response = send_observed(PLATFORM, "com.atproto.server.createSession", request).await?;
        let response = ensure_success("com.atproto.server.createSession", response).await?;
        let body: CreateSessionResponse = response.json().await?;

        tracing::info!(did = %body.did, "Bluesky session created");
        Ok(XrpcSession {
            access_jwt: body.access_jwt,
            did: body.did,
        })
    }

    async fn current_session(&self) -> Result<XrpcSession, AppError> {
        if let Some(session) = self.session.read().await.as_ref() {
            return Ok(session.clone());
        }

        let mut slot = self.session.write().await;
        if let Some(session) = slot.as_ref() {
            return Ok(session.clone());
        }
        let session = self.create_session().await?;
        *slot = Some(session.clone());
        Ok(session)
    }

    /// Replace `stale` unless another request already did
    async fn renew_session(&self, stale: &XrpcSession) -> Result<XrpcSession, AppError> {
        let mut slot = self.session.write().await;
        if let Some(current) = slot.as_ref() {
            if current.access_jwt != stale.access_jwt {
                return Ok(current.clone());
            }
        }
        let session = self.create_session().await?;
        *slot = Some(session.clone());
        Ok(session)
    }

    /// Send an authenticated XRPC request, renewing the session once on
    /// an expired token.
    async fn send_authed<F>(
        &self,
        method: Method,
        nsid: &'static str,
        build: F,
    ) -> Result<reqwest::Response, AppError>
    where
        F: Fn(RequestBuilder, &XrpcSession) -> RequestBuilder,
    {
        let url = self.xrpc_url(nsid);
        let mut session = self.current_session().await?;
        let mut renewed = false;

        loop {
            let request = build(self.http_client.request(method.clone(), &url), &session)
                .bearer_auth(&session.access_jwt);
            let response = send_observed(PLATFORM, nsid, request).await?;

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            let error: XrpcError = response.json().await.unwrap_or_default();
            if !renewed && error.is_expired_token() {
                tracing::debug!(nsid, "Bluesky token expired; renewing session");
                renewed = true;
                session = self.renew_session(&session).await?;
                continue;
            }

            return Err(AppError::platform(
                PLATFORM,
                format!("{} returned HTTP {}: {}", nsid, status, error.describe()),
            ));
        }
    }

    async fn get_json<R: DeserializeOwned>(
        &self,
        nsid: &'static str,
        query: impl Fn(&XrpcSession) -> Vec<(&'static str, String)>,
    ) -> Result<R, AppError> {
        let response = self
            .send_authed(Method::GET, nsid, |request, session| {
                request.query(&query(session))
            })
            .await?;
        Ok(response.json().await?)
    }

    // =========================================================================
    // Posts
    // =========================================================================

    /// Fetch the account's recent posts and mirror them locally
    ///
    /// Reposts and records without a parseable `createdAt` are skipped.
    ///
    /// # Returns
    /// Number of posts stored
    pub async fn fetch_posts(&self) -> Result<usize, AppError> {
        let limit = self.feed_limit.to_string();
        let feed: AuthorFeed = self
            .get_json("app.bsky.feed.getAuthorFeed", |session| {
                vec![
                    ("actor", session.did.clone()),
                    ("filter", "posts_and_author_threads".to_string()),
                    ("limit", limit.clone()),
                ]
            })
            .await?;

        let posts: Vec<BlueskyPost> = feed
            .feed
            .into_iter()
            .filter(|item| item.reason.is_none())
            .filter_map(|item| {
                let post = item.post;
                let posted_at = post.record.created_at.as_deref().and_then(parse_timestamp);
                match posted_at {
                    Some(posted_at) => Some(BlueskyPost {
                        id: post.uri,
                        text: post.record.text,
                        posted_at,
                    }),
                    None => {
                        tracing::warn!(uri = %post.uri, "Skipping Bluesky post without a valid createdAt");
                        None
                    }
                }
            })
            .collect();

        self.db.upsert_bluesky_posts(&posts).await?;
        POSTS_MIRRORED_TOTAL
            .with_label_values(&[PLATFORM])
            .inc_by(posts.len() as u64);
        tracing::info!(count = posts.len(), "Bluesky posts mirrored");

        Ok(posts.len())
    }

    /// Build the reply refs for answering `uri`
    ///
    /// The root is the target's own thread root when it is itself a reply.
    async fn resolve_reply(&self, uri: &str) -> Result<ReplyRefs, AppError> {
        let thread: PostThread = self
            .get_json("app.bsky.feed.getPostThread", |_| {
                vec![
                    ("uri", uri.to_string()),
                    ("depth", "0".to_string()),
                    ("parentHeight", "0".to_string()),
                ]
            })
            .await?;

        match thread.thread {
            ThreadView::Post { post } => Ok(reply_refs_for(post)),
            ThreadView::NotFound { uri } => Err(AppError::platform(
                PLATFORM,
                format!("reply target {uri} was not found"),
            )),
            ThreadView::Blocked { uri } => Err(AppError::platform(
                PLATFORM,
                format!("reply target {uri} is blocked"),
            )),
            ThreadView::Unknown => Err(AppError::platform(
                PLATFORM,
                format!("reply target {uri} has an unsupported thread type"),
            )),
        }
    }

    async fn upload_image(&self, file: &[u8]) -> Result<serde_json::Value, AppError> {
        let jpeg = super::image::scale_to_jpeg(file.to_vec()).await?;

        let response = self
            .send_authed(Method::POST, "com.atproto.repo.uploadBlob", |request, _| {
                request
                    .header(reqwest::header::CONTENT_TYPE, "image/jpeg")
                    .body(jpeg.clone())
            })
            .await?;
        let body: UploadBlobResponse = response.json().await?;

        Ok(body.blob)
    }

    /// Publish a post, optionally as a reply to the post at `reply_to`
    ///
    /// # Returns
    /// AT URI of the created record
    pub async fn post(
        &self,
        text: &str,
        files: &[Vec<u8>],
        reply_to: Option<&str>,
    ) -> Result<String, AppError> {
        if files.len() > MAX_IMAGES {
            return Err(AppError::Validation(format!(
                "Bluesky accepts at most {} images per post",
                MAX_IMAGES
            )));
        }

        let reply = match reply_to {
            Some(uri) => Some(self.resolve_reply(uri).await?),
            None => None,
        };

        let blobs =
            futures::future::try_join_all(files.iter().map(|file| self.upload_image(file))).await?;
        let embed = (!blobs.is_empty()).then(|| ImagesEmbed {
            embed_type: "app.bsky.embed.images",
            images: blobs
                .into_iter()
                .map(|image| EmbeddedImage {
                    image,
                    alt: String::new(),
                })
                .collect(),
        });

        let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let record = PostRecord {
            record_type: POST_COLLECTION,
            text,
            created_at,
            embed,
            reply,
        };

        let response = self
            .send_authed(Method::POST, "com.atproto.repo.createRecord", |request, session| {
                request.json(&CreateRecordRequest {
                    repo: &session.did,
                    collection: POST_COLLECTION,
                    record: &record,
                })
            })
            .await?;
        let created: CreateRecordResponse = response.json().await?;

        tracing::info!(uri = %created.uri, reply = reply_to.is_some(), "Bluesky post created");
        Ok(created.uri)
    }

    /// Delete the post record at `uri`
    pub async fn delete_post(&self, uri: &str) -> Result<(), AppError> {
        let record = RecordUri::parse(uri)?;

        self.send_authed(Method::POST, "com.atproto.repo.deleteRecord", |request, _| {
            request.json(&DeleteRecordRequest {
                repo: record.repo,
                collection: record.collection,
                rkey: record.rkey,
            })
        })
        .await?;

        tracing::info!(uri, "Bluesky post deleted");
        Ok(())
    }
}

fn reply_refs_for(post: PostView) -> ReplyRefs {
    let parent = StrongRef {
        uri: post.uri,
        cid: post.cid,
    };
    let root = post
        .record
        .reply
        .map(|refs| refs.root)
        .unwrap_or_else(|| parent.clone());
    ReplyRefs { root, parent }
}

async fn ensure_success(
    nsid: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, AppError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let error: XrpcError = response.json().await.unwrap_or_default();
    Err(AppError::platform(
        PLATFORM,
        format!("{} returned HTTP {}: {}", nsid, status, error.describe()),
    ))
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}
