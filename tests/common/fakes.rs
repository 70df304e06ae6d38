//! In-process fakes of the Twitter session proxy, a Bluesky PDS, and the
//! Discord API. Each records what it received for assertions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Value, json};

use super::{TEST_MANAGE_AUTH, spawn_app};

// =============================================================================
// Twitter session proxy
// =============================================================================

#[derive(Debug, Default)]
pub struct FakeTwitterState {
    /// Session id -> status
    pub sessions: HashMap<String, String>,
    /// Status handed to newly created sessions
    pub initial_status: String,
    pub sessions_created: usize,
    /// Tweets returned by `get-tweets`
    pub tweets: Vec<Value>,
    /// Bodies received by `tweet`
    pub sent: Vec<Value>,
    pub deleted: Vec<String>,
    pub confirmation_codes: Vec<String>,
    pub fail_tweets: bool,
}

#[derive(Clone)]
pub struct FakeTwitter {
    pub origin: String,
    pub state: Arc<Mutex<FakeTwitterState>>,
}

impl FakeTwitter {
    pub async fn start() -> Self {
        Self::start_with_status("loggedIn").await
    }

    pub async fn start_with_status(initial_status: &str) -> Self {
        let state = Arc::new(Mutex::new(FakeTwitterState {
            initial_status: initial_status.to_string(),
            ..Default::default()
        }));

        let router = Router::new()
            .route("/create-session", post(twitter_create_session))
            .route("/get-status", post(twitter_get_status))
            .route("/input-confirmation-code", post(twitter_input_code))
            .route("/get-tweets", post(twitter_get_tweets))
            .route("/tweet", post(twitter_tweet))
            .route("/delete-tweet", post(twitter_delete_tweet))
            .with_state(state.clone());

        Self {
            origin: spawn_app(router).await,
            state,
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut FakeTwitterState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn push_tweet(&self, tweet_id: &str, text: &str, tweeted_at: &str) {
        self.with(|s| {
            s.tweets
                .push(json!({ "tweetId": tweet_id, "text": text, "tweetedAt": tweeted_at }))
        });
    }
}

type TwitterShared = Arc<Mutex<FakeTwitterState>>;

fn proxy_authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == TEST_MANAGE_AUTH)
}

fn session_status(state: &FakeTwitterState, body: &Value) -> Option<String> {
    body["sessionId"]
        .as_str()
        .and_then(|id| state.sessions.get(id))
        .cloned()
}

async fn twitter_create_session(
    State(state): State<TwitterShared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !proxy_authorized(&headers) || body["username"].as_str().is_none() {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let mut state = state.lock().unwrap();
    state.sessions_created += 1;
    let id = format!("session-{}", state.sessions_created);
    let status = state.initial_status.clone();
    state.sessions.insert(id.clone(), status.clone());

    Json(json!({ "id": id, "status": status })).into_response()
}

async fn twitter_get_status(
    State(state): State<TwitterShared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !proxy_authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match session_status(&state.lock().unwrap(), &body) {
        Some(status) => Json(json!({ "status": status })).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn twitter_input_code(
    State(state): State<TwitterShared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !proxy_authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let mut state = state.lock().unwrap();
    let Some(id) = body["sessionId"].as_str() else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    state
        .confirmation_codes
        .push(body["code"].as_str().unwrap_or_default().to_string());
    state.sessions.insert(id.to_string(), "loggedIn".to_string());

    Json(json!({})).into_response()
}

async fn twitter_get_tweets(
    State(state): State<TwitterShared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let state = state.lock().unwrap();
    if !proxy_authorized(&headers) || session_status(&state, &body).is_none() {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(Value::Array(state.tweets.clone())).into_response()
}

async fn twitter_tweet(
    State(state): State<TwitterShared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let mut state = state.lock().unwrap();
    if !proxy_authorized(&headers) || session_status(&state, &body).is_none() {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if state.fail_tweets {
        return (StatusCode::INTERNAL_SERVER_ERROR, "tweet failed").into_response();
    }

    let tweet_id = format!("tw-{}", state.sent.len() + 1);
    state.tweets.insert(
        0,
        json!({
            "tweetId": tweet_id,
            "text": body["text"],
            "tweetedAt": chrono::Utc::now().to_rfc3339(),
        }),
    );
    state.sent.push(body);

    Json(json!({})).into_response()
}

async fn twitter_delete_tweet(
    State(state): State<TwitterShared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let mut state = state.lock().unwrap();
    if !proxy_authorized(&headers) || session_status(&state, &body).is_none() {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let tweet_id = body["tweetId"].as_str().unwrap_or_default().to_string();
    state.tweets.retain(|tweet| tweet["tweetId"] != tweet_id.as_str());
    state.deleted.push(tweet_id);

    Json(json!({})).into_response()
}

// =============================================================================
// Bluesky PDS
// =============================================================================

pub const FAKE_DID: &str = "did:plc:fake";

#[derive(Debug, Default)]
pub struct FakeBlueskyState {
    pub sessions_created: usize,
    /// Current access token
    pub access_jwt: String,
    /// Feed items returned by `getAuthorFeed`
    pub feed: Vec<Value>,
    /// Bodies received by `createRecord`
    pub created_records: Vec<Value>,
    /// Bodies received by `deleteRecord`
    pub deleted_records: Vec<Value>,
    pub blobs_uploaded: usize,
    pub fail_posts: bool,
    pub fail_deletes: bool,
    /// Answer the next authenticated call with `ExpiredToken`
    pub expire_next: bool,
}

#[derive(Clone)]
pub struct FakeBluesky {
    pub origin: String,
    pub state: Arc<Mutex<FakeBlueskyState>>,
}

impl FakeBluesky {
    pub async fn start() -> Self {
        let state = Arc::new(Mutex::new(FakeBlueskyState::default()));

        let router = Router::new()
            .route(
                "/xrpc/com.atproto.server.createSession",
                post(bluesky_create_session),
            )
            .route("/xrpc/app.bsky.feed.getAuthorFeed", get(bluesky_author_feed))
            .route("/xrpc/app.bsky.feed.getPostThread", get(bluesky_post_thread))
            .route("/xrpc/com.atproto.repo.uploadBlob", post(bluesky_upload_blob))
            .route("/xrpc/com.atproto.repo.createRecord", post(bluesky_create_record))
            .route("/xrpc/com.atproto.repo.deleteRecord", post(bluesky_delete_record))
            .with_state(state.clone());

        Self {
            origin: spawn_app(router).await,
            state,
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut FakeBlueskyState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    /// Add a post to the author feed, returning its URI
    pub fn push_post(&self, rkey: &str, text: &str, created_at: &str) -> String {
        let uri = format!("at://{}/app.bsky.feed.post/{}", FAKE_DID, rkey);
        let item = json!({
            "post": {
                "uri": uri,
                "cid": format!("cid-{}", rkey),
                "record": { "$type": "app.bsky.feed.post", "text": text, "createdAt": created_at },
            }
        });
        self.with(|s| s.feed.insert(0, item));
        uri
    }
}

type BlueskyShared = Arc<Mutex<FakeBlueskyState>>;

/// `Err` carries the response to return when the call is not allowed
fn check_token(state: &mut FakeBlueskyState, headers: &HeaderMap) -> Result<(), Response> {
    let expected = format!("Bearer {}", state.access_jwt);
    let authorized = !state.access_jwt.is_empty()
        && headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == expected);

    if !authorized {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "AuthenticationRequired", "message": "bad token" })),
        )
            .into_response());
    }
    if state.expire_next {
        state.expire_next = false;
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "ExpiredToken", "message": "Token has expired" })),
        )
            .into_response());
    }
    Ok(())
}

async fn bluesky_create_session(
    State(state): State<BlueskyShared>,
    Json(body): Json<Value>,
) -> Response {
    if body["identifier"].as_str().is_none() || body["password"] != "app-password" {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "AuthenticationRequired" })),
        )
            .into_response();
    }
    let mut state = state.lock().unwrap();
    state.sessions_created += 1;
    state.access_jwt = format!("jwt-{}", state.sessions_created);

    Json(json!({
        "accessJwt": state.access_jwt,
        "refreshJwt": "refresh",
        "handle": body["identifier"],
        "did": FAKE_DID,
    }))
    .into_response()
}

async fn bluesky_author_feed(
    State(state): State<BlueskyShared>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let mut state = state.lock().unwrap();
    if let Err(response) = check_token(&mut state, &headers) {
        return response;
    }
    if query.get("actor").map(String::as_str) != Some(FAKE_DID) {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "InvalidRequest" }))).into_response();
    }
    Json(json!({ "feed": state.feed })).into_response()
}

async fn bluesky_post_thread(
    State(state): State<BlueskyShared>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let mut state = state.lock().unwrap();
    if let Err(response) = check_token(&mut state, &headers) {
        return response;
    }
    let uri = query.get("uri").cloned().unwrap_or_default();
    let post = state
        .feed
        .iter()
        .find(|item| item["post"]["uri"] == uri.as_str())
        .map(|item| item["post"].clone());

    let thread = match post {
        Some(post) => json!({ "$type": "app.bsky.feed.defs#threadViewPost", "post": post }),
        None => json!({ "$type": "app.bsky.feed.defs#notFoundPost", "uri": uri, "notFound": true }),
    };
    Json(json!({ "thread": thread })).into_response()
}

async fn bluesky_upload_blob(
    State(state): State<BlueskyShared>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut state = state.lock().unwrap();
    if let Err(response) = check_token(&mut state, &headers) {
        return response;
    }
    state.blobs_uploaded += 1;

    Json(json!({
        "blob": {
            "$type": "blob",
            "ref": { "$link": format!("bafy-{}", state.blobs_uploaded) },
            "mimeType": headers.get("content-type").and_then(|v| v.to_str().ok()).unwrap_or_default(),
            "size": body.len(),
        }
    }))
    .into_response()
}

async fn bluesky_create_record(
    State(state): State<BlueskyShared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let mut state = state.lock().unwrap();
    if let Err(response) = check_token(&mut state, &headers) {
        return response;
    }
    if state.fail_posts {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "InternalServerError", "message": "down" })),
        )
            .into_response();
    }

    let rkey = format!("rec{}", state.created_records.len() + 1);
    let uri = format!("at://{}/app.bsky.feed.post/{}", FAKE_DID, rkey);
    let cid = format!("cid-{}", rkey);
    state.feed.insert(
        0,
        json!({ "post": { "uri": uri, "cid": cid, "record": body["record"] } }),
    );
    state.created_records.push(body);

    Json(json!({ "uri": uri, "cid": cid })).into_response()
}

async fn bluesky_delete_record(
    State(state): State<BlueskyShared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let mut state = state.lock().unwrap();
    if let Err(response) = check_token(&mut state, &headers) {
        return response;
    }
    if state.fail_deletes {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "InternalServerError", "message": "down" })),
        )
            .into_response();
    }
    let uri = format!(
        "at://{}/{}/{}",
        body["repo"].as_str().unwrap_or_default(),
        body["collection"].as_str().unwrap_or_default(),
        body["rkey"].as_str().unwrap_or_default()
    );
    state.feed.retain(|item| item["post"]["uri"] != uri.as_str());
    state.deleted_records.push(body);

    Json(json!({})).into_response()
}

// =============================================================================
// Discord API
// =============================================================================

#[derive(Debug, Clone)]
pub struct FakeDiscordUser {
    pub id: String,
    pub username: String,
    pub global_name: Option<String>,
    /// Guild roles; `None` when not a member of the guild
    pub roles: Option<Vec<String>>,
    pub nick: Option<String>,
}

/// Start a fake Discord API base serving one user
pub async fn start_fake_discord(user: FakeDiscordUser) -> String {
    let user = Arc::new(user);

    let router = Router::new()
        .route("/oauth2/token", post(discord_token))
        .route("/users/@me", get(discord_me))
        .route("/users/@me/guilds/:guild_id/member", get(discord_member))
        .with_state(user);

    spawn_app(router).await
}

async fn discord_token(body: String) -> Response {
    let form: HashMap<String, String> = url::form_urlencoded::parse(body.as_bytes())
        .into_owned()
        .collect();
    if form.get("grant_type").map(String::as_str) != Some("authorization_code")
        || form.get("code").map(String::as_str) != Some("good-code")
    {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "invalid_grant" }))).into_response();
    }

    Json(json!({ "access_token": "discord-token", "token_type": "Bearer" })).into_response()
}

fn discord_authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == "Bearer discord-token")
}

async fn discord_me(State(user): State<Arc<FakeDiscordUser>>, headers: HeaderMap) -> Response {
    if !discord_authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(json!({
        "id": user.id,
        "username": user.username,
        "global_name": user.global_name,
    }))
    .into_response()
}

async fn discord_member(
    State(user): State<Arc<FakeDiscordUser>>,
    Path(guild_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !discord_authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match &user.roles {
        Some(roles) if guild_id == super::TEST_GUILD_ID => {
            Json(json!({ "roles": roles, "nick": user.nick })).into_response()
        }
        _ => (
            StatusCode::NOT_FOUND,
            Json(json!({ "message": "Unknown Guild", "code": 10004 })),
        )
            .into_response(),
    }
}
