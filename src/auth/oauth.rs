//! Discord OAuth flow
//!
//! Implements the OAuth 2.0 authorization code flow with Discord. Only
//! members of the configured guild holding one of the allowed roles may
//! sign in.

use axum::{
    Router,
    extract::{Query, State},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use reqwest::StatusCode;
use serde::Deserialize;

use super::middleware::MaybeUser;
use super::session::{SESSION_COOKIE, Session, create_session_token};
use crate::AppState;
use crate::config::DiscordOAuthConfig;
use crate::error::AppError;
use crate::platform::send_observed;

const STATE_COOKIE: &str = "oauth_state";
const SCOPES: &str = "identify guilds.members.read";
const CALLBACK_PATH: &str = "/sign-in/callback/discord";
const PLATFORM: &str = "discord";

/// Create authentication router
///
/// Routes:
/// - GET /sign-in - Sign-in page
/// - POST /sign-in - Redirect to Discord
/// - GET /sign-in/callback/discord - OAuth callback
/// - POST /sign-out - Sign out
pub fn auth_router() -> Router<AppState> {
    Router::new()
        .route("/sign-in", get(sign_in_page).post(discord_redirect))
        .route(CALLBACK_PATH, get(discord_callback))
        .route("/sign-out", post(sign_out))
}

// =============================================================================
// Sign-in Page
// =============================================================================

const SIGN_IN_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Sign in - Crosspost</title></head>
<body>
    <h1>Crosspost</h1>
    <form method="post" action="/sign-in">
        <button type="submit">Sign in with Discord</button>
    </form>
</body>
</html>
"#;

/// GET /sign-in
async fn sign_in_page(MaybeUser(user): MaybeUser) -> Response {
    if user.is_some() {
        return Redirect::to("/").into_response();
    }
    Html(SIGN_IN_PAGE).into_response()
}

// =============================================================================
// Discord OAuth
// =============================================================================

/// POST /sign-in
///
/// Stores a fresh CSRF state in a cookie and redirects to Discord.
async fn discord_redirect(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<impl IntoResponse, AppError> {
    let csrf_state = generate_csrf_state();
    let redirect_uri = callback_url(&state);
    let authorize_url = authorize_url(&state.config.auth.discord, &redirect_uri, &csrf_state)?;

    let cookie = Cookie::build((STATE_COOKIE, csrf_state))
        .path("/sign-in")
        .http_only(true)
        .secure(state.config.should_use_secure_cookies())
        .same_site(SameSite::Lax)
        .build();

    Ok((jar.add(cookie), Redirect::to(&authorize_url)))
}

/// Query parameters from Discord callback
#[derive(Debug, Deserialize)]
struct DiscordCallbackQuery {
    code: Option<String>,
    state: Option<String>,
    /// Set instead of `code` when the user declines
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DiscordTokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct DiscordUser {
    id: String,
    username: String,
    global_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GuildMember {
    #[serde(default)]
    roles: Vec<String>,
    nick: Option<String>,
}

/// GET /sign-in/callback/discord
///
/// # Steps
/// 1. Verify CSRF state
/// 2. Exchange code for access token
/// 3. Fetch the user and their guild membership
/// 4. Check the member holds an allowed role
/// 5. Create session and set cookie
async fn discord_callback(
    State(state): State<AppState>,
    Query(query): Query<DiscordCallbackQuery>,
    jar: CookieJar,
) -> Result<impl IntoResponse, AppError> {
    if let Some(error) = query.error {
        return Err(AppError::Forbidden(format!("Discord sign-in failed: {}", error)));
    }
    verify_csrf_state(query.state.as_deref(), &jar)?;
    let code = query
        .code
        .ok_or_else(|| AppError::Validation("Missing authorization code".to_string()))?;

    let discord = &state.config.auth.discord;
    let access_token = exchange_code(&state, &code).await?;
    let user: DiscordUser = discord_get(&state, "users/@me", &access_token).await?;

    let member = fetch_guild_member(&state, &access_token).await?.ok_or_else(|| {
        tracing::warn!(discord_id = %user.id, "Sign-in rejected: not a guild member");
        AppError::Forbidden("Not a member of the server".to_string())
    })?;

    if !has_allowed_role(&member.roles, &discord.allowed_role_ids) {
        tracing::warn!(discord_id = %user.id, "Sign-in rejected: missing role");
        return Err(AppError::Forbidden(
            "You do not have the required role".to_string(),
        ));
    }

    let display_name = member
        .nick
        .or(user.global_name)
        .unwrap_or(user.username);
    let session = Session::new(user.id, display_name, state.config.auth.session_max_age);
    let token = create_session_token(&session, &state.config.auth.session_secret)?;
    tracing::info!(discord_id = %session.discord_id, "Signed in");

    let cookie = Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .secure(state.config.should_use_secure_cookies())
        .same_site(SameSite::Lax)
        .build();
    let jar = jar
        .remove(Cookie::build(STATE_COOKIE).path("/sign-in"))
        .add(cookie);

    Ok((jar, Redirect::to("/")))
}

async fn exchange_code(state: &AppState, code: &str) -> Result<String, AppError> {
    let discord = &state.config.auth.discord;
    let redirect_uri = callback_url(state);

    let request = state
        .http_client
        .post(format!("{}/oauth2/token", discord.api_base))
        .form(&[
            ("client_id", discord.client_id.as_str()),
            ("client_secret", discord.client_secret.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri.as_str()),
        ]);
    let response = send_observed(PLATFORM, "oauth2/token", request).await?;

    if !response.status().is_success() {
        return Err(AppError::platform(
            PLATFORM,
            format!("token exchange returned HTTP {}", response.status()),
        ));
    }

    let token: DiscordTokenResponse = response.json().await?;
    Ok(token.access_token)
}

async fn discord_get<T: serde::de::DeserializeOwned>(
    state: &AppState,
    path: &'static str,
    access_token: &str,
) -> Result<T, AppError> {
    let request = state
        .http_client
        .get(format!("{}/{}", state.config.auth.discord.api_base, path))
        .bearer_auth(access_token);
    let response = send_observed(PLATFORM, path, request).await?;

    if !response.status().is_success() {
        return Err(AppError::platform(
            PLATFORM,
            format!("{} returned HTTP {}", path, response.status()),
        ));
    }
    Ok(response.json().await?)
}

/// Membership in the configured guild, `None` when not a member
async fn fetch_guild_member(
    state: &AppState,
    access_token: &str,
) -> Result<Option<GuildMember>, AppError> {
    let discord = &state.config.auth.discord;
    let request = state
        .http_client
        .get(format!(
            "{}/users/@me/guilds/{}/member",
            discord.api_base, discord.guild_id
        ))
        .bearer_auth(access_token);
    let response = send_observed(PLATFORM, "guild-member", request).await?;

    match response.status() {
        StatusCode::NOT_FOUND => Ok(None),
        status if status.is_success() => Ok(Some(response.json().await?)),
        status => Err(AppError::platform(
            PLATFORM,
            format!("guild member lookup returned HTTP {}", status),
        )),
    }
}

// =============================================================================
// Sign-out
// =============================================================================

/// POST /sign-out
///
/// Clears session cookie and redirects to sign-in.
async fn sign_out(jar: CookieJar) -> impl IntoResponse {
    let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/"));
    (jar, Redirect::to("/sign-in"))
}

// =============================================================================
// Helpers
// =============================================================================

fn callback_url(state: &AppState) -> String {
    format!("{}{}", state.config.server.base_url(), CALLBACK_PATH)
}

fn authorize_url(
    discord: &DiscordOAuthConfig,
    redirect_uri: &str,
    csrf_state: &str,
) -> Result<String, AppError> {
    let url = url::Url::parse_with_params(
        &discord.authorize_url,
        &[
            ("client_id", discord.client_id.as_str()),
            ("redirect_uri", redirect_uri),
            ("response_type", "code"),
            ("scope", SCOPES),
            ("state", csrf_state),
        ],
    )
    .map_err(|e| AppError::Config(format!("Invalid Discord authorize URL: {}", e)))?;
    Ok(url.into())
}

/// Generate a random CSRF state token
fn generate_csrf_state() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Verify CSRF state from cookie matches callback state
fn verify_csrf_state(state: Option<&str>, jar: &CookieJar) -> Result<(), AppError> {
    let expected = jar.get(STATE_COOKIE).map(|cookie| cookie.value());
    match (state, expected) {
        (Some(state), Some(expected)) if !state.is_empty() && state == expected => Ok(()),
        _ => Err(AppError::Forbidden("OAuth state mismatch".to_string())),
    }
}

fn has_allowed_role(roles: &[String], allowed: &[String]) -> bool {
    roles.iter().any(|role| allowed.contains(role))
}
