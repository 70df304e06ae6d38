//! Authentication extractors
//!
//! Sessions come from the `Authorization: Bearer` header or the session
//! cookie. JSON and action routes reject with 401; pages send the browser
//! to the sign-in page instead.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{HeaderMap, request::Parts},
    response::Redirect,
};
use axum_extra::extract::CookieJar;

use super::session::{SESSION_COOKIE, Session, verify_session_token};
use crate::AppState;
use crate::error::AppError;

fn extract_token_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(ToOwned::to_owned)
        .or_else(|| {
            let jar = CookieJar::from_headers(headers);
            jar.get(SESSION_COOKIE).map(|cookie| cookie.value().to_owned())
        })
}

/// Resolve the session for a request, caching it in the extensions
fn session_from_parts(parts: &mut Parts, state: &AppState) -> Result<Session, AppError> {
    if let Some(session) = parts.extensions.get::<Session>() {
        return Ok(session.clone());
    }

    let token = extract_token_from_headers(&parts.headers).ok_or(AppError::Unauthorized)?;
    let session = verify_session_token(&token, &state.config.auth.session_secret)?;
    parts.extensions.insert(session.clone());
    Ok(session)
}

/// Extractor for current authenticated user
///
/// # Usage
/// ```ignore
/// async fn handler(CurrentUser(session): CurrentUser) -> impl IntoResponse {
///     format!("Hello, {}", session.display_name)
/// }
/// ```
#[derive(Debug, Clone)]
pub struct CurrentUser(pub Session);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        session_from_parts(parts, &state)
            .map(CurrentUser)
            .map_err(|_| AppError::Unauthorized)
    }
}

/// Authenticated user for HTML pages
///
/// Redirects to `/sign-in` instead of failing with 401.
#[derive(Debug, Clone)]
pub struct PageUser(pub Session);

#[async_trait]
impl<S> FromRequestParts<S> for PageUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Redirect;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        session_from_parts(parts, &state)
            .map(PageUser)
            .map_err(|_| Redirect::to("/sign-in"))
    }
}

/// Optional current user extractor
///
/// Returns None if not authenticated, instead of error.
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<Session>);

#[async_trait]
impl<S> FromRequestParts<S> for MaybeUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        Ok(MaybeUser(session_from_parts(parts, &state).ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_header_wins_over_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", HeaderValue::from_static("Bearer from-header"));
        headers.insert("Cookie", HeaderValue::from_static("session=from-cookie"));

        assert_eq!(
            extract_token_from_headers(&headers).as_deref(),
            Some("from-header")
        );
    }

    #[test]
    fn falls_back_to_session_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "Cookie",
            HeaderValue::from_static("oauth_state=x; session=from-cookie"),
        );

        assert_eq!(
            extract_token_from_headers(&headers).as_deref(),
            Some("from-cookie")
        );
        assert!(extract_token_from_headers(&HeaderMap::new()).is_none());
    }
}
