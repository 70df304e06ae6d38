//! JSON feed endpoint

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use crate::AppState;
use crate::auth::CurrentUser;
use crate::error::AppError;
use crate::service::LogicalPostView;

/// Create feed API router
pub fn feed_router() -> Router<AppState> {
    Router::new().route("/api/feed", get(get_feed))
}

/// Reconciled feed plus the accounts it was built from
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedResponse {
    pub posts: Vec<LogicalPostView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub twitter_username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bluesky_username: Option<String>,
}

/// GET /api/feed
async fn get_feed(
    State(state): State<AppState>,
    CurrentUser(_session): CurrentUser,
) -> Result<Json<FeedResponse>, AppError> {
    let posts = state.timeline.feed().await?;

    Ok(Json(FeedResponse {
        posts: posts.iter().map(LogicalPostView::from).collect(),
        twitter_username: state.twitter.as_ref().map(|t| t.username().to_string()),
        bluesky_username: state.bluesky.as_ref().map(|b| b.username().to_string()),
    }))
}
