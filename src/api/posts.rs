//! Post actions
//!
//! - POST /delete-post - Delete a logical post on every platform
//! - POST /refresh - Re-fetch both platforms into the local mirror

use axum::{
    Form, Router,
    extract::State,
    response::Response,
    routing::post,
};
use serde::Deserialize;

use super::dispatch_response;
use crate::AppState;
use crate::auth::CurrentUser;

/// Create post action router
pub fn posts_router() -> Router<AppState> {
    Router::new()
        .route("/delete-post", post(delete_post))
        .route("/refresh", post(refresh))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeletePostForm {
    #[serde(default)]
    twitter_id: Option<String>,
    #[serde(default)]
    bluesky_id: Option<String>,
}

/// POST /delete-post
async fn delete_post(
    State(state): State<AppState>,
    CurrentUser(_session): CurrentUser,
    Form(form): Form<DeletePostForm>,
) -> Response {
    let twitter_id = form.twitter_id.filter(|id| !id.is_empty());
    let bluesky_id = form.bluesky_id.filter(|id| !id.is_empty());

    let report = state
        .dispatcher
        .delete(twitter_id.as_deref(), bluesky_id.as_deref())
        .await;
    dispatch_response(report)
}

/// POST /refresh
async fn refresh(State(state): State<AppState>, CurrentUser(_session): CurrentUser) -> Response {
    dispatch_response(state.dispatcher.refresh().await)
}
