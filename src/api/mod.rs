//! API layer
//!
//! HTTP handlers for:
//! - Feed page and compose action
//! - Post delete / refresh actions
//! - Twitter confirmation code
//! - JSON feed
//! - Metrics (Prometheus)

mod confirmation;
mod feed;
mod html;
pub mod metrics;
mod pages;
mod posts;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::service::DispatchReport;

pub use confirmation::confirmation_router;
pub use feed::{FeedResponse, feed_router};
pub use metrics::{metrics_router, track_http_requests};
pub use pages::pages_router;
pub use posts::posts_router;

/// Report as JSON; 502 when any platform failed
fn dispatch_response(report: DispatchReport) -> Response {
    let status = if report.has_failures() {
        StatusCode::BAD_GATEWAY
    } else {
        StatusCode::OK
    };
    (status, Json(report)).into_response()
}
