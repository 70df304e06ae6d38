//! Remote platform clients
//!
//! - Twitter through a session-management proxy
//! - Bluesky through its XRPC API
//! - Image re-encoding for Bluesky blob uploads

pub mod bluesky;
pub mod image;
pub mod twitter;

pub use bluesky::BlueskyClient;
pub use twitter::{SessionStatus, TwitterClient};

use std::time::Instant;

use crate::error::AppError;
use crate::metrics::observe_platform_call;

/// Send a request and record its outcome in the platform metrics
pub(crate) async fn send_observed(
    platform: &'static str,
    operation: &'static str,
    request: reqwest::RequestBuilder,
) -> Result<reqwest::Response, AppError> {
    let started = Instant::now();
    let result = request.send().await;

    let status = match &result {
        Ok(response) if response.status().is_success() => "success",
        Ok(_) => "rejected",
        Err(_) => "error",
    };
    observe_platform_call(platform, operation, status, started.elapsed());

    result.map_err(|e| {
        tracing::warn!(platform, operation, error = %e, "Platform request failed");
        AppError::HttpClient(e)
    })
}
