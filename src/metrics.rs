//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use std::sync::Once;

use lazy_static::lazy_static;
use prometheus::{HistogramOpts, IntCounterVec, IntGauge, Opts, Registry};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("crosspost_http_requests_total", "Total number of HTTP requests"),
        &["method", "endpoint", "status"]
    ).expect("metric can be created");

    // Platform Metrics
    pub static ref PLATFORM_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("crosspost_platform_requests_total", "Total number of outbound platform API calls"),
        &["platform", "operation", "status"]
    ).expect("metric can be created");
    pub static ref PLATFORM_REQUEST_DURATION_SECONDS: prometheus::HistogramVec = prometheus::HistogramVec::new(
        HistogramOpts::new(
            "crosspost_platform_request_duration_seconds",
            "Outbound platform API call duration in seconds"
        ).buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["platform", "operation"]
    ).expect("metric can be created");
    pub static ref POSTS_MIRRORED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("crosspost_posts_mirrored_total", "Total number of remote posts upserted locally"),
        &["platform"]
    ).expect("metric can be created");
    pub static ref DISPATCH_OUTCOMES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("crosspost_dispatch_outcomes_total", "Per-platform outcomes of compose/delete requests"),
        &["action", "platform", "outcome"]
    ).expect("metric can be created");

    // Feed Metrics
    pub static ref FEED_ITEMS: IntGauge = IntGauge::new(
        "crosspost_feed_items",
        "Number of logical posts in the most recently built feed"
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("crosspost_errors_total", "Total number of errors"),
        &["error_type"]
    ).expect("metric can be created");
}

static INIT: Once = Once::new();

/// Initialize metrics registry.
///
/// Safe to call more than once; registration happens on the first call.
pub fn init_metrics() {
    INIT.call_once(|| {
        REGISTRY
            .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
            .expect("HTTP_REQUESTS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(PLATFORM_REQUESTS_TOTAL.clone()))
            .expect("PLATFORM_REQUESTS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(PLATFORM_REQUEST_DURATION_SECONDS.clone()))
            .expect("PLATFORM_REQUEST_DURATION_SECONDS can be registered");
        REGISTRY
            .register(Box::new(POSTS_MIRRORED_TOTAL.clone()))
            .expect("POSTS_MIRRORED_TOTAL can be registered");
        REGISTRY
            .register(Box::new(DISPATCH_OUTCOMES_TOTAL.clone()))
            .expect("DISPATCH_OUTCOMES_TOTAL can be registered");
        REGISTRY
            .register(Box::new(FEED_ITEMS.clone()))
            .expect("FEED_ITEMS can be registered");
        REGISTRY
            .register(Box::new(ERRORS_TOTAL.clone()))
            .expect("ERRORS_TOTAL can be registered");

        tracing::info!("Metrics registry initialized");
    });
}

/// Record one outbound platform call.
pub fn observe_platform_call(
    platform: &str,
    operation: &str,
    status: &str,
    elapsed: std::time::Duration,
) {
    PLATFORM_REQUESTS_TOTAL
        .with_label_values(&[platform, operation, status])
        .inc();
    PLATFORM_REQUEST_DURATION_SECONDS
        .with_label_values(&[platform, operation])
        .observe(elapsed.as_secs_f64());
}
