//! Crosspost - A single-user dashboard that cross-posts to Twitter and Bluesky
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      API Layer (Axum)                        │
//! │  - Feed page, compose / delete / refresh actions            │
//! │  - Discord sign-in                                          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Service Layer                            │
//! │  - Feed reconciliation                                      │
//! │  - Cross-platform dispatch                                  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌──────────────────────────────┬──────────────────────────────┐
//! │         Data Layer           │        Platform Layer        │
//! │  - SQLite mirror (sqlx)      │  - Twitter session proxy     │
//! │                              │  - Bluesky XRPC              │
//! └──────────────────────────────┴──────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: HTTP handlers
//! - `auth`: Discord OAuth and signed session cookies
//! - `service`: Feed reconciliation and dispatch
//! - `platform`: Twitter and Bluesky clients
//! - `data`: Local mirror tables
//! - `config`: Configuration management
//! - `error`: Error types
//! - `metrics`: Prometheus instruments

pub mod api;
pub mod auth;
pub mod config;
pub mod data;
pub mod error;
pub mod metrics;
pub mod platform;
pub mod service;

use std::sync::Arc;

/// Application state shared across all handlers
///
/// Cloned for each request. A platform client is `None` when its config
/// section is absent.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Database connection pool
    pub db: Arc<data::Database>,

    /// Shared HTTP client for every outbound call
    pub http_client: Arc<reqwest::Client>,

    pub twitter: Option<Arc<platform::TwitterClient>>,
    pub bluesky: Option<Arc<platform::BlueskyClient>>,

    /// Unified feed builder
    pub timeline: Arc<service::TimelineService>,

    /// Compose / delete fan-out
    pub dispatcher: Arc<service::Dispatcher>,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Connect to SQLite database
    /// 2. Build the HTTP client
    /// 3. Create the enabled platform clients
    /// 4. Wire the services
    ///
    /// # Errors
    /// Returns error if any initialization step fails
    pub async fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        // 1. Connect to SQLite database
        let db = Arc::new(data::Database::connect(&config.database.path).await?);
        tracing::info!("Database connected");

        // 2. Initialize HTTP client
        let http_client = Arc::new(
            reqwest::Client::builder()
                .user_agent(concat!("Crosspost/", env!("CARGO_PKG_VERSION")))
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .map_err(|e| error::AppError::Internal(e.into()))?,
        );

        // 3. Platform clients
        let twitter = config.twitter.as_ref().map(|twitter| {
            Arc::new(platform::TwitterClient::new(
                twitter,
                http_client.clone(),
                db.clone(),
            ))
        });
        let bluesky = config.bluesky.as_ref().map(|bluesky| {
            Arc::new(platform::BlueskyClient::new(
                bluesky,
                http_client.clone(),
                db.clone(),
                config.feed.limit,
            ))
        });
        tracing::info!(
            twitter = twitter.is_some(),
            bluesky = bluesky.is_some(),
            "Platforms configured"
        );

        // 4. Services
        let timeline = service::TimelineService::new(
            db.clone(),
            config.feed.limit,
            service::MatchPolicy::new(chrono::Duration::seconds(
                config.feed.match_window_seconds,
            )),
        );
        let dispatcher = service::Dispatcher::new(db.clone(), twitter.clone(), bluesky.clone());

        tracing::info!("Application state initialized successfully");

        Ok(Self {
            config: Arc::new(config),
            db,
            http_client,
            twitter,
            bluesky,
            timeline: Arc::new(timeline),
            dispatcher: Arc::new(dispatcher),
        })
    }
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::Router;
    use tower_http::{compression::CompressionLayer, trace::TraceLayer};

    Router::new()
        .route("/health", axum::routing::get(health_check))
        .merge(auth::auth_router())
        .merge(api::pages_router(state.config.server.max_upload_bytes))
        .merge(api::posts_router())
        .merge(api::confirmation_router())
        .merge(api::feed_router())
        .merge(api::metrics_router())
        .layer(axum::middleware::from_fn(api::track_http_requests))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}
