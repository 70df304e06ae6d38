//! Common test utilities for E2E tests

pub mod fakes;

use crosspost::{AppState, config};
use tempfile::TempDir;
use tokio::net::TcpListener;

pub const TEST_SESSION_SECRET: &str = "test-secret-key-that-is-32-bytes-long";
pub const TEST_MANAGE_AUTH: &str = "Bearer test-manage-auth";
pub const TEST_GUILD_ID: &str = "guild-1";
pub const TEST_ROLE_ID: &str = "role-poster";

/// Remote services the test server talks to
#[derive(Debug, Clone, Default)]
pub struct TestOptions {
    /// Origin of a fake Twitter session proxy; Twitter is disabled if `None`
    pub twitter_origin: Option<String>,
    /// Origin of a fake Bluesky PDS; Bluesky is disabled if `None`
    pub bluesky_origin: Option<String>,
    /// Base URL of a fake Discord API
    pub discord_api: Option<String>,
}

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub _temp_dir: TempDir,
    pub client: reqwest::Client,
}

impl TestServer {
    /// Create a new test server with both platforms disabled
    pub async fn new() -> Self {
        Self::start(TestOptions::default()).await
    }

    /// Create a new test server wired to the given fake services
    pub async fn start(options: TestOptions) -> Self {
        crosspost::metrics::init_metrics();

        // Create temporary directory for test database
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(temp_dir.path().join("test.db"), &options);

        // Initialize app state
        let state = AppState::new(config).await.unwrap();

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = crosspost::build_router(state.clone());

        // Spawn server in background
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Wait a bit for server to start
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        Self {
            addr: format!("http://{}", addr),
            state,
            _temp_dir: temp_dir,
            client: no_redirect_client(),
        }
    }

    /// Get base URL for requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// Create a valid session token for the test user
    pub fn create_test_token(&self) -> String {
        let session = crosspost::auth::Session::new(
            "42".to_string(),
            "Test User".to_string(),
            3600,
        );
        crosspost::auth::create_session_token(&session, &self.state.config.auth.session_secret)
            .unwrap()
    }

    /// `Authorization` header value for the test user
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.create_test_token())
    }
}

fn test_config(db_path: std::path::PathBuf, options: &TestOptions) -> config::AppConfig {
    config::AppConfig {
        server: config::ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            domain: "localhost:3000".to_string(),
            protocol: "http".to_string(),
            max_upload_bytes: 8 * 1024 * 1024,
        },
        database: config::DatabaseConfig { path: db_path },
        auth: config::AuthConfig {
            session_secret: TEST_SESSION_SECRET.to_string(),
            session_max_age: 1_209_600,
            discord: config::DiscordOAuthConfig {
                client_id: "test-client-id".to_string(),
                client_secret: "test-client-secret".to_string(),
                guild_id: TEST_GUILD_ID.to_string(),
                allowed_role_ids: vec![TEST_ROLE_ID.to_string()],
                authorize_url: "https://discord.com/oauth2/authorize".to_string(),
                api_base: options
                    .discord_api
                    .clone()
                    .unwrap_or_else(|| "http://127.0.0.1:9".to_string()),
            },
        },
        twitter: options
            .twitter_origin
            .clone()
            .map(|manage_origin| config::TwitterConfig {
                manage_origin,
                manage_auth: TEST_MANAGE_AUTH.to_string(),
                username: "test_twitter".to_string(),
                password: "twitter-password".to_string(),
                email: "test@example.com".to_string(),
            }),
        bluesky: options
            .bluesky_origin
            .clone()
            .map(|service| config::BlueskyConfig {
                service,
                username: "test.bsky.social".to_string(),
                password: "app-password".to_string(),
            }),
        feed: config::FeedConfig {
            limit: 100,
            match_window_seconds: 60,
        },
        logging: config::LoggingConfig {
            level: "info".to_string(),
            format: "pretty".to_string(),
        },
    }
}

/// Client that surfaces redirects instead of following them
pub fn no_redirect_client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(std::time::Duration::from_secs(10))
        .build()
        .expect("failed to build no-redirect client")
}

/// Serve `router` on an ephemeral port and return its origin
pub async fn spawn_app(router: axum::Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    format!("http://{}", addr)
}

/// A small PNG for upload tests
pub fn sample_png() -> Vec<u8> {
    let img = image::RgbImage::from_fn(16, 16, |x, y| image::Rgb([(x * 16) as u8, (y * 16) as u8, 128]));
    let mut buf = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, image::ImageOutputFormat::Png)
        .unwrap();
    buf.into_inner()
}
