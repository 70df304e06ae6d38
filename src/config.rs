//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::{net::IpAddr, path::PathBuf};

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    /// Twitter session proxy; the platform is disabled when absent
    #[serde(default)]
    pub twitter: Option<TwitterConfig>,
    /// Bluesky account; the platform is disabled when absent
    #[serde(default)]
    pub bluesky: Option<BlueskyConfig>,
    pub feed: FeedConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 8080)
    pub port: u16,
    /// Public domain (e.g., "post.example.com")
    pub domain: String,
    /// Protocol ("http" or "https")
    pub protocol: String,
    /// Maximum request body for the compose form
    pub max_upload_bytes: usize,
}

impl ServerConfig {
    /// Get the public base URL
    ///
    /// # Returns
    /// Full URL like "https://post.example.com"
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.domain)
    }
}

/// Database configuration (SQLite only)
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    pub path: PathBuf,
}

/// Authentication configuration (Discord OAuth)
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Session secret key (32+ bytes)
    pub session_secret: String,
    /// Session max age in seconds (default: 1209600 = 14 days)
    pub session_max_age: i64,
    pub discord: DiscordOAuthConfig,
}

/// Discord OAuth configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DiscordOAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Guild whose membership gates sign-in
    pub guild_id: String,
    /// A member needs at least one of these roles
    pub allowed_role_ids: Vec<String>,
    /// Authorization page (default: https://discord.com/oauth2/authorize)
    pub authorize_url: String,
    /// REST API base (default: https://discord.com/api)
    pub api_base: String,
}

/// Twitter session-proxy configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TwitterConfig {
    /// Origin of the session management API
    pub manage_origin: String,
    /// Value sent verbatim in the Authorization header
    pub manage_auth: String,
    pub username: String,
    pub password: String,
    pub email: String,
}

/// Bluesky account configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BlueskyConfig {
    /// PDS / entryway URL
    #[serde(default = "default_bluesky_service")]
    pub service: String,
    /// Handle or DID
    pub username: String,
    /// App password
    pub password: String,
}

fn default_bluesky_service() -> String {
    "https://bsky.social".to_string()
}

/// Upper bound for `feed.limit`
pub const MAX_FEED_LIMIT: usize = 100;

/// Upper bound for `feed.match_window_seconds` (one day)
pub const MAX_MATCH_WINDOW_SECONDS: i64 = 86_400;

/// Feed reconciliation settings
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Posts read per platform (default: 100)
    pub limit: usize,
    /// Cross-platform match tolerance in seconds (default: 60)
    pub match_window_seconds: i64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (CROSSPOST__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 3000)?
            .set_default("server.domain", "localhost:3000")?
            .set_default("server.protocol", "http")?
            .set_default("server.max_upload_bytes", 32 * 1024 * 1024)?
            .set_default("database.path", "data/crosspost.db")?
            .set_default("auth.session_max_age", 1_209_600)?
            .set_default("auth.discord.allowed_role_ids", Vec::<String>::new())?
            .set_default(
                "auth.discord.authorize_url",
                "https://discord.com/oauth2/authorize",
            )?
            .set_default("auth.discord.api_base", "https://discord.com/api")?
            .set_default("feed.limit", 100)?
            .set_default("feed.match_window_seconds", 60)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("CROSSPOST")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("auth.discord.allowed_role_ids")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    pub fn should_use_secure_cookies(&self) -> bool {
        self.server.protocol.eq_ignore_ascii_case("https")
            || !is_local_server_domain(&self.server.domain)
    }

    fn validate(&self) -> Result<(), crate::error::AppError> {
        const MIN_SESSION_SECRET_BYTES: usize = 32;

        if self.auth.session_secret.len() < MIN_SESSION_SECRET_BYTES {
            return Err(crate::error::AppError::Config(format!(
                "auth.session_secret must be at least {} bytes",
                MIN_SESSION_SECRET_BYTES
            )));
        }

        if self.auth.session_max_age <= 0 {
            return Err(crate::error::AppError::Config(
                "auth.session_max_age must be greater than 0".to_string(),
            ));
        }

        if self.auth.discord.allowed_role_ids.is_empty() {
            tracing::warn!("auth.discord.allowed_role_ids is empty; nobody will be able to sign in");
        }

        if self.feed.limit == 0 || self.feed.limit > MAX_FEED_LIMIT {
            return Err(crate::error::AppError::Config(format!(
                "feed.limit must be between 1 and {}",
                MAX_FEED_LIMIT
            )));
        }

        if self.feed.match_window_seconds <= 0
            || self.feed.match_window_seconds > MAX_MATCH_WINDOW_SECONDS
        {
            return Err(crate::error::AppError::Config(format!(
                "feed.match_window_seconds must be between 1 and {}",
                MAX_MATCH_WINDOW_SECONDS
            )));
        }

        if !self.should_use_secure_cookies() {
            let host = normalized_server_host(&self.server.domain);
            tracing::warn!(
                host = %host,
                protocol = %self.server.protocol,
                "Using insecure session cookies for local development"
            );
        } else if !self.server.protocol.eq_ignore_ascii_case("https") {
            return Err(crate::error::AppError::Config(
                "server.protocol must be https for non-local server domains".to_string(),
            ));
        }

        Ok(())
    }
}

fn normalized_server_host(domain: &str) -> String {
    let trimmed = domain.trim();
    let parsed_host = url::Url::parse(&format!("http://{trimmed}"))
        .ok()
        .and_then(|url| url.host_str().map(|host| host.to_string()));
    let host = parsed_host.unwrap_or_else(|| trimmed.to_string());
    host.trim_end_matches('.').to_ascii_lowercase()
}

fn is_local_server_domain(domain: &str) -> bool {
    let host = normalized_server_host(domain);
    if host == "localhost" || host.ends_with(".localhost") {
        return true;
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        return ip.is_loopback() || ip.is_unspecified();
    }

    false
}
