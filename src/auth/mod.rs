//! Discord OAuth authentication
//!
//! Handles:
//! - Discord OAuth flow with guild role gating
//! - Session management
//! - Authentication extractors

mod middleware;
mod oauth;
pub mod session;

pub use middleware::{CurrentUser, MaybeUser, PageUser};
pub use oauth::auth_router;
pub use session::{SESSION_COOKIE, Session, create_session_token, verify_session_token};
