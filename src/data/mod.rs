//! Data layer module
//!
//! Local SQLite mirror of the remote platforms:
//! - Tweets fetched through the Twitter session proxy
//! - Bluesky posts fetched from the author feed
//! - Twitter proxy session ids

mod database;
mod models;

pub use database::Database;
pub use models::*;
