//! Session management
//!
//! Uses HMAC-signed tokens stored in cookies.
//! No server-side session storage needed.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::AppError;

type HmacSha256 = Hmac<Sha256>;

/// Name of the cookie carrying the session token
pub const SESSION_COOKIE: &str = "session";

/// Signed-in user
///
/// Stored in a signed cookie. Holds the Discord identity that passed the
/// guild role check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Discord user snowflake
    pub discord_id: String,
    /// Guild nickname, global name, or username
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Start a session lasting `max_age_seconds`
    pub fn new(discord_id: String, display_name: String, max_age_seconds: i64) -> Self {
        let now = Utc::now();
        Self {
            discord_id,
            display_name,
            created_at: now,
            expires_at: now + Duration::seconds(max_age_seconds),
        }
    }

    /// Check if session is expired
    pub fn is_expired(&self) -> bool {
        self.expires_at < Utc::now()
    }
}

fn mac_for(payload_b64: &str, secret: &str) -> Result<HmacSha256, AppError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Encryption(e.to_string()))?;
    mac.update(payload_b64.as_bytes());
    Ok(mac)
}

/// Create a signed session token
///
/// Token format: base64(payload).base64(hmac_sha256(payload))
pub fn create_session_token(session: &Session, secret: &str) -> Result<String, AppError> {
    let payload = serde_json::to_string(session).map_err(|e| AppError::Internal(e.into()))?;
    let payload_b64 = URL_SAFE_NO_PAD.encode(payload.as_bytes());

    let signature = mac_for(&payload_b64, secret)?.finalize().into_bytes();
    Ok(format!("{}.{}", payload_b64, URL_SAFE_NO_PAD.encode(signature)))
}

/// Verify and decode a session token
///
/// # Errors
/// `InvalidSignature` if the signature does not match, `Unauthorized` if
/// the token is malformed or expired.
pub fn verify_session_token(token: &str, secret: &str) -> Result<Session, AppError> {
    let (payload_b64, signature_b64) = token.split_once('.').ok_or(AppError::Unauthorized)?;
    if signature_b64.contains('.') {
        return Err(AppError::Unauthorized);
    }

    let signature = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| AppError::Unauthorized)?;
    mac_for(payload_b64, secret)?
        .verify_slice(&signature)
        .map_err(|_| AppError::InvalidSignature)?;

    let payload = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| AppError::Unauthorized)?;
    let session: Session = serde_json::from_slice(&payload).map_err(|_| AppError::Unauthorized)?;

    if session.is_expired() {
        return Err(AppError::Unauthorized);
    }

    Ok(session)
}
