//! Authentication Module
//!
//! Credentials and the mutable session state held by the API client.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Seconds shaved off the server-provided token lifetime
pub const EXPIRY_MARGIN_SECS: i64 = 60;

/// Token lifetime assumed when the grant response omits `expires_in`
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 43_200;

/// Password + one-time-passcode grant credentials
#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    #[serde(default = "default_otp_factor")]
    pub otp_factor: String,
    #[serde(default = "default_otp_mode")]
    pub otp_mode: String,
}

fn default_otp_factor() -> String {
    "email".into()
}

fn default_otp_mode() -> String {
    "request".into()
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            otp_factor: default_otp_factor(),
            otp_mode: default_otp_mode(),
        }
    }
}

// Keep the password out of logs and panic messages.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("otp_factor", &self.otp_factor)
            .field("otp_mode", &self.otp_mode)
            .finish()
    }
}

/// Remote user identifier.
///
/// The service returns it as an opaque JSON scalar and expects it echoed back
/// verbatim, so the raw value is kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(serde_json::Value);

impl UserId {
    /// Wrap a raw value, rejecting JSON null
    pub fn from_value(value: serde_json::Value) -> Option<Self> {
        if value.is_null() {
            None
        } else {
            Some(Self(value))
        }
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            serde_json::Value::String(s) => f.write_str(s),
            other => write!(f, "{}", other),
        }
    }
}

/// Authenticated state against the remote API
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub access_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub user_id: Option<UserId>,
}

impl Session {
    /// A token is usable while present and strictly before its expiry
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        match (&self.access_token, self.expires_at) {
            (Some(_), Some(expires_at)) => now < expires_at,
            _ => false,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    /// Install a freshly granted token.
    ///
    /// The identity is kept: it belongs to the account, not to the token.
    pub fn grant(&mut self, access_token: String, ttl_secs: i64, now: DateTime<Utc>) {
        self.access_token = Some(access_token);
        self.expires_at = Some(expiry_for(ttl_secs, now));
    }
}

/// Expiry instant for a server-provided lifetime, minus the safety margin
pub fn expiry_for(ttl_secs: i64, now: DateTime<Utc>) -> DateTime<Utc> {
    now + Duration::seconds(ttl_secs - EXPIRY_MARGIN_SECS)
}
