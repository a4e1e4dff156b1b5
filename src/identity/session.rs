use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

pub type SessionToken = String;

/// Provider-issued proof of authentication. Observed, never mutated, by the resolver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub access_token: SessionToken,
    pub refresh_token: SessionToken,
    pub user_id: String,
    pub email: String,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Refresh a little ahead of the real expiry so in-flight requests don't race it.
    const EXPIRY_MARGIN_SECS: i64 = 10;

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - ChronoDuration::seconds(Self::EXPIRY_MARGIN_SECS) <= now
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Notification pushed by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// The session ended (here or elsewhere).
    SignedOut,
    /// Tokens were rotated; the identity is unchanged.
    TokenRefreshed(Session),
}
