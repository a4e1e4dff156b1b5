//! Error model for the authorization core.
//! Every identity-provider and profile-store failure is expressed as an `AuthError`;
//! the resolver turns each one into a well-defined state transition and only
//! `sign_in`/`sign_up`/`sign_out` hand them back to callers.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    /// Network or upstream failure talking to the identity provider or profile store.
    #[error("network error: {0}")]
    TransientNetwork(String),
    /// Bad credentials (or the provider refused the account).
    #[error("authentication failed: {0}")]
    Authentication(String),
    /// Authenticated, but no authorization row exists for the identity.
    #[error("no profile found for user {user_id}")]
    ProfileMissing { user_id: String },
    /// Session resolution gave up waiting. Internal to the resolver.
    #[error("identity resolution timed out after {0:?}")]
    Timeout(Duration),
    /// Upstream answered with something we could not interpret.
    #[error("malformed response: {0}")]
    Decode(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl AuthError {
    pub fn network<S: Into<String>>(msg: S) -> Self { AuthError::TransientNetwork(msg.into()) }
    pub fn authentication<S: Into<String>>(msg: S) -> Self { AuthError::Authentication(msg.into()) }
    pub fn profile_missing<S: Into<String>>(user_id: S) -> Self { AuthError::ProfileMissing { user_id: user_id.into() } }
    pub fn decode<S: Into<String>>(msg: S) -> Self { AuthError::Decode(msg.into()) }
    pub fn config<S: Into<String>>(msg: S) -> Self { AuthError::Config(msg.into()) }

    /// Stable machine-readable code, also used as the `error` detail in activity logs.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::TransientNetwork(_) => "transient_network",
            AuthError::Authentication(_) => "invalid_credentials",
            AuthError::ProfileMissing { .. } => "profile_missing",
            AuthError::Timeout(_) => "timeout",
            AuthError::Decode(_) => "decode_error",
            AuthError::Config(_) => "config_error",
        }
    }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            AuthError::TransientNetwork(_) => 503,
            AuthError::Authentication(_) => 401,
            AuthError::ProfileMissing { .. } => 403,
            AuthError::Timeout(_) => 504,
            AuthError::Decode(_) => 502,
            AuthError::Config(_) => 500,
        }
    }

    /// Text suitable for an inline sign-in error message.
    pub fn user_message(&self) -> &'static str {
        match self {
            AuthError::Authentication(_) => "Invalid email or password.",
            AuthError::ProfileMissing { .. } => "User profile not found. Please contact support or sign up again.",
            AuthError::TransientNetwork(_) | AuthError::Timeout(_) => "The server could not be reached. Please try again.",
            AuthError::Decode(_) | AuthError::Config(_) => "Something went wrong. Please try again later.",
        }
    }
}

pub type AuthResult<T> = Result<T, AuthError>;

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            AuthError::Decode(err.to_string())
        } else {
            AuthError::TransientNetwork(err.to_string())
        }
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(err: serde_json::Error) -> Self {
        AuthError::Decode(err.to_string())
    }
}
