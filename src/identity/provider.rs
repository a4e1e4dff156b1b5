use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::AuthResult;

use super::profile::Profile;
use super::session::{AuthEvent, Session};

#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

impl LoginRequest {
    pub fn new<S: Into<String>>(email: S, password: S) -> Self {
        Self { email: email.into(), password: password.into() }
    }
}

#[derive(Debug, Clone)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    /// Stored as user metadata; the profile trigger copies it into `profiles.full_name`.
    pub full_name: String,
}

/// Hosted identity service (sessions, credentials, auth events).
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// The current session, if any. Implementations may refresh an expired session here.
    async fn current_session(&self) -> AuthResult<Option<Session>>;

    /// Fails with `AuthError::Authentication` on bad credentials.
    async fn sign_in(&self, req: &LoginRequest) -> AuthResult<Session>;

    /// Registers an account. Does not sign in.
    async fn sign_up(&self, req: &SignUpRequest) -> AuthResult<()>;

    /// Invalidates the current session. Succeeds when there is none.
    async fn sign_out(&self) -> AuthResult<()>;

    /// Push subscription for provider-side auth events.
    fn events(&self) -> broadcast::Receiver<AuthEvent>;
}

/// Read access to the `profiles` table.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// `Ok(None)` when no row matches `id`.
    async fn profile_by_id(&self, id: &str) -> AuthResult<Option<Profile>>;
}
