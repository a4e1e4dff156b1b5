//! In-memory identity provider and profile store.
//! Used by the test-suite and the CLI's offline mode. Latency and failures can be
//! scripted per call so resolver timing and fail-closed paths are reproducible.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::error::{AuthError, AuthResult};
use crate::identity::{AuthEvent, IdentityProvider, LoginRequest, Profile, ProfileStore, Role, Session, SignUpRequest};
use crate::tprintln;

fn gen_token() -> String {
    // 256-bit random token base64url without padding
    let mut buf = [0u8; 32];
    let _ = getrandom::getrandom(&mut buf);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf)
}

#[derive(Debug, Clone)]
struct Account {
    user_id: String,
    password: String,
    full_name: Option<String>,
}

#[derive(Debug, Default)]
struct ProviderFaults {
    session_delay: Option<Duration>,
    session_error: Option<AuthError>,
    sign_out_error: Option<AuthError>,
}

pub struct MemoryIdentityProvider {
    accounts: RwLock<HashMap<String, Account>>,
    current: RwLock<Option<Session>>,
    faults: RwLock<ProviderFaults>,
    events: broadcast::Sender<AuthEvent>,
    ttl: Duration,
    sign_outs: AtomicUsize,
}

impl Default for MemoryIdentityProvider {
    fn default() -> Self { Self::new() }
}

impl MemoryIdentityProvider {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            accounts: RwLock::new(HashMap::new()),
            current: RwLock::new(None),
            faults: RwLock::new(ProviderFaults::default()),
            events,
            ttl: Duration::from_secs(60 * 60),
            sign_outs: AtomicUsize::new(0),
        }
    }

    /// Register an account directly, returning its user id.
    pub fn add_account(&self, email: &str, password: &str) -> String {
        let user_id = uuid::Uuid::new_v4().to_string();
        self.accounts.write().insert(
            email.to_ascii_lowercase(),
            Account { user_id: user_id.clone(), password: password.to_string(), full_name: None },
        );
        user_id
    }

    pub fn full_name_of(&self, email: &str) -> Option<String> {
        self.accounts.read().get(&email.to_ascii_lowercase()).and_then(|a| a.full_name.clone())
    }

    /// Install a live session for `email` as if restored from storage.
    pub fn restore_session(&self, email: &str) -> AuthResult<Session> {
        let account = self
            .accounts
            .read()
            .get(&email.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| AuthError::authentication(format!("unknown account {}", email)))?;
        let session = self.issue(&account.user_id, email);
        *self.current.write() = Some(session.clone());
        Ok(session)
    }

    pub fn set_session_delay(&self, delay: Option<Duration>) { self.faults.write().session_delay = delay; }

    pub fn fail_session_fetch(&self, err: Option<AuthError>) { self.faults.write().session_error = err; }

    pub fn fail_sign_out(&self, err: Option<AuthError>) { self.faults.write().sign_out_error = err; }

    pub fn session(&self) -> Option<Session> { self.current.read().clone() }

    /// Number of successful remote sign-outs.
    pub fn sign_out_count(&self) -> usize { self.sign_outs.load(Ordering::SeqCst) }

    /// Push an event to subscribers, as the hosted service would.
    pub fn emit(&self, event: AuthEvent) {
        if matches!(event, AuthEvent::SignedOut) {
            *self.current.write() = None;
        }
        let _ = self.events.send(event);
    }

    /// Rotate the current session's tokens and announce it.
    pub fn refresh_tokens(&self) -> Option<Session> {
        let refreshed = {
            let mut current = self.current.write();
            let old = (*current).as_ref()?;
            let next = self.issue(&old.user_id, &old.email);
            *current = Some(next.clone());
            next
        };
        let _ = self.events.send(AuthEvent::TokenRefreshed(refreshed.clone()));
        Some(refreshed)
    }

    fn issue(&self, user_id: &str, email: &str) -> Session {
        let session = Session {
            access_token: gen_token(),
            refresh_token: gen_token(),
            user_id: user_id.to_string(),
            email: email.to_string(),
            expires_at: Utc::now() + ChronoDuration::seconds(self.ttl.as_secs() as i64),
        };
        tprintln!("memory.session.issue user={} ttl_secs={}", user_id, self.ttl.as_secs());
        session
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    async fn current_session(&self) -> AuthResult<Option<Session>> {
        let (delay, error) = {
            let f = self.faults.read();
            (f.session_delay, f.session_error.clone())
        };
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        if let Some(e) = error {
            return Err(e);
        }
        Ok(self.current.read().clone())
    }

    async fn sign_in(&self, req: &LoginRequest) -> AuthResult<Session> {
        let account = self.accounts.read().get(&req.email.to_ascii_lowercase()).cloned();
        match account {
            Some(a) if a.password == req.password => {
                let session = self.issue(&a.user_id, &req.email);
                *self.current.write() = Some(session.clone());
                Ok(session)
            }
            _ => Err(AuthError::authentication("Invalid login credentials")),
        }
    }

    async fn sign_up(&self, req: &SignUpRequest) -> AuthResult<()> {
        let key = req.email.to_ascii_lowercase();
        let mut accounts = self.accounts.write();
        if accounts.contains_key(&key) {
            return Err(AuthError::authentication("User already registered"));
        }
        accounts.insert(
            key,
            Account {
                user_id: uuid::Uuid::new_v4().to_string(),
                password: req.password.clone(),
                full_name: Some(req.full_name.clone()),
            },
        );
        Ok(())
    }

    async fn sign_out(&self) -> AuthResult<()> {
        if let Some(e) = self.faults.read().sign_out_error.clone() {
            return Err(e);
        }
        let had_session = self.current.write().take().is_some();
        if had_session {
            self.sign_outs.fetch_add(1, Ordering::SeqCst);
            let _ = self.events.send(AuthEvent::SignedOut);
        }
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

#[derive(Default)]
pub struct MemoryProfileStore {
    rows: RwLock<HashMap<String, Profile>>,
    delay: RwLock<Option<Duration>>,
    error: RwLock<Option<AuthError>>,
    fetches: AtomicUsize,
}

impl MemoryProfileStore {
    pub fn new() -> Self { Self::default() }

    pub fn insert(&self, profile: Profile) {
        self.rows.write().insert(profile.id.clone(), profile);
    }

    /// Insert a row for `user_id`, as the sign-up trigger would.
    pub fn insert_for(&self, user_id: &str, email: &str, role: Role) -> Profile {
        let profile = Profile::new(user_id, email, role);
        self.insert(profile.clone());
        profile
    }

    pub fn delete(&self, id: &str) -> Option<Profile> {
        self.rows.write().remove(id)
    }

    pub fn set_delay(&self, delay: Option<Duration>) { *self.delay.write() = delay; }

    pub fn fail_with(&self, err: Option<AuthError>) { *self.error.write() = err; }

    pub fn fetch_count(&self) -> usize { self.fetches.load(Ordering::SeqCst) }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn profile_by_id(&self, id: &str) -> AuthResult<Option<Profile>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.read();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        if let Some(e) = self.error.read().clone() {
            return Err(e);
        }
        Ok(self.rows.read().get(id).cloned())
    }
}
