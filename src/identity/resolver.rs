//! Session resolver: the single writer of the process-wide `ResolvedIdentity`.
//!
//! State is published on a `tokio::sync::watch` channel; guards and screens only read it.
//! Every publish bumps a generation counter. Async work captures the generation it
//! started under and its result is dropped if anything else published in the
//! meantime. Every publish that is not the opening `resolving=true` of a check cycle
//! is terminal, so a dropped result can never leave `resolving` stuck.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

use crate::audit::{record_quietly, ActivitySink, LogEntry, TracingSink};
use crate::error::{AuthError, AuthResult};

use super::profile::Profile;
use super::provider::{IdentityProvider, LoginRequest, ProfileStore, SignUpRequest};
use super::role::Role;
use super::session::AuthEvent;

pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub profile: Option<Profile>,
    pub resolving: bool,
}

impl ResolvedIdentity {
    /// Initial state before the first session check completes.
    pub fn unresolved() -> Self { Self { profile: None, resolving: true } }

    pub fn anonymous() -> Self { Self { profile: None, resolving: false } }

    pub fn signed_in(profile: Profile) -> Self { Self { profile: Some(profile), resolving: false } }

    pub fn role(&self) -> Option<Role> { self.profile.as_ref().map(|p| p.role) }

    pub fn is_authenticated(&self) -> bool { !self.resolving && self.profile.is_some() }
}

impl Default for ResolvedIdentity {
    fn default() -> Self { Self::unresolved() }
}

pub struct SessionResolverBuilder {
    provider: Arc<dyn IdentityProvider>,
    profiles: Arc<dyn ProfileStore>,
    audit: Arc<dyn ActivitySink>,
    timeout: Duration,
}

impl SessionResolverBuilder {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn audit(mut self, sink: Arc<dyn ActivitySink>) -> Self {
        self.audit = sink;
        self
    }

    pub fn build(self) -> SessionResolver {
        let (state, _) = watch::channel(ResolvedIdentity::unresolved());
        SessionResolver {
            inner: Arc::new(Inner {
                provider: self.provider,
                profiles: self.profiles,
                audit: self.audit,
                timeout: self.timeout,
                state,
                generation: Mutex::new(0),
                started: AtomicBool::new(false),
                ops: AsyncMutex::new(()),
            }),
        }
    }
}

/// Cheap to clone; all clones share one identity.
#[derive(Clone)]
pub struct SessionResolver {
    inner: Arc<Inner>,
}

struct Inner {
    provider: Arc<dyn IdentityProvider>,
    profiles: Arc<dyn ProfileStore>,
    audit: Arc<dyn ActivitySink>,
    timeout: Duration,
    state: watch::Sender<ResolvedIdentity>,
    generation: Mutex<u64>,
    started: AtomicBool,
    /// Serializes sign-in, sign-out and forced sign-out.
    ops: AsyncMutex<()>,
}

impl SessionResolver {
    pub fn builder(provider: Arc<dyn IdentityProvider>, profiles: Arc<dyn ProfileStore>) -> SessionResolverBuilder {
        SessionResolverBuilder {
            provider,
            profiles,
            audit: Arc::new(TracingSink),
            timeout: DEFAULT_RESOLVE_TIMEOUT,
        }
    }

    pub fn new(provider: Arc<dyn IdentityProvider>, profiles: Arc<dyn ProfileStore>) -> Self {
        Self::builder(provider, profiles).build()
    }

    /// Begin resolving the current session and listening for provider events.
    ///
    /// Idempotent. Must be called from within a Tokio runtime; the work runs on
    /// spawned tasks and this returns immediately.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            debug!(target: "auth", "resolver already started");
            return;
        }
        info!(target: "auth", timeout_ms = self.inner.timeout.as_millis() as u64, "session resolver starting");
        Inner::spawn_event_listener(&self.inner);
        let current = self.current();
        if !current.resolving && current.profile.is_some() {
            debug!(target: "auth", "identity already resolved; skipping initial session check");
            return;
        }
        Inner::begin_cycle(&self.inner);
    }

    /// Run a fresh session check even if one already completed.
    pub fn recheck(&self) {
        Inner::begin_cycle(&self.inner);
    }

    /// Authenticate and resolve the profile inline.
    ///
    /// Bad credentials leave the state untouched. A missing (or unreadable) profile
    /// invalidates the new remote session and leaves the identity absent.
    pub async fn sign_in(&self, email: &str, password: &str) -> AuthResult<Profile> {
        let inner = &self.inner;
        let _op = inner.ops.lock().await;
        info!(target: "auth", email, "sign in");

        let session = match inner.provider.sign_in(&LoginRequest::new(email, password)).await {
            Ok(s) => s,
            Err(e) => {
                warn!(target: "auth", email, code = e.code(), "sign in rejected: {}", e);
                record_quietly(inner.audit.as_ref(), LogEntry::login_failed(email, e.code())).await;
                return Err(e);
            }
        };

        let err = match inner.profiles.profile_by_id(&session.user_id).await {
            Ok(Some(profile)) => {
                info!(target: "auth", user_id = %profile.id, role = %profile.role, "signed in");
                inner.publish(ResolvedIdentity::signed_in(profile.clone()));
                record_quietly(inner.audit.as_ref(), LogEntry::login(&profile.id, &profile.email)).await;
                return Ok(profile);
            }
            Ok(None) => AuthError::profile_missing(session.user_id.as_str()),
            Err(e) => e,
        };

        warn!(target: "auth", user_id = %session.user_id, code = err.code(), "profile unavailable after sign in; signing out: {}", err);
        if let Err(e) = inner.provider.sign_out().await {
            warn!(target: "auth", "sign out after failed profile fetch failed: {}", e);
        }
        inner.publish(ResolvedIdentity::anonymous());
        record_quietly(inner.audit.as_ref(), LogEntry::login_failed(email, err.code())).await;
        Err(err)
    }

    /// Register a new account. The profile row is created server-side.
    pub async fn sign_up(&self, email: &str, password: &str, full_name: &str) -> AuthResult<()> {
        let req = SignUpRequest { email: email.to_string(), password: password.to_string(), full_name: full_name.to_string() };
        self.inner.provider.sign_up(&req).await?;
        info!(target: "auth", email, "account registered");
        Ok(())
    }

    /// Always ends in `{absent, resolving=false}`. A provider failure is still returned.
    pub async fn sign_out(&self) -> AuthResult<()> {
        let inner = &self.inner;
        let _op = inner.ops.lock().await;
        let user_id = inner.state.borrow().profile.as_ref().map(|p| p.id.clone());

        let result = inner.provider.sign_out().await;
        inner.publish(ResolvedIdentity::anonymous());
        match &result {
            Ok(()) => info!(target: "auth", user_id = user_id.as_deref().unwrap_or("-"), "signed out"),
            Err(e) => warn!(target: "auth", "provider sign out failed; local identity cleared anyway: {}", e),
        }
        if user_id.is_some() {
            record_quietly(inner.audit.as_ref(), LogEntry::logout(user_id.as_deref())).await;
        }
        result
    }

    pub fn current(&self) -> ResolvedIdentity {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ResolvedIdentity> {
        self.inner.state.subscribe()
    }

    /// Wait until `resolving` is false and return that state.
    pub async fn settled(&self) -> ResolvedIdentity {
        let mut rx = self.subscribe();
        let settled = rx.wait_for(|s| !s.resolving).await.map(|s| s.clone());
        settled.unwrap_or_else(|_| self.current())
    }

    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }
}

impl Inner {
    fn generation(&self) -> u64 {
        *self.generation.lock()
    }

    fn publish(&self, next: ResolvedIdentity) -> u64 {
        let mut generation = self.generation.lock();
        *generation += 1;
        self.replace(next);
        *generation
    }

    /// Publish only if nothing else published since `token` was taken.
    fn publish_if_current(&self, token: u64, next: ResolvedIdentity) -> bool {
        let generation = self.generation.lock();
        if *generation != token {
            debug!(target: "auth", token, current = *generation, "discarding stale resolution");
            return false;
        }
        self.replace(next);
        true
    }

    fn replace(&self, next: ResolvedIdentity) {
        self.state.send_if_modified(|cur| {
            if *cur == next {
                return false;
            }
            *cur = next;
            true
        });
    }

    fn begin_cycle(self: &Arc<Self>) {
        let held = self.state.borrow().profile.clone();
        let token = self.publish(ResolvedIdentity { profile: held.clone(), resolving: true });
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let next = match tokio::time::timeout(inner.timeout, inner.check_session(token)).await {
                Ok(next) => next,
                Err(_) => {
                    let err = AuthError::Timeout(inner.timeout);
                    warn!(target: "auth", "session check gave up: {}", err);
                    ResolvedIdentity { profile: held, resolving: false }
                }
            };
            inner.publish_if_current(token, next);
        });
    }

    async fn check_session(&self, token: u64) -> ResolvedIdentity {
        let session = match self.provider.current_session().await {
            Ok(Some(s)) => s,
            Ok(None) => {
                debug!(target: "auth", "no current session");
                return ResolvedIdentity::anonymous();
            }
            Err(e) => {
                warn!(target: "auth", "session fetch failed: {}", e);
                return ResolvedIdentity::anonymous();
            }
        };

        match self.profiles.profile_by_id(&session.user_id).await {
            Ok(Some(profile)) => {
                debug!(target: "auth", user_id = %profile.id, role = %profile.role, "profile resolved");
                ResolvedIdentity::signed_in(profile)
            }
            Ok(None) => {
                self.force_sign_out(token, AuthError::profile_missing(session.user_id.as_str())).await;
                ResolvedIdentity::anonymous()
            }
            Err(e) => {
                self.force_sign_out(token, e).await;
                ResolvedIdentity::anonymous()
            }
        }
    }

    /// Fail-closed: drop the remote session when its profile can't be confirmed.
    async fn force_sign_out(&self, token: u64, reason: AuthError) {
        let _op = self.ops.lock().await;
        if self.generation() != token {
            debug!(target: "auth", "skipping forced sign out; identity changed meanwhile");
            return;
        }
        warn!(target: "auth", code = reason.code(), "forcing sign out: {}", reason);
        if let Err(e) = self.provider.sign_out().await {
            warn!(target: "auth", "forced sign out failed: {}", e);
        }
    }

    fn spawn_event_listener(self: &Arc<Self>) {
        let mut events = self.provider.events();
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(ev) => ev,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(target: "auth", skipped, "auth event listener lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let Some(inner) = weak.upgrade() else { break };
                inner.on_event(event).await;
            }
            debug!(target: "auth", "auth event listener stopped");
        });
    }

    async fn on_event(&self, event: AuthEvent) {
        match event {
            AuthEvent::SignedOut => {
                // The event may trail a sign-in that already replaced the ended session.
                let _op = self.ops.lock().await;
                match tokio::time::timeout(self.timeout, self.provider.current_session()).await {
                    Ok(Ok(Some(session))) => {
                        debug!(target: "auth", user_id = %session.user_id, "ignoring stale sign out event");
                        return;
                    }
                    Ok(Ok(None)) => {}
                    Ok(Err(e)) => warn!(target: "auth", "session check after sign out event failed: {}", e),
                    Err(_) => warn!(target: "auth", "session check after sign out event gave up: {}", AuthError::Timeout(self.timeout)),
                }
                info!(target: "auth", "provider reported sign out");
                self.publish(ResolvedIdentity::anonymous());
            }
            AuthEvent::TokenRefreshed(session) => {
                debug!(target: "auth", user_id = %session.user_id, "token refreshed; keeping identity");
            }
        }
    }
}
