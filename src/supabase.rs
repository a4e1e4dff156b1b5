//!
//! Supabase adapters
//! -----------------
//! Identity provider (GoTrue `auth/v1`), profile store and activity sink
//! (PostgREST `rest/v1`) over plain HTTP with `reqwest`.
//!
//! Responsibilities:
//! - Password sign-in, sign-up with `full_name` metadata, sign-out.
//! - Holding the current session, refreshing it once expired and announcing
//!   `TokenRefreshed` / `SignedOut` to subscribers.
//! - Optional persistence of the session to a JSON file between runs.
//! - `profiles` lookups by id and `activity_logs` inserts, authorized with the
//!   session's access token when there is one and the anon key otherwise.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::audit::{ActivitySink, LogEntry};
use crate::config::GymConfig;
use crate::error::{AuthError, AuthResult};
use crate::identity::{AuthEvent, IdentityProvider, LoginRequest, Profile, ProfileStore, Session, SignUpRequest};

#[derive(Debug, Deserialize)]
struct TokenUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: TokenUser,
}

impl TokenResponse {
    fn into_session(self, fallback_email: &str) -> Session {
        let expires_at = match (self.expires_at, self.expires_in) {
            (Some(at), _) => Utc.timestamp_opt(at, 0).single().unwrap_or_else(Utc::now),
            (None, Some(secs)) => Utc::now() + ChronoDuration::seconds(secs),
            (None, None) => Utc::now() + ChronoDuration::hours(1),
        };
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            user_id: self.user.id,
            email: self.user.email.unwrap_or_else(|| fallback_email.to_string()),
            expires_at,
        }
    }
}

/// Pull a human-readable message out of a GoTrue/PostgREST error body.
fn error_message(body: &str, status: StatusCode) -> String {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    parsed
        .as_ref()
        .and_then(|v| {
            ["error_description", "msg", "message", "error"]
                .iter()
                .find_map(|k| v.get(*k).and_then(|m| m.as_str()))
                .map(str::to_string)
        })
        .unwrap_or_else(|| format!("HTTP {}", status))
}

/// Client errors mean the request itself was refused; anything else is worth retrying.
fn classify(status: StatusCode, body: &str) -> AuthError {
    let msg = error_message(body, status);
    if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS && status != StatusCode::REQUEST_TIMEOUT {
        AuthError::Authentication(msg)
    } else {
        AuthError::TransientNetwork(msg)
    }
}

pub struct SupabaseClient {
    base: String,
    anon_key: String,
    http: reqwest::Client,
    session: RwLock<Option<Session>>,
    session_file: Option<PathBuf>,
    events: broadcast::Sender<AuthEvent>,
}

impl SupabaseClient {
    pub fn new(cfg: &GymConfig) -> AuthResult<Self> {
        let base = Url::parse(&cfg.supabase_url).map_err(|e| AuthError::config(format!("invalid Supabase URL: {}", e)))?;
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&cfg.anon_key).map_err(|_| AuthError::config("anon key is not a valid header value"))?;
        headers.insert("apikey", key);
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(cfg.resolve_timeout * 2)
            .build()?;
        let (events, _) = broadcast::channel(16);
        let client = Self {
            base: base.as_str().trim_end_matches('/').to_string(),
            anon_key: cfg.anon_key.clone(),
            http,
            session: RwLock::new(None),
            session_file: cfg.session_file.clone(),
            events,
        };
        let restored = client.load_session();
        *client.session.write() = restored;
        Ok(client)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn bearer(&self) -> String {
        let token = self.session.read().as_ref().map(|s| s.access_token.clone());
        format!("Bearer {}", token.unwrap_or_else(|| self.anon_key.clone()))
    }

    pub fn session(&self) -> Option<Session> {
        self.session.read().clone()
    }

    fn store_session(&self, session: Option<Session>) {
        self.persist(session.as_ref());
        *self.session.write() = session;
    }

    fn load_session(&self) -> Option<Session> {
        let path = self.session_file.as_ref()?;
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(target: "auth", path = %path.display(), "could not read persisted session: {}", e);
                return None;
            }
        };
        match serde_json::from_str::<Session>(&raw) {
            Ok(s) => {
                debug!(target: "auth", user_id = %s.user_id, "restored persisted session");
                Some(s)
            }
            Err(e) => {
                warn!(target: "auth", path = %path.display(), "discarding unreadable persisted session: {}", e);
                None
            }
        }
    }

    fn persist(&self, session: Option<&Session>) {
        let Some(path) = self.session_file.as_ref() else { return };
        let result = match session {
            Some(s) => {
                if let Some(dir) = path.parent() {
                    std::fs::create_dir_all(dir).ok();
                }
                serde_json::to_vec_pretty(s)
                    .map_err(std::io::Error::other)
                    .and_then(|bytes| std::fs::write(path, bytes))
            }
            None => match std::fs::remove_file(path) {
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                other => other,
            },
        };
        if let Err(e) = result {
            warn!(target: "auth", path = %path.display(), "could not persist session: {}", e);
        }
    }

    async fn token_request(&self, grant_type: &str, body: serde_json::Value, email_hint: &str) -> AuthResult<Session> {
        let url = format!("{}?grant_type={}", self.endpoint("/auth/v1/token"), grant_type);
        let resp = self.http.post(url).json(&body).send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(classify(status, &text));
        }
        let token: TokenResponse = serde_json::from_str(&text)?;
        Ok(token.into_session(email_hint))
    }

    async fn refresh(&self, expired: &Session) -> AuthResult<Session> {
        self.token_request("refresh_token", json!({ "refresh_token": expired.refresh_token }), &expired.email)
            .await
    }
}

#[async_trait]
impl IdentityProvider for SupabaseClient {
    async fn current_session(&self) -> AuthResult<Option<Session>> {
        let Some(current) = self.session() else { return Ok(None) };
        if !current.is_expired() {
            return Ok(Some(current));
        }
        debug!(target: "auth", user_id = %current.user_id, "session expired; refreshing");
        match self.refresh(&current).await {
            Ok(fresh) => {
                self.store_session(Some(fresh.clone()));
                let _ = self.events.send(AuthEvent::TokenRefreshed(fresh.clone()));
                Ok(Some(fresh))
            }
            Err(AuthError::Authentication(msg)) => {
                info!(target: "auth", "refresh token rejected ({}); session ended", msg);
                self.store_session(None);
                let _ = self.events.send(AuthEvent::SignedOut);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn sign_in(&self, req: &LoginRequest) -> AuthResult<Session> {
        let session = self
            .token_request("password", json!({ "email": req.email, "password": req.password }), &req.email)
            .await?;
        self.store_session(Some(session.clone()));
        Ok(session)
    }

    async fn sign_up(&self, req: &SignUpRequest) -> AuthResult<()> {
        let body = json!({
            "email": req.email,
            "password": req.password,
            "data": { "full_name": req.full_name },
        });
        let resp = self.http.post(self.endpoint("/auth/v1/signup")).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(classify(status, &text));
        }
        Ok(())
    }

    async fn sign_out(&self) -> AuthResult<()> {
        let Some(current) = self.session() else { return Ok(()) };
        self.store_session(None);
        let _ = self.events.send(AuthEvent::SignedOut);
        let resp = self
            .http
            .post(self.endpoint("/auth/v1/logout"))
            .header(AUTHORIZATION, format!("Bearer {}", current.access_token))
            .send()
            .await?;
        let status = resp.status();
        // An already-invalid token still means the session is gone.
        if status.is_success() || status == StatusCode::UNAUTHORIZED || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        let text = resp.text().await.unwrap_or_default();
        Err(classify(status, &text))
    }

    fn events(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

#[async_trait]
impl ProfileStore for SupabaseClient {
    async fn profile_by_id(&self, id: &str) -> AuthResult<Option<Profile>> {
        let url = format!("{}?id=eq.{}&select=*", self.endpoint("/rest/v1/profiles"), urlencoding::encode(id));
        let resp = self.http.get(url).header(AUTHORIZATION, self.bearer()).send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(classify(status, &text));
        }
        let mut rows: Vec<Profile> = serde_json::from_str(&text)?;
        if rows.len() > 1 {
            return Err(AuthError::decode(format!("{} profile rows for user {}", rows.len(), id)));
        }
        Ok(rows.pop())
    }
}

#[async_trait]
impl ActivitySink for SupabaseClient {
    async fn record(&self, entry: &LogEntry) -> AuthResult<()> {
        let resp = self
            .http
            .post(self.endpoint("/rest/v1/activity_logs"))
            .header(AUTHORIZATION, self.bearer())
            .header("Prefer", "return=minimal")
            .json(entry)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(classify(status, &text));
        }
        Ok(())
    }
}
