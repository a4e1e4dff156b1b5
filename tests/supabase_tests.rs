//! Supabase adapter tests against an in-process mock of the auth/rest endpoints.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tempfile::tempdir;

use ironparadise::audit::ActivitySink;
use ironparadise::config::GymConfig;
use ironparadise::error::AuthError;
use ironparadise::identity::{AuthEvent, IdentityProvider, ProfileStore, ResolvedIdentity, Role, Session, SessionResolver};
use ironparadise::supabase::SupabaseClient;

const ANON_KEY: &str = "anon-test-key";

#[derive(Default)]
struct Mock {
    /// email -> (password, user id)
    accounts: HashMap<String, (String, String)>,
    /// user id -> profile row
    profiles: HashMap<String, Value>,
    valid_refresh: Vec<String>,
    logouts: usize,
    signups: Vec<Value>,
    activity: Vec<Value>,
    issued: usize,
}

type Shared = Arc<Mutex<Mock>>;

fn has_apikey(headers: &HeaderMap) -> bool {
    headers.get("apikey").and_then(|v| v.to_str().ok()) == Some(ANON_KEY)
}

fn token_body(mock: &mut Mock, user_id: &str, email: &str) -> Value {
    mock.issued += 1;
    let refresh = format!("refresh-{}", mock.issued);
    mock.valid_refresh.push(refresh.clone());
    json!({
        "access_token": format!("access-{}", mock.issued),
        "refresh_token": refresh,
        "token_type": "bearer",
        "expires_in": 3600,
        "user": { "id": user_id, "email": email },
    })
}

async fn token(
    State(mock): State<Shared>,
    Query(q): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if !has_apikey(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "message": "No API key found in request" })));
    }
    let mut m = mock.lock();
    match q.get("grant_type").map(String::as_str) {
        Some("password") => {
            let email = body["email"].as_str().unwrap_or_default().to_string();
            let password = body["password"].as_str().unwrap_or_default();
            match m.accounts.get(&email).cloned() {
                Some((pw, id)) if pw == password => {
                    let body = token_body(&mut m, &id, &email);
                    (StatusCode::OK, Json(body))
                }
                _ => (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": "invalid_grant", "error_description": "Invalid login credentials" })),
                ),
            }
        }
        Some("refresh_token") => {
            let rt = body["refresh_token"].as_str().unwrap_or_default().to_string();
            if let Some(pos) = m.valid_refresh.iter().position(|r| *r == rt) {
                m.valid_refresh.remove(pos);
                let body = token_body(&mut m, "u-member", "member@gym.io");
                (StatusCode::OK, Json(body))
            } else {
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": "invalid_grant", "error_description": "Invalid Refresh Token" })),
                )
            }
        }
        _ => (StatusCode::BAD_REQUEST, Json(json!({ "msg": "unsupported grant_type" }))),
    }
}

async fn logout(State(mock): State<Shared>, headers: HeaderMap) -> StatusCode {
    let authorized = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("Bearer access-"));
    if !authorized {
        return StatusCode::UNAUTHORIZED;
    }
    mock.lock().logouts += 1;
    StatusCode::NO_CONTENT
}

async fn signup(State(mock): State<Shared>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    let mut m = mock.lock();
    let email = body["email"].as_str().unwrap_or_default().to_string();
    if m.accounts.contains_key(&email) {
        return (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({ "msg": "User already registered" })));
    }
    m.signups.push(body);
    (StatusCode::OK, Json(json!({ "id": "u-new", "email": email })))
}

async fn profiles(
    State(mock): State<Shared>,
    Query(q): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    if !has_apikey(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "message": "No API key found in request" })));
    }
    let id = q.get("id").and_then(|v| v.strip_prefix("eq.")).unwrap_or_default();
    let rows: Vec<Value> = mock.lock().profiles.get(id).cloned().into_iter().collect();
    (StatusCode::OK, Json(Value::Array(rows)))
}

async fn activity(State(mock): State<Shared>, Json(body): Json<Value>) -> StatusCode {
    mock.lock().activity.push(body);
    StatusCode::CREATED
}

async fn spawn_mock() -> Result<(SocketAddr, Shared)> {
    let mut mock = Mock::default();
    mock.accounts.insert("member@gym.io".into(), ("pw".into(), "u-member".into()));
    mock.accounts.insert("orphan@gym.io".into(), ("pw".into(), "u-orphan".into()));
    mock.profiles.insert(
        "u-member".into(),
        json!({ "id": "u-member", "email": "member@gym.io", "full_name": "Mia Member", "role": "member" }),
    );
    let shared: Shared = Arc::new(Mutex::new(mock));

    let app = Router::new()
        .route("/auth/v1/token", post(token))
        .route("/auth/v1/logout", post(logout))
        .route("/auth/v1/signup", post(signup))
        .route("/rest/v1/profiles", get(profiles))
        .route("/rest/v1/activity_logs", post(activity))
        .with_state(shared.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((addr, shared))
}

fn config(addr: SocketAddr, session_file: Option<PathBuf>) -> GymConfig {
    GymConfig {
        supabase_url: format!("http://{}", addr),
        anon_key: ANON_KEY.to_string(),
        resolve_timeout: Duration::from_secs(2),
        session_file,
    }
}

fn resolver_for(client: &Arc<SupabaseClient>) -> SessionResolver {
    let provider: Arc<dyn IdentityProvider> = client.clone();
    let profiles: Arc<dyn ProfileStore> = client.clone();
    let audit: Arc<dyn ActivitySink> = client.clone();
    SessionResolver::builder(provider, profiles).timeout(Duration::from_secs(2)).audit(audit).build()
}

#[tokio::test]
async fn sign_in_resolves_profile_and_logs_activity() -> Result<()> {
    let (addr, mock) = spawn_mock().await?;
    let client = Arc::new(SupabaseClient::new(&config(addr, None))?);
    let resolver = resolver_for(&client);

    let profile = resolver.sign_in("member@gym.io", "pw").await?;
    assert_eq!(profile.role, Role::Member);
    assert_eq!(profile.display_name(), "Mia Member");
    assert_eq!(client.session().map(|s| s.user_id), Some("u-member".to_string()));

    let m = mock.lock();
    assert_eq!(m.activity.len(), 1);
    assert_eq!(m.activity[0]["action_type"], "user_login");
    assert_eq!(m.activity[0]["user_id"], "u-member");
    Ok(())
}

#[tokio::test]
async fn bad_password_is_authentication_error() -> Result<()> {
    let (addr, mock) = spawn_mock().await?;
    let client = Arc::new(SupabaseClient::new(&config(addr, None))?);
    let resolver = resolver_for(&client);

    let err = resolver.sign_in("member@gym.io", "nope").await.unwrap_err();
    assert_eq!(err, AuthError::Authentication("Invalid login credentials".into()));
    assert!(client.session().is_none());
    assert_eq!(mock.lock().activity[0]["action_type"], "login_failed");
    Ok(())
}

#[tokio::test]
async fn orphan_account_is_signed_out() -> Result<()> {
    let (addr, mock) = spawn_mock().await?;
    let client = Arc::new(SupabaseClient::new(&config(addr, None))?);
    let resolver = resolver_for(&client);

    let err = resolver.sign_in("orphan@gym.io", "pw").await.unwrap_err();
    assert_eq!(err, AuthError::ProfileMissing { user_id: "u-orphan".into() });
    assert!(client.session().is_none());
    assert_eq!(resolver.current(), ResolvedIdentity::anonymous());
    assert_eq!(mock.lock().logouts, 1);
    Ok(())
}

#[tokio::test]
async fn sign_up_sends_full_name_metadata() -> Result<()> {
    let (addr, mock) = spawn_mock().await?;
    let client = Arc::new(SupabaseClient::new(&config(addr, None))?);
    let resolver = resolver_for(&client);

    resolver.sign_up("fresh@gym.io", "pw", "Fresh Face").await?;
    assert_eq!(mock.lock().signups[0]["data"]["full_name"], "Fresh Face");

    let err = resolver.sign_up("member@gym.io", "pw", "Dup").await.unwrap_err();
    assert_eq!(err, AuthError::Authentication("User already registered".into()));
    Ok(())
}

#[tokio::test]
async fn session_persists_across_clients() -> Result<()> {
    let (addr, mock) = spawn_mock().await?;
    let dir = tempdir()?;
    let file = dir.path().join("state").join("session.json");
    let cfg = config(addr, Some(file.clone()));

    let first = Arc::new(SupabaseClient::new(&cfg)?);
    resolver_for(&first).sign_in("member@gym.io", "pw").await?;
    assert!(file.exists());

    let second = Arc::new(SupabaseClient::new(&cfg)?);
    let resolver = resolver_for(&second);
    resolver.start();
    let state = resolver.settled().await;
    assert_eq!(state.role(), Some(Role::Member));

    resolver.sign_out().await?;
    assert!(!file.exists());
    assert_eq!(resolver.current(), ResolvedIdentity::anonymous());
    assert_eq!(mock.lock().logouts, 1);
    Ok(())
}

fn expired_session(refresh_token: &str) -> Session {
    Session {
        access_token: "access-old".into(),
        refresh_token: refresh_token.into(),
        user_id: "u-member".into(),
        email: "member@gym.io".into(),
        expires_at: Utc::now() - ChronoDuration::minutes(5),
    }
}

#[tokio::test]
async fn expired_session_is_refreshed() -> Result<()> {
    let (addr, mock) = spawn_mock().await?;
    mock.lock().valid_refresh.push("refresh-seed".into());
    let dir = tempdir()?;
    let file = dir.path().join("session.json");
    std::fs::write(&file, serde_json::to_vec(&expired_session("refresh-seed"))?)?;

    let client = SupabaseClient::new(&config(addr, Some(file)))?;
    let mut events = client.events();
    let session = client.current_session().await?.expect("refreshed session");
    assert_ne!(session.access_token, "access-old");
    assert!(!session.is_expired());
    assert!(matches!(events.recv().await?, AuthEvent::TokenRefreshed(_)));
    Ok(())
}

#[tokio::test]
async fn rejected_refresh_ends_session() -> Result<()> {
    let (addr, _mock) = spawn_mock().await?;
    let dir = tempdir()?;
    let file = dir.path().join("session.json");
    std::fs::write(&file, serde_json::to_vec(&expired_session("revoked"))?)?;

    let client = SupabaseClient::new(&config(addr, Some(file.clone())))?;
    let mut events = client.events();
    assert!(client.current_session().await?.is_none());
    assert_eq!(events.recv().await?, AuthEvent::SignedOut);
    assert!(!file.exists());
    Ok(())
}

#[tokio::test]
async fn corrupt_session_file_is_ignored() -> Result<()> {
    let (addr, _mock) = spawn_mock().await?;
    let dir = tempdir()?;
    let file = dir.path().join("session.json");
    std::fs::write(&file, b"{not json")?;

    let client = SupabaseClient::new(&config(addr, Some(file)))?;
    assert!(client.session().is_none());
    Ok(())
}

#[tokio::test]
async fn unreachable_server_settles_anonymous() -> Result<()> {
    // Bind then drop to get a port nobody listens on.
    let addr = {
        let l = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        l.local_addr()?
    };
    let dir = tempdir()?;
    let file = dir.path().join("session.json");
    std::fs::write(&file, serde_json::to_vec(&expired_session("refresh-seed"))?)?;

    let client = Arc::new(SupabaseClient::new(&config(addr, Some(file)))?);
    let resolver = resolver_for(&client);
    resolver.start();
    let state = resolver.settled().await;
    assert_eq!(state, ResolvedIdentity::anonymous());
    Ok(())
}
