//! Activity audit trail for authentication actions.
//! Recording is best-effort: a sink failure is logged and dropped so it can never
//! break sign-in or sign-out.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::AuthResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    UserLogin,
    UserLogout,
    LoginFailed,
}

impl ActivityAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityAction::UserLogin => "user_login",
            ActivityAction::UserLogout => "user_logout",
            ActivityAction::LoginFailed => "login_failed",
        }
    }
}

/// Row of the `activity_logs` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub action_type: ActivityAction,
    #[serde(default)]
    pub details: Value,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(action: ActivityAction, user_id: Option<String>, details: Value) -> Self {
        Self { user_id, action_type: action, details, timestamp: Utc::now() }
    }

    pub fn login(user_id: &str, email: &str) -> Self {
        Self::new(ActivityAction::UserLogin, Some(user_id.to_string()), json!({ "email": email }))
    }

    pub fn logout(user_id: Option<&str>) -> Self {
        Self::new(ActivityAction::UserLogout, user_id.map(str::to_string), Value::Null)
    }

    pub fn login_failed(email: &str, code: &str) -> Self {
        Self::new(ActivityAction::LoginFailed, None, json!({ "email": email, "error": code }))
    }
}

#[async_trait]
pub trait ActivitySink: Send + Sync {
    async fn record(&self, entry: &LogEntry) -> AuthResult<()>;
}

/// Writes entries to the `audit` tracing target only.
#[derive(Debug, Default, Clone)]
pub struct TracingSink;

#[async_trait]
impl ActivitySink for TracingSink {
    async fn record(&self, entry: &LogEntry) -> AuthResult<()> {
        info!(
            target: "audit",
            action = entry.action_type.as_str(),
            user_id = entry.user_id.as_deref().unwrap_or("-"),
            details = %entry.details,
            "activity"
        );
        Ok(())
    }
}

/// Record an entry, swallowing sink failures.
pub async fn record_quietly(sink: &dyn ActivitySink, entry: LogEntry) {
    if let Err(e) = sink.record(&entry).await {
        warn!(target: "audit", action = entry.action_type.as_str(), "failed to log action: {}", e);
    }
}
