//! Runtime configuration read from the environment.

use std::path::PathBuf;
use std::time::Duration;

use tracing::info;

use crate::error::{AuthError, AuthResult};
use crate::identity::DEFAULT_RESOLVE_TIMEOUT;

pub const ENV_SUPABASE_URL: &str = "SUPABASE_URL";
pub const ENV_SUPABASE_ANON_KEY: &str = "SUPABASE_ANON_KEY";
pub const ENV_RESOLVE_TIMEOUT_MS: &str = "IRONPARADISE_RESOLVE_TIMEOUT_MS";
pub const ENV_SESSION_FILE: &str = "IRONPARADISE_SESSION_FILE";

#[derive(Debug, Clone)]
pub struct GymConfig {
    pub supabase_url: String,
    pub anon_key: String,
    pub resolve_timeout: Duration,
    /// Where to persist the session between runs; `None` keeps it in memory only.
    pub session_file: Option<PathBuf>,
}

impl GymConfig {
    pub fn from_env() -> AuthResult<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build from an arbitrary key lookup. Blank values count as missing.
    pub fn from_lookup<F>(lookup: F) -> AuthResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |k: &str| lookup(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let url = get(ENV_SUPABASE_URL);
        let key = get(ENV_SUPABASE_ANON_KEY);
        let (Some(supabase_url), Some(anon_key)) = (url.clone(), key.clone()) else {
            return Err(AuthError::config(format!(
                "missing Supabase environment variables: {}={} {}={}",
                ENV_SUPABASE_URL,
                if url.is_some() { "set" } else { "MISSING" },
                ENV_SUPABASE_ANON_KEY,
                if key.is_some() { "[REDACTED]" } else { "MISSING" },
            )));
        };
        if !(supabase_url.starts_with("http://") || supabase_url.starts_with("https://")) {
            return Err(AuthError::config(format!("{} must be an http(s) URL, got '{}'", ENV_SUPABASE_URL, supabase_url)));
        }

        let resolve_timeout = match get(ENV_RESOLVE_TIMEOUT_MS) {
            None => DEFAULT_RESOLVE_TIMEOUT,
            Some(raw) => {
                let ms: u64 = raw
                    .parse()
                    .map_err(|_| AuthError::config(format!("{} must be a number of milliseconds, got '{}'", ENV_RESOLVE_TIMEOUT_MS, raw)))?;
                if ms == 0 {
                    return Err(AuthError::config(format!("{} must be greater than zero", ENV_RESOLVE_TIMEOUT_MS)));
                }
                Duration::from_millis(ms)
            }
        };

        Ok(Self {
            supabase_url: supabase_url.trim_end_matches('/').to_string(),
            anon_key,
            resolve_timeout,
            session_file: get(ENV_SESSION_FILE).map(PathBuf::from),
        })
    }

    /// Log the configuration without leaking the key.
    pub fn log_summary(&self) {
        info!(
            target: "startup",
            url = %self.supabase_url,
            key_length = self.anon_key.len(),
            resolve_timeout_ms = self.resolve_timeout.as_millis() as u64,
            session_file = ?self.session_file,
            "supabase configuration loaded"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k: &str| map.get(k).cloned()
    }

    #[test]
    fn defaults_applied() {
        let cfg = GymConfig::from_lookup(lookup(&[
            (ENV_SUPABASE_URL, "https://abc.supabase.co/"),
            (ENV_SUPABASE_ANON_KEY, "anon"),
        ]))
        .unwrap();
        assert_eq!(cfg.supabase_url, "https://abc.supabase.co");
        assert_eq!(cfg.resolve_timeout, Duration::from_secs(5));
        assert!(cfg.session_file.is_none());
    }

    #[test]
    fn missing_key_is_config_error_without_secret() {
        let err = GymConfig::from_lookup(lookup(&[(ENV_SUPABASE_URL, "https://abc.supabase.co")])).unwrap_err();
        assert!(matches!(err, AuthError::Config(_)));
        assert!(err.to_string().contains("SUPABASE_ANON_KEY=MISSING"));
    }

    #[test]
    fn blank_values_count_as_missing() {
        let err = GymConfig::from_lookup(lookup(&[(ENV_SUPABASE_URL, "  "), (ENV_SUPABASE_ANON_KEY, "k")])).unwrap_err();
        assert!(err.to_string().contains("SUPABASE_URL=MISSING"));
    }

    #[test]
    fn timeout_and_session_file_parsed() {
        let cfg = GymConfig::from_lookup(lookup(&[
            (ENV_SUPABASE_URL, "http://localhost:54321"),
            (ENV_SUPABASE_ANON_KEY, "anon"),
            (ENV_RESOLVE_TIMEOUT_MS, "1500"),
            (ENV_SESSION_FILE, "/tmp/ip-session.json"),
        ]))
        .unwrap();
        assert_eq!(cfg.resolve_timeout, Duration::from_millis(1500));
        assert_eq!(cfg.session_file, Some(PathBuf::from("/tmp/ip-session.json")));
    }

    #[test]
    fn bad_timeout_rejected() {
        for raw in ["soon", "0"] {
            let err = GymConfig::from_lookup(lookup(&[
                (ENV_SUPABASE_URL, "http://localhost:54321"),
                (ENV_SUPABASE_ANON_KEY, "anon"),
                (ENV_RESOLVE_TIMEOUT_MS, raw),
            ]))
            .unwrap_err();
            assert!(matches!(err, AuthError::Config(_)));
        }
    }

    #[test]
    fn non_http_url_rejected() {
        let err = GymConfig::from_lookup(lookup(&[(ENV_SUPABASE_URL, "abc.supabase.co"), (ENV_SUPABASE_ANON_KEY, "k")])).unwrap_err();
        assert!(err.to_string().contains("http(s) URL"));
    }
}
