//! Client configuration for the hosted backend.
//!
//! `ClientConfig` holds the public Supabase project URL and anon key. Both are
//! safe to ship in a client build; user access tokens never live here.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::util::{is_http_url, normalize_text_option};

const URL_ENV_KEYS: &[&str] = &["SUPABASE_URL", "EXPO_PUBLIC_SUPABASE_URL"];
const ANON_KEY_ENV_KEYS: &[&str] = &["SUPABASE_ANON_KEY", "EXPO_PUBLIC_SUPABASE_ANON_KEY"];

/// The name of the realtime channel incidents are broadcast on.
pub const INCIDENTS_CHANNEL: &str = "incidents_channel";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
}

impl ClientConfig {
    /// Validate and normalize a project URL and anon key.
    pub fn new(supabase_url: impl Into<String>, supabase_anon_key: impl Into<String>) -> Result<Self> {
        let supabase_url = normalize_project_url(&supabase_url.into())?;
        let supabase_anon_key = normalize_text_option(Some(supabase_anon_key.into()))
            .ok_or_else(|| {
                Error::InvalidConfiguration("Supabase anon key must not be empty".to_string())
            })?;
        Ok(Self {
            supabase_url,
            supabase_anon_key,
        })
    }

    /// Read the configuration from `SUPABASE_URL` / `SUPABASE_ANON_KEY`
    /// (or their `EXPO_PUBLIC_` variants).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve the configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let find = |keys: &[&str]| {
            keys.iter()
                .find_map(|key| normalize_text_option(lookup(key)))
        };

        match (find(URL_ENV_KEYS), find(ANON_KEY_ENV_KEYS)) {
            (Some(url), Some(anon_key)) => Self::new(url, anon_key),
            (None, _) => Err(Error::InvalidConfiguration(
                "SUPABASE_URL is not set".to_string(),
            )),
            (_, None) => Err(Error::InvalidConfiguration(
                "SUPABASE_ANON_KEY is not set".to_string(),
            )),
        }
    }

    /// PostgREST endpoint, e.g. `https://project.supabase.co/rest/v1`.
    pub fn rest_url(&self) -> String {
        format!("{}/rest/v1", self.supabase_url)
    }

    /// GoTrue endpoint, e.g. `https://project.supabase.co/auth/v1`.
    pub fn auth_url(&self) -> String {
        format!("{}/auth/v1", self.supabase_url)
    }

    /// Realtime WebSocket endpoint including the anon key and protocol version.
    pub fn realtime_url(&self) -> String {
        let base = self
            .supabase_url
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);
        format!(
            "{base}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
            urlencoding::encode(&self.supabase_anon_key)
        )
    }
}

fn normalize_project_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(Error::InvalidConfiguration(
            "Supabase URL must not be empty".to_string(),
        ));
    }
    if !is_http_url(trimmed) {
        return Err(Error::InvalidConfiguration(
            "Supabase URL must include http:// or https://".to_string(),
        ));
    }

    let base = ["/rest/v1", "/auth/v1"]
        .iter()
        .find_map(|suffix| trimmed.strip_suffix(suffix))
        .unwrap_or(trimmed);
    Ok(base.to_string())
}
