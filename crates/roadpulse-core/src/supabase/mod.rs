//! Supabase backend: PostgREST for reads/writes, Realtime for change feeds.

mod realtime;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::auth::AuthUser;
use crate::config::{ClientConfig, INCIDENTS_CHANNEL};
use crate::error::{Error, Result};
use crate::models::{
    Incident, IncidentId, IncidentPatch, NewIncident, NewRoute, Profile, ProfileUpdate, RouteId,
    SavedRoute,
};
use crate::store::{ChangeFeed, IncidentStore, ProfileStore, RouteStore};
use crate::util::{compact_text, normalize_text_option};

const REQUEST_TIMEOUT_SECS: u64 = 15;
const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";

const INCIDENTS_TABLE: &str = "incidents";
const ROUTES_TABLE: &str = "routes";
const PROFILES_TABLE: &str = "profiles";

/// Client for one Supabase project, optionally acting as a signed-in user.
#[derive(Clone)]
pub struct SupabaseClient {
    config: ClientConfig,
    client: Client,
    access_token: Option<String>,
}

impl SupabaseClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        Ok(Self {
            config,
            client: Client::builder()
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()?,
            access_token: None,
        })
    }

    /// Send requests with a user's access token instead of the anon key.
    #[must_use]
    pub fn with_access_token(mut self, access_token: impl Into<String>) -> Self {
        self.access_token = normalize_text_option(Some(access_token.into()));
        self
    }

    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Resolve the user behind the configured access token.
    pub async fn current_user(&self) -> Result<AuthUser> {
        let Some(access_token) = &self.access_token else {
            return Err(Error::AuthRequired("An access token is required"));
        };
        let request = self
            .client
            .get(format!("{}/user", self.config.auth_url()))
            .header("apikey", &self.config.supabase_anon_key)
            .bearer_auth(access_token);
        let user: GoTrueUser = self.send_json(request).await?;
        Ok(AuthUser {
            id: user.id,
            email: user.email,
        })
    }

    fn bearer_token(&self) -> &str {
        self.access_token
            .as_deref()
            .unwrap_or(&self.config.supabase_anon_key)
    }

    fn table_url(&self, table: &str, query: &str) -> String {
        if query.is_empty() {
            format!("{}/{table}", self.config.rest_url())
        } else {
            format!("{}/{table}?{query}", self.config.rest_url())
        }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.config.supabase_anon_key)
            .bearer_auth(self.bearer_token())
    }

    /// A write that returns the affected row as a single JSON object.
    fn returning_row(&self, request: RequestBuilder) -> RequestBuilder {
        self.authorize(request)
            .header("Prefer", "return=representation")
            .header(reqwest::header::ACCEPT, SINGLE_OBJECT)
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(Error::Remote(parse_api_error(status, &body)));
        }
        Ok(serde_json::from_str(&body)?)
    }

    async fn send_empty(&self, request: RequestBuilder) -> Result<()> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(Error::Remote(parse_api_error(status, &body)))
    }
}

fn eq_filter(column: &str, value: &str) -> String {
    format!("{column}=eq.{}", urlencoding::encode(value))
}

#[async_trait]
impl IncidentStore for SupabaseClient {
    async fn query_incidents(&self) -> Result<Vec<Incident>> {
        let url = self.table_url(INCIDENTS_TABLE, "select=*&order=created_at.desc");
        let incidents: Vec<Incident> = self.send_json(self.authorize(self.client.get(url))).await?;
        tracing::debug!(count = incidents.len(), "fetched incidents");
        Ok(incidents)
    }

    async fn insert_incident(&self, record: &NewIncident) -> Result<Incident> {
        let url = self.table_url(INCIDENTS_TABLE, "select=*");
        self.send_json(self.returning_row(self.client.post(url).json(record)))
            .await
    }

    async fn update_incident(&self, id: &IncidentId, patch: &IncidentPatch) -> Result<Incident> {
        let query = format!("{}&select=*", eq_filter("id", id.as_str()));
        let url = self.table_url(INCIDENTS_TABLE, &query);
        self.send_json(self.returning_row(self.client.patch(url).json(patch)))
            .await
    }

    async fn subscribe_incidents(&self) -> Result<ChangeFeed> {
        realtime::subscribe(
            &self.config,
            self.bearer_token(),
            INCIDENTS_CHANNEL,
            INCIDENTS_TABLE,
        )
        .await
    }
}

#[async_trait]
impl RouteStore for SupabaseClient {
    async fn list_routes(&self, user_id: &str) -> Result<Vec<SavedRoute>> {
        let query = format!(
            "select=*&{}&order=created_at.desc",
            eq_filter("user_id", user_id)
        );
        let url = self.table_url(ROUTES_TABLE, &query);
        self.send_json(self.authorize(self.client.get(url))).await
    }

    async fn insert_route(&self, record: &NewRoute) -> Result<SavedRoute> {
        let url = self.table_url(ROUTES_TABLE, "select=*");
        self.send_json(self.returning_row(self.client.post(url).json(record)))
            .await
    }

    async fn delete_route(&self, id: &RouteId) -> Result<()> {
        let url = self.table_url(ROUTES_TABLE, &eq_filter("id", id.as_str()));
        self.send_empty(self.authorize(self.client.delete(url))).await
    }
}

#[async_trait]
impl ProfileStore for SupabaseClient {
    async fn fetch_profile(&self, user_id: &str) -> Result<Option<Profile>> {
        let query = format!("select=*&{}", eq_filter("id", user_id));
        let url = self.table_url(PROFILES_TABLE, &query);
        let rows: Vec<Profile> = self.send_json(self.authorize(self.client.get(url))).await?;
        Ok(rows.into_iter().next())
    }

    async fn update_profile(&self, user_id: &str, update: &ProfileUpdate) -> Result<Profile> {
        let query = format!("{}&select=*", eq_filter("id", user_id));
        let url = self.table_url(PROFILES_TABLE, &query);
        self.send_json(self.returning_row(self.client.patch(url).json(update)))
            .await
    }
}

#[derive(Debug, Deserialize)]
struct GoTrueUser {
    id: String,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PostgrestErrorBody {
    message: Option<String>,
    details: Option<String>,
    hint: Option<String>,
    code: Option<String>,
    msg: Option<String>,
    error_description: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<PostgrestErrorBody>(body) {
        if let Some(message) = payload
            .message
            .or(payload.msg)
            .or(payload.error_description)
        {
            let mut rendered = message.trim().to_string();
            if let Some(details) = normalize_text_option(payload.details) {
                rendered.push_str(": ");
                rendered.push_str(&details);
            }
            if let Some(hint) = normalize_text_option(payload.hint) {
                rendered.push_str(&format!(" (hint: {hint})"));
            }
            return match normalize_text_option(payload.code) {
                Some(code) => format!("{rendered} [{code}] ({})", status.as_u16()),
                None => format!("{rendered} ({})", status.as_u16()),
            };
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}
