use std::collections::HashMap;
use std::env;

use chrono::{DateTime, Utc};
use roadpulse_core::auth::UserContext;
use roadpulse_core::config::ClientConfig;
use roadpulse_core::models::{Incident, IncidentId, SavedRoute};
use roadpulse_core::supabase::SupabaseClient;
use roadpulse_core::util::normalize_text_option;
use roadpulse_core::IncidentFeed;
use serde::Serialize;

use crate::config_profiles::{CliProfile, CliProfilesConfig};
use crate::error::CliError;

const SHORT_ID_LEN: usize = 8;

/// Backend client plus the user it acts for.
pub struct Session {
    pub client: SupabaseClient,
    pub user: UserContext,
}

impl Session {
    /// Resolve configuration and, when a token is given, the signed-in user.
    pub async fn open(
        profile: Option<&str>,
        access_token: Option<&str>,
        require_user: bool,
    ) -> Result<Self, CliError> {
        let config = resolve_client_config(profile)?;
        let client = SupabaseClient::new(config)?;

        let Some(token) = normalize_text_option(access_token.map(ToString::to_string)) else {
            if require_user {
                return Err(CliError::NotSignedIn);
            }
            return Ok(Self {
                client,
                user: UserContext::anonymous(),
            });
        };

        let client = client.with_access_token(token);
        let user = client.current_user().await?;
        tracing::debug!(user_id = %user.id, "resolved signed-in user");
        Ok(Self {
            client,
            user: UserContext::signed_in(user),
        })
    }

    pub fn feed(&self) -> IncidentFeed {
        IncidentFeed::new(std::sync::Arc::new(self.client.clone()), self.user.clone())
    }
}

pub fn resolve_client_config(profile: Option<&str>) -> Result<ClientConfig, CliError> {
    let config = CliProfilesConfig::load().map_err(CliError::Config)?;
    let profile_name = config.resolve_profile_name(profile);
    let profile = config.profile(&profile_name).cloned().unwrap_or_default();
    Ok(client_config_from(&profile, |key| env::var(key).ok())?)
}

/// Environment variables win over the stored profile.
pub fn client_config_from(
    profile: &CliProfile,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> roadpulse_core::Result<ClientConfig> {
    ClientConfig::from_lookup(|key| {
        env_lookup(key).or_else(|| match key {
            "SUPABASE_URL" => profile.supabase_url(),
            "SUPABASE_ANON_KEY" => profile.supabase_anon_key(),
            _ => None,
        })
    })
}

/// Activate the feed and wait for the first load.
pub async fn load_feed(feed: &IncidentFeed) -> Result<Vec<Incident>, CliError> {
    feed.activate().await?;
    let view = feed.ready().await;
    if let Some(error) = view.error {
        return Err(CliError::FeedUnavailable(error));
    }
    Ok(view.incidents.to_vec())
}

/// Find an incident by full id or unique id prefix.
pub fn resolve_incident_id(query: &str, incidents: &[Incident]) -> Result<IncidentId, CliError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(CliError::EmptyIncidentId);
    }

    if let Some(exact) = incidents.iter().find(|incident| incident.id.as_str() == query) {
        return Ok(exact.id.clone());
    }

    let matches: Vec<&IncidentId> = incidents
        .iter()
        .map(|incident| &incident.id)
        .filter(|id| id.as_str().starts_with(query))
        .collect();

    match matches.as_slice() {
        [] => Err(CliError::IncidentNotFound(query.to_string())),
        [only] => Ok((*only).clone()),
        several => {
            let options = several
                .iter()
                .take(3)
                .map(|id| short_id(id.as_str()))
                .collect::<Vec<_>>()
                .join(", ");
            Err(CliError::AmbiguousIncidentId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

#[derive(Debug, Serialize)]
pub struct IncidentListItem {
    pub id: String,
    #[serde(rename = "type")]
    pub category: String,
    pub title: String,
    pub description: Option<String>,
    pub severity: String,
    pub status: String,
    pub likes: u32,
    pub comments: usize,
    pub longitude: f64,
    pub latitude: f64,
    pub created_at: String,
    pub relative_time: String,
}

pub fn incident_to_list_item(incident: &Incident, now: DateTime<Utc>) -> IncidentListItem {
    IncidentListItem {
        id: incident.id.to_string(),
        category: incident.category.clone(),
        title: incident.title.clone(),
        description: incident.description.clone(),
        severity: incident.severity.to_string(),
        status: incident.status.to_string(),
        likes: incident.likes,
        comments: incident.comments.len(),
        longitude: incident.location.longitude,
        latitude: incident.location.latitude,
        created_at: incident.created_at.to_rfc3339(),
        relative_time: format_relative_time(incident.created_at, now),
    }
}

pub fn format_incident_line(incident: &Incident, now: DateTime<Utc>) -> String {
    let short_id = short_id(incident.id.as_str());
    let title = preview(&incident.title, 40);
    let relative_time = format_relative_time(incident.created_at, now);
    let line = format!(
        "{short_id:<8}  {:<6}  {:<12}  {title:<40}  {:>3} likes  {:>3} comments  {relative_time}",
        incident.severity.as_str(),
        preview(&incident.category, 12),
        incident.likes,
        incident.comments.len(),
    );
    if incident.status == roadpulse_core::models::IncidentStatus::Resolved {
        format!("{line}  [resolved]")
    } else {
        line
    }
}

pub fn format_incident_lines(incidents: &[Incident], now: DateTime<Utc>) -> Vec<String> {
    incidents
        .iter()
        .map(|incident| format_incident_line(incident, now))
        .collect()
}

pub fn format_route_lines(routes: &[SavedRoute], now: DateTime<Utc>) -> Vec<String> {
    routes
        .iter()
        .map(|route| {
            format!(
                "{:<8}  {:<24}  ({:.5}, {:.5}) -> ({:.5}, {:.5})  {}",
                short_id(route.id.as_str()),
                preview(&route.name, 24),
                route.start_location.longitude,
                route.start_location.latitude,
                route.end_location.longitude,
                route.end_location.latitude,
                format_relative_time(route.created_at, now),
            )
        })
        .collect()
}

/// What changed between two published snapshots, as `+`, `~` and `-` lines.
pub fn describe_changes(
    previous: &[Incident],
    current: &[Incident],
    now: DateTime<Utc>,
) -> Vec<String> {
    let before: HashMap<&IncidentId, &Incident> =
        previous.iter().map(|incident| (&incident.id, incident)).collect();
    let after: HashMap<&IncidentId, &Incident> =
        current.iter().map(|incident| (&incident.id, incident)).collect();

    let mut lines = Vec::new();
    for incident in current {
        match before.get(&incident.id) {
            None => lines.push(format!("+ {}", format_incident_line(incident, now))),
            Some(old) if *old != incident => {
                lines.push(format!("~ {}", format_incident_line(incident, now)));
            }
            Some(_) => {}
        }
    }
    for incident in previous {
        if !after.contains_key(&incident.id) {
            lines.push(format!("- {}", short_id(incident.id.as_str())));
        }
    }
    lines
}

pub fn short_id(id: &str) -> String {
    id.chars().take(SHORT_ID_LEN).collect()
}

pub fn preview(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = collapsed.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn format_relative_time(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let diff = (now - timestamp).num_seconds().max(0);
    let minute = 60;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

/// Show only the first and last few characters of a secret.
pub fn mask_secret(secret: &str) -> String {
    let count = secret.chars().count();
    if count <= 8 {
        return "*".repeat(count);
    }
    let head: String = secret.chars().take(4).collect();
    let tail: String = secret.chars().skip(count - 4).collect();
    format!("{head}...{tail}")
}
