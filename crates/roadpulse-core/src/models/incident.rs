//! Incident model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{Comment, GeoPoint};
use crate::error::{Error, Result};
use crate::util::{normalize_text_option, required_text};

/// Remote-assigned incident identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IncidentId(String);

impl IncidentId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IncidentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IncidentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for IncidentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
}

impl Severity {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl FromStr for Severity {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(Error::Validation(format!("unknown severity '{other}'"))),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of an incident.
///
/// The column is free text; values other than `active` and `resolved` are
/// kept verbatim so a single unexpected row does not fail a whole query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum IncidentStatus {
    #[default]
    Active,
    Resolved,
    Other(String),
}

impl IncidentStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Active => "active",
            Self::Resolved => "resolved",
            Self::Other(value) => value,
        }
    }
}

impl From<String> for IncidentStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "active" => Self::Active,
            "resolved" => Self::Resolved,
            _ => Self::Other(value),
        }
    }
}

impl From<IncidentStatus> for String {
    fn from(status: IncidentStatus) -> Self {
        match status {
            IncidentStatus::Other(value) => value,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A traffic incident as stored in the `incidents` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: IncidentId,
    /// Free-text category tag (accident, construction, ...)
    #[serde(rename = "type")]
    pub category: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub location: GeoPoint,
    pub severity: Severity,
    #[serde(default)]
    pub status: IncidentStatus,
    /// Reporting user's identifier
    #[serde(default)]
    pub reported_by: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub likes: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub comments: Vec<Comment>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// User-supplied fields for a new incident report
#[derive(Debug, Clone, PartialEq)]
pub struct IncidentDraft {
    pub category: String,
    pub title: String,
    pub description: Option<String>,
    pub location: GeoPoint,
    pub severity: Severity,
    pub status: IncidentStatus,
}

impl IncidentDraft {
    pub fn new(category: impl Into<String>, title: impl Into<String>, location: GeoPoint) -> Self {
        Self {
            category: category.into(),
            title: title.into(),
            description: None,
            location,
            severity: Severity::default(),
            status: IncidentStatus::default(),
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub const fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Validate the draft and attach the reporting user.
    pub fn into_new_incident(self, reported_by: &str) -> Result<NewIncident> {
        let category = required_text(&self.category)
            .ok_or_else(|| Error::Validation("incident type is required".to_string()))?;
        let title = required_text(&self.title)
            .ok_or_else(|| Error::Validation("incident title is required".to_string()))?;

        Ok(NewIncident {
            category,
            title,
            description: normalize_text_option(self.description),
            location: self.location,
            severity: self.severity,
            status: self.status,
            reported_by: reported_by.to_string(),
        })
    }
}

/// Insert payload for the `incidents` table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewIncident {
    #[serde(rename = "type")]
    pub category: String,
    pub title: String,
    pub description: Option<String>,
    pub location: GeoPoint,
    pub severity: Severity,
    pub status: IncidentStatus,
    pub reported_by: String,
}

/// Partial update for an incident; only set fields are written.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IncidentPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub likes: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments: Option<Vec<Comment>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<IncidentStatus>,
}

impl IncidentPatch {
    pub const fn likes(likes: u32) -> Self {
        Self {
            likes: Some(likes),
            comments: None,
            status: None,
        }
    }

    pub const fn comments(comments: Vec<Comment>) -> Self {
        Self {
            likes: None,
            comments: Some(comments),
            status: None,
        }
    }

    pub const fn status(status: IncidentStatus) -> Self {
        Self {
            likes: None,
            comments: None,
            status: Some(status),
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
