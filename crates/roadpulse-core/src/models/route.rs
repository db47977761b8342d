//! Saved route model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::GeoPoint;
use crate::error::{Error, Result};
use crate::util::required_text;

/// Remote-assigned saved route identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteId(String);

impl RouteId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RouteId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A named start/end pair the user saved for later
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedRoute {
    pub id: RouteId,
    pub name: String,
    pub start_location: GeoPoint,
    pub end_location: GeoPoint,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouteDraft {
    pub name: String,
    pub start_location: GeoPoint,
    pub end_location: GeoPoint,
}

impl RouteDraft {
    pub fn new(name: impl Into<String>, start_location: GeoPoint, end_location: GeoPoint) -> Self {
        Self {
            name: name.into(),
            start_location,
            end_location,
        }
    }

    pub fn into_new_route(self, user_id: &str) -> Result<NewRoute> {
        let name = required_text(&self.name)
            .ok_or_else(|| Error::Validation("route name is required".to_string()))?;
        Ok(NewRoute {
            name,
            start_location: self.start_location,
            end_location: self.end_location,
            user_id: user_id.to_string(),
        })
    }
}

/// Insert payload for the `routes` table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewRoute {
    pub name: String,
    pub start_location: GeoPoint,
    pub end_location: GeoPoint,
    pub user_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draft_requires_name() {
        let start = GeoPoint::new(2.35, 48.85).unwrap();
        let end = GeoPoint::new(2.29, 48.86).unwrap();
        let draft = RouteDraft::new(" ", start, end);
        assert!(matches!(draft.into_new_route("u1"), Err(Error::Validation(_))));

        let route = RouteDraft::new(" Commute ", start, end)
            .into_new_route("u1")
            .unwrap();
        assert_eq!(route.name, "Commute");
        assert_eq!(route.user_id, "u1");
    }
}
