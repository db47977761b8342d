//! Remote data-store seam.
//!
//! The services in this crate only talk to the backend through these traits.
//! `crate::supabase::SupabaseClient` is the production implementation.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};

use crate::error::{Error, Result};
use crate::models::{
    Incident, IncidentId, IncidentPatch, NewIncident, NewRoute, Profile, ProfileUpdate, RouteId,
    SavedRoute,
};

/// Remote operations on the `incidents` table.
#[async_trait]
pub trait IncidentStore: Send + Sync {
    /// All incidents, newest first.
    async fn query_incidents(&self) -> Result<Vec<Incident>>;

    /// Insert and return the stored row with server-assigned id/timestamps.
    async fn insert_incident(&self, record: &NewIncident) -> Result<Incident>;

    /// Write only the fields set in `patch` and return the full row.
    async fn update_incident(&self, id: &IncidentId, patch: &IncidentPatch) -> Result<Incident>;

    /// Open a change stream over the `incidents` table.
    async fn subscribe_incidents(&self) -> Result<ChangeFeed>;
}

/// Remote operations on the `routes` table.
#[async_trait]
pub trait RouteStore: Send + Sync {
    /// A user's saved routes, newest first.
    async fn list_routes(&self, user_id: &str) -> Result<Vec<SavedRoute>>;
    async fn insert_route(&self, record: &NewRoute) -> Result<SavedRoute>;
    async fn delete_route(&self, id: &RouteId) -> Result<()>;
}

/// Remote operations on the `profiles` table.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn fetch_profile(&self, user_id: &str) -> Result<Option<Profile>>;
    async fn update_profile(&self, user_id: &str, update: &ProfileUpdate) -> Result<Profile>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A change notification as delivered by the backend, rows still untyped.
#[derive(Debug, Clone, PartialEq)]
pub struct RawChange {
    pub kind: ChangeKind,
    pub record: Option<Value>,
    pub old_record: Option<Value>,
}

/// Messages delivered on a change feed, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    Change(RawChange),
    /// The stream was interrupted and has resumed; changes may have been missed.
    Reconnected,
}

/// A live change stream plus the handle that tears it down.
#[derive(Debug)]
pub struct ChangeFeed {
    pub events: mpsc::Receiver<FeedMessage>,
    pub handle: SubscriptionHandle,
}

/// Owner side of a subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct SubscriptionHandle {
    shutdown: Option<watch::Sender<bool>>,
}

impl SubscriptionHandle {
    /// Create a handle and the shutdown signal the producer should watch.
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (shutdown, signal) = watch::channel(false);
        (
            Self {
                shutdown: Some(shutdown),
            },
            signal,
        )
    }

    /// Signal the producer to stop. Safe to call more than once.
    pub fn unsubscribe(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            shutdown.send_replace(true);
            tracing::debug!("change feed unsubscribed");
        }
    }

    pub const fn is_subscribed(&self) -> bool {
        self.shutdown.is_some()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// A decoded change to the incident collection.
#[derive(Debug, Clone, PartialEq)]
pub enum IncidentChange {
    Insert(Incident),
    Update(Incident),
    Delete(IncidentId),
}

impl IncidentChange {
    pub const fn id(&self) -> &IncidentId {
        match self {
            Self::Insert(incident) | Self::Update(incident) => &incident.id,
            Self::Delete(id) => id,
        }
    }
}

#[derive(Deserialize)]
struct RowKey {
    id: IncidentId,
}

impl TryFrom<RawChange> for IncidentChange {
    type Error = Error;

    fn try_from(change: RawChange) -> Result<Self> {
        match change.kind {
            ChangeKind::Insert | ChangeKind::Update => {
                let record = change.record.ok_or_else(|| {
                    Error::Validation("change event is missing its record".to_string())
                })?;
                let incident: Incident = serde_json::from_value(record)?;
                Ok(if change.kind == ChangeKind::Insert {
                    Self::Insert(incident)
                } else {
                    Self::Update(incident)
                })
            }
            ChangeKind::Delete => {
                let old_record = change.old_record.ok_or_else(|| {
                    Error::Validation("delete event is missing its old record".to_string())
                })?;
                let key: RowKey = serde_json::from_value(old_record)?;
                Ok(Self::Delete(key.id))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row() -> Value {
        json!({
            "id": "a1",
            "type": "construction",
            "title": "Lane closure",
            "location": { "type": "Point", "coordinates": [4.9, 52.37] },
            "severity": "low",
            "status": "active",
            "likes": 3,
            "comments": [],
            "created_at": "2024-05-01T08:00:00Z",
            "updated_at": "2024-05-01T08:00:00Z"
        })
    }

    #[test]
    fn decodes_insert_and_update() {
        let insert = IncidentChange::try_from(RawChange {
            kind: ChangeKind::Insert,
            record: Some(row()),
            old_record: None,
        })
        .unwrap();
        assert!(matches!(&insert, IncidentChange::Insert(incident) if incident.likes == 3));

        let update = IncidentChange::try_from(RawChange {
            kind: ChangeKind::Update,
            record: Some(row()),
            old_record: Some(json!({ "id": "a1" })),
        })
        .unwrap();
        assert_eq!(update.id().as_str(), "a1");
        assert!(matches!(update, IncidentChange::Update(_)));
    }

    #[test]
    fn decodes_delete_from_old_record() {
        let delete = IncidentChange::try_from(RawChange {
            kind: ChangeKind::Delete,
            record: Some(json!({})),
            old_record: Some(json!({ "id": "a1" })),
        })
        .unwrap();
        assert_eq!(delete, IncidentChange::Delete(IncidentId::from("a1")));
    }

    #[test]
    fn rejects_malformed_payloads() {
        let missing = RawChange {
            kind: ChangeKind::Insert,
            record: None,
            old_record: None,
        };
        assert!(IncidentChange::try_from(missing).is_err());

        let mut broken = row();
        broken["severity"] = json!(7);
        let malformed = RawChange {
            kind: ChangeKind::Update,
            record: Some(broken),
            old_record: None,
        };
        assert!(IncidentChange::try_from(malformed).is_err());
    }

    #[test]
    fn change_kind_parses_realtime_casing() {
        let kind: ChangeKind = serde_json::from_str(r#""DELETE""#).unwrap();
        assert_eq!(kind, ChangeKind::Delete);
    }

    #[tokio::test]
    async fn dropping_handle_signals_shutdown() {
        let (handle, mut signal) = SubscriptionHandle::new();
        assert!(handle.is_subscribed());
        drop(handle);
        signal.changed().await.ok();
        assert!(*signal.borrow());
    }
}
