//! In-memory backend used by the unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::{mpsc, watch, Notify};

use crate::auth::{AuthUser, UserContext};
use crate::error::{Error, Result};
use crate::models::{
    GeoPoint, Incident, IncidentId, IncidentPatch, IncidentStatus, NewIncident, NewRoute, Profile,
    ProfileUpdate, RouteId, SavedRoute, Severity,
};
use crate::store::{
    ChangeFeed, ChangeKind, FeedMessage, IncidentStore, ProfileStore, RawChange, RouteStore,
    SubscriptionHandle,
};

pub fn at(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(seconds, 0).single().expect("valid timestamp")
}

pub fn incident(id: &str, created_at: i64) -> Incident {
    Incident {
        id: IncidentId::from(id),
        category: "accident".to_string(),
        title: format!("Incident {id}"),
        description: None,
        location: GeoPoint::new(-73.9857, 40.7484).expect("valid point"),
        severity: Severity::Medium,
        status: IncidentStatus::Active,
        reported_by: None,
        likes: 0,
        comments: Vec::new(),
        created_at: at(created_at),
        updated_at: at(created_at),
    }
}

pub fn signed_in() -> UserContext {
    UserContext::signed_in(AuthUser {
        id: "user-1".to_string(),
        email: Some("driver@example.com".to_string()),
    })
}

/// Pauses a store call until the test opens it.
#[derive(Default)]
pub struct Gate {
    entered: Notify,
    release: Notify,
}

impl Gate {
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub fn open(&self) {
        self.release.notify_one();
    }

    async fn pass(&self) {
        self.entered.notify_one();
        self.release.notified().await;
    }
}

struct Subscriber {
    sender: mpsc::Sender<FeedMessage>,
    shutdown: watch::Receiver<bool>,
}

struct FakeState {
    incidents: Vec<Incident>,
    routes: Vec<SavedRoute>,
    profiles: Vec<Profile>,
    next_id: u64,
    clock: i64,
    fail_writes: Option<String>,
    fail_query: Option<String>,
    fail_subscribe: bool,
    echo_writes: bool,
    insert_gate: Option<Arc<Gate>>,
    query_gate: Option<Arc<Gate>>,
    subscribe_gate: Option<Arc<Gate>>,
}

pub struct FakeStore {
    state: Mutex<FakeState>,
    subscribers: Mutex<Vec<Subscriber>>,
    subscribe_calls: AtomicUsize,
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        Self::with_incidents(Vec::new())
    }

    pub fn with_incidents(incidents: Vec<Incident>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeState {
                incidents,
                routes: Vec::new(),
                profiles: Vec::new(),
                next_id: 1,
                clock: 1_000,
                fail_writes: None,
                fail_query: None,
                fail_subscribe: false,
                echo_writes: false,
                insert_gate: None,
                query_gate: None,
                subscribe_gate: None,
            }),
            subscribers: Mutex::new(Vec::new()),
            subscribe_calls: AtomicUsize::new(0),
        })
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn fail_writes(&self, message: Option<&str>) {
        self.state().fail_writes = message.map(ToString::to_string);
    }

    pub fn fail_query(&self, message: Option<&str>) {
        self.state().fail_query = message.map(ToString::to_string);
    }

    pub fn fail_subscribe(&self, fail: bool) {
        self.state().fail_subscribe = fail;
    }

    /// Also publish every successful write on the change feed.
    pub fn echo_writes(&self, echo: bool) {
        self.state().echo_writes = echo;
    }

    pub fn gate_inserts(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        self.state().insert_gate = Some(Arc::clone(&gate));
        gate
    }

    pub fn gate_queries(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        self.state().query_gate = Some(Arc::clone(&gate));
        gate
    }

    /// Pause the next subscribe call only.
    pub fn gate_subscribes(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        self.state().subscribe_gate = Some(Arc::clone(&gate));
        gate
    }

    /// Change the stored rows without notifying subscribers.
    pub fn put_row(&self, incident: Incident) {
        let mut state = self.state();
        state.incidents.retain(|row| row.id != incident.id);
        state.incidents.push(incident);
    }

    pub fn remove_row(&self, id: &str) {
        self.state().incidents.retain(|row| row.id.as_str() != id);
    }

    pub fn add_route(&self, route: SavedRoute) {
        self.state().routes.push(route);
    }

    pub fn add_profile(&self, profile: Profile) {
        self.state().profiles.push(profile);
    }

    pub fn route_count(&self) -> usize {
        self.state().routes.len()
    }

    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    pub fn active_subscriptions(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|subscriber| !*subscriber.shutdown.borrow())
            .count()
    }

    pub async fn emit(&self, message: FeedMessage) {
        let senders: Vec<mpsc::Sender<FeedMessage>> = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|subscriber| !*subscriber.shutdown.borrow())
            .map(|subscriber| subscriber.sender.clone())
            .collect();
        for sender in senders {
            let _ = sender.send(message.clone()).await;
        }
    }

    pub async fn emit_insert(&self, incident: &Incident) {
        self.emit(row_change(ChangeKind::Insert, incident)).await;
    }

    pub async fn emit_update(&self, incident: &Incident) {
        self.emit(row_change(ChangeKind::Update, incident)).await;
    }

    pub async fn emit_delete(&self, id: &str) {
        self.emit(FeedMessage::Change(RawChange {
            kind: ChangeKind::Delete,
            record: None,
            old_record: Some(serde_json::json!({ "id": id })),
        }))
        .await;
    }

    fn tick(state: &mut FakeState) -> DateTime<Utc> {
        state.clock += 1;
        at(state.clock)
    }

    fn write_failure(&self) -> Result<()> {
        self.state()
            .fail_writes
            .clone()
            .map_or(Ok(()), |message| Err(Error::Remote(message)))
    }

    async fn echo(&self, kind: ChangeKind, incident: &Incident) {
        let echo = self.state().echo_writes;
        if echo {
            self.emit(row_change(kind, incident)).await;
        }
    }
}

fn row_change(kind: ChangeKind, incident: &Incident) -> FeedMessage {
    FeedMessage::Change(RawChange {
        kind,
        record: Some(serde_json::to_value(incident).expect("incident serializes")),
        old_record: None,
    })
}

#[async_trait]
impl IncidentStore for FakeStore {
    async fn query_incidents(&self) -> Result<Vec<Incident>> {
        let gate = self.state().query_gate.clone();
        if let Some(gate) = gate {
            gate.pass().await;
        }

        let state = self.state();
        if let Some(message) = &state.fail_query {
            return Err(Error::Remote(message.clone()));
        }
        let mut rows = state.incidents.clone();
        rows.sort_by(|left, right| right.created_at.cmp(&left.created_at));
        Ok(rows)
    }

    async fn insert_incident(&self, record: &NewIncident) -> Result<Incident> {
        let gate = self.state().insert_gate.clone();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        self.write_failure()?;

        let stored = {
            let mut state = self.state();
            let now = Self::tick(&mut state);
            let id = format!("srv-{}", state.next_id);
            state.next_id += 1;
            let stored = Incident {
                id: IncidentId::from(id),
                category: record.category.clone(),
                title: record.title.clone(),
                description: record.description.clone(),
                location: record.location,
                severity: record.severity,
                status: record.status.clone(),
                reported_by: Some(record.reported_by.clone()),
                likes: 0,
                comments: Vec::new(),
                created_at: now,
                updated_at: now,
            };
            state.incidents.push(stored.clone());
            stored
        };

        self.echo(ChangeKind::Insert, &stored).await;
        Ok(stored)
    }

    async fn update_incident(&self, id: &IncidentId, patch: &IncidentPatch) -> Result<Incident> {
        self.write_failure()?;

        let stored = {
            let mut state = self.state();
            let now = Self::tick(&mut state);
            let row = state
                .incidents
                .iter_mut()
                .find(|row| &row.id == id)
                .ok_or_else(|| {
                    Error::Remote("JSON object requested, multiple (or no) rows returned (406)".to_string())
                })?;
            if let Some(likes) = patch.likes {
                row.likes = likes;
            }
            if let Some(comments) = &patch.comments {
                row.comments.clone_from(comments);
            }
            if let Some(status) = &patch.status {
                row.status.clone_from(status);
            }
            row.updated_at = now;
            row.clone()
        };

        self.echo(ChangeKind::Update, &stored).await;
        Ok(stored)
    }

    async fn subscribe_incidents(&self) -> Result<ChangeFeed> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        if self.state().fail_subscribe {
            return Err(Error::Realtime("channel join rejected".to_string()));
        }
        let gate = self.state().subscribe_gate.take();
        if let Some(gate) = gate {
            gate.pass().await;
        }

        let (sender, events) = mpsc::channel(64);
        let (handle, shutdown) = SubscriptionHandle::new();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscriber { sender, shutdown });
        Ok(ChangeFeed { events, handle })
    }
}

#[async_trait]
impl RouteStore for FakeStore {
    async fn list_routes(&self, user_id: &str) -> Result<Vec<SavedRoute>> {
        let mut routes: Vec<SavedRoute> = self
            .state()
            .routes
            .iter()
            .filter(|route| route.user_id == user_id)
            .cloned()
            .collect();
        routes.sort_by(|left, right| right.created_at.cmp(&left.created_at));
        Ok(routes)
    }

    async fn insert_route(&self, record: &NewRoute) -> Result<SavedRoute> {
        self.write_failure()?;
        let mut state = self.state();
        let now = Self::tick(&mut state);
        let route = SavedRoute {
            id: RouteId::from(format!("route-{}", state.next_id).as_str()),
            name: record.name.clone(),
            start_location: record.start_location,
            end_location: record.end_location,
            user_id: record.user_id.clone(),
            created_at: now,
            updated_at: now,
        };
        state.next_id += 1;
        state.routes.push(route.clone());
        Ok(route)
    }

    async fn delete_route(&self, id: &RouteId) -> Result<()> {
        self.write_failure()?;
        self.state().routes.retain(|route| &route.id != id);
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for FakeStore {
    async fn fetch_profile(&self, user_id: &str) -> Result<Option<Profile>> {
        Ok(self
            .state()
            .profiles
            .iter()
            .find(|profile| profile.id == user_id)
            .cloned())
    }

    async fn update_profile(&self, user_id: &str, update: &ProfileUpdate) -> Result<Profile> {
        self.write_failure()?;
        let mut state = self.state();
        let now = Self::tick(&mut state);
        let profile = state
            .profiles
            .iter_mut()
            .find(|profile| profile.id == user_id)
            .ok_or_else(|| Error::Remote("no profile row (406)".to_string()))?;
        if let Some(username) = &update.username {
            profile.username.clone_from(username);
        }
        if let Some(avatar_url) = &update.avatar_url {
            profile.avatar_url.clone_from(avatar_url);
        }
        profile.updated_at = now;
        Ok(profile.clone())
    }
}
