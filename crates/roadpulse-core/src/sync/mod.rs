//! Realtime incident synchronization.
//!
//! `IncidentFeed` owns the local incident collection. Three sources mutate
//! it: the seed query, the change feed, and the responses to this client's
//! own writes. All of them go through `IncidentCollection::merge` under one
//! short lock that is never held across an await, so every merge runs to
//! completion before the next one starts.
//!
//! Each activation opens a new session epoch. Write responses and feed
//! events only merge while the epoch they started under is still active.

mod collection;

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

pub use collection::{IncidentCollection, MergeOutcome};

use crate::auth::UserContext;
use crate::error::{Error, Result};
use crate::models::{Comment, Incident, IncidentDraft, IncidentId, IncidentPatch, IncidentStatus};
use crate::state::IncidentsView;
use crate::store::{ChangeFeed, FeedMessage, IncidentChange, IncidentStore, SubscriptionHandle};
use crate::util::required_text;

/// Long-lived service keeping a synchronized view of all incidents.
pub struct IncidentFeed {
    store: Arc<dyn IncidentStore>,
    user: UserContext,
    shared: Arc<Shared>,
    session: Mutex<SessionSlot>,
    activation: tokio::sync::Mutex<()>,
}

impl IncidentFeed {
    pub fn new(store: Arc<dyn IncidentStore>, user: UserContext) -> Self {
        Self {
            store,
            user,
            shared: Arc::new(Shared::new()),
            session: Mutex::new(SessionSlot::default()),
            activation: tokio::sync::Mutex::new(()),
        }
    }

    /// Open the change feed and start loading incidents.
    ///
    /// Does nothing when already active. The subscription is opened before
    /// the seed query so changes made while the seed is in flight are
    /// buffered and merged afterwards. A `deactivate` issued while the
    /// subscription is still being opened wins: the new subscription is
    /// released and the feed stays inactive.
    pub async fn activate(&self) -> Result<()> {
        let _activation = self.activation.lock().await;
        let generation = {
            let slot = self.session_slot();
            if slot.current.is_some() {
                tracing::debug!("incident feed already active");
                return Ok(());
            }
            slot.generation
        };

        let ChangeFeed { events, mut handle } = self.store.subscribe_incidents().await?;

        let mut slot = self.session_slot();
        if slot.generation != generation {
            handle.unsubscribe();
            tracing::debug!("incident feed deactivated while activating");
            return Ok(());
        }
        let (epoch, seed_id) = self.shared.open_session();
        let task = tokio::spawn(pump(
            Arc::clone(&self.shared),
            Arc::clone(&self.store),
            epoch,
            seed_id,
            events,
        ));
        slot.current = Some(ActiveSession {
            epoch,
            handle,
            task,
        });
        drop(slot);

        tracing::info!(epoch, "incident feed activated");
        Ok(())
    }

    /// Release the change feed and drop the local collection.
    ///
    /// Safe to call when inactive. Writes still in flight complete for their
    /// callers but their results are no longer merged.
    pub fn deactivate(&self) {
        let session = {
            let mut slot = self.session_slot();
            slot.generation += 1;
            slot.current.take()
        };
        let Some(session) = session else {
            return;
        };
        let epoch = session.epoch;
        let _release = session;
        self.shared.close_session(epoch);
        tracing::info!(epoch, "incident feed deactivated");
    }

    pub fn is_active(&self) -> bool {
        self.session_slot().current.is_some()
    }

    /// Report a new incident as the current user.
    pub async fn report(&self, draft: IncidentDraft) -> Result<Incident> {
        let user = self.user.require("Must be logged in to report incidents")?;
        let record = draft.into_new_incident(&user.id)?;
        let epoch = self.shared.lock().active_epoch();

        let stored = self.store.insert_incident(&record).await?;
        tracing::info!(incident_id = %stored.id, "incident reported");
        self.merge_response(epoch, IncidentChange::Insert(stored.clone()));
        Ok(stored)
    }

    /// Add one like to an incident.
    ///
    /// The new count is computed from the local copy, so concurrent likes
    /// resolve last-write-wins on the server rather than adding up.
    pub async fn like(&self, id: &IncidentId) -> Result<Incident> {
        self.user.require("Must be logged in to like incidents")?;
        let (epoch, likes) = self.read_incident(id, |incident| incident.likes)?;

        let patch = IncidentPatch::likes(likes.saturating_add(1));
        let stored = self.store.update_incident(id, &patch).await?;
        self.merge_response(epoch, IncidentChange::Update(stored.clone()));
        Ok(stored)
    }

    /// Append a comment by the current user and write the full comment list.
    pub async fn comment(&self, id: &IncidentId, text: &str) -> Result<Incident> {
        let user = self.user.require("Must be logged in to comment")?;
        let text = required_text(text)
            .ok_or_else(|| Error::Validation("comment text is required".to_string()))?;
        let (epoch, mut comments) = self.read_incident(id, |incident| incident.comments.clone())?;

        comments.push(Comment::new(user.id, text));
        let stored = self
            .store
            .update_incident(id, &IncidentPatch::comments(comments))
            .await?;
        self.merge_response(epoch, IncidentChange::Update(stored.clone()));
        Ok(stored)
    }

    pub async fn update_status(&self, id: &IncidentId, status: IncidentStatus) -> Result<Incident> {
        self.user.require("Must be logged in to update incidents")?;
        let (epoch, ()) = self.read_incident(id, |_| ())?;

        let stored = self
            .store
            .update_incident(id, &IncidentPatch::status(status))
            .await?;
        self.merge_response(epoch, IncidentChange::Update(stored.clone()));
        Ok(stored)
    }

    /// Re-run the seed query and reconcile the collection with it.
    ///
    /// Records touched by other merges while the query was in flight keep
    /// their newer local state. Does nothing when inactive or when a refresh
    /// is already running.
    pub async fn refresh(&self) -> Result<()> {
        let Some((epoch, seed_id)) = self.shared.begin_seed(None, true) else {
            tracing::debug!("refresh skipped");
            return Ok(());
        };
        let result = self.store.query_incidents().await;
        self.shared.finish_seed(epoch, seed_id, result, true)
    }

    /// Current incidents, newest first.
    pub fn snapshot(&self) -> Arc<[Incident]> {
        Arc::clone(&self.shared.view.borrow().incidents)
    }

    pub fn get(&self, id: &IncidentId) -> Option<Incident> {
        self.shared.lock().collection.get(id).cloned()
    }

    pub fn view(&self) -> IncidentsView {
        self.shared.view.borrow().clone()
    }

    /// Receiver notified after every published change.
    pub fn subscribe(&self) -> watch::Receiver<IncidentsView> {
        self.shared.view.subscribe()
    }

    /// Wait until no seed query is in flight.
    pub async fn ready(&self) -> IncidentsView {
        let mut receiver = self.shared.view.subscribe();
        let view = match receiver.wait_for(|view| !view.loading).await {
            Ok(view) => view.clone(),
            Err(_) => self.view(),
        };
        view
    }

    fn read_incident<T>(
        &self,
        id: &IncidentId,
        read: impl FnOnce(&Incident) -> T,
    ) -> Result<(Option<u64>, T)> {
        let inner = self.shared.lock();
        let incident = inner
            .collection
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("incident {id}")))?;
        Ok((inner.active_epoch(), read(incident)))
    }

    fn merge_response(&self, epoch: Option<u64>, change: IncidentChange) {
        match epoch {
            Some(epoch) => {
                self.shared.apply(epoch, change);
            }
            None => tracing::debug!(incident_id = %change.id(), "feed inactive; write result not merged"),
        }
    }

    fn session_slot(&self) -> MutexGuard<'_, SessionSlot> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for IncidentFeed {
    fn drop(&mut self) {
        self.deactivate();
    }
}

#[derive(Default)]
struct SessionSlot {
    current: Option<ActiveSession>,
    /// Bumped by every `deactivate`
    generation: u64,
}

/// Resources held for one activation; released on drop.
struct ActiveSession {
    epoch: u64,
    handle: SubscriptionHandle,
    task: JoinHandle<()>,
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        self.handle.unsubscribe();
        self.task.abort();
    }
}

struct Shared {
    inner: Mutex<Inner>,
    view: watch::Sender<IncidentsView>,
}

#[derive(Default)]
struct Inner {
    collection: IncidentCollection,
    epoch: u64,
    active: bool,
    live: bool,
    error: Option<String>,
    /// Seed queries in flight, oldest first
    seeds: Vec<PendingSeed>,
    next_seed: u64,
    refreshing: bool,
}

/// A seed query in flight and the ids merged since it started.
struct PendingSeed {
    id: u64,
    touched: HashSet<IncidentId>,
}

impl Inner {
    const fn active_epoch(&self) -> Option<u64> {
        if self.active {
            Some(self.epoch)
        } else {
            None
        }
    }

    const fn accepts(&self, epoch: u64) -> bool {
        self.active && self.epoch == epoch
    }

    fn start_seed(&mut self) -> u64 {
        self.next_seed += 1;
        self.seeds.push(PendingSeed {
            id: self.next_seed,
            touched: HashSet::new(),
        });
        self.next_seed
    }

    /// Remove a finished seed, returning the ids touched while it ran.
    fn end_seed(&mut self, seed_id: u64) -> HashSet<IncidentId> {
        match self.seeds.iter().position(|seed| seed.id == seed_id) {
            Some(index) => self.seeds.remove(index).touched,
            None => HashSet::new(),
        }
    }
}

impl Shared {
    fn new() -> Self {
        let (view, _) = watch::channel(IncidentsView::default());
        Self {
            inner: Mutex::new(Inner::default()),
            view,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, inner: &Inner) {
        self.view.send_replace(IncidentsView {
            incidents: Arc::from(inner.collection.as_slice()),
            loading: !inner.seeds.is_empty(),
            error: inner.error.clone(),
            live: inner.live,
        });
    }

    /// Start a new epoch with its initial seed already registered.
    fn open_session(&self) -> (u64, u64) {
        let mut inner = self.lock();
        inner.epoch += 1;
        inner.active = true;
        inner.live = true;
        inner.error = None;
        inner.seeds.clear();
        inner.refreshing = false;
        inner.collection.clear();
        let seed_id = inner.start_seed();
        self.publish(&inner);
        (inner.epoch, seed_id)
    }

    fn close_session(&self, epoch: u64) {
        let mut inner = self.lock();
        if inner.epoch != epoch {
            return;
        }
        inner.active = false;
        inner.live = false;
        inner.seeds.clear();
        inner.refreshing = false;
        inner.collection.clear();
        self.publish(&inner);
    }

    /// Merge one change if `epoch` is still the active session.
    fn apply(&self, epoch: u64, change: IncidentChange) -> Option<MergeOutcome> {
        let mut inner = self.lock();
        if !inner.accepts(epoch) {
            tracing::debug!(epoch, incident_id = %change.id(), "discarding change from closed session");
            return None;
        }
        for seed in &mut inner.seeds {
            seed.touched.insert(change.id().clone());
        }
        let incident_id = change.id().clone();
        let outcome = inner.collection.merge(change);
        tracing::debug!(%incident_id, ?outcome, "merged incident change");
        self.publish(&inner);
        Some(outcome)
    }

    fn mark_offline(&self, epoch: u64) {
        let mut inner = self.lock();
        if inner.accepts(epoch) {
            inner.live = false;
            self.publish(&inner);
        }
    }

    /// Register a seed query. Returns its epoch and seed id, or `None` when
    /// inactive, when `only_epoch` is no longer current, or (for refreshes)
    /// when a refresh is already running.
    fn begin_seed(&self, only_epoch: Option<u64>, refresh: bool) -> Option<(u64, u64)> {
        let mut inner = self.lock();
        let epoch = inner.active_epoch()?;
        if only_epoch.is_some_and(|expected| expected != epoch) {
            return None;
        }
        if refresh {
            if inner.refreshing {
                return None;
            }
            inner.refreshing = true;
        }
        let seed_id = inner.start_seed();
        self.publish(&inner);
        Some((epoch, seed_id))
    }

    /// Reconcile a seed result. Ids merged while the query was in flight
    /// keep their local state.
    fn finish_seed(
        &self,
        epoch: u64,
        seed_id: u64,
        result: Result<Vec<Incident>>,
        refresh: bool,
    ) -> Result<()> {
        let mut inner = self.lock();
        if !inner.accepts(epoch) {
            tracing::debug!(epoch, "discarding seed result from closed session");
            return Ok(());
        }
        let preserve = inner.end_seed(seed_id);
        if refresh {
            inner.refreshing = false;
        }

        match result {
            Ok(records) => {
                let count = records.len();
                inner.collection.reconcile(records, &preserve);
                inner.error = None;
                self.publish(&inner);
                tracing::info!(count, preserved = preserve.len(), "incident seed loaded");
                Ok(())
            }
            Err(error) => {
                tracing::warn!(%error, "failed to load incidents");
                inner.error = Some(error.to_string());
                self.publish(&inner);
                Err(error)
            }
        }
    }
}

async fn seed(shared: &Shared, store: &dyn IncidentStore, epoch: u64, seed_id: u64) {
    let result = store.query_incidents().await;
    // Seed failures are kept in the view; no caller is waiting on them.
    let _ = shared.finish_seed(epoch, seed_id, result, false);
}

/// Seed the collection, then merge feed events in arrival order.
async fn pump(
    shared: Arc<Shared>,
    store: Arc<dyn IncidentStore>,
    epoch: u64,
    initial_seed: u64,
    mut events: mpsc::Receiver<FeedMessage>,
) {
    seed(&shared, store.as_ref(), epoch, initial_seed).await;

    while let Some(message) = events.recv().await {
        match message {
            FeedMessage::Change(raw) => match IncidentChange::try_from(raw) {
                Ok(change) => {
                    if shared.apply(epoch, change).is_none() {
                        return;
                    }
                }
                Err(error) => {
                    tracing::warn!(%error, "dropping malformed incident change event");
                }
            },
            FeedMessage::Reconnected => {
                tracing::info!(epoch, "change feed reconnected; reloading incidents");
                match shared.begin_seed(Some(epoch), false) {
                    Some((_, seed_id)) => seed(&shared, store.as_ref(), epoch, seed_id).await,
                    None => return,
                }
            }
        }
    }

    tracing::warn!(epoch, "incident change feed closed");
    shared.mark_offline(epoch);
}
