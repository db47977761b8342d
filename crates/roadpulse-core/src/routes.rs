//! Saved routes for the signed-in user.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::auth::UserContext;
use crate::error::Result;
use crate::models::{RouteDraft, RouteId, SavedRoute};
use crate::store::RouteStore;

/// The current user's saved routes, newest first.
pub struct RouteBook {
    store: Arc<dyn RouteStore>,
    user: UserContext,
    routes: Mutex<Vec<SavedRoute>>,
}

impl RouteBook {
    pub fn new(store: Arc<dyn RouteStore>, user: UserContext) -> Self {
        Self {
            store,
            user,
            routes: Mutex::new(Vec::new()),
        }
    }

    /// Replace the local list with the user's routes from the store.
    pub async fn load(&self) -> Result<Vec<SavedRoute>> {
        let user = self.user.require("Must be logged in to view saved routes")?;
        let mut routes = self.store.list_routes(&user.id).await?;
        sort_newest_first(&mut routes);
        tracing::debug!(count = routes.len(), "loaded saved routes");
        self.routes().clone_from(&routes);
        Ok(routes)
    }

    pub async fn save(&self, draft: RouteDraft) -> Result<SavedRoute> {
        let user = self.user.require("Must be logged in to save routes")?;
        let record = draft.into_new_route(&user.id)?;

        let stored = self.store.insert_route(&record).await?;
        tracing::info!(route_id = %stored.id, "route saved");
        let mut routes = self.routes();
        routes.retain(|route| route.id != stored.id);
        routes.push(stored.clone());
        sort_newest_first(&mut routes);
        Ok(stored)
    }

    pub async fn delete(&self, id: &RouteId) -> Result<()> {
        self.user.require("Must be logged in to delete routes")?;
        self.store.delete_route(id).await?;
        tracing::info!(route_id = %id, "route deleted");
        self.routes().retain(|route| &route.id != id);
        Ok(())
    }

    /// Routes as of the last load or write.
    pub fn list(&self) -> Vec<SavedRoute> {
        self.routes().clone()
    }

    fn routes(&self) -> MutexGuard<'_, Vec<SavedRoute>> {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn sort_newest_first(routes: &mut [SavedRoute]) {
    routes.sort_by(|left, right| {
        right
            .created_at
            .cmp(&left.created_at)
            .then_with(|| left.id.as_str().cmp(right.id.as_str()))
    });
}
