//! Read-only state published to presentation layers.

use std::sync::Arc;

use crate::models::Incident;

/// Snapshot of the incident feed as seen by the UI.
#[derive(Debug, Clone, PartialEq)]
pub struct IncidentsView {
    /// Newest first; never aliased with the live collection
    pub incidents: Arc<[Incident]>,
    /// True while any seed query is in flight
    pub loading: bool,
    /// Last seed failure, cleared by the next successful load
    pub error: Option<String>,
    /// True while a change feed is attached
    pub live: bool,
}

impl Default for IncidentsView {
    fn default() -> Self {
        Self {
            incidents: Arc::from(Vec::new()),
            loading: false,
            error: None,
            live: false,
        }
    }
}
