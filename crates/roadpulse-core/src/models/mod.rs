//! Data models for Roadpulse

mod comment;
mod geo;
mod incident;
mod profile;
mod route;

pub use comment::{Comment, CommentId};
pub use geo::GeoPoint;
pub use incident::{
    Incident, IncidentDraft, IncidentId, IncidentPatch, IncidentStatus, NewIncident, Severity,
};
pub use profile::{Profile, ProfileUpdate};
pub use route::{NewRoute, RouteDraft, RouteId, SavedRoute};
