//! roadpulse-core - Core library for Roadpulse
//!
//! This crate contains the shared models, the Supabase backend, and the
//! incident synchronization logic used by Roadpulse front ends (CLI, mobile).

pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod profile;
pub mod routes;
pub mod state;
pub mod store;
pub mod supabase;
pub mod sync;
pub mod util;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
pub use models::{Incident, IncidentId};
pub use state::IncidentsView;
pub use sync::IncidentFeed;
