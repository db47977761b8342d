use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] roadpulse_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Not signed in. Pass --access-token or set ROADPULSE_ACCESS_TOKEN.")]
    NotSignedIn,
    #[error("Incident ID cannot be empty")]
    EmptyIncidentId,
    #[error("Incident not found for id/prefix: {0}")]
    IncidentNotFound(String),
    #[error("{0}")]
    AmbiguousIncidentId(String),
    #[error("Failed to load incidents: {0}")]
    FeedUnavailable(String),
    #[error("Nothing to update; pass --username and/or --avatar-url")]
    EmptyProfileUpdate,
}
