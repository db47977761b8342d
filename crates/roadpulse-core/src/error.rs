//! Error types for roadpulse-core

use thiserror::Error;

/// Result type alias using roadpulse-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in roadpulse-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// The action needs a signed-in user and none is present
    #[error("Sign in required: {0}")]
    AuthRequired(&'static str),

    /// Caller-supplied input failed a precondition
    #[error("Invalid input: {0}")]
    Validation(String),

    /// The targeted record is not in the local collection
    #[error("Not found: {0}")]
    NotFound(String),

    /// The remote store rejected the request
    #[error("Remote store error: {0}")]
    Remote(String),

    /// The remote store could not be reached
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Realtime channel failure
    #[error("Realtime error: {0}")]
    Realtime(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Client configuration is missing or malformed
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl Error {
    /// Whether this error came from talking to the remote store.
    pub const fn is_remote_failure(&self) -> bool {
        matches!(
            self,
            Self::Remote(_) | Self::Http(_) | Self::Realtime(_) | Self::Serialization(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_failures_are_grouped() {
        assert!(Error::Remote("boom (500)".to_string()).is_remote_failure());
        assert!(Error::Realtime("closed".to_string()).is_remote_failure());
        assert!(!Error::AuthRequired("sign in").is_remote_failure());
        assert!(!Error::Validation("title".to_string()).is_remote_failure());
        assert!(!Error::NotFound("1".to_string()).is_remote_failure());
    }

    #[test]
    fn remote_message_is_passed_through() {
        let error = Error::Remote("new row violates row-level security policy (403)".to_string());
        assert_eq!(
            error.to_string(),
            "Remote store error: new row violates row-level security policy (403)"
        );
    }
}
