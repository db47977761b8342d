//! Authenticated user context shared by the data services.
//!
//! Sign-in flows live outside this crate; callers hand over an access token
//! and the user it belongs to, and every service reads the current user from
//! the same `UserContext`.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Cheaply cloneable handle to the current signed-in user, if any.
#[derive(Clone, Default)]
pub struct UserContext {
    user: Arc<RwLock<Option<AuthUser>>>,
}

impl UserContext {
    /// A context with nobody signed in.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn signed_in(user: AuthUser) -> Self {
        let context = Self::default();
        context.set_user(Some(user));
        context
    }

    pub fn set_user(&self, user: Option<AuthUser>) {
        match &user {
            Some(user) => tracing::info!(user_id = %user.id, "user context signed in"),
            None => tracing::info!("user context signed out"),
        }
        *self.user.write().unwrap_or_else(PoisonError::into_inner) = user;
    }

    pub fn current(&self) -> Option<AuthUser> {
        self.user
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The current user, or `AuthRequired` carrying `reason`.
    pub fn require(&self, reason: &'static str) -> Result<AuthUser> {
        self.current().ok_or(Error::AuthRequired(reason))
    }
}

impl fmt::Debug for UserContext {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("UserContext")
            .field("user", &self.current())
            .finish()
    }
}
