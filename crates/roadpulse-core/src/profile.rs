//! Profile of the signed-in user.

use std::sync::Arc;

use crate::auth::UserContext;
use crate::error::{Error, Result};
use crate::models::{Profile, ProfileUpdate};
use crate::store::ProfileStore;
use crate::util::{is_http_url, normalize_text_option};

pub struct ProfileService {
    store: Arc<dyn ProfileStore>,
    user: UserContext,
}

impl ProfileService {
    pub fn new(store: Arc<dyn ProfileStore>, user: UserContext) -> Self {
        Self { store, user }
    }

    /// Fetch the current user's profile; `None` if no row exists yet.
    pub async fn load(&self) -> Result<Option<Profile>> {
        let user = self.user.require("Must be logged in to view your profile")?;
        self.store.fetch_profile(&user.id).await
    }

    /// Change the username and/or avatar.
    ///
    /// Usernames are trimmed and must not be empty. A blank avatar URL
    /// clears the avatar; any other value must be an http(s) URL.
    pub async fn update(&self, update: ProfileUpdate) -> Result<Profile> {
        let user = self.user.require("Must be logged in to update your profile")?;
        let update = normalize_update(update)?;

        let profile = self.store.update_profile(&user.id, &update).await?;
        tracing::info!(user_id = %user.id, "profile updated");
        Ok(profile)
    }
}

fn normalize_update(update: ProfileUpdate) -> Result<ProfileUpdate> {
    if update.is_empty() {
        return Err(Error::Validation("nothing to update".to_string()));
    }

    let username = match update.username {
        Some(username) => Some(
            normalize_text_option(Some(username))
                .ok_or_else(|| Error::Validation("username must not be empty".to_string()))?,
        ),
        None => None,
    };

    let avatar_url = match update.avatar_url {
        Some(avatar_url) => {
            let avatar_url = normalize_text_option(avatar_url);
            if let Some(url) = &avatar_url {
                if !is_http_url(url) {
                    return Err(Error::Validation(
                        "avatar URL must start with http:// or https://".to_string(),
                    ));
                }
            }
            Some(avatar_url)
        }
        None => None,
    };

    Ok(ProfileUpdate {
        username,
        avatar_url,
    })
}
