use std::sync::Arc;

use roadpulse_core::models::{Profile, ProfileUpdate};
use roadpulse_core::profile::ProfileService;

use crate::cli::ProfileCommands;
use crate::commands::common::Session;
use crate::error::CliError;

pub async fn run_profile(
    command: ProfileCommands,
    profile: Option<&str>,
    access_token: Option<&str>,
) -> Result<(), CliError> {
    let session = Session::open(profile, access_token, true).await?;
    let service = ProfileService::new(Arc::new(session.client.clone()), session.user.clone());

    match command {
        ProfileCommands::Show { json } => {
            let Some(profile) = service.load().await? else {
                println!("No profile yet");
                return Ok(());
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&profile)?);
            } else {
                for line in format_profile(&profile) {
                    println!("{line}");
                }
            }
        }
        ProfileCommands::Update {
            username,
            avatar_url,
        } => {
            let update = profile_update_from_args(username, avatar_url)?;
            let profile = service.update(update).await?;
            for line in format_profile(&profile) {
                println!("{line}");
            }
        }
    }

    Ok(())
}

/// An empty `--avatar-url` removes the avatar.
pub fn profile_update_from_args(
    username: Option<String>,
    avatar_url: Option<String>,
) -> Result<ProfileUpdate, CliError> {
    let update = ProfileUpdate {
        username,
        avatar_url: avatar_url.map(|url| Some(url).filter(|url| !url.trim().is_empty())),
    };
    if update.is_empty() {
        return Err(CliError::EmptyProfileUpdate);
    }
    Ok(update)
}

pub fn format_profile(profile: &Profile) -> Vec<String> {
    vec![
        format!("id:       {}", profile.id),
        format!("username: {}", profile.username),
        format!(
            "avatar:   {}",
            profile.avatar_url.as_deref().unwrap_or("(none)")
        ),
        format!(
            "updated:  {}",
            profile.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
        ),
    ]
}
