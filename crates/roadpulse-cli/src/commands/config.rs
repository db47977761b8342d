use std::env;

use roadpulse_core::util::{is_http_url, normalize_text_option};

use crate::cli::ConfigCommands;
use crate::commands::common::mask_secret;
use crate::config_profiles::{default_config_path, CliProfile, CliProfilesConfig};
use crate::error::CliError;

pub fn run_config(command: ConfigCommands, global_profile: Option<&str>) -> Result<(), CliError> {
    match command {
        ConfigCommands::Show => run_config_show(global_profile),
        ConfigCommands::Set {
            profile,
            supabase_url,
            supabase_anon_key,
            no_activate,
        } => run_config_set(
            profile.as_deref().or(global_profile),
            supabase_url,
            supabase_anon_key,
            no_activate,
        ),
        ConfigCommands::Path => {
            let path = default_config_path().map_err(CliError::Config)?;
            println!("{}", path.display());
            Ok(())
        }
    }
}

fn run_config_show(global_profile: Option<&str>) -> Result<(), CliError> {
    let config = CliProfilesConfig::load().map_err(CliError::Config)?;
    let profile_name = config.resolve_profile_name(global_profile);
    let profile = config.profile(&profile_name).cloned().unwrap_or_default();

    for line in describe_profile(&profile_name, &profile, |key| env::var(key).ok()) {
        println!("{line}");
    }
    Ok(())
}

/// Settings of one profile, noting values overridden by the environment.
pub fn describe_profile(
    profile_name: &str,
    profile: &CliProfile,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Vec<String> {
    let url = describe_value(
        profile.supabase_url(),
        normalize_text_option(env_lookup("SUPABASE_URL")),
        Clone::clone,
    );
    let anon_key = describe_value(
        profile.supabase_anon_key(),
        normalize_text_option(env_lookup("SUPABASE_ANON_KEY")),
        |key| mask_secret(key),
    );
    vec![
        format!("profile:           {profile_name}"),
        format!("supabase_url:      {url}"),
        format!("supabase_anon_key: {anon_key}"),
    ]
}

fn describe_value(
    stored: Option<String>,
    from_env: Option<String>,
    render: impl Fn(&String) -> String,
) -> String {
    match (stored, from_env) {
        (_, Some(value)) => format!("{} (from environment)", render(&value)),
        (Some(value), None) => render(&value),
        (None, None) => "(not set)".to_string(),
    }
}

#[allow(clippy::needless_pass_by_value)]
pub fn run_config_set(
    profile_name: Option<&str>,
    supabase_url: Option<String>,
    supabase_anon_key: Option<String>,
    no_activate: bool,
) -> Result<(), CliError> {
    let mut config = CliProfilesConfig::load().map_err(CliError::Config)?;
    let profile_name = config.resolve_profile_name(profile_name);

    let profile = config.profile_mut_or_default(&profile_name);
    apply_profile_settings(profile, supabase_url, supabase_anon_key)?;

    if !no_activate {
        config.active_profile = Some(profile_name.clone());
    }

    let path = config.save().map_err(CliError::Config)?;
    println!("Profile '{}' saved at {}", profile_name, path.display());

    let profile = config
        .profile(&profile_name)
        .ok_or_else(|| CliError::Config("Failed to persist profile".to_string()))?;
    let missing = missing_fields(profile);
    if missing.is_empty() {
        println!("Profile '{profile_name}' is ready.");
    } else {
        println!("Profile '{}' is missing: {}", profile_name, missing.join(", "));
    }

    Ok(())
}

pub fn apply_profile_settings(
    profile: &mut CliProfile,
    supabase_url: Option<String>,
    supabase_anon_key: Option<String>,
) -> Result<(), CliError> {
    if let Some(url) = normalize_text_option(supabase_url) {
        if !is_http_url(&url) {
            return Err(CliError::Config(
                "supabase_url must include http:// or https://".to_string(),
            ));
        }
        profile.supabase_url = Some(url.trim_end_matches('/').to_string());
    }
    if let Some(key) = normalize_text_option(supabase_anon_key) {
        profile.supabase_anon_key = Some(key);
    }
    Ok(())
}

pub fn missing_fields(profile: &CliProfile) -> Vec<&'static str> {
    let mut missing = Vec::new();
    if profile.supabase_url().is_none() {
        missing.push("supabase_url");
    }
    if profile.supabase_anon_key().is_none() {
        missing.push("supabase_anon_key");
    }
    missing
}
