pub mod common;
pub mod completions;
pub mod config;
pub mod incidents;
pub mod profile;
pub mod routes;

use crate::cli::{Cli, Commands};
use crate::error::CliError;

pub async fn dispatch(cli: Cli) -> Result<(), CliError> {
    let profile = cli.profile.as_deref();
    let access_token = cli.access_token.as_deref();

    match cli.command {
        Commands::Incidents { command } => {
            incidents::run_incidents(command, profile, access_token).await
        }
        Commands::Routes { command } => routes::run_routes(command, profile, access_token).await,
        Commands::Profile { command } => {
            profile::run_profile(command, profile, access_token).await
        }
        Commands::Config { command } => config::run_config(command, profile),
        Commands::Completions { shell, output } => {
            completions::run_completions(shell, output.as_deref())
        }
    }
}
