use std::sync::Arc;

use chrono::Utc;
use roadpulse_core::models::{RouteDraft, RouteId};
use roadpulse_core::routes::RouteBook;

use crate::cli::RouteCommands;
use crate::commands::common::{format_route_lines, Session};
use crate::error::CliError;

pub async fn run_routes(
    command: RouteCommands,
    profile: Option<&str>,
    access_token: Option<&str>,
) -> Result<(), CliError> {
    let session = Session::open(profile, access_token, true).await?;
    let book = RouteBook::new(Arc::new(session.client.clone()), session.user.clone());

    match command {
        RouteCommands::List { json } => {
            let routes = book.load().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&routes)?);
            } else if routes.is_empty() {
                println!("No saved routes");
            } else {
                for line in format_route_lines(&routes, Utc::now()) {
                    println!("{line}");
                }
            }
        }
        RouteCommands::Save { name, from, to } => {
            let route = book.save(RouteDraft::new(name, from, to)).await?;
            println!("{}", route.id);
        }
        RouteCommands::Delete { id } => {
            let id = RouteId::from(id.trim());
            book.delete(&id).await?;
            println!("{id}");
        }
    }

    Ok(())
}
