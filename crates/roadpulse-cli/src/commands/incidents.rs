use chrono::Utc;
use roadpulse_core::models::{Incident, IncidentDraft, IncidentStatus};

use crate::cli::IncidentCommands;
use crate::commands::common::{
    describe_changes, format_incident_line, format_incident_lines, incident_to_list_item,
    load_feed, resolve_incident_id, IncidentListItem, Session,
};
use crate::error::CliError;

pub async fn run_incidents(
    command: IncidentCommands,
    profile: Option<&str>,
    access_token: Option<&str>,
) -> Result<(), CliError> {
    match command {
        IncidentCommands::List {
            limit,
            status,
            json,
        } => {
            let session = Session::open(profile, access_token, false).await?;
            run_list(&session, limit, status.map(Into::into), json).await
        }
        IncidentCommands::Watch { json } => {
            let session = Session::open(profile, access_token, false).await?;
            run_watch(&session, json).await
        }
        IncidentCommands::Report {
            category,
            title,
            description,
            severity,
            at,
        } => {
            let session = Session::open(profile, access_token, true).await?;
            let mut draft = IncidentDraft::new(category, title, at).with_severity(severity.into());
            if let Some(description) = description {
                draft = draft.with_description(description);
            }
            let incident = session.feed().report(draft).await?;
            println!("{}", incident.id);
            Ok(())
        }
        IncidentCommands::Like { id } => {
            let session = Session::open(profile, access_token, true).await?;
            let feed = session.feed();
            let id = resolve_incident_id(&id, &load_feed(&feed).await?)?;
            let incident = feed.like(&id).await?;
            println!("{}  {} likes", incident.id, incident.likes);
            Ok(())
        }
        IncidentCommands::Comment { id, text } => {
            let session = Session::open(profile, access_token, true).await?;
            let feed = session.feed();
            let id = resolve_incident_id(&id, &load_feed(&feed).await?)?;
            let incident = feed.comment(&id, &text.join(" ")).await?;
            println!("{}  {} comments", incident.id, incident.comments.len());
            Ok(())
        }
        IncidentCommands::Resolve { id } => {
            let session = Session::open(profile, access_token, true).await?;
            let feed = session.feed();
            let id = resolve_incident_id(&id, &load_feed(&feed).await?)?;
            let incident = feed.update_status(&id, IncidentStatus::Resolved).await?;
            println!("{}  {}", incident.id, incident.status);
            Ok(())
        }
    }
}

async fn run_list(
    session: &Session,
    limit: usize,
    status: Option<IncidentStatus>,
    as_json: bool,
) -> Result<(), CliError> {
    let feed = session.feed();
    let incidents = select_incidents(load_feed(&feed).await?, status, limit);
    feed.deactivate();

    let now = Utc::now();
    if as_json {
        let items = incidents
            .iter()
            .map(|incident| incident_to_list_item(incident, now))
            .collect::<Vec<IncidentListItem>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else if incidents.is_empty() {
        println!("No incidents");
    } else {
        for line in format_incident_lines(&incidents, now) {
            println!("{line}");
        }
    }
    Ok(())
}

pub fn select_incidents(
    incidents: Vec<Incident>,
    status: Option<IncidentStatus>,
    limit: usize,
) -> Vec<Incident> {
    incidents
        .into_iter()
        .filter(|incident| status.as_ref().is_none_or(|status| &incident.status == status))
        .take(limit)
        .collect()
}

async fn run_watch(session: &Session, as_json: bool) -> Result<(), CliError> {
    let feed = session.feed();
    let mut previous = load_feed(&feed).await?;
    let mut updates = feed.subscribe();

    let now = Utc::now();
    for incident in &previous {
        print_incident(incident, as_json, now)?;
    }
    tracing::info!(count = previous.len(), "watching for incident changes");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = updates.borrow_and_update().clone();
                let current = view.incidents.to_vec();
                report_changes(&previous, &current, as_json)?;
                if let Some(error) = view.error {
                    tracing::warn!(%error, "incident reload failed");
                }
                previous = current;
            }
        }
    }

    feed.deactivate();
    tracing::debug!("incident watch stopped");
    Ok(())
}

fn report_changes(previous: &[Incident], current: &[Incident], as_json: bool) -> Result<(), CliError> {
    let now = Utc::now();
    if !as_json {
        for line in describe_changes(previous, current, now) {
            println!("{line}");
        }
        return Ok(());
    }

    for incident in current {
        if previous.iter().all(|old| old != incident) {
            print_incident(incident, true, now)?;
        }
    }
    for incident in previous {
        if current.iter().all(|new| new.id != incident.id) {
            println!("{}", serde_json::json!({ "id": incident.id, "deleted": true }));
        }
    }
    Ok(())
}

fn print_incident(incident: &Incident, as_json: bool, now: chrono::DateTime<Utc>) -> Result<(), CliError> {
    if as_json {
        println!("{}", serde_json::to_string(&incident_to_list_item(incident, now))?);
    } else {
        println!("{}", format_incident_line(incident, now));
    }
    Ok(())
}
