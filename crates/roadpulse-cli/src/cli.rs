use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use roadpulse_core::models::{GeoPoint, IncidentStatus, Severity};

#[derive(Parser)]
#[command(name = "roadpulse")]
#[command(about = "Live road incident reports from the command line")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// CLI profile name holding the Supabase project settings
    #[arg(long, global = true, value_name = "NAME")]
    pub profile: Option<String>,

    /// Access token of the signed-in Supabase user (never stored)
    #[arg(
        long,
        global = true,
        value_name = "TOKEN",
        env = "ROADPULSE_ACCESS_TOKEN",
        hide_env_values = true
    )]
    pub access_token: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Browse, watch and report incidents
    Incidents {
        #[command(subcommand)]
        command: IncidentCommands,
    },
    /// Manage saved routes
    Routes {
        #[command(subcommand)]
        command: RouteCommands,
    },
    /// Show or update your profile
    Profile {
        #[command(subcommand)]
        command: ProfileCommands,
    },
    /// Configure CLI profiles
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum IncidentCommands {
    /// List incidents, newest first
    #[command(alias = "ls")]
    List {
        /// Number of incidents to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Only show incidents with this status
        #[arg(long, value_enum)]
        status: Option<StatusArg>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print incidents and follow live changes until interrupted
    Watch {
        /// Output each change as a JSON line
        #[arg(long)]
        json: bool,
    },
    /// Report a new incident
    Report {
        /// Category tag, e.g. accident, construction, hazard
        #[arg(long = "type", value_name = "TYPE")]
        category: String,
        /// Short headline
        #[arg(long)]
        title: String,
        /// Optional details
        #[arg(long)]
        description: Option<String>,
        #[arg(long, value_enum, default_value_t = SeverityArg::Medium)]
        severity: SeverityArg,
        /// Location as "longitude,latitude"
        #[arg(long, value_name = "LON,LAT", value_parser = parse_point, allow_hyphen_values = true)]
        at: GeoPoint,
    },
    /// Add a like to an incident
    Like {
        /// Incident ID or unique ID prefix
        id: String,
    },
    /// Comment on an incident
    Comment {
        /// Incident ID or unique ID prefix
        id: String,
        /// Comment text
        #[arg(required = true)]
        text: Vec<String>,
    },
    /// Mark an incident as resolved
    Resolve {
        /// Incident ID or unique ID prefix
        id: String,
    },
}

#[derive(Subcommand)]
pub enum RouteCommands {
    /// List your saved routes
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Save a route between two points
    Save {
        /// Route name
        name: String,
        /// Start as "longitude,latitude"
        #[arg(long, value_name = "LON,LAT", value_parser = parse_point, allow_hyphen_values = true)]
        from: GeoPoint,
        /// End as "longitude,latitude"
        #[arg(long, value_name = "LON,LAT", value_parser = parse_point, allow_hyphen_values = true)]
        to: GeoPoint,
    },
    /// Delete a saved route
    Delete {
        /// Route ID
        id: String,
    },
}

#[derive(Subcommand)]
pub enum ProfileCommands {
    /// Show your profile
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Change username or avatar
    Update {
        #[arg(long)]
        username: Option<String>,
        /// Avatar image URL; pass an empty string to remove it
        #[arg(long, value_name = "URL")]
        avatar_url: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the resolved profile settings
    Show,
    /// Create or update a profile
    Set {
        /// Profile name to write (defaults to the active profile)
        #[arg(long, value_name = "NAME")]
        profile: Option<String>,
        /// Supabase project URL
        #[arg(long, value_name = "URL")]
        supabase_url: Option<String>,
        /// Supabase anon/public key
        #[arg(long, value_name = "KEY")]
        supabase_anon_key: Option<String>,
        /// Keep current active profile instead of activating this one
        #[arg(long)]
        no_activate: bool,
    },
    /// Print the config file location
    Path,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum SeverityArg {
    Low,
    Medium,
    High,
}

impl From<SeverityArg> for Severity {
    fn from(value: SeverityArg) -> Self {
        match value {
            SeverityArg::Low => Self::Low,
            SeverityArg::Medium => Self::Medium,
            SeverityArg::High => Self::High,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum StatusArg {
    Active,
    Resolved,
}

impl From<StatusArg> for IncidentStatus {
    fn from(value: StatusArg) -> Self {
        match value {
            StatusArg::Active => Self::Active,
            StatusArg::Resolved => Self::Resolved,
        }
    }
}

/// Parse `"longitude,latitude"`.
pub fn parse_point(value: &str) -> Result<GeoPoint, String> {
    let Some((longitude, latitude)) = value.split_once(',') else {
        return Err(format!("expected LON,LAT but got '{value}'"));
    };
    let longitude = longitude
        .trim()
        .parse::<f64>()
        .map_err(|error| format!("invalid longitude: {error}"))?;
    let latitude = latitude
        .trim()
        .parse::<f64>()
        .map_err(|error| format!("invalid latitude: {error}"))?;
    GeoPoint::new(longitude, latitude)
}
