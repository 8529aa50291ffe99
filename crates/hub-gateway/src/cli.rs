//! Command-line interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use hub_settings::HubSettings;

/// Analytics Hub realtime gateway.
#[derive(Parser, Debug)]
#[command(name = "hub-gateway", about = "Analytics Hub realtime notification gateway")]
pub struct Cli {
    /// Settings file (default `~/.analytics-hub/realtime.json`).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    pub port: Option<u16>,

    /// Keep notifications and users in memory instead of `SQLite`.
    #[arg(long)]
    pub memory: bool,

    /// Emit JSON log lines.
    #[arg(long)]
    pub log_json: bool,

    /// What to do (default: serve).
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Subcommands.
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Run the realtime server.
    Serve,
    /// Add or update a user in the `SQLite` directory.
    AddUser {
        /// User id.
        user_id: String,
        /// Role name.
        #[arg(long)]
        role: String,
        /// Email address.
        #[arg(long, default_value = "")]
        email: String,
        /// Given name.
        #[arg(long, default_value = "")]
        first_name: String,
        /// Family name.
        #[arg(long, default_value = "")]
        last_name: String,
        /// Store the user as inactive.
        #[arg(long)]
        inactive: bool,
    },
    /// Grant a capability to a role.
    Grant {
        /// Role name.
        role: String,
        /// Capability name.
        capability: String,
    },
    /// Issue a session token for a user in the directory.
    Token {
        /// User id.
        user_id: String,
        /// Token lifetime in hours.
        #[arg(long, default_value_t = 12)]
        ttl_hours: i64,
    },
}

impl Cli {
    /// Apply flag overrides, the highest-priority settings layer.
    pub fn apply(&self, settings: &mut HubSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if self.log_json {
            settings.logging.json = true;
        }
    }
}
