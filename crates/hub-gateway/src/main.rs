//! # hub-gateway
//!
//! Analytics Hub realtime gateway binary. Loads settings, wires the
//! collaborators (`SQLite` or in-memory), and serves the realtime hub.

#![deny(unsafe_code)]

mod cli;
mod telemetry;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use hub_auth::JwtIdentityProvider;
use hub_core::memory::{MemoryDirectory, MemoryNotificationStore, StaticIdentityProvider};
use hub_core::{Clock, DisplayIdentity, IdentityProvider, SystemClock, UserId};
use hub_realtime::{HubDeps, RealtimeConfig, RealtimeHub, RealtimeServer, ServerConfig};
use hub_settings::HubSettings;
use hub_store::{ConnectionConfig, ConnectionPool, SqliteDirectory, SqliteNotificationStore};
use tracing::{info, warn};

use crate::cli::{Cli, Command};

/// Token accepted by the in-memory identity table when no JWT secret is set.
const DEV_TOKEN: &str = "dev";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings_path = cli.config.clone().unwrap_or_else(hub_settings::settings_path);
    let mut settings = hub_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    cli.apply(&mut settings);
    settings.validate().context("Invalid settings")?;

    telemetry::init(&settings.logging);
    info!(version = env!("CARGO_PKG_VERSION"), path = %settings_path.display(), "hub-gateway starting");

    let base_dir = settings_path
        .parent()
        .map_or_else(hub_settings::settings_dir, Path::to_path_buf);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(settings, &base_dir, cli.memory).await,
        Command::AddUser {
            user_id,
            role,
            email,
            first_name,
            last_name,
            inactive,
        } => {
            let directory = SqliteDirectory::new(open_store(&settings, &base_dir)?);
            let display = DisplayIdentity {
                email,
                first_name,
                last_name,
                role_name: role,
            };
            directory
                .upsert_user(&UserId::from(user_id.as_str()), &display, !inactive)
                .await
                .context("Failed to store user")?;
            println!("stored user {user_id}");
            Ok(())
        }
        Command::Grant { role, capability } => {
            let directory = SqliteDirectory::new(open_store(&settings, &base_dir)?);
            directory
                .grant(&role, &capability)
                .await
                .context("Failed to grant capability")?;
            println!("granted {capability} to {role}");
            Ok(())
        }
        Command::Token { user_id, ttl_hours } => {
            if settings.auth.jwt_secret.is_empty() {
                bail!("auth.jwtSecret (or HUB_JWT_SECRET) must be set to issue tokens");
            }
            let directory = SqliteDirectory::new(open_store(&settings, &base_dir)?);
            let identity = directory
                .identity(&UserId::from(user_id.as_str()))
                .await
                .context("Failed to look up user")?
                .with_context(|| format!("Unknown user: {user_id}"))?;
            let token = hub_auth::issue_token(
                &settings.auth.jwt_secret,
                &identity,
                chrono::Duration::hours(ttl_hours),
            )?;
            println!("{token}");
            Ok(())
        }
    }
}

async fn serve(settings: HubSettings, base_dir: &Path, memory: bool) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let deps = if memory {
        memory_deps(&settings, &clock)?
    } else {
        sqlite_deps(&settings, base_dir, &clock)?
    };

    let metrics = hub_realtime::metrics::install_recorder().context("Failed to install metrics recorder")?;
    let hub = Arc::new(RealtimeHub::new(deps, RealtimeConfig::from_settings(&settings), clock));
    let server = RealtimeServer::new(ServerConfig::from_settings(&settings), hub).with_metrics(metrics);

    let handle = server.listen().await.context("Failed to bind server")?;
    info!(addr = %handle.local_addr(), "realtime gateway listening on ws://{}/ws", handle.local_addr());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    info!("shutting down");
    let report = handle.shutdown(None).await;
    info!(
        timed_out = report.timed_out,
        sessions_remaining = report.sessions_remaining,
        "shutdown complete"
    );
    Ok(())
}

fn jwt_provider(settings: &HubSettings) -> Result<Option<Arc<dyn IdentityProvider>>> {
    if settings.auth.jwt_secret.is_empty() {
        return Ok(None);
    }
    let provider = JwtIdentityProvider::new(&settings.auth.jwt_secret)?;
    Ok(Some(Arc::new(provider)))
}

fn sqlite_deps(settings: &HubSettings, base_dir: &Path, clock: &Arc<dyn Clock>) -> Result<HubDeps> {
    let Some(identity) = jwt_provider(settings)? else {
        bail!("auth.jwtSecret (or HUB_JWT_SECRET) is required with the SQLite backend; use --memory for a local run");
    };
    let pool = open_store(settings, base_dir)?;
    let directory = Arc::new(SqliteDirectory::new(pool.clone()));
    Ok(HubDeps {
        identity,
        permissions: directory.clone(),
        directory,
        store: Arc::new(SqliteNotificationStore::with_clock(pool, clock.clone())),
    })
}

fn memory_deps(settings: &HubSettings, clock: &Arc<dyn Clock>) -> Result<HubDeps> {
    let directory = Arc::new(MemoryDirectory::new());
    directory.grant("admin", settings.auth.realtime_capability.clone());

    let identity = if let Some(jwt) = jwt_provider(settings)? {
        jwt
    } else {
        let user = UserId::from("dev");
        directory.add_user(
            user.clone(),
            DisplayIdentity {
                email: "dev@localhost".into(),
                first_name: "Dev".into(),
                last_name: "User".into(),
                role_name: "admin".into(),
            },
            true,
        );
        let table = StaticIdentityProvider::new();
        if let Some(identity) = directory.identity(&user) {
            table.insert(DEV_TOKEN, identity);
        }
        warn!(token = DEV_TOKEN, "no JWT secret set, accepting the development token only");
        Arc::new(table)
    };

    Ok(HubDeps {
        identity,
        permissions: directory.clone(),
        directory,
        store: Arc::new(MemoryNotificationStore::with_clock(clock.clone())),
    })
}

fn open_store(settings: &HubSettings, base_dir: &Path) -> Result<ConnectionPool> {
    let db_path = resolve_db_path(base_dir, &settings.store.db_path);
    ensure_parent_dir(&db_path)?;
    let config = ConnectionConfig {
        pool_size: settings.store.pool_size,
        ..ConnectionConfig::default()
    };
    let pool = hub_store::open_pool(&db_path.to_string_lossy(), &config)
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;
    info!(path = %db_path.display(), "notification store ready");
    Ok(pool)
}

fn resolve_db_path(base_dir: &Path, db_path: &str) -> PathBuf {
    let path = Path::new(db_path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}
