//! Command facade: translates CLI verbs into calls on the core components.
//!
//! This layer owns all user-facing formatting. Core errors propagate here
//! unchanged and abort the command with a non-zero exit; the one deliberate
//! exception is the control channel's connection-failure-is-success policy
//! on stop, which the core already applies.

use anyhow::Result;

use quill_core::control::{ControlClient, StopOutcome};
use quill_core::daemon::{DaemonError, PlatformManager, Supervisor, platform_manager};
use quill_core::settings::{self, CurrentSettings, SettingsError, SettingsStore};
use quill_core::worker::{self, WorkerOverrides};
use quill_core::{VERSION, auth};

use crate::Command;

/// Execute a parsed command against a bootstrapped settings store.
pub async fn run(command: Command) -> Result<()> {
    let store = SettingsStore::from_env();
    store.bootstrap()?;
    tracing::debug!(dir = %store.dir().display(), "Using settings directory");

    match command {
        Command::State => state(&store).await,
        Command::SetPass => set_pass(&store),
        Command::SetAddr { address, restart } => set_addr(&store, address, restart).await,
        Command::GetAddr => get_addr(&store).await,
        Command::SetDb {
            descriptor,
            restart,
        } => set_db(&store, descriptor, restart).await,
        Command::GetDb => get_db(&store).await,
        Command::Start {
            addr,
            db,
            restart,
            save,
        } => start(&store, addr, db, restart, save).await,
        Command::Stop => stop(&store).await,
        Command::InnerStart { addr, db } => {
            worker::run(
                &store,
                WorkerOverrides {
                    address: addr,
                    database: db,
                },
            )
            .await?;
            Ok(())
        }
    }
}

/// Read `session.json` if a worker has ever written one.
///
/// Only the file's absence is the normal "no instance launched yet" state;
/// a corrupt or unreadable file propagates and aborts the command rather
/// than silently hiding what a running instance actually uses.
fn load_current_if_any(store: &SettingsStore) -> Result<Option<CurrentSettings>> {
    match store.load_current() {
        Ok(current) => Ok(Some(current)),
        Err(SettingsError::NotInitialized { .. }) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn supervisor(store: &SettingsStore) -> Result<Supervisor<PlatformManager>> {
    let exe = std::env::current_exe()?;
    let manager = platform_manager(exe, store.dir().join("log"));
    Ok(Supervisor::new(manager))
}

async fn state(store: &SettingsStore) -> Result<()> {
    let stored = store.load_stored()?;
    let current = load_current_if_any(store)?;

    println!("quill version {VERSION}");

    let pid = supervisor(store)?.identity().await?;
    match pid {
        Some(pid) => println!("State: running (pid {pid})"),
        None => println!("State: stopped"),
    }

    let probe_addr = current
        .as_ref()
        .map_or(stored.address.as_str(), |c| c.address.as_str());
    let client = ControlClient::new(probe_addr)?;
    let answering = if client.probe().await {
        "answering"
    } else {
        "not answering"
    };
    println!("Control channel: {answering}");

    let running = pid.is_some();
    println!(
        "Listening address: {}",
        render_effective(
            &stored.address,
            current.as_ref().map(|c| c.address.as_str()),
            running,
        )
    );
    println!(
        "Database: {}",
        render_database(
            &stored.database,
            current.as_ref().map(|c| c.database.as_str()),
            running,
        )
    );
    Ok(())
}

fn set_pass(store: &SettingsStore) -> Result<()> {
    let password = dialoguer::Password::new()
        .with_prompt("New administrative password")
        .interact()?;

    let mut stored = store.load_stored()?;
    stored.password = auth::hash_password(&password)?;
    store.save_stored(&stored)?;
    println!("Administrative password saved");
    Ok(())
}

async fn set_addr(store: &SettingsStore, address: String, restart: bool) -> Result<()> {
    let mut stored = store.load_stored()?;
    stored.address = address;
    store.save_stored(&stored)?;
    println!("Listening address saved");

    // The save above is durable even if this restart fails.
    restart_if_running(store, restart).await
}

async fn get_addr(store: &SettingsStore) -> Result<()> {
    let stored = store.load_stored()?;
    let current = load_current_if_any(store)?;
    let running = supervisor(store)?.is_running().await?;

    println!(
        "Listening address: {}",
        render_effective(
            &stored.address,
            current.as_ref().map(|c| c.address.as_str()),
            running,
        )
    );
    Ok(())
}

async fn set_db(store: &SettingsStore, descriptor: String, restart: bool) -> Result<()> {
    let mut stored = store.load_stored()?;
    stored.database = descriptor;
    store.save_stored(&stored)?;
    println!("Database connection saved");

    restart_if_running(store, restart).await
}

async fn get_db(store: &SettingsStore) -> Result<()> {
    let stored = store.load_stored()?;
    let current = load_current_if_any(store)?;
    let running = supervisor(store)?.is_running().await?;

    println!(
        "Database: {}",
        render_database(
            &stored.database,
            current.as_ref().map(|c| c.database.as_str()),
            running,
        )
    );
    Ok(())
}

async fn start(
    store: &SettingsStore,
    addr: Option<String>,
    db: Option<String>,
    restart: bool,
    save: bool,
) -> Result<()> {
    if save {
        let mut stored = store.load_stored()?;
        if let Some(addr) = &addr {
            stored.address = addr.clone();
        }
        if let Some(db) = &db {
            stored.database = db.clone();
        }
        store.save_stored(&stored)?;
    }

    let mut extra = Vec::new();
    if let Some(addr) = addr {
        extra.push("--addr".to_string());
        extra.push(addr);
    }
    if let Some(db) = db {
        extra.push("--db".to_string());
        extra.push(db);
    }

    let supervisor = supervisor(store)?;
    if supervisor.is_running().await? {
        if restart {
            supervisor.restart(&extra).await?;
            println!("Service restarted");
        } else {
            println!("Service is already running (use -r to restart)");
        }
    } else {
        supervisor.start(&extra).await?;
        println!("Service started");
    }
    Ok(())
}

async fn stop(store: &SettingsStore) -> Result<()> {
    let stored = store.load_stored()?;
    let address =
        load_current_if_any(store)?.map_or(stored.address, |current| current.address);

    let client = ControlClient::new(&address)?;
    match client.stop().await? {
        StopOutcome::Acknowledged(response) => println!("Response: {response}"),
        StopOutcome::AlreadyStopped => println!("Service stopped"),
    }

    // Clear the service-manager entry; an unknown entry is already the
    // desired end state.
    match supervisor(store)?.stop().await {
        Ok(()) | Err(DaemonError::NotRunning) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn restart_if_running(store: &SettingsStore, restart: bool) -> Result<()> {
    if !restart {
        return Ok(());
    }
    let supervisor = supervisor(store)?;
    if supervisor.is_running().await? {
        supervisor.restart(&[]).await?;
        println!("Service restarted");
    }
    Ok(())
}

/// Render a stored value with its "in use" overlay when a running instance
/// diverges from it.
fn render_effective(stored: &str, current: Option<&str>, running: bool) -> String {
    match current {
        Some(current) => {
            let (primary, overlay) = settings::effective_value(stored, current, running);
            match overlay {
                Some(overlay) => format!("{primary} (in use: {overlay})"),
                None => primary.to_string(),
            }
        }
        None => stored.to_string(),
    }
}

/// As [`render_effective`], with credentials stripped from both values.
fn render_database(stored: &str, current: Option<&str>, running: bool) -> String {
    match current {
        Some(current) => {
            let (primary, overlay) = settings::effective_value(stored, current, running);
            match overlay {
                Some(overlay) => format!(
                    "{} (in use: {})",
                    settings::redact_connection(primary),
                    settings::redact_connection(overlay)
                ),
                None => settings::redact_connection(primary),
            }
        }
        None => settings::redact_connection(stored),
    }
}
