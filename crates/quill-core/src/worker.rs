//! Worker run path, entered through the hidden `inner-start` verb.
//!
//! Startup order is a contract:
//!
//! 1. load stored settings;
//! 2. overlay explicit CLI overrides into the current settings;
//! 3. write `session.json` **before** binding, so the file always reflects
//!    what the running process will actually use;
//! 4. run the database schema bootstrap (abort on failure);
//! 5. bind the listener and serve the control channel until a stop request
//!    completes the shutdown handshake.

use crate::control::ControlServer;
use crate::database;
use crate::settings::{CurrentSettings, SettingsStore};
use crate::{Result, VERSION};

/// Explicit runtime overrides that apply only to this run.
#[derive(Debug, Default, Clone)]
pub struct WorkerOverrides {
    /// Listening address override (`--addr`).
    pub address: Option<String>,
    /// Database descriptor override (`--db`).
    pub database: Option<String>,
}

/// Run the worker to completion.
///
/// Returns once a stop request has been acknowledged, or with an error when
/// startup cannot proceed.
pub async fn run(store: &SettingsStore, overrides: WorkerOverrides) -> Result<()> {
    let stored = store.load_stored()?;
    let current = CurrentSettings {
        address: overrides.address.unwrap_or_else(|| stored.address.clone()),
        database: overrides.database.unwrap_or_else(|| stored.database.clone()),
    };

    store.save_current(&current)?;
    tracing::info!(
        address = %current.address,
        "Worker starting"
    );

    if current.database.is_empty() {
        tracing::warn!("No database configured; skipping schema bootstrap");
    } else {
        database::ensure_schema(&current.database, VERSION).await?;
    }

    let server = ControlServer::bind(&current.address).await?;
    server.serve().await?;
    tracing::info!("Worker exiting after stop request");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{ControlClient, StopOutcome};
    use crate::settings::StoredSettings;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Pick a port that is free at bind time.
    async fn free_loopback_addr() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        addr
    }

    #[tokio::test]
    async fn worker_writes_current_before_serving_and_honors_stop() {
        let tmp = TempDir::new().unwrap();
        let store = SettingsStore::new(tmp.path());
        store
            .save_stored(&StoredSettings {
                password: "digest".to_string(),
                address: ":3030".to_string(),
                database: String::new(),
            })
            .unwrap();

        let addr = free_loopback_addr().await;
        let overrides = WorkerOverrides {
            address: Some(addr.clone()),
            database: None,
        };
        let worker_store = store.clone();
        let worker = tokio::spawn(async move { run(&worker_store, overrides).await });

        // Launch-and-return: the caller gets no readiness signal, so poll.
        let client = ControlClient::new(&addr).unwrap();
        let mut alive = false;
        for _ in 0..50 {
            if client.probe().await {
                alive = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(alive, "worker never became reachable");

        // session.json reflects the overridden address, not the stored one.
        let current = store.load_current().unwrap();
        assert_eq!(current.address, addr);

        match client.stop().await.unwrap() {
            StopOutcome::Acknowledged(_) => {}
            StopOutcome::AlreadyStopped => panic!("expected acknowledgement from live worker"),
        }
        worker.await.unwrap().unwrap();
        assert!(!client.probe().await);
    }
}
