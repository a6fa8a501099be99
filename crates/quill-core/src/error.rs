//! Crate-level error type.
//!
//! Each module defines its own `thiserror` enum; this wrapper lets the worker
//! run path and the CLI facade propagate any of them with `?`. The facade
//! formats user-facing messages; the core only returns typed failures.

use thiserror::Error;

use crate::auth::AuthError;
use crate::control::ControlError;
use crate::daemon::DaemonError;
use crate::database::DatabaseError;
use crate::settings::SettingsError;

/// Any failure produced by quill-core.
#[derive(Error, Debug)]
pub enum Error {
    /// Settings file failure.
    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// Supervisor / service-manager failure.
    #[error(transparent)]
    Daemon(#[from] DaemonError),

    /// Control-channel failure.
    #[error(transparent)]
    Control(#[from] ControlError),

    /// Password hashing failure.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Database bootstrap failure.
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Convenience result alias for quill-core operations.
pub type Result<T> = std::result::Result<T, Error>;
