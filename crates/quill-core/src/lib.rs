//! quill-core: Core library for Quill
//!
//! This crate provides the administrative control plane for the quill
//! background logging service: lifecycle management, the stored/current
//! settings model, and the loopback control channel.
//!
//! # Architecture
//!
//! ```text
//! CLI verb → SettingsStore (stored/current JSON files)
//!              ↓
//!          Supervisor → host service manager (launchd / systemd)
//!              ↓
//!          ControlClient ── loopback HTTP/JSON ── ControlServer (worker)
//! ```
//!
//! # Modules
//!
//! - `settings`: stored/current settings files and effective-value display
//! - `daemon`: worker process supervision via the host service manager
//! - `control`: loopback JSON-over-HTTP liveness/shutdown protocol
//! - `worker`: the long-lived worker run path (`inner-start`)
//! - `auth`: password hashing collaborator
//! - `database`: schema bootstrap collaborator
//!
//! # Safety
//!
//! This crate forbids unsafe code.

pub mod auth;
pub mod control;
pub mod daemon;
pub mod database;
pub mod error;
pub mod settings;
pub mod worker;

pub use error::{Error, Result};

/// Version of the quill-core crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
