//! Stored and current administrative settings.
//!
//! Two JSON files live under the settings directory:
//!
//! - `quill.json` — the persisted ("stored") settings used as defaults for
//!   the next start. Always carries a non-empty listening address and a
//!   password hash after [`SettingsStore::bootstrap`] has run.
//! - `session.json` — the ("current") settings actually in effect for a
//!   running worker, written by the worker immediately before it binds its
//!   listener.
//!
//! The split lets an operator change settings without disturbing a running
//! instance, and lets the CLI show drift between what is configured and what
//! is actually running (see [`effective_value`]).
//!
//! No locking is taken on the directory; concurrent CLI invocations racing
//! on the same files can interleave writes.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::auth;

/// Default port the worker listens on.
pub const DEFAULT_PORT: &str = "3030";

/// Default listening address (all interfaces, default port).
pub const DEFAULT_ADDRESS: &str = ":3030";

/// Default settings directory.
pub const SETTINGS_DIR: &str = "/etc/quill.d";

/// Environment variable overriding the settings directory.
pub const ENV_SETTINGS_DIR: &str = "QUILL_HOME";

/// Password written by `bootstrap` on first run.
const DEFAULT_PASSWORD: &str = "quill";

const STORED_FILE: &str = "quill.json";
const CURRENT_FILE: &str = "session.json";

/// Errors that can occur while reading or writing settings files.
#[derive(Error, Debug)]
pub enum SettingsError {
    /// The settings directory or stored file does not exist yet.
    #[error("settings not initialized (missing {path}); run any quill command to bootstrap")]
    NotInitialized { path: String },

    /// A settings file exists but cannot be parsed.
    #[error("corrupt settings file {path}: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    /// Filesystem failure during read or write.
    #[error("settings I/O error: {0}")]
    Io(#[from] io::Error),

    /// Hashing the default password during bootstrap failed.
    #[error("failed to hash default password: {0}")]
    DefaultPassword(#[from] crate::auth::AuthError),
}

/// Persisted source of truth for the next start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSettings {
    /// Administrative password hash (bcrypt digest, never plaintext).
    pub password: String,
    /// Listening address, `[host]:port`.
    pub address: String,
    /// Database connection descriptor, `user:password@host[:port]`.
    #[serde(default)]
    pub database: String,
}

/// Snapshot of what a running worker actually uses.
///
/// Written by the worker right before it binds, so the file always reflects
/// the live process. Carries no credential field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentSettings {
    /// Listening address in effect.
    pub address: String,
    /// Database connection descriptor in effect.
    #[serde(default)]
    pub database: String,
}

/// On-disk envelope wrapping a configuration record with the writing version.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope<T> {
    version: String,
    configuration: T,
}

/// Owner of the on-disk settings files.
///
/// Nothing else writes `quill.json` or `session.json`.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    dir: PathBuf,
}

impl SettingsStore {
    /// Create a store rooted at an explicit directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Create a store at `$QUILL_HOME`, falling back to `/etc/quill.d`.
    pub fn from_env() -> Self {
        let dir = std::env::var_os(ENV_SETTINGS_DIR)
            .map_or_else(|| PathBuf::from(SETTINGS_DIR), PathBuf::from);
        Self { dir }
    }

    /// The settings directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Initialize the settings directory on first run.
    ///
    /// Creates the directory if absent and writes a default stored record
    /// (default address, hashed default password, empty database descriptor)
    /// if `quill.json` is absent. Idempotent: an existing stored file is
    /// never overwritten.
    pub fn bootstrap(&self) -> Result<(), SettingsError> {
        fs::create_dir_all(&self.dir)?;

        let stored_path = self.dir.join(STORED_FILE);
        if stored_path.exists() {
            return Ok(());
        }

        let defaults = StoredSettings {
            password: auth::hash_password(DEFAULT_PASSWORD)?,
            address: DEFAULT_ADDRESS.to_string(),
            database: String::new(),
        };
        self.write(STORED_FILE, &defaults)?;
        tracing::info!(
            path = %stored_path.display(),
            address = DEFAULT_ADDRESS,
            "Wrote default stored settings"
        );
        Ok(())
    }

    /// Read the stored settings.
    pub fn load_stored(&self) -> Result<StoredSettings, SettingsError> {
        self.read(STORED_FILE)
    }

    /// Overwrite the stored settings.
    pub fn save_stored(&self, settings: &StoredSettings) -> Result<(), SettingsError> {
        self.write(STORED_FILE, settings)
    }

    /// Read the current (live-instance) settings.
    pub fn load_current(&self) -> Result<CurrentSettings, SettingsError> {
        self.read(CURRENT_FILE)
    }

    /// Overwrite the current (live-instance) settings.
    pub fn save_current(&self, settings: &CurrentSettings) -> Result<(), SettingsError> {
        self.write(CURRENT_FILE, settings)
    }

    fn read<T: DeserializeOwned>(&self, file: &str) -> Result<T, SettingsError> {
        let path = self.dir.join(file);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(SettingsError::NotInitialized {
                    path: path.display().to_string(),
                });
            }
            Err(e) => return Err(SettingsError::Io(e)),
        };

        let envelope: Envelope<T> =
            serde_json::from_str(&contents).map_err(|source| SettingsError::Corrupt {
                path: path.display().to_string(),
                source,
            })?;
        Ok(envelope.configuration)
    }

    fn write<T: Serialize>(&self, file: &str, configuration: &T) -> Result<(), SettingsError> {
        let path = self.dir.join(file);
        let envelope = Envelope {
            version: crate::VERSION.to_string(),
            configuration,
        };
        // Full overwrite; serialization of our own records cannot fail.
        let json = serde_json::to_string_pretty(&envelope).map_err(|source| {
            SettingsError::Corrupt {
                path: path.display().to_string(),
                source,
            }
        })?;
        fs::write(&path, json)?;
        tracing::debug!(path = %path.display(), "Wrote settings file");
        Ok(())
    }
}

/// Reconcile a stored value with the current one for display.
///
/// Returns the stored value always, plus the current value as an "in use"
/// overlay exactly when the worker is running and the two differ under
/// case-insensitive comparison. Stored case is preserved on disk; the
/// comparison is display-only.
#[must_use]
pub fn effective_value<'a>(
    stored: &'a str,
    current: &'a str,
    is_running: bool,
) -> (&'a str, Option<&'a str>) {
    let differs = stored.to_lowercase() != current.to_lowercase();
    if is_running && differs {
        (stored, Some(current))
    } else {
        (stored, None)
    }
}

/// Strip the credential segment from a connection descriptor for display.
///
/// `user:password@host:5432` becomes `user@host:5432`. An empty descriptor
/// renders as `undefined`. Descriptors without a credential segment pass
/// through unchanged.
#[must_use]
pub fn redact_connection(descriptor: &str) -> String {
    if descriptor.is_empty() {
        return "undefined".to_string();
    }
    match (descriptor.find(':'), descriptor.find('@')) {
        (Some(colon), Some(at)) if colon < at => {
            format!("{}@{}", &descriptor[..colon], &descriptor[at + 1..])
        }
        _ => descriptor.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, SettingsStore) {
        let tmp = TempDir::new().unwrap();
        let store = SettingsStore::new(tmp.path());
        (tmp, store)
    }

    #[test]
    fn load_before_bootstrap_is_not_initialized() {
        let (_tmp, store) = store();
        let result = store.load_stored();
        assert!(matches!(result, Err(SettingsError::NotInitialized { .. })));
    }

    #[test]
    fn bootstrap_writes_defaults() {
        let (_tmp, store) = store();
        store.bootstrap().unwrap();

        let stored = store.load_stored().unwrap();
        assert_eq!(stored.address, DEFAULT_ADDRESS);
        assert!(stored.database.is_empty());
        assert!(!stored.password.is_empty());
        assert!(auth::verify_password(DEFAULT_PASSWORD, &stored.password).unwrap());
    }

    #[test]
    fn bootstrap_never_overwrites() {
        let (_tmp, store) = store();
        store.bootstrap().unwrap();

        let mut stored = store.load_stored().unwrap();
        stored.address = "127.0.0.1:9999".to_string();
        store.save_stored(&stored).unwrap();

        store.bootstrap().unwrap();
        assert_eq!(store.load_stored().unwrap().address, "127.0.0.1:9999");
    }

    #[test]
    fn stored_settings_round_trip() {
        let (_tmp, store) = store();
        let settings = StoredSettings {
            password: "$2b$12$abcdefghijklmnopqrstuv".to_string(),
            address: "LocalHost:4040".to_string(),
            database: "user:pw@db:5432".to_string(),
        };
        store.save_stored(&settings).unwrap();
        assert_eq!(store.load_stored().unwrap(), settings);
    }

    #[test]
    fn current_settings_round_trip() {
        let (_tmp, store) = store();
        let settings = CurrentSettings {
            address: ":4040".to_string(),
            database: String::new(),
        };
        store.save_current(&settings).unwrap();
        assert_eq!(store.load_current().unwrap(), settings);
    }

    #[test]
    fn current_file_carries_no_password_field() {
        let (tmp, store) = store();
        store
            .save_current(&CurrentSettings {
                address: ":3030".to_string(),
                database: "user:pw@db".to_string(),
            })
            .unwrap();
        let raw = std::fs::read_to_string(tmp.path().join("session.json")).unwrap();
        assert!(!raw.contains("password"));
        assert!(raw.contains("version"));
    }

    #[test]
    fn corrupt_file_is_reported_as_corrupt() {
        let (tmp, store) = store();
        std::fs::write(tmp.path().join("quill.json"), "{not json").unwrap();
        let result = store.load_stored();
        assert!(matches!(result, Err(SettingsError::Corrupt { .. })));
    }

    #[test]
    fn effective_value_no_overlay_when_stopped() {
        let (primary, overlay) = effective_value(":3030", ":4040", false);
        assert_eq!(primary, ":3030");
        assert!(overlay.is_none());
    }

    #[test]
    fn effective_value_no_overlay_when_equal_case_insensitive() {
        let (primary, overlay) = effective_value("LocalHost:3030", "localhost:3030", true);
        assert_eq!(primary, "LocalHost:3030");
        assert!(overlay.is_none());
    }

    #[test]
    fn effective_value_overlay_when_running_and_different() {
        let (primary, overlay) = effective_value(":3030", ":4040", true);
        assert_eq!(primary, ":3030");
        assert_eq!(overlay, Some(":4040"));
    }

    #[test]
    fn redact_strips_credential_segment() {
        assert_eq!(redact_connection("user:pw@host:5432"), "user@host:5432");
    }

    #[test]
    fn redact_empty_descriptor_is_undefined() {
        assert_eq!(redact_connection(""), "undefined");
    }

    #[test]
    fn redact_passes_through_without_credentials() {
        assert_eq!(redact_connection("host:5432"), "host:5432");
        assert_eq!(redact_connection("user@host"), "user@host");
    }
}
