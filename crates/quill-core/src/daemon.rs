//! Worker process supervision via the host service manager.
//!
//! The supervisor owns no persistent state: every CLI invocation re-derives
//! liveness and the worker's PID from the service manager's own bookkeeping
//! at call time, so there is no local "lock file says running" state to go
//! stale.
//!
//! The manager invocation and its free-form listing output are isolated
//! behind the [`ServiceManager`] trait so the pattern and the host-specific
//! commands can be swapped per platform without touching the supervisor's
//! public contract:
//!
//! - [`LaunchdManager`] (macOS): `launchctl submit` / `remove` / `list`
//! - [`SystemdManager`] (Linux): `systemd-run --user` / `systemctl stop` /
//!   `systemctl show --property=MainPID`

use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

/// Bound on every service-manager invocation.
const MANAGER_TIMEOUT_SECS: u64 = 10;

/// Hidden CLI verb the worker is launched with.
const WORKER_VERB: &str = "inner-start";

/// Errors from supervision operations.
#[derive(Error, Debug)]
pub enum DaemonError {
    /// The worker process could not be launched.
    #[error("failed to launch worker: {0}")]
    Spawn(String),

    /// Stop/restart targeted a service the manager does not know about.
    #[error("service is not running")]
    NotRunning,

    /// The host service manager reported a failure.
    #[error("service manager failure: {0}")]
    Manager(String),

    /// The service-manager binary itself is not available.
    #[error("service manager not available: {0}")]
    ManagerUnavailable(String),

    /// The service manager did not answer in time.
    #[error("service manager timed out after {0}s")]
    Timeout(u64),
}

/// Host service-manager backend.
///
/// Implementations translate the three primitive operations into concrete
/// manager commands. All are stateless.
#[allow(async_fn_in_trait)]
pub trait ServiceManager {
    /// Register and launch the worker, passing `extra_args` through to the
    /// worker's command line. Returns once the launch request is accepted;
    /// never waits for the worker to be ready.
    async fn submit(&self, extra_args: &[String]) -> Result<(), DaemonError>;

    /// Unregister the worker entry, terminating it.
    async fn remove(&self) -> Result<(), DaemonError>;

    /// The worker's PID according to the manager's listing, or `None` when
    /// the entry is absent or has no live process. Both are normal
    /// "not running" states, not failures.
    async fn query_pid(&self) -> Result<Option<u32>, DaemonError>;
}

/// Stateless facade composing lifecycle operations over a backend.
pub struct Supervisor<M: ServiceManager> {
    manager: M,
}

impl<M: ServiceManager> Supervisor<M> {
    /// Wrap a service-manager backend.
    pub fn new(manager: M) -> Self {
        Self { manager }
    }

    /// Launch the worker detached from the calling terminal.
    ///
    /// Returns as soon as the launch request is accepted; the caller must
    /// not assume the worker is already listening.
    pub async fn start(&self, extra_args: &[String]) -> Result<(), DaemonError> {
        self.manager.submit(extra_args).await
    }

    /// Terminate the worker through the service manager.
    pub async fn stop(&self) -> Result<(), DaemonError> {
        self.manager.remove().await
    }

    /// Stop then start. A stop that fails because nothing was running is
    /// swallowed, making restart idempotent.
    pub async fn restart(&self, extra_args: &[String]) -> Result<(), DaemonError> {
        match self.manager.remove().await {
            Ok(()) => {}
            Err(DaemonError::NotRunning) => {
                tracing::debug!("Restart requested while stopped; starting fresh");
            }
            Err(e) => return Err(e),
        }
        self.manager.submit(extra_args).await
    }

    /// The worker's PID, re-derived from the manager listing at call time.
    pub async fn identity(&self) -> Result<Option<u32>, DaemonError> {
        self.manager.query_pid().await
    }

    /// Whether the manager knows a live worker process.
    pub async fn is_running(&self) -> Result<bool, DaemonError> {
        Ok(self.identity().await?.is_some())
    }
}

/// launchd backend (macOS).
pub struct LaunchdManager {
    worker_exe: PathBuf,
    log_dir: PathBuf,
}

impl LaunchdManager {
    /// launchd job label for the worker.
    pub const LABEL: &'static str = "com.quill.service";

    /// Backend launching `worker_exe` with stdio redirected under `log_dir`.
    pub fn new(worker_exe: PathBuf, log_dir: PathBuf) -> Self {
        Self {
            worker_exe,
            log_dir,
        }
    }
}

impl ServiceManager for LaunchdManager {
    async fn submit(&self, extra_args: &[String]) -> Result<(), DaemonError> {
        // launchd creates the log files but not their directory.
        std::fs::create_dir_all(&self.log_dir).map_err(|e| DaemonError::Spawn(e.to_string()))?;

        let out_log = self.log_dir.join("quill.log");
        let err_log = self.log_dir.join("quill.err");
        let mut args: Vec<String> = vec![
            "submit".into(),
            "-l".into(),
            Self::LABEL.into(),
            "-o".into(),
            out_log.display().to_string(),
            "-e".into(),
            err_log.display().to_string(),
            "--".into(),
            self.worker_exe.display().to_string(),
            WORKER_VERB.into(),
        ];
        args.extend_from_slice(extra_args);

        let output = match run_manager("launchctl", &args).await {
            Ok(output) => output,
            Err(DaemonError::ManagerUnavailable(m)) => return Err(DaemonError::Spawn(m)),
            Err(e) => return Err(e),
        };
        if output.status.success() {
            tracing::info!(label = Self::LABEL, "Submitted worker to launchd");
            Ok(())
        } else {
            Err(DaemonError::Spawn(stderr_of(&output)))
        }
    }

    async fn remove(&self) -> Result<(), DaemonError> {
        let args: Vec<String> = vec!["remove".into(), Self::LABEL.into()];
        let output = match run_manager("launchctl", &args).await {
            Ok(output) => output,
            Err(DaemonError::ManagerUnavailable(m)) => {
                tracing::warn!(manager = %m, "Service manager missing; treating as not running");
                return Err(DaemonError::NotRunning);
            }
            Err(e) => return Err(e),
        };
        if output.status.success() {
            return Ok(());
        }
        let stderr = stderr_of(&output);
        let lowered = stderr.to_lowercase();
        if lowered.contains("no such") || lowered.contains("not find") {
            Err(DaemonError::NotRunning)
        } else {
            Err(DaemonError::Manager(stderr))
        }
    }

    async fn query_pid(&self) -> Result<Option<u32>, DaemonError> {
        let args: Vec<String> = vec!["list".into(), Self::LABEL.into()];
        let output = match run_manager("launchctl", &args).await {
            Ok(output) => output,
            Err(DaemonError::ManagerUnavailable(m)) => {
                tracing::warn!(manager = %m, "Service manager missing; reporting not running");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        // A non-zero exit means the label is not registered: not running.
        if !output.status.success() {
            return Ok(None);
        }
        Ok(parse_launchd_pid(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// systemd backend (Linux), using transient user units.
pub struct SystemdManager {
    worker_exe: PathBuf,
}

impl SystemdManager {
    /// systemd unit name for the worker.
    pub const UNIT: &'static str = "quill.service";

    /// Backend launching `worker_exe` as a transient unit.
    pub fn new(worker_exe: PathBuf) -> Self {
        Self { worker_exe }
    }
}

impl ServiceManager for SystemdManager {
    async fn submit(&self, extra_args: &[String]) -> Result<(), DaemonError> {
        let mut args: Vec<String> = vec![
            "--user".into(),
            "--collect".into(),
            format!("--unit={}", Self::UNIT),
            "--".into(),
            self.worker_exe.display().to_string(),
            WORKER_VERB.into(),
        ];
        args.extend_from_slice(extra_args);

        let output = match run_manager("systemd-run", &args).await {
            Ok(output) => output,
            Err(DaemonError::ManagerUnavailable(m)) => return Err(DaemonError::Spawn(m)),
            Err(e) => return Err(e),
        };
        if output.status.success() {
            tracing::info!(unit = Self::UNIT, "Started worker as transient unit");
            Ok(())
        } else {
            Err(DaemonError::Spawn(stderr_of(&output)))
        }
    }

    async fn remove(&self) -> Result<(), DaemonError> {
        let args: Vec<String> = vec!["--user".into(), "stop".into(), Self::UNIT.into()];
        let output = match run_manager("systemctl", &args).await {
            Ok(output) => output,
            Err(DaemonError::ManagerUnavailable(m)) => {
                tracing::warn!(manager = %m, "Service manager missing; treating as not running");
                return Err(DaemonError::NotRunning);
            }
            Err(e) => return Err(e),
        };
        if output.status.success() {
            return Ok(());
        }
        let stderr = stderr_of(&output);
        let lowered = stderr.to_lowercase();
        // "connect to bus": no user manager is reachable at all, so no
        // entry can exist either.
        if lowered.contains("not loaded")
            || lowered.contains("not found")
            || lowered.contains("connect to bus")
        {
            Err(DaemonError::NotRunning)
        } else {
            Err(DaemonError::Manager(stderr))
        }
    }

    async fn query_pid(&self) -> Result<Option<u32>, DaemonError> {
        let args: Vec<String> = vec![
            "--user".into(),
            "show".into(),
            "--property=MainPID".into(),
            Self::UNIT.into(),
        ];
        let output = match run_manager("systemctl", &args).await {
            Ok(output) => output,
            Err(DaemonError::ManagerUnavailable(m)) => {
                tracing::warn!(manager = %m, "Service manager missing; reporting not running");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        if !output.status.success() {
            return Ok(None);
        }
        Ok(parse_main_pid(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Backend for the build target.
#[cfg(target_os = "macos")]
pub type PlatformManager = LaunchdManager;
/// Backend for the build target.
#[cfg(not(target_os = "macos"))]
pub type PlatformManager = SystemdManager;

/// Construct the platform backend.
///
/// `log_dir` is where worker stdio lands on launchd; systemd routes worker
/// output to the journal and ignores it.
#[cfg(target_os = "macos")]
pub fn platform_manager(worker_exe: PathBuf, log_dir: PathBuf) -> PlatformManager {
    LaunchdManager::new(worker_exe, log_dir)
}
/// Construct the platform backend.
///
/// `log_dir` is where worker stdio lands on launchd; systemd routes worker
/// output to the journal and ignores it.
#[cfg(not(target_os = "macos"))]
pub fn platform_manager(worker_exe: PathBuf, _log_dir: PathBuf) -> PlatformManager {
    SystemdManager::new(worker_exe)
}

/// Run a service-manager command with a bounded timeout.
async fn run_manager(program: &str, args: &[String]) -> Result<std::process::Output, DaemonError> {
    let mut cmd = Command::new(program);
    cmd.args(args).stdin(Stdio::null());

    tracing::debug!(program, ?args, "Invoking service manager");
    match timeout(Duration::from_secs(MANAGER_TIMEOUT_SECS), cmd.output()).await {
        Ok(result) => result.map_err(|e| categorize_io_error(program, &e)),
        Err(_) => Err(DaemonError::Timeout(MANAGER_TIMEOUT_SECS)),
    }
}

fn categorize_io_error(program: &str, e: &io::Error) -> DaemonError {
    match e.kind() {
        io::ErrorKind::NotFound => DaemonError::ManagerUnavailable(program.to_string()),
        _ => DaemonError::Manager(e.to_string()),
    }
}

fn stderr_of(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

/// Extract the PID field from `launchctl list <label>` output.
///
/// The listing is a free-form property list; a registered-but-dead job has
/// no PID line at all.
fn parse_launchd_pid(listing: &str) -> Option<u32> {
    static PID_RE: OnceLock<Regex> = OnceLock::new();
    let re = PID_RE
        .get_or_init(|| Regex::new(r#""PID"\s*=\s*(\d+)\s*;"#).expect("PID pattern compiles"));
    re.captures(listing)?.get(1)?.as_str().parse().ok()
}

/// Extract the PID from `systemctl show --property=MainPID` output.
///
/// systemd reports `MainPID=0` for a known unit with no live process.
fn parse_main_pid(output: &str) -> Option<u32> {
    let value = output
        .lines()
        .find_map(|line| line.trim().strip_prefix("MainPID="))?;
    match value.trim().parse::<u32>().ok()? {
        0 => None,
        pid => Some(pid),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn launchd_listing_with_pid() {
        let listing = concat!(
            "{\n",
            "\t\"StandardOutPath\" = \"/etc/quill.d/log/quill.log\";\n",
            "\t\"Label\" = \"com.quill.service\";\n",
            "\t\"PID\" = 3642;\n",
            "\t\"Program\" = \"/usr/local/bin/quill\";\n",
            "};\n",
        );
        assert_eq!(parse_launchd_pid(listing), Some(3642));
    }

    #[test]
    fn launchd_listing_without_pid_is_not_running() {
        let listing = concat!(
            "{\n",
            "\t\"Label\" = \"com.quill.service\";\n",
            "\t\"LastExitStatus\" = 0;\n",
            "};\n",
        );
        assert_eq!(parse_launchd_pid(listing), None);
    }

    #[test]
    fn systemd_main_pid_parsing() {
        assert_eq!(parse_main_pid("MainPID=2817\n"), Some(2817));
        assert_eq!(parse_main_pid("MainPID=0\n"), None);
        assert_eq!(parse_main_pid("garbage\n"), None);
    }

    /// Records calls and fails `remove` with a configurable error.
    struct MockManager {
        calls: Mutex<Vec<String>>,
        remove_result: fn() -> Result<(), DaemonError>,
    }

    impl MockManager {
        fn new(remove_result: fn() -> Result<(), DaemonError>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                remove_result,
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ServiceManager for &MockManager {
        async fn submit(&self, extra_args: &[String]) -> Result<(), DaemonError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("submit {}", extra_args.join(" ")));
            Ok(())
        }

        async fn remove(&self) -> Result<(), DaemonError> {
            self.calls.lock().unwrap().push("remove".to_string());
            (self.remove_result)()
        }

        async fn query_pid(&self) -> Result<Option<u32>, DaemonError> {
            self.calls.lock().unwrap().push("query".to_string());
            Ok(None)
        }
    }

    #[tokio::test]
    async fn restart_swallows_not_running_stop() {
        let mock = MockManager::new(|| Err(DaemonError::NotRunning));
        let supervisor = Supervisor::new(&mock);

        supervisor
            .restart(&["--addr".to_string(), ":4040".to_string()])
            .await
            .unwrap();
        assert_eq!(mock.calls(), vec!["remove", "submit --addr :4040"]);
    }

    #[tokio::test]
    async fn restart_propagates_real_manager_failures() {
        let mock = MockManager::new(|| Err(DaemonError::Manager("boom".to_string())));
        let supervisor = Supervisor::new(&mock);

        let result = supervisor.restart(&[]).await;
        assert!(matches!(result, Err(DaemonError::Manager(_))));
        // start must not be attempted after a real stop failure
        assert_eq!(mock.calls(), vec!["remove"]);
    }

    #[tokio::test]
    async fn is_running_reflects_identity() {
        let mock = MockManager::new(|| Ok(()));
        let supervisor = Supervisor::new(&mock);
        assert!(!supervisor.is_running().await.unwrap());
    }
}
