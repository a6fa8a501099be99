//! Loopback control channel between the CLI and a running worker.
//!
//! A minimal stateless request/response protocol over loopback HTTP with
//! JSON bodies, served at the root path.
//!
//! # Protocol
//!
//! - Request: `{"method":""}` (liveness probe) or `{"method":"stop"}`
//! - Response: `{"response":"<string>"}`
//! - `GET /` answers a fixed plaintext acknowledgement so a browser can
//!   probe an instance without speaking JSON.
//!
//! The stop handshake is "answer, then die": the acknowledgement is flushed
//! to the client before the server returns, never the other way around.
//! On the client side, a connection failure during a stop request is the
//! expected signal for "already stopped" and is reported as success; this
//! policy is what makes `stop` idempotent.

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Acknowledgement served while the worker is running.
pub const ACK_RUNNING: &str = "quill is running";

/// Acknowledgement sent back on a stop request, right before exit.
pub const ACK_STOPPING: &str = "quill is shutting down";

/// Bound on every client call so a CLI invocation never hangs against an
/// unreachable address.
const REQUEST_TIMEOUT_SECS: u64 = 3;

/// Errors that can occur on the control channel.
#[derive(Error, Debug)]
pub enum ControlError {
    /// Listener bind or serve failure on the worker side.
    #[error("control channel I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A reachable endpoint answered with an undecodable body.
    #[error("malformed control response: {0}")]
    Protocol(String),

    /// The HTTP client could not be constructed.
    #[error("control transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// A decoded control request.
///
/// Decoded once from the wire `method` string, then matched exhaustively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlRequest {
    /// Empty method: liveness probe, no state change.
    Probe,
    /// Graceful shutdown request.
    Stop,
    /// Anything else; answered by name, never fatal.
    Unknown(String),
}

impl ControlRequest {
    fn method(&self) -> &str {
        match self {
            Self::Probe => "",
            Self::Stop => "stop",
            Self::Unknown(m) => m,
        }
    }
}

impl From<WireRequest> for ControlRequest {
    fn from(wire: WireRequest) -> Self {
        match wire.method.as_str() {
            "" => Self::Probe,
            "stop" => Self::Stop,
            _ => Self::Unknown(wire.method),
        }
    }
}

/// Wire shape of a request body.
#[derive(Debug, Serialize, Deserialize)]
struct WireRequest {
    #[serde(default)]
    method: String,
}

/// Wire shape of a response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ControlResponse {
    /// Human-readable acknowledgement.
    pub response: String,
}

/// Outcome of a stop request as seen by the CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// The worker answered before exiting.
    Acknowledged(String),
    /// Nothing answered; operationally the same end state as a clean stop.
    AlreadyStopped,
}

#[derive(Clone)]
struct ControlState {
    shutdown: mpsc::Sender<()>,
}

/// Control-channel server run by the worker for its entire lifetime.
pub struct ControlServer {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl ControlServer {
    /// Bind the listener on the given `[host]:port` address.
    ///
    /// A bare `:port` binds all interfaces, matching the stored-settings
    /// default.
    pub async fn bind(address: &str) -> Result<Self, ControlError> {
        let listener = TcpListener::bind(bind_address(address)).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, "Control server listening");
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// The address the listener actually bound.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve control requests until a stop request completes.
    ///
    /// Returns after the stop acknowledgement has been flushed to the
    /// client: graceful shutdown finishes in-flight responses before this
    /// future resolves, which is what guarantees the response-before-exit
    /// ordering of the handshake.
    pub async fn serve(self) -> Result<(), ControlError> {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let app = Router::new()
            .route("/", get(probe_page).post(handle_request))
            .with_state(ControlState {
                shutdown: shutdown_tx,
            });

        axum::serve(self.listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;
        tracing::info!("Control server stopped");
        Ok(())
    }
}

/// Browser-facing liveness page.
async fn probe_page() -> &'static str {
    ACK_RUNNING
}

async fn handle_request(
    State(state): State<ControlState>,
    Json(wire): Json<WireRequest>,
) -> Json<ControlResponse> {
    match ControlRequest::from(wire) {
        ControlRequest::Probe => Json(ControlResponse {
            response: ACK_RUNNING.to_string(),
        }),
        ControlRequest::Stop => {
            tracing::info!("Stop requested over control channel");
            let _ = state.shutdown.send(()).await;
            Json(ControlResponse {
                response: ACK_STOPPING.to_string(),
            })
        }
        ControlRequest::Unknown(method) => {
            tracing::warn!(method = %method, "Unknown control method");
            Json(ControlResponse {
                response: format!("unknown method: {method}; still running"),
            })
        }
    }
}

/// Control-channel client used by CLI verbs.
pub struct ControlClient {
    client: reqwest::Client,
    url: String,
}

impl ControlClient {
    /// Build a client for the worker at `address` (`[host]:port`).
    ///
    /// A bare `:port` or `0.0.0.0:port` address dials loopback; control
    /// traffic is local-host only.
    pub fn new(address: &str) -> Result<Self, ControlError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            url: control_url(address),
        })
    }

    /// Liveness probe.
    ///
    /// Any completed HTTP exchange counts as "running"; a connection
    /// failure or timeout is the normal signal for "not running", never an
    /// error.
    pub async fn probe(&self) -> bool {
        match self.client.get(&self.url).send().await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(url = %self.url, error = %e, "Probe found no listener");
                false
            }
        }
    }

    /// Request a graceful shutdown.
    ///
    /// A worker that cannot be reached — or that dies before flushing its
    /// acknowledgement — is indistinguishable from one that was never
    /// running, so both report [`StopOutcome::AlreadyStopped`]. Only a
    /// reachable endpoint answering garbage is an error.
    pub async fn stop(&self) -> Result<StopOutcome, ControlError> {
        let body = WireRequest {
            method: ControlRequest::Stop.method().to_string(),
        };
        let sent = self.client.post(&self.url).json(&body).send().await;
        let response = match sent {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(url = %self.url, error = %e, "Stop request found no listener");
                return Ok(StopOutcome::AlreadyStopped);
            }
        };

        match response.json::<ControlResponse>().await {
            Ok(ack) => Ok(StopOutcome::Acknowledged(ack.response)),
            Err(e) if e.is_decode() => Err(ControlError::Protocol(e.to_string())),
            // Connection dropped mid-body: the worker died on its way out.
            Err(_) => Ok(StopOutcome::AlreadyStopped),
        }
    }
}

/// Address form the listener binds: `:port` means all interfaces.
fn bind_address(address: &str) -> String {
    match address.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}"),
        None => address.to_string(),
    }
}

/// URL the client dials: `:port` and wildcard hosts mean loopback.
fn control_url(address: &str) -> String {
    let authority = if let Some(port) = address.strip_prefix(':') {
        format!("127.0.0.1:{port}")
    } else if let Some(port) = address.strip_prefix("0.0.0.0:") {
        format!("127.0.0.1:{port}")
    } else {
        address.to_string()
    };
    format!("http://{authority}/")
}
