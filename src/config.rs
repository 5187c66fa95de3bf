use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Instant};
use tracing::{debug, trace};

/// Identifier reserved for the throwaway local node used during onboarding.
/// Connections under this id never attach a macaroon.
pub const TEMPORARY_NODE_ID: &str = "tmp";

/// How long [`wait_for_file`] polls before giving up.
pub const DEFAULT_FILE_WAIT_TIMEOUT: Duration = Duration::from_secs(10);

const FILE_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Whether the node runs next to the application or on a remote host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    Local,
    Remote,
}

/// Parameters for a single connection attempt. Immutable once passed to
/// [`crate::NodeManager::connect`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectOptions {
    /// Caller-chosen identifier for this node configuration.
    pub id: String,
    /// Local vs. remote deployment of the daemon.
    pub connection_type: ConnectionType,
    /// gRPC endpoint URI, e.g. `https://127.0.0.1:10009`.
    pub host: String,
    /// Path to the TLS certificate (PEM) presented by the daemon.
    pub cert: Option<PathBuf>,
    /// Path to the authentication macaroon.
    pub macaroon: Option<PathBuf>,
    /// Location of the method-descriptor source (proto descriptor set) for
    /// callers that drive dynamic clients. Unused by the static tonic client.
    pub proto_path: Option<PathBuf>,
}

impl ConnectOptions {
    pub fn new(
        id: impl Into<String>,
        connection_type: ConnectionType,
        host: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            connection_type,
            host: host.into(),
            cert: None,
            macaroon: None,
            proto_path: None,
        }
    }

    #[must_use]
    pub fn with_cert(mut self, cert: impl Into<PathBuf>) -> Self {
        self.cert = Some(cert.into());
        self
    }

    #[must_use]
    pub fn with_macaroon(mut self, macaroon: impl Into<PathBuf>) -> Self {
        self.macaroon = Some(macaroon.into());
        self
    }

    #[must_use]
    pub fn with_proto_path(mut self, proto_path: impl Into<PathBuf>) -> Self {
        self.proto_path = Some(proto_path.into());
        self
    }

    /// Derive the auth/readiness settings for these options.
    ///
    /// The temporary node id suppresses macaroon use entirely; local
    /// connections wait for their credential files to appear on disk because
    /// a freshly started daemon writes them asynchronously.
    #[must_use]
    pub fn settings(&self) -> ConnectionSettings {
        let use_macaroon = self.id != TEMPORARY_NODE_ID;
        let local = self.connection_type == ConnectionType::Local;
        ConnectionSettings {
            use_macaroon,
            wait_for_cert: local,
            wait_for_macaroon: local && use_macaroon,
        }
    }
}

/// Settings derived from [`ConnectOptions`], fixed for the connection's life.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Attach the macaroon metadata header to every request.
    pub use_macaroon: bool,
    /// Poll for the TLS certificate file before dialing.
    pub wait_for_cert: bool,
    /// Poll for the macaroon file before dialing.
    pub wait_for_macaroon: bool,
}

/// Wait for a file to exist, polling until `timeout` elapses.
///
/// # Errors
/// Returns [`io::ErrorKind::TimedOut`] when the file does not appear in time.
pub async fn wait_for_file(path: &Path, timeout: Duration) -> io::Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            debug!(target: "lnd_conn::config", path = %path.display(), "file ready");
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("timed out waiting for {}", path.display()),
            ));
        }
        trace!(target: "lnd_conn::config", path = %path.display(), "waiting for file");
        sleep(FILE_POLL_INTERVAL).await;
    }
}
