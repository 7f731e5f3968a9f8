//! Client Sync Adapter
//!
//! Keeps one client's view of a session consistent with the server:
//!
//! - `sync`: version reconciliation and the push/poll connection state machine
//! - `predict`: optimistic post-state for a command, using the same engine rules
//! - `rpc`: one-shot request connections (commands and polling pulls)
//! - `adapter`: tokio driver tying the above to a live server
//!
//! ```no_run
//! use codenames::client::{SyncAdapter, SyncConfig};
//! use codenames::game::{Command, PlayerId};
//!
//! # async fn demo(session_id: String) -> Result<(), codenames::client::ClientError> {
//! let me = PlayerId::new("alice");
//! let config = SyncConfig::new("ws://127.0.0.1:8080");
//! let adapter = SyncAdapter::start(config, session_id, Some(me.clone()));
//!
//! adapter.issue(Command::EndTurn { player_id: me }).await?;
//! let view = adapter.view();
//! println!("version {:?} via {:?}", view.version(), view.connection);
//! adapter.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use thiserror::Error;

use crate::network::protocol::ServerError;

pub mod adapter;
pub mod predict;
pub mod rpc;
pub mod sync;

pub use adapter::SyncAdapter;
pub use predict::predict;
pub use rpc::RpcClient;
pub use sync::{ConnectionState, SyncAction, SyncState, SyncView};

/// Default interval between polling pulls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);
/// Default wait after losing the push channel before polling starts.
pub const DEFAULT_POLLING_GRACE: Duration = Duration::from_secs(1);
/// Default fixed delay between reconnection attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);
/// Default timeout for a single request connection.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
/// Floor for the polling interval and the reconnection delay.
pub const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Client tuning.
///
/// ```
/// use codenames::client::SyncConfig;
/// use std::time::Duration;
///
/// let config = SyncConfig::new("ws://127.0.0.1:8080")
///     .with_poll_interval(Duration::from_millis(500))
///     .with_reconnect_delay(Duration::from_secs(1));
/// ```
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// WebSocket endpoint, e.g. `ws://host:8080`.
    pub server_url: String,
    /// JWT sent as the first message of every connection, if set.
    pub token: Option<String>,
    /// Interval between polling pulls while the push channel is down.
    /// Never below [`MIN_INTERVAL`].
    ///
    /// Defaults to **3 seconds**.
    pub poll_interval: Duration,
    /// Delay between losing the push channel and the first pull.
    ///
    /// Defaults to **1 second**.
    pub polling_grace: Duration,
    /// Fixed delay between reconnection attempts. Never backs off to zero.
    ///
    /// Defaults to **2 seconds**.
    pub reconnect_delay: Duration,
    /// Timeout for one request connection, connect to reply.
    ///
    /// Defaults to **5 seconds**.
    pub request_timeout: Duration,
}

impl SyncConfig {
    /// Create a configuration for `server_url` with default timings.
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            token: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            polling_grace: DEFAULT_POLLING_GRACE,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Authenticate every connection with this token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set the polling interval. Clamped to at least 10ms.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(MIN_INTERVAL);
        self
    }

    /// Set the polling grace delay.
    #[must_use]
    pub fn with_polling_grace(mut self, grace: Duration) -> Self {
        self.polling_grace = grace;
        self
    }

    /// Set the reconnection delay. Clamped to at least 10ms.
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay.max(MIN_INTERVAL);
        self
    }

    /// Set the request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Could not reach the server.
    #[error("connection failed: {0}")]
    Connection(#[from] tokio_tungstenite::tungstenite::Error),

    /// No reply within the request timeout.
    #[error("request timed out")]
    Timeout,

    /// Server closed the connection before replying.
    #[error("connection closed before reply")]
    Closed,

    /// Server rejected the request.
    #[error("server error {:?}: {}", .0.code, .0.message)]
    Server(ServerError),

    /// Token was refused.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Reply of an unexpected type.
    #[error("unexpected reply: {0}")]
    UnexpectedReply(&'static str),

    /// Message could not be encoded.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
