//! Error taxonomy for the synchronization engine.

use thiserror::Error;

/// Errors raised while talking to the remote mail store or driving a session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    /// Credential rejected by the server. Never retried.
    #[error("authentication rejected for {identity}: {reason}")]
    Authentication { identity: String, reason: String },

    /// Connection refused, reset, or timed out.
    #[error("network error: {0}")]
    Network(String),

    /// Malformed or unexpected server response.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A single message could not be parsed.
    #[error("failed to parse message {uid}: {reason}")]
    Parse { uid: u32, reason: String },

    /// Reconnection gave up after the configured number of attempts.
    #[error("gave up after {attempts} reconnection attempts: {last_error}")]
    RetryExhausted { attempts: u32, last_error: String },
}

impl SyncError {
    /// Errors that end the current connection and go through the reconnection policy.
    pub fn is_connection_level(&self) -> bool {
        matches!(self, SyncError::Network(_))
    }

    /// Errors after which the session must stop for good.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncError::Authentication { .. } | SyncError::RetryExhausted { .. }
        )
    }

    /// Protocol errors seen during the handshake count as network failures.
    pub fn at_handshake(self) -> Self {
        match self {
            SyncError::Protocol(msg) => SyncError::Network(format!("handshake failed: {}", msg)),
            other => other,
        }
    }
}

/// Why `MailboxSession::start` refused or failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectError {
    #[error("session for {0} is already running")]
    AlreadyRunning(String),

    #[error(transparent)]
    Terminal(#[from] SyncError),

    #[error("session for {0} stopped before it connected")]
    Stopped(String),
}
