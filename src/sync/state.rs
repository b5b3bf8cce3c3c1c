use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

use super::handlers::{Handlers, StateChange};
use super::retry::ReconnectAttempt;

/// Lifecycle of one account's mailbox session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Ready,
    Backfilling,
    Waiting,
    Fetching,
    Reconnecting,
    Failed,
}

impl SessionState {
    /// An authenticated connection with the mailbox open.
    pub fn is_connected(self) -> bool {
        matches!(
            self,
            SessionState::Ready
                | SessionState::Backfilling
                | SessionState::Waiting
                | SessionState::Fetching
        )
    }

    pub fn is_terminal(self) -> bool {
        self == SessionState::Failed
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Ready => "ready",
            SessionState::Backfilling => "backfilling",
            SessionState::Waiting => "waiting",
            SessionState::Fetching => "fetching",
            SessionState::Reconnecting => "reconnecting",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Publishes transitions to the watch channel, the log and the handlers.
pub(crate) struct StateTracker {
    account_id: String,
    tx: Arc<watch::Sender<SessionState>>,
    handlers: Handlers,
}

impl StateTracker {
    pub(crate) fn new(
        account_id: impl Into<String>,
        tx: Arc<watch::Sender<SessionState>>,
        handlers: Handlers,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            tx,
            handlers,
        }
    }

    pub(crate) fn current(&self) -> SessionState {
        *self.tx.borrow()
    }

    pub(crate) fn set(&self, to: SessionState) {
        self.transition(to, None, None);
    }

    /// Record a transition. Re-entering the current state is not a transition.
    pub(crate) fn transition(
        &self,
        to: SessionState,
        reconnect: Option<ReconnectAttempt>,
        error: Option<String>,
    ) {
        let from = self.tx.send_replace(to);
        if from == to {
            return;
        }

        match (&reconnect, &error) {
            (Some(attempt), _) => tracing::warn!(
                account = %self.account_id,
                "{} -> {} (attempt {}, retry in {:?}): {}",
                from,
                to,
                attempt.attempt_count,
                attempt.next_delay,
                error.as_deref().unwrap_or("unknown error")
            ),
            (None, Some(error)) => {
                tracing::warn!(account = %self.account_id, "{} -> {}: {}", from, to, error)
            }
            (None, None) => tracing::info!(account = %self.account_id, "{} -> {}", from, to),
        }

        self.handlers.state_changed(&StateChange {
            account_id: self.account_id.clone(),
            from,
            to,
            reconnect,
            error,
        });
    }
}
