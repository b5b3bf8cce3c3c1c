use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use futures::future::join_all;

use crate::error::ConnectError;
use crate::mail::types::AccountCredential;
use crate::sync::{Connector, MailboxSession, SessionState};

/// Last known condition of one account
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountStatus {
    pub state: SessionState,
    /// Error behind the most recent failure transition
    pub last_error: Option<String>,
    /// Reconnect attempt in progress, if any
    pub reconnect_attempt: Option<u32>,
    /// Messages delivered downstream since start-up
    pub delivered: usize,
}

type StatusMap = Arc<Mutex<BTreeMap<String, AccountStatus>>>;

struct Entry<C: Connector> {
    session: MailboxSession<C>,
    credential: AccountCredential,
}

/// Runs one `MailboxSession` per account.
///
/// Sessions are independent: one account failing never affects the others.
pub struct AccountManager<C: Connector> {
    entries: Vec<Entry<C>>,
    statuses: StatusMap,
}

impl<C: Connector> Default for AccountManager<C> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            statuses: Arc::default(),
        }
    }
}

impl<C: Connector> AccountManager<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session; its status is tracked from now on.
    pub fn add(&mut self, mut session: MailboxSession<C>, credential: AccountCredential) {
        let account_id = session.account_id().to_string();
        if let Ok(mut statuses) = self.statuses.lock() {
            statuses.insert(account_id.clone(), AccountStatus::default());
        }

        let statuses = Arc::clone(&self.statuses);
        session.on_state_change(move |change| {
            let Ok(mut statuses) = statuses.lock() else {
                return;
            };
            let status = statuses.entry(change.account_id.clone()).or_default();
            status.state = change.to;
            status.reconnect_attempt = change.reconnect.as_ref().map(|a| a.attempt_count);
            if change.error.is_some() {
                status.last_error = change.error.clone();
            }
        });

        let statuses = Arc::clone(&self.statuses);
        session.on_indexed(move |account_id, _uid| {
            if let Ok(mut statuses) = statuses.lock() {
                statuses.entry(account_id.to_string()).or_default().delivered += 1;
            }
        });

        self.entries.push(Entry {
            session,
            credential,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Start every session concurrently. Returns the accounts that could not start.
    pub async fn start_all(&mut self) -> Vec<(String, ConnectError)> {
        let starts = self.entries.iter_mut().map(|entry| async move {
            let account_id = entry.session.account_id().to_string();
            let result = entry.session.start(entry.credential.clone()).await;
            (account_id, result)
        });

        let mut failed = Vec::new();
        for (account_id, result) in join_all(starts).await {
            match result {
                Ok(()) => tracing::info!(account = %account_id, "Account started"),
                Err(e) => {
                    tracing::error!(account = %account_id, "Account failed to start: {}", e);
                    failed.push((account_id, e));
                }
            }
        }
        failed
    }

    pub async fn stop_all(&mut self) {
        join_all(self.entries.iter_mut().map(|entry| entry.session.stop())).await;
        tracing::info!("Stopped {} session(s)", self.entries.len());
    }

    /// Resolves once no session is left that could still make progress.
    pub async fn all_failed(&self) {
        let waits = self.entries.iter().map(|entry| async move {
            let mut rx = entry.session.subscribe();
            rx.wait_for(|state| state.is_terminal()).await.ok();
        });
        join_all(waits).await;
    }

    pub fn status(&self) -> BTreeMap<String, AccountStatus> {
        self.statuses
            .lock()
            .map(|statuses| statuses.clone())
            .unwrap_or_default()
    }
}
