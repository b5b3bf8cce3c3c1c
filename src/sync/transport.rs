//! Capability interface between the state machine and a concrete mail-access client.
//!
//! Anything that can open a connection and speak these primitives can back a
//! `MailboxSession`; the state machine never sees protocol details.

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::mpsc;

use crate::error::SyncError;
use crate::mail::types::{AccountCredential, RawMessage};

/// Asynchronous signals pushed by a live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// New messages are available; `exists` is the server's new message count.
    Arrival { exists: u32 },
    /// The connection failed while no command was outstanding (e.g. during wait mode).
    Failed(SyncError),
}

/// What the server told us when the mailbox was opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MailboxStatus {
    pub exists: u32,
    pub uid_validity: Option<u32>,
    pub uid_next: Option<u32>,
}

/// Identity the server presents once authenticated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostIdentity {
    pub host: String,
    pub capabilities: Vec<String>,
}

impl HostIdentity {
    pub fn has_capability(&self, name: &str) -> bool {
        self.capabilities.iter().any(|c| c.eq_ignore_ascii_case(name))
    }
}

/// One freshly opened connection together with its event subscription.
///
/// The receiver only lives as long as this connection: reconnecting drops the
/// whole `Link` and opens a new one, so no listener outlives its transport.
pub struct Link<T> {
    pub transport: T,
    pub events: mpsc::Receiver<TransportEvent>,
}

/// Opens connections. Called once per connection attempt.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Transport: MailTransport;

    async fn connect(
        &self,
        credential: &AccountCredential,
    ) -> Result<Link<Self::Transport>, SyncError>;
}

/// Primitive protocol operations on one physical connection.
///
/// Every method takes `&mut self`, so a connection can never have two
/// commands outstanding at once.
#[async_trait]
pub trait MailTransport: Send + 'static {
    async fn authenticate(&mut self, credential: &AccountCredential) -> Result<(), SyncError>;

    /// Host name and advertised capabilities, used to pick a server profile.
    async fn identify(&mut self) -> Result<HostIdentity, SyncError>;

    async fn select_mailbox(&mut self, mailbox: &str) -> Result<MailboxStatus, SyncError>;

    /// Identifiers of messages received on or after `since`, ascending.
    async fn search_since(&mut self, since: NaiveDate) -> Result<Vec<u32>, SyncError>;

    /// Identifiers strictly greater than `uid`, ascending.
    async fn search_after(&mut self, uid: u32) -> Result<Vec<u32>, SyncError>;

    async fn fetch_batch(&mut self, uids: &[u32]) -> Result<Vec<RawMessage>, SyncError>;

    /// Enter wait mode. Arrivals are reported through the link's event channel.
    async fn enter_wait(&mut self) -> Result<(), SyncError>;

    /// Interrupt wait mode so that other commands may be issued.
    async fn leave_wait(&mut self) -> Result<(), SyncError>;

    async fn noop(&mut self) -> Result<(), SyncError>;

    /// Best-effort logout; the connection is unusable afterwards.
    async fn disconnect(&mut self);
}
