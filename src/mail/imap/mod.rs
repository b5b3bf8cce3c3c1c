//! IMAP backend for the sync engine.
//!
//! This module is split into:
//! - `mod.rs` - `ImapConnector` / `ImapTransport` and error classification
//! - `stream.rs` - TCP and TLS setup
//! - `idle.rs` - the IDLE watcher task

mod idle;
mod stream;

use std::future::Future;
use std::time::Duration;

use async_imap::error::Error as ImapError;
use async_imap::types::Capability;
use async_trait::async_trait;
use chrono::NaiveDate;
use futures::TryStreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::constants::{COMMAND_TIMEOUT_SECS, TRANSPORT_EVENT_CAPACITY};
use crate::error::SyncError;
use crate::mail::types::{AccountCredential, RawMessage};
use crate::sync::transport::{
    Connector, HostIdentity, Link, MailTransport, MailboxStatus, TransportEvent,
};

use stream::MailStream;

pub(crate) type ImapSession = async_imap::Session<MailStream>;

const LOGOUT_TIMEOUT: Duration = Duration::from_secs(5);

/// Map an async-imap error onto the engine's taxonomy.
pub(crate) fn classify(command: &str, err: ImapError) -> SyncError {
    match err {
        ImapError::Io(e) => SyncError::Network(format!("{} failed: {}", command, e)),
        ImapError::ConnectionLost => {
            SyncError::Network(format!("{} failed: connection lost", command))
        }
        other => SyncError::Protocol(format!("{} failed: {}", command, other)),
    }
}

/// Run one command under the command timeout.
async fn bounded<T>(
    command: &str,
    fut: impl Future<Output = Result<T, ImapError>>,
) -> Result<T, SyncError> {
    match tokio::time::timeout(Duration::from_secs(COMMAND_TIMEOUT_SECS), fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(classify(command, e)),
        Err(_) => Err(SyncError::Network(format!("{} timed out", command))),
    }
}

/// Compact UID set: `1:200`, `4,7,9:12`.
pub(crate) fn uid_set(uids: &[u32]) -> String {
    let mut parts = Vec::new();
    let mut iter = uids.iter().copied().peekable();
    while let Some(start) = iter.next() {
        let mut end = start;
        while iter.peek() == Some(&(end + 1)) {
            end += 1;
            iter.next();
        }
        if start == end {
            parts.push(start.to_string());
        } else {
            parts.push(format!("{}:{}", start, end));
        }
    }
    parts.join(",")
}

fn capability_name(cap: &Capability) -> String {
    match cap {
        Capability::Imap4rev1 => "IMAP4rev1".to_string(),
        Capability::Auth(mechanism) => format!("AUTH={}", mechanism),
        Capability::Atom(atom) => atom.to_string(),
    }
}

/// Opens IMAP connections, plain or over TLS.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImapConnector;

#[async_trait]
impl Connector for ImapConnector {
    type Transport = ImapTransport;

    async fn connect(
        &self,
        credential: &AccountCredential,
    ) -> Result<Link<ImapTransport>, SyncError> {
        let stream = stream::open(&credential.host, credential.port, credential.use_tls).await?;
        let client = async_imap::Client::new(stream);
        let (events_tx, events) = mpsc::channel(TRANSPORT_EVENT_CAPACITY);

        tracing::debug!("Connected to {}:{}", credential.host, credential.port);
        Ok(Link {
            transport: ImapTransport {
                host: credential.host.clone(),
                phase: Phase::Greeting(Box::new(client)),
                events: events_tx,
            },
            events,
        })
    }
}

struct IdleWatch {
    stop: CancellationToken,
    task: JoinHandle<Result<ImapSession, SyncError>>,
}

enum Phase {
    Greeting(Box<async_imap::Client<MailStream>>),
    Session(Box<ImapSession>),
    Waiting(IdleWatch),
    Closed,
}

/// One IMAP connection.
///
/// While in wait mode the session belongs to the IDLE watcher task, so any
/// command other than `leave_wait` fails instead of interleaving with IDLE.
pub struct ImapTransport {
    host: String,
    phase: Phase,
    events: mpsc::Sender<TransportEvent>,
}

impl ImapTransport {
    fn session(&mut self) -> Result<&mut ImapSession, SyncError> {
        match &mut self.phase {
            Phase::Session(session) => Ok(session.as_mut()),
            Phase::Waiting(_) => Err(SyncError::Protocol(
                "command issued while in IDLE".into(),
            )),
            Phase::Greeting(_) => Err(SyncError::Protocol("not authenticated".into())),
            Phase::Closed => Err(SyncError::Network("connection closed".into())),
        }
    }
}

#[async_trait]
impl MailTransport for ImapTransport {
    async fn authenticate(&mut self, credential: &AccountCredential) -> Result<(), SyncError> {
        let client = match std::mem::replace(&mut self.phase, Phase::Closed) {
            Phase::Greeting(client) => client,
            other => {
                self.phase = other;
                return Err(SyncError::Protocol("already authenticated".into()));
            }
        };

        let login = (*client).login(&credential.identity, &credential.secret);
        match tokio::time::timeout(Duration::from_secs(COMMAND_TIMEOUT_SECS), login).await {
            Ok(Ok(session)) => {
                tracing::debug!("Logged in to {} as {}", self.host, credential.identity);
                self.phase = Phase::Session(Box::new(session));
                Ok(())
            }
            Ok(Err((ImapError::No(reason) | ImapError::Bad(reason), _))) => {
                Err(SyncError::Authentication {
                    identity: credential.identity.clone(),
                    reason,
                })
            }
            Ok(Err((e, _))) => Err(classify("LOGIN", e)),
            Err(_) => Err(SyncError::Network("LOGIN timed out".into())),
        }
    }

    async fn identify(&mut self) -> Result<HostIdentity, SyncError> {
        let session = self.session()?;
        let caps = bounded("CAPABILITY", session.capabilities()).await?;
        Ok(HostIdentity {
            host: self.host.clone(),
            capabilities: caps.iter().map(capability_name).collect(),
        })
    }

    async fn select_mailbox(&mut self, mailbox: &str) -> Result<MailboxStatus, SyncError> {
        let session = self.session()?;
        let opened = bounded("EXAMINE", session.examine(mailbox)).await?;
        Ok(MailboxStatus {
            exists: opened.exists,
            uid_validity: opened.uid_validity,
            uid_next: opened.uid_next,
        })
    }

    async fn search_since(&mut self, since: NaiveDate) -> Result<Vec<u32>, SyncError> {
        let query = format!("SINCE {}", since.format("%d-%b-%Y"));
        let session = self.session()?;
        let found = bounded("UID SEARCH", session.uid_search(&query)).await?;
        let mut uids: Vec<u32> = found.into_iter().collect();
        uids.sort_unstable();
        Ok(uids)
    }

    async fn search_after(&mut self, uid: u32) -> Result<Vec<u32>, SyncError> {
        let query = format!("UID {}:*", uid.saturating_add(1));
        let session = self.session()?;
        let found = bounded("UID SEARCH", session.uid_search(&query)).await?;
        // `n:*` always matches the highest UID, even when it is below n
        let mut uids: Vec<u32> = found.into_iter().filter(|u| *u > uid).collect();
        uids.sort_unstable();
        Ok(uids)
    }

    async fn fetch_batch(&mut self, uids: &[u32]) -> Result<Vec<RawMessage>, SyncError> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }
        let set = uid_set(uids);
        let session = self.session()?;
        let fetches = bounded("UID FETCH", async {
            session
                .uid_fetch(&set, "(UID BODY.PEEK[])")
                .await?
                .try_collect::<Vec<_>>()
                .await
        })
        .await?;

        Ok(fetches
            .iter()
            .filter_map(|fetch| {
                let uid = fetch.uid?;
                Some(RawMessage {
                    uid,
                    bytes: fetch.body().map(<[u8]>::to_vec).unwrap_or_default(),
                })
            })
            .collect())
    }

    async fn enter_wait(&mut self) -> Result<(), SyncError> {
        let mut session = match std::mem::replace(&mut self.phase, Phase::Closed) {
            Phase::Session(session) => session,
            other => {
                self.phase = other;
                return Err(SyncError::Protocol("cannot IDLE without an open session".into()));
            }
        };

        let pending = idle::drain_exists(&mut session);
        let mut handle = (*session).idle();
        bounded("IDLE", handle.init()).await?;

        if let Some(exists) = pending {
            tracing::debug!("Mailbox grew to {} before IDLE", exists);
            self.events.try_send(TransportEvent::Arrival { exists }).ok();
        }

        let stop = CancellationToken::new();
        let task = tokio::spawn(idle::watch(handle, self.events.clone(), stop.clone()));
        self.phase = Phase::Waiting(IdleWatch { stop, task });
        Ok(())
    }

    async fn leave_wait(&mut self) -> Result<(), SyncError> {
        let watch = match std::mem::replace(&mut self.phase, Phase::Closed) {
            Phase::Waiting(watch) => watch,
            other => {
                self.phase = other;
                return Err(SyncError::Protocol("not in IDLE".into()));
            }
        };

        watch.stop.cancel();
        let limit = Duration::from_secs(COMMAND_TIMEOUT_SECS);
        match tokio::time::timeout(limit, watch.task).await {
            Ok(Ok(Ok(session))) => {
                self.phase = Phase::Session(Box::new(session));
                Ok(())
            }
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(e)) => Err(SyncError::Network(format!("IDLE watcher failed: {}", e))),
            Err(_) => Err(SyncError::Network("DONE timed out".into())),
        }
    }

    async fn noop(&mut self) -> Result<(), SyncError> {
        let session = self.session()?;
        bounded("NOOP", session.noop()).await
    }

    async fn disconnect(&mut self) {
        let session = match std::mem::replace(&mut self.phase, Phase::Closed) {
            Phase::Session(session) => Some(*session),
            Phase::Waiting(watch) => {
                watch.stop.cancel();
                match tokio::time::timeout(LOGOUT_TIMEOUT, watch.task).await {
                    Ok(Ok(Ok(session))) => Some(session),
                    _ => None,
                }
            }
            Phase::Greeting(_) | Phase::Closed => None,
        };

        if let Some(mut session) = session {
            match tokio::time::timeout(LOGOUT_TIMEOUT, session.logout()).await {
                Ok(Ok(())) => tracing::debug!("Logged out of {}", self.host),
                Ok(Err(e)) => tracing::debug!("LOGOUT on {} failed: {}", self.host, e),
                Err(_) => tracing::debug!("LOGOUT on {} timed out", self.host),
            }
        }
    }
}

impl Drop for ImapTransport {
    fn drop(&mut self) {
        if let Phase::Waiting(watch) = &self.phase {
            watch.stop.cancel();
        }
    }
}
