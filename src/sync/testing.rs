//! Scripted in-memory mail server for exercising the state machine.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::mpsc;

use super::handlers::MessageSink;
use super::transport::{
    Connector, HostIdentity, Link, MailTransport, MailboxStatus, TransportEvent,
};
use crate::error::SyncError;
use crate::mail::types::{AccountCredential, MessageRecord, RawMessage};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Authenticate,
    Identify,
    Select(String),
    SearchSince(NaiveDate),
    SearchAfter(u32),
    Fetch(Vec<u32>),
    EnterWait,
    LeaveWait,
    Noop,
    Disconnect,
}

/// How the next connection attempt behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Accept,
    Refuse,
    RejectLogin,
}

/// Accepts everything.
pub struct NullSink;

#[async_trait]
impl MessageSink for NullSink {
    async fn accept(&self, _account_id: &str, _record: &MessageRecord) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Keeps the subjects it was handed and rejects the listed ones.
#[derive(Default)]
pub struct RecordingSink {
    pub subjects: Mutex<Vec<String>>,
    pub reject: HashSet<String>,
}

#[async_trait]
impl MessageSink for RecordingSink {
    async fn accept(&self, _account_id: &str, record: &MessageRecord) -> anyhow::Result<()> {
        if self.reject.contains(&record.subject) {
            anyhow::bail!("index unavailable");
        }
        self.subjects.lock().unwrap().push(record.subject.clone());
        Ok(())
    }
}

#[derive(Default)]
struct ServerState {
    host: String,
    uid_validity: u32,
    uids: Vec<u32>,
    unparseable: HashSet<u32>,
    failing_fetch_calls: HashSet<usize>,
    fetch_calls: usize,
    failing_search_calls: HashSet<usize>,
    search_calls: usize,
    failing_leave_calls: HashSet<usize>,
    leave_calls: usize,
    script: VecDeque<ConnectOutcome>,
    connects: usize,
    commands: Vec<Command>,
    in_wait: bool,
    violations: Vec<String>,
    events: Option<mpsc::Sender<TransportEvent>>,
}

#[derive(Clone)]
pub struct MockServer {
    state: Arc<Mutex<ServerState>>,
}

pub fn credential() -> AccountCredential {
    AccountCredential {
        identity: "me@example.com".into(),
        secret: "secret".into(),
        host: "imap.example.com".into(),
        port: 993,
        use_tls: true,
    }
}

pub fn message_bytes(uid: u32) -> Vec<u8> {
    format!(
        "From: Sender {uid} <sender{uid}@example.com>\r\n\
         To: me@example.com\r\n\
         Subject: Message {uid}\r\n\
         Date: Mon, 1 Jan 2024 12:00:00 +0000\r\n\
         Message-ID: <{uid}@example.com>\r\n\
         \r\n\
         Body of message {uid}.\r\n"
    )
    .into_bytes()
}

impl MockServer {
    pub fn new(host: &str) -> Self {
        let state = ServerState {
            host: host.to_string(),
            uid_validity: 1,
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn with_messages(self, count: u32) -> Self {
        self.state.lock().unwrap().uids = (1..=count).collect();
        self
    }

    /// Outcomes for the next connection attempts; afterwards connections are accepted.
    pub fn script(self, outcomes: &[ConnectOutcome]) -> Self {
        self.state.lock().unwrap().script = outcomes.iter().copied().collect();
        self
    }

    /// Make the n-th fetch command (0-based) fail with a protocol error.
    pub fn fail_fetch_call(self, n: usize) -> Self {
        self.state.lock().unwrap().failing_fetch_calls.insert(n);
        self
    }

    /// Make the n-th date search (0-based) fail with a protocol error.
    pub fn fail_search(self, n: usize) -> Self {
        self.state.lock().unwrap().failing_search_calls.insert(n);
        self
    }

    /// Make the n-th attempt to leave wait mode (0-based) fail with a protocol error.
    pub fn fail_leave_wait(self, n: usize) -> Self {
        self.state.lock().unwrap().failing_leave_calls.insert(n);
        self
    }

    /// The mailbox is recreated; seen by the next select.
    pub fn set_uid_validity(&self, uid_validity: u32) {
        self.state.lock().unwrap().uid_validity = uid_validity;
    }

    pub fn unparseable(self, uid: u32) -> Self {
        self.state.lock().unwrap().unparseable.insert(uid);
        self
    }

    pub fn connector(&self) -> MockConnector {
        MockConnector {
            server: self.clone(),
        }
    }

    /// A transport that is already connected and authenticated.
    pub fn transport(&self) -> MockTransport {
        MockTransport {
            server: self.clone(),
            reject_login: false,
        }
    }

    pub fn commands(&self) -> Vec<Command> {
        self.state.lock().unwrap().commands.clone()
    }

    pub fn fetches(&self) -> Vec<Vec<u32>> {
        self.commands()
            .into_iter()
            .filter_map(|c| match c {
                Command::Fetch(uids) => Some(uids),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, command: &Command) -> usize {
        self.commands().iter().filter(|c| *c == command).count()
    }

    pub fn violations(&self) -> Vec<String> {
        self.state.lock().unwrap().violations.clone()
    }

    pub fn connects(&self) -> usize {
        self.state.lock().unwrap().connects
    }

    /// Append `n` new messages and signal the live connection.
    pub async fn deliver_new(&self, n: u32) {
        let (tx, exists) = {
            let mut state = self.state.lock().unwrap();
            let next = state.uids.last().copied().unwrap_or(0) + 1;
            state.uids.extend(next..next + n);
            (state.events.clone(), state.uids.len() as u32)
        };
        if let Some(tx) = tx {
            tx.send(TransportEvent::Arrival { exists }).await.ok();
        }
    }

    /// Simulate the server resetting the live connection.
    pub async fn drop_connection(&self) {
        let tx = self.state.lock().unwrap().events.take();
        if let Some(tx) = tx {
            tx.send(TransportEvent::Failed(SyncError::Network(
                "connection reset by peer".into(),
            )))
            .await
            .ok();
        }
    }

    fn record(&self, command: Command) {
        let mut state = self.state.lock().unwrap();
        if state.in_wait && command != Command::LeaveWait {
            let violation = format!("{:?} issued while in wait mode", command);
            state.violations.push(violation);
        }
        state.commands.push(command);
    }
}

pub struct MockConnector {
    server: MockServer,
}

#[async_trait]
impl Connector for MockConnector {
    type Transport = MockTransport;

    async fn connect(
        &self,
        _credential: &AccountCredential,
    ) -> Result<Link<MockTransport>, SyncError> {
        let mut state = self.server.state.lock().unwrap();
        state.connects += 1;
        let outcome = state.script.pop_front().unwrap_or(ConnectOutcome::Accept);
        if outcome == ConnectOutcome::Refuse {
            return Err(SyncError::Network("connection refused".into()));
        }

        let (tx, rx) = mpsc::channel(16);
        state.events = Some(tx);
        state.in_wait = false;
        Ok(Link {
            transport: MockTransport {
                server: self.server.clone(),
                reject_login: outcome == ConnectOutcome::RejectLogin,
            },
            events: rx,
        })
    }
}

pub struct MockTransport {
    server: MockServer,
    reject_login: bool,
}

#[async_trait]
impl MailTransport for MockTransport {
    async fn authenticate(&mut self, credential: &AccountCredential) -> Result<(), SyncError> {
        self.server.record(Command::Authenticate);
        if self.reject_login {
            return Err(SyncError::Authentication {
                identity: credential.identity.clone(),
                reason: "[AUTHENTICATIONFAILED] Invalid credentials".into(),
            });
        }
        Ok(())
    }

    async fn identify(&mut self) -> Result<HostIdentity, SyncError> {
        self.server.record(Command::Identify);
        let host = self.server.state.lock().unwrap().host.clone();
        Ok(HostIdentity {
            host,
            capabilities: vec!["IMAP4rev1".into(), "IDLE".into()],
        })
    }

    async fn select_mailbox(&mut self, mailbox: &str) -> Result<MailboxStatus, SyncError> {
        self.server.record(Command::Select(mailbox.to_string()));
        let state = self.server.state.lock().unwrap();
        Ok(MailboxStatus {
            exists: state.uids.len() as u32,
            uid_validity: Some(state.uid_validity),
            uid_next: Some(state.uids.last().copied().unwrap_or(0) + 1),
        })
    }

    async fn search_since(&mut self, since: NaiveDate) -> Result<Vec<u32>, SyncError> {
        self.server.record(Command::SearchSince(since));
        let mut state = self.server.state.lock().unwrap();
        let call = state.search_calls;
        state.search_calls += 1;
        if state.failing_search_calls.contains(&call) {
            return Err(SyncError::Protocol("BAD Could not parse command".into()));
        }
        Ok(state.uids.clone())
    }

    async fn search_after(&mut self, uid: u32) -> Result<Vec<u32>, SyncError> {
        self.server.record(Command::SearchAfter(uid));
        let state = self.server.state.lock().unwrap();
        Ok(state.uids.iter().copied().filter(|u| *u > uid).collect())
    }

    async fn fetch_batch(&mut self, uids: &[u32]) -> Result<Vec<RawMessage>, SyncError> {
        self.server.record(Command::Fetch(uids.to_vec()));
        let mut state = self.server.state.lock().unwrap();
        let call = state.fetch_calls;
        state.fetch_calls += 1;
        if state.failing_fetch_calls.contains(&call) {
            return Err(SyncError::Protocol("BAD malformed FETCH response".into()));
        }
        Ok(uids
            .iter()
            .filter(|uid| state.uids.contains(uid))
            .map(|&uid| RawMessage {
                uid,
                bytes: if state.unparseable.contains(&uid) {
                    Vec::new()
                } else {
                    message_bytes(uid)
                },
            })
            .collect())
    }

    async fn enter_wait(&mut self) -> Result<(), SyncError> {
        self.server.record(Command::EnterWait);
        self.server.state.lock().unwrap().in_wait = true;
        Ok(())
    }

    async fn leave_wait(&mut self) -> Result<(), SyncError> {
        self.server.record(Command::LeaveWait);
        let mut state = self.server.state.lock().unwrap();
        if !state.in_wait {
            return Err(SyncError::Protocol("DONE without IDLE".into()));
        }
        let call = state.leave_calls;
        state.leave_calls += 1;
        if state.failing_leave_calls.contains(&call) {
            return Err(SyncError::Protocol("unexpected response to DONE".into()));
        }
        state.in_wait = false;
        Ok(())
    }

    async fn noop(&mut self) -> Result<(), SyncError> {
        self.server.record(Command::Noop);
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.server.record(Command::Disconnect);
    }
}
