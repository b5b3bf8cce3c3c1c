//! Per-account session: one actor task owning one connection at a time.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::backfill::{BackfillCoordinator, BackfillWindow};
use super::fetch::FetchPipeline;
use super::handlers::{Handlers, MessageSink, StateChange};
use super::keepalive::KeepaliveScheduler;
use super::notify::{NotificationCoordinator, WaitExit};
use super::profile::ServerProfile;
use super::retry::{ReconnectAttempt, ReconnectionPolicy, RetryDecision};
use super::state::{SessionState, StateTracker};
use super::transport::{Connector, Link, MailTransport, MailboxStatus};
use super::watermark::SyncWatermark;
use crate::constants::{BACKFILL_BATCH_SIZE, BACKFILL_DAYS, DEFAULT_MAILBOX};
use crate::error::{ConnectError, SyncError};
use crate::mail::types::AccountCredential;

/// Per-session tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub mailbox: String,
    pub backfill_days: u64,
    pub batch_size: usize,
    /// Replaces the keepalive interval derived from the server profile
    pub keepalive_override: Option<Duration>,
    pub reconnect: ReconnectionPolicy,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            mailbox: DEFAULT_MAILBOX.to_string(),
            backfill_days: BACKFILL_DAYS,
            batch_size: BACKFILL_BATCH_SIZE,
            keepalive_override: None,
            reconnect: ReconnectionPolicy::default(),
        }
    }
}

/// What the actor hands back when it ends.
struct ActorExit {
    watermark: SyncWatermark,
    result: Result<(), SyncError>,
}

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<ActorExit>,
}

/// Keeps one account's mailbox in sync.
///
/// Handlers registered after `start` apply from the next `start` on.
pub struct MailboxSession<C: Connector> {
    account_id: String,
    connector: Arc<C>,
    settings: SyncSettings,
    handlers: Handlers,
    watermark: SyncWatermark,
    state_tx: Arc<watch::Sender<SessionState>>,
    running: Option<Running>,
}

impl<C: Connector> MailboxSession<C> {
    pub fn new(account_id: impl Into<String>, connector: C, settings: SyncSettings) -> Self {
        let account_id = account_id.into();
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        Self {
            watermark: SyncWatermark::new(account_id.clone()),
            account_id,
            connector: Arc::new(connector),
            settings,
            handlers: Handlers::default(),
            state_tx: Arc::new(state_tx),
            running: None,
        }
    }

    /// Resume from a previously persisted watermark.
    pub fn with_watermark(mut self, watermark: SyncWatermark) -> Self {
        self.watermark = watermark;
        self
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Watermark as of the last time the actor stopped.
    pub fn watermark(&self) -> &SyncWatermark {
        &self.watermark
    }

    pub fn on_message(&mut self, sink: Arc<dyn MessageSink>) {
        self.handlers.sink = Some(sink);
    }

    pub fn on_indexed(&mut self, handler: impl Fn(&str, u32) + Send + Sync + 'static) {
        self.handlers.indexed.push(Arc::new(handler));
    }

    pub fn on_state_change(&mut self, handler: impl Fn(&StateChange) + Send + Sync + 'static) {
        self.handlers.state.push(Arc::new(handler));
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| !running.task.is_finished())
    }

    /// Spawn the session actor and wait for the first connection outcome.
    ///
    /// Returns once the mailbox is open, or once the first network failure
    /// has handed over to the reconnection policy. A rejected credential is
    /// terminal and reported here.
    pub async fn start(&mut self, credential: AccountCredential) -> Result<(), ConnectError> {
        if self.is_running() {
            return Err(ConnectError::AlreadyRunning(self.account_id.clone()));
        }
        self.reap().await.ok();

        let cancel = CancellationToken::new();
        let (ready_tx, ready_rx) = oneshot::channel();
        let actor = SessionActor {
            account_id: self.account_id.clone(),
            connector: Arc::clone(&self.connector),
            settings: self.settings.clone(),
            pipeline: FetchPipeline::new(
                self.account_id.clone(),
                self.settings.batch_size,
                self.handlers.clone(),
            ),
            tracker: StateTracker::new(
                self.account_id.clone(),
                Arc::clone(&self.state_tx),
                self.handlers.clone(),
            ),
            sink: self.handlers.sink.clone(),
            watermark: self.watermark.clone(),
            cancel: cancel.clone(),
        };

        tracing::info!(account = %self.account_id, "Starting session with {}", credential.host);
        let task = tokio::spawn(actor.run(credential, ready_tx));
        self.running = Some(Running { cancel, task });

        match ready_rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.reap().await.ok();
                Err(ConnectError::Terminal(e))
            }
            Err(_) => Err(ConnectError::Stopped(self.account_id.clone())),
        }
    }

    /// Stop the actor and close the connection. Safe to call in any state.
    pub async fn stop(&mut self) {
        if let Some(running) = &self.running {
            running.cancel.cancel();
        }
        if let Err(e) = self.reap().await {
            tracing::debug!(account = %self.account_id, "Session had already failed: {}", e);
        }
    }

    /// Wait for the actor to end on its own. `Err` carries the terminal failure.
    pub async fn finished(&mut self) -> Result<(), SyncError> {
        self.reap().await
    }

    async fn reap(&mut self) -> Result<(), SyncError> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };
        match running.task.await {
            Ok(exit) => {
                self.watermark = exit.watermark;
                exit.result
            }
            Err(e) => {
                tracing::error!(account = %self.account_id, "Session task panicked: {}", e);
                self.state_tx.send_replace(SessionState::Failed);
                Err(SyncError::Protocol(format!("session task aborted: {}", e)))
            }
        }
    }
}

impl<C: Connector> Drop for MailboxSession<C> {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.cancel.cancel();
        }
    }
}

/// An open, authenticated connection with the mailbox selected.
struct Connection<T> {
    link: Link<T>,
    profile: ServerProfile,
    status: MailboxStatus,
}

struct SessionActor<C: Connector> {
    account_id: String,
    connector: Arc<C>,
    settings: SyncSettings,
    pipeline: FetchPipeline,
    tracker: StateTracker,
    sink: Option<Arc<dyn MessageSink>>,
    watermark: SyncWatermark,
    cancel: CancellationToken,
}

type ReadySender = oneshot::Sender<Result<(), SyncError>>;

impl<C: Connector> SessionActor<C> {
    async fn run(mut self, credential: AccountCredential, ready: ReadySender) -> ActorExit {
        let mut ready = Some(ready);
        let result = self.drive(&credential, &mut ready).await;

        match &result {
            Ok(()) => {
                self.tracker.set(SessionState::Disconnected);
                tracing::info!(account = %self.account_id, "Session stopped at uid {}", self.watermark.last_seen);
            }
            Err(e) => {
                self.tracker
                    .transition(SessionState::Failed, None, Some(e.to_string()));
                tracing::error!(account = %self.account_id, "Session failed: {}", e);
                if let Some(tx) = ready.take() {
                    tx.send(Err(e.clone())).ok();
                }
            }
        }

        ActorExit {
            watermark: self.watermark,
            result,
        }
    }

    /// Connect, sync, wait; on loss go through the reconnection policy.
    /// `Ok` means stopped on request.
    async fn drive(
        &mut self,
        credential: &AccountCredential,
        ready: &mut Option<ReadySender>,
    ) -> Result<(), SyncError> {
        let cancel = self.cancel.clone();
        let mut attempt: Option<ReconnectAttempt> = None;

        loop {
            self.tracker.set(SessionState::Connecting);
            let opened = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                opened = self.open(credential) => opened,
            };

            let failure = match opened {
                Ok(mut conn) => {
                    if self.watermark.rebase(conn.status.uid_validity) {
                        tracing::warn!(
                            account = %self.account_id,
                            "UIDVALIDITY changed to {:?}, resyncing from scratch",
                            conn.status.uid_validity
                        );
                    }
                    if let Some(sink) = &self.sink
                        && let Err(e) = sink.opened(&self.watermark).await
                    {
                        tracing::warn!(account = %self.account_id, "Sink could not record watermark: {}", e);
                    }
                    self.tracker.set(SessionState::Ready);
                    if let Some(previous) = attempt.take() {
                        tracing::info!(account = %self.account_id, "Reconnected after {} attempt(s)", previous.attempt_count);
                    }
                    if let Some(tx) = ready.take() {
                        tx.send(Ok(())).ok();
                    }

                    match self.serve(&mut conn, &cancel).await {
                        WaitExit::Stopped => {
                            conn.link.transport.disconnect().await;
                            return Ok(());
                        }
                        WaitExit::Lost(e) => e,
                    }
                }
                Err(e) if e.is_terminal() => return Err(e),
                Err(e) => e,
            };

            let reason = failure.to_string();
            match self.settings.reconnect.on_failure(&mut attempt, &self.account_id) {
                RetryDecision::Retry(next) => {
                    let delay = next.next_delay;
                    self.tracker
                        .transition(SessionState::Reconnecting, Some(next), Some(reason));
                    if let Some(tx) = ready.take() {
                        tx.send(Ok(())).ok();
                    }
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                RetryDecision::Exhausted { attempts } => {
                    self.tracker
                        .transition(SessionState::Reconnecting, None, Some(reason.clone()));
                    return Err(SyncError::RetryExhausted {
                        attempts,
                        last_error: reason,
                    });
                }
            }
        }
    }

    async fn open(
        &self,
        credential: &AccountCredential,
    ) -> Result<Connection<C::Transport>, SyncError> {
        let mut link = self
            .connector
            .connect(credential)
            .await
            .map_err(SyncError::at_handshake)?;
        let transport = &mut link.transport;

        transport
            .authenticate(credential)
            .await
            .map_err(SyncError::at_handshake)?;
        let identity = transport.identify().await.map_err(SyncError::at_handshake)?;
        let profile = ServerProfile::classify(&identity, self.settings.keepalive_override);
        let status = transport
            .select_mailbox(&self.settings.mailbox)
            .await
            .map_err(SyncError::at_handshake)?;

        tracing::info!(
            account = %self.account_id,
            "Opened {} on {} ({:?}, keepalive {}s): {} messages",
            self.settings.mailbox,
            identity.host,
            profile.class,
            profile.keepalive.as_secs(),
            status.exists
        );

        Ok(Connection {
            link,
            profile,
            status,
        })
    }

    async fn serve(
        &mut self,
        conn: &mut Connection<C::Transport>,
        cancel: &CancellationToken,
    ) -> WaitExit {
        self.tracker.set(SessionState::Backfilling);
        let backfill = BackfillCoordinator::new(BackfillWindow::ending_today(
            self.settings.backfill_days,
            self.settings.batch_size,
        ));

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return WaitExit::Stopped,
            outcome = backfill.run(&mut conn.link.transport, &self.pipeline, &mut self.watermark) => outcome,
        };
        match outcome {
            Ok(summary) => tracing::info!(
                account = %self.account_id,
                "Backfill complete: {} matched, {} delivered, {} failed batch(es), up to uid {}",
                summary.matched,
                summary.stats.delivered,
                summary.stats.failed_batches,
                self.watermark.last_seen
            ),
            Err(e) if e.is_connection_level() => return WaitExit::Lost(e),
            Err(e) => {
                tracing::warn!(account = %self.account_id, "Backfill abandoned: {}", e)
            }
        }

        let notifier = NotificationCoordinator::new(KeepaliveScheduler::new(conn.profile.keepalive));
        notifier
            .run(
                &mut conn.link,
                &self.pipeline,
                &mut self.watermark,
                &self.tracker,
                cancel,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::sync::testing::{
        Command, ConnectOutcome, MockConnector, MockServer, RecordingSink, credential,
    };

    struct Observed {
        changes: Arc<Mutex<Vec<StateChange>>>,
        indexed: Arc<Mutex<Vec<u32>>>,
    }

    impl Observed {
        fn states(&self) -> Vec<SessionState> {
            self.changes.lock().unwrap().iter().map(|c| c.to).collect()
        }

        fn reconnects(&self) -> Vec<ReconnectAttempt> {
            self.changes
                .lock()
                .unwrap()
                .iter()
                .filter_map(|c| c.reconnect.clone())
                .collect()
        }
    }

    fn session(server: &MockServer) -> (MailboxSession<MockConnector>, Observed) {
        let mut session =
            MailboxSession::new("me@example.com", server.connector(), SyncSettings::default());
        let changes = Arc::new(Mutex::new(Vec::new()));
        let indexed = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&changes);
        session.on_state_change(move |c| log.lock().unwrap().push(c.clone()));
        let log = Arc::clone(&indexed);
        session.on_indexed(move |_, uid| log.lock().unwrap().push(uid));
        session.on_message(Arc::new(RecordingSink::default()));
        (session, Observed { changes, indexed })
    }

    async fn wait_for_state(session: &MailboxSession<MockConnector>, state: SessionState) {
        let mut rx = session.subscribe();
        tokio::time::timeout(Duration::from_secs(3600), rx.wait_for(|s| *s == state))
            .await
            .expect("state not reached")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_account_backfills_then_waits() {
        let server = MockServer::new("imap.example.com").with_messages(450);
        let (mut session, observed) = session(&server);

        session.start(credential()).await.unwrap();
        wait_for_state(&session, SessionState::Waiting).await;

        assert_eq!(
            observed.states(),
            vec![
                SessionState::Connecting,
                SessionState::Ready,
                SessionState::Backfilling,
                SessionState::Waiting
            ]
        );
        let sizes: Vec<usize> = server.fetches().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![200, 200, 50]);
        assert_eq!(observed.indexed.lock().unwrap().len(), 450);
        assert!(session.is_connected());

        session.stop().await;
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(session.watermark().last_seen, 450);
        assert_eq!(server.commands().last(), Some(&Command::Disconnect));
        assert!(server.violations().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_arrival_is_fetched() {
        let server = MockServer::new("imap.example.com").with_messages(450);
        let (mut session, observed) = session(&server);

        session.start(credential()).await.unwrap();
        wait_for_state(&session, SessionState::Waiting).await;
        let before = observed.changes.lock().unwrap().len();

        server.deliver_new(2).await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(server.fetches().last(), Some(&vec![451, 452]));
        let after: Vec<SessionState> = observed.states()[before..].to_vec();
        assert_eq!(after, vec![SessionState::Fetching, SessionState::Waiting]);
        assert_eq!(observed.indexed.lock().unwrap().len(), 452);
        assert_eq!(session.state(), SessionState::Waiting);

        session.stop().await;
        assert!(server.violations().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_connection_reconnects_with_backoff() {
        let server = MockServer::new("imap.example.com").with_messages(10);
        let (mut session, observed) = session(&server);

        session.start(credential()).await.unwrap();
        wait_for_state(&session, SessionState::Waiting).await;
        server.drop_connection().await;
        wait_for_state(&session, SessionState::Reconnecting).await;

        let attempts = observed.reconnects();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].attempt_count, 1);
        assert!(attempts[0].next_delay >= Duration::from_secs(1));
        assert!(attempts[0].next_delay < Duration::from_secs(2));

        wait_for_state(&session, SessionState::Waiting).await;
        assert_eq!(server.connects(), 2);
        // Already-seen messages are not fetched again
        assert_eq!(server.fetches().len(), 1);

        // A successful reconnect resets the backoff
        server.drop_connection().await;
        wait_for_state(&session, SessionState::Reconnecting).await;
        let attempts = observed.reconnects();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[1].attempt_count, 1);

        session.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_credential_fails_without_retry() {
        let server = MockServer::new("imap.example.com")
            .with_messages(10)
            .script(&[ConnectOutcome::RejectLogin]);
        let (mut session, observed) = session(&server);

        let err = session.start(credential()).await.unwrap_err();

        assert!(matches!(
            err,
            ConnectError::Terminal(SyncError::Authentication { .. })
        ));
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(
            observed.states(),
            vec![SessionState::Connecting, SessionState::Failed]
        );
        assert!(observed.reconnects().is_empty());
        assert_eq!(server.connects(), 1);
        assert!(server.fetches().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_five_failed_reconnects() {
        let server = MockServer::new("imap.example.com")
            .with_messages(1)
            .script(&[
                ConnectOutcome::Accept,
                ConnectOutcome::Refuse,
                ConnectOutcome::Refuse,
                ConnectOutcome::Refuse,
                ConnectOutcome::Refuse,
                ConnectOutcome::Refuse,
            ]);
        let (mut session, observed) = session(&server);

        session.start(credential()).await.unwrap();
        wait_for_state(&session, SessionState::Waiting).await;
        server.drop_connection().await;

        let err = session.finished().await.unwrap_err();

        assert_eq!(
            err,
            SyncError::RetryExhausted {
                attempts: 5,
                last_error: "network error: connection refused".into(),
            }
        );
        assert_eq!(server.connects(), 6);
        assert_eq!(session.state(), SessionState::Failed);

        let counts: Vec<u32> = observed.reconnects().iter().map(|a| a.attempt_count).collect();
        assert_eq!(counts, vec![1, 2, 3, 4, 5]);
        let delays: Vec<Duration> = observed.reconnects().iter().map(|a| a.next_delay).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert!(delays.iter().all(|d| *d <= Duration::from_secs(30)));
        assert_eq!(observed.states().last(), Some(&SessionState::Failed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_only_while_waiting() {
        let server = MockServer::new("imap.gmail.com").with_messages(3);
        let (mut session, _observed) = session(&server);

        session.start(credential()).await.unwrap();
        wait_for_state(&session, SessionState::Waiting).await;
        tokio::time::sleep(Duration::from_secs(51 * 60)).await;

        assert_eq!(server.count(&Command::Noop), 2);
        let commands = server.commands();
        let first_wait = commands
            .iter()
            .position(|c| *c == Command::EnterWait)
            .unwrap();
        let first_noop = commands.iter().position(|c| *c == Command::Noop).unwrap();
        assert!(first_noop > first_wait);
        assert!(server.violations().is_empty());

        session.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_reconnect_delay() {
        let server = MockServer::new("imap.example.com")
            .with_messages(1)
            .script(&[ConnectOutcome::Refuse]);
        let (mut session, _observed) = session(&server);

        // First failure hands over to the policy; start still succeeds
        session.start(credential()).await.unwrap();
        assert_eq!(session.state(), SessionState::Reconnecting);

        session.stop().await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(server.connects(), 1);
        assert!(!session.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_is_rejected_and_restart_resumes() {
        let server = MockServer::new("imap.example.com").with_messages(5);
        let (mut session, _observed) = session(&server);

        session.start(credential()).await.unwrap();
        assert_eq!(
            session.start(credential()).await,
            Err(ConnectError::AlreadyRunning("me@example.com".into()))
        );
        wait_for_state(&session, SessionState::Waiting).await;
        session.stop().await;
        session.stop().await;

        session.start(credential()).await.unwrap();
        wait_for_state(&session, SessionState::Waiting).await;
        assert_eq!(server.fetches().len(), 1);
        session.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_leave_wait_reconnects() {
        let server = MockServer::new("imap.example.com")
            .with_messages(3)
            .fail_leave_wait(0);
        let (mut session, observed) = session(&server);

        session.start(credential()).await.unwrap();
        wait_for_state(&session, SessionState::Waiting).await;
        server.deliver_new(1).await;
        wait_for_state(&session, SessionState::Reconnecting).await;

        let attempts = observed.reconnects();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].attempt_count, 1);

        wait_for_state(&session, SessionState::Waiting).await;
        assert_eq!(server.connects(), 2);
        // The message signalled before the failure is caught up after reconnect
        assert_eq!(server.fetches(), vec![vec![1, 2, 3], vec![4]]);
        assert!(server.violations().is_empty());

        session.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_backfill_search_error_still_waits() {
        let server = MockServer::new("imap.example.com")
            .with_messages(5)
            .fail_search(0);
        let (mut session, observed) = session(&server);

        session.start(credential()).await.unwrap();
        wait_for_state(&session, SessionState::Waiting).await;

        assert!(observed.reconnects().is_empty());
        assert!(server.fetches().is_empty());
        assert_eq!(server.connects(), 1);

        // Live arrivals pick up everything above the untouched watermark
        server.deliver_new(1).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(server.fetches(), vec![vec![1, 2, 3, 4, 5, 6]]);
        assert_eq!(session.state(), SessionState::Waiting);

        session.stop().await;
        assert_eq!(session.watermark().last_seen, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_arrival_fetch_error_keeps_session_alive() {
        let server = MockServer::new("imap.example.com")
            .with_messages(3)
            .fail_fetch_call(1);
        let (mut session, observed) = session(&server);

        session.start(credential()).await.unwrap();
        wait_for_state(&session, SessionState::Waiting).await;
        server.deliver_new(3).await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(session.state(), SessionState::Waiting);
        assert_eq!(server.connects(), 1);
        assert!(observed.reconnects().is_empty());
        assert_eq!(observed.indexed.lock().unwrap().len(), 3);

        // The failed uids stay above the watermark and come back with the next arrival
        server.deliver_new(1).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(server.fetches().last(), Some(&vec![4, 5, 6, 7]));
        assert_eq!(observed.indexed.lock().unwrap().len(), 7);
        assert!(server.violations().is_empty());

        session.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_uid_validity_change_refetches_mailbox() {
        let server = MockServer::new("imap.example.com").with_messages(3);
        let (mut session, observed) = session(&server);

        session.start(credential()).await.unwrap();
        wait_for_state(&session, SessionState::Waiting).await;
        assert_eq!(observed.indexed.lock().unwrap().len(), 3);

        server.set_uid_validity(2);
        server.drop_connection().await;
        wait_for_state(&session, SessionState::Reconnecting).await;
        wait_for_state(&session, SessionState::Waiting).await;

        assert_eq!(server.fetches(), vec![vec![1, 2, 3], vec![1, 2, 3]]);
        assert_eq!(observed.indexed.lock().unwrap().len(), 6);

        session.stop().await;
        assert_eq!(session.watermark().uid_validity, Some(2));
        assert_eq!(session.watermark().last_seen, 3);
    }
}
