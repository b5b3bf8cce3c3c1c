//! Live arrivals: park the connection in wait mode and fetch on demand.

use tokio_util::sync::CancellationToken;

use super::fetch::{FetchPipeline, FetchStats};
use super::keepalive::KeepaliveScheduler;
use super::state::{SessionState, StateTracker};
use super::transport::{Link, MailTransport, TransportEvent};
use super::watermark::SyncWatermark;
use crate::error::SyncError;

/// Why the wait loop returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitExit {
    /// The caller asked the session to stop
    Stopped,
    /// The connection is unusable and must be replaced
    Lost(SyncError),
}

enum Wakeup {
    Stop,
    Arrival(u32),
    Keepalive,
    Lost(SyncError),
}

pub struct NotificationCoordinator {
    keepalive: KeepaliveScheduler,
}

/// Anything that goes wrong while toggling wait mode leaves the connection
/// in an unknown protocol state, so it is handled like a dropped link.
fn as_link_failure(err: SyncError) -> SyncError {
    match err {
        SyncError::Network(_) => err,
        other => SyncError::Network(other.to_string()),
    }
}

impl NotificationCoordinator {
    pub fn new(keepalive: KeepaliveScheduler) -> Self {
        Self { keepalive }
    }

    /// Wait for arrivals until stopped or the connection is lost.
    ///
    /// The keepalive timer only runs while the transport is in wait mode;
    /// it is re-armed every time wait mode is re-entered.
    pub(crate) async fn run<T: MailTransport>(
        &self,
        link: &mut Link<T>,
        pipeline: &FetchPipeline,
        watermark: &mut SyncWatermark,
        states: &StateTracker,
        cancel: &CancellationToken,
    ) -> WaitExit {
        loop {
            if cancel.is_cancelled() {
                return WaitExit::Stopped;
            }
            if let Err(e) = link.transport.enter_wait().await {
                return WaitExit::Lost(as_link_failure(e));
            }
            states.set(SessionState::Waiting);

            let mut keepalive = self.keepalive.start();
            let wakeup = tokio::select! {
                biased;
                _ = cancel.cancelled() => Wakeup::Stop,
                event = link.events.recv() => match event {
                    Some(TransportEvent::Arrival { exists }) => Wakeup::Arrival(exists),
                    Some(TransportEvent::Failed(e)) => Wakeup::Lost(e),
                    None => Wakeup::Lost(SyncError::Network("transport event channel closed".into())),
                },
                _ = keepalive.due() => Wakeup::Keepalive,
            };
            drop(keepalive);

            match wakeup {
                Wakeup::Stop => {
                    if let Err(e) = link.transport.leave_wait().await {
                        tracing::debug!(account = %watermark.account_id, "Leaving wait mode on stop: {}", e);
                    }
                    return WaitExit::Stopped;
                }
                Wakeup::Lost(e) => return WaitExit::Lost(e),
                Wakeup::Keepalive => {
                    if let Err(e) = link.transport.leave_wait().await {
                        return WaitExit::Lost(as_link_failure(e));
                    }
                    tracing::debug!(account = %watermark.account_id, "Keepalive");
                    match link.transport.noop().await {
                        Ok(()) => {}
                        Err(e) if e.is_connection_level() => return WaitExit::Lost(e),
                        Err(e) => {
                            tracing::warn!(account = %watermark.account_id, "Keepalive rejected: {}", e)
                        }
                    }
                }
                Wakeup::Arrival(exists) => {
                    if let Err(e) = link.transport.leave_wait().await {
                        return WaitExit::Lost(as_link_failure(e));
                    }
                    states.set(SessionState::Fetching);
                    tracing::debug!(account = %watermark.account_id, "Mailbox now has {} messages", exists);
                    match self
                        .fetch_new(&mut link.transport, pipeline, watermark)
                        .await
                    {
                        Ok(stats) => tracing::info!(
                            account = %watermark.account_id,
                            "Fetched {} new message(s), up to uid {}",
                            stats.delivered,
                            watermark.last_seen
                        ),
                        Err(e) if e.is_connection_level() => return WaitExit::Lost(e),
                        Err(e) => {
                            tracing::warn!(account = %watermark.account_id, "Fetching new messages failed: {}", e)
                        }
                    }
                }
            }
        }
    }

    async fn fetch_new<T: MailTransport>(
        &self,
        transport: &mut T,
        pipeline: &FetchPipeline,
        watermark: &mut SyncWatermark,
    ) -> Result<FetchStats, SyncError> {
        let mut uids = transport.search_after(watermark.last_seen).await?;
        uids.sort_unstable();
        uids.dedup();
        uids.retain(|&uid| watermark.is_new(uid));
        if uids.is_empty() {
            return Ok(FetchStats::default());
        }
        pipeline.fetch_in_batches(transport, &uids, watermark).await
    }
}
