//! IDLE watcher: owns the session while the connection sits in wait mode.

use std::convert::Infallible;

use async_imap::extensions::idle::{Handle, IdleResponse};
use async_imap::imap_proto::{MailboxDatum, Response};
use async_imap::types::UnsolicitedResponse;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::stream::MailStream;
use super::{ImapSession, classify};
use crate::error::SyncError;
use crate::sync::transport::TransportEvent;

/// New message count carried by an untagged `* n EXISTS`.
fn exists_count(response: &Response<'_>) -> Option<u32> {
    match response {
        &Response::MailboxData(MailboxDatum::Exists(n)) => Some(n),
        _ => None,
    }
}

/// Latest EXISTS the server pushed while other commands were running.
pub(crate) fn drain_exists(session: &mut ImapSession) -> Option<u32> {
    let mut latest = None;
    while let Ok(response) = session.unsolicited_responses.try_recv() {
        if let UnsolicitedResponse::Exists(n) = response {
            latest = Some(n);
        }
    }
    latest
}

/// Forward arrivals until `stop` fires, then send DONE and hand the session back.
///
/// Events are sent with `try_send`: an arrival only means "search again", so
/// dropping one while the channel is full loses nothing.
pub(crate) async fn watch(
    mut idle: Handle<MailStream>,
    events: mpsc::Sender<TransportEvent>,
    stop: CancellationToken,
) -> Result<ImapSession, SyncError> {
    loop {
        let (wait, interrupt) = idle.wait();
        let stopper = async {
            stop.cancelled().await;
            drop(interrupt);
            std::future::pending::<Infallible>().await
        };

        let response = tokio::select! {
            response = wait => response,
            never = stopper => match never {},
        };

        match response {
            Ok(IdleResponse::NewData(data)) => {
                if let Some(exists) = exists_count(data.parsed()) {
                    tracing::debug!("IDLE reported {} messages", exists);
                    events.try_send(TransportEvent::Arrival { exists }).ok();
                }
            }
            Ok(IdleResponse::ManualInterrupt) => break,
            Ok(IdleResponse::Timeout) => {}
            Err(e) => {
                let err = classify("IDLE", e);
                let err = match err {
                    SyncError::Network(_) => err,
                    other => SyncError::Network(other.to_string()),
                };
                events.try_send(TransportEvent::Failed(err.clone())).ok();
                return Err(err);
            }
        }

        if stop.is_cancelled() {
            break;
        }
    }

    idle.done().await.map_err(|e| classify("DONE", e))
}
