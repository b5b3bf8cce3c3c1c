//! One-shot connection check used by `mailsync check`.

use super::transport::{Connector, MailTransport, MailboxStatus};
use crate::error::SyncError;
use crate::mail::types::AccountCredential;

/// Connect, log in and open `mailbox` read-only, then log out.
///
/// The error keeps the same classification the session uses, so a rejected
/// password is reported as `Authentication` and an unreachable host as
/// `Network`.
pub async fn verify_connection<C: Connector>(
    connector: &C,
    credential: &AccountCredential,
    mailbox: &str,
) -> Result<MailboxStatus, SyncError> {
    let mut link = connector
        .connect(credential)
        .await
        .map_err(SyncError::at_handshake)?;

    let result = async {
        link.transport
            .authenticate(credential)
            .await
            .map_err(SyncError::at_handshake)?;
        link.transport
            .select_mailbox(mailbox)
            .await
            .map_err(SyncError::at_handshake)
    }
    .await;

    link.transport.disconnect().await;
    if let Ok(status) = &result {
        tracing::debug!(
            "Verified {} on {}: {} messages",
            mailbox,
            credential.host,
            status.exists
        );
    }
    result
}
