//! Mailbox synchronization engine.
//!
//! A [`MailboxSession`] owns one account's connection and drives it through
//! connect, backfill and live waiting, reconnecting with backoff when the
//! link drops. Protocol specifics live behind [`transport::MailTransport`].

pub mod backfill;
pub mod fetch;
pub mod handlers;
pub mod keepalive;
pub mod notify;
pub mod profile;
pub mod retry;
pub mod session;
pub mod state;
pub mod transport;
pub mod verify;
pub mod watermark;

#[cfg(test)]
pub(crate) mod testing;

pub use handlers::{MessageSink, StateChange};
pub use retry::{ReconnectAttempt, ReconnectionPolicy};
pub use session::{MailboxSession, SyncSettings};
pub use state::SessionState;
pub use transport::{Connector, MailTransport};
pub use verify::verify_connection;
pub use watermark::SyncWatermark;
