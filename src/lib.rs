//! Resilient IMAP mailbox synchronization.
//!
//! Each configured account gets a [`sync::MailboxSession`] that backfills
//! recent mail, then waits for new arrivals over IDLE and reconnects with
//! backoff when the connection drops. Parsed messages go to a
//! [`sync::MessageSink`]; the bundled [`cache::Cache`] stores them in SQLite.

pub mod account;
pub mod cache;
pub mod config;
pub mod constants;
pub mod credentials;
pub mod error;
pub mod mail;
pub mod sync;
