//! Tuning defaults for the synchronization engine
//!
//! Centralizes magic numbers so config defaults and tests agree on them.

/// Mailbox synchronized when the config does not name one.
pub const DEFAULT_MAILBOX: &str = "INBOX";

/// Historical window scanned on every connection, in days.
pub const BACKFILL_DAYS: u64 = 30;

/// Identifiers fetched per backfill command.
/// Bounds peak memory and keeps single commands short.
pub const BACKFILL_BATCH_SIZE: usize = 200;

/// First reconnection delay in milliseconds.
pub const RECONNECT_BASE_DELAY_MS: u64 = 1_000;

/// Upper bound of the uniform jitter added to each reconnection delay.
pub const RECONNECT_JITTER_MS: u64 = 1_000;

/// Maximum reconnection delay in seconds.
pub const MAX_RETRY_DELAY_SECS: u64 = 30;

/// Consecutive failed reconnection attempts before the session fails for good.
pub const MAX_RETRIES: u32 = 5;

/// Keepalive interval for Gmail-class servers (drop idle sessions around 29 min).
pub const KEEPALIVE_PROFILE_A_SECS: u64 = 25 * 60;

/// Keepalive interval for Microsoft-class servers (aggressive idle timeouts).
pub const KEEPALIVE_PROFILE_B_SECS: u64 = 15 * 60;

/// Keepalive interval for everything else.
/// RFC 3501 autologout is at least 30 minutes; stay under it.
pub const KEEPALIVE_GENERIC_SECS: u64 = 29 * 60;

/// TCP connect timeout in seconds.
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Upper bound for any single non-wait protocol command, in seconds.
pub const COMMAND_TIMEOUT_SECS: u64 = 60;

/// Capacity of the per-connection transport event channel.
pub const TRANSPORT_EVENT_CAPACITY: usize = 16;
