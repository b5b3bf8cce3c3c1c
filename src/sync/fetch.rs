//! Shared fetch path: batched fetch, parse, deliver, advance the watermark.
//!
//! Both the historical backfill and live arrivals go through here, so the
//! watermark has exactly one writer.

use super::handlers::Handlers;
use super::transport::MailTransport;
use super::watermark::SyncWatermark;
use crate::error::SyncError;
use crate::mail::parser::parse_message;
use crate::mail::types::RawMessage;

/// Counters for one run of the fetch path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchStats {
    pub batches: usize,
    pub failed_batches: usize,
    pub delivered: usize,
    pub parse_failures: usize,
    pub sink_failures: usize,
}

pub struct FetchPipeline {
    account_id: String,
    batch_size: usize,
    handlers: Handlers,
}

impl FetchPipeline {
    pub fn new(account_id: impl Into<String>, batch_size: usize, handlers: Handlers) -> Self {
        Self {
            account_id: account_id.into(),
            batch_size: batch_size.max(1),
            handlers,
        }
    }

    /// Fetch `uids` (ascending) in fixed-size batches.
    ///
    /// A batch that fails with a protocol error is logged and skipped; its
    /// messages are not retried in this pass. Connection-level errors abort
    /// the whole run and are returned.
    pub async fn fetch_in_batches<T: MailTransport>(
        &self,
        transport: &mut T,
        uids: &[u32],
        watermark: &mut SyncWatermark,
    ) -> Result<FetchStats, SyncError> {
        let mut stats = FetchStats::default();
        let total = uids.len().div_ceil(self.batch_size);

        for (index, chunk) in uids.chunks(self.batch_size).enumerate() {
            stats.batches += 1;
            tracing::debug!(
                account = %self.account_id,
                "Fetching batch {}/{} ({} messages)",
                index + 1,
                total,
                chunk.len()
            );

            let mut messages = match transport.fetch_batch(chunk).await {
                Ok(messages) => messages,
                Err(e) if e.is_connection_level() => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        account = %self.account_id,
                        "Skipping batch {} starting at uid {}: {}",
                        index + 1,
                        chunk[0],
                        e
                    );
                    stats.failed_batches += 1;
                    continue;
                }
            };

            messages.sort_by_key(|m| m.uid);
            for message in messages {
                self.process(message, watermark, &mut stats).await;
            }
        }

        Ok(stats)
    }

    async fn process(
        &self,
        message: RawMessage,
        watermark: &mut SyncWatermark,
        stats: &mut FetchStats,
    ) {
        let uid = message.uid;
        if !watermark.is_new(uid) {
            tracing::debug!(account = %self.account_id, "Uid {} already processed", uid);
            return;
        }

        match parse_message(&message) {
            Ok(record) => match &self.handlers.sink {
                Some(sink) => match sink.accept(&self.account_id, &record).await {
                    Ok(()) => {
                        stats.delivered += 1;
                        self.handlers.indexed(&self.account_id, uid);
                    }
                    Err(e) => {
                        tracing::warn!(
                            account = %self.account_id,
                            "Sink rejected uid {}: {}",
                            uid,
                            e
                        );
                        stats.sink_failures += 1;
                    }
                },
                None => stats.delivered += 1,
            },
            Err(e) => {
                tracing::warn!(account = %self.account_id, "Skipping unparseable uid {}: {}", uid, e);
                stats.parse_failures += 1;
            }
        }

        watermark.advance(uid);
    }
}
