//! Historical backfill for a freshly opened mailbox.

use chrono::{Days, NaiveDate, Utc};

use super::fetch::{FetchPipeline, FetchStats};
use super::transport::MailTransport;
use super::watermark::SyncWatermark;
use crate::error::SyncError;

/// Date range and batching for one backfill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackfillWindow {
    pub since_date: NaiveDate,
    pub batch_size: usize,
}

impl BackfillWindow {
    /// Window covering the last `days` days, ending today (UTC).
    pub fn ending_today(days: u64, batch_size: usize) -> Self {
        let today = Utc::now().date_naive();
        Self {
            since_date: today.checked_sub_days(Days::new(days)).unwrap_or(NaiveDate::MIN),
            batch_size,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillSummary {
    /// Identifiers the date search returned
    pub matched: usize,
    /// Of those, how many the watermark had already covered
    pub already_seen: usize,
    pub stats: FetchStats,
}

pub struct BackfillCoordinator {
    window: BackfillWindow,
}

impl BackfillCoordinator {
    pub fn new(window: BackfillWindow) -> Self {
        Self { window }
    }

    pub fn window(&self) -> &BackfillWindow {
        &self.window
    }

    /// Search the window, then fetch everything the watermark has not seen.
    ///
    /// Search failures are returned to the caller; failures of individual
    /// batches are absorbed by the pipeline.
    pub async fn run<T: MailTransport>(
        &self,
        transport: &mut T,
        pipeline: &FetchPipeline,
        watermark: &mut SyncWatermark,
    ) -> Result<BackfillSummary, SyncError> {
        let mut uids = transport.search_since(self.window.since_date).await?;
        uids.sort_unstable();
        uids.dedup();

        let matched = uids.len();
        uids.retain(|&uid| watermark.is_new(uid));
        let already_seen = matched - uids.len();

        tracing::info!(
            account = %watermark.account_id,
            "Backfill since {}: {} matched, {} new",
            self.window.since_date,
            matched,
            uids.len()
        );

        if uids.is_empty() {
            return Ok(BackfillSummary {
                matched,
                already_seen,
                stats: FetchStats::default(),
            });
        }

        let stats = pipeline
            .fetch_in_batches(transport, &uids, watermark)
            .await?;

        Ok(BackfillSummary {
            matched,
            already_seen,
            stats,
        })
    }
}
