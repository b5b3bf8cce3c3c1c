use async_trait::async_trait;

use super::Cache;
use crate::mail::types::MessageRecord;
use crate::sync::{MessageSink, SyncWatermark};

#[async_trait]
impl MessageSink for Cache {
    async fn accept(&self, account_id: &str, record: &MessageRecord) -> anyhow::Result<()> {
        self.store_record(account_id, record).await
    }

    async fn opened(&self, watermark: &SyncWatermark) -> anyhow::Result<()> {
        self.save_watermark(watermark).await
    }
}
