//! Downstream hooks: where parsed messages go and who hears about state changes.

use std::sync::Arc;

use async_trait::async_trait;

use super::SessionState;
use super::retry::ReconnectAttempt;
use super::watermark::SyncWatermark;
use crate::mail::types::MessageRecord;

/// Receives every successfully parsed message, historical or live.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// `Ok` means the record is durably stored downstream.
    async fn accept(&self, account_id: &str, record: &MessageRecord) -> anyhow::Result<()>;

    /// The mailbox was opened; `watermark` is what this connection resumes from.
    async fn opened(&self, _watermark: &SyncWatermark) -> anyhow::Result<()> {
        Ok(())
    }
}

/// One observed state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub account_id: String,
    pub from: SessionState,
    pub to: SessionState,
    /// Set when entering `Reconnecting`
    pub reconnect: Option<ReconnectAttempt>,
    /// Set when the transition was caused by an error
    pub error: Option<String>,
}

pub type IndexedHandler = Arc<dyn Fn(&str, u32) + Send + Sync>;
pub type StateHandler = Arc<dyn Fn(&StateChange) + Send + Sync>;

/// Registered consumers for one session.
#[derive(Clone, Default)]
pub struct Handlers {
    pub(crate) sink: Option<Arc<dyn MessageSink>>,
    pub(crate) indexed: Vec<IndexedHandler>,
    pub(crate) state: Vec<StateHandler>,
}

impl Handlers {
    pub(crate) fn indexed(&self, account_id: &str, uid: u32) {
        for handler in &self.indexed {
            handler(account_id, uid);
        }
    }

    pub(crate) fn state_changed(&self, change: &StateChange) {
        for handler in &self.state {
            handler(change);
        }
    }
}
