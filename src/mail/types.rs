use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Everything needed to open and authenticate one mail-store connection.
/// Supplied by the credential source and never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct AccountCredential {
    pub identity: String,
    pub secret: String,
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

impl fmt::Debug for AccountCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountCredential")
            .field("identity", &self.identity)
            .field("secret", &"<redacted>")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("use_tls", &self.use_tls)
            .finish()
    }
}

/// A message exactly as fetched from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub uid: u32,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentInfo {
    pub filename: String,
    pub mime_type: String,
    pub size: usize,
}

/// Structured message handed to downstream consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub uid: u32,
    pub message_id: Option<String>,
    pub subject: String,
    pub sender: String,
    pub recipients: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub body: String,
    pub html_body: Option<String>,
    pub attachments: Vec<AttachmentInfo>,
    pub in_reply_to: Option<String>,
}

impl MessageRecord {
    pub fn has_attachments(&self) -> bool {
        !self.attachments.is_empty()
    }
}
