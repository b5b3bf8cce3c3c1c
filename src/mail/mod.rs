pub mod imap;
pub mod parser;
pub mod provider;
pub mod types;

pub use imap::{ImapConnector, ImapTransport};
pub use parser::parse_message;
pub use provider::{ProviderPreset, detect_provider};
pub use types::{AccountCredential, MessageRecord, RawMessage};
