/// Highest identifier already processed for an account.
///
/// Written only by the fetch path of the owning session. Within one
/// UIDVALIDITY epoch it never decreases.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncWatermark {
    pub account_id: String,
    pub uid_validity: Option<u32>,
    pub last_seen: u32,
}

impl SyncWatermark {
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            uid_validity: None,
            last_seen: 0,
        }
    }

    pub fn with_last_seen(mut self, uid_validity: Option<u32>, last_seen: u32) -> Self {
        self.uid_validity = uid_validity;
        self.last_seen = last_seen;
        self
    }

    /// Whether `uid` has not been processed yet.
    pub fn is_new(&self, uid: u32) -> bool {
        uid > self.last_seen
    }

    /// Record `uid` as processed. Returns true if the watermark moved.
    pub fn advance(&mut self, uid: u32) -> bool {
        if uid > self.last_seen {
            self.last_seen = uid;
            true
        } else {
            false
        }
    }

    /// Align with the mailbox's UIDVALIDITY. Identifiers from another epoch
    /// are not comparable, so a change starts the count over.
    /// Returns true if the watermark was reset.
    pub fn rebase(&mut self, uid_validity: Option<u32>) -> bool {
        let changed = matches!(
            (self.uid_validity, uid_validity),
            (Some(old), Some(new)) if old != new
        );
        if changed {
            self.last_seen = 0;
        }
        if uid_validity.is_some() {
            self.uid_validity = uid_validity;
        }
        changed
    }
}
