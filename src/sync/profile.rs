use std::time::Duration;

use crate::constants::{
    KEEPALIVE_GENERIC_SECS, KEEPALIVE_PROFILE_A_SECS, KEEPALIVE_PROFILE_B_SECS,
};

use super::transport::HostIdentity;

/// Known server families, each with its own idle timeout behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerClass {
    /// Gmail and Google Workspace
    ProfileA,
    /// Outlook, Office 365, Hotmail
    ProfileB,
    Generic,
}

impl ServerClass {
    pub fn keepalive_interval(self) -> Duration {
        match self {
            ServerClass::ProfileA => Duration::from_secs(KEEPALIVE_PROFILE_A_SECS),
            ServerClass::ProfileB => Duration::from_secs(KEEPALIVE_PROFILE_B_SECS),
            ServerClass::Generic => Duration::from_secs(KEEPALIVE_GENERIC_SECS),
        }
    }
}

const PROFILE_A_HOSTS: &[&str] = &["gmail.com", "googlemail.com", "google.com"];
const PROFILE_B_HOSTS: &[&str] = &["outlook.com", "office365.com", "hotmail.com", "live.com"];

/// Classification of the server behind one connection. Read-only once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerProfile {
    pub class: ServerClass,
    pub keepalive: Duration,
}

impl ServerProfile {
    pub fn classify(identity: &HostIdentity, keepalive_override: Option<Duration>) -> Self {
        let host = identity.host.to_ascii_lowercase();
        let matches = |domains: &[&str]| {
            domains
                .iter()
                .any(|d| host == *d || host.ends_with(&format!(".{}", d)))
        };

        let class = if matches(PROFILE_A_HOSTS) || identity.has_capability("X-GM-EXT-1") {
            ServerClass::ProfileA
        } else if matches(PROFILE_B_HOSTS) {
            ServerClass::ProfileB
        } else {
            ServerClass::Generic
        };

        Self {
            class,
            keepalive: keepalive_override.unwrap_or_else(|| class.keepalive_interval()),
        }
    }
}
