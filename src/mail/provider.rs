//! Known email providers
//!
//! Lets a config entry name only the address when the domain belongs to one
//! of the large providers. Everything else needs an explicit server.

/// Connection settings for one provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderPreset {
    pub name: &'static str,
    pub imap_server: &'static str,
    pub imap_port: u16,
    /// Shown when the provider rejects a password
    pub password_hint: &'static str,
}

const GMAIL: ProviderPreset = ProviderPreset {
    name: "Gmail",
    imap_server: "imap.gmail.com",
    imap_port: 993,
    password_hint: "Use an App Password if 2FA is enabled: myaccount.google.com/apppasswords",
};

const OUTLOOK: ProviderPreset = ProviderPreset {
    name: "Outlook",
    imap_server: "outlook.office365.com",
    imap_port: 993,
    password_hint: "Use an App Password from account.microsoft.com",
};

const YAHOO: ProviderPreset = ProviderPreset {
    name: "Yahoo",
    imap_server: "imap.mail.yahoo.com",
    imap_port: 993,
    password_hint: "Use an App Password from account.yahoo.com/security",
};

const ICLOUD: ProviderPreset = ProviderPreset {
    name: "iCloud",
    imap_server: "imap.mail.me.com",
    imap_port: 993,
    password_hint: "Use an app-specific password from appleid.apple.com",
};

/// Match the address's domain against the providers we know.
pub fn detect_provider(email: &str) -> Option<ProviderPreset> {
    let (_, domain) = email.rsplit_once('@')?;
    let domain = domain.trim().to_lowercase();

    match domain.as_str() {
        "gmail.com" | "googlemail.com" => Some(GMAIL),
        "outlook.com" | "hotmail.com" | "live.com" => Some(OUTLOOK),
        "yahoo.com" | "ymail.com" => Some(YAHOO),
        "icloud.com" | "me.com" | "mac.com" => Some(ICLOUD),
        _ => None,
    }
}
