use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{
    BACKFILL_BATCH_SIZE, BACKFILL_DAYS, DEFAULT_MAILBOX, MAX_RETRIES, MAX_RETRY_DELAY_SECS,
    RECONNECT_BASE_DELAY_MS, RECONNECT_JITTER_MS,
};
use crate::mail::provider::{ProviderPreset, detect_provider};
use crate::mail::types::AccountCredential;
use crate::sync::{ReconnectionPolicy, SyncSettings};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Also the account id
    pub email: String,
    /// Login name when it differs from the address
    #[serde(default)]
    pub username: Option<String>,
    /// May be left out for providers with a preset
    #[serde(default)]
    pub imap: ImapConfig,
}

impl AccountConfig {
    pub fn provider(&self) -> Option<ProviderPreset> {
        detect_provider(&self.email)
    }

    pub fn login(&self) -> &str {
        self.username.as_deref().unwrap_or(&self.email)
    }

    /// Pair the connection settings with a resolved secret.
    pub fn credential(&self, secret: String) -> AccountCredential {
        AccountCredential {
            identity: self.login().to_string(),
            secret,
            host: self.imap.server.clone(),
            port: self.imap.port,
            use_tls: self.imap.tls,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImapConfig {
    #[serde(default)]
    pub server: String,
    #[serde(default = "default_imap_port")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub tls: bool,
}

impl Default for ImapConfig {
    fn default() -> Self {
        Self {
            server: String::new(),
            port: default_imap_port(),
            tls: default_true(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_mailbox")]
    pub mailbox: String,
    #[serde(default = "default_backfill_days")]
    pub backfill_days: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Overrides the interval picked from the server profile
    #[serde(default)]
    pub keepalive_secs: Option<u64>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            mailbox: default_mailbox(),
            backfill_days: default_backfill_days(),
            batch_size: default_batch_size(),
            keepalive_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            jitter_ms: default_jitter_ms(),
            max_delay_secs: default_max_delay_secs(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl ReconnectConfig {
    pub fn policy(&self) -> ReconnectionPolicy {
        ReconnectionPolicy::new(
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.jitter_ms),
            Duration::from_secs(self.max_delay_secs),
            self.max_attempts,
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    /// SQLite file; defaults to `<data_dir>/mailsync/mailsync.db`
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_imap_port() -> u16 {
    993
}

fn default_true() -> bool {
    true
}

fn default_mailbox() -> String {
    DEFAULT_MAILBOX.to_string()
}

fn default_backfill_days() -> u64 {
    BACKFILL_DAYS
}

fn default_batch_size() -> usize {
    BACKFILL_BATCH_SIZE
}

fn default_base_delay_ms() -> u64 {
    RECONNECT_BASE_DELAY_MS
}

fn default_jitter_ms() -> u64 {
    RECONNECT_JITTER_MS
}

fn default_max_delay_secs() -> u64 {
    MAX_RETRY_DELAY_SECS
}

fn default_max_attempts() -> u32 {
    MAX_RETRIES
}

impl Config {
    pub fn config_dir() -> Result<PathBuf> {
        let dir = dirs::config_dir()
            .context("Could not find config directory")?
            .join("mailsync");
        Ok(dir)
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    pub fn data_dir() -> Result<PathBuf> {
        let dir = dirs::data_local_dir()
            .context("Could not find data directory")?
            .join("mailsync");
        Ok(dir)
    }

    pub fn cache_path(&self) -> Result<PathBuf> {
        match &self.cache.path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::data_dir()?.join("mailsync.db")),
        }
    }

    /// Session tuning shared by every account.
    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            mailbox: self.sync.mailbox.clone(),
            backfill_days: self.sync.backfill_days,
            batch_size: self.sync.batch_size,
            keepalive_override: self.sync.keepalive_secs.map(Duration::from_secs),
            reconnect: self.reconnect.policy(),
        }
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            anyhow::bail!(
                "Configuration file not found at {}\n\
                 Please create a config file. Example:\n\n\
                 [[accounts]]\n\
                 email = \"you@example.com\"\n\n\
                 [accounts.imap]\n\
                 server = \"imap.example.com\"",
                path.display()
            );
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content).context("Failed to parse config")?;
        config.apply_presets();
        config.validate()?;
        Ok(config)
    }

    /// Fill in the server for accounts on a known provider.
    fn apply_presets(&mut self) {
        for account in &mut self.accounts {
            if !account.imap.server.trim().is_empty() {
                continue;
            }
            if let Some(preset) = account.provider() {
                tracing::debug!("Using {} preset for {}", preset.name, account.email);
                account.imap.server = preset.imap_server.to_string();
                account.imap.port = preset.imap_port;
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.accounts.is_empty() {
            anyhow::bail!("No accounts configured");
        }
        if self.sync.batch_size == 0 {
            anyhow::bail!("sync.batch_size must be at least 1");
        }
        if self.reconnect.max_attempts == 0 {
            anyhow::bail!("reconnect.max_attempts must be at least 1");
        }
        if self.reconnect.jitter_ms > self.reconnect.base_delay_ms {
            anyhow::bail!(
                "reconnect.jitter_ms ({}) must not exceed reconnect.base_delay_ms ({})",
                self.reconnect.jitter_ms,
                self.reconnect.base_delay_ms
            );
        }
        if self.sync.keepalive_secs == Some(0) {
            anyhow::bail!("sync.keepalive_secs must be at least 1");
        }
        for (i, account) in self.accounts.iter().enumerate() {
            if account.imap.server.trim().is_empty() {
                anyhow::bail!(
                    "Account {} needs [accounts.imap] server (no preset for its domain)",
                    account.email
                );
            }
            if self.accounts[..i].iter().any(|a| a.email == account.email) {
                anyhow::bail!("Account {} is configured twice", account.email);
            }
        }
        Ok(())
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(Self::config_dir()?)?;
        if let Some(dir) = self.cache_path()?.parent() {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config_uses_defaults() {
        let toml = r#"
            [[accounts]]
            email = "test@example.com"

            [accounts.imap]
            server = "imap.example.com"
        "#;

        let config = Config::parse(toml).unwrap();
        assert_eq!(config.accounts.len(), 1);
        assert_eq!(config.accounts[0].imap.port, 993);
        assert!(config.accounts[0].imap.tls);
        assert_eq!(config.accounts[0].login(), "test@example.com");

        let settings = config.sync_settings();
        assert_eq!(settings, SyncSettings::default());
        assert_eq!(settings.reconnect.max_attempts, 5);
        assert_eq!(settings.reconnect.max_delay, Duration::from_secs(30));
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [[accounts]]
            email = "me@example.com"
            username = "me"

            [accounts.imap]
            server = "mail.example.com"
            port = 143
            tls = false

            [[accounts]]
            email = "work@example.com"

            [accounts.imap]
            server = "outlook.office365.com"

            [sync]
            mailbox = "Archive"
            backfill_days = 7
            batch_size = 50
            keepalive_secs = 600

            [reconnect]
            base_delay_ms = 500
            jitter_ms = 0
            max_delay_secs = 10
            max_attempts = 3

            [cache]
            path = "/tmp/mailsync-test.db"
        "#;

        let config = Config::parse(toml).unwrap();
        assert_eq!(config.accounts.len(), 2);

        let credential = config.accounts[0].credential("hunter2".into());
        assert_eq!(credential.identity, "me");
        assert_eq!(credential.port, 143);
        assert!(!credential.use_tls);

        let settings = config.sync_settings();
        assert_eq!(settings.mailbox, "Archive");
        assert_eq!(settings.backfill_days, 7);
        assert_eq!(settings.batch_size, 50);
        assert_eq!(settings.keepalive_override, Some(Duration::from_secs(600)));
        assert_eq!(settings.reconnect.base_delay, Duration::from_millis(500));
        assert_eq!(settings.reconnect.jitter_max, Duration::ZERO);
        assert_eq!(settings.reconnect.max_attempts, 3);
        assert_eq!(
            config.cache_path().unwrap(),
            PathBuf::from("/tmp/mailsync-test.db")
        );
    }

    #[test]
    fn test_rejects_invalid_values() {
        let base = r#"
            [[accounts]]
            email = "test@example.com"

            [accounts.imap]
            server = "imap.example.com"
        "#;

        assert!(Config::parse(&format!("{base}\n[sync]\nbatch_size = 0\n")).is_err());
        assert!(Config::parse(&format!("{base}\n[reconnect]\nmax_attempts = 0\n")).is_err());
        assert!(
            Config::parse(&format!(
                "{base}\n[reconnect]\nbase_delay_ms = 100\njitter_ms = 1000\n"
            ))
            .is_err()
        );
        assert!(
            Config::parse(&format!(
                "{base}\n[reconnect]\nbase_delay_ms = 1000\njitter_ms = 1000\n"
            ))
            .is_ok()
        );
        assert!(Config::parse("").is_err());
    }

    #[test]
    fn test_known_provider_needs_no_imap_section() {
        let toml = r#"
            [[accounts]]
            email = "someone@gmail.com"

            [[accounts]]
            email = "someone@icloud.com"

            [accounts.imap]
            server = "imap.custom.example"
        "#;

        let config = Config::parse(toml).unwrap();
        assert_eq!(config.accounts[0].imap.server, "imap.gmail.com");
        assert_eq!(config.accounts[0].imap.port, 993);
        assert!(config.accounts[0].imap.tls);
        assert_eq!(
            config.accounts[0].provider().map(|p| p.name),
            Some("Gmail")
        );
        // An explicit server wins over the preset
        assert_eq!(config.accounts[1].imap.server, "imap.custom.example");
    }

    #[test]
    fn test_unknown_domain_needs_server() {
        let toml = r#"
            [[accounts]]
            email = "me@example.com"
        "#;

        let err = Config::parse(toml).unwrap_err();
        assert!(format!("{err:#}").contains("no preset"));
    }

    #[test]
    fn test_rejects_duplicate_accounts() {
        let toml = r#"
            [[accounts]]
            email = "test@example.com"
            [accounts.imap]
            server = "imap.example.com"

            [[accounts]]
            email = "test@example.com"
            [accounts.imap]
            server = "imap.other.com"
        "#;

        assert!(Config::parse(toml).is_err());
    }
}
