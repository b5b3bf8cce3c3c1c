use anyhow::{Context, Result};
use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

const ENV_PASSWORD: &str = "MAILSYNC_PASSWORD";
const KEYRING_SERVICE: &str = "mailsync";

/// Where a resolved secret came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretSource {
    Environment,
    Keyring,
    File,
}

impl std::fmt::Display for SecretSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SecretSource::Environment => "environment (MAILSYNC_PASSWORD)",
            SecretSource::Keyring => "keyring",
            SecretSource::File => "password file",
        };
        f.write_str(name)
    }
}

/// Resolves IMAP secrets for one account. Never talks to the network.
pub struct CredentialStore {
    email: String,
    password_file: PathBuf,
}

impl CredentialStore {
    pub fn new(email: &str) -> Self {
        let dir = crate::config::Config::config_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::in_dir(email, &dir)
    }

    /// Store whose file fallback lives in `dir`.
    pub fn in_dir(email: &str, dir: &Path) -> Self {
        // One file per account
        let safe_email = email.replace(['@', '.', '/', '\\', ':'], "_");
        Self {
            email: email.to_string(),
            password_file: dir.join(format!(".password_{}", safe_email)),
        }
    }

    pub fn password_file(&self) -> &Path {
        &self.password_file
    }

    fn keyring_key(&self) -> String {
        format!("imap:{}", self.email)
    }

    fn env_password() -> Option<String> {
        env::var(ENV_PASSWORD).ok().filter(|s| !s.is_empty())
    }

    fn keyring_get(&self) -> Option<String> {
        let entry = keyring::Entry::new(KEYRING_SERVICE, &self.keyring_key()).ok()?;
        entry.get_password().ok()
    }

    fn keyring_set(&self, password: &str) -> bool {
        match keyring::Entry::new(KEYRING_SERVICE, &self.keyring_key()) {
            Ok(entry) => entry.set_password(password).is_ok(),
            Err(_) => false,
        }
    }

    fn file_get(&self) -> Option<String> {
        fs::read_to_string(&self.password_file)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    /// Write the fallback file, readable by the owner only
    fn file_set(&self, password: &str) -> Result<()> {
        if let Some(parent) = self.password_file.parent() {
            fs::create_dir_all(parent)?;
        }

        // Create file with restricted permissions atomically to avoid TOCTOU
        #[cfg(unix)]
        {
            let mut file = fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&self.password_file)?;
            file.write_all(password.as_bytes())?;
        }

        #[cfg(not(unix))]
        {
            fs::write(&self.password_file, password)?;
        }

        Ok(())
    }

    /// Secret for this account: env var, then keyring, then the file fallback.
    pub fn resolve(&self) -> Result<(String, SecretSource)> {
        if let Some(pwd) = Self::env_password() {
            return Ok((pwd, SecretSource::Environment));
        }
        if let Some(pwd) = self.keyring_get() {
            return Ok((pwd, SecretSource::Keyring));
        }
        if let Some(pwd) = self.file_get() {
            return Ok((pwd, SecretSource::File));
        }

        anyhow::bail!(
            "Password for {} not found. Set MAILSYNC_PASSWORD or run 'mailsync store-password {}'.",
            self.email,
            self.email
        )
    }

    pub fn get_imap_password(&self) -> Result<String> {
        self.resolve().map(|(pwd, _)| pwd)
    }

    /// Save to the keyring, or to the restricted file when no keyring is usable.
    pub fn set_password(&self, password: &str) -> Result<SecretSource> {
        if self.keyring_set(password) && self.keyring_get().as_deref() == Some(password) {
            return Ok(SecretSource::Keyring);
        }

        tracing::info!("Keyring unavailable for {}, using file-based storage", self.email);
        self.file_set(password).with_context(|| {
            format!("Failed to write {}", self.password_file.display())
        })?;
        Ok(SecretSource::File)
    }
}
