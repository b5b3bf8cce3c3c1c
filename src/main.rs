use anyhow::{Context, Result};
use std::env;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use mailsync::account::AccountManager;
use mailsync::cache::Cache;
use mailsync::config::Config;
use mailsync::credentials::CredentialStore;
use mailsync::mail::ImapConnector;
use mailsync::error::SyncError;
use mailsync::sync::{MailboxSession, verify_connection};

fn setup_logging() {
    use std::fs::OpenOptions;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,mailsync=debug"));

    let log_file = Config::config_dir()
        .ok()
        .and_then(|dir| std::fs::create_dir_all(&dir).ok().map(|_| dir))
        .map(|dir| dir.join("mailsync.log"))
        .and_then(|path| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .ok()
        });

    if let Some(file) = log_file {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::sync::Mutex::new(file))
                    .with_ansi(false),
            )
            .init();
    } else {
        // Fallback to stderr if file logging fails
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn print_usage() {
    eprintln!(
        r#"mailsync - Keep IMAP mailboxes synced into a local index

Usage: mailsync [command]

Commands:
    (none)                  Sync every configured account until Ctrl-C
    check                   Validate config, log in to each account, show cache state
    store-password <email>  Read a password from stdin and store it
    help                    Show this help message

Configuration file: ~/.config/mailsync/config.toml
Password override:  MAILSYNC_PASSWORD
"#
    );
}

async fn run_daemon() -> Result<()> {
    let config = Config::load()?;
    config.ensure_dirs()?;

    let cache_path = config.cache_path()?;
    let cache = Cache::open(&cache_path)
        .await
        .with_context(|| format!("Failed to open cache at {}", cache_path.display()))?;

    let settings = config.sync_settings();
    let mut manager = AccountManager::new();

    for account in &config.accounts {
        let secret = match CredentialStore::new(&account.email).get_imap_password() {
            Ok(secret) => secret,
            Err(e) => {
                tracing::error!(account = %account.email, "Skipping account: {}", e);
                eprintln!("{}: {}", account.email, e);
                continue;
            }
        };

        let mut session = MailboxSession::new(&account.email, ImapConnector, settings.clone());
        match cache.load_watermark(&account.email).await {
            Ok(Some(watermark)) => {
                tracing::debug!(
                    account = %account.email,
                    "Resuming after uid {}",
                    watermark.last_seen
                );
                session = session.with_watermark(watermark);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(account = %account.email, "Could not load watermark: {}", e);
            }
        }
        session.on_message(Arc::new(cache.clone()));

        manager.add(session, account.credential(secret));
    }

    if manager.is_empty() {
        anyhow::bail!("No account has usable credentials");
    }

    for (account_id, e) in manager.start_all().await {
        eprintln!("{}: {}", account_id, e);
    }

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
            tracing::info!("Shutdown requested");
        }
        _ = manager.all_failed() => {
            tracing::error!("Every account has failed");
        }
    }

    manager.stop_all().await;

    for (account_id, status) in manager.status() {
        tracing::info!(
            account = %account_id,
            "Final state {}, {} message(s) delivered, last error: {}",
            status.state,
            status.delivered,
            status.last_error.as_deref().unwrap_or("none")
        );
    }
    Ok(())
}

async fn run_check() -> Result<()> {
    let config = Config::load()?;
    println!("Config: {} ({} account(s))", Config::config_path()?.display(), config.accounts.len());

    let cache_path = config.cache_path()?;
    let cache = if cache_path.exists() {
        Some(Cache::open(&cache_path).await?)
    } else {
        println!("Cache: {} (not created yet)", cache_path.display());
        None
    };

    let mut ok = true;
    for account in &config.accounts {
        println!("\n{}", account.email);
        let provider = account.provider();
        println!(
            "  server:   {}:{} ({}){}",
            account.imap.server,
            account.imap.port,
            if account.imap.tls { "tls" } else { "plain" },
            provider
                .map(|p| format!(", {} account", p.name))
                .unwrap_or_default()
        );

        let secret = match CredentialStore::new(&account.email).resolve() {
            Ok((secret, source)) => {
                println!("  password: found ({})", source);
                Some(secret)
            }
            Err(e) => {
                ok = false;
                println!("  password: missing ({})", e);
                None
            }
        };

        if let Some(secret) = secret {
            let credential = account.credential(secret);
            match verify_connection(&ImapConnector, &credential, &config.sync.mailbox).await {
                Ok(status) => println!(
                    "  login:    ok ({} has {} message(s), uidvalidity {})",
                    config.sync.mailbox,
                    status.exists,
                    status
                        .uid_validity
                        .map(|v| v.to_string())
                        .unwrap_or_else(|| "unknown".into())
                ),
                Err(e @ SyncError::Authentication { .. }) => {
                    ok = false;
                    println!("  login:    rejected ({})", e);
                    if let Some(preset) = provider {
                        println!("            {}", preset.password_hint);
                    }
                }
                Err(e) => {
                    ok = false;
                    println!("  network:  {}", e);
                }
            }
        }

        if let Some(cache) = &cache {
            match cache.load_watermark(&account.email).await? {
                Some(watermark) => {
                    println!(
                        "  synced:   uid {} (uidvalidity {}), {} message(s) cached",
                        watermark.last_seen,
                        watermark
                            .uid_validity
                            .map(|v| v.to_string())
                            .unwrap_or_else(|| "unknown".into()),
                        cache.message_count(&account.email).await?
                    );
                    if let Some(latest) = cache
                        .get_record(&account.email, watermark.last_seen)
                        .await?
                    {
                        println!(
                            "  latest:   {} from {} ({})",
                            latest.subject,
                            latest.sender,
                            latest.timestamp.format("%Y-%m-%d %H:%M")
                        );
                    }
                }
                None => println!("  synced:   never"),
            }
        }
    }

    if !ok {
        anyhow::bail!("Some accounts cannot sync");
    }
    Ok(())
}

fn run_store_password(email: &str) -> Result<()> {
    use std::io::{self, IsTerminal, Write};

    let password = if io::stdin().is_terminal() {
        print!("Password for {}: ", email);
        io::stdout().flush()?;
        let password = read_password()?;
        println!();
        password
    } else {
        let mut line = String::new();
        io::stdin().read_line(&mut line)?;
        line.trim_end_matches(['\r', '\n']).to_string()
    };

    if password.is_empty() {
        anyhow::bail!("Empty password, nothing stored");
    }

    let source = CredentialStore::new(email).set_password(&password)?;
    println!("Password for {} stored ({}).", email, source);
    Ok(())
}

fn read_password() -> Result<String> {
    let _guard = DisableEcho::new()?;

    let mut password = String::new();
    std::io::stdin().read_line(&mut password)?;
    Ok(password.trim_end_matches(['\r', '\n']).to_string())
}

struct DisableEcho {
    #[cfg(unix)]
    original: libc::termios,
}

impl DisableEcho {
    #[cfg(unix)]
    fn new() -> Result<Self> {
        use std::mem::MaybeUninit;
        use std::os::unix::io::AsRawFd;

        let fd = std::io::stdin().as_raw_fd();
        let mut termios = MaybeUninit::<libc::termios>::uninit();

        // SAFETY: termios is only read after tcgetattr reports success
        unsafe {
            if libc::tcgetattr(fd, termios.as_mut_ptr()) != 0 {
                anyhow::bail!("Failed to get terminal attributes");
            }
            let original = termios.assume_init();
            let mut silent = original;
            silent.c_lflag &= !libc::ECHO;
            if libc::tcsetattr(fd, libc::TCSANOW, &silent) != 0 {
                anyhow::bail!("Failed to set terminal attributes");
            }
            Ok(Self { original })
        }
    }

    #[cfg(not(unix))]
    fn new() -> Result<Self> {
        Ok(Self {})
    }
}

#[cfg(unix)]
impl Drop for DisableEcho {
    fn drop(&mut self) {
        use std::os::unix::io::AsRawFd;
        let fd = std::io::stdin().as_raw_fd();
        // SAFETY: restores attributes captured in `new`
        unsafe {
            libc::tcsetattr(fd, libc::TCSANOW, &self.original);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("help") | Some("--help") | Some("-h") => {
            print_usage();
            Ok(())
        }
        Some("check") => run_check().await,
        Some("store-password") => match args.get(2) {
            Some(email) => run_store_password(email),
            None => {
                eprintln!("Missing email address.");
                print_usage();
                std::process::exit(1);
            }
        },
        Some(cmd) => {
            eprintln!("Unknown command: {}", cmd);
            print_usage();
            std::process::exit(1);
        }
        None => {
            setup_logging();
            run_daemon().await
        }
    }
}
