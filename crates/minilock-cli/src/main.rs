//! minilock: miniLock file encryption CLI
//!
//! Commands:
//!   id                          - print your miniLock ID
//!   encrypt <file> --to <ID>... - encrypt a file for one or more IDs
//!   decrypt <file>              - decrypt a file addressed to you
//!   probe <file>                - check for the miniLock magic bytes
//!   config show                 - display current configuration
//!
//! Your key pair is derived from your email and passphrase on every run.
//! The passphrase is read from MINILOCK_PASSPHRASE or prompted for.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use minilock_core::MiniLockConfig;
use minilock_crypto::{
    decrypt_file, encrypt_file, is_encrypted_file, DecryptOptions, EncryptOptions, Id, KeyPair,
    MiniLockResult, ProgressFn,
};
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use zeroize::Zeroizing;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "minilock",
    version,
    about = "miniLock file encryption",
    long_about = "minilock: encrypt files for miniLock IDs and decrypt files sent to you"
)]
struct Cli {
    /// Path to config.toml
    #[arg(
        long,
        short = 'c',
        env = "MINILOCK_CONFIG",
        default_value = "~/.config/minilock/config.toml"
    )]
    config: PathBuf,

    /// Email used to derive your key pair (overrides config)
    #[arg(long, short = 'e', env = "MINILOCK_EMAIL", global = true)]
    email: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "MINILOCK_LOG", global = true)]
    log: Option<String>,

    /// Log format (json, text)
    #[arg(long, env = "MINILOCK_LOG_FORMAT", global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Derive your key pair and print its miniLock ID
    Id,

    /// Encrypt a file for one or more miniLock IDs
    Encrypt {
        /// File to encrypt
        file: PathBuf,
        /// Recipient miniLock ID (repeatable)
        #[arg(long = "to", value_name = "ID")]
        to: Vec<String>,
        /// Do not add your own ID to the recipients
        #[arg(long)]
        no_self: bool,
        /// Output directory (overrides config files.encrypted_dir)
        #[arg(long, short = 'o')]
        out_dir: Option<PathBuf>,
        /// Output file name (default: <file>.miniLock)
        #[arg(long)]
        name: Option<String>,
        /// Delete the source file after encrypting
        #[arg(long)]
        delete_source: bool,
    },

    /// Decrypt a miniLock file addressed to you
    Decrypt {
        /// File to decrypt
        file: PathBuf,
        /// Output directory (overrides config files.decrypted_dir)
        #[arg(long, short = 'o')]
        out_dir: Option<PathBuf>,
        /// Output file name (default: the name stored in the file)
        #[arg(long)]
        name: Option<String>,
        /// Delete the encrypted file after decrypting
        #[arg(long)]
        delete_source: bool,
    },

    /// Report whether a file starts with the miniLock magic bytes
    Probe {
        /// File to check
        file: PathBuf,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let config = load_config(&config_path)?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = cli.log_format.clone().unwrap_or(match config.log.format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(&level, &format);
    debug!(config = %config_path.display(), "minilock starting");

    let email = cli.email.as_deref();
    match cli.command {
        Commands::Id => cmd_id(&config, email).await,
        Commands::Encrypt {
            file,
            to,
            no_self,
            out_dir,
            name,
            delete_source,
        } => {
            let request = EncryptRequest {
                file,
                to,
                no_self,
                out_dir,
                name,
                delete_source,
            };
            cmd_encrypt(&config, email, request).await
        }
        Commands::Decrypt {
            file,
            out_dir,
            name,
            delete_source,
        } => cmd_decrypt(&config, email, &file, out_dir, name, delete_source).await,
        Commands::Probe { file } => cmd_probe(&file),
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &config_path),
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries command output; logs go to stderr
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Config loading ────────────────────────────────────────────────────────────

fn load_config(path: &Path) -> Result<MiniLockConfig> {
    MiniLockConfig::load(path).with_context(|| format!("loading config: {}", path.display()))
}

/// Expand `~` in path to the user's home directory
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        let home = std::env::var("HOME").unwrap_or_default();
        PathBuf::from(home).join(rest)
    } else {
        path.to_path_buf()
    }
}

// ── Key pair ──────────────────────────────────────────────────────────────────

fn resolve_email(config: &MiniLockConfig, email_override: Option<&str>) -> Result<String> {
    email_override
        .map(str::to_string)
        .or_else(|| config.identity.email.clone())
        .context(
            "no email provided\n\
             Pass --email, set MINILOCK_EMAIL, or set identity.email in the config file.",
        )
}

fn read_passphrase() -> Result<SecretString> {
    if let Ok(passphrase) = std::env::var("MINILOCK_PASSPHRASE") {
        return Ok(SecretString::from(passphrase));
    }
    let passphrase = Zeroizing::new(
        rpassword::prompt_password("Passphrase: ").context("reading passphrase")?,
    );
    Ok(SecretString::from(passphrase.as_str()))
}

/// Derive the user's key pair. scrypt at miniLock's cost takes a noticeable
/// moment, so it runs off the async runtime behind a spinner.
async fn unlock(config: &MiniLockConfig, email_override: Option<&str>) -> Result<KeyPair> {
    let email = resolve_email(config, email_override)?;
    let passphrase = read_passphrase()?;

    let spinner = make_spinner("unlocking");
    spinner.set_message(email.clone());
    let derived = tokio::task::spawn_blocking(move || {
        KeyPair::from_email_and_password(&email, &passphrase)
    })
    .await
    .context("key derivation task failed")?;
    spinner.finish_and_clear();

    derived.context("deriving key pair")
}

// ── Progress bar helpers ──────────────────────────────────────────────────────

fn make_progress_bar(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn make_spinner(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} {spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// Run a blocking engine call on the blocking pool, feeding its progress
/// callbacks to a progress bar over a channel.
async fn run_with_progress<T, F>(prefix: &str, job: F) -> Result<MiniLockResult<T>>
where
    T: Send + 'static,
    F: FnOnce(Option<&ProgressFn>) -> MiniLockResult<T> + Send + 'static,
{
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<f64>();
    let pb = make_progress_bar(prefix);

    let task = tokio::task::spawn_blocking(move || {
        let progress: ProgressFn = Box::new(move |fraction| {
            // receiver gone means the bar is gone; nothing to report to
            let _ = tx.send(fraction);
        });
        job(Some(&progress))
    });

    // closes once the job drops the callback
    while let Some(fraction) = rx.recv().await {
        pb.set_position((fraction.clamp(0.0, 1.0) * 100.0).round() as u64);
    }

    let result = task.await.context("worker task failed")?;
    match &result {
        Ok(_) => pb.finish_and_clear(),
        Err(_) => pb.abandon(),
    }
    Ok(result)
}

// ── `minilock id` ─────────────────────────────────────────────────────────────

async fn cmd_id(config: &MiniLockConfig, email: Option<&str>) -> Result<()> {
    let keys = unlock(config, email).await?;
    println!("{}", keys.public_id());
    Ok(())
}

// ── `minilock encrypt` ────────────────────────────────────────────────────────

struct EncryptRequest {
    file: PathBuf,
    to: Vec<String>,
    no_self: bool,
    out_dir: Option<PathBuf>,
    name: Option<String>,
    delete_source: bool,
}

async fn cmd_encrypt(
    config: &MiniLockConfig,
    email: Option<&str>,
    request: EncryptRequest,
) -> Result<()> {
    // Reject bad IDs before the slow key derivation
    let mut recipients = parse_recipients(&request.to)?;
    if request.no_self && recipients.is_empty() {
        anyhow::bail!("no recipients: pass --to <ID> or drop --no-self");
    }

    let keys = unlock(config, email).await?;
    if !request.no_self && !recipients.contains(keys.public_id()) {
        recipients.push(keys.public_id().clone());
    }

    let options = EncryptOptions {
        destination_dir: Some(output_dir(request.out_dir, config.files.encrypted_dir.as_deref())),
        file_name: request.name,
        delete_source: request.delete_source || config.files.delete_source,
    };
    let count = recipients.len();
    let source = request.file.clone();

    let encrypted = run_with_progress("encrypt", move |progress| {
        encrypt_file(&source, &options, &keys, &recipients, progress)
    })
    .await?
    .with_context(|| format!("encrypting {}", request.file.display()))?;

    info!(path = %encrypted.display(), recipients = count, "encrypted");
    println!(
        "Encrypted: {} → {}",
        request.file.display(),
        encrypted.display()
    );
    println!("  recipients: {count}");
    Ok(())
}

fn parse_recipients(ids: &[String]) -> Result<Vec<Id>> {
    let mut recipients: Vec<Id> = Vec::with_capacity(ids.len() + 1);
    for raw in ids {
        let id: Id = raw
            .trim()
            .parse()
            .with_context(|| format!("'{raw}' is not a valid miniLock ID"))?;
        if !recipients.contains(&id) {
            recipients.push(id);
        }
    }
    Ok(recipients)
}

// ── `minilock decrypt` ────────────────────────────────────────────────────────

async fn cmd_decrypt(
    config: &MiniLockConfig,
    email: Option<&str>,
    file: &Path,
    out_dir: Option<PathBuf>,
    name: Option<String>,
    delete_source: bool,
) -> Result<()> {
    if !is_encrypted_file(file).with_context(|| format!("reading {}", file.display()))? {
        anyhow::bail!("{} is not a miniLock file", file.display());
    }

    let keys = unlock(config, email).await?;
    let options = DecryptOptions {
        destination_dir: Some(output_dir(out_dir, config.files.decrypted_dir.as_deref())),
        file_name: name,
        delete_source: delete_source || config.files.delete_source,
    };
    let source = file.to_path_buf();

    let decrypted = run_with_progress("decrypt", move |progress| {
        decrypt_file(&source, &options, &keys, progress)
    })
    .await?
    .with_context(|| format!("decrypting {}", file.display()))?;

    println!(
        "Decrypted: {} → {}",
        file.display(),
        decrypted.path.display()
    );
    println!("  from: {}", decrypted.sender);
    println!("  size: {}", fmt_bytes(decrypted.bytes));
    Ok(())
}

// ── `minilock probe` ──────────────────────────────────────────────────────────

fn cmd_probe(file: &Path) -> Result<()> {
    let encrypted =
        is_encrypted_file(file).with_context(|| format!("probing {}", file.display()))?;
    if encrypted {
        println!("{}: miniLock file", file.display());
    } else {
        println!("{}: not a miniLock file", file.display());
    }
    Ok(())
}

// ── `minilock config show` ────────────────────────────────────────────────────

fn cmd_config_show(config: &MiniLockConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!(
            "# Configuration: defaults (no file at {})",
            config_path.display()
        );
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

// ── Utilities ─────────────────────────────────────────────────────────────────

/// CLI flag > config > current directory
fn output_dir(flag: Option<PathBuf>, configured: Option<&Path>) -> PathBuf {
    flag.or_else(|| configured.map(expand_tilde))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
