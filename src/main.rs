mod config;
mod models;
mod monitor;
mod notifier;
mod reconcile;
mod scrapers;
mod storage;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use monitor::Monitor;
use notifier::{LogNotifier, Notifier, TelegramNotifier};
use scrapers::AutoScoutScraper;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use storage::{ListingStore, SqliteStore};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(author, version, about = "Watch AutoScout24 searches and report new listings")]
struct Cli {
    /// Directory holding the search configuration files
    #[arg(long, default_value = config::DEFAULT_CONFIG_DIR, global = true)]
    config_dir: PathBuf,

    /// SQLite database file
    #[arg(long, env = "AUTO_SCOUT_DB", default_value = storage::DEFAULT_DB_PATH, global = true)]
    db: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Also append log output to this file
    #[arg(long, env = "AUTO_SCOUT_LOG_FILE", global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Poll the configured searches (default)
    Run {
        /// Log notifications instead of sending them to Telegram
        #[arg(long)]
        no_notify: bool,

        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,
    },
    /// Print a summary of the stored listings
    CheckDb,
    /// Delete every stored listing
    ClearDb {
        /// Skip the safety check
        #[arg(long)]
        yes: bool,
    },
}

/// Open `path` for appending, creating its directory first
fn open_log_file(path: &Path) -> Result<File> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))
}

fn init_logging(verbose: bool, log_file: Option<&Path>) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let file_layer = match log_file {
        Some(path) => Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(open_log_file(path)?))),
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Could not listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn run(cli: &Cli, no_notify: bool, once: bool) -> Result<()> {
    info!("🚀 Starting AutoScout monitor...");
    let groups = config::load_groups(&cli.config_dir).context("Failed to load search configuration")?;

    info!("Initializing database at {}...", cli.db.display());
    let store = SqliteStore::new(&cli.db)?;

    let notifier: Box<dyn Notifier> = if no_notify {
        info!("Notifications go to the log only");
        Box::new(LogNotifier)
    } else {
        Box::new(TelegramNotifier::from_env()?)
    };

    let scraper = AutoScoutScraper::new()?;
    info!("✅ All components initialized successfully");

    Monitor::new(&scraper, &store, notifier.as_ref(), &groups)
        .run(once, shutdown_signal())
        .await;
    Ok(())
}

fn check_db(store: &dyn ListingStore) -> Result<()> {
    let listings = store.list_all()?;
    println!("Total listings: {}", listings.len());
    if listings.is_empty() {
        return Ok(());
    }

    if let Some(oldest) = listings.iter().map(|l| l.first_seen).min() {
        println!("Oldest first seen: {}", oldest.format("%Y-%m-%d %H:%M"));
    }
    if let Some(newest) = listings.iter().map(|l| l.first_seen).max() {
        println!("Newest first seen: {}", newest.format("%Y-%m-%d %H:%M"));
    }

    let mut by_make: BTreeMap<(&str, &str), usize> = BTreeMap::new();
    for listing in &listings {
        *by_make
            .entry((listing.make.as_str(), listing.model.as_str()))
            .or_default() += 1;
    }
    println!();
    for ((make, model), count) in by_make {
        println!("  {} {}: {}", make, model, count);
    }
    Ok(())
}

/// Load `.env` before parsing so clap's `env` fallbacks see its values
fn load_cli<I, T, R, F>(load_env: F, args: I) -> (Cli, dotenvy::Result<R>)
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
    F: FnOnce() -> dotenvy::Result<R>,
{
    let loaded = load_env();
    (Cli::parse_from(args), loaded)
}

#[tokio::main]
async fn main() -> Result<()> {
    let (cli, dotenv) = load_cli(dotenvy::dotenv, std::env::args_os());
    init_logging(cli.verbose, cli.log_file.as_deref())?;
    if let Err(e) = dotenv {
        if !e.not_found() {
            warn!("Ignoring unreadable .env file: {}", e);
        }
    }

    match &cli.command {
        None => run(&cli, false, false).await,
        Some(Command::Run { no_notify, once }) => run(&cli, *no_notify, *once).await,
        Some(Command::CheckDb) => check_db(&SqliteStore::new(&cli.db)?),
        Some(Command::ClearDb { yes }) => {
            if !yes {
                anyhow::bail!("Refusing to clear {} without --yes", cli.db.display());
            }
            let removed = SqliteStore::new(&cli.db)?.clear_all()?;
            info!("💾 Removed {} listings from {}", removed, cli.db.display());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn env_file_supplies_database_path() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let env_file = dir.path().join(".env");
        std::fs::write(&env_file, "AUTO_SCOUT_DB=data/from-env-file.db\n").unwrap();

        let (cli, loaded) = load_cli(|| dotenvy::from_path(&env_file), ["auto-scout", "check-db"]);
        assert!(loaded.is_ok());
        assert_eq!(cli.db, PathBuf::from("data/from-env-file.db"));
        assert!(matches!(cli.command, Some(Command::CheckDb)));
    }

    #[test]
    fn log_file_is_created_and_appended() {
        use std::io::Write;

        let dir = TempDir::new().expect("failed to create temp dir");
        let path = dir.path().join("logs/app.log");

        writeln!(open_log_file(&path).unwrap(), "first cycle").unwrap();
        writeln!(open_log_file(&path).unwrap(), "second cycle").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first cycle\nsecond cycle\n");
    }
}
