use anyhow::Result;
use dotenvy::dotenv;
use std::sync::Arc;
use teloxide::Bot;
use tokio::signal;

use kassabot::cli::{Cli, Commands};
use kassabot::core::{config, init_logger};
use kassabot::gateway::ManualCashdesk;
use kassabot::mailwatch::{self, MailWatcher, WatcherDeps};
use kassabot::storage::{audit, create_pool, get_connection, DbPool};
use kassabot::telegram::TelegramNotifier;

/// Main entry point for the reconcile watcher.
///
/// # Errors
/// Returns an error if initialization fails (logging, database, bot
/// token).
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_logger(&config::LOG_FILE_PATH)?;

    // Load environment variables from .env if present
    let _ = dotenv();

    match cli.command {
        Some(Commands::Poll) => run_poll().await,
        Some(Commands::Status { limit }) => run_status(limit),
        Some(Commands::Run) | None => run_watcher().await,
    }
}

fn create_db_pool() -> Result<Arc<DbPool>> {
    let pool = create_pool(&config::DATABASE_PATH)
        .map_err(|e| anyhow::anyhow!("Failed to create database pool: {}", e))?;
    Ok(Arc::new(pool))
}

fn build_deps(pool: Arc<DbPool>) -> Result<WatcherDeps> {
    let token = config::BOT_TOKEN.to_string();
    if token.is_empty() {
        return Err(anyhow::anyhow!("BOT_TOKEN environment variable not set"));
    }
    let bot = Bot::new(token);

    Ok(WatcherDeps {
        pool,
        gateway: Arc::new(ManualCashdesk),
        notifier: Arc::new(TelegramNotifier::new(bot)),
        admin_sync: None,
    })
}

async fn run_watcher() -> Result<()> {
    let pool = create_db_pool()?;
    let deps = build_deps(pool)?;

    let mut watcher = MailWatcher::new(deps);
    watcher.start();
    log::info!("Reconcile watcher running, press Ctrl-C to stop");

    signal::ctrl_c().await?;
    log::info!("Shutdown signal received");
    watcher.stop().await;
    Ok(())
}

async fn run_poll() -> Result<()> {
    let pool = create_db_pool()?;
    let deps = build_deps(pool)?;

    mailwatch::poll_once(&deps).await?;
    log::info!("Poll cycle finished");
    Ok(())
}

fn run_status(limit: u32) -> Result<()> {
    let pool = create_db_pool()?;
    let conn = get_connection(&pool)?;

    let health = audit::health_rows(&conn)?;
    if health.is_empty() {
        println!("No health records yet");
    } else {
        println!("Health:");
        for (key, value) in health {
            println!("  {:<20} {}", key, value);
        }
    }

    let attempts = audit::recent_attempts(&conn, limit)?;
    if attempts.is_empty() {
        println!("No reconcile attempts logged yet");
    } else {
        println!("Recent reconcile attempts:");
        for entry in attempts {
            println!(
                "  #{:<6} {}  {:>12}  {:<7}  {}",
                entry.id,
                entry.created_at,
                entry.amount,
                if entry.matched { "matched" } else { "miss" },
                entry.note
            );
        }
    }
    Ok(())
}
