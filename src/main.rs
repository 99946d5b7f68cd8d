//! # Chatterbox — chat automation bot
//!
//! Answers chat commands and runs persisted repeat/echo tasks, sending
//! through one rate-limited dispatcher per channel.
//!
//! Usage:
//!   chatterbox                          # Console transport, ~/.chatterbox/config.toml
//!   chatterbox --config bot.toml        # Explicit config file
//!   chatterbox --db /tmp/bot.db -v      # Custom database, debug logging
//!
//! Console input lines are `<channel> <user> <message>`.

mod bot;
mod commands;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chatterbox_channels::ConsoleTransport;
use chatterbox_core::config::BotConfig;
use chatterbox_core::traits::Transport;
use chatterbox_scheduler::Database;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::bot::Bot;

#[derive(Parser)]
#[command(
    name = "chatterbox",
    version,
    about = "🤖 Chatterbox — chat automation bot"
)]
struct Cli {
    /// Config file (default: ~/.chatterbox/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database path (overrides config and DATABASE_PATH)
    #[arg(long)]
    db: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn load_config(cli: &Cli) -> chatterbox_core::Result<BotConfig> {
    match &cli.config {
        Some(path) => {
            let mut config = BotConfig::load_from(path)?;
            config.apply_env_with(|key| std::env::var(key).ok())?;
            Ok(config)
        }
        None => BotConfig::load(),
    }
}

/// Bring the bot up and process events until input ends or Ctrl-C.
async fn supervise(bot: &Bot) -> chatterbox_core::Result<()> {
    let armed = bot.start().await?;
    tracing::info!(
        "📅 {armed} task(s) armed, {} channel(s) ready",
        bot.channels().len()
    );
    let orphans = bot.tasks().orphans()?;
    if !orphans.is_empty() {
        tracing::warn!(
            "⚠️ Rows without a task: triggers {:?}, actions {:?}",
            orphans.triggers,
            orphans.actions
        );
    }

    tokio::select! {
        result = bot.run() => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("👋 Shutting down");
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "chatterbox=debug,chatterbox_channels=debug,chatterbox_scheduler=debug"
    } else {
        "chatterbox=info,chatterbox_channels=info,chatterbox_scheduler=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = load_config(&cli)?;
    let db_path = match &cli.db {
        Some(path) => PathBuf::from(shellexpand::tilde(path).to_string()),
        None => config.database_file(),
    };
    let db = Database::open(&db_path)?;

    tracing::info!("🤖 Chatterbox v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("   👤 Username: {}", config.username);
    tracing::info!("   ❗ Prefix:   {}", config.prefix);
    tracing::info!("   🗄️  Database: {}", db_path.display());

    let transport: Arc<dyn Transport> = Arc::new(ConsoleTransport::new(&config.username));
    let bot = Bot::new(config, transport, db)?;

    if let Err(e) = supervise(&bot).await {
        if e.is_fatal() {
            tracing::error!("💀 Fatal: {e}");
            std::process::exit(1);
        }
        return Err(e.into());
    }
    Ok(())
}
