//! parley CLI: the main entry point.
//!
//! Commands:
//! - `serve`     Start the webhook gateway and its worker
//! - `process`   Handle one raw update from a file or stdin
//! - `purge`     Delete expired turns and summaries
//! - `config`    Show, initialize, or locate the config file
//! - `telegram`  Bot API housekeeping

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "parley",
    about = "parley: a context-managed chat assistant for Telegram",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ~/.parley/config.toml)
    #[arg(short, long, global = true, env = "PARLEY_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the webhook gateway
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Process one raw Telegram update (reads stdin when FILE is omitted)
    Process {
        file: Option<PathBuf>,

        /// Use an in-memory store and print replies instead of sending them
        #[arg(long)]
        ephemeral: bool,
    },

    /// Delete turns and summaries past their retention
    Purge,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Telegram Bot API housekeeping
    Telegram {
        #[command(subcommand)]
        action: TelegramAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration with secrets redacted
    Show,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the config file location
    Path,
}

#[derive(Subcommand)]
enum TelegramAction {
    /// Point the bot's webhook at URL (uses gateway.webhook_secret if set)
    SetWebhook { url: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Serve { port } => commands::serve::run(config_path, port).await?,
        Commands::Process { file, ephemeral } => {
            commands::process::run(config_path, file.as_deref(), ephemeral).await?
        }
        Commands::Purge => commands::purge::run(config_path).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show(config_path)?,
            ConfigAction::Init { force } => commands::config_cmd::init(config_path, force)?,
            ConfigAction::Path => commands::config_cmd::path(config_path),
        },
        Commands::Telegram { action } => match action {
            TelegramAction::SetWebhook { url } => {
                commands::telegram::set_webhook(config_path, &url).await?
            }
        },
    }

    Ok(())
}
