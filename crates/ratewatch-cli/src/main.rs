//! ratewatch CLI - OpenAI rate limit monitor
//!
//! A command-line interface that polls OpenAI rate-limit headers or local
//! Codex session logs and reports how much quota is left.

mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use ratewatch_core::settings::{get_config_path, CONFIG_PATH_ENV};
use ratewatch_core::{PollMode, Settings};

#[derive(Parser)]
#[command(name = "ratewatch")]
#[command(author, version, about = "OpenAI rate limit monitor", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format: table (default) or json
    #[arg(long, global = true, default_value = "table")]
    format: output::OutputFormat,

    /// Suppress progress messages
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Enable debug logging (RUST_LOG overrides)
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Override settings file path (or set RATEWATCH_CONFIG_PATH env var)
    #[arg(long, env = "RATEWATCH_CONFIG_PATH", global = true)]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll once and print the current usage
    Check {
        /// Source to poll: remote_api or local_session (default: saved or detected)
        #[arg(long)]
        mode: Option<PollMode>,

        /// Model used for the remote probe
        #[arg(long)]
        model: Option<String>,
    },

    /// Keep polling and print every update until Ctrl-C
    Watch {
        /// Source to poll: remote_api or local_session (default: saved or detected)
        #[arg(long)]
        mode: Option<PollMode>,

        /// Base refresh interval in seconds (60, 120 or 300)
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Read the latest rate limits straight from Codex session logs
    Scan {
        /// Sessions directory (default: ~/.codex/sessions)
        #[arg(long)]
        dir: Option<String>,

        /// Ignore session files older than this many hours (0 = no limit)
        #[arg(long, default_value_t = 12)]
        max_age_hours: u64,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    // Set up settings path if provided
    if let Some(config_path) = &cli.config {
        std::env::set_var(CONFIG_PATH_ENV, config_path);
    }

    let config_path = get_config_path()?;
    let settings = Settings::load_from(&config_path)?;

    // Create context for commands
    let ctx = commands::Context {
        settings,
        config_path,
        format: cli.format,
        quiet: cli.quiet,
    };

    // Execute command
    match cli.command {
        Commands::Check { mode, model } => commands::check::execute(&ctx, mode, model).await,
        Commands::Watch { mode, interval } => commands::watch::execute(&ctx, mode, interval).await,
        Commands::Scan { dir, max_age_hours } => {
            commands::scan::execute(&ctx, dir, max_age_hours).await
        }
        Commands::Config { action } => commands::config::execute(&ctx, action).await,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        output::print_error(&format!("Error: {:#}", e));
        std::process::exit(1);
    }
}
