//! Wallet Router - decides which wallet signs an on-chain operation
//!
//! Operations within policy run automatically with an agent key; anything
//! outside it goes to the user's own wallet for confirmation, and
//! blacklisted or unsupported operations are refused.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

// Use the library crate
use wallet_router::cli::commands::{self, OperationArgs};
use wallet_router::config::{Config, LoggingConfig, DEFAULT_CONFIG_PATH};

/// Wallet Router - policy-driven agent/user wallet routing
#[derive(Parser)]
#[command(name = "wallet-router")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show which wallet an operation would be routed to
    Evaluate {
        #[command(flatten)]
        op: OperationArgs,

        /// Evaluate at this instant (RFC 3339) instead of now
        #[arg(long)]
        at: Option<String>,

        /// Treat the recipient as a trusted address
        #[arg(long)]
        trusted: bool,
    },

    /// Execute an operation against simulated wallets
    Simulate {
        #[command(flatten)]
        op: OperationArgs,

        /// Skip the confirmation prompt for user-routed operations
        #[arg(long)]
        yes: bool,
    },

    /// Show the authorization rules
    Rules,

    /// Show current configuration (secrets masked)
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            init_tracing(&LoggingConfig::default());
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    init_tracing(&config.logging);
    info!(config = %cli.config, "Configuration loaded");

    // Execute command
    let result = match cli.command {
        Commands::Evaluate { op, at, trusted } => {
            commands::evaluate(&config, &op, at.as_deref(), trusted)
        }
        Commands::Simulate { op, yes } => commands::simulate(&config, &op, yes).await,
        Commands::Rules => commands::rules(&config),
        Commands::Config => commands::show_config(&config),
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Initialize tracing; RUST_LOG wins over the configured filter
fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.with_file(true).with_line_number(true).init();
    }
}
