//! money-back - recover funds from ephemeral e2e test accounts
//!
//! Without `--withdraw` the tool only reports balances. With it, custodial
//! ledger balances are withdrawn (waiting out the ledger's delay across runs)
//! and native balances are swept to the master account.

use anyhow::Result;
use clap::Parser;
use tracing::error;

use money_back::cli::{self, commands, RunOptions};
use money_back::config::{Config, DEFAULT_CONFIG_PATH};

/// Recover funds from generated test accounts
#[derive(Parser)]
#[command(name = "money-back")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Request and execute withdrawals, then sweep native balances
    #[arg(long)]
    withdraw: bool,

    /// Skip the destination confirmation prompt
    #[arg(long)]
    yes: bool,

    /// Print the effective configuration (secrets masked) and exit
    #[arg(long)]
    show_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    cli::init_tracing()?;

    let args = Cli::parse();

    let config = match Config::load(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    if args.show_config {
        return commands::show_config(&config);
    }

    let options = RunOptions {
        withdraw: args.withdraw,
        yes: args.yes,
    };
    if let Err(e) = commands::money_back(&config, options).await {
        error!("money-back failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
