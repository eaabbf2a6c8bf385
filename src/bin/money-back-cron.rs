//! Runs money-back on a fixed minute interval taken from `CRON`

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use money_back::cli::{self, commands, CronSchedule, RunOptions};
use money_back::config::{Config, DEFAULT_CONFIG_PATH};

/// Run money-back repeatedly
#[derive(Parser)]
#[command(name = "money-back-cron")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Schedule, `* * * * *` or `*/N * * * *`
    #[arg(long, env = "CRON")]
    cron: String,

    /// Path to config file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Request and execute withdrawals, then sweep native balances
    #[arg(long)]
    withdraw: bool,

    /// Skip the destination confirmation prompt
    #[arg(long)]
    yes: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    cli::init_tracing()?;

    let args = Cli::parse();

    let schedule = match CronSchedule::parse(&args.cron) {
        Ok(schedule) => schedule,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let config = match Config::load(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Running money-back every {} minute(s) on {}",
        schedule.every_minutes(),
        config.network
    );

    let options = RunOptions {
        withdraw: args.withdraw,
        yes: args.yes,
    };
    if let Err(e) = cli::cron::run_forever(schedule, || commands::money_back(&config, options)).await {
        error!("money-back-cron stopped: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
