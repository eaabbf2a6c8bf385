//! Command-line entry points shared by the `money-back` binaries

pub mod commands;
pub mod cron;

pub use commands::{money_back, RunOptions};
pub use cron::CronSchedule;

/// Initialize tracing; `RUST_LOG` adds to the default `money_back=info`
pub fn init_tracing() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("money_back=info".parse()?),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
    Ok(())
}
