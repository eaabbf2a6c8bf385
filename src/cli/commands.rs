//! CLI command implementations

use std::collections::HashSet;
use std::io::IsTerminal;

use alloy_primitives::{Address, U256};
use anyhow::Result;
use chrono::Utc;
use dialoguer::Input;
use tracing::{info, warn};

use crate::chain::format_native;
use crate::config::Config;
use crate::error::Error;
use crate::ledger::AccountLedger;
use crate::recovery::{
    AccountSnapshot, PendingWithdrawal, RecoveryAccount, RunReport, StateLoad, WithdrawalState,
    WithdrawalStateStore,
};
use crate::services::Services;

/// Flags of one `money-back` invocation
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Request, execute and sweep; otherwise only report
    pub withdraw: bool,
    /// Skip the destination confirmation
    pub yes: bool,
}

/// Recover funds from every ledger account on the configured network
pub async fn money_back(config: &Config, options: RunOptions) -> Result<()> {
    let destination = config.destination()?;
    confirm_destination(config, destination, options.yes)?;

    let accounts = load_accounts(config)?;
    let store = WithdrawalStateStore::new(&config.recovery.state_path);

    if accounts.is_empty() {
        println!(
            "No ledger accounts for {} in {}",
            config.network, config.ledger.accounts_path
        );
        if options.withdraw {
            let previous = store.load().await?;
            save_state(config, &store, &previous, Vec::new(), &HashSet::new(), destination).await?;
        }
        return Ok(());
    }
    info!(
        "Loaded {} accounts for {} from {}",
        accounts.len(),
        config.network,
        config.ledger.accounts_path
    );

    let services = Services::from_config(config)?;
    let engine = services.engine(config)?;
    let previous = store.load().await?;

    if !options.withdraw {
        let snapshots = engine.snapshot(&accounts).await;
        print_report(&snapshots, previous.state());
        println!("\nRead-only run. Pass --withdraw to request, execute and sweep.");
        return Ok(());
    }

    let report = engine.run(&accounts, previous.state()).await;
    save_state(
        config,
        &store,
        &previous,
        report.pending(),
        &report.examined(),
        destination,
    )
    .await?;

    print_summary(&report, destination);
    Ok(())
}

async fn save_state(
    config: &Config,
    store: &WithdrawalStateStore,
    previous: &StateLoad,
    pending: Vec<PendingWithdrawal>,
    examined: &HashSet<Address>,
    destination: Address,
) -> Result<()> {
    if let StateLoad::Corrupt(reason) = previous {
        warn!("Starting without previous withdrawal state: {}", reason);
    }

    let next = WithdrawalState::next(
        previous.state(),
        pending,
        examined,
        config.recovery.state_write_mode,
        &config.network,
        destination,
        Utc::now(),
    );
    store.save(&next).await?;
    Ok(())
}

/// Ledger accounts for the configured network whose keys check out
pub fn load_accounts(config: &Config) -> crate::error::Result<Vec<RecoveryAccount>> {
    let ledger = AccountLedger::new(&config.ledger.accounts_path);
    let records = ledger.accounts_for_network(&config.network)?;

    let mut accounts = Vec::with_capacity(records.len());
    for record in &records {
        match RecoveryAccount::try_from(record) {
            Ok(account) => accounts.push(account),
            Err(e) => warn!("Skipping ledger account {} ({}): {}", record.label, record.address, e),
        }
    }
    Ok(accounts)
}

/// Require a typed "yes" for the sweep destination unless `yes` is set
fn confirm_destination(config: &Config, destination: Address, yes: bool) -> Result<()> {
    if yes {
        info!("Sweep destination {} confirmed by --yes", destination);
        return Ok(());
    }

    if !std::io::stdin().is_terminal() {
        return Err(Error::Aborted(
            "not an interactive terminal; pass --yes to confirm the sweep destination".to_string(),
        )
        .into());
    }

    println!("\nNetwork:           {}", config.network);
    println!("Sweep destination: {}\n", destination);

    let answer: String = Input::new()
        .with_prompt("Type \"yes\" to send recovered funds to this address")
        .allow_empty(true)
        .interact_text()?;

    if !is_confirmed(&answer) {
        return Err(Error::Aborted("sweep destination not confirmed".to_string()).into());
    }
    Ok(())
}

fn is_confirmed(answer: &str) -> bool {
    answer.trim() == "yes"
}

fn print_report(snapshots: &[AccountSnapshot], state: Option<&WithdrawalState>) {
    println!("\n=== LEDGER ACCOUNTS ===\n");

    let mut native_total = U256::ZERO;
    let mut ledger_total = U256::ZERO;
    let mut available_total = U256::ZERO;

    for snapshot in snapshots {
        println!("{} ({})", snapshot.label, snapshot.address);
        println!("  Native:  {}", show(snapshot.native));
        println!(
            "  Ledger:  {} total, {} available",
            show(snapshot.ledger.map(|l| l.total)),
            show(snapshot.ledger.map(|l| l.available))
        );
        match &snapshot.status {
            Some(status) if status.is_pending() => println!(
                "  Pending: {} ({})",
                format_native(status.request.amount),
                if status.can_execute {
                    "executable now".to_string()
                } else {
                    format!(
                        "{}s remaining",
                        status
                            .time_remaining_secs
                            .map(|s| s.to_string())
                            .unwrap_or_else(|| "?".to_string())
                    )
                }
            ),
            Some(_) => println!("  Pending: none"),
            None => println!("  Pending: (status unavailable)"),
        }
        println!();

        native_total += snapshot.native.unwrap_or_default();
        if let Some(ledger) = snapshot.ledger {
            ledger_total += ledger.total;
            available_total += ledger.available;
        }
    }

    println!("=== TOTALS ===\n");
    println!("Accounts: {}", snapshots.len());
    println!("Native:   {}", format_native(native_total));
    println!(
        "Ledger:   {} total, {} available",
        format_native(ledger_total),
        format_native(available_total)
    );

    if let Some(state) = state {
        println!(
            "\nLast withdraw run ({}) left {} pending, checked {}",
            state.network,
            state.pending.len(),
            state.updated_at.to_rfc3339()
        );
    }
}

fn print_summary(report: &RunReport, destination: Address) {
    println!("\n=== RECOVERY SUMMARY ===\n");

    for account in &report.accounts {
        print!("{} ({}): {}", account.label, account.address, account.state);
        if let Some(pending) = &account.pending {
            print!(
                ", {} pending ({}s remaining)",
                pending.amount,
                pending
                    .time_remaining_seconds
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "?".to_string())
            );
        }
        if let Some(sweep) = &account.sweep {
            let swept = sweep.swept_value();
            if !swept.is_zero() {
                print!(", swept {}", format_native(swept));
            }
        }
        println!();
        for error in &account.errors {
            println!("  ! {}", error);
        }
    }

    let summary = &report.summary;
    println!();
    println!("Accounts:    {}", summary.accounts);
    println!("Requested:   {}", summary.requested);
    println!("Executed:    {}", summary.executed);
    println!("Pending:     {}", summary.pending);
    println!("Swept:       {}", summary.swept);
    println!("Skipped:     {}", summary.skipped);
    println!("Failed:      {}", summary.failed);
    println!(
        "Total swept: {} to {}",
        format_native(summary.total_swept),
        destination
    );
}

fn show(value: Option<U256>) -> String {
    value
        .map(format_native)
        .unwrap_or_else(|| "(unavailable)".to_string())
}

/// Show current configuration (secrets masked)
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChainConfig, PaymentConfig};
    use crate::ledger::{AccountRecord, RunId};
    use crate::recovery::StateWriteMode;
    use alloy_signer_local::PrivateKeySigner;
    use tempfile::tempdir;

    fn config(accounts_path: &str) -> Config {
        let mut config = Config {
            network: "naga-dev".to_string(),
            master_private_key:
                "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318".to_string(),
            chain: ChainConfig {
                rpc_url: "http://127.0.0.1:8545".to_string(),
                ..ChainConfig::default()
            },
            payment: PaymentConfig {
                ledger_contract: "0x1111111111111111111111111111111111111111".to_string(),
            },
            ..Config::default()
        };
        config.ledger.accounts_path = accounts_path.to_string();
        config
    }

    #[test]
    fn test_confirmation_answer() {
        assert!(is_confirmed("yes"));
        assert!(is_confirmed("  yes\n"));
        assert!(!is_confirmed("y"));
        assert!(!is_confirmed("YES please"));
        assert!(!is_confirmed(""));
    }

    #[test]
    fn test_yes_flag_skips_prompt() {
        let config = config("unused.jsonl");
        confirm_destination(&config, Address::repeat_byte(1), true).unwrap();
    }

    #[test]
    fn test_load_accounts_filters_network_and_bad_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("accounts.jsonl");
        let ledger = AccountLedger::new(&path);
        let run = RunId::new();

        let good = ledger.mint("alice", &run, Some("naga-dev")).unwrap();
        ledger.mint("other", &run, Some("naga-test")).unwrap();
        let legacy = ledger.mint("legacy", &run, None).unwrap();

        let signer = PrivateKeySigner::random();
        let mut broken = AccountRecord::from_signer(&signer, "broken", run.clone(), None);
        broken.address = Address::repeat_byte(0x42);
        ledger.append(&broken).unwrap();

        let config = config(path.to_str().unwrap());
        let accounts = load_accounts(&config).unwrap();

        let addresses: Vec<_> = accounts.iter().map(|a| a.address()).collect();
        assert_eq!(addresses, vec![good.address, legacy.address]);
    }

    #[tokio::test]
    async fn test_withdraw_without_accounts_replaces_state() {
        let dir = tempdir().unwrap();
        let mut config = config(dir.path().join("none.jsonl").to_str().unwrap());
        config.recovery.state_path = dir.path().join("state.json").to_str().unwrap().to_string();
        let store = WithdrawalStateStore::new(&config.recovery.state_path);

        let stale = PendingWithdrawal {
            address: Address::repeat_byte(7),
            label: Some("gone".to_string()),
            amount: "1".to_string(),
            requested_at: Utc::now(),
            time_remaining_seconds: Some(60),
            last_checked_at: Utc::now(),
        };
        let previous = WithdrawalState::next(
            None,
            vec![stale],
            &HashSet::new(),
            StateWriteMode::Replace,
            "naga-dev",
            Address::repeat_byte(1),
            Utc::now(),
        );
        store.save(&previous).await.unwrap();

        let options = RunOptions {
            withdraw: true,
            yes: true,
        };
        money_back(&config, options).await.unwrap();

        let saved = store.load().await.unwrap();
        let state = saved.state().unwrap();
        assert!(state.pending.is_empty());
        assert_eq!(state.destination, config.destination().unwrap());
    }

    #[test]
    fn test_missing_ledger_has_no_accounts() {
        let dir = tempdir().unwrap();
        let config = config(dir.path().join("none.jsonl").to_str().unwrap());
        assert!(load_accounts(&config).unwrap().is_empty());
    }
}
