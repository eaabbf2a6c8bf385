//! Withdrawal reconciliation
//!
//! Each account moves through a small state machine:
//!
//! ```text
//! NoRequest ──request──► Requested ──(delay elapsed)──► Executable ──withdraw──► Executed
//!                            │                                │
//!                            └──── still waiting: record, ────┴──── withdraw failed: Failed
//!                                  no sweep
//! ```
//!
//! Reads for all accounts are issued together. The decide-and-act sequence of
//! one account (read, request, re-read, execute, re-read, sweep) runs
//! strictly in order, and a failing account never stops the others.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use alloy_primitives::{Address, U256};
use alloy_signer_local::PrivateKeySigner;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::chain::{format_native, ChainClient};
use crate::error::Result;
use crate::ledger::AccountRecord;
use crate::payment::{LedgerBalance, PaymentManager, WithdrawStatus};

use super::state::{PendingWithdrawal, WithdrawalState};
use super::sweep::{NativeSweeper, SweepOutcome};

/// An account the engine can act for
#[derive(Clone)]
pub struct RecoveryAccount {
    pub label: String,
    pub signer: PrivateKeySigner,
}

impl RecoveryAccount {
    pub fn address(&self) -> Address {
        self.signer.address()
    }
}

impl TryFrom<&AccountRecord> for RecoveryAccount {
    type Error = crate::error::Error;

    fn try_from(record: &AccountRecord) -> Result<Self> {
        Ok(Self {
            label: record.label.clone(),
            signer: record.signer()?,
        })
    }
}

impl fmt::Debug for RecoveryAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryAccount")
            .field("label", &self.label)
            .field("address", &self.address())
            .finish()
    }
}

/// Remote facts about one account. `None` means the read failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSnapshot {
    pub address: Address,
    pub label: String,
    pub native: Option<U256>,
    pub ledger: Option<LedgerBalance>,
    pub status: Option<WithdrawStatus>,
}

impl AccountSnapshot {
    pub fn is_pending(&self) -> bool {
        self.status.as_ref().is_some_and(WithdrawStatus::is_pending)
    }
}

/// Where an account's withdrawal ended up after a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountState {
    NoRequest,
    Requested,
    Executable,
    Executed,
    Failed,
}

impl fmt::Display for AccountState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AccountState::NoRequest => "no-request",
            AccountState::Requested => "requested",
            AccountState::Executable => "executable",
            AccountState::Executed => "executed",
            AccountState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Everything that happened to one account during a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountReport {
    pub address: Address,
    pub label: String,
    pub state: AccountState,
    /// Remote status was observed this run
    pub examined: bool,
    pub requested: Option<U256>,
    pub executed: Option<U256>,
    pub pending: Option<PendingWithdrawal>,
    pub sweep: Option<SweepOutcome>,
    pub errors: Vec<String>,
}

impl AccountReport {
    fn new(snapshot: &AccountSnapshot) -> Self {
        Self {
            address: snapshot.address,
            label: snapshot.label.clone(),
            state: AccountState::NoRequest,
            examined: snapshot.status.is_some(),
            requested: None,
            executed: None,
            pending: None,
            sweep: None,
            errors: Vec::new(),
        }
    }

    fn fail(&mut self, step: &str, error: impl fmt::Display) {
        warn!("{} ({}): {} failed: {}", self.label, self.address, step, error);
        self.errors.push(format!("{step}: {error}"));
    }
}

/// Counts printed at the end of a withdraw run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub accounts: usize,
    pub requested: usize,
    pub executed: usize,
    pub pending: usize,
    pub swept: usize,
    /// Accounts with nothing to sweep or whose status could not be read
    pub skipped: usize,
    pub failed: usize,
    pub total_swept: U256,
}

impl RunSummary {
    pub fn from_reports(reports: &[AccountReport]) -> Self {
        let mut summary = Self {
            accounts: reports.len(),
            ..Self::default()
        };

        for report in reports {
            if report.requested.is_some() {
                summary.requested += 1;
            }
            if report.executed.is_some() {
                summary.executed += 1;
            }
            if report.pending.is_some() {
                summary.pending += 1;
            }
            if !report.errors.is_empty() {
                summary.failed += 1;
            }
            match &report.sweep {
                Some(outcome @ SweepOutcome::Swept { .. }) => {
                    summary.swept += 1;
                    summary.total_swept += outcome.swept_value();
                }
                _ if report.pending.is_none() && report.errors.is_empty() => summary.skipped += 1,
                _ => {}
            }
        }

        summary
    }
}

/// Result of [`ReconciliationEngine::run`]
#[derive(Debug, Clone)]
pub struct RunReport {
    pub accounts: Vec<AccountReport>,
    pub summary: RunSummary,
}

impl RunReport {
    /// Pending entries to persist
    pub fn pending(&self) -> Vec<PendingWithdrawal> {
        self.accounts.iter().filter_map(|a| a.pending.clone()).collect()
    }

    /// Accounts whose remote status was observed
    pub fn examined(&self) -> HashSet<Address> {
        self.accounts
            .iter()
            .filter(|a| a.examined)
            .map(|a| a.address)
            .collect()
    }
}

/// Drives withdrawals and sweeps for a set of ledger accounts
pub struct ReconciliationEngine {
    chain: Arc<dyn ChainClient>,
    payments: Arc<dyn PaymentManager>,
    sweeper: NativeSweeper,
    destination: Address,
}

impl ReconciliationEngine {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        payments: Arc<dyn PaymentManager>,
        sweeper: NativeSweeper,
        destination: Address,
    ) -> Self {
        Self {
            chain,
            payments,
            sweeper,
            destination,
        }
    }

    pub fn destination(&self) -> Address {
        self.destination
    }

    async fn snapshot_one(&self, account: &RecoveryAccount) -> AccountSnapshot {
        let address = account.address();
        let (native, ledger, status) = tokio::join!(
            self.chain.get_balance(address),
            self.payments.get_balance(address),
            self.payments.can_execute_withdraw(address),
        );

        AccountSnapshot {
            address,
            label: account.label.clone(),
            native: native
                .map_err(|e| warn!("{} ({}): native balance read failed: {}", account.label, address, e))
                .ok(),
            ledger: ledger
                .map_err(|e| warn!("{} ({}): ledger balance read failed: {}", account.label, address, e))
                .ok(),
            status: status
                .map_err(|e| warn!("{} ({}): withdraw status read failed: {}", account.label, address, e))
                .ok(),
        }
    }

    /// Read native balance, ledger balance and withdrawal status for every
    /// account concurrently
    pub async fn snapshot(&self, accounts: &[RecoveryAccount]) -> Vec<AccountSnapshot> {
        join_all(accounts.iter().map(|a| self.snapshot_one(a))).await
    }

    /// Request, execute and sweep for every account
    ///
    /// `previous` is the last persisted state; its entries count as "was
    /// pending before this run" when a status re-check fails.
    pub async fn run(
        &self,
        accounts: &[RecoveryAccount],
        previous: Option<&WithdrawalState>,
    ) -> RunReport {
        let snapshots = self.snapshot(accounts).await;
        let known: HashMap<Address, &PendingWithdrawal> = previous
            .map(|s| s.pending.iter().map(|p| (p.address, p)).collect())
            .unwrap_or_default();

        let mut reports = Vec::with_capacity(accounts.len());
        for (account, snapshot) in accounts.iter().zip(snapshots.iter()) {
            let report = self
                .reconcile(account, snapshot, known.get(&account.address()).copied())
                .await;
            reports.push(report);
        }

        let summary = RunSummary::from_reports(&reports);
        info!(
            "Recovery run: {} accounts, {} requested, {} executed, {} pending, {} swept ({}), {} failed",
            summary.accounts,
            summary.requested,
            summary.executed,
            summary.pending,
            summary.swept,
            format_native(summary.total_swept),
            summary.failed
        );

        RunReport {
            accounts: reports,
            summary,
        }
    }

    async fn reconcile(
        &self,
        account: &RecoveryAccount,
        snapshot: &AccountSnapshot,
        previous: Option<&PendingWithdrawal>,
    ) -> AccountReport {
        let mut report = AccountReport::new(snapshot);
        let now = Utc::now();

        let Some(initial) = snapshot.status.as_ref() else {
            // Without a status we can neither request safely nor sweep
            report.errors.push("withdraw status unavailable".to_string());
            report.pending = previous.cloned();
            if report.pending.is_some() {
                report.state = AccountState::Requested;
            }
            return report;
        };

        let had_pending = initial.is_pending() || previous.is_some();
        let mut latest = Some(initial.clone());
        let mut ledger_unknown = false;

        if initial.is_pending() {
            report.state = AccountState::Requested;
        } else {
            match snapshot.ledger {
                Some(ledger) if !ledger.available.is_zero() => {
                    match self.payments.request_withdraw(&account.signer, ledger.available).await {
                        Ok(tx_hash) => {
                            info!(
                                "Requested withdrawal of {} for {} ({}) (tx: {})",
                                format_native(ledger.available),
                                account.label,
                                account.address(),
                                tx_hash
                            );
                            report.requested = Some(ledger.available);
                            report.state = AccountState::Requested;
                        }
                        Err(e) => report.fail("request withdraw", e),
                    }
                }
                Some(_) => debug!(address = %account.address(), "no ledger balance to withdraw"),
                None => {
                    report
                        .errors
                        .push("ledger balance unavailable, request and sweep skipped".to_string());
                    ledger_unknown = true;
                }
            }
        }

        let mut still_pending = false;
        if had_pending || report.requested.is_some() {
            match self.payments.can_execute_withdraw(account.address()).await {
                Ok(status) if status.is_pending() && status.can_execute => {
                    report.state = AccountState::Executable;
                    let amount = status.request.amount;
                    latest = Some(status);
                    match self.payments.withdraw(&account.signer, amount).await {
                        Ok(tx_hash) => {
                            info!(
                                "Executed withdrawal of {} for {} ({}) (tx: {})",
                                format_native(amount),
                                account.label,
                                account.address(),
                                tx_hash
                            );
                            report.executed = Some(amount);
                            report.state = AccountState::Executed;

                            match self.payments.can_execute_withdraw(account.address()).await {
                                Ok(after) => {
                                    still_pending = after.is_pending();
                                    latest = Some(after);
                                }
                                Err(e) => {
                                    warn!(
                                        "{} ({}): status re-check failed, assuming still pending: {}",
                                        account.label,
                                        account.address(),
                                        e
                                    );
                                    still_pending = true;
                                }
                            }
                        }
                        Err(e) => {
                            report.fail("execute withdraw", e);
                            report.state = AccountState::Failed;
                            still_pending = true;
                        }
                    }
                }
                Ok(status) if status.is_pending() => {
                    report.state = AccountState::Requested;
                    still_pending = true;
                    latest = Some(status);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        "{} ({}): status re-check failed, assuming still pending: {}",
                        account.label,
                        account.address(),
                        e
                    );
                    still_pending = true;
                }
            }
        }

        if still_pending {
            let entry = pending_entry(
                account,
                latest.as_ref().filter(|s| s.is_pending()),
                report.requested,
                previous,
                now,
            );
            info!(
                "{} ({}) has {} pending, {} s remaining; not sweeping",
                account.label,
                account.address(),
                entry.amount,
                entry
                    .time_remaining_seconds
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "unknown".to_string())
            );
            report.pending = Some(entry);
            return report;
        }

        // Keep the gas a later run needs to request the custodial balance
        if ledger_unknown {
            return report;
        }

        if account.address() == self.destination {
            debug!(address = %account.address(), "account is the destination, not sweeping");
            return report;
        }

        match self.sweeper.sweep(&account.signer, self.destination).await {
            Ok(outcome) => report.sweep = Some(outcome),
            Err(e) => report.fail("sweep", e),
        }

        report
    }
}

fn pending_entry(
    account: &RecoveryAccount,
    status: Option<&WithdrawStatus>,
    requested: Option<U256>,
    previous: Option<&PendingWithdrawal>,
    now: DateTime<Utc>,
) -> PendingWithdrawal {
    let amount = status
        .map(|s| s.request.amount)
        .filter(|a| !a.is_zero())
        .or(requested)
        .map(format_native)
        .or_else(|| previous.map(|p| p.amount.clone()))
        .unwrap_or_else(|| "0".to_string());

    PendingWithdrawal {
        address: account.address(),
        label: Some(account.label.clone()),
        amount,
        requested_at: status
            .and_then(|s| s.request.requested_at)
            .or(previous.map(|p| p.requested_at))
            .unwrap_or(now),
        time_remaining_seconds: status.and_then(|s| s.time_remaining_secs),
        last_checked_at: now,
    }
}
