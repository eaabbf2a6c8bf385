//! Fund recovery for ephemeral accounts
//!
//! Withdraws custodial ledger balances, waits out the ledger's withdrawal
//! delay across runs and finally sweeps the remaining native balance to one
//! destination. Progress between runs is kept in a small JSON state file.

pub mod engine;
pub mod state;
pub mod sweep;

pub use engine::{
    AccountReport, AccountSnapshot, AccountState, ReconciliationEngine, RecoveryAccount, RunReport,
    RunSummary,
};
pub use state::{
    PendingWithdrawal, StateLoad, StateWriteMode, WithdrawalState, WithdrawalStateStore,
    DEFAULT_STATE_PATH,
};
pub use sweep::{NativeSweeper, SweepOutcome};
