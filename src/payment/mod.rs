//! Custodial payment manager
//!
//! Funds deposited with the payment ledger are held on behalf of an address
//! and can only leave it through a two-step withdrawal: a request, then an
//! execute once the ledger's withdrawal delay has elapsed.

pub mod contract;

use alloy_primitives::{Address, TxHash, U256};
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::error::Result;

pub use contract::LedgerContractClient;

/// Custodial balance of one user, in wei
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LedgerBalance {
    /// Everything held for the user, including amounts already requested
    pub total: U256,
    /// Amount that may still be requested for withdrawal
    pub available: U256,
}

/// Latest withdrawal request recorded for a user
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WithdrawRequest {
    pub is_pending: bool,
    pub amount: U256,
    pub requested_at: Option<DateTime<Utc>>,
}

/// Whether a user's pending withdrawal may be executed now
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WithdrawStatus {
    pub can_execute: bool,
    pub request: WithdrawRequest,
    pub time_remaining_secs: Option<u64>,
}

impl WithdrawStatus {
    /// Derive status from the raw request fields and the ledger's delay
    ///
    /// A zero amount means no request is outstanding.
    pub fn from_request(
        requested_at_secs: u64,
        amount: U256,
        delay_secs: u64,
        now: DateTime<Utc>,
    ) -> Self {
        if amount.is_zero() {
            return Self::default();
        }

        let requested_at = Utc
            .timestamp_opt(requested_at_secs as i64, 0)
            .single();
        let ready_at = requested_at_secs.saturating_add(delay_secs);
        let now_secs = now.timestamp().max(0) as u64;
        let remaining = ready_at.saturating_sub(now_secs);

        Self {
            can_execute: remaining == 0,
            request: WithdrawRequest {
                is_pending: true,
                amount,
                requested_at,
            },
            time_remaining_secs: Some(remaining),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.request.is_pending
    }
}

/// Remote payment ledger operations
#[async_trait]
pub trait PaymentManager: Send + Sync {
    /// Custodial balance held for `user`
    async fn get_balance(&self, user: Address) -> Result<LedgerBalance>;

    /// Ask the ledger to release `amount` to the signer after the delay
    async fn request_withdraw(&self, signer: &PrivateKeySigner, amount: U256) -> Result<TxHash>;

    /// Status of the latest withdrawal request for `user`
    async fn can_execute_withdraw(&self, user: Address) -> Result<WithdrawStatus>;

    /// Execute a previously requested withdrawal of `amount`
    async fn withdraw(&self, signer: &PrivateKeySigner, amount: U256) -> Result<TxHash>;
}
