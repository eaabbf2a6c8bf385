//! Conditional account funding
//!
//! Tops a recipient up from a sponsor only when its balance is at or below a
//! threshold. Transfers from the same sponsor are serialized through a
//! per-sponsor lock, so callers can fund many accounts concurrently.

use std::sync::Arc;

use alloy_primitives::{Address, TxHash, U256};
use alloy_signer_local::PrivateKeySigner;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::chain::{format_native, parse_native, ChainClient, TransferRequest};
use crate::error::{Error, Result};

use super::submitter::NonceSafeSubmitter;

/// When and how much to fund
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FundingPolicy {
    /// Fund only if the balance is at or below this (wei)
    pub if_less_than: U256,
    /// Amount to send (wei)
    pub then_fund: U256,
}

impl FundingPolicy {
    /// Build a policy from decimal native-currency amounts
    pub fn from_decimal(if_less_than: &str, then_fund: &str) -> Result<Self> {
        Ok(Self {
            if_less_than: parse_native(if_less_than)?,
            then_fund: parse_native(then_fund)?,
        })
    }

    /// Whether a recipient holding `balance` should be funded
    pub fn needs_funding(&self, balance: U256) -> bool {
        balance <= self.if_less_than
    }
}

impl Default for FundingPolicy {
    fn default() -> Self {
        // 0.0001 / 0.01 native
        Self {
            if_less_than: U256::from(100_000_000_000_000u64),
            then_fund: U256::from(10_000_000_000_000_000u64),
        }
    }
}

/// What [`FundingGate::fund`] did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FundingOutcome {
    /// Balance was above the threshold
    Skipped { balance: U256 },
    /// A transfer was sent and confirmed
    Funded {
        tx_hash: TxHash,
        amount: U256,
        nonce: u64,
    },
}

/// Funds accounts from sponsors according to a [`FundingPolicy`]
pub struct FundingGate {
    reads: Arc<dyn ChainClient>,
    submitter: Arc<NonceSafeSubmitter>,
    sponsor_locks: DashMap<Address, Arc<Mutex<()>>>,
}

impl FundingGate {
    /// Balances are read through `reads`; transfers go through `submitter`,
    /// which may point at a different RPC endpoint.
    pub fn new(reads: Arc<dyn ChainClient>, submitter: Arc<NonceSafeSubmitter>) -> Self {
        Self {
            reads,
            submitter,
            sponsor_locks: DashMap::new(),
        }
    }

    fn sponsor_lock(&self, sponsor: Address) -> Arc<Mutex<()>> {
        self.sponsor_locks
            .entry(sponsor)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Top up `recipient` from `sponsor` if the policy says so
    pub async fn fund(
        &self,
        sponsor: &PrivateKeySigner,
        recipient: Address,
        policy: &FundingPolicy,
    ) -> Result<FundingOutcome> {
        let balance = self.reads.get_balance(recipient).await?;

        if !policy.needs_funding(balance) {
            debug!(
                %recipient,
                balance = %format_native(balance),
                "balance above threshold, not funding"
            );
            return Ok(FundingOutcome::Skipped { balance });
        }

        let request = TransferRequest::new(sponsor.address(), recipient, policy.then_fund);

        let (tx_hash, nonce) = {
            let lock = self.sponsor_lock(sponsor.address());
            let _guard = lock.lock().await;

            let nonce = self.submitter.nonces().allocate(sponsor.address()).await?;
            let request = request.with_nonce(nonce);
            let tx_hash = self.submitter.submit_with_retry(sponsor, request).await?;
            (tx_hash, nonce)
        };

        let receipt = self.submitter.chain().wait_for_receipt(tx_hash).await?;
        if !receipt.success {
            return Err(Error::TransactionReverted(format!("funding transfer {tx_hash}")));
        }

        info!(
            "Funded {} with {} from {} (tx: {})",
            recipient,
            format_native(policy.then_fund),
            sponsor.address(),
            tx_hash
        );

        Ok(FundingOutcome::Funded {
            tx_hash,
            amount: policy.then_fund,
            nonce,
        })
    }
}
