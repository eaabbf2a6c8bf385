//! Native balance sweep

use std::sync::Arc;

use alloy_primitives::{Address, TxHash, U256};
use alloy_signer_local::PrivateKeySigner;
use tracing::{debug, info};

use crate::chain::{format_native, TransferRequest, TRANSFER_GAS_UNITS};
use crate::error::{Error, Result};
use crate::funding::NonceSafeSubmitter;

/// What [`NativeSweeper::sweep`] did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepOutcome {
    /// Nothing on the account
    Empty,
    /// The balance would not cover the transfer's own gas
    BelowFee { balance: U256, max_fee: U256 },
    /// A transfer was confirmed
    Swept {
        tx_hash: TxHash,
        value: U256,
        max_fee: U256,
    },
}

impl SweepOutcome {
    pub fn swept_value(&self) -> U256 {
        match self {
            SweepOutcome::Swept { value, .. } => *value,
            _ => U256::ZERO,
        }
    }
}

/// Moves an account's native balance, less worst-case gas, to a destination
pub struct NativeSweeper {
    submitter: Arc<NonceSafeSubmitter>,
}

impl NativeSweeper {
    pub fn new(submitter: Arc<NonceSafeSubmitter>) -> Self {
        Self { submitter }
    }

    pub async fn sweep(&self, account: &PrivateKeySigner, destination: Address) -> Result<SweepOutcome> {
        let chain = self.submitter.chain();
        let from = account.address();

        let balance = chain.get_balance(from).await?;
        if balance.is_zero() {
            debug!(%from, "nothing to sweep");
            return Ok(SweepOutcome::Empty);
        }

        let fees = chain.estimate_fees().await?;
        let max_fee = fees.max_fee(TRANSFER_GAS_UNITS);
        if balance <= max_fee {
            debug!(
                %from,
                balance = %format_native(balance),
                max_fee = %format_native(max_fee),
                "balance does not cover gas, not sweeping"
            );
            return Ok(SweepOutcome::BelowFee { balance, max_fee });
        }

        let value = balance - max_fee;
        let request = TransferRequest::new(from, destination, value)
            .with_gas_limit(TRANSFER_GAS_UNITS)
            .with_fees(fees);

        let tx_hash = self.submitter.submit(account, request).await?;
        let receipt = chain.wait_for_receipt(tx_hash).await?;
        if !receipt.success {
            return Err(Error::TransactionReverted(format!("sweep transfer {tx_hash}")));
        }

        info!(
            "Swept {} from {} to {} (tx: {})",
            format_native(value),
            from,
            destination,
            tx_hash
        );

        Ok(SweepOutcome::Swept {
            tx_hash,
            value,
            max_fee,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{parse_native, FeeEstimate};
    use crate::funding::{NonceAllocator, RetryPolicy};
    use crate::testing::MockChain;
    use std::time::Duration;

    fn sweeper(chain: &Arc<MockChain>) -> NativeSweeper {
        let nonces = Arc::new(NonceAllocator::new(chain.clone()));
        NativeSweeper::new(Arc::new(NonceSafeSubmitter::new(
            chain.clone(),
            nonces,
            RetryPolicy {
                max_retries: 3,
                delay: Duration::from_millis(1),
            },
        )))
    }

    #[tokio::test]
    async fn test_sweeps_balance_minus_gas() {
        let chain = Arc::new(MockChain::new());
        let account = PrivateKeySigner::random();
        let destination = Address::repeat_byte(0xdd);
        chain.set_balance(account.address(), parse_native("0.02").unwrap());

        let outcome = sweeper(&chain).sweep(&account, destination).await.unwrap();

        // 21000 gas at 1 gwei
        let max_fee = U256::from(21_000u64 * 1_000_000_000);
        let expected = parse_native("0.02").unwrap() - max_fee;
        assert_eq!(outcome.swept_value(), expected);

        let sent = chain.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].request.to, destination);
        assert_eq!(sent[0].request.gas_limit, Some(TRANSFER_GAS_UNITS));
        assert!(sent[0].request.value + max_fee <= parse_native("0.02").unwrap());
        assert_eq!(chain.balance(destination), expected);
        assert_eq!(chain.balance(account.address()), U256::ZERO);
    }

    #[tokio::test]
    async fn test_empty_account_is_noop() {
        let chain = Arc::new(MockChain::new());
        let account = PrivateKeySigner::random();

        let outcome = sweeper(&chain)
            .sweep(&account, Address::repeat_byte(1))
            .await
            .unwrap();

        assert_eq!(outcome, SweepOutcome::Empty);
        assert!(chain.sent().is_empty());
    }

    #[tokio::test]
    async fn test_balance_at_fee_is_noop() {
        let chain = Arc::new(MockChain::new());
        let account = PrivateKeySigner::random();
        chain.set_fees(FeeEstimate::Eip1559 {
            max_fee_per_gas: 2_000_000_000,
            max_priority_fee_per_gas: 1_000_000_000,
        });
        chain.set_balance(account.address(), U256::from(21_000u64 * 2_000_000_000));

        let outcome = sweeper(&chain)
            .sweep(&account, Address::repeat_byte(1))
            .await
            .unwrap();

        assert!(matches!(outcome, SweepOutcome::BelowFee { .. }));
        assert!(chain.sent().is_empty());
    }

    #[tokio::test]
    async fn test_eip1559_fields_carried() {
        let chain = Arc::new(MockChain::new());
        let account = PrivateKeySigner::random();
        let fees = FeeEstimate::Eip1559 {
            max_fee_per_gas: 3_000_000_000,
            max_priority_fee_per_gas: 1_000_000_000,
        };
        chain.set_fees(fees);
        chain.set_pending_nonce(account.address(), 7);
        chain.set_balance(account.address(), parse_native("1").unwrap());

        sweeper(&chain)
            .sweep(&account, Address::repeat_byte(1))
            .await
            .unwrap();

        let sent = chain.sent();
        assert_eq!(sent[0].request.fees, Some(fees));
        assert_eq!(sent[0].request.nonce, Some(7));
    }

    #[tokio::test]
    async fn test_fee_read_failure_propagates() {
        let chain = Arc::new(MockChain::new());
        let account = PrivateKeySigner::random();
        chain.set_balance(account.address(), parse_native("1").unwrap());
        chain.fail_fee_reads(true);

        let result = sweeper(&chain).sweep(&account, Address::repeat_byte(1)).await;

        assert!(matches!(result, Err(Error::Rpc(_))));
        assert!(chain.sent().is_empty());
    }
}
