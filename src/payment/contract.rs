//! Payment ledger contract client

use std::time::Duration;

use alloy_network::{Ethereum, EthereumWallet};
use alloy_primitives::{Address, TxHash, I256, U256};
use alloy_provider::{
    PendingTransactionBuilder, PendingTransactionError, ProviderBuilder, RootProvider, WatchTxError,
};
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::sol;
use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;
use url::Url;

use super::{LedgerBalance, PaymentManager, WithdrawStatus};
use crate::error::{Error, Result};

sol! {
    #[sol(rpc)]
    interface ILedger {
        function balance(address user) external view returns (int256);
        function stableBalance(address user) external view returns (int256);
        function requestWithdraw(int256 amount) external;
        function withdraw(int256 amount) external;
        function latestWithdrawRequest(address user) external view returns (uint256 timestamp, uint256 amount);
        function userWithdrawDelay() external view returns (uint256);
    }
}

/// Payment manager backed by the on-chain ledger contract
pub struct LedgerContractClient {
    url: Url,
    address: Address,
    receipt_timeout: Duration,
    contract: ILedger::ILedgerInstance<RootProvider>,
}

impl LedgerContractClient {
    /// Creates a new client for the ledger contract at `address`
    ///
    /// Writes give up waiting for their receipt after `receipt_timeout`.
    pub fn new(address: Address, rpc_url: Url, receipt_timeout: Duration) -> Self {
        let provider = RootProvider::new_http(rpc_url.clone());
        let contract = ILedger::ILedgerInstance::new(address, provider);
        Self {
            url: rpc_url,
            address,
            receipt_timeout,
            contract,
        }
    }

    pub fn receipt_timeout(&self) -> Duration {
        self.receipt_timeout
    }

    /// Wait for a write to be mined and fail if it reverted
    async fn confirm(&self, pending: PendingTransactionBuilder<Ethereum>, call: &str) -> Result<TxHash> {
        let tx_hash = *pending.tx_hash();
        let receipt = pending
            .with_timeout(Some(self.receipt_timeout))
            .get_receipt()
            .await
            .map_err(|e| match e {
                PendingTransactionError::TxWatcher(WatchTxError::Timeout) => Error::ReceiptTimeout {
                    tx_hash: tx_hash.to_string(),
                    timeout_secs: self.receipt_timeout.as_secs(),
                },
                other => Error::Contract(format!("{call} receipt failed: {other}")),
            })?;

        if !receipt.status() {
            return Err(Error::TransactionReverted(format!("{call} {tx_hash}")));
        }
        Ok(tx_hash)
    }

    fn to_signed(amount: U256) -> Result<I256> {
        I256::try_from(amount)
            .map_err(|_| Error::InvalidAmount(format!("{amount} does not fit in int256")))
    }

    /// Negative ledger balances (debt) count as nothing to withdraw
    fn to_unsigned(value: I256) -> U256 {
        if value.is_negative() {
            U256::ZERO
        } else {
            value.into_raw()
        }
    }

    async fn withdraw_delay(&self) -> Result<u64> {
        let delay = self
            .contract
            .userWithdrawDelay()
            .call()
            .await
            .map_err(|e| Error::Contract(format!("userWithdrawDelay failed: {e}")))?;

        delay
            .try_into()
            .map_err(|_| Error::Contract("userWithdrawDelay overflows u64".to_string()))
    }
}

#[async_trait]
impl PaymentManager for LedgerContractClient {
    async fn get_balance(&self, user: Address) -> Result<LedgerBalance> {
        let total = self
            .contract
            .balance(user)
            .call()
            .await
            .map_err(|e| Error::Contract(format!("balance({user}) failed: {e}")))?;

        let available = self
            .contract
            .stableBalance(user)
            .call()
            .await
            .map_err(|e| Error::Contract(format!("stableBalance({user}) failed: {e}")))?;

        Ok(LedgerBalance {
            total: Self::to_unsigned(total),
            available: Self::to_unsigned(available),
        })
    }

    async fn request_withdraw(&self, signer: &PrivateKeySigner, amount: U256) -> Result<TxHash> {
        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer.clone()))
            .connect_http(self.url.clone());
        let contract = ILedger::new(self.address, provider);

        let pending = contract
            .requestWithdraw(Self::to_signed(amount)?)
            .send()
            .await
            .map_err(|e| Error::Contract(format!("requestWithdraw failed: {e}")))?;
        let tx_hash = self.confirm(pending, "requestWithdraw").await?;

        debug!(user = %signer.address(), tx = %tx_hash, "withdrawal requested");
        Ok(tx_hash)
    }

    async fn can_execute_withdraw(&self, user: Address) -> Result<WithdrawStatus> {
        let request = self
            .contract
            .latestWithdrawRequest(user)
            .call()
            .await
            .map_err(|e| Error::Contract(format!("latestWithdrawRequest({user}) failed: {e}")))?;

        if request.amount.is_zero() {
            return Ok(WithdrawStatus::default());
        }

        let requested_at: u64 = request
            .timestamp
            .try_into()
            .map_err(|_| Error::Contract("withdraw request timestamp overflows u64".to_string()))?;
        let delay = self.withdraw_delay().await?;

        Ok(WithdrawStatus::from_request(
            requested_at,
            request.amount,
            delay,
            Utc::now(),
        ))
    }

    async fn withdraw(&self, signer: &PrivateKeySigner, amount: U256) -> Result<TxHash> {
        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer.clone()))
            .connect_http(self.url.clone());
        let contract = ILedger::new(self.address, provider);

        let pending = contract
            .withdraw(Self::to_signed(amount)?)
            .send()
            .await
            .map_err(|e| Error::Contract(format!("withdraw failed: {e}")))?;
        let tx_hash = self.confirm(pending, "withdraw").await?;

        debug!(user = %signer.address(), tx = %tx_hash, "withdrawal executed");
        Ok(tx_hash)
    }
}
