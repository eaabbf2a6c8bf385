//! JSON-RPC chain client
//!
//! Reads go through a shared [`RootProvider`]. Sends build a short-lived
//! provider with the sender's wallet attached, since every recovered account
//! signs with its own key.

use std::time::Duration;

use alloy_network::{EthereumWallet, TransactionBuilder};
use alloy_primitives::{Address, TxHash, U256};
use alloy_provider::{Provider, ProviderBuilder, RootProvider};
use alloy_rpc_types_eth::TransactionRequest;
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use tokio::time::{sleep, timeout};
use tracing::debug;
use url::Url;

use super::{ChainClient, FeeEstimate, TransferRequest, TxReceipt};
use crate::error::{Error, Result};

/// Chain client backed by an HTTP JSON-RPC endpoint
pub struct RpcChainClient {
    url: Url,
    chain_id: u64,
    provider: RootProvider,
    receipt_timeout: Duration,
    poll_interval: Duration,
}

impl RpcChainClient {
    /// Create a new client for `url`
    pub fn new(url: Url, chain_id: u64, receipt_timeout: Duration, poll_interval: Duration) -> Self {
        let provider = RootProvider::new_http(url.clone());
        Self {
            url,
            chain_id,
            provider,
            receipt_timeout,
            poll_interval,
        }
    }

    /// Endpoint this client talks to
    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn get_balance(&self, address: Address) -> Result<U256> {
        self.provider
            .get_balance(address)
            .await
            .map_err(|e| Error::Rpc(format!("eth_getBalance({address}) failed: {e}")))
    }

    async fn get_pending_nonce(&self, address: Address) -> Result<u64> {
        self.provider
            .get_transaction_count(address)
            .pending()
            .await
            .map_err(|e| Error::Rpc(format!("eth_getTransactionCount({address}) failed: {e}")))
    }

    async fn estimate_fees(&self) -> Result<FeeEstimate> {
        match self.provider.estimate_eip1559_fees().await {
            Ok(estimate) => Ok(FeeEstimate::Eip1559 {
                max_fee_per_gas: estimate.max_fee_per_gas,
                max_priority_fee_per_gas: estimate.max_priority_fee_per_gas,
            }),
            Err(e) => {
                debug!("EIP-1559 estimation unavailable ({}), using eth_gasPrice", e);
                let gas_price = self
                    .provider
                    .get_gas_price()
                    .await
                    .map_err(|e| Error::Rpc(format!("eth_gasPrice failed: {e}")))?;
                Ok(FeeEstimate::Legacy { gas_price })
            }
        }
    }

    async fn send_transaction(
        &self,
        signer: &PrivateKeySigner,
        request: &TransferRequest,
    ) -> Result<TxHash> {
        let wallet = EthereumWallet::from(signer.clone());
        let provider = ProviderBuilder::new()
            .wallet(wallet)
            .connect_http(self.url.clone());

        let mut tx = TransactionRequest::default()
            .with_from(request.from)
            .with_to(request.to)
            .with_value(request.value)
            .with_chain_id(self.chain_id);

        if let Some(nonce) = request.nonce {
            tx.set_nonce(nonce);
        }
        if let Some(gas_limit) = request.gas_limit {
            tx.set_gas_limit(gas_limit);
        }
        match request.fees {
            Some(FeeEstimate::Legacy { gas_price }) => tx.set_gas_price(gas_price),
            Some(FeeEstimate::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            }) => {
                tx.set_max_fee_per_gas(max_fee_per_gas);
                tx.set_max_priority_fee_per_gas(max_priority_fee_per_gas);
            }
            None => {}
        }

        let pending = provider
            .send_transaction(tx)
            .await
            .map_err(|e| Error::TransactionSend(e.to_string()))?;

        Ok(*pending.tx_hash())
    }

    async fn wait_for_receipt(&self, tx_hash: TxHash) -> Result<TxReceipt> {
        let receipt = timeout(self.receipt_timeout, async {
            loop {
                let receipt = self
                    .provider
                    .get_transaction_receipt(tx_hash)
                    .await
                    .map_err(|e| Error::Rpc(format!("eth_getTransactionReceipt failed: {e}")))?;
                if let Some(receipt) = receipt {
                    return Ok::<_, Error>(receipt);
                }
                sleep(self.poll_interval).await;
            }
        })
        .await
        .map_err(|_| Error::ReceiptTimeout {
            tx_hash: tx_hash.to_string(),
            timeout_secs: self.receipt_timeout.as_secs(),
        })??;

        Ok(TxReceipt {
            tx_hash,
            block_number: receipt.block_number,
            success: receipt.status(),
        })
    }
}
