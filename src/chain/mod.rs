//! Chain access
//!
//! The recovery and funding flows only need a handful of remote calls:
//! balance, pending nonce, fee estimation, send and receipt. They are
//! expressed as the [`ChainClient`] trait so the flows can be driven by the
//! JSON-RPC client in production and by in-memory doubles in tests.

pub mod rpc;

use alloy_primitives::{utils, Address, TxHash, U256};
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;

use crate::error::{Error, Result};

pub use rpc::RpcChainClient;

/// Gas units consumed by a plain native-currency transfer
pub const TRANSFER_GAS_UNITS: u64 = 21_000;

/// Fee estimate returned by the chain, in wei per gas unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeEstimate {
    /// Single gas price (pre-London fee model)
    Legacy { gas_price: u128 },

    /// Base + priority fee model
    Eip1559 {
        max_fee_per_gas: u128,
        max_priority_fee_per_gas: u128,
    },
}

impl FeeEstimate {
    /// Worst-case price paid per unit of gas
    pub fn fee_per_gas(&self) -> u128 {
        match self {
            FeeEstimate::Legacy { gas_price } => *gas_price,
            FeeEstimate::Eip1559 { max_fee_per_gas, .. } => *max_fee_per_gas,
        }
    }

    /// Worst-case fee for `gas_units` of gas
    pub fn max_fee(&self, gas_units: u64) -> U256 {
        U256::from(gas_units) * U256::from(self.fee_per_gas())
    }
}

/// A native-currency transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub from: Address,
    pub to: Address,
    /// Value in wei
    pub value: U256,
    /// Explicit nonce. When unset the provider picks one.
    pub nonce: Option<u64>,
    pub gas_limit: Option<u64>,
    pub fees: Option<FeeEstimate>,
}

impl TransferRequest {
    /// Create a plain transfer with no nonce, gas or fee fields
    pub fn new(from: Address, to: Address, value: U256) -> Self {
        Self {
            from,
            to,
            value,
            nonce: None,
            gas_limit: None,
            fees: None,
        }
    }

    pub fn with_nonce(mut self, nonce: u64) -> Self {
        self.nonce = Some(nonce);
        self
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = Some(gas_limit);
        self
    }

    pub fn with_fees(mut self, fees: FeeEstimate) -> Self {
        self.fees = Some(fees);
        self
    }
}

/// Inclusion result for a submitted transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: TxHash,
    pub block_number: Option<u64>,
    pub success: bool,
}

/// Remote chain operations used by funding and recovery
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Chain id transactions are signed for
    fn chain_id(&self) -> u64;

    /// Native balance in wei
    async fn get_balance(&self, address: Address) -> Result<U256>;

    /// Next nonce including transactions still in the mempool
    async fn get_pending_nonce(&self, address: Address) -> Result<u64>;

    /// Current fee estimate
    async fn estimate_fees(&self) -> Result<FeeEstimate>;

    /// Sign `request` with `signer` and broadcast it
    async fn send_transaction(
        &self,
        signer: &PrivateKeySigner,
        request: &TransferRequest,
    ) -> Result<TxHash>;

    /// Wait until `tx_hash` is included
    async fn wait_for_receipt(&self, tx_hash: TxHash) -> Result<TxReceipt>;
}

/// Parse a decimal native-currency amount ("0.02") into wei
pub fn parse_native(amount: &str) -> Result<U256> {
    utils::parse_ether(amount.trim())
        .map_err(|e| Error::InvalidAmount(format!("{amount}: {e}")))
}

/// Format wei as a decimal native-currency amount without trailing zeros
pub fn format_native(wei: U256) -> String {
    let formatted = utils::format_ether(wei);
    if formatted.contains('.') {
        formatted
            .trim_end_matches('0')
            .trim_end_matches('.')
            .to_string()
    } else {
        formatted
    }
}
