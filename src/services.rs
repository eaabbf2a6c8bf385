//! Wiring of remote clients and the shared nonce pipeline

use std::sync::Arc;

use alloy_primitives::Address;
use alloy_signer_local::PrivateKeySigner;
use url::Url;

use crate::chain::{ChainClient, RpcChainClient};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::funding::{
    FundingGate, FundingOutcome, FundingPolicy, NonceAllocator, NonceSafeSubmitter, RetryPolicy,
};
use crate::payment::{LedgerContractClient, PaymentManager};
use crate::recovery::{NativeSweeper, ReconciliationEngine};

/// Clients shared by funding and recovery within one process
pub struct Services {
    pub chain: Arc<dyn ChainClient>,
    pub payments: Arc<dyn PaymentManager>,
    pub nonces: Arc<NonceAllocator>,
    pub submitter: Arc<NonceSafeSubmitter>,
    /// Submitter for funding transfers; differs from `submitter` only when
    /// `funding.rpc_url_override` is set
    pub funding_submitter: Arc<NonceSafeSubmitter>,
    pub funding_gate: FundingGate,
    pub funding_policy: FundingPolicy,
}

impl Services {
    pub fn from_config(config: &Config) -> Result<Self> {
        let rpc_url = parse_url("chain.rpc_url", &config.chain.rpc_url)?;
        let chain: Arc<dyn ChainClient> = Arc::new(RpcChainClient::new(
            rpc_url.clone(),
            config.chain.chain_id,
            config.receipt_timeout(),
            config.receipt_poll_interval(),
        ));
        let payments: Arc<dyn PaymentManager> = Arc::new(LedgerContractClient::new(
            config.ledger_contract()?,
            rpc_url,
            config.receipt_timeout(),
        ));

        let funding_chain = match &config.funding.rpc_url_override {
            Some(url) => Some(Arc::new(RpcChainClient::new(
                parse_url("funding.rpc_url_override", url)?,
                config.chain.chain_id,
                config.receipt_timeout(),
                config.receipt_poll_interval(),
            )) as Arc<dyn ChainClient>),
            None => None,
        };

        Ok(Self::from_parts(
            chain,
            funding_chain,
            payments,
            config.retry_policy(),
            config.funding_policy()?,
        ))
    }

    /// Wire already-built clients; `funding_chain` receives funding
    /// transfers when set
    pub fn from_parts(
        chain: Arc<dyn ChainClient>,
        funding_chain: Option<Arc<dyn ChainClient>>,
        payments: Arc<dyn PaymentManager>,
        retry_policy: RetryPolicy,
        funding_policy: FundingPolicy,
    ) -> Self {
        let nonces = Arc::new(NonceAllocator::new(chain.clone()));
        let submitter = Arc::new(NonceSafeSubmitter::new(
            chain.clone(),
            nonces.clone(),
            retry_policy,
        ));

        let funding_submitter = match funding_chain {
            Some(funding_chain) => Arc::new(NonceSafeSubmitter::new(
                funding_chain,
                nonces.clone(),
                retry_policy,
            )),
            None => submitter.clone(),
        };
        let funding_gate = FundingGate::new(chain.clone(), funding_submitter.clone());

        Self {
            chain,
            payments,
            nonces,
            submitter,
            funding_submitter,
            funding_gate,
            funding_policy,
        }
    }

    /// Top `recipient` up from `sponsor` under the configured funding policy
    pub async fn fund_account(
        &self,
        sponsor: &PrivateKeySigner,
        recipient: Address,
    ) -> Result<FundingOutcome> {
        self.funding_gate
            .fund(sponsor, recipient, &self.funding_policy)
            .await
    }

    pub fn engine(&self, config: &Config) -> Result<ReconciliationEngine> {
        Ok(ReconciliationEngine::new(
            self.chain.clone(),
            self.payments.clone(),
            NativeSweeper::new(self.submitter.clone()),
            config.destination()?,
        ))
    }
}

fn parse_url(key: &str, value: &str) -> Result<Url> {
    Url::parse(value).map_err(|e| Error::Config(format!("{key}: {e}")))
}
