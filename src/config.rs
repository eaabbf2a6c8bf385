//! Configuration loading and validation

use std::path::Path;
use std::time::Duration;

use alloy_primitives::Address;
use alloy_signer_local::PrivateKeySigner;
use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::Error;
use crate::funding::{FundingPolicy, RetryPolicy};
use crate::ledger::DEFAULT_LEDGER_PATH;
use crate::recovery::{StateWriteMode, DEFAULT_STATE_PATH};

/// Networks the tooling knows how to recover from
pub const KNOWN_NETWORKS: &[&str] = &[
    "naga-dev",
    "naga-test",
    "naga-staging",
    "naga-proto",
    "naga",
    "naga-local",
];

/// Prefix for environment overrides, e.g. `MONEY_BACK_CHAIN__RPC_URL`
pub const ENV_PREFIX: &str = "MONEY_BACK";

/// Default config file name
pub const DEFAULT_CONFIG_PATH: &str = "money-back.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Target network name, one of [`KNOWN_NETWORKS`]
    #[serde(default)]
    pub network: String,
    /// Hex key of the funded master account
    #[serde(default)]
    pub master_private_key: String,
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub payment: PaymentConfig,
    #[serde(default)]
    pub funding: FundingConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    #[serde(default)]
    pub rpc_url: String,
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    #[serde(default = "default_receipt_timeout_secs")]
    pub receipt_timeout_secs: u64,
    #[serde(default = "default_receipt_poll_interval_ms")]
    pub receipt_poll_interval_ms: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: String::new(),
            chain_id: default_chain_id(),
            receipt_timeout_secs: default_receipt_timeout_secs(),
            receipt_poll_interval_ms: default_receipt_poll_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentConfig {
    /// Address of the payment ledger contract
    #[serde(default)]
    pub ledger_contract: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FundingConfig {
    /// Send funding transfers through this endpoint instead of `chain.rpc_url`
    #[serde(default)]
    pub rpc_url_override: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Fund only at or below this balance
    #[serde(default = "default_if_less_than")]
    pub if_less_than: String,
    #[serde(default = "default_then_fund")]
    pub then_fund: String,
}

impl Default for FundingConfig {
    fn default() -> Self {
        Self {
            rpc_url_override: None,
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            if_less_than: default_if_less_than(),
            then_fund: default_then_fund(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_accounts_path")]
    pub accounts_path: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            accounts_path: default_accounts_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecoveryConfig {
    #[serde(default = "default_state_path")]
    pub state_path: String,
    /// Sweep destination; the master account when unset
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub state_write_mode: StateWriteMode,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
            destination: None,
            state_write_mode: StateWriteMode::default(),
        }
    }
}

fn default_chain_id() -> u64 {
    175188
}

fn default_receipt_timeout_secs() -> u64 {
    120
}

fn default_receipt_poll_interval_ms() -> u64 {
    1000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    100
}

fn default_if_less_than() -> String {
    "0.0001".to_string()
}

fn default_then_fund() -> String {
    "0.01".to_string()
}

fn default_accounts_path() -> String {
    DEFAULT_LEDGER_PATH.to_string()
}

fn default_state_path() -> String {
    DEFAULT_STATE_PATH.to_string()
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Start with defaults
            .set_default("chain.chain_id", default_chain_id() as i64)?
            .set_default("chain.receipt_timeout_secs", default_receipt_timeout_secs() as i64)?
            .set_default(
                "chain.receipt_poll_interval_ms",
                default_receipt_poll_interval_ms() as i64,
            )?
            .set_default("funding.max_retries", default_max_retries() as i64)?
            .set_default("funding.retry_delay_ms", default_retry_delay_ms() as i64)?
            .set_default("ledger.accounts_path", default_accounts_path())?
            .set_default("recovery.state_path", default_state_path())?
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix MONEY_BACK_)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    ///
    /// Everything here is checked before any remote call is made.
    pub fn validate(&self) -> Result<()> {
        if self.network.is_empty() {
            return Err(Error::MissingEnvVar(format!("{ENV_PREFIX}_NETWORK")).into());
        }
        if !KNOWN_NETWORKS.contains(&self.network.as_str()) {
            return Err(Error::InvalidNetwork {
                name: self.network.clone(),
                known: KNOWN_NETWORKS.join(", "),
            }
            .into());
        }

        if self.master_private_key.is_empty() {
            return Err(Error::MissingEnvVar(format!("{ENV_PREFIX}_MASTER_PRIVATE_KEY")).into());
        }
        self.master_signer()?;

        if self.chain.rpc_url.is_empty() {
            return Err(Error::MissingEnvVar(format!("{ENV_PREFIX}_CHAIN__RPC_URL")).into());
        }
        url::Url::parse(&self.chain.rpc_url)
            .with_context(|| format!("Invalid chain.rpc_url: {}", mask_url(&self.chain.rpc_url)))?;

        if let Some(override_url) = &self.funding.rpc_url_override {
            url::Url::parse(override_url).with_context(|| {
                format!("Invalid funding.rpc_url_override: {}", mask_url(override_url))
            })?;
        }

        if self.payment.ledger_contract.is_empty() {
            return Err(Error::MissingEnvVar(format!("{ENV_PREFIX}_PAYMENT__LEDGER_CONTRACT")).into());
        }
        self.ledger_contract()?;

        if self.recovery.destination.is_some() {
            self.destination()?;
        }

        if self.funding.max_retries == 0 {
            anyhow::bail!("funding.max_retries must be at least 1");
        }
        self.funding_policy()?;

        if self.chain.receipt_timeout_secs == 0 {
            anyhow::bail!("chain.receipt_timeout_secs must be positive");
        }

        Ok(())
    }

    /// Signer for the master account
    pub fn master_signer(&self) -> crate::error::Result<PrivateKeySigner> {
        self.master_private_key
            .trim()
            .parse::<PrivateKeySigner>()
            .map_err(|e| Error::InvalidKey(format!("master_private_key: {e}")))
    }

    pub fn ledger_contract(&self) -> crate::error::Result<Address> {
        parse_address("payment.ledger_contract", &self.payment.ledger_contract)
    }

    /// Where swept funds go: the configured override or the master account
    pub fn destination(&self) -> crate::error::Result<Address> {
        match &self.recovery.destination {
            Some(destination) => parse_address("recovery.destination", destination),
            None => Ok(self.master_signer()?.address()),
        }
    }

    /// Endpoint funding transfers are sent through
    pub fn funding_rpc_url(&self) -> &str {
        self.funding
            .rpc_url_override
            .as_deref()
            .unwrap_or(&self.chain.rpc_url)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.funding.max_retries,
            delay: Duration::from_millis(self.funding.retry_delay_ms),
        }
    }

    pub fn funding_policy(&self) -> crate::error::Result<FundingPolicy> {
        FundingPolicy::from_decimal(&self.funding.if_less_than, &self.funding.then_fund)
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.chain.receipt_timeout_secs)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.chain.receipt_poll_interval_ms)
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        format!(
            r#"Configuration:
  network: {}
  master_private_key: {}
  Chain:
    rpc_url: {}
    chain_id: {}
    receipt_timeout: {}s
  Payment:
    ledger_contract: {}
  Funding:
    rpc_url_override: {}
    max_retries: {}
    retry_delay: {}ms
  Ledger:
    accounts_path: {}
  Recovery:
    state_path: {}
    destination: {}
    state_write_mode: {:?}
"#,
            self.network,
            if self.master_private_key.is_empty() {
                "(not set)"
            } else {
                "***"
            },
            mask_url(&self.chain.rpc_url),
            self.chain.chain_id,
            self.chain.receipt_timeout_secs,
            self.payment.ledger_contract,
            self.funding
                .rpc_url_override
                .as_deref()
                .map(mask_url)
                .unwrap_or_else(|| "(not set)".to_string()),
            self.funding.max_retries,
            self.funding.retry_delay_ms,
            self.ledger.accounts_path,
            self.recovery.state_path,
            self.recovery
                .destination
                .as_deref()
                .unwrap_or("(master account)"),
            self.recovery.state_write_mode,
        )
    }
}

fn parse_address(key: &str, value: &str) -> crate::error::Result<Address> {
    value
        .trim()
        .parse::<Address>()
        .map_err(|e| Error::Config(format!("{key}: invalid address '{value}': {e}")))
}

/// Mask URL for display (hide API keys in query params)
fn mask_url(url: &str) -> String {
    if let Some(idx) = url.find('?') {
        format!("{}?***", &url[..idx])
    } else {
        url.to_string()
    }
}
