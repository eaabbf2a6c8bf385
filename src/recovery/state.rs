//! Withdrawal state carried between recovery runs
//!
//! The remote ledger is always authoritative. This file only tells the next
//! run (and the operator) which accounts were still waiting on a withdrawal.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Default state location, relative to the working directory
pub const DEFAULT_STATE_PATH: &str = ".e2e/withdrawal-state.json";

/// Current schema version
pub const STATE_VERSION: u32 = 1;

/// One account's in-flight withdrawal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingWithdrawal {
    pub address: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Decimal native-currency amount
    #[serde(rename = "amountEth", alias = "amount")]
    pub amount: String,
    pub requested_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_remaining_seconds: Option<u64>,
    pub last_checked_at: DateTime<Utc>,
}

/// The persisted recovery checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalState {
    pub version: u32,
    pub updated_at: DateTime<Utc>,
    pub network: String,
    pub destination: Address,
    pub pending: Vec<PendingWithdrawal>,
}

/// How a run's findings are written over the previous state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateWriteMode {
    /// The file holds exactly this run's pending set
    #[default]
    Replace,
    /// Entries for accounts this run could not examine are carried forward
    Merge,
}

/// Outcome of reading the state file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateLoad {
    Missing,
    Loaded(WithdrawalState),
    /// The file exists but could not be parsed
    Corrupt(String),
}

impl StateLoad {
    pub fn state(&self) -> Option<&WithdrawalState> {
        match self {
            StateLoad::Loaded(state) => Some(state),
            _ => None,
        }
    }
}

impl WithdrawalState {
    /// Build the document to persist at the end of a run
    ///
    /// `examined` holds the accounts whose remote status this run actually
    /// observed. In [`StateWriteMode::Merge`] previous entries for any other
    /// account on the same network survive.
    pub fn next(
        previous: Option<&WithdrawalState>,
        findings: Vec<PendingWithdrawal>,
        examined: &HashSet<Address>,
        mode: StateWriteMode,
        network: &str,
        destination: Address,
        now: DateTime<Utc>,
    ) -> Self {
        let mut pending = findings;

        if mode == StateWriteMode::Merge {
            if let Some(previous) = previous.filter(|p| p.network == network) {
                let present: HashSet<Address> = pending.iter().map(|p| p.address).collect();
                let carried: Vec<PendingWithdrawal> = previous
                    .pending
                    .iter()
                    .filter(|p| !examined.contains(&p.address) && !present.contains(&p.address))
                    .cloned()
                    .collect();
                if !carried.is_empty() {
                    debug!("Carrying forward {} unexamined pending withdrawals", carried.len());
                }
                pending.extend(carried);
            }
        }

        Self {
            version: STATE_VERSION,
            updated_at: now,
            network: network.to_string(),
            destination,
            pending,
        }
    }
}

/// Reads and writes the state file
#[derive(Debug, Clone)]
pub struct WithdrawalStateStore {
    path: PathBuf,
}

impl WithdrawalStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the state. Missing and corrupt files are reported, not raised.
    pub async fn load(&self) -> Result<StateLoad> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(StateLoad::Missing),
            Err(e) => {
                return Err(Error::State(format!(
                    "read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        match serde_json::from_str::<WithdrawalState>(&data) {
            Ok(state) => {
                debug!(
                    "Loaded withdrawal state with {} pending from {}",
                    state.pending.len(),
                    self.path.display()
                );
                Ok(StateLoad::Loaded(state))
            }
            Err(e) => {
                warn!("Ignoring unreadable withdrawal state {}: {}", self.path.display(), e);
                Ok(StateLoad::Corrupt(e.to_string()))
            }
        }
    }

    /// Overwrite the state file
    pub async fn save(&self, state: &WithdrawalState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| Error::State(format!("create {}: {}", parent.display(), e)))?;
            }
        }

        let data = serde_json::to_string_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data)
            .await
            .map_err(|e| Error::State(format!("write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| Error::State(format!("rename to {}: {}", self.path.display(), e)))?;

        info!(
            "Saved withdrawal state ({} pending) to {}",
            state.pending.len(),
            self.path.display()
        );
        Ok(())
    }
}
