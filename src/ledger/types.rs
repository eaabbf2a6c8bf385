//! Account ledger record types

use std::fmt;

use alloy_primitives::Address;
use alloy_signer_local::PrivateKeySigner;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Groups the accounts created during one test run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    /// Fresh random run id
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One ephemeral test identity, as written to the ledger file
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AccountRecord {
    pub run_id: RunId,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    /// Human tag, e.g. "alice" or "payer"
    pub label: String,
    pub address: Address,
    /// Hex-encoded private key
    #[serde(alias = "privateKey")]
    pub secret: String,
}

impl AccountRecord {
    /// Build a record for an existing key
    pub fn from_signer(
        signer: &PrivateKeySigner,
        label: impl Into<String>,
        run_id: RunId,
        network: Option<String>,
    ) -> Self {
        Self {
            run_id,
            created_at: Utc::now(),
            network,
            label: label.into(),
            address: signer.address(),
            secret: format!("0x{}", alloy_primitives::hex::encode(signer.to_bytes())),
        }
    }

    /// Parse the stored key and check it still derives `address`
    pub fn signer(&self) -> Result<PrivateKeySigner> {
        let signer: PrivateKeySigner = self
            .secret
            .parse()
            .map_err(|e| Error::InvalidKey(format!("{} ({}): {}", self.label, self.address, e)))?;

        if signer.address() != self.address {
            return Err(Error::InvalidKey(format!(
                "{} key derives {} but record says {}",
                self.label,
                signer.address(),
                self.address
            )));
        }

        Ok(signer)
    }

    /// Whether this record belongs to `network`. Untagged records match any network.
    pub fn matches_network(&self, network: &str) -> bool {
        self.network.as_deref().map_or(true, |n| n == network)
    }
}

// Keep key material out of logs
impl fmt::Debug for AccountRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountRecord")
            .field("run_id", &self.run_id)
            .field("created_at", &self.created_at)
            .field("network", &self.network)
            .field("label", &self.label)
            .field("address", &self.address)
            .field("secret", &"***")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_round_trips_key() {
        let signer = PrivateKeySigner::random();
        let record = AccountRecord::from_signer(&signer, "alice", RunId::new(), None);

        assert_eq!(record.address, signer.address());
        assert_eq!(record.signer().unwrap().address(), signer.address());
        assert!(!format!("{:?}", record).contains(&record.secret));
    }

    #[test]
    fn test_mismatched_address_rejected() {
        let signer = PrivateKeySigner::random();
        let mut record = AccountRecord::from_signer(&signer, "bob", RunId::new(), None);
        record.address = PrivateKeySigner::random().address();

        assert!(matches!(record.signer(), Err(Error::InvalidKey(_))));
    }

    #[test]
    fn test_network_matching() {
        let signer = PrivateKeySigner::random();
        let tagged =
            AccountRecord::from_signer(&signer, "a", RunId::new(), Some("naga-dev".to_string()));
        let untagged = AccountRecord::from_signer(&signer, "b", RunId::new(), None);

        assert!(tagged.matches_network("naga-dev"));
        assert!(!tagged.matches_network("naga-test"));
        assert!(untagged.matches_network("naga-test"));
    }

    #[test]
    fn test_accepts_private_key_alias() {
        let signer = PrivateKeySigner::random();
        let json = format!(
            r#"{{"runId":"r1","createdAt":"2025-01-01T00:00:00Z","label":"x","address":"{}","privateKey":"0x{}"}}"#,
            signer.address(),
            alloy_primitives::hex::encode(signer.to_bytes())
        );

        let record: AccountRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record.run_id, RunId("r1".to_string()));
        assert!(record.network.is_none());
        assert!(record.signer().is_ok());
    }
}
