//! Append-only JSON-lines account ledger
//!
//! Every ephemeral account a test run creates is appended here so that its
//! funds can be recovered later. Records are never rewritten or removed.

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use alloy_signer_local::PrivateKeySigner;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

use super::types::{AccountRecord, RunId};

/// Default ledger location, relative to the working directory
pub const DEFAULT_LEDGER_PATH: &str = ".e2e/generated-accounts.jsonl";

/// Result of reading the ledger file
#[derive(Debug, Default)]
pub struct LedgerContents {
    /// Parsed records in file order
    pub records: Vec<AccountRecord>,
    /// Lines that were present but could not be parsed
    pub malformed_lines: usize,
    /// Whether the file existed at all
    pub file_present: bool,
}

impl LedgerContents {
    /// Keep the first record seen for each address
    pub fn dedup_by_address(self) -> Vec<AccountRecord> {
        let mut seen = HashSet::new();
        self.records
            .into_iter()
            .filter(|r| seen.insert(r.address))
            .collect()
    }
}

/// Handle to the ledger file
#[derive(Debug, Clone)]
pub struct AccountLedger {
    path: PathBuf,
}

impl AccountLedger {
    /// Open the ledger at `path`. The file is created on first append.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a single line
    pub fn append(&self, record: &AccountRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| Error::Ledger(format!("create {}: {}", parent.display(), e)))?;
            }
        }

        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| Error::Ledger(format!("open {}: {}", self.path.display(), e)))?;
        file.write_all(line.as_bytes())
            .map_err(|e| Error::Ledger(format!("write {}: {}", self.path.display(), e)))?;

        // Best effort: the file holds private keys
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) =
                std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))
            {
                debug!("Could not restrict ledger permissions: {}", e);
            }
        }

        debug!(address = %record.address, label = %record.label, "appended ledger record");
        Ok(())
    }

    /// Generate a fresh account, record it and return it
    pub fn mint(
        &self,
        label: impl Into<String>,
        run_id: &RunId,
        network: Option<&str>,
    ) -> Result<AccountRecord> {
        let signer = PrivateKeySigner::random();
        let record =
            AccountRecord::from_signer(&signer, label, run_id.clone(), network.map(String::from));
        self.append(&record)?;
        info!("Minted test account {} ({})", record.label, record.address);
        Ok(record)
    }

    /// Read every record. A missing file is an empty ledger; malformed lines are skipped.
    pub fn read(&self) -> Result<LedgerContents> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No ledger at {}", self.path.display());
                return Ok(LedgerContents::default());
            }
            Err(e) => {
                return Err(Error::Ledger(format!(
                    "read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        let mut contents = LedgerContents {
            file_present: true,
            ..Default::default()
        };

        for (idx, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<AccountRecord>(line) {
                Ok(record) => contents.records.push(record),
                Err(e) => {
                    warn!("Skipping malformed ledger line {}: {}", idx + 1, e);
                    contents.malformed_lines += 1;
                }
            }
        }

        Ok(contents)
    }

    /// Unique accounts for `network`, first occurrence wins
    pub fn accounts_for_network(&self, network: &str) -> Result<Vec<AccountRecord>> {
        let mut contents = self.read()?;
        contents.records.retain(|r| r.matches_network(network));
        Ok(contents.dedup_by_address())
    }
}
