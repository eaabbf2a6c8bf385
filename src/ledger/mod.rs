//! Generated account ledger
//!
//! Append-only record of every ephemeral account minted by test helpers.

pub mod store;
pub mod types;

pub use store::{AccountLedger, LedgerContents, DEFAULT_LEDGER_PATH};
pub use types::{AccountRecord, RunId};
