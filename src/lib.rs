//! Money-back: test-fund lifecycle tooling
//!
//! Funds ephemeral end-to-end test accounts from a sponsor without nonce
//! races, and later recovers everything they hold: custodial ledger balances
//! through the ledger's delayed withdrawal, then the native balance through a
//! final sweep to one destination.

pub mod chain;
pub mod cli;
pub mod config;
pub mod error;
pub mod funding;
pub mod ledger;
pub mod payment;
pub mod recovery;
pub mod services;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
pub use services::Services;
