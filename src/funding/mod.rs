//! Test account funding
//!
//! # Architecture
//!
//! ```text
//! FundingGate → NonceSafeSubmitter → ChainClient
//!                      ↓
//!               NonceAllocator
//! ```
//!
//! The allocator and submitter are shared with the recovery sweep so every
//! transaction the process sends draws from one nonce cache.

pub mod gate;
pub mod nonce;
pub mod submitter;

pub use gate::{FundingGate, FundingOutcome, FundingPolicy};
pub use nonce::NonceAllocator;
pub use submitter::{NonceSafeSubmitter, RetryPolicy};
