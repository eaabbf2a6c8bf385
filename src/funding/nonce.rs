//! Per-sender nonce allocation
//!
//! Hands out nonces that are never below the chain's pending count and never
//! repeat within the process for the same sender, even when several callers
//! allocate before any of their transactions land.

use std::sync::Arc;

use alloy_primitives::Address;
use dashmap::DashMap;
use tracing::debug;

use crate::chain::ChainClient;
use crate::error::Result;

/// Nonce cache reconciled against the chain on every allocation
pub struct NonceAllocator {
    chain: Arc<dyn ChainClient>,
    /// Next nonce to hand out, per sender
    next: DashMap<Address, u64>,
}

impl NonceAllocator {
    /// Create an allocator with an empty cache
    pub fn new(chain: Arc<dyn ChainClient>) -> Self {
        Self {
            chain,
            next: DashMap::new(),
        }
    }

    /// Reserve the next nonce for `sender`
    ///
    /// The remote read is the only await point. The compare-and-bump happens
    /// under the map's entry lock, so concurrent callers for the same sender
    /// always get distinct, increasing values.
    pub async fn allocate(&self, sender: Address) -> Result<u64> {
        let remote = self.chain.get_pending_nonce(sender).await?;

        let nonce = {
            let mut entry = self.next.entry(sender).or_insert(remote);
            let nonce = (*entry).max(remote);
            *entry = nonce + 1;
            nonce
        };

        debug!(%sender, nonce, remote, "allocated nonce");
        Ok(nonce)
    }

    /// Forget the cached value so the next allocation trusts the chain only
    pub fn invalidate(&self, sender: Address) {
        if self.next.remove(&sender).is_some() {
            debug!(%sender, "invalidated cached nonce");
        }
    }

    /// Cached next nonce, if any
    pub fn cached(&self, sender: Address) -> Option<u64> {
        self.next.get(&sender).map(|n| *n)
    }
}
