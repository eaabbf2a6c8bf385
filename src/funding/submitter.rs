//! Nonce-safe transaction submission
//!
//! Retries exactly one failure class: the chain rejecting a transaction
//! because its nonce is already used. Everything else is returned at once.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::TxHash;
use alloy_signer_local::PrivateKeySigner;
use backoff::backoff::Constant;
use backoff::future::retry;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::chain::{ChainClient, TransferRequest};
use crate::error::Result;

use super::nonce::NonceAllocator;

/// Default number of nonce-too-low retries
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default pause before a retry
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Retry policy for [`NonceSafeSubmitter`]
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Sends transfers, re-allocating the nonce when it turns out to be stale
pub struct NonceSafeSubmitter {
    chain: Arc<dyn ChainClient>,
    nonces: Arc<NonceAllocator>,
    policy: RetryPolicy,
}

impl NonceSafeSubmitter {
    pub fn new(chain: Arc<dyn ChainClient>, nonces: Arc<NonceAllocator>, policy: RetryPolicy) -> Self {
        Self {
            chain,
            nonces,
            policy,
        }
    }

    pub fn chain(&self) -> &Arc<dyn ChainClient> {
        &self.chain
    }

    pub fn nonces(&self) -> &Arc<NonceAllocator> {
        &self.nonces
    }

    /// Allocate a nonce for the sender and submit
    pub async fn submit(&self, signer: &PrivateKeySigner, request: TransferRequest) -> Result<TxHash> {
        let nonce = self.nonces.allocate(request.from).await?;
        self.submit_with_retry(signer, request.with_nonce(nonce)).await
    }

    /// Submit `request` with the nonce it already carries
    ///
    /// On "nonce too low" the sender's cache entry is dropped, a fresh nonce
    /// is allocated and patched into the request, and the send is retried
    /// after `delay`, up to `max_retries` times.
    pub async fn submit_with_retry(
        &self,
        signer: &PrivateKeySigner,
        request: TransferRequest,
    ) -> Result<TxHash> {
        let max_retries = self.policy.max_retries;
        let attempt = Mutex::new(Attempt {
            request,
            retries: 0,
        });

        retry(Constant::new(self.policy.delay), || async {
            let mut attempt = attempt.lock().await;

            match self.chain.send_transaction(signer, &attempt.request).await {
                Ok(tx_hash) => {
                    debug!(
                        from = %attempt.request.from,
                        nonce = ?attempt.request.nonce,
                        %tx_hash,
                        "transaction submitted"
                    );
                    Ok(tx_hash)
                }
                Err(e) if e.is_retryable() && attempt.retries < max_retries => {
                    attempt.retries += 1;
                    let from = attempt.request.from;
                    warn!(
                        "Nonce {:?} for {} is stale, retrying ({}/{})",
                        attempt.request.nonce, from, attempt.retries, max_retries
                    );

                    self.nonces.invalidate(from);
                    match self.nonces.allocate(from).await {
                        Ok(nonce) => {
                            attempt.request.nonce = Some(nonce);
                            Err(backoff::Error::transient(e))
                        }
                        Err(alloc) => Err(backoff::Error::permanent(alloc)),
                    }
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        })
        .await
    }
}

/// Request and retry count carried between attempts
struct Attempt {
    request: TransferRequest,
    retries: u32,
}
