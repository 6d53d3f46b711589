// Copyright (c) Meridian Bridge Contributors
// SPDX-License-Identifier: Apache-2.0

//! Mint/release submission on target networks.
//!
//! The executor is the only component that writes to a chain. Before
//! submitting it re-checks the idempotency ledger, so a crash-and-retry of
//! the coordinator cannot double-submit: a claim owned by another transfer
//! aborts, and an already-minted claim short-circuits to the recorded
//! target hash. Transient RPC failures are retried with exponential backoff
//! up to a bounded elapsed time; a chain-level rejection is never retried.

use crate::error::{BridgeError, BridgeResult};
use crate::metrics::BridgeMetrics;
use crate::storage::IdempotencyLedger;
use crate::types::{BridgeTransaction, IdempotencyKey};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Errors from chain-write submissions.
#[derive(Debug, Clone, Error)]
pub enum SubmitError {
    /// Connectivity/RPC failure; the submission may be retried.
    #[error("transient RPC error: {0}")]
    Transient(String),

    /// The chain rejected or reverted the transaction; retrying would not
    /// change the outcome.
    #[error("rejected by chain: {0}")]
    Rejected(String),
}

/// Write access to one network's bridge contract/adapter.
#[async_trait]
pub trait ChainTxClient: Send + Sync + std::fmt::Debug {
    /// Submit the mint/release of `transfer.net_amount` to
    /// `transfer.target_address`. Returns the target transaction hash.
    async fn submit_mint(&self, transfer: &BridgeTransaction) -> Result<String, SubmitError>;

    /// Submit the unlock of `transfer.amount` back to
    /// `transfer.source_address` (operator refund path).
    async fn submit_unlock(&self, transfer: &BridgeTransaction) -> Result<String, SubmitError>;

    fn network(&self) -> &str;
}

/// Backoff applied to transient submission failures. Delay sequence (secs),
/// with jitter: 0.4, 0.8, 1.6, 3.2, 6.4, ... capped at 30.
fn submission_backoff(max_elapsed: Duration) -> backoff::ExponentialBackoff {
    backoff::ExponentialBackoff {
        initial_interval: Duration::from_millis(400),
        randomization_factor: 0.1,
        multiplier: 2.0,
        max_interval: Duration::from_secs(30),
        max_elapsed_time: Some(max_elapsed),
        ..Default::default()
    }
}

pub struct MintReleaseExecutor {
    clients: HashMap<String, Arc<dyn ChainTxClient>>,
    ledger: Arc<dyn IdempotencyLedger>,
    metrics: Arc<BridgeMetrics>,
    max_elapsed: Duration,
}

impl MintReleaseExecutor {
    pub fn new(
        clients: HashMap<String, Arc<dyn ChainTxClient>>,
        ledger: Arc<dyn IdempotencyLedger>,
        metrics: Arc<BridgeMetrics>,
        max_elapsed: Duration,
    ) -> Self {
        Self {
            clients,
            ledger,
            metrics,
            max_elapsed,
        }
    }

    fn client(&self, network: &str) -> BridgeResult<&Arc<dyn ChainTxClient>> {
        self.clients
            .get(network)
            .ok_or_else(|| BridgeError::Internal(format!("no chain client for network {network}")))
    }

    /// Submit the mint/release for a confirmed transfer. Returns the target
    /// transaction hash.
    pub async fn execute(&self, transfer: &BridgeTransaction) -> BridgeResult<String> {
        let source_tx_hash = transfer.source_tx_hash.as_deref().ok_or_else(|| {
            BridgeError::Internal(format!("transfer {} has no source tx hash", transfer.id))
        })?;
        let key = IdempotencyKey::new(transfer.source_network.clone(), source_tx_hash);

        // Crash-and-retry guard: the claim must exist and belong to us.
        match self.ledger.get(&key).await? {
            Some(record) if record.transfer_id != transfer.id => {
                warn!(
                    transfer_id = %transfer.id,
                    owner = %record.transfer_id,
                    "refusing to mint: source event claimed by another transfer"
                );
                return Err(BridgeError::DuplicateClaim {
                    owner: record.transfer_id,
                });
            }
            Some(record) if record.minted => {
                // Already minted on a previous attempt; hand back the hash.
                let hash = record.target_tx_hash.ok_or_else(|| {
                    BridgeError::Storage("minted claim lacks a target tx hash".to_string())
                })?;
                info!(
                    transfer_id = %transfer.id,
                    target_tx_hash = %hash,
                    "mint already submitted; skipping"
                );
                return Ok(hash);
            }
            Some(_) => {}
            None => {
                return Err(BridgeError::Internal(format!(
                    "transfer {} reached minting without an idempotency claim",
                    transfer.id
                )))
            }
        }

        let client = self.client(&transfer.target_network)?.clone();
        let hash = self.submit_with_retry(transfer, || client.submit_mint(transfer)).await?;
        self.metrics.executor_submissions.inc();
        self.ledger.mark_minted(&key, &hash).await?;
        info!(
            transfer_id = %transfer.id,
            target_network = %transfer.target_network,
            target_tx_hash = %hash,
            "mint submitted"
        );
        Ok(hash)
    }

    /// Submit the source-network unlock for an operator refund.
    pub async fn unlock(&self, transfer: &BridgeTransaction) -> BridgeResult<String> {
        let client = self.client(&transfer.source_network)?.clone();
        let hash = self.submit_with_retry(transfer, || client.submit_unlock(transfer)).await?;
        info!(
            transfer_id = %transfer.id,
            source_network = %transfer.source_network,
            unlock_tx_hash = %hash,
            "refund unlock submitted"
        );
        Ok(hash)
    }

    async fn submit_with_retry<F, Fut>(
        &self,
        transfer: &BridgeTransaction,
        submit: F,
    ) -> BridgeResult<String>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<String, SubmitError>>,
    {
        let transfer_id = transfer.id.clone();
        backoff::future::retry(submission_backoff(self.max_elapsed), || {
            let transfer_id = transfer_id.clone();
            let fut = submit();
            async move {
                match fut.await {
                    Ok(hash) => Ok(hash),
                    Err(SubmitError::Transient(e)) => {
                        warn!(transfer_id = %transfer_id, error = %e, "transient submit failure, retrying");
                        Err(backoff::Error::transient(BridgeError::NetworkUnavailable(e)))
                    }
                    Err(SubmitError::Rejected(e)) => {
                        self.metrics.executor_reverts.inc();
                        Err(backoff::Error::permanent(BridgeError::TargetRevert(e)))
                    }
                }
            }
        })
        .await
    }
}

impl std::fmt::Debug for MintReleaseExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MintReleaseExecutor")
            .field("networks", &self.clients.keys().collect::<Vec<_>>())
            .field("max_elapsed", &self.max_elapsed)
            .finish()
    }
}
