// Copyright (c) Meridian Bridge Contributors
// SPDX-License-Identifier: Apache-2.0

use super::{ChainReadError, ObserverReport, SourceChainReader, TargetChainReader, TargetTxStatus};
use crate::storage::TransferStore;
use crate::types::{BridgeTransaction, TransferStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Polls one network on a fixed cadence and reports confirmation depth and
/// mint finality to the coordinator.
///
/// The poll tick is the observer's only blocking point; it never holds a
/// transfer lock, so it cannot stall processing of unrelated transfers.
pub struct LedgerObserver {
    network: String,
    poll_interval: Duration,
    source: Arc<dyn SourceChainReader>,
    target: Arc<dyn TargetChainReader>,
    store: Arc<dyn TransferStore>,
    report_tx: mpsc::Sender<ObserverReport>,
}

impl LedgerObserver {
    pub fn new(
        network: String,
        poll_interval: Duration,
        source: Arc<dyn SourceChainReader>,
        target: Arc<dyn TargetChainReader>,
        store: Arc<dyn TransferStore>,
        report_tx: mpsc::Sender<ObserverReport>,
    ) -> Self {
        Self {
            network,
            poll_interval,
            source,
            target,
            store,
            report_tx,
        }
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                network = %self.network,
                interval_ms = self.poll_interval.as_millis() as u64,
                "LedgerObserver started"
            );
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!(network = %self.network, "LedgerObserver stopped");
                        return;
                    }
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
                if let Err(e) = self.tick().await {
                    warn!(network = %self.network, error = %e, "observer tick failed");
                }
            }
        })
    }

    /// One poll pass over all active transfers touching this network.
    pub async fn tick(&self) -> crate::error::BridgeResult<()> {
        let active = self.store.active().await?;
        for transfer in &active {
            if transfer.source_network == self.network {
                self.poll_source(transfer).await;
            }
            if transfer.target_network == self.network {
                self.poll_target(transfer).await;
            }
        }
        Ok(())
    }

    async fn poll_source(&self, transfer: &BridgeTransaction) {
        if !matches!(
            transfer.status,
            TransferStatus::Locked | TransferStatus::Confirming
        ) {
            return;
        }
        let Some(tx_hash) = transfer.source_tx_hash.as_deref() else {
            return;
        };
        match self.source.lock_confirmations(tx_hash).await {
            Ok(Some(confirmations)) => {
                debug!(
                    transfer_id = %transfer.id,
                    tx_hash,
                    confirmations,
                    "observed lock confirmations"
                );
                self.report(ObserverReport::Confirmations {
                    transfer_id: transfer.id.clone(),
                    confirmations,
                })
                .await;
            }
            Ok(None) => {
                // Never seen yet: the lock tx may still be propagating.
                // Seen before and now gone: the event was reorged out.
                if transfer.confirmations_observed > 0 {
                    warn!(
                        transfer_id = %transfer.id,
                        tx_hash,
                        "lock transaction disappeared from canonical chain"
                    );
                    self.report(ObserverReport::ConfirmationReset {
                        transfer_id: transfer.id.clone(),
                        reason: format!(
                            "lock tx {tx_hash} no longer on canonical {} chain",
                            self.network
                        ),
                    })
                    .await;
                }
            }
            Err(e) => self.log_read_error(transfer, &e),
        }
    }

    async fn poll_target(&self, transfer: &BridgeTransaction) {
        if transfer.status != TransferStatus::Minting {
            return;
        }
        let Some(tx_hash) = transfer.target_tx_hash.as_deref() else {
            return;
        };
        match self.target.mint_status(tx_hash).await {
            Ok(TargetTxStatus::Finalized) => {
                self.report(ObserverReport::MintFinalized {
                    transfer_id: transfer.id.clone(),
                })
                .await;
            }
            Ok(TargetTxStatus::Reverted) => {
                self.report(ObserverReport::MintReverted {
                    transfer_id: transfer.id.clone(),
                    reason: format!("mint tx {tx_hash} reverted on {}", self.network),
                })
                .await;
            }
            Ok(TargetTxStatus::Pending) | Ok(TargetTxStatus::NotFound) => {
                debug!(transfer_id = %transfer.id, tx_hash, "mint not yet final");
            }
            Err(e) => self.log_read_error(transfer, &e),
        }
    }

    fn log_read_error(&self, transfer: &BridgeTransaction, e: &ChainReadError) {
        // Transient from the observer's perspective; next tick retries.
        warn!(
            network = %self.network,
            transfer_id = %transfer.id,
            error = %e,
            "chain read failed, will retry on next poll"
        );
    }

    async fn report(&self, report: ObserverReport) {
        if self.report_tx.send(report).await.is_err() {
            warn!(network = %self.network, "coordinator report channel closed");
        }
    }
}
