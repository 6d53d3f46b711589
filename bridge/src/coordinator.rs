// Copyright (c) Meridian Bridge Contributors
// SPDX-License-Identifier: Apache-2.0

//! The transfer coordinator: sole owner of transfer state.
//!
//! Every status mutation goes through this module, under a per-transfer
//! lock, and is written to the store before it is acknowledged anywhere
//! (write-ahead). Observers feed facts in over an mpsc channel; the REST
//! surface calls the operator entry points directly. Transfers for
//! different ids proceed concurrently.

use crate::error::{BridgeError, BridgeResult};
use crate::events::{BridgeNotification, EventBus};
use crate::executor::MintReleaseExecutor;
use crate::fee::compute_fee;
use crate::metrics::BridgeMetrics;
use crate::observer::ObserverReport;
use crate::registry::NetworkRegistry;
use crate::storage::{IdempotencyLedger, TransferStore};
use crate::types::{
    BridgeTransaction, ClaimOutcome, FailureReason, IdempotencyKey, TransferId, TransferStatus,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// An incoming transfer request, as accepted over the REST surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TransferRequest {
    pub source_network: String,
    pub target_network: String,
    pub source_address: String,
    pub target_address: String,
    /// Asset symbol as registered on the source network.
    pub token: String,
    /// Amount in the source asset's minimum unit. The fee is deducted from
    /// it on the target side.
    pub amount: u64,
}

pub struct TransferCoordinator {
    registry: Arc<NetworkRegistry>,
    store: Arc<dyn TransferStore>,
    ledger: Arc<dyn IdempotencyLedger>,
    executor: Arc<MintReleaseExecutor>,
    events: EventBus,
    metrics: Arc<BridgeMetrics>,
    /// Per-transfer serialization. Reports and operator calls for the same
    /// id take this lock; distinct ids never contend.
    locks: Mutex<HashMap<TransferId, Arc<tokio::sync::Mutex<()>>>>,
}

impl TransferCoordinator {
    pub fn new(
        registry: Arc<NetworkRegistry>,
        store: Arc<dyn TransferStore>,
        ledger: Arc<dyn IdempotencyLedger>,
        executor: Arc<MintReleaseExecutor>,
        events: EventBus,
        metrics: Arc<BridgeMetrics>,
    ) -> Self {
        Self {
            registry,
            store,
            ledger,
            executor,
            events,
            metrics,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    async fn lock_for(&self, id: &TransferId) -> OwnedMutexGuard<()> {
        let entry = self
            .locks
            .lock()
            .expect("transfer lock table poisoned")
            .entry(id.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        entry.lock_owned().await
    }

    /// Drop a terminal transfer's lock entry so the table does not grow
    /// forever. A caller racing this gets a fresh entry, which is harmless:
    /// every operation rejects terminal states after loading the record.
    fn drop_lock(&self, id: &TransferId) {
        self.locks
            .lock()
            .expect("transfer lock table poisoned")
            .remove(id);
    }

    /// Validate a request, snapshot fee and confirmation parameters from the
    /// registry, and persist the new transfer in INITIATED.
    pub async fn initiate(&self, request: TransferRequest) -> BridgeResult<BridgeTransaction> {
        if request.source_network == request.target_network {
            return Err(BridgeError::Validation(
                "source and target network must differ".to_string(),
            ));
        }
        let source = self.registry.get(&request.source_network).ok_or_else(|| {
            BridgeError::Validation(format!("unknown network {:?}", request.source_network))
        })?;
        let target = self.registry.get(&request.target_network).ok_or_else(|| {
            BridgeError::Validation(format!("unknown network {:?}", request.target_network))
        })?;
        if !source.address_scheme.is_valid(&request.source_address) {
            return Err(BridgeError::Validation(format!(
                "source address is not valid for network {}",
                source.name
            )));
        }
        if !target.address_scheme.is_valid(&request.target_address) {
            return Err(BridgeError::Validation(format!(
                "target address is not valid for network {}",
                target.name
            )));
        }
        if request.token != source.asset_symbol {
            return Err(BridgeError::Validation(format!(
                "token {:?} is not the asset of network {} (expected {:?})",
                request.token, source.name, source.asset_symbol
            )));
        }
        if request.amount < source.min_transfer_amount
            || request.amount > source.max_transfer_amount
        {
            return Err(BridgeError::Validation(format!(
                "amount {} outside [{}, {}] for network {}",
                request.amount, source.min_transfer_amount, source.max_transfer_amount, source.name
            )));
        }

        let breakdown = compute_fee(source.fee_rate_micros, request.amount)?;
        let transfer = BridgeTransaction::new(
            request.source_network,
            request.target_network,
            request.source_address,
            request.target_address,
            request.token,
            request.amount,
            breakdown.fee_amount,
            source.fee_rate_micros,
            source.min_confirmations,
        );
        self.store.put(&transfer).await?;
        self.metrics.transfers_initiated.inc();
        self.metrics.transfers_in_flight.inc();
        self.events.publish_transition(&transfer);
        info!(
            transfer_id = %transfer.id,
            source = %transfer.source_network,
            target = %transfer.target_network,
            amount = transfer.amount,
            fee = transfer.fee_amount,
            "transfer initiated"
        );
        Ok(transfer)
    }

    /// Record the source-chain lock transaction for a transfer, claiming the
    /// (network, tx hash) pair in the idempotency ledger. Exactly one
    /// transfer can ever own a given lock event.
    pub async fn record_lock(
        &self,
        id: &TransferId,
        source_tx_hash: &str,
    ) -> BridgeResult<BridgeTransaction> {
        let _guard = self.lock_for(id).await;
        let mut transfer = self.load(id).await?;

        // Crash-and-retry: re-recording the same hash is a no-op.
        if transfer.status == TransferStatus::Locked
            && transfer.source_tx_hash.as_deref() == Some(source_tx_hash)
        {
            return Ok(transfer);
        }
        if transfer.status != TransferStatus::Initiated {
            return Err(BridgeError::InvalidState {
                transfer_id: id.clone(),
                state: transfer.status.to_string(),
                operation: "record_lock",
            });
        }

        let key = IdempotencyKey::new(transfer.source_network.clone(), source_tx_hash);
        match self.ledger.claim(&key, id).await? {
            ClaimOutcome::Accepted => {}
            ClaimOutcome::AlreadyClaimedBy(owner) => {
                self.metrics.duplicate_claims.inc();
                warn!(
                    transfer_id = %id,
                    owner = %owner,
                    source_tx_hash,
                    "lock event already claimed; failing transfer"
                );
                self.fail_transfer(&mut transfer, FailureReason::DuplicateClaim, false)
                    .await?;
                return Err(BridgeError::DuplicateClaim { owner });
            }
        }

        transfer.source_tx_hash = Some(source_tx_hash.to_string());
        transfer.transition(TransferStatus::Locked, "record_lock")?;
        self.store.put(&transfer).await?;
        self.events.publish_transition(&transfer);
        info!(transfer_id = %id, source_tx_hash, "lock recorded");
        Ok(transfer)
    }

    /// Dispatch one observer report.
    pub async fn handle_report(&self, report: ObserverReport) -> BridgeResult<()> {
        match report {
            ObserverReport::Confirmations {
                transfer_id,
                confirmations,
            } => self.on_confirmations(&transfer_id, confirmations).await,
            ObserverReport::ConfirmationReset {
                transfer_id,
                reason,
            } => self.on_confirmation_reset(&transfer_id, &reason).await,
            ObserverReport::MintFinalized { transfer_id } => {
                self.on_mint_finalized(&transfer_id).await
            }
            ObserverReport::MintReverted {
                transfer_id,
                reason,
            } => self.on_mint_reverted(&transfer_id, &reason).await,
        }
    }

    /// Drain observer reports until the channel closes or shutdown.
    ///
    /// Each report is dispatched on its own task: report handling can block
    /// on the executor's retry loop, and a stalled transfer must not hold up
    /// reports for unrelated transfers. The per-transfer lock table keeps
    /// same-id reports serialized, and the stale-count discard makes their
    /// arrival order irrelevant.
    pub async fn run(
        self: Arc<Self>,
        mut reports: mpsc::Receiver<ObserverReport>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                maybe = reports.recv() => match maybe {
                    Some(report) => {
                        let coordinator = self.clone();
                        tokio::spawn(async move {
                            if let Err(e) = coordinator.handle_report(report).await {
                                warn!(error = %e, "observer report handling failed");
                            }
                        });
                    }
                    None => break,
                },
            }
        }
        info!("coordinator report loop stopped");
    }

    async fn on_confirmations(&self, id: &TransferId, confirmations: u64) -> BridgeResult<()> {
        let _guard = self.lock_for(id).await;
        let mut transfer = self.load(id).await?;
        if !matches!(
            transfer.status,
            TransferStatus::Locked | TransferStatus::Confirming
        ) {
            debug!(transfer_id = %id, status = %transfer.status, "confirmation report ignored");
            return Ok(());
        }
        // Confirmations are monotone; a report lower than what we have seen
        // is from a lagging node and is discarded.
        if confirmations < transfer.confirmations_observed {
            debug!(
                transfer_id = %id,
                reported = confirmations,
                observed = transfer.confirmations_observed,
                "stale confirmation report discarded"
            );
            return Ok(());
        }
        // An equal count is only a no-op below the threshold. At or above
        // it the transfer may be stuck in CONFIRMING from a crash between
        // the count persist and the CONFIRMED persist, and must advance.
        if transfer.status == TransferStatus::Confirming
            && confirmations == transfer.confirmations_observed
            && confirmations < transfer.required_confirmations
        {
            return Ok(());
        }

        transfer.confirmations_observed = confirmations;
        if transfer.status == TransferStatus::Locked {
            transfer.transition(TransferStatus::Confirming, "confirmation")?;
        }
        self.store.put(&transfer).await?;
        self.metrics.confirmation_updates.inc();
        self.events.publish(BridgeNotification::Confirmation {
            transfer_id: id.clone(),
            confirmations_observed: confirmations,
            required_confirmations: transfer.required_confirmations,
        });

        if confirmations >= transfer.required_confirmations {
            transfer.transition(TransferStatus::Confirmed, "confirmation")?;
            self.store.put(&transfer).await?;
            self.events.publish_transition(&transfer);
            info!(
                transfer_id = %id,
                confirmations,
                required = transfer.required_confirmations,
                "lock confirmed"
            );
            self.start_mint(&mut transfer).await?;
        }
        Ok(())
    }

    async fn on_confirmation_reset(&self, id: &TransferId, reason: &str) -> BridgeResult<()> {
        let _guard = self.lock_for(id).await;
        let mut transfer = self.load(id).await?;
        if !matches!(
            transfer.status,
            TransferStatus::Locked | TransferStatus::Confirming
        ) {
            debug!(transfer_id = %id, status = %transfer.status, "reset report ignored");
            return Ok(());
        }
        self.metrics.confirmation_resets.inc();
        warn!(transfer_id = %id, reason, "lock event disappeared; failing transfer");
        self.fail_transfer(&mut transfer, FailureReason::ConfirmationReset, false)
            .await
    }

    /// Move a confirmed transfer through MINTING. The executor's idempotency
    /// re-check makes this safe to re-drive after a crash.
    async fn start_mint(&self, transfer: &mut BridgeTransaction) -> BridgeResult<()> {
        if transfer.status == TransferStatus::Confirmed {
            transfer.transition(TransferStatus::Minting, "mint")?;
            self.store.put(transfer).await?;
            self.events.publish_transition(transfer);
        }
        match self.executor.execute(transfer).await {
            Ok(target_tx_hash) => {
                transfer.target_tx_hash = Some(target_tx_hash);
                self.store.put(transfer).await?;
                Ok(())
            }
            Err(e) => {
                let reason = match &e {
                    BridgeError::TargetRevert(_) => FailureReason::TargetRevert,
                    BridgeError::DuplicateClaim { .. } => FailureReason::DuplicateClaim,
                    BridgeError::NetworkUnavailable(_) => FailureReason::NetworkUnavailable,
                    // Unexpected failures leave the transfer in MINTING for
                    // the next recovery pass to re-drive.
                    _ => return Err(e),
                };
                warn!(transfer_id = %transfer.id, error = %e, "mint submission failed");
                // Funds are locked on the source with nothing credited on
                // the target; an operator has to reconcile.
                self.fail_transfer(transfer, reason, true).await
            }
        }
    }

    async fn on_mint_finalized(&self, id: &TransferId) -> BridgeResult<()> {
        let _guard = self.lock_for(id).await;
        let mut transfer = self.load(id).await?;
        if transfer.status != TransferStatus::Minting {
            debug!(transfer_id = %id, status = %transfer.status, "finality report ignored");
            return Ok(());
        }
        transfer.transition(TransferStatus::Completed, "mint_finalized")?;
        self.store.put(&transfer).await?;
        self.metrics.transfers_completed.inc();
        self.metrics.transfers_in_flight.dec();
        self.events.publish_transition(&transfer);
        self.drop_lock(id);
        info!(transfer_id = %id, "transfer completed");
        Ok(())
    }

    async fn on_mint_reverted(&self, id: &TransferId, reason: &str) -> BridgeResult<()> {
        let _guard = self.lock_for(id).await;
        let mut transfer = self.load(id).await?;
        if transfer.status != TransferStatus::Minting {
            debug!(transfer_id = %id, status = %transfer.status, "revert report ignored");
            return Ok(());
        }
        self.metrics.executor_reverts.inc();
        warn!(transfer_id = %id, reason, "mint reverted on target chain");
        self.fail_transfer(&mut transfer, FailureReason::TargetRevert, true)
            .await
    }

    /// Operator cancellation. Only INITIATED transfers can be cancelled; once
    /// funds are locked the refund path applies instead.
    pub async fn cancel(&self, id: &TransferId) -> BridgeResult<BridgeTransaction> {
        let _guard = self.lock_for(id).await;
        let mut transfer = self.load(id).await?;
        if transfer.status != TransferStatus::Initiated {
            return Err(BridgeError::InvalidState {
                transfer_id: id.clone(),
                state: transfer.status.to_string(),
                operation: "cancel",
            });
        }
        self.fail_transfer(&mut transfer, FailureReason::Cancelled, false)
            .await?;
        Ok(transfer)
    }

    /// Operator refund: unlock the source funds and mark the transfer
    /// REFUNDED. Permitted only while nothing has been submitted on the
    /// target network.
    pub async fn refund(&self, id: &TransferId) -> BridgeResult<BridgeTransaction> {
        let _guard = self.lock_for(id).await;
        let mut transfer = self.load(id).await?;
        if !transfer.status.is_refundable() {
            return Err(BridgeError::InvalidState {
                transfer_id: id.clone(),
                state: transfer.status.to_string(),
                operation: "refund",
            });
        }
        match self.executor.unlock(&transfer).await {
            Ok(unlock_tx_hash) => {
                transfer.transition(TransferStatus::Refunded, "refund")?;
                transfer.failure_reason = Some(FailureReason::OperatorRefund);
                self.store.put(&transfer).await?;
                self.metrics.transfers_refunded.inc();
                self.metrics.transfers_in_flight.dec();
                self.events.publish_transition(&transfer);
                self.drop_lock(id);
                info!(transfer_id = %id, unlock_tx_hash, "transfer refunded");
                Ok(transfer)
            }
            Err(e) => {
                warn!(transfer_id = %id, error = %e, "refund unlock failed");
                // The unlock did not go through, so the source funds stay
                // locked and an operator must reconcile.
                self.fail_transfer(&mut transfer, FailureReason::RefundUnlockFailed, true)
                    .await?;
                Err(e)
            }
        }
    }

    pub async fn get_transfer(&self, id: &TransferId) -> BridgeResult<BridgeTransaction> {
        self.load(id).await
    }

    pub async fn active_transfers(&self) -> BridgeResult<Vec<BridgeTransaction>> {
        self.store.active().await
    }

    /// Restart recovery: restore the in-flight gauge and re-drive transfers
    /// that crashed between reaching the confirmation threshold and a
    /// recorded target hash.
    pub async fn recover(&self) -> BridgeResult<()> {
        for mut transfer in self.store.active().await? {
            self.metrics.transfers_in_flight.inc();
            match transfer.status {
                TransferStatus::Confirming
                    if transfer.confirmations_observed >= transfer.required_confirmations =>
                {
                    info!(transfer_id = %transfer.id, "recovery: completing confirmed threshold");
                    let _guard = self.lock_for(&transfer.id).await;
                    transfer.transition(TransferStatus::Confirmed, "confirmation")?;
                    self.store.put(&transfer).await?;
                    self.events.publish_transition(&transfer);
                    self.start_mint(&mut transfer).await?;
                }
                TransferStatus::Confirmed => {
                    info!(transfer_id = %transfer.id, "recovery: resuming confirmed transfer");
                    let _guard = self.lock_for(&transfer.id).await;
                    self.start_mint(&mut transfer).await?;
                }
                TransferStatus::Minting if transfer.target_tx_hash.is_none() => {
                    info!(transfer_id = %transfer.id, "recovery: re-driving mint submission");
                    let _guard = self.lock_for(&transfer.id).await;
                    self.start_mint(&mut transfer).await?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    async fn load(&self, id: &TransferId) -> BridgeResult<BridgeTransaction> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| BridgeError::TransferNotFound(id.clone()))
    }

    async fn fail_transfer(
        &self,
        transfer: &mut BridgeTransaction,
        reason: FailureReason,
        needs_reconciliation: bool,
    ) -> BridgeResult<()> {
        transfer.fail(reason, needs_reconciliation)?;
        self.store.put(transfer).await?;
        self.metrics
            .transfers_failed
            .with_label_values(&[reason.as_str()])
            .inc();
        self.metrics.transfers_in_flight.dec();
        self.events.publish_transition(transfer);
        self.drop_lock(&transfer.id);
        Ok(())
    }

    #[cfg(test)]
    fn lock_table_len(&self) -> usize {
        self.locks.lock().expect("transfer lock table poisoned").len()
    }
}

impl std::fmt::Debug for TransferCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferCoordinator")
            .field("networks", &self.registry.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{ChainTxClient, SubmitError};
    use crate::storage::SledStore;
    use crate::test_utils::{test_registry, MockChainClient};
    use std::time::Duration;

    struct Harness {
        coordinator: Arc<TransferCoordinator>,
        store: Arc<SledStore>,
        xrpl_client: MockChainClient,
        evm_client: MockChainClient,
    }

    fn harness() -> Harness {
        let store = Arc::new(SledStore::open_temporary().unwrap());
        let xrpl_client = MockChainClient::new("xrpl");
        let evm_client = MockChainClient::new("evm-side");
        let mut clients: HashMap<String, Arc<dyn ChainTxClient>> = HashMap::new();
        clients.insert("xrpl".to_string(), Arc::new(xrpl_client.clone()));
        clients.insert("evm-side".to_string(), Arc::new(evm_client.clone()));
        let metrics = Arc::new(BridgeMetrics::new_for_testing());
        let executor = Arc::new(MintReleaseExecutor::new(
            clients,
            store.clone(),
            metrics.clone(),
            Duration::from_secs(5),
        ));
        let coordinator = Arc::new(TransferCoordinator::new(
            Arc::new(test_registry()),
            store.clone(),
            store.clone(),
            executor,
            EventBus::default(),
            metrics,
        ));
        Harness {
            coordinator,
            store,
            xrpl_client,
            evm_client,
        }
    }

    fn request(amount: u64) -> TransferRequest {
        TransferRequest {
            source_network: "xrpl".to_string(),
            target_network: "evm-side".to_string(),
            source_address: "rSender111111111111111111".to_string(),
            target_address: "0x00112233445566778899aabbccddeeff00112233".to_string(),
            token: "XRP".to_string(),
            amount,
        }
    }

    #[tokio::test]
    async fn test_initiate_snapshots_fee_and_confirmations() {
        let h = harness();
        let transfer = h.coordinator.initiate(request(1_000)).await.unwrap();
        assert_eq!(transfer.status, TransferStatus::Initiated);
        assert_eq!(transfer.fee_amount, 1);
        assert_eq!(transfer.net_amount, 999);
        assert_eq!(transfer.fee_rate_micros, 1_000);
        assert_eq!(transfer.required_confirmations, 3);
        assert!(h.coordinator.get_transfer(&transfer.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_initiate_rejects_bad_requests() {
        let h = harness();

        let mut same = request(1_000);
        same.target_network = "xrpl".to_string();
        assert_eq!(
            h.coordinator.initiate(same).await.unwrap_err().error_type(),
            "validation"
        );

        let mut unknown = request(1_000);
        unknown.source_network = "solana".to_string();
        assert_eq!(
            h.coordinator
                .initiate(unknown)
                .await
                .unwrap_err()
                .error_type(),
            "validation"
        );

        let mut wrong_token = request(1_000);
        wrong_token.token = "wXRP".to_string();
        assert_eq!(
            h.coordinator
                .initiate(wrong_token)
                .await
                .unwrap_err()
                .error_type(),
            "validation"
        );

        let mut bad_addr = request(1_000);
        bad_addr.target_address = "not-an-evm-address".to_string();
        assert_eq!(
            h.coordinator
                .initiate(bad_addr)
                .await
                .unwrap_err()
                .error_type(),
            "validation"
        );

        assert_eq!(
            h.coordinator
                .initiate(request(5))
                .await
                .unwrap_err()
                .error_type(),
            "validation"
        );
    }

    #[tokio::test]
    async fn test_happy_path_to_completed() {
        let h = harness();
        h.evm_client.set_mint_result(Ok("0xmint".to_string()));
        let transfer = h.coordinator.initiate(request(1_000)).await.unwrap();

        h.coordinator
            .record_lock(&transfer.id, "LOCK1")
            .await
            .unwrap();
        for n in 1..=3 {
            h.coordinator
                .handle_report(ObserverReport::Confirmations {
                    transfer_id: transfer.id.clone(),
                    confirmations: n,
                })
                .await
                .unwrap();
        }
        let minting = h.coordinator.get_transfer(&transfer.id).await.unwrap();
        assert_eq!(minting.status, TransferStatus::Minting);
        assert_eq!(minting.target_tx_hash.as_deref(), Some("0xmint"));
        assert_eq!(h.evm_client.mint_attempts(), 1);

        h.coordinator
            .handle_report(ObserverReport::MintFinalized {
                transfer_id: transfer.id.clone(),
            })
            .await
            .unwrap();
        let done = h.coordinator.get_transfer(&transfer.id).await.unwrap();
        assert_eq!(done.status, TransferStatus::Completed);
        assert_eq!(done.amount, done.fee_amount + done.net_amount);
    }

    #[tokio::test]
    async fn test_duplicate_lock_claims_exactly_once() {
        let h = harness();
        h.evm_client.set_mint_result(Ok("0xonce".to_string()));
        let first = h.coordinator.initiate(request(1_000)).await.unwrap();
        let second = h.coordinator.initiate(request(1_000)).await.unwrap();

        h.coordinator.record_lock(&first.id, "SHARED").await.unwrap();
        let err = h
            .coordinator
            .record_lock(&second.id, "SHARED")
            .await
            .unwrap_err();
        match err {
            BridgeError::DuplicateClaim { owner } => assert_eq!(owner, first.id),
            other => panic!("expected duplicate claim, got {other:?}"),
        }

        let loser = h.coordinator.get_transfer(&second.id).await.unwrap();
        assert_eq!(loser.status, TransferStatus::Failed);
        assert_eq!(loser.failure_reason, Some(FailureReason::DuplicateClaim));

        // Only the winner mints.
        for n in 1..=3 {
            h.coordinator
                .handle_report(ObserverReport::Confirmations {
                    transfer_id: first.id.clone(),
                    confirmations: n,
                })
                .await
                .unwrap();
        }
        assert_eq!(h.evm_client.mint_attempts(), 1);
    }

    #[tokio::test]
    async fn test_confirmation_reset_is_fatal() {
        let h = harness();
        let transfer = h.coordinator.initiate(request(1_000)).await.unwrap();
        h.coordinator
            .record_lock(&transfer.id, "LOCK1")
            .await
            .unwrap();
        h.coordinator
            .handle_report(ObserverReport::Confirmations {
                transfer_id: transfer.id.clone(),
                confirmations: 2,
            })
            .await
            .unwrap();

        h.coordinator
            .handle_report(ObserverReport::ConfirmationReset {
                transfer_id: transfer.id.clone(),
                reason: "lock tx no longer on canonical chain".to_string(),
            })
            .await
            .unwrap();
        let failed = h.coordinator.get_transfer(&transfer.id).await.unwrap();
        assert_eq!(failed.status, TransferStatus::Failed);
        assert_eq!(
            failed.failure_reason,
            Some(FailureReason::ConfirmationReset)
        );
        assert_eq!(h.evm_client.mint_attempts(), 0);
    }

    #[tokio::test]
    async fn test_stale_confirmation_reports_are_discarded() {
        let h = harness();
        let transfer = h.coordinator.initiate(request(1_000)).await.unwrap();
        h.coordinator
            .record_lock(&transfer.id, "LOCK1")
            .await
            .unwrap();
        h.coordinator
            .handle_report(ObserverReport::Confirmations {
                transfer_id: transfer.id.clone(),
                confirmations: 2,
            })
            .await
            .unwrap();
        // A lagging node reports 1; the count never goes backwards.
        h.coordinator
            .handle_report(ObserverReport::Confirmations {
                transfer_id: transfer.id.clone(),
                confirmations: 1,
            })
            .await
            .unwrap();
        let current = h.coordinator.get_transfer(&transfer.id).await.unwrap();
        assert_eq!(current.confirmations_observed, 2);
        assert_eq!(current.status, TransferStatus::Confirming);
    }

    #[tokio::test]
    async fn test_mint_revert_fails_with_reconciliation() {
        let h = harness();
        h.evm_client
            .set_mint_result(Err(SubmitError::Rejected("execution reverted".to_string())));
        let transfer = h.coordinator.initiate(request(1_000)).await.unwrap();
        h.coordinator
            .record_lock(&transfer.id, "LOCK1")
            .await
            .unwrap();
        h.coordinator
            .handle_report(ObserverReport::Confirmations {
                transfer_id: transfer.id.clone(),
                confirmations: 3,
            })
            .await
            .unwrap();

        let failed = h.coordinator.get_transfer(&transfer.id).await.unwrap();
        assert_eq!(failed.status, TransferStatus::Failed);
        assert_eq!(failed.failure_reason, Some(FailureReason::TargetRevert));
        assert!(failed.needs_reconciliation);
    }

    #[tokio::test]
    async fn test_refund_allowed_before_mint() {
        let h = harness();
        h.xrpl_client.set_unlock_result(Ok("UNLOCK1".to_string()));
        let transfer = h.coordinator.initiate(request(1_000)).await.unwrap();
        h.coordinator
            .record_lock(&transfer.id, "LOCK1")
            .await
            .unwrap();
        h.coordinator
            .handle_report(ObserverReport::Confirmations {
                transfer_id: transfer.id.clone(),
                confirmations: 1,
            })
            .await
            .unwrap();

        let refunded = h.coordinator.refund(&transfer.id).await.unwrap();
        assert_eq!(refunded.status, TransferStatus::Refunded);
        assert_eq!(refunded.failure_reason, Some(FailureReason::OperatorRefund));
        assert!(!refunded.needs_reconciliation);
        assert_eq!(h.xrpl_client.unlock_attempts(), 1);
        // The full locked amount goes back; the fee is not charged.
        assert_eq!(refunded.amount, 1_000);
    }

    #[tokio::test]
    async fn test_refund_rejected_once_minting() {
        let h = harness();
        h.evm_client.set_mint_result(Ok("0xmint".to_string()));
        let transfer = h.coordinator.initiate(request(1_000)).await.unwrap();
        h.coordinator
            .record_lock(&transfer.id, "LOCK1")
            .await
            .unwrap();
        h.coordinator
            .handle_report(ObserverReport::Confirmations {
                transfer_id: transfer.id.clone(),
                confirmations: 3,
            })
            .await
            .unwrap();

        let err = h.coordinator.refund(&transfer.id).await.unwrap_err();
        assert_eq!(err.error_type(), "invalid_state");
        assert_eq!(h.xrpl_client.unlock_attempts(), 0);
    }

    #[tokio::test]
    async fn test_refund_unlock_failure_flags_reconciliation() {
        let h = harness();
        h.xrpl_client
            .set_unlock_result(Err(SubmitError::Rejected("insufficient escrow".to_string())));
        let transfer = h.coordinator.initiate(request(1_000)).await.unwrap();
        h.coordinator
            .record_lock(&transfer.id, "LOCK1")
            .await
            .unwrap();

        let err = h.coordinator.refund(&transfer.id).await.unwrap_err();
        assert_eq!(err.error_type(), "target_revert");
        let failed = h.coordinator.get_transfer(&transfer.id).await.unwrap();
        assert_eq!(failed.status, TransferStatus::Failed);
        assert_eq!(
            failed.failure_reason,
            Some(FailureReason::RefundUnlockFailed)
        );
        assert!(failed.needs_reconciliation);
    }

    #[tokio::test]
    async fn test_cancel_only_before_lock() {
        let h = harness();
        let transfer = h.coordinator.initiate(request(1_000)).await.unwrap();
        let cancelled = h.coordinator.cancel(&transfer.id).await.unwrap();
        assert_eq!(cancelled.status, TransferStatus::Failed);
        assert_eq!(cancelled.failure_reason, Some(FailureReason::Cancelled));

        let other = h.coordinator.initiate(request(1_000)).await.unwrap();
        h.coordinator.record_lock(&other.id, "LOCK2").await.unwrap();
        assert_eq!(
            h.coordinator
                .cancel(&other.id)
                .await
                .unwrap_err()
                .error_type(),
            "invalid_state"
        );
    }

    #[tokio::test]
    async fn test_record_lock_is_idempotent_for_same_hash() {
        let h = harness();
        let transfer = h.coordinator.initiate(request(1_000)).await.unwrap();
        let a = h.coordinator.record_lock(&transfer.id, "LOCK1").await.unwrap();
        let b = h.coordinator.record_lock(&transfer.id, "LOCK1").await.unwrap();
        assert_eq!(a.status, TransferStatus::Locked);
        assert_eq!(b.status, TransferStatus::Locked);
        assert_eq!(b.status_history.len(), a.status_history.len());
    }

    #[tokio::test]
    async fn test_reports_for_unknown_transfer_error_out() {
        let h = harness();
        let err = h
            .coordinator
            .handle_report(ObserverReport::Confirmations {
                transfer_id: TransferId::from_raw("tf-missing"),
                confirmations: 1,
            })
            .await
            .unwrap_err();
        assert_eq!(err.error_type(), "transfer_not_found");
    }

    #[tokio::test]
    async fn test_recovery_redrives_confirmed_transfer() {
        let h = harness();
        h.evm_client.set_mint_result(Ok("0xrecovered".to_string()));
        let transfer = h.coordinator.initiate(request(1_000)).await.unwrap();
        h.coordinator
            .record_lock(&transfer.id, "LOCK1")
            .await
            .unwrap();

        // Simulate a crash right after CONFIRMED was persisted.
        let mut stranded = h.coordinator.get_transfer(&transfer.id).await.unwrap();
        stranded
            .transition(TransferStatus::Confirming, "confirmation")
            .unwrap();
        stranded
            .transition(TransferStatus::Confirmed, "confirmation")
            .unwrap();
        stranded.confirmations_observed = 3;
        h.store.put(&stranded).await.unwrap();

        h.coordinator.recover().await.unwrap();
        let resumed = h.coordinator.get_transfer(&transfer.id).await.unwrap();
        assert_eq!(resumed.status, TransferStatus::Minting);
        assert_eq!(resumed.target_tx_hash.as_deref(), Some("0xrecovered"));
        assert_eq!(h.evm_client.mint_attempts(), 1);
    }

    #[tokio::test]
    async fn test_report_loop_does_not_block_unrelated_transfers() {
        let h = harness();
        // Transfer A's mint submission keeps failing transiently, so its
        // report handler sits in the executor's backoff loop.
        h.evm_client.fail_mints_transiently(50);

        let a = h.coordinator.initiate(request(1_000)).await.unwrap();
        h.coordinator.record_lock(&a.id, "LOCKA").await.unwrap();
        let b = h.coordinator.initiate(request(1_000)).await.unwrap();
        h.coordinator.record_lock(&b.id, "LOCKB").await.unwrap();

        let (tx, rx) = mpsc::channel(16);
        let shutdown = CancellationToken::new();
        let loop_handle = tokio::spawn(h.coordinator.clone().run(rx, shutdown.clone()));

        tx.send(ObserverReport::Confirmations {
            transfer_id: a.id.clone(),
            confirmations: 3,
        })
        .await
        .unwrap();
        tx.send(ObserverReport::Confirmations {
            transfer_id: b.id.clone(),
            confirmations: 1,
        })
        .await
        .unwrap();

        // B's report must be applied while A's mint submission is still
        // retrying (A cannot leave MINTING for several seconds).
        let mut b_confirmed = false;
        for _ in 0..20 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let current = h.coordinator.get_transfer(&b.id).await.unwrap();
            if current.confirmations_observed == 1 {
                b_confirmed = true;
                break;
            }
        }
        assert!(b_confirmed, "unrelated transfer's report was not processed");
        let a_current = h.coordinator.get_transfer(&a.id).await.unwrap();
        assert_eq!(a_current.status, TransferStatus::Minting);

        shutdown.cancel();
        loop_handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_recovery_completes_confirming_transfer_at_threshold() {
        let h = harness();
        h.evm_client.set_mint_result(Ok("0xlate".to_string()));
        let transfer = h.coordinator.initiate(request(1_000)).await.unwrap();
        h.coordinator
            .record_lock(&transfer.id, "LOCK1")
            .await
            .unwrap();

        // Simulate a crash after the confirmation count was persisted but
        // before the CONFIRMED transition was.
        let mut stranded = h.coordinator.get_transfer(&transfer.id).await.unwrap();
        stranded
            .transition(TransferStatus::Confirming, "confirmation")
            .unwrap();
        stranded.confirmations_observed = 3;
        h.store.put(&stranded).await.unwrap();

        h.coordinator.recover().await.unwrap();
        let resumed = h.coordinator.get_transfer(&transfer.id).await.unwrap();
        assert_eq!(resumed.status, TransferStatus::Minting);
        assert_eq!(resumed.target_tx_hash.as_deref(), Some("0xlate"));
    }

    #[tokio::test]
    async fn test_repeated_threshold_report_advances_stuck_transfer() {
        let h = harness();
        h.evm_client.set_mint_result(Ok("0xrepeat".to_string()));
        let transfer = h.coordinator.initiate(request(1_000)).await.unwrap();
        h.coordinator
            .record_lock(&transfer.id, "LOCK1")
            .await
            .unwrap();

        let mut stranded = h.coordinator.get_transfer(&transfer.id).await.unwrap();
        stranded
            .transition(TransferStatus::Confirming, "confirmation")
            .unwrap();
        stranded.confirmations_observed = 3;
        h.store.put(&stranded).await.unwrap();

        // The observer re-reports the same depth on its next tick; an equal
        // count at the threshold must not be treated as a no-op.
        h.coordinator
            .handle_report(ObserverReport::Confirmations {
                transfer_id: transfer.id.clone(),
                confirmations: 3,
            })
            .await
            .unwrap();
        let resumed = h.coordinator.get_transfer(&transfer.id).await.unwrap();
        assert_eq!(resumed.status, TransferStatus::Minting);
    }

    #[tokio::test]
    async fn test_lock_table_pruned_once_terminal() {
        let h = harness();
        h.evm_client.set_mint_result(Ok("0xmint".to_string()));

        let cancelled = h.coordinator.initiate(request(1_000)).await.unwrap();
        h.coordinator.cancel(&cancelled.id).await.unwrap();
        assert_eq!(h.coordinator.lock_table_len(), 0);

        let completed = h.coordinator.initiate(request(1_000)).await.unwrap();
        h.coordinator
            .record_lock(&completed.id, "LOCK1")
            .await
            .unwrap();
        h.coordinator
            .handle_report(ObserverReport::Confirmations {
                transfer_id: completed.id.clone(),
                confirmations: 3,
            })
            .await
            .unwrap();
        assert!(h.coordinator.lock_table_len() > 0);
        h.coordinator
            .handle_report(ObserverReport::MintFinalized {
                transfer_id: completed.id.clone(),
            })
            .await
            .unwrap();
        assert_eq!(h.coordinator.lock_table_len(), 0);
    }

    #[tokio::test]
    async fn test_event_stream_covers_lifecycle() {
        let h = harness();
        h.evm_client.set_mint_result(Ok("0xmint".to_string()));
        let mut events = h.coordinator.events().subscribe();

        let transfer = h.coordinator.initiate(request(1_000)).await.unwrap();
        h.coordinator
            .record_lock(&transfer.id, "LOCK1")
            .await
            .unwrap();
        h.coordinator
            .handle_report(ObserverReport::Confirmations {
                transfer_id: transfer.id.clone(),
                confirmations: 3,
            })
            .await
            .unwrap();
        h.coordinator
            .handle_report(ObserverReport::MintFinalized {
                transfer_id: transfer.id.clone(),
            })
            .await
            .unwrap();

        let mut seen_confirmation = false;
        let mut completion = None;
        while let Ok(event) = events.try_recv() {
            match event {
                BridgeNotification::Confirmation { .. } => seen_confirmation = true,
                BridgeNotification::Completion { status, .. } => completion = Some(status),
                BridgeNotification::Status { .. } => {}
            }
        }
        assert!(seen_confirmation);
        assert_eq!(completion, Some(TransferStatus::Completed));
    }
}
