// Copyright (c) Meridian Bridge Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::coordinator::{TransferCoordinator, TransferRequest};
use crate::error::{BridgeError, BridgeResult};
use crate::registry::NetworkRegistry;
use crate::types::{BridgeTransaction, TransferId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Body of `POST /bridge/lock/:id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRequest {
    pub source_tx_hash: String,
}

/// Public view of a registered network. Deliberately excludes the RPC
/// endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct NetworkInfo {
    pub name: String,
    pub asset_symbol: String,
    pub fee_rate_micros: u64,
    pub min_confirmations: u64,
    pub min_transfer_amount: u64,
    pub max_transfer_amount: u64,
}

/// Fee schedule for one network pair, echoing registry values. The rate and
/// confirmation threshold come from the source network; registry reloads
/// change quotes but never transfers already initiated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FeeSchedule {
    pub source_network: String,
    pub target_network: String,
    pub fee_rate_micros: u64,
    pub required_confirmations: u64,
    pub min_transfer_amount: u64,
    pub max_transfer_amount: u64,
}

/// What the REST surface needs from the rest of the node. A trait so router
/// tests can run against a stub.
#[async_trait]
pub trait TransferRequestHandlerTrait {
    async fn initiate(&self, request: TransferRequest) -> BridgeResult<BridgeTransaction>;

    async fn fee_schedule(&self, source: &str, target: &str) -> BridgeResult<FeeSchedule>;

    async fn get_transfer(&self, id: &TransferId) -> BridgeResult<BridgeTransaction>;

    async fn active_transfers(&self) -> BridgeResult<Vec<BridgeTransaction>>;

    async fn record_lock(
        &self,
        id: &TransferId,
        source_tx_hash: &str,
    ) -> BridgeResult<BridgeTransaction>;

    async fn cancel(&self, id: &TransferId) -> BridgeResult<BridgeTransaction>;

    async fn refund(&self, id: &TransferId) -> BridgeResult<BridgeTransaction>;

    async fn networks(&self) -> BridgeResult<Vec<NetworkInfo>>;
}

/// Production handler: a thin delegation layer over the coordinator.
pub struct TransferRequestHandler {
    coordinator: Arc<TransferCoordinator>,
    registry: Arc<NetworkRegistry>,
}

impl TransferRequestHandler {
    pub fn new(coordinator: Arc<TransferCoordinator>, registry: Arc<NetworkRegistry>) -> Self {
        Self {
            coordinator,
            registry,
        }
    }
}

#[async_trait]
impl TransferRequestHandlerTrait for TransferRequestHandler {
    async fn initiate(&self, request: TransferRequest) -> BridgeResult<BridgeTransaction> {
        self.coordinator.initiate(request).await
    }

    async fn fee_schedule(&self, source: &str, target: &str) -> BridgeResult<FeeSchedule> {
        if source == target {
            return Err(BridgeError::Validation(
                "source and target network must differ".to_string(),
            ));
        }
        let source_config = self
            .registry
            .get(source)
            .ok_or_else(|| BridgeError::Validation(format!("unknown network {source:?}")))?;
        let target_config = self
            .registry
            .get(target)
            .ok_or_else(|| BridgeError::Validation(format!("unknown network {target:?}")))?;
        Ok(FeeSchedule {
            source_network: source_config.name.clone(),
            target_network: target_config.name.clone(),
            fee_rate_micros: source_config.fee_rate_micros,
            required_confirmations: source_config.min_confirmations,
            min_transfer_amount: source_config.min_transfer_amount,
            max_transfer_amount: source_config.max_transfer_amount,
        })
    }

    async fn get_transfer(&self, id: &TransferId) -> BridgeResult<BridgeTransaction> {
        self.coordinator.get_transfer(id).await
    }

    async fn active_transfers(&self) -> BridgeResult<Vec<BridgeTransaction>> {
        self.coordinator.active_transfers().await
    }

    async fn record_lock(
        &self,
        id: &TransferId,
        source_tx_hash: &str,
    ) -> BridgeResult<BridgeTransaction> {
        self.coordinator.record_lock(id, source_tx_hash).await
    }

    async fn cancel(&self, id: &TransferId) -> BridgeResult<BridgeTransaction> {
        self.coordinator.cancel(id).await
    }

    async fn refund(&self, id: &TransferId) -> BridgeResult<BridgeTransaction> {
        self.coordinator.refund(id).await
    }

    async fn networks(&self) -> BridgeResult<Vec<NetworkInfo>> {
        let mut infos = Vec::new();
        for name in self.registry.names() {
            let config = self
                .registry
                .get(&name)
                .ok_or_else(|| BridgeError::Internal(format!("network {name} vanished")))?;
            infos.push(NetworkInfo {
                name: config.name.clone(),
                asset_symbol: config.asset_symbol.clone(),
                fee_rate_micros: config.fee_rate_micros,
                min_confirmations: config.min_confirmations,
                min_transfer_amount: config.min_transfer_amount,
                max_transfer_amount: config.max_transfer_amount,
            });
        }
        Ok(infos)
    }
}
