// Copyright (c) Meridian Bridge Contributors
// SPDX-License-Identifier: Apache-2.0

//! Durable state: the transfer table and the idempotency ledger.
//!
//! The coordinator writes every status transition here before acknowledging
//! it anywhere (write-ahead), so a crash between a transition and its side
//! effect is recoverable by replaying stored state. Transfer records are
//! never deleted; terminal states are final and kept for audit.

use crate::error::BridgeResult;
use crate::types::{BridgeTransaction, ClaimOutcome, IdempotencyKey, IdempotencyRecord, TransferId};
use async_trait::async_trait;

mod sled_store;

pub use sled_store::SledStore;

/// Durable table of all [`BridgeTransaction`] records, keyed by transfer id.
#[async_trait]
pub trait TransferStore: Send + Sync + std::fmt::Debug {
    /// Insert or overwrite the record. Must be durable before returning.
    async fn put(&self, transfer: &BridgeTransaction) -> BridgeResult<()>;

    async fn get(&self, id: &TransferId) -> BridgeResult<Option<BridgeTransaction>>;

    /// All records not yet in a terminal state, for observer polling and
    /// restart recovery.
    async fn active(&self) -> BridgeResult<Vec<BridgeTransaction>>;
}

/// Write-once ledger preventing double-credit of a source event.
///
/// `claim` must be atomic under concurrent callers: the guarantee comes from
/// the storage layer's unique-insert semantics, not from in-process locking,
/// so it holds even with multiple coordinator processes over one store.
#[async_trait]
pub trait IdempotencyLedger: Send + Sync + std::fmt::Debug {
    /// Atomically reserve the key for `transfer_id`. Re-claiming a key the
    /// same transfer already owns is accepted (crash-and-retry path).
    async fn claim(&self, key: &IdempotencyKey, transfer_id: &TransferId)
        -> BridgeResult<ClaimOutcome>;

    /// Record that the claimed event was minted on the target network.
    async fn mark_minted(&self, key: &IdempotencyKey, target_tx_hash: &str) -> BridgeResult<()>;

    async fn get(&self, key: &IdempotencyKey) -> BridgeResult<Option<IdempotencyRecord>>;
}
