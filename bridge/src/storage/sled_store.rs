// Copyright (c) Meridian Bridge Contributors
// SPDX-License-Identifier: Apache-2.0

//! Embedded sled implementation of both stores.
//!
//! Two trees: `transfers` (id -> BridgeTransaction) and `idempotency`
//! (network:tx_hash -> IdempotencyRecord). The idempotency claim uses
//! `compare_and_swap` against an absent key, which is the storage-level
//! unique insert the claim semantics require.

use super::{IdempotencyLedger, TransferStore};
use crate::error::{BridgeError, BridgeResult};
use crate::types::{BridgeTransaction, ClaimOutcome, IdempotencyKey, IdempotencyRecord, TransferId};
use async_trait::async_trait;
use std::path::Path;
use tracing::{debug, info};

const TRANSFERS_TREE: &str = "transfers";
const IDEMPOTENCY_TREE: &str = "idempotency";

#[derive(Debug, Clone)]
pub struct SledStore {
    transfers: sled::Tree,
    idempotency: sled::Tree,
}

impl SledStore {
    pub fn open(path: &Path) -> BridgeResult<Self> {
        let db = sled::open(path).map_err(storage_err)?;
        info!("Opened bridge store at {}", path.display());
        Self::from_db(&db)
    }

    /// In-memory database, dropped on close. For tests.
    pub fn open_temporary() -> BridgeResult<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(storage_err)?;
        Self::from_db(&db)
    }

    fn from_db(db: &sled::Db) -> BridgeResult<Self> {
        Ok(Self {
            transfers: db.open_tree(TRANSFERS_TREE).map_err(storage_err)?,
            idempotency: db.open_tree(IDEMPOTENCY_TREE).map_err(storage_err)?,
        })
    }
}

fn storage_err(e: impl std::fmt::Display) -> BridgeError {
    BridgeError::Storage(e.to_string())
}

fn encode<T: serde::Serialize>(value: &T) -> BridgeResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(storage_err)
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> BridgeResult<T> {
    serde_json::from_slice(bytes).map_err(storage_err)
}

#[async_trait]
impl TransferStore for SledStore {
    async fn put(&self, transfer: &BridgeTransaction) -> BridgeResult<()> {
        self.transfers
            .insert(transfer.id.as_str(), encode(transfer)?)
            .map_err(storage_err)?;
        // Durability before acknowledgment: the coordinator's write-ahead
        // rule depends on this flush.
        self.transfers.flush_async().await.map_err(storage_err)?;
        debug!(
            transfer_id = %transfer.id,
            status = %transfer.status,
            "persisted transfer record"
        );
        Ok(())
    }

    async fn get(&self, id: &TransferId) -> BridgeResult<Option<BridgeTransaction>> {
        match self.transfers.get(id.as_str()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn active(&self) -> BridgeResult<Vec<BridgeTransaction>> {
        let mut out = Vec::new();
        for entry in self.transfers.iter() {
            let (_, bytes) = entry.map_err(storage_err)?;
            let transfer: BridgeTransaction = decode(&bytes)?;
            if !transfer.status.is_terminal() {
                out.push(transfer);
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl IdempotencyLedger for SledStore {
    async fn claim(
        &self,
        key: &IdempotencyKey,
        transfer_id: &TransferId,
    ) -> BridgeResult<ClaimOutcome> {
        let record = IdempotencyRecord {
            transfer_id: transfer_id.clone(),
            minted: false,
            target_tx_hash: None,
        };
        let result = self
            .idempotency
            .compare_and_swap(
                key.encode().as_bytes(),
                None::<&[u8]>,
                Some(encode(&record)?),
            )
            .map_err(storage_err)?;
        let outcome = match result {
            Ok(()) => {
                self.idempotency.flush_async().await.map_err(storage_err)?;
                ClaimOutcome::Accepted
            }
            Err(cas_err) => {
                let current: IdempotencyRecord = match cas_err.current {
                    Some(bytes) => decode(&bytes)?,
                    // Key was deleted concurrently; the ledger is write-once
                    // so this indicates corruption.
                    None => {
                        return Err(BridgeError::Storage(
                            "idempotency record vanished during claim".to_string(),
                        ))
                    }
                };
                if &current.transfer_id == transfer_id {
                    ClaimOutcome::Accepted
                } else {
                    ClaimOutcome::AlreadyClaimedBy(current.transfer_id)
                }
            }
        };
        debug!(key = %key.encode(), transfer_id = %transfer_id, ?outcome, "idempotency claim");
        Ok(outcome)
    }

    async fn mark_minted(&self, key: &IdempotencyKey, target_tx_hash: &str) -> BridgeResult<()> {
        let encoded_key = key.encode();
        let mut record: IdempotencyRecord = match self
            .idempotency
            .get(encoded_key.as_bytes())
            .map_err(storage_err)?
        {
            Some(bytes) => decode(&bytes)?,
            None => {
                return Err(BridgeError::Storage(format!(
                    "mark_minted on unclaimed key {encoded_key}"
                )))
            }
        };
        record.minted = true;
        record.target_tx_hash = Some(target_tx_hash.to_string());
        self.idempotency
            .insert(encoded_key.as_bytes(), encode(&record)?)
            .map_err(storage_err)?;
        self.idempotency.flush_async().await.map_err(storage_err)?;
        Ok(())
    }

    async fn get(&self, key: &IdempotencyKey) -> BridgeResult<Option<IdempotencyRecord>> {
        match self
            .idempotency
            .get(key.encode().as_bytes())
            .map_err(storage_err)?
        {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }
}
