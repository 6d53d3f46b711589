// Copyright (c) Meridian Bridge Contributors
// SPDX-License-Identifier: Apache-2.0

//! Ledger observation.
//!
//! One [`LedgerObserver`] runs per supported network. It watches the source
//! side of pending transfers for lock-event confirmation depth, and the
//! target side for finality of submitted mint/release transactions. The
//! observer only reports facts; all state mutation happens in the
//! coordinator, fed over a one-way mpsc channel.

use crate::types::TransferId;
use async_trait::async_trait;
use thiserror::Error;

mod poller;

pub use poller::LedgerObserver;

/// Errors from chain reads. All of these are transient from the observer's
/// point of view: it logs and retries on the next poll tick.
#[derive(Debug, Error)]
pub enum ChainReadError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Finality state of a submitted target-chain transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetTxStatus {
    /// Known to the chain but not yet final.
    Pending,
    /// Final; the transfer may complete.
    Finalized,
    /// Rejected/reverted by the chain.
    Reverted,
    /// Unknown to the chain (dropped or not yet propagated).
    NotFound,
}

/// Read access to a network in its role as transfer source.
#[async_trait]
pub trait SourceChainReader: Send + Sync + std::fmt::Debug {
    /// Confirmation depth of a lock transaction. `Ok(None)` means the
    /// transaction is no longer visible on the canonical chain.
    async fn lock_confirmations(&self, tx_hash: &str) -> Result<Option<u64>, ChainReadError>;

    fn network(&self) -> &str;
}

/// Read access to a network in its role as transfer target.
#[async_trait]
pub trait TargetChainReader: Send + Sync + std::fmt::Debug {
    async fn mint_status(&self, tx_hash: &str) -> Result<TargetTxStatus, ChainReadError>;

    fn network(&self) -> &str;
}

/// Facts reported by observers to the coordinator. Pure data; the observer
/// never mutates transfer state itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObserverReport {
    /// Current confirmation depth of a transfer's lock transaction. The
    /// coordinator discards stale (lower) counts.
    Confirmations {
        transfer_id: TransferId,
        confirmations: u64,
    },
    /// A previously observed lock event disappeared below the reorg-safety
    /// depth. Hard failure; confirmations are never decremented.
    ConfirmationReset {
        transfer_id: TransferId,
        reason: String,
    },
    /// The submitted mint/release transaction is final on the target chain.
    MintFinalized { transfer_id: TransferId },
    /// The submitted mint/release transaction was reverted.
    MintReverted {
        transfer_id: TransferId,
        reason: String,
    },
}
