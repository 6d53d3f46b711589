// Copyright (c) Meridian Bridge Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::types::TransferId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    // Bad network/address/amount at request time. No state is created.
    Validation(String),
    // The fee would consume the entire transfer.
    AmountTooSmall {
        amount: u64,
        fee: u64,
    },
    // An operation was attempted against a transfer in the wrong state.
    InvalidState {
        transfer_id: TransferId,
        state: String,
        operation: &'static str,
    },
    // Transient RPC/connectivity failure. Retried internally; surfaced only
    // once retries are exhausted.
    NetworkUnavailable(String),
    // A reorg invalidated previously observed confirmations. Always fatal
    // to the transfer.
    ConfirmationReset(String),
    // The idempotency ledger rejected the claim; the named transfer owns it.
    DuplicateClaim {
        owner: TransferId,
    },
    // Mint/release transaction rejected by the target chain.
    TargetRevert(String),
    // Unknown transfer id.
    TransferNotFound(TransferId),
    // Storage error
    Storage(String),
    // Uncategorized error
    Internal(String),
}

impl BridgeError {
    /// Returns a short string identifying the error type for metrics labels
    pub fn error_type(&self) -> &'static str {
        match self {
            BridgeError::Validation(_) => "validation",
            BridgeError::AmountTooSmall { .. } => "amount_too_small",
            BridgeError::InvalidState { .. } => "invalid_state",
            BridgeError::NetworkUnavailable(_) => "network_unavailable",
            BridgeError::ConfirmationReset(_) => "confirmation_reset",
            BridgeError::DuplicateClaim { .. } => "duplicate_claim",
            BridgeError::TargetRevert(_) => "target_revert",
            BridgeError::TransferNotFound(_) => "transfer_not_found",
            BridgeError::Storage(_) => "storage_error",
            BridgeError::Internal(_) => "internal_error",
        }
    }
}

impl std::fmt::Display for BridgeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BridgeError::Validation(msg) => write!(f, "validation failed: {msg}"),
            BridgeError::AmountTooSmall { amount, fee } => {
                write!(f, "fee {fee} would consume the entire transfer of {amount}")
            }
            BridgeError::InvalidState {
                transfer_id,
                state,
                operation,
            } => write!(
                f,
                "transfer {transfer_id} in state {state} does not permit {operation}"
            ),
            BridgeError::NetworkUnavailable(msg) => write!(f, "network unavailable: {msg}"),
            BridgeError::ConfirmationReset(msg) => write!(f, "confirmation reset: {msg}"),
            BridgeError::DuplicateClaim { owner } => {
                write!(f, "source event already claimed by transfer {owner}")
            }
            BridgeError::TargetRevert(msg) => write!(f, "target chain rejected: {msg}"),
            BridgeError::TransferNotFound(id) => write!(f, "transfer {id} not found"),
            BridgeError::Storage(msg) => write!(f, "storage error: {msg}"),
            BridgeError::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for BridgeError {}

pub type BridgeResult<T> = Result<T, BridgeError>;
