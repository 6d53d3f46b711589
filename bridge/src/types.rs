// Copyright (c) Meridian Bridge Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::error::{BridgeError, BridgeResult};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use strum_macros::Display;

/// Opaque, generator-assigned transfer identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransferId(String);

impl TransferId {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut bytes);
        TransferId(format!("tf-{}", hex::encode(bytes)))
    }

    pub fn from_raw(raw: impl Into<String>) -> Self {
        TransferId(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TransferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transfer lifecycle states.
///
/// `Initiated` is the entry state; `Completed`, `Failed` and `Refunded` are
/// terminal. The forward path is strictly
/// Initiated → Locked → Confirming → Confirmed → Minting → Completed, with
/// Failed/Refunded reachable from every non-terminal state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, PartialOrd, Ord,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    Initiated,
    Locked,
    Confirming,
    Confirmed,
    Minting,
    Completed,
    Failed,
    Refunded,
}

impl TransferStatus {
    /// Transition table: the allowed next states for each state. Every
    /// mutation is validated against this table, nowhere else.
    pub fn allowed_next(self) -> &'static [TransferStatus] {
        use TransferStatus::*;
        match self {
            Initiated => &[Locked, Failed, Refunded],
            Locked => &[Confirming, Confirmed, Failed, Refunded],
            Confirming => &[Confirmed, Failed, Refunded],
            Confirmed => &[Minting, Failed, Refunded],
            Minting => &[Completed, Failed],
            Completed | Failed | Refunded => &[],
        }
    }

    pub fn can_transition_to(self, next: TransferStatus) -> bool {
        self.allowed_next().contains(&next)
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_next().is_empty()
    }

    /// States in which the operator-triggered refund is permitted: funds are
    /// locked on the source but nothing has been submitted on the target.
    pub fn is_refundable(self) -> bool {
        matches!(
            self,
            TransferStatus::Locked | TransferStatus::Confirming | TransferStatus::Confirmed
        )
    }
}

/// Machine-readable reason recorded on every terminal FAILED/REFUNDED
/// transfer. Values double as metric labels and must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Cancelled,
    ConfirmationReset,
    DuplicateClaim,
    TargetRevert,
    NetworkUnavailable,
    OperatorRefund,
    RefundUnlockFailed,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::Cancelled => "cancelled",
            FailureReason::ConfirmationReset => "confirmation_reset",
            FailureReason::DuplicateClaim => "duplicate_claim",
            FailureReason::TargetRevert => "target_revert",
            FailureReason::NetworkUnavailable => "network_unavailable",
            FailureReason::OperatorRefund => "operator_refund",
            FailureReason::RefundUnlockFailed => "refund_unlock_failed",
        }
    }
}

/// One entry per status transition, for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: TransferStatus,
    pub timestamp_ms: u64,
}

/// The central transfer record. Created by the coordinator on request,
/// mutated only by the coordinator, retained forever once terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeTransaction {
    pub id: TransferId,
    pub source_network: String,
    pub target_network: String,
    pub source_address: String,
    pub target_address: String,
    /// Asset symbol as registered on the source network.
    pub token: String,
    /// Requested amount in the source asset's minimum unit.
    pub amount: u64,
    /// Fee owed, computed once at creation and never recomputed.
    pub fee_amount: u64,
    /// amount - fee_amount; what the target side credits.
    pub net_amount: u64,
    /// Fee rate snapshot (parts per million) captured at creation; registry
    /// reloads do not affect it.
    pub fee_rate_micros: u64,
    /// Confirmation threshold snapshot captured at creation.
    pub required_confirmations: u64,
    pub status: TransferStatus,
    /// Source-chain lock/deposit transaction, set once observed.
    pub source_tx_hash: Option<String>,
    /// Monotone; never decreased, only reset via a fatal ConfirmationReset.
    pub confirmations_observed: u64,
    /// Target-chain mint/release transaction, set once submitted.
    pub target_tx_hash: Option<String>,
    pub failure_reason: Option<FailureReason>,
    /// Set when funds may be stranded and an operator must reconcile.
    pub needs_reconciliation: bool,
    pub created_at_ms: u64,
    pub status_history: Vec<StatusChange>,
}

impl BridgeTransaction {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source_network: String,
        target_network: String,
        source_address: String,
        target_address: String,
        token: String,
        amount: u64,
        fee_amount: u64,
        fee_rate_micros: u64,
        required_confirmations: u64,
    ) -> Self {
        let now = now_ms();
        Self {
            id: TransferId::generate(),
            source_network,
            target_network,
            source_address,
            target_address,
            token,
            amount,
            fee_amount,
            net_amount: amount - fee_amount,
            fee_rate_micros,
            required_confirmations,
            status: TransferStatus::Initiated,
            source_tx_hash: None,
            confirmations_observed: 0,
            target_tx_hash: None,
            failure_reason: None,
            needs_reconciliation: false,
            created_at_ms: now,
            status_history: vec![StatusChange {
                status: TransferStatus::Initiated,
                timestamp_ms: now,
            }],
        }
    }

    /// Move to `next`, validating against the transition table. Invalid
    /// transitions are rejected without mutating the record.
    pub fn transition(&mut self, next: TransferStatus, operation: &'static str) -> BridgeResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(BridgeError::InvalidState {
                transfer_id: self.id.clone(),
                state: self.status.to_string(),
                operation,
            });
        }
        self.status = next;
        self.status_history.push(StatusChange {
            status: next,
            timestamp_ms: now_ms(),
        });
        Ok(())
    }

    pub fn fail(&mut self, reason: FailureReason, reconcile: bool) -> BridgeResult<()> {
        self.transition(TransferStatus::Failed, "fail")?;
        self.failure_reason = Some(reason);
        self.needs_reconciliation = reconcile;
        Ok(())
    }
}

/// Key of the idempotency ledger: one source event, on one network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey {
    pub source_network: String,
    pub source_tx_hash: String,
}

impl IdempotencyKey {
    pub fn new(source_network: impl Into<String>, source_tx_hash: impl Into<String>) -> Self {
        Self {
            source_network: source_network.into(),
            source_tx_hash: source_tx_hash.into(),
        }
    }

    /// Stable storage encoding. Network names cannot contain ':'.
    pub fn encode(&self) -> String {
        format!("{}:{}", self.source_network, self.source_tx_hash)
    }
}

/// Write-once record of which transfer claimed a source event, and whether
/// minting went through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub transfer_id: TransferId,
    pub minted: bool,
    pub target_tx_hash: Option<String>,
}

/// Result of an idempotency claim. A tagged variant rather than an error:
/// losing the race is a normal outcome the caller dispatches on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    Accepted,
    AlreadyClaimedBy(TransferId),
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
