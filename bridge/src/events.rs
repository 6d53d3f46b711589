// Copyright (c) Meridian Bridge Contributors
// SPDX-License-Identifier: Apache-2.0

//! Notification surface: `bridge.status`, `bridge.confirmation` and
//! `bridge.completion` events, fanned out over a broadcast channel.
//!
//! Delivery is at-least-once; a subscriber may see the same transition more
//! than once (e.g. after the coordinator replays stored state on restart)
//! and must treat repeats as no-ops.

use crate::types::{BridgeTransaction, TransferId, TransferStatus};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum BridgeNotification {
    /// Any status transition.
    Status {
        transfer_id: TransferId,
        status: TransferStatus,
        snapshot: Box<BridgeTransaction>,
    },
    /// Each confirmation-count update.
    Confirmation {
        transfer_id: TransferId,
        confirmations_observed: u64,
        required_confirmations: u64,
    },
    /// A terminal state was reached.
    Completion {
        transfer_id: TransferId,
        status: TransferStatus,
        snapshot: Box<BridgeTransaction>,
    },
}

/// Broadcast fan-out for [`BridgeNotification`]s. Cloneable; publishing with
/// no subscribers is not an error.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BridgeNotification>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BridgeNotification> {
        self.sender.subscribe()
    }

    pub fn publish(&self, notification: BridgeNotification) {
        // A send error only means there are currently no subscribers.
        let _ = self.sender.send(notification);
    }

    /// Publish the status event for a transition, plus the completion event
    /// when the transition was terminal.
    pub fn publish_transition(&self, transfer: &BridgeTransaction) {
        self.publish(BridgeNotification::Status {
            transfer_id: transfer.id.clone(),
            status: transfer.status,
            snapshot: Box::new(transfer.clone()),
        });
        if transfer.status.is_terminal() {
            self.publish(BridgeNotification::Completion {
                transfer_id: transfer.id.clone(),
                status: transfer.status,
                snapshot: Box::new(transfer.clone()),
            });
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
