// Copyright (c) Meridian Bridge Contributors
// SPDX-License-Identifier: Apache-2.0

//! Fee computation. A pure function of the network's fee rate and the
//! requested amount; the result is snapshotted onto the transfer record and
//! never recomputed.

use crate::error::{BridgeError, BridgeResult};

/// Denominator of the fixed-point fee rate: rates are parts per million.
pub const FEE_RATE_DENOMINATOR: u64 = 1_000_000;

/// Fee and net credit for a requested amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeBreakdown {
    pub fee_amount: u64,
    pub net_amount: u64,
}

/// fee = amount * rate / 1_000_000, rounded toward zero to the asset's
/// minimum unit. Guarantees `0 <= fee < amount` on success; fails with
/// `AmountTooSmall` when the fee would consume the entire transfer.
pub fn compute_fee(fee_rate_micros: u64, amount: u64) -> BridgeResult<FeeBreakdown> {
    if amount == 0 {
        return Err(BridgeError::Validation(
            "transfer amount must be positive".to_string(),
        ));
    }
    // u128 intermediate: amount * rate can overflow u64.
    let fee = (amount as u128 * fee_rate_micros as u128 / FEE_RATE_DENOMINATOR as u128) as u64;
    if fee >= amount {
        return Err(BridgeError::AmountTooSmall { amount, fee });
    }
    Ok(FeeBreakdown {
        fee_amount: fee,
        net_amount: amount - fee,
    })
}
