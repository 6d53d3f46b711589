// Copyright (c) Meridian Bridge Contributors
// SPDX-License-Identifier: Apache-2.0

//! Per-network parameter table.
//!
//! Pure data: lookups only, no behavior. Built explicitly at startup and
//! passed by `Arc` to every component that needs it; there is no ambient
//! singleton. A controlled reload replaces the table wholesale and cannot
//! affect in-flight transfers, which snapshot their fee rate and
//! confirmation threshold at creation.

use crate::error::{BridgeError, BridgeResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// How addresses on a network are validated syntactically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AddressScheme {
    /// 0x-prefixed, 40 hex characters.
    Evm,
    /// Classic ledger address: starts with 'r', 25-35 base58 characters.
    Ledger,
    /// Anything non-empty; for networks with no known syntax.
    Opaque,
}

impl AddressScheme {
    pub fn is_valid(&self, address: &str) -> bool {
        match self {
            AddressScheme::Evm => {
                address.len() == 42
                    && address.starts_with("0x")
                    && address[2..].chars().all(|c| c.is_ascii_hexdigit())
            }
            AddressScheme::Ledger => {
                (25..=35).contains(&address.len())
                    && address.starts_with('r')
                    && address.chars().all(|c| c.is_ascii_alphanumeric())
            }
            AddressScheme::Opaque => !address.is_empty(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NetworkConfig {
    /// Unique network name, e.g. "xrpl", "evm-sidechain". Must not contain
    /// ':' (reserved by the idempotency key encoding).
    pub name: String,
    pub asset_symbol: String,
    pub address_scheme: AddressScheme,
    pub rpc_url: String,
    /// Confirmations required before the lock event counts as final. >= 1.
    pub min_confirmations: u64,
    /// Fee rate in parts per million (1000 = 0.1%).
    pub fee_rate_micros: u64,
    pub min_transfer_amount: u64,
    pub max_transfer_amount: u64,
    /// Observer polling cadence for this network.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

impl NetworkConfig {
    pub fn validate(&self) -> BridgeResult<()> {
        if self.name.is_empty() || self.name.contains(':') {
            return Err(BridgeError::Validation(format!(
                "invalid network name {:?}",
                self.name
            )));
        }
        if self.min_confirmations == 0 {
            return Err(BridgeError::Validation(format!(
                "network {}: min-confirmations must be >= 1",
                self.name
            )));
        }
        if self.min_transfer_amount == 0 || self.min_transfer_amount > self.max_transfer_amount {
            return Err(BridgeError::Validation(format!(
                "network {}: transfer bounds [{}, {}] are invalid",
                self.name, self.min_transfer_amount, self.max_transfer_amount
            )));
        }
        Ok(())
    }
}

/// Lookup table of [`NetworkConfig`] entries, keyed by name.
#[derive(Debug)]
pub struct NetworkRegistry {
    networks: RwLock<HashMap<String, Arc<NetworkConfig>>>,
}

impl NetworkRegistry {
    pub fn new(configs: Vec<NetworkConfig>) -> BridgeResult<Self> {
        Ok(Self {
            networks: RwLock::new(Self::build_table(configs)?),
        })
    }

    fn build_table(
        configs: Vec<NetworkConfig>,
    ) -> BridgeResult<HashMap<String, Arc<NetworkConfig>>> {
        let mut table = HashMap::new();
        for config in configs {
            config.validate()?;
            if table
                .insert(config.name.clone(), Arc::new(config))
                .is_some()
            {
                return Err(BridgeError::Validation(
                    "duplicate network name in registry".to_string(),
                ));
            }
        }
        Ok(table)
    }

    pub fn get(&self, name: &str) -> Option<Arc<NetworkConfig>> {
        self.networks
            .read()
            .expect("network registry lock poisoned")
            .get(name)
            .cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .networks
            .read()
            .expect("network registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Replace the whole table. Rejected wholesale if any entry is invalid.
    /// Transfers already in flight keep the parameters they snapshotted.
    pub fn reload(&self, configs: Vec<NetworkConfig>) -> BridgeResult<()> {
        let table = Self::build_table(configs)?;
        *self
            .networks
            .write()
            .expect("network registry lock poisoned") = table;
        Ok(())
    }
}
