// Copyright (c) Meridian Bridge Contributors
// SPDX-License-Identifier: Apache-2.0

//! Shared fixtures and chain mocks for unit tests.

use crate::executor::{ChainTxClient, SubmitError};
use crate::observer::{ChainReadError, SourceChainReader, TargetChainReader, TargetTxStatus};
use crate::registry::{AddressScheme, NetworkConfig, NetworkRegistry};
use crate::types::BridgeTransaction;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A two-network registry matching [`sample_transfer`]: "xrpl" at 1000 ppm
/// with 3 confirmations, "evm-side" at 500 ppm with 2.
pub fn test_registry() -> NetworkRegistry {
    NetworkRegistry::new(vec![
        NetworkConfig {
            name: "xrpl".to_string(),
            asset_symbol: "XRP".to_string(),
            address_scheme: AddressScheme::Ledger,
            rpc_url: "http://localhost:0".to_string(),
            min_confirmations: 3,
            fee_rate_micros: 1_000,
            min_transfer_amount: 10,
            max_transfer_amount: 1_000_000,
            poll_interval_ms: 25,
        },
        NetworkConfig {
            name: "evm-side".to_string(),
            asset_symbol: "wXRP".to_string(),
            address_scheme: AddressScheme::Evm,
            rpc_url: "http://localhost:0".to_string(),
            min_confirmations: 2,
            fee_rate_micros: 500,
            min_transfer_amount: 10,
            max_transfer_amount: 1_000_000,
            poll_interval_ms: 25,
        },
    ])
    .expect("test registry is valid")
}

/// A well-formed transfer between the two networks the tests use: 1000 units
/// at 1000 ppm (fee 1, net 999), 3 required confirmations.
pub fn sample_transfer() -> BridgeTransaction {
    BridgeTransaction::new(
        "xrpl".to_string(),
        "evm-side".to_string(),
        "rSender111111111111111111".to_string(),
        "0x00112233445566778899aabbccddeeff00112233".to_string(),
        "XRP".to_string(),
        1_000,
        1,
        1_000,
        3,
    )
}

/// Scriptable [`SourceChainReader`]. Unknown hashes read as disappeared
/// (`Ok(None)`).
#[derive(Debug, Clone)]
pub struct MockSourceReader {
    network: String,
    inner: Arc<Mutex<MockSourceState>>,
}

#[derive(Debug, Default)]
struct MockSourceState {
    confirmations: HashMap<String, u64>,
    failures_remaining: u32,
}

impl MockSourceReader {
    pub fn new(network: &str) -> Self {
        Self {
            network: network.to_string(),
            inner: Arc::new(Mutex::new(MockSourceState::default())),
        }
    }

    pub fn set_confirmations(&self, tx_hash: &str, confirmations: u64) {
        self.inner
            .lock()
            .unwrap()
            .confirmations
            .insert(tx_hash.to_string(), confirmations);
    }

    /// Make the next `n` reads fail with an RPC error.
    pub fn fail_next(&self, n: u32) {
        self.inner.lock().unwrap().failures_remaining = n;
    }
}

#[async_trait]
impl SourceChainReader for MockSourceReader {
    async fn lock_confirmations(&self, tx_hash: &str) -> Result<Option<u64>, ChainReadError> {
        let mut state = self.inner.lock().unwrap();
        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return Err(ChainReadError::Rpc("injected failure".to_string()));
        }
        Ok(state.confirmations.get(tx_hash).copied())
    }

    fn network(&self) -> &str {
        &self.network
    }
}

/// Scriptable [`TargetChainReader`]. Unknown hashes read as `NotFound`.
#[derive(Debug, Clone)]
pub struct MockTargetReader {
    network: String,
    statuses: Arc<Mutex<HashMap<String, TargetTxStatus>>>,
}

impl MockTargetReader {
    pub fn new(network: &str) -> Self {
        Self {
            network: network.to_string(),
            statuses: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn set_status(&self, tx_hash: &str, status: TargetTxStatus) {
        self.statuses
            .lock()
            .unwrap()
            .insert(tx_hash.to_string(), status);
    }
}

#[async_trait]
impl TargetChainReader for MockTargetReader {
    async fn mint_status(&self, tx_hash: &str) -> Result<TargetTxStatus, ChainReadError> {
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .get(tx_hash)
            .copied()
            .unwrap_or(TargetTxStatus::NotFound))
    }

    fn network(&self) -> &str {
        &self.network
    }
}

/// Scriptable [`ChainTxClient`] counting submissions. Clones share state so a
/// test can keep a handle after handing the client to an executor.
#[derive(Debug, Clone)]
pub struct MockChainClient {
    network: String,
    inner: Arc<Mutex<MockClientState>>,
}

#[derive(Debug)]
struct MockClientState {
    mint_result: Result<String, SubmitError>,
    unlock_result: Result<String, SubmitError>,
    transient_mint_failures: u32,
    mint_attempts: usize,
    unlock_attempts: usize,
}

impl MockChainClient {
    pub fn new(network: &str) -> Self {
        Self {
            network: network.to_string(),
            inner: Arc::new(Mutex::new(MockClientState {
                mint_result: Ok("0xmock-mint".to_string()),
                unlock_result: Ok("mock-unlock".to_string()),
                transient_mint_failures: 0,
                mint_attempts: 0,
                unlock_attempts: 0,
            })),
        }
    }

    pub fn set_mint_result(&self, result: Result<String, SubmitError>) {
        self.inner.lock().unwrap().mint_result = result;
    }

    pub fn set_unlock_result(&self, result: Result<String, SubmitError>) {
        self.inner.lock().unwrap().unlock_result = result;
    }

    /// Make the next `n` mint submissions fail transiently before the
    /// configured result applies.
    pub fn fail_mints_transiently(&self, n: u32) {
        self.inner.lock().unwrap().transient_mint_failures = n;
    }

    pub fn mint_attempts(&self) -> usize {
        self.inner.lock().unwrap().mint_attempts
    }

    pub fn unlock_attempts(&self) -> usize {
        self.inner.lock().unwrap().unlock_attempts
    }
}

#[async_trait]
impl ChainTxClient for MockChainClient {
    async fn submit_mint(&self, _transfer: &BridgeTransaction) -> Result<String, SubmitError> {
        let mut state = self.inner.lock().unwrap();
        state.mint_attempts += 1;
        if state.transient_mint_failures > 0 {
            state.transient_mint_failures -= 1;
            return Err(SubmitError::Transient("injected outage".to_string()));
        }
        state.mint_result.clone()
    }

    async fn submit_unlock(&self, _transfer: &BridgeTransaction) -> Result<String, SubmitError> {
        let mut state = self.inner.lock().unwrap();
        state.unlock_attempts += 1;
        state.unlock_result.clone()
    }

    fn network(&self) -> &str {
        &self.network
    }
}
