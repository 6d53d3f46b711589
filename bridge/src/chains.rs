// Copyright (c) Meridian Bridge Contributors
// SPDX-License-Identifier: Apache-2.0

//! JSON-RPC client for network adapters.
//!
//! Each supported network runs an adapter daemon exposing a small JSON-RPC
//! surface over HTTP: `bridge.lockConfirmations`, `bridge.txStatus`,
//! `bridge.submitMint` and `bridge.submitUnlock`. One [`JsonRpcChainClient`]
//! per network implements all three chain traits against it.

use crate::executor::{ChainTxClient, SubmitError};
use crate::observer::{ChainReadError, SourceChainReader, TargetChainReader, TargetTxStatus};
use crate::types::BridgeTransaction;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::debug;

#[derive(Clone, Debug)]
pub struct JsonRpcChainClient {
    http_client: reqwest::Client,
    rpc_url: String,
    network: String,
    request_id: Arc<AtomicU64>,
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    params: Vec<Value>,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// Adapter error codes that mean "the chain rejected this", as opposed to a
/// transport or adapter fault.
const REJECTION_CODE: i64 = -33000;

enum RpcFailure {
    Transport(String),
    Rejected(String),
}

fn shared_http_client() -> reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT
        .get_or_init(|| {
            reqwest::Client::builder()
                .pool_max_idle_per_host(64)
                .tcp_keepalive(Some(Duration::from_secs(30)))
                .connect_timeout(Duration::from_secs(2))
                .timeout(Duration::from_secs(30))
                .build()
                .expect("failed to build reqwest client")
        })
        .clone()
}

impl JsonRpcChainClient {
    pub fn new(rpc_url: impl Into<String>, network: impl Into<String>) -> Self {
        Self {
            http_client: shared_http_client(),
            rpc_url: rpc_url.into(),
            network: network.into(),
            request_id: Arc::new(AtomicU64::new(1)),
        }
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcFailure> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
            id,
        };
        debug!(network = %self.network, method, id, "adapter RPC call");

        let response = self
            .http_client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RpcFailure::Transport(e.to_string()))?;
        let parsed: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| RpcFailure::Transport(e.to_string()))?;

        if let Some(error) = parsed.error {
            if error.code == REJECTION_CODE {
                return Err(RpcFailure::Rejected(error.message));
            }
            return Err(RpcFailure::Transport(format!(
                "adapter error {}: {}",
                error.code, error.message
            )));
        }
        parsed
            .result
            .ok_or_else(|| RpcFailure::Transport("response carried neither result nor error".to_string()))
    }
}

impl From<RpcFailure> for ChainReadError {
    fn from(failure: RpcFailure) -> Self {
        match failure {
            RpcFailure::Transport(msg) => ChainReadError::Rpc(msg),
            RpcFailure::Rejected(msg) => ChainReadError::Rpc(msg),
        }
    }
}

impl From<RpcFailure> for SubmitError {
    fn from(failure: RpcFailure) -> Self {
        match failure {
            RpcFailure::Transport(msg) => SubmitError::Transient(msg),
            RpcFailure::Rejected(msg) => SubmitError::Rejected(msg),
        }
    }
}

#[async_trait]
impl SourceChainReader for JsonRpcChainClient {
    async fn lock_confirmations(&self, tx_hash: &str) -> Result<Option<u64>, ChainReadError> {
        let result = self
            .call("bridge.lockConfirmations", vec![json!(tx_hash)])
            .await?;
        // null means the transaction is not on the canonical chain.
        if result.is_null() {
            return Ok(None);
        }
        result
            .as_u64()
            .map(Some)
            .ok_or_else(|| ChainReadError::Malformed(format!("confirmation count: {result}")))
    }

    fn network(&self) -> &str {
        &self.network
    }
}

#[async_trait]
impl TargetChainReader for JsonRpcChainClient {
    async fn mint_status(&self, tx_hash: &str) -> Result<TargetTxStatus, ChainReadError> {
        let result = self.call("bridge.txStatus", vec![json!(tx_hash)]).await?;
        match result.as_str() {
            Some("pending") => Ok(TargetTxStatus::Pending),
            Some("finalized") => Ok(TargetTxStatus::Finalized),
            Some("reverted") => Ok(TargetTxStatus::Reverted),
            Some("not-found") => Ok(TargetTxStatus::NotFound),
            _ => Err(ChainReadError::Malformed(format!("tx status: {result}"))),
        }
    }

    fn network(&self) -> &str {
        &self.network
    }
}

#[async_trait]
impl ChainTxClient for JsonRpcChainClient {
    async fn submit_mint(&self, transfer: &BridgeTransaction) -> Result<String, SubmitError> {
        let result = self
            .call(
                "bridge.submitMint",
                vec![json!({
                    "transfer_id": transfer.id.as_str(),
                    "recipient": transfer.target_address,
                    "amount": transfer.net_amount,
                    "source_network": transfer.source_network,
                    "source_tx_hash": transfer.source_tx_hash,
                })],
            )
            .await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| SubmitError::Rejected(format!("malformed mint response: {result}")))
    }

    async fn submit_unlock(&self, transfer: &BridgeTransaction) -> Result<String, SubmitError> {
        let result = self
            .call(
                "bridge.submitUnlock",
                vec![json!({
                    "transfer_id": transfer.id.as_str(),
                    "recipient": transfer.source_address,
                    "amount": transfer.amount,
                    "lock_tx_hash": transfer.source_tx_hash,
                })],
            )
            .await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| SubmitError::Rejected(format!("malformed unlock response: {result}")))
    }

    fn network(&self) -> &str {
        &self.network
    }
}
