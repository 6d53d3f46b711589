// Copyright (c) Meridian Bridge Contributors
// SPDX-License-Identifier: Apache-2.0

//! REST surface of the bridge node.

use crate::error::BridgeError;
use crate::metrics::BridgeMetrics;
use crate::server::handler::{FeeSchedule, LockRequest, NetworkInfo, TransferRequestHandlerTrait};
use crate::types::{BridgeTransaction, TransferId};
use crate::with_metrics;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, instrument};

pub mod handler;

pub const HEALTH_PATH: &str = "/health";
pub const PING_PATH: &str = "/ping";
pub const NETWORKS_PATH: &str = "/bridge/networks";
pub const TRANSFER_PATH: &str = "/bridge/transfer";
pub const TRANSFERS_LIST_PATH: &str = "/bridge/transfers";
pub const FEES_PATH: &str = "/bridge/fees";
// :param syntax for axum 0.7.x
pub const STATUS_PATH: &str = "/bridge/status/:id";
pub const LOCK_PATH: &str = "/bridge/lock/:id";
pub const CANCEL_PATH: &str = "/bridge/cancel/:id";
pub const REFUND_PATH: &str = "/bridge/refund/:id";

/// Public node metadata served on `/ping`.
#[derive(Clone, serde::Serialize)]
pub struct BridgeNodePublicMetadata {
    pub version: &'static str,
}

impl BridgeNodePublicMetadata {
    pub fn new(version: &'static str) -> Self {
        Self { version }
    }

    pub fn empty_for_testing() -> Self {
        Self { version: "testing" }
    }
}

pub fn run_server(
    socket_address: &SocketAddr,
    handler: Arc<impl TransferRequestHandlerTrait + Sync + Send + 'static>,
    metrics: Arc<BridgeMetrics>,
    metadata: Arc<BridgeNodePublicMetadata>,
) -> tokio::task::JoinHandle<()> {
    let socket_address = *socket_address;
    tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(socket_address).await.unwrap();
        info!(address = %socket_address, "REST server listening");
        axum::serve(
            listener,
            make_router(handler, metrics, metadata).into_make_service(),
        )
        .await
        .unwrap();
    })
}

pub(crate) fn make_router(
    handler: Arc<impl TransferRequestHandlerTrait + Sync + Send + 'static>,
    metrics: Arc<BridgeMetrics>,
    metadata: Arc<BridgeNodePublicMetadata>,
) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route(HEALTH_PATH, get(health_check))
        .route(PING_PATH, get(ping))
        .route(NETWORKS_PATH, get(list_networks))
        .route(TRANSFER_PATH, post(initiate_transfer))
        .route(TRANSFERS_LIST_PATH, get(list_transfers))
        .route(FEES_PATH, get(fee_schedule))
        .route(STATUS_PATH, get(transfer_status))
        .route(LOCK_PATH, post(record_lock))
        .route(CANCEL_PATH, post(cancel_transfer))
        .route(REFUND_PATH, post(refund_transfer))
        .with_state((handler, metrics, metadata))
}

impl axum::response::IntoResponse for BridgeError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            BridgeError::Validation(_) | BridgeError::AmountTooSmall { .. } => {
                StatusCode::BAD_REQUEST
            }
            BridgeError::TransferNotFound(_) => StatusCode::NOT_FOUND,
            BridgeError::InvalidState { .. } | BridgeError::DuplicateClaim { .. } => {
                StatusCode::CONFLICT
            }
            BridgeError::NetworkUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            BridgeError::TargetRevert(_) => StatusCode::BAD_GATEWAY,
            BridgeError::ConfirmationReset(_)
            | BridgeError::Storage(_)
            | BridgeError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({
            "error": self.to_string(),
            "error_type": self.error_type(),
        });
        (status, Json(body)).into_response()
    }
}

type ServerState<H> = State<(Arc<H>, Arc<BridgeMetrics>, Arc<BridgeNodePublicMetadata>)>;

async fn health_check() -> StatusCode {
    StatusCode::OK
}

async fn ping<H: TransferRequestHandlerTrait + Sync + Send>(
    State((_, _, metadata)): ServerState<H>,
) -> Json<BridgeNodePublicMetadata> {
    Json(metadata.as_ref().clone())
}

async fn list_networks<H: TransferRequestHandlerTrait + Sync + Send>(
    State((handler, metrics, _)): ServerState<H>,
) -> Result<Json<Vec<NetworkInfo>>, BridgeError> {
    with_metrics!(metrics, "list_networks", async {
        handler.networks().await.map(Json)
    })
    .await
}

#[instrument(level = "error", skip_all)]
async fn initiate_transfer<H: TransferRequestHandlerTrait + Sync + Send>(
    State((handler, metrics, _)): ServerState<H>,
    Json(request): Json<crate::coordinator::TransferRequest>,
) -> Result<(StatusCode, Json<BridgeTransaction>), BridgeError> {
    with_metrics!(metrics, "initiate_transfer", async {
        let transfer = handler.initiate(request).await?;
        Ok::<_, BridgeError>((StatusCode::CREATED, Json(transfer)))
    })
    .await
}

async fn list_transfers<H: TransferRequestHandlerTrait + Sync + Send>(
    State((handler, metrics, _)): ServerState<H>,
) -> Result<Json<Vec<BridgeTransaction>>, BridgeError> {
    with_metrics!(metrics, "list_transfers", async {
        handler.active_transfers().await.map(Json)
    })
    .await
}

/// Query string of `GET /bridge/fees`.
#[derive(serde::Deserialize)]
struct FeePairQuery {
    source: String,
    target: String,
}

async fn fee_schedule<H: TransferRequestHandlerTrait + Sync + Send>(
    Query(pair): Query<FeePairQuery>,
    State((handler, metrics, _)): ServerState<H>,
) -> Result<Json<FeeSchedule>, BridgeError> {
    with_metrics!(metrics, "fee_schedule", async {
        handler
            .fee_schedule(&pair.source, &pair.target)
            .await
            .map(Json)
    })
    .await
}

#[instrument(level = "error", skip_all, fields(transfer_id = %id))]
async fn transfer_status<H: TransferRequestHandlerTrait + Sync + Send>(
    Path(id): Path<String>,
    State((handler, metrics, _)): ServerState<H>,
) -> Result<Json<BridgeTransaction>, BridgeError> {
    with_metrics!(metrics, "transfer_status", async {
        handler
            .get_transfer(&TransferId::from_raw(id))
            .await
            .map(Json)
    })
    .await
}

#[instrument(level = "error", skip_all, fields(transfer_id = %id))]
async fn record_lock<H: TransferRequestHandlerTrait + Sync + Send>(
    Path(id): Path<String>,
    State((handler, metrics, _)): ServerState<H>,
    Json(request): Json<LockRequest>,
) -> Result<Json<BridgeTransaction>, BridgeError> {
    with_metrics!(metrics, "record_lock", async {
        handler
            .record_lock(&TransferId::from_raw(id), &request.source_tx_hash)
            .await
            .map(Json)
    })
    .await
}

#[instrument(level = "error", skip_all, fields(transfer_id = %id))]
async fn cancel_transfer<H: TransferRequestHandlerTrait + Sync + Send>(
    Path(id): Path<String>,
    State((handler, metrics, _)): ServerState<H>,
) -> Result<Json<BridgeTransaction>, BridgeError> {
    with_metrics!(metrics, "cancel_transfer", async {
        handler.cancel(&TransferId::from_raw(id)).await.map(Json)
    })
    .await
}

#[instrument(level = "error", skip_all, fields(transfer_id = %id))]
async fn refund_transfer<H: TransferRequestHandlerTrait + Sync + Send>(
    Path(id): Path<String>,
    State((handler, metrics, _)): ServerState<H>,
) -> Result<Json<BridgeTransaction>, BridgeError> {
    with_metrics!(metrics, "refund_transfer", async {
        handler.refund(&TransferId::from_raw(id)).await.map(Json)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::{TransferCoordinator, TransferRequest};
    use crate::events::EventBus;
    use crate::executor::{ChainTxClient, MintReleaseExecutor};
    use crate::server::handler::TransferRequestHandler;
    use crate::storage::SledStore;
    use crate::test_utils::{test_registry, MockChainClient};
    use crate::types::TransferStatus;
    use std::collections::HashMap;
    use std::time::Duration;

    async fn spawn_test_server() -> (SocketAddr, Arc<TransferCoordinator>) {
        let registry = Arc::new(test_registry());
        let store = Arc::new(SledStore::open_temporary().unwrap());
        let mut clients: HashMap<String, Arc<dyn ChainTxClient>> = HashMap::new();
        clients.insert(
            "xrpl".to_string(),
            Arc::new(MockChainClient::new("xrpl")),
        );
        clients.insert(
            "evm-side".to_string(),
            Arc::new(MockChainClient::new("evm-side")),
        );
        let metrics = Arc::new(BridgeMetrics::new_for_testing());
        let executor = Arc::new(MintReleaseExecutor::new(
            clients,
            store.clone(),
            metrics.clone(),
            Duration::from_secs(1),
        ));
        let coordinator = Arc::new(TransferCoordinator::new(
            registry.clone(),
            store.clone(),
            store,
            executor,
            EventBus::default(),
            metrics.clone(),
        ));
        let handler = Arc::new(TransferRequestHandler::new(coordinator.clone(), registry));

        let host = meridian_bridge_config::local_ip_utils::localhost_for_testing();
        let port = meridian_bridge_config::local_ip_utils::get_available_port(&host);
        let addr = SocketAddr::new(host, port);
        run_server(
            &addr,
            handler,
            metrics,
            Arc::new(BridgeNodePublicMetadata::empty_for_testing()),
        );
        // Give the listener a moment to bind.
        tokio::time::sleep(Duration::from_millis(50)).await;
        (addr, coordinator)
    }

    fn sample_request() -> TransferRequest {
        TransferRequest {
            source_network: "xrpl".to_string(),
            target_network: "evm-side".to_string(),
            source_address: "rSender111111111111111111".to_string(),
            target_address: "0x00112233445566778899aabbccddeeff00112233".to_string(),
            token: "XRP".to_string(),
            amount: 1_000,
        }
    }

    #[tokio::test]
    async fn test_health_and_ping() {
        let (addr, _) = spawn_test_server().await;
        let client = reqwest::Client::new();
        let resp = client
            .get(format!("http://{addr}/health"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);

        let resp = client
            .get(format!("http://{addr}/ping"))
            .send()
            .await
            .unwrap();
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["version"], "testing");
    }

    #[tokio::test]
    async fn test_transfer_lifecycle_over_rest() {
        let (addr, _) = spawn_test_server().await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("http://{addr}/bridge/transfer"))
            .json(&sample_request())
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::CREATED);
        let created: BridgeTransaction = resp.json().await.unwrap();
        assert_eq!(created.status, TransferStatus::Initiated);
        assert_eq!(created.fee_amount, 1);

        let resp = client
            .post(format!("http://{addr}/bridge/lock/{}", created.id))
            .json(&LockRequest {
                source_tx_hash: "LOCK1".to_string(),
            })
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        let locked: BridgeTransaction = resp.json().await.unwrap();
        assert_eq!(locked.status, TransferStatus::Locked);

        let resp = client
            .get(format!("http://{addr}/bridge/status/{}", created.id))
            .send()
            .await
            .unwrap();
        let fetched: BridgeTransaction = resp.json().await.unwrap();
        assert_eq!(fetched.source_tx_hash.as_deref(), Some("LOCK1"));

        let resp = client
            .get(format!("http://{addr}/bridge/transfers"))
            .send()
            .await
            .unwrap();
        let active: Vec<BridgeTransaction> = resp.json().await.unwrap();
        assert_eq!(active.len(), 1);
    }

    #[tokio::test]
    async fn test_error_mapping() {
        let (addr, _) = spawn_test_server().await;
        let client = reqwest::Client::new();

        // Unknown transfer: 404 with a machine-readable error type.
        let resp = client
            .get(format!("http://{addr}/bridge/status/tf-missing"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["error_type"], "transfer_not_found");

        // Bad request body: 400.
        let mut bad = sample_request();
        bad.amount = 1;
        let resp = client
            .post(format!("http://{addr}/bridge/transfer"))
            .json(&bad)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_cancel_conflicts_after_lock() {
        let (addr, coordinator) = spawn_test_server().await;
        let client = reqwest::Client::new();
        let transfer = coordinator.initiate(sample_request()).await.unwrap();
        coordinator
            .record_lock(&transfer.id, "LOCK9")
            .await
            .unwrap();

        let resp = client
            .post(format!("http://{addr}/bridge/cancel/{}", transfer.id))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::CONFLICT);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["error_type"], "invalid_state");
    }

    #[tokio::test]
    async fn test_fee_schedule_echoes_registry_values() {
        let (addr, _) = spawn_test_server().await;
        let resp = reqwest::get(format!(
            "http://{addr}/bridge/fees?source=xrpl&target=evm-side"
        ))
        .await
        .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        let schedule: FeeSchedule = resp.json().await.unwrap();
        assert_eq!(schedule.fee_rate_micros, 1_000);
        assert_eq!(schedule.required_confirmations, 3);

        // Unknown pair: validation error.
        let resp = reqwest::get(format!(
            "http://{addr}/bridge/fees?source=xrpl&target=solana"
        ))
        .await
        .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_networks_listing_excludes_rpc_urls() {
        let (addr, _) = spawn_test_server().await;
        let resp = reqwest::get(format!("http://{addr}/bridge/networks")).await.unwrap();
        let body: serde_json::Value = resp.json().await.unwrap();
        let networks = body.as_array().unwrap();
        assert_eq!(networks.len(), 2);
        assert!(networks.iter().all(|n| n.get("rpc_url").is_none()));
        assert!(networks
            .iter()
            .any(|n| n["name"] == "xrpl" && n["fee_rate_micros"] == 1_000));
    }
}
