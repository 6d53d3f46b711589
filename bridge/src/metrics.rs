// Copyright (c) Meridian Bridge Contributors
// SPDX-License-Identifier: Apache-2.0

use prometheus::{
    register_int_counter_vec_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, IntCounter, IntCounterVec, IntGauge, Registry,
};

#[derive(Clone, Debug)]
pub struct BridgeMetrics {
    pub(crate) transfers_initiated: IntCounter,
    pub(crate) transfers_completed: IntCounter,
    pub(crate) transfers_refunded: IntCounter,
    pub(crate) transfers_failed: IntCounterVec,
    pub(crate) transfers_in_flight: IntGauge,

    pub(crate) confirmation_updates: IntCounter,
    pub(crate) confirmation_resets: IntCounter,
    pub(crate) duplicate_claims: IntCounter,

    pub(crate) executor_submissions: IntCounter,
    pub(crate) executor_reverts: IntCounter,

    pub(crate) requests_received: IntCounterVec,
    pub(crate) requests_ok: IntCounterVec,
    pub(crate) err_requests: IntCounterVec,
}

impl BridgeMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            transfers_initiated: register_int_counter_with_registry!(
                "bridge_transfers_initiated",
                "Total transfer requests accepted",
                registry,
            )
            .unwrap(),
            transfers_completed: register_int_counter_with_registry!(
                "bridge_transfers_completed",
                "Transfers that reached COMPLETED",
                registry,
            )
            .unwrap(),
            transfers_refunded: register_int_counter_with_registry!(
                "bridge_transfers_refunded",
                "Transfers that reached REFUNDED",
                registry,
            )
            .unwrap(),
            transfers_failed: register_int_counter_vec_with_registry!(
                "bridge_transfers_failed",
                "Transfers that reached FAILED, by reason",
                &["reason"],
                registry,
            )
            .unwrap(),
            transfers_in_flight: register_int_gauge_with_registry!(
                "bridge_transfers_in_flight",
                "Transfers in a non-terminal state",
                registry,
            )
            .unwrap(),
            confirmation_updates: register_int_counter_with_registry!(
                "bridge_confirmation_updates",
                "Confirmation reports applied",
                registry,
            )
            .unwrap(),
            confirmation_resets: register_int_counter_with_registry!(
                "bridge_confirmation_resets",
                "Reorg-driven confirmation resets",
                registry,
            )
            .unwrap(),
            duplicate_claims: register_int_counter_with_registry!(
                "bridge_duplicate_claims",
                "Idempotency claims rejected because another transfer owns the source event",
                registry,
            )
            .unwrap(),
            executor_submissions: register_int_counter_with_registry!(
                "bridge_executor_submissions",
                "Mint/release transactions submitted to target networks",
                registry,
            )
            .unwrap(),
            executor_reverts: register_int_counter_with_registry!(
                "bridge_executor_reverts",
                "Mint/release transactions rejected by the target chain",
                registry,
            )
            .unwrap(),
            requests_received: register_int_counter_vec_with_registry!(
                "bridge_requests_received",
                "REST requests received, by route",
                &["route"],
                registry,
            )
            .unwrap(),
            requests_ok: register_int_counter_vec_with_registry!(
                "bridge_requests_ok",
                "REST requests answered successfully, by route",
                &["route"],
                registry,
            )
            .unwrap(),
            err_requests: register_int_counter_vec_with_registry!(
                "bridge_err_requests",
                "REST requests that failed, by route and error type",
                &["route", "error_type"],
                registry,
            )
            .unwrap(),
        }
    }

    pub fn new_for_testing() -> Self {
        Self::new(&Registry::new())
    }
}

/// Serve the registry in prometheus text format on `GET /metrics`.
pub fn start_prometheus_server(
    address: std::net::SocketAddr,
    registry: Registry,
) -> tokio::task::JoinHandle<()> {
    use axum::routing::get;

    tokio::spawn(async move {
        let app = axum::Router::new()
            .route("/metrics", get(serve_metrics))
            .with_state(registry);
        let listener = tokio::net::TcpListener::bind(address).await.unwrap();
        axum::serve(listener, app.into_make_service()).await.unwrap();
    })
}

async fn serve_metrics(
    axum::extract::State(registry): axum::extract::State<Registry>,
) -> (axum::http::StatusCode, String) {
    let encoder = prometheus::TextEncoder::new();
    match encoder.encode_to_string(&registry.gather()) {
        Ok(body) => (axum::http::StatusCode::OK, body),
        Err(e) => (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {e}"),
        ),
    }
}
