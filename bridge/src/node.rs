// Copyright (c) Meridian Bridge Contributors
// SPDX-License-Identifier: Apache-2.0

//! Node assembly: wire the store, registry, observers, coordinator,
//! executor and REST server together from a [`BridgeNodeConfig`].

use crate::chains::JsonRpcChainClient;
use crate::config::BridgeNodeConfig;
use crate::coordinator::TransferCoordinator;
use crate::events::EventBus;
use crate::executor::{ChainTxClient, MintReleaseExecutor};
use crate::metrics::BridgeMetrics;
use crate::observer::LedgerObserver;
use crate::registry::NetworkRegistry;
use crate::server::handler::TransferRequestHandler;
use crate::server::{run_server, BridgeNodePublicMetadata};
use crate::storage::SledStore;
use anyhow::Context;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

const REPORT_CHANNEL_CAPACITY: usize = 1024;

pub async fn run_bridge_node(
    config: BridgeNodeConfig,
    metadata: BridgeNodePublicMetadata,
    prometheus_registry: prometheus::Registry,
    shutdown: CancellationToken,
) -> anyhow::Result<JoinHandle<()>> {
    anyhow::ensure!(
        config.networks.len() >= 2,
        "a bridge node needs at least two networks, got {}",
        config.networks.len()
    );

    let metrics = Arc::new(BridgeMetrics::new(&prometheus_registry));
    let registry = Arc::new(NetworkRegistry::new(config.networks.clone())?);
    let store = Arc::new(
        SledStore::open(&config.db_path)
            .with_context(|| format!("opening transfer db at {}", config.db_path.display()))?,
    );

    // One RPC client per network, shared between the executor and observers.
    let mut rpc_clients = HashMap::new();
    for network in &config.networks {
        rpc_clients.insert(
            network.name.clone(),
            Arc::new(JsonRpcChainClient::new(&network.rpc_url, &network.name)),
        );
    }
    let tx_clients: HashMap<String, Arc<dyn ChainTxClient>> = rpc_clients
        .iter()
        .map(|(name, client)| (name.clone(), client.clone() as Arc<dyn ChainTxClient>))
        .collect();

    let executor = Arc::new(MintReleaseExecutor::new(
        tx_clients,
        store.clone(),
        metrics.clone(),
        config.submit_retry_budget(),
    ));
    let coordinator = Arc::new(TransferCoordinator::new(
        registry.clone(),
        store.clone(),
        store.clone(),
        executor,
        EventBus::new(config.event_capacity),
        metrics.clone(),
    ));

    // Replay persisted state before accepting traffic or reports.
    coordinator.recover().await?;

    let (report_tx, report_rx) = mpsc::channel(REPORT_CHANNEL_CAPACITY);
    for network in &config.networks {
        let client = rpc_clients
            .get(&network.name)
            .expect("client built for every configured network")
            .clone();
        let observer = LedgerObserver::new(
            network.name.clone(),
            Duration::from_millis(network.poll_interval_ms),
            client.clone(),
            client,
            store.clone(),
            report_tx.clone(),
        );
        observer.spawn(shutdown.clone());
    }
    drop(report_tx);
    tokio::spawn(coordinator.clone().run(report_rx, shutdown.clone()));

    let socket_address = SocketAddr::new(
        IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
        config.server_listen_port,
    );
    let handler = Arc::new(TransferRequestHandler::new(coordinator, registry));
    info!(
        port = config.server_listen_port,
        networks = config.networks.len(),
        "bridge node starting"
    );
    Ok(run_server(
        &socket_address,
        handler,
        metrics,
        Arc::new(metadata),
    ))
}
