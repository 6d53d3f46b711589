// Copyright (c) Meridian Bridge Contributors
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use meridian_bridge::config::BridgeNodeConfig;
use meridian_bridge::metrics::start_prometheus_server;
use meridian_bridge::node::run_bridge_node;
use meridian_bridge::server::BridgeNodePublicMetadata;
use meridian_bridge_config::Config;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[clap(rename_all = "kebab-case")]
#[clap(name = env!("CARGO_BIN_NAME"))]
#[clap(version = VERSION)]
struct Args {
    #[clap(long)]
    pub config_path: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = BridgeNodeConfig::load(&args.config_path)?;

    let metrics_address =
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), config.metrics_port);
    let prometheus_registry = prometheus::Registry::new();
    start_prometheus_server(metrics_address, prometheus_registry.clone());
    info!(port = config.metrics_port, "metrics server started");

    let shutdown = CancellationToken::new();
    let handle = run_bridge_node(
        config,
        BridgeNodePublicMetadata::new(VERSION),
        prometheus_registry,
        shutdown.clone(),
    )
    .await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            shutdown.cancel();
        }
        result = handle => {
            result.map_err(|e| anyhow::anyhow!("server task failed: {e}"))?;
        }
    }
    Ok(())
}
