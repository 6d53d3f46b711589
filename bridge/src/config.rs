// Copyright (c) Meridian Bridge Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::registry::NetworkConfig;
use meridian_bridge_config::Config;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// On-disk configuration of a bridge node. Loaded from YAML or JSON via
/// [`Config`].
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct BridgeNodeConfig {
    // The port the REST server listens on.
    pub server_listen_port: u16,
    // The port for the metrics server.
    pub metrics_port: u16,
    // Directory for the embedded transfer database.
    pub db_path: PathBuf,
    // The networks this node bridges between. At least two.
    pub networks: Vec<NetworkConfig>,
    // Per-submission retry budget for mint/unlock, in seconds.
    #[serde(default = "default_submit_retry_secs")]
    pub submit_retry_secs: u64,
    // Capacity of the notification broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_submit_retry_secs() -> u64 {
    120
}

fn default_event_capacity() -> usize {
    1024
}

impl BridgeNodeConfig {
    pub fn submit_retry_budget(&self) -> Duration {
        Duration::from_secs(self.submit_retry_secs)
    }
}

impl Config for BridgeNodeConfig {}
