// Copyright (c) Meridian Bridge Contributors
// SPDX-License-Identifier: Apache-2.0

pub mod chains;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod executor;
pub mod fee;
pub mod metrics;
pub mod node;
pub mod observer;
pub mod registry;
pub mod server;
pub mod storage;
pub mod types;

#[cfg(test)]
pub mod test_utils;

/// Count a REST request's outcome on the shared metrics, by route.
#[macro_export]
macro_rules! with_metrics {
    ($metrics:expr, $route:expr, $func:expr) => {
        async {
            $metrics.requests_received.with_label_values(&[$route]).inc();
            let result = $func.await;
            match &result {
                Ok(_) => {
                    $metrics.requests_ok.with_label_values(&[$route]).inc();
                }
                Err(e) => {
                    tracing::info!(route = $route, error = %e, "request failed");
                    $metrics
                        .err_requests
                        .with_label_values(&[$route, e.error_type()])
                        .inc();
                }
            }
            result
        }
    };
}
