//! # Prometheus Metrics
//!
//! Exposes operational metrics for the tangle node. Scraped by Prometheus
//! at the `/metrics` HTTP endpoint on the configured metrics port.
//!
//! All metrics are registered in a dedicated [`prometheus::Registry`] so they
//! do not collide with any default global registry consumers. Values are
//! sampled from the gossip engine by a background task in `main`.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

use tangle_protocol::ledger::TipIndex;
use tangle_protocol::network::{GossipStats, NeighborStats};

/// Holds all Prometheus metric handles for the node.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Transactions waiting to be stored.
    pub receive_queue: IntGauge,
    /// Transactions waiting to be sent to neighbors.
    pub broadcast_queue: IntGauge,
    /// Requests waiting for a reply.
    pub reply_queue: IntGauge,
    /// Hashes the node is still asking neighbors for.
    pub pending_requests: IntGauge,
    pub tips: IntGauge,
    pub solid_tips: IntGauge,
    pub neighbors: IntGauge,
    /// Transactions in the transaction partition.
    pub stored_transactions: IntGauge,
    /// Sum of the per-neighbor counters. Monotonic while the neighbor set
    /// is stable.
    pub received_transactions: IntGauge,
    pub new_transactions: IntGauge,
    pub invalid_transactions: IntGauge,
}

fn gauge(registry: &Registry, name: &str, help: &str) -> Result<IntGauge, prometheus::Error> {
    let gauge = IntGauge::new(name, help)?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("tangle".into()), None)?;

        Ok(Self {
            receive_queue: gauge(&registry, "receive_queue_size", "Transactions waiting to be stored")?,
            broadcast_queue: gauge(&registry, "broadcast_queue_size", "Transactions waiting to be broadcast")?,
            reply_queue: gauge(&registry, "reply_queue_size", "Requests waiting for a reply")?,
            pending_requests: gauge(&registry, "pending_requests", "Hashes still being requested from neighbors")?,
            tips: gauge(&registry, "tips", "Transactions nothing approves yet")?,
            solid_tips: gauge(&registry, "solid_tips", "Tips whose history is complete")?,
            neighbors: gauge(&registry, "neighbors", "Current number of neighbors")?,
            stored_transactions: gauge(&registry, "stored_transactions", "Transactions in storage")?,
            received_transactions: gauge(&registry, "received_transactions", "Transactions received from neighbors")?,
            new_transactions: gauge(&registry, "new_transactions", "Transactions stored for the first time")?,
            invalid_transactions: gauge(&registry, "invalid_transactions", "Transactions rejected as invalid")?,
            registry,
        })
    }

    /// Copies one sample of engine state into the gauges.
    pub fn observe(
        &self,
        stats: &GossipStats,
        neighbors: &[NeighborStats],
        tips: &TipIndex,
        stored_transactions: u64,
    ) {
        self.receive_queue.set(stats.receive_queue as i64);
        self.broadcast_queue.set(stats.broadcast_queue as i64);
        self.reply_queue.set(stats.reply_queue as i64);
        self.pending_requests.set(stats.pending_requests as i64);
        self.neighbors.set(stats.neighbors as i64);
        self.tips.set(tips.size() as i64);
        self.solid_tips.set(tips.solid_size() as i64);
        self.stored_transactions.set(stored_transactions as i64);

        let sum = |f: fn(&NeighborStats) -> u64| neighbors.iter().map(f).sum::<u64>() as i64;
        self.received_transactions.set(sum(|n| n.all_transactions));
        self.new_transactions.set(sum(|n| n.new_transactions));
        self.invalid_transactions.set(sum(|n| n.invalid_transactions));
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Shared metrics state passed to axum handlers.
pub type SharedMetrics = Arc<NodeMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
