//! Prometheus metrics for the gateway.
//!
//! All metrics are exported at the `/metrics` endpoint.
//!
//! # Key Metrics
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `gateway_requests_total` | Counter | Pipeline requests by outcome |
//! | `gateway_redirects_total` | Counter | 302s forcing canonical URLs |
//! | `gateway_registry_seeds_total` | Counter | Peer registry seeds |
//! | `gateway_peer_validation_failures_total` | Counter | Failed head probes |
//! | `gateway_proxy_duration_seconds` | Histogram | Upstream dispatch latency |
//! | `gateway_active_proxied_requests` | Gauge | In-flight upstream requests |
//! | `gateway_tracked_stores` | Gauge | Live registry entries |
//! | `gateway_offline_peers` | Gauge | Currently blacklisted peers |

use parking_lot::RwLock;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::sync::Arc;

/// Prometheus metrics collection for the gateway.
///
/// Uses `parking_lot::RwLock` for the registry so metric encoding never
/// blocks concurrent request handling.
#[derive(Clone)]
pub struct Metrics {
    pub registry: Arc<RwLock<Registry>>,
    pub requests: Family<[(String, String); 1], Counter>, // outcome
    pub redirects: Counter,
    pub registry_seeds: Counter,
    pub validation_failures: Counter,
    pub proxy_errors: Counter,
    pub proxy_duration: Histogram,
    pub active_proxied: Gauge,
    pub tracked_stores: Gauge,
    pub offline_peers: Gauge,
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let requests = Family::<[(String, String); 1], Counter>::default();
        registry.register(
            "gateway_requests_total",
            "Pipeline requests handled, by outcome",
            requests.clone(),
        );

        let redirects = Counter::default();
        registry.register(
            "gateway_redirects_total",
            "Redirects issued to force canonical URLs",
            redirects.clone(),
        );

        let registry_seeds = Counter::default();
        registry.register(
            "gateway_registry_seeds_total",
            "Peer registry seeds from the oracle",
            registry_seeds.clone(),
        );

        let validation_failures = Counter::default();
        registry.register(
            "gateway_peer_validation_failures_total",
            "Head probes that rejected a candidate peer",
            validation_failures.clone(),
        );

        let proxy_errors = Counter::default();
        registry.register(
            "gateway_proxy_errors_total",
            "Upstream requests that failed outright",
            proxy_errors.clone(),
        );

        let proxy_duration = Histogram::new(exponential_buckets(0.005, 2.0, 12));
        registry.register(
            "gateway_proxy_duration_seconds",
            "Time from upstream dispatch to response headers",
            proxy_duration.clone(),
        );

        let active_proxied = Gauge::default();
        registry.register(
            "gateway_active_proxied_requests",
            "Upstream requests currently in flight",
            active_proxied.clone(),
        );

        let tracked_stores = Gauge::default();
        registry.register(
            "gateway_tracked_stores",
            "Stores with a live peer registry entry",
            tracked_stores.clone(),
        );

        let offline_peers = Gauge::default();
        registry.register(
            "gateway_offline_peers",
            "Peers currently excluded by the blacklist",
            offline_peers.clone(),
        );

        Self {
            registry: Arc::new(RwLock::new(registry)),
            requests,
            redirects,
            registry_seeds,
            validation_failures,
            proxy_errors,
            proxy_duration,
            active_proxied,
            tracked_stores,
            offline_peers,
        }
    }

    /// Count one pipeline request under the given outcome label.
    pub fn observe_request(&self, outcome: &str) {
        self.requests
            .get_or_create(&[("outcome".to_string(), outcome.to_string())])
            .inc();
    }

    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        let registry = self.registry.read();
        if let Err(e) = encode(&mut buffer, &registry) {
            tracing::error!(error = %e, "Failed to encode Prometheus metrics");
            return format!("# Error encoding metrics: {}", e);
        }
        buffer
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
