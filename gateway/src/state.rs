//! Shared application state for HTTP handlers and background tasks.

use crate::metrics::Metrics;
use crate::oracle::ChainOracle;
use crate::probe::ContentProbe;
use crate::registry::PeerRegistry;
use std::sync::Arc;

/// Everything a request handler needs, owned by the server and passed
/// explicitly. The registry carries all routing state (peer caches,
/// offline set, active-connection counters, current epoch, timer table);
/// oracle and probe are the external collaborators behind trait objects;
/// the HTTP client is shared for upstream connection pooling.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<PeerRegistry>,
    pub oracle: Arc<dyn ChainOracle>,
    pub probe: Arc<dyn ContentProbe>,
    pub http_client: reqwest::Client,
    pub metrics: Metrics,
}
