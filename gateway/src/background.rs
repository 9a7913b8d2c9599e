//! Background maintenance for the gateway.

use crate::config::TTL_SWEEP_INTERVAL_SECS;
use crate::state::AppState;
use std::time::Duration;

/// Sweep expired registry entries and blacklist entries, and refresh the
/// liveness gauges. Runs for the life of the process.
pub async fn maintenance_loop(state: AppState) {
    let mut interval = tokio::time::interval(Duration::from_secs(TTL_SWEEP_INTERVAL_SECS));
    loop {
        interval.tick().await;
        state.registry.evict_expired();
        state
            .metrics
            .tracked_stores
            .set(state.registry.tracked_stores() as i64);
        state
            .metrics
            .offline_peers
            .set(state.registry.offline_count() as i64);
    }
}

/// Install the per-store periodic refresh on first sighting of a store.
/// Idempotent; at most one refresh task exists per store.
pub fn install_store_refresh(state: &AppState, store_id: &str) {
    state
        .registry
        .install_periodic_refresh(state.oracle.clone(), store_id);
}
