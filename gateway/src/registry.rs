//! Per-store peer registry with live health statistics.
//!
//! # Concurrency Model
//!
//! The registry is read-mostly. Store entries are immutable snapshots
//! behind `Arc`; a seed builds the full peer list first and swaps the map
//! entry in one `DashMap::insert`, so readers observe either the old list
//! in full or the new list in full. Per-peer statistics are atomics updated
//! from request handlers; the selection policy tolerates the small
//! cross-field inconsistencies relaxed ordering allows.
//!
//! # Lifetimes
//!
//! - Store entries: evicted after 10 minutes untouched (background sweep).
//! - Offline peers: excluded for 5 minutes per insertion; checked lazily on
//!   read and swept in the background.
//! - Refresh timers: one per store, installed lazily, never cancelled.
//!
//! Active-connection counters are keyed by ip and deliberately outlive
//! registry entries; the map is bounded by the network size.

use crate::config::{
    OFFLINE_FAILURE_THRESHOLD, OFFLINE_TTL_MS, PEER_SAMPLE_SIZE, PERIODIC_REFRESH_SECS,
    REGISTRY_TTL_MS, WEIGHT_INITIAL, WEIGHT_MAX, WEIGHT_MIN,
};
use crate::metrics::Metrics;
use crate::oracle::ChainOracle;
use common::{Epoch, now_millis};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Health and latency statistics for one (store, ip) pair.
///
/// `failure_count` counts consecutive failures and resets on success; the
/// third consecutive failure blacklists the ip. The weight walks one step
/// per outcome within `[WEIGHT_MIN, WEIGHT_MAX]`.
pub struct PeerInfo {
    pub ip: String,
    weight: AtomicU32,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    total_requests: AtomicU64,
    total_latency_ms: AtomicU64,
    last_check: AtomicU64,
    last_failure: AtomicU64,
}

impl PeerInfo {
    fn new(ip: String) -> Self {
        Self {
            ip,
            weight: AtomicU32::new(WEIGHT_INITIAL),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            total_requests: AtomicU64::new(0),
            total_latency_ms: AtomicU64::new(0),
            last_check: AtomicU64::new(0),
            last_failure: AtomicU64::new(0),
        }
    }

    pub fn weight(&self) -> u32 {
        self.weight.load(Ordering::Relaxed)
    }

    pub fn success_count(&self) -> u64 {
        self.success_count.load(Ordering::Relaxed)
    }

    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Relaxed)
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn last_check_ms(&self) -> u64 {
        self.last_check.load(Ordering::Relaxed)
    }

    pub fn last_failure_ms(&self) -> u64 {
        self.last_failure.load(Ordering::Relaxed)
    }

    /// Average latency of completed requests. Peers with no history rank
    /// last in latency comparisons but stay reachable through the
    /// weighted draw.
    pub fn avg_latency_ms(&self) -> f64 {
        let total = self.total_requests.load(Ordering::Relaxed);
        if total == 0 {
            f64::INFINITY
        } else {
            self.total_latency_ms.load(Ordering::Relaxed) as f64 / total as f64
        }
    }

    /// Fraction of completed requests that succeeded; 0 with no history.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_requests.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            self.success_count.load(Ordering::Relaxed) as f64 / total as f64
        }
    }
}

/// Peer population for one store, seeded at a specific epoch.
pub struct StoreEntry {
    pub peers: Vec<Arc<PeerInfo>>,
    pub epoch: Epoch,
    last_touched: AtomicU64,
}

impl StoreEntry {
    fn touch(&self) {
        self.last_touched.store(now_millis(), Ordering::Relaxed);
    }

    fn expired(&self, now: u64) -> bool {
        let touched = self.last_touched.load(Ordering::Relaxed);
        touched <= now && now - touched >= REGISTRY_TTL_MS
    }
}

/// Process-wide routing state: per-store peer caches, the offline set,
/// active-connection counters, the epoch last sampled under, and the
/// per-store refresh timer table.
pub struct PeerRegistry {
    stores: DashMap<String, Arc<StoreEntry>>,
    offline: DashMap<String, u64>,
    active: DashMap<String, u64>,
    refresh_timers: DashMap<String, ()>,
    current_epoch: parking_lot::Mutex<Option<Epoch>>,
    metrics: Metrics,
}

impl PeerRegistry {
    pub fn new(metrics: Metrics) -> Self {
        Self {
            stores: DashMap::new(),
            offline: DashMap::new(),
            active: DashMap::new(),
            refresh_timers: DashMap::new(),
            current_epoch: parking_lot::Mutex::new(None),
            metrics,
        }
    }

    /// Replace the store's peer population from a fresh oracle sample.
    ///
    /// Statistics start over (weight 5, counters 0) and active-connection
    /// counters for the sampled ips are zeroed. Oracle failure is logged
    /// and leaves any existing entry untouched.
    pub async fn seed(&self, oracle: &dyn ChainOracle, store_id: &str, epoch: Epoch) {
        let ips = match oracle.sample_current_epoch(store_id, PEER_SAMPLE_SIZE).await {
            Ok(ips) => ips,
            Err(err) => {
                warn!(store_id, error = %err, "Peer sample failed; keeping existing entry");
                return;
            }
        };

        let mut seen = HashSet::new();
        let mut peers = Vec::with_capacity(ips.len());
        for ip in ips {
            if seen.insert(ip.clone()) {
                peers.push(Arc::new(PeerInfo::new(ip)));
            }
        }

        for peer in &peers {
            self.active.insert(peer.ip.clone(), 0);
        }

        info!(
            store_id,
            peers = peers.len(),
            epoch = epoch.epoch,
            round = epoch.round,
            "Seeded peer registry"
        );
        self.metrics.registry_seeds.inc();

        self.stores.insert(
            store_id.to_string(),
            Arc::new(StoreEntry {
                peers,
                epoch,
                last_touched: AtomicU64::new(now_millis()),
            }),
        );
    }

    /// Re-seed the store if the network period moved on or the store has no
    /// entry yet. The epoch is a single process-wide value: one store's
    /// refresh can trigger another store's re-seed, which is intended —
    /// the epoch is network-wide.
    pub async fn refresh_if_needed(&self, oracle: &dyn ChainOracle, store_id: &str) {
        let fetched = match oracle.current_epoch().await {
            Ok(epoch) => epoch,
            Err(err) => {
                warn!(store_id, error = %err, "Epoch clock unreachable; skipping refresh");
                return;
            }
        };

        let needs_seed = {
            let mut current = self.current_epoch.lock();
            let epoch_changed = *current != Some(fetched);
            if epoch_changed {
                *current = Some(fetched);
            }
            epoch_changed || !self.stores.contains_key(store_id)
        };

        if needs_seed {
            self.seed(oracle, store_id, fetched).await;
        }
    }

    /// Live entry for the store, refreshing its TTL.
    pub fn entry(&self, store_id: &str) -> Option<Arc<StoreEntry>> {
        let entry = self.stores.get(store_id)?;
        entry.touch();
        Some(Arc::clone(entry.value()))
    }

    /// Record one completed request against a peer.
    pub fn adjust_stats(&self, peer: &PeerInfo, success: bool, latency_ms: u64) {
        let now = now_millis();
        peer.total_requests.fetch_add(1, Ordering::Relaxed);
        peer.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);

        if success {
            peer.success_count.fetch_add(1, Ordering::Relaxed);
            peer.failure_count.store(0, Ordering::Relaxed);
            let _ = peer
                .weight
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |w| {
                    Some((w + 1).min(WEIGHT_MAX))
                });
        } else {
            let failures = peer.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
            let _ = peer
                .weight
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |w| {
                    Some(w.saturating_sub(1).max(WEIGHT_MIN))
                });
            peer.last_failure.store(now, Ordering::Relaxed);
            if failures >= OFFLINE_FAILURE_THRESHOLD {
                self.mark_offline(&peer.ip);
            }
        }

        peer.last_check.store(now, Ordering::Relaxed);
    }

    /// Blacklist an ip for the offline TTL; re-insertion restarts the clock.
    pub fn mark_offline(&self, ip: &str) {
        info!(ip, "Peer blacklisted after repeated failures");
        self.offline.insert(ip.to_string(), now_millis());
    }

    /// Is the ip currently blacklisted? Expired entries are dropped here as
    /// well as by the background sweep.
    pub fn is_offline(&self, ip: &str) -> bool {
        let inserted = match self.offline.get(ip) {
            Some(entry) => *entry,
            None => return false,
        };
        let now = now_millis();
        if inserted <= now && now - inserted >= OFFLINE_TTL_MS {
            self.offline.remove(ip);
            return false;
        }
        true
    }

    pub fn connection_started(&self, ip: &str) {
        *self.active.entry(ip.to_string()).or_insert(0) += 1;
    }

    /// Decrement clamps at zero: a seed may have reset the counter while a
    /// request was in flight.
    pub fn connection_finished(&self, ip: &str) {
        if let Some(mut count) = self.active.get_mut(ip) {
            *count = count.saturating_sub(1);
        }
    }

    pub fn active_connections(&self, ip: &str) -> u64 {
        self.active.get(ip).map(|v| *v).unwrap_or(0)
    }

    /// Install the 30-minute background refresh for a store. Idempotent;
    /// the task lives for the rest of the process.
    pub fn install_periodic_refresh(self: &Arc<Self>, oracle: Arc<dyn ChainOracle>, store_id: &str) {
        match self.refresh_timers.entry(store_id.to_string()) {
            Entry::Occupied(_) => return,
            Entry::Vacant(slot) => {
                slot.insert(());
            }
        }

        let registry = Arc::clone(self);
        let store_id = store_id.to_string();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(PERIODIC_REFRESH_SECS));
            // The first tick completes immediately; the request that
            // installed the timer already refreshed.
            interval.tick().await;
            loop {
                interval.tick().await;
                debug!(store_id = %store_id, "Periodic peer refresh");
                registry.refresh_if_needed(oracle.as_ref(), &store_id).await;
            }
        });
    }

    pub fn has_refresh_timer(&self, store_id: &str) -> bool {
        self.refresh_timers.contains_key(store_id)
    }

    /// Drop idle store entries and expired blacklist entries.
    pub fn evict_expired(&self) {
        let now = now_millis();
        self.stores.retain(|store_id, entry| {
            let keep = !entry.expired(now);
            if !keep {
                debug!(store_id = %store_id, "Evicting idle registry entry");
            }
            keep
        });
        self.offline
            .retain(|_, inserted| *inserted > now || now - *inserted < OFFLINE_TTL_MS);
    }

    pub fn tracked_stores(&self) -> usize {
        self.stores.len()
    }

    pub fn offline_count(&self) -> usize {
        self.offline.len()
    }

    pub fn current_epoch(&self) -> Option<Epoch> {
        *self.current_epoch.lock()
    }

    /// Snapshot of all live entries, for the stats endpoint.
    pub fn store_entries(&self) -> Vec<(String, Arc<StoreEntry>)> {
        self.stores
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::testing::MockOracle;
    use std::sync::atomic::Ordering as AtomicOrdering;

    fn registry() -> Arc<PeerRegistry> {
        Arc::new(PeerRegistry::new(Metrics::new()))
    }

    fn store() -> String {
        "ab".repeat(32)
    }

    #[tokio::test]
    async fn seed_builds_fresh_peers_and_zeroes_active_connections() {
        let registry = registry();
        let oracle = MockOracle::new(Epoch { epoch: 1, round: 0 }, vec!["1.1.1.1", "2.2.2.2"]);
        registry.connection_started("1.1.1.1");
        registry.connection_started("1.1.1.1");

        registry
            .seed(&oracle, &store(), Epoch { epoch: 1, round: 0 })
            .await;

        let entry = registry.entry(&store()).unwrap();
        assert_eq!(entry.peers.len(), 2);
        assert_eq!(entry.epoch, Epoch { epoch: 1, round: 0 });
        for peer in &entry.peers {
            assert_eq!(peer.weight(), WEIGHT_INITIAL);
            assert_eq!(peer.total_requests(), 0);
        }
        assert_eq!(registry.active_connections("1.1.1.1"), 0);
    }

    #[tokio::test]
    async fn seed_deduplicates_sampled_ips() {
        let registry = registry();
        let oracle = MockOracle::new(
            Epoch { epoch: 1, round: 0 },
            vec!["1.1.1.1", "1.1.1.1", "2.2.2.2"],
        );
        registry
            .seed(&oracle, &store(), Epoch { epoch: 1, round: 0 })
            .await;
        assert_eq!(registry.entry(&store()).unwrap().peers.len(), 2);
    }

    #[tokio::test]
    async fn reseeding_keeps_ip_set_and_resets_statistics() {
        let registry = registry();
        let oracle = MockOracle::new(Epoch { epoch: 1, round: 0 }, vec!["1.1.1.1", "2.2.2.2"]);
        registry
            .seed(&oracle, &store(), Epoch { epoch: 1, round: 0 })
            .await;

        let peer = registry.entry(&store()).unwrap().peers[0].clone();
        registry.adjust_stats(&peer, true, 40);
        assert_eq!(peer.total_requests(), 1);

        registry
            .seed(&oracle, &store(), Epoch { epoch: 1, round: 0 })
            .await;
        let entry = registry.entry(&store()).unwrap();
        let ips: Vec<&str> = entry.peers.iter().map(|p| p.ip.as_str()).collect();
        assert_eq!(ips, vec!["1.1.1.1", "2.2.2.2"]);
        for peer in &entry.peers {
            assert_eq!(peer.total_requests(), 0);
            assert_eq!(peer.weight(), WEIGHT_INITIAL);
        }
    }

    #[tokio::test]
    async fn seed_failure_keeps_existing_entry() {
        let registry = registry();
        let oracle = MockOracle::new(Epoch { epoch: 1, round: 0 }, vec!["1.1.1.1"]);
        registry
            .seed(&oracle, &store(), Epoch { epoch: 1, round: 0 })
            .await;

        struct FailingOracle;
        #[async_trait::async_trait]
        impl ChainOracle for FailingOracle {
            async fn current_epoch(&self) -> anyhow::Result<Epoch> {
                anyhow::bail!("down")
            }
            async fn sample_current_epoch(
                &self,
                _: &str,
                _: usize,
            ) -> anyhow::Result<Vec<String>> {
                anyhow::bail!("down")
            }
            async fn fetch_root_hash(&self, _: &str) -> anyhow::Result<String> {
                anyhow::bail!("down")
            }
        }

        registry
            .seed(&FailingOracle, &store(), Epoch { epoch: 2, round: 0 })
            .await;
        let entry = registry.entry(&store()).unwrap();
        assert_eq!(entry.peers.len(), 1);
        assert_eq!(entry.epoch, Epoch { epoch: 1, round: 0 });
    }

    #[tokio::test]
    async fn refresh_seeds_on_first_sight_and_on_epoch_change() {
        let registry = registry();
        let oracle = MockOracle::new(Epoch { epoch: 1, round: 0 }, vec!["1.1.1.1"]);

        registry.refresh_if_needed(&oracle, &store()).await;
        assert_eq!(oracle.sample_calls.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(
            registry.current_epoch(),
            Some(Epoch { epoch: 1, round: 0 })
        );

        // Same epoch, entry present: no work.
        registry.refresh_if_needed(&oracle, &store()).await;
        assert_eq!(oracle.sample_calls.load(AtomicOrdering::SeqCst), 1);

        // Epoch advances: re-seed.
        oracle.set_epoch(Epoch { epoch: 1, round: 1 });
        registry.refresh_if_needed(&oracle, &store()).await;
        assert_eq!(oracle.sample_calls.load(AtomicOrdering::SeqCst), 2);
        assert_eq!(
            registry.current_epoch(),
            Some(Epoch { epoch: 1, round: 1 })
        );
    }

    #[tokio::test]
    async fn weight_stays_within_bounds() {
        let registry = registry();
        let peer = PeerInfo::new("1.1.1.1".to_string());
        for _ in 0..20 {
            registry.adjust_stats(&peer, true, 5);
        }
        assert_eq!(peer.weight(), WEIGHT_MAX);
        for _ in 0..20 {
            registry.adjust_stats(&peer, false, 5);
        }
        assert_eq!(peer.weight(), WEIGHT_MIN);
    }

    #[tokio::test]
    async fn success_resets_the_consecutive_failure_count() {
        let registry = registry();
        let peer = PeerInfo::new("1.1.1.1".to_string());
        registry.adjust_stats(&peer, false, 5);
        registry.adjust_stats(&peer, false, 5);
        registry.adjust_stats(&peer, true, 5);
        assert_eq!(peer.failure_count(), 0);
        // Two more failures do not reach the threshold again.
        registry.adjust_stats(&peer, false, 5);
        registry.adjust_stats(&peer, false, 5);
        assert!(!registry.is_offline("1.1.1.1"));
        registry.adjust_stats(&peer, false, 5);
        assert!(registry.is_offline("1.1.1.1"));
    }

    #[tokio::test]
    async fn third_consecutive_failure_blacklists_the_peer() {
        let registry = registry();
        let peer = PeerInfo::new("9.9.9.9".to_string());
        registry.adjust_stats(&peer, false, 10);
        registry.adjust_stats(&peer, false, 10);
        assert!(!registry.is_offline("9.9.9.9"));
        registry.adjust_stats(&peer, false, 10);
        assert!(registry.is_offline("9.9.9.9"));
        // Weight floor and blacklist are independent.
        assert!(peer.weight() >= WEIGHT_MIN);
    }

    #[tokio::test]
    async fn active_connections_never_go_negative() {
        let registry = registry();
        registry.connection_finished("1.1.1.1");
        assert_eq!(registry.active_connections("1.1.1.1"), 0);
        registry.connection_started("1.1.1.1");
        registry.connection_finished("1.1.1.1");
        registry.connection_finished("1.1.1.1");
        assert_eq!(registry.active_connections("1.1.1.1"), 0);
    }

    #[tokio::test]
    async fn at_most_one_refresh_timer_per_store() {
        let registry = registry();
        let oracle: Arc<dyn ChainOracle> = Arc::new(MockOracle::new(
            Epoch { epoch: 1, round: 0 },
            vec!["1.1.1.1"],
        ));
        registry.install_periodic_refresh(oracle.clone(), &store());
        registry.install_periodic_refresh(oracle.clone(), &store());
        assert!(registry.has_refresh_timer(&store()));
        assert_eq!(registry.refresh_timers.len(), 1);
    }

    #[tokio::test]
    async fn statistics_accumulate_latency_and_rates() {
        let registry = registry();
        let peer = PeerInfo::new("1.1.1.1".to_string());
        assert!(peer.avg_latency_ms().is_infinite());
        assert_eq!(peer.success_rate(), 0.0);

        registry.adjust_stats(&peer, true, 30);
        registry.adjust_stats(&peer, false, 10);
        assert_eq!(peer.total_requests(), 2);
        assert_eq!(peer.avg_latency_ms(), 20.0);
        assert_eq!(peer.success_rate(), 0.5);
        assert!(peer.last_check_ms() > 0);
        assert!(peer.last_failure_ms() > 0);
    }
}
