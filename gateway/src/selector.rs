//! Peer selection: a blended draw validated by head probes.
//!
//! Selection blends four signals. A weighted-random base draw keeps
//! exploration alive; three independent coin flips then each replace the
//! current choice with the least-connections, lowest-average-latency, or
//! best-success-rate peer. Under load the overrides dominate and traffic
//! concentrates on good peers; idle, the weighted base keeps probing the
//! rest of the population.
//!
//! The chosen peer must still prove it holds the addressed revision (and
//! key, when one is requested) before the proxy dispatches to it. A
//! definitive rejection counts as a failure against the peer, so a peer
//! failing probes during a storm blacklists itself after three in a row;
//! a probe that merely ran out its deadline leaves statistics untouched.
//! Failed candidates go into a tried set and selection repeats until a
//! peer validates or the population is exhausted.

use crate::metrics::Metrics;
use crate::probe::{ContentProbe, ProbeOutcome};
use crate::registry::{PeerInfo, PeerRegistry};
use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// A peer that passed head validation for a request.
pub struct SelectedPeer {
    pub peer: Arc<PeerInfo>,
    /// Whether the peer validated the requested key. When false the proxy
    /// forwards the store root and the client re-requests the key there.
    pub key_validated: bool,
}

/// Probability of each metric override replacing the current choice.
const OVERRIDE_PROBABILITY: f64 = 0.5;

fn weighted_draw<R: Rng + ?Sized>(rng: &mut R, peers: &[Arc<PeerInfo>]) -> usize {
    let total: u64 = peers.iter().map(|p| p.weight() as u64).sum();
    if total == 0 {
        return 0;
    }
    let mut ticket = rng.random_range(0..total);
    for (idx, peer) in peers.iter().enumerate() {
        let weight = peer.weight() as u64;
        if ticket < weight {
            return idx;
        }
        ticket -= weight;
    }
    peers.len() - 1
}

/// Index of the peer with the fewest in-flight requests; ties keep the
/// earliest registry position.
fn least_connections(registry: &PeerRegistry, peers: &[Arc<PeerInfo>]) -> usize {
    let mut best = 0;
    let mut best_active = registry.active_connections(&peers[0].ip);
    for (idx, peer) in peers.iter().enumerate().skip(1) {
        let active = registry.active_connections(&peer.ip);
        if active < best_active {
            best = idx;
            best_active = active;
        }
    }
    best
}

/// Index of the peer with the lowest average latency; unprobed peers rank
/// last, ties keep the earliest registry position.
fn lowest_avg_latency(peers: &[Arc<PeerInfo>]) -> usize {
    let mut best = 0;
    let mut best_latency = peers[0].avg_latency_ms();
    for (idx, peer) in peers.iter().enumerate().skip(1) {
        let latency = peer.avg_latency_ms();
        if latency < best_latency {
            best = idx;
            best_latency = latency;
        }
    }
    best
}

/// Index of the peer with the highest success rate; unprobed peers count
/// as 0, ties keep the earliest registry position.
fn best_success_rate(peers: &[Arc<PeerInfo>]) -> usize {
    let mut best = 0;
    let mut best_rate = peers[0].success_rate();
    for (idx, peer) in peers.iter().enumerate().skip(1) {
        let rate = peer.success_rate();
        if rate > best_rate {
            best = idx;
            best_rate = rate;
        }
    }
    best
}

/// One blended draw over the candidate list.
pub(crate) fn blended_pick<R: Rng + ?Sized>(
    rng: &mut R,
    registry: &PeerRegistry,
    peers: &[Arc<PeerInfo>],
) -> usize {
    let mut choice = weighted_draw(rng, peers);
    if rng.random_bool(OVERRIDE_PROBABILITY) {
        choice = least_connections(registry, peers);
    }
    if rng.random_bool(OVERRIDE_PROBABILITY) {
        choice = lowest_avg_latency(peers);
    }
    if rng.random_bool(OVERRIDE_PROBABILITY) {
        choice = best_success_rate(peers);
    }
    choice
}

/// Select-and-validate until a peer passes or every peer has been tried.
#[allow(clippy::too_many_arguments)]
async fn run_candidate_loop<R: Rng + ?Sized>(
    rng: &mut R,
    registry: &PeerRegistry,
    probe: &dyn ContentProbe,
    metrics: &Metrics,
    peers: &[Arc<PeerInfo>],
    chain: &str,
    store_id: &str,
    root_hash: &str,
    key: Option<&str>,
) -> Option<Arc<PeerInfo>> {
    let mut tried: HashSet<&str> = HashSet::new();

    while tried.len() < peers.len() {
        let mut idx = blended_pick(rng, registry, peers);
        if tried.contains(peers[idx].ip.as_str()) {
            // Redraw; after enough collisions take the first untried peer
            // so the loop stays bounded by the registry size.
            let mut attempts = 0;
            while tried.contains(peers[idx].ip.as_str()) {
                attempts += 1;
                if attempts > peers.len() {
                    idx = peers.iter().position(|p| !tried.contains(p.ip.as_str()))?;
                    break;
                }
                idx = blended_pick(rng, registry, peers);
            }
        }

        let peer = &peers[idx];
        let started = Instant::now();
        let outcome = match key {
            Some(key) => {
                probe
                    .head_key(&peer.ip, chain, store_id, root_hash, key)
                    .await
            }
            None => probe.head_store(&peer.ip, chain, store_id, root_hash).await,
        };

        match outcome {
            ProbeOutcome::Valid => return Some(peer.clone()),
            ProbeOutcome::Invalid => {
                debug!(ip = %peer.ip, store_id, key = ?key, "Peer rejected head validation");
                registry.adjust_stats(peer, false, started.elapsed().as_millis() as u64);
                metrics.validation_failures.inc();
            }
            ProbeOutcome::DeadlineExpired => {
                debug!(ip = %peer.ip, store_id, key = ?key, "Head probe timed out");
                metrics.validation_failures.inc();
            }
        }
        tried.insert(peer.ip.as_str());
    }

    None
}

/// Pick a validated peer for the request, or `None` when the registry is
/// empty (after blacklist exclusion) or every candidate failed validation.
#[allow(clippy::too_many_arguments)]
pub async fn select_peer<R: Rng + ?Sized>(
    rng: &mut R,
    registry: &PeerRegistry,
    probe: &dyn ContentProbe,
    metrics: &Metrics,
    chain: &str,
    store_id: &str,
    root_hash: &str,
    key: Option<&str>,
) -> Option<SelectedPeer> {
    let entry = registry.entry(store_id)?;
    let peers: Vec<Arc<PeerInfo>> = entry
        .peers
        .iter()
        .filter(|p| !registry.is_offline(&p.ip))
        .cloned()
        .collect();
    if peers.is_empty() {
        return None;
    }

    if let Some(key) = key {
        if let Some(peer) = run_candidate_loop(
            rng,
            registry,
            probe,
            metrics,
            &peers,
            chain,
            store_id,
            root_hash,
            Some(key),
        )
        .await
        {
            return Some(SelectedPeer {
                peer,
                key_validated: true,
            });
        }
        debug!(store_id, key, "No peer validated the key; retrying against the store root");
    }

    let peer = run_candidate_loop(
        rng, registry, probe, metrics, &peers, chain, store_id, root_hash, None,
    )
    .await?;
    Some(SelectedPeer {
        peer,
        key_validated: false,
    })
}
