//! Configuration constants for the gateway.
//!
//! Compile-time tunables used throughout the gateway. Runtime knobs
//! (listen port, worker count, oracle endpoint) live on the CLI `Args`
//! in `main.rs` with environment overrides.
//!
//! # Constant Categories
//!
//! - **Peer routing**: sample size, weight bounds, blacklist threshold
//! - **Deadlines**: head-probe and oracle timeouts
//! - **Lifetimes**: registry entry TTL, blacklist TTL, cookie expiry,
//!   periodic refresh cadence
//! - **Protocol**: peer content port, known chains, cookie name

/// Default listen port, overridable via `PORT`.
pub const DEFAULT_LISTEN_PORT: u16 = 4162;

/// Port on which every peer serves the content protocol.
pub const PEER_CONTENT_PORT: u16 = 4161;

/// Peers requested from the oracle per seed.
pub const PEER_SAMPLE_SIZE: usize = 50;

/// Hard deadline for a single head probe against a peer.
pub const HEAD_PROBE_TIMEOUT_SECS: u64 = 5;

/// Deadline for oracle calls (epoch, sampling, coin info).
pub const ORACLE_TIMEOUT_SECS: u64 = 10;

/// Registry entries untouched this long are evicted (ms).
pub const REGISTRY_TTL_MS: u64 = 10 * 60 * 1000;

/// Blacklisted peers are excluded from selection this long (ms).
/// Re-insertion resets the clock.
pub const OFFLINE_TTL_MS: u64 = 5 * 60 * 1000;

/// Lifetime of the `udiData` cookie in seconds.
pub const COOKIE_MAX_AGE_SECS: i64 = 5 * 60;

/// Cadence of the per-store background refresh.
pub const PERIODIC_REFRESH_SECS: u64 = 30 * 60;

/// Cadence of the TTL sweep over registry entries and the offline set.
pub const TTL_SWEEP_INTERVAL_SECS: u64 = 60;

/// Peer weight bounds and starting value. Weight rises on success and
/// falls on failure, one step at a time.
pub const WEIGHT_MIN: u32 = 1;
pub const WEIGHT_MAX: u32 = 10;
pub const WEIGHT_INITIAL: u32 = 5;

/// Consecutive failures before a peer is blacklisted.
pub const OFFLINE_FAILURE_THRESHOLD: u64 = 3;

/// Chains this gateway can route.
pub const KNOWN_CHAINS: &[&str] = &["chia"];

/// Chain assumed when an identifier omits one.
pub const DEFAULT_CHAIN: &str = "chia";

/// Name of the identifier cookie.
pub const UDI_COOKIE_NAME: &str = "udiData";

/// Cache-Control attached to every proxied response.
pub const UPSTREAM_CACHE_CONTROL: &str = "public, max-age=86400";
