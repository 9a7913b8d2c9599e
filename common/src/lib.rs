//! Common types for the DIG content gateway.
//!
//! This crate provides the shared vocabulary used across the gateway:
//! - **UDI grammar**: parsing and canonical formatting of Universal Data
//!   Identifiers (`udi` module)
//! - **Epoch**: the network-wide time coordinate read from the on-chain
//!   oracle; a change in epoch triggers peer re-seeding
//! - **UdiCookie**: the payload persisted in the `udiData` client cookie so
//!   partial identifiers can be completed without another oracle round trip
//!
//! # Identifier Overview
//!
//! A Universal Data Identifier addresses one revision of a content store as
//! `<chain>.<storeId>.<rootHash>`, encoded as the first path segment of a
//! request URL. The store id is a 64-hex-character content address; the
//! root hash pins a specific revision. Identifiers arrive partial all the
//! time (bare store ids, missing chains); this crate only decodes what is
//! present — completing missing fields is the gateway resolver's job.

pub mod udi;

pub use udi::{RequestPath, canonical_path, parse_request_path, remove_duplicate_path_part};

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

// ============================================================================
// Network Time
// ============================================================================

/// Network-wide time coordinate from the on-chain oracle.
///
/// Totally ordered lexicographically: epochs compare first, rounds break
/// ties. The gateway re-seeds its peer registries whenever the observed
/// epoch differs from the one it last sampled under.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Epoch {
    pub epoch: u64,
    pub round: u64,
}

// ============================================================================
// Client Cookie
// ============================================================================

/// Payload of the `udiData` cookie (HTTP-only, 5-minute expiry).
///
/// Field names serialize camelCase to match the wire format clients
/// already carry.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UdiCookie {
    pub chain_name: String,
    pub store_id: String,
    pub root_hash: String,
}

// ============================================================================
// Helpers
// ============================================================================

/// Current wall-clock time in milliseconds since the Unix epoch.
/// Returns 0 if the system clock is before the epoch (clock skew guard).
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A store id is exactly 64 hex characters.
pub fn is_store_id(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}
