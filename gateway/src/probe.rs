//! Head probes against peer content servers.
//!
//! Before a peer is handed a request, the selector asks it whether it
//! actually holds the addressed revision (and, when the request names a
//! key, whether it holds that key at the revision). Probes are HEAD
//! requests answered entirely through response headers:
//!
//! - `x-has-roothash`: `"true"` if the peer holds the root hash
//! - `x-key-exists`: `"true"` if the peer holds the key
//! - `x-generation-hash`: the root hash the key belongs to
//!
//! Every probe races a hard 5-second deadline; on expiry the losing
//! request future is dropped, which closes its socket. Expiry rejects the
//! peer for this attempt without touching its statistics; a definitive
//! rejection (transport error or header mismatch) counts against them.

use crate::config::{HEAD_PROBE_TIMEOUT_SECS, PEER_CONTENT_PORT};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Result of one head probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The peer holds the revision (and key, when asked).
    Valid,
    /// The peer answered and does not hold it, or could not be reached.
    Invalid,
    /// The 5-second deadline expired before an answer arrived.
    DeadlineExpired,
}

#[async_trait]
pub trait ContentProbe: Send + Sync {
    /// Does the peer hold `root_hash` for the store?
    async fn head_store(
        &self,
        ip: &str,
        chain: &str,
        store_id: &str,
        root_hash: &str,
    ) -> ProbeOutcome;

    /// Does the peer hold `key` at exactly `root_hash`?
    async fn head_key(
        &self,
        ip: &str,
        chain: &str,
        store_id: &str,
        root_hash: &str,
        key: &str,
    ) -> ProbeOutcome;
}

/// Format a peer authority, bracketing IPv6 literals.
pub fn peer_authority(ip: &str, port: u16) -> String {
    if ip.contains(':') {
        format!("[{ip}]:{port}")
    } else {
        format!("{ip}:{port}")
    }
}

/// Probe implementation speaking the HTTP content protocol on port 4161.
pub struct HttpContentProbe {
    client: reqwest::Client,
    timeout: Duration,
    port: u16,
}

impl HttpContentProbe {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            timeout: Duration::from_secs(HEAD_PROBE_TIMEOUT_SECS),
            port: PEER_CONTENT_PORT,
        }
    }

    async fn head(&self, url: &str) -> Result<reqwest::Response, ProbeOutcome> {
        match tokio::time::timeout(self.timeout, self.client.head(url).send()).await {
            Ok(Ok(res)) => Ok(res),
            Ok(Err(err)) => {
                debug!(url = %url, error = %err, "Head probe transport error");
                Err(ProbeOutcome::Invalid)
            }
            Err(_) => {
                debug!(url = %url, "Head probe deadline expired");
                Err(ProbeOutcome::DeadlineExpired)
            }
        }
    }
}

fn header_equals(res: &reqwest::Response, name: &str, want: &str) -> bool {
    res.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == want)
}

fn verdict(accepted: bool) -> ProbeOutcome {
    if accepted {
        ProbeOutcome::Valid
    } else {
        ProbeOutcome::Invalid
    }
}

#[async_trait]
impl ContentProbe for HttpContentProbe {
    async fn head_store(
        &self,
        ip: &str,
        chain: &str,
        store_id: &str,
        root_hash: &str,
    ) -> ProbeOutcome {
        let url = format!(
            "http://{}/{}.{}.{}",
            peer_authority(ip, self.port),
            chain,
            store_id,
            root_hash
        );
        match self.head(&url).await {
            Ok(res) => verdict(header_equals(&res, "x-has-roothash", "true")),
            Err(outcome) => outcome,
        }
    }

    async fn head_key(
        &self,
        ip: &str,
        chain: &str,
        store_id: &str,
        root_hash: &str,
        key: &str,
    ) -> ProbeOutcome {
        let url = format!(
            "http://{}/{}.{}.{}/{}",
            peer_authority(ip, self.port),
            chain,
            store_id,
            root_hash,
            key
        );
        match self.head(&url).await {
            Ok(res) => verdict(
                header_equals(&res, "x-key-exists", "true")
                    && header_equals(&res, "x-generation-hash", root_hash),
            ),
            Err(outcome) => outcome,
        }
    }
}

#[cfg(test)]
pub mod testing {
    //! Scriptable probe for selector tests.

    use super::*;
    use std::collections::HashSet;

    /// Answers `Valid` for listed ips, `Invalid` otherwise, and
    /// `DeadlineExpired` for ips in `slow`.
    #[derive(Default)]
    pub struct MockProbe {
        pub store_ok: HashSet<String>,
        pub key_ok: HashSet<String>,
        pub slow: HashSet<String>,
    }

    impl MockProbe {
        pub fn validating_store(ips: &[&str]) -> Self {
            Self {
                store_ok: ips.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            }
        }

        pub fn validating_keys(ips: &[&str]) -> Self {
            Self {
                store_ok: ips.iter().map(|s| s.to_string()).collect(),
                key_ok: ips.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            }
        }

        pub fn timing_out(ips: &[&str]) -> Self {
            Self {
                slow: ips.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            }
        }

        fn answer(&self, set: &HashSet<String>, ip: &str) -> ProbeOutcome {
            if self.slow.contains(ip) {
                ProbeOutcome::DeadlineExpired
            } else if set.contains(ip) {
                ProbeOutcome::Valid
            } else {
                ProbeOutcome::Invalid
            }
        }
    }

    #[async_trait]
    impl ContentProbe for MockProbe {
        async fn head_store(&self, ip: &str, _: &str, _: &str, _: &str) -> ProbeOutcome {
            self.answer(&self.store_ok, ip)
        }

        async fn head_key(&self, ip: &str, _: &str, _: &str, _: &str, _: &str) -> ProbeOutcome {
            self.answer(&self.key_ok, ip)
        }
    }
}
