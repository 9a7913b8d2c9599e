//! On-chain oracle contracts consumed by the gateway.
//!
//! The sampling oracle is external: it knows the current network period and
//! which peers claim to host a store during it. The gateway consumes three
//! operations, expressed as a trait so request handling can be exercised
//! against an in-memory oracle in tests.

use crate::config::ORACLE_TIMEOUT_SECS;
use anyhow::{Context, Result};
use async_trait::async_trait;
use common::Epoch;
use serde::Deserialize;
use std::time::Duration;

#[async_trait]
pub trait ChainOracle: Send + Sync {
    /// Current network period from the epoch clock. Monotonic.
    async fn current_epoch(&self) -> Result<Epoch>;

    /// Up to `count` unique peer ips claiming to host `store_id` in the
    /// current epoch.
    async fn sample_current_epoch(&self, store_id: &str, count: usize) -> Result<Vec<String>>;

    /// Root hash of the latest on-chain revision of `store_id`,
    /// rendered as lowercase hex.
    async fn fetch_root_hash(&self, store_id: &str) -> Result<String>;
}

/// Oracle client speaking HTTP to the SDK bridge named by `ORACLE_URL`.
pub struct HttpChainOracle {
    base_url: String,
    client: reqwest::Client,
}

impl HttpChainOracle {
    pub fn new(base_url: String, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(ORACLE_TIMEOUT_SECS)
    }
}

#[derive(Deserialize)]
struct CoinInfo {
    latest_store: LatestStore,
}

#[derive(Deserialize)]
struct LatestStore {
    metadata: StoreMetadata,
}

#[derive(Deserialize)]
struct StoreMetadata {
    root_hash: String,
}

#[async_trait]
impl ChainOracle for HttpChainOracle {
    async fn current_epoch(&self) -> Result<Epoch> {
        let url = format!("{}/epoch", self.base_url);
        let epoch = self
            .client
            .get(&url)
            .timeout(self.timeout())
            .send()
            .await
            .context("epoch clock unreachable")?
            .error_for_status()
            .context("epoch clock returned an error")?
            .json::<Epoch>()
            .await
            .context("malformed epoch response")?;
        Ok(epoch)
    }

    async fn sample_current_epoch(&self, store_id: &str, count: usize) -> Result<Vec<String>> {
        let url = format!("{}/sample/{}?count={}", self.base_url, store_id, count);
        let ips = self
            .client
            .get(&url)
            .timeout(self.timeout())
            .send()
            .await
            .context("peer oracle unreachable")?
            .error_for_status()
            .context("peer oracle returned an error")?
            .json::<Vec<String>>()
            .await
            .context("malformed peer sample")?;
        Ok(ips)
    }

    async fn fetch_root_hash(&self, store_id: &str) -> Result<String> {
        let url = format!("{}/coin_info/{}", self.base_url, store_id);
        let info = self
            .client
            .get(&url)
            .timeout(self.timeout())
            .send()
            .await
            .context("coin info unreachable")?
            .error_for_status()
            .context("coin info returned an error")?
            .json::<CoinInfo>()
            .await
            .context("malformed coin info")?;
        Ok(info
            .latest_store
            .metadata
            .root_hash
            .trim_start_matches("0x")
            .to_lowercase())
    }
}

#[cfg(test)]
pub mod testing {
    //! In-memory oracle for exercising the routing pipeline in tests.

    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub struct MockOracle {
        epoch: Mutex<Epoch>,
        peers: Mutex<Vec<String>>,
        root_hash: Option<String>,
        pub sample_calls: AtomicUsize,
        pub root_hash_calls: AtomicUsize,
    }

    impl MockOracle {
        pub fn new(epoch: Epoch, peers: Vec<&str>) -> Self {
            Self {
                epoch: Mutex::new(epoch),
                peers: Mutex::new(peers.into_iter().map(str::to_string).collect()),
                root_hash: None,
                sample_calls: AtomicUsize::new(0),
                root_hash_calls: AtomicUsize::new(0),
            }
        }

        pub fn with_root_hash(mut self, root_hash: &str) -> Self {
            self.root_hash = Some(root_hash.to_string());
            self
        }

        pub fn set_epoch(&self, epoch: Epoch) {
            *self.epoch.lock() = epoch;
        }
    }

    #[async_trait]
    impl ChainOracle for MockOracle {
        async fn current_epoch(&self) -> Result<Epoch> {
            Ok(*self.epoch.lock())
        }

        async fn sample_current_epoch(&self, _store_id: &str, count: usize) -> Result<Vec<String>> {
            self.sample_calls.fetch_add(1, Ordering::SeqCst);
            let peers = self.peers.lock();
            Ok(peers.iter().take(count).cloned().collect())
        }

        async fn fetch_root_hash(&self, _store_id: &str) -> Result<String> {
            self.root_hash_calls.fetch_add(1, Ordering::SeqCst);
            self.root_hash
                .clone()
                .ok_or_else(|| anyhow::anyhow!("no coin info configured"))
        }
    }
}
