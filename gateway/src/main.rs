//! Gateway entry point for the DIG content network.
//!
//! The gateway is a content-routing reverse proxy: clients address store
//! revisions by Universal Data Identifier, the resolver completes partial
//! identifiers (cookie, referer, on-chain oracle) and forces canonical
//! URLs, and the peer-routing engine picks a healthy peer that provably
//! holds the revision and streams its response through.

mod background;
mod config;
mod error;
mod handlers;
mod helpers;
mod metrics;
mod oracle;
mod probe;
mod proxy;
mod registry;
mod resolver;
mod selector;
mod state;

use anyhow::Result;
use axum::Router;
use axum::routing::{any, get};
use clap::Parser;
use metrics::Metrics;
use oracle::HttpChainOracle;
use probe::HttpContentProbe;
use registry::PeerRegistry;
use state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = config::DEFAULT_LISTEN_PORT)]
    port: u16,

    /// Worker threads for the async runtime
    #[arg(long, env = "CONCURRENT_JOBS", default_value_t = 1)]
    concurrent_jobs: usize,

    /// Base URL of the on-chain oracle bridge (epoch clock, peer
    /// sampling, coin info)
    #[arg(long, env = "ORACLE_URL", default_value = "http://localhost:8555")]
    oracle_url: String,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    info!(version = env!("CARGO_PKG_VERSION"), "Starting gateway");

    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(args.concurrent_jobs.max(1))
        .enable_all()
        .build()?
        .block_on(run(args))
}

async fn run(args: Args) -> Result<()> {
    // One pooled client serves oracle calls, head probes, and upstream
    // proxying. No global timeout: proxied transfers may be long-lived;
    // oracle and probe calls carry their own deadlines.
    // Upstream redirects belong to the client, not the gateway.
    let http_client = reqwest::Client::builder()
        .pool_max_idle_per_host(20)
        .pool_idle_timeout(Duration::from_secs(90))
        .connect_timeout(Duration::from_secs(10))
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;

    let metrics = Metrics::new();
    let state = AppState {
        registry: Arc::new(PeerRegistry::new(metrics.clone())),
        oracle: Arc::new(HttpChainOracle::new(
            args.oracle_url.clone(),
            http_client.clone(),
        )),
        probe: Arc::new(HttpContentProbe::new(http_client.clone())),
        http_client,
        metrics,
    };
    info!(oracle_url = %args.oracle_url, "Oracle bridge configured");

    tokio::spawn(background::maintenance_loop(state.clone()));

    let app = Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics_handler))
        .route("/stats", get(handlers::peer_stats))
        .route("/.well-known/*rest", any(handlers::well_known))
        .fallback(handlers::route_content)
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    info!(addr = %addr, "Gateway listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
