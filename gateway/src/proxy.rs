//! Streaming forwarder to validated peers.
//!
//! The proxy rewrites the request path to the canonical revision address
//! (`/<chain>.<store>.<root>[/<key>]`), dispatches to the peer's content
//! port, and streams the response body through without buffering. Upstream
//! response headers pass through except hop-by-hop headers; the gateway
//! adds only `X-Network-Origin` and `Cache-Control`. Every dispatch feeds
//! the peer's statistics: latency and success on response, failure on
//! transport error.

use crate::config::{PEER_CONTENT_PORT, UPSTREAM_CACHE_CONTROL};
use crate::error::GatewayError;
use crate::probe::peer_authority;
use crate::resolver::RequestContext;
use crate::selector::SelectedPeer;
use crate::state::AppState;
use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, header};
use axum::response::{IntoResponse, Response};
use futures::TryStreamExt;
use std::time::Instant;
use tracing::{debug, warn};

/// Hop-by-hop headers never forwarded in either direction.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// Upstream URL for a validated request. The key segment is present only
/// when the selected peer validated the key.
pub fn upstream_url(ip: &str, ctx: &RequestContext, key: Option<&str>) -> String {
    let mut url = format!(
        "http://{}/{}.{}.{}",
        peer_authority(ip, PEER_CONTENT_PORT),
        ctx.chain_name,
        ctx.store_id,
        ctx.root_hash
    );
    if let Some(key) = key {
        url.push('/');
        url.push_str(key);
    }
    url
}

/// Request headers to forward upstream. Host is dropped so the client
/// library derives it from the peer authority.
fn forwardable_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in headers {
        if is_hop_by_hop(name) || name == header::HOST {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Forward the request to the selected peer and stream the response back.
pub async fn forward(
    state: &AppState,
    ctx: &RequestContext,
    selected: &SelectedPeer,
    method: Method,
    headers: &HeaderMap,
    body: Body,
) -> Result<Response, GatewayError> {
    let peer = &selected.peer;
    let ip = peer.ip.clone();
    let key = if selected.key_validated {
        ctx.key()
    } else {
        None
    };
    let url = upstream_url(&ip, ctx, key);
    debug!(ip = %ip, url = %url, "Dispatching to peer");

    state.registry.connection_started(&ip);
    state.metrics.active_proxied.inc();
    let start = Instant::now();

    let result = state
        .http_client
        .request(method, &url)
        .headers(forwardable_headers(headers))
        .body(reqwest::Body::wrap_stream(body.into_data_stream()))
        .send()
        .await;

    let elapsed = start.elapsed();
    state.registry.connection_finished(&ip);
    state.metrics.active_proxied.dec();

    let upstream = match result {
        Ok(res) => res,
        Err(err) => {
            warn!(ip = %ip, error = %err, "Upstream request failed");
            state
                .registry
                .adjust_stats(peer, false, elapsed.as_millis() as u64);
            state.metrics.proxy_errors.inc();
            return Err(GatewayError::Proxy(err));
        }
    };

    state
        .registry
        .adjust_stats(peer, true, elapsed.as_millis() as u64);
    state.metrics.proxy_duration.observe(elapsed.as_secs_f64());

    let status = upstream.status();
    let mut response_headers = HeaderMap::new();
    for (name, value) in upstream.headers() {
        if !is_hop_by_hop(name) {
            response_headers.append(name.clone(), value.clone());
        }
    }
    if let Ok(origin) = HeaderValue::from_str(&format!("DIG Network: {ip}")) {
        response_headers.insert(
            HeaderName::from_static("x-network-origin"),
            origin,
        );
    }
    response_headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(UPSTREAM_CACHE_CONTROL),
    );

    let body = Body::from_stream(upstream.bytes_stream().map_err(std::io::Error::other));
    Ok((status, response_headers, body).into_response())
}
