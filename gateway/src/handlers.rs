//! HTTP request handlers for the gateway.

use crate::config::{COOKIE_MAX_AGE_SECS, UDI_COOKIE_NAME};
use crate::error::GatewayError;
use crate::resolver::{self, RequestContext, Resolution};
use crate::selector;
use crate::state::AppState;
use crate::{background, proxy};
use axum::Json;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use common::UdiCookie;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{error, warn};

/// `GET /health`
pub async fn health() -> &'static str {
    "OK"
}

/// `/.well-known/*` bypasses identifier resolution and peer routing.
/// Reserved for a fronting ACME responder; nothing is served locally.
pub async fn well_known() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Handler for the Prometheus metrics endpoint.
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let output = state.metrics.encode();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        output,
    )
}

/// `GET /stats`: per-store peer statistics for operators.
pub async fn peer_stats(State(state): State<AppState>) -> impl IntoResponse {
    let stores: Vec<serde_json::Value> = state
        .registry
        .store_entries()
        .iter()
        .map(|(store_id, entry)| {
            let peers: Vec<serde_json::Value> = entry
                .peers
                .iter()
                .map(|p| {
                    serde_json::json!({
                        "ip": p.ip,
                        "weight": p.weight(),
                        "total_requests": p.total_requests(),
                        "success_count": p.success_count(),
                        "failure_count": p.failure_count(),
                        "avg_latency_ms": if p.total_requests() == 0 {
                            serde_json::Value::Null
                        } else {
                            serde_json::json!(p.avg_latency_ms())
                        },
                        "active_connections": state.registry.active_connections(&p.ip),
                        "offline": state.registry.is_offline(&p.ip),
                    })
                })
                .collect();
            serde_json::json!({
                "store_id": store_id,
                "epoch": entry.epoch,
                "peers": peers,
            })
        })
        .collect();

    Json(serde_json::json!({
        "current_epoch": state.registry.current_epoch(),
        "stores": stores,
    }))
}

/// Fallback handler: the resolver + peer-routing pipeline every content
/// request flows through.
pub async fn route_content(
    State(state): State<AppState>,
    jar: CookieJar,
    request: Request,
) -> Response {
    let original_url = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let (parts, body) = request.into_parts();

    let cookie = jar
        .get(UDI_COOKIE_NAME)
        .and_then(|c| serde_json::from_str::<UdiCookie>(c.value()).ok());

    let resolution =
        match resolver::resolve(state.oracle.as_ref(), &parts.headers, &original_url, cookie).await
        {
            Ok(resolution) => resolution,
            Err(err) => {
                if matches!(err, GatewayError::Oracle(_) | GatewayError::Resolver(_)) {
                    error!(url = %original_url, error = %err, "Identifier resolution failed");
                }
                state.metrics.observe_request(err.outcome_label());
                return err.into_response();
            }
        };

    match resolution {
        Resolution::Redirect { location } => match redirect_response(&location) {
            Ok(response) => {
                state.metrics.observe_request("redirect");
                state.metrics.redirects.inc();
                response
            }
            Err(err) => {
                error!(url = %original_url, error = %err, "Identifier resolution failed");
                state.metrics.observe_request(err.outcome_label());
                err.into_response()
            }
        },
        Resolution::Forward(ctx) => {
            serve_store(state, jar, ctx, parts.method, parts.headers, body).await
        }
    }
}

/// Build the 302. Recovered fields (cookie, referer) can carry bytes that
/// are not legal in a Location header; that is a resolution failure, not a
/// redirect.
fn redirect_response(location: &str) -> Result<Response, GatewayError> {
    let value = HeaderValue::from_str(location).map_err(|_| {
        GatewayError::Resolver("redirect target is not a valid header value".to_string())
    })?;
    let mut response = StatusCode::FOUND.into_response();
    response.headers_mut().insert(header::LOCATION, value);
    Ok(response)
}

/// Route a fully-resolved request: make sure the store has a fresh peer
/// population, pick a validated peer, proxy, and persist the completed
/// identifier in the `udiData` cookie.
async fn serve_store(
    state: AppState,
    jar: CookieJar,
    ctx: RequestContext,
    method: Method,
    headers: HeaderMap,
    body: Body,
) -> Response {
    state
        .registry
        .refresh_if_needed(state.oracle.as_ref(), &ctx.store_id)
        .await;
    background::install_store_refresh(&state, &ctx.store_id);

    let mut rng = StdRng::from_os_rng();
    let selected = selector::select_peer(
        &mut rng,
        &state.registry,
        state.probe.as_ref(),
        &state.metrics,
        &ctx.chain_name,
        &ctx.store_id,
        &ctx.root_hash,
        ctx.key(),
    )
    .await;

    // The identifier is complete: persist it for follow-up requests
    // whatever the routing outcome.
    let payload = serde_json::to_string(&ctx.cookie()).unwrap_or_default();
    let cookie = Cookie::build((UDI_COOKIE_NAME, payload))
        .http_only(true)
        .secure(false)
        .path("/")
        .max_age(cookie::time::Duration::seconds(COOKIE_MAX_AGE_SECS))
        .build();
    let jar = jar.add(cookie);

    let Some(selected) = selected else {
        warn!(store_id = %ctx.store_id, "No peer validated the revision");
        state.metrics.observe_request("no_valid_peers");
        let err = GatewayError::NoValidPeers {
            store_id: ctx.store_id,
        };
        return (jar, err).into_response();
    };

    match proxy::forward(&state, &ctx, &selected, method, &headers, body).await {
        Ok(response) => {
            state.metrics.observe_request("forwarded");
            (jar, response).into_response()
        }
        Err(err) => {
            state.metrics.observe_request(err.outcome_label());
            (jar, err).into_response()
        }
    }
}
