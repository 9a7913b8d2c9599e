//! Error types for the gateway request pipeline.

use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use thiserror::Error;

/// Terminal request outcomes that surface to the client.
///
/// Redirects are not errors; they are a first-class resolver outcome
/// (`resolver::Resolution::Redirect`). Everything here maps to a fixed
/// status and body, and nothing escapes the handler boundary.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The first path segment does not name a store and neither cookie nor
    /// referer could recover one.
    #[error("invalid or missing store id")]
    InvalidStoreId,

    /// The identifier names a chain this gateway cannot route.
    #[error("unknown chain {chain} for store {store_id}")]
    UnknownChain { chain: String, store_id: String },

    /// The registry is empty for the store or every candidate failed
    /// head validation.
    #[error("no valid peers available for store {store_id}")]
    NoValidPeers { store_id: String },

    /// The upstream peer refused or dropped the proxied request.
    #[error("upstream proxy failure")]
    Proxy(#[source] reqwest::Error),

    /// The on-chain oracle failed while completing the identifier.
    #[error("oracle failure: {0}")]
    Oracle(String),

    /// Any other failure during identifier resolution.
    #[error("resolver failure: {0}")]
    Resolver(String),
}

impl GatewayError {
    /// Label used for the request-outcome metric.
    pub fn outcome_label(&self) -> &'static str {
        match self {
            GatewayError::InvalidStoreId | GatewayError::UnknownChain { .. } => "client_error",
            GatewayError::NoValidPeers { .. } => "no_valid_peers",
            GatewayError::Proxy(_) => "proxy_error",
            GatewayError::Oracle(_) | GatewayError::Resolver(_) => "resolver_error",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match self {
            GatewayError::InvalidStoreId => {
                (StatusCode::BAD_REQUEST, "Invalid or missing storeId.").into_response()
            }
            GatewayError::UnknownChain { chain, store_id } => (
                StatusCode::BAD_REQUEST,
                Html(crate::helpers::unknown_chain_page(&chain, &store_id)),
            )
                .into_response(),
            GatewayError::NoValidPeers { store_id } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("No valid peers available for storeId: {store_id}."),
            )
                .into_response(),
            GatewayError::Proxy(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Proxy error").into_response()
            }
            GatewayError::Oracle(_) | GatewayError::Resolver(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An error occurred while verifying the identifier.",
            )
                .into_response(),
        }
    }
}
