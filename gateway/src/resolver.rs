//! UDI resolution: complete a possibly-partial identifier or redirect to
//! its canonical form.
//!
//! Every request outside `/.well-known` passes through here first. The
//! resolver decodes the first path segment, recovers missing fields from
//! the `udiData` cookie or the referring page, consults the on-chain
//! oracle for unknown root hashes, and forces canonical URLs with 302s.
//! Requests leave as exactly one of: a typed `RequestContext` for the
//! proxy, a redirect, or a `GatewayError`.

use crate::config::{DEFAULT_CHAIN, KNOWN_CHAINS};
use crate::error::GatewayError;
use crate::helpers::{finalize_redirect, header_str};
use crate::oracle::ChainOracle;
use axum::http::HeaderMap;
use axum::http::header;
use common::{UdiCookie, is_store_id, udi};
use tracing::debug;

/// Identifier fields attached to a request once resolution completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub chain_name: String,
    pub store_id: String,
    pub root_hash: String,
    /// `/`-prefixed remainder of the request path (empty when none).
    pub subpath: String,
    pub query: Option<String>,
}

impl RequestContext {
    /// Key within the store revision, when the subpath names one.
    pub fn key(&self) -> Option<&str> {
        let key = self.subpath.trim_start_matches('/');
        if key.is_empty() { None } else { Some(key) }
    }

    /// The cookie persisted alongside a forwarded response.
    pub fn cookie(&self) -> UdiCookie {
        UdiCookie {
            chain_name: self.chain_name.clone(),
            store_id: self.store_id.clone(),
            root_hash: self.root_hash.clone(),
        }
    }
}

/// Non-error resolution outcomes.
#[derive(Debug, PartialEq, Eq)]
pub enum Resolution {
    /// Identifier complete: forward to a peer and set the `udiData` cookie.
    Forward(RequestContext),
    /// The client must re-request the canonical URL.
    Redirect { location: String },
}

/// Run the resolution state machine for one request.
pub async fn resolve(
    oracle: &dyn ChainOracle,
    headers: &HeaderMap,
    original_url: &str,
    cookie: Option<UdiCookie>,
) -> Result<Resolution, GatewayError> {
    let parsed = udi::parse_request_path(original_url);
    let store_id_valid = parsed.store_id.as_deref().is_some_and(is_store_id);

    if !store_id_valid {
        // No usable store id in the URL: recover an address from the
        // cookie or the referring page, else reject.
        if let Some(cookie) = cookie {
            let location = format!(
                "/{}.{}{}",
                cookie.chain_name, cookie.store_id, parsed.subpath
            );
            debug!(location = %location, "Recovered store address from cookie");
            return Ok(Resolution::Redirect {
                location: finalize_redirect(headers, location),
            });
        }
        if let Some(referer) = header_str(headers, header::REFERER.as_str()) {
            let location = format!("{}{}", referer.trim_end_matches('/'), parsed.subpath);
            debug!(location = %location, "Recovered store address from referer");
            return Ok(Resolution::Redirect {
                location: finalize_redirect(headers, location),
            });
        }
        return Err(GatewayError::InvalidStoreId);
    }

    let Some(store_id) = parsed.store_id.clone() else {
        return Err(GatewayError::InvalidStoreId);
    };
    let mut chain_name = parsed.chain_name.clone();
    let mut root_hash = parsed.root_hash.clone();

    // Cookie adoption for missing fields. The root-hash arm compares the
    // request's root hash, so a cookie can be adopted across store ids
    // when the hashes coincide.
    if chain_name.is_none() || root_hash.is_none() {
        if let Some(cookie) = &cookie {
            let adopt = store_id.is_empty()
                || cookie.store_id == store_id
                || root_hash.as_deref() == Some(cookie.root_hash.as_str());
            if adopt {
                if chain_name.is_none() {
                    chain_name = Some(cookie.chain_name.clone());
                }
                if root_hash.is_none() {
                    root_hash = Some(cookie.root_hash.clone());
                }
            }
        }
    }

    let Some(chain_name) = chain_name else {
        // Chain still unknown: force the chain-defaulted canonical URL.
        let location = match &root_hash {
            None => {
                let fetched = oracle
                    .fetch_root_hash(&store_id)
                    .await
                    .map_err(|e| GatewayError::Oracle(e.to_string()))?;
                udi::canonical_path(
                    DEFAULT_CHAIN,
                    &store_id,
                    &fetched,
                    &parsed.subpath,
                    parsed.query.as_deref(),
                )
            }
            Some(_) => {
                let segment = parsed.segment.as_deref().unwrap_or(store_id.as_str());
                let mut location = format!("/{}.{}{}", DEFAULT_CHAIN, segment, parsed.subpath);
                if let Some(q) = parsed.query.as_deref() {
                    location.push('?');
                    location.push_str(q);
                }
                location
            }
        };
        return Ok(Resolution::Redirect {
            location: finalize_redirect(headers, location),
        });
    };

    if !KNOWN_CHAINS.contains(&chain_name.as_str()) {
        return Err(GatewayError::UnknownChain {
            chain: chain_name,
            store_id,
        });
    }

    let Some(root_hash) = root_hash else {
        // Chain known, revision unknown: pin the latest on-chain root hash
        // and force the complete canonical URL.
        let fetched = oracle
            .fetch_root_hash(&store_id)
            .await
            .map_err(|e| GatewayError::Oracle(e.to_string()))?;
        let location = udi::canonical_path(
            &chain_name,
            &store_id,
            &fetched,
            &parsed.subpath,
            parsed.query.as_deref(),
        );
        return Ok(Resolution::Redirect {
            location: finalize_redirect(headers, location),
        });
    };

    Ok(Resolution::Forward(RequestContext {
        chain_name,
        store_id,
        root_hash,
        subpath: parsed.subpath,
        query: parsed.query,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::testing::MockOracle;
    use axum::http::HeaderValue;
    use common::Epoch;
    use std::sync::atomic::Ordering;

    fn store() -> String {
        "ef".repeat(32)
    }

    fn oracle() -> MockOracle {
        MockOracle::new(Epoch { epoch: 1, round: 0 }, vec![]).with_root_hash("beef")
    }

    fn cookie(store_id: &str, root_hash: &str) -> UdiCookie {
        UdiCookie {
            chain_name: "chia".to_string(),
            store_id: store_id.to_string(),
            root_hash: root_hash.to_string(),
        }
    }

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                axum::http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[tokio::test]
    async fn store_and_root_without_chain_redirects_to_chain_default() {
        let url = format!("/{}.0011ff", store());
        let result = resolve(&oracle(), &HeaderMap::new(), &url, None)
            .await
            .unwrap();
        assert_eq!(
            result,
            Resolution::Redirect {
                location: format!("/chia.{}.0011ff", store()),
            }
        );
    }

    #[tokio::test]
    async fn matching_cookie_supplies_the_root_hash_without_oracle_calls() {
        let url = format!("/chia.{}", store());
        let mock = oracle();
        let result = resolve(
            &mock,
            &HeaderMap::new(),
            &url,
            Some(cookie(&store(), "aa55")),
        )
        .await
        .unwrap();
        match result {
            Resolution::Forward(ctx) => {
                assert_eq!(ctx.chain_name, "chia");
                assert_eq!(ctx.store_id, store());
                assert_eq!(ctx.root_hash, "aa55");
            }
            other => panic!("expected forward, got {other:?}"),
        }
        assert_eq!(mock.root_hash_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_root_hash_is_fetched_and_redirected_canonical() {
        let url = format!("/chia.{}", store());
        let mock = oracle();
        let result = resolve(&mock, &HeaderMap::new(), &url, None).await.unwrap();
        assert_eq!(
            result,
            Resolution::Redirect {
                location: format!("/chia.{}.beef", store()),
            }
        );
        assert_eq!(mock.root_hash_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn bare_store_id_redirects_to_the_complete_canonical_url() {
        let url = format!("/{}/sub/file?x=1", store());
        let result = resolve(&oracle(), &HeaderMap::new(), &url, None)
            .await
            .unwrap();
        assert_eq!(
            result,
            Resolution::Redirect {
                location: format!("/chia.{}.beef/sub/file?x=1", store()),
            }
        );
    }

    #[tokio::test]
    async fn unknown_chain_is_rejected_with_the_chain_named() {
        let url = format!("/eth.{}.0011ff", store());
        let err = resolve(&oracle(), &HeaderMap::new(), &url, None)
            .await
            .unwrap_err();
        match err {
            GatewayError::UnknownChain { chain, store_id } => {
                assert_eq!(chain, "eth");
                assert_eq!(store_id, store());
            }
            other => panic!("expected unknown chain, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn invalid_store_id_without_recovery_is_a_client_error() {
        let err = resolve(&oracle(), &HeaderMap::new(), "/bogus", None)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidStoreId));
    }

    #[tokio::test]
    async fn sixty_three_and_sixty_five_char_ids_are_invalid() {
        for len in [63usize, 65] {
            let url = format!("/{}", "a".repeat(len));
            let err = resolve(&oracle(), &HeaderMap::new(), &url, None)
                .await
                .unwrap_err();
            assert!(matches!(err, GatewayError::InvalidStoreId), "len {len}");
        }
    }

    #[tokio::test]
    async fn invalid_store_id_recovers_from_the_cookie() {
        let result = resolve(
            &oracle(),
            &HeaderMap::new(),
            "/bogus/page.html",
            Some(cookie(&store(), "aa55")),
        )
        .await
        .unwrap();
        assert_eq!(
            result,
            Resolution::Redirect {
                location: format!("/chia.{}/bogus/page.html", store()),
            }
        );
    }

    #[tokio::test]
    async fn invalid_store_id_recovers_from_the_referer() {
        let h = headers(&[("referer", "https://gw.example/chia.abc.def")]);
        let result = resolve(&oracle(), &h, "/bogus/page.html", None)
            .await
            .unwrap();
        assert_eq!(
            result,
            Resolution::Redirect {
                location: "https://gw.example/chia.abc.def/bogus/page.html".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn cookie_adopts_across_stores_when_root_hashes_match() {
        // The adoption condition accepts a cookie whose root hash equals
        // the request's even though the store ids differ.
        let other_store = "12".repeat(32);
        let url = format!("/{}.aa55", store());
        let result = resolve(
            &oracle(),
            &HeaderMap::new(),
            &url,
            Some(cookie(&other_store, "aa55")),
        )
        .await
        .unwrap();
        match result {
            Resolution::Forward(ctx) => {
                assert_eq!(ctx.chain_name, "chia");
                assert_eq!(ctx.store_id, store());
                assert_eq!(ctx.root_hash, "aa55");
            }
            other => panic!("expected forward, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn mismatched_cookie_is_ignored() {
        let other_store = "12".repeat(32);
        let url = format!("/chia.{}", store());
        let mock = oracle();
        // Cookie for a different store with a different root hash: the
        // root comes from the oracle instead.
        let result = resolve(
            &mock,
            &HeaderMap::new(),
            &url,
            Some(cookie(&other_store, "dead")),
        )
        .await
        .unwrap();
        assert_eq!(
            result,
            Resolution::Redirect {
                location: format!("/chia.{}.beef", store()),
            }
        );
        assert_eq!(mock.root_hash_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn oracle_failure_surfaces_as_an_oracle_error() {
        let mock = MockOracle::new(Epoch { epoch: 1, round: 0 }, vec![]);
        let url = format!("/chia.{}", store());
        let err = resolve(&mock, &HeaderMap::new(), &url, None)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Oracle(_)));
    }

    #[tokio::test]
    async fn cloudfront_redirects_are_absolute() {
        let h = headers(&[("x-amz-cf-id", "cf1"), ("host", "store.example")]);
        let url = format!("/{}.0011ff", store());
        let result = resolve(&oracle(), &h, &url, None).await.unwrap();
        assert_eq!(
            result,
            Resolution::Redirect {
                location: format!("https://store.example/chia.{}.0011ff", store()),
            }
        );
    }

    #[tokio::test]
    async fn forward_preserves_subpath_query_and_key() {
        let url = format!("/chia.{}.aa55/docs/index.html?v=2", store());
        let result = resolve(&oracle(), &HeaderMap::new(), &url, None)
            .await
            .unwrap();
        match result {
            Resolution::Forward(ctx) => {
                assert_eq!(ctx.subpath, "/docs/index.html");
                assert_eq!(ctx.query.as_deref(), Some("v=2"));
                assert_eq!(ctx.key(), Some("docs/index.html"));
                assert_eq!(ctx.cookie().root_hash, "aa55");
            }
            other => panic!("expected forward, got {other:?}"),
        }
    }
}
