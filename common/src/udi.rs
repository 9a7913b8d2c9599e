//! Universal Data Identifier grammar.
//!
//! The first path segment of a request encodes up to three dot-separated
//! fields: `<chain>.<storeId>.<rootHash>`. Clients routinely omit the chain
//! or the root hash, so decoding is positional and length-driven:
//!
//! - 3 parts: `chain.storeId.rootHash`
//! - 2 parts, first part 64 chars: `storeId.rootHash`
//! - 2 parts otherwise: `chain.storeId`
//! - 1 part, 64 chars: bare `storeId`
//! - 1 part otherwise: not a UDI; the segment belongs to the subpath
//! - 4+ parts: opaque; treated as a (necessarily invalid) store id
//!
//! Field *presence* is decided here; field *validity* (64-hex store ids,
//! known chains) is the resolver's concern.

/// A request path decomposed into its UDI segment and remainder.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestPath {
    /// Raw first path segment, when it decoded as a UDI.
    pub segment: Option<String>,
    pub chain_name: Option<String>,
    pub store_id: Option<String>,
    pub root_hash: Option<String>,
    /// Path remainder after the UDI segment, `/`-prefixed (empty when none).
    pub subpath: String,
    /// Raw query string without the leading `?`.
    pub query: Option<String>,
}

/// Decode an original request URL (path plus optional query) into its UDI
/// fields and remainder.
pub fn parse_request_path(original_url: &str) -> RequestPath {
    let (path, query) = match original_url.split_once('?') {
        Some((p, q)) => (p, Some(q.to_string())),
        None => (original_url, None),
    };

    let segments = normalized_segments(path);
    let Some(first) = segments.first().cloned() else {
        return RequestPath {
            query,
            ..Default::default()
        };
    };
    let subpath = join_segments(&segments[1..]);

    let parts: Vec<&str> = first.split('.').collect();
    let (chain_name, store_id, root_hash) = match parts.as_slice() {
        [chain, store, root] => (
            Some((*chain).to_string()),
            Some((*store).to_string()),
            Some((*root).to_string()),
        ),
        [store, root] if store.len() == 64 => {
            (None, Some((*store).to_string()), Some((*root).to_string()))
        }
        [chain, store] => (Some((*chain).to_string()), Some((*store).to_string()), None),
        [store] if store.len() == 64 => (None, Some((*store).to_string()), None),
        [_] => {
            // Not an identifier at all; fold the segment back into the
            // subpath so cookie/referer recovery can reuse it.
            return RequestPath {
                subpath: join_segments(&segments),
                query,
                ..Default::default()
            };
        }
        _ => (None, Some(first.clone()), None),
    };

    RequestPath {
        segment: Some(first),
        chain_name,
        store_id,
        root_hash,
        subpath,
        query,
    }
}

/// Drop leading duplicates of an identifier-length first segment, a pattern
/// some upstream rewriters introduce. Idempotent.
pub fn remove_duplicate_path_part(path: &str) -> String {
    let segments = normalized_segments(path);
    join_segments(&segments)
}

/// The canonical path for a complete identifier:
/// `/<chain>.<store>.<root>[<subpath>][?<query>]`.
pub fn canonical_path(
    chain_name: &str,
    store_id: &str,
    root_hash: &str,
    subpath: &str,
    query: Option<&str>,
) -> String {
    let mut path = format!("/{chain_name}.{store_id}.{root_hash}{subpath}");
    if let Some(q) = query {
        path.push('?');
        path.push_str(q);
    }
    path
}

fn normalized_segments(path: &str) -> Vec<String> {
    let mut segments: Vec<String> = path
        .split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    while segments.len() >= 2 && segments[0] == segments[1] && segments[0].len() >= 64 {
        segments.remove(1);
    }
    segments
}

fn join_segments(segments: &[String]) -> String {
    if segments.is_empty() {
        String::new()
    } else {
        format!("/{}", segments.join("/"))
    }
}
