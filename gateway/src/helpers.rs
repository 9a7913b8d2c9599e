//! Shared helpers for the request pipeline.
//!
//! - **Redirect finalization**: origin-path stripping and CloudFront host
//!   prefixing, applied uniformly to every redirect the resolver produces
//! - **Error views**: the unknown-chain HTML body
//! - **Header access**: string-typed header reads

use axum::http::HeaderMap;

/// String value of a header, when present and valid UTF-8.
pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Apply fronting-infrastructure transforms to a redirect target.
///
/// When `x-origin-path` equals the first segment of a path-form redirect,
/// that segment is stripped (an upstream rewriter already prepends it).
/// When the request came through CloudFront (`x-amz-cf-id` present),
/// path-form redirects are made absolute against `x-forwarded-host` or
/// `Host`. Absolute targets (e.g. referer-based) pass through untouched.
pub fn finalize_redirect(headers: &HeaderMap, location: String) -> String {
    let mut location = location;

    if location.starts_with('/') {
        if let Some(origin) = header_str(headers, "x-origin-path") {
            let origin = origin.trim_matches('/');
            if !origin.is_empty() {
                if let Some(rest) = location.strip_prefix(&format!("/{origin}")) {
                    if rest.is_empty() {
                        location = "/".to_string();
                    } else if rest.starts_with('/') || rest.starts_with('?') {
                        location = rest.to_string();
                    }
                }
            }
        }
    }

    if location.starts_with('/') && headers.contains_key("x-amz-cf-id") {
        let host =
            header_str(headers, "x-forwarded-host").or_else(|| header_str(headers, "host"));
        if let Some(host) = host {
            location = format!("https://{host}{location}");
        }
    }

    location
}

/// 400 body for identifiers naming a chain this gateway cannot route.
/// Both values come straight from the request URL, so they are escaped.
pub fn unknown_chain_page(chain: &str, store_id: &str) -> String {
    let chain = escape_html(chain);
    let store_id = escape_html(store_id);
    format!(
        "<!DOCTYPE html>\n<html>\n<head><title>Unknown chain</title></head>\n<body>\n\
         <h1>Unknown chain: {chain}</h1>\n\
         <p>The identifier for store <code>{store_id}</code> names a chain this \
         gateway cannot route.</p>\n</body>\n</html>\n"
    )
}

fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
