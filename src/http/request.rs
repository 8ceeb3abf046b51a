//! Request handling and transformation.
//!
//! # Responsibilities
//! - Generate unique request ID (UUID v4) when the caller sent none
//! - Normalize repeated slashes before routing
//! - Split persisted-mode paths into key and remainder
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - The remainder is taken from the raw path so percent-encoding survives

use axum::extract::Request;
use axum::http::uri::PathAndQuery;
use axum::http::{HeaderMap, HeaderName, Uri};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Layer that stamps a UUID v4 `x-request-id` on requests without one.
pub fn set_request_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid)
}

/// Layer that copies `x-request-id` from the request onto the response.
pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::new(X_REQUEST_ID)
}

/// The request ID for logging, or "unknown".
pub fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}

/// Collapse runs of `/` in the path, e.g. `//health` → `/health`.
///
/// Front-end proxies that mount this service under a prefix sometimes send
/// doubled slashes.
pub fn collapse_slashes(mut request: Request) -> Request {
    let path = request.uri().path();
    if !path.contains("//") {
        return request;
    }

    let mut collapsed = String::with_capacity(path.len());
    let mut previous_slash = false;
    for c in path.chars() {
        let is_slash = c == '/';
        if !(is_slash && previous_slash) {
            collapsed.push(c);
        }
        previous_slash = is_slash;
    }
    if let Some(query) = request.uri().query() {
        collapsed.push('?');
        collapsed.push_str(query);
    }

    let mut parts = request.uri().clone().into_parts();
    match PathAndQuery::try_from(collapsed) {
        Ok(path_and_query) => {
            parts.path_and_query = Some(path_and_query);
            if let Ok(uri) = Uri::from_parts(parts) {
                *request.uri_mut() = uri;
            }
        }
        Err(e) => tracing::debug!(error = %e, "Could not normalize request path"),
    }
    request
}

/// Split `/{key}/{rest...}` into `(key, rest)`. `rest` has no leading slash.
pub fn split_key_path(path: &str) -> (&str, &str) {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    match trimmed.split_once('/') {
        Some((key, rest)) => (key, rest),
        None => (trimmed, ""),
    }
}
