//! Request handlers for both operating modes.
//!
//! Sandbox and persisted mode only differ in how the policy is resolved and
//! whether usage is recorded. Both then run the same chaos pipeline:
//! delay, maybe short-circuit, otherwise forward.

use std::collections::HashMap;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use crate::chaos::apply_delay;
use crate::forwarding::build_upstream_uri;
use crate::http::request::{request_id, split_key_path};
use crate::http::response::{
    set_fail_rate_header, set_usage_header, synthetic_failure, ApiError,
};
use crate::http::server::AppState;
use crate::observability::metrics;
use crate::policy::{resolve_persisted, resolve_sandbox, ForwardingPolicy, RejectionReason};

const MODE_SANDBOX: &str = "sandbox";
const MODE_PERSISTED: &str = "persisted";

/// How the pipeline ended, for metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Rejected,
    ShortCircuited,
    Forwarded,
    UpstreamError,
}

impl Outcome {
    fn as_str(&self) -> &'static str {
        match self {
            Outcome::Rejected => "rejected",
            Outcome::ShortCircuited => "short_circuited",
            Outcome::Forwarded => "forwarded",
            Outcome::UpstreamError => "upstream_error",
        }
    }
}

/// `GET /health`
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Any path no route matches, in practice `/` with no key segment.
pub async fn missing_key() -> Response {
    ApiError::from(RejectionReason::MissingKey).into_response()
}

/// `GET /sandbox?url=...&failrate=...&failCodes=...&minLatency=...&maxLatency=...`
pub async fn sandbox_handler(State(state): State<AppState>, request: Request) -> Response {
    let start = Instant::now();
    let request_id = request_id(request.headers());
    let query = query_params(request.uri().query());

    let policy = match resolve_sandbox(&query) {
        Ok(policy) => policy,
        Err(reason) => {
            tracing::debug!(request_id = %request_id, reason = %reason, "Sandbox request rejected");
            return reject(MODE_SANDBOX, ApiError::from(reason), start);
        }
    };

    tracing::debug!(
        request_id = %request_id,
        target = %policy.target,
        fail_rate = %policy.chaos.fail_rate,
        "Sandbox request accepted"
    );

    let upstream_uri = policy.target.as_str().to_string();
    let (mut response, outcome) = run_pipeline(&state, &policy, request, &upstream_uri, &request_id).await;
    set_fail_rate_header(&mut response, policy.chaos.fail_rate);

    metrics::record_request(MODE_SANDBOX, outcome.as_str(), response.status().as_u16(), start);
    response
}

/// `ANY /{key}/{rest...}`
///
/// After the response is built, waits up to `usage.settle_grace_ms` for the
/// usage write so `X-Chaos-Usage-Recorded` reflects it. A slow usage sink
/// therefore adds at most that grace period to every keyed response.
pub async fn key_proxy_handler(State(state): State<AppState>, request: Request) -> Response {
    let start = Instant::now();
    let request_id = request_id(request.headers());
    let (key, rest) = {
        let (key, rest) = split_key_path(request.uri().path());
        (key.to_string(), rest.to_string())
    };

    let persisted = match resolve_persisted(state.key_store.as_ref(), &key, request.method()).await {
        Ok(persisted) => persisted,
        Err(reason) => {
            tracing::info!(
                request_id = %request_id,
                method = %request.method(),
                reason = %reason,
                "Keyed request rejected"
            );
            return reject(MODE_PERSISTED, ApiError::from(reason), start);
        }
    };

    // Accepted from here on: count it even if the chaos or the upstream fails.
    let usage = state.recorder.begin(persisted.id);

    let policy = &persisted.policy;
    let upstream_uri = build_upstream_uri(&policy.target, &rest, request.uri().query());
    tracing::debug!(
        request_id = %request_id,
        key_id = %persisted.id,
        upstream = %upstream_uri,
        fail_rate = %policy.chaos.fail_rate,
        "Keyed request accepted"
    );

    let (mut response, outcome) = run_pipeline(&state, policy, request, &upstream_uri, &request_id).await;
    set_fail_rate_header(&mut response, policy.chaos.fail_rate);
    set_usage_header(&mut response, usage.settle().await);

    metrics::record_request(MODE_PERSISTED, outcome.as_str(), response.status().as_u16(), start);
    response
}

/// Delay, then either answer with an injected failure or forward upstream.
async fn run_pipeline(
    state: &AppState,
    policy: &ForwardingPolicy,
    request: Request<Body>,
    upstream_uri: &str,
    request_id: &str,
) -> (Response, Outcome) {
    let injection = state.injector.inject(&policy.chaos);

    if !injection.delay.is_zero() {
        metrics::record_injected_delay(injection.delay);
        tracing::debug!(request_id = %request_id, delay_ms = injection.delay.as_millis() as u64, "Injecting latency");
    }
    apply_delay(injection.delay).await;

    if let Some(status) = injection.short_circuit {
        tracing::info!(request_id = %request_id, status = status.as_u16(), "Injected failure");
        metrics::record_short_circuit(status.as_u16());
        return (synthetic_failure(status), Outcome::ShortCircuited);
    }

    match state.forwarder.forward(request, upstream_uri).await {
        Ok(response) => (response, Outcome::Forwarded),
        Err(e) => {
            tracing::warn!(
                request_id = %request_id,
                upstream = %upstream_uri,
                error = %e,
                "Upstream request failed"
            );
            metrics::record_upstream_error(e.kind());
            (ApiError::from(e).into_response(), Outcome::UpstreamError)
        }
    }
}

fn reject(mode: &'static str, error: ApiError, start: Instant) -> Response {
    metrics::record_request(mode, Outcome::Rejected.as_str(), error.status.as_u16(), start);
    error.into_response()
}

/// Decode the query string. The first occurrence of a repeated name wins.
fn query_params(query: Option<&str>) -> HashMap<String, String> {
    let mut params = HashMap::new();
    if let Some(query) = query {
        for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
            params.entry(name.into_owned()).or_insert_with(|| value.into_owned());
        }
    }
    params
}
