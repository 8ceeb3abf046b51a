//! Response handling and transformation.
//!
//! # Responsibilities
//! - Map rejections and forwarding failures to JSON error responses
//! - Build synthetic failure responses for short-circuited requests
//! - Attach diagnostic headers
//!
//! # Design Decisions
//! - Error bodies are always `{"error": "..."}`
//! - Synthetic failures carry the plain reason phrase, never JSON, so they
//!   look like an upstream failing on its own
//! - Upstream transport errors are 502, distinct from injected failures

use axum::body::Body;
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::forwarding::ForwardError;
use crate::policy::{FailRate, RejectionReason};
use crate::usage::UsageStatus;

/// Effective fail-rate percentage used for the request.
pub const FAIL_RATE_HEADER: HeaderName = HeaderName::from_static("x-chaos-fail-rate");

/// `1` if the usage write succeeded, `0` otherwise. Persisted mode only.
pub const USAGE_RECORDED_HEADER: HeaderName = HeaderName::from_static("x-chaos-usage-recorded");

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// An error answered directly to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<RejectionReason> for ApiError {
    fn from(reason: RejectionReason) -> Self {
        let status = match &reason {
            RejectionReason::InvalidInput(_) => StatusCode::BAD_REQUEST,
            RejectionReason::MissingKey | RejectionReason::Unauthorized => StatusCode::UNAUTHORIZED,
            RejectionReason::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            RejectionReason::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, reason.to_string())
    }
}

impl From<ForwardError> for ApiError {
    fn from(err: ForwardError) -> Self {
        let status = match &err {
            ForwardError::InvalidTarget { .. } => StatusCode::BAD_REQUEST,
            ForwardError::Request(_) | ForwardError::Transport(_) | ForwardError::Timeout(_) => {
                StatusCode::BAD_GATEWAY
            }
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

/// Response sent instead of forwarding when a failure is injected.
pub fn synthetic_failure(status: StatusCode) -> Response {
    let reason = status.canonical_reason().unwrap_or_default();
    let mut response = Response::new(Body::from(reason));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

pub fn set_fail_rate_header(response: &mut Response, fail_rate: FailRate) {
    if let Ok(value) = HeaderValue::from_str(&fail_rate.to_string()) {
        response.headers_mut().insert(FAIL_RATE_HEADER, value);
    }
}

pub fn set_usage_header(response: &mut Response, status: UsageStatus) {
    response
        .headers_mut()
        .insert(USAGE_RECORDED_HEADER, HeaderValue::from_static(status.header_value()));
}
