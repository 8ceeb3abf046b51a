//! Forwarding policy types.
//!
//! A `ForwardingPolicy` is built fresh for every request and never mutated
//! afterwards. All validation happens while constructing these types, so the
//! fault injector and the forwarding engine can trust their inputs.

use std::fmt;
use std::str::FromStr;

use axum::http::{Method, StatusCode};
use url::Url;

/// Status used when a short-circuit fires and the policy lists no codes.
pub const DEFAULT_FAILURE_STATUS: StatusCode = StatusCode::INTERNAL_SERVER_ERROR;

/// Error produced when a target URL cannot be used for forwarding.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TargetUrlError {
    #[error("target URL is empty")]
    Empty,
    #[error("target URL is malformed: {0}")]
    Malformed(#[from] url::ParseError),
    #[error("target URL must use http or https scheme (got `{0}`)")]
    UnsupportedScheme(String),
    #[error("target URL has no host")]
    MissingHost,
}

/// An absolute upstream URL restricted to `http` and `https`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetUrl(Url);

impl TargetUrl {
    /// Parse and validate a raw target URL.
    pub fn parse(raw: &str) -> Result<Self, TargetUrlError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(TargetUrlError::Empty);
        }

        let url = Url::parse(raw)?;
        match url.scheme() {
            "http" | "https" => {}
            other => return Err(TargetUrlError::UnsupportedScheme(other.to_string())),
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(TargetUrlError::MissingHost);
        }

        Ok(Self(url))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for TargetUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

/// Which inbound methods a policy accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedMethod {
    Specific(Method),
    Any,
}

impl AllowedMethod {
    pub fn permits(&self, method: &Method) -> bool {
        match self {
            AllowedMethod::Any => true,
            AllowedMethod::Specific(allowed) => allowed == method,
        }
    }
}

impl FromStr for AllowedMethod {
    type Err = axum::http::method::InvalidMethod;

    /// `ANY`, `*` and the empty string are the wildcard; anything else must be
    /// a valid method token and is compared case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        match upper.as_str() {
            "" | "ANY" | "*" => Ok(AllowedMethod::Any),
            other => Method::from_bytes(other.as_bytes()).map(AllowedMethod::Specific),
        }
    }
}

impl fmt::Display for AllowedMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllowedMethod::Any => f.write_str("ANY"),
            AllowedMethod::Specific(m) => write!(f, "{}", m),
        }
    }
}

/// Injected latency bounds in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LatencyRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl LatencyRange {
    pub fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    pub fn fixed(ms: u64) -> Self {
        Self { min_ms: ms, max_ms: ms }
    }

    /// True when no delay is ever injected.
    pub fn is_zero(&self) -> bool {
        self.min_ms == 0 && self.max_ms == 0
    }

    /// Width of the random part of the delay; zero means the delay is fixed at `min_ms`.
    pub fn spread(&self) -> u64 {
        self.max_ms.saturating_sub(self.min_ms)
    }
}

/// Probability of short-circuiting, as a percentage in `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct FailRate(f64);

impl FailRate {
    pub const NEVER: FailRate = FailRate(0.0);
    pub const ALWAYS: FailRate = FailRate(100.0);

    /// Build from a percentage, rejecting values outside `[0, 100]` and NaN.
    pub fn from_percent(percent: f64) -> Option<Self> {
        (0.0..=100.0).contains(&percent).then_some(Self(percent))
    }

    /// Build from a percentage, clamping into `[0, 100]`. NaN becomes zero.
    pub fn clamped_percent(percent: f64) -> Self {
        if percent.is_nan() {
            return Self::NEVER;
        }
        Self(percent.clamp(0.0, 100.0))
    }

    pub fn percent(&self) -> f64 {
        self.0
    }

    /// The rate as a probability in `[0, 1]`.
    pub fn fraction(&self) -> f64 {
        self.0 / 100.0
    }
}

impl fmt::Display for FailRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The fault-injection half of a policy.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChaosPolicy {
    pub latency: LatencyRange,
    pub fail_rate: FailRate,
    pub error_codes: Vec<StatusCode>,
}

/// The resolved chaos/forwarding contract for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardingPolicy {
    pub target: TargetUrl,
    pub allowed_method: AllowedMethod,
    pub chaos: ChaosPolicy,
}

/// Opaque identifier of a persisted key, used only for accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyId(pub i64);

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stored key after strict validation.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedKey {
    pub id: KeyId,
    pub active: bool,
    pub policy: ForwardingPolicy,
}
