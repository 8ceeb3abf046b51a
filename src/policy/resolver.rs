//! Policy resolution for both entry modes.
//!
//! Sandbox callers are ad-hoc testers, so their numeric parameters are parsed
//! permissively: anything malformed falls back to zero or empty. Persisted
//! keys are validated configuration, so malformed stored values reject the
//! request instead of being reinterpreted.

use std::collections::HashMap;

use axum::http::{Method, StatusCode};

use crate::policy::types::{
    AllowedMethod, ChaosPolicy, FailRate, ForwardingPolicy, KeyId, LatencyRange, PersistedKey,
    TargetUrl, TargetUrlError,
};
use crate::store::{KeyRecord, KeyStore};

/// Why a request could not be resolved to a policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RejectionReason {
    #[error("{0}")]
    InvalidInput(String),
    #[error("API key path segment is required")]
    MissingKey,
    /// Unknown and inactive keys are deliberately indistinguishable.
    #[error("Invalid or inactive API key")]
    Unauthorized,
    #[error("Method {method} not allowed (config method: {allowed})")]
    MethodNotAllowed { method: Method, allowed: AllowedMethod },
    #[error("Internal server error")]
    Internal,
}

/// Query parameter names accepted by the sandbox endpoint.
pub mod params {
    pub const URL: &str = "url";
    pub const FAIL_RATE: &str = "failrate";
    pub const FAIL_CODES: &str = "failCodes";
    pub const MIN_LATENCY: &str = "minLatency";
    pub const MAX_LATENCY: &str = "maxLatency";
}

/// Resolve a sandbox policy from raw query parameters.
pub fn resolve_sandbox(query: &HashMap<String, String>) -> Result<ForwardingPolicy, RejectionReason> {
    let raw_url = query.get(params::URL).map(String::as_str).unwrap_or("");
    if raw_url.trim().is_empty() {
        return Err(RejectionReason::InvalidInput("url parameter is required".into()));
    }
    let target = TargetUrl::parse(raw_url).map_err(|e| match e {
        TargetUrlError::UnsupportedScheme(_) => {
            RejectionReason::InvalidInput("url must use http or https scheme".into())
        }
        other => RejectionReason::InvalidInput(format!("invalid url: {}", other)),
    })?;

    // failrate is a 0-1 fraction on the wire
    let fraction = query
        .get(params::FAIL_RATE)
        .and_then(|v| v.trim().parse::<f64>().ok())
        .unwrap_or(0.0);
    let fail_rate = FailRate::clamped_percent(fraction * 100.0);

    let error_codes = query
        .get(params::FAIL_CODES)
        .map(|v| parse_fail_codes(v))
        .unwrap_or_default();

    let min_ms = parse_millis(query.get(params::MIN_LATENCY));
    let max_ms = parse_millis(query.get(params::MAX_LATENCY));

    Ok(ForwardingPolicy {
        target,
        allowed_method: AllowedMethod::Any,
        chaos: ChaosPolicy {
            latency: LatencyRange::new(min_ms, max_ms),
            fail_rate,
            error_codes,
        },
    })
}

/// Parse a comma separated status list. A single malformed entry discards the whole list.
pub fn parse_fail_codes(raw: &str) -> Vec<StatusCode> {
    let mut codes = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.parse::<u16>().ok().and_then(status_in_range) {
            Some(code) => codes.push(code),
            None => return Vec::new(),
        }
    }
    codes
}

fn parse_millis(raw: Option<&String>) -> u64 {
    raw.and_then(|v| v.trim().parse::<u64>().ok()).unwrap_or(0)
}

fn status_in_range(code: u16) -> Option<StatusCode> {
    if (100..=599).contains(&code) {
        StatusCode::from_u16(code).ok()
    } else {
        None
    }
}

/// Resolve a persisted key, checking it against the inbound method.
///
/// The key store lookup is the only side effect.
pub async fn resolve_persisted(
    store: &dyn KeyStore,
    key: &str,
    method: &Method,
) -> Result<PersistedKey, RejectionReason> {
    if key.is_empty() {
        return Err(RejectionReason::MissingKey);
    }

    let record = match store.lookup(key).await {
        Ok(Some(record)) => record,
        Ok(None) => return Err(RejectionReason::Unauthorized),
        Err(e) => {
            tracing::error!(error = %e, "Key lookup failed");
            return Err(RejectionReason::Internal);
        }
    };
    if !record.active {
        return Err(RejectionReason::Unauthorized);
    }

    let persisted = validate_record(&record)?;
    if !persisted.policy.allowed_method.permits(method) {
        return Err(RejectionReason::MethodNotAllowed {
            method: method.clone(),
            allowed: persisted.policy.allowed_method.clone(),
        });
    }

    Ok(persisted)
}

/// Strictly convert a stored record into a policy.
pub fn validate_record(record: &KeyRecord) -> Result<PersistedKey, RejectionReason> {
    let target = TargetUrl::parse(&record.target_url).map_err(|e| match e {
        TargetUrlError::Empty => RejectionReason::InvalidInput(
            "Config key has no target URL. Set target_url in Configs.".into(),
        ),
        TargetUrlError::UnsupportedScheme(_) => {
            RejectionReason::InvalidInput("target_url must use http or https scheme".into())
        }
        other => RejectionReason::InvalidInput(format!("target_url is invalid: {}", other)),
    })?;

    let allowed_method = record.method.parse::<AllowedMethod>().map_err(|_| {
        RejectionReason::InvalidInput(format!("stored method `{}` is invalid", record.method))
    })?;

    let fail_rate = FailRate::from_percent(record.fail_rate as f64).ok_or_else(|| {
        RejectionReason::InvalidInput(format!(
            "stored fail_rate {} is outside 0-100",
            record.fail_rate
        ))
    })?;

    let min_ms = u64::try_from(record.min_latency).map_err(|_| {
        RejectionReason::InvalidInput(format!("stored min_latency {} is negative", record.min_latency))
    })?;
    let max_ms = u64::try_from(record.max_latency).map_err(|_| {
        RejectionReason::InvalidInput(format!("stored max_latency {} is negative", record.max_latency))
    })?;

    let error_codes = record
        .error_codes
        .iter()
        .map(|&code| {
            u16::try_from(code).ok().and_then(status_in_range).ok_or_else(|| {
                RejectionReason::InvalidInput(format!("stored error code {} is not 100-599", code))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(PersistedKey {
        id: KeyId(record.id),
        active: record.active,
        policy: ForwardingPolicy {
            target,
            allowed_method,
            chaos: ChaosPolicy {
                latency: LatencyRange::new(min_ms, max_ms),
                fail_rate,
                error_codes,
            },
        },
    })
}
