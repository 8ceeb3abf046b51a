//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Check backend requirements (sqlite needs a database URL)
//! - Detect duplicate keys and ids
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system
//! - Key policies are not validated here; the resolver rejects bad keys per request

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::{ProxyConfig, StoreBackend};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("`{}` is not a socket address", config.listener.bind_address),
        ));
    }

    for (field, value) in [
        ("timeouts.connect_secs", config.timeouts.connect_secs),
        ("timeouts.request_secs", config.timeouts.request_secs),
        ("timeouts.upstream_secs", config.timeouts.upstream_secs),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be greater than zero"));
        }
    }

    if config.store.backend == StoreBackend::Sqlite
        && config.store.database_url.as_deref().map_or(true, str::is_empty)
    {
        errors.push(ValidationError::new(
            "store.database_url",
            "required when store.backend = \"sqlite\"",
        ));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("`{}` is not a socket address", config.observability.metrics_address),
        ));
    }

    let mut seen_keys = HashSet::new();
    let mut seen_ids = HashSet::new();
    for (i, key) in config.keys.iter().enumerate() {
        if key.key.trim().is_empty() {
            errors.push(ValidationError::new(format!("keys[{}].key", i), "must not be empty"));
        } else if key.key.contains('/') {
            errors.push(ValidationError::new(format!("keys[{}].key", i), "must not contain '/'"));
        }
        if !seen_keys.insert(key.key.as_str()) {
            errors.push(ValidationError::new(
                format!("keys[{}].key", i),
                format!("duplicate key `{}`", key.key),
            ));
        }
        if !seen_ids.insert(key.id) {
            errors.push(ValidationError::new(
                format!("keys[{}].id", i),
                format!("duplicate id {}", key.id),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
